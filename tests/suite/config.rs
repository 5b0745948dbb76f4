//! Configuration wiring tests

use std::{env, fs};
use std::time::Duration;

use callgate_config::{CONFIG_PATH_ENV, CallgateConfig, ConfigError};
use callgate_core::CallStateCoordinator;
use callgate_types::{CallEvent, IncomingPolicy};
use tokio::time;

use crate::common::session;

#[test]
fn config_file_drives_coordinator_policy() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.toml");
    fs::write(&path, "[coordinator]\nincoming_policy = \"allow\"\n").unwrap();

    let config = CallgateConfig::load_from(&path).unwrap();
    let coordinator = CallStateCoordinator::new(*config.coordinator());
    assert_eq!(
        coordinator.settings().incoming_policy(),
        IncomingPolicy::Allow
    );

    coordinator
        .try_begin_call()
        .unwrap()
        .connected(session("c1"))
        .unwrap();
    assert!(coordinator.apply(CallEvent::Offer(session("in"))).is_ok());
}

#[test]
fn env_override_points_load_at_file() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("custom.toml");
    fs::write(&path, "[coordinator]\nprocessing_timeout_ms = 750\n").unwrap();

    unsafe {
        env::set_var(CONFIG_PATH_ENV, &path);
    }
    let loaded = CallgateConfig::load();
    let reported = CallgateConfig::path();
    unsafe {
        env::remove_var(CONFIG_PATH_ENV);
    }

    assert_eq!(reported.as_deref(), Some(path.as_path()));
    let config = loaded.unwrap().expect("config file exists");
    assert_eq!(
        config
            .coordinator()
            .processing_timeout()
            .map(|timeout| timeout.as_duration()),
        Some(Duration::from_millis(750))
    );
}

#[test]
fn invalid_file_reports_path() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.toml");
    fs::write(&path, "[coordinator]\nprocessing_timeout_ms = 0\n").unwrap();

    let err = CallgateConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
    assert_eq!(err.path(), path.as_path());
    assert!(err.to_string().contains("greater than zero"));
}

#[tokio::test]
async fn configured_timeout_starts_watchdog() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.toml");
    fs::write(&path, "[coordinator]\nprocessing_timeout_ms = 20\n").unwrap();

    let config = CallgateConfig::load_from(&path).unwrap();
    let coordinator = CallStateCoordinator::new(*config.coordinator());
    let watchdog = coordinator.start_watchdog().expect("timeout is configured");

    coordinator.set_processing(true);
    time::sleep(Duration::from_millis(200)).await;
    assert!(coordinator.can_initiate_call());
    watchdog.abort();
}
