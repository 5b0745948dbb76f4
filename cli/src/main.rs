//! callgate CLI - drives the shared call state coordinator.
//!
//! ```text
//! callgate simulate [--observers N] [--fail] [--delay-ms MS]
//! callgate config
//! ```
//!
//! `simulate` races N observers for one outbound call and prints every state
//! notification as a JSON line on stdout. Logs go to
//! `~/.callgate/logs/callgate.log` (or stderr if no log file can be opened).

mod simulate;

use std::{
    env,
    fs::{self, OpenOptions},
    io::{self, stdout},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use callgate_config::CallgateConfig;
use callgate_core::CallStateCoordinator;

use simulate::SimulateOptions;

const USAGE: &str = "usage: callgate simulate [--observers N] [--fail] [--delay-ms MS]\n       callgate config";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the JSON notification stream, so fall back to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: next to the config file, ~/.callgate/logs/callgate.log
    if let Some(config_path) = CallgateConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("callgate.log"));
    }

    candidates.push(PathBuf::from(".callgate").join("logs").join("callgate.log"));

    candidates
}

#[derive(Debug, PartialEq)]
enum Command {
    Simulate(SimulateOptions),
    Config,
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        bail!("missing command\n{USAGE}");
    };

    match command.as_str() {
        "simulate" => {
            let mut options = SimulateOptions::default();
            while let Some(flag) = args.next() {
                match flag.as_str() {
                    "--observers" => {
                        let raw = args.next().context("--observers needs a value")?;
                        options.observers = raw
                            .parse()
                            .with_context(|| format!("invalid observer count: {raw}"))?;
                        if options.observers == 0 {
                            bail!("--observers must be at least 1");
                        }
                    }
                    "--delay-ms" => {
                        let raw = args.next().context("--delay-ms needs a value")?;
                        let ms: u64 = raw
                            .parse()
                            .with_context(|| format!("invalid delay: {raw}"))?;
                        options.dial_delay = Duration::from_millis(ms);
                    }
                    "--fail" => options.fail = true,
                    other => bail!("unknown flag: {other}\n{USAGE}"),
                }
            }
            Ok(Command::Simulate(options))
        }
        "config" => Ok(Command::Config),
        "-h" | "--help" | "help" => bail!("{USAGE}"),
        other => bail!("unknown command: {other}\n{USAGE}"),
    }
}

fn print_config(config: &CallgateConfig) {
    let path = CallgateConfig::path().map_or_else(
        || "(no home directory)".to_string(),
        |p| p.display().to_string(),
    );
    let settings = config.coordinator();
    println!("config: {path}");
    println!("incoming_policy = \"{}\"", settings.incoming_policy());
    match settings.processing_timeout() {
        Some(timeout) => println!(
            "processing_timeout_ms = {}",
            timeout.as_duration().as_millis()
        ),
        None => println!("# processing_timeout_ms not set, watchdog disabled"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let command = parse_args(env::args().skip(1))?;
    let config = CallgateConfig::load()
        .context("failed to load configuration")?
        .unwrap_or_default();

    match command {
        Command::Config => print_config(&config),
        Command::Simulate(options) => {
            let coordinator = CallStateCoordinator::new(*config.coordinator());
            let watchdog = coordinator.start_watchdog();

            let report = simulate::run(&coordinator, &options, stdout().lock()).await?;
            tracing::info!(
                admitted = report.admitted,
                refused = report.refused,
                superseded = report.superseded,
                notifications = report.notifications,
                "Simulation finished"
            );
            eprintln!(
                "admitted {} of {} observers, {} superseded by the watchdog, {} notifications, final phase {}",
                report.admitted,
                report.admitted + report.refused,
                report.superseded,
                report.notifications,
                report.final_state.phase()
            );

            if let Some(watchdog) = watchdog {
                watchdog.abort();
            }
        }
    }

    Ok(())
}
