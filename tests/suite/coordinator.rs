//! Shared state coordinator contract tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use callgate_core::CallStateCoordinator;
use callgate_types::{CallState, CallStatePatch};

use crate::common::{Recorder, session};

#[test]
fn state_after_updates_is_shallow_merge() {
    let coordinator = CallStateCoordinator::default();
    let patches = vec![
        CallStatePatch::new().processing(true),
        CallStatePatch::new().incoming_call(session("in-1")),
        CallStatePatch::new()
            .processing(false)
            .active_call(session("c1")),
        CallStatePatch::new(),
        CallStatePatch::new().clear_incoming_call(),
        CallStatePatch::new().incoming_call(session("in-2")),
    ];

    let mut expected = CallState::default();
    for patch in patches {
        expected.merge(patch.clone());
        coordinator.set_state(patch);
        assert_eq!(coordinator.state(), expected);
    }
}

#[test]
fn gate_matches_predicate_in_every_state() {
    let coordinator = CallStateCoordinator::default();
    let slots = [None, Some(session("x"))];
    for active in &slots {
        for incoming in &slots {
            for processing in [false, true] {
                let target = CallState {
                    active_call: active.clone(),
                    incoming_call: incoming.clone(),
                    is_processing: processing,
                };
                coordinator.set_state(CallStatePatch::from(target));
                assert_eq!(
                    coordinator.can_initiate_call(),
                    !processing && active.is_none()
                );
            }
        }
    }
}

#[test]
fn processing_update_notifies_exactly_once() {
    let coordinator = CallStateCoordinator::default();
    let recorder = Recorder::attach(&coordinator);

    coordinator.set_state(CallStatePatch::new().processing(true));

    let seen = recorder.snapshots();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].is_processing);
}

#[test]
fn unsubscribed_listener_is_not_called() {
    let coordinator = CallStateCoordinator::default();
    let recorder = Recorder::attach(&coordinator);
    coordinator.set_processing(true);

    let seen = recorder.detach();
    coordinator.set_processing(false);
    coordinator.set_state(CallStatePatch::new().active_call(session("c1")));

    assert_eq!(seen.len(), 1);
    assert_eq!(coordinator.listener_count(), 0);
}

#[test]
fn snapshots_do_not_alias_live_state() {
    let coordinator = CallStateCoordinator::default();
    let mut first = coordinator.state();
    let second = coordinator.state();

    first.active_call = Some(session("mutated"));
    assert_ne!(first, second);
    assert_eq!(coordinator.state(), CallState::default());

    coordinator.set_processing(true);
    assert!(!second.is_processing);
}

#[test]
fn dial_connect_hangup_notifies_each_step() {
    let coordinator = CallStateCoordinator::default();
    let recorder = Recorder::attach(&coordinator);
    assert!(coordinator.can_initiate_call());

    coordinator.set_processing(true);
    assert!(!coordinator.can_initiate_call());

    coordinator.set_state(
        CallStatePatch::new()
            .processing(false)
            .active_call(session("c1")),
    );
    assert!(!coordinator.can_initiate_call());

    coordinator.set_state(CallStatePatch::new().clear_active_call());
    assert!(coordinator.can_initiate_call());

    let dialling = CallState {
        is_processing: true,
        ..CallState::default()
    };
    let connected = CallState {
        active_call: Some(session("c1")),
        ..CallState::default()
    };
    assert_eq!(
        recorder.detach(),
        vec![dialling, connected, CallState::default()]
    );
}

#[test]
fn concurrent_updates_reach_listeners_in_commit_order() {
    let coordinator = CallStateCoordinator::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let _slow = coordinator.subscribe(move |state| {
        if state.is_processing {
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
        }
    });
    let recorder = Recorder::attach(&coordinator);

    let raiser = {
        let coordinator = coordinator.clone();
        thread::spawn(move || coordinator.set_processing(true))
    };
    entered_rx.recv().unwrap();
    coordinator.set_processing(false);

    // Returning means every listener has seen the lowered flag.
    assert_eq!(recorder.snapshots().last(), Some(&coordinator.state()));
    raiser.join().unwrap();

    let flags: Vec<bool> = recorder
        .detach()
        .iter()
        .map(|state| state.is_processing)
        .collect();
    assert_eq!(flags, [true, false]);
}

#[test]
fn advisory_check_then_set_blocks_second_observer() {
    let coordinator = CallStateCoordinator::default();
    let first = coordinator.clone();
    let second = coordinator.clone();

    // Observer one: check, then set immediately.
    assert!(first.can_initiate_call());
    first.set_processing(true);

    // Observer two sees the gate closed.
    assert!(!second.can_initiate_call());

    // Cleanup path lowers it again.
    first.set_processing(false);
    assert!(second.can_initiate_call());
}

#[test]
fn clones_share_listeners_and_state() {
    let coordinator = CallStateCoordinator::default();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let _sub = coordinator.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let other = coordinator.clone();
    other.set_processing(true);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(coordinator.state().is_processing);
}

#[tokio::test]
async fn watch_receiver_wakes_on_update() {
    let coordinator = CallStateCoordinator::default();
    let mut rx = coordinator.watch();

    let writer = coordinator.clone();
    tokio::spawn(async move {
        writer.set_state(CallStatePatch::new().incoming_call(session("in")));
    });

    rx.changed().await.unwrap();
    let change = rx.borrow_and_update().clone();
    assert_eq!(change.revision, 1);
    assert_eq!(change.state.incoming_call, Some(session("in")));
}
