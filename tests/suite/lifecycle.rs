//! Call lifecycle flows driven through the coordinator

use callgate_core::{BeginCallError, CallStateCoordinator};
use callgate_types::{
    CallEvent, CallPhase, CallState, CallTransitionError, CoordinatorSettings, IncomingPolicy,
};

use crate::common::{Recorder, session};

fn call_waiting() -> CallStateCoordinator {
    CallStateCoordinator::new(CoordinatorSettings::new(IncomingPolicy::Allow, None))
}

#[test]
fn outbound_call_phases_are_observed_in_order() {
    let coordinator = CallStateCoordinator::default();
    let recorder = Recorder::attach(&coordinator);

    let guard = coordinator.try_begin_call().unwrap();
    guard.connected(session("c1")).unwrap();
    coordinator.try_begin_hangup().unwrap().finish();

    let phases: Vec<CallPhase> = recorder.snapshots().iter().map(CallState::phase).collect();
    assert_eq!(
        phases,
        [
            CallPhase::Initiating,
            CallPhase::Active,
            CallPhase::Terminating,
            CallPhase::Idle
        ]
    );
}

#[test]
fn incoming_accept_then_hangup() {
    let coordinator = CallStateCoordinator::default();
    coordinator.apply(CallEvent::Offer(session("in"))).unwrap();
    assert_eq!(coordinator.phase(), CallPhase::Incoming);

    let state = coordinator.apply(CallEvent::Accept).unwrap();
    assert_eq!(state.active_call, Some(session("in")));
    assert!(state.incoming_call.is_none());
    assert_eq!(
        coordinator.try_begin_call().unwrap_err(),
        BeginCallError::CallActive
    );

    coordinator.try_begin_hangup().unwrap().finish();
    assert_eq!(coordinator.state(), CallState::default());
}

#[test]
fn rejected_event_leaves_state_and_listeners_untouched() {
    let coordinator = CallStateCoordinator::default();
    coordinator.apply(CallEvent::Offer(session("in"))).unwrap();
    let before = coordinator.state();
    let recorder = Recorder::attach(&coordinator);

    let err = coordinator.apply(CallEvent::HangupFinished).unwrap_err();
    assert_eq!(
        err,
        CallTransitionError::Illegal {
            from: CallPhase::Incoming,
            event: "hangup_finished"
        }
    );
    assert_eq!(coordinator.state(), before);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn default_policy_refuses_offer_during_call() {
    let coordinator = CallStateCoordinator::default();
    coordinator
        .try_begin_call()
        .unwrap()
        .connected(session("c1"))
        .unwrap();

    let err = coordinator
        .apply(CallEvent::Offer(session("in")))
        .unwrap_err();
    assert_eq!(
        err,
        CallTransitionError::Busy {
            phase: CallPhase::Active
        }
    );
    assert!(coordinator.state().incoming_call.is_none());
}

#[test]
fn call_waiting_surfaces_offer_after_hangup() {
    let coordinator = call_waiting();
    coordinator
        .try_begin_call()
        .unwrap()
        .connected(session("c1"))
        .unwrap();

    let state = coordinator.apply(CallEvent::Offer(session("in"))).unwrap();
    assert_eq!(state.active_call, Some(session("c1")));
    assert_eq!(state.incoming_call, Some(session("in")));

    // Accepting requires hanging up first.
    assert!(coordinator.apply(CallEvent::Accept).is_err());

    coordinator.try_begin_hangup().unwrap().finish();
    assert_eq!(coordinator.phase(), CallPhase::Incoming);

    let state = coordinator.apply(CallEvent::Accept).unwrap();
    assert_eq!(state.active_call, Some(session("in")));
}

#[test]
fn offer_during_dial_out_is_held_with_call_waiting() {
    let coordinator = call_waiting();
    let guard = coordinator.try_begin_call().unwrap();

    coordinator.apply(CallEvent::Offer(session("in"))).unwrap();
    assert_eq!(coordinator.phase(), CallPhase::Initiating);

    let state = guard.failed();
    assert_eq!(state.phase(), CallPhase::Incoming);
    assert_eq!(state.incoming_call, Some(session("in")));
}

#[test]
fn dial_out_allowed_while_offer_pending() {
    let coordinator = CallStateCoordinator::default();
    coordinator.apply(CallEvent::Offer(session("in"))).unwrap();
    assert!(coordinator.can_initiate_call());

    let guard = coordinator.try_begin_call().unwrap();
    let state = guard.connected(session("out")).unwrap();
    assert_eq!(state.active_call, Some(session("out")));
    assert_eq!(state.incoming_call, Some(session("in")));

    let state = coordinator.apply(CallEvent::Decline).unwrap();
    assert!(state.incoming_call.is_none());
    assert_eq!(state.phase(), CallPhase::Active);
}
