//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use callgate_core::{CallStateCoordinator, Subscription};
use callgate_types::{CallId, CallSession, CallState};

pub fn session(id: &str) -> CallSession {
    CallSession::new(CallId::new(id).expect("test call ids are non-empty"))
}

/// Records every snapshot a subscriber receives.
pub struct Recorder {
    seen: Arc<Mutex<Vec<CallState>>>,
    subscription: Subscription,
}

impl Recorder {
    pub fn attach(coordinator: &CallStateCoordinator) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription =
            coordinator.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
        Self { seen, subscription }
    }

    pub fn snapshots(&self) -> Vec<CallState> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn detach(self) -> Vec<CallState> {
        self.subscription.unsubscribe();
        self.seen.lock().unwrap().clone()
    }
}
