//! Observer race simulation.
//!
//! Several independent observers all believe they own the decision to dial
//! out. They race through [`CallStateCoordinator::try_begin_call`]; exactly one
//! gets through. The winner connects (or fails), an incoming offer arrives
//! mid-call, and the call is hung up. Every notification is recorded and
//! written as one JSON line.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{Barrier, mpsc};
use tokio::time;

use callgate_core::CallStateCoordinator;
use callgate_types::{CallEvent, CallId, CallPhase, CallSession, CallState, CallTransitionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateOptions {
    pub observers: usize,
    /// Make the admitted initiation fail instead of connecting.
    pub fail: bool,
    pub dial_delay: Duration,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            observers: 4,
            fail: false,
            dial_delay: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationLine<'a> {
    seq: usize,
    phase: CallPhase,
    state: &'a CallState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub admitted: usize,
    pub refused: usize,
    /// Admitted windows closed by the watchdog before they resolved.
    pub superseded: usize,
    pub notifications: usize,
    /// `None` if no call connected, otherwise whether the mid-call offer was held.
    pub offer_held: Option<bool>,
    pub final_state: CallState,
}

enum Attempt {
    Refused,
    Connected,
    Failed,
    Superseded,
}

pub async fn run(
    coordinator: &CallStateCoordinator,
    options: &SimulateOptions,
    mut out: impl Write,
) -> Result<SimulationReport> {
    let observers = options.observers.max(1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = coordinator.subscribe(move |state| {
        let _ = tx.send(state.clone());
    });

    let start = Arc::new(Barrier::new(observers));
    let attempted = Arc::new(Barrier::new(observers));
    let tasks: Vec<_> = (0..observers)
        .map(|index| {
            let coordinator = coordinator.clone();
            let start = Arc::clone(&start);
            let attempted = Arc::clone(&attempted);
            let fail = options.fail;
            let dial_delay = options.dial_delay;
            tokio::spawn(async move {
                start.wait().await;
                let attempt = coordinator.try_begin_call();
                attempted.wait().await;

                let guard = match attempt {
                    Ok(guard) => guard,
                    Err(err) => {
                        tracing::debug!(observer = index, "Initiation refused: {err}");
                        return Ok(Attempt::Refused);
                    }
                };
                tracing::info!(observer = index, "Observer admitted, dialling");
                time::sleep(dial_delay).await;

                if fail {
                    guard.failed();
                    return Ok(Attempt::Failed);
                }
                let call = CallSession::new(CallId::new(format!("outbound-{index}"))?);
                match guard.connected(call) {
                    Ok(_) => Ok::<_, anyhow::Error>(Attempt::Connected),
                    Err(CallTransitionError::Stale { .. }) => {
                        tracing::warn!(
                            observer = index,
                            "Call connected after its window was reset"
                        );
                        Ok(Attempt::Superseded)
                    }
                    Err(err) => Err(err.into()),
                }
            })
        })
        .collect();

    let mut admitted = 0;
    let mut refused = 0;
    let mut superseded = 0;
    let mut connected = false;
    for task in tasks {
        match task.await.context("observer task panicked")?? {
            Attempt::Refused => refused += 1,
            Attempt::Failed => admitted += 1,
            Attempt::Superseded => {
                admitted += 1;
                superseded += 1;
            }
            Attempt::Connected => {
                admitted += 1;
                connected = true;
            }
        }
    }

    let offer_held = if connected {
        Some(offer_mid_call(coordinator)?)
    } else {
        None
    };

    if connected {
        let teardown = coordinator
            .try_begin_hangup()
            .context("hanging up the simulated call")?;
        time::sleep(options.dial_delay).await;
        let epoch = teardown.epoch();
        if teardown.finish().active_call.is_some() {
            tracing::warn!(epoch, "Hangup window was reset, hanging up again");
            superseded += 1;
            coordinator
                .try_begin_hangup()
                .context("retrying the simulated hangup")?
                .finish();
        }
    }
    if coordinator.phase() == CallPhase::Incoming {
        coordinator.apply(CallEvent::Decline)?;
    }

    subscription.unsubscribe();
    let mut notifications = 0;
    while let Ok(state) = rx.try_recv() {
        let line = NotificationLine {
            seq: notifications,
            phase: state.phase(),
            state: &state,
        };
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
        notifications += 1;
    }
    out.flush()?;

    Ok(SimulationReport {
        admitted,
        refused,
        superseded,
        notifications,
        offer_held,
        final_state: coordinator.state(),
    })
}

/// Offer an incoming call while connected. Whether it is held depends on the
/// configured incoming policy.
fn offer_mid_call(coordinator: &CallStateCoordinator) -> Result<bool> {
    let offer = CallSession::new(CallId::new("incoming-1")?);
    match coordinator.apply(CallEvent::Offer(offer)) {
        Ok(_) => Ok(true),
        Err(err) => {
            tracing::info!("Mid-call offer refused: {err}");
            Ok(false)
        }
    }
}
