//! Notifications from a run to its observer, and the stop signal going back.
//!
//! All observer callbacks are made from the thread that called
//! [`crate::scheduler::run`]; workers never call the observer directly.

use crate::scheduler::RunOutcome;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a run and its caller.
///
/// Cloning shares the flag. Work already started is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for the call that actually raised the flag.
    pub fn request_stop(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

/// Receives run notifications.
///
/// `on_done` is called exactly once per run and nothing follows it.
pub trait ProgressObserver {
    fn on_progress(&self, event: &ProgressEvent);
    /// One call per failed file, or once for a failure that ends the run.
    fn on_error(&self, message: &str);
    fn on_done(&self, outcome: &RunOutcome);
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(ProgressEvent),
    Error(String),
    Done(RunOutcome),
}

/// Forwards every notification as a [`RunEvent`] over a channel, for
/// consumers that drain events on their own thread.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: RunEvent) {
        // A dropped receiver just means nobody is listening any more.
        if self.tx.send(event).is_err() {
            tracing::trace!("Run event dropped, receiver gone");
        }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.send(RunEvent::Progress(event.clone()));
    }

    fn on_error(&self, message: &str) {
        self.send(RunEvent::Error(message.to_string()));
    }

    fn on_done(&self, outcome: &RunOutcome) {
        self.send(RunEvent::Done(outcome.clone()));
    }
}
