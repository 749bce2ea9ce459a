//! Status line updates for the UI
//!
//! The session never touches UI objects. It sends [`StatusUpdate`]s down a
//! single channel and the UI applies them on its own thread, in order.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::client::session::LocalPhase;

/// Enablement of the start/stop controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl Controls {
    pub fn for_phase(phase: LocalPhase) -> Self {
        let playing = phase == LocalPhase::Playing;
        Self {
            start_enabled: !playing,
            stop_enabled: playing,
        }
    }
}

/// One point-in-time summary for the UI; the newest one wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub text: String,
    pub controls: Controls,
}

/// Sending half of the status channel
#[derive(Clone)]
pub struct StatusSink {
    tx: Sender<StatusUpdate>,
}

impl StatusSink {
    pub fn publish(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("Status receiver gone, update dropped");
        }
    }
}

/// Create the channel between a session and its UI
pub fn status_channel() -> (StatusSink, Receiver<StatusUpdate>) {
    let (tx, rx) = unbounded();
    (StatusSink { tx }, rx)
}
