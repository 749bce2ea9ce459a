//! Pipeline driver boundary
//!
//! The control logic never touches media elements directly. It talks to a
//! [`PipelineDriver`], which owns the native capture/encode or
//! receive/decode resource and reports lifecycle events on a bus.

pub mod process;
pub mod simulated;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::DriverError;

pub use process::ProcessDriver;
pub use simulated::SimulatedDriver;

/// Identifier of a pipeline instance created by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

/// Ownership of a live pipeline.
///
/// Deliberately not `Clone`: [`PipelineDriver::stop`] consumes it, so a
/// released pipeline cannot be stopped twice.
#[derive(Debug, PartialEq, Eq)]
pub struct PipelineHandle {
    id: PipelineId,
}

impl PipelineHandle {
    /// Only drivers mint handles
    pub(crate) fn new(id: PipelineId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }
}

/// Native pipeline state, as reported on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle event emitted by a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    Error(String),
    EndOfStream,
}

impl PipelineEvent {
    /// Error and end-of-stream both end the pipeline's useful life
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Error(_) | PipelineEvent::EndOfStream)
    }
}

/// Bus message: an event tagged with the pipeline that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub pipeline: PipelineId,
    pub event: PipelineEvent,
}

impl BusMessage {
    pub fn new(pipeline: PipelineId, event: PipelineEvent) -> Self {
        Self { pipeline, event }
    }
}

/// Capability required from a native media pipeline
pub trait PipelineDriver: Send + Sync {
    /// Build the pipeline resource without running it
    fn acquire(&self) -> Result<PipelineHandle, DriverError>;

    /// Command an acquired pipeline to run
    fn play(&self, handle: &PipelineHandle) -> Result<(), DriverError>;

    /// Stop the pipeline and release its resource
    fn stop(&self, handle: PipelineHandle) -> Result<(), DriverError>;

    /// Subscribe to the driver's event bus
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;

    /// Whether the pipeline is still running. Used to recover state when bus
    /// events were dropped.
    fn is_running(&self, handle: &PipelineHandle) -> bool;

    /// Acquire and run in one step, releasing the resource if it fails to run
    fn acquire_and_start(&self) -> Result<PipelineHandle, DriverError> {
        let handle = self.acquire()?;
        if let Err(e) = self.play(&handle) {
            if let Err(stop_err) = self.stop(handle) {
                tracing::warn!("Failed to release pipeline after start failure: {}", stop_err);
            }
            return Err(e);
        }
        Ok(handle)
    }
}
