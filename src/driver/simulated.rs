//! In-memory pipeline driver
//!
//! Tracks live handles and call counts, and lets callers inject failures and
//! bus events. Used by the `--simulate` run mode and throughout the tests.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::constants::BUS_CAPACITY;
use crate::driver::{
    BusMessage, PipelineDriver, PipelineEvent, PipelineHandle, PipelineId, PipelineState,
};
use crate::error::DriverError;

#[derive(Default)]
struct SimulatedInner {
    /// Acquired and not yet stopped
    live: HashSet<PipelineId>,
    playing: HashSet<PipelineId>,
    fail_next_acquire: Option<String>,
    fail_next_play: Option<String>,
    /// Added to every `acquire` and `stop`
    latency: Duration,
    max_live: usize,
}

/// Simulated pipeline driver
pub struct SimulatedDriver {
    name: String,
    inner: Mutex<SimulatedInner>,
    next_id: AtomicU64,
    acquired: AtomicU64,
    stop_calls: AtomicU64,
    bus: broadcast::Sender<BusMessage>,
}

impl SimulatedDriver {
    pub fn new(name: impl Into<String>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            name: name.into(),
            inner: Mutex::new(SimulatedInner::default()),
            next_id: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            bus,
        }
    }

    /// Make `acquire` and `stop` block for `latency`, like a slow device
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Make the next `acquire` fail with the given message
    pub fn fail_next_acquire(&self, message: impl Into<String>) {
        self.inner.lock().fail_next_acquire = Some(message.into());
    }

    /// Make the next `play` fail with the given message
    pub fn fail_next_play(&self, message: impl Into<String>) {
        self.inner.lock().fail_next_play = Some(message.into());
    }

    /// Drop any pending injected failures
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.fail_next_acquire = None;
        inner.fail_next_play = None;
    }

    /// Publish an arbitrary event for a pipeline
    pub fn emit(&self, pipeline: PipelineId, event: PipelineEvent) {
        let _ = self.bus.send(BusMessage::new(pipeline, event));
    }

    /// Simulate a runtime failure of a pipeline
    pub fn emit_error(&self, pipeline: PipelineId, message: impl Into<String>) {
        self.inner.lock().playing.remove(&pipeline);
        self.emit(pipeline, PipelineEvent::Error(message.into()));
    }

    /// Simulate the pipeline running out of media
    pub fn emit_eos(&self, pipeline: PipelineId) {
        self.inner.lock().playing.remove(&pipeline);
        self.emit(pipeline, PipelineEvent::EndOfStream);
    }

    /// Number of handles acquired and not yet released
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Highest number of simultaneously live handles ever observed
    pub fn max_live(&self) -> usize {
        self.inner.lock().max_live
    }

    pub fn live_ids(&self) -> Vec<PipelineId> {
        let mut ids: Vec<_> = self.inner.lock().live.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_playing(&self, pipeline: PipelineId) -> bool {
        self.inner.lock().playing.contains(&pipeline)
    }

    /// Total successful acquisitions
    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Total calls to `stop`
    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn delay(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
    }
}

impl PipelineDriver for SimulatedDriver {
    fn acquire(&self) -> Result<PipelineHandle, DriverError> {
        self.delay();
        let mut inner = self.inner.lock();
        if let Some(message) = inner.fail_next_acquire.take() {
            return Err(DriverError::AcquireFailed(message));
        }

        let id = PipelineId(self.next_id.fetch_add(1, Ordering::SeqCst));
        inner.live.insert(id);
        inner.max_live = inner.max_live.max(inner.live.len());
        self.acquired.fetch_add(1, Ordering::SeqCst);

        tracing::debug!("[{}] acquired {}", self.name, id);
        Ok(PipelineHandle::new(id))
    }

    fn play(&self, handle: &PipelineHandle) -> Result<(), DriverError> {
        {
            let mut inner = self.inner.lock();
            if !inner.live.contains(&handle.id()) {
                return Err(DriverError::UnknownPipeline(handle.id().0));
            }
            if let Some(message) = inner.fail_next_play.take() {
                return Err(DriverError::StartFailed(message));
            }
            inner.playing.insert(handle.id());
        }

        self.emit(handle.id(), PipelineEvent::StateChanged(PipelineState::Playing));
        Ok(())
    }

    fn stop(&self, handle: PipelineHandle) -> Result<(), DriverError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.delay();
        {
            let mut inner = self.inner.lock();
            inner.playing.remove(&handle.id());
            if !inner.live.remove(&handle.id()) {
                return Err(DriverError::UnknownPipeline(handle.id().0));
            }
        }

        tracing::debug!("[{}] released {}", self.name, handle.id());
        self.emit(handle.id(), PipelineEvent::StateChanged(PipelineState::Null));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }

    fn is_running(&self, handle: &PipelineHandle) -> bool {
        self.is_playing(handle.id())
    }
}
