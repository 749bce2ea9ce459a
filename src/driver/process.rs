//! External-process pipeline driver
//!
//! Runs the media pipeline as a child process (by default `gst-launch-1.0`
//! with the configured pipeline description). Each pipeline gets a watcher
//! thread that reports the child's exit on the bus.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::constants::BUS_CAPACITY;
use crate::driver::{
    BusMessage, PipelineDriver, PipelineEvent, PipelineHandle, PipelineId, PipelineState,
};
use crate::error::DriverError;

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// A pipeline slot: acquired, and running once `play` has spawned the child
struct PipelineSlot {
    child: Option<Arc<Mutex<Child>>>,
    stopping: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

/// Driver that runs each pipeline as a child process
pub struct ProcessDriver {
    program: String,
    args: Vec<String>,
    slots: Mutex<HashMap<PipelineId, PipelineSlot>>,
    next_id: AtomicU64,
    bus: broadcast::Sender<BusMessage>,
}

impl ProcessDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            program: program.into(),
            args,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    /// Driver for `gst-launch`-style programs taking a pipeline description
    pub fn with_description(program: impl Into<String>, description: &str) -> Self {
        Self::new(program, vec![description.to_string()])
    }

    /// Number of pipelines acquired and not yet stopped
    pub fn live_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn spawn_watcher(
        &self,
        id: PipelineId,
        child: Arc<Mutex<Child>>,
        stopping: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, DriverError> {
        let bus = self.bus.clone();

        thread::Builder::new()
            .name(format!("pipeline-watch-{}", id.0))
            .spawn(move || {
                let status = loop {
                    if stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    match child.lock().try_wait() {
                        Ok(Some(status)) => break Ok(status),
                        Ok(None) => {}
                        Err(e) => break Err(e),
                    }
                    thread::sleep(WATCH_INTERVAL);
                };

                // Exits caused by `stop` are reported by `stop` itself
                if stopping.load(Ordering::SeqCst) {
                    return;
                }

                let event = exit_event(status);
                tracing::info!("{} exited: {:?}", id, event);
                let _ = bus.send(BusMessage::new(id, event));
            })
            .map_err(|e| DriverError::StartFailed(e.to_string()))
    }
}

fn exit_event(status: std::io::Result<ExitStatus>) -> PipelineEvent {
    match status {
        Ok(status) if status.success() => PipelineEvent::EndOfStream,
        Ok(status) => PipelineEvent::Error(format!("pipeline exited with {}", status)),
        Err(e) => PipelineEvent::Error(format!("lost track of pipeline process: {}", e)),
    }
}

impl PipelineDriver for ProcessDriver {
    fn acquire(&self) -> Result<PipelineHandle, DriverError> {
        if self.program.trim().is_empty() {
            return Err(DriverError::AcquireFailed("no pipeline program configured".into()));
        }

        let id = PipelineId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.slots.lock().insert(
            id,
            PipelineSlot {
                child: None,
                stopping: Arc::new(AtomicBool::new(false)),
                watcher: None,
            },
        );

        let _ = self.bus.send(BusMessage::new(id, PipelineEvent::StateChanged(PipelineState::Ready)));
        Ok(PipelineHandle::new(id))
    }

    fn play(&self, handle: &PipelineHandle) -> Result<(), DriverError> {
        let id = handle.id();
        let stopping = {
            let slots = self.slots.lock();
            let slot = slots
                .get(&id)
                .ok_or(DriverError::UnknownPipeline(id.0))?;
            if slot.child.is_some() {
                return Ok(());
            }
            slot.stopping.clone()
        };

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| DriverError::StartFailed(format!("{}: {}", self.program, e)))?;

        tracing::info!("{} running as pid {}", id, child.id());
        let child = Arc::new(Mutex::new(child));
        let watcher = match self.spawn_watcher(id, child.clone(), stopping) {
            Ok(watcher) => watcher,
            Err(e) => {
                let mut child = child.lock();
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        if let Some(slot) = self.slots.lock().get_mut(&id) {
            slot.child = Some(child);
            slot.watcher = Some(watcher);
        }

        let _ = self.bus.send(BusMessage::new(id, PipelineEvent::StateChanged(PipelineState::Playing)));
        Ok(())
    }

    fn stop(&self, handle: PipelineHandle) -> Result<(), DriverError> {
        let id = handle.id();
        let slot = self
            .slots
            .lock()
            .remove(&id)
            .ok_or(DriverError::UnknownPipeline(id.0))?;

        slot.stopping.store(true, Ordering::SeqCst);

        let mut result = Ok(());
        if let Some(child) = slot.child {
            let mut child = child.lock();
            // Already exited on its own: nothing to kill
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    result = Err(DriverError::StopFailed(e.to_string()));
                }
            }
            let _ = child.wait();
        }

        if let Some(watcher) = slot.watcher {
            let _ = watcher.join();
        }

        let _ = self.bus.send(BusMessage::new(id, PipelineEvent::StateChanged(PipelineState::Null)));
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }

    fn is_running(&self, handle: &PipelineHandle) -> bool {
        let child = match self.slots.lock().get(&handle.id()) {
            Some(slot) => slot.child.clone(),
            None => return false,
        };
        match child {
            Some(child) => matches!(child.lock().try_wait(), Ok(None)),
            // Acquired, not yet played
            None => true,
        }
    }
}

impl Drop for ProcessDriver {
    fn drop(&mut self) {
        let ids: Vec<PipelineId> = self.slots.lock().keys().copied().collect();
        for id in ids {
            let _ = self.stop(PipelineHandle::new(id));
        }
    }
}
