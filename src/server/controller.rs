//! Stream controller
//!
//! Owns the server's single [`StreamState`] and drives the sender-side
//! pipeline through it. The state machine has two phases:
//!
//! ```text
//!            start() / acquire + play
//!   ┌──────┐ ─────────────────────────► ┌─────────┐
//!   │ Idle │                            │ Running │
//!   └──────┘ ◄───────────────────────── └─────────┘
//!            stop(), or Error / EOS on the bus
//! ```
//!
//! All transitions happen under one mutex. `status()` reads an atomic
//! mirror of the phase that is only written while that mutex is held, so it
//! never waits on a driver call and never observes a half-applied transition.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::driver::{BusMessage, PipelineDriver, PipelineEvent, PipelineHandle};
use crate::error::DriverError;
use crate::protocol::{MSG_ALREADY_RUNNING, MSG_NOT_RUNNING, MSG_STARTED, MSG_STOPPED};

/// Run state of the server's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Running,
}

/// Phase plus ownership of the live pipeline, if any
#[derive(Debug)]
enum StreamState {
    Idle,
    Running(PipelineHandle),
}

/// Result of a `start` request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

impl StartOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StartOutcome::Started => MSG_STARTED,
            StartOutcome::AlreadyRunning => MSG_ALREADY_RUNNING,
        }
    }
}

/// Result of a `stop` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

impl StopOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => MSG_STOPPED,
            StopOutcome::NotRunning => MSG_NOT_RUNNING,
        }
    }
}

/// Server-side stream state machine
pub struct StreamController {
    driver: Arc<dyn PipelineDriver>,
    state: Mutex<StreamState>,
    /// Mirror of `state` for lock-free status reads
    streaming: AtomicBool,
    /// Most recent pipeline failure; side information only
    last_error: Mutex<Option<String>>,
}

impl StreamController {
    pub fn new(driver: Arc<dyn PipelineDriver>) -> Self {
        Self {
            driver,
            state: Mutex::new(StreamState::Idle),
            streaming: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Idle → Running. A no-op while already running.
    pub fn start(&self) -> Result<StartOutcome, DriverError> {
        let mut state = self.state.lock();
        if let StreamState::Running(handle) = &*state {
            tracing::debug!("Start requested while {} is running", handle.id());
            return Ok(StartOutcome::AlreadyRunning);
        }

        let handle = self.driver.acquire_and_start().map_err(|e| {
            tracing::error!("Failed to start stream: {}", e);
            *self.last_error.lock() = Some(e.to_string());
            e
        })?;

        tracing::info!("Stream started ({})", handle.id());
        *state = StreamState::Running(handle);
        self.streaming.store(true, Ordering::SeqCst);
        *self.last_error.lock() = None;
        Ok(StartOutcome::Started)
    }

    /// Running → Idle. A no-op while idle; performs no driver calls then.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, StreamState::Idle) {
            StreamState::Idle => StopOutcome::NotRunning,
            StreamState::Running(handle) => {
                self.streaming.store(false, Ordering::SeqCst);
                tracing::info!("Stream stopped ({})", handle.id());
                self.release(handle);
                *self.last_error.lock() = None;
                StopOutcome::Stopped
            }
        }
    }

    /// Current phase. Never blocks on the driver.
    pub fn status(&self) -> StreamPhase {
        if self.streaming.load(Ordering::SeqCst) {
            StreamPhase::Running
        } else {
            StreamPhase::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status() == StreamPhase::Running
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Force a stop on server shutdown
    pub fn shutdown(&self) -> StopOutcome {
        let outcome = self.stop();
        if outcome == StopOutcome::Stopped {
            tracing::info!("Stopped running stream on shutdown");
        }
        outcome
    }

    /// Apply a bus message. Returns true if it forced the stream to idle.
    ///
    /// Only terminal events from the currently owned pipeline matter; events
    /// from pipelines already released are stale and ignored.
    pub fn handle_bus_message(&self, msg: &BusMessage) -> bool {
        if !msg.event.is_terminal() {
            tracing::trace!("{}: {:?}", msg.pipeline, msg.event);
            return false;
        }

        let mut state = self.state.lock();
        let owns = matches!(&*state, StreamState::Running(handle) if handle.id() == msg.pipeline);
        if !owns {
            tracing::debug!("Ignoring {:?} from released {}", msg.event, msg.pipeline);
            return false;
        }

        if let StreamState::Running(handle) = std::mem::replace(&mut *state, StreamState::Idle) {
            self.streaming.store(false, Ordering::SeqCst);
            let reason = match &msg.event {
                PipelineEvent::Error(message) => message.clone(),
                _ => "End of stream".to_string(),
            };
            tracing::warn!("Stream {} ended: {}", handle.id(), reason);
            self.release(handle);
            *self.last_error.lock() = Some(reason);
        }
        true
    }

    /// Check the owned pipeline with the driver and force idle if it is gone.
    ///
    /// Used after bus events were dropped, since the terminal event for the
    /// current pipeline may have been among them. Returns true if it forced
    /// the stream to idle.
    pub fn reconcile(&self) -> bool {
        let mut state = self.state.lock();
        let alive = match &*state {
            StreamState::Idle => return false,
            StreamState::Running(handle) => self.driver.is_running(handle),
        };
        if alive {
            return false;
        }

        if let StreamState::Running(handle) = std::mem::replace(&mut *state, StreamState::Idle) {
            self.streaming.store(false, Ordering::SeqCst);
            tracing::error!("Stream {} is no longer running; its end event was missed", handle.id());
            self.release(handle);
            *self.last_error.lock() = Some("Pipeline stopped unexpectedly".to_string());
        }
        true
    }

    /// Watch the driver bus and force Running → Idle on Error or EOS.
    ///
    /// On a lagged bus the owned pipeline is re-checked with the driver. The
    /// task ends when the controller is dropped or the bus closes.
    pub fn spawn_event_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut bus = self.driver.subscribe();
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let msg = match bus.recv().await {
                    Ok(msg) => Some(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Pipeline bus lagged, {} events skipped", skipped);
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(strong) = controller.upgrade() else {
                    break;
                };
                // Stopping a pipeline may block on the driver
                let _ = tokio::task::spawn_blocking(move || match msg {
                    Some(msg) => strong.handle_bus_message(&msg),
                    None => strong.reconcile(),
                })
                .await;
            }
            tracing::debug!("Pipeline event watcher stopped");
        })
    }

    fn release(&self, handle: PipelineHandle) {
        let id = handle.id();
        if let Err(e) = self.driver.stop(handle) {
            tracing::warn!("Error while stopping {} (discarded): {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BUS_CAPACITY;
    use crate::driver::{PipelineId, PipelineState, SimulatedDriver};
    use proptest::prelude::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn controller() -> (Arc<SimulatedDriver>, Arc<StreamController>) {
        let driver = Arc::new(SimulatedDriver::new("sender"));
        let controller = Arc::new(StreamController::new(driver.clone()));
        (driver, controller)
    }

    async fn wait_for_idle(controller: &StreamController) {
        for _ in 0..200 {
            if controller.status() == StreamPhase::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("controller never returned to idle");
    }

    #[test]
    fn test_fresh_controller_is_idle() {
        let (driver, controller) = controller();
        assert_eq!(controller.status(), StreamPhase::Idle);
        assert_eq!(driver.acquired_count(), 0);
    }

    #[test]
    fn test_start_twice_keeps_single_handle() {
        let (driver, controller) = controller();

        assert_eq!(controller.start().unwrap(), StartOutcome::Started);
        let first = driver.live_ids();

        assert_eq!(controller.start().unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(driver.acquired_count(), 1);
        assert_eq!(driver.live_ids(), first);
        assert!(driver.is_playing(first[0]));
        assert_eq!(controller.status(), StreamPhase::Running);
    }

    #[test]
    fn test_stop_when_idle_touches_nothing() {
        let (driver, controller) = controller();

        assert_eq!(controller.stop(), StopOutcome::NotRunning);
        assert_eq!(driver.stop_calls(), 0);
        assert_eq!(driver.acquired_count(), 0);
    }

    #[test]
    fn test_stop_releases_handle() {
        let (driver, controller) = controller();
        controller.start().unwrap();

        assert_eq!(controller.stop(), StopOutcome::Stopped);
        assert_eq!(driver.live_count(), 0);
        assert_eq!(controller.status(), StreamPhase::Idle);
    }

    #[test]
    fn test_driver_failure_stays_idle() {
        let (driver, controller) = controller();
        driver.fail_next_acquire("camera busy");

        let err = controller.start().unwrap_err();
        assert_eq!(err, DriverError::AcquireFailed("camera busy".into()));
        assert_eq!(controller.status(), StreamPhase::Idle);
        assert!(controller.last_error().unwrap().contains("camera busy"));

        // Recovers on the next attempt
        assert_eq!(controller.start().unwrap(), StartOutcome::Started);
        assert_eq!(controller.last_error(), None);
    }

    #[test]
    fn test_play_failure_releases_acquired_handle() {
        let (driver, controller) = controller();
        driver.fail_next_play("encoder missing");

        assert!(controller.start().is_err());
        assert_eq!(driver.live_count(), 0);
        assert_eq!(controller.status(), StreamPhase::Idle);
    }

    #[test]
    fn test_stale_event_is_ignored() {
        let (driver, controller) = controller();
        controller.start().unwrap();
        let old = driver.live_ids()[0];
        controller.stop();
        controller.start().unwrap();

        let forced = controller.handle_bus_message(&BusMessage::new(
            old,
            PipelineEvent::Error("late failure".into()),
        ));
        assert!(!forced);
        assert_eq!(controller.status(), StreamPhase::Running);
    }

    #[test]
    fn test_non_terminal_event_is_ignored() {
        let (driver, controller) = controller();
        controller.start().unwrap();
        let id = driver.live_ids()[0];

        let forced = controller.handle_bus_message(&BusMessage::new(
            id,
            PipelineEvent::StateChanged(PipelineState::Paused),
        ));
        assert!(!forced);
        assert!(controller.is_streaming());
    }

    #[test]
    fn test_shutdown_stops_running_stream() {
        let (driver, controller) = controller();
        controller.start().unwrap();

        assert_eq!(controller.shutdown(), StopOutcome::Stopped);
        assert_eq!(driver.live_count(), 0);
        assert_eq!(controller.shutdown(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_error_event_forces_idle_without_stop() {
        let (driver, controller) = controller();
        let _watcher = controller.spawn_event_watcher();

        controller.start().unwrap();
        let id = driver.live_ids()[0];
        driver.emit_error(id, "device unplugged");

        wait_for_idle(&controller).await;
        assert_eq!(driver.live_count(), 0);
        assert_eq!(controller.last_error().as_deref(), Some("device unplugged"));
    }

    #[tokio::test]
    async fn test_eos_event_forces_idle() {
        let (driver, controller) = controller();
        let _watcher = controller.spawn_event_watcher();

        controller.start().unwrap();
        driver.emit_eos(driver.live_ids()[0]);

        wait_for_idle(&controller).await;
        assert_eq!(driver.live_count(), 0);

        // A fresh start works after the forced stop
        assert_eq!(controller.start().unwrap(), StartOutcome::Started);
        assert_eq!(driver.live_count(), 1);
    }

    #[tokio::test]
    async fn test_watcher_ends_when_controller_dropped() {
        let (driver, controller) = controller();
        let watcher = controller.spawn_event_watcher();
        drop(controller);

        driver.emit(PipelineId(99), PipelineEvent::EndOfStream);
        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .expect("watcher did not exit")
            .unwrap();
    }

    #[test]
    fn test_status_does_not_wait_on_slow_start() {
        let (driver, controller) = controller();
        driver.set_latency(Duration::from_millis(500));

        let starter = {
            let controller = controller.clone();
            thread::spawn(move || controller.start())
        };
        // Let `start` take the state lock and enter the driver
        thread::sleep(Duration::from_millis(100));

        let asked = Instant::now();
        assert_eq!(controller.status(), StreamPhase::Idle);
        assert!(asked.elapsed() < Duration::from_millis(100));

        assert_eq!(starter.join().unwrap().unwrap(), StartOutcome::Started);
        assert_eq!(controller.status(), StreamPhase::Running);
    }

    #[test]
    fn test_reconcile_forces_idle_for_dead_pipeline() {
        let (driver, controller) = controller();
        controller.start().unwrap();
        assert!(!controller.reconcile());

        // Pipeline died, but nobody handled the event
        driver.emit_error(driver.live_ids()[0], "device unplugged");
        assert!(controller.reconcile());
        assert_eq!(controller.status(), StreamPhase::Idle);
        assert_eq!(driver.live_count(), 0);
        assert!(controller.last_error().is_some());
    }

    #[tokio::test]
    async fn test_lagged_bus_still_forces_idle() {
        let (driver, controller) = controller();
        let _watcher = controller.spawn_event_watcher();

        controller.start().unwrap();
        let id = driver.live_ids()[0];
        // The watcher has not run yet, so the error is pushed out of the bus
        driver.emit_error(id, "device unplugged");
        for _ in 0..BUS_CAPACITY * 2 {
            driver.emit(
                PipelineId(id.0 + 1000),
                PipelineEvent::StateChanged(PipelineState::Paused),
            );
        }

        wait_for_idle(&controller).await;
        assert_eq!(driver.live_count(), 0);
    }

    #[test]
    fn test_concurrent_requests_never_double_acquire() {
        let (driver, controller) = controller();

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let controller = controller.clone();
                thread::spawn(move || {
                    for j in 0..200 {
                        if (i + j) % 2 == 0 {
                            let _ = controller.start();
                        } else {
                            controller.stop();
                        }
                        let _ = controller.status();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(driver.max_live() <= 1);
        assert_eq!(driver.live_count() == 1, controller.is_streaming());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Stop,
        FailingStart,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Start), Just(Op::Stop), Just(Op::FailingStart)]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_live_handle(ops in proptest::collection::vec(op(), 0..64)) {
            let (driver, controller) = controller();
            let mut expect_running = false;

            for op in &ops {
                match op {
                    Op::Start => {
                        controller.start().unwrap();
                        expect_running = true;
                    }
                    Op::FailingStart => {
                        driver.fail_next_acquire("injected");
                        let result = controller.start();
                        // Already running: the driver is not consulted
                        prop_assert_eq!(result.is_ok(), expect_running);
                        driver.clear_failures();
                    }
                    Op::Stop => {
                        controller.stop();
                        expect_running = false;
                    }
                }
                prop_assert!(driver.live_count() <= 1);
            }

            prop_assert_eq!(controller.is_streaming(), expect_running);
            prop_assert_eq!(driver.live_count() == 1, expect_running);
        }
    }
}
