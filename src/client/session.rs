//! Client session
//!
//! Keeps the viewer's [`ClientView`] close to the server's stream state and
//! runs the local receive pipeline in step with it. Three activities write
//! to the view:
//!
//! - the command path (`request_start` / `request_stop`), triggered by the user
//! - the poll path (`poll_once`, driven by `spawn_poller`)
//! - the local pipeline's bus (`handle_local_event`, driven by
//!   `spawn_event_listener`)
//!
//! All writes go through one mutex, and the status update for a write is
//! published while that mutex is held, so the UI sees updates in the same
//! order the view changed. Network calls and local driver calls are made
//! without the lock held; driver calls run on the blocking pool. Commands
//! (and `close`) are serialized among themselves, so two commands never race
//! to acquire a local pipeline.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex as CommandLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::http::ControlClient;
use crate::client::status::{Controls, StatusSink, StatusUpdate};
use crate::driver::{BusMessage, PipelineDriver, PipelineEvent, PipelineHandle};
use crate::error::{DriverError, TransportError};

/// Client's belief about the server's stream phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BelievedPhase {
    Unknown,
    Idle,
    Running,
}

/// State of the viewer's own receive pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocalPhase {
    Stopped,
    Playing,
    Errored,
}

/// Snapshot of the session's view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientView {
    pub believed_phase: BelievedPhase,
    pub local_phase: LocalPhase,
    pub last_error: Option<String>,
    /// Last text published to the UI
    pub status_text: String,
}

impl Default for ClientView {
    fn default() -> Self {
        Self {
            believed_phase: BelievedPhase::Unknown,
            local_phase: LocalPhase::Stopped,
            last_error: None,
            status_text: "Status: Not Connected".to_string(),
        }
    }
}

/// Outcome of a start/stop command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Server accepted the command and the local pipeline followed
    Applied,
    /// Server answered, but reported a pipeline failure of its own
    RemoteFailed(String),
    /// Server could not be reached; nothing changed locally
    Unreachable(TransportError),
    /// Server accepted `start`, but the local pipeline failed to start
    LocalFailed(DriverError),
}

struct SessionState {
    view: ClientView,
    /// Live local pipeline; present iff `view.local_phase == Playing`
    local: Option<PipelineHandle>,
}

/// Viewer session over one control server
pub struct ClientSession {
    client: ControlClient,
    driver: Arc<dyn PipelineDriver>,
    state: Mutex<SessionState>,
    /// Held for the whole of a command, across its awaits
    commands: CommandLock<()>,
    sink: StatusSink,
    cancel: CancellationToken,
}

impl ClientSession {
    pub fn new(client: ControlClient, driver: Arc<dyn PipelineDriver>, sink: StatusSink) -> Self {
        let view = ClientView::default();
        sink.publish(StatusUpdate {
            text: view.status_text.clone(),
            controls: Controls::for_phase(view.local_phase),
        });

        Self {
            client,
            driver,
            state: Mutex::new(SessionState { view, local: None }),
            commands: CommandLock::new(()),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn view(&self) -> ClientView {
        self.state.lock().view.clone()
    }

    /// True once `close` has run; background tasks stop at that point
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask the server to start streaming, then start local playback.
    pub async fn request_start(&self) -> CommandResult {
        let _command = self.commands.lock().await;
        tracing::info!("Attempting to start stream...");
        let result = self.client.start().await;

        let message = {
            let mut state = self.state.lock();
            let response = match result {
                Ok(response) => response,
                Err(e) => return self.command_unreachable(&mut state, e),
            };

            if let Some(detail) = response.error {
                tracing::error!("Server failed to start stream: {}", detail);
                state.view.believed_phase = BelievedPhase::Idle;
                state.view.last_error = Some(format!("Server failed to start stream: {}", detail));
                self.publish(&mut state, format!("Error: Server failed to start stream - {}", detail));
                return CommandResult::RemoteFailed(detail);
            }

            state.view.believed_phase = BelievedPhase::Running;
            if state.local.is_some() {
                self.publish(&mut state, "Status: Stream started".to_string());
                return CommandResult::Applied;
            }
            response.message
        };

        let driver = self.driver.clone();
        let started = tokio::task::spawn_blocking(move || driver.acquire_and_start())
            .await
            .unwrap_or_else(|e| Err(DriverError::StartFailed(e.to_string())));

        let mut state = self.state.lock();
        match started {
            Ok(handle) => {
                state.local = Some(handle);
                state.view.local_phase = LocalPhase::Playing;
                state.view.last_error = None;
                self.publish(&mut state, "Status: Stream started".to_string());
                tracing::info!("Stream started successfully ({})", message);
                CommandResult::Applied
            }
            Err(e) => {
                // The remote stream keeps running; the next poll reconciles.
                tracing::error!("Failed to start local pipeline: {}", e);
                state.view.local_phase = LocalPhase::Stopped;
                state.view.last_error = Some(format!("Failed to start local pipeline: {}", e));
                self.publish(&mut state, format!("Error: Failed to start pipeline - {}", e));
                CommandResult::LocalFailed(e)
            }
        }
    }

    /// Ask the server to stop streaming, then stop local playback.
    pub async fn request_stop(&self) -> CommandResult {
        let _command = self.commands.lock().await;
        tracing::info!("Attempting to stop stream...");
        let result = self.client.stop().await;

        let (local, message) = {
            let mut state = self.state.lock();
            let response = match result {
                Ok(response) => response,
                Err(e) => return self.command_unreachable(&mut state, e),
            };

            if let Some(detail) = response.error {
                tracing::error!("Server failed to stop stream: {}", detail);
                state.view.last_error = Some(format!("Server failed to stop stream: {}", detail));
                self.publish(&mut state, format!("Error: Server failed to stop stream - {}", detail));
                return CommandResult::RemoteFailed(detail);
            }

            state.view.believed_phase = BelievedPhase::Idle;
            let local = state.local.take();
            state.view.local_phase = LocalPhase::Stopped;
            self.publish(&mut state, "Status: Stream stopped".to_string());
            (local, response.message)
        };

        self.stop_local(local).await;
        tracing::info!("Stream stopped successfully ({})", message);
        CommandResult::Applied
    }

    /// One status poll. The response is authoritative for the believed phase.
    pub async fn poll_once(&self) -> BelievedPhase {
        let result = self.client.status().await;

        let mut state = self.state.lock();
        match result {
            Ok(status) => {
                let (phase, text) = if status.streaming {
                    (BelievedPhase::Running, "Status: Streaming")
                } else {
                    (BelievedPhase::Idle, "Status: Not Streaming")
                };
                state.view.believed_phase = phase;
                self.publish(&mut state, text.to_string());
                phase
            }
            Err(e) => {
                // Connectivity unknown; local playback is left alone
                tracing::debug!("Status poll failed: {}", e);
                state.view.believed_phase = BelievedPhase::Unknown;
                state.view.last_error = Some(e.to_string());
                self.publish(&mut state, format!("Error: {}", e));
                BelievedPhase::Unknown
            }
        }
    }

    /// Apply an event from the local pipeline bus.
    ///
    /// Returns false for events from pipelines this session no longer owns.
    /// Blocks on the driver when the event ends the pipeline.
    pub fn handle_local_event(&self, msg: &BusMessage) -> bool {
        let ended = {
            let mut state = self.state.lock();
            if state.local.as_ref().map(|h| h.id()) != Some(msg.pipeline) {
                return false;
            }

            match &msg.event {
                PipelineEvent::StateChanged(pipeline_state) => {
                    self.publish(&mut state, format!("Pipeline State: {}", pipeline_state));
                    None
                }
                PipelineEvent::Error(message) => {
                    tracing::error!("Pipeline error: {}", message);
                    let ended = state.local.take();
                    state.view.local_phase = LocalPhase::Errored;
                    state.view.last_error = Some(message.clone());
                    self.publish(&mut state, format!("Error: {}", message));
                    ended
                }
                PipelineEvent::EndOfStream => {
                    tracing::info!("Local pipeline reached end of stream");
                    let ended = state.local.take();
                    state.view.local_phase = LocalPhase::Stopped;
                    self.publish(&mut state, "Status: End of Stream".to_string());
                    ended
                }
            }
        };

        if let Some(handle) = ended {
            self.release(handle);
        }
        true
    }

    /// Check the local pipeline with the driver after bus events were
    /// dropped. Returns true if the pipeline was gone.
    ///
    /// Blocks on the driver.
    pub fn reconcile_local(&self) -> bool {
        let ended = {
            let mut state = self.state.lock();
            match &state.local {
                Some(handle) if !self.driver.is_running(handle) => {}
                _ => return false,
            }

            tracing::error!("Local pipeline is no longer running; its end event was missed");
            let ended = state.local.take();
            state.view.local_phase = LocalPhase::Errored;
            state.view.last_error = Some("Local pipeline stopped unexpectedly".to_string());
            self.publish(&mut state, "Error: Local pipeline stopped unexpectedly".to_string());
            ended
        };

        if let Some(handle) = ended {
            self.release(handle);
        }
        true
    }

    /// Poll the server every `interval` until the session is closed.
    ///
    /// Polls never overlap: a tick that comes due while a request is in
    /// flight is delayed, not queued.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let session = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = session.poll_once() => {}
                }
            }
            tracing::debug!("Status poller stopped");
        })
    }

    /// Feed local pipeline bus events into the session until it is closed.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut bus = self.driver.subscribe();
        let session = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = bus.recv() => msg,
                };
                let msg = match msg {
                    Ok(msg) => Some(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Local pipeline bus lagged, {} events skipped", skipped);
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let session = session.clone();
                let _ = tokio::task::spawn_blocking(move || match msg {
                    Some(msg) => session.handle_local_event(&msg),
                    None => session.reconcile_local(),
                })
                .await;
            }
            tracing::debug!("Local event listener stopped");
        })
    }

    /// End the session: stop background tasks and local playback, then send
    /// one best-effort remote stop.
    ///
    /// The remote stop is not retried. If it is lost, the server keeps
    /// streaming until someone stops it or the server exits.
    pub async fn close(&self) {
        tracing::info!("Shutting down client...");
        self.cancel.cancel();
        let _command = self.commands.lock().await;

        let local = {
            let mut state = self.state.lock();
            state.view.local_phase = LocalPhase::Stopped;
            state.local.take()
        };
        self.stop_local(local).await;

        match self.client.stop().await {
            Ok(response) => tracing::debug!("Remote stop on close: {}", response.message),
            Err(e) => tracing::warn!(
                "Remote stop on close failed, server stream may still be running: {}",
                e
            ),
        }
    }

    fn command_unreachable(&self, state: &mut SessionState, e: TransportError) -> CommandResult {
        tracing::error!("Failed to connect to server: {}", e);
        state.view.last_error = Some(e.to_string());
        self.publish(state, format!("Error: {}", e));
        CommandResult::Unreachable(e)
    }

    /// Stop a released local pipeline on the blocking pool
    async fn stop_local(&self, handle: Option<PipelineHandle>) {
        let Some(handle) = handle else {
            return;
        };
        let id = handle.id();
        let driver = self.driver.clone();

        match tokio::task::spawn_blocking(move || driver.stop(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Error while stopping local {}: {}", id, e),
            Err(e) => tracing::warn!("Stop task for local {} failed: {}", id, e),
        }
    }

    fn release(&self, handle: PipelineHandle) {
        let id = handle.id();
        if let Err(e) = self.driver.stop(handle) {
            tracing::warn!("Error while stopping local {}: {}", id, e);
        }
    }

    fn publish(&self, state: &mut SessionState, text: String) {
        state.view.status_text = text.clone();
        self.sink.publish(StatusUpdate {
            text,
            controls: Controls::for_phase(state.view.local_phase),
        });
    }
}
