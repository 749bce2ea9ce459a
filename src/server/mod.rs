//! Streaming server: stream controller plus the HTTP control API

pub mod controller;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::Result;

pub use controller::{StartOutcome, StopOutcome, StreamController, StreamPhase};

/// Shared state for the HTTP handlers
pub struct AppState {
    pub controller: Arc<StreamController>,
}

/// Control API server
pub struct ControlServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ControlServer {
    pub fn new(config: ServerConfig, controller: Arc<StreamController>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { controller }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Serve on an already bound listener in a background task
    pub fn start_background(&self, listener: TcpListener) -> JoinHandle<()> {
        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Control API server error: {}", e);
            }
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start", post(handlers::start_stream))
        .route("/stop", post(handlers::stop_stream))
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Run a control server in the background of the current runtime.
///
/// Returns the bound address, so a port of 0 picks a free one.
pub async fn spawn_server(
    config: ServerConfig,
    controller: Arc<StreamController>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let server = ControlServer::new(config, controller);
    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    Ok((addr, server.start_background(listener)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;
    use crate::protocol::{ControlResponse, StatusResponse};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Arc<SimulatedDriver>, Arc<StreamController>, Router) {
        let driver = Arc::new(SimulatedDriver::new("sender"));
        let controller = Arc::new(StreamController::new(driver.clone()));
        let router = router(Arc::new(AppState {
            controller: controller.clone(),
        }));
        (driver, controller, router)
    }

    async fn call(router: &Router, method: &str, path: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().method(method).uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_start_twice_then_status() {
        let (driver, _, router) = app();

        let (status, body) = call(&router, "POST", "/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"message": "Stream started."}));

        let (_, body) = call(&router, "POST", "/start").await;
        assert_eq!(body, serde_json::json!({"message": "Stream is already running."}));

        let (_, body) = call(&router, "GET", "/status").await;
        assert_eq!(body, serde_json::json!({"streaming": true}));
        assert_eq!(driver.live_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_on_fresh_server() {
        let (driver, _, router) = app();

        let (status, body) = call(&router, "POST", "/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"message": "No stream to stop."}));

        let (_, body) = call(&router, "GET", "/status").await;
        assert_eq!(body, serde_json::json!({"streaming": false}));
        assert_eq!(driver.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (_, _, router) = app();

        call(&router, "POST", "/start").await;
        let (_, body) = call(&router, "POST", "/stop").await;
        assert_eq!(body, serde_json::json!({"message": "Stream stopped."}));

        let (_, body) = call(&router, "POST", "/stop").await;
        assert_eq!(body, serde_json::json!({"message": "No stream to stop."}));
    }

    #[tokio::test]
    async fn test_pipeline_error_reflected_in_status() {
        let (driver, controller, router) = app();
        let _watcher = controller.spawn_event_watcher();

        call(&router, "POST", "/start").await;
        driver.emit_error(driver.live_ids()[0], "encoder crashed");

        let mut streaming = true;
        for _ in 0..200 {
            let (_, body) = call(&router, "GET", "/status").await;
            let status: StatusResponse = serde_json::from_value(body).unwrap();
            streaming = status.streaming;
            if !streaming {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!streaming);
        assert_eq!(driver.live_count(), 0);
    }

    #[tokio::test]
    async fn test_driver_failure_is_not_a_transport_error() {
        let (driver, _, router) = app();
        driver.fail_next_acquire("no capture device");

        let (status, body) = call(&router, "POST", "/start").await;
        assert_eq!(status, StatusCode::OK);
        let response: ControlResponse = serde_json::from_value(body).unwrap();
        assert!(response.is_failure());
        assert!(response.error.unwrap().contains("no capture device"));

        let (_, body) = call(&router, "GET", "/status").await;
        assert_eq!(body, serde_json::json!({"streaming": false}));
    }

    #[tokio::test]
    async fn test_health() {
        let (_, _, router) = app();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
