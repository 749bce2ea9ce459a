//! HTTP client for the control API

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::TransportError;
use crate::protocol::{ControlResponse, StatusResponse};

/// Thin client over `POST /start`, `POST /stop` and `GET /status`.
///
/// Every request carries a timeout, so a hung server never leaves a request
/// outstanding indefinitely.
#[derive(Clone)]
pub struct ControlClient {
    base_url: String,
    http: reqwest::Client,
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start(&self) -> Result<ControlResponse, TransportError> {
        self.send(self.http.post(self.url("start"))).await
    }

    pub async fn stop(&self) -> Result<ControlResponse, TransportError> {
        self.send(self.http.post(self.url("stop"))).await
    }

    pub async fn status(&self) -> Result<StatusResponse, TransportError> {
        self.send(self.http.get(self.url("status"))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(response.json::<T>().await?)
    }
}
