//! # Stream Control
//!
//! Control protocol between a local media streaming server and its viewer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── VIEWER ────────────────────────────────┐
//! │                                                                        │
//! │   ┌──────────────┐  StatusUpdate   ┌─────────────────────────────────┐ │
//! │   │  UI (viewer  │◄────────────────│  ClientSession (client::session)│ │
//! │   │   frontend)  │────────────────►│  ClientView behind one lock     │ │
//! │   └──────────────┘  start / stop   └───┬──────────────┬──────────┬───┘ │
//! │                                        │ commands     │ poll 1s  │     │
//! │   ┌──────────────────────────┐  bus    │              │          │     │
//! │   │ Local PipelineDriver     │─────────┘◄─────────────┼──────────┘     │
//! │   │ receive → decode → render│                        │                │
//! │   └──────────────────────────┘                        │                │
//! └───────────────────────────────────────────────────────┼────────────────┘
//!                                                         │ HTTP
//!                                      POST /start  POST /stop  GET /status
//! ┌──────────────────────────────── SERVER ───────────────┼────────────────┐
//! │                                                       ▼                │
//! │   ┌──────────────────────────────────────────────────────────────────┐ │
//! │   │              Control API (server::handlers, axum)                │ │
//! │   └────────────────────────────────┬─────────────────────────────────┘ │
//! │                                    ▼                                   │
//! │   ┌──────────────────────────────────────────────────────────────────┐ │
//! │   │   StreamController (server::controller)  Idle ⇄ Running          │ │
//! │   └───────────┬──────────────────────────────────────▲───────────────┘ │
//! │               │ acquire / play / stop                │ Error / EOS     │
//! │               ▼                                      │                 │
//! │   ┌──────────────────────────────────────────────────┴───────────────┐ │
//! │   │        PipelineDriver: capture → encode → transmit               │ │
//! │   └──────────────────────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8079;

    /// Default bind address for the control API
    pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

    /// Default server URL used by the viewer
    pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8079";

    /// Interval between status polls
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Per-request timeout for control API calls
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

    /// Capacity of a driver's bus broadcast channel
    pub const BUS_CAPACITY: usize = 64;

    /// Program used by the process driver
    pub const DEFAULT_PIPELINE_PROGRAM: &str = "gst-launch-1.0";

    /// Sender-side pipeline: capture, encode, transmit
    pub const DEFAULT_SENDER_PIPELINE: &str = "autovideosrc ! videoconvert ! x264enc tune=zerolatency ! rtph264pay name=payloader ! udpsink host=127.0.0.1 port=8079";

    /// Receiver-side pipeline: receive, decode, render
    pub const DEFAULT_RECEIVER_PIPELINE: &str = "udpsrc port=8079 caps=\"application/x-rtp, media=(string)video, clock-rate=(int)90000, encoding-name=(string)H264\" ! rtph264depay ! avdec_h264 ! videoconvert ! autovideosink";
}
