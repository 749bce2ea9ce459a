//! Viewer-side client: control API access and session reconciliation

pub mod http;
pub mod session;
pub mod status;

pub use http::ControlClient;
pub use session::{BelievedPhase, ClientSession, ClientView, CommandResult, LocalPhase};
pub use status::{status_channel, Controls, StatusSink, StatusUpdate};
