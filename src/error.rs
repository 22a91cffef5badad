#![forbid(unsafe_code)]

//! Error taxonomy shared by the service client and the state machine.

use serde::Deserialize;
use thiserror::Error;

pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Please try again.";
pub const INFO_FALLBACK_MESSAGE: &str = "Failed to fetch video information";
pub const DOWNLOAD_FALLBACK_MESSAGE: &str = "Download failed";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally, never sent to the server.
    #[error("{0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("{message}")]
    RequestRejected { status: u16, message: String },

    /// Network or subscription failure without a structured reason. The
    /// cause is kept for logs only; users always see the fixed message.
    #[error("{}", CONNECTION_LOST_MESSAGE)]
    Transport(String),

    /// The progress stream delivered an explicit error event.
    #[error("{0}")]
    ServerReported(String),

    #[error("could not save downloaded file: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Text shown in the error panel and toast.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
}

/// Extracts `{error}` from a failure body, falling back to `fallback`
/// when the body is absent, malformed or carries an empty message.
pub fn rejection_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
