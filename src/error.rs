//! Failure taxonomy shared by every extractor
//!
//! Each vendor path maps its own failures into [`CollectorError`] so the HTTP
//! layer can report "wrong password" apart from "switch unreachable" apart
//! from "firmware changed its page format".

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    /// The device rejected the supplied credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Host unreachable, connection refused, or a navigation timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The page did not have the structure we parse
    #[error("parse error: {0}")]
    Parse(String),

    /// The device logged the session out while we were still reading pages
    #[error("session lost: {0}")]
    SessionLost(String),

    /// The automation engine itself failed (launch, crash, protocol error)
    #[error("browser error: {0}")]
    Browser(String),

    #[error("{0}")]
    InvalidRequest(String),
}

impl CollectorError {
    /// Short machine-readable tag carried in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::SessionLost(_) => "session_lost",
            Self::Browser(_) => "browser",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::SessionLost(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Parse(_) | Self::Browser(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for CollectorError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(e.to_string())
    }
}

pub type Result<T, E = CollectorError> = std::result::Result<T, E>;
