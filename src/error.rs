use crate::http::Status;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Forbidden path: {0}")]
    ForbiddenPath(String),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// The status a client should see for this error, if any.
    ///
    /// `None` means the connection is closed without a response.
    pub fn status(&self) -> Option<Status> {
        match self {
            ServerError::MalformedRequest(_) | ServerError::UnsupportedMethod(_) => {
                Some(Status::MethodNotAllowed)
            }
            ServerError::ForbiddenPath(_) => Some(Status::Forbidden),
            ServerError::NotFound(_) => Some(Status::NotFound),
            _ => None,
        }
    }

    /// Errors that prevent the server from starting at all
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Config(_))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
