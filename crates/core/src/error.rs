//! Error types for sppilot-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sppilot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sppilot-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Token acquisition failed or the token was rejected twice
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Folder or file does not exist on the site
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure or retryable server status (408, 429, 5xx)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Permission denied (HTTP 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other non-success status from the SharePoint REST API
    #[error("SharePoint API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cancelled by user
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map a non-success REST status to an error, keeping the server message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = sharepoint_error_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                truncate(trimmed, 200)
            }
        });

        match status {
            401 => Error::Authentication(message),
            403 => Error::PermissionDenied(message),
            404 => Error::NotFound(message),
            408 | 429 => Error::Transient(message),
            s if s >= 500 => Error::Transient(message),
            _ => Error::Api { status, message },
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout)
    }

    /// Whether the error means the remote item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_builder() {
            Error::HttpClient(err.to_string())
        } else if err.is_connect() || err.is_body() || err.is_request() {
            Error::Transient(err.to_string())
        } else if err.is_decode() {
            Error::UnexpectedResponse(err.to_string())
        } else {
            Error::Transient(err.to_string())
        }
    }
}

/// Extract `error.message.value` from an OData error body.
fn sharepoint_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    // Token endpoint errors: {"error": "invalid_client", "error_description": "..."}
    if let Some(description) = value.get("error_description").and_then(|d| d.as_str()) {
        return Some(description.to_string());
    }

    let error = value.get("error").or_else(|| value.get("odata.error"))?;
    match error.get("message") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(message) => message.get("value")?.as_str().map(str::to_string),
        None => error.as_str().map(str::to_string),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
