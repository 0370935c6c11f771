//! ADO backend error taxonomy.
//!
//! Transient failures (timeouts, 429, 5xx) are retried inside the client;
//! everything else surfaces once, classified so callers can phrase the
//! right remediation.

use adowit_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdoError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("unreadable response: {0}")]
    Decode(String),
}

impl AdoError {
    /// Classify an HTTP status with its response message.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            429 => Self::Transient(format!("429 rate limited: {message}")),
            500..=599 => Self::Transient(format!("{status}: {message}")),
            _ => Self::BadRequest(format!("{status}: {message}")),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            AdoError::from_status(401, String::new()),
            AdoError::Unauthorized(_)
        ));
        assert!(matches!(
            AdoError::from_status(403, String::new()),
            AdoError::Forbidden(_)
        ));
        assert!(matches!(
            AdoError::from_status(404, String::new()),
            AdoError::NotFound(_)
        ));
        assert!(AdoError::from_status(429, String::new()).is_transient());
        assert!(AdoError::from_status(503, String::new()).is_transient());
        assert!(matches!(
            AdoError::from_status(400, String::new()),
            AdoError::BadRequest(_)
        ));
    }
}
