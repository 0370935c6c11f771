//! Token acquisition error classification.
//!
//! Failure text from the credential source is mapped onto a closed set of
//! classes. Transient classes are retried internally; the rest surface
//! immediately with a remediation hint the caller can act on.

use thiserror::Error;

/// Classified token acquisition failure.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}. {}", kind.code(), kind.remediation())]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify raw failure text from the credential source.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = AuthErrorKind::classify(&message);
        Self { kind, message }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// The error classes, matched by case-insensitive substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotLoggedIn,
    TokenExpired,
    CliNotAvailable,
    InsufficientPermissions,
    NetworkTimeout,
    RateLimited,
    ServiceUnavailable,
    Unknown,
}

impl AuthErrorKind {
    /// Substring triggers, checked in declaration order.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if hit(&["please run az login", "setup account"]) {
            Self::NotLoggedIn
        } else if hit(&["token has expired", "token expired"]) {
            Self::TokenExpired
        } else if hit(&["command not found", "az: not found"]) {
            Self::CliNotAvailable
        } else if hit(&["insufficient permissions", "permission denied"]) {
            Self::InsufficientPermissions
        } else if hit(&["timeout", "econnrefused", "econnreset", "enotfound", "socket hang up"]) {
            Self::NetworkTimeout
        } else if hit(&["rate limit", "429", "too many requests"]) {
            Self::RateLimited
        } else if hit(&["503", "502", "504", "service unavailable", "bad gateway"]) {
            Self::ServiceUnavailable
        } else {
            Self::Unknown
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::NotLoggedIn => "AUTH_NOT_LOGGED_IN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::CliNotAvailable => "AUTH_CLI_NOT_AVAILABLE",
            Self::InsufficientPermissions => "AUTH_INSUFFICIENT_PERMISSIONS",
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Unknown => "AUTH_UNKNOWN",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout | Self::RateLimited | Self::ServiceUnavailable
        )
    }

    /// Actionable next step surfaced alongside the raw message.
    pub fn remediation(self) -> &'static str {
        match self {
            Self::NotLoggedIn => "Run 'az login' to authenticate with Azure",
            Self::TokenExpired => "Run 'az login' to refresh your credentials",
            Self::CliNotAvailable => {
                "Install the Azure CLI: https://aka.ms/azure-cli and ensure 'az' is on PATH"
            }
            Self::InsufficientPermissions => {
                "Verify your account has access to the Azure DevOps organization"
            }
            Self::NetworkTimeout => "Check network connectivity and retry",
            Self::RateLimited => "Wait a moment before retrying; the service is throttling",
            Self::ServiceUnavailable => "The service is temporarily unavailable; retry shortly",
            Self::Unknown => "Inspect the underlying error message",
        }
    }
}
