//! Azure CLI credential source.
//!
//! Shells out to `az account get-access-token` for the Azure DevOps
//! resource. The invocation is non-interactive: a logged-out CLI returns an
//! error (classified as `AUTH_NOT_LOGGED_IN`) rather than opening a browser.

use crate::error::{AuthError, AuthErrorKind};
use crate::provider::{AccessToken, CredentialSource};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Well-known Azure DevOps application id used as the token resource.
pub const ADO_RESOURCE_ID: &str = "499b84ac-1321-427f-aa17-267ca6975798";

/// Credential source backed by the `az` CLI.
pub struct AzureCliSource {
    resource: String,
    allow_no_subscriptions: bool,
}

impl AzureCliSource {
    /// Default source for the Azure DevOps resource. `allow_no_subscriptions`
    /// is passed through unless the configuration opted into interactive
    /// browser launch.
    pub fn new(allow_no_subscriptions: bool) -> Self {
        Self {
            resource: ADO_RESOURCE_ID.to_string(),
            allow_no_subscriptions,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }
}

/// `az account get-access-token` output. `expiresOn` is a local naive
/// timestamp; newer CLI versions also emit `expires_on` as unix seconds.
#[derive(Debug, Deserialize)]
struct CliTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expiresOn")]
    expires_on: Option<String>,
    #[serde(rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

#[async_trait]
impl CredentialSource for AzureCliSource {
    async fn acquire(&self) -> Result<AccessToken, AuthError> {
        let mut command = Command::new("az");
        command.args([
            "account",
            "get-access-token",
            "--resource",
            &self.resource,
            "--output",
            "json",
        ]);
        if self.allow_no_subscriptions {
            command.arg("--allow-no-subscriptions");
        }

        debug!(resource = %self.resource, "Invoking az account get-access-token");

        let output = command.output().await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AuthError::new(AuthErrorKind::CliNotAvailable, "az: not found")
            } else {
                AuthError::classify(format!("Failed to invoke az: {err}"))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::classify(stderr.trim().to_string()));
        }

        let response: CliTokenResponse = serde_json::from_slice(&output.stdout)
            .map_err(|err| AuthError::classify(format!("Unreadable az output: {err}")))?;

        let expires_at = resolve_expiry(&response)?;
        Ok(AccessToken {
            token: response.access_token,
            expires_at,
        })
    }
}

fn resolve_expiry(response: &CliTokenResponse) -> Result<DateTime<Utc>, AuthError> {
    if let Some(unix) = response.expires_on_unix {
        if let Some(at) = DateTime::from_timestamp(unix, 0) {
            return Ok(at);
        }
    }
    if let Some(text) = &response.expires_on {
        return parse_expires_on(text);
    }
    Err(AuthError::classify(
        "az output carried no token expiry".to_string(),
    ))
}

/// Accept both RFC 3339 and the CLI's local `YYYY-MM-DD HH:MM:SS.ffffff`.
fn parse_expires_on(text: &str) -> Result<DateTime<Utc>, AuthError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|err| AuthError::classify(format!("Unreadable token expiry '{text}': {err}")))?;
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => Ok(local.with_timezone(&Utc)),
        None => Err(AuthError::classify(format!(
            "Ambiguous local token expiry '{text}'"
        ))),
    }
}
