//! Token acquisition and caching for the Azure DevOps REST API.
//!
//! The provider fronts an external credential source (normally the Azure
//! CLI) with a process-lifetime cache. Tokens refresh five minutes before
//! expiry, concurrent cold-cache callers coalesce onto one acquisition, and
//! transient failures retry with exponential backoff.

mod azure_cli;
mod error;
mod provider;

pub use azure_cli::{AzureCliSource, ADO_RESOURCE_ID};
pub use error::{AuthError, AuthErrorKind};
pub use provider::{AccessToken, CredentialSource, RetryPolicy, TokenInfo, TokenProvider};
