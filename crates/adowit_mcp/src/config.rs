//! Server configuration.

use std::time::Duration;
use thiserror::Error;

/// Typed configuration assembled from CLI arguments and the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Azure DevOps organization name
    pub organization: String,

    /// Project name (derived from the first area path segment when absent)
    pub project: String,

    /// Area paths the server scopes queries to (may be empty)
    pub area_paths: Vec<String>,

    /// GUID of the Copilot service account, when configured
    pub copilot_guid: Option<String>,

    /// Verbose logging (`--verbose` or `MCP_DEBUG=1`)
    pub verbose: bool,

    /// Let the credential source open a browser instead of failing offline
    pub auto_launch_browser: bool,

    /// Server name (reported in initialize)
    pub server_name: String,

    /// Server version (reported in initialize)
    pub server_version: String,

    /// Timeout for individual tool calls
    pub tool_timeout: Duration,

    /// Timeout for bulk tool calls
    pub bulk_tool_timeout: Duration,

    /// Default query handle lifetime
    pub default_handle_ttl: Duration,
}

/// Configuration errors exit the process before the transport starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("organization must not be empty")]
    MissingOrganization,

    #[error("either --project or --area-path is required")]
    MissingProject,

    #[error("cannot derive a project from area path '{0}'")]
    UnusableAreaPath(String),
}

impl ServerConfig {
    /// Resolve the project/area-path pairing: an explicit project wins;
    /// otherwise the first backslash-separated segment of the area path is
    /// the project.
    pub fn resolve(
        organization: String,
        project: Option<String>,
        area_path: Option<String>,
        mut area_paths: Vec<String>,
        copilot_guid: Option<String>,
        verbose: bool,
        auto_launch_browser: bool,
    ) -> Result<Self, ConfigError> {
        if organization.trim().is_empty() {
            return Err(ConfigError::MissingOrganization);
        }

        if let Some(path) = area_path {
            area_paths.insert(0, path);
        }

        let project = match project {
            Some(p) if !p.trim().is_empty() => p,
            _ => {
                let first = area_paths.first().ok_or(ConfigError::MissingProject)?;
                let segment = first
                    .split('\\')
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ConfigError::UnusableAreaPath(first.clone()))?;
                segment.to_string()
            }
        };

        Ok(Self {
            organization,
            project,
            area_paths,
            copilot_guid,
            verbose,
            auto_launch_browser,
            server_name: "adowit".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            tool_timeout: Duration::from_secs(30),
            bulk_tool_timeout: Duration::from_secs(60),
            default_handle_ttl: Duration::from_secs(3600),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_project_wins() {
        let config = ServerConfig::resolve(
            "contoso".to_string(),
            Some("Web".to_string()),
            Some("Platform\\Auth".to_string()),
            Vec::new(),
            None,
            false,
            false,
        )
        .unwrap();
        assert_eq!(config.project, "Web");
        assert_eq!(config.area_paths, vec!["Platform\\Auth"]);
    }

    #[test]
    fn project_derives_from_area_path() {
        let config = ServerConfig::resolve(
            "contoso".to_string(),
            None,
            Some("Platform\\Auth\\Tokens".to_string()),
            Vec::new(),
            None,
            false,
            false,
        )
        .unwrap();
        assert_eq!(config.project, "Platform");
    }

    #[test]
    fn missing_project_and_area_path_is_an_error() {
        let err = ServerConfig::resolve(
            "contoso".to_string(),
            None,
            None,
            Vec::new(),
            None,
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingProject));
    }

    #[test]
    fn empty_organization_is_an_error() {
        let err = ServerConfig::resolve(
            "  ".to_string(),
            Some("Web".to_string()),
            None,
            Vec::new(),
            None,
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingOrganization));
    }
}
