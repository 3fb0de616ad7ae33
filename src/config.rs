//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Decision-engine configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Participant the engine routes research-needed messages to.
    pub research_specialist: String,
    /// The human operator. The autopilot never routes a detected question
    /// back to this participant.
    pub human_operator: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            research_specialist: "Perplexity".to_string(),
            human_operator: "Julien".to_string(),
        }
    }
}

/// Runtime settings for the server binary, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Database file path (`CAFE_DB_PATH`).
    pub db_path: PathBuf,
    /// Transcript export directory (`CAFE_EXPORT_DIR`).
    pub export_dir: PathBuf,
    /// HTTP listen port (`CAFE_HTTP_PORT`).
    pub port: u16,
    /// Café rules text file exposed over the config endpoints
    /// (`CAFE_RULES_PATH`).
    pub rules_path: PathBuf,
    /// Local GitHub checkout to export transcripts into
    /// (`CAFE_GITHUB_REPO`). Export target disabled when unset.
    pub github_repo: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/cafe.db"),
            export_dir: PathBuf::from("exports"),
            port: 8000,
            rules_path: PathBuf::from("config/cafe_rules.txt"),
            github_repo: None,
        }
    }
}

impl ServerConfig {
    /// Build from environment variables, defaults where unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match std::env::var("CAFE_HTTP_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CAFE_HTTP_PORT".to_string(),
                message: format!("not a valid port number: {raw}"),
            })?,
            Err(_) => defaults.port,
        };
        Ok(Self {
            db_path: std::env::var("CAFE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            export_dir: std::env::var("CAFE_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            port,
            rules_path: std::env::var("CAFE_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_path),
            github_repo: std::env::var("CAFE_GITHUB_REPO").ok().map(PathBuf::from),
        })
    }
}
