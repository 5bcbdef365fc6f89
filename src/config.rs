// Configuration loading and parsing (config/board.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for board.toml.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    board: BoardConfig,
    #[serde(default)]
    affiliation: Vec<AffiliationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    /// SQLite database path.
    pub db_path: String,
    /// Space the board messages are posted into.
    pub board_space: String,
    /// Spaces whose presence transitions drive board entries.
    pub monitored_spaces: Vec<String>,
    /// Hours between roster refresh cycles.
    #[serde(default = "default_refresh_hours")]
    pub refresh_interval_hours: u64,
    /// Maximum options offerable in one wizard choice control.
    #[serde(default = "default_offer_limit")]
    pub offer_limit: usize,
    /// Platform suffix tokens stripped from member names before cache
    /// lookups (matched case-insensitively).
    #[serde(default = "default_platform_suffixes")]
    pub platform_suffixes: Vec<String>,
}

/// One tracked squadron: its display name, roster source page, and the role
/// tag that maps a community member to it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AffiliationConfig {
    pub name: String,
    pub source_url: String,
    pub role_tag: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub board: BoardConfig,
    pub affiliations: Vec<AffiliationConfig>,
}

fn default_refresh_hours() -> u64 {
    6
}

fn default_offer_limit() -> usize {
    25
}

fn default_platform_suffixes() -> Vec<String> {
    vec!["@psn".into(), "@live".into(), "@xbox".into()]
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/board.toml` relative to the
/// given `base_dir`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("board.toml");
    let text = std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
        path: path.clone(),
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        board: file.board,
        affiliations: file.affiliation,
    };
    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working
/// directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.board.db_path.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "board.db_path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.board.monitored_spaces.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "board.monitored_spaces".into(),
            message: "at least one monitored space is required".into(),
        });
    }

    if config.board.refresh_interval_hours == 0 {
        return Err(ConfigError::ValidationError {
            field: "board.refresh_interval_hours".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.board.offer_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "board.offer_limit".into(),
            message: "must be greater than 0".into(),
        });
    }

    for (idx, aff) in config.affiliations.iter().enumerate() {
        if aff.name.is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("affiliation[{idx}].name"),
                message: "must not be empty".into(),
            });
        }
        if aff.source_url.is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("affiliation[{idx}].source_url"),
                message: "must not be empty".into(),
            });
        }
    }

    let mut names: Vec<&str> = config.affiliations.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != config.affiliations.len() {
        return Err(ConfigError::ValidationError {
            field: "affiliation".into(),
            message: "affiliation names must be unique".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
