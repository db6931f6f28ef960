// Configuration loading and parsing (draft.toml, server.toml, credentials.toml).

use std::path::{Path, PathBuf};

use draftroom_core::draft::coordinator::{DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TEAMS};
use draftroom_core::DraftSettings;
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

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },

    #[error("no [database] path configured and no platform data directory available")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub draft: DraftConfig,
    pub server: ServerConfig,
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Where the SQLite database lives: `[database] path` when set, otherwise
    /// `draftroom.db` in the platform data directory.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.server.database.path {
            return Ok(PathBuf::from(path));
        }
        let dirs =
            directories::ProjectDirs::from("", "", "draftroom").ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().join("draftroom.db"))
    }
}

// ---------------------------------------------------------------------------
// draft.toml structs
// ---------------------------------------------------------------------------

/// Wrapper for the top-level `[draft]` table in draft.toml.
#[derive(Debug, Clone, Deserialize)]
struct DraftFile {
    draft: DraftConfig,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_max_teams() -> usize {
    DEFAULT_MAX_TEAMS
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
    pub name: String,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_max_teams")]
    pub max_teams: usize,
    /// Applied on startup when the stored draft has no team count yet.
    #[serde(default)]
    pub team_count: Option<usize>,
    /// CSV used to seed an empty candidate table.
    pub candidates_path: String,
}

impl DraftConfig {
    pub fn settings(&self) -> DraftSettings {
        DraftSettings {
            max_rounds: self.max_rounds,
            max_teams: self.max_teams,
        }
    }
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub websocket: WebsocketSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketSection {
    pub host: String,
    pub port: u16,
}

impl WebsocketSection {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub path: Option<String>,
}

fn default_log_filter() -> String {
    "draftroom=info,draftroom_server=info,draftroom_core=info,warn".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            filter: default_log_filter(),
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    /// When set, admin intents require `ADMIN_LOGIN` first.
    pub admin_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/draft.toml`,
/// `config/server.toml`, and (optionally) `config/credentials.toml`,
/// all relative to the given `base_dir`.
///
/// This does not copy defaults; `load_config()` does.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- draft.toml (required) ---
    let draft_path = config_dir.join("draft.toml");
    let draft_text = read_file(&draft_path)?;
    let draft_file: DraftFile =
        toml::from_str(&draft_text).map_err(|e| ConfigError::ParseError {
            path: draft_path.clone(),
            source: e,
        })?;

    // --- server.toml (required) ---
    let server_path = config_dir.join("server.toml");
    let server_text = read_file(&server_path)?;
    let server: ServerConfig =
        toml::from_str(&server_text).map_err(|e| ConfigError::ParseError {
            path: server_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        draft: draft_file.draft,
        server,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the server directory or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let Some(name) = file_name.to_str() else {
            continue;
        };

        // Templates and seed data stay in defaults/.
        if name.ends_with(".example") || !name.ends_with(".toml") {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying default
/// config files first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let draft = &config.draft;

    if draft.name.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "draft.name".into(),
            message: "must not be empty".into(),
        });
    }

    if draft.max_rounds == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.max_rounds".into(),
            message: "must be greater than 0".into(),
        });
    }

    if draft.max_teams == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.max_teams".into(),
            message: "must be greater than 0".into(),
        });
    }

    if let Some(count) = draft.team_count {
        if count == 0 || count > draft.max_teams {
            return Err(ConfigError::ValidationError {
                field: "draft.team_count".into(),
                message: format!("must be between 1 and {}, got {count}", draft.max_teams),
            });
        }
    }

    if draft.candidates_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "draft.candidates_path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.server.websocket.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "websocket.host".into(),
            message: "must not be empty".into(),
        });
    }

    if config
        .credentials
        .admin_password
        .as_deref()
        .is_some_and(|p| p.trim().is_empty())
    {
        return Err(ConfigError::ValidationError {
            field: "admin_password".into(),
            message: "must not be empty; remove the key to disable admin login".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
