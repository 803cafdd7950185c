//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use drover_core::{Error, Result};
use drover_repo::GitTimeouts;

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Disabled unless configured.
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Git operation timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GitTimeoutConfig {
    /// Timeout for `git clone`.
    pub clone_secs: u64,
    /// Timeout for `git fetch`.
    pub fetch_secs: u64,
    /// Timeout for the short incremental operations (checkout, reset,
    /// rev-parse).
    pub op_secs: u64,
}

impl Default for GitTimeoutConfig {
    fn default() -> Self {
        let defaults = GitTimeouts::default();
        Self {
            clone_secs: defaults.clone.as_secs(),
            fetch_secs: defaults.fetch.as_secs(),
            op_secs: defaults.checkout.as_secs(),
        }
    }
}

impl GitTimeoutConfig {
    /// Converts to the repo crate's timeout type.
    #[must_use]
    pub fn to_timeouts(self) -> GitTimeouts {
        GitTimeouts {
            clone: Duration::from_secs(self.clone_secs),
            fetch: Duration::from_secs(self.fetch_secs),
            checkout: Duration::from_secs(self.op_secs),
            reset: Duration::from_secs(self.op_secs),
            rev_parse: Duration::from_secs(self.op_secs),
        }
    }
}

/// Configuration for the drover API server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Root directory for local repository working copies.
    pub repos_root: PathBuf,

    /// Shared secret for the operator API (`X-Admin-API-Key`).
    ///
    /// Required when `debug` is false.
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Random bytes per issued node token.
    #[serde(default = "default_node_token_bytes")]
    pub node_token_bytes: usize,

    /// Upper bound on package payload size in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Enable debug mode (pretty logs, admin key optional).
    #[serde(default)]
    pub debug: bool,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Git operation timeouts.
    #[serde(default)]
    pub git: GitTimeoutConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("repos_root", &self.repos_root)
            .field(
                "admin_api_key",
                &self.admin_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("node_token_bytes", &self.node_token_bytes)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("debug", &self.debug)
            .field("cors", &self.cors)
            .field("git", &self.git)
            .finish()
    }
}

fn default_node_token_bytes() -> usize {
    drover_core::token::MIN_TOKEN_BYTES
}

fn default_max_payload_bytes() -> u64 {
    drover_repo::PackageConfig::DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            repos_root: PathBuf::from("./repos"),
            admin_api_key: None,
            node_token_bytes: default_node_token_bytes(),
            max_payload_bytes: default_max_payload_bytes(),
            debug: false,
            cors: CorsConfig::default(),
            git: GitTimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `DROVER_*` environment variables, starting
    /// from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot
    /// be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("DROVER_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(root) = env_string("DROVER_REPOS_ROOT") {
            config.repos_root = PathBuf::from(root);
        }
        config.admin_api_key = env_string("DROVER_ADMIN_API_KEY");
        if let Some(bytes) = env_usize("DROVER_NODE_TOKEN_BYTES")? {
            config.node_token_bytes = bytes;
        }
        if let Some(max) = env_u64("DROVER_MAX_PAYLOAD_BYTES")? {
            if max == 0 {
                return Err(Error::validation(
                    "DROVER_MAX_PAYLOAD_BYTES must be greater than 0",
                ));
            }
            config.max_payload_bytes = max;
        }
        if let Some(debug) = env_bool("DROVER_DEBUG")? {
            config.debug = debug;
        }

        if let Some(origins) = env_string("DROVER_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(max_age) = env_u64("DROVER_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        if let Some(secs) = env_u64("DROVER_GIT_CLONE_TIMEOUT_SECS")? {
            config.git.clone_secs = secs;
        }
        if let Some(secs) = env_u64("DROVER_GIT_FETCH_TIMEOUT_SECS")? {
            config.git.fetch_secs = secs;
        }
        if let Some(secs) = env_u64("DROVER_GIT_OP_TIMEOUT_SECS")? {
            config.git.op_secs = secs;
        }

        Ok(config)
    }

    /// Validates cross-field constraints before serving.
    ///
    /// # Errors
    ///
    /// Returns an error when a production requirement is unmet.
    pub fn validate(&self) -> Result<()> {
        if !self.debug
            && self
                .admin_api_key
                .as_deref()
                .is_none_or(|key| key.trim().is_empty())
        {
            return Err(Error::validation(
                "DROVER_ADMIN_API_KEY is required when DROVER_DEBUG=false",
            ));
        }
        if !self.debug && self.cors.allowed_origins.iter().any(|o| o == "*") {
            return Err(Error::validation(
                "cors.allowed_origins cannot include '*' when debug=false",
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a usize: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::validation(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}
