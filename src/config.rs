//! Server configuration.
//!
//! Mirrors the builder-with-validation pattern used elsewhere in this
//! codebase: a plain `Serialize`/`Deserialize` struct with sane `Default`s,
//! assembled and checked through `ConfigBuilder::build`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root directory of the default database's collection tree.
    pub db_dir: PathBuf,

    /// Address the listener binds to, e.g. `"127.0.0.1:8443"`.
    pub bind_address: String,

    /// Size of the fixed worker pool.
    pub workers: usize,

    /// Path to the leaf + chain certificate PEM.
    pub tls_cert: PathBuf,

    /// Path to the PKCS#8 private key PEM.
    pub tls_key: PathBuf,

    /// Name under which the default database is registered.
    pub default_db_name: String,

    /// Rules file backing the default database.
    pub default_rules_path: PathBuf,

    /// Directory holding the flat `accounts` file.
    pub accounts_dir: PathBuf,

    /// Per-read socket timeout, in seconds, applied to every accepted
    /// connection before its TLS handshake. Bounds how long a worker can be
    /// stuck serving a client that opens a connection and then stalls
    /// mid-request, so a slow/stuck peer can't permanently shrink the
    /// worker pool.
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("./db"),
            bind_address: "127.0.0.1:8443".to_string(),
            workers: 8,
            tls_cert: PathBuf::from("sslcerts/certchain.pem"),
            tls_key: PathBuf::from("sslcerts/key.pem"),
            default_db_name: "db".to_string(),
            default_rules_path: PathBuf::from("rules/db.rules"),
            accounts_dir: PathBuf::from("accounts"),
            read_timeout_secs: 60,
        }
    }
}

/// Builder with fluent setters and a validating `build`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: ServerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn db_dir(mut self, db_dir: impl Into<PathBuf>) -> Self {
        self.config.db_dir = db_dir.into();
        self
    }

    pub fn bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.config.bind_address = bind_address.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn tls_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tls_cert = path.into();
        self
    }

    pub fn tls_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tls_key = path.into();
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.read_timeout_secs = secs;
        self
    }

    /// Validate and produce the final configuration.
    pub fn build(self) -> anyhow::Result<ServerConfig> {
        if self.config.workers == 0 {
            return Err(anyhow::anyhow!("worker pool size cannot be 0"));
        }
        if self.config.bind_address.is_empty() {
            return Err(anyhow::anyhow!("bind address cannot be empty"));
        }
        if self.config.default_db_name.is_empty() {
            return Err(anyhow::anyhow!("default database name cannot be empty"));
        }
        if self.config.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("read timeout cannot be 0"));
        }
        Ok(self.config)
    }
}
