use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use signal_relay::JOIN_BURST;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// =============================================================================
// Unified config (figment-deserialized from defaults / watch-party.toml / env)
// =============================================================================
//
// Equivalent ways to configure:
//
//   watch-party.toml:  [server]
//                      port = 9000
//
//   env var:           WATCH_PARTY_SERVER__PORT=9000   (double underscore = nesting)
//
// CLI flags (--host, --port, --static-dir) override both.

/// Default config file, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "watch-party.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub logging: LoggingFileConfig,
}

/// Listener and asset settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Relay tunables (lives under `[relay]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// Per-connection outbound queue length. A peer that falls this far
    /// behind starts losing messages. Never less than the join handshake
    /// (`signal_relay::JOIN_BURST`).
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// Log file settings (lives under `[logging]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingFileConfig {
    /// Also append logs to `<log_dir>/app.log`
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingFileConfig {
    fn default() -> Self {
        Self {
            to_file: default_log_to_file(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_outbox_capacity() -> usize {
    256
}
fn default_log_to_file() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Build a figment that layers: defaults → config file → WATCH_PARTY_* env vars.
///
/// A missing config file is not an error; its layer is simply empty.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("WATCH_PARTY_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig + CLI overrides)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub outbox_capacity: usize,
    /// Log file path, if file logging is on
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            static_dir: fc.server.static_dir.clone(),
            // The newcomer's handshake is queued before its writer starts
            outbox_capacity: fc.relay.outbox_capacity.max(JOIN_BURST),
            log_file: fc
                .logging
                .to_file
                .then(|| fc.logging.log_dir.join("app.log")),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    pub fn index_path(&self) -> PathBuf {
        self.static_dir.join("index.html")
    }
}
