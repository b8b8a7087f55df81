//! Configuration for the truss server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use truss_core::credentials::Role;
use truss_core::dh::{DEFAULT_BASE_BITS, DEFAULT_PRIME_BITS};
use truss_core::network::{DEFAULT_PORT, usable_port};
use truss_core::{ChannelOptions, RekeyPolicy};

use crate::handler::HandlerOptions;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub node: NodeConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
    pub results: ResultsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to bind.
    pub bind: String,
    /// TCP port; values at or below 1024 fall back to 8080.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// "assignment-source" or "drop-off".
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Pre-shared key. Empty means read `TRUSS_PSK`.
    pub psk: String,
    /// PBKDF2 iterations per derived key.
    pub kdf_rounds: u32,
    /// Longest single wait for a frame, in milliseconds.
    pub receive_window_ms: u64,
    /// Extra empty windows a required frame may take.
    pub idle_retries: u32,
    /// Out-of-step tokens tolerated per rekey.
    pub mismatch_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between request rounds on each connection.
    pub round_delay_ms: u64,
    /// Requeue assignments older than this; 0 disables the sweeper.
    pub assignment_timeout_secs: u64,
    /// Descriptor files loaded at startup.
    pub job_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Where `SavedResults-*` files are written.
    pub directory: PathBuf,
    /// Period of result flushes and status lines, in seconds.
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            node: NodeConfig::default(),
            security: SecurityConfig::default(),
            scheduler: SchedulerConfig::default(),
            results: ResultsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::AssignmentSource,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            psk: String::new(),
            kdf_rounds: truss_core::crypto::DEFAULT_KDF_ROUNDS,
            receive_window_ms: 5_000,
            idle_retries: truss_core::channel::DEFAULT_IDLE_RETRIES,
            mismatch_budget: truss_core::rekey::DEFAULT_MISMATCH_BUDGET,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            round_delay_ms: 0,
            assignment_timeout_secs: 0,
            job_files: Vec::new(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            flush_interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// `bind:port` with the port made usable.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, usable_port(self.network.port))
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            receive_window: Duration::from_millis(self.security.receive_window_ms.max(1)),
            idle_retries: self.security.idle_retries,
            kdf_rounds: self.security.kdf_rounds.max(1),
        }
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            round_delay: Duration::from_millis(self.scheduler.round_delay_ms),
            rekey: RekeyPolicy {
                prime_bits: DEFAULT_PRIME_BITS,
                base_bits: DEFAULT_BASE_BITS,
                mismatch_budget: self.security.mismatch_budget,
            },
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.results.flush_interval_secs.max(1))
    }

    /// `None` when stale-assignment requeuing is off.
    pub fn assignment_timeout(&self) -> Option<Duration> {
        match self.scheduler.assignment_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
