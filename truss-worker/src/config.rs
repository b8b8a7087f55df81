//! Configuration for the truss worker.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use truss_core::credentials::Role;
use truss_core::dh::{DEFAULT_BASE_BITS, DEFAULT_PRIME_BITS};
use truss_core::network::DEFAULT_PORT;
use truss_core::{ChannelOptions, ConnectionInfo, RekeyPolicy, SessionOptions};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Assignment server.
    pub server: EndpointConfig,
    /// Drop-off node that collects results.
    pub dropoff: EndpointConfig,
    pub identity: IdentityConfig,
    pub security: SecurityConfig,
    pub worker: LoopConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    /// Values at or below 1024 fall back to 8080.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// OS name sent with job requests.
    pub os: String,
    pub security_level: u32,
    /// "worker-private" or "worker-public". Public workers run at level 0.
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Pre-shared key. Empty means read `TRUSS_PSK`.
    pub psk: String,
    pub kdf_rounds: u32,
    pub receive_window_ms: u64,
    pub idle_retries: u32,
    /// Size of generated DH primes.
    pub prime_bits: usize,
    pub base_bits: usize,
    pub mismatch_budget: u32,
    /// Round-trips between rekeys; 0 disables them.
    pub rekey_every: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Sleep after a request that came back empty.
    pub idle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server: EndpointConfig::default(),
            dropoff: EndpointConfig {
                port: DEFAULT_PORT + 1,
                ..Default::default()
            },
            identity: IdentityConfig::default(),
            security: SecurityConfig::default(),
            worker: LoopConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.into(),
            security_level: 0,
            role: Role::WorkerPrivate,
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
            prime_bits: DEFAULT_PRIME_BITS,
            base_bits: DEFAULT_BASE_BITS,
            mismatch_budget: truss_core::rekey::DEFAULT_MISMATCH_BUDGET,
            rekey_every: truss_core::client::DEFAULT_REKEY_INTERVAL,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { idle_delay_ms: 2_000 }
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

impl WorkerConfig {
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

    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn server_endpoint(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.server.host.clone(), self.server.port).with_usable_port()
    }

    pub fn dropoff_endpoint(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.dropoff.host.clone(), self.dropoff.port).with_usable_port()
    }

    /// Level sent with job requests.
    pub fn effective_security_level(&self) -> u32 {
        match self.identity.role {
            Role::WorkerPublic => 0,
            _ => self.identity.security_level,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            channel: ChannelOptions {
                receive_window: Duration::from_millis(self.security.receive_window_ms.max(1)),
                idle_retries: self.security.idle_retries,
                kdf_rounds: self.security.kdf_rounds.max(1),
            },
            rekey: RekeyPolicy {
                prime_bits: self.security.prime_bits,
                base_bits: self.security.base_bits,
                mismatch_budget: self.security.mismatch_budget,
            },
            rekey_interval: self.security.rekey_every,
        }
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.worker.idle_delay_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
