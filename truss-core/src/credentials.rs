//! Who a node is and what secret it shares with its peers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrussError;

/// Environment variable consulted when no PSK is configured.
pub const PSK_ENV_VAR: &str = "TRUSS_PSK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Hands out jobs.
    AssignmentSource,
    /// Collects results.
    DropOff,
    /// Runs jobs at security level 0 only.
    WorkerPublic,
    /// Runs jobs up to its configured security level.
    WorkerPrivate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::AssignmentSource => "assignment-source",
            Role::DropOff => "drop-off",
            Role::WorkerPublic => "worker-public",
            Role::WorkerPrivate => "worker-private",
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, Role::WorkerPublic | Role::WorkerPrivate)
    }
}

impl FromStr for Role {
    type Err = TrussError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "assignment" | "assignment-source" | "server" => Ok(Role::AssignmentSource),
            "dropoff" | "drop-off" => Ok(Role::DropOff),
            "public" | "worker-public" => Ok(Role::WorkerPublic),
            "private" | "worker-private" => Ok(Role::WorkerPrivate),
            other => Err(TrussError::Config(format!("unknown role {other:?}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the pre-shared key and this node's role.
pub trait CredentialProvider: Send + Sync {
    fn psk(&self) -> Result<String, TrussError>;
    fn role(&self) -> Role;
}

/// Credentials fixed at startup from config, CLI or environment.
#[derive(Clone)]
pub struct StaticCredentials {
    psk: String,
    role: Role,
}

impl StaticCredentials {
    pub fn new(psk: impl Into<String>, role: Role) -> Self {
        Self {
            psk: psk.into(),
            role,
        }
    }

    /// Use `configured` unless it is empty, then fall back to `TRUSS_PSK`.
    pub fn resolve(configured: &str, role: Role) -> Self {
        let psk = if configured.is_empty() {
            std::env::var(PSK_ENV_VAR).unwrap_or_default()
        } else {
            configured.to_string()
        };
        Self::new(psk, role)
    }
}

impl CredentialProvider for StaticCredentials {
    fn psk(&self) -> Result<String, TrussError> {
        if self.psk.is_empty() {
            return Err(TrussError::Config(format!(
                "no pre-shared key configured (set security.psk, --psk or {PSK_ENV_VAR})"
            )));
        }
        Ok(self.psk.clone())
    }

    fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("psk", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_aliases_parse() {
        assert_eq!("server".parse::<Role>().unwrap(), Role::AssignmentSource);
        assert_eq!("DropOff".parse::<Role>().unwrap(), Role::DropOff);
        assert_eq!("public".parse::<Role>().unwrap(), Role::WorkerPublic);
        assert_eq!("worker-private".parse::<Role>().unwrap(), Role::WorkerPrivate);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn empty_psk_is_a_config_error() {
        let creds = StaticCredentials::new("", Role::DropOff);
        assert!(matches!(creds.psk(), Err(TrussError::Config(_))));
    }

    #[test]
    fn configured_psk_wins() {
        let creds = StaticCredentials::resolve("from-config", Role::WorkerPublic);
        assert_eq!(creds.psk().unwrap(), "from-config");
        assert!(creds.role().is_worker());
        assert!(!format!("{creds:?}").contains("from-config"));
    }
}
