use std::fmt;

use truss_core::{Role, TrussError};

/// What a listener's connections do with `workdone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Hands out jobs; `workdone` signs the client's job off.
    Assignment,
    /// Collects results; `workdone` starts an upload.
    DropOff,
}

impl TryFrom<Role> for ConnectionRole {
    type Error = TrussError;

    fn try_from(role: Role) -> Result<Self, Self::Error> {
        match role {
            Role::AssignmentSource => Ok(ConnectionRole::Assignment),
            Role::DropOff => Ok(ConnectionRole::DropOff),
            worker => Err(TrussError::Config(format!(
                "role {worker} cannot run a server"
            ))),
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Assignment => f.write_str("assignment"),
            ConnectionRole::DropOff => f.write_str("drop-off"),
        }
    }
}
