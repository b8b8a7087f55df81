//! Server-side connection state machine.
//!
//! `ConnectionPhase` models the lifecycle of one accepted connection, with
//! validated transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::TrussError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of a handled connection.
///
/// ```text
///  Handshake ──► Ready ◄──► Rekeying
///      │           │            │
///      ▼           ▼            ▼
///      └─────────► Closed ◄─────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Waiting for the client's test message. Initial state.
    #[default]
    Handshake,

    /// Serving one request per round.
    Ready {
        /// When the connection (re-)entered `Ready`.
        since: Instant,
    },

    /// Responding to a client-initiated key exchange.
    Rekeying,

    /// Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ConnectionPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Handshake => "Handshake",
            Self::Ready { .. } => "Ready",
            Self::Rekeying => "Rekeying",
            Self::Closed => "Closed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Handshake`.
    pub fn complete_handshake(&mut self) -> Result<(), TrussError> {
        match self {
            Self::Handshake => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(TrussError::InvalidTransition {
                from: other.name(),
                to: "Ready",
            }),
        }
    }

    /// Valid from: `Ready`.
    pub fn begin_rekey(&mut self) -> Result<(), TrussError> {
        match self {
            Self::Ready { .. } => {
                *self = Self::Rekeying;
                Ok(())
            }
            other => Err(TrussError::InvalidTransition {
                from: other.name(),
                to: "Rekeying",
            }),
        }
    }

    /// Valid from: `Rekeying`.
    pub fn finish_rekey(&mut self) -> Result<(), TrussError> {
        match self {
            Self::Rekeying => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(TrussError::InvalidTransition {
                from: other.name(),
                to: "Ready",
            }),
        }
    }

    /// Any phase may close; disconnects and decrypt failures land here.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::default();
        assert_eq!(phase, ConnectionPhase::Handshake);

        phase.complete_handshake().unwrap();
        assert!(phase.is_ready());

        phase.begin_rekey().unwrap();
        assert_eq!(phase, ConnectionPhase::Rekeying);

        phase.finish_rekey().unwrap();
        assert!(phase.is_ready());

        phase.close();
        assert!(phase.is_closed());
    }

    #[test]
    fn rekey_requires_ready() {
        let mut phase = ConnectionPhase::Handshake;
        assert!(matches!(
            phase.begin_rekey(),
            Err(TrussError::InvalidTransition {
                from: "Handshake",
                to: "Rekeying"
            })
        ));
    }

    #[test]
    fn closed_is_terminal() {
        let mut phase = ConnectionPhase::Closed;
        assert!(phase.complete_handshake().is_err());
        assert!(phase.begin_rekey().is_err());
        assert!(phase.finish_rekey().is_err());
    }

    #[test]
    fn handshake_only_once() {
        let mut phase = ConnectionPhase::Handshake;
        phase.complete_handshake().unwrap();
        assert!(phase.complete_handshake().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Handshake.to_string(), "Handshake");
        assert_eq!(
            ConnectionPhase::Ready {
                since: Instant::now()
            }
            .to_string(),
            "Ready"
        );
        assert_eq!(ConnectionPhase::Rekeying.to_string(), "Rekeying");
        assert_eq!(ConnectionPhase::Closed.to_string(), "Closed");
    }
}
