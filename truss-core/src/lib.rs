//! # truss-core
//!
//! Protocol library for the truss job-distribution system.
//!
//! This crate contains:
//! - **Wire**: `Token`/`Request` text tokens and the `FrameCodec` frame format
//! - **Crypto**: `SessionCipher` (AES-128-GCM, PBKDF2 keys) and DH key exchange
//! - **Channel**: `SecureChannel` with bounded receives and the ACK primitive
//! - **Rekey**: initiator and responder halves of the DH rekey exchange
//! - **State**: the server-side `ConnectionPhase` machine
//! - **Scheduler**: the shared in-memory job queue and results store
//! - **Client**: `ClientSession` for workers
//! - **Error**: `TrussError`, a typed `thiserror`-based error hierarchy

pub mod channel;
pub mod client;
pub mod codec;
pub mod credentials;
pub mod crypto;
pub mod dh;
pub mod error;
pub mod message;
pub mod network;
pub mod protocol;
pub mod rekey;
pub mod scheduler;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{ChannelOptions, Received, SecureChannel};
pub use client::{ClientIdentity, ClientSession, SessionOptions};
pub use codec::FrameCodec;
pub use credentials::{CredentialProvider, Role, StaticCredentials};
pub use crypto::SessionCipher;
pub use dh::{DhKeyPair, DhParameters, SharedSecret};
pub use error::{DescriptorError, TrussError};
pub use message::{Request, Token};
pub use network::ConnectionInfo;
pub use protocol::{JobRequest, JobResults};
pub use rekey::{RekeyPolicy, RekeyReport};
pub use scheduler::{JobId, JobStatus, ResultKind, Scheduler, SchedulerSnapshot, TargetOs};
pub use state::ConnectionPhase;
