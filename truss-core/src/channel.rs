//! Encrypted, turn-taking message channel over any byte stream.
//!
//! `SecureChannel` wraps a `Framed<S, FrameCodec>` and a [`SessionCipher`].
//! Every message is one sealed frame carrying UTF-8 text. Receives are
//! bounded by a window so a silent peer shows up as [`Received::Idle`]
//! instead of blocking the task forever.
//!
//! Multi-step exchanges use the two-way ACK primitive:
//!
//! ```text
//!  sender                     receiver
//!    │ ── value ──────────────► │
//!    │ ◄────────────── <ACK> ── │
//!    │ ── <ACK> ──────────────► │
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::codec::FrameCodec;
use crate::crypto::{DEFAULT_KDF_ROUNDS, SessionCipher};
use crate::error::TrussError;
use crate::message::Token;

pub const DEFAULT_RECEIVE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_IDLE_RETRIES: u32 = 3;

/// Outcome of a single bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(String),
    /// Nothing arrived within the window. The peer may still be there.
    Idle,
    /// EOF or reset.
    Closed,
    /// A frame arrived that the current key could not open.
    Undecryptable,
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Longest a single receive waits for a frame.
    pub receive_window: Duration,
    /// Extra windows a required frame may take before timing out.
    pub idle_retries: u32,
    /// PBKDF2 rounds for every key this channel derives.
    pub kdf_rounds: u32,
}

impl ChannelOptions {
    /// Total time a required frame may take: every retry plus the first
    /// window.
    pub fn longest_wait(&self) -> Duration {
        self.receive_window
            .saturating_mul(self.idle_retries.saturating_add(1))
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            receive_window: DEFAULT_RECEIVE_WINDOW,
            idle_retries: DEFAULT_IDLE_RETRIES,
            kdf_rounds: DEFAULT_KDF_ROUNDS,
        }
    }
}

// ── SecureChannel ────────────────────────────────────────────────

pub struct SecureChannel<S> {
    framed: Framed<S, FrameCodec>,
    cipher: SessionCipher,
    options: ChannelOptions,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream`, keyed from the pre-shared secret.
    pub fn new(stream: S, psk: &str, options: ChannelOptions) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            cipher: SessionCipher::from_secret(psk, options.kdf_rounds),
            options,
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    /// Swap the session key for one derived from `secret`.
    pub fn rekey(&mut self, secret: &str) {
        self.cipher.rekey(secret);
    }

    /// Encrypt, frame, write, and flush.
    pub async fn send(&mut self, text: &str) -> Result<(), TrussError> {
        let body = self.cipher.seal(text.as_bytes())?;
        debug!(len = body.len(), "sending frame");
        self.framed.send(Bytes::from(body)).await
    }

    /// Wait at most one receive window for the next frame.
    pub async fn receive(&mut self) -> Result<Received, TrussError> {
        let frame = match tokio::time::timeout(self.options.receive_window, self.framed.next()).await
        {
            Err(_) => return Ok(Received::Idle),
            Ok(None) => return Ok(Received::Closed),
            Ok(Some(Err(e))) if e.is_disconnect() => return Ok(Received::Closed),
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(frame))) => frame,
        };

        let Some(plaintext) = self.cipher.open(&frame) else {
            return Ok(Received::Undecryptable);
        };
        match String::from_utf8(plaintext) {
            Ok(text) => Ok(Received::Message(text)),
            Err(_) => {
                debug!("decrypted frame is not utf-8");
                Ok(Received::Undecryptable)
            }
        }
    }

    /// Receive a frame the protocol requires, tolerating up to
    /// `idle_retries` extra empty windows.
    pub async fn receive_message(&mut self) -> Result<String, TrussError> {
        let mut idle = 0;
        loop {
            match self.receive().await? {
                Received::Message(text) => return Ok(text),
                Received::Idle if idle < self.options.idle_retries => idle += 1,
                Received::Idle => {
                    return Err(TrussError::Timeout(self.options.longest_wait()));
                }
                Received::Closed => return Err(TrussError::PeerClosed),
                Received::Undecryptable => return Err(TrussError::Undecryptable),
            }
        }
    }

    // ── ACK primitive ────────────────────────────────────────────

    /// Wait for `<ACK>`. `None` on success; otherwise the reply that came
    /// instead, already logged. The caller decides whether to carry on.
    pub async fn expect_ack(&mut self) -> Result<Option<String>, TrussError> {
        let reply = self.receive_message().await?;
        if Token::Ack.matches(&reply) {
            Ok(None)
        } else {
            error!(got = %reply, "partner failed to ACK");
            Ok(Some(reply))
        }
    }

    /// Sender half: value, wait for `<ACK>`, answer `<ACK>`.
    pub async fn send_acked(&mut self, value: &str) -> Result<Option<String>, TrussError> {
        self.send(value).await?;
        let stray = self.expect_ack().await?;
        self.send(Token::Ack.as_str()).await?;
        Ok(stray)
    }

    /// Receiver half: value, answer `<ACK>`, wait for `<ACK>`.
    pub async fn receive_acked(&mut self) -> Result<(String, Option<String>), TrussError> {
        let value = self.receive_message().await?;
        let stray = self.acknowledge().await?;
        Ok((value, stray))
    }

    /// Receiver half for a value already taken off the wire.
    pub async fn acknowledge(&mut self) -> Result<Option<String>, TrussError> {
        self.send(Token::Ack.as_str()).await?;
        self.expect_ack().await
    }
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("cipher", &self.cipher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
