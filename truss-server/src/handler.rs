//! Per-connection protocol driver.
//!
//! One `ConnectionHandler` owns one accepted socket. It runs the handshake,
//! then serves one request per round until the client quits, disconnects,
//! or sends something the session key cannot open.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use truss_core::message::{HANDSHAKE_MARKER, REPLY_DONE, REPLY_FAILED, unsupported_reply};
use truss_core::rekey::{self, RekeyPolicy};
use truss_core::scheduler::{JobId, ResultKind};
use truss_core::{
    ChannelOptions, ConnectionPhase, JobRequest, Received, Request, Scheduler, SecureChannel,
    Token, TrussError,
};

use crate::role::ConnectionRole;

#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Pause before each request round.
    pub round_delay: Duration,
    /// Limits applied when the client starts a rekey.
    pub rekey: RekeyPolicy,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            round_delay: Duration::ZERO,
            rekey: RekeyPolicy::default(),
        }
    }
}

/// Identity cached from the client's first valid job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// `<peer-addr>/<suffix>`.
    pub id: String,
    pub os: String,
    pub security_level: u32,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Client sent `quit`.
    Quit,
    /// EOF or reset.
    PeerClosed,
    /// A frame failed authentication under the current key.
    Undecryptable,
    /// No handshake message within the receive window.
    HandshakeTimeout,
    /// Any other fatal error.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct HandlerSummary {
    pub seq: u64,
    pub peer: String,
    pub client: Option<String>,
    pub rounds: u64,
    pub termination: Termination,
}

// ── ConnectionHandler ────────────────────────────────────────────

pub struct ConnectionHandler<S> {
    seq: u64,
    peer: String,
    channel: SecureChannel<S>,
    scheduler: Arc<Scheduler>,
    role: ConnectionRole,
    options: HandlerOptions,
    phase: ConnectionPhase,
    client: Option<ClientRecord>,
    rounds: u64,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq: u64,
        peer: impl Into<String>,
        stream: S,
        psk: &str,
        channel_options: ChannelOptions,
        scheduler: Arc<Scheduler>,
        role: ConnectionRole,
        options: HandlerOptions,
    ) -> Self {
        Self {
            seq,
            peer: peer.into(),
            channel: SecureChannel::new(stream, psk, channel_options),
            scheduler,
            role,
            options,
            phase: ConnectionPhase::default(),
            client: None,
            rounds: 0,
        }
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    /// Drive the connection to completion. Never returns an error: every
    /// ending is recorded in the summary and logged.
    pub async fn run(mut self) -> HandlerSummary {
        let termination = match self.serve().await {
            Ok(t) => t,
            Err(e) if e.is_disconnect() => Termination::PeerClosed,
            Err(TrussError::Undecryptable) => Termination::Undecryptable,
            Err(e) => Termination::Failed(e.to_string()),
        };
        self.phase.close();

        match &termination {
            Termination::Quit => info!(seq = self.seq, peer = %self.peer, "client quit"),
            Termination::PeerClosed => {
                warn!(seq = self.seq, peer = %self.peer, "client disconnected abruptly")
            }
            Termination::Undecryptable => {
                error!(seq = self.seq, peer = %self.peer, "undecryptable frame; closing")
            }
            Termination::HandshakeTimeout => {
                warn!(seq = self.seq, peer = %self.peer, "no handshake; closing")
            }
            Termination::Failed(reason) => {
                error!(seq = self.seq, peer = %self.peer, %reason, "connection failed")
            }
        }

        let summary = HandlerSummary {
            seq: self.seq,
            peer: self.peer,
            client: self.client.map(|c| c.id),
            rounds: self.rounds,
            termination,
        };
        info!(
            seq = summary.seq,
            rounds = summary.rounds,
            client = summary.client.as_deref().unwrap_or("-"),
            "connection closed"
        );
        summary
    }

    async fn serve(&mut self) -> Result<Termination, TrussError> {
        if let Some(early) = self.handshake().await? {
            return Ok(early);
        }

        loop {
            if !self.options.round_delay.is_zero() {
                tokio::time::sleep(self.options.round_delay).await;
            }
            match self.channel.receive().await? {
                Received::Idle => continue,
                Received::Closed => return Ok(Termination::PeerClosed),
                Received::Undecryptable => return Ok(Termination::Undecryptable),
                Received::Message(text) => {
                    self.rounds += 1;
                    if let Some(done) = self.dispatch(&text).await? {
                        return Ok(done);
                    }
                }
            }
        }
    }

    async fn handshake(&mut self) -> Result<Option<Termination>, TrussError> {
        match self.channel.receive().await? {
            Received::Message(text) => {
                self.channel
                    .send(&format!("{text}{HANDSHAKE_MARKER}"))
                    .await?;
                self.phase.complete_handshake()?;
                debug!(seq = self.seq, "handshake complete");
                Ok(None)
            }
            Received::Idle => Ok(Some(Termination::HandshakeTimeout)),
            Received::Closed => Ok(Some(Termination::PeerClosed)),
            Received::Undecryptable => Ok(Some(Termination::Undecryptable)),
        }
    }

    async fn dispatch(&mut self, text: &str) -> Result<Option<Termination>, TrussError> {
        match Request::decode(text) {
            Request::Quit => return Ok(Some(Termination::Quit)),
            Request::Job(payload) => {
                let reply = self.handle_job(&payload);
                self.channel.send(&reply).await?;
            }
            Request::WorkDone => match self.role {
                ConnectionRole::Assignment => {
                    let reply = match &self.client {
                        Some(client) if self.scheduler.signoff(&client.id) => REPLY_DONE,
                        _ => REPLY_FAILED,
                    };
                    self.channel.send(reply).await?;
                }
                ConnectionRole::DropOff => self.receive_upload().await?,
            },
            Request::Rekey => {
                self.phase.begin_rekey()?;
                rekey::respond(&mut self.channel, &self.options.rekey).await?;
                self.phase.finish_rekey()?;
            }
            Request::Empty => self.channel.send("").await?,
            Request::Unsupported(other) => {
                debug!(seq = self.seq, request = %other, "unsupported request");
                self.channel.send(&unsupported_reply(&other)).await?;
            }
        }
        Ok(None)
    }

    /// Reply to a job request with a command, or empty for none.
    fn handle_job(&mut self, payload: &str) -> String {
        let request = match JobRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(seq = self.seq, "{e}");
                return String::new();
            }
        };

        let client = self.client.get_or_insert_with(|| {
            let id = format!("{}/{}", self.peer, request.client_suffix);
            info!(seq = self.seq, client = %id, os = %request.os, level = request.security_level, "client identified");
            ClientRecord {
                id,
                os: request.os.clone(),
                security_level: request.security_level,
            }
        });
        self.scheduler
            .assign(&client.id, &client.os, client.security_level)
            .unwrap_or_default()
    }

    // ── Upload ───────────────────────────────────────────────────

    /// Drop-off side of the result upload. Every item is answered with
    /// `NEXT` except the last, which gets `Acknowledged`. A record whose
    /// upload does not finish is discarded.
    async fn receive_upload(&mut self) -> Result<(), TrussError> {
        self.channel.send(Token::Next.as_str()).await?;

        let command = self.channel.receive_message().await?;
        let id = self.scheduler.setup_result_storage(&command);
        match self.receive_result_lines(id).await {
            Ok(true) => {
                info!(seq = self.seq, job = id, %command, "results received");
                Ok(())
            }
            Ok(false) => {
                self.scheduler.discard_result(id);
                Ok(())
            }
            Err(e) => {
                self.scheduler.discard_result(id);
                Err(e)
            }
        }
    }

    /// Everything after the command. `false` when a bad count aborted it.
    async fn receive_result_lines(&mut self, id: JobId) -> Result<bool, TrussError> {
        self.channel.send(Token::Next.as_str()).await?;

        let Some(error_count) = self.receive_count().await? else {
            return Ok(false);
        };
        self.channel.send(Token::Next.as_str()).await?;
        for _ in 0..error_count {
            let line = self.channel.receive_message().await?;
            self.scheduler.store_results(id, &line, ResultKind::Error);
            self.channel.send(Token::Next.as_str()).await?;
        }

        let Some(output_count) = self.receive_count().await? else {
            return Ok(false);
        };
        if output_count == 0 {
            self.channel.send(Token::Acknowledged.as_str()).await?;
            return Ok(true);
        }
        self.channel.send(Token::Next.as_str()).await?;
        for index in 0..output_count {
            let line = self.channel.receive_message().await?;
            self.scheduler.store_results(id, &line, ResultKind::Output);
            let reply = if index + 1 == output_count {
                Token::Acknowledged
            } else {
                Token::Next
            };
            self.channel.send(reply.as_str()).await?;
        }
        Ok(true)
    }

    /// A line count, or `None` after replying `Failed` to a bad one.
    async fn receive_count(&mut self) -> Result<Option<usize>, TrussError> {
        let text = self.channel.receive_message().await?;
        match text.trim().parse::<usize>() {
            Ok(count) => Ok(Some(count)),
            Err(_) => {
                error!(seq = self.seq, count = %text, "upload aborted: bad line count");
                self.channel.send(REPLY_FAILED).await?;
                Ok(None)
            }
        }
    }
}
