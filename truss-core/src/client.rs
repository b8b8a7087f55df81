//! Client side of a truss session: handshake, request/reply rounds,
//! periodic rekeying, job requests, sign-off and result uploads.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::channel::{ChannelOptions, SecureChannel};
use crate::error::TrussError;
use crate::message::{HANDSHAKE_MARKER, REPLY_DONE, REPLY_FAILED, Token};
use crate::network::ConnectionInfo;
use crate::protocol::{JobRequest, JobResults};
use crate::rekey::{self, RekeyPolicy, RekeyReport};

pub const HANDSHAKE_TEST_MESSAGE: &str = "Testing!!!12345";
pub const DEFAULT_REKEY_INTERVAL: u32 = 100;

/// What a client tells the server about itself in every job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Random per-connection suffix.
    pub suffix: String,
    pub os: String,
    pub security_level: u32,
}

impl ClientIdentity {
    pub fn new(os: impl Into<String>, security_level: u32) -> Self {
        Self {
            suffix: format!("{:08x}", rand::random::<u32>()),
            os: os.into(),
            security_level,
        }
    }

    pub fn job_request(&self) -> JobRequest {
        JobRequest::new(self.suffix.clone(), self.os.clone(), self.security_level)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub channel: ChannelOptions,
    pub rekey: RekeyPolicy,
    /// Round-trips between automatic rekeys; 0 disables them.
    pub rekey_interval: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            channel: ChannelOptions::default(),
            rekey: RekeyPolicy::default(),
            rekey_interval: DEFAULT_REKEY_INTERVAL,
        }
    }
}

// ── ClientSession ────────────────────────────────────────────────

pub struct ClientSession<S> {
    channel: SecureChannel<S>,
    identity: ClientIdentity,
    options: SessionOptions,
    rounds: u32,
}

impl ClientSession<TcpStream> {
    pub async fn connect(
        info: &ConnectionInfo,
        psk: &str,
        identity: ClientIdentity,
        options: SessionOptions,
    ) -> Result<Self, TrussError> {
        let channel = info.connect(psk, options.channel.clone()).await?;
        Ok(Self::new(channel, identity, options))
    }
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: SecureChannel<S>, identity: ClientIdentity, options: SessionOptions) -> Self {
        Self {
            channel,
            identity,
            options,
            rounds: 0,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn channel(&self) -> &SecureChannel<S> {
        &self.channel
    }

    /// Round-trips since the last rekey.
    pub fn rounds_since_rekey(&self) -> u32 {
        self.rounds
    }

    /// Send the test message and check the server echoes it with `<S>`.
    pub async fn handshake(&mut self) -> Result<(), TrussError> {
        self.channel.send(HANDSHAKE_TEST_MESSAGE).await?;
        let reply = self.channel.receive_message().await?;
        if reply != format!("{HANDSHAKE_TEST_MESSAGE}{HANDSHAKE_MARKER}") {
            return Err(TrussError::HandshakeFailed(reply));
        }
        debug!("handshake complete");
        Ok(())
    }

    /// Handshake followed by an immediate rekey away from the PSK.
    pub async fn establish(&mut self) -> Result<(), TrussError> {
        self.handshake().await?;
        self.rekey().await?;
        Ok(())
    }

    pub async fn rekey(&mut self) -> Result<RekeyReport, TrussError> {
        let report = rekey::initiate(&mut self.channel, &self.options.rekey).await?;
        self.rounds = 0;
        Ok(report)
    }

    /// One request/reply round. Rekeys first when the interval is up.
    pub async fn request(&mut self, text: &str) -> Result<String, TrussError> {
        let interval = self.options.rekey_interval;
        if interval > 0 && self.rounds >= interval {
            info!(rounds = self.rounds, "rekey interval reached");
            self.rekey().await?;
        }
        let reply = self.exchange(text).await?;
        self.rounds += 1;
        Ok(reply)
    }

    async fn exchange(&mut self, text: &str) -> Result<String, TrussError> {
        self.channel.send(text).await?;
        self.channel.receive_message().await
    }

    /// Ask for work. `None` when the server has nothing for us.
    pub async fn request_job(&mut self) -> Result<Option<String>, TrussError> {
        let request = self.identity.job_request().encode();
        let reply = self.request(&request).await?;
        Ok((!reply.is_empty()).then_some(reply))
    }

    /// Report the assigned job finished.
    pub async fn sign_off(&mut self) -> Result<bool, TrussError> {
        let reply = self.request(Token::WorkDone.as_str()).await?;
        match reply.as_str() {
            REPLY_DONE => Ok(true),
            REPLY_FAILED => Ok(false),
            _ => Err(TrussError::UnexpectedReply {
                expected: "Done or Failed",
                actual: reply,
            }),
        }
    }

    /// Send results to a drop-off node, item by item.
    pub async fn upload(&mut self, results: &JobResults) -> Result<(), TrussError> {
        let reply = self.request(Token::WorkDone.as_str()).await?;
        expect_reply(Token::Next, reply)?;

        let items = results.items();
        let last = items.len() - 1;
        for (index, item) in items.iter().enumerate() {
            let reply = self.exchange(item).await?;
            let expected = if index == last {
                Token::Acknowledged
            } else {
                Token::Next
            };
            expect_reply(expected, reply)?;
        }
        info!(command = %results.command, "results uploaded");
        Ok(())
    }

    /// Tell the server we are leaving. It closes without replying.
    pub async fn quit(mut self) -> Result<(), TrussError> {
        self.channel.send(Token::Quit.as_str()).await
    }
}

fn expect_reply(token: Token, reply: String) -> Result<(), TrussError> {
    if token.matches(&reply) {
        Ok(())
    } else {
        Err(TrussError::UnexpectedReply {
            expected: token.as_str(),
            actual: reply,
        })
    }
}
