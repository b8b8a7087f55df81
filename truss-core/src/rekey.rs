//! Diffie-Hellman rekey over an established secure channel.
//!
//! Every arrow below is one ACKed step (see [`crate::channel`]):
//!
//! ```text
//!  initiator                         responder
//!    <REKEY>            ──►
//!    <PRIME>, prime hex ──►
//!    <BASE>, base hex   ──►
//!                       ◄──  <REKEY-STARTING>
//!    <PUBLICKEY>, A     ──►
//!                       ◄──  <PubKey-GOOD>
//!                       ◄──  <PUBLICKEY>, B
//!    <PubKey-GOOD>      ──►
//!         both derive the new key from the shared secret
//! ```
//!
//! Unexpected tokens and missing ACKs are logged and the exchange carries on
//! until the mismatch budget runs out. An aborted exchange never swaps the
//! key.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info};

use crate::channel::SecureChannel;
use crate::dh::{DEFAULT_BASE_BITS, DEFAULT_PRIME_BITS, DhKeyPair, DhParameters, SharedSecret};
use crate::error::TrussError;
use crate::message::Token;

pub const DEFAULT_MISMATCH_BUDGET: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RekeyPolicy {
    pub prime_bits: usize,
    pub base_bits: usize,
    /// Mismatches tolerated before the exchange is abandoned.
    pub mismatch_budget: u32,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            prime_bits: DEFAULT_PRIME_BITS,
            base_bits: DEFAULT_BASE_BITS,
            mismatch_budget: DEFAULT_MISMATCH_BUDGET,
        }
    }
}

/// Summary of a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyReport {
    /// Mismatches tolerated along the way.
    pub mismatches: u32,
    /// Key generation now in use.
    pub generation: u32,
}

// ── Exchange ─────────────────────────────────────────────────────

struct Exchange<'a, S> {
    channel: &'a mut SecureChannel<S>,
    budget: u32,
    mismatches: u32,
}

impl<'a, S> Exchange<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(channel: &'a mut SecureChannel<S>, policy: &RekeyPolicy) -> Self {
        Self {
            channel,
            budget: policy.mismatch_budget,
            mismatches: 0,
        }
    }

    fn tally(&mut self, ok: bool, expected: &str, got: &str) -> Result<(), TrussError> {
        if ok {
            return Ok(());
        }
        self.mismatches += 1;
        error!(
            expected,
            got,
            mismatches = self.mismatches,
            "key exchange out of step"
        );
        if self.mismatches > self.budget {
            return Err(TrussError::RekeyAborted(format!(
                "{} mismatches (budget {})",
                self.mismatches, self.budget
            )));
        }
        Ok(())
    }

    fn tally_ack(&mut self, stray: Option<String>) -> Result<(), TrussError> {
        match stray {
            None => Ok(()),
            Some(got) => self.tally(false, Token::Ack.as_str(), &got),
        }
    }

    async fn send(&mut self, value: &str) -> Result<(), TrussError> {
        let stray = self.channel.send_acked(value).await?;
        self.tally_ack(stray)
    }

    async fn receive(&mut self) -> Result<String, TrussError> {
        let (value, stray) = self.channel.receive_acked().await?;
        self.tally_ack(stray)?;
        Ok(value)
    }

    async fn expect(&mut self, token: Token) -> Result<(), TrussError> {
        let value = self.receive().await?;
        self.tally(token.matches(&value), token.as_str(), &value)
    }

    fn finish(self, secret: &str) -> RekeyReport {
        self.channel.rekey(secret);
        RekeyReport {
            mismatches: self.mismatches,
            generation: self.channel.cipher().generation(),
        }
    }
}

// Modular exponentiation stays off the async workers.

async fn key_pair(params: DhParameters) -> Result<DhKeyPair, TrussError> {
    Ok(tokio::task::spawn_blocking(move || params.generate_key_pair()).await?)
}

async fn agree(pair: DhKeyPair, peer_hex: String) -> Result<SharedSecret, TrussError> {
    tokio::task::spawn_blocking(move || pair.agree_hex(&peer_hex)).await?
}

/// Run the initiator side, starting with `<REKEY>`.
pub async fn initiate<S>(
    channel: &mut SecureChannel<S>,
    policy: &RekeyPolicy,
) -> Result<RekeyReport, TrussError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (prime_bits, base_bits) = (policy.prime_bits, policy.base_bits);
    let params =
        tokio::task::spawn_blocking(move || DhParameters::generate(prime_bits, base_bits))
            .await??;

    let mut ex = Exchange::new(channel, policy);
    ex.send(Token::Rekey.as_str()).await?;
    ex.send(Token::Prime.as_str()).await?;
    ex.send(&params.prime_hex()).await?;
    ex.send(Token::Base.as_str()).await?;
    ex.send(&params.base_hex()).await?;
    ex.expect(Token::RekeyStarting).await?;

    let pair = key_pair(params).await?;
    ex.send(Token::PublicKey.as_str()).await?;
    ex.send(&pair.public_hex()).await?;
    ex.expect(Token::PublicKeyGood).await?;

    ex.expect(Token::PublicKey).await?;
    let peer = ex.receive().await?;
    ex.send(Token::PublicKeyGood.as_str()).await?;

    let secret = agree(pair, peer).await?;
    let report = ex.finish(&secret.to_decimal());
    info!(
        generation = report.generation,
        mismatches = report.mismatches,
        "rekey complete (initiator)"
    );
    Ok(report)
}

/// Run the responder side. The caller has already taken `<REKEY>` off the
/// wire; this acknowledges it and carries on.
pub async fn respond<S>(
    channel: &mut SecureChannel<S>,
    policy: &RekeyPolicy,
) -> Result<RekeyReport, TrussError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ex = Exchange::new(channel, policy);
    let stray = ex.channel.acknowledge().await?;
    ex.tally_ack(stray)?;

    ex.expect(Token::Prime).await?;
    let prime = ex.receive().await?;
    ex.expect(Token::Base).await?;
    let base = ex.receive().await?;
    let params = DhParameters::from_hex(&prime, &base)?;
    ex.send(Token::RekeyStarting.as_str()).await?;

    let pair = key_pair(params).await?;
    ex.expect(Token::PublicKey).await?;
    let peer = ex.receive().await?;
    ex.send(Token::PublicKeyGood.as_str()).await?;

    ex.send(Token::PublicKey.as_str()).await?;
    ex.send(&pair.public_hex()).await?;
    ex.expect(Token::PublicKeyGood).await?;

    let secret = agree(pair, peer).await?;
    let report = ex.finish(&secret.to_decimal());
    info!(
        generation = report.generation,
        mismatches = report.mismatches,
        "rekey complete (responder)"
    );
    Ok(report)
}
