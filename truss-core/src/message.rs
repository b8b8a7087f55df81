//! Wire tokens and request decoding.
//!
//! Every message on a secure channel is a line of text. Control tokens are
//! matched case-insensitively; anything else in the `Ready` phase decodes into
//! the closed [`Request`] set.

use crate::error::TrussError;
use std::fmt;

/// Appended to the client's test message in the handshake reply.
pub const HANDSHAKE_MARKER: &str = "<S>";

/// Prefixed to the echo of a request the server does not understand.
pub const UNSUPPORTED_MARKER: &str = "<UNSUPPORTED>";

/// Sign-off succeeded.
pub const REPLY_DONE: &str = "Done";

/// Sign-off or upload failed.
pub const REPLY_FAILED: &str = "Failed";

// ── Token ────────────────────────────────────────────────────────

/// All control tokens understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    // ── Key exchange ─────────────────────────────────────────────
    Rekey,
    Prime,
    Base,
    PublicKey,
    PublicKeyGood,
    RekeyStarting,
    Ack,

    // ── Session ──────────────────────────────────────────────────
    Quit,
    Job,
    WorkDone,

    // ── Upload ───────────────────────────────────────────────────
    Next,
    Acknowledged,
}

impl Token {
    pub const ALL: [Token; 12] = [
        Token::Rekey,
        Token::Prime,
        Token::Base,
        Token::PublicKey,
        Token::PublicKeyGood,
        Token::RekeyStarting,
        Token::Ack,
        Token::Quit,
        Token::Job,
        Token::WorkDone,
        Token::Next,
        Token::Acknowledged,
    ];

    /// The exact text sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Rekey => "<REKEY>",
            Token::Prime => "<PRIME>",
            Token::Base => "<BASE>",
            Token::PublicKey => "<PUBLICKEY>",
            Token::PublicKeyGood => "<PubKey-GOOD>",
            Token::RekeyStarting => "<REKEY-STARTING>",
            Token::Ack => "<ACK>",
            Token::Quit => "quit",
            Token::Job => "job",
            Token::WorkDone => "workdone",
            Token::Next => "NEXT",
            Token::Acknowledged => "Acknowledged",
        }
    }

    /// Case-insensitive comparison against received text.
    pub fn matches(&self, text: &str) -> bool {
        text.eq_ignore_ascii_case(self.as_str())
    }
}

impl TryFrom<&str> for Token {
    type Error = TrussError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Token::ALL
            .into_iter()
            .find(|t| t.matches(text))
            .ok_or_else(|| TrussError::UnknownToken(text.to_string()))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Request ──────────────────────────────────────────────────────

/// One command received in the `Ready` phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Quit,
    /// The full `job:...` text; parse it with `JobRequest::parse`.
    Job(String),
    WorkDone,
    Rekey,
    Empty,
    Unsupported(String),
}

impl Request {
    pub fn decode(text: &str) -> Self {
        if text.is_empty() {
            return Request::Empty;
        }
        if Token::Quit.matches(text) {
            return Request::Quit;
        }
        if Token::WorkDone.matches(text) {
            return Request::WorkDone;
        }
        if Token::Rekey.matches(text) {
            return Request::Rekey;
        }
        if is_job_request(text) {
            return Request::Job(text.to_string());
        }
        Request::Unsupported(text.to_string())
    }

    pub fn encode(&self) -> String {
        match self {
            Request::Quit => Token::Quit.as_str().to_string(),
            Request::Job(payload) => payload.clone(),
            Request::WorkDone => Token::WorkDone.as_str().to_string(),
            Request::Rekey => Token::Rekey.as_str().to_string(),
            Request::Empty => String::new(),
            Request::Unsupported(text) => text.clone(),
        }
    }
}

/// `job` alone, or `job:` followed by anything.
fn is_job_request(text: &str) -> bool {
    let head = Token::Job.as_str();
    match text.get(..head.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(head) => {
            matches!(text.as_bytes().get(head.len()), None | Some(b':'))
        }
        _ => false,
    }
}

/// The server's reply to a request it does not understand.
pub fn unsupported_reply(text: &str) -> String {
    format!("{UNSUPPORTED_MARKER}{text}")
}
