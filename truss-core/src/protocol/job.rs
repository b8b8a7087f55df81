//! `job:<clientSuffix>:<OS>:<securityLevel>` request payload.

use std::fmt;

use crate::error::TrussError;
use crate::message::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Random per-connection suffix chosen by the client.
    pub client_suffix: String,
    /// Free-form OS name as the client reports it, e.g. `Windows 10`.
    pub os: String,
    pub security_level: u32,
}

impl JobRequest {
    pub fn new(client_suffix: impl Into<String>, os: impl Into<String>, security_level: u32) -> Self {
        Self {
            client_suffix: client_suffix.into(),
            os: os.into(),
            security_level,
        }
    }

    pub fn parse(text: &str) -> Result<Self, TrussError> {
        let fields: Vec<&str> = text.split(':').collect();
        let [head, suffix, os, level] = fields.as_slice() else {
            return Err(TrussError::InvalidJobRequest(format!(
                "expected 4 fields, got {}",
                fields.len()
            )));
        };
        if !Token::Job.matches(head) {
            return Err(TrussError::InvalidJobRequest(format!(
                "unexpected prefix {head:?}"
            )));
        }
        let security_level = level.trim().parse::<u32>().map_err(|_| {
            TrussError::InvalidJobRequest(format!("security level {level:?} is not an integer"))
        })?;
        Ok(Self::new(*suffix, *os, security_level))
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Token::Job,
            self.client_suffix,
            self.os,
            self.security_level
        )
    }
}
