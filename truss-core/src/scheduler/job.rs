//! Job records and the OS matching rules.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub type JobId = u64;

// ── TargetOs ─────────────────────────────────────────────────────

/// OS a job requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Any,
    Windows,
    Linux,
}

impl TargetOs {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Any => "any",
            TargetOs::Windows => "windows",
            TargetOs::Linux => "linux",
        }
    }

    /// Map a client-reported OS name onto a job class. macOS runs the
    /// linux jobs; unrecognized systems only get `any` jobs.
    pub fn classify_client(os: &str) -> Option<TargetOs> {
        let os = os.to_lowercase();
        if os.contains("windows") {
            Some(TargetOs::Windows)
        } else if os.contains("linux") || os.contains("mac") {
            Some(TargetOs::Linux)
        } else {
            None
        }
    }

    /// Whether a job requiring `self` may run on a client of class `client`.
    pub fn accepts(&self, client: Option<TargetOs>) -> bool {
        match self {
            TargetOs::Any => true,
            required => client == Some(*required),
        }
    }
}

impl FromStr for TargetOs {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(TargetOs::Any),
            "windows" => Ok(TargetOs::Windows),
            "linux" => Ok(TargetOs::Linux),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── JobStatus / ResultKind ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Completed,
}

/// Which captured stream a result line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Error,
    Output,
}

// ── Job ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    command: String,
    os: TargetOs,
    security_level: u32,
    issued_to: String,
    issued_at: Option<Instant>,
    status: JobStatus,
    errors: Vec<String>,
    output: Vec<String>,
}

impl Job {
    pub(crate) fn pending(id: JobId, command: String, os: TargetOs, security_level: u32) -> Self {
        Self {
            id,
            command,
            os,
            security_level,
            issued_to: String::new(),
            issued_at: None,
            status: JobStatus::Pending,
            errors: Vec::new(),
            output: Vec::new(),
        }
    }

    pub(crate) fn completed(id: JobId, command: String) -> Self {
        Self {
            status: JobStatus::Completed,
            ..Self::pending(id, command, TargetOs::Any, 0)
        }
    }

    pub(crate) fn assign(&mut self, client_id: &str) {
        self.status = JobStatus::Assigned;
        self.issued_to = client_id.to_string();
        self.issued_at = Some(Instant::now());
    }

    pub(crate) fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.issued_to.clear();
        self.issued_at = None;
    }

    pub(crate) fn record(&mut self, line: &str, kind: ResultKind) {
        match kind {
            ResultKind::Error => self.errors.push(line.to_string()),
            ResultKind::Output => self.output.push(line.to_string()),
        }
    }

    pub(crate) fn matches(&self, client: Option<TargetOs>, security_level: u32) -> bool {
        self.status == JobStatus::Pending
            && self.os.accepts(client)
            && self.security_level <= security_level
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn security_level(&self) -> u32 {
        self.security_level
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Empty until assigned.
    pub fn issued_to(&self) -> &str {
        &self.issued_to
    }

    pub fn issued_at(&self) -> Option<Instant> {
        self.issued_at
    }

    /// Time since assignment; zero if never assigned.
    pub fn elapsed(&self) -> Duration {
        self.issued_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn error_lines(&self) -> &[String] {
        &self.errors
    }

    pub fn output_lines(&self) -> &[String] {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_client_by_substring() {
        assert_eq!(TargetOs::classify_client("Windows 10"), Some(TargetOs::Windows));
        assert_eq!(TargetOs::classify_client("linux"), Some(TargetOs::Linux));
        assert_eq!(TargetOs::classify_client("Mac OS X"), Some(TargetOs::Linux));
        assert_eq!(TargetOs::classify_client("FreeBSD"), None);
    }

    #[test]
    fn any_accepts_everyone() {
        assert!(TargetOs::Any.accepts(None));
        assert!(TargetOs::Any.accepts(Some(TargetOs::Windows)));
        assert!(!TargetOs::Windows.accepts(Some(TargetOs::Linux)));
        assert!(!TargetOs::Linux.accepts(None));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("WINDOWS".parse::<TargetOs>(), Ok(TargetOs::Windows));
        assert_eq!("Any".parse::<TargetOs>(), Ok(TargetOs::Any));
        assert!("solaris".parse::<TargetOs>().is_err());
    }

    #[test]
    fn assign_and_requeue_stamp_and_clear() {
        let mut job = Job::pending(1, "date".into(), TargetOs::Linux, 0);
        assert!(job.matches(Some(TargetOs::Linux), 0));

        job.assign("10.0.0.3:5000/ab");
        assert_eq!(job.status(), JobStatus::Assigned);
        assert_eq!(job.issued_to(), "10.0.0.3:5000/ab");
        assert!(job.issued_at().is_some());
        assert!(!job.matches(Some(TargetOs::Linux), 0));

        job.requeue();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.issued_to().is_empty());
        assert_eq!(job.elapsed(), Duration::ZERO);
    }
}
