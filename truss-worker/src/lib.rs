//! # truss-worker — job executing node
//!
//! Pulls jobs from an assignment server, runs them through a
//! [`runner::ProcessRunner`], uploads the captured output to a drop-off
//! node and signs off. Both sessions rekey on their own schedule.

pub mod config;
pub mod runner;
pub mod worker;

pub use runner::{ProcessOutput, ProcessRunner, ShellRunner};
pub use worker::{Cycle, Worker};
