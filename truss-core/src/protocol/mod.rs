//! Structured payloads carried inside the text protocol.

pub mod job;
pub mod upload;

pub use job::JobRequest;
pub use upload::JobResults;
