//! # truss-server — coordinating node
//!
//! Listens for workers and serves one of two roles per listener:
//!
//! - **Assignment**: hands out queued jobs by OS and security level and
//!   takes sign-offs.
//! - **Drop-off**: receives uploaded results and flushes them to
//!   `SavedResults-*` files.
//!
//! Every connection gets its own handler task and its own session key.

pub mod config;
pub mod handler;
pub mod maintenance;
pub mod results;
pub mod role;
pub mod service;
