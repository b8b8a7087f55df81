pub mod connection;

pub use connection::{ConnectionInfo, DEFAULT_PORT, usable_port};
