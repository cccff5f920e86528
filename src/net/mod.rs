//! Networking: TLS termination and the connection worker pool.

pub mod server;
pub mod tls;

pub use server::{bootstrap, run};
