//! High-level server API.

mod server;

pub use server::{ServerConfig, TungoServer, TungoServerBuilder};
