//! High-level client API.

mod client;

pub use client::{ClientConfig, TungoClient, TungoClientBuilder};
