pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use client::X402Agent;
pub use error::{AgentError, AgentResult};
