#![forbid(unsafe_code)]

//! `acp-agent`: a tool-calling LLM agent speaking the Agent Client Protocol
//! (bidirectional JSON-RPC 2.0 over newline-delimited streams), plus the
//! matching client role.

pub mod agent;
pub mod client;
pub mod config;
pub mod errors;
pub mod llm;
pub mod mode;
pub mod models;
pub mod protocol;
pub mod rpc;
pub mod tools;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
