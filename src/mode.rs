//! Transport mode: how the agent reaches its client.
//!
//! Selected by the `transport` config key; `--stdio` on the command line
//! overrides it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Byte stream the agent serves.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Accept TCP connections on `listen_addr`, one actor per connection.
    #[default]
    Tcp,
    /// Serve a single connection over the process's stdin and stdout.
    Stdio,
}
