//! CLI-wide connection settings, shared by every subcommand.

use clap::Args;

/// Connection settings for talking to a running coordinator.
#[derive(Debug, Clone, Args)]
pub struct Connection {
    /// Base URL of the coordinator broker.
    #[arg(long, env = "COORDINATOR_URL", default_value = "http://127.0.0.1:8420")]
    pub url: String,

    /// Bearer token (agent or admin, depending on the command).
    #[arg(long, env = "COORDINATOR_TOKEN")]
    pub token: Option<String>,

    /// Machine identity sent as the `Machine-Name` header.
    #[arg(long, env = "COORDINATOR_MACHINE")]
    pub machine: Option<String>,

    /// Project identity sent as the `Project-Name` header.
    #[arg(long, env = "COORDINATOR_PROJECT")]
    pub project: Option<String>,
}
