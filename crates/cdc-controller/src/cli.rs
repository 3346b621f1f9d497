use clap::{Parser, Subcommand};

/// Logical-replication CDC pipeline: polls a Postgres slot via `wal2json`,
/// persists changes into `change_history`, and fans them out to active clients.
#[derive(Debug, Parser)]
#[command(name = "vibestack-replicator", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "vibestack-replicator.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller: serve the admin HTTP surface and drive the polling loop.
    Run,
    /// Print the current replication slot status and confirmed LSN, then exit.
    Status,
    /// Ensure the replication slot exists and print its status, then exit.
    Init,
    /// Run the same reachability checks the `/verify` endpoint exposes, then exit.
    Verify,
}
