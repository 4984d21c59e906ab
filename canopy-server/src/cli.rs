// ABOUTME: Command-line interface definition for canopy-server using clap
// ABOUTME: derive - run, serve, and agents subcommands plus shared flags.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "canopy-server", version, about = "Run and monitor trees of tool-using agents")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "canopy.toml")]
    pub config: PathBuf,

    /// Model id used by every agent, overriding the config
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task headless and print events as they arrive
    Run {
        /// Agent that receives the task
        #[arg(short, long, default_value = "planning_agent")]
        agent: String,

        /// The task text
        task: String,

        /// Print the full JSON of every event instead of a summary line
        #[arg(long)]
        json: bool,
    },
    /// Serve the monitoring feed over WebSocket
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8765")]
        addr: SocketAddr,
    },
    /// List the configured agents
    Agents,
}
