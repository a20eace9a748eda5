//! CLI argument definitions using clap
//!
//! Commands:
//! - fieldsync login [--username <email>]
//! - fieldsync logout
//! - fieldsync status
//! - fieldsync fetch <view>
//! - fieldsync watch [<view>...]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fieldsync - keep operations dashboard views in sync with the server
#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// API base URL, overriding the configuration file
    #[arg(long, global = true, env = "FIELDSYNC_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL, overriding the configuration file
    #[arg(long, global = true, env = "FIELDSYNC_WS_URL")]
    pub ws_url: Option<String>,

    /// Also write daily-rotated logs into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the session
    Login {
        /// Account email; falls back to the last username used
        #[arg(long, env = "FIELDSYNC_USERNAME")]
        username: Option<String>,
    },

    /// Log out and forget the stored session
    Logout,

    /// Show session, connection settings and cached views
    Status,

    /// Fetch one view and print it as JSON
    Fetch {
        /// View name, e.g. dashboard
        view: String,
    },

    /// Follow live updates until interrupted
    Watch {
        /// Views to print; all configured views when empty
        views: Vec<String>,
    },
}
