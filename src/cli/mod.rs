// Keyward — CLI Module
//
// Command-line interface using clap derive macros. Offline commands (init,
// classify, sync, serve) work on local files; the rest talk to a running
// daemon over the control socket.

mod commands;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

pub use commands::execute;

/// Keyward — credential lifecycle daemon: classify, sync and rotate the
/// secrets in a `.env` file.
#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to keyward.toml.
    #[arg(long, global = true, env = "KEYWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Credential file to manage.
    #[arg(long, global = true, default_value = ".env", env = "KEYWARD_CREDENTIALS")]
    pub credentials: PathBuf,

    /// Control socket path.
    #[arg(long, global = true, env = "KEYWARD_SOCKET")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the master key and the encrypted state database.
    Init,

    /// Show how every name in the credential file is classified (offline).
    Classify,

    /// Run one reconcile pass against every sync target, without the daemon.
    Sync,

    /// Start the daemon: watcher, scheduler and control socket.
    Serve,

    /// Daemon status.
    Status,

    /// Request a rotation.
    Rotate {
        /// Credential name.
        name: String,

        /// Bypass the cadence and replace any queued job.
        #[arg(long)]
        emergency: bool,

        /// Free-text reason, logged with the request.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Approve a rotation that is waiting for approval.
    Approve {
        name: String,
    },

    /// Supply the new value for a manual rotation. The value is read from
    /// stdin, never from the command line.
    Complete {
        name: String,
    },

    /// Discard a failed rotation's new value and return to the old one.
    Rollback {
        name: String,
    },

    /// List current and recent rotation jobs.
    Jobs,

    /// Query the audit log.
    Audit {
        /// Only records for this credential.
        #[arg(long)]
        name: Option<String>,

        /// Only this action (e.g. rotation_completed). Repeatable.
        #[arg(long)]
        action: Vec<String>,

        /// RFC 3339 lower bound.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// RFC 3339 upper bound.
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        limit: Option<usize>,
    },
}
