use clap::{Parser, Subcommand, ValueEnum};

/// Command-line interface definition for rFieldTrack
/// Offline-first field tracking: capture, timeline, sync and rollups on SQLite
#[derive(Parser)]
#[command(
    name = "rfieldtrack",
    version = env!("CARGO_PKG_VERSION"),
    about = "Offline-first location tracking: durable sample queue, stop/move timeline, idempotent sync",
    long_about = None
)]
pub struct Cli {
    /// Override database path (useful for tests or custom DB)
    #[arg(global = true, long = "db")]
    pub db: Option<String>,

    /// Override the remote store path
    #[arg(global = true, long = "remote")]
    pub remote: Option<String>,

    /// Run in test mode (no config file update)
    #[arg(global = true, long = "test", hide = true)]
    pub test: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and configuration
    Init,

    /// Show or check the configuration file
    Config {
        #[arg(long = "print", help = "Print the current configuration")]
        print_config: bool,

        #[arg(long = "check", help = "Check configuration file for missing fields")]
        check: bool,

        #[arg(long = "migrate", help = "Add missing fields to the configuration file")]
        migrate: bool,
    },

    /// Manage the database (migrations, integrity checks, etc.)
    Db {
        #[arg(long = "migrate", help = "Run pending database migrations")]
        migrate: bool,

        #[arg(long = "check", help = "Check database integrity")]
        check: bool,

        #[arg(long = "vacuum", help = "Optimize the database using VACUUM")]
        vacuum: bool,

        #[arg(long = "info", help = "Show database information")]
        info: bool,
    },

    /// Print the internal log table
    Log {
        #[arg(long = "print", help = "Print rows from the internal log table")]
        print: bool,
    },

    /// Start, end or force-close tracking sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Feed recorded provider fixes (CSV or JSON lines) into the active session
    Ingest {
        /// File with one fix per row/line
        file: String,

        #[arg(long = "employee", help = "Employee whose active session receives the fixes")]
        employee: String,

        #[arg(long, value_enum, help = "Input format (default: from file extension)")]
        format: Option<FixFormat>,
    },

    /// Upload pending samples to the remote store
    Sync {
        #[arg(long, default_value_t = 1, help = "Maximum number of sync cycles")]
        cycles: usize,

        #[arg(
            long = "remote-max-version",
            help = "Treat the remote as supporting payloads up to this version"
        )]
        remote_max_version: Option<u8>,
    },

    /// Show active sessions and queue health
    Status,

    /// Print the stop/move timeline of a session
    Timeline {
        session_id: String,
    },

    /// Apply retention windows to the device database and the remote store
    Purge {
        #[arg(long = "at", help = "Reference time (RFC 3339 or YYYY-MM-DD HH:MM:SS), default now")]
        at: Option<String>,
    },

    /// Give samples past the attempt ceiling a fresh set of attempts
    Recover,

    /// Inspect the remote store
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a new session for an employee
    Start {
        employee: String,

        #[arg(long = "at", help = "Start time, default now")]
        at: Option<String>,
    },

    /// End the employee's active session
    End {
        employee: String,

        #[arg(long = "at", help = "End time, default now")]
        at: Option<String>,
    },

    /// Administrative forced closure (no-op on a completed session)
    Close {
        session_id: String,

        #[arg(long = "at", help = "Closure time, default now")]
        at: Option<String>,
    },

    /// List sessions
    List {
        #[arg(long = "employee")]
        employee: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RemoteAction {
    /// Session and day rollups
    Rollup {
        #[arg(long = "employee")]
        employee: Option<String>,
    },

    /// List alerts
    Alerts {
        #[arg(long = "all", help = "Include resolved alerts")]
        all: bool,
    },

    /// Acknowledge an open alert
    Ack {
        id: i64,
    },

    /// Run the periodic no-signal and escalation checks
    Tick {
        #[arg(long = "at", help = "Evaluation time, default now")]
        at: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FixFormat {
    Csv,
    Jsonl,
}
