use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Conversations and notifications from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to the local state database
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session in the keychain
    Login {
        /// Username or email
        username: String,
        /// Account password (read from stdin when omitted)
        #[arg(long, value_name = "PASSWORD")]
        password: Option<String>,
    },
    /// Sign out and clear the stored session and local state
    Logout,
    /// Show who is signed in
    Status,
    /// List conversations
    Conversations {
        /// Fetch from the server instead of showing local state
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List notifications
    Notifications {
        /// Fetch from the server instead of showing local state
        #[arg(long)]
        refresh: bool,
        /// Mark every notification read
        #[arg(long)]
        mark_all_read: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the message history of a thread
    History {
        /// Thread id
        thread_id: i64,
        /// Number of pages to load, newest first
        #[arg(short, long, default_value = "1")]
        pages: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stay connected and print live updates
    Watch {
        /// Open this thread and send stdin lines to it
        #[arg(long, value_name = "ID")]
        thread: Option<i64>,
    },
}
