use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use handreceipt_core::models::HttpMethod;
use handreceipt_core::SyncState;

#[derive(Parser)]
#[command(name = "handreceipt")]
#[command(about = "Queue and sync custody transfers from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local queue database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for API and auth configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a scanned QR token and queue the transfer
    Scan {
        /// Raw token JSON (read from stdin when omitted)
        payload: Option<String>,
        /// User receiving custody
        #[arg(long, value_name = "USER")]
        to: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued transfers
    List {
        /// Only transfers for this property
        #[arg(long, value_name = "ID")]
        property: Option<String>,
        /// Only transfers in these sync states
        #[arg(long, value_enum)]
        state: Vec<StateArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List synced transfers kept as local history
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel a queued transfer before it is committed
    Cancel {
        /// Transfer ID or unique ID prefix
        id: String,
    },
    /// Acknowledge and drop a transfer that needs attention
    #[command(alias = "ack")]
    Acknowledge {
        /// Transfer ID or unique ID prefix
        id: String,
    },
    /// Push queued transfers and requests to the server
    Sync {
        /// Keep running and sync whenever connectivity settles online
        #[arg(long)]
        watch: bool,
        /// Seconds between sync passes in watch mode
        #[arg(long, default_value = "60", value_name = "SECS")]
        interval: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue counters
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage queued generic API mutations
    Requests {
        #[command(subcommand)]
        command: RequestCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the stored auth session for a profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StateArg {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl From<StateArg> for SyncState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Pending => Self::Pending,
            StateArg::Syncing => Self::Syncing,
            StateArg::Completed => Self::Completed,
            StateArg::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum MethodArg {
    Post,
    Put,
    Patch,
    Delete,
}

impl From<MethodArg> for HttpMethod {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Post => Self::Post,
            MethodArg::Put => Self::Put,
            MethodArg::Patch => Self::Patch,
            MethodArg::Delete => Self::Delete,
        }
    }
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// Send a mutation now, or queue it while offline
    Submit {
        #[arg(long, value_enum)]
        method: MethodArg,
        /// Path relative to the API base URL, e.g. /properties/P1/notes
        #[arg(long, value_name = "PATH")]
        endpoint: String,
        /// JSON request body
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
        /// Queue without trying the network
        #[arg(long)]
        offline: bool,
    },
    /// List queued mutations in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a queued mutation
    Drop {
        /// Request ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Transfer API base URL
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Auth service URL used to refresh sessions
        #[arg(long, value_name = "URL")]
        auth_url: Option<String>,
        /// Public API key sent with refresh requests
        #[arg(long, value_name = "KEY")]
        auth_api_key: Option<String>,
        /// Trusted holder key as HOLDER=HEX (repeatable)
        #[arg(long = "holder-key", value_name = "HOLDER=HEX")]
        holder_keys: Vec<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile config
    Show {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a session in the keychain
    Login {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
        /// Seconds until the access token expires
        #[arg(long, default_value = "3600")]
        expires_in: i64,
        #[arg(long, value_name = "ID")]
        user_id: String,
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
    },
    /// Show auth status for profile
    Status {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
    /// Clear the stored session for profile
    Logout {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}
