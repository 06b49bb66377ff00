//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// Pricewatch - price-drop alerts for Walmart and Target
#[derive(Parser, Debug)]
#[command(name = "pricewatch", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.pricewatch/data/pricewatch.db)
    #[arg(long, global = true, env = "PRICEWATCH_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: ~/.pricewatch/config.json)
    #[arg(long, global = true, env = "PRICEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database
    Init {
        /// Delete and recreate an existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage tracked products
    Track {
        #[command(subcommand)]
        command: TrackCommands,
    },

    /// Manage the ZIP codes prices are checked from
    Zip {
        #[command(subcommand)]
        command: ZipCommands,
    },

    /// Manage Walmart pickup stores
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },

    /// Show alerts sent to a user
    Alerts {
        /// Discord user ID
        discord_id: String,

        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Run one check cycle now
    Check,

    /// Run checks on a fixed interval until interrupted
    Run,

    /// Show the last run and database totals
    Stats,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// On/off switch for `user notify`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

// ============================================================================
// User Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Register a user
    Add {
        /// Discord user ID (alerts are sent as direct messages)
        discord_id: String,

        /// Display name
        name: String,

        /// Home Walmart store number
        #[arg(long)]
        store: String,

        /// Home ZIP code
        #[arg(long)]
        zip: String,
    },

    /// List users
    List,

    /// Remove a user and everything they track
    Remove {
        /// Discord user ID
        discord_id: String,
    },

    /// Turn alerts on or off for a user
    Notify {
        /// Discord user ID
        discord_id: String,

        #[arg(value_enum)]
        state: Toggle,
    },
}

// ============================================================================
// Track Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum TrackCommands {
    /// Track a product URL below a price threshold
    Add {
        /// Discord user ID
        discord_id: String,

        /// Walmart or Target product URL
        url: String,

        /// Alert when the price is at or below this amount
        threshold: String,

        /// Product name (default: taken from the page)
        #[arg(long)]
        name: Option<String>,
    },

    /// List a user's tracked products
    List {
        /// Discord user ID
        discord_id: String,

        /// Only show one retailer
        #[arg(long)]
        retailer: Option<String>,

        /// Include stopped tracking
        #[arg(long)]
        all: bool,
    },

    /// Stop tracking a product
    Remove {
        /// Discord user ID
        discord_id: String,

        /// Tracking ID (from `track list`)
        id: i64,
    },

    /// Show recorded prices for a tracked product
    History {
        /// Discord user ID
        discord_id: String,

        /// Tracking ID (from `track list`)
        id: i64,

        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

// ============================================================================
// Zip Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ZipCommands {
    /// Check prices from another ZIP code
    Add {
        /// Discord user ID
        discord_id: String,

        /// ZIP code
        zip: String,

        /// Walmart store to use for this ZIP
        #[arg(long)]
        store: Option<String>,

        /// Label (default: the ZIP code)
        #[arg(long)]
        label: Option<String>,

        /// Make this the primary ZIP
        #[arg(long)]
        primary: bool,
    },

    /// Stop checking from a ZIP code
    Remove {
        /// Discord user ID
        discord_id: String,

        /// ZIP code
        zip: String,
    },

    /// Make a ZIP code the primary one
    Primary {
        /// Discord user ID
        discord_id: String,

        /// ZIP code
        zip: String,
    },

    /// List a user's ZIP codes
    List {
        /// Discord user ID
        discord_id: String,
    },
}

// ============================================================================
// Store Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Watch a Walmart store for pickup availability
    Add {
        /// Discord user ID
        discord_id: String,

        /// Walmart store number
        store_id: String,

        /// ZIP code of the store (default: the user's ZIP)
        #[arg(long)]
        zip: Option<String>,
    },

    /// Stop watching a store
    Remove {
        /// Discord user ID
        discord_id: String,

        /// Walmart store number
        store_id: String,
    },

    /// List a user's pickup stores
    List {
        /// Discord user ID
        discord_id: String,
    },
}
