//! CLI module - Command-line interface for leadharvest
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// leadharvest - Social platform lead harvester
/// Scrapes configured searches on a schedule and stores matching leads
#[derive(Parser)]
#[command(name = "leadharvest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as background daemon with scheduler
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run one scheduler pass over due searches
    #[command(alias = "-c", alias = "--check")]
    Check,

    /// Scrape a search now and wait for the result
    Scrape {
        /// Search ID
        id: String,
    },

    /// Show job and cooldown status of a search
    Status {
        /// Search ID
        id: String,
    },

    /// Manage searches
    #[command(alias = "s")]
    Search {
        #[command(subcommand)]
        command: SearchCommands,
    },

    /// Show leads found by a search
    Leads {
        /// Search ID
        id: String,
        /// Number of leads to show
        #[arg(long, default_value = "20")]
        limit: u64,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

#[derive(Subcommand)]
pub enum SearchCommands {
    /// Add a search
    #[command(alias = "a")]
    Add {
        /// Display name
        name: String,
        /// Subreddit to scan; repeat for several. None scans r/all
        #[arg(long = "target", short = 't')]
        targets: Vec<String>,
        /// Keyword that marks a lead; repeat for several
        #[arg(long = "keyword", short = 'k')]
        keywords: Vec<String>,
        /// Extra intent regex; repeat for several
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Run every 30m, 1h, 6h or 24h. Omit for a one-time search
        #[arg(long)]
        interval: Option<String>,
        /// Posts per target
        #[arg(long, default_value = "100")]
        limit: u32,
        /// Comments per post
        #[arg(long, default_value = "20")]
        comments: u32,
        /// hot, new, top or rising
        #[arg(long, default_value = "new")]
        sort: String,
        /// Time window for top listings
        #[arg(long, default_value = "day")]
        time: String,
        /// Skip comments
        #[arg(long)]
        no_comments: bool,
        /// Ignore items scored below this
        #[arg(long)]
        min_score: Option<i64>,
        /// Ignore items older than this many hours
        #[arg(long)]
        max_age_hours: Option<u32>,
        /// URL notified on new leads and finished jobs
        #[arg(long)]
        webhook: Option<String>,
    },
    /// List searches
    #[command(alias = "ls")]
    List,
    /// Remove a search with its leads
    #[command(alias = "rm")]
    Remove {
        /// Search ID
        id: String,
    },
    /// Enable a search
    Enable {
        /// Search ID
        id: String,
    },
    /// Disable a search
    Disable {
        /// Search ID
        id: String,
    },
}

pub use commands::*;
