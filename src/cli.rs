use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fetch paginated listings into a local cache and resolve stream addresses
#[derive(Parser)]
#[command(name = "pagefeed")]
#[command(about = "Paginated listing cache with stream resolution", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL; defaults to a SQLite file in the user data directory
    #[arg(long, global = true, env = "PAGEFEED_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Category to operate on
    #[arg(short = 'C', long, global = true, default_value = "new")]
    pub category: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch page 1 and replace the cached category
    Refresh,
    /// Refresh, then append the following pages
    More {
        /// Number of pages to append after the refresh
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },
    /// Print cached items, newest first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the stream address of one detail page
    Resolve {
        /// Absolute detail page URL
        detail_url: String,
    },
    /// Forget the cached stream address of one detail page
    Invalidate {
        detail_url: String,
    },
    /// Drop cached items of the category
    Clear {
        /// Drop every category
        #[arg(long)]
        all: bool,
    },
    /// List configured categories with cached item counts
    Categories,
}
