mod cli;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use pagefeed::config::FeedConfig;
use pagefeed::db::Database;
use pagefeed::fetcher::HttpFetcher;
use pagefeed::types::Item;
use pagefeed::{Aggregator, Feed, FetchOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagefeed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = FeedConfig::load(cli.config.as_deref())?;

    let db = Database::connect(cli.database_url.as_deref()).await?;
    db.run_migrations().await?;
    let fetcher = HttpFetcher::new(&config)?;
    let agg = Aggregator::new(config, Arc::new(db.clone()), Arc::new(fetcher))?;

    match cli.command {
        Commands::Refresh => {
            let feed = agg.feed(&cli.category)?;
            report(&feed, feed.refresh().await)?;
        }
        Commands::More { pages } => {
            let feed = agg.feed(&cli.category)?;
            report(&feed, feed.refresh().await)?;
            for _ in 0..pages {
                if feed.cursor().is_last_page {
                    println!("No more pages");
                    break;
                }
                report(&feed, feed.load_more().await)?;
            }
        }
        Commands::List { json } => {
            let items = agg.feed(&cli.category)?.snapshot().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No cached items in '{}'", cli.category);
            } else {
                for item in &items {
                    let stream = item.resolved_stream_url.as_deref().unwrap_or("-");
                    println!("{} [{}] {}\n    stream: {}", item.title, item.duration_label, item.detail_url, stream);
                }
            }
        }
        Commands::Resolve { detail_url } => {
            let item = match agg.cached_item(&detail_url).await? {
                Some(item) => item,
                None => Item {
                    detail_url: detail_url.clone(),
                    title: detail_url.clone(),
                    thumbnail_url: String::new(),
                    duration_label: String::new(),
                    category: cli.category.clone(),
                    resolved_stream_url: None,
                    inserted_at: 0,
                },
            };
            match agg.resolve_stream(&item).await? {
                Some(url) => println!("{url}"),
                None => bail!("no stream address found on {detail_url}"),
            }
        }
        Commands::Invalidate { detail_url } => {
            if agg.invalidate_stream(&detail_url).await? {
                println!("Cleared cached stream for {detail_url}");
            } else {
                println!("No cached item for {detail_url}");
            }
        }
        Commands::Clear { all } => {
            let removed = if all {
                let removed = agg.clear_all().await?;
                db.vacuum().await?;
                removed
            } else {
                agg.feed(&cli.category)?.clear().await?
            };
            println!("Removed {removed} cached items");
        }
        Commands::Categories => {
            for name in agg.categories() {
                let count = db.count_by_category(&name).await?;
                let path = agg.config().category(&name).map(|c| c.listing_path.clone()).unwrap_or_default();
                println!("{name}\t{count} cached\t{path}");
            }
        }
    }

    Ok(())
}

fn report(feed: &Feed, outcome: FetchOutcome) -> Result<()> {
    let status = feed.status().borrow().clone();
    match outcome {
        FetchOutcome::Stored(n) => {
            info!("stored {} items for {}", n, feed.category());
            println!("Stored {n} items (next page {})", status.current_page);
        }
        FetchOutcome::Empty => match status.last_error {
            Some(e) => println!("Nothing stored: {e}"),
            None => println!("Nothing stored; reached the last page"),
        },
        FetchOutcome::Skipped => println!("Skipped: a fetch is already running or the feed is exhausted"),
        FetchOutcome::Failed => {
            bail!("{}", status.last_error.unwrap_or_else(|| "fetch failed".to_string()))
        }
    }
    Ok(())
}
