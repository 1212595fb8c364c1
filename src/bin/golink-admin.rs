use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

use golink::analytics::{Aggregator, DateRange};
use golink::config::Settings;
use golink::events::SinkRegistry;
use golink::links::{CreateLink, LinkService};
use golink::storage::{SqliteStorage, Storage};

#[derive(Parser)]
#[command(name = "golink-admin")]
#[command(about = "Short link admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a link
    Create {
        /// Destination URL
        url: String,
        /// Vanity code; omit to auto-generate
        #[arg(long)]
        code: Option<String>,
    },
    /// List links
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Delete a link by slug
    Delete { slug: String },
    /// Export click events as CSV to stdout
    Export {
        /// today, yesterday, last7days, last30days, last90days, or all
        #[arg(long, default_value = "all")]
        range: String,
        #[arg(long)]
        link_id: Option<i64>,
    },
    /// Prune click events past the configured retention
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&settings.database.url, settings.database.max_connections).await?,
    );
    storage.init().await?;

    match cli.command {
        Commands::Create { url, code } => {
            let links = LinkService::new(
                Arc::clone(&storage),
                settings.redirect.clone(),
                Arc::new(SinkRegistry::new()),
            );
            let link = links
                .create(CreateLink {
                    code,
                    destination_url: Some(url),
                    ..Default::default()
                })
                .await?;
            println!(
                "Created /{} -> {} (id {})",
                link.slug,
                link.destination_url.as_deref().unwrap_or("-"),
                link.id
            );
        }
        Commands::List { limit, offset } => {
            let links = storage.list_links(limit, offset).await?;
            if links.is_empty() {
                println!("No links found.");
            } else {
                println!("{:<6} {:<24} {:<8} {:<7} {}", "ID", "Slug", "Hits", "Live", "Destination");
                println!("{}", "-".repeat(80));
                for link in links {
                    println!(
                        "{:<6} {:<24} {:<8} {:<7} {}",
                        link.id,
                        link.slug,
                        link.hit_count,
                        link.enabled,
                        link.destination_url.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Delete { slug } => match storage.get_by_slug(&slug).await? {
            Some(link) => {
                let links = LinkService::new(
                    Arc::clone(&storage),
                    settings.redirect.clone(),
                    Arc::new(SinkRegistry::new()),
                );
                links.delete(link.id).await?;
                println!("Deleted '{}'", slug);
            }
            None => println!("No link with slug '{}'", slug),
        },
        Commands::Export { range, link_id } => {
            let range: DateRange = range.parse().map_err(anyhow::Error::msg)?;
            let rows = Aggregator::new(Arc::clone(&storage))
                .export(range, link_id)
                .await?;

            let mut writer = csv::Writer::from_writer(Vec::new());
            for row in &rows {
                writer.serialize(row)?;
            }
            let data = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("csv write failed: {e}"))?;
            std::io::stdout().write_all(&data)?;
        }
        Commands::Cleanup => {
            let deleted = Aggregator::new(Arc::clone(&storage))
                .cleanup(settings.analytics.retention_days)
                .await?;
            println!(
                "Deleted {} click events older than {} days",
                deleted, settings.analytics.retention_days
            );
        }
    }

    Ok(())
}
