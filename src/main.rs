use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vexhub_crawler::ErrorKind;
use vexhub_crawler::config::Hub;
use vexhub_crawler::crawler::Crawler;
use vexhub_crawler::fetch::GitFetcher;
use vexhub_crawler::locators::LocatorTable;
use vexhub_crawler::locators::http_client::create_shared_client;

#[derive(Parser)]
#[command(name = "vexhub-crawler")]
#[command(about = "Collects VEX documents from upstream repositories into a VEX Hub", long_about = None)]
#[command(version)]
struct Cli {
    /// Root directory of the VEX Hub
    #[arg(long)]
    vexhub_dir: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Stop at the first package that fails
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every configured package and rebuild the index (default)
    Crawl,
    /// Rebuild index.json from the existing manifests
    Index,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(ErrorKind::Cancelled.into()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let root = cli.vexhub_dir;

    match cli.command.unwrap_or(Commands::Crawl) {
        Commands::Index => {
            let index = tokio::task::spawn_blocking(move || vexhub_crawler::index::generate(&root)).await??;
            println!("Indexed {} packages", index.packages.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Crawl => {
            let hub = Hub::load(&root)?;
            let strict = cli.strict || hub.settings.strict;
            tracing::info!(
                root = %root.display(),
                packages = hub.packages.len(),
                strict,
                "Starting crawl"
            );

            let client = create_shared_client().context("failed to create HTTP client")?;
            let locators = LocatorTable::with_defaults(client, &hub.settings.registries);
            let fetcher = GitFetcher::with_timeout(Duration::from_secs(hub.settings.git_timeout_secs));

            let crawler = Crawler::new(&root, locators, Arc::new(fetcher)).with_strict(strict);
            let summary = crawler.crawl(&hub.packages).await?;

            println!(
                "Harvested {} packages, {} failed",
                summary.harvested.len(),
                summary.failed.len()
            );
            for failure in &summary.failed {
                println!("  {}: {}", failure.id, failure.error);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
