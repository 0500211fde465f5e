mod cli;

use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use mediabox::backend::Backend;
use mediabox::config::Config;
use mediabox::ledger::prune_expired;
use mediabox::observability::init_tracing;
use mediabox::storage::DownloadRoot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_file(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.app.log_level);

    match cli.command {
        Commands::Server(args) => mediabox::api::run(config, args.address).await?,
        Commands::Prune => prune(&config).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

async fn prune(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let backend = if config.redis.enabled {
        Backend::from_config(&config.redis).await?
    } else {
        // Nothing outlives the process without Redis
        info!("Redis disabled, nothing to prune");
        return Ok(());
    };

    let storage = DownloadRoot::new(config.storage.root.clone());
    let stats = prune_expired(
        backend.store.as_ref(),
        backend.dedup.as_ref(),
        config.retention.delete_files.then_some(&storage),
        config.retention.job_ttl.as_duration(),
        chrono::Utc::now(),
    )
    .await;
    // Never pops anything, so its consumer entry can go right away
    backend.queue.retire().await;
    let stats = stats?;

    info!(
        jobs = stats.jobs_pruned,
        fingerprints = stats.fingerprints_released,
        directories = stats.directories_removed,
        "Retention pass finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
