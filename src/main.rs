use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::runtime::Builder;
use tracing::{debug, info};

use domintel::cli::{Cli, Commands};
use domintel::config::Settings;
use domintel::core::DomainAnalyzer;
use domintel::sanitize::sanitize_record;
use domintel::store::JsonFileStore;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    // lookups are I/O bound; a few threads over the core count, capped at 16
    let worker_threads = std::cmp::min(num_cpus + 2, 16);
    debug!("Configuring Tokio runtime with {} worker threads", worker_threads);

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    let found = runtime.block_on(async_main())?;
    if !found {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns false when a requested cached record does not exist
async fn async_main() -> Result<bool> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    settings.validate()?;

    let store = Arc::new(JsonFileStore::new(settings.store_dir.clone()));
    let analyzer = DomainAnalyzer::new(&settings, store)?;

    match &cli.command {
        Commands::Analyze { domain } => {
            info!("Analysing {}", domain);
            let record = analyzer.analyze(domain).await;
            println!("{}", serde_json::to_string_pretty(&sanitize_record(&record))?);
            analyzer.flush().await;
        }
        Commands::Cached { domain } => match analyzer.load_cached(domain).await {
            Some(record) => println!("{}", serde_json::to_string_pretty(&sanitize_record(&record))?),
            None => {
                eprintln!("No reusable cached record for {}", domain);
                return Ok(false);
            }
        },
        Commands::Batch {
            input_file,
            output_file,
            chunk_size,
            rate_limit,
        } => {
            info!("Processing batch from {}", input_file.display());
            analyzer
                .process_batch(input_file, output_file.as_ref(), *chunk_size, *rate_limit)
                .await?;
        }
    }

    Ok(true)
}
