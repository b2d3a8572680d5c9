//! Process Enricher - NDJSON event enrichment
//!
//! Reads newline-delimited JSON events from stdin, adds process and container
//! metadata and writes them to stdout. Logs go to stderr.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use proc_enricher::{
    CacheSettings, JsonEvent, Processor, ProcessorConfig, ProcessMetadataCache, SysinfoProvider,
};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber writing to stderr
/// 2. Load processor and cache configuration from environment variables
/// 3. Create the shared process metadata cache
/// 4. Build the processor
/// 5. Enrich stdin until EOF, Ctrl+C or SIGTERM
/// 6. Close the processor and report cache statistics
#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proc_enricher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ProcessorConfig::from_env();
    let cache_settings = CacheSettings::from_env("PROCESS_");
    info!(
        "Configuration loaded: match_pids={:?}, host_path={}, process_cache_ttl={}s, process_cache_capacity={}",
        config.match_pids, config.host_path, cache_settings.ttl, cache_settings.capacity
    );

    let provider = Arc::new(SysinfoProvider::new(config.host_path.as_str()));
    let processes = Arc::new(
        ProcessMetadataCache::new(provider, &cache_settings)
            .with_lookup_timeout(config.lookup_timeout()),
    );

    let processor = Arc::new(
        Processor::builder(config, Arc::clone(&processes))
            .build()
            .context("invalid processor configuration")?,
    );

    let workers = thread::available_parallelism().map_or(4, |n| n.get() * 4);
    let outcome = tokio::select! {
        res = run(Arc::clone(&processor), workers) => res,
        _ = shutdown_signal() => Ok(()),
    };

    processor.close();
    processes.stop_janitor();
    let stats = processes.stats();
    info!(hit_rate = stats.hit_rate(), ?stats, "process metadata cache");
    if let Some(stats) = processor.container_cache_stats() {
        info!(hit_rate = stats.hit_rate(), ?stats, "container id cache");
    }
    info!("Shutdown complete");
    outcome
}

/// Enriches stdin lines with at most `workers` events in flight.
///
/// Output order follows completion order, not input order.
async fn run(processor: Arc<Processor>, workers: usize) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut out = BufWriter::new(io::stdout());
    let mut in_flight: JoinSet<Option<String>> = JoinSet::new();
    let mut eof = false;

    loop {
        tokio::select! {
            line = lines.next_line(), if !eof && in_flight.len() < workers => {
                match line.context("failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let processor = Arc::clone(&processor);
                        in_flight.spawn(async move { enrich_line(&processor, line).await });
                    }
                    None => eof = true,
                }
            }
            Some(joined) = in_flight.join_next() => {
                match joined {
                    Ok(Some(line)) => {
                        out.write_all(line.as_bytes()).await?;
                        out.write_all(b"\n").await?;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "enrichment task failed"),
                }
                if in_flight.is_empty() {
                    out.flush().await?;
                }
            }
            else => break,
        }
    }

    out.flush().await.context("failed to flush stdout")?;
    Ok(())
}

/// Enriches one line; on failure the original line is forwarded unchanged.
async fn enrich_line(processor: &Processor, line: String) -> Option<String> {
    let event: JsonEvent = match serde_json::from_str(&line) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "dropping line that is not a JSON object");
            return None;
        }
    };

    match processor.enrich(&event).await {
        Ok(enriched) => serde_json::to_string(enriched.as_ref()).ok(),
        Err(err) => {
            warn!(error = %err, "forwarding event without enrichment");
            Some(line)
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
