//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use contracts::AppConfig;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(&args.config).into());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(size) = args.max_batch_size {
        info!(max_batch_size = size, "Overriding max_batch_size from CLI");
        config.batcher.max_batch_size = size;
    }
    if let Some(wait) = args.max_wait_ms {
        info!(max_wait_ms = wait, "Overriding max_wait_ms from CLI");
        config.batcher.max_wait_ms = wait;
    }
    config_loader::ConfigLoader::validate(&config).context("Invalid CLI override")?;

    info!(
        max_batch_size = config.batcher.max_batch_size,
        max_wait_ms = config.batcher.max_wait_ms,
        store = ?config.store.kind,
        sink = %config.sink.name,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        app: config,
        input: args
            .input
            .clone()
            .filter(|path| path.as_os_str() != "-"),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size.max(1),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        lines = stats.lines_read,
        keys = stats.keys,
        duration_secs = stats.duration.as_secs_f64(),
        items_per_sec = format!("{:.2}", stats.throughput()),
        "Pipeline completed"
    );
    stats.print_summary();

    if stats.interrupted {
        warn!("Input was not read to the end");
    }
    info!("keybatch finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &AppConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Batcher:");
    println!("  Max batch size: {}", config.batcher.max_batch_size);
    println!("  Max wait: {} ms", config.batcher.max_wait_ms);
    println!("  Timer schedule attempts: {}", config.batcher.schedule_attempts);
    println!("\nDispatch:");
    println!("  Max attempts: {}", config.dispatch.max_attempts);
    println!(
        "  Backoff: {}..{} ms",
        config.dispatch.initial_backoff_ms, config.dispatch.max_backoff_ms
    );
    println!("\nStore: {:?}", config.store.kind);
    if let Some(ref path) = config.store.path {
        println!("  Path: {}", path.display());
    }
    println!("\nSink: {} ({:?})", config.sink.name, config.sink.sink_type);
    println!();
}
