//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use contracts::AppConfig;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    batcher: BatcherInfo,
    dispatch: DispatchInfo,
    store: StoreInfo,
    sink: SinkInfo,
}

#[derive(Serialize)]
struct BatcherInfo {
    max_batch_size: usize,
    max_wait_ms: u64,
    schedule_attempts: u32,
}

#[derive(Serialize)]
struct DispatchInfo {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

#[derive(Serialize)]
struct StoreInfo {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(&args.config).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config);
    }

    Ok(())
}

fn build_config_info(config: &AppConfig) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", config.version),
        batcher: BatcherInfo {
            max_batch_size: config.batcher.max_batch_size,
            max_wait_ms: config.batcher.max_wait_ms,
            schedule_attempts: config.batcher.schedule_attempts,
        },
        dispatch: DispatchInfo {
            max_attempts: config.dispatch.max_attempts,
            initial_backoff_ms: config.dispatch.initial_backoff_ms,
            max_backoff_ms: config.dispatch.max_backoff_ms,
        },
        store: StoreInfo {
            kind: format!("{:?}", config.store.kind),
            path: config.store.path.as_ref().map(|p| p.display().to_string()),
        },
        sink: SinkInfo {
            name: config.sink.name.clone(),
            sink_type: format!("{:?}", config.sink.sink_type),
            params: config.sink.params.clone(),
        },
    }
}

fn print_config_info(config: &AppConfig) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  keybatch Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📦 Batcher");
    println!("   ├─ Version: {:?}", config.version);
    println!("   ├─ Max batch size: {}", config.batcher.max_batch_size);
    println!("   ├─ Max wait: {} ms", config.batcher.max_wait_ms);
    println!(
        "   └─ Timer schedule attempts: {}",
        config.batcher.schedule_attempts
    );

    println!("\n🔁 Dispatch");
    println!("   ├─ Max attempts: {}", config.dispatch.max_attempts);
    println!(
        "   └─ Backoff: {} ms → {} ms",
        config.dispatch.initial_backoff_ms, config.dispatch.max_backoff_ms
    );

    println!("\n💾 Store");
    match &config.store.path {
        Some(path) => {
            println!("   ├─ Kind: {:?}", config.store.kind);
            println!("   └─ Path: {}", path.display());
        }
        None => {
            println!("   └─ Kind: {:?}", config.store.kind);
        }
    }

    println!("\n📤 Sink");
    println!("   ├─ Name: {}", config.sink.name);
    let mut params: Vec<_> = config.sink.params.iter().collect();
    params.sort();
    if params.is_empty() {
        println!("   └─ Type: {:?}", config.sink.sink_type);
    } else {
        println!("   ├─ Type: {:?}", config.sink.sink_type);
        for (i, (name, value)) in params.iter().enumerate() {
            let prefix = if i == params.len() - 1 { "└─" } else { "├─" };
            println!("   {} {} = {}", prefix, name, value);
        }
    }

    println!();
}
