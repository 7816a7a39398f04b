//! Model Zoo - command line entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_zoo::models::{ParamValue, Params, list_cached_artifacts};
use model_zoo::{ModelCache, ModelError, ModelFamily, ZooConfig, metrics};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "model-zoo")]
#[command(about = "Download, cache and load model artifacts", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override artifact cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    /// Print a Prometheus metrics snapshot after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a model name to a local path, downloading it if missing
    Resolve {
        model_name: String,
        /// Delete any cached copy and download again
        #[arg(long)]
        force: bool,
    },
    /// Show the backup mirror URL for a model name
    BackupUrl { model_name: String },
    /// Build a model through the cache and describe it
    Load {
        family: ModelFamily,
        /// Model parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
        /// Accelerator rank to place the model on
        #[arg(long)]
        rank: Option<u32>,
    },
    /// List artifacts in the cache directory
    List,
}

fn parse_param(raw: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    Ok((key.to_string(), ParamValue::parse(value)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let mut config = ZooConfig::load(cli.config)?;

    // CLI overrides
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }

    config.validate()?;

    tracing::debug!(
        cache_dir = ?config.cache_dir,
        primary_base_url = %config.primary_base_url,
        backup_links = config.backup_links.len(),
        "Configuration loaded"
    );

    let prometheus_handle = if cli.metrics {
        Some(metrics::setup_metrics()?)
    } else {
        None
    };

    let result = run(cli.command, &config).await;

    if let Some(handle) = prometheus_handle {
        print!("{}", handle.render());
    }

    if let Err(e) = &result
        && let Some(ModelError::DownloadFailed { model_name, .. }) = e.downcast_ref::<ModelError>()
    {
        tracing::error!(model_name = %model_name, "Artifact unavailable from every mirror");
    }

    result
}

async fn run(command: Command, config: &ZooConfig) -> Result<()> {
    match command {
        Command::Resolve { model_name, force } => {
            let cache = ModelCache::from_config(config).await?;
            let path = cache.resolver().resolve(&model_name, force).await?;
            println!("{}", path.display());
        }
        Command::BackupUrl { model_name } => {
            let cache = ModelCache::from_config(config).await?;
            match cache.resolver().policy().backup_download_url(&model_name) {
                Some(url) => println!("{}", url),
                None => anyhow::bail!("No backup mirror matches '{}'", model_name),
            }
        }
        Command::Load {
            family,
            params,
            rank,
        } => {
            let cache = ModelCache::from_config(config).await?;
            let params: Params = params.into_iter().collect();
            let key = cache.register(family, params).await?;
            let model = cache
                .get(Some(&key), rank)
                .await?
                .context("Model cache returned no model for a registered key")?;

            let components: Vec<_> = model
                .components()
                .map(|c| {
                    json!({
                        "kind": c.kind(),
                        "device": c.as_placeable().map(|p| p.device().to_string()),
                    })
                })
                .collect();
            let summary = json!({
                "key": key.to_string(),
                "accelerator": cache.accelerator_enabled(),
                "components": components,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::List => {
            let artifacts = list_cached_artifacts(&config.cache_dir);
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
        }
    }

    Ok(())
}
