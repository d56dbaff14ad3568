//! Subcommand implementations

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use krishi_core::{Cancelled, CascadeResult, Query};
use krishi_runtime::providers::load_api_keys;
use krishi_runtime::{gemini_cascade, GeminiTransport, RuntimeConfig};

use crate::cli::{OutputFormat, ResolveArgs};

/// Project-level config picked up when no `--config` is given.
const DEFAULT_CONFIG_FILE: &str = "krishi.yaml";

/// Exit code for a caller-cancelled resolution (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

/// Load configuration from `--config`, `./krishi.yaml`, or defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            RuntimeConfig::from_yaml_file(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            debug!("No config file, using defaults");
            let config = RuntimeConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub async fn resolve(config: &RuntimeConfig, args: ResolveArgs) -> Result<ExitCode> {
    let cascade =
        gemini_cascade(config, Vec::new()).context("failed to assemble the fallback cascade")?;

    let mut query = Query::text(args.prompt);
    if let Some(key) = args.key {
        query = query.with_key(key);
    }
    for (name, value) in args.params {
        query = query.with_param(name, value);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match cascade.resolve_cancellable(&query, &cancel).await {
        Ok(result) => {
            render(&result, args.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(Cancelled) => {
            eprintln!("cancelled");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
    }
}

fn render(result: &CascadeResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            println!("{}", result.payload().as_text());
            if result.degraded() {
                eprintln!("[best effort: answered by {}]", result.source());
            }
        }
    }
    Ok(())
}

pub fn check(config: &RuntimeConfig) -> Result<ExitCode> {
    let keys = load_api_keys(&config.provider).context("no usable API keys")?;
    let transport = GeminiTransport::from_config(&config.provider)?;

    println!("config:      ok");
    println!("endpoint:    {}", transport.base_url());
    println!("model:       {}", config.provider.model);
    println!("fallback:    {}", config.provider.secondary_model());
    println!(
        "credentials: {} (from {})",
        keys.len(),
        keys.first().map(|k| k.source().to_string()).unwrap_or_default()
    );
    println!(
        "quota:       {} requests / {:?} per credential",
        config.pool.max_requests_per_window, config.pool.window
    );
    Ok(ExitCode::SUCCESS)
}

pub fn show_config(config: &RuntimeConfig) -> Result<ExitCode> {
    print!("{}", config.to_yaml()?);
    Ok(ExitCode::SUCCESS)
}
