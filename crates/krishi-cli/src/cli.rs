//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for resolved answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The payload as text, provenance on stderr
    Text,
    /// The full result as JSON
    Json,
}

/// CLI arguments for krishi
#[derive(Parser, Debug)]
#[command(name = "krishi")]
#[command(author, version, about = "Resolve queries through a rate-limited credential pool with cascading fallback")]
#[command(long_about = r#"
krishi resolves a query against the Gemini endpoint through a pool of
rate-limited API keys. When the endpoint or every key is unusable it falls
back to cached answers, a simplified second attempt, and finally a static
payload, so a result is always printed.

Configuration is loaded from (in priority order):
1. --config <path>     Explicit YAML file
2. ./krishi.yaml       Project-level config
3. Built-in defaults

Keys come from provider.api_keys, then GEMINI_API_KEYS (comma-separated),
then GEMINI_API_KEY.

Example:
  krishi resolve "Tomato leaves curling upwards, what is it?"
  krishi resolve --key onion:nashik --param commodity=onion "Onion price in Nashik"
  krishi -vv check
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a YAML configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve one query through the standard cascade (Ctrl-C cancels)
    Resolve(ResolveArgs),

    /// Validate configuration and credential loading without calling the endpoint
    Check,

    /// Print the effective configuration (keys are never printed)
    Config,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Prompt text sent to the generative tiers
    pub prompt: String,

    /// Lookup key for cached answers
    #[arg(short, long)]
    pub key: Option<String>,

    /// Structured lookup parameter (repeatable)
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}
