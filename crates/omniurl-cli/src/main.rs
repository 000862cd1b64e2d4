//! omniurl - read anything addressable by URL
//!
//! Usage:
//!   omniurl cat URL              # Print content to stdout
//!   omniurl resolve URL          # Print the canonical key
//!   omniurl fetch URL            # Materialize as a local file
//!   omniurl list ARCHIVE-URL     # List archive entries

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omniurl_core::config::ContextConfig;
use omniurl_core::prelude::*;

#[derive(Parser)]
#[command(name = "omniurl")]
#[command(about = "Read files, archives, repositories and images by URL", long_about = None)]
struct Cli {
    /// Base URL for relative input (repeatable, tried in order)
    #[arg(long = "origin", global = true)]
    origins: Vec<String>,

    /// Rewrite a URL before resolution, as FROM=TO (repeatable)
    #[arg(long = "map", global = true, value_parser = parse_mapping)]
    mappings: Vec<(String, String)>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the content of a URL (`-` reads stdin)
    Cat {
        url: String,
    },

    /// Resolve a URL and print its canonical key
    Resolve {
        url: String,
    },

    /// Make a URL available as a local file
    Fetch {
        url: String,

        /// Copy the content here instead of printing a cache path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the entries of a tar or zip archive
    #[command(alias = "ls")]
    List {
        url: String,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn parse_mapping(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(from, _)| !from.is_empty())
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .ok_or_else(|| format!("expected FROM=TO, got '{raw}'"))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omniurl=info,omniurl_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let context = build_context(&cli)?;
    let cancel = CancellationToken::new();

    let result = run(&cli, &context, &cancel);
    let keep_cache = matches!(cli.command, Commands::Fetch { output: None, .. });
    if !keep_cache && let Err(err) = context.release() {
        tracing::warn!(error = %err, "failed to clean up temporary files");
    }
    result
}

fn build_context(cli: &Cli) -> Result<Arc<Context>> {
    let config = match &cli.config {
        Some(path) => ContextConfig::load(path)?,
        None => ContextConfig::load_default()?,
    };
    let context = Context::from_config(&config)?.into_shared();
    for (from, to) in &cli.mappings {
        context.map(from.as_str(), to.as_str());
    }
    Ok(context)
}

fn run(cli: &Cli, context: &Arc<Context>, cancel: &CancellationToken) -> Result<()> {
    match &cli.command {
        Commands::Cat { url } => {
            let url = resolve(cli, context, url, cancel)?;
            let mut reader = url.open(cancel)?;
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)
                .map_err(Error::from_io)
                .with_context(|| format!("Failed to read {url}"))?;
            stdout.flush()?;
        }
        Commands::Resolve { url } => {
            let url = resolve(cli, context, url, cancel)?;
            print_resolved(&url, cli.format)?;
        }
        Commands::Fetch { url, output } => {
            let url = resolve(cli, context, url, cancel)?;
            match output {
                Some(output) => {
                    let mut reader = url.open(cancel)?;
                    let mut file = std::fs::File::create(output).with_context(|| {
                        format!("Failed to create output file: {}", output.display())
                    })?;
                    io::copy(&mut reader, &mut file)
                        .map_err(Error::from_io)
                        .with_context(|| format!("Failed to write {}", output.display()))?;
                    tracing::info!(url = %url, output = %output.display(), "fetched");
                }
                None => {
                    let path = context.get_local_path(&url, cancel)?;
                    println!("{}", path.display());
                }
            }
        }
        Commands::List { url } => {
            let url = resolve(cli, context, url, cancel)?;
            let entries = list_entries(&url, cancel)?;
            print_entries(&entries, cli.format)?;
        }
    }
    Ok(())
}

/// Resolve `input` against the `--origin` list (defaulting to the working
/// directory). `-` buffers stdin.
fn resolve(cli: &Cli, context: &Arc<Context>, input: &str, cancel: &CancellationToken) -> Result<Url> {
    if input == "-" {
        return Ok(context.read_stdin_to_internal_url(None, cancel)?);
    }

    let origins = if cli.origins.is_empty() {
        vec![context.working_dir_file_url()?]
    } else {
        cli.origins
            .iter()
            .map(|origin| context.new_any_or_file_url(origin))
            .collect()
    };

    match context.new_valid_any_or_file_url(input, &origins, cancel) {
        Ok(url) => Ok(url),
        Err(Error::InvalidUrl { url, reasons }) => {
            for reason in &reasons {
                tracing::info!(%reason, "origin rejected {url}");
            }
            anyhow::bail!("Could not resolve '{}' against {} origin(s)", url, origins.len())
        }
        Err(err) => Err(err).with_context(|| format!("Failed to resolve '{input}'")),
    }
}

fn print_resolved(url: &Url, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", url.key()),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "key": url.key(),
                "display": url.to_string(),
                "format": url.format(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_entries(entries: &[ArchiveEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("Archive is empty");
                return Ok(());
            }
            let width = entries
                .iter()
                .map(|entry| entry.size.to_string().len())
                .max()
                .unwrap_or(1);
            for entry in entries {
                let kind = if entry.is_dir { "d" } else { "-" };
                println!("{kind} {:>width$} {}", entry.size, entry.name);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
    }
    Ok(())
}
