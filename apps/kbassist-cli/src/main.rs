//! kbassist CLI
//!
//! Ingest HR documents into the vector index, ask the assistant questions
//! over them, preview chunking offline, and purge indexed vectors.

mod app;
mod commands;
mod output;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use kbassist_core::AppConfig;

use crate::app::Services;
use crate::commands::summarize::SummaryKind;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "kbassist",
    author = "kbassist Team",
    version,
    about = "kbassist - HR policy knowledge assistant",
    long_about = "A command-line interface for the kbassist RAG assistant.\n\n\
                  Ingest policy documents into a vector index, then ask questions\n\
                  that an agent answers by searching those documents."
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); environment overrides still apply
    #[arg(short, long, env = "KBASSIST_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Output format (text, json, yaml)
    #[arg(
        short,
        long,
        default_value = "text",
        value_parser = ["text", "json", "yaml"]
    )]
    format: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, chunk, embed and index every document in a directory
    Ingest {
        /// Directory containing .txt, .md, .pdf or .docx files
        directory: PathBuf,

        /// Target namespace (defaults to vector.namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Only read the top-level directory
        #[arg(long)]
        no_recursive: bool,
    },

    /// Ask the assistant a question
    Ask {
        /// The question to answer
        query: String,

        /// Session ID to continue
        #[arg(short, long)]
        session: Option<String>,

        /// User the session belongs to
        #[arg(short, long, default_value = "default_user")]
        user: String,

        /// Maximum search results per tool call (1-20)
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview cleaning, metadata and chunking for one file without indexing it
    Split {
        /// File to split
        file: PathBuf,

        /// Maximum characters per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters carried over between chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Summarize one document with the chat model
    Summarize {
        /// File to summarize
        file: PathBuf,

        /// Summary style (brief, comprehensive, executive)
        #[arg(long, default_value = "comprehensive", conflicts_with_all = ["audience", "key_points"])]
        style: String,

        /// Tailor the summary for a reader (employee, manager, executive, new_hire)
        #[arg(long, conflicts_with = "key_points")]
        audience: Option<String>,

        /// List key policies, requirements and action items instead
        #[arg(long)]
        key_points: bool,
    },

    /// Delete vectors from the index
    Purge {
        /// Namespace to purge (defaults to vector.namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Delete only these vector IDs instead of the whole namespace
        #[arg(long, num_args = 1..)]
        ids: Vec<String>,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let path_str = path.to_str().context("Config path is not valid UTF-8")?;
            AppConfig::load_from_file(path_str)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => AppConfig::load().context("Failed to load configuration"),
    }
}

fn summary_kind(style: &str, audience: Option<&str>, key_points: bool) -> Result<SummaryKind> {
    if key_points {
        return Ok(SummaryKind::KeyPoints);
    }
    if let Some(audience) = audience {
        return Ok(SummaryKind::Audience(audience.parse()?));
    }
    Ok(SummaryKind::Style(style.parse()?))
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    let level = telemetry::effective_level(cli.log_level.as_deref(), cli.verbose, &config.app.log_level);
    telemetry::init_telemetry(&level, cli.json_logs)?;

    let format: OutputFormat = cli.format.parse().map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Split {
            file,
            chunk_size,
            chunk_overlap,
        } => commands::split::run(&config, &file, chunk_size, chunk_overlap, format).await,
        Commands::Summarize {
            file,
            style,
            audience,
            key_points,
        } => {
            let kind = summary_kind(&style, audience.as_deref(), key_points)?;
            commands::summarize::run(&config, &file, kind, format).await
        }
        command => {
            let services = Services::build(config).await?;

            let result = match command {
                Commands::Ingest {
                    directory,
                    namespace,
                    no_recursive,
                } => {
                    commands::ingest::run(&services, &directory, namespace.as_deref(), !no_recursive, format)
                        .await
                }
                Commands::Ask {
                    query,
                    session,
                    user,
                    top_k,
                    json,
                } => {
                    let format = if json { OutputFormat::Json } else { format };
                    let args = commands::ask::AskArgs {
                        query,
                        session,
                        user,
                        top_k,
                    };
                    commands::ask::run(&services, args, format).await
                }
                Commands::Purge { namespace, ids, yes } => {
                    commands::purge::run(&services, namespace.as_deref(), ids, yes).await
                }
                Commands::Split { .. } | Commands::Summarize { .. } => {
                    unreachable!("split and summarize run without services")
                }
            };

            // Flush even when the command failed so partial work is kept
            let shutdown = services.shutdown().await;
            result.and(shutdown)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    let verbose = cli.verbose;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            if verbose {
                for cause in e.chain().skip(1) {
                    eprintln!("{}: {}", "Caused by".yellow(), cause);
                }
            }
            ExitCode::FAILURE
        }
    }
}
