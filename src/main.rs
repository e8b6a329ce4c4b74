use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use prdraft::config::Config;
use prdraft::diff::split_file_diffs;
use prdraft::dispatch::Backend;
use prdraft::dispatch::registry::{ProviderChoice, ProviderChooser, ProviderRegistry};
use prdraft::error::PrDraftError;
use prdraft::response::{AiResponse, parse_ai_response};
use prdraft::retry::{RetryPolicy, is_retryable_error, with_retry};

#[derive(Parser)]
#[command(name = "prdraft", version, about = "Draft pull request text with an AI backend")]
struct Cli {
    /// Config file; overrides $PRDRAFT_CONFIG and ./prdraft.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List backends with a usable credential
    Providers,
    /// Generate title/body/summary from a prompt
    Generate {
        /// Read the prompt from this file instead of stdin
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Backend to use (claude, openai, gemini, copilot)
        #[arg(long)]
        provider: Option<Backend>,
        /// Echo text to stderr as it arrives
        #[arg(long)]
        stream: bool,
    },
    /// Parse a raw model response into title/body/summary
    Parse { file: Option<PathBuf> },
    /// Added/removed line numbers per file of a unified diff
    Lines { file: Option<PathBuf> },
}

/// Asks on stderr, answers from stdin. Accepts a list number or a backend name.
struct StdinChooser;

impl ProviderChooser for StdinChooser {
    fn choose(&self, choices: &[ProviderChoice]) -> Option<Backend> {
        let mut err = io::stderr();
        for (i, c) in choices.iter().enumerate() {
            writeln!(err, "  {}) {} [{}]", i + 1, c.display_name, c.model).ok()?;
        }
        write!(err, "Select a provider: ").ok()?;
        err.flush().ok()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let answer = line.trim();
        match answer.parse::<usize>() {
            Ok(n) => choices.get(n.checked_sub(1)?).map(|c| c.backend),
            Err(_) => answer.parse().ok(),
        }
    }
}

fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("reading stdin")?;
            Ok(text)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn generate(
    config: &Config,
    prompt_file: Option<&Path>,
    provider: Option<Backend>,
    stream: bool,
) -> anyhow::Result<()> {
    let registry = ProviderRegistry::from_config(config)?;
    let prompt = read_input(prompt_file)?;

    let backend = match provider {
        Some(backend) => {
            registry.set_provider(backend)?;
            backend
        }
        // The prompt already consumed stdin when no file was given.
        None if prompt_file.is_none() => registry.select_provider(None)?,
        None => registry.select_provider(Some(&StdinChooser))?,
    };

    let monitor = registry.monitor().clone();
    let operation = format!("generate:{backend}");
    let retry_op = operation.clone();
    let policy = RetryPolicy::<PrDraftError>::from_settings(&config.retry)
        .should_retry(|e, _| is_retryable_error(e))
        .on_retry(move |_, _, _| monitor.record_retry(&retry_op));
    let retrier = with_retry(operation, policy);

    let result = if stream {
        retrier
            .run(|| async {
                let mut echo = |chunk: &str| {
                    let mut err = io::stderr();
                    err.write_all(chunk.as_bytes()).ok();
                    err.flush().ok();
                };
                registry
                    .generate_content_stream(&prompt, Some(backend), Some(&mut echo))
                    .await
            })
            .await?
    } else {
        retrier
            .run(|| registry.generate_content(&prompt, Some(backend)))
            .await?
    };
    if stream {
        eprintln!();
    }

    let parsed = parse_ai_response(&AiResponse::from(result))?;
    print_json(&json!({
        "provider": backend,
        "title": parsed.title,
        "body": parsed.body,
        "summary": parsed.summary,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Providers => {
            let registry = ProviderRegistry::from_config(&config)?;
            print_json(&registry.choices())
        }
        Command::Generate {
            prompt_file,
            provider,
            stream,
        } => generate(&config, prompt_file.as_deref(), provider, stream)
            .await
            .inspect_err(|e| match e.downcast_ref::<PrDraftError>() {
                Some(err) => tracing::error!(provider = ?err.provider(), "{}", err.user_message()),
                None => tracing::error!("generation failed: {e}"),
            }),
        Command::Parse { file } => {
            let content = read_input(file.as_deref())?;
            print_json(&parse_ai_response(&AiResponse::new(content))?)
        }
        Command::Lines { file } => {
            let diff = read_input(file.as_deref())?;
            let files: Vec<_> = split_file_diffs(&diff)
                .into_iter()
                .map(|f| {
                    let anchor = f.anchor();
                    json!({
                        "file": f.file,
                        "added": f.added,
                        "removed": f.removed,
                        "anchor": anchor,
                    })
                })
                .collect();
            print_json(&files)
        }
    }
}
