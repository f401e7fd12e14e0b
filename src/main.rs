mod config;
mod conversation;
mod llm;
mod streaming;
mod surface;
mod ui;

use anyhow::{Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Instrument, info, info_span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::Config;
use crate::conversation::ConversationState;
use crate::llm::ChatClient;
use crate::surface::TerminalSurface;

const LOG_ENV: &str = "VITALCHAT_LOG";

#[derive(Parser)]
#[command(name = "vitalchat")]
#[command(version)]
#[command(about = "Chat with a hosted health assistant from the terminal", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat screen (default)
    Chat,
    /// Ask a single question and stream the answer to stdout
    Ask {
        #[arg(value_parser = NonEmptyStringValueParser::new())]
        query: String,
        /// Continue a conversation id printed by an earlier answer
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(config: &Config) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("vitalchat=info"));

    std::fs::create_dir_all(config.logs_dir()).context("Failed to create log directory")?;
    let appender = tracing_appender::rolling::daily(config.logs_dir(), "vitalchat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    Registry::default().with(env_filter).with(file_layer).try_init()?;

    Ok(guard)
}

async fn ask(config: &Config, query: &str, conversation_id: Option<String>) -> Result<ExitCode> {
    let api_key = config.api_key()?;
    let client = ChatClient::new(config, api_key)?;

    let mut state = match conversation_id {
        Some(id) => ConversationState::resume(id),
        None => ConversationState::new(),
    };
    let mut surface = TerminalSurface::stdio();

    let span = info_span!("turn", mode = "ask");
    let outcome = client
        .run_turn(&mut state, query, &mut surface)
        .instrument(span)
        .await;

    if !state.conversation_id().is_empty() {
        eprintln!("conversation id: {}", state.conversation_id());
    }

    Ok(if outcome.is_answered() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn chat(config: &Config) -> Result<ExitCode> {
    let api_key = config.api_key()?;
    let client = ChatClient::new(config, api_key)?;
    let state = ConversationState::with_greeting(config.greeting.as_deref());

    ui::run(client, state).await?;
    Ok(ExitCode::SUCCESS)
}

fn show_config(config: &Config, path: &std::path::Path, init: bool) -> Result<ExitCode> {
    if init {
        if config.init_file(path)? {
            println!("📝 Wrote default config to {}", path.display());
        } else {
            println!("Config already exists at {}", path.display());
        }
    }
    println!("{}", config.describe());
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let _guard = setup_logging(&config)?;
    info!(base_url = %config.base_url, "Starting vitalchat");

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat(&config).await,
        Commands::Ask {
            query,
            conversation_id,
        } => ask(&config, &query, conversation_id).await,
        Commands::Config { init } => show_config(&config, &config_path, init),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
