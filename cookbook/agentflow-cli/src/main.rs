//! agentflow CLI: send one message through a multi-agent workflow.

mod presets;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use agentflow::tools::{fetch_image, full_toolkit};
use agentflow::{
    FlowConfig, LanguageModel, Message, OpenAiCompatibleClient, Result as FlowResult,
    SessionContext, SessionSnapshot, ToolCall, WorkflowHook,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use crate::presets::Preset;

/// Run a multi-agent workflow on a single message and print the answer.
#[derive(Parser, Debug)]
#[command(name = "agentflow", version)]
struct Cli {
    /// Message for the root agent.
    message: String,

    /// TOML file describing the model, run limits and agents.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Built-in agent set, used when no config file is given.
    #[arg(long, value_enum, default_value_t = Preset::Calculator)]
    preset: Preset,

    /// Image URL to attach to the message. Repeatable.
    #[arg(long = "image", value_name = "URL")]
    images: Vec<String>,

    /// JSON file holding the conversation across invocations; created if missing.
    #[arg(long, value_name = "FILE")]
    session: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Narrates handoffs and tool calls on stderr.
struct ProgressHook;

#[async_trait]
impl WorkflowHook for ProgressHook {
    async fn before_tool_call(&self, agent: &str, call: &ToolCall) -> FlowResult<()> {
        eprintln!("[{agent}] {}({})", call.name, call.arguments);
        Ok(())
    }

    async fn on_handoff(&self, from: &str, to: &str, reason: &str) -> FlowResult<()> {
        eprintln!("[{from}] -> {to}: {reason}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(answer) => {
            println!("{answer}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info,agentflow=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<String> {
    let config = match &cli.config {
        Some(path) => FlowConfig::from_env_or_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let mut cfg = presets::config(cli.preset);
            cfg.apply_env();
            cfg
        }
    };

    let model: Arc<dyn LanguageModel> = Arc::new(
        OpenAiCompatibleClient::from_config(&config.model)
            .context("failed to set up the model client")?,
    );
    let tools = full_toolkit(&config.tools, Arc::clone(&model))?;
    let workflow = config
        .build_workflow(tools, model)?
        .with_hook(Arc::new(ProgressHook));

    let mut message = Message::user(cli.message.as_str());
    if !cli.images.is_empty() {
        let timeout = Duration::from_secs(config.tools.http_timeout_secs);
        let mut attachments = Vec::with_capacity(cli.images.len());
        for url in &cli.images {
            attachments.push(
                fetch_image(url, timeout)
                    .await
                    .with_context(|| format!("failed to fetch image {url}"))?,
            );
        }
        message = message.with_attachments(attachments);
    }

    let context = match &cli.session {
        Some(path) => load_session(path).await?,
        None => SessionContext::new(),
    };
    let outcome = workflow.run(&context, message).await;
    if let Some(path) = &cli.session {
        save_session(path, &context).await?;
    }

    let output = outcome?;
    tracing::info!(
        agent = %output.agent,
        path = ?output.path,
        tool_calls = output.tool_calls,
        "answered"
    );
    Ok(output.answer)
}

async fn load_session(path: &Path) -> Result<SessionContext> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(SessionContext::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read session {}", path.display()))?;
    let snapshot: SessionSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a session file", path.display()))?;
    Ok(SessionContext::restore(snapshot))
}

async fn save_session(path: &Path, context: &SessionContext) -> Result<()> {
    let raw = serde_json::to_string_pretty(&context.snapshot())?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write session {}", path.display()))
}
