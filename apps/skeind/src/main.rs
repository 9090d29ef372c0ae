use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use serde_json::json;
use skein_kernel::SkeinBuilder;
use skein_memory::InMemoryMemoryService;
use skein_protocol::tool::empty_object_schema;
use skein_protocol::{
    CheckpointId, EventKind, MemoryUpdatePolicy, Message, State, ToolCall, ToolDescriptor,
    event_to_chunk,
};
use skein_provider::{OpenAiCompatibleProvider, ProviderConfig};
use skein_runtime::{ApprovalHook, Approver, RunRequest};
use skein_tools::FnTool;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Assistant text only.
    Text,
    /// One client chunk per line.
    Wire,
    /// Every event as JSON.
    Events,
}

#[derive(Debug, Parser)]
#[command(name = "skeind")]
#[command(about = "Run one skein agent turn against an OpenAI-compatible endpoint")]
struct Cli {
    /// Message sent as the user turn.
    message: String,
    #[arg(long, env = "SKEIN_APP", default_value = "skein")]
    app: String,
    #[arg(long, env = "SKEIN_MODEL", default_value = "gpt-4o-mini")]
    model: String,
    #[arg(long, default_value = "developer")]
    user: String,
    /// Continue an existing conversation.
    #[arg(long)]
    checkpoint: Option<String>,
    #[arg(long, default_value = ".skein")]
    root: PathBuf,
    #[arg(long)]
    instruction: Option<String>,
    /// Ask on stdin before running any tool.
    #[arg(long)]
    confirm_tools: bool,
    /// Record the turn in process memory and print what it retained.
    #[arg(long)]
    memory: bool,
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn approve(&self, call: &ToolCall, _state: &State) -> bool {
        let prompt = format!(
            "run tool {} with {}? [y/N] ",
            call.name(),
            call.function.arguments
        );
        let mut stderr = tokio::io::stderr();
        if stderr.write_all(prompt.as_bytes()).await.is_err() {
            return false;
        }
        let _ = stderr.flush().await;

        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
            Err(error) => {
                warn!(%error, "failed reading approval answer");
                false
            }
        }
    }
}

fn clock_tool() -> FnTool {
    FnTool::new(
        ToolDescriptor::new(
            "current_time",
            "Current UTC date and time in RFC 3339 format",
            empty_object_schema(),
        ),
        |_arguments| async move { Ok(json!(chrono::Utc::now().to_rfc3339())) },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let provider = Arc::new(OpenAiCompatibleProvider::new(ProviderConfig::from_env())?);
    let mut builder = SkeinBuilder::new(&cli.app)
        .file_checkpoints(cli.root.join("checkpoints"))
        .provider(provider);
    if cli.memory {
        builder = builder
            .memory_service(Arc::new(InMemoryMemoryService::default()))
            .memory_policy(MemoryUpdatePolicy::NonBlocking);
    }
    let skein = builder.build();

    let mut agent = skein.agent("assistant", &cli.model)?.tool(clock_tool());
    if let Some(instruction) = &cli.instruction {
        agent = agent.instruction(instruction.clone());
    }
    if cli.confirm_tools {
        agent = agent.pre_tool_call_hook(Arc::new(ApprovalHook::new(Arc::new(StdinApprover))));
    }
    let agent = Arc::new(agent.build());

    let checkpoint_id = cli
        .checkpoint
        .as_deref()
        .map(CheckpointId::from)
        .unwrap_or_default();
    let request = RunRequest::new(cli.user.as_str())
        .with_checkpoint_id(checkpoint_id.clone())
        .with_messages(vec![Message::user(cli.message)]);

    let mut stdout = tokio::io::stdout();
    let mut events = skein.runner(agent).run(request);
    while let Some(event) = events.next().await {
        match cli.format {
            OutputFormat::Events => {
                let line = serde_json::to_string(&event)?;
                stdout.write_all(format!("{line}\n").as_bytes()).await?;
            }
            OutputFormat::Wire => match event_to_chunk(&event) {
                Ok(Some(chunk)) => {
                    let line = serde_json::to_string(&chunk)?;
                    stdout.write_all(format!("data: {line}\n\n").as_bytes()).await?;
                }
                Ok(None) => {}
                Err(error) => warn!(code = error.code(), %error, "turn ended with an error"),
            },
            OutputFormat::Text => match &event.kind {
                EventKind::OutputText { delta } => stdout.write_all(delta.as_bytes()).await?,
                EventKind::ToolCall {
                    tool_name,
                    tool_arguments,
                    ..
                } => info!(tool = %tool_name, arguments = %tool_arguments, "tool call"),
                EventKind::Interruption(interruption) => {
                    warn!(
                        life_cycle = interruption.life_cycle.as_str(),
                        reason = %interruption.reason,
                        "turn interrupted"
                    )
                }
                EventKind::Error {
                    error_code,
                    error_msg,
                    ..
                } => warn!(code = %error_code, message = %error_msg, "turn failed"),
                _ => {}
            },
        }
        stdout.flush().await?;
    }
    if matches!(cli.format, OutputFormat::Text) {
        stdout.write_all(b"\n").await?;
    }

    skein.shutdown().await;
    if cli.memory {
        let remembered = skein.search_memory(&cli.user.as_str().into(), "").await?;
        info!(memory = %remembered.content(), "memory after turn");
    }
    let stored = skein.list_checkpoints().await?.len();
    info!(
        checkpoint_id = %checkpoint_id,
        stored_checkpoints = stored,
        "turn complete"
    );
    Ok(())
}
