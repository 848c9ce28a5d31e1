use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use contentforge::agent_core::{Message, RunEvent, RunOptions, RunOutcome};
use contentforge::config;
use contentforge::inference::GatewayClient;
use contentforge::models::{detect_task_type, Priority, TaskType};
use contentforge::store::{RecordStore, SqliteRecordStore, CLIENTS};

/// Content assistant: routes a prompt to a model and lets it use the
/// client/content tools until it has an answer.
#[derive(Debug, Parser)]
#[command(name = "contentforge", version, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Config file (default: $CONTENTFORGE_CONFIG or config/contentforge.yaml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record store database (overrides store.path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Task type for model routing, or "auto" to detect it from the prompt
    #[arg(long, default_value = "chat")]
    task: String,

    /// quality, speed or cost
    #[arg(long, default_value = "quality")]
    priority: String,

    /// Stream text and tool activity as it happens
    #[arg(long)]
    stream: bool,

    /// Override the configured turn budget
    #[arg(long)]
    max_turns: Option<u32>,

    /// Print the whole run outcome as JSON instead of the final answer
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,

    prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a client record to the store
    SeedClient {
        #[arg(long)]
        name: String,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    contentforge::init_tracing(None).context("failed to initialize logging")?;

    let app_config = match &cli.config {
        Some(path) => config::load_config(path),
        None => config::load_or_default(&std::env::current_dir()?),
    }
    .context("failed to load configuration")?;

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| app_config.store.resolved_path());
    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::open(&db_path.to_string_lossy())
            .with_context(|| format!("failed to open record store at {}", db_path.display()))?,
    );

    if let Some(Command::SeedClient {
        name,
        company,
        email,
    }) = cli.command
    {
        let id = format!("client-{}", uuid::Uuid::new_v4().simple());
        store.insert(
            CLIENTS,
            &id,
            &json!({ "name": name, "company": company, "email": email }),
        )?;
        println!("{id}");
        return Ok(());
    }

    let prompt = cli.prompt.join(" ");
    if prompt.trim().is_empty() {
        bail!("no prompt given (try `contentforge --help`)");
    }

    let task = match cli.task.as_str() {
        "auto" => detect_task_type(&prompt),
        other => other
            .parse::<TaskType>()
            .map_err(anyhow::Error::msg)?,
    };
    let priority: Priority = cli.priority.parse().map_err(anyhow::Error::msg)?;

    let endpoint = Arc::new(GatewayClient::from_config(&app_config.gateway)?);
    let orchestrator = contentforge::build_orchestrator(&app_config, endpoint, store)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut options = RunOptions::for_task(task)
        .with_priority(priority)
        .with_cancel(cancel);
    if let Some(max_turns) = cli.max_turns {
        options = options.with_max_turns(max_turns);
    }

    let history = vec![Message::user(prompt)];
    let outcome = if cli.stream {
        stream_run(orchestrator.run_streaming(history, options), cli.json).await?
    } else {
        let outcome = orchestrator.run(history, options).await;
        if !cli.json {
            if let Some(text) = outcome.final_text() {
                println!("{text}");
            }
        }
        outcome
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    if !outcome.is_terminal() {
        let kind = outcome
            .error_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".into());
        bail!(
            "run failed ({kind}): {}",
            outcome.error.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}

async fn stream_run(
    mut events: contentforge::agent_core::RunEventStream,
    quiet: bool,
) -> anyhow::Result<RunOutcome> {
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            RunEvent::TextDelta(text) if !quiet => {
                print!("{text}");
                stdout.flush()?;
            }
            RunEvent::TextDelta(_) => {}
            RunEvent::ToolCallsFinalized(calls) => {
                let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                eprintln!("\n[tools] {}", names.join(", "));
            }
            RunEvent::ToolResult { name, result, .. } => {
                eprintln!("[{name}] {}", result.message);
            }
            RunEvent::Retrying {
                failed_model,
                fallback_model,
                ..
            } => {
                eprintln!("\n[retrying on {fallback_model}, {failed_model} failed]");
            }
            RunEvent::Finished(outcome) => {
                if !quiet {
                    println!();
                }
                return Ok(outcome);
            }
        }
    }
    bail!("run ended without an outcome")
}
