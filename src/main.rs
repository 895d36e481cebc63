use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use arbor::agent::genai_executor::GenaiExecutor;
use arbor::agent::tools::ToolCall;
use arbor::branching::{BranchEvent, Orchestrator};
use arbor::media::ManifestMedia;
use arbor::model::{ContentPart, Message};
use arbor::store::MemoryStore;
use arbor::{cli, config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = cli::Cli::parse();
    tracing::info!("Arbor starting");

    let config = config::load_config(&cli)?;
    tracing::info!(model = %config.model, workspace = %config.workspace.display(), "Config loaded");

    match cli.command {
        cli::Commands::Run { prompt, .. } => run(config, prompt).await,
    }
}

async fn run(config: config::AppConfig, prompt: String) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, shutting down");
                cancel.cancel();
            }
        });
    }

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(GenaiExecutor::new(genai::Client::default(), &config.model)),
        Arc::new(ManifestMedia::new(config.workspace.join("assets"))),
        config.branch_settings(),
        Some(event_tx),
        cancel.clone(),
    );
    let monitor = tokio::spawn(orchestrator.stall_monitor().run(cancel.child_token()));

    let root = orchestrator
        .start_conversation(&config.owner, &title_for(&prompt), &prompt)
        .await
        .context("Failed to start conversation")?;
    eprintln!(
        "Arbor session started.\n  Model: {}\n  Workspace: {}\n  Conversation: {}",
        config.model,
        config.workspace.display(),
        root.id,
    );

    orchestrator
        .run_conversation(&root.id)
        .await
        .context("Failed to dispatch the first run")?;
    let outcome = drive(&orchestrator, &config.owner, &root.id, &cancel).await;

    orchestrator.shutdown().await;
    cancel.cancel();
    let _ = monitor.await;

    let transcript = orchestrator.messages(&root.id).await?;
    drop(orchestrator);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    println!();
    for message in &transcript {
        print_message(message);
    }
    outcome
}

/// Wait for every run; whenever the root spawned a new branch set that fully
/// resolved, continue it with the merged results. Stops when a turn ends
/// without new branches, or when a branch set stays blocked after all runs
/// have ended.
async fn drive(
    orchestrator: &Orchestrator,
    owner: &str,
    root_id: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut seen = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = orchestrator.join_all() => {}
        }

        let report = orchestrator.branch_status(owner, root_id).await?;
        if report.branches.len() == seen {
            return Ok(());
        }
        seen = report.branches.len();

        if report.is_blocked() {
            for branch in report.branches.iter().filter(|b| b.status.is_active()) {
                tracing::warn!(conversation_id = %branch.id, name = %branch.name, "Branch finished without returning");
            }
            anyhow::bail!(
                "{} of {} branches never returned",
                report.active_count,
                report.branches.len()
            );
        }

        let messages = orchestrator.messages(root_id).await?;
        let tool_call_id = latest_spawn_call(&messages).unwrap_or_else(|| "cli".to_string());
        let continuation = orchestrator
            .continue_parent(root_id, &tool_call_id)
            .await
            .context("Failed to continue the orchestrator")?;

        for agent in &continuation.results.agents {
            eprintln!(
                "[branch] {}: {} asset(s){}",
                agent.name,
                agent.returned_assets.as_ref().map_or(0, Vec::len),
                agent
                    .summary
                    .as_deref()
                    .map(|s| format!(" - {s}"))
                    .unwrap_or_default()
            );
        }
    }
}

/// Id of the most recent successful `spawnSubAgents` call.
fn latest_spawn_call(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .flat_map(|m| m.parts.iter().rev())
        .find_map(|part| match part {
            ContentPart::ToolInvocation {
                tool_call_id,
                call: ToolCall::SpawnSubAgents(_),
                output: Some(output),
            } if !output.is_error() => Some(tool_call_id.clone()),
            _ => None,
        })
}

fn title_for(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}

fn print_event(event: &BranchEvent) {
    match event {
        BranchEvent::Spawned { parent_id, children } => {
            eprintln!("[spawn] {parent_id} -> {} branch(es)", children.len());
            for child in children {
                eprintln!("  {} ({})", child.name, child.id);
            }
        }
        BranchEvent::AssetCreated { conversation_id, asset_id, kind, uri } => {
            eprintln!("[asset] {} {asset_id} in {conversation_id}: {uri}", kind.as_str());
        }
        BranchEvent::BranchReturned { child_id, navigate_to } => {
            eprintln!(
                "[return] {child_id} -> {}",
                navigate_to.as_deref().unwrap_or("-")
            );
        }
        BranchEvent::BranchFinalized { child_id } => eprintln!("[finalize] {child_id}"),
        BranchEvent::RunFinished { conversation_id, tool_calls } => {
            eprintln!("[run] {conversation_id} finished ({tool_calls} tool call(s))");
        }
        BranchEvent::RunFailed { conversation_id, error } => {
            eprintln!("[error] {conversation_id}: {error}");
        }
        BranchEvent::BranchStalled { conversation_id, reason } => {
            eprintln!("[stalled] {conversation_id}: {reason}");
        }
        BranchEvent::ParentResumed { parent_id, tool_call_id } => {
            eprintln!("[continue] {parent_id} (call {tool_call_id})");
        }
    }
}

fn print_message(message: &Message) {
    for part in &message.parts {
        match part {
            ContentPart::Text { text } => println!("{}: {text}", message.role.as_str()),
            ContentPart::ToolInvocation { call, output, .. } => println!(
                "{}: [{}] {}",
                message.role.as_str(),
                call.name(),
                output
                    .as_ref()
                    .map(|o| o.to_model_json())
                    .unwrap_or_default()
            ),
            ContentPart::Attachment { asset_id } => {
                println!("{}: [attachment {asset_id}]", message.role.as_str())
            }
        }
    }
    println!();
}
