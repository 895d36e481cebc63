use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "arbor",
    version,
    about = "Branching orchestrator for parallel sub-agent conversations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a conversation and drive it until no branch is pending
    Run {
        /// Opening user message for the orchestrator
        #[arg(short, long)]
        prompt: String,

        /// Model name passed to genai (e.g., "llama3.2", "gpt-4o-mini")
        #[arg(short, long)]
        model: Option<String>,

        /// Workspace directory path (assets are written under <workspace>/assets)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Path to config file (overrides workspace and global config)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Owner id for the new conversation
        #[arg(long)]
        owner: Option<String>,

        /// Wall-clock limit per run, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_parses_flags() {
        let cli = Cli::try_parse_from([
            "arbor", "run", "--prompt", "A film", "-m", "llama3.2", "--timeout", "120",
        ])
        .unwrap();
        let Commands::Run {
            prompt,
            model,
            timeout,
            owner,
            ..
        } = cli.command;
        assert_eq!(prompt, "A film");
        assert_eq!(model.as_deref(), Some("llama3.2"));
        assert_eq!(timeout, Some(120));
        assert_eq!(owner, None);
    }

    #[test]
    fn run_requires_prompt() {
        assert!(Cli::try_parse_from(["arbor", "run"]).is_err());
    }
}
