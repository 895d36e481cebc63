use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for arbor.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub branching: Option<BranchingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub workspace: Option<String>,
    /// Owner id used for new conversations and branch status checks.
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BranchingConfig {
    pub step_budget: Option<usize>,
    pub max_concurrent_runs: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub stall_after_secs: Option<u64>,
    pub carry_parent_context: Option<bool>,
}

impl ConfigFile {
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general;
        let branching = self.branching;
        let (model, workspace, owner) = match general {
            Some(g) => (g.model, g.workspace.map(PathBuf::from), g.owner),
            None => (None, None, None),
        };

        match branching {
            Some(b) => PartialConfig {
                model,
                workspace,
                owner,
                step_budget: b.step_budget,
                max_concurrent_runs: b.max_concurrent_runs,
                run_timeout_secs: b.run_timeout_secs,
                poll_interval_ms: b.poll_interval_ms,
                stall_after_secs: b.stall_after_secs,
                carry_parent_context: b.carry_parent_context,
            },
            None => PartialConfig {
                model,
                workspace,
                owner,
                ..Default::default()
            },
        }
    }
}

/// Fully-resolved runtime configuration. All fields have values, except the
/// run timeout, which is unbounded when unset.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub workspace: PathBuf,
    pub owner: String,
    pub step_budget: usize,
    pub max_concurrent_runs: usize,
    pub run_timeout_secs: Option<u64>,
    pub poll_interval_ms: u64,
    pub stall_after_secs: u64,
    pub carry_parent_context: bool,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub workspace: Option<PathBuf>,
    pub owner: Option<String>,
    pub step_budget: Option<usize>,
    pub max_concurrent_runs: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub stall_after_secs: Option<u64>,
    pub carry_parent_context: Option<bool>,
}
