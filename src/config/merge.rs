use super::schema::{AppConfig, PartialConfig};
use crate::branching::BranchSettings;
use std::path::PathBuf;
use std::time::Duration;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            workspace: self.workspace.or(fallback.workspace),
            owner: self.owner.or(fallback.owner),
            step_budget: self.step_budget.or(fallback.step_budget),
            max_concurrent_runs: self.max_concurrent_runs.or(fallback.max_concurrent_runs),
            run_timeout_secs: self.run_timeout_secs.or(fallback.run_timeout_secs),
            poll_interval_ms: self.poll_interval_ms.or(fallback.poll_interval_ms),
            stall_after_secs: self.stall_after_secs.or(fallback.stall_after_secs),
            carry_parent_context: self.carry_parent_context.or(fallback.carry_parent_context),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let defaults = BranchSettings::default();
        AppConfig {
            model: self.model.unwrap_or_else(|| "llama3.2".to_string()),
            workspace: self
                .workspace
                .unwrap_or_else(|| PathBuf::from("./workspace")),
            owner: self.owner.unwrap_or_else(|| "local".to_string()),
            step_budget: self.step_budget.unwrap_or(defaults.step_budget).max(1),
            max_concurrent_runs: self
                .max_concurrent_runs
                .unwrap_or(defaults.max_concurrent_runs)
                .max(1),
            run_timeout_secs: self.run_timeout_secs.filter(|secs| *secs > 0),
            poll_interval_ms: self
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval.as_millis() as u64)
                .max(10),
            stall_after_secs: self
                .stall_after_secs
                .unwrap_or(defaults.stall_after.as_secs()),
            carry_parent_context: self
                .carry_parent_context
                .unwrap_or(defaults.carry_parent_context),
        }
    }
}

impl AppConfig {
    /// Runtime knobs for the branching engine.
    pub fn branch_settings(&self) -> BranchSettings {
        BranchSettings {
            step_budget: self.step_budget,
            max_concurrent_runs: self.max_concurrent_runs,
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stall_after: Duration::from_secs(self.stall_after_secs),
            carry_parent_context: self.carry_parent_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_partial_finalizes_to_defaults() {
        let config = PartialConfig::default().finalize();
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.workspace, PathBuf::from("./workspace"));
        assert_eq!(config.owner, "local");
        assert_eq!(config.step_budget, 5);
        assert_eq!(config.max_concurrent_runs, 4);
        assert_eq!(config.run_timeout_secs, None);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.stall_after_secs, 600);
        assert!(config.carry_parent_context);
    }

    #[test]
    fn higher_layer_wins_field_by_field() {
        let cli = PartialConfig {
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        let workspace = PartialConfig {
            model: Some("llama3.2".into()),
            step_budget: Some(8),
            ..Default::default()
        };
        let global = PartialConfig {
            step_budget: Some(2),
            owner: Some("alice".into()),
            ..Default::default()
        };

        let config = cli.with_fallback(workspace).with_fallback(global).finalize();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.step_budget, 8);
        assert_eq!(config.owner, "alice");
    }

    #[test]
    fn branch_settings_conversion() {
        let config = PartialConfig {
            run_timeout_secs: Some(90),
            poll_interval_ms: Some(500),
            max_concurrent_runs: Some(0),
            ..Default::default()
        }
        .finalize();

        let settings = config.branch_settings();
        assert_eq!(settings.run_timeout, Some(Duration::from_secs(90)));
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.max_concurrent_runs, 1);
    }
}
