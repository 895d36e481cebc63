pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "arbor.toml";

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > `--config` file > workspace config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let (cli_partial, explicit) = cli_to_partial(cli);
    Ok(load_layers(
        cli_partial,
        explicit.as_deref(),
        global_config_path().as_deref(),
    ))
}

/// Merge the layers given an already-parsed CLI layer.
pub fn load_layers(
    cli_partial: PartialConfig,
    explicit_path: Option<&Path>,
    global_path: Option<&Path>,
) -> AppConfig {
    // Layer 1: Global config (~/.config/arbor/arbor.toml or platform equivalent)
    let global = match global_path {
        Some(p) => load_layer(p),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    };

    // Explicit --config file sits between the CLI flags and the workspace file.
    let explicit = explicit_path.map(load_layer).unwrap_or_default();

    // Workspace path decides where the workspace config lives.
    let workspace_path = cli_partial
        .workspace
        .clone()
        .or_else(|| explicit.workspace.clone())
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| PathBuf::from("./workspace"));

    // Layer 2: Workspace config (workspace/arbor.toml)
    let workspace = load_layer(&workspace_path.join(CONFIG_FILE_NAME));

    cli_partial
        .with_fallback(explicit)
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize()
}

/// Load one layer, falling back to an empty layer on any error.
fn load_layer(path: &Path) -> PartialConfig {
    match load_toml_file(path) {
        Ok(Some(partial)) => partial,
        Ok(None) => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            PartialConfig::default()
        }
        Err(e) => {
            tracing::warn!("Config error: {e}");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns `Ok(None)` if the file does not exist.
pub fn load_toml_file(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let config_file =
        toml::from_str::<ConfigFile>(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(Some(config_file.to_partial()))
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/arbor/arbor.toml
/// macOS: ~/Library/Application Support/arbor/arbor.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "arbor")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert CLI arguments to a PartialConfig for merging, plus the explicit
/// config file path if one was given.
fn cli_to_partial(cli: &Cli) -> (PartialConfig, Option<PathBuf>) {
    match &cli.command {
        Commands::Run {
            model,
            workspace,
            owner,
            timeout,
            config,
            ..
        } => (
            PartialConfig {
                model: model.clone(),
                workspace: workspace.clone(),
                owner: owner.clone(),
                run_timeout_secs: *timeout,
                ..Default::default()
            },
            config.clone(),
        ),
    }
}
