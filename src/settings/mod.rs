use crate::common::net::parse_target_url;
use crate::config::{ConfigError, DEFAULT_MODULE, ModuleSet, default_config_path};
use crate::data_model::settings::ProbeSettings;
use clap::Parser;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Parser, Debug)]
#[command(name = "blackprobe")]
#[command(about = "Run one blackbox HTTP probe and print its metrics", long_about = None)]
pub struct CliArgs {
    /// Target URL to probe
    #[arg(short, long, value_name = "URL")]
    target: String,

    /// Module to probe with
    #[arg(short, long, default_value = DEFAULT_MODULE)]
    module: String,

    /// Modules file (JSON); defaults to the user config directory
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level: error|warn|info|debug|trace
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("target {target:?} is not an http(s) URL")]
    InvalidTarget { target: String },
    #[error("unknown module {name:?}")]
    UnknownModule { name: String },
    #[error("unknown log level {value:?}")]
    InvalidLogLevel { value: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub fn load_from_cli() -> Result<ProbeSettings, SettingsError> {
    let args = CliArgs::parse();
    from_args(args)
}

pub fn from_args(args: CliArgs) -> Result<ProbeSettings, SettingsError> {
    if let Some(level) = &args.log_level
        && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
    {
        return Err(SettingsError::InvalidLogLevel {
            value: level.clone(),
        });
    }

    let target = parse_target_url(&args.target)
        .ok_or_else(|| SettingsError::InvalidTarget {
            target: args.target.clone(),
        })?
        .to_string();

    let modules = load_modules(args.config.as_deref())?;
    let module = modules
        .get(&args.module)
        .cloned()
        .ok_or_else(|| SettingsError::UnknownModule {
            name: args.module.clone(),
        })?;

    Ok(ProbeSettings {
        target,
        module_name: args.module,
        module,
        log_level: args.log_level.map(|level| level.to_ascii_lowercase()),
    })
}

/// An explicit path must exist; the default path is optional and falls back
/// to the built-in modules.
fn load_modules(explicit: Option<&Path>) -> Result<ModuleSet, ConfigError> {
    if let Some(path) = explicit {
        return ModuleSet::from_path(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => ModuleSet::from_path(&path),
        _ => Ok(ModuleSet::builtin()),
    }
}
