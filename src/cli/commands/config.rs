//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{self, Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: [&str; 7] = [
    "general.log_format",
    "solver.max_parallelism",
    "solver.timeout_secs",
    "worker.scratch_dir",
    "worker.inherit_path",
    "worker.keep_sandbox",
    "progress.mode",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> KilnResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let mut updated = config.clone();

    if let Err(e) = apply(&mut updated, key, value) {
        if let KilnError::User(_) = e {
            ui::step_error_detail(&ctx, "Unknown config key", key);
            ui::remark(&ctx, "Valid keys:");
            for key in VALID_KEYS {
                eprintln!("  {}", key);
            }
        }
        return Err(e);
    }

    config::validate(&updated).map_err(|reason| KilnError::ConfigInvalid {
        path: manager.path().to_path_buf(),
        reason,
    })?;

    manager.save(&updated).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Assign one dot-separated key; `User` errors mean the key is unknown
fn apply(config: &mut Config, key: &str, value: &str) -> KilnResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),
        ["solver", "max_parallelism"] => config.solver.max_parallelism = parse_number(key, value)?,
        ["solver", "timeout_secs"] => {
            config.solver.timeout_secs = match value {
                "" | "none" => None,
                _ => Some(parse_number(key, value)?),
            }
        }
        ["worker", "scratch_dir"] => {
            config.worker.scratch_dir = (!value.is_empty()).then(|| PathBuf::from(value))
        }
        ["worker", "inherit_path"] => config.worker.inherit_path = parse_bool(key, value)?,
        ["worker", "keep_sandbox"] => config.worker.keep_sandbox = parse_bool(key, value)?,
        ["progress", "mode"] => config.progress.mode = value.to_string(),
        _ => return Err(KilnError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

fn invalid_value(key: &str, reason: String) -> KilnError {
    KilnError::ConfigInvalid {
        path: PathBuf::from(key),
        reason,
    }
}

fn parse_bool(key: &str, value: &str) -> KilnResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid_value(
            key,
            format!("invalid boolean value: {}. Use true/false", value),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> KilnResult<T> {
    value
        .parse()
        .map_err(|_| invalid_value(key, format!("invalid number: {}", value)))
}
