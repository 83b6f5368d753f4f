//! Profile command implementation.

use crate::cli::{ProfileAction, ProfileArgs};
use crate::config::{Config, Profile};
use crate::error::{CliError, Result};
use crate::output::Formatter;
use std::path::Path;

/// Execute the profile command, saving changes to `config_path`.
pub fn execute_profile(
    args: ProfileArgs,
    config: &mut Config,
    config_path: &Path,
    formatter: &Formatter,
) -> Result<()> {
    match args.action {
        ProfileAction::List => list_profiles(config, formatter),
        ProfileAction::Add { name, url } => add_profile(config, config_path, name, url, formatter),
        ProfileAction::Use { name } => use_profile(config, config_path, name, formatter),
    }
}

/// List all profiles.
fn list_profiles(config: &Config, formatter: &Formatter) -> Result<()> {
    if config.profiles.is_empty() {
        println!("{}", formatter.info("No profiles configured"));
        return Ok(());
    }

    println!("Available profiles:");
    for (name, profile) in &config.profiles {
        if name == &config.active_profile {
            println!("* {}", formatter.success(name));
        } else {
            println!("  {}", name);
        }
        println!("    URL: {}", profile.server_url);
    }

    Ok(())
}

/// Create or update a profile.
fn add_profile(
    config: &mut Config,
    config_path: &Path,
    name: String,
    url: String,
    formatter: &Formatter,
) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(CliError::InvalidInput(format!(
            "Server URL must start with http:// or https://, got '{}'",
            url
        )));
    }

    let action = if config.profiles.contains_key(&name) {
        "Updated"
    } else {
        "Created"
    };

    config.set_profile(name.clone(), Profile { server_url: url });
    config.save_to(config_path)?;

    println!(
        "{}",
        formatter.success(&format!("{} profile '{}'", action, name))
    );
    Ok(())
}

/// Switch to a different profile.
fn use_profile(
    config: &mut Config,
    config_path: &Path,
    name: String,
    formatter: &Formatter,
) -> Result<()> {
    config.switch_profile(name.clone())?;
    config.save_to(config_path)?;
    println!(
        "{}",
        formatter.success(&format!("Switched to profile '{}'", name))
    );
    Ok(())
}
