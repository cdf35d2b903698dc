//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use rl_core::config::{self, RoamConfig};

use super::config_file;
use crate::output::{print_info, print_success, print_warning};

/// Print the effective configuration as TOML
///
/// Unlike the other commands, an invalid file is an error here.
pub fn config_show(explicit: Option<&Path>) -> Result<()> {
    let path = config_file(explicit);
    if !path.exists() {
        print_warning(&format!("No configuration file at {:?}; showing defaults", path));
    }

    let config = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = config_file(explicit);
    if path.exists() && !force {
        print_warning(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &RoamConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Set [agent] version to the commit id of the agent you want installed");
    Ok(())
}

/// Print the config file location
pub fn config_path(explicit: Option<&Path>) {
    println!("{}", config_file(explicit).display());
}
