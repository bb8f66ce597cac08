//! Configuration view and validation commands: `patchwright config`.

use std::path::Path;

use anyhow::{Context, Result};

use patchwright::config::{CONFIG_FILE_NAME, Config};

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = explicit.unwrap_or(Path::new(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Patchwright Configuration");
            println!("=========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; defaults plus environment.", config_path.display());
            }
            println!(
                "GitHub token: {}",
                if config.github_token().is_some() { "set" } else { "not set" }
            );
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print!(
                "{}",
                toml::to_string_pretty(config).context("Failed to render configuration")?
            );
            println!();
            print_warnings(config);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();
            print_warnings(config);
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            let content = toml::to_string_pretty(&Config::default())
                .context("Failed to render default configuration")?;
            std::fs::write(config_path, content)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [limits] max_iterations, max_context_chars, max_diff_chars");
            println!("  - [preflight] install, typecheck, lint, test, smoke commands");
            println!("  - [generator] kind, command, args or endpoint and model");
            println!();
        }
    }

    Ok(())
}

fn print_warnings(config: &Config) {
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
}
