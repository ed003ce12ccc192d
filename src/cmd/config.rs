//! Project setup and configuration commands - `fieldsync init|config`.

use anyhow::{Context, Result};

use fieldsync::config::{FieldsyncConfig, FieldsyncToml};
use fieldsync::queue::QueueName;

use super::super::ConfigCommands;
use super::open_store;

fn write_default_config(config: &FieldsyncConfig) -> Result<bool> {
    std::fs::create_dir_all(&config.config_dir).context("Failed to create .fieldsync directory")?;
    let path = config.config_file();
    if path.exists() {
        return Ok(false);
    }
    FieldsyncToml::default().save(&path)?;
    Ok(true)
}

pub async fn cmd_init(config: &FieldsyncConfig) -> Result<()> {
    let created = write_default_config(config)?;
    open_store(config).await?;

    println!("Initialized fieldsync in {}", config.config_dir.display());
    if created {
        println!("  Config: {}", config.config_file().display());
    }
    println!("  Store:  {}", config.db_path().display());
    Ok(())
}

pub fn cmd_config(config: &FieldsyncConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Fieldsync Configuration");
            println!("=======================");
            println!();

            let path = config.config_file();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("Config file: {} (not found, using defaults)", path.display());
            }
            println!();

            let toml = &config.toml;
            println!("[store]");
            println!("  path = \"{}\"", config.db_path().display());
            println!();

            println!("[delivery]");
            if let Some(url) = &toml.delivery.base_url {
                println!("  base_url = \"{}\"", url);
            }
            println!("  timeout_ms = {}", toml.delivery.timeout_ms);
            if toml.delivery.api_token.is_some() {
                println!("  api_token = \"****\"");
            }
            println!();

            println!("[endpoints]");
            for queue in QueueName::ALL {
                match config.endpoint(queue) {
                    Some(url) => println!("  {} = \"{}\"", queue, url),
                    None => println!("  {} = {}", queue, console::style("(not configured)").dim()),
                }
            }
            println!();

            println!("[server]");
            println!("  bind = \"{}\"", toml.server.bind);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}", console::style("Configuration is valid.").green());
            } else {
                println!("{}", console::style("Configuration warnings:").yellow());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if write_default_config(config)? {
                println!("Created {}", config.config_file().display());
            } else {
                println!("{} already exists.", config.config_file().display());
            }
        }
    }
    Ok(())
}
