//! Configuration management commands.

use std::path::Path;

use anyhow::{Result, bail};

use crate::style::{print_error, print_header, print_labeled, print_success};

/// Show the merged configuration.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = super::load_config(project, true)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        "text" => {
            print_header("Connector");
            print_labeled("Id", &config.connector.connector_id);
            print_labeled("Service", &config.connector.service_name);
            print_labeled("Log level", &config.connector.diagnostics.log_level);
            println!();

            print_header("Source");
            print_labeled("Path", &config.source.path.display().to_string());
            print_labeled(
                "From position",
                &config
                    .source
                    .from_position
                    .map_or("start".to_string(), |p| p.to_string()),
            );
            println!();

            print_header("Target");
            print_labeled("Path", &config.target.path.display().to_string());
            print_labeled("Index", &config.target.index_name);
            print_labeled("Mode", &format!("{:?}", config.target.mode));
            print_labeled("Transform", &format!("{:?}", config.target.transform));
            println!();

            print_header("Pipeline");
            print_labeled(
                "Concurrency limit",
                &config.pipeline.concurrency_limit.to_string(),
            );
            print_labeled("Await produce", &config.pipeline.await_produce.to_string());
            print_labeled("Max in flight", &config.pipeline.max_in_flight.to_string());
            print_labeled(
                "Shutdown grace",
                &format!("{}ms", config.pipeline.shutdown_grace_ms),
            );
            println!();

            print_header("Retry");
            if config.retry.enabled {
                print_labeled("Max attempts", &config.retry.max_attempts.to_string());
                print_labeled(
                    "Backoff",
                    &format!(
                        "{}ms..{}ms x{}",
                        config.retry.initial_backoff_ms,
                        config.retry.max_backoff_ms,
                        config.retry.multiplier
                    ),
                );
            } else {
                print_labeled("Enabled", "false");
            }
            println!();

            print_header("Checkpoints");
            print_labeled(
                "Directory",
                &config.checkpoints.directory.display().to_string(),
            );
        }
        other => bail!("Unknown format '{other}' (expected text, json or toml)"),
    }

    Ok(())
}

/// Validate the merged configuration.
pub fn validate(project: &Path) -> Result<()> {
    match super::load_config(project, true) {
        Ok(_) => {
            print_success("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            print_error(&format!("{e:#}"));
            Err(e)
        }
    }
}
