use crate::cli::parser::Commands;
use crate::config::Config;
use crate::config::migrate::{migrate_config_file, missing_keys};
use crate::errors::AppResult;
use crate::ui::messages::{info, success, warning};
use std::fs;

/// Handle the `config` subcommand
pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if let Commands::Config {
        print_config,
        check,
        migrate,
    } = cmd
    {
        let path = Config::config_file();

        // ---- PRINT CONFIG ----
        if *print_config {
            println!("📄 Current configuration:\n");
            println!("{}", serde_yaml::to_string(cfg)?);
        }

        // ---- CHECK CONFIG ----
        if *check {
            cfg.validate()?;
            if path.exists() {
                let missing = missing_keys(&fs::read_to_string(&path)?)?;
                if missing.is_empty() {
                    success("Configuration file is complete.");
                } else {
                    warning(format!(
                        "Missing keys (defaults in use): {}",
                        missing.join(", ")
                    ));
                }
            } else {
                info(format!("No configuration file at {:?}, defaults in use.", path));
            }
        }

        // ---- MIGRATE CONFIG ----
        if *migrate && !migrate_config_file(&path)? {
            info("Configuration already up to date.");
        }
    }

    Ok(())
}
