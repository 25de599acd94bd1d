use super::load_config;
use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Check the runner config before deploying it
    Validate,

    /// Print the effective config, defaults filled in
    Show,
}

pub fn run(config_path: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(config_path, json),
        ConfigSubcommand::Show => show(config_path, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let Some(path) = config_path else {
        anyhow::bail!("no config file given (use --config or CHANGESET_CONFIG)");
    };
    let config = load_config(Some(path))?;
    let result = config.validate();

    if json {
        let value = serde_json::json!({
            "valid": result.is_ok(),
            "table": config.effective_table_name(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        print_json(&value)?;
    } else if result.is_ok() {
        println!("Config is valid. Ledger table: {}", config.effective_table_name());
    }

    if let Err(e) = result {
        anyhow::bail!("config validation failed: {e}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
