use super::{load_config, open_ledger};
use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;

pub fn run(db: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(db, &config)?;
    let entries = ledger.entries().context("failed to read ledger")?;

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No change sets applied.");
        return Ok(());
    }

    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.change_id.clone(),
                e.author.clone(),
                e.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.unit_name.clone(),
                e.step_name.clone(),
            ]
        })
        .collect();
    print_table(&["CHANGE ID", "AUTHOR", "APPLIED AT", "UNIT", "STEP"], rows);
    Ok(())
}
