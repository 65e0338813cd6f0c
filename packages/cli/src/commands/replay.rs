use crate::commands::inspect::load_document;
use crate::config::Config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docnode::{Document, Operations};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Document JSON file to start from
    pub doc: String,

    /// Operations log: a JSON array of batches, or one batch per line
    pub log: String,

    /// Write the resulting document here instead of stdout
    #[arg(short, long)]
    pub out: Option<String>,
}

/// Parse an operations log into batches
pub fn parse_log(content: &str) -> Result<Vec<Operations>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }
    if let Ok(batches) = serde_json::from_str::<Vec<Operations>>(trimmed) {
        return Ok(batches);
    }
    if let Ok(batch) = Operations::from_json_str(trimmed) {
        return Ok(vec![batch]);
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            Operations::from_json_str(line)
                .with_context(|| format!("Invalid operations on line {}", index + 1))
        })
        .collect()
}

/// Apply each batch as its own commit
pub fn apply_log(doc: &mut Document, batches: &[Operations]) -> Result<usize> {
    let mut applied = 0;
    for (index, batch) in batches.iter().enumerate() {
        if batch.is_empty() {
            continue;
        }
        doc.apply_operations(batch)
            .with_context(|| format!("Batch {} failed to apply", index + 1))?;
        doc.commit()?;
        debug!(batch = index + 1, operations = batch.ordered.len(), "Applied batch");
        applied += 1;
    }
    Ok(applied)
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let doc_path = PathBuf::from(cwd).join(&args.doc);
    let log_path = PathBuf::from(cwd).join(&args.log);

    let mut doc = load_document(&config, &doc_path)?;
    let log = fs::read_to_string(&log_path)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;
    let batches = parse_log(&log)?;

    let applied = apply_log(&mut doc, &batches)?;
    info!(applied, total = batches.len(), "Replay finished");

    let json = serde_json::to_string_pretty(&doc.to_json()?)?;
    match &args.out {
        Some(out) => {
            fs::write(PathBuf::from(cwd).join(out), json)?;
            println!(
                "{} Applied {} batch(es), wrote {}",
                "✓".green(),
                applied,
                out.bright_white()
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}
