use crate::config::{Config, FieldConfig, FieldKind, NodeTypeConfig, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use docnode::Document;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Write an empty document to this file as well
    #[arg(short, long)]
    pub doc: Option<String>,

    /// Disable the idempotency check on normalizers
    #[arg(long)]
    pub no_strict: bool,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing docnode project...".bright_blue().bold());

    let config = Config {
        strict_mode: !args.no_strict,
        node_types: vec![NodeTypeConfig {
            node_type: "text".to_string(),
            state: BTreeMap::from([(
                "value".to_string(),
                FieldConfig {
                    kind: FieldKind::String,
                    default: None,
                },
            )]),
        }],
    };

    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, config_json)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);

    if let Some(doc_path) = &args.doc {
        let doc = Document::new(config.doc_config()?)?;
        let json = serde_json::to_string_pretty(&doc.to_json()?)?;
        fs::write(PathBuf::from(cwd).join(doc_path), json)?;
        println!("  {} Created {}", "✓".green(), doc_path);
    }

    println!();
    println!("{}", "✅ Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Add node types to {}", DEFAULT_CONFIG_NAME);
    println!("  2. Run: docnode replay <doc.json> <operations.jsonl>");

    Ok(())
}
