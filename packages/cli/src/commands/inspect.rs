use crate::config::Config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docnode::{Document, JsonDoc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Document JSON file
    pub doc: String,

    /// Print the tree outline
    #[arg(short, long)]
    pub tree: bool,
}

/// Node count per type, plus any integrity problems
#[derive(Debug)]
pub struct Summary {
    pub size: usize,
    pub types: BTreeMap<String, usize>,
    pub problems: Vec<String>,
}

pub fn load_document(config: &Config, path: &PathBuf) -> Result<Document> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: JsonDoc = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a document", path.display()))?;
    Ok(Document::from_json(config.doc_config()?, &json)?)
}

pub fn summarize(doc: &Document) -> Summary {
    let mut types = BTreeMap::new();
    doc.descendants(doc.root()).include_self().for_each(|id| {
        if let Some(node) = doc.node(id) {
            *types.entry(node.node_type().to_string()).or_insert(0) += 1;
        }
    });
    Summary {
        size: doc.size(),
        types,
        problems: doc.check_integrity(),
    }
}

pub fn inspect(args: InspectArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let path = PathBuf::from(cwd).join(&args.doc);
    let doc = load_document(&config, &path)?;
    let summary = summarize(&doc);

    println!("🔍 {} {}", "Inspecting".green().bold(), path.display());
    println!("   Root:  {}", doc.root());
    println!("   Nodes: {}", summary.size);
    for (node_type, count) in &summary.types {
        println!("     {:<16} {}", node_type, count);
    }

    if args.tree {
        println!();
        doc.descendants(doc.root())
            .include_self()
            .for_each_with_depth(|id, depth| {
                let node_type = doc.node(id).map(|node| node.node_type()).unwrap_or("?");
                println!("   {}{} {}", "  ".repeat(depth), node_type.bold(), id);
            });
    }

    println!();
    if summary.problems.is_empty() {
        println!("{} {}", "✓".green(), "Document is consistent".green());
        Ok(())
    } else {
        for problem in &summary.problems {
            println!("  {} {}", "✗".red(), problem);
        }
        anyhow::bail!("{} integrity problem(s) found", summary.problems.len())
    }
}
