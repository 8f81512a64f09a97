//! Initialize a Collapse project.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{Config, CONFIG_FILE};

pub fn run(path: Option<String>) -> Result<()> {
    let base_path = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    println!("{} Initializing Collapse project...", "→".blue());

    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("Failed to create {}", base_path.display()))?;

    let config_path = base_path.join(CONFIG_FILE);
    if !config_path.exists() {
        Config::default().save(&config_path)?;
        println!("  {} Created {}", "✓".green(), config_path.display());
    } else {
        println!("  {} {} already exists", "•".yellow(), config_path.display());
    }

    println!();
    println!("{} Collapse project initialized!", "✓".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  {} list shard data files under [[shard.shards]] and run `collapse serve`",
        "1.".blue()
    );
    println!(
        "  {} list shard addresses under [[cluster.shards]]",
        "2.".blue()
    );
    println!("  {} collapse search \"your query\" --group-by field", "3.".blue());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("project");

        run(Some(base.display().to_string())).unwrap();
        let path = base.join(CONFIG_FILE);
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        std::fs::write(&path, "[search]\ndefault_size = 4\n").unwrap();
        run(Some(base.display().to_string())).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().search.default_size, 4);
    }
}
