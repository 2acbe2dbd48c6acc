//! State command implementation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use logmeter_agent::{Settings, StateStore};

use crate::output;

#[derive(Args, Debug)]
pub struct StateArgs {
    /// State directory; defaults to the one in the settings file
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Print markers as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StateArgs, config: Option<&Path>) -> Result<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => Settings::load(config)?.state.dir,
    };
    let markers = StateStore::new(&dir)
        .list()
        .await
        .context("Cannot read state")?;

    if args.json {
        let entries: Vec<_> = markers
            .iter()
            .map(|(port, marker)| serde_json::json!({ "port": port, "marker": marker }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if markers.is_empty() {
        output::info(&format!("No state stored in {}", dir.display()));
        return Ok(());
    }

    println!(
        "{:<8} {:>14}  {}",
        "PORT".bold(),
        "READ".bold(),
        "ROTATED FILE".bold()
    );
    for (port, marker) in markers {
        let rotated = match &marker.rotated {
            Some(file) => match file.modified {
                Some(modified) => format!("{} (mtime {})", file.path, modified),
                None => file.path.clone(),
            },
            None => "-".dimmed().to_string(),
        };
        println!("{:<8} {:>14}  {}", port, marker.bytes_read, rotated);
    }
    Ok(())
}
