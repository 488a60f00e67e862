// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! `sonora`: inspect and maintain project files from the command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sonora_store_db::{
    DocumentNode, DocumentSlot, ImportOptions, LiveBlocks, ProjectFile, Progress, SampleBlockId,
    StoreConfig, StoreConnection,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sonora")]
#[command(about = "Inspect and maintain Sonora project files")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SONORA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show documents, block count and disk usage of a project file
    Info { project: PathBuf },
    /// Check that a file is a project file this build can open
    Check { project: PathBuf },
    /// Report the payload bytes of all blocks, or of one block
    Usage {
        project: PathBuf,
        #[arg(long)]
        block: Option<SampleBlockId>,
    },
    /// List blocks the stored document does not reference
    Orphans {
        project: PathBuf,
        /// Delete them
        #[arg(long)]
        delete: bool,
    },
    /// Rewrite the file keeping only referenced blocks
    Compact {
        project: PathBuf,
        /// Compact even when little space would be reclaimed
        #[arg(long)]
        force: bool,
    },
    /// Append the tracks of another project to `target`
    Import { target: PathBuf, source: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    debug!(?config, "Loaded configuration");

    match args.command {
        Command::Info { project } => info_cmd(&config, &project),
        Command::Check { project } => check_cmd(&config, &project),
        Command::Usage { project, block } => usage_cmd(&config, &project, block),
        Command::Orphans { project, delete } => orphans_cmd(&config, &project, delete),
        Command::Compact { project, force } => compact_cmd(&config, &project, force),
        Command::Import { target, source } => import_cmd(&config, &target, &source),
    }
}

fn open(config: &StoreConfig, path: &Path) -> Result<StoreConnection> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    StoreConnection::open(path, config)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// The document a load would use: the autosave if present.
fn stored_document(conn: &StoreConnection) -> Result<Option<(DocumentSlot, DocumentNode)>> {
    for slot in [DocumentSlot::Autosave, DocumentSlot::Project] {
        let blob = conn.read_document(slot)?;
        if !blob.is_empty() {
            let doc = DocumentNode::decode(&blob)
                .with_context(|| format!("Failed to decode the {} document", slot.table()))?;
            return Ok(Some((slot, doc)));
        }
    }
    Ok(None)
}

fn progress(done: u64, total: u64) -> Progress {
    if total > 0 && (done == total || done % 1000 == 0) {
        debug!("{done}/{total} blocks");
    }
    Progress::Continue
}

fn info_cmd(config: &StoreConfig, path: &Path) -> Result<()> {
    let conn = open(config, path)?;
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    println!("file:        {}", path.display());
    println!("file size:   {size}");
    for slot in [DocumentSlot::Project, DocumentSlot::Autosave] {
        let blob = conn.read_document(slot)?;
        let state = if blob.is_empty() {
            "absent".to_string()
        } else {
            format!("{} bytes", blob.dict.len() + blob.doc.len())
        };
        println!("{:<12} {state}", format!("{}:", slot.table()));
    }
    println!("blocks:      {}", conn.block_count()?);
    println!("block bytes: {}", conn.total_usage()?);
    Ok(())
}

fn check_cmd(config: &StoreConfig, path: &Path) -> Result<()> {
    let conn = open(config, path)?;
    let status = conn.check_version()?;
    info!(?status, "{} is a usable project file", path.display());
    Ok(())
}

fn usage_cmd(config: &StoreConfig, path: &Path, block: Option<SampleBlockId>) -> Result<()> {
    let conn = open(config, path)?;
    match block {
        Some(id) => println!("{}", conn.block_usage(id)?),
        None => println!("{}", conn.total_usage()?),
    }
    Ok(())
}

fn orphans_cmd(config: &StoreConfig, path: &Path, delete: bool) -> Result<()> {
    let conn = open(config, path)?;
    let Some((slot, doc)) = stored_document(&conn)? else {
        bail!("{} holds no document; refusing to judge its blocks", path.display());
    };
    let live = doc.block_ids();
    let orphans: Vec<_> = conn.block_ids()?.difference(&live).copied().collect();
    debug!(slot = slot.table(), live = live.len(), "Read stored document");

    for id in &orphans {
        println!("{id}");
    }
    if delete && !orphans.is_empty() {
        let deleted = conn.delete_blocks(&live, true)?;
        info!("Deleted {deleted} orphan blocks");
    }
    Ok(())
}

fn compact_cmd(config: &StoreConfig, path: &Path, force: bool) -> Result<()> {
    let mut project = ProjectFile::new(config.clone());
    let doc = project
        .load_project(path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .context("The project holds no document")?;

    let ids = doc.block_ids();
    let bytes = project.live_usage(&ids, || true)?;
    let blob = doc.encode()?;
    let live = LiveBlocks::new(ids, bytes);

    let before = project.total_usage()?;
    let compacted = project.compact(Some(&live), &blob, force, progress)?;
    if compacted {
        info!(before, after = bytes, "Compacted {}", path.display());
    } else {
        info!("{} was left as is", path.display());
    }
    project.close_project();
    Ok(())
}

fn import_cmd(config: &StoreConfig, target: &Path, source: &Path) -> Result<()> {
    let mut project = ProjectFile::new(config.clone());
    let mut doc = project
        .load_project(target)
        .with_context(|| format!("Failed to load {}", target.display()))?
        .context("The target project holds no document")?;

    let options = ImportOptions {
        has_time_track: doc.child("timetrack").is_some(),
    };
    let outcome = project
        .import_project(source, options, progress)
        .with_context(|| format!("Failed to import {}", source.display()))?;
    doc.children.extend(outcome.document.children);

    let blob = doc.encode()?;
    project.save_project(target, &blob, None, progress)?;
    info!(
        blocks = outcome.blocks_copied,
        tags = outcome.tags_copied,
        "Imported {} into {}",
        source.display(),
        target.display()
    );
    project.close_project();
    Ok(())
}
