// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! SQLite persistence for Sonora project files.
//!
//! A project file stores the editable document (track topology, view state,
//! tags) as a compact binary blob next to a large, append-mostly table of
//! sample blocks. The two evolve independently because blocks are shared by
//! every undo state that references them, so this crate also tracks and
//! reclaims the space taken by blocks nothing references anymore.
//!
//! **Architecture**: This is the Database Layer under the editor. Callers own
//! the in-memory track graph and hand this layer explicit sets of live block
//! ids; the store itself does no reference counting.
//!
//! # Key Features
//!
//! - Connection lifecycle with save-aside/restore for switching files
//! - Named, nestable savepoints and an auto-committing savepoint guard
//! - Saved and autosave document slots
//! - Set-based orphan deletion in a single statement
//! - Compaction into a fresh file that only carries live blocks
//! - Disk usage from a direct walk of the block table's b-tree pages
//! - Importing blocks (with id remapping) from another project file
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use sonora_store_db::{LiveBlocks, Progress, ProjectFile, StoreConfig};
//!
//! let mut project = ProjectFile::new(StoreConfig::default());
//! let document = project.load_project(Path::new("song.sonora"))?.unwrap_or_default();
//! let ids = document.block_ids();
//! let live = LiveBlocks::new(ids.clone(), project.live_usage(&ids, || true)?);
//! project.compact(Some(&live), &document.encode()?, false, |_, _| Progress::Continue)?;
//! ```

mod background;
mod blocks;
mod compact;
mod config;
mod connection;
mod document;
mod error;
mod import;
mod project;
mod registry;
mod schema;
mod serializer;
mod transaction;
mod types;
mod usage;

pub use background::PendingOpen;
pub use compact::{BACKUP_SUFFIX, TEMP_SUFFIX};
pub use config::{ConfigError, StoreConfig};
pub use connection::StoreConnection;
pub use error::{DbContext, Error, Result, SchemaRejection};
pub use import::{ImportOptions, ImportOutcome};
pub use project::ProjectFile;
pub use registry::{ProjectId, ProjectRegistry};
pub use schema::{APPLICATION_ID, PAGE_SIZE, SCHEMA_VERSION, SchemaStatus};
pub use serializer::{DocumentError, DocumentNode};
pub use transaction::AutoCommitSavepoint;
pub use types::*;
