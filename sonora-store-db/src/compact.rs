// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Copying a project into a fresh file, and compaction built on it.
//!
//! Compaction copies the live blocks and the current document into
//! `<file>_compact_temp`, then swaps it in through `<file>_compact_back`
//! only if the new file is strictly smaller.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::params;
use tracing::{debug, info, warn};

use crate::connection::StoreConnection;
use crate::error::{DbContext, Error, Result};
use crate::project::ProjectFile;
use crate::schema::PAGE_SIZE;
use crate::types::{BlockIdSet, DocumentBlob, DocumentSlot, LiveBlocks, Progress};

/// Suffix of the original file while a compacted copy replaces it.
pub const BACKUP_SUFFIX: &str = "_compact_back";
/// Suffix of the compacted copy while it is being written.
pub const TEMP_SUFFIX: &str = "_compact_temp";

const OUTBOUND: &str = "outbound";

/// `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a database file and its write-ahead log companions.
fn remove_database(path: &Path) -> io::Result<()> {
    remove_if_exists(path)?;
    remove_if_exists(&with_suffix(path, "-wal"))?;
    remove_if_exists(&with_suffix(path, "-shm"))
}

/// Destination attached as `outbound`. Until [`finish`](Self::finish) is
/// called, dropping it detaches the destination and deletes its file.
struct Outbound<'c> {
    conn: &'c StoreConnection,
    dest: &'c Path,
    attached: bool,
    keep: bool,
}

impl<'c> Outbound<'c> {
    fn attach(conn: &'c StoreConnection, dest: &'c Path) -> Result<Self> {
        let name = dest.to_str().ok_or_else(|| {
            Error::io(
                format!("Cannot attach {}", dest.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8"),
            )
        })?;
        conn.conn
            .execute("ATTACH DATABASE ?1 AS outbound", params![name])
            .db_context(|| "Unable to attach destination database".to_string())?;
        Ok(Self {
            conn,
            dest,
            attached: true,
            keep: false,
        })
    }

    /// Settings for a file that is thrown away if anything goes wrong.
    fn fast_mode(&self) -> Result<()> {
        self.conn
            .conn
            .execute_batch(&format!(
                "PRAGMA {OUTBOUND}.page_size = {PAGE_SIZE}; PRAGMA {OUTBOUND}.synchronous = OFF;"
            ))
            .db_context(|| "Failed to configure destination database".to_string())?;
        let _mode: String = self
            .conn
            .conn
            .query_row(&format!("PRAGMA {OUTBOUND}.journal_mode = OFF"), [], |row| {
                row.get(0)
            })
            .db_context(|| "Failed to configure destination database".to_string())?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.conn
            .conn
            .execute_batch("DETACH DATABASE outbound;")
            .db_context(|| "Destination project could not be detached".to_string())?;
        self.attached = false;
        self.keep = true;
        Ok(())
    }
}

impl Drop for Outbound<'_> {
    fn drop(&mut self) {
        if self.attached
            && let Err(e) = self.conn.conn.execute_batch("DETACH DATABASE outbound;")
        {
            warn!("Failed to detach destination database: {e}");
        }
        if !self.keep
            && let Err(e) = remove_database(self.dest)
        {
            warn!("Failed to remove {}: {e}", self.dest.display());
        }
    }
}

impl StoreConnection {
    /// Write a new project file at `dest` with the tags, the blocks in `ids`
    /// (keeping their ids) and `doc` in `slot`.
    ///
    /// `progress` is called after every block. On any failure or
    /// cancellation the destination is removed and this file is untouched.
    pub fn copy_to<P>(
        &self,
        dest: &Path,
        ids: &BlockIdSet,
        doc: &DocumentBlob,
        slot: DocumentSlot,
        mut progress: P,
    ) -> Result<()>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        if dest.canonicalize().ok() == self.path().canonicalize().ok() && dest.exists() {
            return Err(Error::io(
                format!("Cannot copy {} onto itself", dest.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "source and destination are the same file"),
            ));
        }
        remove_database(dest)
            .map_err(|e| Error::io(format!("Failed to replace {}", dest.display()), e))?;

        let outbound = Outbound::attach(self, dest)?;
        outbound.fast_mode()?;
        self.install_schema(OUTBOUND)?;
        self.conn
            .execute_batch("INSERT INTO outbound.tags SELECT * FROM main.tags;")
            .db_context(|| "Failed to copy tags".to_string())?;

        {
            // The destination has no journal; the transaction only batches
            // the copies. Dropping it early rolls back before detaching.
            let tx = self
                .conn
                .unchecked_transaction()
                .db_context(|| "Failed to begin copy transaction".to_string())?;
            let mut stmt = tx
                .prepare(
                    "INSERT INTO outbound.sampleblocks SELECT * FROM main.sampleblocks WHERE blockid = ?1",
                )
                .db_context(|| "Unable to prepare block copy".to_string())?;

            let total = ids.len() as u64;
            for (done, id) in ids.iter().enumerate() {
                stmt.execute(params![id]).map_err(|e| {
                    Error::copy_failed(format!("Failed to copy sample block {id}"), Some(e))
                })?;
                if progress(done as u64 + 1, total).is_cancel() {
                    return Err(Error::Cancelled);
                }
            }
            drop(stmt);

            self.write_document_in(OUTBOUND, slot, doc)?;
            tx.commit()
                .db_context(|| "Failed to commit copied project".to_string())?;
        }

        outbound.finish()?;
        debug!(blocks = ids.len(), "Copied project to {}", dest.display());
        Ok(())
    }
}

impl ProjectFile {
    /// [`StoreConnection::copy_to`] on the current connection.
    pub fn copy_to<P>(
        &mut self,
        dest: &Path,
        ids: &BlockIdSet,
        doc: &DocumentBlob,
        slot: DocumentSlot,
        progress: P,
    ) -> Result<()>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        let result = self
            .connection()
            .and_then(|c| c.copy_to(dest, ids, doc, slot, progress));
        self.record(result)
    }

    /// Whether compacting against `live` would reclaim enough space.
    ///
    /// Also records whether the table holds blocks outside `live`.
    pub fn should_compact(&mut self, live: &LiveBlocks) -> Result<bool> {
        let result = self
            .connection()
            .and_then(|c| Ok((c.total_usage()?, c.block_count()?)));
        let (total, count) = self.record(result)?;
        if count == 0 {
            return Ok(false);
        }

        self.had_unused = count > live.ids.len() as u64;

        let used = live.bytes.saturating_mul(100);
        let threshold = u64::from(self.config.compact_threshold);
        debug!(used, total, count, "Checking whether to compact");
        if total == 0 || used / total > threshold {
            debug!("Not compacting");
            return Ok(false);
        }
        Ok(true)
    }

    /// Rewrite the project file keeping only `live` blocks (all blocks when
    /// `None`) and `doc`.
    ///
    /// Unless `force` is set, scratch projects and projects where
    /// [`should_compact`](Self::should_compact) says no are left alone and
    /// only their autosave document is dropped. Returns whether a compacted
    /// file was swapped in.
    pub fn compact<P>(
        &mut self,
        live: Option<&LiveBlocks>,
        doc: &DocumentBlob,
        force: bool,
        progress: P,
    ) -> Result<bool>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        self.was_compacted = false;
        // Assume unused blocks until shown otherwise so teardown still cleans up
        self.had_unused = true;

        if !force {
            let worthwhile = match live {
                Some(live) if !self.temporary => match self.should_compact(live) {
                    Ok(worthwhile) => worthwhile,
                    Err(e) => {
                        warn!("Cannot measure usage, not compacting: {e}");
                        false
                    }
                },
                _ => false,
            };
            if !worthwhile {
                if self.modified
                    && let Err(e) = self.delete_autosave()
                {
                    warn!("Failed to drop autosave document: {e}");
                }
                return Ok(false);
            }
        }

        let Some(original) = self.file_path.clone() else {
            return self.record(Err(Error::NoConnection));
        };
        let backup = with_suffix(&original, BACKUP_SUFFIX);
        let temp = with_suffix(&original, TEMP_SUFFIX);

        let ids = match live {
            Some(live) => live.ids.clone(),
            None => {
                let result = self.connection().and_then(|c| c.block_ids());
                self.record(result)?
            }
        };
        let slot = if self.temporary {
            DocumentSlot::Autosave
        } else {
            DocumentSlot::Project
        };
        self.copy_to(&temp, &ids, doc, slot, progress)?;

        if let Err(e) = self.close_connection() {
            let _ = remove_database(&temp);
            return Err(e);
        }

        let swapped = self.swap_in(&original, &temp, &backup);
        if swapped {
            self.was_compacted = true;
            info!("Compacted {}", original.display());
            return Ok(true);
        }

        if let Err(e) = remove_database(&temp) {
            warn!("Failed to remove {}: {e}", temp.display());
        }
        self.open_connection(Some(&original))?;
        Ok(false)
    }

    /// Replace `original` with `temp` if it is strictly smaller, then open
    /// it. On `false` the original file is back in place and closed.
    fn swap_in(&mut self, original: &Path, temp: &Path, backup: &Path) -> bool {
        let size = |p: &Path| fs::metadata(p).map(|m| m.len()).ok();
        match (size(temp), size(original)) {
            (Some(new), Some(old)) if new < old => {
                debug!(old, new, "Compacted file is smaller");
            }
            (new, old) => {
                debug!(?old, ?new, "Keeping original file");
                return false;
            }
        }

        if let Err(e) = fs::rename(original, backup) {
            warn!("Failed to rename {}: {e}", original.display());
            return false;
        }
        if let Err(e) = fs::rename(temp, original) {
            warn!("Failed to rename {}: {e}", temp.display());
            if let Err(e) = fs::rename(backup, original) {
                warn!("Failed to restore {}: {e}", original.display());
            }
            return false;
        }

        if let Err(e) = self.open_connection(Some(original)) {
            warn!("Failed to open compacted file, restoring original: {e}");
            let restored = fs::rename(original, temp).and_then(|()| fs::rename(backup, original));
            if let Err(e) = restored {
                warn!("Failed to restore {}: {e}", original.display());
            }
            return false;
        }

        if let Err(e) = remove_database(backup) {
            warn!("Failed to remove {}: {e}", backup.display());
        }
        true
    }
}
