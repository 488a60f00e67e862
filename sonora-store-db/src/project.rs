// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Project file lifecycle.
//!
//! [`ProjectFile`] owns the connection to a project's file and the flags
//! describing it (temporary, modified, recovered). It can set the current
//! connection aside while another file is opened, then either discard the
//! old one or switch back to it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::background::PendingOpen;
use crate::config::StoreConfig;
use crate::connection::StoreConnection;
use crate::error::{Error, Result};
use crate::serializer::DocumentNode;
use crate::transaction::AutoCommitSavepoint;
use crate::types::{BlockIdSet, DocumentBlob, DocumentSlot, LiveBlocks, Progress, SampleBlockId};

/// A connection set aside by [`ProjectFile::save_connection`].
struct SavedConnection {
    conn: Option<StoreConnection>,
    path: Option<PathBuf>,
    temporary: bool,
}

/// The storage side of one open project.
pub struct ProjectFile {
    pub(crate) config: StoreConfig,
    pub(crate) current: Option<StoreConnection>,
    previous: Option<SavedConnection>,
    pub(crate) file_path: Option<PathBuf>,
    pub(crate) temporary: bool,
    pub(crate) modified: bool,
    pub(crate) recovered: bool,
    pub(crate) was_compacted: bool,
    pub(crate) had_unused: bool,
    last_error: Option<String>,
    library_error: Option<String>,
}

impl std::fmt::Debug for ProjectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectFile")
            .field("file_path", &self.file_path)
            .field("open", &self.current.is_some())
            .field("temporary", &self.temporary)
            .field("modified", &self.modified)
            .field("recovered", &self.recovered)
            .finish_non_exhaustive()
    }
}

impl ProjectFile {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            current: None,
            previous: None,
            file_path: None,
            temporary: true,
            modified: false,
            recovered: false,
            was_compacted: false,
            had_unused: false,
            last_error: None,
            library_error: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The current connection.
    pub fn connection(&self) -> Result<&StoreConnection> {
        self.current.as_ref().ok_or(Error::NoConnection)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Whether the last [`compact`](Self::compact) swapped in a new file.
    pub fn was_compacted(&self) -> bool {
        self.was_compacted
    }

    /// Whether the last [`should_compact`](Self::should_compact) saw blocks
    /// that nothing references.
    pub fn had_unused(&self) -> bool {
        self.had_unused
    }

    /// Human-readable message of the last failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Storage engine text of the last failure, if it came from the engine.
    pub fn library_error(&self) -> Option<&str> {
        self.library_error.as_deref()
    }

    /// Remember `result`'s error, if any, as the last error.
    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.set_error(e);
        }
        result
    }

    pub(crate) fn set_error(&mut self, err: &Error) {
        debug!("Project file error: {err}");
        self.last_error = Some(err.to_string());
        self.library_error = err.library_message();
    }

    /// Open `path`, or the current file path, or a new scratch file.
    pub fn open_connection(&mut self, path: Option<&Path>) -> Result<()> {
        let result = self.open_connection_inner(path);
        self.record(result)
    }

    fn open_connection_inner(&mut self, path: Option<&Path>) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let (path, temporary) = match path.or(self.file_path.as_deref()) {
            Some(path) => (path.to_owned(), self.config.is_temporary_path(path)),
            None => (self.scratch_path()?, true),
        };

        let conn = StoreConnection::open(&path, &self.config)?;
        self.current = Some(conn);
        self.temporary = temporary;
        self.file_path = Some(path);
        Ok(())
    }

    /// Reserve a new, uniquely named file in the scratch directory.
    fn scratch_path(&self) -> Result<PathBuf> {
        let dir = &self.config.temp_dir;
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;
        let (_, path) = tempfile::Builder::new()
            .prefix("untitled-")
            .suffix(&format!(".{}", self.config.file_extension))
            .tempfile_in(dir)
            .map_err(|e| Error::io(format!("Failed to create a project file in {}", dir.display()), e))?
            .keep()
            .map_err(|e| Error::io("Failed to keep scratch project file", e.error))?;
        Ok(path)
    }

    /// Close the current connection and forget the file path.
    ///
    /// When closing fails the connection stays current.
    pub fn close_connection(&mut self) -> Result<()> {
        let Some(conn) = self.current.take() else {
            return Err(Error::NoConnection);
        };
        match conn.close() {
            Ok(()) => {
                self.file_path = None;
                Ok(())
            }
            Err((conn, e)) => {
                self.current = Some(conn);
                self.set_error(&e);
                Err(e)
            }
        }
    }

    /// Move the current connection aside, keeping it open, so another file
    /// can be opened.
    pub fn save_connection(&mut self) {
        self.discard_connection();
        self.previous = Some(SavedConnection {
            conn: self.current.take(),
            path: self.file_path.take(),
            temporary: self.temporary,
        });
    }

    /// Close the set-aside connection, deleting its file if it was a
    /// scratch file.
    pub fn discard_connection(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        if let Some(conn) = previous.conn
            && let Err((_, e)) = conn.close()
        {
            warn!("Failed to discard connection: {e}");
            self.set_error(&e);
        }
        if previous.temporary
            && let Some(path) = previous.path
        {
            self.remove_scratch_file(&path);
        }
    }

    /// Close the current connection and switch back to the set-aside one.
    pub fn restore_connection(&mut self) {
        if let Some(conn) = self.current.take()
            && let Err((_, e)) = conn.close()
        {
            warn!("Failed to restore connection: {e}");
            self.set_error(&e);
        }
        let previous = self.previous.take().unwrap_or(SavedConnection {
            conn: None,
            path: None,
            temporary: true,
        });
        self.current = previous.conn;
        self.file_path = previous.path;
        self.temporary = previous.temporary;
    }

    /// Adopt a connection opened elsewhere.
    pub fn use_connection(&mut self, conn: StoreConnection, path: &Path) -> Result<()> {
        if self.current.is_some() {
            return self.record(Err(Error::AlreadyOpen));
        }
        self.current = Some(conn);
        self.file_path = Some(path.to_owned());
        Ok(())
    }

    /// Delete `path` if it lives in the scratch directory.
    fn remove_scratch_file(&self, path: &Path) {
        if !self.config.is_temporary_path(path) {
            return;
        }
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed scratch project file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", path.display()),
        }
    }

    pub fn savepoint_start(&mut self, name: &str) -> Result<()> {
        let result = self.connection().and_then(|c| c.savepoint_start(name));
        self.record(result)
    }

    pub fn savepoint_release(&mut self, name: &str) -> Result<()> {
        let result = self.connection().and_then(|c| c.savepoint_release(name));
        self.record(result)
    }

    pub fn savepoint_rollback(&mut self, name: &str) -> Result<()> {
        let result = self.connection().and_then(|c| c.savepoint_rollback(name));
        self.record(result)
    }

    /// Savepoint on the current connection that commits when dropped.
    pub fn auto_commit(&self, name: &str) -> Result<AutoCommitSavepoint<'_>> {
        AutoCommitSavepoint::begin(self.connection()?, name)
    }

    pub fn write_document(&mut self, slot: DocumentSlot, blob: &DocumentBlob) -> Result<()> {
        let result = self.connection().and_then(|c| c.write_document(slot, blob));
        self.record(result)
    }

    pub fn read_document(&mut self, slot: DocumentSlot) -> Result<DocumentBlob> {
        let result = self.connection().and_then(|c| c.read_document(slot));
        self.record(result)
    }

    /// Write the autosave document and mark the project modified.
    pub fn autosave(&mut self, blob: &DocumentBlob) -> Result<()> {
        self.write_document(DocumentSlot::Autosave, blob)?;
        self.modified = true;
        Ok(())
    }

    /// Remove the autosave document and clear the modified flag.
    pub fn delete_autosave(&mut self) -> Result<()> {
        let result = self.connection().and_then(|c| c.delete_autosave());
        self.record(result)?;
        self.modified = false;
        Ok(())
    }

    /// Bulk delete by set membership; see [`StoreConnection::delete_blocks`].
    ///
    /// Removing any rows marks the project recovered.
    pub fn delete_blocks(&mut self, ids: &BlockIdSet, complement: bool) -> Result<usize> {
        let result = self
            .connection()
            .and_then(|c| c.delete_blocks(ids, complement));
        let deleted = self.record(result)?;
        if deleted > 0 {
            self.recovered = true;
        }
        Ok(deleted)
    }

    pub fn delete_block(&mut self, id: SampleBlockId) -> Result<bool> {
        let result = self.connection().and_then(|c| c.delete_block(id));
        self.record(result)
    }

    pub fn total_usage(&mut self) -> Result<u64> {
        let result = self.connection().and_then(|c| c.total_usage());
        self.record(result)
    }

    pub fn block_usage(&mut self, id: SampleBlockId) -> Result<u64> {
        let result = self.connection().and_then(|c| c.block_usage(id));
        self.record(result)
    }

    /// Payload bytes of `ids`; `keep_going` is consulted before each row.
    pub fn live_usage<F>(&mut self, ids: &BlockIdSet, keep_going: F) -> Result<u64>
    where
        F: FnMut() -> bool,
    {
        let result = self
            .connection()
            .and_then(|c| c.live_usage_with(ids, keep_going));
        self.record(result)
    }

    /// Decide whether single-block deletes can be skipped during teardown.
    ///
    /// Bypass stays off for a permanent file that was not just compacted and
    /// still has unused blocks: skipping the deletes there would leave rows
    /// the next load cannot tell apart from undo history.
    pub fn set_bypass(&mut self) {
        let Some(conn) = &self.current else {
            return;
        };
        let keep_deleting = !self.temporary && !self.was_compacted && self.had_unused;
        conn.set_bypass(!keep_deleting);
        debug!(bypass = !keep_deleting, "Set delete bypass");
    }

    /// Free bytes on the volume holding the project file.
    pub fn free_disk_space(&self) -> Option<u64> {
        let path = self.file_path.as_deref()?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        match nix::sys::statvfs::statvfs(dir) {
            Ok(stat) => Some(stat.blocks_available() as u64 * stat.fragment_size() as u64),
            Err(e) => {
                warn!("Failed to query free space of {}: {e}", dir.display());
                None
            }
        }
    }

    /// Open a new scratch project.
    pub fn open_project(&mut self) -> Result<()> {
        self.open_connection(None)
    }

    /// Close the project, deleting its file if it is a scratch file.
    ///
    /// A failed close is logged; the file is then kept for recovery.
    pub fn close_project(&mut self) {
        if self.current.is_none() {
            return;
        }
        let path = self.file_path.clone();
        match self.close_connection() {
            Ok(()) => {
                if self.temporary
                    && let Some(path) = path
                {
                    self.remove_scratch_file(&path);
                }
            }
            Err(e) => warn!("Failed to close project: {e}"),
        }
    }

    /// Close and reopen the current file.
    pub fn reopen_project(&mut self) -> Result<()> {
        let path = self.file_path.clone();
        self.close_connection()?;
        self.open_connection(path.as_deref())
    }

    /// Forget the modified and recovered state and the file path.
    pub fn reset(&mut self) {
        if self.current.is_some() {
            warn!("Resetting project with an open project file");
        }
        self.modified = false;
        self.recovered = false;
        self.file_path = None;
    }

    /// Open the project file at `path`, dropping orphan blocks.
    ///
    /// The autosave document wins over the saved one. Returns the loaded
    /// document, or `None` when the file has neither (a crash before the
    /// first autosave). On failure the previous connection is restored.
    pub fn load_project(&mut self, path: &Path) -> Result<Option<DocumentNode>> {
        self.save_connection();
        match self.load_project_inner(path) {
            Ok(document) => {
                self.discard_connection();
                Ok(document)
            }
            Err(e) => {
                self.set_error(&e);
                self.restore_connection();
                Err(e)
            }
        }
    }

    fn load_project_inner(&mut self, path: &Path) -> Result<Option<DocumentNode>> {
        self.open_connection(Some(path))?;
        let conn = self.connection()?;

        let mut used_autosave = true;
        let mut blob = conn.read_document(DocumentSlot::Autosave)?;
        if blob.is_empty() {
            used_autosave = false;
            blob = conn.read_document(DocumentSlot::Project)?;
        }

        let (document, orphans) = if blob.is_empty() {
            (None, 0)
        } else {
            let document = DocumentNode::decode(&blob)?;
            let ids = document.block_ids();
            let orphans = if ids.is_empty() {
                0
            } else {
                conn.delete_blocks(&ids, true)?
            };
            (Some(document), orphans)
        };
        let temporary = !conn.has_saved_document()?;

        if orphans > 0 {
            info!("Removed {orphans} orphan blocks from {}", path.display());
        }
        if document.is_none() || orphans > 0 || used_autosave {
            self.recovered = true;
        }
        if self.recovered {
            self.modified = true;
        }
        self.temporary = temporary;
        Ok(document)
    }

    /// Save the project as `path`.
    ///
    /// Saving in place writes the saved document and drops the autosave.
    /// Saving to a new path copies the whole file (undo history included),
    /// opens the copy on a worker while `progress` is polled, compacts the
    /// old file down to `last_saved` (the document of the previous save and
    /// the blocks it references), closes it and switches to the copy. Without
    /// a previous save the old file keeps an empty project. A scratch project
    /// is renamed to `path` first when possible.
    pub fn save_project<P>(
        &mut self,
        path: &Path,
        doc: &DocumentBlob,
        last_saved: Option<(&DocumentBlob, &LiveBlocks)>,
        mut progress: P,
    ) -> Result<()>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        if self.temporary && self.file_path.as_deref() != Some(path) {
            self.rename_scratch(path);
        }

        if self.file_path.as_deref() != Some(path) {
            // The old file must keep a document matching the blocks it keeps
            let (old_doc, old_live) = match last_saved {
                Some((saved_doc, saved_live)) => (saved_doc.clone(), saved_live.clone()),
                None => (empty_document()?, LiveBlocks::default()),
            };
            let all = {
                let result = self.connection().and_then(|c| c.block_ids());
                self.record(result)?
            };
            self.copy_to(path, &all, doc, DocumentSlot::Project, &mut progress)?;

            let opened = PendingOpen::spawn(path, &self.config)
                .and_then(|pending| pending.wait(|| progress(0, 0)));
            let new_conn = match opened {
                Ok(conn) => conn,
                Err(e) => {
                    self.set_error(&e);
                    return Err(e);
                }
            };

            if let Err(e) = self.delete_autosave() {
                warn!("Failed to drop autosave of the original project: {e}");
            }
            if let Err(e) = self.compact(Some(&old_live), &old_doc, false, &mut progress) {
                warn!("Failed to compact the original project: {e}");
            }
            self.close_project();
            self.use_connection(new_conn, path)?;
        } else {
            self.write_document(DocumentSlot::Project, doc)?;
            self.delete_autosave()?;
        }

        self.modified = false;
        self.recovered = false;
        self.temporary = false;
        info!("Saved project to {}", path.display());
        Ok(())
    }

    /// Move a scratch file to `path` instead of copying it. Leaves the
    /// project on its scratch file when that is not possible.
    fn rename_scratch(&mut self, path: &Path) {
        let Some(scratch) = self.file_path.clone() else {
            return;
        };
        if self.close_connection().is_err() {
            return;
        }
        match fs::rename(&scratch, path) {
            Ok(()) => {
                if self.open_connection(Some(path)).is_err() {
                    if let Err(e) = fs::rename(path, &scratch) {
                        warn!("Failed to move {} back: {e}", path.display());
                    }
                    if let Err(e) = self.open_connection(Some(&scratch)) {
                        warn!("Failed to reopen {}: {e}", scratch.display());
                    }
                }
            }
            Err(e) => {
                debug!("Cannot rename {} to {}: {e}", scratch.display(), path.display());
                if let Err(e) = self.open_connection(Some(&scratch)) {
                    warn!("Failed to reopen {}: {e}", scratch.display());
                }
            }
        }
    }

    /// Write a copy of the project holding only `live` blocks to `path`;
    /// the current connection is unaffected.
    pub fn save_copy<P>(
        &mut self,
        path: &Path,
        doc: &DocumentBlob,
        live: &BlockIdSet,
        progress: P,
    ) -> Result<()>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        self.copy_to(path, live, doc, DocumentSlot::Project, progress)
    }
}

/// Root element of a project document.
const PROJECT_ROOT: &str = "project";

/// A project document with no tracks.
fn empty_document() -> Result<DocumentBlob> {
    Ok(DocumentNode::new(PROJECT_ROOT).encode()?)
}

impl Drop for ProjectFile {
    fn drop(&mut self) {
        self.discard_connection();
    }
}
