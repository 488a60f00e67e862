// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Importing another project file's tracks into the current one.

use std::collections::BTreeMap;
use std::path::Path;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use rusqlite::params;
use tracing::{debug, info, warn};

use crate::connection::StoreConnection;
use crate::error::{DbContext, Error, Result};
use crate::project::ProjectFile;
use crate::serializer::DocumentNode;
use crate::transaction::AutoCommitSavepoint;
use crate::types::{DocumentSlot, Progress, SampleBlockId};

/// Root attributes that survive an import unchanged.
const VERSION_ATTRIBUTES: &[&str] = &["version", "sonoraversion"];
/// Suffix given to every other root attribute so it is ignored on load.
const DELETED_SUFFIX: &str = "_deleted";

const WAVE_TRACK: &str = "wavetrack";
const TIME_TRACK: &str = "timetrack";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// The current project already has a time track, so the imported one
    /// is dropped
    pub has_time_track: bool,
}

/// Result of a successful import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// The imported document with block ids rewritten to the new rows
    pub document: DocumentNode,
    /// Number of block rows copied
    pub blocks_copied: usize,
    /// Whether the imported tags were copied
    pub tags_copied: bool,
    /// Whether the imported time track was dropped
    pub time_track_dropped: bool,
}

/// Source attached read-only as `inbound` for the guard's lifetime.
struct Inbound<'c> {
    conn: &'c StoreConnection,
}

impl<'c> Inbound<'c> {
    fn attach(conn: &'c StoreConnection, source: &Path) -> Result<Self> {
        let uri = format!(
            "file:{}?immutable=1&mode=ro",
            uri_escape(&source.to_string_lossy())
        );
        conn.conn
            .execute("ATTACH DATABASE ?1 AS inbound", params![uri])
            .db_context(|| format!("Unable to attach {}", source.display()))?;
        Ok(Self { conn })
    }
}

impl Drop for Inbound<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.conn.execute_batch("DETACH DATABASE inbound;") {
            warn!("Failed to detach imported project: {e}");
        }
    }
}

/// Characters that would end or alter the path part of a URI.
const URI_PATH: &AsciiSet = &CONTROLS.add(b'%').add(b'?').add(b'#');

fn uri_escape(path: &str) -> String {
    utf8_percent_encode(path, URI_PATH).to_string()
}

/// Rename every root attribute except the version markers so the imported
/// document cannot override the current project's settings.
fn neutralize_root(root: &mut DocumentNode) {
    for (name, _) in &mut root.attributes {
        if !VERSION_ATTRIBUTES.contains(&name.as_str()) {
            name.push_str(DELETED_SUFFIX);
        }
    }
}

impl StoreConnection {
    /// Copy the blocks referenced by the project at `source` into this
    /// file, returning its document rewritten to the new block ids.
    ///
    /// All block copies happen in one savepoint; a failed copy or a
    /// cancellation from `progress` rolls them all back. Tags are copied
    /// afterwards on a best-effort basis.
    pub fn import_from<P>(
        &self,
        source: &Path,
        options: ImportOptions,
        mut progress: P,
    ) -> Result<ImportOutcome>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        let _inbound = Inbound::attach(self, source)?;
        self.validated_version("inbound")?;

        let mut blob = self.read_document_in("inbound", DocumentSlot::Autosave)?;
        if blob.is_empty() {
            blob = self.read_document_in("inbound", DocumentSlot::Project)?;
        }
        if blob.is_empty() {
            return Err(Error::NoDocument);
        }

        let mut document = DocumentNode::decode(&blob)?;
        neutralize_root(&mut document);

        let mut time_track_dropped = false;
        if options.has_time_track && document.remove_child(TIME_TRACK).is_some() {
            warn!("The current project already has a time track; skipping the imported one");
            time_track_dropped = true;
        }

        let mut blocks = Vec::new();
        for track in document.children.iter_mut().filter(|c| c.name == WAVE_TRACK) {
            track.wave_blocks_mut(&mut blocks);
        }

        // Shared blocks are copied once and every reference follows
        let mut remap: BTreeMap<SampleBlockId, SampleBlockId> = BTreeMap::new();
        for block in &blocks {
            if let Some(id) = block.block_id().filter(|id| *id > 0) {
                remap.insert(id, 0);
            }
        }

        let mut savepoint = AutoCommitSavepoint::begin(self, "import")?;
        match self.copy_inbound_blocks(&mut remap, &mut progress) {
            Ok(()) => savepoint.commit()?,
            Err(e) => {
                if let Err(rollback) = savepoint.rollback() {
                    warn!("Failed to roll back import: {rollback}");
                }
                return Err(e);
            }
        }

        for block in blocks {
            if let Some(new_id) = block.block_id().and_then(|id| remap.get(&id)) {
                block.set_attribute(crate::serializer::BLOCK_ID, new_id.to_string());
            }
        }

        let tags_copied = match self
            .conn
            .execute_batch("INSERT INTO main.tags SELECT * FROM inbound.tags;")
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to import tags: {e}");
                false
            }
        };

        info!(
            blocks = remap.len(),
            "Imported project from {}",
            source.display()
        );
        Ok(ImportOutcome {
            document,
            blocks_copied: remap.len(),
            tags_copied,
            time_track_dropped,
        })
    }

    /// Copy every key of `remap` from `inbound`, storing the new id as its
    /// value.
    fn copy_inbound_blocks<P>(
        &self,
        remap: &mut BTreeMap<SampleBlockId, SampleBlockId>,
        progress: &mut P,
    ) -> Result<()>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        // Not cached: the statement names the attachment
        let mut stmt = self
            .conn
            .prepare(
                r#"
                INSERT INTO main.sampleblocks
                    (sampleformat, summin, summax, sumrms, summary256, summary64k, samples)
                SELECT sampleformat, summin, summax, sumrms, summary256, summary64k, samples
                FROM inbound.sampleblocks
                WHERE blockid = ?1
                "#,
            )
            .db_context(|| "Unable to prepare block import".to_string())?;

        let total = remap.len() as u64;
        for (done, (old, new)) in remap.iter_mut().enumerate() {
            let copied = stmt.execute(params![old]).map_err(|e| {
                Error::copy_failed(format!("Failed to import sample block {old}"), Some(e))
            })?;
            if copied != 1 {
                return Err(Error::copy_failed(
                    format!("Sample block {old} is missing from the imported project"),
                    None,
                ));
            }
            *new = self.conn.last_insert_rowid();
            if progress(done as u64 + 1, total).is_cancel() {
                return Err(Error::Cancelled);
            }
        }
        debug!(copied = total, "Copied imported sample blocks");
        Ok(())
    }
}

impl ProjectFile {
    /// Import the project at `source` into the current file; see
    /// [`StoreConnection::import_from`].
    pub fn import_project<P>(
        &mut self,
        source: &Path,
        options: ImportOptions,
        progress: P,
    ) -> Result<ImportOutcome>
    where
        P: FnMut(u64, u64) -> Progress,
    {
        let result = self
            .connection()
            .and_then(|c| c.import_from(source, options, progress));
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/tmp/a b/song.sonora", "/tmp/a b/song.sonora")]
    #[case("/tmp/what?.sonora", "/tmp/what%3F.sonora")]
    #[case("/tmp/100%#1", "/tmp/100%25%231")]
    fn test_uri_escape(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(uri_escape(path), expected);
    }

    #[test]
    fn test_neutralize_root_keeps_versions() {
        let mut root = DocumentNode::new("project")
            .with_attribute("version", "1.3.0")
            .with_attribute("rate", "44100")
            .with_attribute("sonoraversion", "0.4.0")
            .with_attribute("sel0", "1.5");
        neutralize_root(&mut root);

        let names: Vec<_> = root.attributes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["version", "rate_deleted", "sonoraversion", "sel0_deleted"]);
        assert_eq!(root.attribute("rate_deleted"), Some("44100"));
    }
}
