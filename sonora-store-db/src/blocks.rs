// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! The append-only sample block table.

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::connection::StoreConnection;
use crate::error::{DbContext, Result};
use crate::types::{BlockIdSet, SampleBlock, SampleBlockData, SampleBlockId};

const INSET: &str = "inset";

/// `inset(id)` registered on a connection for the lifetime of the guard.
///
/// The function answers whether `id` is a member of the set it was
/// registered with, so one statement can test every row against the set.
struct InSetFunction<'c> {
    conn: &'c Connection,
}

impl<'c> InSetFunction<'c> {
    fn register(conn: &'c Connection, ids: BlockIdSet) -> Result<Self> {
        conn.create_scalar_function(
            INSET,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| {
                let id: SampleBlockId = ctx.get(0)?;
                Ok(ids.contains(&id))
            },
        )
        .db_context(|| "Unable to add 'inset' function".to_string())?;
        Ok(Self { conn })
    }
}

impl Drop for InSetFunction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.remove_function(INSET, 1) {
            warn!("Failed to remove 'inset' function: {e}");
        }
    }
}

impl StoreConnection {
    /// Append a block and return its newly assigned id.
    pub fn insert_block(&self, data: &SampleBlockData) -> Result<SampleBlockId> {
        let mut stmt = self
            .conn
            .prepare_cached(
                r#"
                INSERT INTO main.sampleblocks
                    (sampleformat, summin, summax, sumrms, summary256, summary64k, samples)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .db_context(|| "Failed to prepare sample block insert".to_string())?;
        stmt.execute(params![
            data.sample_format,
            data.sum_min,
            data.sum_max,
            data.sum_rms,
            data.summary256,
            data.summary64k,
            data.samples,
        ])
        .db_context(|| "Failed to insert sample block".to_string())?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Read one block; `None` if no row has that id.
    pub fn read_block(&self, id: SampleBlockId) -> Result<Option<SampleBlock>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                r#"
                SELECT sampleformat, summin, summax, sumrms, summary256, summary64k, samples
                FROM main.sampleblocks
                WHERE blockid = ?1
                "#,
            )
            .db_context(|| "Failed to prepare sample block read".to_string())?;

        let block = stmt.query_row(params![id], |row| {
            let real = |idx: usize| -> rusqlite::Result<f64> {
                Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN))
            };
            let blob = |idx: usize| -> rusqlite::Result<Vec<u8>> {
                Ok(row.get::<_, Option<Vec<u8>>>(idx)?.unwrap_or_default())
            };
            Ok(SampleBlock {
                id,
                data: SampleBlockData {
                    sample_format: row.get(0)?,
                    sum_min: real(1)?,
                    sum_max: real(2)?,
                    sum_rms: real(3)?,
                    summary256: blob(4)?,
                    summary64k: blob(5)?,
                    samples: blob(6)?,
                },
            })
        });

        match block {
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            other => other
                .map(Some)
                .db_context(|| format!("Failed to read sample block {id}")),
        }
    }

    /// Every block id in the table.
    pub fn block_ids(&self) -> Result<BlockIdSet> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT blockid FROM main.sampleblocks")
            .db_context(|| "Failed to prepare block id query".to_string())?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<BlockIdSet>>())
            .db_context(|| "Failed to list sample blocks".to_string())?;
        Ok(ids)
    }

    pub fn block_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM main.sampleblocks", [], |row| {
                row.get(0)
            })
            .db_context(|| "Failed to count sample blocks".to_string())?;
        Ok(count as u64)
    }

    /// Delete a single block unless bypass is on.
    ///
    /// Returns whether a row was removed.
    pub fn delete_block(&self, id: SampleBlockId) -> Result<bool> {
        if self.should_bypass() {
            return Ok(false);
        }
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM main.sampleblocks WHERE blockid = ?1")
            .db_context(|| "Failed to prepare sample block delete".to_string())?;
        let deleted = stmt
            .execute(params![id])
            .db_context(|| format!("Failed to delete sample block {id}"))?;
        Ok(deleted > 0)
    }

    /// Delete the blocks whose ids are in `ids`, or with `complement`, the
    /// blocks whose ids are not. Returns the number of rows removed.
    pub fn delete_blocks(&self, ids: &BlockIdSet, complement: bool) -> Result<usize> {
        let _inset = InSetFunction::register(&self.conn, ids.clone())?;

        let sql = if complement {
            "DELETE FROM main.sampleblocks WHERE NOT inset(blockid)"
        } else {
            "DELETE FROM main.sampleblocks WHERE inset(blockid)"
        };
        // Not cached: a cached statement would pin the function
        let deleted = self
            .conn
            .execute(sql, [])
            .db_context(|| "Failed to delete blocks".to_string())?;

        debug!(deleted, complement, set_len = ids.len(), "Deleted sample blocks");
        Ok(deleted)
    }
}
