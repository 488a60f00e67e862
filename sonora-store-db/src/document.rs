// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! The saved and autosave document slots.

use rusqlite::params;
use tracing::debug;

use crate::connection::StoreConnection;
use crate::error::{DbContext, Result};
use crate::types::{DocumentBlob, DocumentSlot};

/// Both slots hold at most one row, always with this id.
const DOCUMENT_ROW: i64 = 1;

impl StoreConnection {
    /// Insert or overwrite the document in `slot` in one statement.
    pub fn write_document(&self, slot: DocumentSlot, blob: &DocumentBlob) -> Result<()> {
        self.write_document_in("main", slot, blob)
    }

    pub(crate) fn write_document_in(
        &self,
        schema: &str,
        slot: DocumentSlot,
        blob: &DocumentBlob,
    ) -> Result<()> {
        let table = slot.table();
        // Not cached: `schema` may name an attachment that is detached later
        self.conn
            .execute(
                &format!(
                    r#"
                    INSERT INTO {schema}.{table} (id, dict, doc) VALUES (?1, ?2, ?3)
                    ON CONFLICT (id) DO UPDATE SET dict = excluded.dict, doc = excluded.doc
                    "#
                ),
                params![DOCUMENT_ROW, blob.dict, blob.doc],
            )
            .db_context(|| format!("Failed to write {table} document"))?;
        debug!(schema, table, bytes = blob.doc.len(), "Wrote document");
        Ok(())
    }

    /// Read the document in `slot`; an absent row yields an empty blob.
    pub fn read_document(&self, slot: DocumentSlot) -> Result<DocumentBlob> {
        self.read_document_in("main", slot)
    }

    pub(crate) fn read_document_in(&self, schema: &str, slot: DocumentSlot) -> Result<DocumentBlob> {
        let table = slot.table();
        let blob = self.conn.query_row(
            &format!("SELECT dict, doc FROM {schema}.{table} WHERE id = ?1"),
            params![DOCUMENT_ROW],
            |row| {
                Ok(DocumentBlob {
                    dict: row.get::<_, Option<Vec<u8>>>(0)?.unwrap_or_default(),
                    doc: row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
                })
            },
        );

        match blob {
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(DocumentBlob::default()),
            other => other.db_context(|| format!("Failed to read {table} document")),
        }
    }

    /// Remove the autosave row.
    pub fn delete_autosave(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM main.autosave", [])
            .db_context(|| "Failed to delete autosave document".to_string())?;
        Ok(())
    }

    /// Whether an explicit save has ever written the project slot.
    pub fn has_saved_document(&self) -> Result<bool> {
        let rows: i64 = self
            .conn
            .query_row("SELECT count(*) FROM main.project", [], |row| row.get(0))
            .db_context(|| "Failed to count saved documents".to_string())?;
        Ok(rows == 1)
    }
}
