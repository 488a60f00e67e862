// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Connection to one project file.

use std::cell::{Cell, OnceCell};
use std::fs::File;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{DbContext, Error, Result};

/// An open project file.
///
/// Opening validates the schema stamps (installing the schema into a new
/// file) before the connection is handed out.
pub struct StoreConnection {
    pub(crate) conn: Connection,
    path: PathBuf,
    bypass: Cell<bool>,
    // Raw reads for the usage walker. Closing a descriptor drops every POSIX
    // lock the process holds on the file, so this must outlive `conn`.
    pub(crate) page_file: OnceCell<File>,
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("path", &self.path)
            .field("bypass", &self.bypass.get())
            .finish_non_exhaustive()
    }
}

impl StoreConnection {
    /// Open or create the project file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| Error::OpenFailed {
            path: path.to_owned(),
            source: e,
        })?;
        let db = Self {
            conn,
            path: path.to_owned(),
            bypass: Cell::new(false),
            page_file: OnceCell::new(),
        };

        let opened = db
            .check_version()
            .and_then(|status| db.configure_pragmas(config).map(|()| status));
        let status = opened.map_err(|e| match e {
            Error::Sqlite(source) | Error::Statement { source, .. } => Error::OpenFailed {
                path: path.to_owned(),
                source,
            },
            other => other,
        })?;

        debug!("Opened project file at {} ({:?})", path.display(), status);
        Ok(db)
    }

    /// Configure SQLite pragmas for a single-writer project file.
    fn configure_pragmas(&self, config: &StoreConfig) -> Result<()> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .db_context(|| "Failed to enable write-ahead logging".to_string())?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("Project file {} stays in {mode} journal mode", self.path.display());
        }
        self.conn
            .execute_batch(
                r#"
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                "#,
            )
            .db_context(|| "Failed to configure connection".to_string())?;
        self.conn
            .pragma_update(None, "wal_autocheckpoint", config.wal_autocheckpoint)
            .db_context(|| "Failed to set WAL checkpoint interval".to_string())?;
        Ok(())
    }

    /// Close the connection.
    ///
    /// On failure the still-open connection is handed back with the error.
    pub fn close(self) -> std::result::Result<(), (Self, Error)> {
        let Self {
            conn,
            path,
            bypass,
            page_file,
        } = self;
        match conn.close() {
            Ok(()) => {
                debug!("Closed project file at {}", path.display());
                drop(page_file);
                Ok(())
            }
            Err((conn, source)) => {
                let err = Error::Statement {
                    context: format!("Failed to close project file at {}", path.display()),
                    source,
                };
                Err((
                    Self {
                        conn,
                        path,
                        bypass,
                        page_file,
                    },
                    err,
                ))
            }
        }
    }

    /// Path of the main database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get raw connection (for advanced usage).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Suppress single-block deletes; see [`ProjectFile::set_bypass`](crate::ProjectFile::set_bypass).
    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.set(bypass);
    }

    pub fn should_bypass(&self) -> bool {
        self.bypass.get()
    }

    /// Whether no transaction or savepoint is open.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaRejection;
    use crate::schema::{APPLICATION_ID, PAGE_SIZE, SCHEMA_VERSION, SchemaStatus};

    fn config() -> StoreConfig {
        StoreConfig::default()
    }

    #[test]
    fn test_new_file_gets_schema_and_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.sonora");
        let db = StoreConnection::open(&path, &config()).unwrap();

        let page_size: i64 = db
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap();
        assert_eq!(page_size as usize, PAGE_SIZE);

        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");

        assert_eq!(db.check_version().unwrap(), SchemaStatus::Current);
    }

    #[test]
    fn test_reopen_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.sonora");
        StoreConnection::open(&path, &config())
            .unwrap()
            .close()
            .map_err(|(_, e)| e)
            .unwrap();

        let db = StoreConnection::open(&path, &config()).unwrap();
        assert_eq!(db.path(), path);
        assert!(db.is_autocommit());
    }

    #[test]
    fn test_foreign_database_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t(x); PRAGMA application_id = 42;")
                .unwrap();
        }

        let err = StoreConnection::open(&path, &config()).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaRejected(SchemaRejection::NotOurFormat { found: 42 })
        ));
    }

    #[test]
    fn test_older_version_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.sonora");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(&format!(
                "CREATE TABLE t(x); PRAGMA application_id = {APPLICATION_ID}; PRAGMA user_version = 0;"
            ))
            .unwrap();
        }

        let db = StoreConnection::open(&path, &config()).unwrap();
        let version: i32 = db
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.sonora");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        let err = StoreConnection::open(&path, &config()).unwrap_err();
        assert!(matches!(err, Error::OpenFailed { .. }), "{err}");
    }

    #[test]
    fn test_bypass_flag() {
        let dir = tempfile::tempdir().unwrap();
        let db = StoreConnection::open(dir.path().join("b.sonora"), &config()).unwrap();
        assert!(!db.should_bypass());
        db.set_bypass(true);
        assert!(db.should_bypass());
    }
}
