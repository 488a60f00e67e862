// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Project file schema and the version gate.
//!
//! Every project file is stamped with [`APPLICATION_ID`] and
//! [`SCHEMA_VERSION`] through the `application_id` and `user_version`
//! pragmas. Readers check both before trusting any table.

use tracing::{debug, info};

use crate::connection::StoreConnection;
use crate::error::{DbContext, Result, SchemaRejection};

/// Identifies a Sonora project file ("SNRA").
pub const APPLICATION_ID: i32 = i32::from_be_bytes(*b"SNRA");

/// Schema version written by this build.
pub const SCHEMA_VERSION: i32 = 1;

/// Page size of every project file. The usage walker depends on it.
pub const PAGE_SIZE: usize = sonora_utils_btree::DEFAULT_PAGE_SIZE;

/// Schema template; `<schema>` is replaced with the target database name so
/// the same text can initialize an attached destination.
const SCHEMA_TEMPLATE: &str = r#"
PRAGMA <schema>.application_id = <app_id>;
PRAGMA <schema>.user_version = <version>;

-- Saved document
create table if not exists <schema>.project (
    id    integer primary key,
    dict  blob,
    doc   blob
);

-- Document written between saves
create table if not exists <schema>.autosave (
    id    integer primary key,
    dict  blob,
    doc   blob
);

-- Reserved for project-level tags
create table if not exists <schema>.tags (
    name  text,
    value blob
);

-- Immutable audio payload rows; ids are never reused
create table if not exists <schema>.sampleblocks (
    blockid      integer primary key autoincrement,
    sampleformat integer,
    summin       real,
    summax       real,
    sumrms       real,
    summary256   blob,
    summary64k   blob,
    samples      blob
);
"#;

/// Schema SQL targeting the database named `schema` (`main`, or an
/// attachment name).
pub(crate) fn schema_sql(schema: &str) -> String {
    SCHEMA_TEMPLATE
        .replace("<schema>", schema)
        .replace("<app_id>", &APPLICATION_ID.to_string())
        .replace("<version>", &SCHEMA_VERSION.to_string())
}

/// Outcome of [`StoreConnection::check_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// The file was empty and the schema was just installed
    Installed,
    /// The file already carries this build's schema version
    Current,
    /// The file carried an older version and was brought up to date
    Upgraded { from: i32 },
}

impl StoreConnection {
    /// Install the schema into the database named `schema`.
    ///
    /// The page size is set first so it takes effect on an empty file.
    pub(crate) fn install_schema(&self, schema: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA {schema}.page_size = {PAGE_SIZE};"))
            .db_context(|| format!("Failed to set page size of {schema}"))?;
        self.conn
            .execute_batch(&schema_sql(schema))
            .db_context(|| format!("Failed to initialize schema of {schema}"))?;
        debug!(schema, "Installed project schema");
        Ok(())
    }

    /// Validate the identity and version stamps of the main database,
    /// installing the schema when the file is brand-new.
    ///
    /// Rejections happen before anything is written to the file.
    pub fn check_version(&self) -> Result<SchemaStatus> {
        let tables: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .db_context(|| "Failed to count tables".to_string())?;
        if tables == 0 {
            self.install_schema("main")?;
            return Ok(SchemaStatus::Installed);
        }

        let version = self.validated_version("main")?;
        if version < SCHEMA_VERSION {
            self.upgrade_schema(version)?;
            return Ok(SchemaStatus::Upgraded { from: version });
        }
        Ok(SchemaStatus::Current)
    }

    /// Read the identity and version stamps of `schema`, rejecting files
    /// that are not ours or are newer than this build.
    pub(crate) fn validated_version(&self, schema: &str) -> Result<i32> {
        let app_id = self.stamp(schema, "application_id")?;
        if app_id != APPLICATION_ID {
            return Err(SchemaRejection::NotOurFormat { found: app_id }.into());
        }

        let version = self.stamp(schema, "user_version")?;
        if version > SCHEMA_VERSION {
            return Err(SchemaRejection::TooNew {
                found: version,
                supported: SCHEMA_VERSION,
            }
            .into());
        }
        Ok(version)
    }

    /// Bring a file written with an older schema version up to date.
    fn upgrade_schema(&self, from: i32) -> Result<()> {
        // Version 1 is the first released schema; older stamps only need
        // the current version recorded.
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .db_context(|| format!("Failed to upgrade schema from version {from}"))?;
        info!(from, to = SCHEMA_VERSION, "Upgraded project schema");
        Ok(())
    }

    fn stamp(&self, schema: &str, pragma: &str) -> Result<i32> {
        self.conn
            .query_row(&format!("PRAGMA {schema}.{pragma}"), [], |row| row.get(0))
            .db_context(|| format!("Failed to read {pragma} of {schema}"))
    }
}
