// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Error types for project file operations.

use std::path::PathBuf;

use sonora_utils_btree::BtreeError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::serializer::DocumentError;

/// Result type for project file operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while working with a project file.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error without further context
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The file could not be opened as a store
    #[error("Failed to open project file at '{path}': {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A single statement failed; the connection stays usable
    #[error("{context}: {source}")]
    Statement {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The file is not ours or is too new to touch
    #[error("{0}")]
    SchemaRejected(#[from] SchemaRejection),

    /// Copying block rows during compaction or import failed
    #[error("{context}")]
    CopyFailed {
        context: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// The caller asked a long-running operation to stop
    #[error("Operation cancelled")]
    Cancelled,

    /// Filesystem error with context
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Walking the block table pages failed
    #[error("Failed to walk sample block pages: {0}")]
    Btree(BtreeError),

    /// Disk usage cannot be computed right now
    #[error("Disk usage unavailable: {reason}")]
    UsageUnavailable { reason: String },

    /// The project document could not be decoded
    #[error("Invalid project document: {0}")]
    Document(#[from] DocumentError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Neither the saved nor the autosave document exists
    #[error("Unable to load project or autosave documents")]
    NoDocument,

    /// No connection is open
    #[error("The project file is not open")]
    NoConnection,

    /// A connection is already open where none was expected
    #[error("The project file already has an open connection")]
    AlreadyOpen,

    /// Savepoint names become part of SQL text and are restricted
    #[error("Invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),

    /// A savepoint guard was used after it finished
    #[error("Savepoint misuse: {0}")]
    SavepointMisuse(&'static str),
}

impl From<BtreeError> for Error {
    fn from(err: BtreeError) -> Self {
        match err {
            BtreeError::Cancelled => Self::Cancelled,
            other => Self::Btree(other),
        }
    }
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn copy_failed(context: impl Into<String>, source: Option<rusqlite::Error>) -> Self {
        Self::CopyFailed {
            context: context.into(),
            source,
        }
    }

    /// Text reported by the storage engine, if the error came from it.
    pub fn library_message(&self) -> Option<String> {
        match self {
            Self::Sqlite(e) | Self::OpenFailed { source: e, .. } | Self::Statement { source: e, .. } => {
                Some(e.to_string())
            }
            Self::CopyFailed {
                source: Some(e), ..
            } => Some(e.to_string()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Why the version gate refused a file.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRejection {
    #[error("This is not a Sonora project file (application id {found:#010x})")]
    NotOurFormat { found: i32 },

    #[error(
        "This project was created with a newer version (schema {found}, this build supports {supported}); upgrade to open it"
    )]
    TooNew { found: i32, supported: i32 },
}

/// Helper trait for adding context to SQLite errors.
pub trait DbContext<T> {
    fn db_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> DbContext<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::Statement {
            context: f(),
            source,
        })
    }
}
