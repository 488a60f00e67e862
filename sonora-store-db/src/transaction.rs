// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Named, nestable savepoints.
//!
//! Savepoints are addressed by name so callers can nest them across
//! function boundaries: starting "B" while "A" is open creates an inner
//! scope, and rolling back "B" only undoes what happened since "B" started.

use tracing::warn;

use crate::connection::StoreConnection;
use crate::error::{DbContext, Error, Result};

/// Names become part of the SQL text, so only identifiers are accepted.
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSavepointName(name.to_owned()))
    }
}

impl StoreConnection {
    /// Open the savepoint `name`.
    pub fn savepoint_start(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {name};"))
            .db_context(|| format!("Failed to start savepoint {name}"))
    }

    /// Commit everything since `name` started into the enclosing scope.
    pub fn savepoint_release(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.conn
            .execute_batch(&format!("RELEASE {name};"))
            .db_context(|| format!("Failed to release savepoint {name}"))
    }

    /// Undo everything since `name` started and close it.
    pub fn savepoint_rollback(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
            .db_context(|| format!("Failed to roll back savepoint {name}"))
    }
}

/// Savepoint that commits when dropped.
///
/// The commit on drop is best-effort: a failure is logged, never raised.
/// Call [`rollback`](Self::rollback) to back out, or
/// [`commit`](Self::commit) to observe the commit result.
#[must_use = "the savepoint commits as soon as the guard is dropped"]
pub struct AutoCommitSavepoint<'c> {
    conn: &'c StoreConnection,
    name: String,
    in_transaction: bool,
}

impl<'c> AutoCommitSavepoint<'c> {
    pub fn begin(conn: &'c StoreConnection, name: &str) -> Result<Self> {
        conn.savepoint_start(name)?;
        Ok(Self {
            conn,
            name: name.to_owned(),
            in_transaction: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Undo everything since the savepoint started.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::SavepointMisuse("rollback of a finished savepoint"));
        }
        self.in_transaction = false;
        self.conn.savepoint_rollback(&self.name)
    }

    /// Commit now and report the outcome.
    pub fn commit(mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::SavepointMisuse("commit of a finished savepoint"));
        }
        self.in_transaction = false;
        self.conn.savepoint_release(&self.name)
    }
}

impl Drop for AutoCommitSavepoint<'_> {
    fn drop(&mut self) {
        if self.in_transaction
            && let Err(e) = self.conn.savepoint_release(&self.name)
        {
            warn!("Implicit commit of savepoint {} failed: {e}", self.name);
        }
    }
}
