// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Row types for project files.

use std::collections::BTreeSet;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use sonora_utils_btree::varint_len;

/// Sample block id. Ids are SQLite rowids and are never reused.
pub type SampleBlockId = i64;

/// Ordered set of sample block ids.
pub type BlockIdSet = BTreeSet<SampleBlockId>;

/// Storage format of the samples in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Int16,
    Int24,
    Float,
}

impl SampleFormat {
    /// Value stored in the `sampleformat` column.
    pub const fn code(self) -> i64 {
        match self {
            Self::Int16 => 0x0002_0001,
            Self::Int24 => 0x0004_0001,
            Self::Float => 0x0004_000F,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0x0002_0001 => Some(Self::Int16),
            0x0004_0001 => Some(Self::Int24),
            0x0004_000F => Some(Self::Float),
            _ => None,
        }
    }

    /// Bytes per sample in the `samples` blob.
    pub const fn sample_size(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 | Self::Float => 4,
        }
    }
}

impl ToSql for SampleFormat {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for SampleFormat {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_i64()?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

/// Contents of one `sampleblocks` row, minus its id.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlockData {
    pub sample_format: SampleFormat,
    pub sum_min: f64,
    pub sum_max: f64,
    pub sum_rms: f64,
    pub summary256: Vec<u8>,
    pub summary64k: Vec<u8>,
    pub samples: Vec<u8>,
}

impl SampleBlockData {
    pub fn sample_count(&self) -> usize {
        self.samples.len() / self.sample_format.sample_size()
    }

    /// Size of this row's record in the table b-tree.
    ///
    /// This is the payload-size varint of the row's leaf cell: the record
    /// header plus the column bodies. The rowid alias column is stored as
    /// NULL, whole-valued reals are stored as integers and NaN as NULL.
    pub fn record_size(&self) -> u64 {
        let columns = [
            SerialType::NULL,
            SerialType::integer(self.sample_format.code()),
            SerialType::real(self.sum_min),
            SerialType::real(self.sum_max),
            SerialType::real(self.sum_rms),
            SerialType::blob(self.summary256.len()),
            SerialType::blob(self.summary64k.len()),
            SerialType::blob(self.samples.len()),
        ];

        let types_len: u64 = columns.iter().map(|c| varint_len(c.code) as u64).sum();
        let header_len = if types_len <= 126 {
            types_len + 1
        } else {
            let len = varint_len(types_len) as u64;
            let total = types_len + len;
            if (len as usize) < varint_len(total) {
                total + 1
            } else {
                total
            }
        };

        header_len + columns.iter().map(|c| c.body_len).sum::<u64>()
    }
}

#[derive(Debug, Clone, Copy)]
struct SerialType {
    code: u64,
    body_len: u64,
}

impl SerialType {
    const NULL: Self = Self {
        code: 0,
        body_len: 0,
    };
    const REAL: Self = Self {
        code: 7,
        body_len: 8,
    };

    fn integer(value: i64) -> Self {
        let magnitude = (if value < 0 { !value } else { value }) as u64;
        let (code, body_len) = match magnitude {
            0 if value == 0 => (8, 0),
            1 if value == 1 => (9, 0),
            0..=127 => (1, 1),
            128..=32_767 => (2, 2),
            32_768..=8_388_607 => (3, 3),
            8_388_608..=2_147_483_647 => (4, 4),
            2_147_483_648..=0x7FFF_FFFF_FFFF => (5, 6),
            _ => (6, 8),
        };
        Self { code, body_len }
    }

    fn real(value: f64) -> Self {
        if value.is_nan() {
            return Self::NULL;
        }
        let whole = value as i64;
        if whole as f64 == value && whole > i64::MIN && whole < i64::MAX {
            let int = Self::integer(whole);
            // An integer that needs all 8 bytes is kept as a real
            if int.body_len == 8 { Self::REAL } else { int }
        } else {
            Self::REAL
        }
    }

    fn blob(len: usize) -> Self {
        Self {
            code: len as u64 * 2 + 12,
            body_len: len as u64,
        }
    }
}

/// A stored sample block.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub id: SampleBlockId,
    pub data: SampleBlockData,
}

/// Serialized project document: the name dictionary and the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentBlob {
    pub dict: Vec<u8>,
    pub doc: Vec<u8>,
}

impl DocumentBlob {
    pub fn new(dict: Vec<u8>, doc: Vec<u8>) -> Self {
        Self { dict, doc }
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty() || self.doc.is_empty()
    }
}

/// Which document row to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentSlot {
    /// Written by an explicit save
    Project,
    /// Written periodically between saves
    Autosave,
}

impl DocumentSlot {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Autosave => "autosave",
        }
    }
}

/// The blocks the caller still references, with their combined size in
/// the same units as [`StoreConnection::total_usage`](crate::StoreConnection::total_usage).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveBlocks {
    pub ids: BlockIdSet,
    pub bytes: u64,
}

impl LiveBlocks {
    pub fn new(ids: BlockIdSet, bytes: u64) -> Self {
        Self { ids, bytes }
    }
}

/// Answer from a progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Cancel,
}

impl Progress {
    pub fn is_cancel(self) -> bool {
        self == Self::Cancel
    }
}
