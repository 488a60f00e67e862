// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Test utilities for Sonora.
//!
//! This crate provides fixtures and proptest strategies for testing the
//! project store.

use std::path::{Path, PathBuf};

use proptest::prelude::*;
use sonora_store_db::{
    BlockIdSet, DocumentNode, SampleBlockData, SampleBlockId, SampleFormat, StoreConfig,
    StoreConnection,
};
use tempfile::TempDir;

/// A wrapper around TempDir that provides a canonicalized path.
/// This resolves symlinks like /var -> /private/var on macOS, so paths
/// compare equal to the ones the store reports.
pub struct CanonicalTempDir {
    _inner: TempDir,
    path: PathBuf,
}

impl CanonicalTempDir {
    /// Create a new temporary directory with a canonicalized path.
    pub fn new() -> std::io::Result<Self> {
        let inner = TempDir::new()?;
        let path = inner.path().canonicalize()?;
        Ok(Self {
            _inner: inner,
            path,
        })
    }

    /// Get the canonicalized path to the temporary directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A store configuration whose scratch directory lives in here.
    pub fn config(&self) -> StoreConfig {
        StoreConfig {
            temp_dir: self.path.join("scratch"),
            ..StoreConfig::default()
        }
    }

    /// Open (creating) `name` inside the directory.
    pub fn open(&self, name: &str) -> StoreConnection {
        StoreConnection::open(self.path.join(name), &self.config())
            .unwrap_or_else(|e| panic!("failed to open {name}: {e}"))
    }
}

/// A float block of `samples` bytes with empty summaries and fractional
/// summary values, so every real column takes eight bytes.
pub fn block_data(samples: usize) -> SampleBlockData {
    SampleBlockData {
        sample_format: SampleFormat::Float,
        sum_min: -0.25,
        sum_max: 0.25,
        sum_rms: 0.125,
        summary256: Vec::new(),
        summary64k: Vec::new(),
        samples: (0..samples).map(|i| (i % 251) as u8).collect(),
    }
}

/// A block whose record size is exactly `size` bytes.
///
/// Panics when no sample length produces that size (sizes below 36, and
/// the one size skipped where the blob's serial type grows a byte).
pub fn block_with_record_size(size: u64) -> SampleBlockData {
    let upper = size as usize;
    (upper.saturating_sub(48)..=upper)
        .map(block_data)
        .find(|block| block.record_size() == size)
        .unwrap_or_else(|| panic!("no block has a record size of {size}"))
}

/// Insert one block per entry of `sizes`, returning the new ids.
pub fn insert_sized(conn: &StoreConnection, sizes: &[u64]) -> Vec<SampleBlockId> {
    sizes
        .iter()
        .map(|size| {
            conn.insert_block(&block_with_record_size(*size))
                .unwrap_or_else(|e| panic!("failed to insert block: {e}"))
        })
        .collect()
}

/// A small project document with one wave track per group of block ids.
pub fn project_document(tracks: &[&[SampleBlockId]]) -> DocumentNode {
    let mut root = DocumentNode::new("project")
        .with_attribute("version", "1.3.0")
        .with_attribute("rate", "44100");
    for (index, ids) in tracks.iter().enumerate() {
        let mut sequence = DocumentNode::new("sequence");
        for id in *ids {
            sequence = sequence.with_child(
                DocumentNode::new("waveblock")
                    .with_attribute("start", "0")
                    .with_attribute("blockid", id.to_string()),
            );
        }
        root = root.with_child(
            DocumentNode::new("wavetrack")
                .with_attribute("name", format!("Track {}", index + 1))
                .with_child(DocumentNode::new("waveclip").with_child(sequence)),
        );
    }
    root
}

pub fn arb_sample_format() -> impl Strategy<Value = SampleFormat> {
    prop_oneof![
        Just(SampleFormat::Int16),
        Just(SampleFormat::Int24),
        Just(SampleFormat::Float),
    ]
}

pub fn arb_summary_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(1.0),
        Just(-1.0),
        Just(f64::NAN),
        -1.0f64..1.0,
        (-40_000i32..40_000).prop_map(f64::from),
    ]
}

prop_compose! {
    pub fn arb_block_data()(
        sample_format in arb_sample_format(),
        sum_min in arb_summary_value(),
        sum_max in arb_summary_value(),
        sum_rms in arb_summary_value(),
        summary256 in proptest::collection::vec(any::<u8>(), 0..300),
        summary64k in proptest::collection::vec(any::<u8>(), 0..20),
        samples in proptest::collection::vec(any::<u8>(), 0..9000),
    ) -> SampleBlockData {
        SampleBlockData {
            sample_format,
            sum_min,
            sum_max,
            sum_rms,
            summary256,
            summary64k,
            samples,
        }
    }
}

/// Subset of the ids `1..=count`.
pub fn arb_id_subset(count: i64) -> impl Strategy<Value = BlockIdSet> {
    let ids: Vec<SampleBlockId> = (1..=count).collect();
    let len = ids.len();
    proptest::sample::subsequence(ids, 0..=len).prop_map(|ids| ids.into_iter().collect())
}
