// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Tests for single-file operations: blocks, documents, the version gate
//! and usage accounting.

use std::fs;

use proptest::prelude::*;
use sonora_store_db::{
    BlockIdSet, DocumentNode, DocumentSlot, Error, SCHEMA_VERSION, SchemaRejection,
    StoreConnection,
};
use sonora_utils_test::{
    CanonicalTempDir, arb_block_data, arb_id_subset, block_data, insert_sized, project_document,
};

/// Verify the document survives a write and read through either slot.
#[test]
fn test_document_round_trip() {
    let dir = CanonicalTempDir::new().unwrap();
    let conn = dir.open("doc.sonora");

    let doc = project_document(&[&[1, 2], &[3]]);
    let blob = doc.encode().unwrap();
    for slot in [DocumentSlot::Project, DocumentSlot::Autosave] {
        assert!(conn.read_document(slot).unwrap().is_empty());
        conn.write_document(slot, &blob).unwrap();
        let read = conn.read_document(slot).unwrap();
        assert_eq!(read, blob);
        assert_eq!(DocumentNode::decode(&read).unwrap(), doc);
    }
    assert!(conn.has_saved_document().unwrap());

    conn.delete_autosave().unwrap();
    assert!(conn.read_document(DocumentSlot::Autosave).unwrap().is_empty());
    assert_eq!(conn.read_document(DocumentSlot::Project).unwrap(), blob);
}

/// Verify a file written by a newer build is refused without being touched.
#[test]
fn test_newer_version_rejected() {
    let dir = CanonicalTempDir::new().unwrap();
    let path = dir.path().join("future.sonora");
    {
        let conn = dir.open("future.sonora");
        conn.connection()
            .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        conn.close().map_err(|(_, e)| e).unwrap();
    }
    let before = fs::read(&path).unwrap();

    let err = StoreConnection::open(&path, &dir.config()).unwrap_err();
    assert!(
        matches!(
            err,
            Error::SchemaRejected(SchemaRejection::TooNew { found, supported })
                if found == SCHEMA_VERSION + 1 && supported == SCHEMA_VERSION
        ),
        "{err}"
    );
    assert_eq!(fs::read(&path).unwrap(), before);
}

/// Verify block ids keep growing after the newest block is deleted.
#[test]
fn test_block_ids_not_reused() {
    let dir = CanonicalTempDir::new().unwrap();
    let conn = dir.open("ids.sonora");

    let ids = insert_sized(&conn, &[100, 200]);
    assert_eq!(ids, [1, 2]);
    assert!(conn.delete_block(2).unwrap());
    assert!(!conn.delete_block(2).unwrap());

    let next = conn.insert_block(&block_data(10)).unwrap();
    assert_eq!(next, 3);
    assert_eq!(conn.block_ids().unwrap(), BlockIdSet::from([1, 3]));
}

/// Verify a block reads back as written.
#[test]
fn test_block_read_back() {
    let dir = CanonicalTempDir::new().unwrap();
    let conn = dir.open("read.sonora");

    let data = block_data(1000);
    let id = conn.insert_block(&data).unwrap();
    let block = conn.read_block(id).unwrap().unwrap();
    assert_eq!(block.id, id);
    assert_eq!(block.data, data);
    assert!(conn.read_block(id + 1).unwrap().is_none());
}

/// Verify the sizes used by the compaction scenarios are exact.
#[test]
fn test_sized_blocks_account_exactly() {
    let dir = CanonicalTempDir::new().unwrap();
    let conn = dir.open("sized.sonora");

    let ids = insert_sized(&conn, &[100, 200, 300]);
    for (id, size) in ids.iter().zip([100, 200, 300]) {
        assert_eq!(conn.block_usage(*id).unwrap(), size);
    }
    assert_eq!(conn.total_usage().unwrap(), 600);
    assert_eq!(conn.live_usage(&BlockIdSet::from([1, 3])).unwrap(), 400);
    assert_eq!(conn.block_usage(99).unwrap(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Deleting by set or by complement leaves exactly the expected rows.
    #[test]
    fn prop_delete_blocks(subset in arb_id_subset(12), complement in any::<bool>()) {
        let dir = CanonicalTempDir::new().unwrap();
        let conn = dir.open("delete.sonora");
        for _ in 0..12 {
            conn.insert_block(&block_data(16)).unwrap();
        }
        let all: BlockIdSet = (1..=12).collect();

        let deleted = conn.delete_blocks(&subset, complement).unwrap();
        let expected: BlockIdSet = if complement {
            subset.clone()
        } else {
            all.difference(&subset).copied().collect()
        };
        prop_assert_eq!(deleted, all.len() - expected.len());
        prop_assert_eq!(conn.block_ids().unwrap(), expected);
    }

    /// Per-block lookups agree with the full scan and with the record size.
    #[test]
    fn prop_lookups_match_scan(blocks in proptest::collection::vec(arb_block_data(), 1..12)) {
        let dir = CanonicalTempDir::new().unwrap();
        let conn = dir.open("usage.sonora");

        let mut sum = 0;
        for data in &blocks {
            let id = conn.insert_block(data).unwrap();
            let usage = conn.block_usage(id).unwrap();
            prop_assert_eq!(usage, data.record_size());
            sum += usage;
        }
        prop_assert_eq!(conn.total_usage().unwrap(), sum);
        prop_assert_eq!(conn.live_usage(&conn.block_ids().unwrap()).unwrap(), sum);
    }
}
