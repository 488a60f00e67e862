// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Project lifecycle: loading, saving, copies and imports.

use std::fs;
use std::path::{Path, PathBuf};

use sonora_store_db::{
    BlockIdSet, DocumentBlob, DocumentNode, DocumentSlot, ImportOptions, LiveBlocks, ProjectFile,
    ProjectRegistry, Progress, StoreConnection,
};
use sonora_utils_test::{CanonicalTempDir, block_data, insert_sized, project_document};

fn continue_always(_: u64, _: u64) -> Progress {
    Progress::Continue
}

/// A crash before the first save leaves only an autosave; loading it marks
/// the project recovered and drops blocks it does not reference.
#[test_log::test]
fn test_load_autosave_only() {
    let dir = CanonicalTempDir::new().unwrap();
    let path = dir.path().join("crashed.sonora");
    let doc = project_document(&[&[1]]);
    {
        let conn = dir.open("crashed.sonora");
        insert_sized(&conn, &[100, 200]);
        conn.write_document(DocumentSlot::Autosave, &doc.encode().unwrap())
            .unwrap();
        conn.close().map_err(|(_, e)| e).unwrap();
    }

    let mut project = ProjectFile::new(dir.config());
    let loaded = project.load_project(&path).unwrap();
    assert_eq!(loaded, Some(doc));
    assert!(project.is_recovered());
    assert!(project.is_modified());
    assert!(project.is_temporary());
    assert_eq!(
        project.connection().unwrap().block_ids().unwrap(),
        BlockIdSet::from([1])
    );
}

/// A file with neither document loads as recovered and empty.
#[test]
fn test_load_without_document() {
    let dir = CanonicalTempDir::new().unwrap();
    let path = dir.path().join("blank.sonora");
    dir.open("blank.sonora").close().map_err(|(_, e)| e).unwrap();

    let mut project = ProjectFile::new(dir.config());
    assert_eq!(project.load_project(&path).unwrap(), None);
    assert!(project.is_recovered());
}

/// A failed load switches back to the project that was open before.
#[test]
fn test_failed_load_restores_previous() {
    let dir = CanonicalTempDir::new().unwrap();
    let garbage = dir.path().join("garbage.sonora");
    fs::write(&garbage, vec![0xCD; 8192]).unwrap();

    let mut project = ProjectFile::new(dir.config());
    project.open_project().unwrap();
    let scratch = project.file_path().unwrap().to_owned();

    assert!(project.load_project(&garbage).is_err());
    assert!(project.last_error().is_some());
    assert_eq!(project.file_path(), Some(scratch.as_path()));
    assert!(project.connection().is_ok());
    assert!(project.is_temporary());
}

/// Saving a scratch project moves its file to the chosen path.
#[test]
fn test_save_scratch_project() {
    let dir = CanonicalTempDir::new().unwrap();
    let dest = dir.path().join("saved.sonora");

    let mut project = ProjectFile::new(dir.config());
    project.open_project().unwrap();
    let scratch = project.file_path().unwrap().to_owned();
    insert_sized(project.connection().unwrap(), &[100, 200]);
    let doc = project_document(&[&[1, 2]]);
    let blob = doc.encode().unwrap();
    project.autosave(&blob).unwrap();

    project
        .save_project(&dest, &blob, None, continue_always)
        .unwrap();
    assert_eq!(project.file_path(), Some(dest.as_path()));
    assert!(!project.is_temporary());
    assert!(!project.is_modified());
    assert!(!scratch.exists());

    let conn = project.connection().unwrap();
    assert!(conn.read_document(DocumentSlot::Autosave).unwrap().is_empty());
    assert_eq!(conn.read_document(DocumentSlot::Project).unwrap(), blob);

    project.close_project();
    assert!(dest.exists());

    let mut reopened = ProjectFile::new(dir.config());
    assert_eq!(reopened.load_project(&dest).unwrap(), Some(doc));
    assert!(!reopened.is_recovered());
}

/// "Save as" on a saved project copies it and switches to the copy; the
/// original stays on disk.
#[test]
fn test_save_as_new_path() {
    let dir = CanonicalTempDir::new().unwrap();
    let original = dir.path().join("first.sonora");
    let copy = dir.path().join("second.sonora");
    let doc = project_document(&[&[1, 2, 3]]);
    let blob = doc.encode().unwrap();
    {
        let conn = dir.open("first.sonora");
        insert_sized(&conn, &[100, 200, 300]);
        conn.write_document(DocumentSlot::Project, &blob).unwrap();
        conn.close().map_err(|(_, e)| e).unwrap();
    }

    let mut project = ProjectFile::new(dir.config());
    project.load_project(&original).unwrap();
    let live = LiveBlocks::new(BlockIdSet::from([1, 2, 3]), 600);
    project
        .save_project(&copy, &blob, Some((&blob, &live)), continue_always)
        .unwrap();
    assert_eq!(project.file_path(), Some(copy.as_path()));
    assert_eq!(
        project.connection().unwrap().block_ids().unwrap(),
        BlockIdSet::from([1, 2, 3])
    );
    project.close_project();

    let first = StoreConnection::open(&original, &dir.config()).unwrap();
    assert_eq!(first.block_ids().unwrap(), BlockIdSet::from([1, 2, 3]));
    assert_eq!(first.read_document(DocumentSlot::Project).unwrap(), blob);
}

/// Load `first.sonora`, saved with one 100 byte block referenced by its
/// document, and record two large blocks on top of it.
fn edited_after_load(dir: &CanonicalTempDir) -> (ProjectFile, DocumentBlob, DocumentBlob) {
    let saved = project_document(&[&[1]]).encode().unwrap();
    {
        let conn = dir.open("first.sonora");
        insert_sized(&conn, &[100]);
        conn.write_document(DocumentSlot::Project, &saved).unwrap();
        conn.close().map_err(|(_, e)| e).unwrap();
    }

    let mut project = ProjectFile::new(dir.config());
    project.load_project(&dir.path().join("first.sonora")).unwrap();
    let conn = project.connection().unwrap();
    assert_eq!(conn.insert_block(&block_data(200_000)).unwrap(), 2);
    assert_eq!(conn.insert_block(&block_data(300_000)).unwrap(), 3);
    let current = project_document(&[&[1, 2, 3]]).encode().unwrap();
    (project, saved, current)
}

/// The saved document of `path` and the set of block ids it references
/// that have no row.
fn dangling_blocks(dir: &CanonicalTempDir, path: &Path) -> (DocumentNode, BlockIdSet) {
    let conn = StoreConnection::open(path, &dir.config()).unwrap();
    let doc = DocumentNode::decode(&conn.read_document(DocumentSlot::Project).unwrap()).unwrap();
    let rows = conn.block_ids().unwrap();
    let dangling = doc.block_ids().difference(&rows).copied().collect();
    (doc, dangling)
}

/// "Save as" prunes the old file to its last save and keeps that save's
/// document, so every reference in it still resolves.
#[test_log::test]
fn test_save_as_prunes_old_file_to_last_save() {
    let dir = CanonicalTempDir::new().unwrap();
    let original = dir.path().join("first.sonora");
    let copy = dir.path().join("second.sonora");
    let (mut project, saved, current) = edited_after_load(&dir);

    let last_live = LiveBlocks::new(BlockIdSet::from([1]), 100);
    project
        .save_project(&copy, &current, Some((&saved, &last_live)), continue_always)
        .unwrap();
    assert_eq!(project.file_path(), Some(copy.as_path()));
    assert_eq!(
        project.connection().unwrap().block_ids().unwrap(),
        BlockIdSet::from([1, 2, 3])
    );
    project.close_project();

    let (doc, dangling) = dangling_blocks(&dir, &original);
    assert!(dangling.is_empty(), "unresolved blocks {dangling:?}");
    assert_eq!(doc, DocumentNode::decode(&saved).unwrap());
    let first = StoreConnection::open(&original, &dir.config()).unwrap();
    assert_eq!(first.block_ids().unwrap(), BlockIdSet::from([1]));
}

/// Without a previous save the old file is left holding an empty project.
#[test]
fn test_save_as_without_last_save_empties_old_file() {
    let dir = CanonicalTempDir::new().unwrap();
    let original = dir.path().join("first.sonora");
    let copy = dir.path().join("second.sonora");
    let (mut project, _, current) = edited_after_load(&dir);

    project
        .save_project(&copy, &current, None, continue_always)
        .unwrap();
    project.close_project();

    let (doc, dangling) = dangling_blocks(&dir, &original);
    assert!(dangling.is_empty(), "unresolved blocks {dangling:?}");
    assert_eq!(doc, DocumentNode::new("project"));
    let first = StoreConnection::open(&original, &dir.config()).unwrap();
    assert_eq!(first.block_count().unwrap(), 0);

    let second = StoreConnection::open(&copy, &dir.config()).unwrap();
    assert_eq!(second.read_document(DocumentSlot::Project).unwrap(), current);
    assert_eq!(second.block_ids().unwrap(), BlockIdSet::from([1, 2, 3]));
}

/// A copy carries only the live blocks; the open project is unchanged.
#[test]
fn test_save_copy_prunes() {
    let dir = CanonicalTempDir::new().unwrap();
    let dest = dir.path().join("copy.sonora");

    let mut project = ProjectFile::new(dir.config());
    project.open_project().unwrap();
    insert_sized(project.connection().unwrap(), &[100, 200, 300]);
    let blob = project_document(&[&[1, 3]]).encode().unwrap();

    project
        .save_copy(&dest, &blob, &BlockIdSet::from([1, 3]), continue_always)
        .unwrap();
    assert_eq!(project.connection().unwrap().block_count().unwrap(), 3);

    let copy = StoreConnection::open(&dest, &dir.config()).unwrap();
    assert_eq!(copy.block_ids().unwrap(), BlockIdSet::from([1, 3]));
    assert_eq!(copy.read_document(DocumentSlot::Project).unwrap(), blob);
    assert_eq!(copy.total_usage().unwrap(), 400);
}

fn import_source(dir: &CanonicalTempDir) -> PathBuf {
    let path = dir.path().join("source.sonora");
    let conn = dir.open("source.sonora");
    insert_sized(&conn, &[100, 200, 300]);
    let doc = project_document(&[&[1, 2], &[2, 3]])
        .with_child(DocumentNode::new("timetrack").with_attribute("name", "Time"));
    conn.write_document(DocumentSlot::Project, &doc.encode().unwrap())
        .unwrap();
    conn.close().map_err(|(_, e)| e).unwrap();
    path
}

/// Imported blocks get fresh ids and every reference follows them.
#[test_log::test]
fn test_import_remaps_block_ids() {
    let dir = CanonicalTempDir::new().unwrap();
    let source = import_source(&dir);

    let mut project = ProjectFile::new(dir.config());
    project.open_project().unwrap();
    insert_sized(project.connection().unwrap(), &[100, 100]);

    let outcome = project
        .import_project(
            &source,
            ImportOptions {
                has_time_track: true,
            },
            continue_always,
        )
        .unwrap();
    assert_eq!(outcome.blocks_copied, 3);
    assert!(outcome.time_track_dropped);
    assert!(outcome.document.child("timetrack").is_none());
    assert_eq!(outcome.document.attribute("rate"), None);
    assert_eq!(outcome.document.attribute("rate_deleted"), Some("44100"));
    assert_eq!(outcome.document.attribute("version"), Some("1.3.0"));

    let tracks: Vec<BlockIdSet> = outcome
        .document
        .children
        .iter()
        .map(DocumentNode::block_ids)
        .collect();
    assert_eq!(tracks, [BlockIdSet::from([3, 4]), BlockIdSet::from([4, 5])]);

    let conn = project.connection().unwrap();
    assert_eq!(conn.block_ids().unwrap(), (1..=5).collect::<BlockIdSet>());
    assert_eq!(conn.block_usage(5).unwrap(), 300);
}

/// Cancelling an import leaves no imported rows behind.
#[test]
fn test_cancelled_import_rolls_back() {
    let dir = CanonicalTempDir::new().unwrap();
    let source = import_source(&dir);

    let mut project = ProjectFile::new(dir.config());
    project.open_project().unwrap();
    project
        .connection()
        .unwrap()
        .insert_block(&block_data(10))
        .unwrap();

    let err = project
        .import_project(&source, ImportOptions::default(), |done, _| {
            if done >= 2 {
                Progress::Cancel
            } else {
                Progress::Continue
            }
        })
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(project.connection().unwrap().block_count().unwrap(), 1);
}

/// Each registered project owns its own file.
#[test]
fn test_registry_keeps_projects_apart() {
    let dir = CanonicalTempDir::new().unwrap();
    let mut registry = ProjectRegistry::new();
    let first = registry.create(dir.config());
    let second = registry.create(dir.config());
    assert_ne!(first, second);

    registry.get_mut(first).unwrap().open_project().unwrap();
    registry.get_mut(second).unwrap().open_project().unwrap();
    let first_path = registry.get(first).unwrap().file_path().unwrap().to_owned();
    let second_path = registry.get(second).unwrap().file_path().unwrap().to_owned();
    assert_ne!(first_path, second_path);

    assert!(registry.close(first));
    assert!(!first_path.exists());
    assert!(second_path.exists());
    assert_eq!(registry.len(), 1);
}
