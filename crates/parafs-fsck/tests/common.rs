//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use parafs_fsck::{
    CheckContext, CheckId, Chunk, ContDir, DirEntry, DirEntryType, DirInode, EntryId, FileInode,
    FsId, FsckConfig, FsckDb, ModifiedSet, NodeId, StripePatternType, TargetIdType, UsedTarget,
    Violation, ViolationFilter, ViolationKind,
};
use tempfile::TempDir;

/// Node every fixture entity lives on unless stated otherwise.
pub const NODE: NodeId = NodeId::new(1);

/// Directory of the end-to-end fixture.
pub const D1: EntryId = EntryId::new(0x10, 0x5E00_0000, 1);
/// File of the end-to-end fixture.
pub const F1: EntryId = EntryId::new(0x11, 0x5E00_0000, 1);
/// Target referenced by `F1` but absent from the live map.
pub const MISSING_TARGET: u16 = 7;

/// A database in a temporary directory.
pub struct TestDb {
    pub db: FsckDb,
    _dir: TempDir,
}

impl TestDb {
    /// Opens an empty database with small pages so paging is exercised.
    pub fn new() -> Self {
        Self::with_pool_size(FsckConfig::default().pool_size)
    }

    /// Like [`TestDb::new`] with a pool of `pool_size` connections.
    pub fn with_pool_size(pool_size: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let config = FsckConfig {
            db_path: dir.path().join("fsck.db"),
            pool_size,
            page_size: 2,
            batch_size: 3,
            ..FsckConfig::default()
        };
        let db = FsckDb::open(&config).unwrap();
        Self { db, _dir: dir }
    }
}

pub fn dir_inode(id: EntryId, parent: EntryId, size: u64, num_hardlinks: u32) -> DirInode {
    DirInode {
        id,
        parent_dir_id: parent,
        parent_node_id: NODE,
        owner_node_id: NODE,
        save_node_id: NODE,
        size,
        num_hardlinks,
    }
}

pub fn file_inode(id: EntryId, parent: EntryId, targets: Vec<u16>) -> FileInode {
    FileInode {
        id,
        parent_dir_id: parent,
        parent_node_id: NODE,
        orig_parent_uid: 0,
        orig_parent_entry_id: parent,
        path_info_flags: 0,
        uid: 1000,
        gid: 1000,
        file_size: 0,
        num_hardlinks: 1,
        stripe_pattern_type: StripePatternType::Raid0,
        stripe_targets: targets,
        chunk_size: 512 * 1024,
        save_node_id: NODE,
        is_inlined: true,
    }
}

pub fn dentry(id: EntryId, parent: EntryId, name: &str, entry_type: DirEntryType) -> DirEntry {
    DirEntry {
        id,
        name: name.to_string(),
        parent_dir_id: parent,
        entry_owner_node_id: NODE,
        inode_owner_node_id: NODE,
        entry_type,
        has_inlined_inode: !entry_type.is_directory(),
        save_node_id: NODE,
        save_device: 64768,
        save_inode: u64::from(id.sequence) + 1000,
    }
}

/// The dentry-by-ID file matching `d`.
pub fn fs_id_for(d: &DirEntry) -> FsId {
    FsId {
        id: d.id,
        parent_dir_id: d.parent_dir_id,
        save_node_id: d.save_node_id,
        save_device: d.save_device,
        save_inode: d.save_inode,
    }
}

pub fn cont_dir(id: EntryId) -> ContDir {
    ContDir { id, save_node_id: NODE }
}

/// A chunk of `inode` on `target` at the inode's expected path.
pub fn chunk_of(inode: &FileInode, target: u16, size: u64) -> Chunk {
    Chunk {
        id: inode.id,
        target_id: target,
        buddy_group_id: 0,
        file_size: size,
        uid: inode.uid,
        gid: inode.gid,
        saved_path: parafs_fsck::chunk_path::expected_chunk_path(inode),
    }
}

/// Inserts a consistent root directory with the given children counts.
pub fn insert_root(db: &FsckDb, children: u64, subdirs: u32) {
    db.insert_records(&[dir_inode(EntryId::ROOT, EntryId::ANCHOR, children, subdirs + 2)]).unwrap();
    db.insert_records(&[cont_dir(EntryId::ROOT)]).unwrap();
}

/// Root, directory `D1` below it and file `F1` in `D1` striped over
/// [`MISSING_TARGET`]. `D1` claims to be empty although `F1` lives in it.
pub fn insert_end_to_end_fixture(db: &FsckDb) {
    insert_root(db, 1, 1);

    db.insert_records(&[dir_inode(D1, EntryId::ROOT, 0, 2)]).unwrap();
    db.insert_records(&[cont_dir(D1)]).unwrap();
    db.insert_records(&[dentry(D1, EntryId::ROOT, "D1", DirEntryType::Directory)]).unwrap();

    let f1 = dentry(F1, D1, "nameX", DirEntryType::Regular);
    db.insert_records(&[file_inode(F1, D1, vec![MISSING_TARGET])]).unwrap();
    db.insert_records(&[fs_id_for(&f1)]).unwrap();
    db.insert_records(&[f1]).unwrap();
    db.insert_records(&[UsedTarget { id: MISSING_TARGET, kind: TargetIdType::Target }]).unwrap();
}

/// Context with live targets 1 and 2 and the stored modification events.
pub fn context(db: &FsckDb) -> CheckContext {
    CheckContext::new(db.modified_set().unwrap(), [1, 2], [])
}

/// Context without modification events.
pub fn plain_context() -> CheckContext {
    CheckContext::new(ModifiedSet::default(), [1, 2], [])
}

/// Runs every check in order, storing results, and asserts none failed.
pub fn run_all(db: &FsckDb, ctx: &CheckContext) {
    for id in CheckId::ALL {
        assert!(db.check_for_and_insert(ctx, id), "check {} failed", id);
    }
}

/// Every stored violation, grouped by kind in catalog order.
pub fn stored_violations(db: &FsckDb) -> Vec<Violation> {
    ViolationKind::ALL
        .iter()
        .flat_map(|&kind| db.violation_list(kind, &ViolationFilter::default()).unwrap())
        .map(|record| record.violation)
        .collect()
}
