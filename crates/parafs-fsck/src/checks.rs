//! The check catalog.
//!
//! Each check is a fixed pipeline of cursor combinators over the base tables
//! and yields the violations it finds in the order of the checked entity.
//! Entities named by a modification event are dropped before any predicate
//! runs, so a check never reports something that changed during the scan.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribs::{derived_file_size, ChildCounter, ChunkSizes, ChunksPerTarget, LinkCounter, NodeSet};
use crate::chunk_path::expected_chunk_path;
use crate::config::FsckConfig;
use crate::cursor::{union_by, BoxCursor, Cursor, ModifiedSet, VecCursor};
use crate::error::{FsckError, FsckResult};
use crate::persistence::ViolationFilter;
use crate::store::{CheckSlot, FsckDb};
use crate::types::{
    DirEntry, EntryId, FileInode, NodeId, StripePatternType, TargetIdType, UsedTarget,
};
use crate::violation::{InodeAttribs, Violation, ViolationKind};

/// Most table cursors any single check holds open at once.
pub const MAX_CHECK_CONNECTIONS: usize = 4;

/// Pooled connections one check may hold together: its cursors plus the
/// writer storing its violations.
pub const CHECK_CONNECTIONS: usize = MAX_CHECK_CONNECTIONS + 1;

/// Cursor of violations produced by a check.
pub type ViolationCursor = BoxCursor<'static, Violation>;

/// Names one check of the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckId {
    /// Dentries whose inode does not exist.
    DanglingDentries,
    /// Dentries pointing at an inode owner other than where it was found.
    WrongOwnerInDentries,
    /// Dir inodes whose owner field differs from where they are stored.
    WrongInodeOwners,
    /// Dentries with inlined inode but no dentry-by-ID file.
    BrokenFsIds,
    /// Dentry-by-ID files without a dentry.
    OrphanedFsIds,
    /// Dir inodes without a dentry.
    OrphanedDirInodes,
    /// File inodes without a dentry.
    OrphanedFileInodes,
    /// Chunks without a file inode.
    OrphanedChunks,
    /// Dir inodes without a content directory.
    MissingContDirs,
    /// Content directories without a dir inode.
    OrphanedContDirs,
    /// File inodes with wrong size or link count.
    WrongFileAttribs,
    /// Dir inodes with wrong size or link count.
    WrongDirAttribs,
    /// Entry IDs used on several nodes.
    DuplicateInodeIds,
    /// Several chunks of one file on one target.
    DuplicateChunks,
    /// Used targets missing from the live target map.
    MissingTargets,
    /// Files striped over a missing target. Reads the stored results of
    /// [`CheckId::MissingTargets`], which must run first.
    FilesWithMissingTargets,
    /// Chunks whose owner differs from their inode.
    ChunksWithWrongPermissions,
    /// Chunks not stored at their derived path.
    ChunksInWrongPath,
}

impl CheckId {
    /// Every check, in run order.
    pub const ALL: [CheckId; 18] = [
        CheckId::DanglingDentries,
        CheckId::WrongOwnerInDentries,
        CheckId::WrongInodeOwners,
        CheckId::BrokenFsIds,
        CheckId::OrphanedFsIds,
        CheckId::OrphanedDirInodes,
        CheckId::OrphanedFileInodes,
        CheckId::OrphanedChunks,
        CheckId::MissingContDirs,
        CheckId::OrphanedContDirs,
        CheckId::WrongFileAttribs,
        CheckId::WrongDirAttribs,
        CheckId::DuplicateInodeIds,
        CheckId::DuplicateChunks,
        CheckId::MissingTargets,
        CheckId::FilesWithMissingTargets,
        CheckId::ChunksWithWrongPermissions,
        CheckId::ChunksInWrongPath,
    ];

    /// Command-line name.
    pub fn name(&self) -> &'static str {
        match self {
            CheckId::DanglingDentries => "dangling-dentries",
            CheckId::WrongOwnerInDentries => "wrong-owner-in-dentries",
            CheckId::WrongInodeOwners => "wrong-inode-owners",
            CheckId::BrokenFsIds => "broken-fs-ids",
            CheckId::OrphanedFsIds => "orphaned-fs-ids",
            CheckId::OrphanedDirInodes => "orphaned-dir-inodes",
            CheckId::OrphanedFileInodes => "orphaned-file-inodes",
            CheckId::OrphanedChunks => "orphaned-chunks",
            CheckId::MissingContDirs => "missing-cont-dirs",
            CheckId::OrphanedContDirs => "orphaned-cont-dirs",
            CheckId::WrongFileAttribs => "wrong-file-attribs",
            CheckId::WrongDirAttribs => "wrong-dir-attribs",
            CheckId::DuplicateInodeIds => "duplicate-inode-ids",
            CheckId::DuplicateChunks => "duplicate-chunks",
            CheckId::MissingTargets => "missing-targets",
            CheckId::FilesWithMissingTargets => "files-with-missing-targets",
            CheckId::ChunksWithWrongPermissions => "chunks-with-wrong-permissions",
            CheckId::ChunksInWrongPath => "chunks-in-wrong-path",
        }
    }

    /// Kind of violation the check reports.
    pub fn kind(&self) -> ViolationKind {
        match self {
            CheckId::DanglingDentries => ViolationKind::DanglingDentry,
            CheckId::WrongOwnerInDentries => ViolationKind::WrongOwnerInDentry,
            CheckId::WrongInodeOwners => ViolationKind::WrongInodeOwner,
            CheckId::BrokenFsIds => ViolationKind::BrokenFsId,
            CheckId::OrphanedFsIds => ViolationKind::OrphanedFsId,
            CheckId::OrphanedDirInodes => ViolationKind::OrphanedDirInode,
            CheckId::OrphanedFileInodes => ViolationKind::OrphanedFileInode,
            CheckId::OrphanedChunks => ViolationKind::OrphanedChunk,
            CheckId::MissingContDirs => ViolationKind::MissingContDir,
            CheckId::OrphanedContDirs => ViolationKind::OrphanedContDir,
            CheckId::WrongFileAttribs => ViolationKind::WrongFileAttribs,
            CheckId::WrongDirAttribs => ViolationKind::WrongDirAttribs,
            CheckId::DuplicateInodeIds => ViolationKind::DuplicateInodeId,
            CheckId::DuplicateChunks => ViolationKind::DuplicateChunk,
            CheckId::MissingTargets => ViolationKind::MissingTarget,
            CheckId::FilesWithMissingTargets => ViolationKind::FileWithMissingTarget,
            CheckId::ChunksWithWrongPermissions => ViolationKind::ChunkWithWrongPermissions,
            CheckId::ChunksInWrongPath => ViolationKind::ChunkInWrongPath,
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckId {
    type Err = FsckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckId::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| FsckError::Config(format!("unknown check: {}", s)))
    }
}

/// Per-run inputs shared by every check.
#[derive(Clone, Debug, Default)]
pub struct CheckContext {
    /// Entry IDs modified while the scan ran.
    pub modified: ModifiedSet,
    /// Storage targets present in the live target map.
    pub live_targets: BTreeSet<u16>,
    /// Buddy groups present in the live target map.
    pub live_buddy_groups: BTreeSet<u16>,
}

impl CheckContext {
    /// Builds a context from explicit parts.
    pub fn new(
        modified: ModifiedSet,
        live_targets: impl IntoIterator<Item = u16>,
        live_buddy_groups: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            modified,
            live_targets: live_targets.into_iter().collect(),
            live_buddy_groups: live_buddy_groups.into_iter().collect(),
        }
    }

    /// Loads the modified set from `db` and the live target map from `config`.
    pub fn load(db: &FsckDb, config: &FsckConfig) -> FsckResult<Self> {
        let modified = db.modified_set()?;
        debug!(modified = modified.len(), "loaded modification events");
        Ok(Self::new(
            modified,
            config.live_targets.iter().copied(),
            config.live_buddy_groups.iter().copied(),
        ))
    }

    fn live(&self) -> Vec<UsedTarget> {
        let targets = self.live_targets.iter().map(|&id| UsedTarget { id, kind: TargetIdType::Target });
        let groups = self.live_buddy_groups.iter().map(|&id| UsedTarget { id, kind: TargetIdType::BuddyGroup });
        let mut live: Vec<UsedTarget> = targets.chain(groups).collect();
        live.sort();
        live
    }
}

/// Opens the cursor of check `id`.
///
/// Waits for a check slot first and keeps it until the returned cursor is
/// dropped, so no more checks hold connections than the pool can serve.
pub fn run_check(db: &FsckDb, ctx: &CheckContext, id: CheckId) -> FsckResult<ViolationCursor> {
    let slot = db.check_slot();
    let inner = open_check(db, ctx, id)?;
    Ok(SlotCursor { inner, _slot: slot }.boxed())
}

/// Violation cursor owning the check slot its pipeline was opened under.
/// Fields drop in order, so the pipeline's connections go back first.
struct SlotCursor {
    inner: ViolationCursor,
    _slot: CheckSlot,
}

impl Cursor for SlotCursor {
    type Item = Violation;

    fn step(&mut self) -> FsckResult<Option<Violation>> {
        self.inner.step()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Builds the pipeline of check `id`. The caller must hold a check slot.
pub(crate) fn open_check(db: &FsckDb, ctx: &CheckContext, id: CheckId) -> FsckResult<ViolationCursor> {
    debug!(check = %id, "opening check");
    match id {
        CheckId::DanglingDentries => dangling_dentries(db, ctx),
        CheckId::WrongOwnerInDentries => wrong_owner_in_dentries(db, ctx),
        CheckId::WrongInodeOwners => wrong_inode_owners(db, ctx),
        CheckId::BrokenFsIds => broken_fs_ids(db, ctx),
        CheckId::OrphanedFsIds => orphaned_fs_ids(db, ctx),
        CheckId::OrphanedDirInodes => orphaned_dir_inodes(db, ctx),
        CheckId::OrphanedFileInodes => orphaned_file_inodes(db, ctx),
        CheckId::OrphanedChunks => orphaned_chunks(db, ctx),
        CheckId::MissingContDirs => missing_cont_dirs(db, ctx),
        CheckId::OrphanedContDirs => orphaned_cont_dirs(db, ctx),
        CheckId::WrongFileAttribs => wrong_file_attribs(db, ctx),
        CheckId::WrongDirAttribs => wrong_dir_attribs(db, ctx),
        CheckId::DuplicateInodeIds => duplicate_inode_ids(db, ctx),
        CheckId::DuplicateChunks => duplicate_chunks(db, ctx),
        CheckId::MissingTargets => missing_targets(db, ctx),
        CheckId::FilesWithMissingTargets => files_with_missing_targets(db, ctx),
        CheckId::ChunksWithWrongPermissions => chunks_with_wrong_permissions(db, ctx),
        CheckId::ChunksInWrongPath => chunks_in_wrong_path(db, ctx),
    }
}

/// Scan order of dentries, used to merge and deduplicate dentry streams.
fn dentry_order(d: &DirEntry) -> (EntryId, EntryId, NodeId, i32, u64, String) {
    (d.id, d.parent_dir_id, d.save_node_id, d.save_device, d.save_inode, d.name.clone())
}

/// Dentries whose inode of the matching type does not exist.
pub fn dangling_dentries(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let files = db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .filter(|d| !d.entry_type.is_directory())
        .left_join_eq(db.file_inodes()?, |d| d.id, |i| i.id)
        .filter(|(_, inode)| inode.is_none())
        .select(|(d, _)| d)
        .boxed();
    let dirs = db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .filter(|d| d.entry_type.is_directory())
        .left_join_eq(db.dir_inodes()?, |d| d.id, |i| i.id)
        .filter(|(_, inode)| inode.is_none())
        .select(|(d, _)| d)
        .boxed();

    Ok(union_by(vec![files, dirs], dentry_order)
        .distinct_by(dentry_order)
        .select(Violation::DanglingDentry)
        .boxed())
}

/// Dentries whose inode was found on a node other than the one they name.
pub fn wrong_owner_in_dentries(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let files = db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .filter(|d| !d.entry_type.is_directory())
        .join_eq(db.file_inodes()?, |d| d.id, |i| i.id)
        .select(|(d, i)| (d, i.save_node_id))
        .boxed();
    let dirs = db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .filter(|d| d.entry_type.is_directory())
        .join_eq(db.dir_inodes()?, |d| d.id, |i| i.id)
        .select(|(d, i)| (d, i.save_node_id))
        .boxed();

    let key = |pair: &(DirEntry, NodeId)| dentry_order(&pair.0);
    Ok(union_by(vec![files, dirs], key)
        .filter(|(d, actual)| d.inode_owner_node_id != *actual)
        .distinct_by(key)
        .select(|(dentry, actual_owner)| Violation::WrongOwnerInDentry { dentry, actual_owner })
        .boxed())
}

/// Dir inodes whose owner differs from their save node. The disposal
/// directory exists on every node and is skipped.
pub fn wrong_inode_owners(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .dir_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .filter(|i| i.owner_node_id != i.save_node_id && i.id != EntryId::DISPOSAL)
        .select(Violation::WrongInodeOwner)
        .boxed())
}

/// Dentries with an inlined inode and no matching dentry-by-ID file.
pub fn broken_fs_ids(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .left_join_eq(
            db.fs_ids()?,
            |d| (d.id, d.parent_dir_id, d.save_node_id, d.save_device, d.save_inode),
            |f| (f.id, f.parent_dir_id, f.save_node_id, f.save_device, f.save_inode),
        )
        .filter(|(d, fsid)| d.has_inlined_inode && d.parent_dir_id != EntryId::DISPOSAL && fsid.is_none())
        .select(|(d, _)| Violation::BrokenFsId(d))
        .boxed())
}

/// Dentry-by-ID files without a dentry in the same directory on the same node.
pub fn orphaned_fs_ids(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .fs_ids()?
        .ignore_by_id(ctx.modified.clone(), |f| f.id)
        .left_join_eq(
            db.dir_entries()?,
            |f| (f.id, f.parent_dir_id, f.save_node_id),
            |d| (d.id, d.parent_dir_id, d.save_node_id),
        )
        .filter(|(_, dentry)| dentry.is_none())
        .select(|(f, _)| Violation::OrphanedFsId(f))
        .boxed())
}

/// Dir inodes no dentry names, except the root and disposal directories.
pub fn orphaned_dir_inodes(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .dir_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .left_join_eq(db.dir_entries()?, |i| i.id, |d| d.id)
        .filter(|(i, dentry)| !i.id.is_root_or_disposal() && dentry.is_none())
        .select(|(i, _)| Violation::OrphanedDirInode(i))
        .boxed())
}

/// File inodes no dentry names.
pub fn orphaned_file_inodes(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .file_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .left_join_eq(db.dir_entries()?, |i| i.id, |d| d.id)
        .filter(|(_, dentry)| dentry.is_none())
        .select(|(i, _)| Violation::OrphanedFileInode(i))
        .boxed())
}

/// Chunks whose file inode does not exist.
pub fn orphaned_chunks(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .chunks()?
        .ignore_by_id(ctx.modified.clone(), |c| c.id)
        .left_join_eq(db.file_inodes()?, |c| c.id, |i| i.id)
        .filter(|(_, inode)| inode.is_none())
        .select(|(c, _)| Violation::OrphanedChunk(c))
        .boxed())
}

/// Dir inodes without a content directory.
pub fn missing_cont_dirs(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .dir_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .left_join_eq(db.cont_dirs()?, |i| i.id, |c| c.id)
        .filter(|(_, cont)| cont.is_none())
        .select(|(i, _)| Violation::MissingContDir(i))
        .boxed())
}

/// Content directories without a dir inode.
pub fn orphaned_cont_dirs(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .cont_dirs()?
        .ignore_by_id(ctx.modified.clone(), |c| c.id)
        .left_join_eq(db.dir_inodes()?, |c| c.id, |i| i.id)
        .filter(|(_, inode)| inode.is_none())
        .select(|(c, _)| Violation::OrphanedContDir(c))
        .boxed())
}

/// File inodes whose size disagrees with their chunks or whose link count
/// disagrees with their dentries. Dentries in the disposal directory do not
/// count as links. An inode without any dentry is left to the orphan check.
pub fn wrong_file_attribs(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let chunk_sizes = db.chunks()?.group_by(ChunkSizes::default());
    let links = db
        .dir_entries()?
        .filter(|d| d.parent_dir_id != EntryId::DISPOSAL)
        .group_by(LinkCounter::default());

    Ok(db
        .file_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .left_join_eq(chunk_sizes, |i| i.id, |(id, _)| *id)
        .left_join_eq(links, |(i, _)| i.id, |(id, _)| *id)
        .filter_map(|((inode, sizes), links)| {
            let chunks = sizes.map(|(_, s)| s).unwrap_or_default();
            let size = derived_file_size(&inode, &chunks);
            let links = links.map(|(_, n)| n);

            let size_wrong = size != inode.file_size;
            let links_wrong = links.is_some_and(|n| n != u64::from(inode.num_hardlinks));
            if !size_wrong && !links_wrong {
                return None;
            }
            let found = InodeAttribs {
                size,
                num_hardlinks: links.unwrap_or(u64::from(inode.num_hardlinks)),
            };
            Some(Violation::WrongFileAttribs { inode, found })
        })
        .boxed())
}

/// Dir inodes whose size is not their number of children or whose link count
/// is not their number of subdirectories plus two.
pub fn wrong_dir_attribs(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let children = db.dir_entries_by_parent()?.group_by(ChildCounter::default());

    Ok(db
        .dir_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .filter(|i| i.id != EntryId::DISPOSAL)
        .left_join_eq(children, |i| i.id, |(parent, _)| *parent)
        .filter_map(|(inode, counts)| {
            let counts = counts.map(|(_, c)| c).unwrap_or_default();
            let found = InodeAttribs { size: counts.children, num_hardlinks: counts.subdirs + 2 };
            if inode.size == found.size && u64::from(inode.num_hardlinks) == found.num_hardlinks {
                return None;
            }
            Some(Violation::WrongDirAttribs { inode, found })
        })
        .boxed())
}

/// Entry IDs held by inodes on more than one node.
pub fn duplicate_inode_ids(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let dirs = db
        .dir_inodes()?
        .filter(|i| i.id != EntryId::DISPOSAL)
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .select(|i| (i.id, i.save_node_id))
        .boxed();
    let files = db
        .file_inodes()?
        .ignore_by_id(ctx.modified.clone(), |i| i.id)
        .select(|i| (i.id, i.save_node_id))
        .boxed();

    Ok(union_by(vec![dirs, files], |pair: &(EntryId, NodeId)| pair.0)
        .group_by(NodeSet::default())
        .filter(|(_, nodes)| nodes.len() > 1)
        .select(|(id, nodes)| Violation::DuplicateInodeId { id, nodes })
        .boxed())
}

/// Files with more than one chunk on the same target.
pub fn duplicate_chunks(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .chunks()?
        .ignore_by_id(ctx.modified.clone(), |c| c.id)
        .group_by(ChunksPerTarget::default())
        .filter(|(_, chunks)| chunks.len() > 1)
        .select(|(_, chunks)| Violation::DuplicateChunk(chunks))
        .boxed())
}

/// Targets and buddy groups referenced by stripe patterns but absent from the
/// live target map.
pub fn missing_targets(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .used_targets()?
        .left_join_eq(VecCursor::new(ctx.live()), |t| t.clone(), |t| t.clone())
        .filter(|(_, live)| live.is_none())
        .select(|(t, _)| Violation::MissingTarget(t))
        .boxed())
}

/// Dentries of files striped over a target reported missing by
/// [`missing_targets`].
pub fn files_with_missing_targets(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    let mut missing_targets = BTreeSet::new();
    let mut missing_groups = BTreeSet::new();
    for record in db.violation_list(ViolationKind::MissingTarget, &ViolationFilter::default())? {
        if let Violation::MissingTarget(t) = record.violation {
            match t.kind {
                TargetIdType::Target => missing_targets.insert(t.id),
                TargetIdType::BuddyGroup => missing_groups.insert(t.id),
            };
        }
    }
    debug!(
        targets = missing_targets.len(),
        buddy_groups = missing_groups.len(),
        "loaded missing targets"
    );

    let uses_missing = move |inode: &FileInode| {
        let missing = match inode.stripe_pattern_type {
            StripePatternType::Raid0 => &missing_targets,
            StripePatternType::BuddyMirror => &missing_groups,
        };
        inode.stripe_targets.iter().any(|t| missing.contains(t))
    };

    Ok(db
        .dir_entries()?
        .ignore_by_id(ctx.modified.clone(), |d| d.id)
        .filter(|d| !d.entry_type.is_directory())
        .join_eq(db.file_inodes()?, |d| d.id, |i| i.id)
        .filter(move |(_, inode)| uses_missing(inode))
        .select(|(d, _)| d)
        .distinct_by(dentry_order)
        .select(Violation::FileWithMissingTarget)
        .boxed())
}

/// Chunks whose uid or gid differs from their file inode.
pub fn chunks_with_wrong_permissions(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .chunks()?
        .ignore_by_id(ctx.modified.clone(), |c| c.id)
        .join_eq(db.file_inodes()?, |c| c.id, |i| i.id)
        .filter(|(c, i)| c.uid != i.uid || c.gid != i.gid)
        .select(|(chunk, inode)| Violation::ChunkWithWrongPermissions {
            chunk,
            expected_uid: inode.uid,
            expected_gid: inode.gid,
        })
        .boxed())
}

/// Chunks stored somewhere other than the path derived from their inode.
pub fn chunks_in_wrong_path(db: &FsckDb, ctx: &CheckContext) -> FsckResult<ViolationCursor> {
    Ok(db
        .chunks()?
        .ignore_by_id(ctx.modified.clone(), |c| c.id)
        .join_eq(db.file_inodes()?, |c| c.id, |i| i.id)
        .filter_map(|(chunk, inode)| {
            let expected_path = expected_chunk_path(&inode);
            (chunk.saved_path != expected_path).then_some(Violation::ChunkInWrongPath { chunk, expected_path })
        })
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names_round_trip() {
        for id in CheckId::ALL {
            assert_eq!(id.name().parse::<CheckId>().unwrap(), id);
        }
        assert!("no-such-check".parse::<CheckId>().is_err());
    }

    #[test]
    fn test_every_kind_has_one_check() {
        let kinds: BTreeSet<ViolationKind> = CheckId::ALL.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds.len(), ViolationKind::ALL.len());
    }

    #[test]
    fn test_missing_targets_runs_before_dependents() {
        let pos = |id| CheckId::ALL.iter().position(|c| *c == id).unwrap();
        assert!(pos(CheckId::MissingTargets) < pos(CheckId::FilesWithMissingTargets));
    }

    #[test]
    fn test_serde_names_match_cli_names() {
        for id in CheckId::ALL {
            assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{}\"", id.name()));
        }
    }

    #[test]
    fn test_live_map_sorted() {
        let ctx = CheckContext::new(ModifiedSet::default(), [3, 1], [2]);
        let live = ctx.live();
        assert!(live.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(live.len(), 3);
    }
}
