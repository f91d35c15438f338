//! Group accumulators and attribute arithmetic used by the attribute and
//! duplicate checks.

use std::collections::{BTreeMap, BTreeSet};

use crate::cursor::Grouper;
use crate::types::{Chunk, DirEntry, EntryId, FileInode, NodeId, StripePatternType};

/// Number of entries and subdirectories below one parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildCounts {
    /// Dentries naming the directory as parent.
    pub children: u64,
    /// Those of them that are directories.
    pub subdirs: u64,
}

/// Counts children per parent over dentries ordered by parent.
#[derive(Debug, Default)]
pub struct ChildCounter {
    counts: ChildCounts,
}

impl Grouper for ChildCounter {
    type Row = DirEntry;
    type Key = EntryId;
    type Proj = EntryId;
    type Value = ChildCounts;

    fn key(&self, row: &DirEntry) -> EntryId {
        row.parent_dir_id
    }

    fn project(&self, row: &DirEntry) -> EntryId {
        row.parent_dir_id
    }

    fn step(&mut self, row: &DirEntry) {
        self.counts.children += 1;
        if row.entry_type.is_directory() {
            self.counts.subdirs += 1;
        }
    }

    fn finish(&mut self) -> ChildCounts {
        self.counts
    }

    fn reset(&mut self) {
        self.counts = ChildCounts::default();
    }
}

/// Counts dentries per entry ID over dentries ordered by ID.
#[derive(Debug, Default)]
pub struct LinkCounter {
    links: u64,
}

impl Grouper for LinkCounter {
    type Row = DirEntry;
    type Key = EntryId;
    type Proj = EntryId;
    type Value = u64;

    fn key(&self, row: &DirEntry) -> EntryId {
        row.id
    }

    fn project(&self, row: &DirEntry) -> EntryId {
        row.id
    }

    fn step(&mut self, _row: &DirEntry) {
        self.links += 1;
    }

    fn finish(&mut self) -> u64 {
        self.links
    }

    fn reset(&mut self) {
        self.links = 0;
    }
}

/// Size of one chunk of a file, as found on a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSize {
    /// Storage target.
    pub target_id: u16,
    /// Buddy group, 0 when unmirrored.
    pub buddy_group_id: u16,
    /// Size of the chunk file.
    pub size: u64,
}

/// Collects the chunk sizes of each file over chunks ordered by file.
#[derive(Debug, Default)]
pub struct ChunkSizes {
    sizes: Vec<ChunkSize>,
}

impl Grouper for ChunkSizes {
    type Row = Chunk;
    type Key = EntryId;
    type Proj = EntryId;
    type Value = Vec<ChunkSize>;

    fn key(&self, row: &Chunk) -> EntryId {
        row.id
    }

    fn project(&self, row: &Chunk) -> EntryId {
        row.id
    }

    fn step(&mut self, row: &Chunk) {
        self.sizes.push(ChunkSize {
            target_id: row.target_id,
            buddy_group_id: row.buddy_group_id,
            size: row.file_size,
        });
    }

    fn finish(&mut self) -> Vec<ChunkSize> {
        std::mem::take(&mut self.sizes)
    }

    fn reset(&mut self) {
        self.sizes.clear();
    }
}

/// Collects the save nodes of each entry ID over `(id, node)` pairs.
#[derive(Debug, Default)]
pub struct NodeSet {
    nodes: BTreeSet<NodeId>,
}

impl Grouper for NodeSet {
    type Row = (EntryId, NodeId);
    type Key = EntryId;
    type Proj = EntryId;
    type Value = BTreeSet<NodeId>;

    fn key(&self, row: &(EntryId, NodeId)) -> EntryId {
        row.0
    }

    fn project(&self, row: &(EntryId, NodeId)) -> EntryId {
        row.0
    }

    fn step(&mut self, row: &(EntryId, NodeId)) {
        self.nodes.insert(row.1);
    }

    fn finish(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.nodes)
    }

    fn reset(&mut self) {
        self.nodes.clear();
    }
}

/// Collects the chunks of one file that share a target.
#[derive(Debug, Default)]
pub struct ChunksPerTarget {
    chunks: Vec<Chunk>,
}

impl Grouper for ChunksPerTarget {
    type Row = Chunk;
    type Key = (EntryId, u16);
    type Proj = ();
    type Value = Vec<Chunk>;

    fn key(&self, row: &Chunk) -> (EntryId, u16) {
        (row.id, row.target_id)
    }

    fn project(&self, _row: &Chunk) {}

    fn step(&mut self, row: &Chunk) {
        self.chunks.push(row.clone());
    }

    fn finish(&mut self) -> Vec<Chunk> {
        std::mem::take(&mut self.chunks)
    }

    fn reset(&mut self) {
        self.chunks.clear();
    }
}

/// File size implied by per-stripe-target chunk sizes, accounting for sparse
/// regions.
///
/// `sizes[i]` is the size of the chunk file on the i-th stripe target, 0 if the
/// chunk does not exist. The last target holding the most chunks determines
/// where the file ends: every target before it holds full chunks up to that
/// count, every target after it one chunk fewer.
pub fn stripe_file_size(chunk_size: u64, sizes: &[u64]) -> u64 {
    if chunk_size == 0 || sizes.is_empty() {
        return sizes.iter().sum();
    }

    let mut max_chunks = 0u64;
    let mut last_max_idx = 0usize;
    for (idx, size) in sizes.iter().enumerate() {
        let chunks = size.div_ceil(chunk_size);
        if chunks >= max_chunks {
            max_chunks = chunks;
            last_max_idx = idx;
        }
    }

    if max_chunks == 0 {
        return 0;
    }

    let before = last_max_idx as u64 * max_chunks * chunk_size;
    let after = (sizes.len() - last_max_idx - 1) as u64 * (max_chunks - 1) * chunk_size;
    before + after + sizes[last_max_idx]
}

/// File size derived from the chunks found for `inode`.
///
/// Mirrored files count one chunk per buddy group. If the plain sum of chunk
/// sizes matches the stored size it is accepted; otherwise the sparse stripe
/// computation decides.
pub fn derived_file_size(inode: &FileInode, chunks: &[ChunkSize]) -> u64 {
    let mut per_stripe: BTreeMap<u16, u64> = BTreeMap::new();
    for chunk in chunks {
        let (slot, size) = match inode.stripe_pattern_type {
            StripePatternType::Raid0 => (chunk.target_id, chunk.size),
            StripePatternType::BuddyMirror => (chunk.buddy_group_id, chunk.size),
        };
        let entry = per_stripe.entry(slot).or_insert(0);
        *entry = (*entry).max(size);
    }

    let sum: u64 = per_stripe.values().sum();
    if sum == inode.file_size {
        return sum;
    }

    let sizes: Vec<u64> = inode
        .stripe_targets
        .iter()
        .map(|t| per_stripe.get(t).copied().unwrap_or(0))
        .collect();
    stripe_file_size(u64::from(inode.chunk_size), &sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, VecCursor};
    use crate::types::DirEntryType;

    const MIB: u64 = 1024 * 1024;

    fn inode(pattern: StripePatternType, targets: Vec<u16>, size: u64) -> FileInode {
        FileInode {
            id: EntryId::new(1, 2, 3),
            parent_dir_id: EntryId::ROOT,
            parent_node_id: NodeId::new(1),
            orig_parent_uid: 0,
            orig_parent_entry_id: EntryId::ROOT,
            path_info_flags: 0,
            uid: 0,
            gid: 0,
            file_size: size,
            num_hardlinks: 1,
            stripe_pattern_type: pattern,
            stripe_targets: targets,
            chunk_size: MIB as u32,
            save_node_id: NodeId::new(1),
            is_inlined: true,
        }
    }

    fn dentry(parent: EntryId, name: &str, entry_type: DirEntryType) -> DirEntry {
        DirEntry {
            id: EntryId::new(9, 9, 9),
            name: name.to_string(),
            parent_dir_id: parent,
            entry_owner_node_id: NodeId::new(1),
            inode_owner_node_id: NodeId::new(1),
            entry_type,
            has_inlined_inode: false,
            save_node_id: NodeId::new(1),
            save_device: 0,
            save_inode: 0,
        }
    }

    #[test]
    fn test_stripe_size_dense_file() {
        assert_eq!(stripe_file_size(MIB, &[2 * MIB, MIB + 100]), 3 * MIB + 100);
    }

    #[test]
    fn test_stripe_size_sparse_hole() {
        // Chunks 0 and 2 on target 0, chunk 1 never written.
        assert_eq!(stripe_file_size(MIB, &[MIB + 10, 0]), 2 * MIB + 10);
        // Chunk 2 on target 0 is a hole, chunk 3 on target 1 is full.
        assert_eq!(stripe_file_size(MIB, &[MIB, 2 * MIB]), 4 * MIB);
    }

    #[test]
    fn test_stripe_size_no_data() {
        assert_eq!(stripe_file_size(MIB, &[0, 0, 0]), 0);
        assert_eq!(stripe_file_size(MIB, &[]), 0);
    }

    #[test]
    fn test_derived_size_prefers_plain_sum() {
        let i = inode(StripePatternType::Raid0, vec![1, 2], 150);
        let chunks = [
            ChunkSize { target_id: 1, buddy_group_id: 0, size: 100 },
            ChunkSize { target_id: 2, buddy_group_id: 0, size: 50 },
        ];
        assert_eq!(derived_file_size(&i, &chunks), 150);
    }

    #[test]
    fn test_derived_size_mirrored_counts_group_once() {
        let i = inode(StripePatternType::BuddyMirror, vec![10], 500);
        let chunks = [
            ChunkSize { target_id: 1, buddy_group_id: 10, size: 500 },
            ChunkSize { target_id: 2, buddy_group_id: 10, size: 500 },
        ];
        assert_eq!(derived_file_size(&i, &chunks), 500);
    }

    #[test]
    fn test_derived_size_without_chunks() {
        assert_eq!(derived_file_size(&inode(StripePatternType::Raid0, vec![1], 0), &[]), 0);
        assert_eq!(derived_file_size(&inode(StripePatternType::Raid0, vec![1], 42), &[]), 0);
    }

    #[test]
    fn test_child_counter() {
        let a = EntryId::new(1, 1, 1);
        let b = EntryId::new(2, 1, 1);
        let rows = vec![
            dentry(a, "x", DirEntryType::Regular),
            dentry(a, "y", DirEntryType::Directory),
            dentry(b, "z", DirEntryType::Regular),
        ];
        let out = VecCursor::new(rows).group_by(ChildCounter::default()).collect_vec().unwrap();
        assert_eq!(
            out,
            vec![
                (a, ChildCounts { children: 2, subdirs: 1 }),
                (b, ChildCounts { children: 1, subdirs: 0 }),
            ]
        );
    }

    #[test]
    fn test_node_set() {
        let id = EntryId::new(4, 4, 4);
        let rows = vec![(id, NodeId::new(1)), (id, NodeId::new(1)), (id, NodeId::new(3))];
        let out = VecCursor::new(rows).group_by(NodeSet::default()).collect_vec().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.len(), 2);
    }
}
