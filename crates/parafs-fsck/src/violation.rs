//! Violation kinds, repair actions and typed violation values.

use std::collections::BTreeSet;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

use crate::types::{Chunk, ContDir, DirEntry, DirInode, EntryId, FileInode, FsId, NodeId, TargetIdType, UsedTarget};

/// Bit set in an ignore mask that stands for "unspecified error".
pub const ERROR_CODE_UNDEFINED: u32 = 1 << 19;

/// Ignore mask with every known error bit set.
pub const IGNORE_ALL_MASK: u32 = ERROR_CODE_UNDEFINED | (ERROR_CODE_UNDEFINED - 1);

/// Operator-chosen remediation for a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairAction {
    /// Delete the directory entry.
    DeleteDentry,
    /// Delete the file.
    DeleteFile,
    /// Create a directory inode with default values.
    CreateDefaultDirInode,
    /// Correct the owner node.
    CorrectOwner,
    /// Link into lost+found.
    LostAndFound,
    /// Create an empty content directory.
    CreateContDir,
    /// Delete the inode.
    DeleteInode,
    /// Delete the chunk.
    DeleteChunk,
    /// Delete the content directory.
    DeleteContDir,
    /// Update stored attributes.
    UpdateAttribs,
    /// Change the target ID in stripe patterns.
    ChangeTarget,
    /// Recreate the dentry-by-ID file.
    RecreateFsId,
    /// Recreate the directory entry file.
    RecreateDentry,
    /// Fix chunk ownership.
    FixPermissions,
    /// Move the chunk to its expected path.
    MoveChunk,
    /// Leave as is.
    Nothing,
    /// No decision yet.
    Undefined,
}

impl RepairAction {
    /// Every action, in code order.
    pub const ALL: [RepairAction; 17] = [
        RepairAction::DeleteDentry,
        RepairAction::DeleteFile,
        RepairAction::CreateDefaultDirInode,
        RepairAction::CorrectOwner,
        RepairAction::LostAndFound,
        RepairAction::CreateContDir,
        RepairAction::DeleteInode,
        RepairAction::DeleteChunk,
        RepairAction::DeleteContDir,
        RepairAction::UpdateAttribs,
        RepairAction::ChangeTarget,
        RepairAction::RecreateFsId,
        RepairAction::RecreateDentry,
        RepairAction::FixPermissions,
        RepairAction::MoveChunk,
        RepairAction::Nothing,
        RepairAction::Undefined,
    ];

    /// Stable integer code stored in error tables.
    pub fn code(&self) -> i64 {
        match self {
            RepairAction::DeleteDentry => 0,
            RepairAction::DeleteFile => 1,
            RepairAction::CreateDefaultDirInode => 2,
            RepairAction::CorrectOwner => 3,
            RepairAction::LostAndFound => 4,
            RepairAction::CreateContDir => 5,
            RepairAction::DeleteInode => 7,
            RepairAction::DeleteChunk => 8,
            RepairAction::DeleteContDir => 9,
            RepairAction::UpdateAttribs => 10,
            RepairAction::ChangeTarget => 11,
            RepairAction::RecreateFsId => 12,
            RepairAction::RecreateDentry => 13,
            RepairAction::FixPermissions => 14,
            RepairAction::MoveChunk => 15,
            RepairAction::Nothing => 16,
            RepairAction::Undefined => 17,
        }
    }

    /// Decodes a stored code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.code() == code)
    }

    /// Short name, e.g. `DeleteDentry`.
    pub fn short_name(&self) -> &'static str {
        match self {
            RepairAction::DeleteDentry => "DeleteDentry",
            RepairAction::DeleteFile => "DeleteFile",
            RepairAction::CreateDefaultDirInode => "CreateDefDirInode",
            RepairAction::CorrectOwner => "CorrectOwner",
            RepairAction::LostAndFound => "LostAndFound",
            RepairAction::CreateContDir => "CreateContDir",
            RepairAction::DeleteInode => "DeleteInode",
            RepairAction::DeleteChunk => "DeleteChunk",
            RepairAction::DeleteContDir => "DeleteContDir",
            RepairAction::UpdateAttribs => "UpdateAttribs",
            RepairAction::ChangeTarget => "ChangeTarget",
            RepairAction::RecreateFsId => "RecreateFsID",
            RepairAction::RecreateDentry => "RecreateDentry",
            RepairAction::FixPermissions => "FixPermissions",
            RepairAction::MoveChunk => "MoveChunk",
            RepairAction::Nothing => "Nothing",
            RepairAction::Undefined => "Undefined",
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl ToSql for RepairAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for RepairAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        RepairAction::from_code(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

/// Column layout of an entity's natural key in an error table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyShape {
    /// `(parent_dir_id, name)`.
    DirEntry,
    /// `(id, save_node_id)`.
    Inode,
    /// `(id, target_id, buddy_group_id)`.
    Chunk,
    /// `(id, parent_dir_id, save_node_id)`.
    FsId,
    /// `(target_id, target_id_type)`.
    Target,
    /// `(id)`.
    Entry,
}

impl KeyShape {
    /// Key columns in error tables.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            KeyShape::DirEntry => &["parent_dir_id", "name"],
            KeyShape::Inode => &["id", "save_node_id"],
            KeyShape::Chunk => &["id", "target_id", "buddy_group_id"],
            KeyShape::FsId => &["id", "parent_dir_id", "save_node_id"],
            KeyShape::Target => &["target_id", "target_id_type"],
            KeyShape::Entry => &["id"],
        }
    }

    /// Column types matching [`KeyShape::columns`].
    pub fn column_types(&self) -> &'static [&'static str] {
        match self {
            KeyShape::DirEntry => &["TEXT", "TEXT"],
            KeyShape::Inode => &["TEXT", "INTEGER"],
            KeyShape::Chunk => &["TEXT", "INTEGER", "INTEGER"],
            KeyShape::FsId => &["TEXT", "TEXT", "INTEGER"],
            KeyShape::Target => &["INTEGER", "INTEGER"],
            KeyShape::Entry => &["TEXT"],
        }
    }

    /// Columns of the referenced base table, in the same order.
    pub fn referenced_columns(&self) -> &'static [&'static str] {
        match self {
            KeyShape::Target => &["id", "target_id_type"],
            other => other.columns(),
        }
    }
}

/// Natural key of a checked entity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    /// A dentry.
    DirEntry {
        /// Parent directory.
        parent_dir_id: EntryId,
        /// Name in the parent.
        name: String,
    },
    /// A file inode, dir inode or content directory.
    Inode {
        /// Entry ID.
        id: EntryId,
        /// Node holding the object.
        save_node_id: NodeId,
    },
    /// A chunk.
    Chunk {
        /// Owning file.
        id: EntryId,
        /// Storage target.
        target_id: u16,
        /// Buddy group.
        buddy_group_id: u16,
    },
    /// A dentry-by-ID file.
    FsId {
        /// Entry ID.
        id: EntryId,
        /// Parent directory.
        parent_dir_id: EntryId,
        /// Node holding the file.
        save_node_id: NodeId,
    },
    /// A used target or buddy group.
    Target {
        /// Target or group ID.
        id: u16,
        /// Namespace of `id`.
        kind: TargetIdType,
    },
    /// An entry ID without a single owning row.
    Entry {
        /// Entry ID.
        id: EntryId,
    },
}

impl EntityKey {
    /// Key of a dentry.
    pub fn dentry(d: &DirEntry) -> Self {
        EntityKey::DirEntry { parent_dir_id: d.parent_dir_id, name: d.name.clone() }
    }

    /// Key of a file inode.
    pub fn file_inode(i: &FileInode) -> Self {
        EntityKey::Inode { id: i.id, save_node_id: i.save_node_id }
    }

    /// Key of a dir inode.
    pub fn dir_inode(i: &DirInode) -> Self {
        EntityKey::Inode { id: i.id, save_node_id: i.save_node_id }
    }

    /// Key of a content directory.
    pub fn cont_dir(c: &ContDir) -> Self {
        EntityKey::Inode { id: c.id, save_node_id: c.save_node_id }
    }

    /// Key of a chunk.
    pub fn chunk(c: &Chunk) -> Self {
        EntityKey::Chunk { id: c.id, target_id: c.target_id, buddy_group_id: c.buddy_group_id }
    }

    /// Key of a dentry-by-ID file.
    pub fn fs_id(f: &FsId) -> Self {
        EntityKey::FsId { id: f.id, parent_dir_id: f.parent_dir_id, save_node_id: f.save_node_id }
    }

    /// Key of a used target.
    pub fn target(t: &UsedTarget) -> Self {
        EntityKey::Target { id: t.id, kind: t.kind }
    }

    /// Column layout of this key.
    pub fn shape(&self) -> KeyShape {
        match self {
            EntityKey::DirEntry { .. } => KeyShape::DirEntry,
            EntityKey::Inode { .. } => KeyShape::Inode,
            EntityKey::Chunk { .. } => KeyShape::Chunk,
            EntityKey::FsId { .. } => KeyShape::FsId,
            EntityKey::Target { .. } => KeyShape::Target,
            EntityKey::Entry { .. } => KeyShape::Entry,
        }
    }

    /// Key values in [`KeyShape::columns`] order.
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            EntityKey::DirEntry { parent_dir_id, name } => vec![(*parent_dir_id).into(), Value::Text(name.clone())],
            EntityKey::Inode { id, save_node_id } => vec![(*id).into(), (*save_node_id).into()],
            EntityKey::Chunk { id, target_id, buddy_group_id } => vec![
                (*id).into(),
                Value::Integer(i64::from(*target_id)),
                Value::Integer(i64::from(*buddy_group_id)),
            ],
            EntityKey::FsId { id, parent_dir_id, save_node_id } => {
                vec![(*id).into(), (*parent_dir_id).into(), (*save_node_id).into()]
            }
            EntityKey::Target { id, kind } => vec![Value::Integer(i64::from(*id)), Value::Integer(kind.code())],
            EntityKey::Entry { id } => vec![(*id).into()],
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::DirEntry { parent_dir_id, name } => write!(f, "dentry {}/{}", parent_dir_id, name),
            EntityKey::Inode { id, save_node_id } => write!(f, "{} on node {}", id, save_node_id),
            EntityKey::Chunk { id, target_id, buddy_group_id } => {
                write!(f, "chunk {} on target {} (group {})", id, target_id, buddy_group_id)
            }
            EntityKey::FsId { id, parent_dir_id, save_node_id } => {
                write!(f, "fsid {} in {} on node {}", id, parent_dir_id, save_node_id)
            }
            EntityKey::Target { id, kind } => write!(f, "{:?} {}", kind, id),
            EntityKey::Entry { id } => write!(f, "{}", id),
        }
    }
}

/// Every kind of violation the check catalog can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Dentry without a matching inode.
    DanglingDentry,
    /// Dentry names the wrong inode owner node.
    WrongOwnerInDentry,
    /// Dir inode stores the wrong owner node.
    WrongInodeOwner,
    /// Dentry-by-ID file missing for an inlined inode.
    BrokenFsId,
    /// Dentry-by-ID file without a dentry.
    OrphanedFsId,
    /// Dir inode without a dentry.
    OrphanedDirInode,
    /// File inode without a dentry.
    OrphanedFileInode,
    /// Chunk without a file inode.
    OrphanedChunk,
    /// Dir inode without a content directory.
    MissingContDir,
    /// Content directory without a dir inode.
    OrphanedContDir,
    /// File size or link count disagree with chunks and dentries.
    WrongFileAttribs,
    /// Dir size or link count disagree with its children.
    WrongDirAttribs,
    /// Target or buddy group used but not present.
    MissingTarget,
    /// File striped over a missing target.
    FileWithMissingTarget,
    /// Entry ID held by inodes on several nodes.
    DuplicateInodeId,
    /// Several chunks for one file on one target.
    DuplicateChunk,
    /// Chunk ownership differs from its inode.
    ChunkWithWrongPermissions,
    /// Chunk not stored at its derived path.
    ChunkInWrongPath,
}

impl ViolationKind {
    /// Every kind, in bit order.
    pub const ALL: [ViolationKind; 18] = [
        ViolationKind::DanglingDentry,
        ViolationKind::WrongOwnerInDentry,
        ViolationKind::WrongInodeOwner,
        ViolationKind::BrokenFsId,
        ViolationKind::OrphanedFsId,
        ViolationKind::OrphanedDirInode,
        ViolationKind::OrphanedFileInode,
        ViolationKind::OrphanedChunk,
        ViolationKind::MissingContDir,
        ViolationKind::OrphanedContDir,
        ViolationKind::WrongFileAttribs,
        ViolationKind::WrongDirAttribs,
        ViolationKind::MissingTarget,
        ViolationKind::FileWithMissingTarget,
        ViolationKind::DuplicateInodeId,
        ViolationKind::DuplicateChunk,
        ViolationKind::ChunkWithWrongPermissions,
        ViolationKind::ChunkInWrongPath,
    ];

    /// Error code bit used in ignore masks.
    pub fn code(&self) -> u32 {
        match self {
            ViolationKind::DanglingDentry => 1,
            ViolationKind::WrongOwnerInDentry => 1 << 1,
            ViolationKind::WrongInodeOwner => 1 << 2,
            ViolationKind::BrokenFsId => 1 << 3,
            ViolationKind::OrphanedFsId => 1 << 4,
            ViolationKind::OrphanedDirInode => 1 << 5,
            ViolationKind::OrphanedFileInode => 1 << 6,
            ViolationKind::OrphanedChunk => 1 << 7,
            ViolationKind::MissingContDir => 1 << 8,
            ViolationKind::OrphanedContDir => 1 << 9,
            ViolationKind::WrongFileAttribs => 1 << 10,
            ViolationKind::WrongDirAttribs => 1 << 11,
            ViolationKind::MissingTarget => 1 << 12,
            ViolationKind::FileWithMissingTarget => 1 << 13,
            ViolationKind::DuplicateInodeId => 1 << 14,
            ViolationKind::DuplicateChunk => 1 << 15,
            ViolationKind::ChunkWithWrongPermissions => 1 << 17,
            ViolationKind::ChunkInWrongPath => 1 << 18,
        }
    }

    /// Short name, e.g. `DanglingDentry`.
    pub fn short_name(&self) -> &'static str {
        match self {
            ViolationKind::DanglingDentry => "DanglingDentry",
            ViolationKind::WrongOwnerInDentry => "WrongOwnerInDentry",
            ViolationKind::WrongInodeOwner => "WrongInodeOwner",
            ViolationKind::BrokenFsId => "BrokenFsID",
            ViolationKind::OrphanedFsId => "OrphanedFsID",
            ViolationKind::OrphanedDirInode => "OrphanedDirInode",
            ViolationKind::OrphanedFileInode => "OrphanedFileInode",
            ViolationKind::OrphanedChunk => "OrphanedChunk",
            ViolationKind::MissingContDir => "MissingContDir",
            ViolationKind::OrphanedContDir => "OrphanedContDir",
            ViolationKind::WrongFileAttribs => "WrongFileAttribs",
            ViolationKind::WrongDirAttribs => "WrongDirAttribs",
            ViolationKind::MissingTarget => "MissingTarget",
            ViolationKind::FileWithMissingTarget => "FileWithMissingTarget",
            ViolationKind::DuplicateInodeId => "DuplicateInodeID",
            ViolationKind::DuplicateChunk => "DuplicateChunk",
            ViolationKind::ChunkWithWrongPermissions => "ChunkWithWrongPermissions",
            ViolationKind::ChunkInWrongPath => "ChunkInWrongPath",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ViolationKind::DanglingDentry => "Dangling directory entry",
            ViolationKind::WrongOwnerInDentry => "Dentry points to inode on wrong node",
            ViolationKind::WrongInodeOwner => "Wrong owner node saved in inode",
            ViolationKind::BrokenFsId => "Dentry-by-ID file is broken or missing",
            ViolationKind::OrphanedFsId => "Dentry-by-ID file is present, but no corresponding dentry",
            ViolationKind::OrphanedDirInode => "Dir inode without a dentry pointing to it (orphaned inode)",
            ViolationKind::OrphanedFileInode => "File inode without a dentry pointing to it (orphaned inode)",
            ViolationKind::OrphanedChunk => "Chunk without an inode pointing to it (orphaned chunk)",
            ViolationKind::MissingContDir => "Directory inode without a content directory",
            ViolationKind::OrphanedContDir => "Content directory without an inode",
            ViolationKind::WrongFileAttribs => "Attributes of file inode are wrong",
            ViolationKind::WrongDirAttribs => "Attributes of dir inode are wrong",
            ViolationKind::MissingTarget => "Target is used, but does not exist",
            ViolationKind::FileWithMissingTarget => "File has a missing target in stripe pattern",
            ViolationKind::DuplicateInodeId => "Inode ID is used on more than one node",
            ViolationKind::DuplicateChunk => "File has more than one chunk on one target",
            ViolationKind::ChunkWithWrongPermissions => "Chunk has wrong permissions",
            ViolationKind::ChunkInWrongPath => "Chunk is saved in wrong path",
        }
    }

    /// Name of the error table holding this kind.
    pub fn table(&self) -> String {
        format!("err_{}", self.short_name().to_ascii_lowercase())
    }

    /// Natural-key layout of the checked entity.
    pub fn key_shape(&self) -> KeyShape {
        match self {
            ViolationKind::DanglingDentry
            | ViolationKind::WrongOwnerInDentry
            | ViolationKind::BrokenFsId
            | ViolationKind::FileWithMissingTarget => KeyShape::DirEntry,
            ViolationKind::WrongInodeOwner
            | ViolationKind::OrphanedDirInode
            | ViolationKind::MissingContDir
            | ViolationKind::WrongDirAttribs
            | ViolationKind::OrphanedFileInode
            | ViolationKind::WrongFileAttribs
            | ViolationKind::OrphanedContDir => KeyShape::Inode,
            ViolationKind::OrphanedChunk
            | ViolationKind::DuplicateChunk
            | ViolationKind::ChunkWithWrongPermissions
            | ViolationKind::ChunkInWrongPath => KeyShape::Chunk,
            ViolationKind::OrphanedFsId => KeyShape::FsId,
            ViolationKind::MissingTarget => KeyShape::Target,
            ViolationKind::DuplicateInodeId => KeyShape::Entry,
        }
    }

    /// Base table the error table references, if any.
    pub fn base_table(&self) -> Option<&'static str> {
        match self {
            ViolationKind::DanglingDentry
            | ViolationKind::WrongOwnerInDentry
            | ViolationKind::BrokenFsId
            | ViolationKind::FileWithMissingTarget => Some("dir_entries"),
            ViolationKind::WrongInodeOwner
            | ViolationKind::OrphanedDirInode
            | ViolationKind::MissingContDir
            | ViolationKind::WrongDirAttribs => Some("dir_inodes"),
            ViolationKind::OrphanedFileInode | ViolationKind::WrongFileAttribs => Some("file_inodes"),
            ViolationKind::OrphanedContDir => Some("cont_dirs"),
            ViolationKind::OrphanedChunk
            | ViolationKind::DuplicateChunk
            | ViolationKind::ChunkWithWrongPermissions
            | ViolationKind::ChunkInWrongPath => Some("chunks"),
            ViolationKind::OrphanedFsId => Some("fs_ids"),
            ViolationKind::MissingTarget => Some("used_targets"),
            ViolationKind::DuplicateInodeId => None,
        }
    }

    /// Repair action suggested when the operator has not chosen one.
    pub fn default_repair_action(&self) -> RepairAction {
        match self {
            ViolationKind::DanglingDentry => RepairAction::DeleteDentry,
            ViolationKind::WrongOwnerInDentry | ViolationKind::WrongInodeOwner => RepairAction::CorrectOwner,
            ViolationKind::BrokenFsId => RepairAction::RecreateFsId,
            ViolationKind::OrphanedFsId => RepairAction::RecreateDentry,
            ViolationKind::OrphanedDirInode => RepairAction::LostAndFound,
            ViolationKind::OrphanedFileInode => RepairAction::DeleteInode,
            ViolationKind::OrphanedChunk => RepairAction::DeleteChunk,
            ViolationKind::MissingContDir => RepairAction::CreateContDir,
            ViolationKind::OrphanedContDir => RepairAction::CreateDefaultDirInode,
            ViolationKind::WrongFileAttribs | ViolationKind::WrongDirAttribs => RepairAction::UpdateAttribs,
            ViolationKind::ChunkWithWrongPermissions => RepairAction::FixPermissions,
            ViolationKind::ChunkInWrongPath => RepairAction::MoveChunk,
            ViolationKind::MissingTarget
            | ViolationKind::FileWithMissingTarget
            | ViolationKind::DuplicateInodeId
            | ViolationKind::DuplicateChunk => RepairAction::Nothing,
        }
    }

    /// Looks a kind up by its short name, ignoring case.
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.short_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Attribute values derived from an inode's chunks, children or dentries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InodeAttribs {
    /// Derived size (bytes for files, entry count for directories).
    pub size: u64,
    /// Derived hardlink count.
    pub num_hardlinks: u64,
}

/// One detected inconsistency together with its evidence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    /// Dentry whose inode does not exist.
    DanglingDentry(DirEntry),
    /// Dentry whose inode lives on another node.
    WrongOwnerInDentry {
        /// The dentry.
        dentry: DirEntry,
        /// Node the inode was actually found on.
        actual_owner: NodeId,
    },
    /// Dir inode whose owner differs from where it is stored.
    WrongInodeOwner(DirInode),
    /// Dentry with inlined inode but no matching dentry-by-ID file.
    BrokenFsId(DirEntry),
    /// Dentry-by-ID file without a dentry.
    OrphanedFsId(FsId),
    /// Dir inode without a dentry.
    OrphanedDirInode(DirInode),
    /// File inode without a dentry.
    OrphanedFileInode(FileInode),
    /// Chunk without a file inode.
    OrphanedChunk(Chunk),
    /// Dir inode without a content directory.
    MissingContDir(DirInode),
    /// Content directory without a dir inode.
    OrphanedContDir(ContDir),
    /// File inode with wrong size or link count.
    WrongFileAttribs {
        /// The inode as stored.
        inode: FileInode,
        /// Values derived from chunks and dentries.
        found: InodeAttribs,
    },
    /// Dir inode with wrong size or link count.
    WrongDirAttribs {
        /// The inode as stored.
        inode: DirInode,
        /// Values derived from the directory's children.
        found: InodeAttribs,
    },
    /// Entry ID present on several nodes.
    DuplicateInodeId {
        /// The shared entry ID.
        id: EntryId,
        /// Every node holding an inode with this ID.
        nodes: BTreeSet<NodeId>,
    },
    /// Several chunks of one file on one target.
    DuplicateChunk(Vec<Chunk>),
    /// Target or buddy group used but not present.
    MissingTarget(UsedTarget),
    /// File striped over a missing target; carries the file's dentry.
    FileWithMissingTarget(DirEntry),
    /// Chunk whose owner differs from its inode.
    ChunkWithWrongPermissions {
        /// The chunk.
        chunk: Chunk,
        /// Owner user of the inode.
        expected_uid: u32,
        /// Owner group of the inode.
        expected_gid: u32,
    },
    /// Chunk not stored at its derived path.
    ChunkInWrongPath {
        /// The chunk.
        chunk: Chunk,
        /// Path derived from the owning inode.
        expected_path: String,
    },
}

impl Violation {
    /// Kind of this violation.
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::DanglingDentry(_) => ViolationKind::DanglingDentry,
            Violation::WrongOwnerInDentry { .. } => ViolationKind::WrongOwnerInDentry,
            Violation::WrongInodeOwner(_) => ViolationKind::WrongInodeOwner,
            Violation::BrokenFsId(_) => ViolationKind::BrokenFsId,
            Violation::OrphanedFsId(_) => ViolationKind::OrphanedFsId,
            Violation::OrphanedDirInode(_) => ViolationKind::OrphanedDirInode,
            Violation::OrphanedFileInode(_) => ViolationKind::OrphanedFileInode,
            Violation::OrphanedChunk(_) => ViolationKind::OrphanedChunk,
            Violation::MissingContDir(_) => ViolationKind::MissingContDir,
            Violation::OrphanedContDir(_) => ViolationKind::OrphanedContDir,
            Violation::WrongFileAttribs { .. } => ViolationKind::WrongFileAttribs,
            Violation::WrongDirAttribs { .. } => ViolationKind::WrongDirAttribs,
            Violation::DuplicateInodeId { .. } => ViolationKind::DuplicateInodeId,
            Violation::DuplicateChunk(_) => ViolationKind::DuplicateChunk,
            Violation::MissingTarget(_) => ViolationKind::MissingTarget,
            Violation::FileWithMissingTarget(_) => ViolationKind::FileWithMissingTarget,
            Violation::ChunkWithWrongPermissions { .. } => ViolationKind::ChunkWithWrongPermissions,
            Violation::ChunkInWrongPath { .. } => ViolationKind::ChunkInWrongPath,
        }
    }

    /// Natural key of the checked entity.
    pub fn key(&self) -> EntityKey {
        match self {
            Violation::DanglingDentry(d)
            | Violation::BrokenFsId(d)
            | Violation::FileWithMissingTarget(d)
            | Violation::WrongOwnerInDentry { dentry: d, .. } => EntityKey::dentry(d),
            Violation::WrongInodeOwner(i)
            | Violation::OrphanedDirInode(i)
            | Violation::MissingContDir(i)
            | Violation::WrongDirAttribs { inode: i, .. } => EntityKey::dir_inode(i),
            Violation::OrphanedFileInode(i) | Violation::WrongFileAttribs { inode: i, .. } => {
                EntityKey::file_inode(i)
            }
            Violation::OrphanedContDir(c) => EntityKey::cont_dir(c),
            Violation::OrphanedChunk(c)
            | Violation::ChunkWithWrongPermissions { chunk: c, .. }
            | Violation::ChunkInWrongPath { chunk: c, .. } => EntityKey::chunk(c),
            Violation::DuplicateChunk(chunks) => match chunks.first() {
                Some(c) => EntityKey::chunk(c),
                None => EntityKey::Entry { id: EntryId::ANCHOR },
            },
            Violation::OrphanedFsId(f) => EntityKey::fs_id(f),
            Violation::MissingTarget(t) => EntityKey::target(t),
            Violation::DuplicateInodeId { id, .. } => EntityKey::Entry { id: *id },
        }
    }

    /// Owning node of the checked entity, or the storage target for chunk
    /// and target violations. Used for filtering.
    pub fn owner(&self) -> u16 {
        match self {
            Violation::DanglingDentry(d)
            | Violation::BrokenFsId(d)
            | Violation::FileWithMissingTarget(d)
            | Violation::WrongOwnerInDentry { dentry: d, .. } => d.save_node_id.as_u16(),
            Violation::WrongInodeOwner(i)
            | Violation::OrphanedDirInode(i)
            | Violation::MissingContDir(i)
            | Violation::WrongDirAttribs { inode: i, .. } => i.save_node_id.as_u16(),
            Violation::OrphanedFileInode(i) | Violation::WrongFileAttribs { inode: i, .. } => {
                i.save_node_id.as_u16()
            }
            Violation::OrphanedContDir(c) => c.save_node_id.as_u16(),
            Violation::OrphanedChunk(c)
            | Violation::ChunkWithWrongPermissions { chunk: c, .. }
            | Violation::ChunkInWrongPath { chunk: c, .. } => c.target_id,
            Violation::DuplicateChunk(chunks) => chunks.first().map(|c| c.target_id).unwrap_or(0),
            Violation::OrphanedFsId(f) => f.save_node_id.as_u16(),
            Violation::MissingTarget(t) => t.id,
            Violation::DuplicateInodeId { nodes, .. } => nodes.iter().next().map(|n| n.as_u16()).unwrap_or(0),
        }
    }

    /// Entry ID the violation is about, if it has a single one.
    pub fn entry_id(&self) -> Option<EntryId> {
        match self.key() {
            EntityKey::DirEntry { .. } => match self {
                Violation::DanglingDentry(d)
                | Violation::BrokenFsId(d)
                | Violation::FileWithMissingTarget(d)
                | Violation::WrongOwnerInDentry { dentry: d, .. } => Some(d.id),
                _ => None,
            },
            EntityKey::Inode { id, .. }
            | EntityKey::Chunk { id, .. }
            | EntityKey::FsId { id, .. }
            | EntityKey::Entry { id } => Some(id),
            EntityKey::Target { .. } => None,
        }
    }

    /// Repair action suggested for this particular violation.
    pub fn default_repair_action(&self) -> RepairAction {
        match self {
            Violation::DanglingDentry(d) if d.entry_type.is_directory() => RepairAction::CreateDefaultDirInode,
            other => other.kind().default_repair_action(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DirEntryType;

    fn dentry(name: &str, entry_type: DirEntryType) -> DirEntry {
        DirEntry {
            id: EntryId::new(5, 6, 1),
            name: name.to_string(),
            parent_dir_id: EntryId::ROOT,
            entry_owner_node_id: NodeId::new(1),
            inode_owner_node_id: NodeId::new(1),
            entry_type,
            has_inlined_inode: false,
            save_node_id: NodeId::new(3),
            save_device: 0,
            save_inode: 0,
        }
    }

    #[test]
    fn test_codes_are_distinct_bits() {
        let mut seen = 0u32;
        for kind in ViolationKind::ALL {
            assert_eq!(kind.code().count_ones(), 1, "{}", kind);
            assert_eq!(seen & kind.code(), 0, "{}", kind);
            seen |= kind.code();
        }
        assert_eq!(seen & ERROR_CODE_UNDEFINED, 0);
        assert_eq!(IGNORE_ALL_MASK & seen, seen);
    }

    #[test]
    fn test_repair_action_codes() {
        assert_eq!(RepairAction::Undefined.code(), 17);
        assert_eq!(RepairAction::DeleteInode.code(), 7);
        assert_eq!(RepairAction::from_code(6), None);
        for action in RepairAction::ALL {
            assert_eq!(RepairAction::from_code(action.code()), Some(action));
        }
    }

    #[test]
    fn test_tables_unique() {
        let tables: BTreeSet<String> = ViolationKind::ALL.iter().map(|k| k.table()).collect();
        assert_eq!(tables.len(), ViolationKind::ALL.len());
        assert_eq!(ViolationKind::DanglingDentry.table(), "err_danglingdentry");
    }

    #[test]
    fn test_key_matches_shape() {
        let v = Violation::DanglingDentry(dentry("a", DirEntryType::Regular));
        assert_eq!(v.key().shape(), v.kind().key_shape());
        assert_eq!(v.key().to_values().len(), v.kind().key_shape().columns().len());
        assert_eq!(v.owner(), 3);
        assert_eq!(v.entry_id(), Some(EntryId::new(5, 6, 1)));
    }

    #[test]
    fn test_dangling_dir_dentry_default_action() {
        let file = Violation::DanglingDentry(dentry("f", DirEntryType::Regular));
        let dir = Violation::DanglingDentry(dentry("d", DirEntryType::Directory));
        assert_eq!(file.default_repair_action(), RepairAction::DeleteDentry);
        assert_eq!(dir.default_repair_action(), RepairAction::CreateDefaultDirInode);
    }

    #[test]
    fn test_kind_from_short_name() {
        assert_eq!(ViolationKind::from_short_name("missingtarget"), Some(ViolationKind::MissingTarget));
        assert_eq!(ViolationKind::from_short_name("nope"), None);
    }
}
