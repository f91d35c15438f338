//! Identifiers and entity records gathered from metadata and storage servers.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::FsckError;

/// Unique identifier assigned to every filesystem object by the metadata tier.
///
/// Ordering is lexicographic over `(sequence, timestamp, node)`. The store keeps
/// a fixed-width hex rendering of the same triple so that `ORDER BY` on the key
/// column agrees with [`Ord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EntryId {
    /// Per-node sequence number.
    pub sequence: u32,
    /// Creation timestamp (seconds).
    pub timestamp: u32,
    /// Numeric ID of the creating metadata node; zero for special IDs.
    pub node: u32,
}

impl EntryId {
    /// The empty ID used as parent of the root directory.
    pub const ANCHOR: EntryId = EntryId::new(0, 0, 0);
    /// The root directory.
    pub const ROOT: EntryId = EntryId::new(1, 0, 0);
    /// The disposal directory holding unlinked-but-open files.
    pub const DISPOSAL: EntryId = EntryId::new(2, 0, 0);

    /// Creates a new entry ID.
    pub const fn new(sequence: u32, timestamp: u32, node: u32) -> Self {
        Self { sequence, timestamp, node }
    }

    /// Returns true for the anchor, root and disposal IDs.
    pub fn is_special(&self) -> bool {
        self.node == 0
    }

    /// Returns true if this is the root or disposal directory.
    pub fn is_root_or_disposal(&self) -> bool {
        *self == Self::ROOT || *self == Self::DISPOSAL
    }

    /// Fixed-width store key: 24 uppercase hex digits.
    pub fn to_key(&self) -> String {
        format!("{:08X}{:08X}{:08X}", self.sequence, self.timestamp, self.node)
    }

    /// Parses the fixed-width store key produced by [`EntryId::to_key`].
    pub fn from_key(key: &str) -> Result<Self, FsckError> {
        if key.len() != 24 || !key.is_ascii() {
            return Err(FsckError::InvalidEntryId(key.to_string()));
        }
        let part = |range: std::ops::Range<usize>| {
            u32::from_str_radix(&key[range], 16).map_err(|_| FsckError::InvalidEntryId(key.to_string()))
        };
        Ok(Self::new(part(0..8)?, part(8..16)?, part(16..24)?))
    }

    /// The timestamp component as rendered in the display form.
    ///
    /// Special IDs have no timestamp component and render whole.
    pub fn timestamp_str(&self) -> String {
        if self.is_special() {
            self.to_string()
        } else {
            format!("{:X}", self.timestamp)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ANCHOR {
            Ok(())
        } else if *self == Self::ROOT {
            write!(f, "root")
        } else if *self == Self::DISPOSAL {
            write!(f, "disposal")
        } else {
            write!(f, "{:X}-{:X}-{:X}", self.sequence, self.timestamp, self.node)
        }
    }
}

impl FromStr for EntryId {
    type Err = FsckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => return Ok(Self::ANCHOR),
            "root" => return Ok(Self::ROOT),
            "disposal" => return Ok(Self::DISPOSAL),
            _ => {}
        }

        let invalid = || FsckError::InvalidEntryId(s.to_string());
        let mut parts = s.split('-');
        let mut next = || -> Result<u32, FsckError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 8 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            u32::from_str_radix(part, 16).map_err(|_| invalid())
        };
        let id = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl ToSql for EntryId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_key()))
    }
}

impl FromSql for EntryId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        EntryId::from_key(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl From<EntryId> for rusqlite::types::Value {
    fn from(id: EntryId) -> Self {
        rusqlite::types::Value::Text(id.to_key())
    }
}

/// Numeric ID of a metadata node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(u16);

impl NodeId {
    /// Creates a new node ID.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw node number.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for NodeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.0)))
    }
}

impl FromSql for NodeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        u16::try_from(raw).map(NodeId).map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

impl From<NodeId> for rusqlite::types::Value {
    fn from(id: NodeId) -> Self {
        rusqlite::types::Value::Integer(i64::from(id.0))
    }
}

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Stable integer code used in the store.
            pub fn code(&self) -> i64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Decodes a stored integer code.
            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_i64()?;
                $name::from_code(raw).ok_or(FromSqlError::OutOfRange(raw))
            }
        }

        impl From<$name> for rusqlite::types::Value {
            fn from(v: $name) -> Self {
                rusqlite::types::Value::Integer(v.code())
            }
        }
    };
}

coded_enum!(
    /// Type of the object a directory entry points to.
    DirEntryType {
        /// Unknown or corrupt entry type.
        Invalid = 0,
        /// Directory.
        Directory = 1,
        /// Regular file.
        Regular = 2,
        /// Symbolic link.
        Symlink = 3,
        /// Block device node.
        BlockDev = 4,
        /// Character device node.
        CharDev = 5,
        /// Named pipe.
        Fifo = 6,
        /// Unix domain socket.
        Socket = 7,
    }
);

impl DirEntryType {
    /// Returns true if the entry refers to a directory inode.
    pub fn is_directory(&self) -> bool {
        matches!(self, DirEntryType::Directory)
    }
}

coded_enum!(
    /// Layout of a file's data across storage targets.
    StripePatternType {
        /// Plain striping over storage targets.
        Raid0 = 0,
        /// Striping over mirrored buddy groups.
        BuddyMirror = 1,
    }
);

coded_enum!(
    /// Whether a used target ID names a storage target or a buddy group.
    TargetIdType {
        /// Storage target.
        Target = 0,
        /// Mirror buddy group.
        BuddyGroup = 1,
    }
);

coded_enum!(
    /// What happened to an entity while the scan was running.
    ModificationEventType {
        /// Entity was created.
        Created = 0,
        /// Entity was modified in place.
        Modified = 1,
        /// Entity was removed.
        Removed = 2,
    }
);

/// Path-info flag: the chunk path is derived from the original parent.
pub const PATH_INFO_ORIG_PARENT: u32 = 1;

/// A directory entry `(parent, name) -> id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry ID of the object the dentry names.
    pub id: EntryId,
    /// Name within the parent directory.
    pub name: String,
    /// Parent directory ID.
    pub parent_dir_id: EntryId,
    /// Node that owns the dentry.
    pub entry_owner_node_id: NodeId,
    /// Node the dentry claims owns the inode.
    pub inode_owner_node_id: NodeId,
    /// Type of the named object.
    pub entry_type: DirEntryType,
    /// Whether the file inode is inlined into this dentry.
    pub has_inlined_inode: bool,
    /// Node the dentry was read from.
    pub save_node_id: NodeId,
    /// Device of the dentry file on the metadata server.
    pub save_device: i32,
    /// Local inode of the dentry file on the metadata server.
    pub save_inode: u64,
}

/// A file inode, either inlined or standalone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInode {
    /// Entry ID.
    pub id: EntryId,
    /// Parent directory ID.
    pub parent_dir_id: EntryId,
    /// Node that owns the parent directory.
    pub parent_node_id: NodeId,
    /// UID of the original parent directory, used for chunk paths.
    pub orig_parent_uid: u32,
    /// Original parent directory, used for chunk paths.
    pub orig_parent_entry_id: EntryId,
    /// Path-info feature flags.
    pub path_info_flags: u32,
    /// Owner user.
    pub uid: u32,
    /// Owner group.
    pub gid: u32,
    /// Stored file size.
    pub file_size: u64,
    /// Stored hardlink count.
    pub num_hardlinks: u32,
    /// Stripe pattern type.
    pub stripe_pattern_type: StripePatternType,
    /// Targets (or buddy groups) of the stripe pattern, in stripe order.
    pub stripe_targets: Vec<u16>,
    /// Chunk size of the stripe pattern.
    pub chunk_size: u32,
    /// Node the inode was read from.
    pub save_node_id: NodeId,
    /// Whether the inode is inlined into its dentry.
    pub is_inlined: bool,
}

impl FileInode {
    /// Returns true if the chunk path is derived from the original parent.
    pub fn has_orig_parent_path(&self) -> bool {
        self.path_info_flags & PATH_INFO_ORIG_PARENT != 0
    }
}

/// A directory inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInode {
    /// Entry ID.
    pub id: EntryId,
    /// Parent directory ID.
    pub parent_dir_id: EntryId,
    /// Node that owns the parent directory.
    pub parent_node_id: NodeId,
    /// Node the inode claims as owner.
    pub owner_node_id: NodeId,
    /// Node the inode was read from.
    pub save_node_id: NodeId,
    /// Stored number of entries.
    pub size: u64,
    /// Stored hardlink count.
    pub num_hardlinks: u32,
}

/// A chunk file on a storage target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Entry ID of the owning file.
    pub id: EntryId,
    /// Storage target holding the chunk.
    pub target_id: u16,
    /// Buddy group, or 0 when unmirrored.
    pub buddy_group_id: u16,
    /// Size of the chunk file.
    pub file_size: u64,
    /// Owner user of the chunk file.
    pub uid: u32,
    /// Owner group of the chunk file.
    pub gid: u32,
    /// Path of the chunk relative to the target's chunk root.
    pub saved_path: String,
}

/// A directory's content directory on a metadata node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContDir {
    /// Entry ID of the directory.
    pub id: EntryId,
    /// Node the content directory was found on.
    pub save_node_id: NodeId,
}

/// A dentry-by-ID file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsId {
    /// Entry ID the file refers to.
    pub id: EntryId,
    /// Parent directory ID.
    pub parent_dir_id: EntryId,
    /// Node the file was found on.
    pub save_node_id: NodeId,
    /// Device of the linked dentry.
    pub save_device: i32,
    /// Local inode of the linked dentry.
    pub save_inode: u64,
}

/// A target or buddy group referenced by some stripe pattern.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsedTarget {
    /// Target or buddy group ID.
    pub id: u16,
    /// Which namespace `id` belongs to.
    pub kind: TargetIdType,
}

/// Notice that an entity changed during the scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationEvent {
    /// What happened.
    pub event_type: ModificationEventType,
    /// Affected entity.
    pub id: EntryId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_ids_display() {
        assert_eq!(EntryId::ANCHOR.to_string(), "");
        assert_eq!(EntryId::ROOT.to_string(), "root");
        assert_eq!(EntryId::DISPOSAL.to_string(), "disposal");
        assert!(EntryId::ROOT.is_special());
    }

    #[test]
    fn test_display_parse() {
        let id = EntryId::new(0x1A, 0x5F3C21, 2);
        assert_eq!(id.to_string(), "1A-5F3C21-2");
        assert_eq!("1A-5F3C21-2".parse::<EntryId>().unwrap(), id);
        assert_eq!("root".parse::<EntryId>().unwrap(), EntryId::ROOT);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("1A-5F".parse::<EntryId>().is_err());
        assert!("1A-5F-2-3".parse::<EntryId>().is_err());
        assert!("XY-1-2".parse::<EntryId>().is_err());
        assert!("123456789-1-2".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_key_order_matches_ord() {
        let a = EntryId::new(1, 0xFFFF_FFFF, 9);
        let b = EntryId::new(2, 0, 1);
        assert!(a < b);
        assert!(a.to_key() < b.to_key());
        assert_eq!(EntryId::from_key(&b.to_key()).unwrap(), b);
    }

    #[test]
    fn test_timestamp_str() {
        assert_eq!(EntryId::new(3, 0x5A1B2C3D, 1).timestamp_str(), "5A1B2C3D");
        assert_eq!(EntryId::ROOT.timestamp_str(), "root");
    }

    #[test]
    fn test_coded_enum_roundtrip() {
        assert_eq!(DirEntryType::from_code(1), Some(DirEntryType::Directory));
        assert_eq!(TargetIdType::BuddyGroup.code(), 1);
        assert!(StripePatternType::from_code(9).is_none());
    }

    #[test]
    fn test_entry_id_sql_roundtrip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let id = EntryId::new(7, 8, 9);
        let back: EntryId = conn.query_row("SELECT ?1", [id], |r| r.get(0)).unwrap();
        assert_eq!(back, id);
    }
}
