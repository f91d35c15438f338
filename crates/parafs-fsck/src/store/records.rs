//! Row mapping between entity structs and their base tables.

use rusqlite::types::{Type, Value};
use rusqlite::Row;

use crate::types::{
    Chunk, ContDir, DirEntry, DirInode, FileInode, FsId, ModificationEvent, UsedTarget,
};

/// An entity stored in one base table.
pub trait Record: Sized + Send + 'static {
    /// Base table name.
    const TABLE: &'static str;
    /// Stored columns, in [`Record::to_values`] order.
    const COLUMNS: &'static [&'static str];
    /// Natural key columns (the table's primary key).
    const KEY: &'static [&'static str];
    /// Default scan order. Must be unique per row.
    const ORDER: &'static [&'static str];
    /// Re-inserting an existing key counts as success.
    const INSERT_OR_IGNORE: bool = false;

    /// Decodes a row whose entity columns start at `offset`.
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self>;

    /// Column values in [`Record::COLUMNS`] order.
    fn to_values(&self) -> Vec<Value>;

    /// Key values in [`Record::KEY`] order.
    fn key_values(&self) -> Vec<Value>;
}

fn int(v: impl Into<i64>) -> Value {
    Value::Integer(v.into())
}

/// Sizes are stored as plain integers; values above `i64::MAX` wrap and are
/// not meant to be compared in SQL.
fn u64_value(v: u64) -> Value {
    Value::Integer(v as i64)
}

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

/// Encoding for `u64` columns that take part in a scan order. Flipping the
/// sign bit makes SQLite's signed order agree with `u64` order over the
/// whole range.
fn ordered_u64_value(v: u64) -> Value {
    Value::Integer((v ^ (1 << 63)) as i64)
}

fn get_ordered_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok((row.get::<_, i64>(idx)? as u64) ^ (1 << 63))
}

fn encode_targets(targets: &[u16]) -> String {
    targets.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",")
}

fn decode_targets(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u16>> {
    let text: String = row.get(idx)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|t| {
            t.parse::<u16>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .collect()
}

impl Record for DirEntry {
    const TABLE: &'static str = "dir_entries";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "parent_dir_id",
        "entry_owner_node_id",
        "inode_owner_node_id",
        "entry_type",
        "has_inlined_inode",
        "save_node_id",
        "save_device",
        "save_inode",
    ];
    const KEY: &'static [&'static str] = &["parent_dir_id", "name"];
    const ORDER: &'static [&'static str] =
        &["id", "parent_dir_id", "save_node_id", "save_device", "save_inode", "name"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(DirEntry {
            id: row.get(o)?,
            name: row.get(o + 1)?,
            parent_dir_id: row.get(o + 2)?,
            entry_owner_node_id: row.get(o + 3)?,
            inode_owner_node_id: row.get(o + 4)?,
            entry_type: row.get(o + 5)?,
            has_inlined_inode: row.get(o + 6)?,
            save_node_id: row.get(o + 7)?,
            save_device: row.get(o + 8)?,
            save_inode: get_ordered_u64(row, o + 9)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            Value::Text(self.name.clone()),
            self.parent_dir_id.into(),
            self.entry_owner_node_id.into(),
            self.inode_owner_node_id.into(),
            self.entry_type.into(),
            int(self.has_inlined_inode),
            self.save_node_id.into(),
            int(self.save_device),
            ordered_u64_value(self.save_inode),
        ]
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.parent_dir_id.into(), Value::Text(self.name.clone())]
    }
}

/// Scan order grouping dentries by their parent directory.
pub const DIR_ENTRIES_BY_PARENT: &[&str] = &["parent_dir_id", "name"];

impl Record for FileInode {
    const TABLE: &'static str = "file_inodes";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "parent_dir_id",
        "parent_node_id",
        "orig_parent_uid",
        "orig_parent_entry_id",
        "path_info_flags",
        "uid",
        "gid",
        "file_size",
        "num_hardlinks",
        "stripe_pattern_type",
        "stripe_targets",
        "chunk_size",
        "save_node_id",
        "is_inlined",
    ];
    const KEY: &'static [&'static str] = &["id", "save_node_id"];
    const ORDER: &'static [&'static str] = &["id", "save_node_id"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(FileInode {
            id: row.get(o)?,
            parent_dir_id: row.get(o + 1)?,
            parent_node_id: row.get(o + 2)?,
            orig_parent_uid: row.get(o + 3)?,
            orig_parent_entry_id: row.get(o + 4)?,
            path_info_flags: row.get(o + 5)?,
            uid: row.get(o + 6)?,
            gid: row.get(o + 7)?,
            file_size: get_u64(row, o + 8)?,
            num_hardlinks: row.get(o + 9)?,
            stripe_pattern_type: row.get(o + 10)?,
            stripe_targets: decode_targets(row, o + 11)?,
            chunk_size: row.get(o + 12)?,
            save_node_id: row.get(o + 13)?,
            is_inlined: row.get(o + 14)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.parent_dir_id.into(),
            self.parent_node_id.into(),
            int(self.orig_parent_uid),
            self.orig_parent_entry_id.into(),
            int(self.path_info_flags),
            int(self.uid),
            int(self.gid),
            u64_value(self.file_size),
            int(self.num_hardlinks),
            self.stripe_pattern_type.into(),
            Value::Text(encode_targets(&self.stripe_targets)),
            int(self.chunk_size),
            self.save_node_id.into(),
            int(self.is_inlined),
        ]
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.save_node_id.into()]
    }
}

impl Record for DirInode {
    const TABLE: &'static str = "dir_inodes";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "parent_dir_id",
        "parent_node_id",
        "owner_node_id",
        "save_node_id",
        "size",
        "num_hardlinks",
    ];
    const KEY: &'static [&'static str] = &["id", "save_node_id"];
    const ORDER: &'static [&'static str] = &["id", "save_node_id"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(DirInode {
            id: row.get(o)?,
            parent_dir_id: row.get(o + 1)?,
            parent_node_id: row.get(o + 2)?,
            owner_node_id: row.get(o + 3)?,
            save_node_id: row.get(o + 4)?,
            size: get_u64(row, o + 5)?,
            num_hardlinks: row.get(o + 6)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.parent_dir_id.into(),
            self.parent_node_id.into(),
            self.owner_node_id.into(),
            self.save_node_id.into(),
            u64_value(self.size),
            int(self.num_hardlinks),
        ]
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.save_node_id.into()]
    }
}

impl Record for Chunk {
    const TABLE: &'static str = "chunks";
    const COLUMNS: &'static [&'static str] =
        &["id", "target_id", "buddy_group_id", "file_size", "uid", "gid", "saved_path"];
    const KEY: &'static [&'static str] = &["id", "target_id", "buddy_group_id"];
    const ORDER: &'static [&'static str] = &["id", "target_id", "buddy_group_id"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(Chunk {
            id: row.get(o)?,
            target_id: row.get(o + 1)?,
            buddy_group_id: row.get(o + 2)?,
            file_size: get_u64(row, o + 3)?,
            uid: row.get(o + 4)?,
            gid: row.get(o + 5)?,
            saved_path: row.get(o + 6)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            int(self.target_id),
            int(self.buddy_group_id),
            u64_value(self.file_size),
            int(self.uid),
            int(self.gid),
            Value::Text(self.saved_path.clone()),
        ]
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), int(self.target_id), int(self.buddy_group_id)]
    }
}

impl Record for ContDir {
    const TABLE: &'static str = "cont_dirs";
    const COLUMNS: &'static [&'static str] = &["id", "save_node_id"];
    const KEY: &'static [&'static str] = &["id", "save_node_id"];
    const ORDER: &'static [&'static str] = &["id", "save_node_id"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(ContDir { id: row.get(o)?, save_node_id: row.get(o + 1)? })
    }

    fn to_values(&self) -> Vec<Value> {
        self.key_values()
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.save_node_id.into()]
    }
}

impl Record for FsId {
    const TABLE: &'static str = "fs_ids";
    const COLUMNS: &'static [&'static str] =
        &["id", "parent_dir_id", "save_node_id", "save_device", "save_inode"];
    const KEY: &'static [&'static str] = &["id", "parent_dir_id", "save_node_id"];
    const ORDER: &'static [&'static str] = &["id", "parent_dir_id", "save_node_id"];

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(FsId {
            id: row.get(o)?,
            parent_dir_id: row.get(o + 1)?,
            save_node_id: row.get(o + 2)?,
            save_device: row.get(o + 3)?,
            save_inode: get_ordered_u64(row, o + 4)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.parent_dir_id.into(),
            self.save_node_id.into(),
            int(self.save_device),
            ordered_u64_value(self.save_inode),
        ]
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.parent_dir_id.into(), self.save_node_id.into()]
    }
}

impl Record for UsedTarget {
    const TABLE: &'static str = "used_targets";
    const COLUMNS: &'static [&'static str] = &["id", "target_id_type"];
    const KEY: &'static [&'static str] = &["id", "target_id_type"];
    const ORDER: &'static [&'static str] = &["id", "target_id_type"];
    const INSERT_OR_IGNORE: bool = true;

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(UsedTarget { id: row.get(o)?, kind: row.get(o + 1)? })
    }

    fn to_values(&self) -> Vec<Value> {
        self.key_values()
    }

    fn key_values(&self) -> Vec<Value> {
        vec![int(self.id), self.kind.into()]
    }
}

impl Record for ModificationEvent {
    const TABLE: &'static str = "modification_events";
    const COLUMNS: &'static [&'static str] = &["id", "event_type"];
    const KEY: &'static [&'static str] = &["id", "event_type"];
    const ORDER: &'static [&'static str] = &["id", "event_type"];
    const INSERT_OR_IGNORE: bool = true;

    fn from_row(row: &Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(ModificationEvent { id: row.get(o)?, event_type: row.get(o + 1)? })
    }

    fn to_values(&self) -> Vec<Value> {
        self.key_values()
    }

    fn key_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.event_type.into()]
    }
}
