//! Table layout of the fsck database.
//!
//! One base table per gathered entity kind, keyed by the entity's natural key,
//! and one error table per violation kind referencing its base table.

use std::time::Duration;

use rusqlite::Connection;

use crate::violation::ViolationKind;

const CREATE_DIR_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dir_entries (
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    parent_dir_id TEXT NOT NULL,
    entry_owner_node_id INTEGER NOT NULL,
    inode_owner_node_id INTEGER NOT NULL,
    entry_type INTEGER NOT NULL,
    has_inlined_inode INTEGER NOT NULL,
    save_node_id INTEGER NOT NULL,
    save_device INTEGER NOT NULL,
    save_inode INTEGER NOT NULL,
    PRIMARY KEY (parent_dir_id, name)
)
"#;

const CREATE_FILE_INODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_inodes (
    id TEXT NOT NULL,
    parent_dir_id TEXT NOT NULL,
    parent_node_id INTEGER NOT NULL,
    orig_parent_uid INTEGER NOT NULL,
    orig_parent_entry_id TEXT NOT NULL,
    path_info_flags INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    file_size INTEGER NOT NULL,
    num_hardlinks INTEGER NOT NULL,
    stripe_pattern_type INTEGER NOT NULL,
    stripe_targets TEXT NOT NULL,
    chunk_size INTEGER NOT NULL,
    save_node_id INTEGER NOT NULL,
    is_inlined INTEGER NOT NULL,
    PRIMARY KEY (id, save_node_id)
)
"#;

const CREATE_DIR_INODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dir_inodes (
    id TEXT NOT NULL,
    parent_dir_id TEXT NOT NULL,
    parent_node_id INTEGER NOT NULL,
    owner_node_id INTEGER NOT NULL,
    save_node_id INTEGER NOT NULL,
    size INTEGER NOT NULL,
    num_hardlinks INTEGER NOT NULL,
    PRIMARY KEY (id, save_node_id)
)
"#;

const CREATE_CHUNKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    buddy_group_id INTEGER NOT NULL,
    file_size INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    saved_path TEXT NOT NULL,
    PRIMARY KEY (id, target_id, buddy_group_id)
)
"#;

const CREATE_CONT_DIRS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cont_dirs (
    id TEXT NOT NULL,
    save_node_id INTEGER NOT NULL,
    PRIMARY KEY (id, save_node_id)
)
"#;

const CREATE_FS_IDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fs_ids (
    id TEXT NOT NULL,
    parent_dir_id TEXT NOT NULL,
    save_node_id INTEGER NOT NULL,
    save_device INTEGER NOT NULL,
    save_inode INTEGER NOT NULL,
    PRIMARY KEY (id, parent_dir_id, save_node_id)
)
"#;

const CREATE_USED_TARGETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS used_targets (
    id INTEGER NOT NULL,
    target_id_type INTEGER NOT NULL,
    PRIMARY KEY (id, target_id_type)
)
"#;

const CREATE_MODIFICATION_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS modification_events (
    id TEXT NOT NULL,
    event_type INTEGER NOT NULL,
    PRIMARY KEY (id, event_type)
)
"#;

/// Index statements for secondary scan orders.
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_dir_entries_id ON dir_entries(id, parent_dir_id, save_node_id, save_device, save_inode, name)",
];

/// Base tables in dependency order.
pub const BASE_TABLES: &[&str] = &[
    "dir_entries",
    "file_inodes",
    "dir_inodes",
    "chunks",
    "cont_dirs",
    "fs_ids",
    "used_targets",
    "modification_events",
];

/// Per-connection settings.
const CONNECTION_PRAGMAS: &str = r#"
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA cache_size = -65536;
PRAGMA foreign_keys = ON;
"#;

/// How long SQLite itself retries on a locked database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies per-connection pragmas. Called for every pooled connection.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(())
}

/// DDL of the error table for `kind`.
pub fn error_table_ddl(kind: ViolationKind) -> String {
    let shape = kind.key_shape();
    let key_columns = shape.columns();

    let mut columns: Vec<String> = key_columns
        .iter()
        .zip(shape.column_types())
        .map(|(name, ty)| format!("{} {} NOT NULL", name, ty))
        .collect();
    columns.push("node_id INTEGER NOT NULL".to_string());
    columns.push("violation TEXT NOT NULL".to_string());
    columns.push("repair_action INTEGER NOT NULL DEFAULT 17".to_string());
    columns.push("ignore_errors INTEGER NOT NULL DEFAULT 0".to_string());
    columns.push(format!("PRIMARY KEY ({})", key_columns.join(", ")));

    if let Some(base) = kind.base_table() {
        columns.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
            key_columns.join(", "),
            base,
            shape.referenced_columns().join(", ")
        ));
    }

    format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", kind.table(), columns.join(",\n    "))
}

/// Creates every table and index if missing.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    for sql in [
        CREATE_DIR_ENTRIES_TABLE,
        CREATE_FILE_INODES_TABLE,
        CREATE_DIR_INODES_TABLE,
        CREATE_CHUNKS_TABLE,
        CREATE_CONT_DIRS_TABLE,
        CREATE_FS_IDS_TABLE,
        CREATE_USED_TARGETS_TABLE,
        CREATE_MODIFICATION_EVENTS_TABLE,
    ] {
        conn.execute(sql, [])?;
    }

    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }

    for kind in ViolationKind::ALL {
        conn.execute(&error_table_ddl(kind), [])?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{0}_node ON {0}(node_id)", kind.table()),
            [],
        )?;
    }

    Ok(())
}

/// Deletes every row of every table, error tables first.
pub fn clear_all(conn: &Connection) -> rusqlite::Result<()> {
    for kind in ViolationKind::ALL {
        conn.execute(&format!("DELETE FROM {}", kind.table()), [])?;
    }
    for table in BASE_TABLES {
        conn.execute(&format!("DELETE FROM {}", table), [])?;
    }
    Ok(())
}
