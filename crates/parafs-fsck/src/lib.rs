#![warn(missing_docs)]

//! ParaFS fsck subsystem: offline consistency checker database, check catalog and violation bookkeeping

pub mod attribs;
pub mod checks;
pub mod chunk_path;
pub mod cli;
pub mod config;
pub mod cursor;
pub mod error;
pub mod persistence;
pub mod store;
pub mod types;
pub mod violation;

pub use checks::{run_check, CheckContext, CheckId, ViolationCursor};
pub use config::FsckConfig;
pub use cursor::{union_by, BoxCursor, Cursor, Grouper, ModifiedSet, VecCursor};
pub use error::{FsckError, FsckResult};
pub use persistence::{BatchOutcome, KindSummary, ViolationFilter, ViolationRecord, NOT_FOUND};
pub use store::{FsckDb, Scan, TableCursor};
pub use types::{
    Chunk, ContDir, DirEntry, DirEntryType, DirInode, EntryId, FileInode, FsId, ModificationEvent,
    ModificationEventType, NodeId, StripePatternType, TargetIdType, UsedTarget,
};
pub use violation::{EntityKey, RepairAction, Violation, ViolationKind};
