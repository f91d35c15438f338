//! Embedded store holding gathered entities and violation records.
//!
//! Entities are read through [`TableCursor`], a keyset-paged cursor that keeps
//! one pooled connection and one read transaction for its whole lifetime.
//! Writers run one immediate transaction per batch under a process-wide
//! exclusive lock; readers take the same lock shared for each page fetch.

pub mod pool;
pub mod records;
pub mod schema;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, CachedStatement, Connection, Row, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::checks::CHECK_CONNECTIONS;
use crate::config::FsckConfig;
use crate::cursor::{Cursor, ModifiedSet};
use crate::error::{sqlite_code, FsckError, FsckResult};
use crate::types::{Chunk, ContDir, DirEntry, DirInode, FileInode, FsId, ModificationEvent, UsedTarget};

pub use pool::{CheckSlot, CheckSlots, ConnectionPool, PooledConnection};
pub use records::{Record, DIR_ENTRIES_BY_PARENT};

/// Prepares a cached statement, mapping failures to [`FsckError::Statement`].
pub(crate) fn prepare<'c>(conn: &'c Connection, sql: &str) -> FsckResult<CachedStatement<'c>> {
    conn.prepare_cached(sql)
        .map_err(|source| FsckError::Statement { sql: sql.to_string(), source })
}

/// A scan over one base table.
///
/// By default the scan covers the whole table in the record's natural order.
/// It can be restricted to one value or an inclusive range of the leading
/// order column.
pub struct Scan<T> {
    order: &'static [&'static str],
    lower: Bound<Value>,
    upper: Bound<Value>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Scan<T> {
    /// Full scan in natural order.
    pub fn all() -> Self {
        Self { order: T::ORDER, lower: Bound::Unbounded, upper: Bound::Unbounded, _record: PhantomData }
    }

    /// Uses another unique column order.
    pub fn ordered_by(mut self, order: &'static [&'static str]) -> Self {
        self.order = order;
        self
    }

    /// Restricts the leading order column to one value.
    pub fn key(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.lower = Bound::Included(value.clone());
        self.upper = Bound::Included(value);
        self
    }

    /// Restricts the leading order column to `[lower, upper]`.
    pub fn range(mut self, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        self.lower = Bound::Included(lower.into());
        self.upper = Bound::Included(upper.into());
        self
    }

    fn into_query(self) -> PagedQuery<T> {
        let mut query = PagedQuery::new(T::TABLE, self.order, T::COLUMNS, T::from_row);
        let lead = self.order[0];
        if let Bound::Included(v) = self.lower {
            query.filter(format!("{} >= ?", lead), vec![v]);
        }
        if let Bound::Included(v) = self.upper {
            query.filter(format!("{} <= ?", lead), vec![v]);
        }
        query
    }
}

type Decode<T> = fn(&Row<'_>, usize) -> rusqlite::Result<T>;

/// SQL for a keyset-paged read.
pub(crate) struct PagedQuery<T> {
    table: String,
    order: Vec<String>,
    columns: Vec<String>,
    filters: Vec<String>,
    params: Vec<Value>,
    decode: Decode<T>,
}

impl<T> PagedQuery<T> {
    pub(crate) fn new(table: &str, order: &[&str], columns: &[&str], decode: Decode<T>) -> Self {
        Self {
            table: table.to_string(),
            order: order.iter().map(|c| c.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            filters: Vec::new(),
            params: Vec::new(),
            decode,
        }
    }

    /// Adds a `WHERE` clause with its positional parameters.
    pub(crate) fn filter(&mut self, clause: String, params: Vec<Value>) {
        self.filters.push(clause);
        self.params.extend(params);
    }

    fn sql(&self, after_key: bool) -> String {
        let mut clauses = self.filters.clone();
        if after_key {
            let marks = vec!["?"; self.order.len()].join(", ");
            clauses.push(format!("({}) > ({})", self.order.join(", "), marks));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        format!(
            "SELECT {}, {} FROM {}{} ORDER BY {} LIMIT ?",
            self.order.join(", "),
            self.columns.join(", "),
            self.table,
            where_clause,
            self.order.join(", ")
        )
    }
}

/// Lazy cursor over the rows of one query, fetched page by page.
pub struct TableCursor<T> {
    conn: Option<PooledConnection>,
    lock: Arc<RwLock<()>>,
    first_sql: String,
    next_sql: String,
    params: Vec<Value>,
    order_len: usize,
    decode: Decode<T>,
    last_key: Option<Vec<Value>>,
    page: VecDeque<T>,
    page_size: usize,
    exhausted: bool,
}

impl<T> TableCursor<T> {
    fn open(db: &FsckDb, query: PagedQuery<T>) -> FsckResult<Self> {
        let conn = db.pool.acquire()?;
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn: Some(conn),
            lock: Arc::clone(&db.lock),
            first_sql: query.sql(false),
            next_sql: query.sql(true),
            params: query.params,
            order_len: query.order.len(),
            decode: query.decode,
            last_key: None,
            page: VecDeque::with_capacity(db.page_size),
            page_size: db.page_size,
            exhausted: false,
        })
    }

    fn fetch_page(&mut self) -> FsckResult<()> {
        let Some(conn) = self.conn.as_ref() else {
            self.exhausted = true;
            return Ok(());
        };
        let _shared = self.lock.read();

        let mut params = self.params.clone();
        let sql = match &self.last_key {
            None => &self.first_sql,
            Some(key) => {
                params.extend(key.iter().cloned());
                &self.next_sql
            }
        };
        params.push(Value::Integer(self.page_size as i64));

        let mut stmt = prepare(conn, sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut fetched = 0usize;
        while let Some(row) = rows.next()? {
            let key = (0..self.order_len)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.page.push_back((self.decode)(row, self.order_len)?);
            self.last_key = Some(key);
            fetched += 1;
        }

        debug!(rows = fetched, "fetched page");
        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl<T> Cursor for TableCursor<T> {
    type Item = T;

    fn step(&mut self) -> FsckResult<Option<T>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        match self.page.pop_front() {
            Some(row) => Ok(Some(row)),
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.exhausted = true;
        self.page.clear();
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    debug!(error = %e, "ending read transaction failed");
                }
            }
            conn.release();
        }
    }
}

impl<T> Drop for TableCursor<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle on the fsck database.
#[derive(Clone)]
pub struct FsckDb {
    pool: ConnectionPool,
    check_slots: Arc<CheckSlots>,
    lock: Arc<RwLock<()>>,
    page_size: usize,
    batch_size: usize,
}

impl FsckDb {
    /// Opens (creating if needed) the database described by `config`.
    pub fn open(config: &FsckConfig) -> FsckResult<Self> {
        config.validate()?;
        let db = Self {
            pool: ConnectionPool::new(&config.db_path, config.pool_size),
            check_slots: CheckSlots::new(config.pool_size / CHECK_CONNECTIONS),
            lock: Arc::new(RwLock::new(())),
            page_size: config.page_size,
            batch_size: config.batch_size,
        };
        db.write(|tx| Ok(schema::create_schema(tx)?))?;
        info!(
            path = %config.db_path.display(),
            pool_size = config.pool_size,
            concurrent_checks = db.check_slots.capacity(),
            "opened fsck database"
        );
        Ok(db)
    }

    /// Opens the database at `path` with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> FsckResult<Self> {
        let config = FsckConfig { db_path: path.as_ref().to_path_buf(), ..FsckConfig::default() };
        Self::open(&config)
    }

    /// The connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Takes one of the slots bounding concurrent checks, waiting for a free
    /// one. Hold it until the check's cursor is dropped.
    pub fn check_slot(&self) -> CheckSlot {
        if self.check_slots.available() == 0 {
            debug!(capacity = self.check_slots.capacity(), "waiting for a check slot");
        }
        self.check_slots.acquire()
    }

    /// Rows per page for cursors.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Rows per batch when draining cursors into the store.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Opens a cursor over a base table.
    pub fn scan<T: Record>(&self, scan: Scan<T>) -> FsckResult<TableCursor<T>> {
        TableCursor::open(self, scan.into_query())
    }

    pub(crate) fn query<T>(&self, query: PagedQuery<T>) -> FsckResult<TableCursor<T>> {
        TableCursor::open(self, query)
    }

    /// Dentries ordered by entry ID.
    pub fn dir_entries(&self) -> FsckResult<TableCursor<DirEntry>> {
        self.scan(Scan::all())
    }

    /// Dentries ordered by parent directory, then name.
    pub fn dir_entries_by_parent(&self) -> FsckResult<TableCursor<DirEntry>> {
        self.scan(Scan::all().ordered_by(DIR_ENTRIES_BY_PARENT))
    }

    /// File inodes ordered by entry ID.
    pub fn file_inodes(&self) -> FsckResult<TableCursor<FileInode>> {
        self.scan(Scan::all())
    }

    /// Dir inodes ordered by entry ID.
    pub fn dir_inodes(&self) -> FsckResult<TableCursor<DirInode>> {
        self.scan(Scan::all())
    }

    /// Chunks ordered by owning file, then target.
    pub fn chunks(&self) -> FsckResult<TableCursor<Chunk>> {
        self.scan(Scan::all())
    }

    /// Content directories ordered by entry ID.
    pub fn cont_dirs(&self) -> FsckResult<TableCursor<ContDir>> {
        self.scan(Scan::all())
    }

    /// Dentry-by-ID files ordered by entry ID.
    pub fn fs_ids(&self) -> FsckResult<TableCursor<FsId>> {
        self.scan(Scan::all())
    }

    /// Used targets ordered by ID.
    pub fn used_targets(&self) -> FsckResult<TableCursor<UsedTarget>> {
        self.scan(Scan::all())
    }

    /// Modification events ordered by entry ID.
    pub fn modification_events(&self) -> FsckResult<TableCursor<ModificationEvent>> {
        self.scan(Scan::all())
    }

    /// Loads the IDs of every entity modified during the scan.
    pub fn modified_set(&self) -> FsckResult<ModifiedSet> {
        let ids = self.modification_events()?.select(|e| e.id).collect_vec()?;
        Ok(ids.into_iter().collect())
    }

    /// Inserts `records` as one batch. Used targets and modification events
    /// that already exist are skipped.
    pub fn insert_records<T: Record>(&self, records: &[T]) -> FsckResult<usize> {
        let sql = format!(
            "INSERT {}INTO {} ({}) VALUES ({})",
            if T::INSERT_OR_IGNORE { "OR IGNORE " } else { "" },
            T::TABLE,
            T::COLUMNS.join(", "),
            vec!["?"; T::COLUMNS.len()].join(", ")
        );
        self.mutate_batch(T::TABLE, &sql, records, |r| r.to_values())
    }

    /// Replaces stored records with the same natural key, as one batch.
    pub fn update_records<T: Record>(&self, records: &[T]) -> FsckResult<usize> {
        let set = T::COLUMNS.iter().map(|c| format!("{} = ?", c)).collect::<Vec<_>>().join(", ");
        let sql = format!("UPDATE {} SET {} WHERE {}", T::TABLE, set, key_predicate(T::KEY));
        self.mutate_batch(T::TABLE, &sql, records, |r| {
            let mut values = r.to_values();
            values.extend(r.key_values());
            values
        })
    }

    /// Deletes records by natural key, as one batch.
    pub fn delete_records<T: Record>(&self, records: &[T]) -> FsckResult<usize> {
        let sql = format!("DELETE FROM {} WHERE {}", T::TABLE, key_predicate(T::KEY));
        self.mutate_batch(T::TABLE, &sql, records, |r| r.key_values())
    }

    /// Empties every table.
    pub fn clear(&self) -> FsckResult<()> {
        self.write(|tx| Ok(schema::clear_all(tx)?))?;
        info!("cleared fsck database");
        Ok(())
    }

    /// Runs `f` in one immediate transaction under the exclusive lock.
    /// Any error rolls the transaction back.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&Transaction<'_>) -> FsckResult<R>) -> FsckResult<R> {
        let mut conn = self.pool.acquire()?;
        let _exclusive = self.lock.write();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Runs `f` on a pooled connection under the shared lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Connection) -> FsckResult<R>) -> FsckResult<R> {
        let conn = self.pool.acquire()?;
        let _shared = self.lock.read();
        f(&conn)
    }

    pub(crate) fn mutate_batch<R>(
        &self,
        table: &str,
        sql: &str,
        rows: &[R],
        params: impl Fn(&R) -> Vec<Value>,
    ) -> FsckResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let changed = self.write(|tx| {
            let mut stmt = prepare(tx, sql)?;
            let mut changed = 0usize;
            for (index, row) in rows.iter().enumerate() {
                if let Err(e) = stmt.execute(params_from_iter(params(row))).map(|n| changed += n) {
                    let code = sqlite_code(&e).unwrap_or(-1);
                    warn!(table, index, code, error = %e, "batch aborted, rolling back");
                    return Err(FsckError::BatchAborted { index, code });
                }
            }
            Ok(changed)
        })?;

        debug!(table, rows = rows.len(), changed, "batch committed");
        Ok(changed)
    }
}

pub(crate) fn key_predicate(key: &[&str]) -> String {
    key.iter().map(|c| format!("{} = ?", c)).collect::<Vec<_>>().join(" AND ")
}
