//! Bounded blocking pool of SQLite connections.
//!
//! Every cursor leases one connection for its whole lifetime. Acquisition
//! blocks until a connection is free; there is no timeout.
//!
//! A check leases its connections one at a time while it builds its pipeline
//! and holds them until it is drained. [`CheckSlots`] admits only as many
//! checks as the pool can serve in full at once, so admitted checks never
//! wait on each other's leases.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{FsckError, FsckResult};
use crate::store::schema;

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

struct PoolInner {
    path: PathBuf,
    max_connections: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }
}

/// A leased connection, returned to its pool exactly once on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Returns the connection to the pool now instead of at drop.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // `conn` is only taken in `give_back`, after which the guard is gone.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.give_back();
    }
}

/// Pool of connections to one database file.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool that opens at most `max_connections` connections to `path`.
    pub fn new(path: impl AsRef<Path>, max_connections: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                path: path.as_ref().to_path_buf(),
                max_connections: max_connections.max(1),
                state: Mutex::new(PoolState { idle: Vec::new(), open: 0 }),
                available: Condvar::new(),
            }),
        }
    }

    /// Database file served by this pool.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Maximum number of simultaneously open connections.
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Number of connections currently open (leased or idle).
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().open
    }

    /// Number of idle connections.
    pub fn idle_connections(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Leases a connection, opening a new one if below the limit and
    /// otherwise waiting for one to be released.
    pub fn acquire(&self) -> FsckResult<PooledConnection> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection { conn: Some(conn), pool: Arc::clone(&self.inner) });
            }

            if state.open < self.inner.max_connections {
                state.open += 1;
                let open = state.open;
                drop(state);

                debug!(path = %self.inner.path.display(), open, "opening pooled connection");
                return match self.connect() {
                    Ok(conn) => Ok(PooledConnection { conn: Some(conn), pool: Arc::clone(&self.inner) }),
                    Err(e) => {
                        let mut state = self.inner.state.lock();
                        state.open -= 1;
                        drop(state);
                        self.inner.available.notify_one();
                        Err(e)
                    }
                };
            }

            self.inner.available.wait(&mut state);
        }
    }

    fn connect(&self) -> FsckResult<Connection> {
        let pool_err = |source| FsckError::Pool { path: self.inner.path.display().to_string(), source };
        let conn = Connection::open(&self.inner.path).map_err(pool_err)?;
        schema::configure_connection(&conn).map_err(pool_err)?;
        Ok(conn)
    }
}

/// Counting gate bounding how many checks run at once.
pub struct CheckSlots {
    capacity: usize,
    free: Mutex<usize>,
    released: Condvar,
}

impl CheckSlots {
    /// Gate admitting `capacity` concurrent checks (at least one).
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self { capacity, free: Mutex::new(capacity), released: Condvar::new() })
    }

    /// Number of checks admitted at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots not currently taken.
    pub fn available(&self) -> usize {
        *self.free.lock()
    }

    /// Takes a slot, waiting until one is free.
    pub fn acquire(self: &Arc<Self>) -> CheckSlot {
        let mut free = self.free.lock();
        while *free == 0 {
            self.released.wait(&mut free);
        }
        *free -= 1;
        CheckSlot { slots: Arc::clone(self) }
    }
}

/// A taken check slot, returned on drop.
pub struct CheckSlot {
    slots: Arc<CheckSlots>,
}

impl Drop for CheckSlot {
    fn drop(&mut self) {
        let mut free = self.slots.free.lock();
        *free += 1;
        drop(free);
        self.slots.released.notify_one();
    }
}
