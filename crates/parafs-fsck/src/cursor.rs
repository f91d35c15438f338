//! Lazy single-pass cursors and the relational combinators checks are built from.
//!
//! Every cursor yields its rows in ascending key order and every combinator
//! keeps that order, so pipelines can be chained freely. A cursor that has
//! returned `Ok(None)` keeps returning `Ok(None)`; an `Err` is terminal and the
//! cursor must not be stepped again.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{FsckError, FsckResult};
use crate::types::EntryId;

/// Steps one input of an adapter. On error every input of the adapter is
/// closed before the error is returned.
macro_rules! try_step {
    ($adapter:expr, $input:expr) => {
        match $input.step() {
            Ok(row) => row,
            Err(e) => {
                $adapter.close();
                return Err(e);
            }
        }
    };
}

/// Boxed cursor used where pipelines of different shapes must share a type.
pub type BoxCursor<'a, T> = Box<dyn Cursor<Item = T> + Send + 'a>;

/// Forward-only pull iterator with an explicit release step.
pub trait Cursor {
    /// Row type.
    type Item;

    /// Produces the next row, `Ok(None)` at end of data.
    fn step(&mut self) -> FsckResult<Option<Self::Item>>;

    /// Releases backing resources early. Calling it more than once is harmless
    /// and dropping the cursor has the same effect.
    fn close(&mut self) {}

    /// Maps every row through `f`.
    fn select<U, F>(self, f: F) -> Select<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> U,
    {
        Select { inner: self, f }
    }

    /// Keeps rows satisfying `pred`.
    fn filter<P>(self, pred: P) -> Filter<Self, P>
    where
        Self: Sized,
        P: FnMut(&Self::Item) -> bool,
    {
        Filter { inner: self, pred }
    }

    /// Maps every row through `f` and keeps the `Some` results.
    fn filter_map<U, F>(self, f: F) -> FilterMap<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Option<U>,
    {
        FilterMap { inner: self, f }
    }

    /// Merge left-join against `right`, both sorted by their key functions.
    ///
    /// Every left row is emitted once. It is paired with the first right row of
    /// equal key; further right rows with that key are skipped.
    fn left_join_eq<R, K, KL, KR>(self, right: R, key_left: KL, key_right: KR) -> LeftJoinEq<Self, R, KL, KR>
    where
        Self: Sized,
        R: Cursor,
        R::Item: Clone,
        K: Ord,
        KL: FnMut(&Self::Item) -> K,
        KR: FnMut(&R::Item) -> K,
    {
        LeftJoinEq { left: self, right, key_left, key_right, head: None, right_done: false }
    }

    /// Inner merge join: a left join keeping only paired rows.
    fn join_eq<R, K, KL, KR>(self, right: R, key_left: KL, key_right: KR) -> JoinEq<Self, R, KL, KR>
    where
        Self: Sized,
        R: Cursor,
        R::Item: Clone,
        K: Ord,
        KL: FnMut(&Self::Item) -> K,
        KR: FnMut(&R::Item) -> K,
    {
        JoinEq { inner: self.left_join_eq(right, key_left, key_right) }
    }

    /// Streaming group-by over consecutive rows with equal keys.
    fn group_by<G>(self, grouper: G) -> Group<Self, G>
    where
        Self: Sized,
        G: Grouper<Row = Self::Item>,
    {
        Group { inner: self, grouper, pending: None, done: false }
    }

    /// Drops all but the first row of each run of equal keys.
    fn distinct_by<K, F>(self, key: F) -> Distinct<Self, F, K>
    where
        Self: Sized,
        K: PartialEq,
        F: FnMut(&Self::Item) -> K,
    {
        Distinct { inner: self, key, last: None }
    }

    /// Drops rows whose entry ID is in `modified`.
    fn ignore_by_id<F>(self, modified: ModifiedSet, id: F) -> IgnoreById<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> EntryId,
    {
        IgnoreById { inner: self, modified, id }
    }

    /// Type-erases the cursor.
    fn boxed<'a>(self) -> BoxCursor<'a, Self::Item>
    where
        Self: Sized + Send + 'a,
    {
        Box::new(self)
    }

    /// Drains the cursor into a vector and closes it.
    fn collect_vec(mut self) -> FsckResult<Vec<Self::Item>>
    where
        Self: Sized,
    {
        let mut out = Vec::new();
        while let Some(row) = self.step()? {
            out.push(row);
        }
        self.close();
        Ok(out)
    }

    /// Adapts the cursor to a standard iterator of results.
    fn into_results(self) -> CursorIter<Self>
    where
        Self: Sized,
    {
        CursorIter { inner: self, finished: false }
    }
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    type Item = C::Item;

    fn step(&mut self) -> FsckResult<Option<Self::Item>> {
        (**self).step()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Cursor over rows already in memory.
#[derive(Debug)]
pub struct VecCursor<T> {
    rows: VecDeque<T>,
}

impl<T> VecCursor<T> {
    /// Wraps `rows`, which must already be in the order consumers expect.
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows: rows.into() }
    }
}

impl<T> Cursor for VecCursor<T> {
    type Item = T;

    fn step(&mut self) -> FsckResult<Option<T>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}

/// See [`Cursor::select`].
pub struct Select<C, F> {
    inner: C,
    f: F,
}

impl<C, F, U> Cursor for Select<C, F>
where
    C: Cursor,
    F: FnMut(C::Item) -> U,
{
    type Item = U;

    fn step(&mut self) -> FsckResult<Option<U>> {
        let row = try_step!(self, self.inner);
        Ok(row.map(&mut self.f))
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// See [`Cursor::filter`].
pub struct Filter<C, P> {
    inner: C,
    pred: P,
}

impl<C, P> Cursor for Filter<C, P>
where
    C: Cursor,
    P: FnMut(&C::Item) -> bool,
{
    type Item = C::Item;

    fn step(&mut self) -> FsckResult<Option<C::Item>> {
        while let Some(row) = try_step!(self, self.inner) {
            if (self.pred)(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// See [`Cursor::filter_map`].
pub struct FilterMap<C, F> {
    inner: C,
    f: F,
}

impl<C, F, U> Cursor for FilterMap<C, F>
where
    C: Cursor,
    F: FnMut(C::Item) -> Option<U>,
{
    type Item = U;

    fn step(&mut self) -> FsckResult<Option<U>> {
        while let Some(row) = try_step!(self, self.inner) {
            if let Some(out) = (self.f)(row) {
                return Ok(Some(out));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// See [`Cursor::left_join_eq`].
pub struct LeftJoinEq<L, R: Cursor, KL, KR> {
    left: L,
    right: R,
    key_left: KL,
    key_right: KR,
    head: Option<R::Item>,
    right_done: bool,
}

impl<L, R, K, KL, KR> Cursor for LeftJoinEq<L, R, KL, KR>
where
    L: Cursor,
    R: Cursor,
    R::Item: Clone,
    K: Ord,
    KL: FnMut(&L::Item) -> K,
    KR: FnMut(&R::Item) -> K,
{
    type Item = (L::Item, Option<R::Item>);

    fn step(&mut self) -> FsckResult<Option<Self::Item>> {
        let Some(row) = try_step!(self, self.left) else {
            return Ok(None);
        };
        let key = (self.key_left)(&row);

        loop {
            if self.head.is_none() && !self.right_done {
                self.head = try_step!(self, self.right);
                if self.head.is_none() {
                    self.right_done = true;
                    self.right.close();
                }
            }

            let ord = match &self.head {
                None => return Ok(Some((row, None))),
                Some(r) => (self.key_right)(r).cmp(&key),
            };

            match ord {
                Ordering::Less => self.head = None,
                Ordering::Equal => return Ok(Some((row, self.head.clone()))),
                Ordering::Greater => return Ok(Some((row, None))),
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.head = None;
    }
}

/// See [`Cursor::join_eq`].
pub struct JoinEq<L, R: Cursor, KL, KR> {
    inner: LeftJoinEq<L, R, KL, KR>,
}

impl<L, R, K, KL, KR> Cursor for JoinEq<L, R, KL, KR>
where
    L: Cursor,
    R: Cursor,
    R::Item: Clone,
    K: Ord,
    KL: FnMut(&L::Item) -> K,
    KR: FnMut(&R::Item) -> K,
{
    type Item = (L::Item, R::Item);

    fn step(&mut self) -> FsckResult<Option<Self::Item>> {
        while let Some((l, r)) = try_step!(self, self.inner) {
            if let Some(r) = r {
                return Ok(Some((l, r)));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Accumulator for [`Cursor::group_by`].
///
/// The grouper sees every row of one group through `step` and produces a
/// value in `finish`. `reset` is called before the first row of each group.
pub trait Grouper {
    /// Input row.
    type Row;
    /// Grouping key; consecutive rows with equal keys form one group.
    type Key: PartialEq;
    /// Representative extracted from the first row of a group.
    type Proj;
    /// Aggregated value.
    type Value;

    /// Key of a row.
    fn key(&self, row: &Self::Row) -> Self::Key;
    /// Representative of the group starting at `row`.
    fn project(&self, row: &Self::Row) -> Self::Proj;
    /// Folds one row into the accumulator.
    fn step(&mut self, row: &Self::Row);
    /// Produces the group's value.
    fn finish(&mut self) -> Self::Value;
    /// Clears the accumulator.
    fn reset(&mut self);
}

/// See [`Cursor::group_by`].
pub struct Group<C: Cursor, G> {
    inner: C,
    grouper: G,
    pending: Option<C::Item>,
    done: bool,
}

impl<C, G> Cursor for Group<C, G>
where
    C: Cursor,
    G: Grouper<Row = C::Item>,
{
    type Item = (G::Proj, G::Value);

    fn step(&mut self) -> FsckResult<Option<Self::Item>> {
        let first = match self.pending.take() {
            Some(row) => row,
            None if self.done => return Ok(None),
            None => match try_step!(self, self.inner) {
                Some(row) => row,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            },
        };

        let key = self.grouper.key(&first);
        let proj = self.grouper.project(&first);
        self.grouper.reset();
        self.grouper.step(&first);

        while !self.done {
            match try_step!(self, self.inner) {
                Some(row) if self.grouper.key(&row) == key => self.grouper.step(&row),
                Some(row) => {
                    self.pending = Some(row);
                    break;
                }
                None => self.done = true,
            }
        }

        Ok(Some((proj, self.grouper.finish())))
    }

    fn close(&mut self) {
        self.inner.close();
        self.pending = None;
        self.done = true;
    }
}

/// K-way merge of sorted sources into one sorted stream.
///
/// Rows with equal keys are emitted in source order.
pub struct UnionBy<C: Cursor, F> {
    sources: Vec<C>,
    heads: Vec<Option<C::Item>>,
    primed: bool,
    key: F,
}

/// Merges `sources`, each sorted by `key`, into one sorted cursor.
pub fn union_by<C, K, F>(sources: Vec<C>, key: F) -> UnionBy<C, F>
where
    C: Cursor,
    K: Ord,
    F: FnMut(&C::Item) -> K,
{
    UnionBy { heads: Vec::with_capacity(sources.len()), sources, primed: false, key }
}

impl<C, K, F> Cursor for UnionBy<C, F>
where
    C: Cursor,
    K: Ord,
    F: FnMut(&C::Item) -> K,
{
    type Item = C::Item;

    fn step(&mut self) -> FsckResult<Option<C::Item>> {
        if !self.primed {
            for idx in 0..self.sources.len() {
                let head = try_step!(self, self.sources[idx]);
                self.heads.push(head);
            }
            self.primed = true;
        }

        let mut best: Option<(usize, K)> = None;
        for (idx, head) in self.heads.iter().enumerate() {
            if let Some(row) = head {
                let k = (self.key)(row);
                if best.as_ref().map_or(true, |(_, b)| k < *b) {
                    best = Some((idx, k));
                }
            }
        }

        let Some((idx, _)) = best else {
            return Ok(None);
        };
        let row = self.heads[idx].take();
        let next = try_step!(self, self.sources[idx]);
        self.heads[idx] = next;
        Ok(row)
    }

    fn close(&mut self) {
        for source in &mut self.sources {
            source.close();
        }
        self.heads.clear();
        self.primed = true;
    }
}

/// See [`Cursor::distinct_by`].
pub struct Distinct<C, F, K> {
    inner: C,
    key: F,
    last: Option<K>,
}

impl<C, F, K> Cursor for Distinct<C, F, K>
where
    C: Cursor,
    K: PartialEq,
    F: FnMut(&C::Item) -> K,
{
    type Item = C::Item;

    fn step(&mut self) -> FsckResult<Option<C::Item>> {
        while let Some(row) = try_step!(self, self.inner) {
            let k = (self.key)(&row);
            if self.last.as_ref() != Some(&k) {
                self.last = Some(k);
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Entry IDs that changed while the scan was running.
///
/// Built once per run and shared by every check.
#[derive(Clone, Debug, Default)]
pub struct ModifiedSet(Arc<Vec<EntryId>>);

impl ModifiedSet {
    /// Returns true if `id` was modified.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.0.binary_search(id).is_ok()
    }

    /// Number of distinct modified IDs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was modified.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<EntryId> for ModifiedSet {
    fn from_iter<I: IntoIterator<Item = EntryId>>(iter: I) -> Self {
        let mut ids: Vec<EntryId> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ModifiedSet(Arc::new(ids))
    }
}

/// See [`Cursor::ignore_by_id`].
pub struct IgnoreById<C, F> {
    inner: C,
    modified: ModifiedSet,
    id: F,
}

impl<C, F> Cursor for IgnoreById<C, F>
where
    C: Cursor,
    F: FnMut(&C::Item) -> EntryId,
{
    type Item = C::Item;

    fn step(&mut self) -> FsckResult<Option<C::Item>> {
        while let Some(row) = try_step!(self, self.inner) {
            if !self.modified.contains(&(self.id)(&row)) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// See [`Cursor::into_results`].
pub struct CursorIter<C> {
    inner: C,
    finished: bool,
}

impl<C: Cursor> Iterator for CursorIter<C> {
    type Item = Result<C::Item, FsckError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.step() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                self.inner.close();
                None
            }
            Err(e) => {
                self.finished = true;
                self.inner.close();
                Some(Err(e))
            }
        }
    }
}
