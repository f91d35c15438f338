//! Violation bookkeeping: draining checks into error tables, ignore masks,
//! repair actions and retrieval for the repair tooling.
//!
//! A record starts out with repair action [`RepairAction::Undefined`] and an
//! empty ignore mask. The operator either ignores it through the mask or
//! assigns a repair action; the repair driver deletes it once the repair
//! succeeded.

use rusqlite::params_from_iter;
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use tracing::{debug, error, info, warn};

use crate::checks::{open_check, CheckContext, CheckId};
use crate::cursor::Cursor;
use crate::error::{is_constraint_violation, sqlite_code, FsckError, FsckResult};
use crate::store::{key_predicate, prepare, FsckDb, PagedQuery, TableCursor};
use crate::violation::{EntityKey, RepairAction, Violation, ViolationKind, IGNORE_ALL_MASK};

/// Backend code reported for a key that has no violation record.
pub const NOT_FOUND: i32 = rusqlite::ffi::SQLITE_NOTFOUND;

/// Backend code reported for a key of the wrong shape for the error table.
pub const KEY_MISMATCH: i32 = rusqlite::ffi::SQLITE_MISMATCH;

const RECORD_COLUMNS: &[&str] = &["violation", "repair_action", "ignore_errors"];

/// A stored violation with its bookkeeping state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViolationRecord {
    /// The violation and its evidence.
    pub violation: Violation,
    /// Repair chosen by the operator, `Undefined` until then.
    pub repair_action: RepairAction,
    /// Error codes the operator chose to ignore for this entity.
    pub ignore_errors: u32,
}

impl ViolationRecord {
    /// Returns true if the record's own error code is masked.
    pub fn is_ignored(&self) -> bool {
        self.ignore_errors & self.violation.kind().code() != 0
    }

    /// Returns true if the record still awaits a decision.
    pub fn is_pending(&self) -> bool {
        self.repair_action == RepairAction::Undefined && !self.is_ignored()
    }

    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        let text: String = row.get(offset)?;
        let violation = serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(offset, Type::Text, Box::new(e)))?;
        Ok(Self {
            violation,
            repair_action: row.get(offset + 1)?,
            ignore_errors: row.get::<_, i64>(offset + 2)? as u32,
        })
    }
}

/// Restricts a violation listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViolationFilter {
    /// Only records with this repair action.
    pub repair_action: Option<RepairAction>,
    /// Only records owned by this node (or on this target).
    pub owner: Option<u16>,
    /// Leave out records whose own error code is masked.
    pub exclude_ignored: bool,
}

impl ViolationFilter {
    /// Records still awaiting a decision.
    pub fn pending() -> Self {
        Self { repair_action: Some(RepairAction::Undefined), owner: None, exclude_ignored: true }
    }

    /// Narrows the filter to one owner.
    pub fn owned_by(mut self, owner: u16) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Result of a batch repair-action update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records updated.
    pub updated: usize,
    /// Keys that could not be updated, with the backend code of each failure.
    pub failed: Vec<(EntityKey, i32)>,
}

impl BatchOutcome {
    /// Returns true if every key was updated.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-kind counts for summary reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindSummary {
    /// Violation kind.
    pub kind: ViolationKind,
    /// Stored records.
    pub total: u64,
    /// Records still awaiting a decision.
    pub pending: u64,
}

fn insert_sql(kind: ViolationKind) -> String {
    let columns = kind.key_shape().columns();
    format!(
        "INSERT INTO {} ({}, node_id, violation) VALUES ({})",
        kind.table(),
        columns.join(", "),
        vec!["?"; columns.len() + 2].join(", ")
    )
}

fn check_shape(kind: ViolationKind, key: &EntityKey) -> FsckResult<()> {
    if key.shape() == kind.key_shape() {
        Ok(())
    } else {
        Err(FsckError::KeyMismatch { table: kind.table(), key: key.to_string() })
    }
}

impl FsckDb {
    /// Drains `violations` into their error tables, one transaction per
    /// `batch_size` rows. A violation already recorded for the same entity is
    /// skipped. Returns the number of records written.
    pub fn insert_violations<C>(&self, mut violations: C) -> FsckResult<usize>
    where
        C: Cursor<Item = Violation>,
    {
        let mut total = 0usize;
        let mut batch = Vec::with_capacity(self.batch_size());
        loop {
            batch.clear();
            while batch.len() < self.batch_size() {
                match violations.step()? {
                    Some(v) => batch.push(v),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            total += self.insert_violation_batch(&batch)?;
            if batch.len() < self.batch_size() {
                break;
            }
        }
        violations.close();
        Ok(total)
    }

    fn insert_violation_batch(&self, batch: &[Violation]) -> FsckResult<usize> {
        let inserted = self.write(|tx| {
            let mut inserted = 0usize;
            for (index, violation) in batch.iter().enumerate() {
                let kind = violation.kind();
                let mut params = violation.key().to_values();
                params.push(Value::Integer(i64::from(violation.owner())));
                params.push(Value::Text(serde_json::to_string(violation)?));

                let mut stmt = prepare(tx, &insert_sql(kind))?;
                match stmt.execute(params_from_iter(params)) {
                    Ok(n) => inserted += n,
                    Err(e) if is_constraint_violation(&e) => {
                        debug!(table = %kind.table(), key = %violation.key(), "violation already recorded");
                    }
                    Err(e) => {
                        let code = sqlite_code(&e).unwrap_or(-1);
                        warn!(table = %kind.table(), index, code, error = %e, "batch aborted, rolling back");
                        return Err(FsckError::BatchAborted { index, code });
                    }
                }
            }
            Ok(inserted)
        })?;
        debug!(rows = batch.len(), inserted, "violation batch committed");
        Ok(inserted)
    }

    /// Clears the error table of `id`, runs the check and stores its
    /// violations. Returns the number stored. Waits for a check slot first.
    pub fn run_and_insert(&self, ctx: &CheckContext, id: CheckId) -> FsckResult<usize> {
        let _slot = self.check_slot();
        self.clear_violations(id.kind())?;
        let cursor = open_check(self, ctx, id)?;
        self.insert_violations(cursor)
    }

    /// Like [`FsckDb::run_and_insert`], but logs the outcome and reports only
    /// success.
    pub fn check_for_and_insert(&self, ctx: &CheckContext, id: CheckId) -> bool {
        match self.run_and_insert(ctx, id) {
            Ok(found) => {
                info!(check = %id, violations = found, "check finished");
                true
            }
            Err(e) => {
                error!(check = %id, error = %e, "check failed");
                false
            }
        }
    }

    /// Deletes every record of `kind`.
    pub fn clear_violations(&self, kind: ViolationKind) -> FsckResult<usize> {
        self.write(|tx| Ok(tx.execute(&format!("DELETE FROM {}", kind.table()), [])?))
    }

    /// ORs `code` into the ignore mask of one record, in its own transaction.
    /// Returns false if no record matched.
    pub fn set_ignore_error_code(&self, kind: ViolationKind, key: &EntityKey, code: u32) -> FsckResult<bool> {
        check_shape(kind, key)?;
        let sql = format!(
            "UPDATE {} SET ignore_errors = ignore_errors | ? WHERE {}",
            kind.table(),
            key_predicate(kind.key_shape().columns())
        );
        let mut params = vec![Value::Integer(i64::from(code))];
        params.extend(key.to_values());

        let changed = self.write(|tx| {
            let mut stmt = prepare(tx, &sql)?;
            Ok(stmt.execute(params_from_iter(params))?)
        })?;
        debug!(table = %kind.table(), key = %key, code, changed, "ignore mask updated");
        Ok(changed > 0)
    }

    /// Sets every bit of the ignore mask of one record.
    pub fn set_ignore_all_error_codes(&self, kind: ViolationKind, key: &EntityKey) -> FsckResult<bool> {
        self.set_ignore_error_code(kind, key, IGNORE_ALL_MASK)
    }

    /// Assigns a repair action to one record. Returns false if no record matched.
    pub fn set_repair_action(&self, kind: ViolationKind, key: &EntityKey, action: RepairAction) -> FsckResult<bool> {
        let outcome = self.set_repair_actions(kind, std::slice::from_ref(key), action)?;
        if let Some((_, code)) = outcome.failed.first() {
            if *code != NOT_FOUND {
                return Err(FsckError::BatchAborted { index: 0, code: *code });
            }
        }
        Ok(outcome.updated > 0)
    }

    /// Assigns a repair action to many records in one transaction.
    ///
    /// Keys are updated one by one. A key that fails, or that has no record,
    /// is reported in [`BatchOutcome::failed`] and the remaining keys are
    /// still updated.
    pub fn set_repair_actions(
        &self,
        kind: ViolationKind,
        keys: &[EntityKey],
        action: RepairAction,
    ) -> FsckResult<BatchOutcome> {
        let sql = format!(
            "UPDATE {} SET repair_action = ? WHERE {}",
            kind.table(),
            key_predicate(kind.key_shape().columns())
        );

        let outcome = self.write(|tx| {
            let mut stmt = prepare(tx, &sql)?;
            let mut outcome = BatchOutcome::default();
            for key in keys {
                if key.shape() != kind.key_shape() {
                    outcome.failed.push((key.clone(), KEY_MISMATCH));
                    continue;
                }
                let mut params = vec![Value::Integer(action.code())];
                params.extend(key.to_values());
                match stmt.execute(params_from_iter(params)) {
                    Ok(0) => outcome.failed.push((key.clone(), NOT_FOUND)),
                    Ok(_) => outcome.updated += 1,
                    Err(e) => {
                        let code = sqlite_code(&e).unwrap_or(-1);
                        warn!(table = %kind.table(), key = %key, code, error = %e, "repair action not set");
                        outcome.failed.push((key.clone(), code));
                    }
                }
            }
            Ok(outcome)
        })?;

        if !outcome.is_complete() {
            warn!(
                table = %kind.table(),
                updated = outcome.updated,
                failed = outcome.failed.len(),
                "repair action batch partially failed"
            );
        }
        Ok(outcome)
    }

    /// Counts records of `kind` still awaiting a decision: no repair action
    /// and the kind's own code not masked.
    pub fn count_pending(&self, kind: ViolationKind) -> FsckResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE repair_action = ? AND (ignore_errors & ?) = 0",
            kind.table()
        );
        self.read(|conn| {
            let mut stmt = prepare(conn, &sql)?;
            let count: i64 = stmt.query_row(
                [RepairAction::Undefined.code(), i64::from(kind.code())],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Counts every record of `kind`.
    pub fn count_violations(&self, kind: ViolationKind) -> FsckResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        self.read(|conn| {
            let mut stmt = prepare(conn, &sql)?;
            let count: i64 = stmt.query_row([], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Totals and pending counts for every kind.
    pub fn violation_summary(&self) -> FsckResult<Vec<KindSummary>> {
        ViolationKind::ALL
            .iter()
            .map(|&kind| {
                Ok(KindSummary {
                    kind,
                    total: self.count_violations(kind)?,
                    pending: self.count_pending(kind)?,
                })
            })
            .collect()
    }

    /// Cursor over the records of `kind` matching `filter`, in key order.
    pub fn violations(&self, kind: ViolationKind, filter: &ViolationFilter) -> FsckResult<TableCursor<ViolationRecord>> {
        let table = kind.table();
        let mut query = PagedQuery::new(&table, kind.key_shape().columns(), RECORD_COLUMNS, ViolationRecord::from_row);
        if let Some(action) = filter.repair_action {
            query.filter("repair_action = ?".to_string(), vec![Value::Integer(action.code())]);
        }
        if let Some(owner) = filter.owner {
            query.filter("node_id = ?".to_string(), vec![Value::Integer(i64::from(owner))]);
        }
        if filter.exclude_ignored {
            query.filter("(ignore_errors & ?) = 0".to_string(), vec![Value::Integer(i64::from(kind.code()))]);
        }
        self.query(query)
    }

    /// Materialized [`FsckDb::violations`].
    pub fn violation_list(&self, kind: ViolationKind, filter: &ViolationFilter) -> FsckResult<Vec<ViolationRecord>> {
        self.violations(kind, filter)?.collect_vec()
    }

    /// Deletes the records of resolved violations, as one batch.
    pub fn delete_violations(&self, kind: ViolationKind, keys: &[EntityKey]) -> FsckResult<usize> {
        for key in keys {
            check_shape(kind, key)?;
        }
        let table = kind.table();
        let sql = format!("DELETE FROM {} WHERE {}", table, key_predicate(kind.key_shape().columns()));
        self.mutate_batch(&table, &sql, keys, |k| k.to_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsckConfig;
    use crate::cursor::VecCursor;
    use crate::types::{ContDir, EntryId, NodeId, TargetIdType, UsedTarget};
    use tempfile::TempDir;

    fn open(batch_size: usize) -> (TempDir, FsckDb) {
        let dir = TempDir::new().unwrap();
        let config = FsckConfig { db_path: dir.path().join("fsck.db"), batch_size, ..FsckConfig::default() };
        let db = FsckDb::open(&config).unwrap();
        (dir, db)
    }

    fn cont_dir(seq: u32) -> ContDir {
        ContDir { id: EntryId::new(seq, 1, 1), save_node_id: NodeId::new(2) }
    }

    fn seed_orphans(db: &FsckDb, n: u32) -> Vec<EntityKey> {
        let dirs: Vec<ContDir> = (0..n).map(cont_dir).collect();
        db.insert_records(&dirs).unwrap();
        let violations = dirs.iter().cloned().map(Violation::OrphanedContDir).collect();
        assert_eq!(db.insert_violations(VecCursor::new(violations)).unwrap(), n as usize);
        dirs.iter().map(EntityKey::cont_dir).collect()
    }

    #[test]
    fn test_insert_in_batches() {
        let (_dir, db) = open(3);
        seed_orphans(&db, 10);
        assert_eq!(db.count_violations(ViolationKind::OrphanedContDir).unwrap(), 10);
        assert_eq!(db.count_pending(ViolationKind::OrphanedContDir).unwrap(), 10);
    }

    #[test]
    fn test_reinsert_is_skipped() {
        let (_dir, db) = open(100);
        let keys = seed_orphans(&db, 2);
        assert_eq!(keys.len(), 2);
        let again = VecCursor::new(vec![Violation::OrphanedContDir(cont_dir(0))]);
        assert_eq!(db.insert_violations(again).unwrap(), 0);
        assert_eq!(db.count_violations(ViolationKind::OrphanedContDir).unwrap(), 2);
    }

    #[test]
    fn test_insert_without_base_row_aborts_batch() {
        let (_dir, db) = open(100);
        let err = db
            .insert_violations(VecCursor::new(vec![Violation::OrphanedContDir(cont_dir(7))]))
            .unwrap_err();
        assert!(matches!(err, FsckError::BatchAborted { index: 0, .. }));
        assert_eq!(db.count_violations(ViolationKind::OrphanedContDir).unwrap(), 0);
    }

    #[test]
    fn test_ignore_masks() {
        let (_dir, db) = open(100);
        let keys = seed_orphans(&db, 3);
        let kind = ViolationKind::OrphanedContDir;

        assert!(db.set_ignore_error_code(kind, &keys[0], ViolationKind::WrongDirAttribs.code()).unwrap());
        assert_eq!(db.count_pending(kind).unwrap(), 3);

        assert!(db.set_ignore_error_code(kind, &keys[0], kind.code()).unwrap());
        assert!(db.set_ignore_all_error_codes(kind, &keys[1]).unwrap());
        assert_eq!(db.count_pending(kind).unwrap(), 1);

        let records = db.violation_list(kind, &ViolationFilter::default()).unwrap();
        assert_eq!(records[0].ignore_errors, ViolationKind::WrongDirAttribs.code() | kind.code());
        assert_eq!(records[1].ignore_errors, IGNORE_ALL_MASK);
        assert!(records[1].is_ignored());

        let unmatched = EntityKey::cont_dir(&cont_dir(99));
        assert!(!db.set_ignore_error_code(kind, &unmatched, kind.code()).unwrap());
    }

    #[test]
    fn test_ignore_rejects_wrong_key_shape() {
        let (_dir, db) = open(100);
        let key = EntityKey::target(&UsedTarget { id: 1, kind: TargetIdType::Target });
        let err = db.set_ignore_all_error_codes(ViolationKind::OrphanedContDir, &key).unwrap_err();
        assert!(matches!(err, FsckError::KeyMismatch { .. }));
    }

    #[test]
    fn test_repair_actions_partial_failure() {
        let (_dir, db) = open(100);
        let mut keys = seed_orphans(&db, 4);
        let kind = ViolationKind::OrphanedContDir;
        let missing = EntityKey::cont_dir(&cont_dir(50));
        keys.insert(2, missing.clone());

        let outcome = db.set_repair_actions(kind, &keys, RepairAction::DeleteContDir).unwrap();
        assert_eq!(outcome.updated, 4);
        assert_eq!(outcome.failed, vec![(missing, NOT_FOUND)]);

        let chosen = ViolationFilter { repair_action: Some(RepairAction::DeleteContDir), ..Default::default() };
        assert_eq!(db.violation_list(kind, &chosen).unwrap().len(), 4);
        assert_eq!(db.count_pending(kind).unwrap(), 0);
    }

    #[test]
    fn test_filter_by_owner_and_pending() {
        let (_dir, db) = open(100);
        let keys = seed_orphans(&db, 2);
        let kind = ViolationKind::OrphanedContDir;
        assert!(db.set_repair_action(kind, &keys[0], RepairAction::Nothing).unwrap());

        assert_eq!(db.violation_list(kind, &ViolationFilter::default().owned_by(2)).unwrap().len(), 2);
        assert!(db.violation_list(kind, &ViolationFilter::default().owned_by(3)).unwrap().is_empty());
        let pending = db.violation_list(kind, &ViolationFilter::pending()).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_pending());
        assert_eq!(pending[0].violation.key(), keys[1]);
    }

    #[test]
    fn test_delete_violations() {
        let (_dir, db) = open(100);
        let keys = seed_orphans(&db, 3);
        let kind = ViolationKind::OrphanedContDir;
        assert_eq!(db.delete_violations(kind, &keys[..2]).unwrap(), 2);
        assert_eq!(db.count_violations(kind).unwrap(), 1);
    }

    #[test]
    fn test_base_row_delete_cascades() {
        let (_dir, db) = open(100);
        seed_orphans(&db, 2);
        db.delete_records(&[cont_dir(0)]).unwrap();
        assert_eq!(db.count_violations(ViolationKind::OrphanedContDir).unwrap(), 1);
    }

    #[test]
    fn test_summary_covers_every_kind() {
        let (_dir, db) = open(100);
        seed_orphans(&db, 1);
        let summary = db.violation_summary().unwrap();
        assert_eq!(summary.len(), ViolationKind::ALL.len());
        let row = summary.iter().find(|s| s.kind == ViolationKind::OrphanedContDir).unwrap();
        assert_eq!((row.total, row.pending), (1, 1));
    }
}
