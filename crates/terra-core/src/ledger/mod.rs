//! Typed access to the file-transfer ledger.
//!
//! The ledger holds one row per observed file-at-location instance. Rows are
//! created by discovery (a file materializing at its primary location, no
//! source directory) or by a copy (pending until verified). They are never
//! physically removed, except for unverified copy stubs that the recovery
//! pass discards.
//!
//! # Row states
//!
//! | `src_dirname` | `is_finished` | meaning                              |
//! |---------------|---------------|--------------------------------------|
//! | NULL          | NULL          | write origin, never verified          |
//! | set           | `false`       | copy attempted, not (yet) verified    |
//! | set           | `true`        | copy verified identical to the source |
//!
//! `is_deleted` only ever becomes `true` for write-origin or verified rows.

pub mod timestamp;

#[cfg(test)]
mod tests;

use std::fmt;

use rusqlite::types::Value;

use crate::store::{
    Database, ForeignKey, InsertOptions, Predicate, PrimaryKey, RowView, StoreError, Table,
};

/// Default name of the ledger table.
pub const LEDGER_TABLE: &str = "log_file";

/// Default name of the sensor-file manifest table.
pub const MANIFEST_TABLE: &str = "log_sensor_file";

/// Ledger columns, in declaration order.
pub const LEDGER_COLUMNS: [&str; 9] = [
    "operation_id",
    "log_sensor_file_id",
    "src_dirname",
    "dest_dirname",
    "fname",
    "time_verified",
    "rsync_operation",
    "is_deleted",
    "is_finished",
];

const LEDGER_TYPES: [&str; 9] = [
    "SERIAL",
    "TEXT",
    "TEXT",
    "TEXT",
    "TEXT",
    "TIMESTAMP",
    "TEXT",
    "BOOLEAN",
    "BOOLEAN",
];

/// Manifest key column.
pub const MANIFEST_ID_COLUMN: &str = "log_sensor_file_id";

/// Manifest column holding the ordered list of file paths.
pub const MANIFEST_PATHS_COLUMN: &str = "sensor_file_path";

/// Creates the manifest and ledger tables if they do not exist.
///
/// The ledger's `log_sensor_file_id` references the manifest.
///
/// # Errors
///
/// Returns an error if either table cannot be created.
pub fn create_ledger_tables(
    db: &Database,
    ledger_id: &str,
    manifest_id: &str,
) -> Result<(Table, Table), StoreError> {
    let manifest = db.create_table(
        manifest_id,
        &[MANIFEST_ID_COLUMN, MANIFEST_PATHS_COLUMN],
        &["TEXT", "TEXT[]"],
        &PrimaryKey::First,
        &[],
    )?;
    let ledger = db.create_table(
        ledger_id,
        &LEDGER_COLUMNS,
        &LEDGER_TYPES,
        &PrimaryKey::First,
        &[ForeignKey::new(MANIFEST_ID_COLUMN, manifest_id)],
    )?;
    tracing::info!(ledger_id, manifest_id, "ledger tables ready");
    Ok((ledger, manifest))
}

/// Surrogate key of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub i64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<OperationId> for Value {
    fn from(id: OperationId) -> Self {
        Self::Integer(id.0)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub operation_id: OperationId,
    /// Manifest entry the file belongs to.
    pub sensor_file_id: Option<String>,
    /// Source of a copy; `None` for a write origin.
    pub src_dirname: Option<String>,
    /// Location of the file, with a trailing slash.
    pub dest_dirname: String,
    /// Path relative to `dest_dirname`, possibly with a session folder.
    pub fname: String,
    /// When the file was last confirmed present (write) or identical (copy).
    pub time_verified: Option<String>,
    /// Transfer code reported by the mirror tool.
    pub rsync_operation: Option<String>,
    pub is_deleted: bool,
    pub is_finished: Option<bool>,
}

impl LedgerEntry {
    fn from_row(row: &RowView<'_>) -> Result<Self, StoreError> {
        let operation_id = row
            .integer("operation_id")
            .map(OperationId)
            .ok_or_else(|| StoreError::Validation("ledger row without operation_id".into()))?;
        let required = |column: &str| {
            row.text(column).map(str::to_string).ok_or_else(|| {
                StoreError::Validation(format!("ledger row {operation_id} has no {column}"))
            })
        };
        Ok(Self {
            operation_id,
            sensor_file_id: row.text("log_sensor_file_id").map(str::to_string),
            src_dirname: row.text("src_dirname").map(str::to_string),
            dest_dirname: required("dest_dirname")?,
            fname: required("fname")?,
            time_verified: row.text("time_verified").map(str::to_string),
            rsync_operation: row.text("rsync_operation").map(str::to_string),
            is_deleted: row.flag("is_deleted").unwrap_or(false),
            is_finished: row.flag("is_finished"),
        })
    }

    /// `true` for a file materializing at its primary location.
    pub fn is_write_origin(&self) -> bool {
        self.src_dirname.is_none()
    }

    /// File name with any directory components stripped.
    pub fn bare_name(&self) -> &str {
        bare_name(&self.fname)
    }
}

/// Strips directory components from a ledger file name.
pub fn bare_name(fname: &str) -> &str {
    fname.rsplit('/').next().unwrap_or(fname)
}

/// A copy recorded before the mirror tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCopy {
    pub sensor_file_id: String,
    pub src_dirname: String,
    pub dest_dirname: String,
    pub fname: String,
    pub rsync_operation: String,
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// The ledger table with typed row operations.
#[derive(Debug)]
pub struct FileLedger {
    table: Table,
}

impl FileLedger {
    /// Wraps an opened ledger table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] if a ledger column is missing.
    pub fn new(table: Table) -> Result<Self, StoreError> {
        for column in LEDGER_COLUMNS {
            if !table.column_names().iter().any(|c| c == column) {
                return Err(StoreError::Schema(format!(
                    "table {} is not a ledger: column {column} is missing",
                    table.table_id()
                )));
            }
        }
        Ok(Self { table })
    }

    /// Opens the ledger table `table_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or is not a ledger.
    pub fn open(db: &Database, table_id: &str) -> Result<Self, StoreError> {
        Self::new(db.table(table_id)?)
    }

    /// The underlying table.
    pub fn table(&self) -> &Table {
        &self.table
    }

    fn select(&self, filter: Option<&Predicate>) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = self.table.query(Some(&LEDGER_COLUMNS), filter)?;
        rows.iter().map(|row| LedgerEntry::from_row(&row)).collect()
    }

    /// Every row, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.select(None)
    }

    /// Rows whose destination is `dest_dirname`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries_at(&self, dest_dirname: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        self.select(Some(&Predicate::new("dest_dirname = ?").bind(dest_dirname)))
    }

    /// Copy rows awaiting verification (`is_finished = false`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn unfinished(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.select(Some(&Predicate::new("is_finished = ?").bind(false)))
    }

    /// Looks a row up by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: OperationId) -> Result<Option<LedgerEntry>, StoreError> {
        let mut found = self.select(Some(&Predicate::new("operation_id = ?").bind(id.0)))?;
        Ok(found.pop())
    }

    /// The verified copy of `fname` at `dest_dirname`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn finished_copy(
        &self,
        dest_dirname: &str,
        fname: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let filter = Predicate::new(
            "dest_dirname = ? AND fname = ? AND src_dirname IS NOT NULL AND is_finished = ?",
        )
        .bind(dest_dirname)
        .bind(fname)
        .bind(true);
        Ok(self.select(Some(&filter))?.into_iter().next())
    }

    /// The pending copy of `fname` at `dest_dirname`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn pending_copy(
        &self,
        dest_dirname: &str,
        fname: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let filter = Predicate::new("dest_dirname = ? AND fname = ? AND is_finished = ?")
            .bind(dest_dirname)
            .bind(fname)
            .bind(false);
        Ok(self.select(Some(&filter))?.into_iter().next())
    }

    /// Write-origin rows at `target_dir`, not deleted, verified before
    /// `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn write_origin_before(
        &self,
        target_dir: &str,
        cutoff: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let filter = Predicate::new(
            "dest_dirname = ? AND src_dirname IS NULL AND is_finished IS NULL \
             AND COALESCE(is_deleted, 0) = 0 AND time_verified < ?",
        )
        .bind(target_dir)
        .bind(cutoff);
        self.select(Some(&filter))
    }

    /// Verified, not deleted copies at any of `dests`, verified before
    /// `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn durable_copies_before(
        &self,
        dests: &[String],
        cutoff: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        if dests.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; dests.len()].join(", ");
        let mut filter = Predicate::new(format!(
            "dest_dirname IN ({placeholders}) AND src_dirname IS NOT NULL AND is_finished = ? \
             AND COALESCE(is_deleted, 0) = 0 AND time_verified < ?"
        ));
        for dest in dests {
            filter = filter.bind(dest);
        }
        self.select(Some(&filter.bind(true).bind(cutoff)))
    }

    /// Records a file found at its primary location.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_written(
        &self,
        sensor_file_id: &str,
        dest_dirname: &str,
        fname: &str,
        time_verified: &str,
    ) -> Result<OperationId, StoreError> {
        let key = self.table.insert_rows(
            &[vec![
                text(sensor_file_id),
                Value::Null,
                text(dest_dirname),
                text(fname),
                text(time_verified),
                Value::Null,
                Value::Integer(0),
            ]],
            &[
                "log_sensor_file_id",
                "src_dirname",
                "dest_dirname",
                "fname",
                "time_verified",
                "rsync_operation",
                "is_deleted",
            ],
            &InsertOptions::new(),
        )?;
        match key {
            Some(Value::Integer(id)) => Ok(OperationId(id)),
            other => Err(StoreError::Validation(format!(
                "ledger insert returned an unexpected key: {other:?}"
            ))),
        }
    }

    /// Records copies about to be transferred, all in one statement batch.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails; no row is written then.
    pub fn record_pending(&self, copies: &[PendingCopy]) -> Result<usize, StoreError> {
        let rows: Vec<Vec<Value>> = copies
            .iter()
            .map(|copy| {
                vec![
                    text(&copy.sensor_file_id),
                    text(&copy.src_dirname),
                    text(&copy.dest_dirname),
                    text(&copy.fname),
                    Value::Null,
                    text(&copy.rsync_operation),
                    Value::Integer(0),
                    Value::Integer(0),
                ]
            })
            .collect();
        self.table.insert_rows(
            &rows,
            &[
                "log_sensor_file_id",
                "src_dirname",
                "dest_dirname",
                "fname",
                "time_verified",
                "rsync_operation",
                "is_deleted",
                "is_finished",
            ],
            &InsertOptions::new(),
        )?;
        Ok(rows.len())
    }

    /// Marks a copy verified at `time_verified`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_finished(&self, id: OperationId, time_verified: &str) -> Result<bool, StoreError> {
        let changed = self.table.update_row(
            &id.into(),
            &[Value::Integer(1), text(time_verified)],
            Some(&["is_finished", "time_verified"]),
        )?;
        Ok(changed > 0)
    }

    /// Flags a verified copy for re-verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_unfinished(&self, id: OperationId) -> Result<bool, StoreError> {
        let changed = self
            .table
            .update_row(&id.into(), &[Value::Integer(0)], Some(&["is_finished"]))?;
        Ok(changed > 0)
    }

    /// Records that the file of this row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_deleted(&self, id: OperationId) -> Result<bool, StoreError> {
        let changed = self
            .table
            .update_row(&id.into(), &[Value::Integer(1)], Some(&["is_deleted"]))?;
        Ok(changed > 0)
    }

    /// Removes an unverified copy stub.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove(&self, id: OperationId) -> Result<bool, StoreError> {
        let removed = self
            .table
            .delete_row(&Predicate::new("operation_id = ?").bind(id.0))?;
        Ok(removed > 0)
    }
}
