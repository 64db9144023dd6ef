//! `SQLite`-backed table store.
//!
//! [`Database`] owns the connection; [`Table`] is a handle over one table
//! whose columns and primary key were introspected when it was opened.
//! Identifiers are checked against that schema before they are interpolated
//! into SQL, and values are always bound as parameters.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use super::rows::{Predicate, RowSet};
use super::types::{check_identifier, is_serial, quote, sqlite_type};
use super::StoreError;

/// Pragmas applied to every connection.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;\nPRAGMA journal_mode = WAL;";

/// Bookkeeping table backing prefixed auto-increment defaults.
pub const SEQUENCE_TABLE: &str = "terra_sequences";

/// Encodes a serializable value (maps, arrays) as a JSON text value.
///
/// # Errors
///
/// Returns [`StoreError::Json`] if serialization fails.
pub fn json_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, StoreError> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

/// How the primary key of a new table is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PrimaryKey {
    /// The first column.
    #[default]
    First,
    /// A single named column.
    Column(String),
    /// A compound key over several columns.
    Compound(Vec<String>),
}

impl PrimaryKey {
    /// Single-column key.
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    fn resolve(&self, columns: &[&str]) -> Vec<String> {
        match self {
            Self::First => columns.first().map(|c| vec![(*c).to_string()]).unwrap_or_default(),
            Self::Column(c) => vec![c.clone()],
            Self::Compound(cs) => cs.clone(),
        }
    }
}

/// A foreign key: `column` references the same-named column of `references`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Column in the new table.
    pub column: String,
    /// Referenced table.
    pub references: String,
}

impl ForeignKey {
    /// Creates a foreign key reference.
    #[must_use]
    pub fn new(column: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            references: references.into(),
        }
    }
}

/// Behaviour of [`Table::insert_rows`] when a row conflicts with an
/// existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail the whole call.
    #[default]
    Error,
    /// Skip conflicting rows.
    Nothing,
    /// Upsert: overwrite the update columns of the existing row.
    Update,
}

/// Columns whose uniqueness defines a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConflictTarget {
    /// The table's primary key.
    #[default]
    PrimaryKey,
    /// Explicit columns; a unique index must cover them.
    Columns(Vec<String>),
}

/// Columns overwritten by an upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateColumns {
    /// Every inserted column.
    #[default]
    All,
    /// Only these columns.
    Columns(Vec<String>),
}

/// Options for [`Table::insert_rows`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOptions {
    /// Conflict behaviour.
    pub on_conflict: OnConflict,
    /// Conflict target for [`OnConflict::Update`].
    pub conflict_cols: ConflictTarget,
    /// Columns overwritten on conflict.
    pub update_cols: UpdateColumns,
    /// Extra condition an existing row must meet to be updated. Defaults to
    /// the first primary-key column being non-null.
    pub where_: Option<Predicate>,
}

impl InsertOptions {
    /// Plain insert; conflicts are errors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert keyed by the primary key, overwriting every inserted column.
    #[must_use]
    pub fn upsert() -> Self {
        Self {
            on_conflict: OnConflict::Update,
            ..Self::default()
        }
    }

    /// Insert, silently skipping conflicting rows.
    #[must_use]
    pub fn ignore_conflicts() -> Self {
        Self {
            on_conflict: OnConflict::Nothing,
            ..Self::default()
        }
    }

    /// Sets the conflict target columns.
    #[must_use]
    pub fn conflict_on<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflict_cols = ConflictTarget::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts which columns an upsert overwrites.
    #[must_use]
    pub fn update_only<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_cols = UpdateColumns::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the upsert condition.
    #[must_use]
    pub fn with_where(mut self, predicate: Predicate) -> Self {
        self.where_ = Some(predicate);
        self
    }
}

/// Default applied by [`Table::alter_column`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    /// A trusted SQL expression evaluated for rows inserted without a value.
    Expression(String),
    /// Auto-incrementing text values `PREFIX1`, `PREFIX2`, ...; other values
    /// not of that form are rejected.
    ///
    /// Applying a prefix (again) starts the numbering at 1. On a table that
    /// already holds `PREFIX1..N` keys, new defaults then collide with them
    /// and the insert fails with a key conflict.
    Prefix(String),
}

/// A database holding tables.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Database {
    /// Opens or creates a database at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(CONNECTION_PRAGMAS)
            .map_err(|e| StoreError::command(CONNECTION_PRAGMAS, e))
    }

    /// Path of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates a table if it does not exist and returns a handle to it.
    ///
    /// `types` use the Postgres names of the neurobooth schema and are
    /// mapped by [`sqlite_type`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] if `columns` and `types` differ in
    /// length, a column is repeated, or the primary or foreign key names a
    /// column that is not being created.
    pub fn create_table(
        &self,
        table_id: &str,
        columns: &[&str],
        types: &[&str],
        primary_key: &PrimaryKey,
        foreign_keys: &[ForeignKey],
    ) -> Result<Table, StoreError> {
        check_identifier("table", table_id)?;
        if columns.len() != types.len() {
            return Err(StoreError::schema(format!(
                "column names ({}) and data types ({}) should have equal lengths",
                columns.len(),
                types.len()
            )));
        }
        if columns.is_empty() {
            return Err(StoreError::schema("a table needs at least one column"));
        }
        for (i, column) in columns.iter().enumerate() {
            check_identifier("column", column)?;
            if columns[..i].contains(column) {
                return Err(StoreError::schema(format!("column {column} is repeated")));
            }
        }

        let key = primary_key.resolve(columns);
        for column in &key {
            if !columns.contains(&column.as_str()) {
                return Err(StoreError::schema(format!(
                    "primary key column {column} is not among the columns"
                )));
            }
        }

        // A lone serial key is declared inline so its ids are never reused.
        let serial_key = match key.as_slice() {
            [only] => columns
                .iter()
                .position(|c| c == only)
                .filter(|&i| is_serial(types[i])),
            _ => None,
        };

        let mut defs = Vec::with_capacity(columns.len() + foreign_keys.len() + 1);
        for (i, (column, dtype)) in columns.iter().zip(types).enumerate() {
            if serial_key == Some(i) {
                defs.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(column)));
            } else {
                defs.push(format!("{} {}", quote(column), sqlite_type(dtype)?));
            }
        }
        if serial_key.is_none() && !key.is_empty() {
            let key = key.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            defs.push(format!("PRIMARY KEY ({key})"));
        }
        for fk in foreign_keys {
            check_identifier("table", &fk.references)?;
            if !columns.contains(&fk.column.as_str()) {
                return Err(StoreError::schema(format!(
                    "foreign key column {} is not among the columns",
                    fk.column
                )));
            }
            defs.push(format!(
                "FOREIGN KEY ({col}) REFERENCES {table} ({col})",
                col = quote(&fk.column),
                table = quote(&fk.references)
            ));
        }

        let create_cmd = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(table_id),
            defs.join(", ")
        );
        {
            let conn = self.lock();
            conn.execute(&create_cmd, [])
                .map_err(|e| StoreError::command(&create_cmd, e))?;
        }
        tracing::debug!(table_id, "created table");

        Table::open(Arc::clone(&self.conn), table_id, Some(key))
    }

    /// Opens an existing table, discovering its primary key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownTable`] if the table does not exist.
    pub fn table(&self, table_id: &str) -> Result<Table, StoreError> {
        Table::open(Arc::clone(&self.conn), table_id, None)
    }

    /// Opens an existing table with an explicit primary key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownTable`] if the table does not exist, or
    /// [`StoreError::Validation`] if a key column is unknown.
    pub fn table_with_key(&self, table_id: &str, primary_key: &[&str]) -> Result<Table, StoreError> {
        let key = primary_key.iter().map(|c| (*c).to_string()).collect();
        Table::open(Arc::clone(&self.conn), table_id, Some(key))
    }

    /// Drops a table if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn drop_table(&self, table_id: &str) -> Result<(), StoreError> {
        check_identifier("table", table_id)?;
        let cmd = format!("DROP TABLE IF EXISTS {}", quote(table_id));
        self.lock()
            .execute(&cmd, [])
            .map_err(|e| StoreError::command(&cmd, e))?;
        Ok(())
    }

    /// Lists user tables, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        const CMD: &str = "SELECT name FROM sqlite_master \
                           WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1 \
                           ORDER BY name";
        let conn = self.lock();
        let mut stmt = conn.prepare(CMD).map_err(|e| StoreError::command(CMD, e))?;
        let names = stmt
            .query_map(params![SEQUENCE_TABLE], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::command(CMD, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::command(CMD, e))?;
        Ok(names)
    }

    /// Creates a unique index, as required by upserts whose conflict target
    /// is not the primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is invalid or the statement fails.
    pub fn create_unique_index(
        &self,
        index_name: &str,
        table_id: &str,
        columns: &[&str],
    ) -> Result<(), StoreError> {
        check_identifier("index", index_name)?;
        check_identifier("table", table_id)?;
        for column in columns {
            check_identifier("column", column)?;
        }
        let cmd = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(index_name),
            quote(table_id),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        );
        self.lock()
            .execute(&cmd, [])
            .map_err(|e| StoreError::command(&cmd, e))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }
}

/// Columns of a table as `(name, declared type, primary-key position)`.
fn table_info(conn: &Connection, table_id: &str) -> Result<Vec<(String, String, i64)>, StoreError> {
    const CMD: &str = "SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid";
    let mut stmt = conn.prepare(CMD).map_err(|e| StoreError::command(CMD, e))?;
    let columns = stmt
        .query_map(params![table_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .map_err(|e| StoreError::command(CMD, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::command(CMD, e))?;
    Ok(columns)
}

fn select_rows(
    conn: &Connection,
    cmd: &str,
    params: &[Value],
    width: usize,
) -> Result<Vec<Vec<Value>>, StoreError> {
    let mut stmt = conn.prepare(cmd).map_err(|e| StoreError::command(cmd, e))?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(|e| StoreError::command(cmd, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::command(cmd, e))?;
    Ok(rows)
}

// A panic while holding the lock cannot leave the connection itself in a
// broken state; every statement is atomic on the engine side.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle over one table.
pub struct Table {
    conn: Arc<Mutex<Connection>>,
    table_id: String,
    column_names: Vec<String>,
    data_types: Vec<String>,
    primary_key: Vec<String>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("table_id", &self.table_id)
            .field("column_names", &self.column_names)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table \"{}\" ({})", self.table_id, self.column_names.join(", "))
    }
}

impl Table {
    fn open(
        conn: Arc<Mutex<Connection>>,
        table_id: &str,
        primary_key: Option<Vec<String>>,
    ) -> Result<Self, StoreError> {
        check_identifier("table", table_id)?;

        let columns = table_info(&lock(&conn), table_id)?;
        if columns.is_empty() {
            return Err(StoreError::UnknownTable {
                table_id: table_id.to_string(),
            });
        }

        let column_names: Vec<String> = columns.iter().map(|(name, _, _)| name.clone()).collect();
        let data_types = columns.iter().map(|(_, dtype, _)| dtype.clone()).collect();

        let primary_key = if let Some(key) = primary_key {
            for column in &key {
                if !column_names.contains(column) {
                    return Err(StoreError::validation(format!(
                        "primary key column {column} is not present in table {table_id}"
                    )));
                }
            }
            key
        } else {
            let mut key: Vec<_> = columns
                .iter()
                .filter(|(_, _, pk)| *pk > 0)
                .map(|(name, _, pk)| (*pk, name.clone()))
                .collect();
            key.sort();
            key.into_iter().map(|(_, name)| name).collect()
        };

        Ok(Self {
            conn,
            table_id: table_id.to_string(),
            column_names,
            data_types,
            primary_key,
        })
    }

    /// The table name.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Declared column types, parallel to [`Self::column_names`].
    pub fn data_types(&self) -> &[String] {
        &self.data_types
    }

    /// Primary-key columns; more than one for a compound key.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    fn check_column(&self, column: &str) -> Result<(), StoreError> {
        if self.column_names.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(StoreError::validation(format!(
                "column {column} is not present in table {}",
                self.table_id
            )))
        }
    }

    fn first_key(&self) -> Result<&str, StoreError> {
        self.primary_key.first().map(String::as_str).ok_or_else(|| {
            StoreError::validation(format!("table {} has no primary key", self.table_id))
        })
    }

    /// Runs a query.
    ///
    /// `columns` defaults to every column; `filter` defaults to all rows.
    /// Rows come back in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an unknown column, or a
    /// [`StoreError::Command`] if the statement fails.
    pub fn query(
        &self,
        columns: Option<&[&str]>,
        filter: Option<&Predicate>,
    ) -> Result<RowSet, StoreError> {
        let selected: Vec<String> = match columns {
            Some(cols) => {
                for col in cols {
                    self.check_column(col)?;
                }
                cols.iter().map(|c| (*c).to_string()).collect()
            },
            None => self.column_names.clone(),
        };
        if selected.is_empty() {
            return Err(StoreError::validation("no columns selected"));
        }

        let mut cmd = format!(
            "SELECT {} FROM {}",
            selected.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            quote(&self.table_id)
        );
        let params: &[Value] = match filter {
            Some(predicate) => {
                cmd.push_str(" WHERE ");
                cmd.push_str(predicate.sql());
                predicate.params()
            },
            None => &[],
        };
        cmd.push_str(" ORDER BY rowid");

        let rows = select_rows(&self.lock(), &cmd, params, selected.len())?;

        let index = match self.primary_key.as_slice() {
            [pk] => selected.iter().position(|c| c == pk),
            _ => None,
        };
        Ok(RowSet::new(selected, rows, index))
    }

    /// Inserts rows, optionally upserting on conflict.
    ///
    /// Every row must carry exactly one value per entry of `columns`. The
    /// whole call runs in one transaction.
    ///
    /// Returns the primary-key value of the written row when exactly one
    /// row was supplied and written (so dependent inserts can reference
    /// it), and `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for malformed rows or options and
    /// [`StoreError::Command`] if the engine rejects a row (including
    /// conflicts under [`OnConflict::Error`]).
    pub fn insert_rows(
        &self,
        rows: &[Vec<Value>],
        columns: &[&str],
        options: &InsertOptions,
    ) -> Result<Option<Value>, StoreError> {
        if columns.is_empty() {
            return Err(StoreError::validation("columns must not be empty"));
        }
        for column in columns {
            self.check_column(column)?;
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StoreError::validation(format!(
                    "row {i} has {} values; tuple length must match number of columns ({})",
                    row.len(),
                    columns.len()
                )));
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let insert_cmd = self.insert_command(columns, options)?;
        let where_params: &[Value] = match (&options.on_conflict, &options.where_) {
            (OnConflict::Update, Some(predicate)) => predicate.params(),
            _ => &[],
        };

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut written = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx
                .prepare(&insert_cmd)
                .map_err(|e| StoreError::command(&insert_cmd, e))?;
            for row in rows {
                let params = row.iter().chain(where_params.iter());
                let mut returned = stmt
                    .query(params_from_iter(params))
                    .map_err(|e| StoreError::command(&insert_cmd, e))?;
                while let Some(r) = returned.next().map_err(|e| StoreError::command(&insert_cmd, e))? {
                    written.push(r.get::<_, i64>(0)?);
                }
            }
        }

        let key = match (rows.len(), written.as_slice(), self.primary_key.first()) {
            (1, [rowid], Some(pk)) => {
                let select = format!("SELECT {} FROM {} WHERE rowid = ?1", quote(pk), quote(&self.table_id));
                tx.query_row(&select, params![rowid], |r| r.get::<_, Value>(0))
                    .optional()
                    .map_err(|e| StoreError::command(&select, e))?
            },
            _ => None,
        };
        tx.commit()?;

        tracing::trace!(table_id = %self.table_id, rows = rows.len(), written = written.len(), "inserted rows");
        Ok(key)
    }

    fn insert_command(&self, columns: &[&str], options: &InsertOptions) -> Result<String, StoreError> {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let mut cmd = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(&self.table_id),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        );

        match options.on_conflict {
            OnConflict::Error => {},
            OnConflict::Nothing => cmd.push_str(" ON CONFLICT DO NOTHING"),
            OnConflict::Update => {
                let conflict_cols = match &options.conflict_cols {
                    ConflictTarget::PrimaryKey => {
                        self.first_key()?;
                        self.primary_key.clone()
                    },
                    ConflictTarget::Columns(cols) => {
                        for col in cols {
                            self.check_column(col)?;
                        }
                        cols.clone()
                    },
                };
                if conflict_cols.is_empty() {
                    return Err(StoreError::validation("conflict columns must not be empty"));
                }
                let update_cols: Vec<String> = match &options.update_cols {
                    UpdateColumns::All => columns.iter().map(|c| (*c).to_string()).collect(),
                    UpdateColumns::Columns(cols) => {
                        for col in cols {
                            self.check_column(col)?;
                        }
                        cols.clone()
                    },
                };
                if update_cols.is_empty() {
                    return Err(StoreError::validation("update columns must not be empty"));
                }

                cmd.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    conflict_cols.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
                    update_cols
                        .iter()
                        .map(|c| format!("{col} = excluded.{col}", col = quote(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
                match &options.where_ {
                    Some(predicate) => {
                        cmd.push_str(" WHERE ");
                        cmd.push_str(predicate.sql());
                    },
                    None => cmd.push_str(&format!(
                        " WHERE {}.{} IS NOT NULL",
                        quote(&self.table_id),
                        quote(self.first_key()?)
                    )),
                }
            },
        }
        cmd.push_str(" RETURNING rowid");
        Ok(cmd)
    }

    /// Overwrites columns of the row whose primary key equals `key`.
    ///
    /// `columns` defaults to every column of the table. Returns the number
    /// of rows changed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if a column is unknown, the number
    /// of values differs from the number of columns, or the table has no
    /// single-column primary key.
    pub fn update_row(
        &self,
        key: &Value,
        values: &[Value],
        columns: Option<&[&str]>,
    ) -> Result<usize, StoreError> {
        let columns: Vec<&str> = match columns {
            Some(cols) => cols.to_vec(),
            None => self.column_names.iter().map(String::as_str).collect(),
        };
        if columns.len() != values.len() {
            return Err(StoreError::validation(format!(
                "length of values ({}) != length of columns ({})",
                values.len(),
                columns.len()
            )));
        }
        for column in &columns {
            self.check_column(column)?;
        }
        let pk = match self.primary_key.as_slice() {
            [pk] => pk,
            _ => {
                return Err(StoreError::validation(format!(
                    "update_row requires a single-column primary key on table {}",
                    self.table_id
                )));
            },
        };

        let cmd = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(&self.table_id),
            columns
                .iter()
                .map(|c| format!("{} = ?", quote(c)))
                .collect::<Vec<_>>()
                .join(", "),
            quote(pk)
        );
        let changed = self
            .lock()
            .execute(&cmd, params_from_iter(values.iter().chain(std::iter::once(key))))
            .map_err(|e| StoreError::command(&cmd, e))?;
        Ok(changed)
    }

    /// Deletes the rows matching `condition`; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn delete_row(&self, condition: &Predicate) -> Result<usize, StoreError> {
        let cmd = format!("DELETE FROM {} WHERE {}", quote(&self.table_id), condition.sql());
        let removed = self
            .lock()
            .execute(&cmd, params_from_iter(condition.params().iter()))
            .map_err(|e| StoreError::command(&cmd, e))?;
        Ok(removed)
    }

    /// Adds a column.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or type is invalid, the column already
    /// exists, or the statement fails.
    pub fn add_column(&mut self, column: &str, dtype: &str) -> Result<(), StoreError> {
        check_identifier("column", column)?;
        if self.column_names.iter().any(|c| c == column) {
            return Err(StoreError::validation(format!(
                "column {column} already exists in table {}",
                self.table_id
            )));
        }
        let dtype = sqlite_type(dtype)?;
        let cmd = format!(
            "ALTER TABLE {} ADD COLUMN {} {dtype}",
            quote(&self.table_id),
            quote(column)
        );
        self.lock()
            .execute(&cmd, [])
            .map_err(|e| StoreError::command(&cmd, e))?;
        self.column_names.push(column.to_string());
        self.data_types.push(dtype);
        Ok(())
    }

    /// Drops a column. Primary-key columns cannot be dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the column is unknown or the statement fails.
    pub fn drop_column(&mut self, column: &str) -> Result<(), StoreError> {
        self.check_column(column)?;
        let cmd = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote(&self.table_id),
            quote(column)
        );
        self.lock()
            .execute(&cmd, [])
            .map_err(|e| StoreError::command(&cmd, e))?;
        if let Some(idx) = self.column_names.iter().position(|c| c == column) {
            self.column_names.remove(idx);
            self.data_types.remove(idx);
        }
        Ok(())
    }

    /// Gives a column a default for rows inserted without a value.
    ///
    /// With [`ColumnDefault::Prefix`], e.g. `Prefix("SUBJECT")`, new rows get
    /// `SUBJECT1`, `SUBJECT2`, ... and the column only accepts values of that
    /// form. Re-applying a prefix restarts its numbering.
    ///
    /// # Errors
    ///
    /// Returns an error if the column is unknown, the prefix is not
    /// alphanumeric, or a statement fails.
    pub fn alter_column(&self, column: &str, default: &ColumnDefault) -> Result<(), StoreError> {
        self.check_column(column)?;
        let table = quote(&self.table_id);
        let col = quote(column);
        let sequence = format!("{}_{column}", self.table_id);
        let default_trigger = quote(&format!("{sequence}_default"));

        let script = match default {
            ColumnDefault::Expression(expr) => format!(
                "DROP TRIGGER IF EXISTS {default_trigger};
                 CREATE TRIGGER {default_trigger} AFTER INSERT ON {table}
                 FOR EACH ROW WHEN NEW.{col} IS NULL
                 BEGIN
                     UPDATE {table} SET {col} = ({expr}) WHERE rowid = NEW.rowid;
                 END;"
            ),
            ColumnDefault::Prefix(prefix) => {
                if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(StoreError::validation(format!("invalid prefix: {prefix:?}")));
                }
                let len = prefix.len();
                let mismatch = format!(
                    "NEW.{col} IS NOT NULL AND NOT (substr(NEW.{col}, 1, {len}) = '{prefix}' \
                     AND length(NEW.{col}) > {len} \
                     AND substr(NEW.{col}, {start}) NOT GLOB '*[^0-9]*')",
                    start = len + 1
                );
                let insert_check = quote(&format!("{sequence}_chk_insert"));
                let update_check = quote(&format!("{sequence}_chk_update"));
                let message = format!("{column} must match ^{prefix}[0-9]+$");
                format!(
                    "CREATE TABLE IF NOT EXISTS {SEQUENCE_TABLE} (name TEXT PRIMARY KEY, value INTEGER NOT NULL);
                     INSERT INTO {SEQUENCE_TABLE} (name, value) VALUES ('{sequence}', 0)
                         ON CONFLICT (name) DO UPDATE SET value = 0;
                     DROP TRIGGER IF EXISTS {default_trigger};
                     CREATE TRIGGER {default_trigger} AFTER INSERT ON {table}
                     FOR EACH ROW WHEN NEW.{col} IS NULL
                     BEGIN
                         UPDATE {SEQUENCE_TABLE} SET value = value + 1 WHERE name = '{sequence}';
                         UPDATE {table} SET {col} = '{prefix}' ||
                             (SELECT value FROM {SEQUENCE_TABLE} WHERE name = '{sequence}')
                         WHERE rowid = NEW.rowid;
                     END;
                     DROP TRIGGER IF EXISTS {insert_check};
                     CREATE TRIGGER {insert_check} BEFORE INSERT ON {table}
                     FOR EACH ROW WHEN {mismatch}
                     BEGIN SELECT RAISE(ABORT, '{message}'); END;
                     DROP TRIGGER IF EXISTS {update_check};
                     CREATE TRIGGER {update_check} BEFORE UPDATE OF {col} ON {table}
                     FOR EACH ROW WHEN {mismatch}
                     BEGIN SELECT RAISE(ABORT, '{message}'); END;",
                )
            },
        };

        self.lock()
            .execute_batch(&script)
            .map_err(|e| StoreError::command(script.trim(), e))?;
        Ok(())
    }

    /// Drops the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn drop(self) -> Result<(), StoreError> {
        let cmd = format!("DROP TABLE IF EXISTS {}", quote(&self.table_id));
        self.lock()
            .execute(&cmd, [])
            .map_err(|e| StoreError::command(&cmd, e))?;
        Ok(())
    }
}
