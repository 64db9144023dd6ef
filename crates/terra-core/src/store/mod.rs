//! Table store for the neurobooth database.
//!
//! This module wraps relational tables with a small, typed-enough API:
//! column and primary-key introspection, parameterized queries, and
//! upserts. It is the layer the file-transfer ledger is built on, and the
//! layer the ingestion scripts use for every other table.
//!
//! # Features
//!
//! - **Introspection**: column names, declared types and (compound) primary
//!   keys are read from the database when a [`Table`] is opened
//! - **Upserts**: [`Table::insert_rows`] with [`OnConflict::Update`] supports
//!   re-running an ingestion with the same key (values are overwritten) and
//!   with a different key but matching natural identity (via a unique index
//!   as [`ConflictTarget::Columns`])
//! - **Chained inserts**: a single-row insert returns its primary key
//! - **Schema evolution**: add, drop and alter columns, including prefixed
//!   auto-increment defaults such as `SUBJECT1`, `SUBJECT2`, ...
//!
//! # Example
//!
//! ```rust
//! use rusqlite::types::Value;
//! use terra_core::store::{Database, InsertOptions, PrimaryKey, Predicate};
//!
//! # fn example() -> Result<(), terra_core::store::StoreError> {
//! let db = Database::in_memory()?;
//! let subject = db.create_table(
//!     "subject",
//!     &["subject_id", "first_name", "last_name", "age"],
//!     &["VARCHAR (255)", "VARCHAR (255)", "VARCHAR (255)", "INTEGER"],
//!     &PrimaryKey::First,
//!     &[],
//! )?;
//!
//! let columns = ["subject_id", "first_name", "last_name", "age"];
//! let row = |last: &str, age: i64| {
//!     vec![
//!         Value::Text("x5dc".into()),
//!         Value::Text("mainak".into()),
//!         Value::Text(last.into()),
//!         Value::Integer(age),
//!     ]
//! };
//! subject.insert_rows(&[row("jas", 21)], &columns, &InsertOptions::new())?;
//! subject.insert_rows(&[row("jazz", 32)], &columns, &InsertOptions::upsert())?;
//!
//! let rows = subject.query(None, Some(&Predicate::new("age > ?").bind(30_i64)))?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod error;
mod rows;
mod table;
pub mod types;


pub use error::StoreError;
pub use rows::{Param, Predicate, RowSet, RowView};
pub use table::{
    ColumnDefault, ConflictTarget, Database, ForeignKey, InsertOptions, OnConflict, PrimaryKey,
    SEQUENCE_TABLE, Table, UpdateColumns, json_value,
};
