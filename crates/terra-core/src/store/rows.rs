//! Row sets returned by queries and the predicates that select them.

use std::fmt;

use rusqlite::types::Value;

/// A trusted SQL predicate together with its bound parameter values.
///
/// The SQL text is written by the calling code (never by external input);
/// every value it compares against is passed through `?` placeholders.
///
/// ```rust
/// use rusqlite::types::Value;
/// use terra_core::store::Predicate;
///
/// let filter = Predicate::new("dest_dirname = ? AND is_deleted = ?")
///     .bind("/data/nas/")
///     .bind(false);
/// assert_eq!(filter.params().len(), 2);
/// assert_eq!(filter.params()[1], Value::Integer(0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    sql: String,
    params: Vec<Value>,
}

impl Predicate {
    /// Creates a predicate without bound values.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds the next `?` placeholder (builder pattern).
    #[must_use]
    pub fn bind(mut self, value: impl Into<Param>) -> Self {
        self.params.push(value.into().0);
        self
    }

    /// The SQL text of the predicate.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The bound values, in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Conversion helper so predicates accept plain Rust values.
#[derive(Debug, Clone, PartialEq)]
pub struct Param(pub Value);

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self(Value::Text(value.to_string()))
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self(Value::Text(value))
    }
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Self(Value::Text(value.clone()))
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self(Value::Integer(value))
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self(Value::Integer(i64::from(value)))
    }
}

/// Result of [`Table::query`](super::Table::query).
///
/// Rows keep the column order requested. When the table has a single-column
/// primary key and it was part of the selection, the set is indexed by it
/// and [`RowSet::get`] looks rows up by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    index: Option<usize>,
}

impl RowSet {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, index: Option<usize>) -> Self {
        Self {
            columns,
            rows,
            index,
        }
    }

    /// Column names, in selection order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Name of the index column, if the set is indexed by primary key.
    pub fn index_column(&self) -> Option<&str> {
        self.index.map(|i| self.columns[i].as_str())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the query matched nothing.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over rows.
    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |values| RowView { set: self, values })
    }

    /// Returns row `i`.
    pub fn row(&self, i: usize) -> Option<RowView<'_>> {
        self.rows.get(i).map(|values| RowView { set: self, values })
    }

    /// Looks a row up by its primary-key value.
    pub fn get(&self, key: &Value) -> Option<RowView<'_>> {
        let index = self.index?;
        self.iter().find(|row| &row.values[index] == key)
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let position = self.position(name)?;
        Some(self.rows.iter().map(|row| &row[position]).collect())
    }

    /// Primary-key values, when the set is indexed.
    pub fn keys(&self) -> Vec<&Value> {
        self.index
            .map(|i| self.rows.iter().map(|row| &row[i]).collect())
            .unwrap_or_default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A borrowed row of a [`RowSet`].
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    set: &'a RowSet,
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    /// Raw value of a column.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.set.position(column).map(|i| &self.values[i])
    }

    /// Primary-key value, when the set is indexed.
    pub fn key(&self) -> Option<&'a Value> {
        self.set.index.map(|i| &self.values[i])
    }

    /// All values in column order.
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Text value of a column; `None` for NULL or a non-text value.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        match self.get(column)? {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer value of a column; `None` for NULL or a non-integer value.
    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value of a column stored as `0`/`1`; `None` for NULL.
    pub fn flag(&self, column: &str) -> Option<bool> {
        self.integer(column).map(|i| i != 0)
    }
}
