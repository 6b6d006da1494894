//! Row sources for the scan engine.
//!
//! A [`RowSource`] is an ordered cursor that can be moved to any absolute position. The SQLite
//! source reads the whole result set up front, so repositioning is an index change and the
//! source connection is closed before scanning starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};

use crate::config::SourceDescriptor;
use crate::error::{Error, Result};
use crate::progress::create_spinner;
use crate::strings::content_hash;

// ============================================================================
// Rows
// ============================================================================

/// One source row, reduced to what the scan needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    /// Content hash of `data`
    pub id: String,
    /// Hash-column values joined by a single space
    pub data: String,
    /// JSON object of every column
    pub serialized: String,
}

impl Row {
    /// Build a row from its column values, given in result-set order.
    pub fn from_values(
        columns: &[String],
        values: Vec<Value>,
        hash_columns: &BTreeSet<String>,
    ) -> Result<Row> {
        let data = columns
            .iter()
            .zip(&values)
            .filter(|(name, _)| hash_columns.is_empty() || hash_columns.contains(*name))
            .map(|(_, value)| render(value))
            .collect::<Vec<_>>()
            .join(" ");

        let object: Map<String, Value> = columns.iter().cloned().zip(values).collect();
        let serialized = serde_json::to_string(&object)?;

        Ok(Row {
            id: content_hash(&data),
            data,
            serialized,
        })
    }
}

/// Text form of a column value inside the projected string. NULL is empty.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Ordered, randomly positionable cursor over rows.
pub trait RowSource: Send {
    fn columns(&self) -> &[String];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the cursor so the next fetch returns the row at `position`.
    /// Returns false when `position` is past the last row.
    fn absolute(&mut self, position: usize) -> bool;

    /// Fetch the row under the cursor and advance; `None` once exhausted.
    fn fetch(&mut self) -> Result<Option<Arc<Row>>>;
}

/// Rows held in memory, in source order.
#[derive(Debug, Default)]
pub struct MaterializedRows {
    columns: Vec<String>,
    rows: Vec<Arc<Row>>,
    position: usize,
}

impl MaterializedRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter().map(Arc::new).collect(),
            position: 0,
        }
    }

    /// Single-column rows from plain strings.
    pub fn from_strings<I, S>(column: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = vec![column.to_string()];
        let rows = values
            .into_iter()
            .map(|v| Row::from_values(&columns, vec![Value::String(v.into())], &BTreeSet::new()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(columns, rows))
    }
}

impl RowSource for MaterializedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn absolute(&mut self, position: usize) -> bool {
        self.position = position;
        position < self.rows.len()
    }

    fn fetch(&mut self) -> Result<Option<Arc<Row>>> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Read every row the descriptor selects from its SQLite database.
pub fn open_sqlite(descriptor: &SourceDescriptor) -> Result<MaterializedRows> {
    let conn = Connection::open_with_flags(
        &descriptor.database,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(Error::Source)?;
    read_rows(&conn, descriptor)
}

/// Run the descriptor's statement on an open connection and materialize the result.
pub fn read_rows(conn: &Connection, descriptor: &SourceDescriptor) -> Result<MaterializedRows> {
    let sql = descriptor.sql();
    tracing::info!("Reading source rows: {}", sql);

    let mut stmt = conn.prepare(&sql).map_err(Error::Source)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut names = BTreeSet::new();
    let duplicated: BTreeSet<&str> = columns
        .iter()
        .filter(|c| !names.insert(c.as_str()))
        .map(String::as_str)
        .collect();
    if !duplicated.is_empty() {
        return Err(Error::Configuration(format!(
            "source result set repeats column names, alias them: {}",
            duplicated.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let missing: Vec<&str> = descriptor
        .hash_columns
        .iter()
        .filter(|c| !columns.contains(*c))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(Error::Configuration(format!(
            "hash columns not in source result set: {}",
            missing.join(", ")
        )));
    }

    let spinner = create_spinner("Reading source rows");
    let mut rows = Vec::new();
    let mut result = stmt.query([]).map_err(Error::Source)?;
    while let Some(row) = result.next().map_err(Error::Source)? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(json_value(row.get_ref(i).map_err(Error::Source)?));
        }
        rows.push(Row::from_values(&columns, values, &descriptor.hash_columns)?);
    }
    spinner.finish_and_clear();

    tracing::info!("Read {} rows with {} columns", rows.len(), columns.len());
    Ok(MaterializedRows::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER, name TEXT, city TEXT, photo BLOB);
             INSERT INTO people VALUES (1, 'Ann', 'Reno', x'0aff');
             INSERT INTO people VALUES (2, 'Bob', NULL, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_projection_uses_hash_columns_in_result_order() {
        let conn = people();
        let descriptor = SourceDescriptor::new("unused", "people").with_hash_columns(["city", "name"]);
        let mut rows = read_rows(&conn, &descriptor).unwrap();

        assert_eq!(rows.len(), 2);
        let ann = rows.fetch().unwrap().unwrap();
        assert_eq!(ann.data, "Ann Reno");
        assert_eq!(ann.id, content_hash("Ann Reno"));

        // NULL renders as empty
        let bob = rows.fetch().unwrap().unwrap();
        assert_eq!(bob.data, "Bob ");
        assert!(rows.fetch().unwrap().is_none());
    }

    #[test]
    fn test_all_columns_when_no_hash_columns() {
        let conn = people();
        let mut rows = read_rows(&conn, &SourceDescriptor::new("unused", "people")).unwrap();
        let ann = rows.fetch().unwrap().unwrap();
        assert_eq!(ann.data, "1 Ann Reno 0aff");
    }

    #[test]
    fn test_snapshot_is_json_of_all_columns() {
        let conn = people();
        let descriptor = SourceDescriptor::new("unused", "SELECT name, photo FROM people");
        let mut rows = read_rows(&conn, &descriptor).unwrap();
        let ann = rows.fetch().unwrap().unwrap();
        let json: Value = serde_json::from_str(&ann.serialized).unwrap();
        assert_eq!(json["name"], "Ann");
        assert_eq!(json["photo"], "0aff");
        let bob = rows.fetch().unwrap().unwrap();
        let json: Value = serde_json::from_str(&bob.serialized).unwrap();
        assert!(json["photo"].is_null());
    }

    #[test]
    fn test_unknown_hash_column() {
        let conn = people();
        let descriptor = SourceDescriptor::new("unused", "people").with_hash_columns(["zip"]);
        assert!(matches!(read_rows(&conn, &descriptor), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_repeated_column_names_rejected() {
        let conn = people();
        let descriptor = SourceDescriptor::new(
            "unused",
            "SELECT a.name, b.name FROM people a JOIN people b ON a.id < b.id",
        );
        match read_rows(&conn, &descriptor) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("name")),
            other => panic!("expected configuration error, got {:?}", other.map(|r| r.len())),
        }

        let aliased = SourceDescriptor::new(
            "unused",
            "SELECT a.name AS left_name, b.name AS right_name FROM people a JOIN people b ON a.id < b.id",
        );
        let mut rows = read_rows(&conn, &aliased).unwrap();
        assert_eq!(rows.fetch().unwrap().unwrap().data, "Ann Bob");
    }

    #[test]
    fn test_bad_query_is_source_error() {
        let conn = people();
        let descriptor = SourceDescriptor::new("unused", "no_such_table");
        assert!(matches!(read_rows(&conn, &descriptor), Err(Error::Source(_))));
    }

    #[test]
    fn test_absolute_repositions() {
        let mut rows = MaterializedRows::from_strings("v", ["a", "b", "c"]).unwrap();
        assert!(rows.absolute(1));
        assert_eq!(rows.fetch().unwrap().unwrap().data, "b");
        assert_eq!(rows.fetch().unwrap().unwrap().data, "c");
        assert!(rows.fetch().unwrap().is_none());

        assert!(rows.absolute(0));
        assert_eq!(rows.fetch().unwrap().unwrap().data, "a");
        assert!(!rows.absolute(3));
        assert!(rows.fetch().unwrap().is_none());
    }
}
