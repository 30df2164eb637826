//! Flat tabular input: rows and tables.
//!
//! A `Table` is the denormalized result of a multi-table join: a declared
//! column list plus ordered rows, each mapping column name to a scalar
//! [`Value`]. Column names must be globally unique across the entity types
//! present in one input; the declared column list drives schema validation.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::value::Value;

const NULL: Value = Value::Null;

/// One record of the flat input.
///
/// A column that was never set reads as [`Value::Null`], matching the
/// sparse-row shape of outer joins.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Set a column value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Get a column value; missing columns read as null.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Check whether a column is null or absent.
    pub fn is_null(&self, column: &str) -> bool {
        self.get(column).is_null()
    }
}

/// The flat input: declared columns plus ordered rows.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with a declared column list.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from a JSON array of objects.
    ///
    /// The column list is the union of all object keys, in first-seen order.
    /// Scalar values convert via [`Value::from_json`]; nested arrays/objects
    /// are rejected.
    ///
    /// # Errors
    /// Returns an error if the value is not an array of objects or if any
    /// field holds a non-scalar value.
    pub fn from_json_records(records: &serde_json::Value) -> Result<Self, String> {
        let array = records
            .as_array()
            .ok_or_else(|| "Expected a JSON array of record objects".to_string())?;

        let mut columns: IndexSet<String> = IndexSet::new();
        let mut rows = Vec::with_capacity(array.len());

        for (i, record) in array.iter().enumerate() {
            let object = record
                .as_object()
                .ok_or_else(|| format!("Record {} is not a JSON object", i))?;

            let mut row = Row::new();
            for (column, value) in object {
                if value.is_array() || value.is_object() {
                    return Err(format!(
                        "Record {} column '{}' holds a non-scalar value",
                        i, column
                    ));
                }
                columns.insert(column.clone());
                row.set(column.clone(), Value::from_json(value));
            }
            rows.push(row);
        }

        Ok(Self {
            columns: columns.into_iter().collect(),
            rows,
        })
    }

    /// Append a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Builder-style row append.
    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    /// Declared column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in input order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
