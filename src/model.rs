//! Shared data model: column sets, rows and batches.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::convert::Value;

/// Ordered list of column names.
///
/// Order defines SELECT projection, INSERT column order and file column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSet(Vec<String>);

impl ColumnSet {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// Split a delimiter-joined selection (e.g. `"id,name"`), trimming each
    /// name and dropping empty pieces.
    pub fn parse(joined: &str, separator: char) -> Self {
        Self(
            joined
                .split(separator)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn into_names(self) -> Vec<String> {
        self.0
    }

    /// Position of `name`, compared case-sensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c == name)
    }

    /// First name that appears more than once, if any.
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.iter().find(|name| !seen.insert(*name))
    }
}

impl From<Vec<&str>> for ColumnSet {
    fn from(names: Vec<&str>) -> Self {
        Self(names.into_iter().map(str::to_string).collect())
    }
}

/// A single row, positionally aligned with the job's `ColumnSet`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cells: Vec<Value>,
}

impl Row {
    pub fn new(cells: Vec<Value>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Textual form of every cell, in order.
    pub fn to_text_fields(&self) -> Vec<String> {
        self.cells.iter().map(Value::to_text).collect()
    }
}

/// Rows flushed to a target in one operation.
pub type Batch = Vec<Row>;
