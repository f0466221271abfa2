// Metric records
// Per-fold metric maps holding scalars and small tables

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Row has {found} cells, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    #[error("Tables have different columns: {left:?} vs {right:?}")]
    ColumnMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("Missing column '{0}'")]
    MissingColumn(String),
}

/// A single table value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Int(value as i64)
    }
}

/// Column-named rows of cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Table {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Stack tables with identical columns, keeping every row in order
    pub fn concat(tables: &[&Table]) -> Result<Table, TableError> {
        let Some(first) = tables.first() else {
            return Ok(Table::new::<&str>(&[]));
        };

        let mut combined = Table::new(&first.columns);
        for table in tables {
            if table.columns != first.columns {
                return Err(TableError::ColumnMismatch {
                    left: first.columns.clone(),
                    right: table.columns.clone(),
                });
            }
            combined.rows.extend(table.rows.iter().cloned());
        }
        Ok(combined)
    }

    /// Inner join on key columns
    /// Output has this table's columns followed by the other's non-key columns
    pub fn inner_join(&self, other: &Table, keys: &[&str]) -> Result<Table, TableError> {
        let left_keys = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = keys
            .iter()
            .map(|k| other.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let right_extra: Vec<usize> = (0..other.columns.len())
            .filter(|idx| !right_keys.contains(idx))
            .collect();

        let mut columns = self.columns.clone();
        columns.extend(right_extra.iter().map(|&idx| other.columns[idx].clone()));
        let mut joined = Table {
            columns,
            rows: Vec::new(),
        };

        let mut lookup: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for (idx, row) in other.rows.iter().enumerate() {
            let key = right_keys.iter().map(|&k| row[k].to_string()).collect();
            lookup.entry(key).or_default().push(idx);
        }

        for row in &self.rows {
            let key: Vec<String> = left_keys.iter().map(|&k| row[k].to_string()).collect();
            if let Some(matches) = lookup.get(&key) {
                for &idx in matches {
                    let mut merged = row.clone();
                    merged.extend(right_extra.iter().map(|&c| other.rows[idx][c].clone()));
                    joined.rows.push(merged);
                }
            }
        }

        Ok(joined)
    }
}

/// A metric is either a number or a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Table(Table),
}

/// Metrics collected for one fold
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    metrics: BTreeMap<String, MetricValue>,
}

impl FoldResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), MetricValue::Scalar(value));
    }

    pub fn insert_count(&mut self, name: impl Into<String>, value: usize) {
        self.insert_scalar(name, value as f64);
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: Table) {
        self.metrics.insert(name.into(), MetricValue::Table(table));
    }

    /// Merge another result in; its values win on key clashes
    pub fn extend(&mut self, other: FoldResult) {
        self.metrics.extend(other.metrics);
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricValue::Scalar(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        match self.metrics.get(name) {
            Some(MetricValue::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Scalar metrics only; tables are not part of the JSON record
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .filter_map(|(name, value)| match value {
                MetricValue::Scalar(v) => Some((name.clone(), *v)),
                MetricValue::Table(_) => None,
            })
            .collect()
    }
}
