//! In-memory tabular result model.
//!
//! Every data path (relational executor, file loader) lands in `TableData`:
//! plain columns and rows of JSON scalar cells. The analyzer, profiler and
//! chart builder all consume this one shape.

use crate::error::{DatasightError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Set when the executor capped the result; never a silent drop.
    pub truncated: bool,
}

impl TableData {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate one column's cells over a row range.
    pub fn column_slice(
        &self,
        col_idx: usize,
        start: usize,
        end: usize,
    ) -> impl Iterator<Item = &serde_json::Value> {
        self.rows[start..end].iter().map(move |row| &row[col_idx])
    }

    /// Convert a Polars DataFrame into row-major JSON cells.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            let mut row = Vec::with_capacity(columns.len());
            for col_name in &columns {
                let series = df.column(col_name)?;
                row.push(series_cell_to_json(series, row_idx)?);
            }
            rows.push(row);
        }

        Ok(Self::new(columns, rows))
    }
}

/// Convert a single Polars cell to a JSON scalar.
fn series_cell_to_json(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    if series.is_null().get(row_idx).unwrap_or(false) {
        return Ok(serde_json::Value::Null);
    }

    let any_val = series
        .get(row_idx)
        .map_err(|e| DatasightError::Execution(format!("Failed to read cell: {}", e)))?;

    match series.dtype() {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            match any_val.try_extract::<i64>() {
                Ok(val) => Ok(serde_json::Value::Number(serde_json::Number::from(val))),
                Err(_) => Ok(serde_json::Value::Null),
            }
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            match any_val.try_extract::<u64>() {
                Ok(val) => Ok(serde_json::Value::Number(serde_json::Number::from(val))),
                Err(_) => Ok(serde_json::Value::Null),
            }
        }
        DataType::Float32 | DataType::Float64 => match any_val.try_extract::<f64>() {
            Ok(val) => Ok(serde_json::Number::from_f64(val)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)),
            Err(_) => Ok(serde_json::Value::Null),
        },
        DataType::Boolean => {
            if let AnyValue::Boolean(b) = any_val {
                Ok(serde_json::Value::Bool(b))
            } else {
                Ok(serde_json::Value::Null)
            }
        }
        DataType::String => match any_val.get_str() {
            Some(s) => Ok(serde_json::Value::String(s.to_string())),
            None => Ok(serde_json::Value::Null),
        },
        DataType::Date | DataType::Datetime(_, _) => {
            Ok(serde_json::Value::String(format!("{}", any_val)))
        }
        _ => Ok(serde_json::Value::String(format!("{}", any_val))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataframe_round_trip() {
        let df = df![
            "region" => ["north", "south"],
            "revenue" => [1200.5, 940.0],
            "orders" => [12i64, 9],
        ]
        .unwrap();

        let table = TableData::from_dataframe(&df).unwrap();
        assert_eq!(table.columns, vec!["region", "revenue", "orders"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.rows[0][0], serde_json::json!("north"));
        assert_eq!(table.rows[1][1], serde_json::json!(940.0));
        assert_eq!(table.rows[0][2], serde_json::json!(12));
        assert!(!table.truncated);
    }

    #[test]
    fn nulls_map_to_json_null() {
        let df = df![
            "amount" => [Some(1.0), None, Some(3.5)],
        ]
        .unwrap();

        let table = TableData::from_dataframe(&df).unwrap();
        assert_eq!(table.rows[1][0], serde_json::Value::Null);
    }
}
