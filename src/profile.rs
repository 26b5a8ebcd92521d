//! Column typing and table profiling.
//!
//! The chart selector works off a `DataProfile`, not the raw table: how many
//! rows, what each column is semantically (numeric, categorical, datetime,
//! free text), and whether a usable time axis exists. Typing is heuristic
//! and sample-based; the profiled table is the capped result table, so exact
//! distinct counts are affordable here.

use crate::table::TableData;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;

const TYPE_SAMPLE: usize = 200;
const CATEGORICAL_MAX_DISTINCT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SemanticType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Exact distinct count for non-numeric columns, absent for numeric.
    pub cardinality: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataProfile {
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub has_time_axis: bool,
}

impl DataProfile {
    pub fn numeric_columns(&self) -> Vec<&ColumnProfile> {
        self.columns
            .iter()
            .filter(|c| c.semantic_type == SemanticType::Numeric)
            .collect()
    }

    pub fn categorical_columns(&self) -> Vec<&ColumnProfile> {
        self.columns
            .iter()
            .filter(|c| c.semantic_type == SemanticType::Categorical)
            .collect()
    }

    pub fn datetime_columns(&self) -> Vec<&ColumnProfile> {
        self.columns
            .iter()
            .filter(|c| c.semantic_type == SemanticType::Datetime)
            .collect()
    }
}

pub fn profile_table(table: &TableData) -> DataProfile {
    let mut columns = Vec::with_capacity(table.width());
    for (idx, name) in table.columns.iter().enumerate() {
        let semantic_type = column_semantic_type(table, idx, name);
        let cardinality = match semantic_type {
            SemanticType::Numeric => None,
            _ => Some(distinct_count(table, idx)),
        };
        columns.push(ColumnProfile {
            name: name.clone(),
            semantic_type,
            cardinality,
        });
    }
    let has_time_axis = columns
        .iter()
        .any(|c| c.semantic_type == SemanticType::Datetime);
    DataProfile {
        row_count: table.height(),
        columns,
        has_time_axis,
    }
}

/// Type a column from its first `TYPE_SAMPLE` non-null cells.
pub fn column_semantic_type(table: &TableData, col_idx: usize, name: &str) -> SemanticType {
    let mut numeric = 0usize;
    let mut boolean = 0usize;
    let mut datetime = 0usize;
    let mut strings = 0usize;
    let mut sampled = 0usize;

    for row in &table.rows {
        if sampled >= TYPE_SAMPLE {
            break;
        }
        match &row[col_idx] {
            serde_json::Value::Null => continue,
            serde_json::Value::Number(_) => numeric += 1,
            serde_json::Value::Bool(_) => boolean += 1,
            serde_json::Value::String(s) => {
                strings += 1;
                if parses_as_datetime(s) {
                    datetime += 1;
                }
            }
            _ => strings += 1,
        }
        sampled += 1;
    }

    if sampled == 0 {
        return SemanticType::Text;
    }
    if numeric * 10 >= sampled * 9 {
        return SemanticType::Numeric;
    }
    if boolean * 10 >= sampled * 9 {
        return SemanticType::Categorical;
    }
    if strings > 0 {
        let name_hint = has_temporal_name(name);
        if datetime * 10 >= strings * 9 || (name_hint && datetime * 2 >= strings) {
            return SemanticType::Datetime;
        }
    }

    let non_null = table
        .rows
        .iter()
        .filter(|row| !row[col_idx].is_null())
        .count();
    let distinct = distinct_count(table, col_idx);
    if distinct <= CATEGORICAL_MAX_DISTINCT || distinct * 2 <= non_null {
        SemanticType::Categorical
    } else {
        SemanticType::Text
    }
}

fn has_temporal_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    ["date", "time", "timestamp", "year", "month", "day"]
        .iter()
        .any(|hint| lowered.contains(hint))
}

fn parses_as_datetime(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(s, "%Y/%m/%d").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
    {
        return true;
    }
    // Year-month buckets ("2024-03") are common aggregation keys.
    s.len() == 7 && NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok()
}

fn distinct_count(table: &TableData, col_idx: usize) -> usize {
    let mut seen = HashSet::new();
    for row in &table.rows {
        match &row[col_idx] {
            serde_json::Value::Null => {}
            other => {
                seen.insert(other.to_string());
            }
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> TableData {
        TableData::new(columns.iter().map(|s| s.to_string()).collect(), rows)
    }

    #[test]
    fn numeric_and_categorical_detection() {
        let t = table(
            &["region", "revenue"],
            vec![
                vec![json!("north"), json!(1200.5)],
                vec![json!("south"), json!(940.0)],
                vec![json!("east"), json!(1100.0)],
            ],
        );
        let profile = profile_table(&t);
        assert_eq!(profile.columns[0].semantic_type, SemanticType::Categorical);
        assert_eq!(profile.columns[0].cardinality, Some(3));
        assert_eq!(profile.columns[1].semantic_type, SemanticType::Numeric);
        assert!(!profile.has_time_axis);
    }

    #[test]
    fn date_strings_give_a_time_axis() {
        let t = table(
            &["date", "amount"],
            vec![
                vec![json!("2024-01-01"), json!(10)],
                vec![json!("2024-02-01"), json!(20)],
                vec![json!("2024-03-01"), json!(15)],
            ],
        );
        let profile = profile_table(&t);
        assert_eq!(profile.columns[0].semantic_type, SemanticType::Datetime);
        assert!(profile.has_time_axis);
    }

    #[test]
    fn year_month_buckets_count_as_datetime() {
        let t = table(
            &["month", "total"],
            vec![
                vec![json!("2024-01"), json!(5)],
                vec![json!("2024-02"), json!(7)],
            ],
        );
        let profile = profile_table(&t);
        assert_eq!(profile.columns[0].semantic_type, SemanticType::Datetime);
    }

    #[test]
    fn high_cardinality_strings_are_text() {
        let rows: Vec<Vec<serde_json::Value>> = (0..200)
            .map(|i| vec![json!(format!("free form comment number {}", i))])
            .collect();
        let t = table(&["comment"], rows);
        let profile = profile_table(&t);
        assert_eq!(profile.columns[0].semantic_type, SemanticType::Text);
    }

    #[test]
    fn nulls_are_ignored_when_typing() {
        let t = table(
            &["amount"],
            vec![
                vec![serde_json::Value::Null],
                vec![json!(3.5)],
                vec![json!(4.0)],
            ],
        );
        let profile = profile_table(&t);
        assert_eq!(profile.columns[0].semantic_type, SemanticType::Numeric);
    }
}
