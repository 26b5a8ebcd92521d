//! Relational schema description used by the classifier, the safety
//! validator, and the language-inference prompt.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

/// Snapshot of a relational source's schema, with a version token that
/// changes whenever the underlying schema changes. The token participates
/// in request fingerprints, so cached results for an old schema are never
/// served against a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub version: String,
    pub tables: Vec<TableSchema>,
}

impl SchemaDescription {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        let lowered = name.to_lowercase();
        self.tables.iter().find(|t| t.name.to_lowercase() == lowered)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        let lowered = column.to_lowercase();
        self.table(table)
            .map(|t| t.columns.iter().any(|c| c.to_lowercase() == lowered))
            .unwrap_or(false)
    }

    /// All column names across all tables, lowercased. Used for
    /// classification overlap signals and unqualified-column resolution.
    pub fn all_columns(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| c.to_lowercase()))
            .collect()
    }

    /// Render the schema for a language-inference prompt.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&format!("Table: {}\n", table.name));
            for column in &table.columns {
                out.push_str(&format!("  - {}\n", column));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_schema() -> SchemaDescription {
        SchemaDescription {
            version: "v1".into(),
            tables: vec![TableSchema {
                name: "sales".into(),
                columns: vec!["date".into(), "amount".into(), "region".into()],
            }],
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let schema = sales_schema();
        assert!(schema.has_table("SALES"));
        assert!(schema.has_column("sales", "AMOUNT"));
        assert!(!schema.has_column("sales", "missing"));
    }
}
