//! Query routing.
//!
//! Decides whether a question is answered against the relational source,
//! the uploaded file, or both. This is a fixed priority-ordered rule list,
//! not a model: identical inputs always produce identical decisions.

use crate::error::{DatasightError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which execution path handles the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    Relational,
    Tabular,
    Mixed,
}

/// What the classifier saw. Carried for observability, not correctness.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationSignals {
    pub file_attached: bool,
    pub connection_attached: bool,
    pub join_phrases: Vec<String>,
    pub overlapping_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationDecision {
    pub route: Route,
    pub signals: ClassificationSignals,
}

/// Context the classifier inspects: column names of whatever is attached.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput {
    pub file_columns: Option<Vec<String>>,
    pub schema_columns: Option<Vec<String>>,
}

const JOIN_PHRASES: &[&str] = &["join", "combine", "merge", "against", "compare", "match"];

/// Route a question. Priority order:
/// 1. file + connection + cross-referencing language -> Mixed
/// 2. file only -> Tabular
/// 3. connection only -> Relational
/// 4. neither -> MissingContext
///
/// Both attached without cross-referencing language routes to the file
/// (the more specific context the user supplied).
pub fn classify(question: &str, input: &ClassifyInput) -> Result<ClassificationDecision> {
    let file_attached = input.file_columns.is_some();
    let connection_attached = input.schema_columns.is_some();

    if !file_attached && !connection_attached {
        return Err(DatasightError::MissingContext(
            "no file or relational connection attached".to_string(),
        ));
    }

    let lowered = question.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();

    let join_phrases: Vec<String> = JOIN_PHRASES
        .iter()
        .filter(|p| words.contains(&p.to_lowercase().as_str()))
        .map(|p| p.to_string())
        .collect();

    let overlapping_columns = match (&input.file_columns, &input.schema_columns) {
        (Some(file_cols), Some(schema_cols)) => {
            let schema_lowered: Vec<String> =
                schema_cols.iter().map(|c| c.to_lowercase()).collect();
            file_cols
                .iter()
                .map(|c| c.to_lowercase())
                .filter(|c| schema_lowered.contains(c))
                .collect()
        }
        _ => Vec::new(),
    };

    let signals = ClassificationSignals {
        file_attached,
        connection_attached,
        join_phrases,
        overlapping_columns,
    };

    let route = if file_attached
        && connection_attached
        && (!signals.join_phrases.is_empty() || !signals.overlapping_columns.is_empty())
    {
        Route::Mixed
    } else if file_attached {
        Route::Tabular
    } else {
        Route::Relational
    };

    debug!(?route, ?signals, "classified question");
    Ok(ClassificationDecision { route, signals })
}
