//! Rule-based chart selection.
//!
//! `select` is a deterministic decision list over a `DataProfile`; first
//! matching rule wins and the `Table` fallback makes it total. A categorical
//! axis whose cardinality exceeds its rule's threshold simply fails that
//! rule and falls through; excessive distinct values are never rendered as
//! an axis. `build_spec` then fills the render payload from the actual rows
//! and statistics.
//!
//! Pie is checked before bar and only fires when the numeric column's name
//! signals a composition (share, percent, ratio); without that signal a
//! low-cardinality categorical breakdown is a bar chart.

use crate::analyzer::DescriptiveStats;
use crate::profile::{DataProfile, SemanticType};
use crate::table::TableData;
use serde::{Deserialize, Serialize};
use serde_json::json;

const BAR_MAX_CARDINALITY: usize = 12;
const PIE_MAX_CARDINALITY: usize = 6;

const COMPOSITION_HINTS: &[&str] = &["share", "percent", "pct", "proportion", "ratio", "fraction"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Scatter,
    Heatmap,
    Table,
}

/// Which columns feed which visual role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    pub x: Option<String>,
    pub y: Option<String>,
    pub category: Option<String>,
    pub series: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub config: ChartConfig,
    pub render_payload: serde_json::Value,
}

impl ChartSpec {
    /// The guaranteed fallback: tabular display, no chart.
    pub fn table_fallback() -> Self {
        Self {
            chart_type: ChartType::Table,
            config: ChartConfig::default(),
            render_payload: serde_json::Value::Null,
        }
    }
}

/// Chart choice before the payload is built. Pure output of `select`.
#[derive(Debug, Clone)]
pub struct ChartChoice {
    pub chart_type: ChartType,
    pub config: ChartConfig,
}

/// Pick a chart type for a profile. Total and deterministic.
pub fn select(profile: &DataProfile) -> ChartChoice {
    let numeric = profile.numeric_columns();
    let categorical = profile.categorical_columns();
    let datetime = profile.datetime_columns();

    if profile.has_time_axis && numeric.len() == 1 {
        return ChartChoice {
            chart_type: ChartType::Line,
            config: ChartConfig {
                x: datetime.first().map(|c| c.name.clone()),
                y: Some(numeric[0].name.clone()),
                ..Default::default()
            },
        };
    }

    if categorical.len() == 1 && numeric.len() == 1 {
        let cardinality = categorical[0].cardinality.unwrap_or(usize::MAX);
        if cardinality <= PIE_MAX_CARDINALITY && is_composition_name(&numeric[0].name) {
            return ChartChoice {
                chart_type: ChartType::Pie,
                config: ChartConfig {
                    category: Some(categorical[0].name.clone()),
                    y: Some(numeric[0].name.clone()),
                    ..Default::default()
                },
            };
        }
        if cardinality <= BAR_MAX_CARDINALITY {
            return ChartChoice {
                chart_type: ChartType::Bar,
                config: ChartConfig {
                    x: Some(categorical[0].name.clone()),
                    y: Some(numeric[0].name.clone()),
                    ..Default::default()
                },
            };
        }
    }

    if numeric.len() == 2 && categorical.is_empty() {
        return ChartChoice {
            chart_type: ChartType::Scatter,
            config: ChartConfig {
                x: Some(numeric[0].name.clone()),
                y: Some(numeric[1].name.clone()),
                ..Default::default()
            },
        };
    }

    if numeric.len() >= 3 {
        return ChartChoice {
            chart_type: ChartType::Heatmap,
            config: ChartConfig {
                series: numeric.iter().map(|c| c.name.clone()).collect(),
                ..Default::default()
            },
        };
    }

    ChartChoice {
        chart_type: ChartType::Table,
        config: ChartConfig::default(),
    }
}

fn is_composition_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    COMPOSITION_HINTS.iter().any(|h| lowered.contains(h))
}

/// Fill the render payload for a chosen chart from the result rows.
pub fn build_spec(choice: ChartChoice, table: &TableData, stats: &DescriptiveStats) -> ChartSpec {
    let payload = match choice.chart_type {
        ChartType::Line | ChartType::Bar | ChartType::Pie => {
            let label_col = choice
                .config
                .x
                .as_deref()
                .or(choice.config.category.as_deref());
            let value_col = choice.config.y.as_deref();
            match (
                label_col.and_then(|c| table.column_index(c)),
                value_col.and_then(|c| table.column_index(c)),
            ) {
                (Some(li), Some(vi)) => {
                    let labels: Vec<String> = table
                        .rows
                        .iter()
                        .map(|row| cell_label(&row[li]))
                        .collect();
                    let values: Vec<serde_json::Value> =
                        table.rows.iter().map(|row| row[vi].clone()).collect();
                    json!({ "labels": labels, "values": values })
                }
                _ => serde_json::Value::Null,
            }
        }
        ChartType::Scatter => {
            match (
                choice
                    .config
                    .x
                    .as_deref()
                    .and_then(|c| table.column_index(c)),
                choice
                    .config
                    .y
                    .as_deref()
                    .and_then(|c| table.column_index(c)),
            ) {
                (Some(xi), Some(yi)) => {
                    let points: Vec<serde_json::Value> = table
                        .rows
                        .iter()
                        .filter(|row| !row[xi].is_null() && !row[yi].is_null())
                        .map(|row| json!([row[xi], row[yi]]))
                        .collect();
                    json!({ "points": points })
                }
                _ => serde_json::Value::Null,
            }
        }
        ChartType::Heatmap => match &stats.correlations {
            Some(matrix) => json!({
                "columns": matrix.columns,
                "matrix": matrix.values,
            }),
            None => serde_json::Value::Null,
        },
        ChartType::Table => json!({
            "columns": table.columns,
            "rows": table.rows,
        }),
    };

    ChartSpec {
        chart_type: choice.chart_type,
        config: choice.config,
        render_payload: payload,
    }
}

fn cell_label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Short factual observations derived from the statistics, reported
/// alongside the narrative produced by language inference.
pub fn insight_lines(stats: &DescriptiveStats) -> Vec<String> {
    let mut lines = Vec::new();

    for (name, summary) in stats.numeric.iter().take(2) {
        lines.push(format!(
            "{} ranges from {:.2} to {:.2} with mean {:.2}",
            name, summary.min, summary.max, summary.mean
        ));
    }

    for (name, summary) in stats.categorical.iter().take(1) {
        if let Some((value, count)) = summary.top_values.first() {
            lines.push(format!(
                "most common {} is '{}' ({} of {} rows)",
                name, value, count, stats.row_count
            ));
        }
    }

    if let Some(matrix) = &stats.correlations {
        if let Some((a, b, r)) = matrix.strongest_pair() {
            let strength = if r.abs() >= 0.8 {
                Some("strongly")
            } else if r.abs() >= 0.5 {
                Some("moderately")
            } else {
                None
            };
            if let Some(strength) = strength {
                let direction = if r >= 0.0 { "positively" } else { "negatively" };
                lines.push(format!(
                    "{} and {} are {} {} correlated (r = {:.2})",
                    a, b, strength, direction, r
                ));
            }
        }
    }

    lines
}
