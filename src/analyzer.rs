//! Descriptive statistics over in-memory tables.
//!
//! Small tables are analyzed in one pass. Tables at or above the chunk
//! threshold are scanned in fixed-size row chunks with per-chunk accumulators
//! merged into running totals, so peak memory is bounded by the chunk size,
//! not the table size. Means and variances use Welford's update with Chan's
//! parallel merge; distinct counts degrade from an exact set to a register
//! sketch once a column's cardinality stops being worth tracking exactly;
//! quartiles come from a fixed-capacity reservoir sample.

use crate::error::{DatasightError, Result};
use crate::profile::{column_semantic_type, SemanticType};
use crate::table::TableData;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::debug;

const RESERVOIR_CAPACITY: usize = 10_000;
const EXACT_DISTINCT_LIMIT: usize = 4_096;
const TOP_VALUE_TRACK_LIMIT: usize = 1_000;
const TOP_VALUES_REPORTED: usize = 10;
const SKETCH_PRECISION: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub cardinality: u64,
    pub top_values: Vec<(String, u64)>,
}

/// Pearson correlations for numeric columns. Present only when at least two
/// numeric columns exist; never zero-filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Strongest off-diagonal pair by absolute value.
    pub fn strongest_pair(&self) -> Option<(&str, &str, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..self.columns.len() {
            for j in (i + 1)..self.columns.len() {
                let r = self.values[i][j];
                if r.is_finite()
                    && best.map(|(_, _, b)| r.abs() > b.abs()).unwrap_or(true)
                {
                    best = Some((i, j, r));
                }
            }
        }
        best.map(|(i, j, r)| (self.columns[i].as_str(), self.columns[j].as_str(), r))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub row_count: usize,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub categorical: BTreeMap<String, CategoricalSummary>,
    pub correlations: Option<CorrelationMatrix>,
}

/// Welford running mean/variance with min/max.
#[derive(Debug, Clone)]
struct NumericAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl NumericAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
    }

    /// Chan's pairwise combination of two partial aggregates.
    fn merge(&mut self, other: &NumericAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let n = n1 + n2;
        let delta = other.mean - self.mean;
        self.mean += delta * n2 / n;
        self.m2 += other.m2 + delta * delta * n1 * n2 / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Fixed-capacity uniform sample for quantile estimation. Tables smaller
/// than the capacity are captured whole, so their quartiles are exact.
struct Reservoir {
    samples: Vec<f64>,
    seen: u64,
    rng: StdRng,
}

impl Reservoir {
    fn new(seed: u64) -> Self {
        Self {
            samples: Vec::new(),
            seen: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn push(&mut self, x: f64) {
        self.seen += 1;
        if self.samples.len() < RESERVOIR_CAPACITY {
            self.samples.push(x);
        } else {
            let idx = self.rng.gen_range(0..self.seen);
            if (idx as usize) < RESERVOIR_CAPACITY {
                self.samples[idx as usize] = x;
            }
        }
    }

    fn quartiles(&mut self) -> (f64, f64, f64) {
        if self.samples.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        self.samples
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        (
            interpolated_quantile(&self.samples, 0.25),
            interpolated_quantile(&self.samples, 0.5),
            interpolated_quantile(&self.samples, 0.75),
        )
    }
}

fn interpolated_quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if lo + 1 < n {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    } else {
        sorted[lo]
    }
}

/// HyperLogLog-style register sketch for distinct counting once exact
/// tracking is abandoned.
#[derive(Debug, Clone)]
struct CardinalitySketch {
    registers: Vec<u8>,
}

impl CardinalitySketch {
    fn new() -> Self {
        Self {
            registers: vec![0u8; 1 << SKETCH_PRECISION],
        }
    }

    fn insert(&mut self, value: &str) {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h >> (64 - SKETCH_PRECISION)) as usize;
        let rest = h << SKETCH_PRECISION;
        let rank = (rest.leading_zeros() + 1).min(64 - SKETCH_PRECISION + 1) as u8;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    fn merge(&mut self, other: &CardinalitySketch) {
        for (a, b) in self.registers.iter_mut().zip(&other.registers) {
            if *b > *a {
                *a = *b;
            }
        }
    }

    fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let mut estimate = alpha * m * m / sum;
        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if estimate <= 2.5 * m && zeros > 0 {
            estimate = m * (m / zeros as f64).ln();
        }
        estimate.round() as u64
    }
}

/// Distinct values and top-value counts for one categorical column.
/// Exact up to `EXACT_DISTINCT_LIMIT` distinct values, sketch-only beyond.
struct CategoricalAccumulator {
    exact: Option<HashSet<String>>,
    sketch: CardinalitySketch,
    counts: HashMap<String, u64>,
}

impl CategoricalAccumulator {
    fn new() -> Self {
        Self {
            exact: Some(HashSet::new()),
            sketch: CardinalitySketch::new(),
            counts: HashMap::new(),
        }
    }

    fn push(&mut self, value: &str) {
        self.sketch.insert(value);
        if let Some(exact) = &mut self.exact {
            exact.insert(value.to_string());
            if exact.len() > EXACT_DISTINCT_LIMIT {
                self.exact = None;
            }
        }
        if self.counts.len() < TOP_VALUE_TRACK_LIMIT || self.counts.contains_key(value) {
            *self.counts.entry(value.to_string()).or_insert(0) += 1;
        }
    }

    fn merge(&mut self, other: CategoricalAccumulator) {
        self.sketch.merge(&other.sketch);
        match (&mut self.exact, other.exact) {
            (Some(mine), Some(theirs)) => {
                mine.extend(theirs);
                if mine.len() > EXACT_DISTINCT_LIMIT {
                    self.exact = None;
                }
            }
            _ => self.exact = None,
        }
        for (value, count) in other.counts {
            if self.counts.len() < TOP_VALUE_TRACK_LIMIT || self.counts.contains_key(&value) {
                *self.counts.entry(value).or_insert(0) += count;
            }
        }
    }

    fn summary(self) -> CategoricalSummary {
        let cardinality = match &self.exact {
            Some(exact) => exact.len() as u64,
            None => self.sketch.estimate(),
        };
        let mut ranked: Vec<(String, u64)> = self.counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(TOP_VALUES_REPORTED);
        CategoricalSummary {
            cardinality,
            top_values: ranked,
        }
    }
}

/// Bivariate sufficient statistics for one column pair. Rows where either
/// side is missing are skipped (pairwise deletion).
#[derive(Debug, Clone)]
struct CoMoment {
    count: u64,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    comoment: f64,
}

impl CoMoment {
    fn new() -> Self {
        Self {
            count: 0,
            mean_x: 0.0,
            mean_y: 0.0,
            m2_x: 0.0,
            m2_y: 0.0,
            comoment: 0.0,
        }
    }

    fn push(&mut self, x: f64, y: f64) {
        self.count += 1;
        let n = self.count as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / n;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.comoment += dx * (y - self.mean_y);
    }

    fn merge(&mut self, other: &CoMoment) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let n = n1 + n2;
        let dx = other.mean_x - self.mean_x;
        let dy = other.mean_y - self.mean_y;
        self.m2_x += other.m2_x + dx * dx * n1 * n2 / n;
        self.m2_y += other.m2_y + dy * dy * n1 * n2 / n;
        self.comoment += other.comoment + dx * dy * n1 * n2 / n;
        self.mean_x += dx * n2 / n;
        self.mean_y += dy * n2 / n;
        self.count += other.count;
    }

    fn correlation(&self) -> f64 {
        if self.count < 2 || self.m2_x <= 0.0 || self.m2_y <= 0.0 {
            return f64::NAN;
        }
        self.comoment / (self.m2_x * self.m2_y).sqrt()
    }
}

pub struct TabularAnalyzer {
    chunk_threshold: usize,
    chunk_size: usize,
}

impl TabularAnalyzer {
    pub fn new(chunk_threshold: usize, chunk_size: usize) -> Self {
        Self {
            chunk_threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Compute descriptive statistics. Empty tables are an error, not an
    /// empty result.
    pub fn analyze(&self, table: &TableData) -> Result<DescriptiveStats> {
        if table.is_empty() {
            return Err(DatasightError::Analysis(
                "cannot analyze an empty table".to_string(),
            ));
        }

        let mut numeric_cols = Vec::new();
        let mut categorical_cols = Vec::new();
        for (idx, name) in table.columns.iter().enumerate() {
            match column_semantic_type(table, idx, name) {
                SemanticType::Numeric => numeric_cols.push(idx),
                SemanticType::Categorical => categorical_cols.push(idx),
                SemanticType::Datetime | SemanticType::Text => {}
            }
        }

        let chunked = table.height() >= self.chunk_threshold;
        let chunk_size = if chunked { self.chunk_size } else { table.height() };
        debug!(
            rows = table.height(),
            chunked,
            numeric = numeric_cols.len(),
            categorical = categorical_cols.len(),
            "analyzing table"
        );

        let mut numeric_accs: Vec<NumericAccumulator> =
            numeric_cols.iter().map(|_| NumericAccumulator::new()).collect();
        let mut reservoirs: Vec<Reservoir> = numeric_cols
            .iter()
            .enumerate()
            .map(|(i, _)| Reservoir::new(0x5eed + i as u64))
            .collect();
        let mut categorical_accs: Vec<CategoricalAccumulator> = categorical_cols
            .iter()
            .map(|_| CategoricalAccumulator::new())
            .collect();
        let pair_count = numeric_cols.len() * numeric_cols.len().saturating_sub(1) / 2;
        let mut comoments: Vec<CoMoment> = (0..pair_count).map(|_| CoMoment::new()).collect();

        let mut start = 0usize;
        while start < table.height() {
            let end = (start + chunk_size).min(table.height());

            let mut chunk_numeric: Vec<NumericAccumulator> =
                numeric_cols.iter().map(|_| NumericAccumulator::new()).collect();
            let mut chunk_categorical: Vec<CategoricalAccumulator> = categorical_cols
                .iter()
                .map(|_| CategoricalAccumulator::new())
                .collect();
            let mut chunk_comoments: Vec<CoMoment> =
                (0..pair_count).map(|_| CoMoment::new()).collect();

            for row in &table.rows[start..end] {
                let values: Vec<Option<f64>> = numeric_cols
                    .iter()
                    .map(|&idx| row[idx].as_f64())
                    .collect();
                for (slot, value) in values.iter().enumerate() {
                    if let Some(x) = value {
                        chunk_numeric[slot].push(*x);
                        reservoirs[slot].push(*x);
                    }
                }
                let mut pair = 0usize;
                for i in 0..values.len() {
                    for j in (i + 1)..values.len() {
                        if let (Some(x), Some(y)) = (values[i], values[j]) {
                            chunk_comoments[pair].push(x, y);
                        }
                        pair += 1;
                    }
                }
                for (slot, &idx) in categorical_cols.iter().enumerate() {
                    if let Some(text) = cell_as_category(&row[idx]) {
                        chunk_categorical[slot].push(&text);
                    }
                }
            }

            for (acc, chunk) in numeric_accs.iter_mut().zip(&chunk_numeric) {
                acc.merge(chunk);
            }
            for (acc, chunk) in comoments.iter_mut().zip(&chunk_comoments) {
                acc.merge(chunk);
            }
            for (acc, chunk) in categorical_accs.iter_mut().zip(chunk_categorical) {
                acc.merge(chunk);
            }

            start = end;
        }

        let mut numeric = BTreeMap::new();
        for (slot, &idx) in numeric_cols.iter().enumerate() {
            let acc = &numeric_accs[slot];
            if acc.count == 0 {
                continue;
            }
            let (q1, median, q3) = reservoirs[slot].quartiles();
            numeric.insert(
                table.columns[idx].clone(),
                NumericSummary {
                    count: acc.count,
                    mean: acc.mean,
                    std_dev: acc.std_dev(),
                    min: acc.min,
                    max: acc.max,
                    q1,
                    median,
                    q3,
                },
            );
        }

        let mut categorical = BTreeMap::new();
        for (&idx, acc) in categorical_cols.iter().zip(categorical_accs) {
            categorical.insert(table.columns[idx].clone(), acc.summary());
        }

        let correlations = if numeric_cols.len() >= 2 {
            let names: Vec<String> = numeric_cols
                .iter()
                .map(|&idx| table.columns[idx].clone())
                .collect();
            let k = names.len();
            let mut values = vec![vec![f64::NAN; k]; k];
            for (i, row) in values.iter_mut().enumerate() {
                row[i] = 1.0;
            }
            let mut pair = 0usize;
            for i in 0..k {
                for j in (i + 1)..k {
                    let r = comoments[pair].correlation();
                    values[i][j] = r;
                    values[j][i] = r;
                    pair += 1;
                }
            }
            Some(CorrelationMatrix {
                columns: names,
                values,
            })
        } else {
            None
        };

        Ok(DescriptiveStats {
            row_count: table.height(),
            numeric,
            categorical,
            correlations,
        })
    }
}

fn cell_as_category(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyzer() -> TabularAnalyzer {
        TabularAnalyzer::new(10_000, 10_000)
    }

    fn two_column_table(rows: usize) -> TableData {
        let data: Vec<Vec<serde_json::Value>> = (0..rows)
            .map(|i| {
                let x = i as f64;
                vec![json!(x), json!(2.0 * x + 1.0)]
            })
            .collect();
        TableData::new(vec!["x".into(), "y".into()], data)
    }

    #[test]
    fn empty_table_is_an_error() {
        let table = TableData::new(vec!["a".into()], vec![]);
        assert!(matches!(
            analyzer().analyze(&table),
            Err(DatasightError::Analysis(_))
        ));
    }

    #[test]
    fn small_table_statistics_are_exact() {
        let table = TableData::new(
            vec!["amount".into()],
            vec![
                vec![json!(2.0)],
                vec![json!(4.0)],
                vec![json!(4.0)],
                vec![json!(4.0)],
                vec![json!(5.0)],
                vec![json!(5.0)],
                vec![json!(7.0)],
                vec![json!(9.0)],
            ],
        );
        let stats = analyzer().analyze(&table).unwrap();
        let summary = &stats.numeric["amount"];
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.std_dev - 2.138089935).abs() < 1e-6);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
        assert!((summary.median - 4.5).abs() < 1e-12);
    }

    #[test]
    fn categorical_cardinality_and_top_values() {
        let rows: Vec<Vec<serde_json::Value>> = ["north", "north", "north", "south", "south", "east"]
            .iter()
            .map(|r| vec![json!(*r)])
            .collect();
        let table = TableData::new(vec!["region".into()], rows);
        let stats = analyzer().analyze(&table).unwrap();
        let summary = &stats.categorical["region"];
        assert_eq!(summary.cardinality, 3);
        assert_eq!(summary.top_values[0], ("north".to_string(), 3));
        assert_eq!(summary.top_values[1], ("south".to_string(), 2));
    }

    #[test]
    fn correlations_require_two_numeric_columns() {
        let one = TableData::new(
            vec!["amount".into()],
            vec![vec![json!(1.0)], vec![json!(2.0)]],
        );
        let stats = analyzer().analyze(&one).unwrap();
        assert!(stats.correlations.is_none());

        let stats = analyzer().analyze(&two_column_table(100)).unwrap();
        let corr = stats.correlations.expect("matrix present");
        // y is an exact linear function of x.
        assert!((corr.values[0][1] - 1.0).abs() < 1e-9);
        assert_eq!(corr.values[0][0], 1.0);
    }

    #[test]
    fn chunked_path_matches_direct_computation() {
        // Large offset makes naive sum-of-squares cancel catastrophically;
        // Welford with Chan merges must not.
        let rows: Vec<Vec<serde_json::Value>> = (0..50_000)
            .map(|i| {
                let x = 1.0e8 + (i % 1_000) as f64 * 0.001;
                let y = 5.0e7 + ((i * 7) % 1_000) as f64 * 0.002;
                vec![json!(x), json!(y)]
            })
            .collect();
        let table = TableData::new(vec!["x".into(), "y".into()], rows);

        let direct = TabularAnalyzer::new(usize::MAX, 1).analyze(&table).unwrap();
        let chunked = TabularAnalyzer::new(1, 1_000).analyze(&table).unwrap();

        for col in ["x", "y"] {
            let d = &direct.numeric[col];
            let c = &chunked.numeric[col];
            assert_eq!(d.count, c.count);
            assert!(((d.mean - c.mean) / d.mean).abs() < 1e-9, "mean drift on {}", col);
            assert!((d.std_dev - c.std_dev).abs() / d.std_dev.max(1e-12) < 1e-9);
            assert_eq!(d.min, c.min);
            assert_eq!(d.max, c.max);
        }
        let dr = direct.correlations.unwrap().values[0][1];
        let cr = chunked.correlations.unwrap().values[0][1];
        assert!((dr - cr).abs() < 1e-9);
    }

    // Full-scale variant of the stability check. Slow; run explicitly with
    // `--ignored`.
    #[test]
    #[ignore]
    fn chunked_path_is_stable_at_a_million_rows() {
        let rows: Vec<Vec<serde_json::Value>> = (0..1_000_000)
            .map(|i| {
                let x = 1.0e8 + (i % 10_000) as f64 * 0.0001;
                let y = 5.0e7 + ((i * 13) % 10_000) as f64 * 0.0002;
                vec![json!(x), json!(y)]
            })
            .collect();
        let table = TableData::new(vec!["x".into(), "y".into()], rows);

        let direct = TabularAnalyzer::new(usize::MAX, 1).analyze(&table).unwrap();
        let chunked = TabularAnalyzer::new(1, 10_000).analyze(&table).unwrap();

        for col in ["x", "y"] {
            let d = &direct.numeric[col];
            let c = &chunked.numeric[col];
            assert_eq!(d.count, c.count);
            assert!(((d.mean - c.mean) / d.mean).abs() < 1e-9, "mean drift on {}", col);
            assert!((d.std_dev - c.std_dev).abs() / d.std_dev.max(1e-12) < 1e-9);
            assert_eq!(d.min, c.min);
            assert_eq!(d.max, c.max);
        }
        let dr = direct.correlations.unwrap().values[0][1];
        let cr = chunked.correlations.unwrap().values[0][1];
        assert!((dr - cr).abs() < 1e-9);
    }

    #[test]
    fn nulls_are_skipped_in_numeric_columns() {
        let table = TableData::new(
            vec!["amount".into()],
            vec![
                vec![json!(1.0)],
                vec![serde_json::Value::Null],
                vec![json!(3.0)],
            ],
        );
        let stats = analyzer().analyze(&table).unwrap();
        let summary = &stats.numeric["amount"];
        assert_eq!(summary.count, 2);
        assert!((summary.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn sketch_estimate_is_close_for_high_cardinality() {
        let mut acc = CategoricalAccumulator::new();
        for i in 0..100_000 {
            acc.push(&format!("user-{}", i));
        }
        let summary = acc.summary();
        let estimate = summary.cardinality as f64;
        assert!((estimate - 100_000.0).abs() / 100_000.0 < 0.1);
    }
}
