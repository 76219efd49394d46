//! Data-quality insights over a stored table.
//!
//! Three independent passes, all read-only:
//! - per-column statistics with a suggested cleaning action,
//! - normalized mutual information between pairs of categorical columns,
//! - anomaly flags for numeric outliers and rare categories.
//!
//! A table with no rows yields three empty lists rather than an error.

use crate::error::Result;
use crate::store::TableStore;
use crate::table::{ColumnType, Table, Value, ValueKey, serialize_plain, serialize_plain_opt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outlier rule for numeric columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    /// Modified z-score from the median and median absolute deviation
    #[default]
    ModifiedZScore,

    /// More than `k` sample standard deviations from the mean of the other
    /// values
    LeaveOneOut,

    /// Outside the interquartile fence `[Q1 - f*IQR, Q3 + f*IQR]`
    IqrFence,
}

/// Thresholds for the analysis. None of them are authoritative; they are
/// tunables exposed through the server configuration.
#[derive(Debug, Clone)]
pub struct InsightsConfig {
    /// Missing ratio above which a column should be dropped
    pub drop_missing_ratio: f64,

    /// Duplicate ratio above which a non-categorical column is flagged
    pub redundancy_ratio: f64,

    /// Minimum co-occurring rows for a correlation entry
    pub min_correlation_support: usize,

    /// Minimum score for a correlation entry
    pub min_correlation_score: f64,

    pub anomaly_method: AnomalyMethod,

    /// Score threshold for [`AnomalyMethod::ModifiedZScore`]
    pub modified_z_threshold: f64,

    /// Standard deviations for [`AnomalyMethod::LeaveOneOut`]
    pub anomaly_k: f64,

    /// Fence factor for [`AnomalyMethod::IqrFence`]
    pub iqr_factor: f64,

    /// Categories with a smaller share of the column are flagged; `None`
    /// disables rare-category detection
    pub rare_category_ratio: Option<f64>,

    /// Rare-category detection needs at least this many non-null values
    pub rare_category_min_rows: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            drop_missing_ratio: 0.5,
            redundancy_ratio: 0.8,
            min_correlation_support: 1,
            min_correlation_score: 0.0,
            anomaly_method: AnomalyMethod::ModifiedZScore,
            modified_z_threshold: 3.5,
            anomaly_k: 2.0,
            iqr_factor: 1.5,
            rare_category_ratio: Some(0.05),
            rare_category_min_rows: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    DropColumn,
    Impute,
    ReviewForRedundancy,
    NoAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInsight {
    pub column: String,
    pub kind: ColumnType,
    pub missing_count: usize,
    pub duplicate_count: usize,
    pub distinct_count: usize,
    #[serde(serialize_with = "serialize_plain_opt")]
    pub most_common: Option<Value>,
    pub most_common_count: usize,
    pub suggested_action: SuggestedAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationEntry {
    pub columns: [String; 2],
    pub correlation_score: f64,
    /// Rows where both columns are non-null
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyReason {
    RobustOutlier { median: f64, score: f64, threshold: f64 },
    StdDevOutlier { mean: f64, std_dev: f64, k: f64 },
    OutsideFence { lower: f64, upper: f64 },
    RareCategory { count: usize, share: f64 },
}

impl AnomalyReason {
    pub fn describe(&self) -> String {
        match self {
            AnomalyReason::RobustOutlier { median, score, threshold } => format!(
                "modified z-score {:.2} exceeds {} (column median {:.4})",
                score, threshold, median
            ),
            AnomalyReason::StdDevOutlier { mean, std_dev, k } => format!(
                "more than {} standard deviations ({:.4}) from the mean of the other values ({:.4})",
                k, std_dev, mean
            ),
            AnomalyReason::OutsideFence { lower, upper } => {
                format!("outside the interquartile fence [{:.4}, {:.4}]", lower, upper)
            }
            AnomalyReason::RareCategory { count, share } => format!(
                "rare category: {} occurrence(s), {:.2}% of the column",
                count,
                share * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub row_id: u64,
    pub column: String,
    #[serde(serialize_with = "serialize_plain")]
    pub value: Value,
    pub reason: String,
    pub detail: AnomalyReason,
}

/// Full analysis of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableInsights {
    pub table_name: String,
    pub row_count: usize,
    pub insights: Vec<ColumnInsight>,
    pub correlations: Vec<CorrelationEntry>,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Stateless analyzer holding its thresholds
#[derive(Debug, Clone, Default)]
pub struct InsightsEngine {
    config: InsightsConfig,
}

impl InsightsEngine {
    pub fn new(config: InsightsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InsightsConfig {
        &self.config
    }

    /// Looks the table up and analyzes it
    ///
    /// # Errors
    /// * `NotFound` if the table does not exist
    pub fn analyze_table(&self, store: &TableStore, name: &str) -> Result<TableInsights> {
        Ok(self.analyze(store.table(name)?))
    }

    pub fn analyze(&self, table: &Table) -> TableInsights {
        if table.rows.is_empty() {
            return TableInsights {
                table_name: table.name.clone(),
                row_count: 0,
                insights: Vec::new(),
                correlations: Vec::new(),
                anomalies: Vec::new(),
            };
        }

        TableInsights {
            table_name: table.name.clone(),
            row_count: table.row_count(),
            insights: self.column_insights(table),
            correlations: self.categorical_correlations(table),
            anomalies: self.detect_anomalies(table),
        }
    }

    pub fn column_insights(&self, table: &Table) -> Vec<ColumnInsight> {
        let rows = table.row_count();
        table
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let stats = Frequencies::of(table.column_values(i));
                let non_null = rows - stats.missing;
                let duplicates = non_null - stats.distinct();
                let (most_common, most_common_count) = match stats.most_common() {
                    Some((value, count)) => (Some(value.clone()), count),
                    None => (None, 0),
                };

                let action = self.suggest(column.kind, stats.missing, duplicates, rows);

                ColumnInsight {
                    column: column.name.clone(),
                    kind: column.kind,
                    missing_count: stats.missing,
                    duplicate_count: duplicates,
                    distinct_count: stats.distinct(),
                    most_common,
                    most_common_count,
                    suggested_action: action,
                }
            })
            .collect()
    }

    fn suggest(&self, kind: ColumnType, missing: usize, duplicates: usize, rows: usize) -> SuggestedAction {
        if rows == 0 {
            return SuggestedAction::NoAction;
        }
        let missing_ratio = missing as f64 / rows as f64;
        let duplicate_ratio = duplicates as f64 / rows as f64;

        if missing_ratio > self.config.drop_missing_ratio {
            SuggestedAction::DropColumn
        } else if missing > 0 {
            SuggestedAction::Impute
        } else if kind != ColumnType::Categorical && duplicate_ratio > self.config.redundancy_ratio {
            SuggestedAction::ReviewForRedundancy
        } else {
            SuggestedAction::NoAction
        }
    }

    pub fn categorical_correlations(&self, table: &Table) -> Vec<CorrelationEntry> {
        let categorical: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnType::Categorical)
            .map(|(i, _)| i)
            .collect();

        let mut entries = Vec::new();
        for (n, &a) in categorical.iter().enumerate() {
            for &b in &categorical[n + 1..] {
                let Some((score, support)) = mutual_information(table, a, b) else {
                    continue;
                };
                if support < self.config.min_correlation_support
                    || score < self.config.min_correlation_score
                {
                    continue;
                }
                entries.push(CorrelationEntry {
                    columns: [table.columns[a].name.clone(), table.columns[b].name.clone()],
                    correlation_score: score,
                    support,
                });
            }
        }
        entries
    }

    pub fn detect_anomalies(&self, table: &Table) -> Vec<AnomalyRecord> {
        let mut records = Vec::new();
        for (i, column) in table.columns.iter().enumerate() {
            let flagged = match column.kind {
                ColumnType::Numeric => match self.config.anomaly_method {
                    AnomalyMethod::ModifiedZScore => {
                        modified_z_outliers(table, i, self.config.modified_z_threshold)
                    }
                    AnomalyMethod::LeaveOneOut => leave_one_out_outliers(table, i, self.config.anomaly_k),
                    AnomalyMethod::IqrFence => iqr_outliers(table, i, self.config.iqr_factor),
                },
                ColumnType::Categorical => match self.config.rare_category_ratio {
                    Some(ratio) => rare_categories(table, i, ratio, self.config.rare_category_min_rows),
                    None => Vec::new(),
                },
                ColumnType::Text => Vec::new(),
            };

            records.extend(flagged.into_iter().map(|(row_id, value, detail)| AnomalyRecord {
                row_id,
                column: column.name.clone(),
                value,
                reason: detail.describe(),
                detail,
            }));
        }
        records
    }
}

/// Association score between two columns of a table, whichever order they
/// are given in. `None` when either column is missing or degenerate.
pub fn correlation_score(table: &Table, a: &str, b: &str) -> Option<f64> {
    let a = table.column_index(a)?;
    let b = table.column_index(b)?;
    mutual_information(table, a, b).map(|(score, _)| score)
}

/// Value frequencies in first-occurrence order; nulls are counted apart
struct Frequencies<'a> {
    index: HashMap<ValueKey<'a>, usize>,
    values: Vec<(&'a Value, usize)>,
    missing: usize,
}

impl<'a> Frequencies<'a> {
    fn of(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut freq = Frequencies {
            index: HashMap::new(),
            values: Vec::new(),
            missing: 0,
        };
        for value in values {
            freq.add(value);
        }
        freq
    }

    /// Returns the first-occurrence index of the value, or `None` for nulls
    fn add(&mut self, value: &'a Value) -> Option<usize> {
        if value.is_null() {
            self.missing += 1;
            return None;
        }
        let next = self.values.len();
        let slot = *self.index.entry(value.key()).or_insert(next);
        if slot == next {
            self.values.push((value, 1));
        } else {
            self.values[slot].1 += 1;
        }
        Some(slot)
    }

    fn distinct(&self) -> usize {
        self.values.len()
    }

    /// Highest count; the earliest value wins ties
    fn most_common(&self) -> Option<(&'a Value, usize)> {
        let mut best: Option<(&'a Value, usize)> = None;
        for &(value, count) in &self.values {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((value, count));
            }
        }
        best
    }
}

/// Normalized mutual information `2 I(A;B) / (H(A) + H(B))` over rows where
/// both columns are non-null, plus that row count
fn mutual_information(table: &Table, a: usize, b: usize) -> Option<(f64, usize)> {
    // canonical order keeps the floating-point summation identical either way
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    if a == b {
        return None;
    }

    let mut left = Frequencies::of(std::iter::empty::<&Value>());
    let mut right = Frequencies::of(std::iter::empty::<&Value>());
    let mut joint: HashMap<(usize, usize), usize> = HashMap::new();
    let mut support = 0usize;

    for row in &table.rows {
        let (va, vb) = (&row.values[a], &row.values[b]);
        if va.is_null() || vb.is_null() {
            continue;
        }
        if let (Some(i), Some(j)) = (left.add(va), right.add(vb)) {
            *joint.entry((i, j)).or_insert(0) += 1;
            support += 1;
        }
    }

    if support == 0 {
        return None;
    }

    let n = support as f64;
    let h_a = entropy(left.values.iter().map(|&(_, c)| c), n);
    let h_b = entropy(right.values.iter().map(|&(_, c)| c), n);
    if h_a <= 0.0 || h_b <= 0.0 {
        return None;
    }

    let mut cells: Vec<((usize, usize), usize)> = joint.into_iter().collect();
    cells.sort_unstable_by_key(|&(key, _)| key);

    let mut mi = 0.0;
    for ((i, j), count) in cells {
        let p_ab = count as f64 / n;
        let p_a = left.values[i].1 as f64 / n;
        let p_b = right.values[j].1 as f64 / n;
        mi += p_ab * (p_ab / (p_a * p_b)).ln();
    }

    let score = (2.0 * mi / (h_a + h_b)).clamp(0.0, 1.0);
    Some((score, support))
}

fn entropy(counts: impl Iterator<Item = usize>, n: f64) -> f64 {
    counts
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

type Flagged = Vec<(u64, Value, AnomalyReason)>;

fn numeric_cells(table: &Table, index: usize) -> Vec<(u64, f64)> {
    table
        .rows
        .iter()
        .filter_map(|r| r.values[index].as_number().map(|n| (r.id, n)))
        .collect()
}

/// Flags values whose modified z-score `0.6745 * (x - median) / MAD`
/// exceeds `threshold`. When more than half the values share the median the
/// MAD is zero and the mean absolute deviation (scaled by 1.2533) stands in.
/// Needs at least three values.
fn modified_z_outliers(table: &Table, index: usize, threshold: f64) -> Flagged {
    let cells = numeric_cells(table, index);
    if cells.len() < 3 {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = cells.iter().map(|&(_, x)| x).collect();
    sorted.sort_by(f64::total_cmp);
    let median = quantile(&sorted, 0.5);

    let mut deviations: Vec<f64> = sorted.iter().map(|x| (x - median).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad = quantile(&deviations, 0.5);

    let scale = if mad > 0.0 {
        mad / 0.6745
    } else {
        let mean_ad = deviations.iter().sum::<f64>() / deviations.len() as f64;
        1.253314 * mean_ad
    };
    if scale == 0.0 {
        return Vec::new();
    }

    cells
        .into_iter()
        .filter_map(|(row_id, x)| {
            let score = (x - median).abs() / scale;
            (score > threshold).then(|| {
                (
                    row_id,
                    Value::Number(x),
                    AnomalyReason::RobustOutlier {
                        median,
                        score,
                        threshold,
                    },
                )
            })
        })
        .collect()
}

/// Flags values further than `k` sample standard deviations from the mean
/// of the remaining values of the column. Needs at least three values.
fn leave_one_out_outliers(table: &Table, index: usize, k: f64) -> Flagged {
    let cells = numeric_cells(table, index);
    let count = cells.len();
    if count < 3 {
        return Vec::new();
    }

    let n = count as f64;
    let mean = cells.iter().map(|&(_, x)| x).sum::<f64>() / n;
    let spread: f64 = cells.iter().map(|&(_, x)| (x - mean).powi(2)).sum();
    if spread == 0.0 {
        return Vec::new();
    }

    let others = n - 1.0;
    let mut flagged = Vec::new();
    for &(row_id, x) in &cells {
        let d = x - mean;
        // mean and sample variance of the column without x
        let mean_others = mean - d / others;
        let var_others = ((spread - d * d * n / others) / (others - 1.0)).max(0.0);
        let std_others = var_others.sqrt();
        let deviation = (x - mean_others).abs();
        let epsilon = 1e-9 * mean_others.abs().max(1.0);

        if deviation > k * std_others && deviation > epsilon {
            flagged.push((
                row_id,
                Value::Number(x),
                AnomalyReason::StdDevOutlier {
                    mean: mean_others,
                    std_dev: std_others,
                    k,
                },
            ));
        }
    }
    flagged
}

/// Flags values outside `[Q1 - f*IQR, Q3 + f*IQR]`. Needs at least four values.
fn iqr_outliers(table: &Table, index: usize, factor: f64) -> Flagged {
    let cells = numeric_cells(table, index);
    if cells.len() < 4 {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = cells.iter().map(|&(_, x)| x).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - factor * iqr;
    let upper = q3 + factor * iqr;

    cells
        .into_iter()
        .filter(|&(_, x)| x < lower || x > upper)
        .map(|(row_id, x)| (row_id, Value::Number(x), AnomalyReason::OutsideFence { lower, upper }))
        .collect()
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn rare_categories(table: &Table, index: usize, ratio: f64, min_rows: usize) -> Flagged {
    let freq = Frequencies::of(table.column_values(index));
    let non_null = table.row_count() - freq.missing;
    if non_null < min_rows {
        return Vec::new();
    }

    let mut flagged = Vec::new();
    for row in &table.rows {
        let value = &row.values[index];
        if value.is_null() {
            continue;
        }
        let Some(&slot) = freq.index.get(&value.key()) else {
            continue;
        };
        let count = freq.values[slot].1;
        let share = count as f64 / non_null as f64;
        if share < ratio {
            flagged.push((row.id, value.clone(), AnomalyReason::RareCategory { count, share }));
        }
    }
    flagged
}
