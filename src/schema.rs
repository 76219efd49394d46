//! Column type inference for uploaded data.
//!
//! Types are decided from an evenly spaced sample of rows. A column that
//! looked numeric in the sample but holds a non-numeric value elsewhere is
//! demoted while its cells are being typed, so a numeric column never holds
//! text.

use crate::table::{Column, ColumnType, Value, parse_number};
use std::collections::HashSet;

/// Thresholds used by schema inference
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Upper bound on rows examined per column
    pub max_sample_rows: usize,

    /// A text column is categorical when its distinct count is below this
    /// fraction of its non-null sampled values
    pub categorical_ratio: f64,

    /// ... and at most this many distinct values
    pub max_categories: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_sample_rows: 1000,
            categorical_ratio: 0.7,
            max_categories: 50,
        }
    }
}

/// Infers column types and converts numeric cells to numbers
///
/// # Arguments
/// * `headers` - Column names, already normalized by the loader
/// * `rows` - Raw rows holding only `Null` and `Text` values
/// * `config` - Sampling and categorical thresholds
///
/// # Returns
/// * The typed column definitions and the rows with numeric cells converted
pub fn infer_schema(
    headers: &[String],
    mut rows: Vec<Vec<Value>>,
    config: &SchemaConfig,
) -> (Vec<Column>, Vec<Vec<Value>>) {
    for row in rows.iter_mut() {
        row.resize(headers.len(), Value::Null);
    }

    let sample = sample_indices(rows.len(), config.max_sample_rows);
    let mut columns = Vec::with_capacity(headers.len());

    for (c, name) in headers.iter().enumerate() {
        let mut kind = classify(sample.iter().map(|&r| &rows[r][c]), config);

        if kind == ColumnType::Numeric && !coerce_numeric(&mut rows, c) {
            kind = classify_text(sample.iter().map(|&r| &rows[r][c]), config);
        }

        columns.push(Column::new(name.clone(), kind));
    }

    (columns, rows)
}

/// Classifies one column from its sampled values
pub fn classify<'a>(
    values: impl Iterator<Item = &'a Value> + Clone,
    config: &SchemaConfig,
) -> ColumnType {
    let mut non_null = 0usize;
    let mut all_numeric = true;

    for value in values.clone() {
        match value {
            Value::Null => {}
            Value::Number(_) => non_null += 1,
            Value::Text(s) => {
                non_null += 1;
                if parse_number(s).is_none() {
                    all_numeric = false;
                }
            }
        }
    }

    if non_null > 0 && all_numeric {
        ColumnType::Numeric
    } else {
        classify_text(values, config)
    }
}

fn classify_text<'a>(values: impl Iterator<Item = &'a Value>, config: &SchemaConfig) -> ColumnType {
    let mut distinct = HashSet::new();
    let mut non_null = 0usize;

    for value in values.filter(|v| !v.is_null()) {
        non_null += 1;
        distinct.insert(value.key());
    }

    let limit = config.categorical_ratio * non_null as f64;
    if non_null > 0 && distinct.len() <= config.max_categories && (distinct.len() as f64) < limit {
        ColumnType::Categorical
    } else {
        ColumnType::Text
    }
}

/// Converts every cell of column `c` to a number. Returns false, leaving
/// the column untouched, when some cell is not numeric.
fn coerce_numeric(rows: &mut [Vec<Value>], c: usize) -> bool {
    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        match &row[c] {
            Value::Null => parsed.push(None),
            Value::Number(n) => parsed.push(Some(*n)),
            Value::Text(s) => match parse_number(s) {
                Some(n) => parsed.push(Some(n)),
                None => return false,
            },
        }
    }

    for (row, number) in rows.iter_mut().zip(parsed) {
        row[c] = number.map_or(Value::Null, Value::Number);
    }
    true
}

/// Evenly spaced row indices, at most `max` of them
fn sample_indices(row_count: usize, max: usize) -> Vec<usize> {
    if row_count <= max || max == 0 {
        return (0..row_count).collect();
    }
    let step = row_count / max;
    (0..row_count).step_by(step).take(max).collect()
}
