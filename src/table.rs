use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A single scalar cell value
///
/// Blank input is always stored as [`Value::Null`]; numbers are always finite.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Missing value
    #[default]
    Null,

    /// Finite numeric value
    Number(f64),

    /// Free text or categorical label
    Text(String),
}

/// Hashable view of a [`Value`], used for frequency counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey<'a> {
    Null,
    Number(u64),
    Text(&'a str),
}

impl Value {
    /// Normalizes raw cell text: blank becomes `Null`, everything else is
    /// kept as trimmed text. Typing into numbers happens in schema inference.
    pub fn from_raw(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Value::Null
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn key(&self) -> ValueKey<'_> {
        match self {
            Value::Null => ValueKey::Null,
            // -0.0 and 0.0 count as the same value
            Value::Number(n) if *n == 0.0 => ValueKey::Number(0f64.to_bits()),
            Value::Number(n) => ValueKey::Number(n.to_bits()),
            Value::Text(s) => ValueKey::Text(s),
        }
    }

    /// Plain JSON rendering: `null`, a number, or a string
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Number(n) if is_integral(*n) => serde_json::Value::from(*n as i64),
            Value::Number(n) => serde_json::Value::from(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0
}

/// Parses a finite number, ignoring surrounding whitespace
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Serializes a [`Value`] as plain JSON instead of its tagged storage form
pub fn serialize_plain<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Value::Null => serializer.serialize_none(),
        Value::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
        Value::Number(n) => serializer.serialize_f64(*n),
        Value::Text(s) => serializer.serialize_str(s),
    }
}

/// Same as [`serialize_plain`] for optional values
pub fn serialize_plain_opt<S: Serializer>(
    value: &Option<Value>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_plain(v, serializer),
        None => serializer.serialize_none(),
    }
}

/// Inferred type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Every value parses as a number
    Numeric,

    /// Few distinct values that repeat
    Categorical,

    /// Anything else
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A stored row with its stable identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub values: Vec<Value>,
}

/// Listing metadata for a table
#[derive(Debug, Clone, Serialize)]
pub struct TableMeta {
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// One distinct value of a column and how often it occurs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    #[serde(serialize_with = "serialize_plain")]
    pub value: Value,
    pub count: usize,
}

/// A named table of typed rows
///
/// Every row holds exactly one value per column; [`Table::new`] pads short
/// rows with `Null` and drops extra trailing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub next_row_id: u64,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl Table {
    /// Builds a table, assigning row ids `1..=n` in input order
    pub fn new(
        name: impl Into<String>,
        columns: Vec<Column>,
        values: Vec<Vec<Value>>,
        owner: impl Into<String>,
    ) -> Self {
        let width = columns.len();
        let rows: Vec<Row> = values
            .into_iter()
            .enumerate()
            .map(|(i, mut values)| {
                values.resize(width, Value::Null);
                Row {
                    id: i as u64 + 1,
                    values,
                }
            })
            .collect();
        let next_row_id = rows.len() as u64 + 1;

        Self {
            name: name.into(),
            columns,
            rows,
            next_row_id,
            owner: owner.into(),
            created_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Rows are kept sorted by id, so lookups are a binary search
    pub fn row(&self, id: u64) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn row_mut(&mut self, id: u64) -> Option<&mut Row> {
        match self.rows.binary_search_by_key(&id, |r| r.id) {
            Ok(i) => Some(&mut self.rows[i]),
            Err(_) => None,
        }
    }

    /// Values of one column in row order
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |r| &r.values[index])
    }

    pub fn meta(&self) -> TableMeta {
        TableMeta {
            name: self.name.clone(),
            row_count: self.rows.len(),
            column_count: self.columns.len(),
            owner: self.owner.clone(),
            created_at: self.created_at,
        }
    }

    /// JSON object for a row: `_id` plus one key per column
    pub fn row_to_json(&self, row: &Row) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.columns.len() + 1);
        object.insert("_id".to_string(), serde_json::Value::from(row.id));
        for (column, value) in self.columns.iter().zip(&row.values) {
            object.insert(column.name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

/// Counts values, most frequent first; ties keep first-occurrence order
pub fn value_counts<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<ValueCount> {
    let mut index: HashMap<ValueKey<'a>, usize> = HashMap::new();
    let mut counts: Vec<ValueCount> = Vec::new();

    for value in values {
        match index.get(&value.key()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(value.key(), counts.len());
                counts.push(ValueCount {
                    value: value.clone(),
                    count: 1,
                });
            }
        }
    }

    // stable sort keeps first-occurrence order among equal counts
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}
