use crate::error::{AppError, Result};
use crate::table::{Column, ColumnType, Value, parse_number};

/// Comparison operator for numeric filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
        }
    }
}

/// A parsed per-column row predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Case-insensitive substring match; holds the lowercased needle
    Contains(String),

    /// Numeric comparison against a constant
    Compare(CompareOp, f64),
}

impl Predicate {
    /// Parses a filter string for a column
    ///
    /// Text and categorical columns take a substring. Numeric columns take
    /// `N`, `=N`, `!=N`, `>N`, `>=N`, `<N` or `<=N`.
    ///
    /// # Returns
    /// * `Ok(None)` for a blank filter, which matches everything
    ///
    /// # Errors
    /// * `ValidationError` when a numeric filter is malformed
    pub fn parse(column: &Column, raw: &str) -> Result<Option<Predicate>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        match column.kind {
            ColumnType::Text | ColumnType::Categorical => {
                Ok(Some(Predicate::Contains(raw.to_lowercase())))
            }
            ColumnType::Numeric => {
                let (op, operand) = split_operator(raw);
                match parse_number(operand) {
                    Some(n) => Ok(Some(Predicate::Compare(op, n))),
                    None => Err(AppError::validation(format!(
                        "invalid filter `{}` for numeric column `{}`: expected a number, optionally prefixed by =, !=, >, >=, < or <=",
                        raw, column.name
                    ))),
                }
            }
        }
    }

    /// Nulls never match
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (Predicate::Contains(needle), Value::Text(s)) => s.to_lowercase().contains(needle),
            (Predicate::Contains(needle), Value::Number(n)) => n.to_string().contains(needle),
            (Predicate::Compare(op, rhs), Value::Number(n)) => op.apply(*n, *rhs),
            (Predicate::Compare(op, rhs), Value::Text(s)) => {
                parse_number(s).is_some_and(|n| op.apply(n, *rhs))
            }
        }
    }
}

fn split_operator(raw: &str) -> (CompareOp, &str) {
    // two-character operators first
    for (prefix, op) in [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("!=", CompareOp::Ne),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        ("=", CompareOp::Eq),
    ] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            return (op, rest);
        }
    }
    (CompareOp::Eq, raw)
}

/// Filters bound to column positions, combined with AND
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    predicates: Vec<(usize, Predicate)>,
}

impl RowFilter {
    /// Builds a filter from `column -> filter string` pairs
    ///
    /// # Errors
    /// * `NotFound` when a filter names an unknown column
    /// * `ValidationError` when a filter string is malformed
    pub fn build<'a>(
        columns: &[Column],
        filters: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self> {
        let mut predicates = Vec::new();
        for (name, raw) in filters {
            let index = columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| AppError::not_found(format!("column `{}`", name)))?;
            if let Some(predicate) = Predicate::parse(&columns[index], raw)? {
                predicates.push((index, predicate));
            }
        }
        Ok(Self { predicates })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, values: &[Value]) -> bool {
        self.predicates
            .iter()
            .all(|(index, predicate)| predicate.matches(&values[*index]))
    }
}
