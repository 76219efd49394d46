//! Named-table storage with filtered, paginated reads and cell edits.
//!
//! The store is a plain owned structure; the web layer wraps it in a lock.
//! When opened with a [`SnapshotDir`] every mutation is written through to
//! disk before the call returns. Concurrent edits to the same cell from two
//! sessions are last-write-wins.

use crate::error::{AppError, Result};
use crate::filter::RowFilter;
use crate::persistence::SnapshotDir;
use crate::table::{Column, ColumnType, Row, Table, TableMeta, Value, ValueCount, parse_number, value_counts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// What to do when an upload reuses an existing table name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateName`
    #[default]
    Reject,

    /// Drop the old table and store the new one
    Replace,
}

/// Store settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub duplicate_policy: DuplicatePolicy,

    /// Largest page a query may request
    pub max_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            max_page_size: 500,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone)]
pub struct RowPage {
    pub rows: Vec<Row>,

    /// Rows matching the filter across all pages
    pub total_records: usize,

    /// `ceil(total_records / page_size)`
    pub total_pages: usize,

    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Default)]
pub struct TableStore {
    tables: BTreeMap<String, Table>,
    config: StoreConfig,
    snapshots: Option<SnapshotDir>,
}

impl TableStore {
    /// In-memory store
    pub fn new(config: StoreConfig) -> Self {
        Self {
            tables: BTreeMap::new(),
            config,
            snapshots: None,
        }
    }

    /// Store backed by snapshots in `dir`; existing snapshots are loaded
    pub fn open(dir: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let snapshots = SnapshotDir::open(dir)?;
        let tables = snapshots
            .load_all()?
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Ok(Self {
            tables,
            config,
            snapshots: Some(snapshots),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Stores a new table built from typed rows
    ///
    /// # Errors
    /// * `DuplicateName` if the name is taken and the policy is `Reject`
    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
        owner: &str,
    ) -> Result<TableMeta> {
        if self.tables.contains_key(name) && self.config.duplicate_policy == DuplicatePolicy::Reject {
            return Err(AppError::DuplicateName(name.to_string()));
        }

        let table = Table::new(name, columns, rows, owner);
        if let Some(snapshots) = &self.snapshots {
            snapshots.save_table(&table)?;
        }
        let meta = table.meta();
        if self.tables.insert(name.to_string(), table).is_some() {
            tracing::info!(table = name, "replaced existing table");
        }
        Ok(meta)
    }

    /// All tables, sorted by name
    pub fn list_tables(&self) -> Vec<TableMeta> {
        self.tables.values().map(Table::meta).collect()
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("table `{}`", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| AppError::not_found(format!("table `{}`", name)))
    }

    pub fn get_schema(&self, name: &str) -> Result<&[Column]> {
        Ok(&self.table(name)?.columns)
    }

    /// Filtered, paginated read
    ///
    /// # Arguments
    /// * `name` - Table name
    /// * `filters` - Column name to filter string; blank strings are ignored
    /// * `page` - 1-based page number
    /// * `page_size` - Rows per page, at most `max_page_size`
    ///
    /// # Errors
    /// * `NotFound` for an unknown table or filter column
    /// * `ValidationError` for bad paging arguments or malformed filters
    pub fn query_rows(
        &self,
        name: &str,
        filters: &HashMap<String, String>,
        page: usize,
        page_size: usize,
    ) -> Result<RowPage> {
        if page == 0 {
            return Err(AppError::validation("page numbers start at 1"));
        }
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(AppError::validation(format!(
                "page size must be between 1 and {}",
                self.config.max_page_size
            )));
        }

        let table = self.table(name)?;
        let filter = RowFilter::build(&table.columns, filters)?;

        let offset = (page - 1).saturating_mul(page_size);
        let mut total_records = 0usize;
        let mut rows = Vec::new();
        for row in table.rows.iter().filter(|r| filter.matches(&r.values)) {
            if total_records >= offset && rows.len() < page_size {
                rows.push(row.clone());
            }
            total_records += 1;
        }

        tracing::debug!(table = name, page, page_size, total_records, "query rows");

        Ok(RowPage {
            rows,
            total_records,
            total_pages: total_records.div_ceil(page_size),
            page,
            page_size,
        })
    }

    /// Overwrites one cell and returns the stored value
    ///
    /// Blank input is stored as `Null`. Numeric columns only accept numbers.
    ///
    /// # Errors
    /// * `NotFound` if the table, row or column does not exist
    /// * `ValidationError` for non-numeric input to a numeric column
    pub fn update_cell(&mut self, name: &str, row_id: u64, column: &str, raw: &str) -> Result<Value> {
        let snapshots = self.snapshots.clone();
        let table = self.table_mut(name)?;

        let index = table
            .column_index(column)
            .ok_or_else(|| AppError::not_found(format!("column `{}` in table `{}`", column, name)))?;

        let value = match Value::from_raw(raw) {
            Value::Text(s) if table.columns[index].kind == ColumnType::Numeric => {
                match parse_number(&s) {
                    Some(n) => Value::Number(n),
                    None => {
                        return Err(AppError::validation(format!(
                            "column `{}` is numeric; `{}` is not a number",
                            column, s
                        )));
                    }
                }
            }
            other => other,
        };

        let row = table
            .row_mut(row_id)
            .ok_or_else(|| AppError::not_found(format!("row {} in table `{}`", row_id, name)))?;
        let previous = std::mem::replace(&mut row.values[index], value.clone());

        if let Some(snapshots) = snapshots {
            if let Err(e) = snapshots.save_table(table) {
                // keep memory in line with the last snapshot
                if let Some(row) = table.row_mut(row_id) {
                    row.values[index] = previous;
                }
                return Err(e);
            }
        }
        Ok(value)
    }

    /// Removes a table and all its rows
    ///
    /// # Errors
    /// * `NotFound` if the table does not exist
    pub fn delete_table(&mut self, name: &str) -> Result<()> {
        if !self.tables.contains_key(name) {
            return Err(AppError::not_found(format!("table `{}`", name)));
        }
        if let Some(snapshots) = &self.snapshots {
            snapshots.remove_table(name)?;
        }
        self.tables.remove(name);
        Ok(())
    }

    /// Value counts of one column, most frequent first
    pub fn column_summary(&self, name: &str, column: &str) -> Result<Vec<ValueCount>> {
        let table = self.table(name)?;
        let index = table
            .column_index(column)
            .ok_or_else(|| AppError::not_found(format!("column `{}` in table `{}`", column, name)))?;
        Ok(value_counts(table.column_values(index)))
    }

    /// Value counts for every column, in column order
    pub fn table_summary(&self, name: &str) -> Result<Vec<(String, Vec<ValueCount>)>> {
        let table = self.table(name)?;
        Ok(table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), value_counts(table.column_values(i))))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn sales_store() -> TableStore {
        let mut store = TableStore::new(StoreConfig::default());
        store
            .create_table(
                "sales",
                vec![
                    Column::new("region", ColumnType::Categorical),
                    Column::new("amount", ColumnType::Numeric),
                ],
                vec![
                    vec![text("east"), Value::Number(10.0)],
                    vec![text("east"), Value::Number(1000.0)],
                    vec![text("west"), Value::Number(12.0)],
                    vec![text("North-East"), Value::Null],
                    vec![Value::Null, Value::Number(7.0)],
                ],
                "alice",
            )
            .unwrap();
        store
    }

    fn filters(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ids(page: &RowPage) -> Vec<u64> {
        page.rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut store = sales_store();
        let err = store
            .create_table("sales", vec![], vec![], "bob")
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateName");
    }

    #[test]
    fn test_duplicate_name_replaced_by_policy() {
        let mut store = TableStore::new(StoreConfig {
            duplicate_policy: DuplicatePolicy::Replace,
            ..StoreConfig::default()
        });
        store.create_table("t", vec![], vec![vec![], vec![]], "a").unwrap();
        store.create_table("t", vec![], vec![], "b").unwrap();
        assert_eq!(store.table("t").unwrap().row_count(), 0);
        assert_eq!(store.list_tables().len(), 1);
    }

    #[test]
    fn test_get_schema_not_found() {
        let store = sales_store();
        assert_eq!(store.get_schema("ghost").unwrap_err().kind(), "NotFound");
        assert_eq!(store.get_schema("sales").unwrap().len(), 2);
    }

    #[test]
    fn test_substring_filter_is_case_insensitive() {
        let store = sales_store();
        let page = store
            .query_rows("sales", &filters(&[("region", "EAST")]), 1, 10)
            .unwrap();
        assert_eq!(ids(&page), vec![1, 2, 4]);
        assert_eq!(page.total_records, 3);
    }

    #[test]
    fn test_numeric_filter() {
        let store = sales_store();
        let page = store
            .query_rows("sales", &filters(&[("amount", ">=12")]), 1, 10)
            .unwrap();
        assert_eq!(ids(&page), vec![2, 3]);

        let err = store
            .query_rows("sales", &filters(&[("amount", "lots")]), 1, 10)
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_filter_is_idempotent() {
        let store = sales_store();
        let f = filters(&[("region", "east"), ("amount", "<100")]);
        let once = store.query_rows("sales", &f, 1, 10).unwrap();
        // re-applying the same filter to the already filtered set changes nothing
        let again: Vec<u64> = once
            .rows
            .iter()
            .filter(|r| {
                RowFilter::build(&store.table("sales").unwrap().columns, &f)
                    .unwrap()
                    .matches(&r.values)
            })
            .map(|r| r.id)
            .collect();
        assert_eq!(ids(&once), again);
        assert_eq!(ids(&once), vec![1]);
    }

    #[test]
    fn test_pages_cover_result_exactly_once() {
        let store = sales_store();
        let no_filter = HashMap::new();
        let first = store.query_rows("sales", &no_filter, 1, 2).unwrap();
        assert_eq!(first.total_records, 5);
        assert_eq!(first.total_pages, 3);

        let mut seen = Vec::new();
        for page in 1..=first.total_pages {
            let p = store.query_rows("sales", &no_filter, page, 2).unwrap();
            seen.extend(ids(&p));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);

        let past_end = store.query_rows("sales", &no_filter, 4, 2).unwrap();
        assert!(past_end.rows.is_empty());
        assert_eq!(past_end.total_records, 5);
    }

    #[test]
    fn test_bad_paging_arguments() {
        let store = sales_store();
        let f = HashMap::new();
        assert_eq!(store.query_rows("sales", &f, 0, 10).unwrap_err().kind(), "ValidationError");
        assert_eq!(store.query_rows("sales", &f, 1, 0).unwrap_err().kind(), "ValidationError");
        assert_eq!(store.query_rows("sales", &f, 1, 501).unwrap_err().kind(), "ValidationError");
    }

    #[test]
    fn test_update_cell_blank_becomes_null() {
        let mut store = sales_store();
        let stored = store.update_cell("sales", 1, "region", "").unwrap();
        assert_eq!(stored, Value::Null);
        let row = store.table("sales").unwrap().row(1).unwrap().clone();
        assert_eq!(row.values[0], Value::Null);
    }

    #[test]
    fn test_update_cell_numeric_validation() {
        let mut store = sales_store();
        assert_eq!(
            store.update_cell("sales", 2, "amount", " 99.5 ").unwrap(),
            Value::Number(99.5)
        );
        let err = store.update_cell("sales", 2, "amount", "abc").unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_update_cell_not_found() {
        let mut store = sales_store();
        assert_eq!(store.update_cell("ghost", 1, "region", "x").unwrap_err().kind(), "NotFound");
        assert_eq!(store.update_cell("sales", 99, "region", "x").unwrap_err().kind(), "NotFound");
        assert_eq!(store.update_cell("sales", 1, "nope", "x").unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_delete_missing_table_is_not_found() {
        let mut store = sales_store();
        assert_eq!(store.delete_table("ghost").unwrap_err().kind(), "NotFound");
        store.delete_table("sales").unwrap();
        assert!(store.list_tables().is_empty());
    }

    #[test]
    fn test_column_summary() {
        let store = sales_store();
        let summary = store.column_summary("sales", "region").unwrap();
        assert_eq!(summary[0].value, text("east"));
        assert_eq!(summary[0].count, 2);
        assert!(summary.iter().any(|vc| vc.value == Value::Null && vc.count == 1));
        assert_eq!(store.table_summary("sales").unwrap().len(), 2);
    }

    #[test]
    fn test_snapshots_write_through() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = TableStore::open(dir.path(), StoreConfig::default()).unwrap();
            store
                .create_table(
                    "t",
                    vec![Column::new("a", ColumnType::Text)],
                    vec![vec![text("x")], vec![text("y")]],
                    "alice",
                )
                .unwrap();
            store.update_cell("t", 2, "a", "z").unwrap();
            store
                .create_table("gone", vec![], vec![], "alice")
                .unwrap();
            store.delete_table("gone").unwrap();
        }

        let store = TableStore::open(dir.path(), StoreConfig::default()).unwrap();
        let names: Vec<String> = store.list_tables().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["t"]);
        assert_eq!(store.table("t").unwrap().row(2).unwrap().values[0], text("z"));
    }

    fn snapshot_store(dir: &std::path::Path) -> TableStore {
        let mut store = TableStore::open(dir, StoreConfig::default()).unwrap();
        store
            .create_table(
                "t",
                vec![Column::new("a", ColumnType::Text)],
                vec![vec![text("x")]],
                "alice",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_failed_snapshot_leaves_cell_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = dir.path().join("tables");
        let mut store = snapshot_store(&snapshots);

        std::fs::remove_dir_all(&snapshots).unwrap();
        assert!(store.update_cell("t", 1, "a", "changed").is_err());
        assert_eq!(store.table("t").unwrap().row(1).unwrap().values[0], text("x"));
    }

    #[test]
    fn test_failed_snapshot_removal_keeps_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = snapshot_store(dir.path());

        // a directory where the snapshot file should be cannot be unlinked
        let snapshot = dir.path().join("t.bin.gz");
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();

        assert!(store.delete_table("t").is_err());
        assert!(store.table("t").is_ok());
    }
}
