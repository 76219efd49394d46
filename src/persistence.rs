use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::table::Table;

const SNAPSHOT_EXT: &str = "bin.gz";

/// On-disk table snapshots, one gzip-compressed bincode file per table
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    /// Opens (creating if needed) the snapshot directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, SNAPSHOT_EXT))
    }

    /// Writes the table to a temporary file and renames it into place
    pub fn save_table(&self, table: &Table) -> Result<()> {
        let target = self.file_for(&table.name);
        let tmp = target.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut writer = BufWriter::new(encoder);
            serialize_into(&mut writer, table)?;
            writer.flush()?;
            let encoder = writer.into_inner().map_err(|e| e.into_error())?;
            encoder.finish()?;
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn load_table(&self, path: &Path) -> Result<Table> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(GzDecoder::new(file));
        let table: Table = deserialize_from(&mut reader)?;
        Ok(table)
    }

    /// Removing a snapshot that was never written is not an error
    pub fn remove_table(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads every snapshot in the directory. Unreadable files are skipped
    /// with a warning so one corrupt table does not block startup.
    pub fn load_all(&self) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SNAPSHOT_EXT));
            if !path.is_file() || !is_snapshot {
                continue;
            }
            match self.load_table(&path) {
                Ok(table) => tables.push(table),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable snapshot: {}", e),
            }
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnType, Value};

    fn sample() -> Table {
        Table::new(
            "sales",
            vec![
                Column::new("region", ColumnType::Categorical),
                Column::new("amount", ColumnType::Numeric),
            ],
            vec![
                vec![Value::Text("east".into()), Value::Number(10.0)],
                vec![Value::Null, Value::Number(12.5)],
            ],
            "alice",
        )
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::open(dir.path().join("tables")).unwrap();
        let table = sample();
        snapshots.save_table(&table).unwrap();

        let loaded = snapshots.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "sales");
        assert_eq!(loaded[0].rows, table.rows);
        assert_eq!(loaded[0].columns, table.columns);
        assert_eq!(loaded[0].next_row_id, 3);
    }

    #[test]
    fn test_remove_missing_snapshot_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::open(dir.path()).unwrap();
        snapshots.remove_table("ghost").unwrap();
    }

    #[test]
    fn test_corrupt_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::open(dir.path()).unwrap();
        snapshots.save_table(&sample()).unwrap();
        std::fs::write(dir.path().join("broken.bin.gz"), b"not gzip").unwrap();

        let loaded = snapshots.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
