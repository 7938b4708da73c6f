//! Read-only access to an existing index database.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use regex::RegexBuilder;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::core::errors::{NebbyError, Result};

/// The `valid` table as read back, `id` excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRecord {
    pub filename: String,
    pub path: String,
}

pub struct IndexReader {
    conn: Connection,
    path: PathBuf,
}

impl IndexReader {
    /// Open an existing database read-only. A missing file is an error, not an
    /// empty index.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(NebbyError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "database file not found"),
            ));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| NebbyError::sql("open database", &e))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every row of `valid`, in storage order. NULL cells read as empty
    /// strings.
    pub fn valid_table(&self) -> Result<TableView> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM valid")
            .map_err(|e| NebbyError::sql("read valid table", &e))?;

        let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
        let keep: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.eq_ignore_ascii_case("id"))
            .map(|(idx, _)| idx)
            .collect();
        let columns = keep.iter().map(|&idx| names[idx].clone()).collect();

        let rows = stmt
            .query_map([], |row| {
                keep.iter()
                    .map(|&idx| row.get_ref(idx).map(cell_text))
                    .collect::<rusqlite::Result<Vec<String>>>()
            })
            .map_err(|e| NebbyError::sql("read valid table", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| NebbyError::sql("read valid table", &e))?;

        Ok(TableView { columns, rows })
    }

    /// Rows of `valid` with at least one cell matching `pattern`
    /// case-insensitively. A blank pattern matches every row.
    pub fn search(&self, pattern: &str) -> Result<TableView> {
        let mut view = self.valid_table()?;
        if pattern.trim().is_empty() {
            return Ok(view);
        }
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| NebbyError::InvalidConfig {
                details: format!("invalid search pattern {pattern:?}: {e}"),
            })?;
        view.rows.retain(|row| row.iter().any(|cell| re.is_match(cell)));
        Ok(view)
    }

    /// Contents of `invalid`, or nothing when the run skipped invalid records.
    pub fn invalid_records(&self) -> Result<Vec<InvalidRecord>> {
        if !self.has_table("invalid")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT filename, path FROM invalid")
            .map_err(|e| NebbyError::sql("read invalid table", &e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(InvalidRecord {
                    filename: row.get(0)?,
                    path: row.get(1)?,
                })
            })
            .map_err(|e| NebbyError::sql("read invalid table", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| NebbyError::sql("read invalid table", &e))?;
        Ok(rows)
    }

    pub fn count_invalid(&self) -> Result<u64> {
        if !self.has_table("invalid")? {
            return Ok(0);
        }
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM invalid", [], |row| row.get(0))
            .map_err(|e| NebbyError::sql("count invalid rows", &e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| NebbyError::sql("inspect schema", &e))?;
        Ok(count > 0)
    }
}

fn cell_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::walker::DirectoryRecord;
    use crate::store::columns::{ColumnSpec, Splitter};
    use crate::store::writer::{DatabaseWriter, WriteOptions};
    use tempfile::TempDir;

    fn record(name: &str) -> DirectoryRecord {
        DirectoryRecord {
            name: name.to_string(),
            full_path: PathBuf::from("/lib").join(name),
        }
    }

    fn build_index(dir: &Path, keep_invalid: bool) -> PathBuf {
        let db = dir.join("index.db");
        DatabaseWriter::new(
            &db,
            WriteOptions {
                splitter: Splitter::char('_'),
                columns: ColumnSpec::parse("artist,album"),
                keep_invalid,
            },
        )
        .write(&[
            record("Miles_Kind of Blue"),
            record("Coltrane_Blue Train"),
            record("loose"),
        ])
        .unwrap();
        db
    }

    #[test]
    fn valid_table_excludes_id() {
        let tmp = TempDir::new().unwrap();
        let reader = IndexReader::open(&build_index(tmp.path(), true)).unwrap();

        let view = reader.valid_table().unwrap();

        assert_eq!(view.columns, ["artist", "album", "path"]);
        let mut rows = view.rows;
        rows.sort();
        assert_eq!(
            rows,
            vec![
                vec!["Coltrane", "Blue Train", "/lib/Coltrane_Blue Train"],
                vec!["Miles", "Kind of Blue", "/lib/Miles_Kind of Blue"],
            ]
        );
    }

    #[test]
    fn search_is_case_insensitive_over_all_cells() {
        let tmp = TempDir::new().unwrap();
        let reader = IndexReader::open(&build_index(tmp.path(), true)).unwrap();

        let hits = reader.search("coltrane").unwrap();
        assert_eq!(hits.rows.len(), 1);
        assert_eq!(hits.rows[0][0], "Coltrane");

        assert_eq!(reader.search("BLUE").unwrap().rows.len(), 2);
        assert_eq!(reader.search("  ").unwrap().rows.len(), 2);
        assert!(reader.search("nothing-here").unwrap().rows.is_empty());
    }

    #[test]
    fn bad_search_pattern_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let reader = IndexReader::open(&build_index(tmp.path(), true)).unwrap();
        let err = reader.search("(unclosed").unwrap_err();
        assert_eq!(err.code(), "NEBBY-1001");
    }

    #[test]
    fn invalid_records_are_listed_and_counted() {
        let tmp = TempDir::new().unwrap();
        let reader = IndexReader::open(&build_index(tmp.path(), true)).unwrap();
        assert_eq!(reader.count_invalid().unwrap(), 1);
        assert_eq!(
            reader.invalid_records().unwrap(),
            vec![InvalidRecord {
                filename: "loose".into(),
                path: "/lib/loose".into(),
            }]
        );
    }

    #[test]
    fn missing_invalid_table_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let reader = IndexReader::open(&build_index(tmp.path(), false)).unwrap();
        assert_eq!(reader.count_invalid().unwrap(), 0);
        assert!(reader.invalid_records().unwrap().is_empty());
    }

    #[test]
    fn open_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let err = IndexReader::open(&tmp.path().join("nope.db")).err().unwrap();
        assert_eq!(err.code(), "NEBBY-3002");
        assert!(!tmp.path().join("nope.db").exists());
    }

    #[test]
    fn file_without_valid_table_is_sql_error() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("other.db");
        Connection::open(&db)
            .unwrap()
            .execute_batch("CREATE TABLE t (x TEXT)")
            .unwrap();
        let reader = IndexReader::open(&db).unwrap();
        assert_eq!(reader.valid_table().unwrap_err().code(), "NEBBY-2102");
    }
}
