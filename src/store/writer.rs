//! Transactional writer for the `valid` / `invalid` tables.
//!
//! A run is all-or-nothing: tables and rows are created inside one transaction,
//! and a database file that did not exist before a failed run is removed
//! again.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use serde::Serialize;

use crate::core::errors::{NebbyError, Result};
use crate::indexer::walker::DirectoryRecord;
use crate::store::classify::{Classification, classify};
use crate::store::columns::{
    CREATE_INVALID_TABLE_SQL, ColumnSpec, INSERT_INVALID_SQL, Splitter, create_valid_table_sql,
    insert_valid_sql,
};

/// How records are split and where rejected records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub splitter: Splitter,
    pub columns: ColumnSpec,
    /// Store unsplittable records in `invalid` instead of dropping them.
    pub keep_invalid: bool,
}

impl WriteOptions {
    /// Split fields actually stored per valid row.
    fn field_count(&self) -> usize {
        if self.splitter.is_empty() {
            0
        } else {
            self.columns.len()
        }
    }
}

/// Row counts of one committed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub database: PathBuf,
    pub valid_rows: u64,
    pub invalid_rows: u64,
    /// Invalid records discarded because `keep_invalid` was off.
    pub dropped_rows: u64,
}

pub struct DatabaseWriter {
    path: PathBuf,
    options: WriteOptions,
}

impl DatabaseWriter {
    pub fn new(path: impl Into<PathBuf>, options: WriteOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Classify and insert every record in a single transaction.
    ///
    /// Column names are validated before the file is touched. On failure
    /// nothing from this run is visible in the database.
    pub fn write(&self, records: &[DirectoryRecord]) -> Result<WriteSummary> {
        self.options.columns.validate()?;

        let existed = self.path.exists();
        let result = self.write_transaction(records);
        if result.is_err() && !existed {
            remove_partial_database(&self.path);
        }
        result
    }

    fn write_transaction(&self, records: &[DirectoryRecord]) -> Result<WriteSummary> {
        let mut conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| NebbyError::sql("open database", &e))?;

        let rows: Vec<Classification> = records
            .iter()
            .map(|record| classify(record, self.options.splitter, &self.options.columns))
            .collect();

        let mut summary = WriteSummary {
            database: self.path.clone(),
            valid_rows: 0,
            invalid_rows: 0,
            dropped_rows: 0,
        };

        let tx = conn
            .transaction()
            .map_err(|e| NebbyError::sql("begin transaction", &e))?;

        tx.execute_batch(&create_valid_table_sql(&self.options.columns))
            .map_err(|e| NebbyError::sql("create valid table", &e))?;
        if self.options.keep_invalid {
            tx.execute_batch(CREATE_INVALID_TABLE_SQL)
                .map_err(|e| NebbyError::sql("create invalid table", &e))?;
        }

        {
            let mut insert_valid = tx
                .prepare(&insert_valid_sql(
                    &self.options.columns,
                    self.options.field_count(),
                ))
                .map_err(|e| NebbyError::sql("prepare valid insert", &e))?;
            let mut insert_invalid = if self.options.keep_invalid {
                Some(
                    tx.prepare(INSERT_INVALID_SQL)
                        .map_err(|e| NebbyError::sql("prepare invalid insert", &e))?,
                )
            } else {
                None
            };

            for row in &rows {
                match row {
                    Classification::Valid { fields, path } => {
                        insert_valid
                            .execute(params_from_iter(fields.iter().chain(iter::once(path))))
                            .map_err(|e| NebbyError::sql("insert valid row", &e))?;
                        summary.valid_rows += 1;
                    }
                    Classification::Invalid { filename, path } => match insert_invalid.as_mut() {
                        Some(stmt) => {
                            stmt.execute(params![filename, path])
                                .map_err(|e| NebbyError::sql("insert invalid row", &e))?;
                            summary.invalid_rows += 1;
                        }
                        None => summary.dropped_rows += 1,
                    },
                }
            }
        }

        tx.commit().map_err(|e| NebbyError::sql("commit", &e))?;
        Ok(summary)
    }
}

fn remove_partial_database(path: &Path) {
    for candidate in [path.to_path_buf(), journal_path(path)] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => eprintln!(
                "[NEBBY-WRITER] failed to remove partial database {}: {e}",
                candidate.display()
            ),
        }
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> DirectoryRecord {
        DirectoryRecord {
            name: name.to_string(),
            full_path: PathBuf::from("/root").join(name),
        }
    }

    fn options(splitter: char, columns: &str, keep_invalid: bool) -> WriteOptions {
        WriteOptions {
            splitter: Splitter::char(splitter),
            columns: ColumnSpec::parse(columns),
            keep_invalid,
        }
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    fn valid_rows(conn: &Connection) -> Vec<(String, String, String)> {
        let mut stmt = conn
            .prepare("SELECT a, b, path FROM valid ORDER BY path")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn writes_valid_and_invalid_rows() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let writer = DatabaseWriter::new(&db, options('_', "a,b", true));

        let summary = writer
            .write(&[record("x_y"), record("p_q"), record("x_y_z"), record("xy")])
            .unwrap();

        assert_eq!(summary.valid_rows, 2);
        assert_eq!(summary.invalid_rows, 2);
        assert_eq!(summary.dropped_rows, 0);

        let conn = Connection::open(&db).unwrap();
        assert_eq!(
            valid_rows(&conn),
            vec![
                ("p".into(), "q".into(), "/root/p_q".into()),
                ("x".into(), "y".into(), "/root/x_y".into()),
            ]
        );
        let invalid: i64 = conn
            .query_row("SELECT COUNT(*) FROM invalid", [], |row| row.get(0))
            .unwrap();
        assert_eq!(invalid, 2);
    }

    #[test]
    fn skip_invalid_creates_no_invalid_table() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let writer = DatabaseWriter::new(&db, options('_', "a,b", false));

        let summary = writer.write(&[record("x_y"), record("xyz")]).unwrap();

        assert_eq!(summary.valid_rows, 1);
        assert_eq!(summary.dropped_rows, 1);
        let conn = Connection::open(&db).unwrap();
        assert!(table_exists(&conn, "valid"));
        assert!(!table_exists(&conn, "invalid"));
        let all_paths: Vec<String> = conn
            .prepare("SELECT path FROM valid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(all_paths, vec!["/root/x_y".to_string()]);
    }

    #[test]
    fn empty_splitter_stores_path_only() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let writer = DatabaseWriter::new(
            &db,
            WriteOptions {
                splitter: Splitter::none(),
                columns: ColumnSpec::parse("a,b"),
                keep_invalid: true,
            },
        );

        let summary = writer.write(&[record("x_y_z")]).unwrap();
        assert_eq!(summary.valid_rows, 1);

        let conn = Connection::open(&db).unwrap();
        let (a, path): (Option<String>, String) = conn
            .query_row("SELECT a, path FROM valid", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(a, None);
        assert_eq!(path, "/root/x_y_z");
    }

    #[test]
    fn reserved_column_fails_without_creating_file() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let writer = DatabaseWriter::new(&db, options('_', "a,path", true));

        let err = writer.write(&[record("x_y")]).unwrap_err();

        assert_eq!(err.code(), "NEBBY-1101");
        assert!(!db.exists());
    }

    #[test]
    fn unwritable_destination_is_reported() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("missing-dir").join("index.db");
        let writer = DatabaseWriter::new(&db, options('_', "a,b", true));

        let err = writer.write(&[record("x_y")]).unwrap_err();

        assert_eq!(err.code(), "NEBBY-2102");
        assert!(!db.exists());
    }

    #[test]
    fn failed_run_leaves_existing_database_untouched() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        DatabaseWriter::new(&db, options('_', "a,b", false))
            .write(&[record("x_y")])
            .unwrap();

        // Existing `valid` has no column `c`: the insert fails after the
        // `invalid` table was created inside the transaction.
        let err = DatabaseWriter::new(&db, options('_', "c", true))
            .write(&[record("k_l"), record("m")])
            .unwrap_err();
        assert_eq!(err.code(), "NEBBY-2102");

        assert!(db.exists());
        let conn = Connection::open(&db).unwrap();
        assert!(!table_exists(&conn, "invalid"), "DDL rolled back");
        assert_eq!(valid_rows(&conn).len(), 1);
    }

    #[test]
    fn repeated_runs_append_rows() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let writer = DatabaseWriter::new(&db, options('_', "a,b", true));
        writer.write(&[record("x_y")]).unwrap();
        writer.write(&[record("x_y")]).unwrap();

        let conn = Connection::open(&db).unwrap();
        assert_eq!(valid_rows(&conn).len(), 2);
    }

    #[test]
    fn empty_record_set_still_creates_schema() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        let summary = DatabaseWriter::new(&db, options('_', "a,b", true))
            .write(&[])
            .unwrap();
        assert_eq!(summary.valid_rows, 0);

        let conn = Connection::open(&db).unwrap();
        assert!(table_exists(&conn, "valid"));
        assert!(table_exists(&conn, "invalid"));
    }
}
