//! Column list and splitter parsing, plus the SQL schema builder for the
//! `valid` and `invalid` tables.
//!
//! Column names come from user input and cannot be bound as SQL parameters, so
//! every name is checked against a safe identifier pattern and quoted before it
//! is interpolated into DDL or DML.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{NebbyError, Result};

/// Column names owned by the schema itself.
pub const RESERVED_COLUMNS: [&str; 2] = ["id", "path"];

/// Ordered list of destination column names.
///
/// Order is significant: fragment `i` of a split name lands in column `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec(Vec<String>);

impl ColumnSpec {
    /// Parse a comma-separated list, trimming whitespace and dropping empty
    /// entries. Parsing never fails; use [`ColumnSpec::validate`] before the
    /// names reach SQL.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Check every name against the safe identifier set, the reserved names,
    /// and each other. SQLite identifiers are case-insensitive, so collisions
    /// are too.
    pub fn validate(&self) -> Result<()> {
        let mut seen: Vec<String> = Vec::with_capacity(self.0.len());
        for name in &self.0 {
            if !identifier_pattern().is_match(name) {
                return Err(NebbyError::InvalidColumns {
                    details: format!(
                        "{name:?} is not a valid column name (letters, digits and '_' only, \
                         not starting with a digit)"
                    ),
                });
            }
            let lowered = name.to_ascii_lowercase();
            if RESERVED_COLUMNS.contains(&lowered.as_str()) {
                return Err(NebbyError::InvalidColumns {
                    details: format!("{name:?} collides with a reserved column"),
                });
            }
            if seen.contains(&lowered) {
                return Err(NebbyError::InvalidColumns {
                    details: format!("{name:?} appears more than once"),
                });
            }
            seen.push(lowered);
        }
        Ok(())
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Field separator for directory names: nothing, or one literal character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Splitter(Option<char>);

impl Splitter {
    /// Parse user input. Empty means "do not split"; more than one character is
    /// rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Ok(Self(None)),
            (Some(c), None) => Ok(Self(Some(c))),
            (Some(_), Some(_)) => Err(NebbyError::InvalidSplitter {
                value: raw.to_string(),
            }),
        }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    #[must_use]
    pub const fn char(c: char) -> Self {
        Self(Some(c))
    }

    #[must_use]
    pub const fn as_char(self) -> Option<char> {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0.is_none()
    }
}

impl TryFrom<String> for Splitter {
    type Error = NebbyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Splitter> for String {
    fn from(value: Splitter) -> Self {
        value.0.map(Self::from).unwrap_or_default()
    }
}

impl fmt::Display for Splitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(c) => write!(f, "{c}"),
            None => Ok(()),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex")
    })
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

// ──────────────────── schema builder ────────────────────

/// DDL for the `valid` table. `columns` must already be validated.
pub(crate) fn create_valid_table_sql(columns: &ColumnSpec) -> String {
    let mut sql = String::from("CREATE TABLE IF NOT EXISTS valid (id INTEGER PRIMARY KEY AUTOINCREMENT");
    for name in columns.names() {
        sql.push_str(", ");
        sql.push_str(&quote(name));
        sql.push_str(" TEXT");
    }
    sql.push_str(", path TEXT NOT NULL)");
    sql
}

pub(crate) const CREATE_INVALID_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS invalid (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, \
     filename TEXT NOT NULL, \
     path TEXT NOT NULL)";

/// Insert for the `valid` table with one placeholder per stored column.
///
/// `field_count` is the number of split fields actually stored: the full column
/// list when splitting is active, zero otherwise.
pub(crate) fn insert_valid_sql(columns: &ColumnSpec, field_count: usize) -> String {
    let mut names: Vec<String> = columns
        .names()
        .iter()
        .take(field_count)
        .map(|name| quote(name))
        .collect();
    names.push("path".to_string());
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO valid ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

pub(crate) const INSERT_INVALID_SQL: &str = "INSERT INTO invalid (filename, path) VALUES (?1, ?2)";
