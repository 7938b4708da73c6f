//! Record classification: does a directory name split into exactly the
//! configured columns?

use crate::indexer::walker::DirectoryRecord;
use crate::store::columns::{ColumnSpec, Splitter};

/// Where a record ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Row for the `valid` table. `fields` is empty when splitting is off.
    Valid { fields: Vec<String>, path: String },
    /// Row for the `invalid` table.
    Invalid { filename: String, path: String },
}

impl Classification {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Classify one record.
///
/// With an empty splitter or an empty column list every record is valid and
/// carries no fields. Otherwise the name is split on each literal occurrence of
/// the splitter, empty fragments included, and is valid only when the fragment
/// count equals the column count.
#[must_use]
pub fn classify(record: &DirectoryRecord, splitter: Splitter, columns: &ColumnSpec) -> Classification {
    let path = record.path_string();
    let Some(sep) = splitter.as_char() else {
        return Classification::Valid {
            fields: Vec::new(),
            path,
        };
    };
    if columns.is_empty() {
        return Classification::Valid {
            fields: Vec::new(),
            path,
        };
    }

    let fields: Vec<String> = record.name.split(sep).map(str::to_string).collect();
    if fields.len() == columns.len() {
        Classification::Valid { fields, path }
    } else {
        Classification::Invalid {
            filename: record.name.clone(),
            path,
        }
    }
}
