//! NEBBY-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, NebbyError>;

/// Top-level error type for nebby.
#[derive(Debug, Error)]
pub enum NebbyError {
    #[error("[NEBBY-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[NEBBY-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[NEBBY-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[NEBBY-1101] invalid column list: {details}")]
    InvalidColumns { details: String },

    #[error("[NEBBY-1102] invalid splitter {value:?}: must be empty or a single character")]
    InvalidSplitter { value: String },

    #[error("[NEBBY-1201] session cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("[NEBBY-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[NEBBY-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[NEBBY-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[NEBBY-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl NebbyError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "NEBBY-1001",
            Self::MissingConfig { .. } => "NEBBY-1002",
            Self::ConfigParse { .. } => "NEBBY-1003",
            Self::InvalidColumns { .. } => "NEBBY-1101",
            Self::InvalidSplitter { .. } => "NEBBY-1102",
            Self::InvalidState { .. } => "NEBBY-1201",
            Self::Serialization { .. } => "NEBBY-2101",
            Self::Sql { .. } => "NEBBY-2102",
            Self::Io { .. } => "NEBBY-3002",
            Self::Runtime { .. } => "NEBBY-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Nothing in the indexer retries automatically; callers use this to decide
    /// whether offering a retry to the user makes sense.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Sql { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// SQL error tagged with the step that produced it.
    #[must_use]
    pub fn sql(context: &'static str, source: &rusqlite::Error) -> Self {
        Self::Sql {
            context,
            details: source.to_string(),
        }
    }
}

impl From<rusqlite::Error> for NebbyError {
    fn from(value: rusqlite::Error) -> Self {
        Self::sql("rusqlite", &value)
    }
}

impl From<serde_json::Error> for NebbyError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for NebbyError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<NebbyError> {
        vec![
            NebbyError::InvalidConfig {
                details: String::new(),
            },
            NebbyError::MissingConfig {
                path: PathBuf::new(),
            },
            NebbyError::ConfigParse {
                context: "",
                details: String::new(),
            },
            NebbyError::InvalidColumns {
                details: String::new(),
            },
            NebbyError::InvalidSplitter {
                value: String::new(),
            },
            NebbyError::InvalidState {
                action: "start",
                state: "visiting",
            },
            NebbyError::Serialization {
                context: "",
                details: String::new(),
            },
            NebbyError::Sql {
                context: "",
                details: String::new(),
            },
            NebbyError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            NebbyError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(NebbyError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain {}: {msg}",
                err.code()
            );
        }
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(NebbyError::io("/tmp/x", std::io::Error::other("disk")).is_retryable());
        assert!(
            NebbyError::Sql {
                context: "",
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !NebbyError::InvalidColumns {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !NebbyError::InvalidState {
                action: "start",
                state: "writing"
            }
            .is_retryable()
        );
    }

    #[test]
    fn invalid_splitter_message_shows_value() {
        let err = NebbyError::InvalidSplitter {
            value: "--".to_string(),
        };
        assert!(err.to_string().contains("\"--\""));
        assert_eq!(err.code(), "NEBBY-1102");
    }

    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: NebbyError = sql_err.into();
        assert_eq!(err.code(), "NEBBY-2102");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: NebbyError = json_err.into();
        assert_eq!(err.code(), "NEBBY-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: NebbyError = toml_err.into();
        assert_eq!(err.code(), "NEBBY-1003");
    }
}
