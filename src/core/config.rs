//! Configuration: TOML file, then environment overrides, then validation.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{NebbyError, Result};
use crate::indexer::walker::{WalkerConfig, default_parallelism};
use crate::store::columns::{ColumnSpec, Splitter};
use crate::store::writer::WriteOptions;

/// Full nebby configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub walker: WalkerSection,
    pub index: IndexSection,
    pub paths: PathsConfig,
}

/// Directory traversal knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalkerSection {
    /// Visit-phase worker threads.
    pub parallelism: usize,
    pub follow_symlinks: bool,
}

/// Defaults for `nebby index` when the command line leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexSection {
    pub splitter: Splitter,
    pub columns: ColumnSpec,
    pub keep_invalid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Remembers the most recently created or opened database.
    pub recent_file: PathBuf,
    /// JSONL activity log.
    pub activity_log: PathBuf,
}

impl Default for WalkerSection {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            follow_symlinks: false,
        }
    }
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            splitter: Splitter::char('_'),
            columns: ColumnSpec::default(),
            keep_invalid: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[NEBBY-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let data = home_dir.join(".local").join("share").join("nebby");
        Self {
            config_file: home_dir.join(".config").join("nebby").join("config.toml"),
            recent_file: data.join("recent.json"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl WalkerSection {
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            parallelism: self.parallelism,
            follow_symlinks: self.follow_symlinks,
        }
    }
}

impl IndexSection {
    #[must_use]
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            splitter: self.splitter,
            columns: self.columns.clone(),
            keep_invalid: self.keep_invalid,
        }
    }
}

impl Config {
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from the default or an explicit path, then apply env
    /// overrides.
    ///
    /// A missing file at the default path yields defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|e| NebbyError::io(&path_buf, e))?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(NebbyError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("NEBBY_WALKER_PARALLELISM") {
            self.walker.parallelism = parse_env("NEBBY_WALKER_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("NEBBY_WALKER_FOLLOW_SYMLINKS") {
            self.walker.follow_symlinks = parse_env("NEBBY_WALKER_FOLLOW_SYMLINKS", &raw)?;
        }

        if let Some(raw) = lookup("NEBBY_INDEX_SPLITTER") {
            self.index.splitter = Splitter::parse(&raw)?;
        }
        if let Some(raw) = lookup("NEBBY_INDEX_COLUMNS") {
            self.index.columns = ColumnSpec::parse(&raw);
        }
        if let Some(raw) = lookup("NEBBY_INDEX_KEEP_INVALID") {
            self.index.keep_invalid = parse_env("NEBBY_INDEX_KEEP_INVALID", &raw)?;
        }

        if let Some(raw) = lookup("NEBBY_RECENT_FILE").filter(|raw| !raw.trim().is_empty()) {
            self.paths.recent_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("NEBBY_ACTIVITY_LOG").filter(|raw| !raw.trim().is_empty()) {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.walker.parallelism == 0 {
            return Err(NebbyError::InvalidConfig {
                details: "walker.parallelism must be >= 1".to_string(),
            });
        }
        self.index.columns.validate()?;
        Ok(())
    }
}

/// Blank values count as unset, except for the splitter where empty means
/// "do not split".
fn env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(raw) if name == "NEBBY_INDEX_SPLITTER" => Some(raw),
        Ok(raw) => Some(raw).filter(|raw| !raw.trim().is_empty()),
        Err(_) => None,
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| NebbyError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, NebbyError};
    use crate::store::columns::Splitter;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.walker.parallelism >= 1);
        assert_eq!(cfg.index.splitter, Splitter::char('_'));
        assert!(cfg.index.keep_invalid);
    }

    #[test]
    fn default_paths_live_under_nebby_dirs() {
        let cfg = Config::default();
        assert!(cfg.paths.config_file.ends_with(".config/nebby/config.toml"));
        assert!(cfg.paths.recent_file.ends_with("nebby/recent.json"));
        assert!(cfg.paths.activity_log.ends_with("nebby/activity.jsonl"));
    }

    #[test]
    fn toml_sections_are_parsed() {
        let raw = r#"
            [walker]
            parallelism = 3
            follow_symlinks = true

            [index]
            splitter = "-"
            columns = ["artist", "album"]
            keep_invalid = false
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.walker.parallelism, 3);
        assert!(cfg.walker.follow_symlinks);
        assert_eq!(cfg.index.splitter, Splitter::char('-'));
        assert_eq!(cfg.index.columns.names(), ["artist", "album"]);
        assert!(!cfg.index.keep_invalid);
    }

    #[test]
    fn multi_char_splitter_in_toml_is_rejected() {
        let err = toml::from_str::<Config>("[index]\nsplitter = \"ab\"\n").unwrap_err();
        assert!(err.to_string().contains("NEBBY-1102"), "{err}");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("NEBBY_WALKER_PARALLELISM", "7"),
            ("NEBBY_WALKER_FOLLOW_SYMLINKS", "true"),
            ("NEBBY_INDEX_SPLITTER", ""),
            ("NEBBY_INDEX_COLUMNS", "a, b"),
            ("NEBBY_INDEX_KEEP_INVALID", "false"),
            ("NEBBY_RECENT_FILE", "/tmp/nebby/recent.json"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .unwrap();

        assert_eq!(cfg.walker.parallelism, 7);
        assert!(cfg.walker.follow_symlinks);
        assert!(cfg.index.splitter.is_empty());
        assert_eq!(cfg.index.columns.names(), ["a", "b"]);
        assert!(!cfg.index.keep_invalid);
        assert_eq!(
            cfg.paths.recent_file,
            PathBuf::from("/tmp/nebby/recent.json")
        );
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("NEBBY_INDEX_KEEP_INVALID", "yes-please")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .unwrap_err();
        match err {
            NebbyError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("NEBBY_INDEX_KEEP_INVALID"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.walker.parallelism = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn reserved_default_column_rejected() {
        let mut cfg = Config::default();
        cfg.index.columns = crate::store::columns::ColumnSpec::parse("name,path");
        assert_eq!(cfg.validate().unwrap_err().code(), "NEBBY-1101");
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/nebby/config.toml"))).unwrap_err();
        assert!(matches!(err, NebbyError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[walker]\nparallelism = 2\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        let mut modified = cfg.clone();
        modified.index.keep_invalid = false;
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }
}
