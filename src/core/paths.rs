//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute relative to the current directory and resolve `.`/`..`
/// syntactically.
///
/// Symlinks are left in place: records keep the path the user asked to index,
/// not wherever its links happen to point.
pub fn absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    normalize_syntactic(&absolute)
}

/// Append a `.db` extension unless the path already ends in one
/// (case-insensitive).
pub fn with_db_extension(path: &Path) -> PathBuf {
    let has_db = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("db"));
    if has_db {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".db");
    PathBuf::from(name)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_is_joined_to_cwd() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(absolute_path(Path::new("a/b")), cwd.join("a").join("b"));
    }

    #[cfg(unix)]
    #[test]
    fn dot_components_are_resolved() {
        let resolved = absolute_path(Path::new("/data/./photos/../music"));
        assert_eq!(resolved, Path::new("/data/music"));
    }

    #[cfg(unix)]
    #[test]
    fn handles_parent_at_root() {
        assert_eq!(normalize_syntactic(Path::new("/../foo")), Path::new("/foo"));
    }

    #[test]
    fn db_extension_is_appended_once() {
        assert_eq!(with_db_extension(Path::new("index")), Path::new("index.db"));
        assert_eq!(
            with_db_extension(Path::new("index.db")),
            Path::new("index.db")
        );
        assert_eq!(
            with_db_extension(Path::new("INDEX.DB")),
            Path::new("INDEX.DB")
        );
        assert_eq!(
            with_db_extension(Path::new("archive.sqlite")),
            Path::new("archive.sqlite.db")
        );
    }
}
