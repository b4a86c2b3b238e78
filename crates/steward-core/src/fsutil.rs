//! Filesystem helpers shared by the lifecycle and backup modules.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::error::Coded;

#[cfg(unix)]
const FILE_MODE: u32 = 0o666;
#[cfg(unix)]
const TREE_MODE: u32 = 0o777;

/// Whether `name` can be used as a single directory entry below a root.
///
/// Separators, NUL and a leading dot are refused, which also rules out `.`
/// and `..`.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

/// Makes a single file readable and writable by everyone.
pub(crate) fn widen_file(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Recursively opens a tree to companion tooling and operators.
pub(crate) fn widen_tree(root: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.path_is_symlink() {
                continue;
            }
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(TREE_MODE))?;
        }
    }
    #[cfg(not(unix))]
    let _ = root;
    Ok(())
}

/// Replaces `path` with `contents` through a sibling temporary file.
///
/// The payload is synced before the rename, so readers see either the old or
/// the new file, never a torn one. The result is widened like [`widen_file`].
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;
    let mut file = tempfile::Builder::new()
        .prefix(
            path.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("steward"),
        )
        .suffix(".partial")
        .tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    widen_file(path)
}

/// Errors raised while removing a directory tree.
#[derive(Debug, Error)]
pub enum RemoveTreeError {
    /// The directory does not exist.
    #[error("directory does not exist: '{path}'")]
    Missing {
        /// Missing directory.
        path: PathBuf,
    },
    /// The directory could not be removed.
    #[error("cannot remove directory '{path}': {source}")]
    Io {
        /// Directory that failed to delete.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Coded for RemoveTreeError {
    fn code(&self) -> u16 {
        match self {
            Self::Missing { .. } => 4043,
            Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => 4044,
            Self::Io { .. } => 4045,
        }
    }
}

/// Deletes a directory tree.
pub(crate) fn remove_tree(path: &Path) -> Result<(), RemoveTreeError> {
    fs::remove_dir_all(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            RemoveTreeError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            RemoveTreeError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Lists the names of the immediate subdirectories of `dir`.
///
/// Hidden entries are skipped; a missing directory yields an empty list.
pub(crate) fn subdirectories(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("My World", true)]
    #[case::parent("..", false)]
    #[case::current(".", false)]
    #[case::hidden(".staging", false)]
    #[case::nested("a/b", false)]
    #[case::backslash("a\\b", false)]
    #[case::empty("", false)]
    fn plain_names_stay_below_their_root(#[case] name: &str, #[case] plain: bool) {
        assert_eq!(is_plain_name(name), plain);
    }

    #[test]
    fn subdirectories_skip_files_and_hidden_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("b")).expect("b");
        fs::create_dir(temp.path().join("a")).expect("a");
        fs::create_dir(temp.path().join(".staging")).expect("hidden");
        fs::write(temp.path().join("file"), "x").expect("file");

        let names = subdirectories(temp.path()).expect("list");
        assert_eq!(names, ["a", "b"]);
        assert!(subdirectories(&temp.path().join("none"))
            .expect("missing dir")
            .is_empty());
    }

    #[test]
    fn remove_tree_reports_missing_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = remove_tree(&temp.path().join("gone")).expect_err("should fail");
        assert_eq!(error.code(), 4043);
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("player.json");
        atomic_write(&path, b"[]").expect("first write");
        atomic_write(&path, b"[{}]").expect("second write");
        assert_eq!(fs::read(&path).expect("read"), b"[{}]");
        let leftovers = fs::read_dir(temp.path()).expect("list").count();
        assert_eq!(leftovers, 1);
    }

    #[cfg(unix)]
    #[test]
    fn widen_tree_opens_nested_entries() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("w/db");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(nested.join("CURRENT"), "x").expect("file");
        widen_tree(&temp.path().join("w")).expect("widen");
        let mode = fs::metadata(nested.join("CURRENT"))
            .expect("meta")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o777);
    }
}
