//! Flat `key=value` property files.
//!
//! Every piece of persisted configuration (instance state, default and start
//! overrides, the materialized server configuration, backup records) is a
//! property file. [`Properties`] keeps insertion order so written files read
//! back in the order they were produced.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::error::Coded;

const PROPERTIES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::properties");

/// Insertion-ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets `key`, keeping its original position when it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Overlays `other` on top of `self`; later values win.
    pub fn extend_from(&mut self, other: &Self) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Iterates over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.insert(key, value);
        }
        properties
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Properties {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Errors raised while reading, writing or merging property files.
#[derive(Debug, Error)]
pub enum PropertiesError {
    /// The file does not exist.
    #[error("properties file not found: '{path}'")]
    NotFound {
        /// Missing file.
        path: PathBuf,
    },
    /// The file exists but could not be read or decoded.
    #[error("cannot read properties file '{path}': {source}")]
    Read {
        /// Unreadable file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// One input of a merge failed; the merge was aborted.
    #[error("cannot merge properties: input '{path}' failed")]
    MergeInput {
        /// Input that failed.
        path: PathBuf,
        /// The read failure.
        #[source]
        source: Box<PropertiesError>,
    },
    /// The merged result could not be persisted.
    #[error("cannot write merged properties to '{path}'")]
    MergeOutput {
        /// Output file.
        path: PathBuf,
        /// The write failure.
        #[source]
        source: Box<PropertiesError>,
    },
    /// Writing the file failed.
    #[error("cannot write properties file '{path}': {source}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl PropertiesError {
    /// Whether the failure is a missing file.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Coded for PropertiesError {
    fn code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 4011,
            Self::Read { .. } => 4012,
            Self::MergeInput { .. } => 4021,
            Self::MergeOutput { .. } => 4023,
            Self::Write { .. } => 4031,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::MergeInput { source, .. } | Self::MergeOutput { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

/// Parses a property file.
///
/// Blank lines, `#` comments and lines without `=` are skipped. Each line is
/// split on its first `=` and both sides are trimmed. A repeated key keeps
/// its first position and its last value.
pub fn read(path: &Path) -> Result<Properties, PropertiesError> {
    Ok(read_entries(path)?.into_iter().collect())
}

/// Parses a property file keeping every line, repeated keys included.
pub fn read_entries(path: &Path) -> Result<Vec<(String, String)>, PropertiesError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PropertiesError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            PropertiesError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| PropertiesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some((key, value)) = parse_line(&line) {
            entries.push((key.to_owned(), value.to_owned()));
        }
    }
    Ok(entries)
}

/// Parses a property file, treating a missing file as empty.
pub fn read_or_default(path: &Path) -> Result<Properties, PropertiesError> {
    match read(path) {
        Err(error) if error.is_not_found() => Ok(Properties::new()),
        other => other,
    }
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Serialises `properties` as `key=value` lines and widens the file mode.
pub fn write(path: &Path, properties: &Properties) -> Result<(), PropertiesError> {
    write_entries(path, properties.iter())
}

/// Writes `entries` as `key=value` lines in the given order.
///
/// Unlike [`write`] repeated keys are kept.
pub fn write_entries<'a, I>(path: &Path, entries: I) -> Result<(), PropertiesError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let map_err = |source| PropertiesError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(map_err)?;
    let mut writer = BufWriter::new(file);
    let mut count = 0_usize;
    for (key, value) in entries {
        writeln!(writer, "{key}={value}").map_err(map_err)?;
        count += 1;
    }
    writer.flush().map_err(map_err)?;
    crate::fsutil::widen_file(path).map_err(map_err)?;
    debug!(
        target: PROPERTIES_TARGET,
        file = %path.display(),
        entries = count,
        "properties written"
    );
    Ok(())
}

/// Reads `files` in order and overlays them; later files win on conflicts.
///
/// When `out` is given the merged result is also persisted there. The first
/// input that fails aborts the merge.
pub fn merge(files: &[&Path], out: Option<&Path>) -> Result<Properties, PropertiesError> {
    let mut merged = Properties::new();
    for file in files {
        let properties = read(file).map_err(|source| PropertiesError::MergeInput {
            path: file.to_path_buf(),
            source: Box::new(source),
        })?;
        merged.extend_from(&properties);
    }
    if let Some(out) = out {
        write(out, &merged).map_err(|source| PropertiesError::MergeOutput {
            path: out.to_path_buf(),
            source: Box::new(source),
        })?;
    }
    Ok(merged)
}

/// Modification time of a file, or `None` when it does not exist.
#[must_use]
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests;
