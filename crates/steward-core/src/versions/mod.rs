//! Distribution versions, branches and the local archive cache.
//!
//! Archives are cached as `<downloads>/<branch>/<version>.zip`. Versions are
//! dot-separated integer tuples compared element by element, so `1.9.0`
//! sorts before `1.10.0`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use steward_config::{Layout, create_shared_dir};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::Coded;

mod catalog;

pub use catalog::{Catalog, HttpCatalog, OnlineVersions};

#[cfg(test)]
pub use catalog::MockCatalog;

const VERSIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::versions");
const ARCHIVE_EXTENSION: &str = "zip";

/// Distribution channel.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Release builds.
    #[default]
    Stable,
    /// Preview builds.
    Preview,
}

/// A dot-separated integer version such as `1.21.2.02`.
///
/// Equality and ordering look at the integer components only.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
    text: String,
}

impl Version {
    /// The integer components.
    #[must_use]
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// The version as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim();
        let invalid = || VersionError::Invalid {
            value: value.to_owned(),
        };
        if text.is_empty() {
            return Err(invalid());
        }
        let parts = text
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            parts,
            text: text.to_owned(),
        })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.text)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// Compares two version strings numerically.
///
/// # Errors
///
/// Fails when either side is not a dot-separated integer tuple.
pub fn compare(left: &str, right: &str) -> Result<Ordering, VersionError> {
    Ok(left.parse::<Version>()?.cmp(&right.parse::<Version>()?))
}

/// Errors raised while resolving, downloading or listing versions.
#[derive(Debug, Error)]
pub enum VersionError {
    /// The download page did not contain any recognisable archive link.
    #[error("cannot find any version on '{url}'")]
    UnparseablePage {
        /// Scraped page.
        url: String,
    },
    /// The server answered with an error status.
    #[error("request to '{url}' failed with status {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The request could not be completed.
    #[error("request to '{url}' failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport failure description.
        message: String,
    },
    /// The response body could not be read.
    #[error("cannot read response from '{url}': {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The branch has no version online.
    #[error("no online version available for branch {branch}")]
    NoOnlineVersion {
        /// Requested branch.
        branch: Branch,
    },
    /// Fetching the archive failed.
    #[error("cannot download version {version} ({branch})")]
    Transfer {
        /// Requested branch.
        branch: Branch,
        /// Requested version.
        version: String,
        /// The fetch failure.
        #[source]
        source: Box<VersionError>,
    },
    /// The archive cache could not be written.
    #[error("cannot store archive '{path}': {source}")]
    Cache {
        /// Cache path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A version string is not a dot-separated integer tuple.
    #[error("invalid version '{value}'")]
    Invalid {
        /// Rejected input.
        value: String,
    },
    /// The archive cache could not be listed.
    #[error("cannot list downloaded versions in '{path}': {source}")]
    ListDownloads {
        /// Cache directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Coded for VersionError {
    fn code(&self) -> u16 {
        match self {
            Self::UnparseablePage { .. } => 1101,
            Self::HttpStatus { .. } => 1102,
            Self::Transport { .. } => 1103,
            Self::Body { .. } => 1104,
            Self::NoOnlineVersion { .. } => 1111,
            Self::Transfer { .. } => 1112,
            Self::Cache { .. } => 1113,
            Self::Invalid { .. } => 1121,
            Self::ListDownloads { .. } => 1122,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Transfer { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Whether a download actually transferred anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DownloadState {
    /// The archive was fetched.
    Downloaded,
    /// The archive was already cached.
    AlreadyDownloaded,
}

/// Result of [`download`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadOutcome {
    /// Branch of the archive.
    pub branch: Branch,
    /// Version of the archive.
    pub version: Version,
    /// What happened.
    pub state: DownloadState,
}

/// Cache path of an archive.
#[must_use]
pub fn archive_path(layout: &Layout, branch: Branch, version: &Version) -> PathBuf {
    layout
        .downloads_dir()
        .join(branch.to_string())
        .join(format!("{version}.{ARCHIVE_EXTENSION}"))
}

/// Cached versions per branch, ascending.
///
/// # Errors
///
/// Fails when a branch directory exists but cannot be listed.
pub fn downloaded_versions(layout: &Layout) -> Result<BTreeMap<Branch, Vec<Version>>, VersionError> {
    let mut found = BTreeMap::new();
    for branch in Branch::iter() {
        let directory = layout.downloads_dir().join(branch.to_string());
        found.insert(branch, cached_in(&directory)?);
    }
    Ok(found)
}

fn cached_in(directory: &Path) -> Result<Vec<Version>, VersionError> {
    let list_error = |source| VersionError::ListDownloads {
        path: directory.to_path_buf(),
        source,
    };
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(list_error(error)),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let path = entry.map_err(list_error)?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(ARCHIVE_EXTENSION) {
            continue;
        }
        if let Some(version) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<Version>().ok())
        {
            versions.push(version);
        }
    }
    versions.sort();
    Ok(versions)
}

/// Highest cached version of `branch`.
///
/// # Errors
///
/// Fails when the branch directory cannot be listed.
pub fn latest_downloaded(layout: &Layout, branch: Branch) -> Result<Option<Version>, VersionError> {
    let directory = layout.downloads_dir().join(branch.to_string());
    Ok(cached_in(&directory)?.pop())
}

/// Current online version of `branch`.
///
/// # Errors
///
/// Propagates catalogue failures and reports a branch without any version.
pub fn online_version(catalog: &dyn Catalog, branch: Branch) -> Result<Version, VersionError> {
    catalog
        .online_versions()?
        .get(branch)
        .cloned()
        .ok_or(VersionError::NoOnlineVersion { branch })
}

/// Ensures an archive is cached, fetching it when missing.
///
/// Without an explicit `version` the current online version is used. The
/// archive is fetched into a sibling temporary file and renamed into place.
///
/// # Errors
///
/// Fails when the version cannot be resolved, the transfer fails or the cache
/// cannot be written.
pub fn download(
    layout: &Layout,
    catalog: &dyn Catalog,
    branch: Branch,
    version: Option<Version>,
) -> Result<DownloadOutcome, VersionError> {
    let version = match version {
        Some(version) => version,
        None => online_version(catalog, branch)?,
    };
    let target = archive_path(layout, branch, &version);
    if target.is_file() {
        debug!(target: VERSIONS_TARGET, %branch, %version, "archive already cached");
        return Ok(DownloadOutcome {
            branch,
            version,
            state: DownloadState::AlreadyDownloaded,
        });
    }
    let directory = layout.downloads_dir().join(branch.to_string());
    create_shared_dir(&directory).map_err(|error| VersionError::Cache {
        path: directory.clone(),
        source: io::Error::other(error),
    })?;
    let cache_error = |source| VersionError::Cache {
        path: target.clone(),
        source,
    };
    let staging = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".partial")
        .tempfile_in(&directory)
        .map_err(cache_error)?;
    catalog
        .fetch(branch, &version, staging.path())
        .map_err(|source| VersionError::Transfer {
            branch,
            version: version.to_string(),
            source: Box::new(source),
        })?;
    staging
        .persist(&target)
        .map_err(|error| cache_error(error.error))?;
    crate::fsutil::widen_file(&target).map_err(cache_error)?;
    info!(target: VERSIONS_TARGET, %branch, %version, "archive downloaded");
    Ok(DownloadOutcome {
        branch,
        version,
        state: DownloadState::Downloaded,
    })
}

#[cfg(test)]
mod tests;
