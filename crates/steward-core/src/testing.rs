//! Doubles shared by unit and integration tests.
//!
//! Available with the `test-support` feature. [`StaticCatalog`] serves
//! synthetic distribution archives so lifecycle flows run without network
//! access or a real server binary.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use steward_config::{Layout, create_shared_dir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::versions::{
    Branch, Catalog, OnlineVersions, Version, VersionError, archive_path,
};

/// Properties shipped inside every synthetic distribution.
pub const SHIPPED_PROPERTIES: &str = "\
server-name=Dedicated Server
gamemode=survival
difficulty=easy
server-port=19132
server-portv6=19133
level-name=Bedrock level
";

/// Writes a minimal distribution archive to `path`.
///
/// # Errors
///
/// Propagates IO and archive encoding failures.
pub fn write_distribution(path: &Path, version: &str) -> io::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    let entries: [(&str, String); 5] = [
        ("bedrock_server", String::from("#!/bin/sh\nexit 0\n")),
        ("server.properties", String::from(SHIPPED_PROPERTIES)),
        ("permissions.json", String::from("[]\n")),
        ("allowlist.json", String::from("[]\n")),
        ("release-notes.txt", format!("version {version}\n")),
    ];
    for (name, contents) in entries {
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(contents.as_bytes())?;
    }
    zip.add_directory("behavior_packs/", options)
        .map_err(io::Error::other)?;
    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

/// Places a synthetic archive in the download cache.
///
/// # Errors
///
/// Propagates directory creation and archive write failures.
pub fn seed_download(layout: &Layout, branch: Branch, version: &str) -> io::Result<()> {
    let parsed: Version = version.parse().map_err(io::Error::other)?;
    let path = archive_path(layout, branch, &parsed);
    if let Some(parent) = path.parent() {
        create_shared_dir(parent).map_err(io::Error::other)?;
    }
    write_distribution(&path, version)
}

/// Catalogue with fixed online versions that serves synthetic archives.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    versions: OnlineVersions,
    fetches: AtomicUsize,
}

impl StaticCatalog {
    /// Catalogue advertising `stable` and optionally `preview`.
    ///
    /// Unparseable inputs are treated as absent.
    #[must_use]
    pub fn new(stable: &str, preview: Option<&str>) -> Self {
        Self {
            versions: OnlineVersions {
                stable: stable.parse().ok(),
                preview: preview.and_then(|version| version.parse().ok()),
            },
            fetches: AtomicUsize::new(0),
        }
    }

    /// Catalogue that advertises nothing.
    #[must_use]
    pub fn offline() -> Self {
        Self::default()
    }

    /// Number of archives served so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Catalog for StaticCatalog {
    fn online_versions(&self) -> Result<OnlineVersions, VersionError> {
        Ok(self.versions.clone())
    }

    fn fetch(&self, _branch: Branch, version: &Version, dest: &Path) -> Result<(), VersionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        write_distribution(dest, version.as_str()).map_err(|source| VersionError::Body {
            url: format!("static://{version}"),
            source,
        })
    }
}
