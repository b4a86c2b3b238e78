//! Online version catalogue.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{Branch, Version, VersionError, VERSIONS_TARGET};

const ARCHIVE_BASE_URL: &str = "https://minecraft.azureedge.net";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Newest version per branch as advertised online.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OnlineVersions {
    /// Newest release build.
    pub stable: Option<Version>,
    /// Newest preview build.
    pub preview: Option<Version>,
}

impl OnlineVersions {
    /// Version advertised for `branch`.
    #[must_use]
    pub const fn get(&self, branch: Branch) -> Option<&Version> {
        match branch {
            Branch::Stable => self.stable.as_ref(),
            Branch::Preview => self.preview.as_ref(),
        }
    }

    fn offer(&mut self, branch: Branch, version: Version) {
        let slot = match branch {
            Branch::Stable => &mut self.stable,
            Branch::Preview => &mut self.preview,
        };
        if slot.as_ref().is_none_or(|current| *current < version) {
            *slot = Some(version);
        }
    }

    /// Extracts archive links from a download page.
    #[must_use]
    pub fn scrape(page: &str) -> Self {
        let mut versions = Self::default();
        let Some(pattern) = archive_link_pattern() else {
            return versions;
        };
        for captures in pattern.captures_iter(page) {
            let branch = if captures.get(1).is_some() {
                Branch::Preview
            } else {
                Branch::Stable
            };
            if let Some(version) = captures
                .get(2)
                .and_then(|found| found.as_str().parse::<Version>().ok())
            {
                versions.offer(branch, version);
            }
        }
        versions
    }

    const fn is_empty(&self) -> bool {
        self.stable.is_none() && self.preview.is_none()
    }
}

fn archive_link_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"https://[^"'\s]*?/bin-linux(-preview)?/bedrock-server-(\d+(?:\.\d+)*)\.zip"#)
                .ok()
        })
        .as_ref()
}

/// Source of version information and distribution archives.
#[cfg_attr(test, mockall::automock)]
pub trait Catalog: Send + Sync {
    /// Newest versions currently offered.
    fn online_versions(&self) -> Result<OnlineVersions, VersionError>;

    /// Writes the archive of `version` to `dest`, replacing its contents.
    fn fetch(&self, branch: Branch, version: &Version, dest: &Path) -> Result<(), VersionError>;
}

/// Catalogue backed by the vendor download page.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    page_url: String,
    agent: ureq::Agent,
}

impl HttpCatalog {
    /// Catalogue scraping `page_url`.
    #[must_use]
    pub fn new(page_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            page_url: page_url.into(),
            agent,
        }
    }

    /// Download URL of an archive.
    #[must_use]
    pub fn archive_url(branch: Branch, version: &Version) -> String {
        let channel = match branch {
            Branch::Stable => "bin-linux",
            Branch::Preview => "bin-linux-preview",
        };
        format!("{ARCHIVE_BASE_URL}/{channel}/bedrock-server-{version}.zip")
    }

    fn get(&self, url: &str) -> Result<ureq::Response, VersionError> {
        debug!(target: VERSIONS_TARGET, url, "requesting");
        self.agent
            .get(url)
            .set("Accept-Language", "en-US,en;q=0.5")
            .call()
            .map_err(|error| match error {
                ureq::Error::Status(status, _) => VersionError::HttpStatus {
                    url: url.to_owned(),
                    status,
                },
                ureq::Error::Transport(transport) => VersionError::Transport {
                    url: url.to_owned(),
                    message: transport.to_string(),
                },
            })
    }
}

impl Catalog for HttpCatalog {
    fn online_versions(&self) -> Result<OnlineVersions, VersionError> {
        let page = self
            .get(&self.page_url)?
            .into_string()
            .map_err(|source| VersionError::Body {
                url: self.page_url.clone(),
                source,
            })?;
        let versions = OnlineVersions::scrape(&page);
        if versions.is_empty() {
            return Err(VersionError::UnparseablePage {
                url: self.page_url.clone(),
            });
        }
        Ok(versions)
    }

    fn fetch(&self, branch: Branch, version: &Version, dest: &Path) -> Result<(), VersionError> {
        let url = Self::archive_url(branch, version);
        let body_error = |source| VersionError::Body {
            url: url.clone(),
            source,
        };
        let response = self.get(&url)?;
        let mut file = File::create(dest).map_err(body_error)?;
        let bytes = io::copy(&mut response.into_reader(), &mut file).map_err(body_error)?;
        file.sync_all().map_err(body_error)?;
        debug!(target: VERSIONS_TARGET, url = %url, bytes, "archive fetched");
        Ok(())
    }
}
