use std::cmp::Ordering;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::testing::{StaticCatalog, seed_download};

struct Cache {
    _temp: TempDir,
    layout: Layout,
}

#[fixture]
fn cache() -> Cache {
    let temp = tempfile::tempdir().expect("tempdir");
    let layout = Layout::under(temp.path());
    layout.prepare().expect("layout");
    Cache {
        _temp: temp,
        layout,
    }
}

#[rstest]
#[case("1.9.0", "1.10.0", Ordering::Less)]
#[case("1.21.2.02", "1.21.2.2", Ordering::Equal)]
#[case("1.21.3", "1.21.2.9", Ordering::Greater)]
#[case("1.20", "1.20.0", Ordering::Less)]
fn compares_numerically(#[case] left: &str, #[case] right: &str, #[case] expected: Ordering) {
    assert_eq!(compare(left, right).expect("valid versions"), expected);
}

#[rstest]
#[case("")]
#[case("1..2")]
#[case("1.x")]
fn rejects_malformed_versions(#[case] value: &str) {
    let error = compare(value, "1.0").expect_err("invalid");
    assert_eq!(error.code(), 1121);
}

#[test]
fn version_keeps_its_spelling() {
    let version: Version = "1.21.2.02".parse().expect("valid");
    assert_eq!(version.to_string(), "1.21.2.02");
    assert_eq!(version.parts(), [1, 21, 2, 2]);
}

#[rstest]
#[case("stable", Branch::Stable)]
#[case("Preview", Branch::Preview)]
fn branch_parses_case_insensitively(#[case] value: &str, #[case] expected: Branch) {
    assert_eq!(value.parse::<Branch>().expect("branch"), expected);
}

#[test]
fn scrape_keeps_newest_link_per_branch() {
    let page = r#"
        <a href="https://www.minecraft.net/bedrockdedicatedserver/bin-linux/bedrock-server-1.21.1.03.zip">old</a>
        <a href="https://www.minecraft.net/bedrockdedicatedserver/bin-linux/bedrock-server-1.21.10.01.zip">new</a>
        <a href="https://www.minecraft.net/bedrockdedicatedserver/bin-linux-preview/bedrock-server-1.21.20.22.zip">pre</a>
        <a href="https://www.minecraft.net/bedrockdedicatedserver/bin-win/bedrock-server-1.30.0.1.zip">win</a>
    "#;
    let versions = OnlineVersions::scrape(page);
    assert_eq!(
        versions.get(Branch::Stable).map(Version::as_str),
        Some("1.21.10.01")
    );
    assert_eq!(
        versions.get(Branch::Preview).map(Version::as_str),
        Some("1.21.20.22")
    );
    assert_eq!(
        OnlineVersions::scrape("<html></html>"),
        OnlineVersions::default()
    );
}

#[test]
fn archive_url_follows_branch_channel() {
    let version: Version = "1.21.2.02".parse().expect("valid");
    assert_eq!(
        HttpCatalog::archive_url(Branch::Preview, &version),
        "https://minecraft.azureedge.net/bin-linux-preview/bedrock-server-1.21.2.02.zip"
    );
}

#[rstest]
fn download_fetches_once(cache: Cache) {
    let catalog = StaticCatalog::new("1.21.2.02", None);

    let first = download(&cache.layout, &catalog, Branch::Stable, None).expect("download");
    assert_eq!(first.state, DownloadState::Downloaded);
    assert_eq!(first.version.as_str(), "1.21.2.02");
    assert!(archive_path(&cache.layout, Branch::Stable, &first.version).is_file());

    let second = download(&cache.layout, &catalog, Branch::Stable, None).expect("cached");
    assert_eq!(second.state, DownloadState::AlreadyDownloaded);
    assert_eq!(catalog.fetches(), 1);
}

#[rstest]
fn download_reports_missing_online_version(cache: Cache) {
    let mut catalog = MockCatalog::new();
    catalog
        .expect_online_versions()
        .returning(|| Ok(OnlineVersions::default()));
    catalog.expect_fetch().never();

    let error = download(&cache.layout, &catalog, Branch::Preview, None).expect_err("offline");
    assert_eq!(error.code(), 1111);
}

#[rstest]
fn failed_transfer_leaves_no_archive(cache: Cache) {
    let mut catalog = MockCatalog::new();
    catalog.expect_fetch().returning(|_, _, _| {
        Err(VersionError::HttpStatus {
            url: String::from("https://example.invalid/a.zip"),
            status: 404,
        })
    });
    let version: Version = "1.0.0".parse().expect("valid");

    let error = download(&cache.layout, &catalog, Branch::Stable, Some(version.clone()))
        .expect_err("transfer fails");
    let report = crate::ErrorReport::from(&error);
    assert_eq!(report.code, 1112);
    assert_eq!(report.cause.as_deref().map(|cause| cause.code), Some(1102));
    assert!(!archive_path(&cache.layout, Branch::Stable, &version).exists());
    let leftovers = fs::read_dir(cache.layout.downloads_dir().join("stable"))
        .expect("branch dir")
        .count();
    assert_eq!(leftovers, 0);
}

#[rstest]
fn lists_cached_versions_in_order(cache: Cache) {
    for version in ["1.10.0", "1.9.0", "1.9.5"] {
        seed_download(&cache.layout, Branch::Stable, version).expect("seed");
    }
    fs::write(
        cache.layout.downloads_dir().join("stable/notes.txt"),
        "ignored",
    )
    .expect("stray file");

    let cached = downloaded_versions(&cache.layout).expect("list");
    let stable: Vec<&str> = cached[&Branch::Stable].iter().map(Version::as_str).collect();
    assert_eq!(stable, ["1.9.0", "1.9.5", "1.10.0"]);
    assert!(cached[&Branch::Preview].is_empty());
    assert_eq!(
        latest_downloaded(&cache.layout, Branch::Stable)
            .expect("latest")
            .map(|version| version.to_string()),
        Some(String::from("1.10.0"))
    );
    assert_eq!(
        latest_downloaded(&cache.layout, Branch::Preview).expect("latest"),
        None
    );
}
