//! Content-addressed blob pool.
//!
//! Each blob is named by the lowercase hex SHA-512 digest of the original
//! file content. Blobs may be stored raw or gzip-compressed; readers check
//! the gzip magic bytes instead of trusting a flag.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha512};
use tracing::debug;

use super::BACKUP_TARGET;
use crate::fsutil;

/// Hex length of a SHA-512 digest.
pub const DIGEST_LEN: usize = 128;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `key` is a lowercase hex SHA-512 digest.
#[must_use]
pub fn is_digest(key: &str) -> bool {
    key.len() == DIGEST_LEN
        && key
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

/// Hex SHA-512 digest of a file's content.
pub(crate) fn digest_file(path: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha512::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Handle on the blob directory.
#[derive(Debug, Clone)]
pub(crate) struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn blob(&self, digest: &str) -> PathBuf {
        self.dir.join(digest)
    }

    pub(crate) fn contains(&self, digest: &str) -> bool {
        self.blob(digest).is_file()
    }

    /// Stores `source` under `digest` unless a blob already exists.
    ///
    /// Returns whether a new blob was written. The blob appears atomically,
    /// so concurrent writers of the same digest never expose a torn file.
    pub(crate) fn put(&self, source: &Path, digest: &str, compress: bool) -> io::Result<bool> {
        if self.contains(digest) {
            return Ok(false);
        }
        let mut input = BufReader::new(File::open(source)?);
        let staged = tempfile::Builder::new()
            .prefix(".blob-")
            .tempfile_in(&self.dir)?;
        let file = if compress {
            let mut encoder = GzEncoder::new(staged, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?
        } else {
            let mut plain = staged;
            io::copy(&mut input, &mut plain)?;
            plain
        };
        file.as_file().sync_all()?;
        let target = self.blob(digest);
        file.persist(&target).map_err(|error| error.error)?;
        fsutil::widen_file(&target)?;
        debug!(target: BACKUP_TARGET, digest, compress, "blob stored");
        Ok(true)
    }

    /// Writes the original content of `digest` to `target`.
    ///
    /// A blob starting with the gzip magic is decoded first. Raw blobs whose
    /// content is itself gzip data decode to something else, so the decoded
    /// output is checked against `digest` and replaced by a raw copy when it
    /// does not match.
    pub(crate) fn copy_out(&self, digest: &str, target: &Path) -> io::Result<()> {
        let path = self.blob(digest);
        let mut magic = [0_u8; 2];
        let compressed = {
            let mut head = File::open(&path)?;
            let read = head.read(&mut magic)?;
            read == magic.len() && magic == GZIP_MAGIC
        };
        if compressed {
            let decoded = decode(&path, target).and_then(|()| digest_file(target));
            match decoded {
                Ok(found) if found == digest => return Ok(()),
                Ok(_) => debug!(target: BACKUP_TARGET, digest, "gzip-looking blob stored raw"),
                Err(error) => {
                    debug!(target: BACKUP_TARGET, digest, %error, "blob is not gzip data");
                }
            }
        }
        let mut input = BufReader::new(File::open(&path)?);
        let mut output = File::create(target)?;
        io::copy(&mut input, &mut output)?;
        output.flush()
    }

    /// Deletes every blob whose digest is not in `keep`.
    ///
    /// Returns the number of deleted blobs. Entries that are not digests are
    /// left alone.
    pub(crate) fn collect(&self, keep: &BTreeSet<String>) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_digest(&name) || keep.contains(&name) {
                continue;
            }
            fs::remove_file(entry.path())?;
            removed += 1;
        }
        debug!(target: BACKUP_TARGET, removed, kept = keep.len(), "content store collected");
        Ok(removed)
    }
}

fn decode(blob: &Path, target: &Path) -> io::Result<()> {
    let mut input = GzDecoder::new(BufReader::new(File::open(blob)?));
    let mut output = File::create(target)?;
    io::copy(&mut input, &mut output)?;
    output.flush()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::raw(false)]
    #[case::gzip(true)]
    fn stored_blob_restores_original_bytes(#[case] compress: bool) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store_dir = temp.path().join("incremental");
        fs::create_dir(&store_dir).expect("store");
        let source = temp.path().join("level.dat");
        fs::write(&source, b"\x1f\x00level data").expect("source");

        let store = ContentStore::new(store_dir);
        let digest = digest_file(&source).expect("digest");
        assert!(is_digest(&digest));
        assert!(store.put(&source, &digest, compress).expect("put"));
        assert!(!store.put(&source, &digest, compress).expect("second put"));

        let restored = temp.path().join("restored.dat");
        store.copy_out(&digest, &restored).expect("copy out");
        assert_eq!(fs::read(&restored).expect("read"), b"\x1f\x00level data");
    }

    #[test]
    fn raw_gzip_content_is_restored_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store_dir = temp.path().join("incremental");
        fs::create_dir(&store_dir).expect("store");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"abc").expect("encode");
        let archive = encoder.finish().expect("finish");
        let source = temp.path().join("resource_pack.gz");
        fs::write(&source, &archive).expect("source");

        let store = ContentStore::new(store_dir);
        let digest = digest_file(&source).expect("digest");
        store.put(&source, &digest, false).expect("put");

        let restored = temp.path().join("restored.gz");
        store.copy_out(&digest, &restored).expect("copy out");
        assert_eq!(fs::read(&restored).expect("read"), archive);
    }

    #[test]
    fn digest_keys_are_lowercase_hex_of_fixed_length() {
        assert!(is_digest(&"a".repeat(DIGEST_LEN)));
        assert!(!is_digest(&"A".repeat(DIGEST_LEN)));
        assert!(!is_digest("server-name"));
        assert!(!is_digest(&"0".repeat(DIGEST_LEN - 1)));
    }

    #[test]
    fn collect_keeps_referenced_blobs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let kept = "a".repeat(DIGEST_LEN);
        let dropped = "b".repeat(DIGEST_LEN);
        fs::write(temp.path().join(&kept), "k").expect("kept");
        fs::write(temp.path().join(&dropped), "d").expect("dropped");
        fs::write(temp.path().join(".blob-partial"), "p").expect("partial");

        let store = ContentStore::new(temp.path().to_path_buf());
        let removed = store
            .collect(&BTreeSet::from([kept.clone()]))
            .expect("collect");
        assert_eq!(removed, 1);
        assert!(store.contains(&kept));
        assert!(!store.contains(&dropped));
    }
}
