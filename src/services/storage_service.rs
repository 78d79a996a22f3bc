//! src/services/storage_service.rs
//!
//! StorageService: read-only lookups over the package directory tree.
//! The layout is `base_path/{package}/{filename}`: one directory per package,
//! named by its normalized project name, holding that package's distribution
//! files under their original names. Nothing here writes to disk.

use crate::models::{
    distribution::{Distribution, project_name_from_filename},
    package::{Package, normalize_name},
};
use chrono::{DateTime, Utc};
use futures::{
    Stream, StreamExt, TryStreamExt, future, pin_mut,
    stream::{self, BoxStream},
};
use md5::Context;
use std::{
    fs::Metadata,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::{self, DirEntry, File};
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("package `{0}` not found")]
    PackageNotFound(String),
    #[error("distribution `{filename}` not found in package `{package}`")]
    DistributionNotFound { package: String, filename: String },
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("`{0}` is not a recognized distribution file name")]
    UnrecognizedFilename(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService maps the package directory tree to packages and
/// distributions:
/// - List packages (one per subdirectory of `base_path`)
/// - List distributions of one package
/// - Open a distribution for streaming
/// - Digest a distribution for index links
///
/// Every call resolves against the current state of the disk, so it is safe
/// to share between concurrent requests without locking.
#[derive(Clone, Debug)]
pub struct StorageService {
    /// Root directory holding one subdirectory per package.
    pub base_path: PathBuf,
}

const MAX_SEGMENT_LEN: usize = 255;

/// Reject path segments that could escape the storage tree.
///
/// Package names and file names are single path components: no
/// separators, no `..`, no control bytes, and no leading `.` (hidden
/// files, including in-flight ingest temporaries, are never served).
pub fn ensure_segment_safe(segment: &str) -> StorageResult<()> {
    if segment.is_empty() || segment.len() > MAX_SEGMENT_LEN {
        return Err(StorageError::InvalidName(segment.to_string()));
    }
    if segment.starts_with('.') || segment.contains("..") {
        return Err(StorageError::InvalidName(segment.to_string()));
    }
    if segment
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
    {
        return Err(StorageError::InvalidName(segment.to_string()));
    }
    Ok(())
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Lazily enumerate packages, one per visible subdirectory of the root.
    ///
    /// Each call starts a fresh directory scan. Ordering is whatever the
    /// filesystem yields.
    pub fn list_packages(&self) -> BoxStream<'static, StorageResult<Package>> {
        dir_entries(self.base_path.clone())
            .try_filter_map(|entry| async move { describe_package(&entry).await })
            .map_err(StorageError::from)
            .boxed()
    }

    /// Find the directory holding `package`.
    ///
    /// Tries the normalized name first, then falls back to scanning for a
    /// directory whose normalized name matches (hand-made trees may use
    /// `Foo_Bar` rather than `foo-bar`).
    async fn package_dir(&self, package: &str) -> StorageResult<PathBuf> {
        ensure_segment_safe(package)?;
        let normalized = normalize_name(package);

        let direct = self.base_path.join(&normalized);
        if let Some(meta) = followed_metadata(&direct).await? {
            if meta.is_dir() {
                return Ok(direct);
            }
        }

        let matching = self
            .list_packages()
            .try_filter(|candidate| future::ready(candidate.normalized == normalized));
        pin_mut!(matching);
        match matching.try_next().await? {
            Some(found) => Ok(self.base_path.join(found.name)),
            None => Err(StorageError::PackageNotFound(package.to_string())),
        }
    }

    /// Lazily enumerate the distributions of `package`.
    ///
    /// Fails with PackageNotFound before streaming if the package has no
    /// directory. Entries that are not files, hidden, or whose file name does
    /// not parse to this package are skipped.
    pub async fn list_distributions(
        &self,
        package: &str,
    ) -> StorageResult<BoxStream<'static, StorageResult<Distribution>>> {
        let dir = self.package_dir(package).await?;
        let normalized = normalize_name(package);

        Ok(dir_entries(dir)
            .try_filter_map(move |entry| {
                let normalized = normalized.clone();
                async move { describe_entry(&normalized, &entry).await }
            })
            .map_err(StorageError::from)
            .boxed())
    }

    /// Fetch only distribution metadata.
    ///
    /// Verifies the segments, package existence and that the named entry is
    /// a regular file.
    pub async fn distribution_metadata(
        &self,
        package: &str,
        filename: &str,
    ) -> StorageResult<Distribution> {
        let (_, dist) = self.locate_distribution(package, filename).await?;
        Ok(dist)
    }

    /// Open a distribution for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    pub async fn read_distribution(
        &self,
        package: &str,
        filename: &str,
    ) -> StorageResult<(Distribution, File)> {
        let (path, dist) = self.locate_distribution(package, filename).await?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::DistributionNotFound {
                    package: package.to_string(),
                    filename: filename.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((dist, file))
    }

    /// Pair each listed distribution of `package` with its hex MD5.
    ///
    /// The package directory is resolved once for the whole batch. Files
    /// that disappear before they are hashed are dropped from the result.
    pub async fn digest_distributions(
        &self,
        package: &str,
        dists: Vec<Distribution>,
    ) -> StorageResult<Vec<(Distribution, String)>> {
        let dir = self.package_dir(package).await?;
        let mut digested = Vec::with_capacity(dists.len());
        for dist in dists {
            match file_md5(&dir.join(&dist.filename)).await {
                Ok(md5) => digested.push((dist, md5)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("{} vanished while listing {}", dist.filename, package);
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Ok(digested)
    }

    /// Confirm the storage root exists and can be listed.
    pub async fn check_ready(&self) -> StorageResult<()> {
        match followed_metadata(&self.base_path).await? {
            Some(meta) if meta.is_dir() => {
                let mut entries = fs::read_dir(&self.base_path).await?;
                entries.next_entry().await?;
                Ok(())
            }
            Some(_) => Err(StorageError::Io(io::Error::new(
                ErrorKind::NotADirectory,
                format!("{} is not a directory", self.base_path.display()),
            ))),
            None => Err(StorageError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", self.base_path.display()),
            ))),
        }
    }

    async fn locate_distribution(
        &self,
        package: &str,
        filename: &str,
    ) -> StorageResult<(PathBuf, Distribution)> {
        ensure_segment_safe(filename)?;
        let dir = self.package_dir(package).await?;
        let path = dir.join(filename);

        match followed_metadata(&path).await? {
            Some(meta) if meta.is_file() => {
                let dist = distribution_from(normalize_name(package), filename, &meta)?;
                Ok((path, dist))
            }
            _ => Err(StorageError::DistributionNotFound {
                package: package.to_string(),
                filename: filename.to_string(),
            }),
        }
    }
}

/// Stream the entries of `dir`, stopping at the first I/O error.
fn dir_entries(dir: PathBuf) -> impl Stream<Item = io::Result<DirEntry>> + Send + 'static {
    stream::once(async move { fs::read_dir(dir).await })
        .map_ok(|entries| {
            stream::try_unfold(entries, |mut entries| async move {
                let next = entries.next_entry().await?;
                Ok::<_, io::Error>(next.map(|entry| (entry, entries)))
            })
        })
        .try_flatten()
}

/// UTF-8 name of a directory entry, or None for hidden and non-UTF-8 names.
fn visible_name(entry: &DirEntry) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) if !name.starts_with('.') => Some(name),
        Ok(_) => None,
        Err(raw) => {
            debug!("skipping non UTF-8 entry {:?}", raw);
            None
        }
    }
}

/// Metadata following symlinks. A missing target (or dangling link) is None.
async fn followed_metadata(path: &Path) -> io::Result<Option<Metadata>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn describe_package(entry: &DirEntry) -> io::Result<Option<Package>> {
    let Some(name) = visible_name(entry) else {
        return Ok(None);
    };
    match followed_metadata(&entry.path()).await? {
        Some(meta) if meta.is_dir() => Ok(Some(Package::new(name))),
        _ => Ok(None),
    }
}

async fn describe_entry(package: &str, entry: &DirEntry) -> io::Result<Option<Distribution>> {
    let Some(filename) = visible_name(entry) else {
        return Ok(None);
    };
    if let Err(err) = ensure_segment_safe(&filename) {
        debug!("skipping {} in package {}: {}", filename.escape_debug(), package, err);
        return Ok(None);
    }

    let owner = project_name_from_filename(&filename).map(|name| normalize_name(&name));
    if owner.as_deref() != Some(package) {
        debug!(
            "skipping {} in package {}: not a distribution of this package",
            filename, package
        );
        return Ok(None);
    }

    match followed_metadata(&entry.path()).await? {
        Some(meta) if meta.is_file() => {
            Ok(Some(distribution_from(package.to_string(), &filename, &meta)?))
        }
        _ => Ok(None),
    }
}

/// Hex MD5 of the file at `path`, computed by streaming it.
async fn file_md5(path: &Path) -> io::Result<String> {
    let file = File::open(path).await?;
    let mut digest = Context::new();
    let mut chunks = ReaderStream::new(file);
    while let Some(chunk) = chunks.next().await {
        digest.consume(&chunk?);
    }
    Ok(format!("{:x}", digest.compute()))
}

fn distribution_from(package: String, filename: &str, meta: &Metadata) -> io::Result<Distribution> {
    Ok(Distribution {
        package,
        filename: filename.to_string(),
        size_bytes: meta.len(),
        last_modified: DateTime::<Utc>::from(meta.modified()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(root: &Path, files: &[(&str, &str, &str)]) {
        for (dir, name, contents) in files {
            std::fs::create_dir_all(root.join(dir)).unwrap();
            std::fs::write(root.join(dir).join(name), contents).unwrap();
        }
    }

    async fn package_names(service: &StorageService) -> Vec<String> {
        let mut names: Vec<String> = service
            .list_packages()
            .map_ok(|pkg| pkg.name)
            .try_collect()
            .await
            .unwrap();
        names.sort();
        names
    }

    async fn file_names(service: &StorageService, package: &str) -> Vec<String> {
        let mut names: Vec<String> = service
            .list_distributions(package)
            .await
            .unwrap()
            .map_ok(|dist| dist.filename)
            .try_collect()
            .await
            .unwrap();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_list_packages_once_each() {
        let temp_dir = TempDir::new().unwrap();
        seed(
            temp_dir.path(),
            &[
                ("foo", "foo-1.0.tar.gz", "a"),
                ("foo", "foo-1.1.tar.gz", "b"),
                ("bar", "bar-0.1-py3-none-any.whl", "c"),
            ],
        );
        std::fs::create_dir(temp_dir.path().join(".hidden")).unwrap();
        std::fs::write(temp_dir.path().join("stray.txt"), b"x").unwrap();

        let service = StorageService::new(temp_dir.path());
        assert_eq!(package_names(&service).await, vec!["bar", "foo"]);
        // restartable: a second scan yields the same set
        assert_eq!(package_names(&service).await, vec!["bar", "foo"]);
    }

    #[tokio::test]
    async fn test_list_distributions_filters_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        seed(
            temp_dir.path(),
            &[
                ("foo", "foo-1.0.tar.gz", "a"),
                ("foo", "foo-1.0-py3-none-any.whl", "b"),
                ("foo", "bar-1.0.tar.gz", "c"),
                ("foo", "notes.txt", "d"),
                ("foo", ".tmp-123", "e"),
            ],
        );

        let service = StorageService::new(temp_dir.path());
        assert_eq!(
            file_names(&service, "foo").await,
            vec!["foo-1.0-py3-none-any.whl", "foo-1.0.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_lookup_normalizes_names() {
        let temp_dir = TempDir::new().unwrap();
        seed(
            temp_dir.path(),
            &[("Foo_Bar", "Foo_Bar-2.0.tar.gz", "a"), ("baz-qux", "baz.qux-1.0.zip", "b")],
        );

        let service = StorageService::new(temp_dir.path());
        assert_eq!(file_names(&service, "foo-bar").await, vec!["Foo_Bar-2.0.tar.gz"]);
        assert_eq!(file_names(&service, "Baz.Qux").await, vec!["baz.qux-1.0.zip"]);
    }

    #[tokio::test]
    async fn test_missing_package_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let service = StorageService::new(temp_dir.path());

        let err = service.list_distributions("bar").await.err().unwrap();
        assert!(matches!(err, StorageError::PackageNotFound(ref name) if name == "bar"));

        let err = service
            .read_distribution("bar", "bar-1.0.tar.gz")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::PackageNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_distribution_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let payload: &[u8] = b"\x1f\x8b binary payload";
        std::fs::create_dir(temp_dir.path().join("foo")).unwrap();
        std::fs::write(temp_dir.path().join("foo/foo-1.0.tar.gz"), payload).unwrap();

        let service = StorageService::new(temp_dir.path());
        let (dist, file) = service.read_distribution("foo", "foo-1.0.tar.gz").await.unwrap();
        assert_eq!(dist.size_bytes, payload.len() as u64);
        assert_eq!(dist.content_type(), "application/gzip");

        let bytes: Vec<u8> = ReaderStream::new(file)
            .map_ok(|chunk| chunk.to_vec())
            .try_concat()
            .await
            .unwrap();
        assert_eq!(bytes, payload);

        let err = service
            .read_distribution("foo", "foo-2.0.tar.gz")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::DistributionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_segments() {
        let temp_dir = TempDir::new().unwrap();
        seed(temp_dir.path(), &[("foo", "foo-1.0.tar.gz", "a")]);
        let service = StorageService::new(temp_dir.path());

        let attempts = [
            ("..", "passwd"),
            ("foo", "../foo/foo-1.0.tar.gz"),
            ("foo", ".tmp-1"),
        ];
        for (package, file) in attempts {
            let err = service.read_distribution(package, file).await.err().unwrap();
            assert!(matches!(err, StorageError::InvalidName(_)), "{package}/{file}");
        }
    }

    #[tokio::test]
    async fn test_digests_match_md5_and_skip_vanished_files() {
        let temp_dir = TempDir::new().unwrap();
        seed(
            temp_dir.path(),
            &[
                ("Foo_Bar", "foo_bar-1.0.tar.gz", "hello"),
                ("Foo_Bar", "foo_bar-1.1.tar.gz", "gone soon"),
            ],
        );
        let service = StorageService::new(temp_dir.path());

        let mut dists: Vec<Distribution> = service
            .list_distributions("foo-bar")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        dists.sort_by(|a, b| a.filename.cmp(&b.filename));
        std::fs::remove_file(temp_dir.path().join("Foo_Bar/foo_bar-1.1.tar.gz")).unwrap();

        let digested = service.digest_distributions("foo-bar", dists).await.unwrap();
        assert_eq!(digested.len(), 1);
        assert_eq!(digested[0].0.filename, "foo_bar-1.0.tar.gz");
        assert_eq!(digested[0].1, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_listing_skips_unservable_names() {
        let temp_dir = TempDir::new().unwrap();
        seed(
            temp_dir.path(),
            &[
                ("foo", "foo-1.0.tar.gz", "a"),
                ("foo", "foo-1.1..tar.gz", "b"),
                ("foo", "foo-1.2\u{7}.tar.gz", "c"),
            ],
        );

        let service = StorageService::new(temp_dir.path());
        assert_eq!(file_names(&service, "foo").await, vec!["foo-1.0.tar.gz"]);
    }

    #[test]
    fn test_segment_checks() {
        assert!(ensure_segment_safe("foo-1.0.tar.gz").is_ok());
        for bad in ["", ".hidden", "foo-1.1..tar.gz", "a/b", "a\\b", "tab\there"] {
            assert!(ensure_segment_safe(bad).is_err(), "{bad:?}");
        }
        assert!(ensure_segment_safe(&"x".repeat(MAX_SEGMENT_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_check_ready() {
        let temp_dir = TempDir::new().unwrap();
        assert!(StorageService::new(temp_dir.path()).check_ready().await.is_ok());
        assert!(
            StorageService::new(temp_dir.path().join("missing"))
                .check_ready()
                .await
                .is_err()
        );
    }
}
