//! src/services/ingest_service.rs
//!
//! IngestService: places distribution files into the package tree served by
//! `StorageService`. This is the only code that writes beneath the storage
//! root; the HTTP index never calls it.

use crate::{
    models::{
        distribution::{Distribution, project_name_from_filename},
        package::{is_valid_name, normalize_name},
    },
    services::storage_service::{StorageError, StorageResult, ensure_segment_safe},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

/// A distribution written by the ingest path, with its MD5 digest.
#[derive(Debug, Clone)]
pub struct IngestedDistribution {
    pub distribution: Distribution,
    pub md5: String,
}

#[derive(Clone, Debug)]
pub struct IngestService {
    /// Same root directory the index serves from.
    pub base_path: PathBuf,
}

impl IngestService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Copy a local distribution file into the tree.
    ///
    /// The destination package is derived from the file name, so
    /// `dist/Foo_Bar-1.0.tar.gz` lands in `{root}/foo-bar/Foo_Bar-1.0.tar.gz`.
    pub async fn ingest_file(&self, source: &Path) -> StorageResult<IngestedDistribution> {
        let filename = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::UnrecognizedFilename(source.display().to_string()))?
            .to_string();

        let file = File::open(source).await?;
        let stream = ReaderStream::new(file);
        self.ingest_stream(&filename, stream).await
    }

    /// Stream a distribution into the tree under `filename`.
    ///
    /// - Writes bytes incrementally to a hidden temporary file in the
    ///   package directory.
    /// - Computes MD5 and size while streaming.
    /// - Syncs, then renames into place so readers never see a partial file.
    ///
    /// An existing file of the same name is replaced. Temp files are removed
    /// on error.
    pub async fn ingest_stream<S>(
        &self,
        filename: &str,
        stream: S,
    ) -> StorageResult<IngestedDistribution>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if ensure_segment_safe(filename).is_err() {
            return Err(StorageError::UnrecognizedFilename(filename.to_string()));
        }
        let project = project_name_from_filename(filename)
            .filter(|name| is_valid_name(name))
            .ok_or_else(|| StorageError::UnrecognizedFilename(filename.to_string()))?;
        let package = normalize_name(&project);

        let package_dir = self.base_path.join(&package);
        fs::create_dir_all(&package_dir).await?;
        let file_path = package_dir.join(filename);
        let tmp_path = package_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let retried = if err.kind() == ErrorKind::AlreadyExists {
                match fs::remove_file(&file_path).await {
                    Ok(()) => fs::rename(&tmp_path, &file_path).await,
                    Err(remove_err) => Err(remove_err),
                }
            } else {
                Err(err)
            };
            if let Err(err) = retried {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        debug!("renamed {} into {}", tmp_path.display(), file_path.display());

        let last_modified = match fs::metadata(&file_path).await?.modified() {
            Ok(time) => DateTime::<Utc>::from(time),
            Err(_) => Utc::now(),
        };
        let md5 = format!("{:x}", digest.compute());
        info!("stored {}/{} ({} bytes, md5 {})", package, filename, size_bytes, md5);

        Ok(IngestedDistribution {
            distribution: Distribution {
                package,
                filename: filename.to_string(),
                size_bytes,
                last_modified,
            },
            md5,
        })
    }
}
