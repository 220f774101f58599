use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::{io_error, StorageError};

/// Storage driver backed by a directory on the local file system.
///
/// Keys are laid out as `<root>/<bucket>/<path>`.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a new local driver rooted at the given directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        self.root.join(bucket).join(remote)
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|err| io_error(self.name(), err).with_bucket(bucket).with_path(remote.as_str()))?;
        Ok(Metadata {
            size: meta.len(),
            created: meta.created().map(Into::into).unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(self.name(), err))?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|err| io_error(self.name(), err).with_bucket(bucket).with_path(remote.as_str()))?;
        tokio::io::copy(reader, &mut file)
            .await
            .map_err(|err| io_error(self.name(), err))?;
        file.shutdown()
            .await
            .map_err(|err| io_error(self.name(), err))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|err| io_error(self.name(), err).with_bucket(bucket).with_path(remote.as_str()))?;
        tokio::io::copy(&mut file, writer)
            .await
            .map_err(|err| io_error(self.name(), err))?;
        writer
            .flush()
            .await
            .map_err(|err| io_error(self.name(), err))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.root.join(bucket);
        let start = match prefix {
            Some(prefix) => base.join(prefix),
            None => base.clone(),
        };

        let keys = tokio::task::spawn_blocking(move || {
            fn visit(dir: &Path, base: &Utf8Path, keys: &mut Vec<String>) -> std::io::Result<()> {
                if !dir.is_dir() {
                    return Ok(());
                }
                for entry in std::fs::read_dir(dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        visit(&path, base, keys)?;
                    } else if let Ok(utf8) = Utf8PathBuf::try_from(path) {
                        if let Ok(relative) = utf8.strip_prefix(base) {
                            keys.push(relative.to_string());
                        }
                    }
                }
                Ok(())
            }

            let mut keys = Vec::new();
            visit(start.as_std_path(), &base, &mut keys)?;
            Ok::<_, std::io::Error>(keys)
        })
        .in_current_span()
        .await
        .map_err(|err| StorageError::new(self.name(), crate::StorageErrorKind::Io, err))?
        .map_err(|err| io_error(self.name(), err))?;

        Ok(keys)
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(self.name(), err)
                .with_bucket(bucket)
                .with_path(remote.as_str())),
        }
    }
}
