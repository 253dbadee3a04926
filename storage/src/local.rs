use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, ReadHandle, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "local";

/// Permissions for collection directories: owner rwx, group and other r-x.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// Storage driver backed by a directory tree.
///
/// Each bucket is a directory under the root, and object paths map directly
/// onto relative file paths inside it.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

/// Wrap an I/O failure with operation context, keeping its kind.
fn fs_error(
    context: &'static str,
    bucket: &str,
    path: &Utf8Path,
) -> impl FnOnce(std::io::Error) -> StorageError {
    let bucket = bucket.to_owned();
    let path = path.to_string();
    move |err| {
        let kind = StorageErrorKind::from(err.kind());
        StorageError::builder(ENGINE, kind, eyre::Report::new(err).wrap_err(context))
            .bucket(bucket)
            .path(path)
            .build()
    }
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if remote.is_absolute()
            || remote
                .components()
                .any(|c| matches!(c, camino::Utf8Component::ParentDir))
        {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::InvalidRequest,
                eyre::eyre!("path escapes bucket: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(self.root.join(bucket).join(remote))
    }

    async fn create_parent(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(fs_error("create_dir_all", bucket, parent))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(fs_error("metadata", bucket, remote))?;

        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(fs_error("metadata: timestamp", bucket, remote))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(fs_error("remove_file", bucket, remote))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        self.create_parent(bucket, &path).await?;

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&path)
                .await
                .map_err(fs_error("create file", bucket, remote))?,
        );

        tokio::io::copy(local, &mut writer)
            .await
            .map_err(fs_error("copy", bucket, remote))?;

        writer
            .shutdown()
            .await
            .map_err(fs_error("shutdown writer", bucket, remote))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(fs_error("open file", bucket, remote))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(fs_error("copy", bucket, remote))?;

        local
            .flush()
            .await
            .map_err(fs_error("flush writer", bucket, remote))?;

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadHandle, StorageError> {
        let path = self.path(bucket, remote)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(fs_error("open file", bucket, remote))?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(fs_error("open file for append", bucket, remote))?;
        let mut writer = tokio::io::BufWriter::new(file);

        tokio::io::copy(local, &mut writer)
            .await
            .map_err(fs_error("copy", bucket, remote))?;

        writer
            .shutdown()
            .await
            .map_err(fs_error("shutdown writer", bucket, remote))?;
        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from)?;
        let target = self.path(bucket, to)?;
        self.create_parent(bucket, &target).await?;

        tokio::fs::rename(&source, &target)
            .await
            .map_err(fs_error("rename", bucket, from))?;
        Ok(())
    }

    async fn create_dir(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);

        builder
            .create(&path)
            .await
            .map_err(fs_error("create_dir", bucket, remote))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.root.join(bucket);
        let start = match prefix {
            Some(part) => self.path(bucket, part)?,
            None => base.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&base, &start))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(ENGINE, StorageErrorKind::Other))?
            .map_err(StorageError::with(ENGINE, StorageErrorKind::Io))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

/// Walk `start` recursively, returning file paths relative to `base`.
#[tracing::instrument]
fn collect_list(base: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    if start.is_dir() {
        visit(start, &mut files)?;
    } else if start.is_file() {
        files.push(start.to_owned());
    }

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(base).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path
        .read_dir_utf8()
        .wrap_err_with(|| format!("read_dir {path}"))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalDriver::new(root))
    }

    async fn put(driver: &LocalDriver, remote: &str, data: &[u8]) {
        let mut reader = BufReader::new(data);
        driver
            .upload("registry", Utf8Path::new(remote), &mut reader)
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn create_dir_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, driver) = driver();
        driver
            .create_dir("registry", Utf8Path::new("myapp/blobs"))
            .await
            .unwrap();
        // Creating again is fine.
        driver
            .create_dir("registry", Utf8Path::new("myapp/blobs"))
            .await
            .unwrap();

        let meta = std::fs::metadata(dir.path().join("registry/myapp/blobs")).unwrap();
        assert!(meta.is_dir());
        // The process umask may only clear bits.
        assert_eq!(meta.permissions().mode() & 0o777 & !DIR_MODE, 0);
    }

    #[tokio::test]
    async fn append_and_open() {
        let (_dir, driver) = driver();
        put(&driver, "myapp/uploads/s", b"chunk1").await;

        let mut reader = BufReader::new(&b"chunk2"[..]);
        driver
            .append("registry", Utf8Path::new("myapp/uploads/s"), &mut reader)
            .await
            .unwrap();

        let mut handle = driver
            .open("registry", Utf8Path::new("myapp/uploads/s"))
            .await
            .unwrap();
        let mut data = Vec::new();
        handle.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"chunk1chunk2");
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let (_dir, driver) = driver();
        let path = Utf8Path::new("myapp/uploads/missing");

        assert!(!driver.exists("registry", path).await.unwrap());
        let mut reader = BufReader::new(&b"x"[..]);
        let err = driver.append("registry", path, &mut reader).await.unwrap_err();
        assert!(err.is_not_found());
        let err = driver.open("registry", path).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rename_replaces_destination() {
        let (_dir, driver) = driver();
        put(&driver, "myapp/uploads/s", b"same").await;
        put(&driver, "myapp/blobs/sha256:1", b"same").await;

        driver
            .rename(
                "registry",
                Utf8Path::new("myapp/uploads/s"),
                Utf8Path::new("myapp/blobs/sha256:1"),
            )
            .await
            .unwrap();

        assert!(!driver
            .exists("registry", Utf8Path::new("myapp/uploads/s"))
            .await
            .unwrap());
        let meta = driver
            .metadata("registry", Utf8Path::new("myapp/blobs/sha256:1"))
            .await
            .unwrap();
        assert_eq!(meta.size, 4);
    }

    #[tokio::test]
    async fn list_is_relative_to_bucket() {
        let (_dir, driver) = driver();
        put(&driver, "myapp/tags/latest", b"{}").await;
        put(&driver, "myapp/tags/v1", b"{}").await;
        put(&driver, "myapp/blobs/sha256:1", b"{}").await;

        let mut tags = driver
            .list("registry", Some(Utf8Path::new("myapp/tags")))
            .await
            .unwrap();
        tags.sort();
        assert_eq!(tags, vec!["myapp/tags/latest", "myapp/tags/v1"]);

        let none = driver
            .list("registry", Some(Utf8Path::new("other/tags")))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let (_dir, driver) = driver();
        let err = driver
            .metadata("registry", Utf8Path::new("myapp/tags/../../etc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidRequest);
    }
}
