//! Copying a dataset directory to remote object storage.
//!
//! Walking the tree and naming the objects lives here; moving the bytes is
//! up to an [`ObjectStore`]. [`MirrorStore`] stages objects under a local
//! root laid out as `<root>/<bucket>/<key>`.

use regex::Regex;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid remote path `{0}`: expected s3://bucket/prefix")]
    InvalidRemotePath(String),
    #[error("couldn't open folder: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("upload of {key} failed: {source}")]
    UploadFailure {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while walking {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn remote_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^s3://([a-z0-9][a-z0-9.\-]{1,61}[a-z0-9])(?:/(.*))?$")
            .unwrap_or_else(|e| unreachable!("remote path pattern is valid: {e}"))
    })
}

/// A bucket and a key prefix. The prefix is empty or ends in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub bucket: String,
    pub prefix: String,
}

impl RemotePath {
    pub fn parse(input: &str) -> Result<Self, UploadError> {
        let captures = remote_path_pattern()
            .captures(input.trim())
            .ok_or_else(|| UploadError::InvalidRemotePath(input.to_string()))?;

        let bucket = captures[1].to_string();
        let mut prefix = captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        Ok(Self { bucket, prefix })
    }

    pub fn key_for(&self, relative: &str) -> String {
        format!("{}{}", self.prefix, relative)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

pub trait ObjectStore {
    fn put_file(&self, bucket: &str, key: &str, local: &Path) -> io::Result<()>;
}

/// Stages objects in a local directory, one subdirectory per bucket.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

impl ObjectStore for MirrorStore {
    fn put_file(&self, bucket: &str, key: &str, local: &Path) -> io::Result<()> {
        let target = self.object_path(bucket, key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub local: PathBuf,
    pub key: String,
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn walk(dir: &Path, relative: &str, out: &mut Vec<(PathBuf, String)>) -> Result<(), UploadError> {
    let io_err = |source| UploadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let rel = if relative.is_empty() {
            name.to_string_lossy().into_owned()
        } else {
            format!("{}/{}", relative, name.to_string_lossy())
        };

        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            walk(&entry.path(), &rel, out)?;
        } else if is_hidden(&name) {
            tracing::info!("Not copying hidden file {}", rel);
        } else {
            out.push((entry.path(), rel));
        }
    }
    Ok(())
}

/// Every file under `local_root` with its destination key, in a stable
/// order. Hidden files are skipped; hidden directories are still walked.
pub fn plan_upload(local_root: &Path, remote: &RemotePath) -> Result<Vec<PlannedUpload>, UploadError> {
    if !local_root.is_dir() {
        return Err(UploadError::FileNotFound(local_root.to_path_buf()));
    }

    let mut files = Vec::new();
    walk(local_root, "", &mut files)?;

    Ok(files
        .into_iter()
        .map(|(local, relative)| PlannedUpload {
            key: remote.key_for(&relative),
            local,
        })
        .collect())
}

/// Upload `local_root` to `remote`, returning the number of files copied.
/// Stops at the first failure.
pub fn upload_dir(
    store: &dyn ObjectStore,
    local_root: &Path,
    remote: &RemotePath,
) -> Result<usize, UploadError> {
    tracing::info!("Copying local folder {} to {}", local_root.display(), remote);

    let plan = plan_upload(local_root, remote)?;
    for item in &plan {
        store
            .put_file(&remote.bucket, &item.key, &item.local)
            .map_err(|source| UploadError::UploadFailure {
                key: item.key.clone(),
                source,
            })?;
        tracing::debug!("Copied {} to s3://{}/{}", item.local.display(), remote.bucket, item.key);
    }

    tracing::info!("{} files copied.", plan.len());
    Ok(plan.len())
}
