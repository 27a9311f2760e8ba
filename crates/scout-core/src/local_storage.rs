//! Filesystem storage backend for devices.
//!
//! Each object is one file under the backend root. Writes go to a temp file in
//! the destination directory, are fsynced, and then atomically renamed over the
//! final path, so a crash leaves either the old or the new content and never a
//! torn file. Version tokens are the SHA-256 of the content.
//!
//! Conditional writes are serialized through an in-process mutex. The backend
//! assumes a single process owns the data directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

const TEMP_MARKER: &str = ".tmp-";

/// Storage backend rooted at a local directory.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsBackend {
    /// Opens (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::storage_with_source(format!("create data dir {}", root.display()), e)
        })?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }

    async fn read_existing(&self, full: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("read {}", full.display()),
                e,
            )),
        }
    }

    async fn write_atomic(&self, full: &Path, data: &[u8]) -> Result<()> {
        let dir = full
            .parent()
            .ok_or_else(|| Error::storage(format!("{} has no parent", full.display())))?;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::storage_with_source(format!("create {}", dir.display()), e))?;

        let file_name = full
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::storage(format!("{} has no file name", full.display())))?;
        let tmp_path = dir.join(format!("{file_name}{TEMP_MARKER}{}", Ulid::new()));

        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            Error::storage_with_source(format!("create {}", tmp_path.display()), e)
        })?;
        file.write_all(data)
            .await
            .map_err(|e| Error::storage_with_source(format!("write {}", tmp_path.display()), e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage_with_source(format!("fsync {}", tmp_path.display()), e))?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, full).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::storage_with_source(
                format!("rename into {}", full.display()),
                e,
            ));
        }

        // Make the rename itself durable.
        #[cfg(unix)]
        {
            if let Ok(dir_handle) = fs::File::open(dir).await {
                let _ = dir_handle.sync_all().await;
            }
        }

        Ok(())
    }

    async fn meta_for(&self, path: &str, full: &Path) -> Result<Option<ObjectMeta>> {
        let Some(data) = self.read_existing(full).await? else {
            return Ok(None);
        };
        let last_modified = fs::metadata(full)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        Ok(Some(ObjectMeta {
            path: path.to_string(),
            size: data.len() as u64,
            version: content_version(&data),
            last_modified,
        }))
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        self.read_existing(&full)
            .await?
            .map(Bytes::from)
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let full = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read_existing(&full).await?.map(|d| content_version(&d));
        match (&precondition, &current) {
            (WritePrecondition::DoesNotExist, Some(version)) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(expected), Some(version)) if expected != version => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(_), None) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: "0".to_string(),
                });
            }
            _ => {}
        }

        self.write_atomic(&full, &data).await?;
        Ok(WriteResult::Success {
            version: content_version(&data),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("delete {}", full.display()),
                e,
            )),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        validate_path(prefix)?;
        let start_rel = prefix.rfind('/').map_or("", |idx| &prefix[..idx]);
        let start = self.resolve(start_rel)?;

        let mut pending = vec![(start, start_rel.to_string())];
        let mut found = Vec::new();

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::storage_with_source(
                        format!("list {}", dir.display()),
                        e,
                    ));
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source(format!("list {}", dir.display()), e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let file_type = entry.file_type().await.map_err(|e| {
                    Error::storage_with_source(format!("stat {}", entry.path().display()), e)
                })?;
                if !file_type.is_dir() && is_temp_file(&name) {
                    continue;
                }
                let child_rel = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                if file_type.is_dir() {
                    pending.push((entry.path(), child_rel));
                } else if child_rel.starts_with(prefix) {
                    if let Some(meta) = self.meta_for(&child_rel, &entry.path()).await? {
                        found.push(meta);
                    }
                }
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let full = self.resolve(path)?;
        self.meta_for(path, &full).await
    }
}

/// Matches only the names `write_atomic` gives its temp files:
/// `{file_name}.tmp-{ulid}`.
fn is_temp_file(name: &str) -> bool {
    name.rsplit_once(TEMP_MARKER)
        .is_some_and(|(stem, id)| !stem.is_empty() && Ulid::from_string(id).is_ok())
}

fn content_version(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn validate_path(path: &str) -> Result<()> {
    if path.starts_with('/') || path.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "absolute paths and backslashes not allowed: {path}"
        )));
    }
    if path.contains('\n') || path.contains('\r') || path.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "control characters not allowed in paths: {path}"
        )));
    }
    if path.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(Error::InvalidInput(format!(
            "path traversal not allowed: {path}"
        )));
    }
    Ok(())
}
