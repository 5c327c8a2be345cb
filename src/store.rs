use crate::errors::{AppError, AppResult};
use crate::guard::{PathGuard, SafePath};
use crate::models::{EntryInfo, StatInfo};
use crate::settings::StorageContext;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use uuid::Uuid;

pub const SNIPPET_BUCKET: &str = "snippets";
pub const BOARD_BUCKET: &str = "boards";
pub const CUT_SNIPPETS_FOLDER: &str = "Cut Snippets";

const TOPOLOGY: &[&str] = &[SNIPPET_BUCKET, "snippets/Cut Snippets", BOARD_BUCKET];

#[derive(Debug, Clone)]
pub struct FileStore {
    guard: PathGuard,
}

impl FileStore {
    pub fn new(context: Arc<StorageContext>) -> Self {
        Self {
            guard: PathGuard::new(context),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    fn file_extensions(&self) -> &[String] {
        self.guard.context().allowed_extensions()
    }

    fn check(&self, raw: &str, allowed_extensions: Option<&[String]>) -> AppResult<SafePath> {
        self.guard.validate(raw, allowed_extensions).map_err(|rejection| {
            tracing::warn!(path = %raw, reason = %rejection, "storage path rejected");
            AppError::Denied(rejection)
        })
    }

    pub async fn read(&self, path: &str) -> AppResult<Option<String>> {
        let safe = self.check(path, Some(self.file_extensions()))?;
        self.read_resolved(safe.absolute()).await
    }

    // `file` must already be inside the data root.
    pub(crate) async fn read_resolved(&self, file: &Path) -> AppResult<Option<String>> {
        match fs::read_to_string(file).await {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(AppError::from(error)),
        }
    }

    pub async fn write(&self, path: &str, content: &str) -> AppResult<()> {
        let safe = self.check(path, Some(self.file_extensions()))?;
        let size = content.len() as u64;
        let max = self.guard.context().max_file_size_bytes();
        if size > max {
            return Err(AppError::TooLarge { size, max });
        }

        let target = safe.absolute();
        let Some(parent) = target.parent() else {
            return Err(AppError::InvalidRequest("cannot write to the data root".to_string()));
        };
        fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        replace_via_temp(&temp, target, content).await?;

        tracing::debug!(path = %safe.relative(), bytes = size, "file written");
        Ok(())
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> AppResult<()> {
        let safe = self.check(path, None)?;
        if safe.is_root() {
            return Err(AppError::InvalidRequest("the data root cannot be removed".to_string()));
        }

        let metadata = match fs::symlink_metadata(safe.absolute()).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(AppError::from(error)),
        };

        let outcome = if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(safe.absolute()).await
            } else {
                fs::remove_dir(safe.absolute()).await
            }
        } else {
            fs::remove_file(safe.absolute()).await
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(path = %safe.relative(), recursive, "entry removed");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(AppError::from(error)),
        }
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> AppResult<()> {
        let mut source = self.check(old_path, None)?;
        let mut destination = self.check(new_path, None)?;
        if source.is_root() || destination.is_root() {
            return Err(AppError::InvalidRequest("the data root cannot be renamed".to_string()));
        }

        let metadata = fs::symlink_metadata(source.absolute()).await?;
        if !metadata.is_dir() {
            // Files keep to the extension allow-list on both ends of a move.
            source = self.check(old_path, Some(self.file_extensions()))?;
            destination = self.check(new_path, Some(self.file_extensions()))?;
        }

        if let Some(parent) = destination.absolute().parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(source.absolute(), destination.absolute()).await?;

        tracing::debug!(from = %source.relative(), to = %destination.relative(), "entry renamed");
        Ok(())
    }

    pub async fn list(&self, dir: &str) -> AppResult<Vec<EntryInfo>> {
        let safe = self.check(dir, None)?;
        Ok(self
            .list_resolved(safe.absolute())
            .await?
            .into_iter()
            .map(|(info, _)| info)
            .collect())
    }

    pub(crate) async fn list_resolved(&self, dir: &Path) -> AppResult<Vec<(EntryInfo, PathBuf)>> {
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(AppError::from(error)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let info = match entry.metadata().await {
                Ok(metadata) => EntryInfo {
                    name,
                    is_directory: metadata.is_dir(),
                    is_file: metadata.is_file(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified: metadata.modified().ok().map(epoch_millis),
                    created: metadata.created().ok().map(epoch_millis),
                },
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(AppError::from(error)),
            };
            entries.push((info, entry.path()));
        }
        entries.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn stat(&self, path: &str) -> AppResult<Option<StatInfo>> {
        let safe = self.check(path, None)?;
        let metadata = match fs::symlink_metadata(safe.absolute()).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(AppError::from(error)),
        };

        let mtime = metadata.modified().ok().map(epoch_millis).unwrap_or_default();
        Ok(Some(StatInfo {
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            size: metadata.len(),
            mtime,
            ctime: metadata.created().ok().map(epoch_millis).unwrap_or(mtime),
        }))
    }

    pub async fn mkdir(&self, dir: &str) -> AppResult<()> {
        let safe = self.check(dir, None)?;
        fs::create_dir_all(safe.absolute()).await?;
        Ok(())
    }

    pub async fn ensure_topology(&self) -> AppResult<()> {
        for dir in TOPOLOGY {
            self.mkdir(dir).await?;
        }
        Ok(())
    }

    pub async fn ensure_bucket_for(&self, path: &str) -> AppResult<()> {
        let safe = self.check(path, None)?;
        let bucket = safe.relative().split('/').next().unwrap_or_default();
        if bucket == SNIPPET_BUCKET || bucket == BOARD_BUCKET {
            self.mkdir(bucket).await?;
        }
        Ok(())
    }

    pub fn data_root(&self) -> &Path {
        self.guard.context().data_root()
    }
}

async fn replace_via_temp(temp: &Path, target: &Path, content: &str) -> std::io::Result<()> {
    let outcome = match fs::write(temp, content).await {
        Ok(()) => fs::rename(temp, target).await,
        Err(error) => Err(error),
    };
    if outcome.is_err() {
        let _ = fs::remove_file(temp).await;
    }
    outcome
}

fn epoch_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}
