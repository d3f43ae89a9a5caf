use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Result of writing a file that may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// The file already held exactly this content and was left alone.
    Unchanged,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    /// True for real directories. Symlinks are never reported as directories.
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Move a file or directory from `src` to `dst`. Uses `rename` first; plain
/// files fall back to copy + delete when rename fails (cross-device moves).
async fn move_entry(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let err = match tokio::fs::rename(src, dst).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let is_file = tokio::fs::symlink_metadata(src)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(StorageError::Move {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: err,
        });
    }

    tokio::fs::copy(src, dst)
        .await
        .map_err(|e| StorageError::Move {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        })?;
    tokio::fs::remove_file(src)
        .await
        .map_err(|e| StorageError::Move {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        })?;
    Ok(())
}

/// File operations confined to one root directory. Every path argument is
/// relative to the root.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `relative` under the root.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn ensure_directory(&self, relative: impl AsRef<Path>) -> Result<PathBuf, StorageError> {
        let path = self.path(relative);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    /// Whether anything (including a dangling symlink) exists at `relative`.
    pub async fn exists(&self, relative: impl AsRef<Path>) -> bool {
        tokio::fs::symlink_metadata(self.path(relative)).await.is_ok()
    }

    /// Whether `relative` is a real directory (not a symlink to one).
    pub async fn is_directory(&self, relative: impl AsRef<Path>) -> bool {
        tokio::fs::symlink_metadata(self.path(relative))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Writes `content`, skipping the write when the file already matches.
    /// A symlink or directory in the way is replaced.
    pub async fn write_if_changed(
        &self,
        relative: impl AsRef<Path>,
        content: &[u8],
    ) -> Result<WriteOutcome, StorageError> {
        let path = self.path(relative);

        let outcome = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_file() => match tokio::fs::read(&path).await {
                Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
                _ => WriteOutcome::Updated,
            },
            Ok(_) => {
                remove_path(&path).await?;
                WriteOutcome::Updated
            }
            Err(_) => WriteOutcome::Created,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(outcome)
    }

    /// Removes a file, symlink or whole directory. Missing entries are fine.
    pub async fn remove(&self, relative: impl AsRef<Path>) -> Result<(), StorageError> {
        remove_path(&self.path(relative)).await
    }

    /// Renames `from` to `to`, both relative to the root.
    pub async fn rename(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<(), StorageError> {
        move_entry(&self.path(from), &self.path(to)).await
    }

    /// Lists the entries of a directory, sorted by name. Names that are not
    /// valid UTF-8 are skipped.
    pub async fn list(&self, relative: impl AsRef<Path>) -> Result<Vec<DirEntryInfo>, StorageError> {
        let path = self.path(relative);
        let list_err = |e: std::io::Error| StorageError::ListDirectory {
            path: path.clone(),
            source: e,
        };

        let mut reader = tokio::fs::read_dir(&path).await.map_err(list_err)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(list_err)? {
            let Ok(name) = entry.file_name().into_string() else {
                log::debug!("Skipping non UTF-8 entry in {}", path.display());
                continue;
            };
            let file_type = entry.file_type().await.map_err(list_err)?;
            entries.push(DirEntryInfo {
                name,
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

async fn remove_path(path: &Path) -> Result<(), StorageError> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StorageError::Remove {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
