use std::path::{Path, PathBuf};

use crate::error::StorageError;

use super::filesystem::WriteOutcome;

/// Sibling file extensions worth mirroring next to a linked media file.
const MIRRORED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "tbn", "srt", "ass", "ssa", "sub", "idx", "vtt", "sup",
];

/// Sibling files never mirrored, compared case-insensitively.
const DEFAULT_SKIP_LIST: &[&str] = &["thumbs.db", "desktop.ini", "sample.jpg"];

pub struct SymlinkManager {
    skip_list: Vec<String>,
}

impl Default for SymlinkManager {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_LIST.iter().map(|s| s.to_string()))
    }
}

impl SymlinkManager {
    pub fn new<I: IntoIterator<Item = String>>(skip_list: I) -> Self {
        Self {
            skip_list: skip_list.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Points `link` at `target`. A link that already points there is left
    /// alone; anything else at `link` is replaced.
    ///
    /// Symlink creation succeeds for missing targets, so the target is
    /// checked first and a missing one is reported as an error.
    pub async fn link(&self, target: &Path, link: &Path) -> Result<WriteOutcome, StorageError> {
        let link_err = |e: std::io::Error| StorageError::CreateSymlink {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            source: e,
        };

        tokio::fs::metadata(target).await.map_err(link_err)?;

        let outcome = match tokio::fs::symlink_metadata(link).await {
            Ok(meta) => {
                if meta.file_type().is_symlink() {
                    if let Ok(current) = tokio::fs::read_link(link).await {
                        if current == target {
                            return Ok(WriteOutcome::Unchanged);
                        }
                    }
                }
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(link).await.map_err(link_err)?;
                } else {
                    tokio::fs::remove_file(link).await.map_err(link_err)?;
                }
                WriteOutcome::Updated
            }
            Err(_) => WriteOutcome::Created,
        };

        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        #[cfg(unix)]
        tokio::fs::symlink(target, link).await.map_err(link_err)?;

        #[cfg(windows)]
        tokio::fs::symlink_file(target, link).await.map_err(link_err)?;

        Ok(outcome)
    }

    /// Links artwork and subtitle files that sit next to `source` into
    /// `dest_dir`. Only the source's own folder is scanned, never subfolders.
    /// Siblings named after the source are renamed after `link_stem`, so
    /// `Movie.en.srt` next to `Movie.mkv` follows the renamed link.
    ///
    /// Destination names in `reserved` are left to the caller. Returns the
    /// names linked into `dest_dir`. A sibling that cannot be linked is
    /// logged and skipped.
    pub async fn mirror_siblings(
        &self,
        source: &Path,
        dest_dir: &Path,
        link_stem: &str,
        reserved: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let Some(source_dir) = source.parent() else {
            return Ok(Vec::new());
        };
        let source_name = source.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let source_stem = source.file_stem().and_then(|n| n.to_str()).unwrap_or("");

        let mut reader =
            tokio::fs::read_dir(source_dir)
                .await
                .map_err(|e| StorageError::ListDirectory {
                    path: source_dir.to_path_buf(),
                    source: e,
                })?;

        let mut mirrored = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StorageError::ListDirectory {
                        path: source_dir.to_path_buf(),
                        source: e,
                    })
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == source_name || !self.should_mirror(&name) {
                continue;
            }
            // Follows symlinks, so a linked file counts but a folder never does.
            let is_file = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            let dest_name = mirror_name(&name, source_stem, link_stem);
            if reserved.contains(&dest_name) {
                continue;
            }
            let dest: PathBuf = dest_dir.join(&dest_name);
            match self.link(&entry.path(), &dest).await {
                Ok(_) => mirrored.push(dest_name),
                Err(e) => log::warn!("Could not mirror {}: {}", name, e),
            }
        }

        mirrored.sort();
        Ok(mirrored)
    }

    fn should_mirror(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        let lower = name.to_lowercase();
        if self.skip_list.iter().any(|s| *s == lower) {
            return false;
        }
        Path::new(&lower)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| MIRRORED_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
    }
}

fn mirror_name(sibling: &str, source_stem: &str, link_stem: &str) -> String {
    if source_stem.is_empty() {
        return sibling.to_string();
    }
    match sibling.strip_prefix(source_stem) {
        Some(rest) if rest.starts_with('.') || rest.starts_with('-') => {
            format!("{}{}", link_stem, rest)
        }
        _ => sibling.to_string(),
    }
}
