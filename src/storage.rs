//! Filesystem helper: podcast folders, episode filenames, free space, deletion

use crate::error::{Error, Result};
use crate::utils::{self, MAX_SLUG_LEN};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Owns the layout of the download root
///
/// Episodes live at `{root}/{podcast folder}/{YYYY-MM-DD}-{title slug}.{ext}`.
#[derive(Clone, Debug)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    /// Create a file manager rooted at `root` (not created until needed)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Download root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (if needed) and return the folder for a podcast
    pub async fn ensure_dir(&self, podcast_folder: &str) -> Result<PathBuf> {
        let dir = self.root.join(utils::sanitize_folder_name(podcast_folder));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Filename for an episode: `{YYYY-MM-DD}-{slug}.{ext}`
    ///
    /// Undated episodes use today's date.
    pub fn safe_filename(published_at: Option<DateTime<Utc>>, title: &str, ext: &str) -> String {
        let date = published_at.unwrap_or_else(Utc::now).format("%Y-%m-%d");
        let ext = ext.trim_start_matches('.');
        format!("{}-{}.{}", date, utils::slugify(title, MAX_SLUG_LEN), ext)
    }

    /// Full destination path for an episode inside its podcast folder
    pub fn episode_path(
        &self,
        podcast_folder: &str,
        published_at: Option<DateTime<Utc>>,
        title: &str,
        ext: &str,
    ) -> PathBuf {
        self.root
            .join(utils::sanitize_folder_name(podcast_folder))
            .join(Self::safe_filename(published_at, title, ext))
    }

    /// `path` with `-{tag}` inserted before the extension
    ///
    /// Used to keep two episodes whose names slug the same apart.
    pub fn tagged_path(path: &Path, tag: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, tag, ext.to_string_lossy()),
            None => format!("{}-{}", stem, tag),
        };
        path.with_file_name(name)
    }

    /// Free bytes on the filesystem holding `path`
    ///
    /// Walks up to the nearest existing ancestor, so it can be asked about a
    /// destination that does not exist yet.
    pub fn free_space(&self, path: &Path) -> Result<u64> {
        let mut existing = path;
        while !existing.exists() {
            match existing.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => existing = parent,
                _ => {
                    existing = Path::new(".");
                    break;
                }
            }
        }

        utils::get_available_space(existing).map_err(|e| {
            Error::DiskSpaceCheckFailed(format!("{}: {}", existing.display(), e))
        })
    }

    /// Delete a file; a file that is already gone is not an error
    ///
    /// Returns whether a file was actually removed.
    pub async fn delete_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Remove every empty directory below the root (the root itself is kept)
    ///
    /// Returns the number of directories removed.
    pub async fn prune_empty_dirs(&self) -> Result<usize> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if !root.is_dir() {
                return Ok(0);
            }
            prune_below(&root)
        })
        .await
        .map_err(|e| Error::Other(format!("prune task failed: {}", e)))?
    }
}

/// Depth-first removal of empty subdirectories of `dir`
fn prune_below(dir: &Path) -> Result<usize> {
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let child = entry.path();
        removed += prune_below(&child)?;

        let is_empty = std::fs::read_dir(&child)?.next().is_none();
        if is_empty {
            match std::fs::remove_dir(&child) {
                Ok(()) => {
                    tracing::debug!(path = %child.display(), "Removed empty directory");
                    removed += 1;
                }
                // A download may have just created a file in it
                Err(e) => tracing::debug!(path = %child.display(), error = %e, "Directory not removed"),
            }
        }
    }

    Ok(removed)
}
