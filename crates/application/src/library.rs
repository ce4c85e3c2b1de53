//! Library edits. Filesystem moves and deletions run first; the series record
//! only changes once they succeed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use comicshelf_core::{LibrarySeries, Tag, VolumeEntry, VolumeKey, VolumeKind};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RenameError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("{} already exists", .0.display())]
    Collision(PathBuf),
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("filesystem operation on {} failed", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RenameError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Outcome of a series rename; the old folder path keys cached covers that
/// are now stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryService;

impl LibraryService {
    pub fn new() -> Self {
        Self
    }

    pub fn toggle_favorite(&self, series: &mut LibrarySeries) -> bool {
        series.is_favorite = !series.is_favorite;
        series.is_favorite
    }

    pub fn set_finished(&self, series: &mut LibrarySeries, finished: bool) -> bool {
        let changed = series.is_finished != finished;
        series.is_finished = finished;
        changed
    }

    /// Returns `false` when the tag was already present or is blank.
    pub fn add_tag(&self, series: &mut LibrarySeries, tag: Tag) -> bool {
        if tag.as_str().trim().is_empty() {
            return false;
        }
        series.tags.insert(tag)
    }

    pub fn remove_tag(&self, series: &mut LibrarySeries, tag: &Tag) -> bool {
        series.tags.remove(tag)
    }

    /// Marking a volume read drops its resume point.
    pub fn set_volume_read(&self, series: &mut LibrarySeries, volume: &VolumeKey, read: bool) -> bool {
        if read {
            let removed = series.reading_progress.remove(volume).is_some();
            series.read_volumes.insert(volume.clone()) || removed
        } else {
            series.read_volumes.remove(volume)
        }
    }

    pub fn rename_series(
        &self,
        series: &mut LibrarySeries,
        new_name: &str,
    ) -> Result<Renamed, RenameError> {
        let new_name = validate_name(new_name)?;
        let from = series.folder().to_path_buf();
        let parent = from
            .parent()
            .ok_or_else(|| RenameError::InvalidName(series.folder_path.clone()))?;
        let to = parent.join(new_name);
        move_entry(&from, &to)?;

        info!(from = %from.display(), to = %to.display(), "renamed series");
        series.folder_path = to.to_string_lossy().to_string();
        series.title = new_name.to_string();
        Ok(Renamed { from, to })
    }

    /// Renames a volume inside its series folder and carries its read state
    /// and resume point over to the new key. Archive volumes keep their
    /// extension when `new_name` has none of the recognized ones.
    pub fn rename_volume(
        &self,
        series: &mut LibrarySeries,
        volume: &VolumeEntry,
        new_name: &str,
    ) -> Result<VolumeEntry, RenameError> {
        let new_name = validate_name(new_name)?;
        let file_name = match (volume.kind, volume.path.extension()) {
            (VolumeKind::Archive, Some(ext))
                if !comicshelf_core::is_archive_path(Path::new(new_name)) =>
            {
                format!("{new_name}.{}", ext.to_string_lossy())
            }
            _ => new_name.to_string(),
        };
        let parent = volume
            .path
            .parent()
            .ok_or_else(|| RenameError::InvalidName(volume.key.to_string()))?;
        let to = parent.join(&file_name);
        move_entry(&volume.path, &to)?;

        let renamed = VolumeEntry::from_path(to.clone(), volume.kind)
            .ok_or_else(|| RenameError::InvalidName(file_name.clone()))?;
        if series.read_volumes.remove(&volume.key) {
            series.read_volumes.insert(renamed.key.clone());
        }
        if let Some(page) = series.reading_progress.remove(&volume.key) {
            series.reading_progress.insert(renamed.key.clone(), page);
        }
        info!(from = %volume.path.display(), to = %to.display(), "renamed volume");
        Ok(renamed)
    }

    pub fn delete_volume(
        &self,
        series: &mut LibrarySeries,
        volume: &VolumeEntry,
    ) -> Result<(), RenameError> {
        let result = match volume.kind {
            VolumeKind::Directory => fs::remove_dir_all(&volume.path),
            VolumeKind::Archive => fs::remove_file(&volume.path),
        };
        result.map_err(|err| RenameError::io(&volume.path, err))?;

        series.read_volumes.remove(&volume.key);
        series.reading_progress.remove(&volume.key);
        series.volume_count = series.volume_count.saturating_sub(1);
        info!(volume = %volume.path.display(), "deleted volume");
        Ok(())
    }

    /// Removes the series folder from disk. The caller drops the record.
    pub fn delete_series(&self, series: &LibrarySeries) -> Result<(), RenameError> {
        let folder = series.folder();
        fs::remove_dir_all(folder).map_err(|err| RenameError::io(folder, err))?;
        info!(folder = %folder.display(), "deleted series");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<&str, RenameError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains('\0');
    if invalid {
        return Err(RenameError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

fn move_entry(from: &Path, to: &Path) -> Result<(), RenameError> {
    if from == to {
        return Ok(());
    }
    if !from.exists() {
        return Err(RenameError::NotFound(from.to_path_buf()));
    }
    // A case-only rename on a case-insensitive filesystem sees itself.
    let same_entry = match (fs::canonicalize(from), fs::canonicalize(to)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if to.exists() && !same_entry {
        return Err(RenameError::Collision(to.to_path_buf()));
    }
    fs::rename(from, to).map_err(|err| RenameError::io(from, err))
}
