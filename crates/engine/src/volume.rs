//! Volume enumeration and page listing.

use std::fs;
use std::path::{Path, PathBuf};

use comicshelf_core::{
    PageInfo, VolumeEntry, VolumeKind, is_archive_path, is_hidden_name, is_image_path,
    natural_cmp, sort_natural_by_key,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lists the volumes of one series folder in canonical (natural) order.
///
/// A volume is a visible subdirectory or a visible file with a recognized
/// archive extension. This is the single definition used for counting during
/// sync, for display and for paging.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeIndex;

impl VolumeIndex {
    pub fn list(series_folder: &Path) -> Result<Vec<VolumeEntry>> {
        let mut volumes = Vec::new();
        for path in read_dir_sorted(series_folder)? {
            let kind = if path.is_dir() {
                VolumeKind::Directory
            } else if path.is_file() && is_archive_path(&path) {
                VolumeKind::Archive
            } else {
                continue;
            };
            if let Some(entry) = VolumeEntry::from_path(path, kind) {
                volumes.push(entry);
            }
        }
        Ok(volumes)
    }

    pub fn count(series_folder: &Path) -> Result<u32> {
        let volumes = Self::list(series_folder)?;
        Ok(u32::try_from(volumes.len()).unwrap_or(u32::MAX))
    }
}

/// Visible children of `dir`, naturally sorted by file name.
pub(crate) fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let reader = fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;
    let mut paths = Vec::new();
    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if is_hidden_name(&entry.file_name()) {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort_by(|a, b| natural_cmp(&file_name_lossy(a), &file_name_lossy(b)));
    Ok(paths)
}

/// Raster page files directly inside `dir`, in reading order.
pub fn list_page_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_dir_sorted(dir)?
        .into_iter()
        .filter(|path| path.is_file() && is_image_path(path))
        .collect())
}

/// Reads pixel dimensions from each page header. Pages whose header cannot be
/// read keep a 0x0 size, which the layout treats as a portrait page.
pub fn probe_pages(paths: Vec<PathBuf>) -> Vec<PageInfo> {
    paths
        .into_iter()
        .map(|path| match image::image_dimensions(&path) {
            Ok((width, height)) => PageInfo::new(path, width, height),
            Err(err) => {
                warn!(page = %path.display(), error = %err, "could not read page dimensions");
                PageInfo::new(path, 0, 0)
            }
        })
        .collect()
}

/// Entry names inside an archive that are visible raster pages, naturally
/// sorted by their full in-archive path. Absolute and dot-prefixed components
/// are dropped so every entry stages inside its directory.
pub fn image_entries(mut entries: Vec<String>) -> Vec<String> {
    entries.retain(|name| {
        !name.ends_with('/')
            && !name.starts_with('/')
            && !name
                .split('/')
                .any(|component| component.starts_with('.') || component == "__MACOSX")
            && is_image_path(Path::new(name))
    });
    sort_natural_by_key(&mut entries, |name| name.as_str());
    entries
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
