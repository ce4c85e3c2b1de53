//! Locating a representative image for a series or a volume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use comicshelf_core::{VolumeEntry, VolumeKind, is_image_path};
use image::DynamicImage;
use tracing::{debug, warn};

use crate::archive::{ArchiveExtractor, Staging, staged_path};
use crate::error::{Error, Result};
use crate::volume::{VolumeIndex, image_entries, list_page_paths, read_dir_sorted};
use crate::worker::{CancelCheck, CancellationToken};

/// Something that can have a cover: a whole series folder or one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverSubject {
    Series { folder: PathBuf },
    Volume(VolumeEntry),
}

impl CoverSubject {
    pub fn series(folder: impl Into<PathBuf>) -> Self {
        Self::Series {
            folder: folder.into(),
        }
    }

    /// Stable identifier used by both cache tiers.
    pub fn cache_key(&self) -> String {
        match self {
            CoverSubject::Series { folder } => format!("series:{}", folder.display()),
            CoverSubject::Volume(entry) => format!("volume:{}", entry.path.display()),
        }
    }
}

/// Output of one resolution: the downsampled cover (if any) and the page
/// count cached alongside it.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub image: Option<DynamicImage>,
    pub page_count: Option<u32>,
}

/// Produces covers on a cache miss.
pub trait CoverSource: Send + Sync {
    fn resolve(&self, subject: &CoverSubject, cancel: &CancellationToken) -> Result<Resolution>;
}

#[derive(Clone)]
pub struct CoverResolver {
    extractor: Arc<dyn ArchiveExtractor>,
    max_dimension: u32,
    max_depth: usize,
}

impl CoverResolver {
    pub fn new(extractor: Arc<dyn ArchiveExtractor>, max_dimension: u32, max_depth: usize) -> Self {
        Self {
            extractor,
            max_dimension: max_dimension.max(1),
            max_depth,
        }
    }

    /// First image of `folder` in natural order, else the first hit found in
    /// its subdirectories (naturally ordered, at most `max_depth` levels down).
    /// An unreadable folder yields no cover; a broken first image is an error.
    pub fn find(&self, folder: &Path, cancel: &CancellationToken) -> Result<Option<DynamicImage>> {
        self.find_at_depth(folder, 0, cancel)
    }

    fn find_at_depth(
        &self,
        folder: &Path,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<DynamicImage>> {
        cancel.check()?;

        let children = match read_dir_sorted(folder) {
            Ok(children) => children,
            Err(err) => {
                debug!(folder = %folder.display(), error = %err, "cover search skipped folder");
                return Ok(None);
            }
        };

        if let Some(first) = children.iter().find(|p| p.is_file() && is_image_path(p)) {
            cancel.check()?;
            return load_thumbnail(first, self.max_dimension).map(Some);
        }

        if depth >= self.max_depth {
            return Ok(None);
        }

        for dir in children.iter().filter(|p| p.is_dir()) {
            if let Some(found) = self.find_at_depth(dir, depth + 1, cancel)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Extracts the first page entry of an archive into a staging directory
    /// and decodes it. The staging directory is removed before returning.
    pub fn find_in_archive(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<DynamicImage>> {
        cancel.check()?;
        let entries = image_entries(self.extractor.list_entries(archive)?);
        let Some(first) = entries.into_iter().next() else {
            return Ok(None);
        };
        cancel.check()?;

        let staging = Staging::extract(
            self.extractor.as_ref(),
            archive,
            std::slice::from_ref(&first),
            cancel,
        )?;
        let found = match staged_path(staging.path(), &first) {
            Some(page) if page.is_file() => cancel
                .check()
                .and_then(|()| load_thumbnail(&page, self.max_dimension))
                .map(Some),
            _ => {
                debug!(archive = %archive.display(), entry = %first, "first page was not staged");
                Ok(None)
            }
        };
        staging.close();
        found
    }

    /// Number of pages in a volume.
    pub fn page_count(&self, entry: &VolumeEntry) -> Result<u32> {
        let count = match entry.kind {
            VolumeKind::Directory => list_page_paths(&entry.path)?.len(),
            VolumeKind::Archive => image_entries(self.extractor.list_entries(&entry.path)?).len(),
        };
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn series_cover(&self, folder: &Path, cancel: &CancellationToken) -> Result<Option<DynamicImage>> {
        if let Some(found) = self.find(folder, cancel)? {
            return Ok(Some(found));
        }
        // Series made only of archives: use the first archive volume.
        let volumes = match VolumeIndex::list(folder) {
            Ok(volumes) => volumes,
            Err(_) => return Ok(None),
        };
        match volumes.iter().find(|v| v.kind == VolumeKind::Archive) {
            Some(volume) => self.find_in_archive(&volume.path, cancel),
            None => Ok(None),
        }
    }
}

impl CoverSource for CoverResolver {
    fn resolve(&self, subject: &CoverSubject, cancel: &CancellationToken) -> Result<Resolution> {
        match subject {
            CoverSubject::Series { folder } => {
                let image = self.series_cover(folder, cancel)?;
                let page_count = VolumeIndex::count(folder).ok();
                Ok(Resolution { image, page_count })
            }
            CoverSubject::Volume(entry) => {
                let image = match entry.kind {
                    VolumeKind::Directory => self.find(&entry.path, cancel)?,
                    VolumeKind::Archive => self.find_in_archive(&entry.path, cancel)?,
                };
                let page_count = match self.page_count(entry) {
                    Ok(count) => Some(count),
                    Err(err) => {
                        warn!(volume = %entry.path.display(), error = %err, "page count unavailable");
                        None
                    }
                };
                Ok(Resolution { image, page_count })
            }
        }
    }
}

/// Decodes `path` and shrinks it to fit `max_dimension` on both axes,
/// preserving the aspect ratio. Smaller images are returned as-is.
pub fn load_thumbnail(path: &Path, max_dimension: u32) -> Result<DynamicImage> {
    let image = image::open(path).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return Ok(image);
    }
    Ok(image.thumbnail(max_dimension, max_dimension))
}
