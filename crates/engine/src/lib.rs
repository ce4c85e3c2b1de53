//! Filesystem engine: volumes, pages, covers and the thumbnail cache.

use std::path::Path;
use std::sync::Arc;

use comicshelf_core::{PageInfo, Settings, VolumeEntry, VolumeKind};
use tracing::debug;

mod archive;
mod cache;
mod cover;
mod disk;
mod error;
mod requests;
mod volume;
mod worker;

pub use archive::{ArchiveExtractor, Staging, UnzipExtractor, staged_path};
pub use cache::{CacheConfig, CacheEntry, ThumbnailCache};
pub use cover::{CoverResolver, CoverSource, CoverSubject, Resolution, load_thumbnail};
pub use error::{Error, Result};
pub use requests::{CoverRequests, CoverState, CoverUpdate};
pub use volume::{VolumeIndex, image_entries, list_page_paths, probe_pages};
pub use worker::{CancelCheck, CancellationToken, WorkerPool};

#[derive(Clone)]
pub struct Engine {
    extractor: Arc<dyn ArchiveExtractor>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(UnzipExtractor::from_path()))
    }
}

impl Engine {
    pub fn new(extractor: Arc<dyn ArchiveExtractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> Arc<dyn ArchiveExtractor> {
        Arc::clone(&self.extractor)
    }

    pub fn volumes(&self, series_folder: &Path) -> Result<Vec<VolumeEntry>> {
        VolumeIndex::list(series_folder)
    }

    pub fn cover_resolver(&self, settings: &Settings) -> CoverResolver {
        CoverResolver::new(
            self.extractor(),
            settings.cover_max_dimension,
            settings.cover_search_depth,
        )
    }

    /// A cache instance wired to this engine's resolver.
    pub fn thumbnail_cache(&self, settings: &Settings, disk_dir: &Path) -> ThumbnailCache {
        ThumbnailCache::new(
            CacheConfig {
                capacity: settings.thumbnail_capacity,
                disk_dir: disk_dir.to_path_buf(),
            },
            Arc::new(self.cover_resolver(settings)),
        )
    }

    pub fn page_count(&self, volume: &VolumeEntry) -> Result<u32> {
        CoverResolver::new(self.extractor(), 1, 0).page_count(volume)
    }

    /// Loads the page list of a volume. Archive pages are extracted into a
    /// staging directory that lives as long as the returned value.
    pub fn open_volume(&self, volume: &VolumeEntry, cancel: &CancellationToken) -> Result<OpenVolume> {
        cancel.check()?;
        match volume.kind {
            VolumeKind::Directory => {
                let pages = probe_pages(list_page_paths(&volume.path)?);
                Ok(OpenVolume {
                    volume: volume.clone(),
                    pages,
                    staging: None,
                })
            }
            VolumeKind::Archive => {
                let entries = image_entries(self.extractor.list_entries(&volume.path)?);
                let staging =
                    Staging::extract(self.extractor.as_ref(), &volume.path, &entries, cancel)?;
                cancel.check()?;
                // Reading order is the in-archive order, not the staged layout.
                let paths = entries
                    .iter()
                    .filter_map(|entry| staged_path(staging.path(), entry))
                    .filter(|path| path.is_file())
                    .collect();
                let pages = probe_pages(paths);
                debug!(
                    volume = %volume.path.display(),
                    pages = pages.len(),
                    "staged archive volume"
                );
                Ok(OpenVolume {
                    volume: volume.clone(),
                    pages,
                    staging: Some(staging),
                })
            }
        }
    }
}

/// Pages of a volume that is currently being read.
#[derive(Debug)]
pub struct OpenVolume {
    pub volume: VolumeEntry,
    pub pages: Vec<PageInfo>,
    staging: Option<Staging>,
}

impl OpenVolume {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Releases the staging directory of an archive volume, if any.
    pub fn close(self) {
        if let Some(staging) = self.staging {
            staging.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        image::RgbImage::new(width, height).save(path).unwrap();
    }

    /// Serves `entries` from `source`, writing each at its in-archive path.
    struct CopyExtractor {
        source: PathBuf,
        entries: Vec<String>,
    }

    impl ArchiveExtractor for CopyExtractor {
        fn list_entries(&self, _archive: &Path) -> Result<Vec<String>> {
            Ok(self.entries.clone())
        }

        fn extract(
            &self,
            _archive: &Path,
            entries: &[String],
            destination: &Path,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            for entry in entries {
                let target = destination.join(entry);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
                }
                fs::copy(self.source.join(entry), &target).map_err(|err| Error::io(&target, err))?;
            }
            Ok(())
        }
    }

    #[test]
    fn directory_volume_pages_carry_dimensions() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("Vol 1/p1.png"), 10, 20);
        write_png(&dir.path().join("Vol 1/p2.png"), 40, 20);
        let volume = VolumeEntry::from_path(dir.path().join("Vol 1"), VolumeKind::Directory).unwrap();

        let open = Engine::default()
            .open_volume(&volume, &CancellationToken::new())
            .unwrap();
        assert_eq!(open.page_count(), 2);
        assert!(!open.pages[0].is_wide());
        assert!(open.pages[1].is_wide());
    }

    #[test]
    fn archive_volume_is_staged_and_released() {
        let source = TempDir::new().unwrap();
        write_png(&source.path().join("p2.png"), 10, 20);
        write_png(&source.path().join("p10.png"), 30, 20);
        let engine = Engine::new(Arc::new(CopyExtractor {
            source: source.path().to_path_buf(),
            entries: vec!["p10.png".into(), "p2.png".into(), "cover.txt".into()],
        }));
        let volume =
            VolumeEntry::from_path(PathBuf::from("/lib/S/Vol 1.cbz"), VolumeKind::Archive).unwrap();

        let open = engine.open_volume(&volume, &CancellationToken::new()).unwrap();
        assert_eq!(open.page_count(), 2);
        assert!(open.pages[0].path.ends_with("p2.png"));
        let staged_dir = open.pages[0].path.parent().unwrap().to_path_buf();
        assert!(staged_dir.exists());
        assert_eq!(engine.page_count(&volume).unwrap(), 2);

        open.close();
        assert!(!staged_dir.exists());
    }

    #[test]
    fn archive_pages_with_shared_names_keep_archive_order() {
        let source = TempDir::new().unwrap();
        write_png(&source.path().join("a/9.png"), 10, 20);
        write_png(&source.path().join("b/1.png"), 40, 20);
        write_png(&source.path().join("c/1.png"), 10, 20);
        let engine = Engine::new(Arc::new(CopyExtractor {
            source: source.path().to_path_buf(),
            entries: vec!["c/1.png".into(), "a/9.png".into(), "b/".into(), "b/1.png".into()],
        }));
        let volume =
            VolumeEntry::from_path(PathBuf::from("/lib/S/Vol 1.cbz"), VolumeKind::Archive).unwrap();

        let open = engine.open_volume(&volume, &CancellationToken::new()).unwrap();
        assert_eq!(open.page_count(), 3);
        assert_eq!(engine.page_count(&volume).unwrap(), 3);
        let shapes: Vec<bool> = open.pages.iter().map(|p| p.is_wide()).collect();
        assert_eq!(shapes, vec![false, true, false]);
        assert!(open.pages[0].path.ends_with("a/9.png"));
        assert!(open.pages[1].path.ends_with("b/1.png"));
        assert!(open.pages[2].path.ends_with("c/1.png"));
        open.close();
    }
}
