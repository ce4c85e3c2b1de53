//! Test helpers and fixtures.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use comicshelf_application::{CatalogSync, SyncPlan};
use comicshelf_core::Settings;
use comicshelf_engine::{ArchiveExtractor, CancelCheck, CancellationToken, Error, Result};
use comicshelf_storage::Storage;
use tempfile::TempDir;

pub fn make_settings(thumbnail_capacity: usize) -> Settings {
    let mut settings = Settings {
        thumbnail_capacity,
        cover_max_dimension: 64,
        worker_threads: 2,
        ..Settings::default()
    };
    settings.normalize();
    settings
}

/// Writes a solid-color PNG, creating parent directories.
pub fn write_png(path: &Path, width: u32, height: u32, shade: u8) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image::RgbImage::from_pixel(width, height, image::Rgb([shade, shade, shade])).save(path)?;
    Ok(())
}

/// A library root in a temporary directory, plus a side store for the
/// contents of fake archive volumes.
pub struct LibraryFixture {
    dir: TempDir,
}

impl LibraryFixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("library"))?;
        fs::create_dir_all(dir.path().join("archives"))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn series_path(&self, series: &str) -> PathBuf {
        self.root().join(series)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.dir.path().join("thumbnails")
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("comicshelf.db")
    }

    pub fn archive_store(&self) -> PathBuf {
        self.dir.path().join("archives")
    }

    /// Adds a folder volume whose pages have the given `(width, height)`.
    pub fn add_volume(&self, series: &str, volume: &str, pages: &[(u32, u32)]) -> anyhow::Result<PathBuf> {
        let path = self.series_path(series).join(volume);
        fs::create_dir_all(&path)?;
        for (index, (width, height)) in pages.iter().enumerate() {
            let shade = u8::try_from(index * 10 % 250).unwrap_or(0);
            write_png(&path.join(format!("{:03}.png", index + 1)), *width, *height, shade)?;
        }
        Ok(path)
    }

    /// Adds an archive volume. The file itself is a placeholder; its pages
    /// live in the archive store where [`StoreExtractor`] finds them.
    pub fn add_archive(&self, series: &str, file_name: &str, pages: &[(u32, u32)]) -> anyhow::Result<PathBuf> {
        let path = self.series_path(series).join(file_name);
        fs::create_dir_all(self.series_path(series))?;
        fs::write(&path, b"PK")?;
        let contents = self.archive_store().join(file_name);
        fs::create_dir_all(&contents)?;
        for (index, (width, height)) in pages.iter().enumerate() {
            write_png(&contents.join(format!("page{}.png", index + 1)), *width, *height, 200)?;
        }
        Ok(path)
    }

    pub fn extractor(&self) -> StoreExtractor {
        StoreExtractor::new(self.archive_store())
    }
}

/// Stands in for the external extraction tool: an archive named `x.cbz`
/// holds whatever files sit in `<store>/x.cbz/`.
pub struct StoreExtractor {
    store: PathBuf,
    extractions: AtomicUsize,
}

impl StoreExtractor {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
            extractions: AtomicUsize::new(0),
        }
    }

    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    fn contents(&self, archive: &Path) -> Result<PathBuf> {
        let name = archive
            .file_name()
            .ok_or_else(|| Error::extraction(archive, "archive has no file name"))?;
        Ok(self.store.join(name))
    }
}

impl ArchiveExtractor for StoreExtractor {
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>> {
        let contents = self.contents(archive)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&contents).map_err(|err| Error::io(&contents, err))? {
            let entry = entry.map_err(|err| Error::io(&contents, err))?;
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(entries)
    }

    fn extract(
        &self,
        archive: &Path,
        entries: &[String],
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        let contents = self.contents(archive)?;
        for entry in entries {
            cancel.check()?;
            let target = destination.join(entry);
            fs::copy(contents.join(entry), &target).map_err(|err| Error::io(&target, err))?;
        }
        Ok(())
    }
}

/// Runs one sync of `root` against `storage` the way the binary does.
pub fn sync_into(storage: &mut Storage, root: &Path) -> anyhow::Result<SyncPlan> {
    let existing = storage.list_series()?;
    let plan = CatalogSync::new().sync(root, &existing, Utc::now())?;
    storage.apply_changes(&plan.upserts(), &plan.deleted_ids())?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use comicshelf_engine::VolumeIndex;

    #[test]
    fn builds_settings() {
        let settings = make_settings(0);
        assert_eq!(settings.thumbnail_capacity, 1);
        assert_eq!(settings.cover_max_dimension, 64);
    }

    #[test]
    fn fixture_lays_out_volumes() -> anyhow::Result<()> {
        let fixture = LibraryFixture::new()?;
        fixture.add_volume("S", "Vol 1", &[(10, 20), (10, 20)])?;
        fixture.add_archive("S", "Vol 2.cbz", &[(10, 20)])?;
        let volumes = VolumeIndex::list(&fixture.series_path("S"))?;
        assert_eq!(volumes.len(), 2);
        let entries = fixture.extractor().list_entries(&volumes[1].path)?;
        assert_eq!(entries, vec!["page1.png".to_string()]);
        Ok(())
    }
}
