//! On-disk thumbnail tier: one PNG plus one JSON record per cache key.

use std::fs;
use std::io::{Cursor, Write as _};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    width: u32,
    height: u32,
    page_count: Option<u32>,
}

/// A record loaded back from disk.
#[derive(Debug)]
pub(crate) struct DiskHit {
    pub image: DynamicImage,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        (
            self.dir.join(format!("{digest}.png")),
            self.dir.join(format!("{digest}.json")),
        )
    }

    /// `Ok(None)` on a miss. A record whose image no longer decodes is removed
    /// and reported as a miss.
    pub fn load(&self, key: &str) -> Result<Option<DiskHit>> {
        let (image_path, record_path) = self.paths(key);
        let raw = match fs::read(&record_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io(&record_path, err)),
        };
        let record: DiskRecord = serde_json::from_slice(&raw)?;
        if record.key != key {
            return Ok(None);
        }
        match image::open(&image_path) {
            Ok(image) => Ok(Some(DiskHit {
                image,
                page_count: record.page_count,
            })),
            Err(err) => {
                warn!(key, error = %err, "dropping unreadable disk thumbnail");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    /// Writes the image first and the record last, each through a temporary
    /// file renamed into place, so a record never points at a partial image.
    pub fn store(&self, key: &str, encoded_png: &[u8], width: u32, height: u32, page_count: Option<u32>) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| Error::io(&self.dir, err))?;
        let (image_path, record_path) = self.paths(key);
        let record = DiskRecord {
            key: key.to_string(),
            width,
            height,
            page_count,
        };
        self.write_atomic(&image_path, encoded_png)?;
        self.write_atomic(&record_path, &serde_json::to_vec(&record)?)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let (image_path, record_path) = self.paths(key);
        for path in [record_path, image_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::io(&path, err)),
            }
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|err| Error::io(&self.dir, err))?;
        file.write_all(bytes).map_err(|err| Error::io(file.path(), err))?;
        file.persist(path)
            .map_err(|err| Error::io(path, err.error))?;
        Ok(())
    }
}

pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(Error::Encode)?;
    Ok(bytes)
}
