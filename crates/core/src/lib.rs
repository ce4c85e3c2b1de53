//! Core domain types for comicshelf.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod natural;

pub use natural::{natural_cmp, sort_natural_by_key};

/// Raster formats a page or cover may use (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];

/// File extensions treated as single-file volumes.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz", "epub"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub String);

impl SeriesId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted identifier of a volume inside its series folder: the on-disk entry
/// name, extension included. Read state and progress are keyed by it; the
/// display name is derived and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeKey(pub String);

impl VolumeKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    Directory,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    pub key: VolumeKey,
    pub name: String,
    pub path: PathBuf,
    pub kind: VolumeKind,
}

impl VolumeEntry {
    pub fn from_path(path: PathBuf, kind: VolumeKind) -> Option<Self> {
        let file_name = path.file_name()?.to_string_lossy().to_string();
        let name = match kind {
            VolumeKind::Directory => file_name.clone(),
            VolumeKind::Archive => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file_name.clone()),
        };
        Some(Self {
            key: VolumeKey(file_name),
            name,
            path,
            kind,
        })
    }
}

/// One page of an open volume with its pixel size (zero when unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl PageInfo {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }

    /// Landscape pages (double-page scans) are always shown alone.
    pub fn is_wide(&self) -> bool {
        self.width > self.height
    }
}

/// Library tag. `ToRead` is the one tag the application knows about; anything
/// else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    ToRead,
    Custom(String),
}

impl Tag {
    pub fn as_str(&self) -> &str {
        match self {
            Tag::ToRead => "To Read",
            Tag::Custom(name) => name,
        }
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("to read") {
            Tag::ToRead
        } else if trimmed.len() == value.len() {
            Tag::Custom(value)
        } else {
            Tag::Custom(trimmed.to_string())
        }
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::from(value.to_string())
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        match value {
            Tag::ToRead => "To Read".to_string(),
            Tag::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySeries {
    pub id: SeriesId,
    pub title: String,
    pub folder_path: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub volume_count: u32,
    pub is_favorite: bool,
    pub is_finished: bool,
    pub tags: BTreeSet<Tag>,
    pub read_volumes: BTreeSet<VolumeKey>,
    pub reading_progress: BTreeMap<VolumeKey, u32>,
    pub last_read_date: Option<DateTime<Utc>>,
}

impl LibrarySeries {
    pub fn new(
        folder_path: impl Into<String>,
        date_modified: DateTime<Utc>,
        volume_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let folder_path = folder_path.into();
        let title = Path::new(&folder_path)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        Self {
            id: SeriesId::generate(),
            title,
            folder_path,
            date_added: truncate_millis(now),
            date_modified: truncate_millis(date_modified),
            volume_count,
            is_favorite: false,
            is_finished: false,
            tags: BTreeSet::new(),
            read_volumes: BTreeSet::new(),
            reading_progress: BTreeMap::new(),
            last_read_date: None,
        }
    }

    pub fn folder(&self) -> &Path {
        Path::new(&self.folder_path)
    }

    pub fn is_volume_read(&self, key: &VolumeKey) -> bool {
        self.read_volumes.contains(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    RightToLeft,
    LeftToRight,
    Vertical,
}

impl ReadingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingDirection::RightToLeft => "rtl",
            ReadingDirection::LeftToRight => "ltr",
            ReadingDirection::Vertical => "vertical",
        }
    }
}

impl std::fmt::Display for ReadingDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReadingDirection {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rtl" | "righttoleft" | "right-to-left" => Ok(ReadingDirection::RightToLeft),
            "ltr" | "lefttoright" | "left-to-right" => Ok(ReadingDirection::LeftToRight),
            "vertical" => Ok(ReadingDirection::Vertical),
            _ => Err("unknown reading direction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub direction: ReadingDirection,
    pub two_page_mode: bool,
    pub cover_offset: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: ReadingDirection::RightToLeft,
            two_page_mode: true,
            cover_offset: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub library_root: Option<String>,
    pub reading_direction: ReadingDirection,
    pub two_page_mode: bool,
    pub cover_offset: bool,
    pub thumbnail_capacity: usize,
    pub cover_max_dimension: u32,
    pub cover_search_depth: usize,
    pub worker_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            library_root: None,
            reading_direction: ReadingDirection::RightToLeft,
            two_page_mode: true,
            cover_offset: true,
            thumbnail_capacity: 256,
            cover_max_dimension: 400,
            cover_search_depth: 3,
            worker_threads: 4,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.thumbnail_capacity = self.thumbnail_capacity.clamp(1, 4096);
        self.cover_max_dimension = self.cover_max_dimension.clamp(32, 2048);
        self.cover_search_depth = self.cover_search_depth.min(8);
        self.worker_threads = self.worker_threads.clamp(1, 16);
        self.library_root = self
            .library_root
            .take()
            .map(|root| root.trim().to_string())
            .filter(|root| !root.is_empty());
    }

    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            direction: self.reading_direction,
            two_page_mode: self.two_page_mode,
            cover_offset: self.cover_offset,
        }
    }

    pub fn cycle_reading_direction(&mut self) {
        self.reading_direction = match self.reading_direction {
            ReadingDirection::RightToLeft => ReadingDirection::LeftToRight,
            ReadingDirection::LeftToRight => ReadingDirection::Vertical,
            ReadingDirection::Vertical => ReadingDirection::RightToLeft,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current_page: u32,
    pub total_pages: u32,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            f64::from(self.current_page) / f64::from(self.total_pages)
        }
    }

    pub fn percent(&self) -> f32 {
        (self.fraction() * 100.0) as f32
    }
}

pub fn is_hidden_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

pub fn has_extension_in(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

pub fn is_image_path(path: &Path) -> bool {
    has_extension_in(path, IMAGE_EXTENSIONS)
}

pub fn is_archive_path(path: &Path) -> bool {
    has_extension_in(path, ARCHIVE_EXTENSIONS)
}

/// Timestamps are persisted with millisecond precision; everything that is
/// compared against a stored value goes through here first.
pub fn truncate_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}

pub fn timestamp_from_system_time(value: SystemTime) -> DateTime<Utc> {
    truncate_millis(DateTime::<Utc>::from(value))
}
