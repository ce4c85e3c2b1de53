//! Sqlite-backed persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use comicshelf_core::{LibrarySeries, ReadingDirection, SeriesId, Settings, Tag, VolumeKey};
use rusqlite::{Connection, OptionalExtension as _, Row};
use tracing::debug;

#[derive(Debug)]
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db at {}", path.as_ref().display()))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                reading_direction TEXT NOT NULL,
                two_page_mode INTEGER NOT NULL,
                cover_offset INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO settings (id, reading_direction, two_page_mode, cover_offset)
            VALUES (1, 'rtl', 1, 1);

            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                folder_path TEXT NOT NULL UNIQUE,
                date_added INTEGER NOT NULL,
                date_modified INTEGER NOT NULL,
                volume_count INTEGER NOT NULL DEFAULT 0,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                is_finished INTEGER NOT NULL DEFAULT 0,
                tags_json TEXT NOT NULL DEFAULT '[]',
                read_volumes_json TEXT NOT NULL DEFAULT '[]',
                progress_json TEXT NOT NULL DEFAULT '{}',
                last_read INTEGER
            );
            "#,
        )?;

        self.add_column("settings", "library_root TEXT")?;
        self.add_column("settings", "thumbnail_capacity INTEGER NOT NULL DEFAULT 256")?;
        self.add_column("settings", "cover_max_dimension INTEGER NOT NULL DEFAULT 400")?;
        self.add_column("settings", "cover_search_depth INTEGER NOT NULL DEFAULT 3")?;
        self.add_column("settings", "worker_threads INTEGER NOT NULL DEFAULT 4")?;
        Ok(())
    }

    /// `ALTER TABLE ... ADD COLUMN` that tolerates an already migrated db.
    fn add_column(&self, table: &str, definition: &str) -> anyhow::Result<()> {
        match self
            .conn
            .execute(&format!("ALTER TABLE {table} ADD COLUMN {definition}"), [])
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("duplicate column name") {
                    Ok(())
                } else {
                    Err(err).with_context(|| format!("add {table} column: {definition}"))
                }
            }
        }
    }

    pub fn load_settings(&self) -> anyhow::Result<Settings> {
        let row = self
            .conn
            .query_row(
                "SELECT library_root, reading_direction, two_page_mode, cover_offset, thumbnail_capacity, cover_max_dimension, cover_search_depth, worker_threads FROM settings WHERE id = 1",
                [],
                |row| {
                    let library_root: Option<String> = row.get(0)?;
                    let reading_direction: String = row.get(1)?;
                    let two_page_mode: bool = row.get(2)?;
                    let cover_offset: bool = row.get(3)?;
                    let thumbnail_capacity: i64 = row.get(4)?;
                    let cover_max_dimension: i64 = row.get(5)?;
                    let cover_search_depth: i64 = row.get(6)?;
                    let worker_threads: i64 = row.get(7)?;
                    Ok((
                        library_root,
                        reading_direction,
                        two_page_mode,
                        cover_offset,
                        thumbnail_capacity,
                        cover_max_dimension,
                        cover_search_depth,
                        worker_threads,
                    ))
                },
            )
            .optional()?;

        let Some((
            library_root,
            reading_direction,
            two_page_mode,
            cover_offset,
            thumbnail_capacity,
            cover_max_dimension,
            cover_search_depth,
            worker_threads,
        )) = row
        else {
            return Ok(Settings::default());
        };

        let defaults = Settings::default();
        let mut settings = Settings {
            library_root,
            reading_direction: reading_direction
                .parse::<ReadingDirection>()
                .unwrap_or(defaults.reading_direction),
            two_page_mode,
            cover_offset,
            thumbnail_capacity: usize::try_from(thumbnail_capacity)
                .unwrap_or(defaults.thumbnail_capacity),
            cover_max_dimension: u32::try_from(cover_max_dimension)
                .unwrap_or(defaults.cover_max_dimension),
            cover_search_depth: usize::try_from(cover_search_depth)
                .unwrap_or(defaults.cover_search_depth),
            worker_threads: usize::try_from(worker_threads).unwrap_or(defaults.worker_threads),
        };
        settings.normalize();
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut settings = settings.clone();
        settings.normalize();

        self.conn.execute(
            "UPDATE settings SET library_root = ?, reading_direction = ?, two_page_mode = ?, cover_offset = ?, thumbnail_capacity = ?, cover_max_dimension = ?, cover_search_depth = ?, worker_threads = ? WHERE id = 1",
            (
                settings.library_root.as_deref(),
                settings.reading_direction.as_str(),
                settings.two_page_mode,
                settings.cover_offset,
                settings.thumbnail_capacity as i64,
                i64::from(settings.cover_max_dimension),
                settings.cover_search_depth as i64,
                settings.worker_threads as i64,
            ),
        )?;
        Ok(())
    }

    pub fn list_series(&self) -> anyhow::Result<Vec<LibrarySeries>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SERIES_COLUMNS} FROM series ORDER BY title COLLATE NOCASE, folder_path"
        ))?;
        let rows = stmt.query_map([], SeriesRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_series()?);
        }
        Ok(out)
    }

    pub fn series(&self, id: &SeriesId) -> anyhow::Result<Option<LibrarySeries>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SERIES_COLUMNS} FROM series WHERE id = ?"),
                [id.as_str()],
                SeriesRow::read,
            )
            .optional()?;
        row.map(SeriesRow::into_series).transpose()
    }

    pub fn save_series(&self, series: &LibrarySeries) -> anyhow::Result<()> {
        upsert_series(&self.conn, series)
            .with_context(|| format!("save series {}", series.folder_path))
    }

    pub fn delete_series(&self, id: &SeriesId) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM series WHERE id = ?", [id.as_str()])?;
        Ok(())
    }

    /// Writes a batch of catalog changes atomically: either every upsert and
    /// delete lands or none does.
    pub fn apply_changes(
        &mut self,
        upserts: &[LibrarySeries],
        deletes: &[SeriesId],
    ) -> anyhow::Result<()> {
        if upserts.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for id in deletes {
            tx.execute("DELETE FROM series WHERE id = ?", [id.as_str()])
                .with_context(|| format!("delete series {id}"))?;
        }
        for series in upserts {
            upsert_series(&tx, series)
                .with_context(|| format!("save series {}", series.folder_path))?;
        }
        tx.commit()?;
        debug!(
            upserts = upserts.len(),
            deletes = deletes.len(),
            "applied catalog changes"
        );
        Ok(())
    }
}

const SERIES_COLUMNS: &str = "id, title, folder_path, date_added, date_modified, volume_count, is_favorite, is_finished, tags_json, read_volumes_json, progress_json, last_read";

fn upsert_series(conn: &Connection, series: &LibrarySeries) -> anyhow::Result<()> {
    let tags_json = serde_json::to_string(&series.tags)?;
    let read_volumes_json = serde_json::to_string(&series.read_volumes)?;
    let progress_json = serde_json::to_string(&series.reading_progress)?;
    conn.execute(
        r#"
        INSERT INTO series (id, title, folder_path, date_added, date_modified, volume_count,
                            is_favorite, is_finished, tags_json, read_volumes_json, progress_json, last_read)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            folder_path = excluded.folder_path,
            date_added = excluded.date_added,
            date_modified = excluded.date_modified,
            volume_count = excluded.volume_count,
            is_favorite = excluded.is_favorite,
            is_finished = excluded.is_finished,
            tags_json = excluded.tags_json,
            read_volumes_json = excluded.read_volumes_json,
            progress_json = excluded.progress_json,
            last_read = excluded.last_read
        "#,
        rusqlite::params![
            series.id.as_str(),
            &series.title,
            &series.folder_path,
            series.date_added.timestamp_millis(),
            series.date_modified.timestamp_millis(),
            i64::from(series.volume_count),
            series.is_favorite,
            series.is_finished,
            tags_json,
            read_volumes_json,
            progress_json,
            series.last_read_date.map(|d| d.timestamp_millis()),
        ],
    )?;
    Ok(())
}

/// Raw column values; JSON and timestamp decoding happens outside the row
/// callback so failures carry context.
struct SeriesRow {
    id: String,
    title: String,
    folder_path: String,
    date_added: i64,
    date_modified: i64,
    volume_count: i64,
    is_favorite: bool,
    is_finished: bool,
    tags_json: String,
    read_volumes_json: String,
    progress_json: String,
    last_read: Option<i64>,
}

impl SeriesRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            folder_path: row.get(2)?,
            date_added: row.get(3)?,
            date_modified: row.get(4)?,
            volume_count: row.get(5)?,
            is_favorite: row.get(6)?,
            is_finished: row.get(7)?,
            tags_json: row.get(8)?,
            read_volumes_json: row.get(9)?,
            progress_json: row.get(10)?,
            last_read: row.get(11)?,
        })
    }

    fn into_series(self) -> anyhow::Result<LibrarySeries> {
        let tags: BTreeSet<Tag> = serde_json::from_str(&self.tags_json)
            .with_context(|| format!("decode tags of {}", self.folder_path))?;
        let read_volumes: BTreeSet<VolumeKey> = serde_json::from_str(&self.read_volumes_json)
            .with_context(|| format!("decode read volumes of {}", self.folder_path))?;
        let reading_progress: BTreeMap<VolumeKey, u32> = serde_json::from_str(&self.progress_json)
            .with_context(|| format!("decode progress of {}", self.folder_path))?;
        Ok(LibrarySeries {
            id: SeriesId(self.id),
            title: self.title,
            date_added: from_millis(self.date_added)?,
            date_modified: from_millis(self.date_modified)?,
            volume_count: u32::try_from(self.volume_count).unwrap_or(0),
            is_favorite: self.is_favorite,
            is_finished: self.is_finished,
            tags,
            read_volumes,
            reading_progress,
            last_read_date: self.last_read.map(from_millis).transpose()?,
            folder_path: self.folder_path,
        })
    }
}

fn from_millis(value: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .with_context(|| format!("timestamp out of range: {value}"))
}
