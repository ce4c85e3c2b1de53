//! Catalog synchronization: reconciles the library root's child folders with
//! the persisted series records.
//!
//! Scanning touches the filesystem; planning is pure. A plan lists whole
//! records to create, update and delete, so applying it never leaves a record
//! half-written.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use comicshelf_core::{
    LibrarySeries, SeriesId, VolumeKey, is_hidden_name, sort_natural_by_key,
    timestamp_from_system_time,
};
use comicshelf_engine::VolumeIndex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("library root {} is unreadable", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a scan saw for one series folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSnapshot {
    pub folder_path: String,
    /// `None` when the folder could not be listed or stat'ed; the existing
    /// record (if any) is then left alone.
    pub state: Option<FolderState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderState {
    pub modified: DateTime<Utc>,
    pub volumes: BTreeSet<VolumeKey>,
}

impl FolderState {
    pub fn volume_count(&self) -> u32 {
        u32::try_from(self.volumes.len()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub created: Vec<LibrarySeries>,
    pub updated: Vec<LibrarySeries>,
    pub deleted: Vec<LibrarySeries>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Records to write, new ones first.
    pub fn upserts(&self) -> Vec<LibrarySeries> {
        self.created
            .iter()
            .chain(self.updated.iter())
            .cloned()
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<SeriesId> {
        self.deleted.iter().map(|s| s.id.clone()).collect()
    }

    /// The catalog after this plan, in natural title order.
    pub fn apply(&self, catalog: &[LibrarySeries]) -> Vec<LibrarySeries> {
        let deleted: HashSet<&SeriesId> = self.deleted.iter().map(|s| &s.id).collect();
        let mut out: Vec<LibrarySeries> = catalog
            .iter()
            .filter(|s| !deleted.contains(&s.id))
            .map(|s| {
                self.updated
                    .iter()
                    .find(|u| u.id == s.id)
                    .cloned()
                    .unwrap_or_else(|| s.clone())
            })
            .collect();
        out.extend(self.created.iter().cloned());
        sort_natural_by_key(&mut out, |s| s.title.as_str());
        out
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogSync;

impl CatalogSync {
    pub fn new() -> Self {
        Self
    }

    /// Scans `root` and plans the changes that bring `catalog` in line with
    /// it. An unreadable root yields an error and no plan.
    pub fn sync(
        &self,
        root: &Path,
        catalog: &[LibrarySeries],
        now: DateTime<Utc>,
    ) -> Result<SyncPlan, SyncError> {
        let snapshots = self.scan(root)?;
        let plan = self.plan(&snapshots, catalog, now);
        info!(
            root = %root.display(),
            created = plan.created.len(),
            updated = plan.updated.len(),
            deleted = plan.deleted.len(),
            "library sync planned"
        );
        Ok(plan)
    }

    /// Lists the immediate, non-hidden child directories of `root`.
    pub fn scan(&self, root: &Path) -> Result<Vec<FolderSnapshot>, SyncError> {
        let read_dir = fs::read_dir(root).map_err(|source| SyncError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })?;

        let mut folders = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| SyncError::RootUnreadable {
                path: root.to_path_buf(),
                source,
            })?;
            if is_hidden_name(&entry.file_name()) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                folders.push(path);
            }
        }
        sort_natural_by_key(&mut folders, |p| {
            p.file_name().and_then(|n| n.to_str()).unwrap_or_default()
        });

        Ok(folders.into_iter().map(|path| snapshot(&path)).collect())
    }

    pub fn plan(
        &self,
        snapshots: &[FolderSnapshot],
        catalog: &[LibrarySeries],
        now: DateTime<Utc>,
    ) -> SyncPlan {
        let mut plan = SyncPlan::default();
        let mut discovered: HashSet<&str> = HashSet::new();

        for snapshot in snapshots {
            discovered.insert(snapshot.folder_path.as_str());
            let existing = catalog
                .iter()
                .find(|s| s.folder_path == snapshot.folder_path);
            match (existing, &snapshot.state) {
                (Some(series), Some(state)) => {
                    if let Some(updated) = reconcile(series, state) {
                        debug!(folder = %series.folder_path, "series changed on disk");
                        plan.updated.push(updated);
                    }
                }
                (None, Some(state)) => {
                    debug!(folder = %snapshot.folder_path, "new series folder");
                    plan.created.push(LibrarySeries::new(
                        snapshot.folder_path.clone(),
                        state.modified,
                        state.volume_count(),
                        now,
                    ));
                }
                (_, None) => {}
            }
        }

        for series in catalog {
            if !discovered.contains(series.folder_path.as_str()) {
                debug!(folder = %series.folder_path, "series folder disappeared");
                plan.deleted.push(series.clone());
            }
        }
        plan
    }
}

fn snapshot(path: &Path) -> FolderSnapshot {
    let folder_path = path.to_string_lossy().to_string();
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => timestamp_from_system_time(modified),
        Err(err) => {
            warn!(folder = %path.display(), error = %err, "cannot stat series folder");
            return FolderSnapshot {
                folder_path,
                state: None,
            };
        }
    };
    match VolumeIndex::list(path) {
        Ok(volumes) => FolderSnapshot {
            folder_path,
            state: Some(FolderState {
                modified,
                volumes: volumes.into_iter().map(|v| v.key).collect(),
            }),
        },
        Err(err) => {
            warn!(folder = %path.display(), error = %err, "cannot list series volumes");
            FolderSnapshot {
                folder_path,
                state: None,
            }
        }
    }
}

/// Returns the updated record, or `None` when nothing differs.
fn reconcile(series: &LibrarySeries, state: &FolderState) -> Option<LibrarySeries> {
    let mut next = series.clone();
    let volume_count = state.volume_count();
    if next.volume_count != volume_count {
        next.volume_count = volume_count;
    }
    if next.date_modified != state.modified {
        next.date_modified = state.modified;
    }
    next.read_volumes.retain(|key| state.volumes.contains(key));
    next.reading_progress
        .retain(|key, _| state.volumes.contains(key));

    (next != *series).then_some(next)
}
