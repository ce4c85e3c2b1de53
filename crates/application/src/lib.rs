//! Application orchestration layer for comicshelf.

use comicshelf_core::{LibrarySeries, SeriesId, Settings, Tag, natural_cmp};

mod layout;
mod library;
mod progress;
mod sync;

pub use layout::{PageLayoutEngine, ReaderSession, ScreenSpread, Spread};
pub use library::{LibraryService, RenameError, Renamed};
pub use progress::{FINISHED_THRESHOLD, ProgressUpdate, Restore, record_progress, restore_progress};
pub use sync::{CatalogSync, FolderSnapshot, FolderState, SyncError, SyncPlan};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesFilter {
    pub query: String,
    pub favorites_only: bool,
    pub tag: Option<Tag>,
    pub unread_only: bool,
}

impl SeriesFilter {
    pub fn matches(&self, series: &LibrarySeries) -> bool {
        if self.favorites_only && !series.is_favorite {
            return false;
        }
        if self.unread_only && series.is_finished {
            return false;
        }
        if let Some(tag) = &self.tag
            && !series.tags.contains(tag)
        {
            return false;
        }
        let query = self.query.trim();
        query.is_empty() || series.title.to_lowercase().contains(&query.to_lowercase())
    }
}

/// In-memory view of the catalog owned by the control thread.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub series: Vec<LibrarySeries>,
    pub selected: usize,
    pub filter: SeriesFilter,
}

impl AppContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            series: Vec::new(),
            selected: 0,
            filter: SeriesFilter::default(),
        }
    }

    pub fn with_library(mut self, series: Vec<LibrarySeries>) -> Self {
        self.replace_catalog(series);
        self
    }

    /// Installs a new catalog, keeping the selection on the same series
    /// when it survived.
    pub fn replace_catalog(&mut self, mut series: Vec<LibrarySeries>) {
        let selected_id = self.series.get(self.selected).map(|s| s.id.clone());
        series.sort_by(|a, b| {
            natural_cmp(&a.title, &b.title).then_with(|| a.folder_path.cmp(&b.folder_path))
        });
        self.series = series;
        self.selected = selected_id
            .and_then(|id| self.series.iter().position(|s| s.id == id))
            .unwrap_or(0)
            .min(self.series.len().saturating_sub(1));
    }

    pub fn visible(&self) -> Vec<&LibrarySeries> {
        self.series.iter().filter(|s| self.filter.matches(s)).collect()
    }

    pub fn find(&self, id: &SeriesId) -> Option<&LibrarySeries> {
        self.series.iter().find(|s| &s.id == id)
    }

    pub fn find_mut(&mut self, id: &SeriesId) -> Option<&mut LibrarySeries> {
        self.series.iter_mut().find(|s| &s.id == id)
    }

    /// Looks a series up by exact title first, then by folder name, then by
    /// a unique case-insensitive title prefix.
    pub fn lookup(&self, name: &str) -> Option<&LibrarySeries> {
        if let Some(found) = self.series.iter().find(|s| s.title == name) {
            return Some(found);
        }
        if let Some(found) = self
            .series
            .iter()
            .find(|s| s.folder().file_name().is_some_and(|f| f == name))
        {
            return Some(found);
        }
        let needle = name.to_lowercase();
        let mut prefixed = self
            .series
            .iter()
            .filter(|s| s.title.to_lowercase().starts_with(&needle));
        match (prefixed.next(), prefixed.next()) {
            (Some(found), None) => Some(found),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn series(title: &str) -> LibrarySeries {
        LibrarySeries::new(format!("/lib/{title}"), Utc::now(), 1, Utc::now())
    }

    #[test]
    fn catalog_is_naturally_ordered_and_selection_survives() {
        let mut ctx = AppContext::new(Settings::default())
            .with_library(vec![series("Vol 10"), series("Vol 2"), series("Alpha")]);
        let titles: Vec<&str> = ctx.series.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Vol 2", "Vol 10"]);

        ctx.selected = 2;
        let keep = ctx.series.clone();
        ctx.replace_catalog(vec![keep[2].clone(), keep[1].clone()]);
        assert_eq!(ctx.series[ctx.selected].title, "Vol 10");
    }

    #[test]
    fn filter_combines_conditions() {
        let mut fav = series("Berserk");
        fav.is_favorite = true;
        fav.tags.insert(Tag::ToRead);
        let ctx = AppContext {
            filter: SeriesFilter {
                query: "ber".to_string(),
                favorites_only: true,
                tag: Some(Tag::ToRead),
                unread_only: false,
            },
            ..AppContext::new(Settings::default()).with_library(vec![fav, series("Bleach")])
        };
        let visible = ctx.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "Berserk");
    }

    #[test]
    fn lookup_prefers_exact_then_unique_prefix() {
        let ctx = AppContext::new(Settings::default()).with_library(vec![
            series("One Piece"),
            series("One Punch"),
            series("Monster"),
        ]);
        assert_eq!(ctx.lookup("Monster").unwrap().title, "Monster");
        assert_eq!(ctx.lookup("mon").unwrap().title, "Monster");
        assert!(ctx.lookup("one").is_none());
    }
}
