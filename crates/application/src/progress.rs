//! Reading progress rules for a series' volumes.

use chrono::{DateTime, Utc};
use comicshelf_core::{LibrarySeries, VolumeKey};
use tracing::debug;

/// Reaching this share of a volume's pages counts as having read it.
pub const FINISHED_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Back on the first page: nothing to resume.
    Cleared,
    /// Volume marked read; its resume point dropped.
    Finished,
    Stored(u32),
    /// Volume has no pages.
    Ignored,
}

/// Start page for a volume being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restore {
    pub index: usize,
    /// The stored entry was removed and the series needs saving.
    pub cleared: bool,
}

fn finished(index: usize, page_count: usize) -> bool {
    page_count > 0 && index as f64 / page_count as f64 >= FINISHED_THRESHOLD
}

/// Records that `volume` is now showing page `index`.
pub fn record_progress(
    series: &mut LibrarySeries,
    volume: &VolumeKey,
    index: usize,
    page_count: usize,
    now: DateTime<Utc>,
) -> ProgressUpdate {
    if page_count == 0 {
        return ProgressUpdate::Ignored;
    }
    series.last_read_date = Some(comicshelf_core::truncate_millis(now));

    if index == 0 {
        series.reading_progress.remove(volume);
        return ProgressUpdate::Cleared;
    }
    if finished(index, page_count) {
        series.reading_progress.remove(volume);
        if series.read_volumes.insert(volume.clone()) {
            debug!(series = %series.title, volume = %volume, "volume finished");
        }
        return ProgressUpdate::Finished;
    }
    let stored = u32::try_from(index).unwrap_or(u32::MAX);
    series.reading_progress.insert(volume.clone(), stored);
    ProgressUpdate::Stored(stored)
}

/// Where to open `volume`. A resume point at or past the finished threshold
/// is stale and dropped; one beyond the current page list is ignored.
pub fn restore_progress(
    series: &mut LibrarySeries,
    volume: &VolumeKey,
    page_count: usize,
) -> Restore {
    let Some(stored) = series.reading_progress.get(volume).copied() else {
        return Restore {
            index: 0,
            cleared: false,
        };
    };
    let stored = stored as usize;
    if finished(stored, page_count) {
        series.reading_progress.remove(volume);
        return Restore {
            index: 0,
            cleared: true,
        };
    }
    Restore {
        index: if stored < page_count { stored } else { 0 },
        cleared: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn series() -> LibrarySeries {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        LibrarySeries::new("/lib/S", at, 2, at)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn middle_page_is_stored() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        assert_eq!(
            record_progress(&mut series, &key, 12, 50, now()),
            ProgressUpdate::Stored(12)
        );
        assert_eq!(series.reading_progress.get(&key), Some(&12));
        assert_eq!(series.last_read_date, Some(now()));
    }

    #[test]
    fn first_page_clears_progress() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        series.reading_progress.insert(key.clone(), 9);
        assert_eq!(
            record_progress(&mut series, &key, 0, 50, now()),
            ProgressUpdate::Cleared
        );
        assert!(series.reading_progress.is_empty());
    }

    #[test]
    fn near_end_marks_read() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        series.reading_progress.insert(key.clone(), 30);
        // 48 / 50 = 0.96
        assert_eq!(
            record_progress(&mut series, &key, 48, 50, now()),
            ProgressUpdate::Finished
        );
        assert!(series.is_volume_read(&key));
        assert!(series.reading_progress.is_empty());
        // 47 / 50 = 0.94
        let other = VolumeKey::new("Vol 2");
        assert_eq!(
            record_progress(&mut series, &other, 47, 50, now()),
            ProgressUpdate::Stored(47)
        );
    }

    #[test]
    fn stale_near_end_progress_restarts_and_clears() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        series.reading_progress.insert(key.clone(), 48);
        let restore = restore_progress(&mut series, &key, 50);
        assert_eq!(
            restore,
            Restore {
                index: 0,
                cleared: true
            }
        );
        assert!(!series.reading_progress.contains_key(&key));
    }

    #[test]
    fn restore_resumes_in_range() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        series.reading_progress.insert(key.clone(), 10);
        assert_eq!(restore_progress(&mut series, &key, 50).index, 10);
        assert_eq!(restore_progress(&mut series, &key, 0).index, 0);
        assert!(series.reading_progress.contains_key(&key));
        assert_eq!(
            restore_progress(&mut series, &VolumeKey::new("Vol 9"), 50).index,
            0
        );
    }

    #[test]
    fn empty_volume_is_ignored() {
        let mut series = series();
        let key = VolumeKey::new("Vol 1");
        assert_eq!(
            record_progress(&mut series, &key, 0, 0, now()),
            ProgressUpdate::Ignored
        );
        assert!(series.last_read_date.is_none());
    }
}
