use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, bail};
use chrono::Utc;
use clap::Args;
use comicshelf_application::{
    AppContext, LibraryService, ProgressUpdate, ReaderSession, SeriesFilter, Spread,
    record_progress, restore_progress,
};
use comicshelf_core::{LibrarySeries, PageInfo, ReadingDirection, SeriesId, Tag, VolumeEntry};
use comicshelf_engine::{
    CancellationToken, CoverRequests, CoverState, CoverSubject, Engine, ThumbnailCache, WorkerPool,
};
use comicshelf_storage::Storage;
use tracing::{debug, warn};

const COVER_BATCH_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Session {
    pub storage: Storage,
    pub ctx: AppContext,
    pub engine: Engine,
    pub root: Option<PathBuf>,
    pub thumbnail_dir: PathBuf,
}

impl Session {
    pub fn require_root(&self) -> anyhow::Result<PathBuf> {
        self.root
            .clone()
            .context("no library root configured (pass --root or run `config --library-root`)")
    }

    fn series(&self, name: &str) -> anyhow::Result<LibrarySeries> {
        self.ctx
            .lookup(name)
            .cloned()
            .with_context(|| format!("no series matches {name:?}"))
    }

    fn volumes(&self, series: &LibrarySeries) -> anyhow::Result<Vec<VolumeEntry>> {
        self.engine
            .volumes(series.folder())
            .with_context(|| format!("list volumes of {}", series.title))
    }

    /// Volume by key, display name, 1-based position or case-insensitive name.
    fn volume(&self, series: &LibrarySeries, name: &str) -> anyhow::Result<VolumeEntry> {
        let volumes = self.volumes(series)?;
        let found = volumes
            .iter()
            .find(|v| v.key.as_str() == name)
            .or_else(|| volumes.iter().find(|v| v.name == name))
            .or_else(|| {
                name.parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| volumes.get(i))
            })
            .or_else(|| volumes.iter().find(|v| v.name.eq_ignore_ascii_case(name)));
        found
            .cloned()
            .with_context(|| format!("no volume {name:?} in {}", series.title))
    }

    fn save(&mut self, series: LibrarySeries) -> anyhow::Result<()> {
        self.storage.save_series(&series)?;
        match self.ctx.find_mut(&series.id) {
            Some(slot) => *slot = series,
            None => {
                let mut all = self.ctx.series.clone();
                all.push(series);
                self.ctx.replace_catalog(all);
            }
        }
        Ok(())
    }

    fn forget(&mut self, id: &SeriesId) -> anyhow::Result<()> {
        self.storage.delete_series(id)?;
        let remaining = self
            .ctx
            .series
            .iter()
            .filter(|s| &s.id != id)
            .cloned()
            .collect();
        self.ctx.replace_catalog(remaining);
        Ok(())
    }

    fn cache(&self) -> ThumbnailCache {
        self.engine
            .thumbnail_cache(&self.ctx.settings, &self.thumbnail_dir)
    }

    fn invalidate(&self, subjects: &[CoverSubject]) {
        let cache = self.cache();
        for subject in subjects {
            if let Err(err) = cache.invalidate(&subject.cache_key()) {
                warn!(key = %subject.cache_key(), error = %err, "cannot drop cached cover");
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only favorites
    #[arg(long)]
    favorites: bool,
    /// Only series carrying this tag
    #[arg(long)]
    tag: Option<String>,
    /// Case-insensitive title filter
    #[arg(long)]
    query: Option<String>,
    /// Hide finished series
    #[arg(long)]
    unread: bool,
}

#[derive(Debug, Args)]
pub struct SeriesArg {
    /// Series title, folder name or unique title prefix
    series: String,
}

#[derive(Debug, Args)]
pub struct VolumeArgs {
    series: String,
    /// Volume name, file name or 1-based position
    volume: String,
}

#[derive(Debug, Args)]
pub struct CoverArgs {
    /// Series to resolve; every listed series when omitted
    series: Option<String>,
    /// Resolve one volume's cover instead of the series cover
    #[arg(long, requires = "series")]
    volume: Option<String>,
    /// Drop the cached cover first
    #[arg(long)]
    refresh: bool,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    series: String,
    volume: String,
    /// Jump to this 1-based page before moving
    #[arg(long)]
    page: Option<usize>,
    /// Steps forward
    #[arg(long, default_value_t = 0)]
    forward: usize,
    /// Steps back
    #[arg(long, default_value_t = 0)]
    back: usize,
}

#[derive(Debug, Args)]
pub struct FinishedArgs {
    series: String,
    /// Clear the finished flag instead
    #[arg(long)]
    unset: bool,
}

#[derive(Debug, Args)]
pub struct TagArgs {
    series: String,
    tag: String,
    #[arg(long)]
    remove: bool,
}

#[derive(Debug, Args)]
pub struct MarkReadArgs {
    series: String,
    volume: String,
    #[arg(long)]
    unread: bool,
}

#[derive(Debug, Args)]
pub struct RenameSeriesArgs {
    series: String,
    new_name: String,
}

#[derive(Debug, Args)]
pub struct RenameVolumeArgs {
    series: String,
    volume: String,
    new_name: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    library_root: Option<PathBuf>,
    /// rtl, ltr or vertical
    #[arg(long, conflicts_with = "cycle_direction")]
    direction: Option<String>,
    /// Switch to the next reading direction (rtl, ltr, vertical)
    #[arg(long)]
    cycle_direction: bool,
    #[arg(long)]
    two_page: Option<bool>,
    #[arg(long)]
    cover_offset: Option<bool>,
    /// Covers kept in memory
    #[arg(long)]
    thumbnail_capacity: Option<usize>,
    /// Longest cover edge in pixels
    #[arg(long)]
    cover_size: Option<u32>,
    /// Subfolder levels searched for a cover
    #[arg(long)]
    cover_depth: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
}

pub fn list(session: &mut Session, args: ListArgs) -> anyhow::Result<()> {
    session.ctx.filter = SeriesFilter {
        query: args.query.unwrap_or_default(),
        favorites_only: args.favorites,
        tag: args.tag.map(Tag::from),
        unread_only: args.unread,
    };
    let visible = session.ctx.visible();
    if visible.is_empty() {
        println!("(no series)");
        return Ok(());
    }
    for series in visible {
        let mut flags = String::new();
        if series.is_favorite {
            flags.push('*');
        }
        if series.is_finished {
            flags.push('F');
        }
        let tags: Vec<&str> = series.tags.iter().map(Tag::as_str).collect();
        println!(
            "{:<2} {}  ({} read / {} volumes){}",
            flags,
            series.title,
            series.read_volumes.len(),
            series.volume_count,
            if tags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", tags.join(", "))
            }
        );
    }
    Ok(())
}

pub fn volumes(session: &Session, args: SeriesArg) -> anyhow::Result<()> {
    let series = session.series(&args.series)?;
    let volumes = session.volumes(&series)?;
    println!("{} ({})", series.title, series.folder_path);
    for (position, volume) in volumes.iter().enumerate() {
        let state = if series.is_volume_read(&volume.key) {
            "read".to_string()
        } else if let Some(page) = series.reading_progress.get(&volume.key) {
            format!("page {}", page + 1)
        } else {
            String::new()
        };
        println!(
            "{:>3}. {:<40} {:<9?} {}",
            position + 1,
            volume.name,
            volume.kind,
            state
        );
    }
    Ok(())
}

pub fn cover(session: &Session, args: CoverArgs) -> anyhow::Result<()> {
    let Some(name) = args.series.as_deref() else {
        return cover_all(session, args.refresh);
    };
    let series = session.series(name)?;
    let subject = match args.volume.as_deref() {
        Some(volume) => CoverSubject::Volume(session.volume(&series, volume)?),
        None => CoverSubject::series(series.folder()),
    };
    let cache = session.cache();
    let key = subject.cache_key();
    if args.refresh {
        cache.invalidate(&key)?;
    }
    match cache.get(&subject, &CancellationToken::new())? {
        Some(entry) => println!(
            "{key}: {}x{} ({} pages)",
            entry.width(),
            entry.height(),
            entry
                .page_count
                .map_or_else(|| "?".to_string(), |n| n.to_string())
        ),
        None => println!("{key}: no cover"),
    }
    Ok(())
}

fn cover_all(session: &Session, refresh: bool) -> anyhow::Result<()> {
    let cache = Arc::new(session.cache());
    let pool = Arc::new(
        WorkerPool::new(session.ctx.settings.worker_threads).context("start cover workers")?,
    );
    let mut requests: CoverRequests<SeriesId> = CoverRequests::new(Arc::clone(&cache), pool);

    for series in session.ctx.visible() {
        let subject = CoverSubject::series(series.folder());
        if refresh {
            cache.invalidate(&subject.cache_key())?;
        }
        requests.request(series.id.clone(), subject);
    }

    let deadline = Instant::now() + COVER_BATCH_TIMEOUT;
    while requests.pending() > 0 {
        if Instant::now() >= deadline {
            warn!(pending = requests.pending(), "gave up waiting for covers");
            break;
        }
        for update in requests.wait(Duration::from_millis(100)) {
            let title = session
                .ctx
                .find(&update.slot)
                .map_or(update.key.as_str(), |s| s.title.as_str());
            match update.state {
                CoverState::Ready(entry) => {
                    println!("{title}: {}x{}", entry.width(), entry.height());
                }
                CoverState::Missing => println!("{title}: no cover"),
            }
        }
    }
    debug!(cached = cache.memory_len(), "cover batch done");
    Ok(())
}

pub fn spreads(session: &Session, args: VolumeArgs) -> anyhow::Result<()> {
    let series = session.series(&args.series)?;
    let volume = session.volume(&series, &args.volume)?;
    let open = session.engine.open_volume(&volume, &CancellationToken::new())?;
    let config = session.ctx.settings.layout_config();
    let reader = ReaderSession::new(open.pages.clone(), config, 0);
    let layout = reader.layout();

    println!(
        "{} / {}: {} pages, {}{}",
        series.title,
        volume.name,
        layout.page_count(),
        config.direction,
        if config.two_page_mode { ", two-page" } else { "" }
    );
    let mut index = 0;
    while index < layout.page_count() {
        let spread = layout.compute_layout(index);
        println!(
            "{:>4}  {}",
            index + 1,
            describe(&spread, layout.pages(), config.direction)
        );
        let next = layout.next_index(index);
        if next <= index || index + spread.step >= layout.page_count() {
            break;
        }
        index = next;
    }
    open.close();
    Ok(())
}

pub fn read(session: &mut Session, args: ReadArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let volume = session.volume(&series, &args.volume)?;
    let open = session.engine.open_volume(&volume, &CancellationToken::new())?;
    let page_count = open.page_count();

    let restore = restore_progress(&mut series, &volume.key, page_count);
    let mut reader = ReaderSession::new(
        open.pages.clone(),
        session.ctx.settings.layout_config(),
        restore.index,
    );
    let start = reader.current_index();
    if let Some(page) = args.page {
        reader.go_to(page.saturating_sub(1));
    }
    for _ in 0..args.forward {
        if !reader.navigate_next() {
            break;
        }
    }
    for _ in 0..args.back {
        if !reader.navigate_previous() {
            break;
        }
    }

    let mut dirty = restore.cleared;
    let mut note = String::new();
    if reader.current_index() != start {
        let update = record_progress(
            &mut series,
            &volume.key,
            reader.current_index(),
            page_count,
            Utc::now(),
        );
        note = match update {
            ProgressUpdate::Finished => " (finished)".to_string(),
            ProgressUpdate::Cleared | ProgressUpdate::Stored(_) | ProgressUpdate::Ignored => {
                String::new()
            }
        };
        dirty = true;
    }
    if dirty {
        session.save(series.clone())?;
    }

    let progress = reader.progress();
    println!(
        "{} / {}: page {}/{} ({:.0}%){}  {}",
        series.title,
        volume.name,
        progress.current_page,
        progress.total_pages,
        progress.percent(),
        note,
        describe(
            &reader.current_spread(),
            reader.layout().pages(),
            session.ctx.settings.reading_direction
        )
    );
    open.close();
    Ok(())
}

pub fn favorite(session: &mut Session, args: SeriesArg) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let now = LibraryService.toggle_favorite(&mut series);
    println!(
        "{}: {}",
        series.title,
        if now { "favorite" } else { "not favorite" }
    );
    session.save(series)
}

pub fn finished(session: &mut Session, args: FinishedArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    if LibraryService.set_finished(&mut series, !args.unset) {
        session.save(series)?;
    }
    Ok(())
}

pub fn tag(session: &mut Session, args: TagArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let tag = Tag::from(args.tag);
    let changed = if args.remove {
        LibraryService.remove_tag(&mut series, &tag)
    } else {
        LibraryService.add_tag(&mut series, tag)
    };
    if changed {
        session.save(series)?;
    }
    Ok(())
}

pub fn mark_read(session: &mut Session, args: MarkReadArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let volume = session.volume(&series, &args.volume)?;
    if LibraryService.set_volume_read(&mut series, &volume.key, !args.unread) {
        session.save(series)?;
    }
    Ok(())
}

pub fn rename_series(session: &mut Session, args: RenameSeriesArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let renamed = LibraryService
        .rename_series(&mut series, &args.new_name)
        .with_context(|| format!("rename {}", series.title))?;
    session.invalidate(&[CoverSubject::series(&renamed.from)]);
    println!("{} -> {}", renamed.from.display(), renamed.to.display());
    session.save(series)
}

pub fn rename_volume(session: &mut Session, args: RenameVolumeArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let volume = session.volume(&series, &args.volume)?;
    let renamed = LibraryService
        .rename_volume(&mut series, &volume, &args.new_name)
        .with_context(|| format!("rename {}", volume.name))?;
    session.invalidate(&[
        CoverSubject::Volume(volume.clone()),
        CoverSubject::series(series.folder()),
    ]);
    println!("{} -> {}", volume.key, renamed.key);
    session.save(series)
}

pub fn delete_volume(session: &mut Session, args: VolumeArgs) -> anyhow::Result<()> {
    let mut series = session.series(&args.series)?;
    let volume = session.volume(&series, &args.volume)?;
    LibraryService
        .delete_volume(&mut series, &volume)
        .with_context(|| format!("delete {}", volume.name))?;
    session.invalidate(&[
        CoverSubject::Volume(volume.clone()),
        CoverSubject::series(series.folder()),
    ]);
    println!("deleted {}", volume.path.display());
    session.save(series)
}

pub fn delete_series(session: &mut Session, args: SeriesArg) -> anyhow::Result<()> {
    let series = session.series(&args.series)?;
    LibraryService
        .delete_series(&series)
        .with_context(|| format!("delete {}", series.title))?;
    session.invalidate(&[CoverSubject::series(series.folder())]);
    println!("deleted {}", series.folder_path);
    session.forget(&series.id)
}

pub fn config(session: &mut Session, args: ConfigArgs) -> anyhow::Result<()> {
    let mut settings = session.ctx.settings.clone();
    let mut changed = false;
    if let Some(root) = args.library_root {
        let root = std::fs::canonicalize(&root)
            .with_context(|| format!("resolve {}", root.display()))?;
        settings.library_root = Some(root.to_string_lossy().to_string());
        changed = true;
    }
    if let Some(direction) = args.direction {
        settings.reading_direction = match direction.parse::<ReadingDirection>() {
            Ok(direction) => direction,
            Err(err) => bail!("{err}: {direction}"),
        };
        changed = true;
    }
    if args.cycle_direction {
        settings.cycle_reading_direction();
        changed = true;
    }
    if let Some(two_page) = args.two_page {
        settings.two_page_mode = two_page;
        changed = true;
    }
    if let Some(cover_offset) = args.cover_offset {
        settings.cover_offset = cover_offset;
        changed = true;
    }
    if let Some(capacity) = args.thumbnail_capacity {
        settings.thumbnail_capacity = capacity;
        changed = true;
    }
    if let Some(size) = args.cover_size {
        settings.cover_max_dimension = size;
        changed = true;
    }
    if let Some(depth) = args.cover_depth {
        settings.cover_search_depth = depth;
        changed = true;
    }
    if let Some(workers) = args.workers {
        settings.worker_threads = workers;
        changed = true;
    }

    if changed {
        settings.normalize();
        session.storage.save_settings(&settings)?;
        session.ctx.settings = settings.clone();
    }
    println!(
        "library_root        {}",
        settings.library_root.as_deref().unwrap_or("-")
    );
    println!("reading_direction   {}", settings.reading_direction);
    println!("two_page_mode       {}", settings.two_page_mode);
    println!("cover_offset        {}", settings.cover_offset);
    println!("thumbnail_capacity  {}", settings.thumbnail_capacity);
    println!("cover_max_dimension {}", settings.cover_max_dimension);
    println!("cover_search_depth  {}", settings.cover_search_depth);
    println!("worker_threads      {}", settings.worker_threads);
    Ok(())
}

fn describe(spread: &Spread, pages: &[PageInfo], direction: ReadingDirection) -> String {
    let name = |index: usize| {
        pages
            .get(index)
            .and_then(|p| p.path.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    let screen = spread.on_screen(direction);
    if let Some(center) = screen.center {
        return format!("[ {} ]", name(center));
    }
    match (screen.left, screen.right) {
        (Some(left), Some(right)) => format!("[ {} | {} ]", name(left), name(right)),
        (Some(left), None) => format!("[ {} |   ]", name(left)),
        (None, Some(right)) => format!("[   | {} ]", name(right)),
        (None, None) => "[ ]".to_string(),
    }
}
