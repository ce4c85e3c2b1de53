use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comicshelf_application::{AppContext, CatalogSync, SyncPlan};
use comicshelf_engine::Engine;
use comicshelf_storage::Storage;
use directories::ProjectDirs;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "comicshelf", version, about = "Local comic and manga library reader")]
pub struct Cli {
    /// Library root for this run (overrides the stored setting)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Use an alternate database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use an alternate thumbnail directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Skip the library sync that runs before every command
    #[arg(long, global = true)]
    no_sync: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile the catalog with the library folder
    Sync,
    /// List series in the catalog
    List(commands::ListArgs),
    /// List the volumes of a series
    Volumes(commands::SeriesArg),
    /// Resolve cover thumbnails
    Cover(commands::CoverArgs),
    /// Show how a volume's pages pair up into spreads
    Spreads(commands::VolumeArgs),
    /// Open a volume, move through it and remember the position
    Read(commands::ReadArgs),
    /// Toggle the favorite flag of a series
    Favorite(commands::SeriesArg),
    /// Mark a series finished or not
    Finished(commands::FinishedArgs),
    /// Add or remove a tag
    Tag(commands::TagArgs),
    /// Mark a volume read or unread
    MarkRead(commands::MarkReadArgs),
    /// Rename a series folder
    RenameSeries(commands::RenameSeriesArgs),
    /// Rename a volume inside its series
    RenameVolume(commands::RenameVolumeArgs),
    /// Delete a volume from disk and the catalog
    DeleteVolume(commands::VolumeArgs),
    /// Delete a series folder from disk and the catalog
    DeleteSeries(commands::SeriesArg),
    /// Show or change settings
    Config(commands::ConfigArgs),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project_dirs =
        ProjectDirs::from("dev", "comicshelf", "comicshelf").context("resolve project dirs")?;

    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => {
            let config_dir = project_dirs.config_dir();
            fs::create_dir_all(config_dir)
                .with_context(|| format!("create config dir {}", config_dir.display()))?;
            config_dir.join("comicshelf.db")
        }
    };
    let thumbnail_dir = match &cli.cache_dir {
        Some(path) => path.clone(),
        None => project_dirs.cache_dir().join("thumbnails"),
    };

    let mut storage = Storage::open(&db_path)?;
    let mut settings = storage.load_settings()?;
    let root = cli
        .root
        .clone()
        .or_else(|| settings.library_root.as_ref().map(PathBuf::from))
        // Series are keyed by folder path, so the root must always be spelled
        // the same way.
        .map(|root| fs::canonicalize(&root).unwrap_or(root));
    if settings.library_root.is_none()
        && let Some(root) = &root
    {
        settings.library_root = Some(root.to_string_lossy().to_string());
        storage.save_settings(&settings)?;
    }

    if !cli.no_sync
        && !matches!(cli.command, Command::Sync | Command::Config(_))
        && let Some(root) = &root
    {
        // A failed startup sync leaves the stored catalog as it was.
        if let Err(err) = sync_library(&mut storage, root) {
            warn!(error = %format!("{err:#}"), "library sync skipped");
        }
    }

    let series = storage.list_series()?;
    let ctx = AppContext::new(settings).with_library(series);
    let mut session = commands::Session {
        storage,
        ctx,
        engine: Engine::default(),
        root,
        thumbnail_dir,
    };

    match cli.command {
        Command::Sync => {
            let root = session.require_root()?;
            let plan = sync_library(&mut session.storage, &root)?;
            println!(
                "synced {}: {} added, {} updated, {} removed",
                root.display(),
                plan.created.len(),
                plan.updated.len(),
                plan.deleted.len()
            );
            Ok(())
        }
        Command::List(args) => commands::list(&mut session, args),
        Command::Volumes(args) => commands::volumes(&session, args),
        Command::Cover(args) => commands::cover(&session, args),
        Command::Spreads(args) => commands::spreads(&session, args),
        Command::Read(args) => commands::read(&mut session, args),
        Command::Favorite(args) => commands::favorite(&mut session, args),
        Command::Finished(args) => commands::finished(&mut session, args),
        Command::Tag(args) => commands::tag(&mut session, args),
        Command::MarkRead(args) => commands::mark_read(&mut session, args),
        Command::RenameSeries(args) => commands::rename_series(&mut session, args),
        Command::RenameVolume(args) => commands::rename_volume(&mut session, args),
        Command::DeleteVolume(args) => commands::delete_volume(&mut session, args),
        Command::DeleteSeries(args) => commands::delete_series(&mut session, args),
        Command::Config(args) => commands::config(&mut session, args),
    }
}

/// Scans `root`, writes the resulting plan in one transaction and returns it.
fn sync_library(storage: &mut Storage, root: &Path) -> anyhow::Result<SyncPlan> {
    let existing = storage.list_series()?;
    let plan = CatalogSync::new()
        .sync(root, &existing, Utc::now())
        .with_context(|| format!("sync library at {}", root.display()))?;
    storage.apply_changes(&plan.upserts(), &plan.deleted_ids())?;
    Ok(plan)
}
