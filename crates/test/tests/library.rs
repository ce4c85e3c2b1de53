use std::fs;
use std::sync::Arc;

use chrono::Utc;
use comicshelf_application::{
    LibraryService, ProgressUpdate, ReaderSession, record_progress, restore_progress,
};
use comicshelf_core::{LayoutConfig, VolumeKey};
use comicshelf_engine::{CancellationToken, CoverSubject, Engine};
use comicshelf_storage::Storage;
use comicshelf_test::{LibraryFixture, make_settings, sync_into, write_png};

const TALL: (u32, u32) = (60, 90);
const WIDE: (u32, u32) = (120, 90);

#[test]
fn sync_is_idempotent_across_restarts() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("Berserk", "Vol 2", &[TALL])?;
    fixture.add_volume("Berserk", "Vol 10", &[TALL])?;
    fixture.add_volume("Monster", "Vol 1", &[TALL])?;
    fs::create_dir_all(fixture.root().join(".hidden"))?;

    let mut storage = Storage::open(fixture.db_path())?;
    let first = sync_into(&mut storage, &fixture.root())?;
    assert_eq!(first.created.len(), 2);
    let catalog = storage.list_series()?;
    drop(storage);

    let mut storage = Storage::open(fixture.db_path())?;
    let second = sync_into(&mut storage, &fixture.root())?;
    assert!(second.is_empty(), "unexpected changes: {second:?}");
    assert_eq!(storage.list_series()?, catalog);
    let berserk = catalog.iter().find(|s| s.title == "Berserk").unwrap();
    assert_eq!(berserk.volume_count, 2);
    Ok(())
}

#[test]
fn removed_series_loses_its_state() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("Gone", "Vol 1", &[TALL])?;
    fixture.add_volume("Kept", "Vol 1", &[TALL])?;
    let mut storage = Storage::open_in_memory()?;
    sync_into(&mut storage, &fixture.root())?;

    let mut gone = storage
        .list_series()?
        .into_iter()
        .find(|s| s.title == "Gone")
        .unwrap();
    gone.read_volumes.insert(VolumeKey::new("Vol 1"));
    storage.save_series(&gone)?;

    fs::remove_dir_all(fixture.series_path("Gone"))?;
    let plan = sync_into(&mut storage, &fixture.root())?;
    assert_eq!(plan.deleted.len(), 1);
    assert!(storage.series(&gone.id)?.is_none());

    fixture.add_volume("Gone", "Vol 1", &[TALL])?;
    sync_into(&mut storage, &fixture.root())?;
    let back = storage
        .list_series()?
        .into_iter()
        .find(|s| s.title == "Gone")
        .unwrap();
    assert_ne!(back.id, gone.id);
    assert!(back.read_volumes.is_empty());
    Ok(())
}

#[test]
fn unreadable_root_changes_nothing() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("A", "Vol 1", &[TALL])?;
    let mut storage = Storage::open_in_memory()?;
    sync_into(&mut storage, &fixture.root())?;

    let missing = fixture.root().join("not-here");
    assert!(sync_into(&mut storage, &missing).is_err());
    assert_eq!(storage.list_series()?.len(), 1);
    Ok(())
}

#[test]
fn reading_progress_survives_reopen() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    let pages = vec![TALL; 20];
    fixture.add_volume("S", "Vol 1", &pages)?;
    let mut storage = Storage::open_in_memory()?;
    sync_into(&mut storage, &fixture.root())?;

    let engine = Engine::default();
    let mut series = storage.list_series()?.remove(0);
    let volume = engine.volumes(series.folder())?.remove(0);
    let open = engine.open_volume(&volume, &CancellationToken::new())?;
    assert_eq!(open.page_count(), 20);

    let mut reader = ReaderSession::new(open.pages.clone(), LayoutConfig::default(), 0);
    reader.navigate_next();
    reader.navigate_next();
    assert_eq!(reader.current_index(), 3);
    let update = record_progress(&mut series, &volume.key, 3, open.page_count(), Utc::now());
    assert_eq!(update, ProgressUpdate::Stored(3));
    storage.save_series(&series)?;
    open.close();

    let mut reloaded = storage.series(&series.id)?.unwrap();
    let restore = restore_progress(&mut reloaded, &volume.key, 20);
    assert_eq!(restore.index, 3);
    assert!(!restore.cleared);

    // Resync must not disturb progress on a volume that still exists.
    assert!(sync_into(&mut storage, &fixture.root())?.is_empty());
    Ok(())
}

#[test]
fn finishing_a_volume_marks_it_read() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("S", "Vol 1", &vec![TALL; 50])?;
    let mut storage = Storage::open_in_memory()?;
    sync_into(&mut storage, &fixture.root())?;
    let mut series = storage.list_series()?.remove(0);
    let key = VolumeKey::new("Vol 1");

    series.reading_progress.insert(key.clone(), 48);
    let restore = restore_progress(&mut series, &key, 50);
    assert_eq!(restore.index, 0);
    assert!(restore.cleared);

    assert_eq!(
        record_progress(&mut series, &key, 49, 50, Utc::now()),
        ProgressUpdate::Finished
    );
    storage.save_series(&series)?;
    let reloaded = storage.series(&series.id)?.unwrap();
    assert!(reloaded.is_volume_read(&key));
    assert!(reloaded.reading_progress.is_empty());
    Ok(())
}

#[test]
fn spreads_follow_page_shapes() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("S", "Vol 1", &[TALL, TALL, WIDE, TALL, TALL])?;
    let engine = Engine::default();
    let volume = engine.volumes(&fixture.series_path("S"))?.remove(0);
    let open = engine.open_volume(&volume, &CancellationToken::new())?;

    let mut reader = ReaderSession::new(open.pages.clone(), LayoutConfig::default(), 0);
    let mut starts = vec![reader.current_index()];
    while reader.navigate_next() {
        starts.push(reader.current_index());
    }
    assert_eq!(starts, vec![0, 1, 2, 3, 4]);
    assert!(reader.layout().compute_layout(3).is_pair());
    reader.navigate_previous();
    assert_eq!(reader.current_index(), 3);
    open.close();
    Ok(())
}

#[test]
fn series_cover_is_cached_on_disk_and_refreshed_after_invalidate() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    let volume = fixture.add_volume("S", "Vol 1", &[(200, 300), TALL])?;
    let settings = make_settings(4);
    let engine = Engine::default();
    let subject = CoverSubject::series(fixture.series_path("S"));
    let cancel = CancellationToken::new();

    let cache = engine.thumbnail_cache(&settings, &fixture.thumbnail_dir());
    let first = cache.get(&subject, &cancel)?.unwrap();
    assert_eq!((first.width(), first.height()), (43, 64));
    assert_eq!(first.page_count, Some(1));
    assert!(fs::read_dir(fixture.thumbnail_dir())?.count() >= 2);

    // A fresh instance finds the disk copy.
    let cache = engine.thumbnail_cache(&settings, &fixture.thumbnail_dir());
    let again = cache.get(&subject, &cancel)?.unwrap();
    assert_eq!((again.width(), again.height()), (43, 64));

    write_png(&volume.join("001.png"), 300, 150, 7)?;
    cache.invalidate(&subject.cache_key())?;
    let refreshed = cache.get(&subject, &cancel)?.unwrap();
    assert_eq!((refreshed.width(), refreshed.height()), (64, 32));
    Ok(())
}

#[test]
fn archive_volumes_are_staged_and_covered() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_archive("S", "Vol 1.cbz", &[TALL, WIDE, TALL])?;
    let extractor = Arc::new(fixture.extractor());
    let engine = Engine::new(extractor.clone());

    let volume = engine.volumes(&fixture.series_path("S"))?.remove(0);
    assert_eq!(volume.key, VolumeKey::new("Vol 1.cbz"));
    assert_eq!(volume.name, "Vol 1");
    assert_eq!(engine.page_count(&volume)?, 3);

    let open = engine.open_volume(&volume, &CancellationToken::new())?;
    assert_eq!(open.page_count(), 3);
    assert!(open.pages[1].is_wide());
    let staged = open.pages[0].path.parent().unwrap().to_path_buf();
    open.close();
    assert!(!staged.exists());

    let cache = engine.thumbnail_cache(&make_settings(4), &fixture.thumbnail_dir());
    let cover = cache
        .get(&CoverSubject::Volume(volume.clone()), &CancellationToken::new())?
        .unwrap();
    assert_eq!(cover.page_count, Some(3));
    assert_eq!(extractor.extractions(), 2);
    Ok(())
}

#[test]
fn volume_rename_keeps_state_through_sync() -> anyhow::Result<()> {
    let fixture = LibraryFixture::new()?;
    fixture.add_volume("S", "Vol 1", &[TALL])?;
    fixture.add_volume("S", "Vol 2", &[TALL, TALL, TALL])?;
    let mut storage = Storage::open_in_memory()?;
    sync_into(&mut storage, &fixture.root())?;

    let engine = Engine::default();
    let mut series = storage.list_series()?.remove(0);
    let volumes = engine.volumes(series.folder())?;
    series.read_volumes.insert(volumes[0].key.clone());
    series.reading_progress.insert(volumes[1].key.clone(), 1);
    storage.save_series(&series)?;

    let renamed = LibraryService.rename_volume(&mut series, &volumes[1], "Vol 02")?;
    storage.save_series(&series)?;
    sync_into(&mut storage, &fixture.root())?;
    let after = storage.series(&series.id)?.unwrap();
    assert_eq!(after.reading_progress.get(&renamed.key), Some(&1));
    assert!(after.is_volume_read(&VolumeKey::new("Vol 1")));

    // Renamed behind the application's back: the state is dropped.
    fs::rename(
        fixture.series_path("S").join("Vol 1"),
        fixture.series_path("S").join("Vol 01"),
    )?;
    sync_into(&mut storage, &fixture.root())?;
    let after = storage.series(&series.id)?.unwrap();
    assert!(after.read_volumes.is_empty());
    assert_eq!(after.volume_count, 2);
    Ok(())
}
