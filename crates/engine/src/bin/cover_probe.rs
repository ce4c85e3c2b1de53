use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use comicshelf_core::{VolumeEntry, VolumeKind, is_archive_path};
use engine::{ArchiveExtractor, CancellationToken, CoverResolver, UnzipExtractor, VolumeIndex};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut folder: Option<PathBuf> = None;
    let mut unzip: Option<PathBuf> = None;
    let mut max_dimension: u32 = 400;
    let mut depth: usize = 3;

    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        let arg_str = arg.to_string_lossy();
        match arg_str.as_ref() {
            "--path" => {
                let value = args.next().context("missing value for --path")?;
                folder = Some(PathBuf::from(value));
            }
            "--unzip" => {
                let value = args.next().context("missing value for --unzip")?;
                unzip = Some(PathBuf::from(value));
            }
            "--max" => {
                let value = args.next().context("missing value for --max")?;
                let value_str = value.to_string_lossy();
                max_dimension = value_str
                    .parse::<u32>()
                    .with_context(|| format!("invalid --max value: {value_str}"))?;
                if max_dimension == 0 {
                    anyhow::bail!("--max must be >= 1");
                }
            }
            "--depth" => {
                let value = args.next().context("missing value for --depth")?;
                let value_str = value.to_string_lossy();
                depth = value_str
                    .parse::<usize>()
                    .with_context(|| format!("invalid --depth value: {value_str}"))?;
            }
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other => anyhow::bail!("unknown arg: {other} (try --help)"),
        }
    }

    let folder = folder.context("must pass --path <folder-or-archive> (try --help)")?;
    let extractor: Arc<dyn ArchiveExtractor> = match unzip {
        Some(program) => Arc::new(UnzipExtractor::with_program(program)),
        None => Arc::new(UnzipExtractor::from_path()),
    };
    let resolver = CoverResolver::new(Arc::clone(&extractor), max_dimension, depth);
    let cancel = CancellationToken::new();

    if folder.is_file() && is_archive_path(&folder) {
        let entries = extractor
            .list_entries(&folder)
            .with_context(|| format!("list entries of {}", folder.display()))?;
        println!("archive: ok (entries={})", entries.len());
        let volume = VolumeEntry::from_path(folder.clone(), VolumeKind::Archive)
            .context("archive path has no file name")?;
        println!("pages: {}", resolver.page_count(&volume)?);
        report(resolver.find_in_archive(&folder, &cancel)?);
        return Ok(());
    }

    let volumes = VolumeIndex::list(&folder)
        .with_context(|| format!("list volumes of {}", folder.display()))?;
    println!("volumes: {}", volumes.len());
    for volume in &volumes {
        println!("  - {} ({:?})", volume.key, volume.kind);
    }
    report(resolver.find(&folder, &cancel)?);
    Ok(())
}

fn report(found: Option<image::DynamicImage>) {
    match found {
        Some(image) => println!("cover: ok ({}x{})", image.width(), image.height()),
        None => println!("cover: none"),
    }
}

fn print_help() {
    println!(
        "\
cover_probe

Usage:
  cargo run -p engine --bin cover_probe -- --path <series-or-volume-folder>
  cargo run -p engine --bin cover_probe -- --path <volume.cbz> --unzip /usr/bin/unzip

Options:
  --path <path>   Series folder, volume folder or archive volume
  --unzip <path>  Extraction tool to use instead of `unzip` from PATH
  --max <px>      Maximum cover dimension (default: 400)
  --depth <n>     Maximum subfolder depth searched (default: 3)
  --help          Show this help
"
    );
}
