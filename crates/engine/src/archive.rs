//! Archive volumes: the external extraction tool and staging directories.

use std::io::Read as _;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::worker::{CancelCheck, CancellationToken};

/// Extracts named entries of an archive into a directory. Decompression itself
/// is delegated; implementations only have to honour the entry list and the
/// cancellation token.
pub trait ArchiveExtractor: Send + Sync {
    /// Entry names in archive order, directories included.
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>>;

    /// Writes `entries` into `destination`, each at its in-archive path so
    /// that same-named pages in different folders stay distinct.
    fn extract(
        &self,
        archive: &Path,
        entries: &[String],
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// [`ArchiveExtractor`] backed by the Info-ZIP `unzip` command.
#[derive(Debug, Clone)]
pub struct UnzipExtractor {
    program: Option<PathBuf>,
}

/// `unzip` exit status for "none of the requested entries exist".
const UNZIP_NO_MATCH: i32 = 11;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl UnzipExtractor {
    pub fn from_path() -> Self {
        let program = match which::which("unzip") {
            Ok(path) => Some(path),
            Err(err) => {
                debug!(error = %err, "unzip not found; archive volumes have no pages");
                None
            }
        };
        Self { program }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn program(&self, archive: &Path) -> Result<&Path> {
        self.program
            .as_deref()
            .ok_or_else(|| Error::extraction(archive, "`unzip` not found on PATH"))
    }
}

impl ArchiveExtractor for UnzipExtractor {
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>> {
        let output = Command::new(self.program(archive)?)
            .arg("-Z1")
            .arg(archive)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| Error::extraction(archive, err.to_string()))?;
        if !output.status.success() {
            return Err(Error::extraction(
                archive,
                format!(
                    "listing failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn extract(
        &self,
        archive: &Path,
        entries: &[String],
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut cmd = Command::new(self.program(archive)?);
        cmd.args(["-o", "-qq"]).arg(archive);
        for entry in entries {
            cmd.arg(escape_wildcards(entry));
        }
        cmd.arg("-d")
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::extraction(archive, err.to_string()))?;
        // Drained concurrently so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        let collect_stderr = |reader: Option<JoinHandle<String>>| {
            reader
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default()
        };

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                collect_stderr(stderr);
                debug!(archive = %archive.display(), "extraction cancelled");
                return Err(Error::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    collect_stderr(stderr);
                    return Err(Error::extraction(archive, err.to_string()));
                }
            }
        };

        let stderr = collect_stderr(stderr);
        if status.success() {
            return Ok(());
        }
        let reason = if status.code() == Some(UNZIP_NO_MATCH) {
            "requested entries not found".to_string()
        } else {
            format!("unzip exited with {status}: {}", tail(stderr.trim(), 512))
        };
        Err(Error::extraction(archive, reason))
    }
}

/// A temporary directory holding extracted pages. Removed on drop whatever the
/// outcome of the work done inside it.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("comicshelf-staging-")
            .tempdir()
            .map_err(|err| Error::io(std::env::temp_dir(), err))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Extracts `entries` of `archive` into a fresh staging directory.
    pub fn extract(
        extractor: &dyn ArchiveExtractor,
        archive: &Path,
        entries: &[String],
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let staging = Self::new()?;
        extractor.extract(archive, entries, staging.path(), cancel)?;
        Ok(staging)
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            warn!(staging = %path.display(), error = %err, "could not remove staging directory");
        }
    }
}

/// `unzip` treats entry arguments as wildcard patterns; bracket the
/// metacharacters so names are matched literally.
fn escape_wildcards(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    for c in entry.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Last `max` bytes of `text`, cut on a character boundary.
fn tail(text: &str, max: usize) -> &str {
    let mut start = text.len().saturating_sub(max);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Where `entry` lands inside a staging directory. Entry names that could
/// escape it are refused.
pub fn staged_path(staging: &Path, entry: &str) -> Option<PathBuf> {
    let relative = Path::new(entry);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (safe && !entry.is_empty()).then(|| staging.join(relative))
}
