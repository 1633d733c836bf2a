//! Size-based rotating file sink.
//!
//! # Responsibilities
//! - Append log lines to a single active file
//! - Rename the active file to a timestamped backup once it reaches the size cap
//! - Compress, age out and count-limit backups after each rotation
//!
//! # Design Decisions
//! - Only the rename and reopen happen under the writer lock; pruning and
//!   compression run on a dedicated cleanup thread
//! - Cleanup requests coalesce: at most one run is queued at a time
//! - Backup names embed a UTC timestamp so ordering survives restarts
//! - Post-rotation cleanup failures never fail the write that triggered them

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

/// Timestamp layout embedded in backup file names.
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Size cap applied when none is configured.
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Limits governing rotation and backup retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Active file size that triggers a rotation.
    pub max_bytes: u64,
    /// Backups to keep; `None` keeps all.
    pub max_backups: Option<usize>,
    /// Age after which backups are deleted; `None` disables.
    pub max_age: Option<Duration>,
    /// Gzip backups after rotation.
    pub compress: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_backups: None,
            max_age: None,
            compress: false,
        }
    }
}

/// A cloneable handle to a rotating log file.
#[derive(Debug, Clone)]
pub struct RollingFileAppender {
    inner: Arc<Mutex<RollingFile>>,
}

#[derive(Debug)]
struct RollingFile {
    path: PathBuf,
    file: File,
    size: u64,
    policy: RotationPolicy,
    /// Stamp of the previous backup; stamps only move forward.
    last_stamp: Option<DateTime<Utc>>,
    /// Wakes the cleanup thread. Started on the first rotation.
    cleanup: Option<mpsc::Sender<()>>,
}

impl RollingFileAppender {
    /// Open (or create) the active file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile {
                path,
                file,
                size,
                policy,
                last_stamp: None,
                cleanup: None,
            })),
        })
    }

    /// Path of the active file.
    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Flush buffered bytes of the active file.
    pub fn flush(&self) -> io::Result<()> {
        self.lock().file.flush()
    }

    fn lock(&self) -> MutexGuard<'_, RollingFile> {
        // A panic mid-write leaves the file usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<'a> MakeWriter<'a> for RollingFileAppender {
    type Writer = RollingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriter(self.lock())
    }
}

/// Exclusive writer handed to the formatter for one event.
pub struct RollingWriter<'a>(MutexGuard<'a, RollingFile>);

impl Write for RollingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.file.flush()
    }
}

impl RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.size > 0 && self.size.saturating_add(incoming) > self.policy.max_bytes {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size = self.size.saturating_add(written as u64);
        Ok(written)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let mut stamp = Utc::now();
        if let Some(last) = self.last_stamp {
            stamp = stamp.max(last + chrono::Duration::milliseconds(1));
        }
        let mut backup = backup_path(&self.path, stamp);
        while backup.exists() || gz_path(&backup).exists() {
            stamp += chrono::Duration::milliseconds(1);
            backup = backup_path(&self.path, stamp);
        }

        fs::rename(&self.path, &backup)?;
        self.last_stamp = Some(stamp);
        self.file = open_append(&self.path)?;
        self.size = 0;

        self.request_cleanup();
        Ok(())
    }

    /// Queue a prune/compress pass. A full queue already covers this rotation.
    fn request_cleanup(&mut self) {
        if self.cleanup.is_none() {
            self.cleanup = spawn_cleanup(self.path.clone(), self.policy.clone());
        }
        match &self.cleanup {
            Some(tx) => {
                let _ = tx.try_send(());
            }
            None => run_cleanup(&self.path, &self.policy),
        }
    }
}

/// Start the cleanup thread for `path`. It exits when the appender is dropped.
fn spawn_cleanup(path: PathBuf, policy: RotationPolicy) -> Option<mpsc::Sender<()>> {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let spawned = thread::Builder::new()
        .name("log-rotation".to_string())
        .spawn(move || {
            while rx.blocking_recv().is_some() {
                run_cleanup(&path, &policy);
            }
        });

    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            eprintln!("failed to start log cleanup thread, cleaning up inline: {e}");
            None
        }
    }
}

fn run_cleanup(path: &Path, policy: &RotationPolicy) {
    // The subscriber may be writing through us, so problems go to stderr.
    if let Err(e) = prune_backups(path, policy, Utc::now()) {
        eprintln!("log rotation cleanup failed for {}: {e}", path.display());
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Split `dir/app.log` into (`app`, Some(`log`)).
fn name_parts(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned());
    (stem, ext)
}

/// `dir/app.log` → `dir/app-2024-01-02T03-04-05.006.log`.
fn backup_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let (stem, ext) = name_parts(path);
    let stamp = at.format(BACKUP_TIME_FORMAT);
    let name = match ext {
        Some(ext) => format!("{stem}-{stamp}.{ext}"),
        None => format!("{stem}-{stamp}"),
    };
    path.with_file_name(name)
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

#[derive(Debug)]
struct Backup {
    path: PathBuf,
    taken_at: DateTime<Utc>,
    compressed: bool,
}

/// Backups of `path`, newest first.
fn list_backups(path: &Path) -> io::Result<Vec<Backup>> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    let (stem, ext) = name_parts(path);
    let prefix = format!("{stem}-");
    let suffix = ext.map(|e| format!(".{e}")).unwrap_or_default();

    let mut backups = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let (body, compressed) = match name.strip_suffix(".gz") {
            Some(body) => (body, true),
            None => (name.as_str(), false),
        };
        let Some(stamp) = body
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
        else {
            continue;
        };
        let Ok(naive) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) else {
            continue;
        };
        backups.push(Backup {
            path: entry.path(),
            taken_at: naive.and_utc(),
            compressed,
        });
    }

    backups.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
    Ok(backups)
}

fn prune_backups(path: &Path, policy: &RotationPolicy, now: DateTime<Utc>) -> io::Result<()> {
    let mut remaining = Vec::new();
    for (index, backup) in list_backups(path)?.into_iter().enumerate() {
        let over_count = policy.max_backups.is_some_and(|max| index >= max);
        let expired = policy.max_age.is_some_and(|age| {
            chrono::Duration::from_std(age)
                .map(|age| backup.taken_at < now - age)
                .unwrap_or(false)
        });
        if over_count || expired {
            fs::remove_file(&backup.path)?;
        } else {
            remaining.push(backup);
        }
    }

    if policy.compress {
        for backup in remaining.iter().filter(|b| !b.compressed) {
            compress_file(&backup.path)?;
        }
    }
    Ok(())
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut source = File::open(path)?;
    let target = File::create(gz_path(path))?;
    let mut encoder = GzEncoder::new(target, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)
}
