//! JSON Lines record writer
//!
//! Each stream is a `.jsonl` file opened in append mode. A record is
//! serialized up front and written with a single `write_all` of the full
//! line under the stream's lock, then synced before the call returns.
//!
//! A failed append is rolled back by truncating the file to its length
//! before the write, so a stream never keeps part of a record. If even the
//! rollback fails, the stream refuses every later append.

use crate::config::OutputConfig;
use crate::output::traits::{OutputError, OutputResult, RecordSink, Stream};
use crate::storage::archive;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// One append-only stream file
#[derive(Debug)]
struct StreamFile {
    path: PathBuf,
    file: Mutex<File>,

    /// Set when a failed append could not be rolled back
    poisoned: AtomicBool,
}

impl StreamFile {
    fn open(path: &Path, reset: bool) -> OutputResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if reset && std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
            if let Some(archived) = archive(path, chrono::Utc::now().timestamp())? {
                tracing::info!(
                    from = %path.display(),
                    to = %archived.display(),
                    "Archived previous output"
                );
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        terminate_torn_line(&mut file, path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            poisoned: AtomicBool::new(false),
        })
    }

    // Critical sections never panic, but don't let a poisoned lock stop the run
    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writes games and reviews to two JSONL files
#[derive(Debug)]
pub struct JsonlRecordWriter {
    games: StreamFile,
    reviews: StreamFile,
}

impl JsonlRecordWriter {
    /// Opens both streams for appending
    ///
    /// # Arguments
    ///
    /// * `games_path` - File receiving one record per valid game
    /// * `reviews_path` - File receiving one record per review
    /// * `reset` - Archive existing non-empty files and start empty ones
    pub fn open(games_path: &Path, reviews_path: &Path, reset: bool) -> OutputResult<Self> {
        Ok(Self {
            games: StreamFile::open(games_path, reset)?,
            reviews: StreamFile::open(reviews_path, reset)?,
        })
    }

    /// Opens the streams named in the output configuration
    pub fn from_config(config: &OutputConfig, reset: bool) -> OutputResult<Self> {
        Self::open(&config.games_path, &config.reviews_path, reset)
    }

    pub fn path(&self, stream: Stream) -> &Path {
        &self.stream(stream).path
    }

    fn stream(&self, stream: Stream) -> &StreamFile {
        match stream {
            Stream::Games => &self.games,
            Stream::Reviews => &self.reviews,
        }
    }

    fn write_buffer(&self, stream: Stream, buffer: &[u8]) -> OutputResult<()> {
        let target = self.stream(stream);
        let mut file = target.lock();
        if target.poisoned.load(Ordering::SeqCst) {
            return Err(OutputError::Write {
                stream,
                source: io::Error::new(
                    io::ErrorKind::Other,
                    "stream holds a partial record from an earlier failed write",
                ),
            });
        }

        append_or_rollback(&mut *file, buffer).map_err(|failure| {
            if !failure.rolled_back {
                target.poisoned.store(true, Ordering::SeqCst);
                tracing::error!(
                    path = %target.path.display(),
                    "Could not roll back a failed append, refusing further writes"
                );
            }
            OutputError::Write {
                stream,
                source: failure.source,
            }
        })
    }
}

impl RecordSink for JsonlRecordWriter {
    fn append(&self, stream: Stream, record: &Value) -> OutputResult<()> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| OutputError::Format(e.to_string()))?;
        line.push(b'\n');
        self.write_buffer(stream, &line)
    }

    fn append_all(&self, stream: Stream, records: &[Value]) -> OutputResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)
                .map_err(|e| OutputError::Format(e.to_string()))?;
            buffer.push(b'\n');
        }
        self.write_buffer(stream, &buffer)
    }

    fn written_ids(&self, stream: Stream) -> OutputResult<BTreeSet<u64>> {
        let target = self.stream(stream);
        // Hold the lock so no append lands mid-scan
        let _guard = target.lock();
        scan_ids(&target.path)
    }
}

/// File operations an append needs to undo itself
trait AppendTarget: Write {
    fn end(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
struct AppendFailure {
    source: io::Error,
    rolled_back: bool,
}

/// Appends `buffer` whole, or restores the previous length
fn append_or_rollback<T: AppendTarget + ?Sized>(
    target: &mut T,
    buffer: &[u8],
) -> Result<(), AppendFailure> {
    let start = target.end().map_err(|source| AppendFailure {
        source,
        rolled_back: true,
    })?;

    let source = match target.write_all(buffer).and_then(|_| target.sync()) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let rolled_back = match target.truncate_to(start).and_then(|_| target.sync()) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Rollback of a failed append failed");
            false
        }
    };
    Err(AppendFailure {
        source,
        rolled_back,
    })
}

/// Collects `appid` values from a JSONL file, skipping unparseable lines
pub fn scan_ids(path: &Path) -> OutputResult<BTreeSet<u64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = BTreeSet::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(&line) {
            Ok(record) => match record.get("appid").and_then(appid_of) {
                Some(id) => {
                    ids.insert(id);
                }
                None => tracing::warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    "Record without appid"
                ),
            },
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unparseable record"
            ),
        }
    }
    Ok(ids)
}

/// Counts non-empty lines in a JSONL file (0 if missing)
pub fn count_records(path: &Path) -> OutputResult<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn appid_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Terminates a last line left without its newline by a crash
fn terminate_torn_line(file: &mut File, path: &Path) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        tracing::warn!(path = %path.display(), "Terminating torn last record");
        file.write_all(b"\n")?;
        file.sync_data()?;
    }
    Ok(())
}
