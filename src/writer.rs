//! growing JSON array files in place, one durable append per batch.
use crate::collector::Reporter;
use crate::encoder::{JsonEncoder, SpanEncoder};
use crate::error::{TraceError, TraceResult};
use crate::spans::SpanHandle;
use chrono::Utc;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    /// one lock per target file, process wide, so concurrent reports never
    /// interleave writes within a file.
    static ref FILE_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    FILE_LOCKS
        .lock()
        .unwrap()
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// One output target: `directory/name.json`.
#[derive(Debug, Clone)]
pub struct LogFile {
    name: String,
    directory: PathBuf,
}

impl LogFile {
    pub fn new<P: AsRef<Path>>(name: &str, directory: P) -> TraceResult<LogFile> {
        if name.trim().is_empty() {
            return Err(TraceError::InvalidArgument("log file name must not be empty"));
        }
        if directory.as_ref().as_os_str().is_empty() {
            return Err(TraceError::InvalidArgument(
                "log file directory must not be empty",
            ));
        }
        Ok(LogFile {
            name: name.to_string(),
            directory: directory.as_ref().to_path_buf(),
        })
    }

    fn path(&self, date_prefix: bool) -> PathBuf {
        let file_name = if date_prefix {
            format!("{}-{}.json", Utc::now().format("%Y-%m-%d"), self.name)
        } else {
            format!("{}.json", self.name)
        };
        self.directory.join(file_name)
    }
}

/// Appends batches of span trees to its target files without ever rewriting
/// them, retrying each append under transient contention.
pub struct AppendWriter {
    targets: Vec<LogFile>,
    encoder: Box<dyn SpanEncoder>,
    attempts: usize,
    retry_delay: Duration,
    date_prefix: bool,
}

impl AppendWriter {
    pub fn new(targets: Vec<LogFile>) -> AppendWriter {
        AppendWriter {
            targets,
            encoder: Box::new(JsonEncoder),
            attempts: 10,
            retry_delay: Duration::from_millis(100),
            date_prefix: false,
        }
    }

    pub fn with_encoder<E: SpanEncoder + 'static>(mut self, encoder: E) -> AppendWriter {
        self.encoder = Box::new(encoder);
        self
    }

    /// Tune the retry budget. At least one attempt is always made.
    pub fn with_retry(mut self, attempts: usize, retry_delay: Duration) -> AppendWriter {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Prefix file names with the current date, one file per day.
    pub fn with_date_prefix(mut self, date_prefix: bool) -> AppendWriter {
        self.date_prefix = date_prefix;
        self
    }

    fn append_with_retry(&self, target: &LogFile, body: &[u8]) -> TraceResult<()> {
        let path = target.path(self.date_prefix);
        let lock = file_lock(&path);
        let _guard = lock.lock().unwrap();
        let mut failure = None;
        for attempt in 1..=self.attempts {
            match append_once(&path, &target.directory, body) {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "batch appended");
                    return Ok(());
                }
                Err(error) => {
                    warn!(path = %path.display(), attempt, %error, "append attempt failed");
                    failure = Some(error);
                    if attempt < self.attempts {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        Err(TraceError::Persistence {
            attempts: self.attempts,
            source: failure
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no attempt was made")),
        })
    }
}

impl Reporter for AppendWriter {
    fn report(&self, batch: Vec<SpanHandle>) -> TraceResult<()> {
        // an append contributing no record leaves every file untouched.
        if batch.is_empty() {
            return Ok(());
        }
        let encoded = self.encoder.encode(&batch)?;
        let body = array_body(&encoded)?;
        if body.is_empty() {
            return Ok(());
        }
        for target in &self.targets {
            self.append_with_retry(target, body)?;
        }
        Ok(())
    }
}

/// Strip the enclosing brackets off an encoded JSON array.
fn array_body(encoded: &[u8]) -> TraceResult<&[u8]> {
    if encoded.len() >= 2 && encoded[0] == b'[' && encoded[encoded.len() - 1] == b']' {
        Ok(&encoded[1..encoded.len() - 1])
    } else {
        Err(TraceError::Other(
            "encoder did not produce a JSON array".into(),
        ))
    }
}

/// Splice `body` into the JSON array stored at `path`.
///
/// The closing bracket is located by scanning the file backward byte by
/// byte, the tail is truncated at it and `body` is written in its place,
/// followed by a fresh closing bracket. Prior entries are never read back
/// or deserialized. A non-empty file not ending in a JSON array was
/// corrupted or modified externally; the append fails rather than guess at
/// an insertion point.
fn append_once(path: &Path, directory: &Path, body: &[u8]) -> io::Result<()> {
    fs::create_dir_all(directory)?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    match scan_tail(&mut file)? {
        None => {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(b"[")?;
        }
        Some(tail) => {
            file.set_len(tail.close_at)?;
            file.seek(SeekFrom::Start(tail.close_at))?;
            if tail.has_entries {
                file.write_all(b",")?;
            }
        }
    }
    file.write_all(body)?;
    file.write_all(b"]")?;
    file.sync_all()
}

struct Tail {
    /// offset of the array's closing bracket.
    close_at: u64,
    /// anything between the brackets ?
    has_entries: bool,
}

/// Walk backward from the end of `file`: the first byte past trailing
/// whitespace must be the array's closing bracket, the next one tells
/// whether the array already holds entries. `None` for a blank file.
fn scan_tail(file: &mut File) -> io::Result<Option<Tail>> {
    let length = file.metadata()?.len();
    let mut close_at = None;
    let mut position = length;
    let mut byte = [0u8; 1];
    while position > 0 {
        position -= 1;
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut byte)?;
        if byte[0].is_ascii_whitespace() {
            continue;
        }
        match close_at {
            None if byte[0] == b']' => close_at = Some(position),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "log file does not end with a JSON array",
                ))
            }
            Some(close_at) => {
                return Ok(Some(Tail {
                    close_at,
                    has_entries: byte[0] != b'[',
                }))
            }
        }
    }
    match close_at {
        // a lone closing bracket has no matching opener.
        Some(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "log file holds an unopened JSON array",
        )),
        None => Ok(None),
    }
}
