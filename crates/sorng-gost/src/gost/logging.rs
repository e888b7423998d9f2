//! Engine log capture. Subprocess stdout/stderr are read in bounded chunks,
//! classified, kept in a newest-first in-memory store, and appended to a
//! durable log file that is the source of truth across restarts.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Default number of entries kept in memory.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;
/// Upper bound for one read from a subprocess stream.
pub const READ_CHUNK_SIZE: usize = 1024;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

lazy_static! {
    static ref LINE_RE: Option<Regex> =
        Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] \[([A-Z]+)\] (.*)$").ok();
    static ref LEVEL_TAG_RE: Option<Regex> = Regex::new(
        r#"(?i)(?:"level"\s*:\s*"|\blevel=|\[)(debug|info|warning|warn|error|fatal)\b"#
    )
    .ok();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Log entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" | "fatal" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Which subprocess stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Always a single line.
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: single_line(&message.into()),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn single_line(message: &str) -> String {
    message
        .split(&['\r', '\n'][..])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify one line of engine output.
///
/// stdout is always debug. stderr is error unless it carries a level tag.
pub fn classify(source: StreamSource, line: &str) -> LogLevel {
    match source {
        StreamSource::Stdout => LogLevel::Debug,
        StreamSource::Stderr => detect_level_tag(line).unwrap_or(LogLevel::Error),
    }
}

/// Find a `level=info`, `"level":"warn"` or `[DEBUG]` style tag.
pub fn detect_level_tag(line: &str) -> Option<LogLevel> {
    let re = LEVEL_TAG_RE.as_ref()?;
    re.captures(line)
        .and_then(|c| LogLevel::from_str_loose(&c[1]))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Durable line format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `[YYYY-MM-DD HH:mm:ss] [LEVEL] message` followed by a newline.
pub fn format_line(entry: &LogEntry) -> String {
    format!(
        "[{}] [{}] {}\n",
        entry.timestamp.format(TIMESTAMP_FORMAT),
        entry.level.as_str(),
        entry.message
    )
}

/// Parse one durable line; `None` for anything malformed.
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let caps = LINE_RE.as_ref()?.captures(line.trim_end_matches(&['\r', '\n'][..]))?;
    let naive = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
    let level = LogLevel::from_str_loose(&caps[2])?;
    Some(LogEntry {
        timestamp: Utc.from_utc_datetime(&naive),
        level,
        message: caps[3].to_string(),
    })
}

/// Rebuild the newest-first cache from durable file contents, walking from
/// the end and stopping at `capacity`. Each line is decoded on its own, so a
/// line with invalid UTF-8 is skipped like any other malformed line.
pub fn reconstruct(contents: &[u8], capacity: usize) -> Vec<LogEntry> {
    contents
        .split(|b| *b == b'\n')
        .rev()
        .filter_map(|raw| std::str::from_utf8(raw).ok())
        .filter_map(parse_line)
        .take(capacity)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Log buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded newest-first store. Index 0 is the latest entry.
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Seed from entries that are already newest-first.
    pub fn from_newest_first(entries: Vec<LogEntry>, capacity: usize) -> Self {
        let mut buf = Self::new(capacity);
        buf.entries.extend(entries.into_iter().take(capacity));
        buf
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The `n` newest entries, newest first.
    pub fn latest(&self, n: usize) -> Vec<LogEntry> {
        self.entries.iter().take(n).cloned().collect()
    }

    pub fn filter_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries.iter().filter(|e| e.level == level).cloned().collect()
    }

    pub fn search(&self, query: &str) -> Vec<LogEntry> {
        let lower = query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.message.to_lowercase().contains(&lower))
            .cloned()
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Chunk → line assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turns arbitrary byte chunks into complete lines. A trailing partial line
/// is carried over, but never grows past one chunk.
#[derive(Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            push_line(&mut lines, &raw);
        }
        if self.pending.len() >= READ_CHUNK_SIZE {
            let raw = std::mem::take(&mut self.pending);
            push_line(&mut lines, &raw);
        }
        lines
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let mut lines = Vec::new();
        push_line(&mut lines, &raw);
        lines.pop()
    }
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end_matches(&['\r', '\n'][..]);
    if !trimmed.trim().is_empty() {
        lines.push(trimmed.to_string());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    PlainText,
    Json,
    Csv,
}

/// Render entries (in the order given) for sharing.
pub fn export_logs(entries: &[LogEntry], format: ExportFormat) -> String {
    match format {
        ExportFormat::PlainText => entries.iter().map(format_line).collect(),
        ExportFormat::Json => serde_json::to_string_pretty(entries).unwrap_or_default(),
        ExportFormat::Csv => {
            let mut out = String::from("timestamp,level,message\n");
            for e in entries {
                out.push_str(&format!(
                    "{},{},\"{}\"\n",
                    e.timestamp.to_rfc3339(),
                    e.level.as_str(),
                    e.message.replace('"', "\"\"")
                ));
            }
            out
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single writer for engine log entries. Every append goes through one
/// mutex so the cache and the durable file never disagree on order.
pub struct LogPipeline {
    path: PathBuf,
    buffer: Mutex<LogBuffer>,
}

impl LogPipeline {
    /// Open the durable file at `path` and rebuild the cache from it.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> Arc<Self> {
        let path = path.into();
        let restored = match tokio::fs::read(&path).await {
            Ok(contents) => reconstruct(&contents, capacity),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::warn!("Cannot read log file {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Arc::new(Self {
            path,
            buffer: Mutex::new(LogBuffer::from_newest_first(restored, capacity)),
        })
    }

    pub fn log_file_path(&self) -> &Path {
        &self.path
    }

    /// Record one entry: cache first, then the durable file.
    pub async fn append(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().await;
        let line = format_line(&entry);
        buffer.push(entry);
        if let Err(e) = append_to_file(&self.path, &line).await {
            log::warn!("Cannot append to log file {}: {}", self.path.display(), e);
        }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.append(LogEntry::new(level, message)).await;
    }

    /// Classify and record every line in `lines` from `source`.
    pub async fn ingest_lines(&self, source: StreamSource, lines: Vec<String>) {
        for line in lines {
            let level = classify(source, &line);
            log::debug!("gost {}: {}", source.label(), line);
            self.append(LogEntry::new(level, line)).await;
        }
    }

    pub async fn entries(&self) -> Vec<LogEntry> {
        self.buffer.lock().await.entries()
    }

    pub async fn latest(&self, n: usize) -> Vec<LogEntry> {
        self.buffer.lock().await.latest(n)
    }

    pub async fn entries_at_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.buffer.lock().await.filter_level(level)
    }

    pub async fn search(&self, query: &str) -> Vec<LogEntry> {
        self.buffer.lock().await.search(query)
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }

    pub async fn export(&self, format: ExportFormat) -> String {
        let entries = self.entries().await;
        export_logs(&entries, format)
    }

    /// Drop every cached entry and truncate the durable file.
    pub async fn clear_logs(&self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().await;
        buffer.clear();
        match tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn append_to_file(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Read `reader` to end of stream in chunks of at most [`READ_CHUNK_SIZE`]
/// bytes, feeding complete lines into `pipeline`.
pub async fn pump_stream<R>(mut reader: R, source: StreamSource, pipeline: Arc<LogPipeline>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut assembler = LineAssembler::new();
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let lines = assembler.feed(&chunk[..n]);
                pipeline.ingest_lines(source, lines).await;
            }
            Err(e) => {
                log::warn!("gost {} read failed: {}", source.label(), e);
                break;
            }
        }
    }
    if let Some(rest) = assembler.finish() {
        pipeline.ingest_lines(source, vec![rest]).await;
    }
}
