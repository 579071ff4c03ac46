//! Push-style zip encoder.
//!
//! [`ZipStreamWriter`] encodes each entry as soon as it is added and hands the
//! bytes to a [`ChunkSink`] as a [`WriterEvent::Data`] chunk. Calling
//! [`ZipStreamWriter::end`] emits the central directory as a single
//! [`WriterEvent::Final`] chunk. If anything goes wrong a single
//! [`WriterEvent::Error`] is emitted instead, and the writer refuses further input.
//!
//! # Invariants
//! - Exactly one terminal event (`Final` or `Error`) is emitted per writer.
//! - Chunks are emitted in output order; concatenating them yields the archive.
//! - Entry content is never altered; the per-entry comment is stored in the
//!   central directory only.
//!
//! # Not Supported
//! - Zip64: more than 65535 entries, or sizes and offsets beyond 4 GiB.

use crate::config::Compression;
use crate::error::PSError;

use log::*;
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Write;

const SIG_LFH: u32 = 0x0403_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_EOCD: u32 = 0x0605_4b50;

const LFH_LEN: usize = 30;
const CDFH_LEN: usize = 46;
const EOCD_LEN: usize = 22;

const VERSION: u16 = 20;
const FLAG_UTF8: u16 = 1 << 11;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const MSDOS_DIRECTORY: u32 = 0x10;

// 1980-01-01 00:00:00, so identical input produces identical output.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;

const MAX_ENTRIES: usize = 0xffff;
const MAX_FIELD_LEN: usize = 0xffff;

/// Output of a [`ZipStreamWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    /// An intermediate chunk of output.
    Data(Vec<u8>),
    /// The last chunk of output; no further events follow.
    Final(Vec<u8>),
    /// Encoding failed; no further events follow.
    Error(String),
}

/// Receiver for writer events.
pub trait ChunkSink {
    fn on_event(&mut self, event: WriterEvent);
}

impl<F: FnMut(WriterEvent)> ChunkSink for F {
    fn on_event(&mut self, event: WriterEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Ended,
    Failed,
}

struct CentralRecord {
    name: String,
    comment: String,
    crc32: u32,
    compressed_size: u32,
    size: u32,
    method: u16,
    offset: u32,
}

/// Streaming zip encoder driven by [`ChunkSink`] callbacks.
pub struct ZipStreamWriter<S: ChunkSink> {
    sink: S,
    compression: Compression,
    offset: u64,
    records: Vec<CentralRecord>,
    names: HashSet<String>,
    state: WriterState,
}

impl<S: ChunkSink> ZipStreamWriter<S> {
    pub fn new(sink: S, compression: Compression) -> Self {
        ZipStreamWriter {
            sink,
            compression,
            offset: 0,
            records: vec![],
            names: HashSet::new(),
            state: WriterState::Open,
        }
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode an entry and emit it as a data chunk.
    ///
    /// `comment` ends up in the entry's central directory record.
    pub fn add(&mut self, path: &str, content: &[u8], comment: &str) -> Result<(), PSError> {
        self.ensure_open()?;
        match self.encode_entry(path, content, comment) {
            Ok(chunk) => {
                self.offset += chunk.len() as u64;
                self.sink.on_event(WriterEvent::Data(chunk));
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Signal end of input: emit the central directory as the final chunk.
    pub fn end(&mut self) -> Result<(), PSError> {
        self.ensure_open()?;
        match self.encode_central_directory() {
            Ok(chunk) => {
                self.state = WriterState::Ended;
                debug!(
                    "Zip writer finished: {} entries, {} bytes",
                    self.records.len(),
                    self.offset + chunk.len() as u64
                );
                self.sink.on_event(WriterEvent::Final(chunk));
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Give back the sink, typically after [`Self::end`].
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn ensure_open(&self) -> Result<(), PSError> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Ended => Err(PSError::ArchiveWriteError(
                "input already ended".to_string(),
            )),
            WriterState::Failed => Err(PSError::ArchiveWriteError(
                "writer already failed".to_string(),
            )),
        }
    }

    fn fail(&mut self, err: PSError) -> PSError {
        self.state = WriterState::Failed;
        self.sink.on_event(WriterEvent::Error(err.to_string()));
        err
    }

    fn encode_entry(&mut self, path: &str, content: &[u8], comment: &str) -> Result<Vec<u8>, PSError> {
        if path.is_empty() {
            return Err(PSError::ArchiveWriteError("empty entry name".to_string()));
        }
        if path.len() > MAX_FIELD_LEN {
            return Err(PSError::EntryNameTooLong(path.to_string()));
        }
        if comment.len() > MAX_FIELD_LEN {
            return Err(PSError::ArchiveWriteError(format!(
                "comment for '{}' is too long ({} bytes)",
                path,
                comment.len()
            )));
        }
        if self.records.len() >= MAX_ENTRIES {
            return Err(PSError::ArchiveWriteError(format!(
                "too many entries (max: {})",
                MAX_ENTRIES
            )));
        }
        if self.names.contains(path) {
            return Err(PSError::ArchiveWriteError(format!(
                "duplicate entry '{}'",
                path
            )));
        }

        let crc32 = crc32fast::hash(content);
        let (method, data) = match self.compression {
            Compression::Deflated if !content.is_empty() => {
                (METHOD_DEFLATED, Cow::Owned(deflate(content)?))
            }
            _ => (METHOD_STORED, Cow::Borrowed(content)),
        };
        let size = to_u32(content.len() as u64, path)?;
        let compressed_size = to_u32(data.len() as u64, path)?;
        let offset = to_u32(self.offset, path)?;

        let mut chunk = Vec::with_capacity(LFH_LEN + path.len() + data.len());
        put_u32(&mut chunk, SIG_LFH);
        put_u16(&mut chunk, VERSION);
        put_u16(&mut chunk, FLAG_UTF8);
        put_u16(&mut chunk, method);
        put_u16(&mut chunk, DOS_TIME);
        put_u16(&mut chunk, DOS_DATE);
        put_u32(&mut chunk, crc32);
        put_u32(&mut chunk, compressed_size);
        put_u32(&mut chunk, size);
        put_u16(&mut chunk, path.len() as u16);
        put_u16(&mut chunk, 0);
        chunk.extend_from_slice(path.as_bytes());
        chunk.extend_from_slice(&data);

        self.names.insert(path.to_string());
        self.records.push(CentralRecord {
            name: path.to_string(),
            comment: comment.to_string(),
            crc32,
            compressed_size,
            size,
            method,
            offset,
        });
        Ok(chunk)
    }

    fn encode_central_directory(&self) -> Result<Vec<u8>, PSError> {
        let cd_offset = to_u32(self.offset, "central directory")?;
        let cd_len: usize = self
            .records
            .iter()
            .map(|r| CDFH_LEN + r.name.len() + r.comment.len())
            .sum();

        let mut chunk = Vec::with_capacity(cd_len + EOCD_LEN);
        for record in &self.records {
            let external_attributes = if record.name.ends_with('/') {
                MSDOS_DIRECTORY
            } else {
                0
            };
            put_u32(&mut chunk, SIG_CDFH);
            put_u16(&mut chunk, VERSION);
            put_u16(&mut chunk, VERSION);
            put_u16(&mut chunk, FLAG_UTF8);
            put_u16(&mut chunk, record.method);
            put_u16(&mut chunk, DOS_TIME);
            put_u16(&mut chunk, DOS_DATE);
            put_u32(&mut chunk, record.crc32);
            put_u32(&mut chunk, record.compressed_size);
            put_u32(&mut chunk, record.size);
            put_u16(&mut chunk, record.name.len() as u16);
            put_u16(&mut chunk, 0);
            put_u16(&mut chunk, record.comment.len() as u16);
            put_u16(&mut chunk, 0);
            put_u16(&mut chunk, 0);
            put_u32(&mut chunk, external_attributes);
            put_u32(&mut chunk, record.offset);
            chunk.extend_from_slice(record.name.as_bytes());
            chunk.extend_from_slice(record.comment.as_bytes());
        }
        let cd_size = to_u32(chunk.len() as u64, "central directory")?;
        if self.offset + chunk.len() as u64 + EOCD_LEN as u64 > u32::MAX as u64 {
            return Err(PSError::ArchiveWriteError(
                "archive exceeds 4 GiB".to_string(),
            ));
        }

        let count = self.records.len() as u16;
        put_u32(&mut chunk, SIG_EOCD);
        put_u16(&mut chunk, 0);
        put_u16(&mut chunk, 0);
        put_u16(&mut chunk, count);
        put_u16(&mut chunk, count);
        put_u32(&mut chunk, cd_size);
        put_u32(&mut chunk, cd_offset);
        put_u16(&mut chunk, 0);
        Ok(chunk)
    }
}

/// Buffered accumulator for writer output.
///
/// Collects data chunks in emission order and completes exactly once, on the
/// first terminal event. An error event, or exceeding the byte limit, discards
/// everything buffered so far.
#[derive(Debug)]
pub struct ChunkCollector {
    chunks: Vec<Vec<u8>>,
    buffered: usize,
    max_bytes: usize,
    outcome: Option<Result<(), String>>,
}

impl Default for ChunkCollector {
    fn default() -> Self {
        Self::with_limit(u32::MAX as usize)
    }
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector refusing to buffer more than `max_bytes`.
    pub fn with_limit(max_bytes: usize) -> Self {
        ChunkCollector {
            chunks: vec![],
            buffered: 0,
            max_bytes,
            outcome: None,
        }
    }

    /// Return true once a terminal event has been received.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Assemble the output.
    ///
    /// Fails unless the writer reported successful completion.
    pub fn finish(self) -> Result<Vec<u8>, PSError> {
        match self.outcome {
            Some(Ok(())) => Ok(self.chunks.concat()),
            Some(Err(reason)) => Err(PSError::ArchiveWriteError(reason)),
            None => Err(PSError::ArchiveWriteError(
                "writer did not signal completion".to_string(),
            )),
        }
    }

    fn push(&mut self, chunk: Vec<u8>) {
        if self.buffered.saturating_add(chunk.len()) > self.max_bytes {
            self.discard(format!("output exceeds {} bytes", self.max_bytes));
            return;
        }
        self.buffered += chunk.len();
        self.chunks.push(chunk);
    }

    fn discard(&mut self, reason: String) {
        self.chunks.clear();
        self.buffered = 0;
        self.outcome = Some(Err(reason));
    }
}

impl ChunkSink for ChunkCollector {
    fn on_event(&mut self, event: WriterEvent) {
        if self.outcome.is_some() {
            return;
        }
        match event {
            WriterEvent::Data(chunk) => self.push(chunk),
            WriterEvent::Final(chunk) => {
                self.push(chunk);
                if self.outcome.is_none() {
                    self.outcome = Some(Ok(()));
                }
            }
            WriterEvent::Error(reason) => self.discard(reason),
        }
    }
}

fn deflate(content: &[u8]) -> Result<Vec<u8>, PSError> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(content)
        .and_then(|_| encoder.finish())
        .map_err(|e| PSError::ArchiveWriteError(format!("deflate failed: {}", e)))
}

fn to_u32(value: u64, what: &str) -> Result<u32, PSError> {
    u32::try_from(value)
        .map_err(|_| PSError::ArchiveWriteError(format!("'{}' exceeds 4 GiB", what)))
}

#[inline]
fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
