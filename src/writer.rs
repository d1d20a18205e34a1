//! Buffered pcap writer.
//!
//! Records accumulate in memory and go to storage in one write when the
//! buffer would overflow or passes its high-water mark. A failed flush
//! reopens the file a bounded number of times; after that the pending
//! records are discarded so capture never stalls on storage.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use byteorder::{WriteBytesExt, LE};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::storage::Storage;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
pub const PCAP_SNAPLEN: u32 = 65535;
pub const LINKTYPE_IEEE802_11: u32 = 105;

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Buffer capacity in bytes.
    pub capacity: usize,
    /// Fraction of `capacity` that triggers a flush.
    pub high_water: f32,
    /// Open/write attempts per flush before the buffer is dropped.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            capacity: 32 * 1024,
            high_water: 0.9,
            max_attempts: 3,
            backoff_ms: 20,
        }
    }
}

impl WriterConfig {
    fn high_water_mark(&self) -> usize {
        ((self.capacity as f64) * f64::from(self.high_water)) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Written(usize),
    Dropped(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub records_written: u64,
    pub records_dropped: u64,
    pub bytes_written: u64,
    pub bytes_dropped: u64,
    pub flush_failures: u64,
}

pub fn global_header() -> [u8; GLOBAL_HEADER_LEN] {
    let mut header = [0u8; GLOBAL_HEADER_LEN];
    let mut w = &mut header[..];
    // Writes into a fixed array of the exact size cannot fail.
    let _ = w.write_u32::<LE>(PCAP_MAGIC);
    let _ = w.write_u16::<LE>(PCAP_VERSION_MAJOR);
    let _ = w.write_u16::<LE>(PCAP_VERSION_MINOR);
    let _ = w.write_i32::<LE>(0); // thiszone
    let _ = w.write_u32::<LE>(0); // sigfigs
    let _ = w.write_u32::<LE>(PCAP_SNAPLEN);
    let _ = w.write_u32::<LE>(LINKTYPE_IEEE802_11);
    header
}

fn push_record(buffer: &mut Vec<u8>, timestamp: Duration, frame: &[u8]) {
    let captured = frame.len().min(PCAP_SNAPLEN as usize);
    buffer.reserve(RECORD_HEADER_LEN + captured);
    // Vec<u8> writes are infallible.
    let _ = buffer.write_u32::<LE>(timestamp.as_secs() as u32);
    let _ = buffer.write_u32::<LE>(timestamp.subsec_micros());
    let _ = buffer.write_u32::<LE>(captured as u32);
    let _ = buffer.write_u32::<LE>(frame.len() as u32);
    buffer.extend_from_slice(&frame[..captured]);
}

pub struct PcapWriter<S: Storage> {
    storage: S,
    path: PathBuf,
    config: WriterConfig,
    buffer: Vec<u8>,
    /// Bytes at the front of `buffer` already handed to storage during a
    /// flush that later failed.
    written: usize,
    /// End offset in `buffer` of each pending record.
    record_ends: Vec<usize>,
    /// Length of the file up to the last whole record.
    file_len: u64,
    /// Set when a dropped flush left part of a record in the file.
    truncate_to: Option<u64>,
    file: Option<S::File>,
    header_written: bool,
    stats: WriterStats,
}

impl<S: Storage> PcapWriter<S> {
    /// Creates the file and writes the global header. If storage is not
    /// available yet, the header is written by the first successful flush.
    pub fn create(storage: S, path: impl Into<PathBuf>, config: WriterConfig) -> Self {
        let mut writer = PcapWriter {
            storage,
            path: path.into(),
            buffer: Vec::with_capacity(config.capacity),
            config,
            written: 0,
            record_ends: Vec::new(),
            file_len: 0,
            truncate_to: None,
            file: None,
            header_written: false,
            stats: WriterStats::default(),
        };
        if let Err(e) = writer.ensure_open() {
            warn!("Could not create {}: {} (will retry on flush)", writer.path.display(), e);
        }
        writer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn write_frame(&mut self, timestamp: Duration, frame: &[u8]) {
        let record_len = RECORD_HEADER_LEN + frame.len().min(PCAP_SNAPLEN as usize);
        if !self.buffer.is_empty() && self.buffer.len() + record_len > self.config.capacity {
            self.flush();
        }

        push_record(&mut self.buffer, timestamp, frame);
        self.record_ends.push(self.buffer.len());

        if self.buffer.len() >= self.config.high_water_mark() {
            self.flush();
        }
    }

    pub fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.try_flush() {
                Ok(()) => {
                    let len = self.buffer.len();
                    debug!("Flushed {} bytes to {}", len, self.path.display());
                    self.stats.bytes_written += len as u64;
                    self.stats.records_written += self.record_ends.len() as u64;
                    self.file_len += len as u64;
                    self.clear_buffer();
                    return FlushOutcome::Written(len);
                }
                Err(e) => {
                    self.file = None;
                    self.stats.flush_failures += 1;
                    warn!(
                        "Write to {} failed (attempt {}/{}): {}",
                        self.path.display(),
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts && self.config.backoff_ms > 0 {
                        thread::sleep(Duration::from_millis(self.config.backoff_ms));
                    }
                }
            }
        }

        // Records storage took in full stay; a trailing fragment is cut off
        // before the file is appended to again.
        let whole_records = self.record_ends.iter().take_while(|&&end| end <= self.written).count();
        let whole_bytes = whole_records
            .checked_sub(1)
            .map_or(0, |last| self.record_ends[last]);
        if self.written > whole_bytes {
            self.truncate_to = Some(self.file_len + whole_bytes as u64);
        }
        self.file_len += whole_bytes as u64;
        self.stats.bytes_written += whole_bytes as u64;
        self.stats.records_written += whole_records as u64;

        let dropped = self.buffer.len() - whole_bytes;
        let dropped_records = self.record_ends.len() - whole_records;
        error!(
            "Storage unavailable, dropping {} buffered records ({} bytes) for {}",
            dropped_records,
            dropped,
            self.path.display()
        );
        self.stats.bytes_dropped += dropped as u64;
        self.stats.records_dropped += dropped_records as u64;
        self.clear_buffer();
        FlushOutcome::Dropped(dropped)
    }

    /// Flushes what is buffered and releases the file handle.
    pub fn close(&mut self) -> FlushOutcome {
        let outcome = self.flush();
        self.file = None;
        outcome
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.written = 0;
        self.record_ends.clear();
    }

    fn ensure_open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if self.header_written {
            if let Some(len) = self.truncate_to {
                self.storage.truncate(&self.path, len)?;
                debug!("Cut partial record from {} at {} bytes", self.path.display(), len);
                self.truncate_to = None;
            }
            self.file = Some(self.storage.append(&self.path)?);
        } else {
            let mut file = self.storage.create(&self.path)?;
            file.write_all(&global_header())?;
            file.flush()?;
            self.header_written = true;
            self.file_len = GLOBAL_HEADER_LEN as u64;
            self.file = Some(file);
        }
        Ok(())
    }

    fn try_flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "capture file not open"))?;

        while self.written < self.buffer.len() {
            let n = file.write(&self.buffer[self.written..])?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "storage accepted no bytes"));
            }
            self.written += n;
        }
        file.flush()
    }
}
