//! Append-only position log that rotates by size and resumes after a
//! restart from the last record on disk.
//!
//! Records are `<timestamp_us>,<azimuth>,<elevation>`. File `<base>.txt` is
//! index 0 and rotation continues with `<base>_1.txt`, `<base>_2.txt`, ...

use std::io;

use rig_protocol::Positions;
use tracing::info;

pub mod store;

pub use store::{FsLogStore, LogStore, MemoryLogStore};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Failed to list log files: {0}")]
    Scan(io::Error),

    #[error("Failed to read log file {name}: {source}")]
    Read { name: String, source: io::Error },

    #[error("Failed to inspect log file {name}: {source}")]
    Stat { name: String, source: io::Error },

    #[error("Failed to write log file {name}: {source}")]
    Write { name: String, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp_us: i64,
    pub positions: Positions,
}

impl LogRecord {
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            self.timestamp_us, self.positions.azimuth, self.positions.elevation
        )
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(',');

        let timestamp_us = fields.next()?.trim().parse().ok()?;
        let azimuth = fields.next()?.trim().parse().ok()?;
        let elevation = fields.next()?.trim().parse().ok()?;
        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            timestamp_us,
            positions: Positions::new(azimuth, elevation),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogNaming {
    base_name: String,
}

impl LogNaming {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }

    pub fn file_name(&self, index: u32) -> String {
        if index == 0 {
            format!("{}.txt", self.base_name)
        } else {
            format!("{}_{index}.txt", self.base_name)
        }
    }

    /// Rotation index encoded in `name`, if it belongs to this log.
    pub fn parse_index(&self, name: &str) -> Option<u32> {
        let stem = name.strip_suffix(".txt")?.strip_prefix(&self.base_name)?;

        if stem.is_empty() {
            return Some(0);
        }

        let digits = stem.strip_prefix('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        digits.parse().ok()
    }
}

pub struct RotatingLogger<S> {
    store: S,
    naming: LogNaming,
    max_size: Option<u64>,

    active_index: u32,
    resume_offset: Positions,
    opened: bool,
}

impl<S: LogStore> RotatingLogger<S> {
    /// `max_size` of `None` disables rotation.
    pub fn new(store: S, naming: LogNaming, max_size: Option<u64>) -> Self {
        Self {
            store,
            naming,
            max_size,
            active_index: 0,
            resume_offset: Positions::default(),
            opened: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn active_index(&self) -> u32 {
        self.active_index
    }

    pub fn active_file(&self) -> String {
        self.naming.file_name(self.active_index)
    }

    pub fn resume_offset(&self) -> Positions {
        self.resume_offset
    }

    /// Finds the most recent log file and recovers the last recorded
    /// cumulative positions from it. Meant to be called once at startup;
    /// repeated calls with no appends in between return the same result.
    pub fn open_session(&mut self) -> Result<(u32, Positions), LogError> {
        let names = self.store.list().map_err(LogError::Scan)?;

        let mut latest: Option<(u32, &String)> = None;
        for name in &names {
            let Some(index) = self.naming.parse_index(name) else {
                continue;
            };
            let better = match latest {
                None => true,
                Some((best, _)) if index > best => true,
                // `<base>.txt` and `<base>_0.txt` are both index 0; prefer
                // the name this logger writes.
                Some((best, _)) => index == best && *name == self.naming.file_name(index),
            };
            if better {
                latest = Some((index, name));
            }
        }

        let (index, offset) = match latest {
            None => (0, Positions::default()),
            Some((index, name)) => {
                let content = self
                    .store
                    .read_to_string(name)
                    .map_err(|source| LogError::Read {
                        name: name.clone(),
                        source,
                    })?;
                let offset = content
                    .lines()
                    .filter_map(LogRecord::parse)
                    .last()
                    .map(|record| record.positions)
                    .unwrap_or_default();
                (index, offset)
            }
        };

        self.active_index = self.active_index.max(index);
        self.resume_offset = offset;
        self.opened = true;

        info!(
            index = self.active_index,
            azimuth = offset.azimuth,
            elevation = offset.elevation,
            "log session opened"
        );

        Ok((self.active_index, self.resume_offset))
    }

    /// Writes one record for positions reported by the device, rotating
    /// first if the active file has reached the size threshold.
    pub fn append(
        &mut self,
        timestamp_us: i64,
        device_positions: Positions,
    ) -> Result<LogRecord, LogError> {
        if !self.opened {
            self.open_session()?;
        }

        if let Some(threshold) = self.max_size {
            let name = self.active_file();
            let size = self
                .store
                .size(&name)
                .map_err(|source| LogError::Stat { name, source })?;

            if size.is_some_and(|size| size >= threshold) {
                self.active_index += 1;
                info!(file = %self.active_file(), "rotating log");
            }
        }

        let record = LogRecord {
            timestamp_us,
            positions: self.resume_offset + device_positions,
        };

        let name = self.active_file();
        self.store
            .append_line(&name, &record.to_line())
            .map_err(|source| LogError::Write { name, source })?;

        Ok(record)
    }
}
