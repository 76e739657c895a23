//! Bounded latency history persisted as a single JSON document.
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

/// Minute granularity; lexicographic order equals chronological order.
pub const TICK_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Node name to latency in milliseconds, `0` meaning unreachable.
pub type Sample = BTreeMap<String, u64>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to replace history file: {0}")]
    Persist(io::Error),
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("latency_history.json"),
            capacity: 48,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(NaiveDateTime);

impl Tick {
    /// Truncates to the minute in the timestamp's own offset.
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        let local = at.naive_local();
        let minute = local
            .date()
            .and_hms_opt(local.hour(), local.minute(), 0)
            .unwrap_or(local);
        Tick(minute)
    }

    pub fn parse(text: &str) -> Result<Self, chrono::ParseError> {
        NaiveDateTime::parse_from_str(text.trim(), TICK_FORMAT).map(Tick)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TICK_FORMAT))
    }
}

impl Serialize for Tick {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tick {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Tick::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Samples ordered by tick, never longer than `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    capacity: usize,
    samples: BTreeMap<Tick, Sample>,
}

impl TimeSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: BTreeMap::new(),
        }
    }

    pub fn from_samples(capacity: usize, samples: BTreeMap<Tick, Sample>) -> Self {
        let mut series = Self {
            capacity: capacity.max(1),
            samples,
        };
        series.prune();
        series
    }

    /// Inserts `sample` at `tick`, replacing any sample already there, then
    /// drops the oldest ticks until the series fits its capacity.
    pub fn record(mut self, tick: Tick, sample: Sample) -> Self {
        self.samples.insert(tick, sample);
        self.prune();
        self
    }

    fn prune(&mut self) {
        while self.samples.len() > self.capacity {
            self.samples.pop_first();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&Tick, &Sample)> {
        self.samples.iter()
    }

    pub fn ticks(&self) -> impl Iterator<Item = &Tick> {
        self.samples.keys()
    }

    pub fn first_tick(&self) -> Option<&Tick> {
        self.samples.keys().next()
    }

    pub fn last_tick(&self) -> Option<&Tick> {
        self.samples.keys().next_back()
    }

    /// Every node name seen anywhere in the series, sorted.
    pub fn node_names(&self) -> BTreeSet<&str> {
        self.samples
            .values()
            .flat_map(|sample| sample.keys().map(String::as_str))
            .collect()
    }

    pub fn max_latency(&self) -> u64 {
        self.samples
            .values()
            .flat_map(|sample| sample.values().copied())
            .max()
            .unwrap_or(0)
    }
}

/// Whole milliseconds from a stored sample. Fractional values are rounded
/// up; negative or non-finite ones make the sample invalid.
fn stored_sample(entries: BTreeMap<String, f64>) -> Result<Sample, String> {
    entries
        .into_iter()
        .map(|(name, millis)| {
            if millis.is_finite() && millis >= 0.0 {
                Ok((name, millis.ceil() as u64))
            } else {
                Err(format!("invalid latency {millis} for {name}"))
            }
        })
        .collect()
}

pub struct TimeSeriesStore {
    path: PathBuf,
    capacity: usize,
}

impl TimeSeriesStore {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            path: config.path.clone(),
            capacity: config.capacity,
        }
    }

    /// Loads the persisted series. A missing, unreadable, or corrupt file
    /// yields an empty series.
    pub fn load(&self) -> TimeSeries {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No latency history yet; starting fresh.");
                return TimeSeries::new(self.capacity);
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read latency history; starting fresh.");
                return TimeSeries::new(self.capacity);
            }
        };

        let parsed = serde_json::from_str::<BTreeMap<Tick, BTreeMap<String, f64>>>(&content)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                raw.into_iter()
                    .map(|(tick, entries)| Ok((tick, stored_sample(entries)?)))
                    .collect::<Result<BTreeMap<Tick, Sample>, String>>()
            });
        match parsed {
            Ok(samples) => {
                let series = TimeSeries::from_samples(self.capacity, samples);
                info!(path = ?self.path, ticks = series.len(), "Loaded latency history.");
                series
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Latency history is corrupt; starting fresh.");
                TimeSeries::new(self.capacity)
            }
        }
    }

    /// Writes the series to a sibling temp file and renames it into place.
    pub fn save(&self, series: &TimeSeries) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &series.samples)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path)
            .map_err(|e| StoreError::Persist(e.error))?;

        info!(path = ?self.path, ticks = series.len(), "Saved latency history.");
        Ok(())
    }
}
