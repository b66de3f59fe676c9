use crate::error::{EngineError, Result};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

/// A single reading. `None` is the missing marker and is never treated as zero.
pub type Sample = Option<f64>;

/// One named measurement stream (an inverter, a sensor, a meter register).
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub values: Vec<Sample>,
}

impl Channel {
    pub fn new(name: impl Into<String>, values: Vec<Sample>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Timestamp-indexed table of numeric channels.
///
/// Every channel holds exactly one sample per timestamp and the timestamps are
/// non-decreasing. Duplicated timestamps are tolerated until
/// [`crate::merge::clean_rows`] removes them; readers use the first occurrence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationTable {
    timestamps: Vec<NaiveDateTime>,
    channels: Vec<Channel>,
}

impl ObservationTable {
    pub fn new(timestamps: Vec<NaiveDateTime>, channels: Vec<Channel>) -> Result<Self> {
        if let Some(pos) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(EngineError::Shape(format!(
                "timestamps are not sorted: {} follows {}",
                timestamps[pos + 1],
                timestamps[pos]
            )));
        }
        for channel in &channels {
            if channel.values.len() != timestamps.len() {
                return Err(EngineError::Shape(format!(
                    "channel '{}' has {} values for {} timestamps",
                    channel.name,
                    channel.values.len(),
                    timestamps.len()
                )));
            }
        }
        Ok(Self {
            timestamps,
            channels,
        })
    }

    /// Convenience constructor from `(name, values)` pairs.
    pub fn from_columns<S: Into<String>>(
        timestamps: Vec<NaiveDateTime>,
        columns: Vec<(S, Vec<Sample>)>,
    ) -> Result<Self> {
        let channels = columns
            .into_iter()
            .map(|(name, values)| Channel::new(name, values))
            .collect();
        Self::new(timestamps, channels)
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn height(&self) -> usize {
        self.timestamps.len()
    }

    pub fn width(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn value(&self, row: usize, channel: &str) -> Option<Sample> {
        self.channel(channel).and_then(|c| c.values.get(row).copied())
    }

    pub fn into_parts(self) -> (Vec<NaiveDateTime>, Vec<Channel>) {
        (self.timestamps, self.channels)
    }

    /// Rows at `indices`, in the given order. Indices must be in bounds and
    /// keep the timestamps non-decreasing.
    pub(crate) fn take_rows(&self, indices: &[usize]) -> Self {
        let timestamps = indices.iter().map(|&i| self.timestamps[i]).collect();
        let channels = self
            .channels
            .iter()
            .map(|c| Channel::new(c.name.clone(), indices.iter().map(|&i| c.values[i]).collect()))
            .collect();
        Self {
            timestamps,
            channels,
        }
    }

    /// Renames channels found in `mapping`; names it does not mention are kept.
    pub fn rename_channels(&self, mapping: &HashMap<String, String>) -> Self {
        let mut renamed = self.clone();
        for channel in &mut renamed.channels {
            if let Some(new_name) = mapping.get(&channel.name) {
                channel.name = new_name.clone();
            }
        }
        renamed
    }

    /// Keeps only the named channels, in the order given. Unknown names are skipped.
    pub fn select_channels(&self, names: &[&str]) -> Self {
        let channels = names
            .iter()
            .filter_map(|name| self.channel(name).cloned())
            .collect();
        Self {
            timestamps: self.timestamps.clone(),
            channels,
        }
    }

    /// Adds `prefix` in front of every channel name.
    pub fn prefix_channels(&self, prefix: &str) -> Self {
        let mut prefixed = self.clone();
        for channel in &mut prefixed.channels {
            channel.name = format!("{prefix} {}", channel.name);
        }
        prefixed
    }

    /// Multiplies one channel in place. Missing samples stay missing.
    pub fn scale_channel_mut(&mut self, name: &str, factor: f64) -> Result<()> {
        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::missing_column(name))?;
        for value in channel.values.iter_mut().flatten() {
            *value *= factor;
        }
        Ok(())
    }

    /// Builds a table the caller already knows to satisfy the invariants.
    pub(crate) fn from_parts_unchecked(timestamps: Vec<NaiveDateTime>, channels: Vec<Channel>) -> Self {
        debug_assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        debug_assert!(channels.iter().all(|c| c.values.len() == timestamps.len()));
        Self {
            timestamps,
            channels,
        }
    }

    pub(crate) fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }
}

/// A cell as it comes out of an export file, before any coercion.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawCell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl RawCell {
    pub fn text(value: impl Into<String>) -> Self {
        RawCell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Number(_) => false,
            RawCell::Text(s) => s.trim().is_empty(),
        }
    }
}

/// Header plus text/number rows of one export file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<RawCell>>) -> Self {
        Self { headers, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell at `(row, col)`; short rows read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &RawCell {
        static EMPTY: RawCell = RawCell::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Strips leading and trailing whitespace from every header.
    pub fn trim_headers(&mut self) {
        for header in &mut self.headers {
            let trimmed = header.trim();
            if trimmed.len() != header.len() {
                *header = trimmed.to_string();
            }
        }
    }

    /// Renames repeated headers to `name.1`, `name.2`, ... in order of
    /// appearance, skipping suffixes another header already uses. SDI
    /// exports name both the month and the minute column `mm`.
    pub fn dedupe_headers(&mut self) {
        let mut taken: HashSet<String> = HashSet::with_capacity(self.headers.len());
        let mut repeats: HashMap<String, usize> = HashMap::new();
        for header in &mut self.headers {
            if taken.insert(header.clone()) {
                continue;
            }
            let count = repeats.entry(header.clone()).or_insert(0);
            let renamed = loop {
                *count += 1;
                let candidate = format!("{header}.{count}");
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(renamed.clone());
            *header = renamed;
        }
    }
}
