use crate::error::{EngineError, Result};
use crate::table::{Channel, ObservationTable, Sample};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How the samples of one window are reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggRule {
    Mean,
    Sum,
    Min,
    Max,
    Last,
}

impl AggRule {
    pub fn as_str(self) -> &'static str {
        match self {
            AggRule::Mean => "mean",
            AggRule::Sum => "sum",
            AggRule::Min => "min",
            AggRule::Max => "max",
            AggRule::Last => "last",
        }
    }

    fn finish(self, acc: &Accumulator) -> Sample {
        if acc.count == 0 {
            return None;
        }
        Some(match self {
            AggRule::Mean => acc.sum / acc.count as f64,
            AggRule::Sum => acc.sum,
            AggRule::Min => acc.min,
            AggRule::Max => acc.max,
            AggRule::Last => acc.last,
        })
    }
}

impl FromStr for AggRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(AggRule::Mean),
            "sum" => Ok(AggRule::Sum),
            "min" => Ok(AggRule::Min),
            "max" => Ok(AggRule::Max),
            "last" => Ok(AggRule::Last),
            other => Err(format!("unknown aggregation rule '{other}'")),
        }
    }
}

impl fmt::Display for AggRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: f64::NAN,
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
    }
}

/// Channel name to rule text, in output order.
///
/// Rules stay as text until aggregation so that a bad rule in a catalogue
/// is reported alongside the other directive problems instead of failing
/// the whole load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationDirective {
    entries: Vec<(String, String)>,
}

impl AggregationDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: impl Into<String>, rule: impl Into<String>) -> Self {
        self.insert(channel, rule);
        self
    }

    /// Adds or replaces the rule of a channel.
    pub fn insert(&mut self, channel: impl Into<String>, rule: impl Into<String>) {
        let channel = channel.into();
        let rule = rule.into();
        match self.entries.iter_mut().find(|(c, _)| *c == channel) {
            Some(entry) => entry.1 = rule,
            None => self.entries.push((channel, rule)),
        }
    }

    /// The same rule for every channel.
    pub fn uniform<I, S>(channels: I, rule: AggRule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut directive = Self::new();
        for channel in channels {
            directive.insert(channel, rule.as_str());
        }
        directive
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Into<String>, R: Into<String>> FromIterator<(C, R)> for AggregationDirective {
    fn from_iter<T: IntoIterator<Item = (C, R)>>(iter: T) -> Self {
        let mut directive = Self::new();
        for (channel, rule) in iter {
            directive.insert(channel, rule);
        }
        directive
    }
}

/// A mismatch between a directive and the table it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveIssue {
    UnknownChannel(String),
    InvalidRule { channel: String, rule: String },
    Unaggregated(String),
}

impl fmt::Display for DirectiveIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveIssue::UnknownChannel(c) => write!(f, "column '{c}' not found in the table"),
            DirectiveIssue::InvalidRule { channel, rule } => {
                write!(f, "invalid aggregation operation '{rule}' for column '{channel}'")
            }
            DirectiveIssue::Unaggregated(c) => write!(f, "column '{c}' has no aggregation rule and is dropped"),
        }
    }
}

/// Output of [`resample`]: the coarser table plus every directive problem met.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    pub table: ObservationTable,
    pub issues: Vec<DirectiveIssue>,
}

/// Checks a directive against a table. Returns the usable `(column index,
/// name, rule)` triples in directive order and the problems found.
pub fn validate_directive(
    table: &ObservationTable,
    directive: &AggregationDirective,
) -> (Vec<(usize, String, AggRule)>, Vec<DirectiveIssue>) {
    let mut valid = Vec::new();
    let mut issues = Vec::new();

    for (channel, rule_text) in directive.entries() {
        let index = table.channel_index(channel);
        let rule = rule_text.parse::<AggRule>();
        if index.is_none() {
            issues.push(DirectiveIssue::UnknownChannel(channel.clone()));
        }
        if rule.is_err() {
            issues.push(DirectiveIssue::InvalidRule {
                channel: channel.clone(),
                rule: rule_text.clone(),
            });
        }
        if let (Some(index), Ok(rule)) = (index, rule) {
            valid.push((index, channel.clone(), rule));
        }
    }

    let covered: HashSet<&str> = directive.entries().iter().map(|(c, _)| c.as_str()).collect();
    for name in table.channel_names() {
        if !covered.contains(name) {
            issues.push(DirectiveIssue::Unaggregated(name.to_string()));
        }
    }

    (valid, issues)
}

/// Downsamples `table` into windows of `window_minutes`, anchored at midnight
/// of the first row's day, reducing each channel with its rule.
///
/// Every rule ignores missing samples and yields missing for a window that
/// has none. Windows are labelled by their start and are contiguous from
/// the first to the last occupied one.
pub fn resample(
    table: &ObservationTable,
    window_minutes: i64,
    directive: &AggregationDirective,
) -> Result<Resampled> {
    if window_minutes <= 0 {
        return Err(EngineError::Range(format!(
            "aggregation window must be positive, got {window_minutes} minutes"
        )));
    }

    let window_secs = window_minutes.checked_mul(60).ok_or_else(|| {
        EngineError::Range(format!("aggregation window of {window_minutes} minutes is too long"))
    })?;

    let (valid, issues) = validate_directive(table, directive);
    for issue in &issues {
        warn!("{issue}");
    }

    let (Some(first), Some(last)) = (table.timestamps().first(), table.timestamps().last()) else {
        let channels = valid.into_iter().map(|(_, name, _)| Channel::new(name, Vec::new())).collect();
        return Ok(Resampled {
            table: ObservationTable::from_parts_unchecked(Vec::new(), channels),
            issues,
        });
    };

    let origin = first.date().and_time(NaiveTime::MIN);
    let bucket_of = |ts: &NaiveDateTime| (*ts - origin).num_seconds().div_euclid(window_secs);
    let first_bucket = bucket_of(first);
    let n_buckets = (bucket_of(last) - first_bucket + 1) as usize;

    let buckets: Vec<usize> = table
        .timestamps()
        .iter()
        .map(|ts| (bucket_of(ts) - first_bucket) as usize)
        .collect();

    let channels = valid
        .into_iter()
        .map(|(index, name, rule)| {
            let mut accs = vec![Accumulator::default(); n_buckets];
            let source = &table.channels()[index].values;
            for (value, &bucket) in source.iter().zip(&buckets) {
                if let Some(v) = value {
                    accs[bucket].push(*v);
                }
            }
            Channel::new(name, accs.iter().map(|acc| rule.finish(acc)).collect())
        })
        .collect();

    let timestamps = (0..n_buckets as i64)
        .map(|i| origin + Duration::minutes((first_bucket + i) * window_minutes))
        .collect();

    Ok(Resampled {
        table: ObservationTable::from_parts_unchecked(timestamps, channels),
        issues,
    })
}

/// Multiplies the named channels by `factor`. Every named channel is required.
pub fn scale_channels(table: &ObservationTable, names: &[&str], factor: f64) -> Result<ObservationTable> {
    if let Some(missing) = names.iter().find(|n| table.channel(n).is_none()) {
        return Err(EngineError::missing_column(missing));
    }
    let mut scaled = table.clone();
    for name in names {
        scaled.scale_channel_mut(name, factor)?;
    }
    Ok(scaled)
}

/// Converts average power channels into energy per window: each `(power,
/// energy)` pair is scaled by the window length in hours and renamed.
pub fn power_to_energy(
    table: &ObservationTable,
    pairs: &[(String, String)],
    window_hours: f64,
) -> Result<ObservationTable> {
    let names: Vec<&str> = pairs.iter().map(|(power, _)| power.as_str()).collect();
    let mut converted = scale_channels(table, &names, window_hours)?;
    for channel in converted.channels_mut() {
        if let Some((_, energy)) = pairs.iter().find(|(power, _)| *power == channel.name) {
            channel.name = energy.clone();
        }
    }
    Ok(converted)
}
