//! Turns raw export tables into timestamp-indexed observation tables.
//!
//! Exports arrive in a handful of layouts: SCADA "SDI" sheets carry the
//! timestamp split over day/month/year/hour/minute/second columns, PRMTE
//! reports split it over year/month/day/hour/interval-start and use locale
//! formatted numbers, and meter exports carry one free-text timestamp column.

use crate::error::{EngineError, Result};
use crate::table::{Channel, ObservationTable, RawCell, RawTable, Sample};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Text values that stand for "no reading".
pub const MISSING_MARKERS: [&str; 6] = ["", "nan", "NaN", "NA", "N/A", "-"];

/// Formats tried, in order, on free-text timestamp columns.
pub const DEFAULT_TIMESTAMP_FORMATS: [&str; 5] = [
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S%.f %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const PARTS_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const TIMESTAMP_COLUMN: &str = "date";

/// How numbers are written in the text cells of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    /// `1 234.5`: spaces are thousands separators.
    #[default]
    Plain,
    /// `1.234,5`: dots are thousands separators, the comma is the decimal mark.
    Locale,
}

/// Parses one numeric text cell. Empty cells, missing markers and anything
/// that does not parse become missing.
pub fn parse_number(text: &str, style: NumberStyle) -> Sample {
    let trimmed = text.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return None;
    }
    let cleaned: String = match style {
        NumberStyle::Plain => trimmed.chars().filter(|c| !c.is_whitespace()).collect(),
        NumberStyle::Locale => trimmed
            .chars()
            .filter(|c| *c != '.' && !c.is_whitespace())
            .map(|c| if c == ',' { '.' } else { c })
            .collect(),
    };
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerces a raw cell to a sample. Numeric cells pass through unchanged.
pub fn coerce_cell(cell: &RawCell, style: NumberStyle) -> Sample {
    match cell {
        RawCell::Empty => None,
        RawCell::Number(v) => Some(*v).filter(|v| v.is_finite()),
        RawCell::Text(s) => parse_number(s, style),
    }
}

/// Names of the columns holding each part of a split timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampParts {
    pub day: String,
    pub month: String,
    pub year: String,
    pub hour: String,
    pub minute: String,
    pub second: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampLayout {
    Parts(TimestampParts),
    FreeText { column: String, formats: Vec<String> },
}

impl TimestampLayout {
    /// SCADA SDI export: `gg`, `mm`, `aaaa`, `hh`, `mm`, `ss`. The second `mm`
    /// (minutes) reads as `mm.1` once repeated headers are numbered.
    pub fn scada_sdi() -> Self {
        TimestampLayout::Parts(TimestampParts {
            day: "gg".into(),
            month: "mm".into(),
            year: "aaaa".into(),
            hour: "hh".into(),
            minute: "mm.1".into(),
            second: Some("ss".into()),
        })
    }

    /// PRMTE report: `AÑO`, `MES`, `DIA`, `HORA`, `INICIO INTERVALO`.
    pub fn prmte() -> Self {
        TimestampLayout::Parts(TimestampParts {
            day: "DIA".into(),
            month: "MES".into(),
            year: "AÑO".into(),
            hour: "HORA".into(),
            minute: "INICIO INTERVALO".into(),
            second: None,
        })
    }

    /// One text column parsed with [`DEFAULT_TIMESTAMP_FORMATS`].
    pub fn free_text(column: impl Into<String>) -> Self {
        TimestampLayout::FreeText {
            column: column.into(),
            formats: DEFAULT_TIMESTAMP_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn source_columns(&self) -> Vec<&str> {
        match self {
            TimestampLayout::Parts(p) => {
                let mut cols = vec![
                    p.day.as_str(),
                    p.month.as_str(),
                    p.year.as_str(),
                    p.hour.as_str(),
                    p.minute.as_str(),
                ];
                cols.extend(p.second.as_deref());
                cols
            }
            TimestampLayout::FreeText { column, .. } => vec![column.as_str()],
        }
    }
}

/// Normalizer for one export layout.
#[derive(Debug, Clone)]
pub struct Normalizer {
    layout: TimestampLayout,
    drop_columns: Vec<String>,
    drop_positions: Vec<usize>,
    number_style: NumberStyle,
    renames: HashMap<String, String>,
}

impl Normalizer {
    pub fn new(layout: TimestampLayout) -> Self {
        Self {
            layout,
            drop_columns: Vec::new(),
            drop_positions: Vec::new(),
            number_style: NumberStyle::Plain,
            renames: HashMap::new(),
        }
    }

    /// SDI exports with their `L` and `mmm` bookkeeping columns removed.
    pub fn scada_sdi() -> Self {
        Self::new(TimestampLayout::scada_sdi()).dropping(["L", "mmm"])
    }

    /// PRMTE reports with locale-formatted numbers.
    pub fn prmte() -> Self {
        Self::new(TimestampLayout::prmte()).with_number_style(NumberStyle::Locale)
    }

    pub fn dropping<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Drops columns by their zero-based position in the raw header.
    pub fn dropping_positions(mut self, positions: &[usize]) -> Self {
        self.drop_positions.extend_from_slice(positions);
        self
    }

    pub fn with_number_style(mut self, style: NumberStyle) -> Self {
        self.number_style = style;
        self
    }

    /// Renames channels after coercion, e.g. SCADA tag to display name.
    pub fn with_renames(mut self, renames: HashMap<String, String>) -> Self {
        self.renames = renames;
        self
    }

    pub fn layout(&self) -> &TimestampLayout {
        &self.layout
    }

    pub fn normalize(&self, raw: &RawTable) -> Result<ObservationTable> {
        let mut raw = raw.clone();
        raw.trim_headers();
        raw.dedupe_headers();

        let timestamps = match &self.layout {
            TimestampLayout::Parts(parts) => reconstruct_from_parts(&raw, parts)?,
            TimestampLayout::FreeText { column, formats } => parse_free_text(&raw, column, formats)?,
        };

        let skipped: HashSet<&str> = self
            .layout
            .source_columns()
            .into_iter()
            .chain(self.drop_columns.iter().map(String::as_str))
            .collect();
        let data_columns: Vec<usize> = (0..raw.headers.len())
            .filter(|idx| !self.drop_positions.contains(idx))
            .filter(|&idx| !skipped.contains(raw.headers[idx].as_str()))
            .filter(|&idx| !raw.headers[idx].is_empty())
            .collect();

        // Rows without a timestamp carry no observation
        let mut rows: Vec<(usize, NaiveDateTime)> = timestamps
            .into_iter()
            .enumerate()
            .filter_map(|(row, ts)| ts.map(|ts| (row, ts)))
            .collect();
        rows.sort_by_key(|&(_, ts)| ts);

        let channels = data_columns
            .iter()
            .map(|&col| {
                let header = &raw.headers[col];
                let name = self.renames.get(header).unwrap_or(header).clone();
                let values = rows
                    .iter()
                    .map(|&(row, _)| coerce_cell(raw.cell(row, col), self.number_style))
                    .collect();
                Channel::new(name, values)
            })
            .collect();

        debug!(
            "normalized {} of {} rows into {} channels",
            rows.len(),
            raw.height(),
            data_columns.len()
        );
        ObservationTable::new(rows.into_iter().map(|(_, ts)| ts).collect(), channels)
    }
}

/// Removes characters outside printable ASCII (0x20-0x7E).
pub fn strip_unprintable(text: &str) -> String {
    text.chars().filter(|c| (' '..='~').contains(c)).collect()
}

fn required_column(raw: &RawTable, name: &str) -> Result<usize> {
    raw.column_index(name).ok_or_else(|| EngineError::Format {
        column: name.to_string(),
        reason: "timestamp column is missing from the export".to_string(),
    })
}

/// Zero-padded fixed-width text of one timestamp part.
fn padded_part(cell: &RawCell, column: &str, width: usize, row: usize) -> Result<String> {
    let digits = match cell {
        RawCell::Number(v) if v.fract() == 0.0 && *v >= 0.0 => Some(format!("{}", *v as u64)),
        RawCell::Text(s) => {
            let cleaned: String = strip_unprintable(s).chars().filter(|c| !c.is_whitespace()).collect();
            if !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit()) {
                Some(cleaned)
            } else {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                    .map(|v| format!("{}", v as u64))
            }
        }
        _ => None,
    };
    match digits {
        Some(d) if d.len() <= width => Ok(format!("{d:0>width$}")),
        _ => Err(EngineError::Format {
            column: column.to_string(),
            reason: format!("row {row}: cannot make a {width}-digit field from {cell:?}"),
        }),
    }
}

fn reconstruct_from_parts(raw: &RawTable, parts: &TimestampParts) -> Result<Vec<Option<NaiveDateTime>>> {
    let day = required_column(raw, &parts.day)?;
    let month = required_column(raw, &parts.month)?;
    let year = required_column(raw, &parts.year)?;
    let hour = required_column(raw, &parts.hour)?;
    let minute = required_column(raw, &parts.minute)?;
    let second = parts
        .second
        .as_deref()
        .map(|name| required_column(raw, name).map(|idx| (name, idx)))
        .transpose()?;

    let mut columns = vec![
        (parts.day.as_str(), day, 2),
        (parts.month.as_str(), month, 2),
        (parts.year.as_str(), year, 4),
        (parts.hour.as_str(), hour, 2),
        (parts.minute.as_str(), minute, 2),
    ];
    if let Some((name, idx)) = second {
        columns.push((name, idx, 2));
    }

    let mut timestamps = Vec::with_capacity(raw.height());
    for row in 0..raw.height() {
        if columns.iter().all(|&(_, idx, _)| raw.cell(row, idx).is_blank()) {
            timestamps.push(None);
            continue;
        }
        let mut fields = Vec::with_capacity(6);
        for &(name, idx, width) in &columns {
            fields.push(padded_part(raw.cell(row, idx), name, width, row)?);
        }
        let seconds = fields.get(5).map(String::as_str).unwrap_or("00");
        let text = strip_unprintable(&format!(
            "{}-{}-{} {}:{}:{}",
            fields[0], fields[1], fields[2], fields[3], fields[4], seconds
        ));
        let ts = NaiveDateTime::parse_from_str(&text, PARTS_FORMAT).map_err(|e| EngineError::Format {
            column: TIMESTAMP_COLUMN.to_string(),
            reason: format!("row {row}: '{text}' is not a valid time: {e}"),
        })?;
        timestamps.push(Some(ts));
    }
    Ok(timestamps)
}

/// Excel stores datetimes as fractional days since 1899-12-30.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() {
        return None;
    }
    base.checked_add_signed(Duration::milliseconds(millis as i64))
}

fn parse_with_format(raw: &RawTable, col: usize, format: &str) -> Option<Vec<Option<NaiveDateTime>>> {
    (0..raw.height())
        .map(|row| match raw.cell(row, col) {
            RawCell::Empty => Some(None),
            RawCell::Number(v) => excel_serial_to_datetime(*v).map(Some),
            RawCell::Text(s) => {
                let cleaned = strip_unprintable(s);
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    Some(None)
                } else {
                    NaiveDateTime::parse_from_str(cleaned, format).ok().map(Some)
                }
            }
        })
        .collect()
}

fn parse_free_text(raw: &RawTable, column: &str, formats: &[String]) -> Result<Vec<Option<NaiveDateTime>>> {
    let col = required_column(raw, column)?;
    for format in formats {
        if let Some(parsed) = parse_with_format(raw, col, format) {
            debug!("column '{column}' parsed with format '{format}'");
            return Ok(parsed);
        }
    }
    Err(EngineError::UnknownTimestampFormat {
        column: column.to_string(),
        attempted: formats.to_vec(),
    })
}
