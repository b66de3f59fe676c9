use crate::error::{EngineError, Result};
use crate::table::ObservationTable;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Date format of the reporting period boundaries, e.g. `01-12-2024`.
pub const PERIOD_DATE_FORMAT: &str = "%d-%m-%Y";

/// Resolutions the monthly reports are produced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    OneMinute,
    FifteenMinutes,
    Hourly,
    Daily,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::OneMinute,
        Resolution::FifteenMinutes,
        Resolution::Hourly,
        Resolution::Daily,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Resolution::OneMinute => 1,
            Resolution::FifteenMinutes => 15,
            Resolution::Hourly => 60,
            Resolution::Daily => 1440,
        }
    }

    /// Window length in hours; the power to energy factor for this resolution.
    pub fn hours(self) -> f64 {
        self.minutes() as f64 / 60.0
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::OneMinute => "1m",
            Resolution::FifteenMinutes => "15m",
            Resolution::Hourly => "1h",
            Resolution::Daily => "1d",
        }
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.minutes() == minutes)
    }
}

/// Parses a period boundary such as `01-01-2025`.
pub fn parse_period_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), PERIOD_DATE_FORMAT).map_err(|e| EngineError::Format {
        column: "period".to_string(),
        reason: format!("'{value}' is not a {PERIOD_DATE_FORMAT} date: {e}"),
    })
}

/// Gap-free expected timestamps of one reporting period.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalGrid {
    timestamps: Vec<NaiveDateTime>,
    step_minutes: i64,
}

impl CanonicalGrid {
    /// Timestamps from `start + offset` up to midnight of `end`, every `step_minutes`.
    ///
    /// The end timestamp is included when it falls on a step boundary. An
    /// offset that pushes the first timestamp past the end gives an empty grid.
    pub fn build(
        start: NaiveDate,
        end: NaiveDate,
        step_minutes: i64,
        offset_minutes: i64,
    ) -> Result<Self> {
        if step_minutes <= 0 {
            return Err(EngineError::Range(format!(
                "step must be positive, got {step_minutes} minutes"
            )));
        }
        if end < start {
            return Err(EngineError::Range(format!("end {end} is before start {start}")));
        }

        let first = Duration::try_minutes(offset_minutes)
            .and_then(|offset| start.and_time(chrono::NaiveTime::MIN).checked_add_signed(offset))
            .ok_or_else(|| {
                EngineError::Range(format!("offset of {offset_minutes} minutes is out of the datetime range"))
            })?;
        let last = end.and_time(chrono::NaiveTime::MIN);
        // A step too large for a duration can only ever yield the first timestamp
        let step = Duration::try_minutes(step_minutes);

        let mut timestamps = Vec::new();
        if first <= last {
            let count = (last - first).num_minutes() / step_minutes + 1;
            timestamps.reserve(count as usize);
            let mut current = first;
            while current <= last {
                timestamps.push(current);
                match step.and_then(|step| current.checked_add_signed(step)) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        Ok(Self {
            timestamps,
            step_minutes,
        })
    }

    /// Same as [`CanonicalGrid::build`] with `%d-%m-%Y` period strings.
    pub fn from_period(
        start: &str,
        end: &str,
        step_minutes: i64,
        offset_minutes: i64,
    ) -> Result<Self> {
        Self::build(
            parse_period_date(start)?,
            parse_period_date(end)?,
            step_minutes,
            offset_minutes,
        )
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn step_minutes(&self) -> i64 {
        self.step_minutes
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The grid as a table without channels, the left side of a grid join.
    pub fn to_table(&self) -> ObservationTable {
        ObservationTable::from_parts_unchecked(self.timestamps.clone(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32, m: u32, y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_single_day_grid_has_one_timestamp() {
        let grid = CanonicalGrid::from_period("01-01-2025", "01-01-2025", 15, 0).unwrap();
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.timestamps()[0], date(1, 1, 2025).and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn test_month_grid_length_and_bounds() {
        let start = date(1, 12, 2024);
        let end = date(1, 1, 2025);
        for step in [1, 7, 15, 60, 1440] {
            let grid = CanonicalGrid::build(start, end, step, 0).unwrap();
            let span = (end - start).num_minutes();
            assert_eq!(grid.len() as i64, span / step + 1, "step {step}");
            assert_eq!(grid.timestamps()[0], start.and_hms_opt(0, 0, 0).unwrap());
            assert!(*grid.timestamps().last().unwrap() <= end.and_hms_opt(0, 0, 0).unwrap());
            assert!(grid.timestamps().windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_offset_shifts_first_timestamp() {
        let grid = CanonicalGrid::build(date(1, 12, 2024), date(2, 12, 2024), 15, 15).unwrap();
        assert_eq!(grid.timestamps()[0], date(1, 12, 2024).and_hms_opt(0, 15, 0).unwrap());
        assert_eq!(grid.len(), 96);
        assert_eq!(
            *grid.timestamps().last().unwrap(),
            date(2, 12, 2024).and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            CanonicalGrid::build(date(2, 1, 2025), date(1, 1, 2025), 15, 0),
            Err(EngineError::Range(_))
        ));
        assert!(matches!(
            CanonicalGrid::build(date(1, 1, 2025), date(2, 1, 2025), 0, 0),
            Err(EngineError::Range(_))
        ));
        assert!(matches!(
            CanonicalGrid::from_period("2025-01-01", "01-01-2025", 15, 0),
            Err(EngineError::Format { .. })
        ));
    }

    #[test]
    fn test_huge_step_keeps_only_first_timestamp() {
        let grid = CanonicalGrid::build(date(1, 1, 2025), date(2, 1, 2025), 1_000_000_000_000, 0).unwrap();
        assert_eq!(grid.timestamps(), &[date(1, 1, 2025).and_hms_opt(0, 0, 0).unwrap()]);

        let grid = CanonicalGrid::build(date(1, 1, 2025), date(2, 1, 2025), i64::MAX, 0).unwrap();
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_offset_outside_datetime_range() {
        for offset in [1_000_000_000_000, i64::MAX, i64::MIN] {
            assert!(
                matches!(
                    CanonicalGrid::build(date(1, 1, 2025), date(2, 1, 2025), 15, offset),
                    Err(EngineError::Range(_))
                ),
                "offset {offset}"
            );
        }
    }

    #[test]
    fn test_resolution_factors() {
        assert_eq!(Resolution::FifteenMinutes.hours(), 0.25);
        assert_eq!(Resolution::from_minutes(60), Some(Resolution::Hourly));
        assert_eq!(Resolution::from_minutes(7), None);
        assert_eq!(Resolution::Daily.label(), "1d");
    }
}
