use crate::catalogue::ChannelCatalogue;
use crate::error::{EngineError, Result};
use crate::table::{Channel, ObservationTable};
use chrono::{NaiveDate, NaiveTime};

/// Daylight window the completeness ratio is measured over, inclusive.
const COMPLETENESS_START: NaiveTime = match NaiveTime::from_hms_opt(6, 0, 0) {
    Some(time) => time,
    None => panic!("completeness window start is not a valid time"),
};
const COMPLETENESS_END: NaiveTime = match NaiveTime::from_hms_opt(20, 0, 0) {
    Some(time) => time,
    None => panic!("completeness window end is not a valid time"),
};

/// Turns every value at or above `threshold` into missing.
///
/// Used on irradiance channels, where readings past the physical limit are
/// sensor faults rather than data.
pub fn null_at_or_above(table: &ObservationTable, channel: &str, threshold: f64) -> Result<ObservationTable> {
    let index = table
        .channel_index(channel)
        .ok_or_else(|| EngineError::missing_column(channel))?;
    let mut cleaned = table.clone();
    for value in cleaned.channels_mut()[index].values.iter_mut() {
        if matches!(value, Some(v) if *v >= threshold) {
            *value = None;
        }
    }
    Ok(cleaned)
}

/// Forces positive values outside `[start, end]` (time of day) to zero.
///
/// Inverters report standby noise at night; production only counts inside
/// the window. Both bounds are inclusive.
pub fn mask_outside_window(table: &ObservationTable, start: NaiveTime, end: NaiveTime) -> ObservationTable {
    let outside: Vec<bool> = table
        .timestamps()
        .iter()
        .map(|ts| {
            let time = ts.time();
            time < start || time > end
        })
        .collect();

    let mut masked = table.clone();
    for channel in masked.channels_mut() {
        for (value, &out) in channel.values.iter_mut().zip(&outside) {
            if out && matches!(value, Some(v) if *v > 0.0) {
                *value = Some(0.0);
            }
        }
    }
    masked
}

/// Fraction of missing values per channel over the rows whose time of day
/// is within 06:00 and 20:00 (inclusive).
///
/// `None` when no row falls in that window.
pub fn missing_ratio(rows: &ObservationTable) -> Option<Vec<(String, f64)>> {
    let (start, end) = (COMPLETENESS_START, COMPLETENESS_END);
    let in_window: Vec<usize> = rows
        .timestamps()
        .iter()
        .enumerate()
        .filter(|(_, ts)| (start..=end).contains(&ts.time()))
        .map(|(idx, _)| idx)
        .collect();

    if in_window.is_empty() {
        return None;
    }

    let total = in_window.len() as f64;
    Some(
        rows.channels()
            .iter()
            .map(|channel| {
                let missing = in_window.iter().filter(|&&i| channel.values[i].is_none()).count();
                (channel.name.clone(), missing as f64 / total)
            })
            .collect(),
    )
}

/// [`missing_ratio`] for every calendar day of the table, one row per day
/// stamped at midnight. Days without daylight rows get missing ratios.
pub fn daily_missing_ratio(table: &ObservationTable) -> ObservationTable {
    let mut days: Vec<(NaiveDate, Vec<usize>)> = Vec::new();
    for (idx, ts) in table.timestamps().iter().enumerate() {
        match days.last_mut() {
            Some((day, rows)) if *day == ts.date() => rows.push(idx),
            _ => days.push((ts.date(), vec![idx])),
        }
    }

    let mut channels: Vec<Channel> = table
        .channels()
        .iter()
        .map(|c| Channel::new(c.name.clone(), Vec::with_capacity(days.len())))
        .collect();

    for (_, rows) in &days {
        let ratios = missing_ratio(&table.take_rows(rows));
        for (idx, channel) in channels.iter_mut().enumerate() {
            channel.values.push(ratios.as_ref().map(|r| r[idx].1));
        }
    }

    let timestamps = days.iter().map(|(day, _)| day.and_time(NaiveTime::MIN)).collect();
    ObservationTable::from_parts_unchecked(timestamps, channels)
}

/// Columns of a loaded file the catalogue does not know, in file order.
pub fn unknown_columns<'a>(catalogue: &ChannelCatalogue, columns: &[&'a str]) -> Vec<&'a str> {
    columns
        .iter()
        .copied()
        .filter(|column| !catalogue.knows(column))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ChannelSpec;
    use crate::resample::AggRule;
    use chrono::NaiveDateTime;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let table = ObservationTable::from_columns(
            vec![at(1, 12, 0), at(1, 12, 1), at(1, 12, 2)],
            vec![("Irradiance [W/m2]", vec![Some(1500.0), Some(1499.9), None])],
        )
        .unwrap();
        let cleaned = null_at_or_above(&table, "Irradiance [W/m2]", 1500.0).unwrap();
        assert_eq!(
            cleaned.channel("Irradiance [W/m2]").unwrap().values,
            vec![None, Some(1499.9), None]
        );
        assert!(matches!(
            null_at_or_above(&table, "missing", 1.0),
            Err(EngineError::Column { .. })
        ));
    }

    #[test]
    fn test_mask_outside_production_window() {
        let table = ObservationTable::from_columns(
            vec![at(1, 5, 0), at(1, 6, 0), at(1, 7, 0), at(1, 20, 0), at(1, 20, 1)],
            vec![
                ("P", vec![Some(5.0), Some(5.0), Some(5.0), Some(5.0), Some(5.0)]),
                ("Q", vec![None, None, None, None, Some(-2.0)]),
            ],
        )
        .unwrap();
        let masked = mask_outside_window(&table, hm(6, 0), hm(20, 0));
        assert_eq!(
            masked.channel("P").unwrap().values,
            vec![Some(0.0), Some(5.0), Some(5.0), Some(5.0), Some(0.0)]
        );
        assert_eq!(masked.channel("Q").unwrap().values, table.channel("Q").unwrap().values);
    }

    #[test]
    fn test_missing_ratio_counts_daylight_only() {
        let table = ObservationTable::from_columns(
            vec![at(1, 3, 0), at(1, 6, 0), at(1, 12, 0), at(1, 20, 0), at(1, 22, 0)],
            vec![("A", vec![None, None, Some(1.0), Some(1.0), None])],
        )
        .unwrap();
        let ratios = missing_ratio(&table).unwrap();
        assert_eq!(ratios.len(), 1);
        assert!((ratios[0].1 - 1.0 / 3.0).abs() < 1e-12);

        let night = ObservationTable::from_columns(vec![at(1, 2, 0)], vec![("A", vec![None])]).unwrap();
        assert_eq!(missing_ratio(&night), None);
    }

    #[test]
    fn test_completeness_window_bounds() {
        assert_eq!(COMPLETENESS_START, hm(6, 0));
        assert_eq!(COMPLETENESS_END, hm(20, 0));

        let table = ObservationTable::from_columns(
            vec![at(1, 5, 59), at(1, 6, 0), at(1, 20, 0), at(1, 20, 1)],
            vec![("A", vec![None, Some(1.0), None, None])],
        )
        .unwrap();
        let ratios = missing_ratio(&table).unwrap();
        assert_eq!(ratios[0].1, 0.5);
    }

    #[test]
    fn test_daily_missing_ratio_table() {
        let table = ObservationTable::from_columns(
            vec![at(1, 10, 0), at(1, 11, 0), at(2, 1, 0), at(3, 10, 0)],
            vec![("A", vec![None, Some(2.0), Some(3.0), Some(4.0)])],
        )
        .unwrap();
        let daily = daily_missing_ratio(&table);
        assert_eq!(daily.timestamps(), &[at(1, 0, 0), at(2, 0, 0), at(3, 0, 0)]);
        assert_eq!(daily.channel("A").unwrap().values, vec![Some(0.5), None, Some(0.0)]);
    }

    #[test]
    fn test_unknown_columns_against_catalogue() {
        let catalogue = ChannelCatalogue::new(vec![ChannelSpec::new(
            "PN1_S11_AN10028",
            "Cabin 1 inverter 1 [kW]",
            AggRule::Mean,
            AggRule::Mean,
        )]);
        let unknown = unknown_columns(&catalogue, &["PN1_S11_AN10028", "PN1_S99_AN10028"]);
        assert_eq!(unknown, vec!["PN1_S99_AN10028"]);
    }
}
