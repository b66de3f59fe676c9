use crate::error::{EngineError, Result};
use crate::grid::CanonicalGrid;
use crate::table::{Channel, ObservationTable, Sample};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

/// Row index of the first occurrence of every timestamp.
fn first_rows(table: &ObservationTable) -> HashMap<NaiveDateTime, usize> {
    let mut rows = HashMap::with_capacity(table.height());
    for (idx, ts) in table.timestamps().iter().enumerate() {
        rows.entry(*ts).or_insert(idx);
    }
    rows
}

/// Left-joins every table onto the grid by timestamp.
///
/// The result has exactly the grid's timestamps and the channels of all
/// tables in the order given. Source rows off the grid are dropped, grid rows
/// a source lacks are missing for that source's channels.
pub fn left_join_onto_grid(grid: &CanonicalGrid, tables: &[ObservationTable]) -> Result<ObservationTable> {
    let mut channels: Vec<Channel> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for table in tables {
        let rows = first_rows(table);
        let lookup: Vec<Option<usize>> = grid.timestamps().iter().map(|ts| rows.get(ts).copied()).collect();

        for channel in table.channels() {
            if !seen.insert(channel.name.clone()) {
                return Err(EngineError::Column {
                    column: channel.name.clone(),
                    problem: "appears in more than one joined table".to_string(),
                });
            }
            let values = lookup
                .iter()
                .map(|row| row.and_then(|r| channel.values[r]))
                .collect();
            channels.push(Channel::new(channel.name.clone(), values));
        }
    }

    Ok(ObservationTable::from_parts_unchecked(grid.timestamps().to_vec(), channels))
}

/// Combines tables so that, per timestamp and channel, the first table with
/// a value wins. Later tables only fill gaps.
///
/// Covers the union of timestamps and channels of all inputs.
pub fn combine_by_precedence(tables: &[ObservationTable]) -> Result<ObservationTable> {
    if tables.is_empty() {
        return Err(EngineError::EmptyInput {
            operation: "precedence combine",
        });
    }

    let mut timestamps: Vec<NaiveDateTime> = tables
        .iter()
        .flat_map(|t| t.timestamps().iter().copied())
        .collect();
    timestamps.sort();
    timestamps.dedup();
    let positions: HashMap<NaiveDateTime, usize> =
        timestamps.iter().enumerate().map(|(idx, ts)| (*ts, idx)).collect();

    let mut channels: Vec<Channel> = Vec::new();
    let mut channel_slot: HashMap<String, usize> = HashMap::new();

    for table in tables {
        let rows = first_rows(table);
        for channel in table.channels() {
            let slot = *channel_slot.entry(channel.name.clone()).or_insert_with(|| {
                channels.push(Channel::new(channel.name.clone(), vec![None; timestamps.len()]));
                channels.len() - 1
            });
            let target = &mut channels[slot].values;
            for (ts, &row) in &rows {
                let cell: &mut Sample = &mut target[positions[ts]];
                if cell.is_none() {
                    *cell = channel.values[row];
                }
            }
        }
    }

    Ok(ObservationTable::from_parts_unchecked(timestamps, channels))
}

/// Drops rows missing in every channel, then duplicate timestamps keeping
/// the first occurrence. Tables without channels keep all their rows.
pub fn clean_rows(table: &ObservationTable) -> ObservationTable {
    let mut kept = Vec::with_capacity(table.height());
    let mut last: Option<NaiveDateTime> = None;

    for (row, ts) in table.timestamps().iter().enumerate() {
        let all_missing = table.width() > 0 && table.channels().iter().all(|c| c.values[row].is_none());
        if all_missing {
            continue;
        }
        // Timestamps are sorted, so duplicates are adjacent
        if last == Some(*ts) {
            continue;
        }
        last = Some(*ts);
        kept.push(row);
    }

    table.take_rows(&kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn table(times: &[(u32, u32)], columns: Vec<(&str, Vec<Sample>)>) -> ObservationTable {
        ObservationTable::from_columns(times.iter().map(|&(h, m)| ts(h, m)).collect(), columns).unwrap()
    }

    #[test]
    fn test_left_join_preserves_grid() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let grid = CanonicalGrid::build(start, end, 15, 0).unwrap();

        let short = table(&[(0, 15), (0, 20)], vec![("A", vec![Some(1.0), Some(9.0)])]);
        let off_grid_only = ObservationTable::from_columns(
            vec![NaiveDate::from_ymd_opt(2025, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()],
            vec![("B", vec![Some(5.0)])],
        )
        .unwrap();

        let joined = left_join_onto_grid(&grid, &[short, off_grid_only]).unwrap();
        assert_eq!(joined.timestamps(), grid.timestamps());
        assert_eq!(joined.channel_names(), vec!["A", "B"]);
        assert_eq!(joined.value(1, "A"), Some(Some(1.0)));
        assert_eq!(joined.value(0, "A"), Some(None));
        assert!(joined.channel("B").unwrap().values.iter().all(Option::is_none));
    }

    #[test]
    fn test_left_join_rejects_duplicate_channel() {
        let grid = CanonicalGrid::from_period("01-01-2025", "01-01-2025", 15, 0).unwrap();
        let a = table(&[(0, 0)], vec![("A", vec![Some(1.0)])]);
        assert!(matches!(
            left_join_onto_grid(&grid, &[a.clone(), a]),
            Err(EngineError::Column { .. })
        ));
    }

    #[test]
    fn test_combine_first_write_wins() {
        let primary = table(&[(0, 0), (0, 15)], vec![("A", vec![Some(1.0), None])]);
        let backup = table(
            &[(0, 0), (0, 15), (0, 30)],
            vec![("A", vec![Some(10.0), Some(20.0), Some(30.0)]), ("B", vec![None, Some(2.0), None])],
        );
        let combined = combine_by_precedence(&[primary, backup]).unwrap();
        assert_eq!(combined.height(), 3);
        assert_eq!(
            combined.channel("A").unwrap().values,
            vec![Some(1.0), Some(20.0), Some(30.0)]
        );
        assert_eq!(combined.channel("B").unwrap().values, vec![None, Some(2.0), None]);
    }

    #[test]
    fn test_combine_is_idempotent() {
        let a = table(&[(0, 0), (0, 15)], vec![("A", vec![Some(1.0), None])]);
        let b = table(&[(0, 15), (0, 30)], vec![("A", vec![Some(2.0), Some(3.0)])]);
        let once = combine_by_precedence(&[a.clone(), b.clone()]).unwrap();
        let twice = combine_by_precedence(&[a.clone(), b.clone(), a, b]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_combine_empty_list() {
        assert!(matches!(
            combine_by_precedence(&[]),
            Err(EngineError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_clean_rows_drops_empty_and_duplicates() {
        let messy = table(
            &[(0, 0), (0, 0), (0, 15), (0, 30)],
            vec![
                ("A", vec![Some(1.0), Some(2.0), None, Some(4.0)]),
                ("B", vec![None, None, None, None]),
            ],
        );
        let cleaned = clean_rows(&messy);
        assert_eq!(cleaned.timestamps(), &[ts(0, 0), ts(0, 30)]);
        assert_eq!(cleaned.channel("A").unwrap().values, vec![Some(1.0), Some(4.0)]);
    }
}
