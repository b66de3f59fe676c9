use crate::error::{EngineError, Result};
use crate::table::{Channel, ObservationTable};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

/// Name of the timestamp column in frames built from observation tables.
pub const DATE_COLUMN: &str = "date";

/// Converts a table into a `DataFrame` with a millisecond `date` column
/// followed by one nullable `Float64` column per channel.
pub fn to_dataframe(table: &ObservationTable) -> Result<DataFrame> {
    let millis: Vec<i64> = table
        .timestamps()
        .iter()
        .map(|ts| ts.and_utc().timestamp_millis())
        .collect();
    let dates = Series::new(DATE_COLUMN.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    let mut columns = Vec::with_capacity(table.width() + 1);
    columns.push(dates);
    for channel in table.channels() {
        columns.push(Series::new(channel.name.as_str().into(), channel.values.as_slice()));
    }
    Ok(DataFrame::new(columns)?)
}

fn to_naive(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    utc.map(|dt| dt.naive_utc())
}

/// Reads a `DataFrame` back into a table, using `index` as the timestamp column.
///
/// The index must be a datetime column without nulls; every other column is
/// cast to `Float64`.
pub fn from_dataframe(df: &DataFrame, index: &str) -> Result<ObservationTable> {
    let index_series = df
        .column(index)
        .map_err(|_| EngineError::missing_column(index))?;
    let unit = match index_series.dtype() {
        DataType::Datetime(unit, _) => *unit,
        other => {
            return Err(EngineError::IndexType {
                column: index.to_string(),
                dtype: other.to_string(),
            })
        }
    };

    let raw = index_series.datetime()?;
    let mut timestamps = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let ts = raw
            .get(idx)
            .and_then(|v| to_naive(v, unit))
            .ok_or_else(|| EngineError::Shape(format!("index '{index}' has no valid timestamp at row {idx}")))?;
        timestamps.push(ts);
    }

    let mut channels = Vec::with_capacity(df.width().saturating_sub(1));
    for series in df.get_columns() {
        if series.name().as_str() == index {
            continue;
        }
        let values = series.cast(&DataType::Float64)?;
        let values = values.f64()?.into_iter().collect();
        channels.push(Channel::new(series.name().as_str(), values));
    }

    ObservationTable::new(timestamps, channels)
}
