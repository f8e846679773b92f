//! Transaction ingest, cleaning and temporal feature extraction using Polars

use crate::error::StageError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const TRANSACTION_ID: &str = "TransactionId";
pub const CUSTOMER_ID: &str = "CustomerId";
pub const AMOUNT: &str = "Amount";
pub const TIMESTAMP: &str = "TransactionStartTime";
pub const CHANNEL_ID: &str = "ChannelId";

pub const TRANSACTION_HOUR: &str = "TransactionHour";
pub const TRANSACTION_DAY: &str = "TransactionDay";
pub const TRANSACTION_MONTH: &str = "TransactionMonth";
pub const TRANSACTION_YEAR: &str = "TransactionYear";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Load a headered transaction CSV into a DataFrame
pub fn load_transactions(path: &Path) -> Result<DataFrame, StageError> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {}", path.display()),
        )
        .into());
    }

    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    log::debug!(
        "loaded {} rows x {} columns from {}",
        frame.height(),
        frame.width(),
        path.display()
    );
    Ok(frame)
}

/// First `*.csv` file in `dir`, in lexicographic order
pub fn discover_input(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Parse timestamps, deduplicate rows, add temporal features and impute numeric nulls.
///
/// Timestamps are normalised before deduplication so one event written in two
/// formats collapses to a single row. Malformed timestamps are rejected here so
/// that nothing downstream has to.
pub fn clean_transactions(mut frame: DataFrame) -> Result<DataFrame, StageError> {
    let parsed = match frame.column(TIMESTAMP) {
        Ok(series) => Some(datetime_values(series)?),
        Err(_) => None,
    };
    if let Some(stamps) = parsed {
        let millis: Vec<Option<i64>> = stamps
            .iter()
            .map(|t| t.map(|t| t.and_utc().timestamp_millis()))
            .collect();
        let series = Series::new(TIMESTAMP, millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        frame.with_column(series)?;
    }

    let before = frame.height();
    let frame = frame.unique_stable(None, UniqueKeepStrategy::First, None)?;
    if frame.height() < before {
        log::info!("dropped {} duplicate rows", before - frame.height());
    }

    let frame = add_temporal_features(frame)?;
    impute_numeric_medians(frame)
}

/// Add hour, day, month and year columns derived from `TransactionStartTime`.
///
/// Frames without the timestamp column pass through unchanged.
pub fn add_temporal_features(mut frame: DataFrame) -> Result<DataFrame, StageError> {
    if frame.column(TIMESTAMP).is_err() {
        return Ok(frame);
    }
    let stamps = datetime_values(frame.column(TIMESTAMP)?)?;

    let extract = |f: fn(&NaiveDateTime) -> i32| -> Vec<Option<i32>> {
        stamps.iter().map(|t| t.as_ref().map(f)).collect()
    };
    let hours = extract(|t| t.hour() as i32);
    let days = extract(|t| t.day() as i32);
    let months = extract(|t| t.month() as i32);
    let years = extract(|t| t.year());

    frame.with_column(Series::new(TRANSACTION_HOUR, hours))?;
    frame.with_column(Series::new(TRANSACTION_DAY, days))?;
    frame.with_column(Series::new(TRANSACTION_MONTH, months))?;
    frame.with_column(Series::new(TRANSACTION_YEAR, years))?;
    Ok(frame)
}

/// Write a frame as CSV, creating parent directories as needed
pub fn write_frame(frame: &mut DataFrame, path: &Path) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(frame)?;
    Ok(())
}

/// Parse an ISO-8601 style timestamp; offsets are normalised to UTC
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_utc());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Look up a column, reporting its absence as a schema error
pub(crate) fn required_column<'a>(
    frame: &'a DataFrame,
    column: &str,
) -> Result<&'a Series, StageError> {
    frame
        .column(column)
        .map_err(|_| StageError::schema(column))
}

pub(crate) fn string_values(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let cast = series.cast(&DataType::String)?;
    let values = cast.str()?;
    Ok(values.into_iter().map(|v| v.map(str::to_string)).collect())
}

pub(crate) fn f64_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let cast = series.cast(&DataType::Float64)?;
    let values = cast.f64()?;
    Ok(values.into_iter().collect())
}

pub(crate) fn i64_values(series: &Series) -> PolarsResult<Vec<Option<i64>>> {
    let cast = series.cast(&DataType::Int64)?;
    let values = cast.i64()?;
    Ok(values.into_iter().collect())
}

/// Read a timestamp column that is either still raw text or already a datetime
pub(crate) fn datetime_values(series: &Series) -> Result<Vec<Option<NaiveDateTime>>, StageError> {
    if matches!(series.dtype(), DataType::String) {
        return series
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, raw)| match raw {
                None => Ok(None),
                Some(raw) => parse_timestamp(raw).map(Some).ok_or_else(|| {
                    StageError::InvalidTimestamp {
                        row,
                        value: raw.to_string(),
                    }
                }),
            })
            .collect();
    }

    let millis = series
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    let values = millis.i64()?;
    Ok(values
        .into_iter()
        .map(|ms| ms.and_then(DateTime::from_timestamp_millis).map(|dt| dt.naive_utc()))
        .collect())
}

fn impute_numeric_medians(frame: DataFrame) -> Result<DataFrame, StageError> {
    let targets: Vec<String> = frame
        .get_columns()
        .iter()
        .filter(|s| s.dtype().is_numeric() && s.null_count() > 0)
        .map(|s| s.name().to_string())
        .collect();
    if targets.is_empty() {
        return Ok(frame);
    }

    for name in &targets {
        if let Some(fill) = frame.column(name)?.median() {
            log::info!("imputing nulls in '{}' with median {:.4}", name, fill);
        }
    }

    let fills: Vec<Expr> = targets
        .iter()
        .map(|name| col(name).fill_null(col(name).median()))
        .collect();
    Ok(frame.lazy().with_columns(fills).collect()?)
}
