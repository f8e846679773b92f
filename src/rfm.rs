//! RFM (Recency, Frequency, Monetary) aggregation from transactions to customers

use crate::data::{
    datetime_values, f64_values, i64_values, required_column, string_values, AMOUNT, CHANNEL_ID,
    CUSTOMER_ID, TIMESTAMP, TRANSACTION_ID,
};
use crate::error::StageError;
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::collections::HashMap;

pub const RECENCY: &str = "Recency";
pub const FREQUENCY: &str = "Frequency";
pub const MONETARY_TOTAL: &str = "Monetary_Total";
pub const MONETARY_MEAN: &str = "Monetary_Mean";
pub const MONETARY_STD: &str = "Monetary_Std";

/// A single cleaned transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub start_time: NaiveDateTime,
    pub channel_id: String,
}

/// Customer-level RFM record
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfm {
    pub customer_id: String,
    /// Whole days between the dataset's latest timestamp and this customer's latest
    pub recency: i64,
    pub frequency: usize,
    pub monetary_total: f64,
    pub monetary_mean: f64,
    /// Sample standard deviation, 0 for single-transaction customers
    pub monetary_std: f64,
    /// Most frequent channel, earliest seen wins ties
    pub channel_id: String,
}

/// One row per distinct customer, ordered by customer id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfmTable {
    pub customers: Vec<CustomerRfm>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerRfm> {
        self.customers
            .binary_search_by(|c| c.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.customers[idx])
    }
}

const LAST_SEEN: &str = "LastSeen";
const CHANNEL_COUNT: &str = "ChannelCount";
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Aggregate typed transactions into one RFM record per customer.
///
/// Recency is measured against the latest timestamp across all transactions.
pub fn aggregate(transactions: &[Transaction]) -> Result<RfmTable, StageError> {
    let millis: Vec<i64> = transactions
        .iter()
        .map(|t| t.start_time.and_utc().timestamp_millis())
        .collect();
    let frame = DataFrame::new(vec![
        Series::new(
            TRANSACTION_ID,
            transactions.iter().map(|t| t.transaction_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            CUSTOMER_ID,
            transactions.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(AMOUNT, transactions.iter().map(|t| t.amount).collect::<Vec<_>>()),
        Series::new(TIMESTAMP, millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        Series::new(
            CHANNEL_ID,
            transactions.iter().map(|t| t.channel_id.as_str()).collect::<Vec<_>>(),
        ),
    ])?;
    calculate_rfm(&frame)
}

/// Aggregate a cleaned transaction frame.
///
/// Rows without a customer id are dropped but still count toward the reference date;
/// a missing `CustomerId` column is a schema error.
pub fn calculate_rfm(frame: &DataFrame) -> Result<RfmTable, StageError> {
    let skipped = check_required_values(frame)?;

    let millis: Vec<Option<i64>> = datetime_values(required_column(frame, TIMESTAMP)?)?
        .into_iter()
        .map(|t| t.map(|t| t.and_utc().timestamp_millis()))
        .collect();
    let Some(reference) = millis.iter().flatten().max().copied() else {
        return Ok(RfmTable::default());
    };

    let transactions = DataFrame::new(vec![
        required_column(frame, CUSTOMER_ID)?.cast(&DataType::String)?,
        required_column(frame, TRANSACTION_ID)?.cast(&DataType::String)?,
        required_column(frame, AMOUNT)?.cast(&DataType::Float64)?,
        Series::new(TIMESTAMP, millis),
        required_column(frame, CHANNEL_ID)?.cast(&DataType::String)?,
    ])?
    .lazy()
    .filter(col(CUSTOMER_ID).is_not_null());

    let summary = transactions
        .clone()
        .group_by_stable([col(CUSTOMER_ID)])
        .agg([
            col(TIMESTAMP).max().alias(LAST_SEEN),
            col(TRANSACTION_ID).count().alias(FREQUENCY),
            col(AMOUNT).sum().alias(MONETARY_TOTAL),
            col(AMOUNT).mean().alias(MONETARY_MEAN),
            // Sample std is undefined for a single transaction
            col(AMOUNT).std(1).fill_null(lit(0.0)).alias(MONETARY_STD),
        ])
        .with_columns([
            // Non-negative, so the integer cast floors to whole days
            ((lit(reference) - col(LAST_SEEN)).cast(DataType::Float64) / lit(MILLIS_PER_DAY))
                .cast(DataType::Int64)
                .alias(RECENCY),
        ])
        .sort([CUSTOMER_ID], SortMultipleOptions::default())
        .collect()?;

    let channel_counts = transactions
        .group_by_stable([col(CUSTOMER_ID), col(CHANNEL_ID)])
        .agg([col(TRANSACTION_ID).count().alias(CHANNEL_COUNT)])
        .collect()?;
    let mut modal = modal_channels(&channel_counts)?;

    let ids = string_values(summary.column(CUSTOMER_ID)?)?;
    let recency = i64_values(summary.column(RECENCY)?)?;
    let frequency = i64_values(summary.column(FREQUENCY)?)?;
    let total = f64_values(summary.column(MONETARY_TOTAL)?)?;
    let mean = f64_values(summary.column(MONETARY_MEAN)?)?;
    let std = f64_values(summary.column(MONETARY_STD)?)?;

    let customers: Vec<CustomerRfm> = ids
        .into_iter()
        .enumerate()
        .filter_map(|(row, id)| id.map(|id| (row, id)))
        .map(|(row, customer_id)| CustomerRfm {
            channel_id: modal.remove(&customer_id).unwrap_or_default(),
            customer_id,
            recency: recency[row].unwrap_or(0).max(0),
            frequency: frequency[row].unwrap_or(0) as usize,
            monetary_total: total[row].unwrap_or(0.0),
            monetary_mean: mean[row].unwrap_or(0.0),
            monetary_std: std[row].unwrap_or(0.0),
        })
        .collect();

    log::info!(
        "aggregated {} transactions into {} customers",
        frame.height() - skipped,
        customers.len()
    );
    Ok(RfmTable { customers })
}

/// Most frequent channel per customer from `(customer, channel, count)` rows in
/// first-seen order; strictly greater keeps the earliest channel on ties
fn modal_channels(counts: &DataFrame) -> PolarsResult<HashMap<String, String>> {
    let customers = string_values(counts.column(CUSTOMER_ID)?)?;
    let channels = string_values(counts.column(CHANNEL_ID)?)?;
    let sizes = i64_values(counts.column(CHANNEL_COUNT)?)?;

    let mut best: HashMap<String, (String, i64)> = HashMap::new();
    for ((customer, channel), size) in customers.into_iter().zip(channels).zip(sizes) {
        let (Some(customer), Some(channel), Some(size)) = (customer, channel, size) else {
            continue;
        };
        match best.get_mut(&customer) {
            Some(current) if size > current.1 => *current = (channel, size),
            Some(_) => {}
            None => {
                best.insert(customer, (channel, size));
            }
        }
    }
    Ok(best
        .into_iter()
        .map(|(customer, (channel, _))| (customer, channel))
        .collect())
}

/// Reject nulls in required columns of rows that carry a customer id.
///
/// Returns the number of rows without a customer id.
fn check_required_values(frame: &DataFrame) -> Result<usize, StageError> {
    let customers = required_column(frame, CUSTOMER_ID)?;
    let no_customer = customers.is_null();

    for column in [TRANSACTION_ID, AMOUNT, TIMESTAMP, CHANNEL_ID] {
        let no_value = required_column(frame, column)?.is_null();
        let row = (&no_customer)
            .into_iter()
            .zip(&no_value)
            .position(|(customer, value)| customer == Some(false) && value == Some(true));
        if let Some(row) = row {
            return Err(StageError::MissingValue {
                column: column.to_string(),
                row,
            });
        }
    }

    let skipped = customers.null_count();
    if skipped > 0 {
        log::warn!("skipped {} rows without a {}", skipped, CUSTOMER_ID);
    }
    Ok(skipped)
}
