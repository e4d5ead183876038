//! CSV payload to typed records.
//!
//! The upstream export carries many columns; only five are kept. Count
//! columns become `f64`, the `created_at` column becomes the record
//! timestamp, and `state` becomes the partition key.

use casefeed_core::{Normalizer, ParseError, PartitionKey, Record, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};

pub const CREATED_AT: &str = "created_at";
pub const PROBABLE_NEW_CASES: &str = "pnew_case";
pub const NEW_CASES: &str = "new_case";
pub const TOTAL_CASES: &str = "tot_cases";
pub const STATE: &str = "state";

/// Naive date-time layouts accepted in `created_at`, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

/// Date-only layouts accepted in `created_at`. Midnight UTC is assumed.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Column positions of the projected fields in one payload.
#[derive(Debug, Clone, Copy)]
struct Columns {
    created_at: usize,
    probable_new_cases: usize,
    new_cases: usize,
    total_cases: usize,
    state: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, ParseError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ParseError::MissingColumn {
                    column: name.to_string(),
                })
        };
        Ok(Self {
            created_at: find(CREATED_AT)?,
            probable_new_cases: find(PROBABLE_NEW_CASES)?,
            new_cases: find(NEW_CASES)?,
            total_cases: find(TOTAL_CASES)?,
            state: find(STATE)?,
        })
    }
}

/// Comma-delimited payload normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvNormalizer;

impl CsvNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for CsvNormalizer {
    fn normalize(&self, raw_text: &str) -> Result<Vec<Record>, ParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::Headers)
            .from_reader(raw_text.as_bytes());

        let headers = reader.headers().map_err(csv_error)?.clone();
        let columns = Columns::locate(&headers)?;

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.map_err(csv_error)?;
            records.push(project(&row, &columns, index as u64 + 1)?);
        }

        tracing::debug!(rows = records.len(), "Normalized payload");
        Ok(records)
    }
}

/// Build one record from a data row. `row_number` is 1-based and excludes
/// the header.
fn project(row: &StringRecord, columns: &Columns, row_number: u64) -> Result<Record, ParseError> {
    let cell = |index: usize| row.get(index).unwrap_or_default();

    let raw_state = cell(columns.state);
    let partition_key = PartitionKey::new(raw_state).ok_or_else(|| {
        let state = raw_state.trim();
        if state.is_empty() {
            ParseError::EmptyPartitionKey { row: row_number }
        } else {
            ParseError::PartitionKeyTooLong {
                row: row_number,
                len: state.to_lowercase().len(),
                max: PartitionKey::MAX_LEN,
            }
        }
    })?;

    let raw_created = cell(columns.created_at);
    let timestamp = parse_timestamp(raw_created).ok_or_else(|| ParseError::InvalidTimestamp {
        row: row_number,
        value: raw_created.to_string(),
    })?;

    Ok(Record::new(
        partition_key,
        timestamp,
        parse_count(cell(columns.total_cases), TOTAL_CASES, row_number)?,
        parse_count(cell(columns.new_cases), NEW_CASES, row_number)?,
        parse_count(cell(columns.probable_new_cases), PROBABLE_NEW_CASES, row_number)?,
    ))
}

/// Parse a non-negative count. A blank cell counts as zero.
fn parse_count(raw: &str, column: &str, row: u64) -> Result<f64, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let invalid = || ParseError::InvalidNumber {
        row,
        column: column.to_string(),
        value: raw.to_string(),
    };

    let value: f64 = trimmed.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

/// Parse `created_at`. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

fn csv_error(e: csv::Error) -> ParseError {
    ParseError::Csv {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const HEADER: &str = "created_at,pnew_case,new_case,tot_cases,state\n";

    fn normalize(text: &str) -> Result<Vec<Record>, ParseError> {
        CsvNormalizer::new().normalize(text)
    }

    #[test]
    fn test_single_row() {
        let records = normalize(&format!("{HEADER}2021-01-01,5,50,1000,RI\n")).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.partition_key.as_str(), "ri");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(record.total_cases, 1000.0);
        assert_eq!(record.new_cases, 50.0);
        assert_eq!(record.probable_new_cases, 5.0);
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(normalize(HEADER).unwrap().is_empty());
    }

    #[test]
    fn test_extra_columns_and_order_ignored() {
        let text = "state, tot_cases ,conf_cases,new_case,pnew_case,created_at\n\
                    NY,2000,1900,40,,03/15/2021 12:00:00 AM\n";
        let records = normalize(text).unwrap();
        assert_eq!(records[0].partition_key.as_str(), "ny");
        assert_eq!(records[0].total_cases, 2000.0);
        assert_eq!(records[0].probable_new_cases, 0.0);
        assert_eq!(
            records[0].timestamp,
            Utc.with_ymd_and_hms(2021, 3, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_column() {
        let err = normalize("created_at,new_case,tot_cases,state\n2021-01-01,1,2,RI\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingColumn {
                column: "pnew_case".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_number_reports_row_and_column() {
        let text = format!("{HEADER}2021-01-01,5,50,1000,RI\n2021-01-02,5,lots,1000,RI\n");
        let err = normalize(&text).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumber {
                row: 2,
                column: "new_case".to_string(),
                value: "lots".to_string(),
            }
        );
    }

    #[test]
    fn test_negative_and_non_finite_counts_rejected() {
        for bad in ["-1", "NaN", "inf"] {
            let text = format!("{HEADER}2021-01-01,5,50,{bad},RI\n");
            assert!(
                matches!(normalize(&text), Err(ParseError::InvalidNumber { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_timestamp() {
        let err = normalize(&format!("{HEADER}yesterday,5,50,1000,RI\n")).unwrap_err();
        assert!(matches!(err, ParseError::InvalidTimestamp { row: 1, .. }));
    }

    #[test]
    fn test_empty_state() {
        let err = normalize(&format!("{HEADER}2021-01-01,5,50,1000,  \n")).unwrap_err();
        assert_eq!(err, ParseError::EmptyPartitionKey { row: 1 });
    }

    #[test]
    fn test_oversized_state_rejected() {
        let state = "X".repeat(600);
        let text = format!("{HEADER}2021-01-01,5,50,1000,RI\n2021-01-01,5,50,1000,{state}\n");
        let err = normalize(&text).unwrap_err();
        assert_eq!(
            err,
            ParseError::PartitionKeyTooLong {
                row: 2,
                len: 600,
                max: PartitionKey::MAX_LEN,
            }
        );
    }

    #[test]
    fn test_sub_millisecond_timestamps_kept_distinct() {
        let text = format!(
            "{HEADER}2021-01-01T00:00:00.0001,0,1,2,RI\n2021-01-01T00:00:00.0002,0,1,3,RI\n"
        );
        let records = normalize(&text).unwrap();
        assert_ne!(records[0].timestamp, records[1].timestamp);
        assert_eq!(records[1].timestamp - records[0].timestamp, chrono::Duration::microseconds(100));
    }

    #[test]
    fn test_ragged_row_is_csv_error() {
        let err = normalize(&format!("{HEADER}2021-01-01,5,50\n")).unwrap_err();
        assert!(matches!(err, ParseError::Csv { .. }));
    }

    #[test]
    fn test_timestamp_formats() {
        let midnight = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2021, 1, 1, 12, 30, 0).unwrap();

        assert_eq!(parse_timestamp("2021-01-01"), Some(midnight));
        assert_eq!(parse_timestamp("01/01/2021"), Some(midnight));
        assert_eq!(parse_timestamp("01/01/2021 12:00:00 AM"), Some(midnight));
        assert_eq!(parse_timestamp("01/01/2021 12:30:00 PM"), Some(noon));
        assert_eq!(parse_timestamp("2021-01-01 12:30:00"), Some(noon));
        assert_eq!(parse_timestamp("2021-01-01T12:30:00.000"), Some(noon));
        assert_eq!(parse_timestamp("2021-01-01T14:30:00+02:00"), Some(noon));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2021-13-01"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any spelling of a state lands in the lower-cased partition.
        #[test]
        fn prop_state_case_folded(state in "[A-Za-z]{2,4}") {
            let text = format!("{HEADER}2021-01-01,0,1,2,{state}\n");
            let records = normalize(&text).unwrap();
            prop_assert_eq!(records[0].partition_key.as_str(), state.to_lowercase());
        }

        /// Non-negative integer counts survive normalization unchanged.
        #[test]
        fn prop_counts_preserved(total in 0u32..10_000_000, new in 0u32..100_000, probable in 0u32..1_000) {
            let text = format!("{HEADER}2021-01-01,{probable},{new},{total},TX\n");
            let record = &normalize(&text).unwrap()[0];
            prop_assert_eq!(record.total_cases, total as f64);
            prop_assert_eq!(record.new_cases, new as f64);
            prop_assert_eq!(record.probable_new_cases, probable as f64);
        }
    }
}
