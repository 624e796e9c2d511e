use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Builder, Int64Builder, StringArray},
    record_batch::RecordBatch,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::{dataset_schema, COL_DISBURSEMENTS, COL_RESULT, COL_SECTOR, COL_VALUE, COL_YEAR};
use crate::classify::Classifier;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").expect("year pattern compiles"));

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// First standalone run of four digits: "2019", "FY2019", "2019.0" and "2019/20" all give 2019.
pub fn parse_year(raw: &str) -> Option<i64> {
    let cleaned = clean_str(raw);
    YEAR_RE
        .captures(cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Anything that is not a finite number is missing, never zero.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = clean_str(raw);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_text(raw: &str) -> Option<String> {
    let cleaned = clean_str(raw);
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn text_column(batch: &RecordBatch, idx: usize) -> Result<&StringArray> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| {
            format!(
                "raw column {} is {:?}, expected Utf8",
                batch.schema().field(idx).name(),
                batch.column(idx).data_type()
            )
        })
}

/// Convert the raw text columns into their final types and append the
/// human-impact flag.
pub fn convert_raw_batch(raw: &RecordBatch, classifier: &Classifier) -> Result<RecordBatch> {
    if raw.num_columns() != 5 {
        bail!("raw batch needs 5 columns, got {}", raw.num_columns());
    }

    let mut years = Int64Builder::with_capacity(raw.num_rows());
    for opt in text_column(raw, COL_YEAR)?.iter() {
        years.append_option(opt.and_then(parse_year));
    }

    let sectors: StringArray = text_column(raw, COL_SECTOR)?
        .iter()
        .map(|opt| opt.and_then(parse_text))
        .collect();
    let results: StringArray = text_column(raw, COL_RESULT)?
        .iter()
        .map(|opt| opt.and_then(parse_text))
        .collect();

    let mut numeric: Vec<ArrayRef> = Vec::with_capacity(2);
    for idx in [COL_VALUE, COL_DISBURSEMENTS] {
        let mut b = Float64Builder::with_capacity(raw.num_rows());
        for opt in text_column(raw, idx)?.iter() {
            b.append_option(opt.and_then(parse_number));
        }
        numeric.push(Arc::new(b.finish()) as ArrayRef);
    }

    let flags = classifier.annotate(&results);

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(years.finish()) as ArrayRef,
        Arc::new(sectors) as ArrayRef,
        Arc::new(results) as ArrayRef,
    ];
    columns.extend(numeric);
    columns.push(Arc::new(flags) as ArrayRef);

    RecordBatch::try_new(dataset_schema(), columns).context("assembling typed batch")
}
