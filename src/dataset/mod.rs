// src/dataset/mod.rs
pub mod convert;
pub mod load;

use anyhow::{bail, Context, Result};
use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
    },
    compute::filter_record_batch,
    datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use serde::Serialize;
use std::sync::Arc;

use crate::classify::Classifier;

pub use load::load_dataset;

pub const FISCAL_YEAR: &str = "fiscal_year";
pub const SECTOR_NAME: &str = "sector_name";
pub const RESULT_NAME: &str = "result_name";
pub const VALUE: &str = "value";
pub const DISBURSEMENTS: &str = "disbursements";
pub const IS_HUMAN_IMPACT: &str = "is_human_impact";

/// The five fields a source table must name in its header, in canonical order.
pub const SOURCE_FIELDS: [&str; 5] = [FISCAL_YEAR, SECTOR_NAME, RESULT_NAME, VALUE, DISBURSEMENTS];

pub(crate) const COL_YEAR: usize = 0;
pub(crate) const COL_SECTOR: usize = 1;
pub(crate) const COL_RESULT: usize = 2;
pub(crate) const COL_VALUE: usize = 3;
pub(crate) const COL_DISBURSEMENTS: usize = 4;
pub(crate) const COL_HUMAN: usize = 5;

/// Schema of the raw table handed over by the loaders: every source field as text.
pub fn raw_schema() -> SchemaRef {
    let fields: Vec<Field> = SOURCE_FIELDS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Schema of a typed, classified dataset.
pub fn dataset_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(FISCAL_YEAR, DataType::Int64, true),
        Field::new(SECTOR_NAME, DataType::Utf8, true),
        Field::new(RESULT_NAME, DataType::Utf8, true),
        Field::new(VALUE, DataType::Float64, true),
        Field::new(DISBURSEMENTS, DataType::Float64, true),
        Field::new(IS_HUMAN_IMPACT, DataType::Boolean, false),
    ]))
}

/// One row of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub fiscal_year: Option<i64>,
    pub sector_name: Option<String>,
    pub result_name: Option<String>,
    pub value: Option<f64>,
    pub disbursements: Option<f64>,
    pub is_human_impact: bool,
}

/// A row of the detail table: the source fields without the derived flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub fiscal_year: Option<i64>,
    pub sector_name: Option<String>,
    pub result_name: Option<String>,
    pub value: Option<f64>,
    pub disbursements: Option<f64>,
}

impl From<Record> for DetailRow {
    fn from(r: Record) -> Self {
        DetailRow {
            fiscal_year: r.fiscal_year,
            sector_name: r.sector_name,
            result_name: r.result_name,
            value: r.value,
            disbursements: r.disbursements,
        }
    }
}

/// Read-only, columnar set of classified records.
///
/// Every filter produces a new `Dataset`; the batch it was derived from is
/// never touched. Cloning is cheap since Arrow buffers are shared.
#[derive(Debug, Clone)]
pub struct Dataset {
    batch: RecordBatch,
}

impl Dataset {
    /// Wrap a batch that already carries the typed schema.
    pub fn try_new(batch: RecordBatch) -> Result<Self> {
        let expected = dataset_schema();
        let got = batch.schema();
        if got.fields().len() != expected.fields().len() {
            bail!(
                "dataset needs {} columns, batch has {}",
                expected.fields().len(),
                got.fields().len()
            );
        }
        for (want, have) in expected.fields().iter().zip(got.fields()) {
            if want.name() != have.name() || want.data_type() != have.data_type() {
                bail!(
                    "column mismatch: expected {}: {:?}, found {}: {:?}",
                    want.name(),
                    want.data_type(),
                    have.name(),
                    have.data_type()
                );
            }
        }
        if batch.column(COL_HUMAN).null_count() > 0 {
            bail!("{} must not contain nulls", IS_HUMAN_IMPACT);
        }
        Ok(Self { batch })
    }

    /// Coerce a raw text batch (see [`raw_schema`]) and classify every row.
    pub fn from_raw(raw: &RecordBatch, classifier: &Classifier) -> Result<Self> {
        let typed = convert::convert_raw_batch(raw, classifier)?;
        Self::try_new(typed)
    }

    /// Build from rows of raw cells in `SOURCE_FIELDS` order.
    pub fn from_raw_rows<'a, I>(rows: I, classifier: &Classifier) -> Result<Self>
    where
        I: IntoIterator<Item = [Option<&'a str>; 5]>,
    {
        let mut columns: [Vec<Option<&'a str>>; 5] = Default::default();
        for row in rows {
            for (col, cell) in columns.iter_mut().zip(row) {
                col.push(cell);
            }
        }
        let arrays: Vec<ArrayRef> = columns
            .into_iter()
            .map(|c| Arc::new(StringArray::from(c)) as ArrayRef)
            .collect();
        let raw = RecordBatch::try_new(raw_schema(), arrays).context("building raw batch")?;
        Self::from_raw(&raw, classifier)
    }

    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(dataset_schema()),
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn fiscal_years(&self) -> &Int64Array {
        self.batch.column(COL_YEAR).as_primitive::<Int64Type>()
    }

    pub fn sector_names(&self) -> &StringArray {
        self.batch.column(COL_SECTOR).as_string::<i32>()
    }

    pub fn result_names(&self) -> &StringArray {
        self.batch.column(COL_RESULT).as_string::<i32>()
    }

    pub fn values(&self) -> &Float64Array {
        self.batch.column(COL_VALUE).as_primitive::<Float64Type>()
    }

    pub fn disbursements(&self) -> &Float64Array {
        self.batch.column(COL_DISBURSEMENTS).as_primitive::<Float64Type>()
    }

    pub fn human_impact(&self) -> &BooleanArray {
        self.batch.column(COL_HUMAN).as_boolean()
    }

    pub fn record(&self, row: usize) -> Record {
        let years = self.fiscal_years();
        let values = self.values();
        let disb = self.disbursements();
        Record {
            fiscal_year: years.is_valid(row).then(|| years.value(row)),
            sector_name: text_at(self.sector_names(), row),
            result_name: text_at(self.result_names(), row),
            value: values.is_valid(row).then(|| values.value(row)),
            disbursements: disb.is_valid(row).then(|| disb.value(row)),
            is_human_impact: self.human_impact().value(row),
        }
    }

    /// Rows in input order.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.num_rows()).map(move |i| self.record(i))
    }

    pub fn detail_rows(&self) -> Vec<DetailRow> {
        self.records().map(DetailRow::from).collect()
    }

    /// Keep the rows where `mask` is true; null mask entries drop the row.
    pub fn retain(&self, mask: &BooleanArray) -> Result<Dataset> {
        let batch = filter_record_batch(&self.batch, mask).context("filtering dataset")?;
        Ok(Dataset { batch })
    }

    /// The five source columns, for the detail-table exporters.
    pub fn detail_batch(&self) -> Result<RecordBatch> {
        self.batch
            .project(&[COL_YEAR, COL_SECTOR, COL_RESULT, COL_VALUE, COL_DISBURSEMENTS])
            .context("projecting detail columns")
    }
}

pub(crate) fn text_at(arr: &StringArray, row: usize) -> Option<String> {
    arr.is_valid(row).then(|| arr.value(row).to_string())
}
