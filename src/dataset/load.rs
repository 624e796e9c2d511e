// src/dataset/load.rs
use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::ArrayRef,
    compute::{cast, concat_batches},
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{
    fs::{self, File},
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{convert::clean_str, raw_schema, Dataset, SOURCE_FIELDS};
use crate::classify::Classifier;

const BATCH_SIZE: usize = 64 * 1024;

/// How a data source string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Zip,
    Parquet,
    Glob,
}

impl SourceKind {
    /// A path that exists on disk is never a pattern, even if it holds glob characters.
    pub fn detect(source: &str) -> Self {
        if source.contains(['*', '?', '[']) && !Path::new(source).exists() {
            return SourceKind::Glob;
        }
        let ext = Path::new(source)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("zip") => SourceKind::Zip,
            Some("parquet") | Some("pq") => SourceKind::Parquet,
            _ => SourceKind::Csv,
        }
    }
}

/// Load, coerce and classify a dataset from `source`.
#[tracing::instrument(level = "info", skip(classifier))]
pub fn load_dataset(source: &str, classifier: &Classifier) -> Result<Dataset> {
    let raw = read_raw(source)?;
    let dataset = Dataset::from_raw(&raw, classifier)
        .with_context(|| format!("converting rows from {}", source))?;
    let human = dataset
        .human_impact()
        .iter()
        .filter(|f| *f == Some(true))
        .count();
    info!(rows = dataset.num_rows(), human_impact = human, "dataset loaded");
    Ok(dataset)
}

/// Read `source` into a raw text batch with the [`raw_schema`] layout.
pub fn read_raw(source: &str) -> Result<RecordBatch> {
    match SourceKind::detect(source) {
        SourceKind::Csv => read_csv_file(source),
        SourceKind::Zip => read_zip(source),
        SourceKind::Parquet => read_parquet(source),
        SourceKind::Glob => read_glob(source),
    }
}

pub fn read_csv_file<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    read_csv_bytes(&path.display().to_string(), data)
}

/// Find each of the five source fields in `headers`, in canonical order.
///
/// Header names are compared after trimming and lowercasing; the first
/// matching column wins and extra columns are ignored.
fn locate_source_fields(headers: &[String]) -> Result<Vec<usize>> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| clean_str(h).to_ascii_lowercase())
        .collect();
    let mut missing = Vec::new();
    let mut projection = Vec::with_capacity(SOURCE_FIELDS.len());
    for field in SOURCE_FIELDS {
        match normalized.iter().position(|h| h == field) {
            Some(idx) => projection.push(idx),
            None => missing.push(field),
        }
    }
    if !missing.is_empty() {
        bail!(
            "missing required column(s) {} (found: {})",
            missing.join(", "),
            headers.join(", ")
        );
    }
    Ok(projection)
}

/// Parse an in-memory CSV table whose first row names the columns.
pub fn read_csv_bytes(name: &str, data: Vec<u8>) -> Result<RecordBatch> {
    let format = Format::default().with_header(true);
    let (inferred, _) = format
        .infer_schema(Cursor::new(&data), Some(0))
        .with_context(|| format!("reading header of {}", name))?;
    let headers: Vec<String> = inferred.fields().iter().map(|f| f.name().clone()).collect();
    let projection = locate_source_fields(&headers).with_context(|| name.to_string())?;

    // every column as text; typing happens in convert
    let read_schema = Arc::new(Schema::new(
        headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<Field>>(),
    ));

    let reader = ReaderBuilder::new(read_schema)
        .with_format(format)
        .with_batch_size(BATCH_SIZE)
        .with_projection(projection)
        .build(Cursor::new(data))
        .with_context(|| format!("creating CSV reader for {}", name))?;

    let mut batches = Vec::new();
    for (idx, batch) in reader.enumerate() {
        let batch = batch.with_context(|| format!("CSV parse error in {} (batch {})", name, idx))?;
        batches.push(relabel(&batch)?);
    }
    let out = concat_batches(&raw_schema(), &batches).context("concatenating CSV batches")?;
    debug!(name, rows = out.num_rows(), "parsed CSV");
    Ok(out)
}

/// Re-attach the canonical field names to a projected batch.
fn relabel(batch: &RecordBatch) -> Result<RecordBatch> {
    RecordBatch::try_new(raw_schema(), batch.columns().to_vec()).context("relabelling columns")
}

/// Every `.csv` entry of the archive, in archive order, concatenated.
pub fn read_zip<P: AsRef<Path>>(zip_path: P) -> Result<RecordBatch> {
    let zip_path = zip_path.as_ref();
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    let mut buffers: Vec<(String, Vec<u8>)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to access ZIP entry #{} in {:?}", i, zip_path))?;
        let name = entry.name().to_string();
        if entry.is_file() && name.to_lowercase().ends_with(".csv") {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut buf)
                .with_context(|| format!("Failed to read {} into memory", name))?;
            if buf.iter().all(u8::is_ascii_whitespace) {
                warn!(entry = %name, "skipping empty CSV entry");
                continue;
            }
            buffers.push((name, buf));
        }
    }
    drop(archive);

    if buffers.is_empty() {
        bail!("no CSV entries in {}", zip_path.display());
    }

    let mut batches = Vec::with_capacity(buffers.len());
    for (name, data) in buffers {
        batches.push(read_csv_bytes(&name, data)?);
    }
    concat_batches(&raw_schema(), &batches).context("concatenating ZIP entries")
}

/// Expand a glob pattern and concatenate the matches in sorted path order.
pub fn read_glob(pattern: &str) -> Result<RecordBatch> {
    let mut paths: Vec<PathBuf> = glob(pattern)
        .with_context(|| format!("invalid glob pattern {}", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("unreadable glob match: {}", e);
                None
            }
        })
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("no files match {}", pattern);
    }

    let mut batches = Vec::with_capacity(paths.len());
    for path in &paths {
        let source = path.to_string_lossy();
        let batch = match SourceKind::detect(&source) {
            SourceKind::Zip => read_zip(path)?,
            SourceKind::Parquet => read_parquet(path)?,
            _ => read_csv_file(path)?,
        };
        debug!(path = %path.display(), rows = batch.num_rows(), "read glob match");
        batches.push(batch);
    }
    info!(files = paths.len(), "read all glob matches");
    concat_batches(&raw_schema(), &batches).context("concatenating glob matches")
}

/// Read a Parquet table holding the five source fields in any physical type.
pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading Parquet metadata of {}", path.display()))?
        .with_batch_size(BATCH_SIZE)
        .build()
        .with_context(|| format!("building Parquet reader for {}", path.display()))?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("decoding {}", path.display()))?;
        batches.push(parquet_batch_to_raw(&batch)?);
    }
    concat_batches(&raw_schema(), &batches).context("concatenating Parquet batches")
}

fn parquet_batch_to_raw(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let headers: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let projection = locate_source_fields(&headers)?;
    let columns = projection
        .into_iter()
        .map(|idx| {
            cast(batch.column(idx), &DataType::Utf8)
                .map_err(|e| anyhow!("casting {} to text: {}", headers[idx], e))
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(raw_schema(), columns).context("assembling raw batch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DetailRow, Record};
    use parquet::arrow::ArrowWriter;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};
    use zip::write::FileOptions;
    use zip::CompressionMethod;

    const SAMPLE: &str = "\
fiscal_year,sector_name,result_name,value,disbursements,operating_unit
2019,Health,Number of patients treated,120,5000,Rwanda
2019,Education,Classrooms built,4,bad,Rwanda
2020,Health,Number of people trained,,250.5,Rwanda
";

    #[test]
    fn test_detect_kind() {
        assert_eq!(SourceKind::detect("d2r.csv"), SourceKind::Csv);
        assert_eq!(SourceKind::detect("d2r.ZIP"), SourceKind::Zip);
        assert_eq!(SourceKind::detect("out/d2r.parquet"), SourceKind::Parquet);
        assert_eq!(SourceKind::detect("data/*.csv"), SourceKind::Glob);
        assert_eq!(SourceKind::detect("no_extension"), SourceKind::Csv);
    }

    #[test]
    fn test_existing_file_with_bracket_name() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("d2r[2020].csv");
        fs::write(&path, SAMPLE)?;
        let source = path.to_string_lossy().to_string();
        assert_eq!(SourceKind::detect(&source), SourceKind::Csv);

        let ds = load_dataset(&source, &Classifier::default())?;
        assert_eq!(ds.num_rows(), 3);

        // the same name without a file behind it is still a pattern
        let missing = dir.path().join("d2r[2021].csv");
        assert_eq!(SourceKind::detect(&missing.to_string_lossy()), SourceKind::Glob);
        Ok(())
    }

    #[test]
    fn test_csv_extra_columns_and_order() -> Result<()> {
        let data = "\
Disbursements, Result_Name ,SECTOR_NAME,value,fiscal_year
10,Farmers trained,Agriculture,3,2018
";
        let raw = read_csv_bytes("reordered", data.as_bytes().to_vec())?;
        let ds = Dataset::from_raw(&raw, &Classifier::default())?;
        assert_eq!(
            ds.record(0),
            Record {
                fiscal_year: Some(2018),
                sector_name: Some("Agriculture".into()),
                result_name: Some("Farmers trained".into()),
                value: Some(3.0),
                disbursements: Some(10.0),
                is_human_impact: true,
            }
        );
        Ok(())
    }

    #[test]
    fn test_csv_missing_column_is_an_error() {
        let data = "fiscal_year,sector_name,value\n2019,Health,1\n";
        let err = read_csv_bytes("short", data.as_bytes().to_vec()).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("result_name"), "{msg}");
        assert!(msg.contains("disbursements"), "{msg}");
    }

    #[test]
    fn test_load_csv_file() -> Result<()> {
        let mut tmp = NamedTempFile::with_suffix(".csv")?;
        tmp.write_all(SAMPLE.as_bytes())?;
        let source = tmp.path().to_string_lossy().to_string();

        let ds = load_dataset(&source, &Classifier::default())?;
        assert_eq!(ds.num_rows(), 3);
        let rows = ds.detail_rows();
        assert_eq!(
            rows[1],
            DetailRow {
                fiscal_year: Some(2019),
                sector_name: Some("Education".into()),
                result_name: Some("Classrooms built".into()),
                value: Some(4.0),
                disbursements: None,
            }
        );
        assert_eq!(rows[2].value, None);
        assert_eq!(rows[2].disbursements, Some(250.5));
        let flags: Vec<bool> = ds.records().map(|r| r.is_human_impact).collect();
        assert_eq!(flags, vec![true, false, true]);
        Ok(())
    }

    #[test]
    fn test_load_zip() -> Result<()> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: FileOptions<'_, ()> =
                FileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file("part1.csv", options)?;
            zip.write_all(SAMPLE.as_bytes())?;
            zip.start_file("README.txt", options)?;
            zip.write_all(b"not data")?;
            zip.start_file("empty.csv", options)?;
            zip.write_all(b"\n")?;
            zip.start_file("part2.csv", options)?;
            zip.write_all(
                b"fiscal_year,sector_name,result_name,value,disbursements\n2021,Water,Households served,7,70\n",
            )?;
            zip.finish()?;
        }
        let mut tmp = NamedTempFile::with_suffix(".zip")?;
        tmp.write_all(&buf)?;

        let ds = load_dataset(&tmp.path().to_string_lossy(), &Classifier::default())?;
        assert_eq!(ds.num_rows(), 4);
        assert_eq!(ds.record(3).fiscal_year, Some(2021));
        assert_eq!(ds.record(3).sector_name.as_deref(), Some("Water"));
        Ok(())
    }

    #[test]
    fn test_load_glob_sorted() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("b_2020.csv"),
            "fiscal_year,sector_name,result_name,value,disbursements\n2020,B,x,2,2\n",
        )?;
        fs::write(
            dir.path().join("a_2019.csv"),
            "fiscal_year,sector_name,result_name,value,disbursements\n2019,A,y,1,1\n",
        )?;
        let pattern = format!("{}/*.csv", dir.path().display());
        let ds = load_dataset(&pattern, &Classifier::default())?;
        let sectors: Vec<Option<String>> = ds.records().map(|r| r.sector_name).collect();
        assert_eq!(sectors, vec![Some("A".into()), Some("B".into())]);

        let empty = format!("{}/*.tsv", dir.path().display());
        assert!(load_dataset(&empty, &Classifier::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_load_parquet_numeric_columns() -> Result<()> {
        use arrow::array::{Float64Array, Int64Array, StringArray};

        let schema = Arc::new(Schema::new(vec![
            Field::new("fiscal_year", DataType::Int64, true),
            Field::new("sector_name", DataType::Utf8, true),
            Field::new("result_name", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("disbursements", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![Some(2019), None])),
                Arc::new(StringArray::from(vec!["Health", "Health"])),
                Arc::new(StringArray::from(vec!["Children vaccinated", "Clinics"])),
                Arc::new(Float64Array::from(vec![Some(9.5), None])),
                Arc::new(Float64Array::from(vec![Some(100.0), Some(3.0)])),
            ],
        )?;

        let dir = tempdir()?;
        let path = dir.path().join("d2r.parquet");
        let mut writer = ArrowWriter::try_new(File::create(&path)?, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        let ds = load_dataset(&path.to_string_lossy(), &Classifier::default())?;
        assert_eq!(ds.num_rows(), 2);
        assert_eq!(ds.record(0).fiscal_year, Some(2019));
        assert_eq!(ds.record(0).value, Some(9.5));
        assert!(ds.record(0).is_human_impact);
        assert_eq!(ds.record(1).fiscal_year, None);
        assert_eq!(ds.record(1).value, None);
        assert_eq!(ds.record(1).disbursements, Some(3.0));
        Ok(())
    }
}
