// src/export.rs
use anyhow::{Context, Result};
use arrow::csv::WriterBuilder;
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::dataset::Dataset;

/// Output format of the detail table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// Guess from the file extension, defaulting to CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => TableFormat::Parquet,
            _ => TableFormat::Csv,
        }
    }
}

fn tmp_path_for(out_path: &Path) -> PathBuf {
    let name = out_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    out_path.with_file_name(format!(".{}.tmp", name))
}

/// Write to a temporary sibling first, then move it over `out_path`.
fn write_atomically<F>(out_path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let temp_path = tmp_path_for(out_path);
    let file = File::create(&temp_path)
        .with_context(|| format!("creating {}", temp_path.display()))?;
    if let Err(e) = write(file) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, out_path).with_context(|| {
        format!(
            "renaming {} -> {}",
            temp_path.display(),
            out_path.display()
        )
    })
}

/// Detail table (five source columns, input order) as CSV with a header row.
pub fn write_table_csv(dataset: &Dataset, out_path: &Path) -> Result<()> {
    let batch = dataset.detail_batch()?;
    write_atomically(out_path, |file| {
        let mut writer = WriterBuilder::new()
            .with_header(true)
            .build(BufWriter::new(file));
        writer.write(&batch).context("writing CSV rows")?;
        let mut inner = writer.into_inner();
        inner.flush()?;
        Ok(())
    })?;
    info!(rows = batch.num_rows(), path = %out_path.display(), "wrote CSV table");
    Ok(())
}

/// Detail table as a Snappy-compressed Parquet file.
pub fn write_table_parquet(dataset: &Dataset, out_path: &Path) -> Result<()> {
    let batch = dataset.detail_batch()?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_dictionary_enabled(true)
        .build();
    write_atomically(out_path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .context("opening Parquet writer")?;
        writer.write(&batch).context("writing Parquet rows")?;
        writer.close().context("closing Parquet writer")?;
        Ok(())
    })?;
    info!(rows = batch.num_rows(), path = %out_path.display(), "wrote Parquet table");
    Ok(())
}

pub fn write_table(dataset: &Dataset, out_path: &Path, format: TableFormat) -> Result<()> {
    match format {
        TableFormat::Csv => write_table_csv(dataset, out_path),
        TableFormat::Parquet => write_table_parquet(dataset, out_path),
    }
}

/// Pretty JSON with a trailing newline, to `out_path` or stdout.
pub fn write_json<T: Serialize>(value: &T, out_path: Option<&Path>) -> Result<()> {
    match out_path {
        Some(path) => {
            write_atomically(path, |file| {
                let mut w = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut w, value).context("serializing JSON")?;
                w.write_all(b"\n")?;
                w.flush()?;
                Ok(())
            })?;
            info!(path = %path.display(), "wrote JSON");
        }
        None => {
            let stdout = io::stdout();
            let mut w = stdout.lock();
            serde_json::to_writer_pretty(&mut w, value).context("serializing JSON")?;
            w.write_all(b"\n")?;
        }
    }
    Ok(())
}
