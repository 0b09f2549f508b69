//! Parquet shard codec
//!
//! A shard holds one contiguous slice of a cruise: an Int32 `label` column
//! (0 = bad, 1 = good) followed by Float64 feature columns `f0..f{W-1}`.

use crate::inventory::{Cruise, ShardLocator};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use ndarray::{s, Array2, ArrayView2};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Name of the label column
pub const LABEL_COLUMN: &str = "label";

/// Features and labels of one shard
#[derive(Debug, Clone, PartialEq)]
pub struct ShardData {
    /// `rows x width` feature matrix
    pub features: Array2<f64>,
    /// 0/1 label per row
    pub labels: Vec<i32>,
}

/// Shard schema for `width` feature columns.
#[must_use]
pub fn shard_schema(width: usize) -> SchemaRef {
    let mut fields = Vec::with_capacity(width + 1);
    fields.push(Field::new(LABEL_COLUMN, DataType::Int32, false));
    fields.extend((0..width).map(|i| Field::new(format!("f{i}"), DataType::Float64, false)));
    Arc::new(Schema::new(fields))
}

fn open(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).map_err(|e| {
        Error::StorageError(format!("Failed to open shard {}: {e}", path.display()))
    })?;
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        Error::StorageError(format!("Failed to parse shard {}: {e}", path.display()))
    })
}

/// Check a shard's schema and return `(rows, feature_width)` from metadata.
fn shape_of(
    path: &Path,
    builder: &ParquetRecordBatchReaderBuilder<File>,
) -> Result<(usize, usize)> {
    let schema = builder.schema();
    let fields = schema.fields();
    let Some(label) = fields.first() else {
        return Err(Error::StorageError(format!("Shard {} has no columns", path.display())));
    };
    if label.name() != LABEL_COLUMN || label.data_type() != &DataType::Int32 {
        return Err(Error::StorageError(format!(
            "Shard {}: first column must be Int32 `{LABEL_COLUMN}`, got `{}` {:?}",
            path.display(),
            label.name(),
            label.data_type()
        )));
    }
    if let Some(bad) = fields.iter().skip(1).find(|f| f.data_type() != &DataType::Float64) {
        return Err(Error::StorageError(format!(
            "Shard {}: feature column `{}` is {:?}, expected Float64",
            path.display(),
            bad.name(),
            bad.data_type()
        )));
    }
    let rows = usize::try_from(builder.metadata().file_metadata().num_rows())
        .map_err(|_| {
            Error::StorageError(format!("Shard {} reports negative rows", path.display()))
        })?;
    Ok((rows, fields.len() - 1))
}

/// `(rows, feature_width)` of a shard, read from the Parquet footer only.
///
/// # Errors
/// Returns error if the file is missing, unparsable or not a shard.
pub fn shard_shape<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let path = path.as_ref();
    shape_of(path, &open(path)?)
}

fn copy_batch(batch: &RecordBatch, dest: &mut [f64], cols: usize) -> Result<()> {
    let rows = batch.num_rows();
    let labels = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| Error::StorageError("label column is not Int32".to_string()))?;
    for (r, label) in labels.values().iter().enumerate() {
        dest[r * cols] = f64::from(*label);
    }
    for c in 1..cols {
        let values = batch
            .column(c)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| {
                Error::StorageError(format!("feature column {} is not Float64", c - 1))
            })?;
        for (r, v) in values.values().iter().enumerate().take(rows) {
            dest[r * cols + c] = *v;
        }
    }
    Ok(())
}

/// Stream a shard into `dest`, a row-major `rows x (width + 1)` block with
/// the label in column 0.
///
/// The footer is checked first; on a shape mismatch nothing is written.
///
/// # Errors
/// [`Error::ShardReadMismatch`] when rows or width differ from the
/// expectation, otherwise the underlying storage error.
pub fn read_shard_into(
    path: &Path,
    index: usize,
    expected_rows: u64,
    width: usize,
    dest: &mut [f64],
) -> Result<()> {
    let builder = open(path)?;
    let (rows, observed_width) = shape_of(path, &builder)?;
    let cols = width + 1;
    if rows as u64 != expected_rows || observed_width != width || dest.len() != rows * cols {
        return Err(Error::ShardReadMismatch {
            path: path.to_path_buf(),
            index,
            expected: expected_rows,
            observed_rows: rows,
            observed_width,
        });
    }

    let reader = builder.build()?;
    let mut offset = 0;
    for batch in reader {
        let batch = batch?;
        let n = batch.num_rows();
        if offset + n > rows {
            return Err(Error::StorageError(format!(
                "Shard {} yielded more rows than its footer declares",
                path.display()
            )));
        }
        copy_batch(&batch, &mut dest[offset * cols..(offset + n) * cols], cols)?;
        offset += n;
    }
    if offset != rows {
        return Err(Error::StorageError(format!(
            "Shard {} ended after {offset} of {rows} rows",
            path.display()
        )));
    }
    Ok(())
}

/// Read a whole shard.
///
/// # Errors
/// Returns error if the shard is missing or malformed.
pub fn read_shard<P: AsRef<Path>>(path: P) -> Result<ShardData> {
    let path = path.as_ref();
    let (rows, width) = shard_shape(path)?;
    let mut block = Array2::<f64>::zeros((rows, width + 1));
    let dest = block
        .as_slice_mut()
        .ok_or_else(|| Error::StorageError("non-contiguous shard buffer".to_string()))?;
    read_shard_into(path, 0, rows as u64, width, dest)?;

    #[allow(clippy::cast_possible_truncation)]
    let labels = block.column(0).iter().map(|&v| v as i32).collect();
    Ok(ShardData {
        features: block.slice(s![.., 1..]).to_owned(),
        labels,
    })
}

/// Write a record batch to a fresh Parquet file.
///
/// # Errors
/// Returns error if the file cannot be created or written.
pub fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Write one shard.
///
/// # Errors
/// Returns error if rows of `features` and `labels` differ or the write fails.
pub fn write_shard(path: &Path, features: ArrayView2<'_, f64>, labels: &[i32]) -> Result<()> {
    if features.nrows() != labels.len() {
        return Err(Error::StorageError(format!(
            "Shard {}: {} feature rows but {} labels",
            path.display(),
            features.nrows(),
            labels.len()
        )));
    }
    let width = features.ncols();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(width + 1);
    columns.push(Arc::new(Int32Array::from(labels.to_vec())));
    for c in 0..width {
        columns.push(Arc::new(Float64Array::from_iter_values(
            features.column(c).iter().copied(),
        )));
    }
    let batch = RecordBatch::try_new(shard_schema(width), columns)?;
    write_batch(path, &batch)
}

/// Split a cruise's records into `chunk_size` shards under the locator's
/// naming scheme and return the matching manifest entry.
///
/// # Errors
/// Returns error if any shard write fails.
pub fn write_cruise_shards(
    locator: &ShardLocator,
    region: &str,
    cruise: &str,
    features: ArrayView2<'_, f64>,
    labels: &[i32],
) -> Result<Cruise> {
    let chunk = usize::try_from(locator.chunk_size())
        .map_err(|_| Error::Config("chunk_size exceeds address space".to_string()))?;
    if chunk == 0 {
        return Err(Error::Config("chunk_size must be positive".to_string()));
    }
    let total = labels.len();
    let mut parts = 0u64;
    for start in (0..total).step_by(chunk) {
        let end = (start + chunk).min(total);
        let path = locator.shard_path(region, cruise, parts);
        write_shard(&path, features.slice(s![start..end, ..]), &labels[start..end])?;
        parts += 1;
    }
    let bad = labels.iter().filter(|&&l| l == 0).count() as u64;
    tracing::debug!(region, cruise, total, parts, "cruise shards written");
    Ok(Cruise::new(region, cruise, total as u64, bad, parts))
}
