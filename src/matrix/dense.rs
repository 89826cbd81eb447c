//! Dense Parquet fallback
//!
//! Layout of the Arrow schema, in order:
//! - `entity_id` (Int64)
//! - `as_of_date` (Utf8, `YYYY-MM-DD`)
//! - one Float64 column per vocabulary term, in column-index order, named
//!   `t:<term>` so no term can shadow another column
//! - one Int32 column per issue area (`<area>_label`)
//!
//! Zeros are materialized, so this format is only practical for small
//! vocabularies.

use super::{RowKey, SparseMatrix, Vocabulary, DATE_FORMAT};
use crate::labels::{IssueArea, IssueLabels, LabelTable};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

const ENTITY_ID: &str = "entity_id";
const AS_OF_DATE: &str = "as_of_date";

const TERM_PREFIX: &str = "t:";

/// Encode a matrix and its labels as a Parquet file.
///
/// # Errors
/// Returns error if a row has no labels or the Parquet writer fails
pub fn encode_dense(matrix: &SparseMatrix, labels: &LabelTable) -> Result<Vec<u8>> {
    let terms = matrix.vocabulary().terms();

    let mut fields = Vec::with_capacity(terms.len() + IssueArea::ALL.len() + 2);
    fields.push(Field::new(ENTITY_ID, DataType::Int64, false));
    fields.push(Field::new(AS_OF_DATE, DataType::Utf8, false));
    fields.extend(
        terms
            .iter()
            .map(|t| Field::new(format!("{TERM_PREFIX}{t}"), DataType::Float64, false)),
    );
    fields.extend(
        IssueArea::ALL
            .iter()
            .map(|a| Field::new(a.label_column(), DataType::Int32, false)),
    );
    let schema = Arc::new(Schema::new(fields));

    let keys = matrix.row_keys();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    columns.push(Arc::new(Int64Array::from_iter_values(
        keys.iter().map(|k| k.entity_id),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        keys.iter().map(|k| k.as_of_date.format(DATE_FORMAT).to_string()),
    )));

    let mut dense_columns = vec![vec![0.0; matrix.n_rows()]; matrix.n_cols()];
    for (row, column, value) in matrix.iter_nonzero() {
        dense_columns[column][row] = value;
    }
    columns.extend(
        dense_columns
            .into_iter()
            .map(|values| Arc::new(Float64Array::from(values)) as ArrayRef),
    );

    for area in IssueArea::ALL {
        let column = labels.aligned_column(area, keys)?;
        columns.push(Arc::new(Int32Array::from_iter_values(
            column.into_iter().map(i32::from),
        )));
    }

    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let mut buffer = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Codec(format!("dense column '{name}' has the wrong type")))
}

/// Decode a dense Parquet matrix.
///
/// # Errors
/// Returns error if the file is not a dense matrix in the layout above
pub fn decode_dense(bytes: Vec<u8>) -> Result<(SparseMatrix, LabelTable)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build()?;

    let n_labels = IssueArea::ALL.len();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    if names.len() < 2 + n_labels || names[0] != ENTITY_ID || names[1] != AS_OF_DATE {
        return Err(Error::Codec(format!(
            "dense file does not start with {ENTITY_ID}, {AS_OF_DATE}"
        )));
    }
    let term_end = names.len() - n_labels;
    for (offset, area) in IssueArea::ALL.iter().enumerate() {
        if names[term_end + offset] != area.label_column() {
            return Err(Error::Codec(format!(
                "dense file is missing label column '{}'",
                area.label_column()
            )));
        }
    }
    let terms = names[2..term_end]
        .iter()
        .map(|name| {
            name.strip_prefix(TERM_PREFIX)
                .map(ToString::to_string)
                .ok_or_else(|| Error::Codec(format!("dense column '{name}' is not a term column")))
        })
        .collect::<Result<Vec<_>>>()?;
    let vocabulary = Vocabulary::from_terms(terms)?;

    let mut keys = Vec::new();
    let mut triplets = Vec::new();
    let mut label_rows = Vec::new();

    for batch in reader {
        let batch = batch?;
        let entity_ids = column::<Int64Array>(&batch, 0, ENTITY_ID)?;
        let dates = column::<StringArray>(&batch, 1, AS_OF_DATE)?;

        let term_columns = (2..term_end)
            .map(|i| column::<Float64Array>(&batch, i, names[i]))
            .collect::<Result<Vec<_>>>()?;
        let label_columns = (term_end..names.len())
            .map(|i| column::<Int32Array>(&batch, i, names[i]))
            .collect::<Result<Vec<_>>>()?;

        for i in 0..batch.num_rows() {
            let as_of_date = NaiveDate::parse_from_str(dates.value(i), DATE_FORMAT)
                .map_err(|e| Error::Codec(format!("dense as_of_date '{}': {e}", dates.value(i))))?;
            let key = RowKey::new(entity_ids.value(i), as_of_date);
            let row = keys.len();
            keys.push(key);

            for (col, values) in term_columns.iter().enumerate() {
                let value = values.value(i);
                if value != 0.0 {
                    triplets.push((row, col, value));
                }
            }

            let mut labels = IssueLabels::new();
            for (area, values) in IssueArea::ALL.iter().zip(&label_columns) {
                labels.set(*area, u8::from(values.value(i) != 0));
            }
            label_rows.push((key, labels));
        }
    }

    let matrix = SparseMatrix::from_triplets(keys, vocabulary, triplets)?;
    Ok((matrix, LabelTable::new(label_rows)))
}
