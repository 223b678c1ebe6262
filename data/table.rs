//! # Tabular Input Layer
//!
//! Every file the harness consumes is a tab-separated table produced by the
//! preprocessing collaborators. This module is the single place those files are
//! opened and converted into plain Rust values.
//!
//! - Explicit missingness: empty fields and the literal `NA` are read as nulls.
//!   Nulls are surfaced to callers as `None` (or `NaN` in feature matrices); no
//!   column is ever silently zero-filled.
//! - Strict types: a column that is expected to be numeric but contains text is
//!   rejected with `DataError::ColumnWrongType` instead of being coerced.

use polars::prelude::*;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Error reading tab-separated input: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Could not open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing values were found in the identifier column '{0}'.")]
    MissingValuesFound(String),
    #[error("Sample '{0}' appears more than once in '{1}'.")]
    DuplicateSample(String, String),
    #[error("The table '{0}' has no data rows or no feature columns.")]
    EmptyTable(PathBuf),
    #[error("Feature matrix shape mismatch: {rows} sample ids for {values} values across {columns} columns.")]
    ShapeMismatch {
        rows: usize,
        columns: usize,
        values: usize,
    },
    #[error("Modality '{modality}' has no compressed representation (requested {n_dims} dimensions).")]
    NoCompressedRepresentation { modality: String, n_dims: usize },
    #[error("Unrecognized gene classification '{value}' for gene '{gene}'.")]
    UnknownGeneClass { gene: String, value: String },
    #[error("Unknown alteration type '{0}'. Expected one of: mutation, copy_gain, copy_loss.")]
    UnknownAlterationType(String),
    #[error("The alteration list '{0}' names no alteration types.")]
    EmptyAlterationSet(String),
}

impl DataError {
    /// Whether the failure comes from how the run was configured rather than from
    /// the content of an otherwise readable file.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoCompressedRepresentation { .. }
                | Self::EmptyTable(_)
                | Self::UnknownAlterationType(_)
                | Self::EmptyAlterationSet(_)
        )
    }
}

/// Reads a whole tab-separated table. The schema is inferred from every row so
/// that a late float in an integer-looking column cannot abort the read.
pub fn read_tsv(path: &Path) -> Result<DataFrame, DataError> {
    let file = File::open(path).map_err(|source| DataError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(b'\t')
                        .with_null_values(Some(NullValues::AllColumns(vec!["NA".into()]))),
                ),
        )
        .finish()?;

    log::debug!(
        "Read '{}' ({} rows x {} columns)",
        path.display(),
        df.height(),
        df.width()
    );
    Ok(df)
}

/// Column names in file order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Fails with `ColumnNotFound` for the first required column the table lacks.
pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), DataError> {
    let present = column_names(df);
    for name in required {
        if !present.iter().any(|c| c == name) {
            return Err(DataError::ColumnNotFound((*name).to_string()));
        }
    }
    Ok(())
}

/// Extracts an identifier-like column as strings. Nulls are not allowed.
pub fn string_values(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let column = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    if column.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = column.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect();
    Ok(values)
}

/// Extracts a nullable text column.
pub fn optional_string_values(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<String>>, DataError> {
    let column = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    let casted = column.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|value| value.filter(|v| !v.is_empty()).map(str::to_string))
        .collect();
    Ok(values)
}

/// Extracts a numeric column, keeping nulls as `None`.
pub fn numeric_values(df: &DataFrame, column_name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let column = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", column.dtype()),
    };

    let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    // A non-strict cast turns unparsable text into nulls; more nulls after the
    // cast than before means the column held non-numeric data.
    if casted.null_count() > column.null_count() {
        return Err(wrong_type());
    }

    let values = casted.f64()?.into_iter().collect();
    Ok(values)
}
