use super::table::{self, DataError};
use ahash::{AHashMap, AHashSet};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, ShapeBuilder};
use std::path::Path;

/// A samples × features matrix for one data modality.
///
/// Rows are addressed by sample identifier, which is the join key across
/// modalities. Missing values are stored as `NaN` until
/// [`FeatureMatrix::drop_incomplete_samples`] removes every row carrying one.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    sample_ids: Vec<String>,
    feature_names: Vec<String>,
    values: Array2<f64>,
    index: AHashMap<String, usize>,
}

impl FeatureMatrix {
    pub fn new(
        sample_ids: Vec<String>,
        feature_names: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, DataError> {
        if values.nrows() != sample_ids.len() || values.ncols() != feature_names.len() {
            return Err(DataError::ShapeMismatch {
                rows: sample_ids.len(),
                columns: feature_names.len(),
                values: values.len(),
            });
        }

        let mut index = AHashMap::with_capacity(sample_ids.len());
        for (row, id) in sample_ids.iter().enumerate() {
            if index.insert(id.clone(), row).is_some() {
                return Err(DataError::DuplicateSample(
                    id.clone(),
                    "feature matrix".to_string(),
                ));
            }
        }

        Ok(Self {
            sample_ids,
            feature_names,
            values,
            index,
        })
    }

    /// Loads a matrix whose first column holds sample identifiers and whose
    /// remaining columns are numeric features.
    pub fn from_tsv(path: &Path) -> Result<Self, DataError> {
        let df = table::read_tsv(path)?;
        let names = table::column_names(&df);
        if df.height() == 0 || names.len() < 2 {
            return Err(DataError::EmptyTable(path.to_path_buf()));
        }

        let sample_ids = table::string_values(&df, &names[0])?;
        let feature_names = names[1..].to_vec();
        let n_samples = sample_ids.len();

        // Columns are appended one after another, so the buffer is column-major.
        let mut buffer = Vec::with_capacity(n_samples * feature_names.len());
        for name in &feature_names {
            let column = table::numeric_values(&df, name)?;
            buffer.extend(column.into_iter().map(|v| v.unwrap_or(f64::NAN)));
        }

        let values = Array2::from_shape_vec((n_samples, feature_names.len()).f(), buffer)
            .map_err(|_| DataError::ShapeMismatch {
                rows: n_samples,
                columns: feature_names.len(),
                values: n_samples * feature_names.len(),
            })?;

        log::info!(
            "Loaded feature matrix '{}': {} samples x {} features",
            path.display(),
            n_samples,
            feature_names.len()
        );
        Self::new(sample_ids, feature_names, values)
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn contains(&self, sample_id: &str) -> bool {
        self.index.contains_key(sample_id)
    }

    pub fn row_of(&self, sample_id: &str) -> Option<usize> {
        self.index.get(sample_id).copied()
    }

    pub fn row(&self, sample_id: &str) -> Option<ArrayView1<'_, f64>> {
        self.row_of(sample_id).map(|row| self.values.row(row))
    }

    /// Copies the given rows, in order, into a new standard-layout matrix.
    pub fn select_rows(&self, rows: &[usize]) -> Array2<f64> {
        self.values.select(Axis(0), rows)
    }

    /// Removes every sample with a missing or non-finite value. Returns the
    /// complete matrix and the identifiers that were dropped.
    pub fn drop_incomplete_samples(self) -> Result<(Self, Vec<String>), DataError> {
        let complete: Vec<usize> = self
            .values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
            .map(|(i, _)| i)
            .collect();

        if complete.len() == self.n_samples() {
            return Ok((self, Vec::new()));
        }

        let keep: AHashSet<usize> = complete.iter().copied().collect();
        let dropped: Vec<String> = self
            .sample_ids
            .iter()
            .enumerate()
            .filter(|(i, _)| !keep.contains(i))
            .map(|(_, id)| id.clone())
            .collect();

        log::warn!(
            "Dropping {} samples with missing feature values",
            dropped.len()
        );

        let ids = complete.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let values = self.values.select(Axis(0), &complete);
        let matrix = Self::new(ids, self.feature_names, values)?;
        Ok((matrix, dropped))
    }

    /// Keeps only the samples present in `allowed`, preserving row order.
    pub fn restrict_to(self, allowed: &AHashSet<String>) -> Result<Self, DataError> {
        let rows: Vec<usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| allowed.contains(*id))
            .map(|(i, _)| i)
            .collect();
        let ids = rows.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let values = self.values.select(Axis(0), &rows);
        Self::new(ids, self.feature_names, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::test_support::create_test_tsv;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_load_matrix_from_tsv() {
        let content = "sample_id\tg1\tg2\nS1\t0.5\t1\nS2\t-1.25\t2\nS3\t3\t4";
        let file = create_test_tsv(content).unwrap();
        let matrix = FeatureMatrix::from_tsv(file.path()).unwrap();

        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.feature_names(), &["g1".to_string(), "g2".to_string()]);
        assert_abs_diff_eq!(matrix.values()[[1, 0]], -1.25, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.row("S3").unwrap()[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_values_drop_whole_sample() {
        let content = "sample_id\tg1\tg2\nS1\t0.5\tNA\nS2\t1\t2\nS3\t\t4";
        let file = create_test_tsv(content).unwrap();
        let matrix = FeatureMatrix::from_tsv(file.path()).unwrap();
        let (complete, dropped) = matrix.drop_incomplete_samples().unwrap();

        assert_eq!(complete.sample_ids(), &["S2".to_string()]);
        assert_eq!(dropped, vec!["S1".to_string(), "S3".to_string()]);
        assert_abs_diff_eq!(complete.values()[[0, 1]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let result = FeatureMatrix::new(
            vec!["S1".into(), "S1".into()],
            vec!["g1".into()],
            array![[1.0], [2.0]],
        );
        assert!(matches!(result, Err(DataError::DuplicateSample(id, _)) if id == "S1"));
    }

    #[test]
    fn test_header_only_matrix_is_empty() {
        let file = create_test_tsv("sample_id\tg1").unwrap();
        assert!(matches!(
            FeatureMatrix::from_tsv(file.path()),
            Err(DataError::EmptyTable(_))
        ));
    }
}
