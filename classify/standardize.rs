use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Column-wise z-scoring fitted on TRAIN rows only.
///
/// Only the listed `columns` are transformed; every other column (covariates)
/// passes through unchanged. Statistics use the population variance, and a
/// constant column keeps a scale of 1 so it maps to all zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub columns: Vec<usize>,
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl Standardizer {
    pub fn fit(x_train: ArrayView2<f64>, columns: &[usize]) -> Self {
        let n = x_train.nrows().max(1) as f64;
        let mut means = Array1::zeros(columns.len());
        let mut scales = Array1::ones(columns.len());
        for (slot, &col) in columns.iter().enumerate() {
            let column = x_train.column(col);
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means[slot] = mean;
            let sd = var.sqrt();
            if sd.is_finite() && sd > f64::EPSILON {
                scales[slot] = sd;
            }
        }
        Self {
            columns: columns.to_vec(),
            means,
            scales,
        }
    }

    /// Leaves every column as is.
    pub fn identity() -> Self {
        Self {
            columns: Vec::new(),
            means: Array1::zeros(0),
            scales: Array1::zeros(0),
        }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for (slot, &col) in self.columns.iter().enumerate() {
            let (mean, scale) = (self.means[slot], self.scales[slot]);
            out.column_mut(col).mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }
}

/// Indices (ascending) of the `keep` columns among `candidates` with the
/// largest mean absolute deviation. Ties go to the earlier column.
pub fn select_by_mad(x_train: ArrayView2<f64>, candidates: &[usize], keep: usize) -> Vec<usize> {
    if keep >= candidates.len() {
        return candidates.to_vec();
    }
    let n = x_train.nrows().max(1) as f64;
    let mut scored: Vec<(f64, usize)> = candidates
        .iter()
        .map(|&col| {
            let column = x_train.index_axis(Axis(1), col);
            let mean = column.sum() / n;
            let mad = column.iter().map(|v| (v - mean).abs()).sum::<f64>() / n;
            (mad, col)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let mut selected: Vec<usize> = scored.into_iter().take(keep).map(|(_, col)| col).collect();
    selected.sort_unstable();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_train_statistics_applied_to_new_rows() {
        let train = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = Standardizer::fit(train.view(), &[0, 1]);
        assert_abs_diff_eq!(scaler.means[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scaler.scales[0], (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        // Constant column keeps unit scale.
        assert_abs_diff_eq!(scaler.scales[1], 1.0, epsilon = 1e-12);

        let test = array![[3.0, 12.0]];
        let z = scaler.transform(test.view());
        assert_abs_diff_eq!(z[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[[0, 1]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unlisted_columns_pass_through() {
        let x = array![[1.0, 0.0], [3.0, 1.0]];
        let scaler = Standardizer::fit(x.view(), &[0]);
        let z = scaler.transform(x.view());
        assert_abs_diff_eq!(z[[0, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mad_keeps_most_variable_columns() {
        let x = array![
            [0.0, 5.0, 1.0, 0.0],
            [0.0, -5.0, 2.0, 1.0],
            [0.0, 5.0, 3.0, 0.0],
            [0.0, -5.0, 4.0, 1.0]
        ];
        assert_eq!(select_by_mad(x.view(), &[0, 1, 2, 3], 2), vec![1, 2]);
        assert_eq!(select_by_mad(x.view(), &[0, 3], 5), vec![0, 3]);
    }
}
