//! # Classifier Trainer
//!
//! Nested model selection restricted to the TRAIN partition:
//!
//! 1. Modality features are optionally reduced to the most variable ones
//!    (mean absolute deviation on TRAIN) and z-scored with TRAIN statistics.
//! 2. A stratified inner K-fold over TRAIN scores every (alpha, l1_ratio) grid
//!    point by validation ROC-AUC.
//! 3. The best grid point is refit on all of TRAIN and evaluated once on TEST.
//!
//! TEST rows are only ever passed through the finished model, so nothing about
//! them can influence the features, the scaling, or the chosen penalty.

use crate::config::HarnessConfig;
use crate::logistic::{ElasticNetLogistic, FitError, FitStatus, Penalty, SolverOptions};
use crate::metrics::ClassificationScores;
use crate::results::{MetricName, MetricRecord, Partition, RecordContext};
use crate::seeding::derive_seed;
use crate::split::{SplitError, StrataMap, StratifiedSplitter};
use crate::standardize::{Standardizer, select_by_mad};
use ahash::AHashMap;
use itertools::iproduct;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("The {0} partition contains a single class.")]
    OneClass(&'static str),
    #[error("No inner cross-validation fold had both classes in its training and validation parts.")]
    NoUsableFolds,
    #[error("Inner cross-validation split failed: {0}")]
    Split(#[from] SplitError),
    #[error("Model fitting failed: {0}")]
    Fit(#[from] FitError),
}

impl TrainError {
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Split(e) => e.is_configuration(),
            Self::Fit(_) => true,
            Self::OneClass(_) | Self::NoUsableFolds => false,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::OneClass(_) => "one_class",
            Self::NoUsableFolds => "no_usable_folds",
            Self::Split(SplitError::EmptyFold { .. }) => "too_few_samples_for_inner_cv",
            Self::Split(_) => "inner_split_error",
            Self::Fit(_) => "fit_error",
        }
    }
}

/// The regularization grid, ordered from strongest to weakest penalty so that
/// selection ties resolve toward the simpler model.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperparameterGrid {
    alphas: Vec<f64>,
    l1_ratios: Vec<f64>,
}

impl HyperparameterGrid {
    pub fn new(alphas: &[f64], l1_ratios: &[f64]) -> Self {
        let mut alphas = alphas.to_vec();
        alphas.sort_by(|a, b| b.total_cmp(a));
        alphas.dedup();
        // A larger l1 ratio zeroes more coefficients.
        let mut l1_ratios = l1_ratios.to_vec();
        l1_ratios.sort_by(|a, b| b.total_cmp(a));
        l1_ratios.dedup();
        Self { alphas, l1_ratios }
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn l1_ratios(&self) -> &[f64] {
        &self.l1_ratios
    }

    pub fn len(&self) -> usize {
        self.alphas.len() * self.l1_ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid points, alpha-major.
    pub fn points(&self) -> impl Iterator<Item = Penalty> + '_ {
        iproduct!(self.alphas.iter(), self.l1_ratios.iter()).map(|(&alpha, &l1_ratio)| Penalty {
            alpha,
            l1_ratio,
        })
    }
}

/// Column roles of a design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    pub names: Vec<String>,
    /// Molecular features; subject to MAD selection and standardization.
    pub modality_columns: Vec<usize>,
    /// Covariates; always kept and never rescaled.
    pub covariate_columns: Vec<usize>,
}

impl FeatureLayout {
    pub fn modality_only(names: Vec<String>) -> Self {
        let modality_columns = (0..names.len()).collect();
        Self {
            names,
            modality_columns,
            covariate_columns: Vec::new(),
        }
    }
}

/// Everything one fit sees. Rows of `x_train` follow `train_ids`.
#[derive(Clone, Copy)]
pub struct TrainInput<'a> {
    pub layout: &'a FeatureLayout,
    pub train_ids: &'a [String],
    pub train_strata: &'a StrataMap,
    pub x_train: ArrayView2<'a, f64>,
    pub y_train: ArrayView1<'a, f64>,
    pub x_test: ArrayView2<'a, f64>,
    pub y_test: ArrayView1<'a, f64>,
}

#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub grid: HyperparameterGrid,
    pub inner_folds: usize,
    pub solver: SolverOptions,
    pub subset_mad: Option<usize>,
    pub standardize: bool,
    pub splitter: StratifiedSplitter,
}

impl TrainerSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            grid: HyperparameterGrid::new(&config.model.alphas, &config.model.l1_ratios),
            inner_folds: config.model.inner_folds,
            solver: SolverOptions {
                max_iterations: config.model.max_iterations,
                max_sweeps: config.model.max_sweeps,
                tolerance: config.model.convergence_tolerance,
            },
            subset_mad: config.model.subset_mad_genes,
            standardize: config.standardize_features(),
            splitter: StratifiedSplitter::new(config.split.min_group_size, config.split.rounding),
        }
    }
}

/// Validation scores of one grid point on one inner fold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldScore {
    pub fold: usize,
    pub penalty: Penalty,
    pub scores: ClassificationScores,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridScore {
    pub penalty: Penalty,
    pub mean_auroc: f64,
    pub mean_aupr: f64,
}

/// A fitted classifier together with the TRAIN-derived preprocessing it needs.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// Indices into the input layout, in the order the coefficients use.
    pub columns: Vec<usize>,
    pub feature_names: Vec<String>,
    pub scaler: Standardizer,
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub penalty: Penalty,
    pub cv_auroc: f64,
    pub status: FitStatus,
}

impl TrainedModel {
    /// Probabilities for rows laid out like the training input.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let selected = x.select(Axis(1), &self.columns);
        let z = self.scaler.transform(selected.view());
        crate::logistic::predict_proba(z.view(), self.intercept, self.coefficients.view())
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Inner-fold validation scores of the selected grid point.
    pub inner_folds: Vec<FoldScore>,
    pub grid: Vec<GridScore>,
    pub train: ClassificationScores,
    pub test: ClassificationScores,
    pub test_probabilities: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: TrainedModel,
    pub evaluation: Evaluation,
}

impl TrainOutcome {
    /// One record per inner fold per metric, then TRAIN and TEST.
    pub fn records(&self, ctx: &RecordContext) -> Vec<MetricRecord> {
        let mut records = Vec::with_capacity(2 * self.evaluation.inner_folds.len() + 4);
        for fold in &self.evaluation.inner_folds {
            let inner = Some(fold.fold);
            records.push(ctx.metric(Partition::Cv, inner, MetricName::Auroc, fold.scores.auroc));
            records.push(ctx.metric(Partition::Cv, inner, MetricName::Aupr, fold.scores.aupr));
        }
        for (partition, scores) in [
            (Partition::Train, self.evaluation.train),
            (Partition::Test, self.evaluation.test),
        ] {
            records.push(ctx.metric(partition, None, MetricName::Auroc, scores.auroc));
            records.push(ctx.metric(partition, None, MetricName::Aupr, scores.aupr));
        }
        records
    }
}

fn has_both_classes(y: ArrayView1<f64>) -> bool {
    let positives = y.iter().filter(|&&v| v > 0.5).count();
    positives > 0 && positives < y.len()
}

pub struct ClassifierTrainer {
    settings: TrainerSettings,
}

impl ClassifierTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    pub fn train(&self, input: &TrainInput<'_>, seed: u64) -> Result<TrainOutcome, TrainError> {
        if !has_both_classes(input.y_train) {
            return Err(TrainError::OneClass("train"));
        }
        if !has_both_classes(input.y_test) {
            return Err(TrainError::OneClass("test"));
        }

        let (columns, scaler) = self.preprocess(input);
        let x_train = scaler.transform(input.x_train.select(Axis(1), &columns).view());

        let fold_scores = self.inner_cross_validation(input, x_train.view(), seed)?;
        let grid = self.summarize_grid(&fold_scores);
        let best = select_best(&grid).ok_or(TrainError::NoUsableFolds)?;
        log::info!(
            "Selected alpha={} l1_ratio={} (mean inner AUROC {:.4} over {} folds)",
            best.penalty.alpha,
            best.penalty.l1_ratio,
            best.mean_auroc,
            fold_scores.iter().filter(|fold| !fold.is_empty()).count()
        );

        let model = ElasticNetLogistic::new(x_train.view(), input.y_train, self.settings.solver)?;
        let fit = model.fit(best.penalty, None)?;
        let trained = TrainedModel {
            feature_names: columns.iter().map(|&c| input.layout.names[c].clone()).collect(),
            columns,
            scaler,
            intercept: fit.intercept,
            coefficients: fit.coefficients,
            penalty: best.penalty,
            cv_auroc: best.mean_auroc,
            status: fit.status,
        };

        let train_probabilities = trained.predict_proba(input.x_train);
        let test_probabilities = trained.predict_proba(input.x_test);
        let train = ClassificationScores::compute(input.y_train, train_probabilities.view())
            .ok_or(TrainError::OneClass("train"))?;
        let test = ClassificationScores::compute(input.y_test, test_probabilities.view())
            .ok_or(TrainError::OneClass("test"))?;

        let inner_folds = fold_scores
            .into_iter()
            .flatten()
            .filter(|score| score.penalty == best.penalty)
            .collect();

        Ok(TrainOutcome {
            model: trained,
            evaluation: Evaluation {
                inner_folds,
                grid,
                train,
                test,
                test_probabilities,
            },
        })
    }

    /// Chooses the feature columns and fits the scaler, both from TRAIN rows.
    fn preprocess(&self, input: &TrainInput<'_>) -> (Vec<usize>, Standardizer) {
        let layout = input.layout;
        let mut columns = match self.settings.subset_mad {
            Some(keep) => select_by_mad(input.x_train, &layout.modality_columns, keep),
            None => layout.modality_columns.clone(),
        };
        let n_modality = columns.len();
        columns.extend_from_slice(&layout.covariate_columns);

        let scaler = if self.settings.standardize {
            let selected = input.x_train.select(Axis(1), &columns);
            let positions: Vec<usize> = (0..n_modality).collect();
            Standardizer::fit(selected.view(), &positions)
        } else {
            Standardizer::identity()
        };
        (columns, scaler)
    }

    /// Scores every grid point on every usable inner fold. The outer vector is
    /// indexed by fold; unusable folds contribute an empty list.
    fn inner_cross_validation(
        &self,
        input: &TrainInput<'_>,
        x_train: ArrayView2<f64>,
        seed: u64,
    ) -> Result<Vec<Vec<FoldScore>>, TrainError> {
        let row_of: AHashMap<&str, usize> = input
            .train_ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.as_str(), row))
            .collect();
        let strata: StrataMap = input
            .train_ids
            .iter()
            .filter_map(|id| input.train_strata.get(id).map(|key| (id.clone(), key.clone())))
            .collect();

        let inner_seed = derive_seed(seed, "inner");
        let folds = self
            .settings
            .splitter
            .k_fold(&strata, self.settings.inner_folds, inner_seed)?;

        let to_rows = |ids: &[String]| -> Vec<usize> {
            ids.iter().filter_map(|id| row_of.get(id.as_str()).copied()).collect()
        };
        let fold_rows: Vec<(Vec<usize>, Vec<usize>)> = folds
            .iter()
            .map(|split| (to_rows(&split.train[..]), to_rows(&split.test[..])))
            .collect();

        let tasks: Vec<(usize, f64)> =
            iproduct!(0..fold_rows.len(), self.settings.grid.l1_ratios().iter().copied()).collect();
        let results: Vec<Option<Vec<FoldScore>>> = tasks
            .par_iter()
            .map(|&(fold, l1_ratio)| {
                let (train_rows, val_rows) = &fold_rows[fold];
                self.score_fold(x_train, input.y_train, train_rows, val_rows, fold, l1_ratio)
            })
            .collect::<Result<_, _>>()?;

        let n_folds = fold_rows.len();
        let mut per_fold: Vec<Vec<FoldScore>> = vec![Vec::new(); n_folds];
        let mut usable = vec![true; n_folds];
        for ((fold, _), result) in tasks.iter().zip(results) {
            match result {
                Some(scores) => per_fold[*fold].extend(scores),
                None => usable[*fold] = false,
            }
        }
        for (fold, ok) in usable.iter().enumerate() {
            if !ok {
                log::debug!("Inner fold {} has a one-class part; ignored for selection", fold);
                per_fold[fold].clear();
            }
        }
        if per_fold.iter().all(Vec::is_empty) {
            return Err(TrainError::NoUsableFolds);
        }
        Ok(per_fold)
    }

    /// Fits the whole alpha path for one l1 ratio on one fold. `None` when the
    /// fold cannot be scored.
    fn score_fold(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        train_rows: &[usize],
        val_rows: &[usize],
        fold: usize,
        l1_ratio: f64,
    ) -> Result<Option<Vec<FoldScore>>, TrainError> {
        let y_fit = y.select(Axis(0), train_rows);
        let y_val = y.select(Axis(0), val_rows);
        if !has_both_classes(y_fit.view()) || !has_both_classes(y_val.view()) {
            return Ok(None);
        }
        let x_fit: Array2<f64> = x.select(Axis(0), train_rows);
        let x_val: Array2<f64> = x.select(Axis(0), val_rows);

        let model = ElasticNetLogistic::new(x_fit.view(), y_fit.view(), self.settings.solver)?;
        let path = model.fit_path(self.settings.grid.alphas(), l1_ratio)?;

        let mut scores = Vec::with_capacity(path.len());
        for fit in path {
            let probabilities = fit.predict_proba(x_val.view());
            match ClassificationScores::compute(y_val.view(), probabilities.view()) {
                Some(s) => scores.push(FoldScore {
                    fold,
                    penalty: fit.penalty,
                    scores: s,
                }),
                None => return Ok(None),
            }
        }
        Ok(Some(scores))
    }

    fn summarize_grid(&self, per_fold: &[Vec<FoldScore>]) -> Vec<GridScore> {
        self.settings
            .grid
            .points()
            .filter_map(|penalty| {
                let matching: Vec<&FoldScore> = per_fold
                    .iter()
                    .flatten()
                    .filter(|score| score.penalty == penalty)
                    .collect();
                if matching.is_empty() {
                    return None;
                }
                let n = matching.len() as f64;
                Some(GridScore {
                    penalty,
                    mean_auroc: matching.iter().map(|s| s.scores.auroc).sum::<f64>() / n,
                    mean_aupr: matching.iter().map(|s| s.scores.aupr).sum::<f64>() / n,
                })
            })
            .collect()
    }
}

/// Highest mean AUROC; the earliest grid point wins ties.
fn select_best(grid: &[GridScore]) -> Option<GridScore> {
    grid.iter().copied().fold(None, |best, candidate| match best {
        Some(current) if candidate.mean_auroc <= current.mean_auroc => Some(current),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::Rounding;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    struct Fixture {
        layout: FeatureLayout,
        ids: Vec<String>,
        strata: StrataMap,
        x: Array2<f64>,
        y: Array1<f64>,
    }

    /// Two strata; the first feature carries the signal.
    fn fixture(n: usize, seed: u64) -> Fixture {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let p = 6;
        let x: Array2<f64> = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
        let y = Array1::from_iter((0..n).map(|i| {
            let eta = 2.5 * x[[i, 0]];
            if rng.gen_range(0.0..1.0) < 1.0 / (1.0 + (-eta).exp()) { 1.0 } else { 0.0 }
        }));
        let ids: Vec<String> = (0..n).map(|i| format!("S{i:04}")).collect();
        let strata = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), if i % 2 == 0 { "A" } else { "B" }.to_string()))
            .collect();
        Fixture {
            layout: FeatureLayout::modality_only((0..p).map(|j| format!("f{j}")).collect()),
            ids,
            strata,
            x,
            y,
        }
    }

    fn settings() -> TrainerSettings {
        TrainerSettings {
            grid: HyperparameterGrid::new(&[0.1, 0.01, 0.001], &[0.0, 0.5]),
            inner_folds: 3,
            solver: SolverOptions::default(),
            subset_mad: None,
            standardize: true,
            splitter: StratifiedSplitter::new(2, Rounding::Nearest),
        }
    }

    fn input<'a>(f: &'a Fixture, n_train: usize) -> TrainInput<'a> {
        TrainInput {
            layout: &f.layout,
            train_ids: &f.ids[..n_train],
            train_strata: &f.strata,
            x_train: f.x.slice(ndarray::s![..n_train, ..]),
            y_train: f.y.slice(ndarray::s![..n_train]),
            x_test: f.x.slice(ndarray::s![n_train.., ..]),
            y_test: f.y.slice(ndarray::s![n_train..]),
        }
    }

    #[test]
    fn test_grid_is_ordered_strongest_first() {
        let grid = HyperparameterGrid::new(&[0.01, 1.0, 0.1, 1.0], &[0.0, 1.0, 0.5]);
        assert_eq!(grid.alphas(), &[1.0, 0.1, 0.01]);
        assert_eq!(grid.l1_ratios(), &[1.0, 0.5, 0.0]);
        let first = grid.points().next().unwrap();
        assert_eq!(first, Penalty { alpha: 1.0, l1_ratio: 1.0 });
        assert_eq!(grid.len(), 9);
    }

    #[test]
    fn test_select_best_prefers_earliest_on_tie() {
        let p = |alpha| Penalty { alpha, l1_ratio: 0.5 };
        let grid = vec![
            GridScore { penalty: p(1.0), mean_auroc: 0.8, mean_aupr: 0.1 },
            GridScore { penalty: p(0.1), mean_auroc: 0.9, mean_aupr: 0.1 },
            GridScore { penalty: p(0.01), mean_auroc: 0.9, mean_aupr: 0.9 },
        ];
        assert_eq!(select_best(&grid).unwrap().penalty, p(0.1));
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_trains_on_informative_feature() {
        let f = fixture(300, 4);
        let trainer = ClassifierTrainer::new(settings());
        let outcome = trainer.train(&input(&f, 240), 42).unwrap();

        assert!(outcome.evaluation.test.auroc > 0.75);
        assert_eq!(outcome.evaluation.inner_folds.len(), 3);
        assert_eq!(outcome.evaluation.grid.len(), 6);
        let strongest = outcome
            .model
            .coefficients
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(j, _)| j);
        assert_eq!(strongest, Some(0));
    }

    #[test]
    fn test_same_seed_selects_same_model() {
        let f = fixture(240, 6);
        let trainer = ClassifierTrainer::new(settings());
        let a = trainer.train(&input(&f, 190), 9).unwrap();
        let b = trainer.train(&input(&f, 190), 9).unwrap();

        assert_eq!(a.model.penalty, b.model.penalty);
        assert_eq!(a.model.intercept, b.model.intercept);
        assert_eq!(a.model.coefficients, b.model.coefficients);
        assert_eq!(a.evaluation.grid, b.evaluation.grid);
        assert_eq!(a.evaluation.test, b.evaluation.test);
    }

    #[test]
    fn test_test_rows_do_not_affect_the_model() {
        let f = fixture(200, 8);
        let mut perturbed = fixture(200, 8);
        perturbed.x[[190, 0]] += 100.0;
        perturbed.x[[199, 3]] = -50.0;

        let trainer = ClassifierTrainer::new(settings());
        let a = trainer.train(&input(&f, 160), 1).unwrap();
        let b = trainer.train(&input(&perturbed, 160), 1).unwrap();

        assert_eq!(a.model.penalty, b.model.penalty);
        assert_eq!(a.model.coefficients, b.model.coefficients);
        assert_eq!(a.model.scaler, b.model.scaler);
        assert_abs_diff_eq!(a.evaluation.train.auroc, b.evaluation.train.auroc, epsilon = 0.0);
    }

    #[test]
    fn test_one_class_test_partition_rejected() {
        let mut f = fixture(100, 2);
        f.y.slice_mut(ndarray::s![80..]).fill(0.0);
        let trainer = ClassifierTrainer::new(settings());
        let err = trainer.train(&input(&f, 80), 1).unwrap_err();
        assert!(matches!(err, TrainError::OneClass("test")));
        assert_eq!(err.reason(), "one_class");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_mad_subset_and_covariates_kept() {
        let f = fixture(200, 5);
        let layout = FeatureLayout {
            names: f.layout.names.clone(),
            modality_columns: vec![0, 1, 2, 3, 4],
            covariate_columns: vec![5],
        };
        let mut s = settings();
        s.subset_mad = Some(2);
        let trainer = ClassifierTrainer::new(s);
        let outcome = trainer
            .train(
                &TrainInput {
                    layout: &layout,
                    ..input(&f, 160)
                },
                3,
            )
            .unwrap();
        assert_eq!(outcome.model.columns.len(), 3);
        assert_eq!(outcome.model.columns[2], 5);
        assert_eq!(outcome.model.scaler.columns, vec![0, 1]);
        assert_eq!(outcome.model.feature_names[2], "f5");
    }
}
