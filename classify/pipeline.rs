//! One classification run: a pure function of (feature matrix, labels, seed,
//! configuration) to metric records.
//!
//! The run joins labels to features, draws the split(s), assembles the design
//! matrix, and hands the same partition to both the trainer and the
//! label-shuffled baseline. Nothing is shared between the two beyond the
//! partition itself.

use crate::baseline::BaselineController;
use crate::config::HarnessConfig;
use crate::data::target::TargetError;
use crate::data::{FeatureMatrix, SampleInfo, TargetKind, TargetLabels};
use crate::results::{MetricRecord, RecordContext};
use crate::seeding::derive_seed;
use crate::split::{Split, SplitError, StrataMap, StratifiedSplitter};
use crate::trainer::{
    ClassifierTrainer, FeatureLayout, TrainError, TrainInput, TrainOutcome, TrainerSettings,
};
use ahash::AHashMap;
use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// How a failed run is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not enough data for a meaningful fit; the run is skipped.
    InsufficientSamples,
    /// The run was set up wrongly; reported as failed.
    InvalidConfiguration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InsufficientSamples => "insufficient samples",
            Self::InvalidConfiguration => "invalid configuration",
        })
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("No samples of target '{0}' are present in the feature matrix.")]
    JoinMismatch(String),
    #[error("Split {fold:?} has no TEST samples.")]
    NoTestSamples { fold: Option<usize> },
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Data(#[from] crate::data::DataError),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        let configuration = match self {
            Self::Target(e) => e.is_configuration(),
            Self::Split(e) => e.is_configuration(),
            Self::Train(e) => e.is_configuration(),
            Self::Data(e) => e.is_configuration(),
            Self::JoinMismatch(_) | Self::NoTestSamples { .. } => false,
        };
        if configuration {
            ErrorKind::InvalidConfiguration
        } else {
            ErrorKind::InsufficientSamples
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Target(e) => e.reason(),
            Self::JoinMismatch(_) => "join_mismatch",
            Self::NoTestSamples { .. } => "no_test_samples",
            Self::Split(SplitError::InvalidTestFraction(_)) => "invalid_test_fraction",
            Self::Split(SplitError::TooFewFolds(_)) => "too_few_folds",
            Self::Split(SplitError::EmptySampleSet) => "empty_sample_set",
            Self::Split(SplitError::EmptyFold { .. }) => "no_test_samples",
            Self::Train(e) => e.reason(),
            Self::Data(_) => "data_error",
        }
    }

    /// The record written in place of metrics when this error ends a run.
    pub fn record(&self, ctx: &RecordContext) -> MetricRecord {
        match self.kind() {
            ErrorKind::InsufficientSamples => ctx.skipped(self.reason()),
            ErrorKind::InvalidConfiguration => ctx.failed(self.reason()),
        }
    }
}

/// The real and shuffled fits of one split.
#[derive(Debug, Clone)]
pub struct FoldResult {
    pub fold: Option<usize>,
    pub test_ids: Vec<String>,
    pub test_labels: Array1<f64>,
    pub real: TrainOutcome,
    pub shuffled: Option<(TrainOutcome, u64)>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub records: Vec<MetricRecord>,
    pub folds: Vec<FoldResult>,
    pub splits: Vec<Split>,
    pub layout: FeatureLayout,
}

/// The joined design: rows are the labelled samples present in the feature
/// matrix, in label order.
struct Design {
    ids: Vec<String>,
    x: Array2<f64>,
    y: Array1<f64>,
    layout: FeatureLayout,
}

fn build_design(
    config: &HarnessConfig,
    features: &FeatureMatrix,
    sample_info: &SampleInfo,
    labels: &TargetLabels,
) -> Result<Design, RunError> {
    let mut rows = Vec::new();
    let mut ids = Vec::new();
    let mut y = Vec::new();
    let mut burden = Vec::new();
    for (i, id) in labels.sample_ids.iter().enumerate() {
        if let (Some(row), Some(_)) = (features.row_of(id), sample_info.get(id)) {
            rows.push(row);
            ids.push(id.clone());
            y.push(if labels.status[i] { 1.0 } else { 0.0 });
            if let Some(values) = &labels.log10_mut {
                burden.push(values[i]);
            }
        }
    }
    if ids.is_empty() {
        return Err(RunError::JoinMismatch(labels.spec.identifier().to_string()));
    }
    log::debug!(
        "{}: {} of {} labelled samples have features",
        labels.spec.identifier(),
        ids.len(),
        labels.len()
    );

    let modality = features.select_rows(&rows);
    let mut names: Vec<String> = features.feature_names().to_vec();
    let n_modality = names.len();
    let mut covariates: Vec<Array1<f64>> = Vec::new();

    // Covariates would leak the label of a cancer-type target.
    if labels.kind() == TargetKind::Gene {
        if config.target.add_cancer_type_covariate {
            let cancer_types: Vec<&str> = ids
                .iter()
                .filter_map(|id| sample_info.get(id).map(|r| r.cancer_type.as_str()))
                .collect();
            let distinct: BTreeSet<&str> = cancer_types.iter().copied().collect();
            for cancer_type in distinct {
                names.push(format!("cancer_type_{cancer_type}"));
                covariates.push(Array1::from_iter(
                    cancer_types
                        .iter()
                        .map(|&ct| if ct == cancer_type { 1.0 } else { 0.0 }),
                ));
            }
        }
        if config.target.add_burden_covariate && labels.log10_mut.is_some() {
            names.push("log10_mut".to_string());
            covariates.push(Array1::from_vec(burden));
        }
    }

    let n = ids.len();
    let mut x = Array2::zeros((n, names.len()));
    x.slice_mut(ndarray::s![.., ..n_modality]).assign(&modality);
    for (offset, column) in covariates.iter().enumerate() {
        x.column_mut(n_modality + offset).assign(column);
    }

    let layout = FeatureLayout {
        modality_columns: (0..n_modality).collect(),
        covariate_columns: (n_modality..names.len()).collect(),
        names,
    };
    Ok(Design {
        ids,
        x,
        y: Array1::from_vec(y),
        layout,
    })
}

/// Stratification keys of the samples a run over `labels` splits: labelled,
/// present in the feature matrix and described in the sample metadata.
pub fn eligible_strata(
    features: &FeatureMatrix,
    sample_info: &SampleInfo,
    labels: &TargetLabels,
) -> StrataMap {
    sample_info.strata(
        labels
            .sample_ids
            .iter()
            .map(String::as_str)
            .filter(|id| features.row_of(id).is_some()),
    )
}

/// The outer partition(s) of a run: one holdout split, or K folds. With
/// `subsample_to_smallest_cancer_type`, each TRAIN set is then cut down per
/// cancer type.
pub fn draw_splits(
    config: &HarnessConfig,
    sample_info: &SampleInfo,
    strata: &StrataMap,
    seed: u64,
) -> Result<Vec<Split>, SplitError> {
    let splitter = StratifiedSplitter::new(config.split.min_group_size, config.split.rounding);
    let mut splits = match config.split.num_folds {
        Some(k) => splitter.k_fold(strata, k, seed)?,
        None => vec![splitter.split(strata, config.split.test_fraction, seed)?],
    };

    if config.split.subsample_to_smallest_cancer_type {
        let cancer_types: StrataMap = strata
            .keys()
            .filter_map(|id| {
                sample_info
                    .get(id)
                    .map(|record| (id.clone(), record.cancer_type.clone()))
            })
            .collect();
        let subsample_seed = derive_seed(seed, "subsample-train");
        for split in &mut splits {
            let dropped = split.subsample_train_groups(&cancer_types, subsample_seed);
            log::debug!(
                "Fold {:?}: {} TRAIN samples dropped to balance cancer types",
                split.fold,
                dropped
            );
        }
    }
    Ok(splits)
}

/// Runs one (modality, target, seed) combination.
///
/// Errors before any split is drawn end the run. Once splits exist, a split
/// whose fit fails contributes a skip or failure record and the remaining
/// splits still run.
pub fn run_classification(
    config: &HarnessConfig,
    features: &FeatureMatrix,
    sample_info: &SampleInfo,
    labels: &TargetLabels,
    seed: u64,
) -> Result<RunOutput, RunError> {
    let (min_pos, min_neg) = (config.target.min_positive, config.target.min_negative);
    labels.balance.check(min_pos, min_neg)?;

    let design = build_design(config, features, sample_info, labels)?;
    let joined = crate::data::target::ClassBalance::from_labels(
        &design.y.iter().map(|&v| v > 0.5).collect::<Vec<_>>(),
    );
    joined.check(min_pos, min_neg)?;

    let strata = eligible_strata(features, sample_info, labels);
    let splits = draw_splits(config, sample_info, &strata, seed)?;

    let trainer = ClassifierTrainer::new(TrainerSettings::from_config(config));
    let baseline = BaselineController::new(&trainer);
    let row_of: AHashMap<&str, usize> = design
        .ids
        .iter()
        .enumerate()
        .map(|(row, id)| (id.as_str(), row))
        .collect();
    let rows = |ids: &[String]| -> Vec<usize> {
        ids.iter().filter_map(|id| row_of.get(id.as_str()).copied()).collect()
    };

    let base_ctx = RecordContext {
        modality: config.modality,
        n_dims: config.n_dims,
        target: labels.spec.identifier().to_string(),
        target_kind: labels.kind(),
        seed,
        outer_fold: None,
        shuffled: false,
        shuffle_seed: None,
    };

    let mut records = Vec::new();
    let mut folds = Vec::with_capacity(splits.len());
    for split in &splits {
        let ctx = base_ctx.with_fold(split.fold);
        if split.test.is_empty() {
            let err = RunError::NoTestSamples { fold: split.fold };
            log::warn!("{}: {}", labels.spec.identifier(), err);
            records.push(err.record(&ctx));
            continue;
        }

        let (train_rows, test_rows) = (rows(&split.train[..]), rows(&split.test[..]));
        let x_train = design.x.select(Axis(0), &train_rows);
        let x_test = design.x.select(Axis(0), &test_rows);
        let y_train = design.y.select(Axis(0), &train_rows);
        let y_test = design.y.select(Axis(0), &test_rows);
        let input = TrainInput {
            layout: &design.layout,
            train_ids: &split.train,
            train_strata: &strata,
            x_train: x_train.view(),
            y_train: y_train.view(),
            x_test: x_test.view(),
            y_test: y_test.view(),
        };

        let real = match trainer.train(&input, seed) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = RunError::from(e);
                log::warn!(
                    "{} (fold {:?}): {} [{}]",
                    labels.spec.identifier(),
                    split.fold,
                    err,
                    err.kind()
                );
                records.push(err.record(&ctx));
                continue;
            }
        };
        records.extend(real.records(&ctx));

        let shuffled = match baseline.train_shuffled(&input, seed) {
            Ok((outcome, shuffle_seed)) => {
                records.extend(outcome.records(&ctx.shuffled(shuffle_seed)));
                Some((outcome, shuffle_seed))
            }
            Err(e) => {
                let shuffle_seed = crate::baseline::shuffle_seed(seed);
                let err = RunError::from(e);
                log::warn!(
                    "{} (fold {:?}, shuffled): {}",
                    labels.spec.identifier(),
                    split.fold,
                    err
                );
                records.push(err.record(&ctx.shuffled(shuffle_seed)));
                None
            }
        };

        log::info!(
            "{} / {} (seed {}, fold {:?}): test AUROC {:.4}{}",
            config.modality,
            labels.spec.identifier(),
            seed,
            split.fold,
            real.evaluation.test.auroc,
            shuffled
                .as_ref()
                .map(|(s, _)| format!(", shuffled {:.4}", s.evaluation.test.auroc))
                .unwrap_or_default()
        );

        folds.push(FoldResult {
            fold: split.fold,
            test_ids: split.test.clone(),
            test_labels: y_test,
            real,
            shuffled,
        });
    }

    Ok(RunOutput {
        records,
        folds,
        splits,
        layout: design.layout,
    })
}
