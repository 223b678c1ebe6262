//! # Sweep
//!
//! Drives `run_classification` over a list of targets for one (modality,
//! seed) axis. Each target is an independent run: its errors, including
//! failures to write its own artifacts, become skip or failure records and the
//! sweep moves on. Only a failure to append to the shared metrics table ends
//! the sweep.

use crate::config::{ConfigError, HarnessConfig};
use crate::data::alterations::AlterationTables;
use crate::data::{
    DataError, FeatureMatrix, ModalityStore, SampleInfo, TargetBuilder, TargetKind,
    TargetLabels, TargetSpec,
};
use crate::pipeline::{RunError, RunOutput, run_classification};
use crate::progress::{SweepObserver, SweepStage};
use crate::results::files::{
    FoldArtifacts, RunFiles, Signal, make_output_dir, write_cancer_type_stats,
    write_excluded_samples, write_run_artifacts,
};
use crate::results::{MetricRecord, RecordContext, ResultAggregator, ResultsError, RunStatus};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Results(#[from] ResultsError),
}

/// Everything a sweep reads, loaded once and shared by all targets.
pub struct SweepData {
    pub features: FeatureMatrix,
    pub sample_info: SampleInfo,
    pub alterations: Option<AlterationTables>,
}

impl SweepData {
    /// Loads the configured modality, its sample metadata and, for gene
    /// targets, the alteration tables. With `overlap` set, samples missing
    /// from any listed modality are dropped from the feature matrix.
    pub fn load(config: &HarnessConfig, kind: TargetKind) -> Result<Self, SweepError> {
        let store = ModalityStore::new(config.paths.clone());
        let mut features = store.load_features(config.modality, config.n_dims)?;
        log::info!(
            "Loaded {} data: {} samples x {} features",
            config.modality,
            features.n_samples(),
            features.n_features()
        );

        if !config.overlap.is_empty() {
            let mut modalities = config.overlap.clone();
            if !modalities.contains(&config.modality) {
                modalities.push(config.modality);
            }
            if let Some(shared) = store.overlapping_samples(&modalities, config.n_dims)? {
                let before = features.n_samples();
                features = features.restrict_to(&shared)?;
                log::info!(
                    "Restricted to samples shared by {} modalities: {} of {} kept",
                    modalities.len(),
                    features.n_samples(),
                    before
                );
            }
        }

        let sample_info = store.load_sample_info(config.modality)?;
        let alterations = match kind {
            TargetKind::Gene => Some(AlterationTables::load(&config.paths)?),
            TargetKind::CancerType => None,
        };
        Ok(Self {
            features,
            sample_info,
            alterations,
        })
    }

    /// Every gene of the curated list, when one was loaded.
    pub fn default_gene_targets(&self) -> Vec<TargetSpec> {
        self.alterations
            .as_ref()
            .and_then(|tables| tables.genes.as_ref())
            .map(|genes| genes.genes().map(TargetSpec::gene).collect())
            .unwrap_or_default()
    }

    /// Every cancer type present in the sample metadata.
    pub fn default_cancer_type_targets(&self) -> Vec<TargetSpec> {
        self.sample_info
            .cancer_types()
            .into_iter()
            .map(TargetSpec::cancer_type)
            .collect()
    }
}

/// How one target ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn add(mut self, status: TargetStatus) -> Self {
        match status {
            TargetStatus::Completed => self.completed += 1,
            TargetStatus::Skipped => self.skipped += 1,
            TargetStatus::Failed => self.failed += 1,
        }
        self
    }

    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

fn status_of(records: &[MetricRecord]) -> TargetStatus {
    if records.iter().any(|r| r.status == RunStatus::Failed) {
        TargetStatus::Failed
    } else if records.iter().any(|r| r.status == RunStatus::Ok) {
        TargetStatus::Completed
    } else {
        TargetStatus::Skipped
    }
}

pub struct Sweep<'a> {
    config: &'a HarnessConfig,
    data: &'a SweepData,
    aggregator: &'a ResultAggregator,
}

impl<'a> Sweep<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        data: &'a SweepData,
        aggregator: &'a ResultAggregator,
    ) -> Self {
        Self {
            config,
            data,
            aggregator,
        }
    }

    pub fn run<O: SweepObserver + ?Sized>(
        &self,
        targets: &[TargetSpec],
        observer: &O,
    ) -> Result<SweepSummary, SweepError> {
        observer.on_stage_start(SweepStage::Targets, targets.len());
        let run_one = |spec: &TargetSpec| -> Result<TargetStatus, SweepError> {
            let status = self.run_target(spec)?;
            observer.on_target_finish(spec.identifier());
            Ok(status)
        };

        let statuses: Vec<TargetStatus> = if self.config.output.parallel_targets {
            targets.par_iter().map(run_one).collect::<Result<_, _>>()?
        } else {
            targets.iter().map(run_one).collect::<Result<_, _>>()?
        };
        observer.on_stage_finish(SweepStage::Targets);

        let summary = statuses
            .into_iter()
            .fold(SweepSummary::default(), SweepSummary::add);
        log::info!(
            "Sweep finished: {} completed, {} skipped, {} failed",
            summary.completed,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    /// Runs one target and appends its records as one block.
    pub fn run_target(&self, spec: &TargetSpec) -> Result<TargetStatus, SweepError> {
        let config = self.config;
        let seed = config.seed;
        let ctx = RecordContext {
            modality: config.modality,
            n_dims: config.n_dims,
            target: spec.identifier().to_string(),
            target_kind: spec.kind(),
            seed,
            outer_fold: None,
            shuffled: false,
            shuffle_seed: None,
        };
        let dir = match make_output_dir(&config.results_dir, spec.kind(), spec.identifier()) {
            Ok(dir) => dir,
            Err(e) => return self.record_write_failure(&ctx, &e),
        };
        let files = RunFiles {
            dir,
            target: spec.identifier().to_string(),
            modality: config.modality,
            seed,
            n_dims: config.n_dims,
        };

        if config.output.skip_existing && files.exists() {
            log::info!("Skipping {}: results already exist", spec.identifier());
            self.aggregator.record(&[ctx.skipped("file_exists")])?;
            return Ok(TargetStatus::Skipped);
        }

        let builder = TargetBuilder::new(
            &self.data.sample_info,
            self.data.alterations.as_ref(),
            &config.target,
        );
        let labels = match builder.build_target(spec) {
            Ok(labels) => labels,
            Err(e) => return self.record_error(&ctx, RunError::from(e)),
        };
        if let Err(e) = write_label_artifacts(&files, &labels) {
            return self.record_write_failure(&ctx, &e);
        }

        let output = match run_classification(
            config,
            &self.data.features,
            &self.data.sample_info,
            &labels,
            seed,
        ) {
            Ok(output) => output,
            Err(e) => return self.record_error(&ctx, e),
        };

        if let Err(e) = write_fold_artifacts(&files, &output, config.output.output_preds) {
            return self.record_write_failure(&ctx, &e);
        }

        self.aggregator.record(&output.records)?;
        Ok(status_of(&output.records))
    }

    fn record_error(&self, ctx: &RecordContext, err: RunError) -> Result<TargetStatus, SweepError> {
        let record = err.record(ctx);
        match record.status {
            RunStatus::Failed => log::error!("{}: {} [{}]", ctx.target, err, err.kind()),
            _ => log::warn!("Skipping {}: {} [{}]", ctx.target, err, err.kind()),
        }
        let status = status_of(std::slice::from_ref(&record));
        self.aggregator.record(&[record])?;
        Ok(status)
    }

    /// A target whose own artifacts could not be written fails alone.
    fn record_write_failure(
        &self,
        ctx: &RecordContext,
        err: &ResultsError,
    ) -> Result<TargetStatus, SweepError> {
        log::error!("{}: could not write artifacts: {}", ctx.target, err);
        self.aggregator.record(&[ctx.failed("artifact_write")])?;
        Ok(TargetStatus::Failed)
    }
}

fn write_label_artifacts(files: &RunFiles, labels: &TargetLabels) -> Result<(), ResultsError> {
    if !labels.cancer_type_stats.is_empty() {
        write_cancer_type_stats(&files.dir, &files.target, &labels.cancer_type_stats)?;
    }
    if !labels.excluded.is_empty() {
        write_excluded_samples(&files.dir, &files.target, &labels.excluded)?;
    }
    Ok(())
}

fn write_fold_artifacts(
    files: &RunFiles,
    output: &RunOutput,
    output_preds: bool,
) -> Result<(), ResultsError> {
    let real: Vec<FoldArtifacts<'_>> = output
        .folds
        .iter()
        .map(|f| FoldArtifacts {
            fold: f.fold,
            outcome: &f.real,
            test_ids: &f.test_ids,
            test_labels: f.test_labels.view(),
        })
        .collect();
    let shuffled: Vec<FoldArtifacts<'_>> = output
        .folds
        .iter()
        .filter_map(|f| {
            f.shuffled.as_ref().map(|(outcome, _)| FoldArtifacts {
                fold: f.fold,
                outcome,
                test_ids: &f.test_ids,
                test_labels: f.test_labels.view(),
            })
        })
        .collect();
    if !real.is_empty() {
        write_run_artifacts(files, Signal::Signal, &real, output_preds)?;
    }
    if !shuffled.is_empty() {
        write_run_artifacts(files, Signal::Shuffled, &shuffled, output_preds)?;
    }
    Ok(())
}
