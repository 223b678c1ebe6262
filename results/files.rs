//! Per-run artifacts: coefficient, prediction and curve tables, the filtered
//! cancer-type statistics of gene targets, and the saved options.
//!
//! File names are deterministic functions of the experiment parameters, so a
//! rerun of the same (target, modality, seed, dims) overwrites its own
//! artifacts and nothing else.

use super::ResultsError;
use crate::config::HarnessConfig;
use crate::data::target::{CancerTypeStats, ExclusionReason};
use crate::data::{Modality, TargetKind};
use crate::metrics::{precision_recall_curve, roc_curve};
use crate::trainer::{TrainOutcome, TrainedModel};
use flate2::Compression;
use flate2::write::GzEncoder;
use ndarray::ArrayView1;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Whether an artifact belongs to the real fit or the label-shuffled baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Signal,
    Shuffled,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Shuffled => "shuffled",
        }
    }
}

/// The parameters every artifact name of one run is built from.
#[derive(Clone, Debug, PartialEq)]
pub struct RunFiles {
    pub dir: PathBuf,
    pub target: String,
    pub modality: Modality,
    pub seed: u64,
    pub n_dims: Option<usize>,
}

impl RunFiles {
    /// `{target}_{modality}_{signal}_s{seed}[_n{dims}]_{descriptor}{ext}`
    pub fn path(&self, signal: Signal, descriptor: &str, ext: &str) -> PathBuf {
        let dims = self.n_dims.map(|n| format!("_n{n}")).unwrap_or_default();
        self.dir.join(format!(
            "{}_{}_{}_s{}{}_{}{}",
            self.target,
            self.modality,
            signal.name(),
            self.seed,
            dims,
            descriptor,
            ext
        ))
    }

    pub fn coefficients(&self, signal: Signal) -> PathBuf {
        self.path(signal, "coefficients", ".tsv.gz")
    }

    pub fn predictions(&self, signal: Signal) -> PathBuf {
        self.path(signal, "preds", ".tsv.gz")
    }

    pub fn param_search(&self, signal: Signal) -> PathBuf {
        self.path(signal, "param_search", ".tsv.gz")
    }

    pub fn roc_curve(&self, signal: Signal) -> PathBuf {
        self.path(signal, "roc_curve", ".tsv")
    }

    pub fn pr_curve(&self, signal: Signal) -> PathBuf {
        self.path(signal, "pr_curve", ".tsv")
    }

    /// A run counts as done once its real coefficient table exists.
    pub fn exists(&self) -> bool {
        self.coefficients(Signal::Signal).exists()
    }
}

/// Directory for the artifacts of one target: `{results_dir}/{kind}/{target}`.
pub fn make_output_dir(
    results_dir: &Path,
    kind: TargetKind,
    target: &str,
) -> Result<PathBuf, ResultsError> {
    let dir = results_dir.join(kind.name()).join(target);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path of the metrics table of one sweep axis:
/// `{results_dir}/{kind}/{modality}_s{seed}[_n{dims}]_classify_metrics.tsv`.
pub fn metrics_table_path(
    results_dir: &Path,
    kind: TargetKind,
    modality: Modality,
    seed: u64,
    n_dims: Option<usize>,
) -> PathBuf {
    let dims = n_dims.map(|n| format!("_n{n}")).unwrap_or_default();
    results_dir
        .join(kind.name())
        .join(format!("{modality}_s{seed}{dims}_classify_metrics.tsv"))
}

/// Saves the options a sweep ran with next to its metrics table.
pub fn save_model_options(
    results_dir: &Path,
    kind: TargetKind,
    config: &HarnessConfig,
) -> Result<PathBuf, ResultsError> {
    let dir = results_dir.join(kind.name());
    std::fs::create_dir_all(&dir)?;
    let dims = config.n_dims.map(|n| format!("_n{n}")).unwrap_or_default();
    let path = dir.join(format!(
        "{}_s{}{}_model_options.toml",
        config.modality, config.seed, dims
    ));
    config.save(&path)?;
    Ok(path)
}

#[derive(Debug, Serialize)]
struct CoefficientRow<'a> {
    fold: Option<usize>,
    feature: &'a str,
    weight: f64,
    alpha: f64,
    l1_ratio: f64,
}

#[derive(Debug, Serialize)]
struct PredictionRow<'a> {
    fold: Option<usize>,
    sample_id: &'a str,
    status: u8,
    probability: f64,
}

#[derive(Debug, Serialize)]
struct ParamSearchRow {
    outer_fold: Option<usize>,
    inner_fold: usize,
    alpha: f64,
    l1_ratio: f64,
    auroc: f64,
    aupr: f64,
}

#[derive(Debug, Serialize)]
struct RocRow {
    fold: Option<usize>,
    fpr: f64,
    tpr: f64,
    threshold: f64,
}

#[derive(Debug, Serialize)]
struct PrRow {
    fold: Option<usize>,
    precision: f64,
    recall: f64,
    threshold: f64,
}

fn write_rows<W: Write, T: Serialize>(
    writer: W,
    rows: impl IntoIterator<Item = T>,
) -> Result<W, ResultsError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| ResultsError::Io(e.into_error()))
}

/// Writes a gzip-compressed tab-separated table.
pub fn write_gz_table<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), ResultsError> {
    let encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
    let encoder = write_rows(encoder, rows)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Writes a plain tab-separated table.
pub fn write_table<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), ResultsError> {
    write_rows(BufWriter::new(File::create(path)?), rows)?.flush()?;
    Ok(())
}

/// One fold's fit together with the TEST rows it was evaluated on.
pub struct FoldArtifacts<'a> {
    pub fold: Option<usize>,
    pub outcome: &'a TrainOutcome,
    pub test_ids: &'a [String],
    pub test_labels: ArrayView1<'a, f64>,
}

fn coefficient_rows<'a>(
    fold: Option<usize>,
    model: &'a TrainedModel,
) -> impl Iterator<Item = CoefficientRow<'a>> + 'a {
    let (alpha, l1_ratio) = (model.penalty.alpha, model.penalty.l1_ratio);
    std::iter::once(CoefficientRow {
        fold,
        feature: "intercept",
        weight: model.intercept,
        alpha,
        l1_ratio,
    })
    .chain(
        model
            .feature_names
            .iter()
            .zip(model.coefficients.iter())
            .map(move |(feature, &weight)| CoefficientRow {
                fold,
                feature,
                weight,
                alpha,
                l1_ratio,
            }),
    )
}

/// Writes every artifact of one signal (real or shuffled) across its folds.
pub fn write_run_artifacts(
    files: &RunFiles,
    signal: Signal,
    folds: &[FoldArtifacts<'_>],
    output_preds: bool,
) -> Result<(), ResultsError> {
    write_gz_table(
        &files.coefficients(signal),
        folds
            .iter()
            .flat_map(|f| coefficient_rows(f.fold, &f.outcome.model)),
    )?;

    write_gz_table(
        &files.param_search(signal),
        folds.iter().flat_map(|f| {
            f.outcome.evaluation.inner_folds.iter().map(|s| ParamSearchRow {
                outer_fold: f.fold,
                inner_fold: s.fold,
                alpha: s.penalty.alpha,
                l1_ratio: s.penalty.l1_ratio,
                auroc: s.scores.auroc,
                aupr: s.scores.aupr,
            })
        }),
    )?;

    if output_preds {
        write_gz_table(
            &files.predictions(signal),
            folds.iter().flat_map(|f| {
                f.test_ids
                    .iter()
                    .zip(f.test_labels.iter())
                    .zip(f.outcome.evaluation.test_probabilities.iter())
                    .map(|((sample_id, &label), &probability)| PredictionRow {
                        fold: f.fold,
                        sample_id,
                        status: u8::from(label > 0.5),
                        probability,
                    })
            }),
        )?;
    }

    let mut roc_rows = Vec::new();
    let mut pr_rows = Vec::new();
    for f in folds {
        let probabilities = f.outcome.evaluation.test_probabilities.view();
        if let Some(points) = roc_curve(f.test_labels, probabilities) {
            roc_rows.extend(points.into_iter().map(|p| RocRow {
                fold: f.fold,
                fpr: p.fpr,
                tpr: p.tpr,
                threshold: p.threshold,
            }));
        }
        if let Some(points) = precision_recall_curve(f.test_labels, probabilities) {
            pr_rows.extend(points.into_iter().map(|p| PrRow {
                fold: f.fold,
                precision: p.precision,
                recall: p.recall,
                threshold: p.threshold,
            }));
        }
    }
    write_table(&files.roc_curve(signal), roc_rows)?;
    write_table(&files.pr_curve(signal), pr_rows)?;
    Ok(())
}

/// Writes `{gene}_filtered_cancertypes.tsv` into the gene's directory.
pub fn write_cancer_type_stats(
    dir: &Path,
    gene: &str,
    stats: &[CancerTypeStats],
) -> Result<PathBuf, ResultsError> {
    let path = dir.join(format!("{gene}_filtered_cancertypes.tsv"));
    write_table(&path, stats)?;
    Ok(path)
}

#[derive(Serialize)]
struct ExclusionRow<'a> {
    sample_id: &'a str,
    reason: &'static str,
}

/// Writes `{target}_excluded_samples.tsv`: every sample dropped while building
/// the labels, with the rule that dropped it.
pub fn write_excluded_samples(
    dir: &Path,
    target: &str,
    excluded: &[(String, ExclusionReason)],
) -> Result<PathBuf, ResultsError> {
    let path = dir.join(format!("{target}_excluded_samples.tsv"));
    write_table(
        &path,
        excluded.iter().map(|(id, reason)| ExclusionRow {
            sample_id: id,
            reason: reason.tag(),
        }),
    )?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn files(dir: &Path, n_dims: Option<usize>) -> RunFiles {
        RunFiles {
            dir: dir.to_path_buf(),
            target: "TP53".to_string(),
            modality: Modality::Me27k,
            seed: 7,
            n_dims,
        }
    }

    #[test]
    fn test_file_names_follow_parameters() {
        let dir = Path::new("out");
        assert_eq!(
            files(dir, None).coefficients(Signal::Signal),
            dir.join("TP53_me_27k_signal_s7_coefficients.tsv.gz")
        );
        assert_eq!(
            files(dir, Some(100)).roc_curve(Signal::Shuffled),
            dir.join("TP53_me_27k_shuffled_s7_n100_roc_curve.tsv")
        );
        assert_eq!(
            metrics_table_path(Path::new("r"), TargetKind::Gene, Modality::Expression, 3, None),
            Path::new("r/gene/expression_s3_classify_metrics.tsv")
        );
    }

    #[test]
    fn test_gz_table_is_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv.gz");
        let rows = vec![
            RocRow { fold: None, fpr: 0.0, tpr: 0.5, threshold: 0.9 },
            RocRow { fold: Some(1), fpr: 1.0, tpr: 1.0, threshold: 0.1 },
        ];
        write_gz_table(&path, rows).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "fold\tfpr\ttpr\tthreshold");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("1\t1.0\t1.0"));
    }

    #[test]
    fn test_cancer_type_stats_table() {
        let dir = tempdir().unwrap();
        let stats = vec![CancerTypeStats {
            cancer_type: "BRCA".to_string(),
            count: 40,
            positives: 20,
            proportion: 0.5,
            included: true,
        }];
        let path = write_cancer_type_stats(dir.path(), "TP53", &stats).unwrap();
        assert!(path.ends_with("TP53_filtered_cancertypes.tsv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("cancer_type\tcount\tpositives\tproportion\tincluded"));
        assert!(text.contains("BRCA\t40\t20\t0.5\ttrue"));
    }

    #[test]
    fn test_excluded_samples_table() {
        let dir = tempdir().unwrap();
        let excluded = vec![
            ("S1".to_string(), ExclusionReason::Hypermutated),
            ("S2".to_string(), ExclusionReason::MissingCopyCall),
        ];
        let path = write_excluded_samples(dir.path(), "KRAS", &excluded).unwrap();
        assert!(path.ends_with("KRAS_excluded_samples.tsv"));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["sample_id\treason", "S1\thypermutated", "S2\tmissing_copy_call"]
        );
    }
}
