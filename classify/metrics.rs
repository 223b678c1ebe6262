//! Ranking metrics for binary classifiers. Every function returns `None` when
//! the labels contain a single class, where the metric is undefined.

use ndarray::ArrayView1;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationScores {
    pub auroc: f64,
    pub aupr: f64,
}

impl ClassificationScores {
    pub fn compute(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<Self> {
        Some(Self {
            auroc: roc_auc(y, scores)?,
            aupr: average_precision(y, scores)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
    pub threshold: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PrPoint {
    pub precision: f64,
    pub recall: f64,
    pub threshold: f64,
}

fn class_counts(y: ArrayView1<f64>) -> Option<(f64, f64)> {
    let n_pos = y.iter().filter(|&&t| t > 0.5).count() as f64;
    let n_neg = y.len() as f64 - n_pos;
    (n_pos > 0.0 && n_neg > 0.0).then_some((n_pos, n_neg))
}

/// Area under the ROC curve via the Mann-Whitney U statistic, with tied
/// scores sharing their average rank.
pub fn roc_auc(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<f64> {
    debug_assert_eq!(y.len(), scores.len());
    let (n_pos, n_neg) = class_counts(y)?;
    let n = y.len();

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[idx[j]] == scores[idx[i]] {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t > 0.5)
        .map(|(_, r)| r)
        .sum();
    Some((sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Cumulative (threshold, true positives, false positives) at every distinct
/// score, from the highest threshold down.
fn threshold_counts(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Vec<(f64, f64, f64)> {
    let mut idx: Vec<usize> = (0..y.len()).collect();
    idx.sort_by(|&i, &j| scores[j].total_cmp(&scores[i]));

    let mut counts = Vec::new();
    let (mut tp, mut fp) = (0.0, 0.0);
    for (pos, &i) in idx.iter().enumerate() {
        if y[i] > 0.5 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_tie = idx
            .get(pos + 1)
            .is_none_or(|&next| scores[next] != scores[i]);
        if last_of_tie {
            counts.push((scores[i], tp, fp));
        }
    }
    counts
}

/// Average precision: Σₙ (Rₙ − Rₙ₋₁) · Pₙ over decreasing thresholds.
pub fn average_precision(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<f64> {
    debug_assert_eq!(y.len(), scores.len());
    let (n_pos, _) = class_counts(y)?;
    let mut previous_recall = 0.0;
    let mut ap = 0.0;
    for (_, tp, fp) in threshold_counts(y, scores) {
        let recall = tp / n_pos;
        let precision = tp / (tp + fp);
        ap += (recall - previous_recall) * precision;
        previous_recall = recall;
    }
    Some(ap)
}

/// ROC curve starting at (0, 0) with an infinite threshold.
pub fn roc_curve(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<Vec<RocPoint>> {
    let (n_pos, n_neg) = class_counts(y)?;
    let mut points = vec![RocPoint {
        fpr: 0.0,
        tpr: 0.0,
        threshold: f64::INFINITY,
    }];
    points.extend(
        threshold_counts(y, scores)
            .into_iter()
            .map(|(threshold, tp, fp)| RocPoint {
                fpr: fp / n_neg,
                tpr: tp / n_pos,
                threshold,
            }),
    );
    Some(points)
}

/// Precision-recall pairs from the highest threshold down.
pub fn precision_recall_curve(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<Vec<PrPoint>> {
    let (n_pos, _) = class_counts(y)?;
    Some(
        threshold_counts(y, scores)
            .into_iter()
            .map(|(threshold, tp, fp)| PrPoint {
                precision: tp / (tp + fp),
                recall: tp / n_pos,
                threshold,
            })
            .collect(),
    )
}
