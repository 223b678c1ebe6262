use crate::data::{Modality, TargetKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    Cv,
    Test,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Skipped,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Auroc,
    Aupr,
}

/// One row of the long-format metrics table.
///
/// Skip and failure rows carry a `reason` and leave the partition, metric and
/// value columns empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub modality: Modality,
    pub n_dims: Option<usize>,
    pub target: String,
    pub target_kind: TargetKind,
    pub seed: u64,
    pub outer_fold: Option<usize>,
    pub partition: Option<Partition>,
    pub inner_fold: Option<usize>,
    pub shuffled: bool,
    pub shuffle_seed: Option<u64>,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub metric: Option<MetricName>,
    pub value: Option<f64>,
}

/// The identifying columns shared by every record of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordContext {
    pub modality: Modality,
    pub n_dims: Option<usize>,
    pub target: String,
    pub target_kind: TargetKind,
    pub seed: u64,
    pub outer_fold: Option<usize>,
    pub shuffled: bool,
    pub shuffle_seed: Option<u64>,
}

impl RecordContext {
    pub fn with_fold(&self, outer_fold: Option<usize>) -> Self {
        Self {
            outer_fold,
            ..self.clone()
        }
    }

    pub fn shuffled(&self, shuffle_seed: u64) -> Self {
        Self {
            shuffled: true,
            shuffle_seed: Some(shuffle_seed),
            ..self.clone()
        }
    }

    fn record(&self, status: RunStatus) -> MetricRecord {
        MetricRecord {
            modality: self.modality,
            n_dims: self.n_dims,
            target: self.target.clone(),
            target_kind: self.target_kind,
            seed: self.seed,
            outer_fold: self.outer_fold,
            partition: None,
            inner_fold: None,
            shuffled: self.shuffled,
            shuffle_seed: self.shuffle_seed,
            status,
            reason: None,
            metric: None,
            value: None,
        }
    }

    pub fn metric(
        &self,
        partition: Partition,
        inner_fold: Option<usize>,
        metric: MetricName,
        value: f64,
    ) -> MetricRecord {
        MetricRecord {
            partition: Some(partition),
            inner_fold,
            metric: Some(metric),
            value: Some(value),
            ..self.record(RunStatus::Ok)
        }
    }

    pub fn skipped(&self, reason: &str) -> MetricRecord {
        MetricRecord {
            reason: Some(reason.to_string()),
            ..self.record(RunStatus::Skipped)
        }
    }

    pub fn failed(&self, reason: &str) -> MetricRecord {
        MetricRecord {
            reason: Some(reason.to_string()),
            ..self.record(RunStatus::Failed)
        }
    }
}
