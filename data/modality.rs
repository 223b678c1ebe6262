use super::matrix::FeatureMatrix;
use super::sample_info::SampleInfo;
use super::table::DataError;
use crate::config::DataPaths;
use ahash::AHashSet;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The molecular data types a classifier can be trained on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum Modality {
    /// RNA-seq gene expression.
    #[serde(rename = "expression")]
    #[value(name = "expression")]
    Expression,
    /// Illumina HumanMethylation27 beta values.
    #[serde(rename = "me_27k")]
    #[value(name = "me_27k")]
    Me27k,
    /// Illumina HumanMethylation450 beta values.
    #[serde(rename = "me_450k")]
    #[value(name = "me_450k")]
    Me450k,
    /// Gene-level copy-number calls.
    #[serde(rename = "copy_number")]
    #[value(name = "copy_number")]
    CopyNumber,
    /// Per-sample mutational signature exposures.
    #[serde(rename = "mut_sigs")]
    #[value(name = "mut_sigs")]
    MutSigs,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Expression,
        Modality::Me27k,
        Modality::Me450k,
        Modality::CopyNumber,
        Modality::MutSigs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::Me27k => "me_27k",
            Self::Me450k => "me_450k",
            Self::CopyNumber => "copy_number",
            Self::MutSigs => "mut_sigs",
        }
    }

    /// Whether a low-dimensional (PCA) embedding of this modality is produced
    /// upstream.
    pub fn supports_compression(self) -> bool {
        matches!(self, Self::Expression | Self::Me27k | Self::Me450k)
    }

    /// File name of the feature matrix, relative to the data directory.
    pub fn features_file(self, n_dims: Option<usize>) -> Result<String, DataError> {
        match n_dims {
            None => Ok(format!("{}.tsv", self.name())),
            Some(n) if self.supports_compression() => Ok(format!("{}_pc{}.tsv", self.name(), n)),
            Some(n) => Err(DataError::NoCompressedRepresentation {
                modality: self.name().to_string(),
                n_dims: n,
            }),
        }
    }

    pub fn sample_info_file(self) -> String {
        format!("tcga_{}_sample_identifiers.tsv", self.name())
    }

    /// Raw methylation beta values are already bounded in [0, 1] and are fit as
    /// is; every other representation is z-scored.
    pub fn standardize_by_default(self, n_dims: Option<usize>) -> bool {
        match self {
            Self::Me27k | Self::Me450k => n_dims.is_some(),
            Self::Expression | Self::CopyNumber | Self::MutSigs => true,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves and loads the files belonging to one modality.
#[derive(Debug, Clone)]
pub struct ModalityStore {
    paths: DataPaths,
}

impl ModalityStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn features_path(
        &self,
        modality: Modality,
        n_dims: Option<usize>,
    ) -> Result<PathBuf, DataError> {
        match &self.paths.features {
            Some(path) => Ok(path.clone()),
            None => Ok(self.paths.data_dir.join(modality.features_file(n_dims)?)),
        }
    }

    pub fn sample_info_path(&self, modality: Modality) -> PathBuf {
        self.paths
            .sample_info
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join(modality.sample_info_file()))
    }

    /// Loads the feature matrix and drops every sample with a missing value.
    pub fn load_features(
        &self,
        modality: Modality,
        n_dims: Option<usize>,
    ) -> Result<FeatureMatrix, DataError> {
        let path = self.features_path(modality, n_dims)?;
        let (matrix, dropped) = FeatureMatrix::from_tsv(&path)?.drop_incomplete_samples()?;
        if !dropped.is_empty() {
            log::info!(
                "{}: {} of {} samples kept after dropping incomplete rows",
                modality,
                matrix.n_samples(),
                matrix.n_samples() + dropped.len()
            );
        }
        if matrix.n_samples() == 0 {
            return Err(DataError::EmptyTable(path));
        }
        Ok(matrix)
    }

    pub fn load_sample_info(&self, modality: Modality) -> Result<SampleInfo, DataError> {
        SampleInfo::load(&self.sample_info_path(modality))
    }

    /// Reads only the identifier column of a modality's feature file.
    pub fn sample_ids(
        &self,
        modality: Modality,
        n_dims: Option<usize>,
    ) -> Result<Vec<String>, DataError> {
        let dims = n_dims.filter(|_| modality.supports_compression());
        let path = self.paths.data_dir.join(modality.features_file(dims)?);
        read_first_column(&path)
    }

    /// Samples present in the feature files of every listed modality.
    pub fn overlapping_samples(
        &self,
        modalities: &[Modality],
        n_dims: Option<usize>,
    ) -> Result<Option<AHashSet<String>>, DataError> {
        let mut shared: Option<AHashSet<String>> = None;
        for &modality in modalities {
            log::debug!("Loading sample IDs for {} data", modality);
            let ids: AHashSet<String> = self.sample_ids(modality, n_dims)?.into_iter().collect();
            shared = Some(match shared {
                None => ids,
                Some(current) => current.intersection(&ids).cloned().collect(),
            });
        }
        Ok(shared)
    }
}

fn read_first_column(path: &Path) -> Result<Vec<String>, DataError> {
    let file = std::fs::File::open(path).map_err(|source| DataError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(0) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}
