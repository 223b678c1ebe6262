//! # Harness Configuration
//!
//! One explicit configuration object is passed into every component. It can
//! be read from a TOML file, overridden from the command line, and is written
//! next to the results as the experiment's `model_options` so every output
//! table can be traced back to the settings that produced it.

use crate::data::Modality;
use crate::split::Rounding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Test fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidTestFraction(f64),
    #[error("'{name}' must be at least 2, got {value}.")]
    TooFewFolds { name: &'static str, value: usize },
    #[error("The hyperparameter grid has no '{0}' values.")]
    EmptyGrid(&'static str),
    #[error("Regularization strength must be positive and finite, got {0}.")]
    InvalidAlpha(f64),
    #[error("The l1 ratio must lie in [0, 1], got {0}.")]
    InvalidL1Ratio(f64),
    #[error("Modality '{modality}' has no compressed representation (requested {n_dims} dimensions).")]
    NoCompressedRepresentation { modality: Modality, n_dims: usize },
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Input file locations. Every path that is not set explicitly is resolved
/// against `data_dir` using the conventional file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub features: Option<PathBuf>,
    pub sample_info: Option<PathBuf>,
    pub mutations: Option<PathBuf>,
    pub copy_gain: Option<PathBuf>,
    pub copy_loss: Option<PathBuf>,
    pub mutation_burden: Option<PathBuf>,
    pub gene_set: Option<PathBuf>,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            features: None,
            sample_info: None,
            mutations: None,
            copy_gain: None,
            copy_loss: None,
            mutation_burden: None,
            gene_set: None,
        }
    }
}

impl DataPaths {
    fn resolve(&self, explicit: &Option<PathBuf>, file_name: &str) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.clone()),
            None => {
                let path = self.data_dir.join(file_name);
                path.exists().then_some(path)
            }
        }
    }

    pub fn mutations_path(&self) -> Option<PathBuf> {
        self.resolve(&self.mutations, "mutation_calls.tsv")
    }

    pub fn copy_gain_path(&self) -> Option<PathBuf> {
        self.resolve(&self.copy_gain, "copy_gain_calls.tsv")
    }

    pub fn copy_loss_path(&self) -> Option<PathBuf> {
        self.resolve(&self.copy_loss, "copy_loss_calls.tsv")
    }

    pub fn mutation_burden_path(&self) -> Option<PathBuf> {
        self.resolve(&self.mutation_burden, "mutation_burden.tsv")
    }

    pub fn gene_set_path(&self) -> Option<PathBuf> {
        self.resolve(&self.gene_set, "vogelstein_genes.tsv")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    /// Outer stratified K-fold instead of a single holdout split.
    pub num_folds: Option<usize>,
    pub min_group_size: usize,
    pub rounding: Rounding,
    /// Subsample every cancer type in TRAIN to the size of the smallest one.
    /// The dropped samples take part in neither TRAIN nor TEST.
    pub subsample_to_smallest_cancer_type: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            num_folds: None,
            min_group_size: 2,
            rounding: Rounding::Nearest,
            subsample_to_smallest_cancer_type: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub alphas: Vec<f64>,
    pub l1_ratios: Vec<f64>,
    pub inner_folds: usize,
    pub max_iterations: usize,
    pub max_sweeps: usize,
    pub convergence_tolerance: f64,
    /// Keep only this many modality features, ranked by mean absolute
    /// deviation on TRAIN.
    pub subset_mad_genes: Option<usize>,
    /// Overrides the modality's standardization default.
    pub standardize: Option<bool>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            alphas: vec![1e-4, 1e-3, 1e-2, 1e-1, 1.0, 10.0],
            l1_ratios: vec![0.0, 0.05, 0.1, 0.3, 0.5, 1.0],
            inner_folds: 4,
            max_iterations: 100,
            max_sweeps: 1000,
            convergence_tolerance: 1e-6,
            subset_mad_genes: Some(8000),
            standardize: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub min_positive: usize,
    pub min_negative: usize,
    /// A cancer type is kept for a gene target only if it has more than
    /// `filter_count` positives and a positive proportion above `filter_prop`.
    pub filter_count: usize,
    pub filter_prop: f64,
    /// Samples whose log10 mutation burden reaches this many standard
    /// deviations are dropped from gene targets.
    pub hyper_filter: Option<f64>,
    pub include_copy: bool,
    pub add_cancer_type_covariate: bool,
    pub add_burden_covariate: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            min_positive: 5,
            min_negative: 5,
            filter_count: 15,
            filter_prop: 0.05,
            hyper_filter: Some(5.0),
            include_copy: true,
            add_cancer_type_covariate: true,
            add_burden_covariate: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_preds: bool,
    pub skip_existing: bool,
    pub parallel_targets: bool,
}

/// Everything a sweep needs besides the data itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub results_dir: PathBuf,
    pub modality: Modality,
    pub n_dims: Option<usize>,
    pub seed: u64,
    /// Restrict samples to those present in every listed modality.
    pub overlap: Vec<Modality>,
    pub paths: DataPaths,
    pub split: SplitConfig,
    pub model: ModelConfig,
    pub target: TargetConfig,
    pub output: OutputConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            modality: Modality::Expression,
            n_dims: None,
            seed: 42,
            overlap: Vec::new(),
            paths: DataPaths::default(),
            split: SplitConfig::default(),
            model: ModelConfig::default(),
            target: TargetConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Rejects settings that would make every run fail. Called once before a
    /// sweep starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = self.split.test_fraction;
        if !(f.is_finite() && f > 0.0 && f < 1.0) {
            return Err(ConfigError::InvalidTestFraction(f));
        }
        if let Some(k) = self.split.num_folds {
            if k < 2 {
                return Err(ConfigError::TooFewFolds {
                    name: "num_folds",
                    value: k,
                });
            }
        }
        if self.model.inner_folds < 2 {
            return Err(ConfigError::TooFewFolds {
                name: "inner_folds",
                value: self.model.inner_folds,
            });
        }
        if self.split.min_group_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_group_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.model.alphas.is_empty() {
            return Err(ConfigError::EmptyGrid("alphas"));
        }
        if self.model.l1_ratios.is_empty() {
            return Err(ConfigError::EmptyGrid("l1_ratios"));
        }
        if let Some(&alpha) = self
            .model
            .alphas
            .iter()
            .find(|a| !(a.is_finite() && **a > 0.0))
        {
            return Err(ConfigError::InvalidAlpha(alpha));
        }
        if let Some(&ratio) = self
            .model
            .l1_ratios
            .iter()
            .find(|r| !(0.0..=1.0).contains(*r))
        {
            return Err(ConfigError::InvalidL1Ratio(ratio));
        }
        if self.model.max_iterations == 0 || self.model.max_sweeps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_iterations",
                message: "solver iteration limits must be positive".to_string(),
            });
        }
        if !(self.model.convergence_tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "convergence_tolerance",
                message: format!("must be positive, got {}", self.model.convergence_tolerance),
            });
        }
        if self.model.subset_mad_genes == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "subset_mad_genes",
                message: "must keep at least one feature".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.target.filter_prop) {
            return Err(ConfigError::InvalidValue {
                field: "filter_prop",
                message: format!("must lie in [0, 1), got {}", self.target.filter_prop),
            });
        }
        if let Some(h) = self.target.hyper_filter {
            if !(h.is_finite() && h > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "hyper_filter",
                    message: format!("must be positive, got {h}"),
                });
            }
        }
        if let Some(n_dims) = self.n_dims {
            for &modality in std::iter::once(&self.modality).chain(&self.overlap) {
                if !modality.supports_compression() {
                    return Err(ConfigError::NoCompressedRepresentation { modality, n_dims });
                }
            }
        }
        Ok(())
    }

    /// Whether modality features are z-scored before fitting.
    pub fn standardize_features(&self) -> bool {
        self.model
            .standardize
            .unwrap_or_else(|| self.modality.standardize_by_default(self.n_dims))
    }

    /// Saves the configuration to a human-readable TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(HarnessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        for fraction in [0.0, 1.0, -0.5, f64::NAN] {
            let mut config = HarnessConfig::default();
            config.split.test_fraction = fraction;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidTestFraction(_))
            ));
        }
    }

    #[test]
    fn test_rejects_dims_on_uncompressible_modality() {
        let config = HarnessConfig {
            modality: Modality::MutSigs,
            n_dims: Some(10),
            ..HarnessConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoCompressedRepresentation {
                modality: Modality::MutSigs,
                n_dims: 10
            })
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_options.toml");
        let mut config = HarnessConfig {
            modality: Modality::Me27k,
            n_dims: Some(100),
            seed: 7,
            overlap: vec![Modality::Expression, Modality::Me27k],
            ..HarnessConfig::default()
        };
        config.split.num_folds = Some(4);
        config.split.rounding = Rounding::Floor;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.modality, Modality::Me27k);
        assert_eq!(loaded.n_dims, Some(100));
        assert_eq!(loaded.overlap, config.overlap);
        assert_eq!(loaded.split.num_folds, Some(4));
        assert_eq!(loaded.split.rounding, Rounding::Floor);
        assert_eq!(loaded.model.alphas, config.model.alphas);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "seed = 3\n[split]\ntest_fraction = 0.25\n").unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.seed, 3);
        assert_eq!(config.split.test_fraction, 0.25);
        assert_eq!(config.split.min_group_size, 2);
        assert_eq!(config.model.inner_folds, 4);
    }

    #[test]
    fn test_raw_methylation_not_standardized() {
        let config = HarnessConfig {
            modality: Modality::Me450k,
            ..HarnessConfig::default()
        };
        assert!(!config.standardize_features());
        let forced = HarnessConfig {
            model: ModelConfig {
                standardize: Some(true),
                ..ModelConfig::default()
            },
            ..config
        };
        assert!(forced.standardize_features());
    }
}
