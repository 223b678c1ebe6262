//! # Target Builder
//!
//! Turns a target description (a cancer type, or a gene plus the alteration
//! types that count as "altered") into one boolean label per sample. Every
//! exclusion happens here, before any split is drawn, and is reported with the
//! reason it was applied.

use super::alterations::{AlterationSet, AlterationTables, AlterationType};
use super::sample_info::SampleInfo;
use super::table::DataError;
use crate::config::TargetConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Gene,
    CancerType,
}

impl TargetKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gene => "gene",
            Self::CancerType => "cancer_type",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a run is trying to predict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSpec {
    /// One-vs-rest membership in a cancer type.
    CancerType(String),
    /// Alteration status of a gene. `alterations` overrides the set derived
    /// from the curated gene list.
    Gene {
        symbol: String,
        alterations: Option<AlterationSet>,
    },
}

impl TargetSpec {
    pub fn gene(symbol: &str) -> Self {
        Self::Gene {
            symbol: symbol.to_string(),
            alterations: None,
        }
    }

    pub fn cancer_type(code: &str) -> Self {
        Self::CancerType(code.to_string())
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::CancerType(code) => code,
            Self::Gene { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Self::CancerType(_) => TargetKind::CancerType,
            Self::Gene { .. } => TargetKind::Gene,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusionReason {
    MissingMutationCall,
    MissingCopyCall,
    MissingMutationBurden,
    Hypermutated,
    CancerTypeFiltered,
}

impl ExclusionReason {
    pub fn tag(self) -> &'static str {
        match self {
            Self::MissingMutationCall => "missing_mutation_call",
            Self::MissingCopyCall => "missing_copy_call",
            Self::MissingMutationBurden => "missing_mutation_burden",
            Self::Hypermutated => "hypermutated",
            Self::CancerTypeFiltered => "cancer_type_filtered",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassBalance {
    pub positives: usize,
    pub negatives: usize,
}

impl ClassBalance {
    pub fn from_labels(status: &[bool]) -> Self {
        let positives = status.iter().filter(|&&s| s).count();
        Self {
            positives,
            negatives: status.len() - positives,
        }
    }

    pub fn total(&self) -> usize {
        self.positives + self.negatives
    }

    pub fn check(&self, min_positive: usize, min_negative: usize) -> Result<(), TargetError> {
        if self.positives < min_positive {
            return Err(TargetError::TooFewPositives {
                found: self.positives,
                required: min_positive,
            });
        }
        if self.negatives < min_negative {
            return Err(TargetError::TooFewNegatives {
                found: self.negatives,
                required: min_negative,
            });
        }
        Ok(())
    }
}

/// Positive count and proportion of a gene target within one cancer type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancerTypeStats {
    pub cancer_type: String,
    pub count: usize,
    pub positives: usize,
    pub proportion: f64,
    pub included: bool,
}

/// The labels for one target, restricted to the samples that survived every
/// exclusion rule. `sample_ids`, `status` and `log10_mut` are aligned.
#[derive(Debug, Clone)]
pub struct TargetLabels {
    pub spec: TargetSpec,
    pub alterations: AlterationSet,
    pub sample_ids: Vec<String>,
    pub status: Vec<bool>,
    pub log10_mut: Option<Vec<f64>>,
    pub excluded: Vec<(String, ExclusionReason)>,
    pub balance: ClassBalance,
    pub cancer_type_stats: Vec<CancerTypeStats>,
}

impl TargetLabels {
    pub fn kind(&self) -> TargetKind {
        self.spec.kind()
    }

    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Cancer type '{0}' does not occur in the sample metadata.")]
    UnknownCancerType(String),
    #[error("Gene '{0}' has no calls in the alteration tables.")]
    UnknownGene(String),
    #[error("Alteration type '{0}' was requested but no table for it was provided.")]
    MissingAlterationSource(AlterationType),
    #[error("No alteration types count as altered for gene '{0}'.")]
    EmptyAlterationSet(String),
    #[error("Gene targets need alteration tables, but none were loaded.")]
    NoAlterationTables,
    #[error("A mutation burden table is required for the hypermutation filter and covariate.")]
    MissingMutationBurden,
    #[error("Only {found} positive samples (at least {required} required).")]
    TooFewPositives { found: usize, required: usize },
    #[error("Only {found} negative samples (at least {required} required).")]
    TooFewNegatives { found: usize, required: usize },
    #[error(transparent)]
    Data(#[from] DataError),
}

impl TargetError {
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::MissingAlterationSource(_)
            | Self::EmptyAlterationSet(_)
            | Self::NoAlterationTables
            | Self::MissingMutationBurden => true,
            Self::Data(e) => e.is_configuration(),
            Self::UnknownCancerType(_)
            | Self::UnknownGene(_)
            | Self::TooFewPositives { .. }
            | Self::TooFewNegatives { .. } => false,
        }
    }

    /// Short machine-readable reason written to skip records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownCancerType(_) => "unknown_cancer_type",
            Self::UnknownGene(_) => "unknown_gene",
            Self::MissingAlterationSource(_) | Self::NoAlterationTables => {
                "missing_alteration_source"
            }
            Self::EmptyAlterationSet(_) => "empty_alteration_set",
            Self::MissingMutationBurden => "missing_mutation_burden",
            Self::TooFewPositives { .. } => "too_few_positives",
            Self::TooFewNegatives { .. } => "too_few_negatives",
            Self::Data(_) => "data_error",
        }
    }
}

pub struct TargetBuilder<'a> {
    sample_info: &'a SampleInfo,
    alterations: Option<&'a AlterationTables>,
    config: &'a TargetConfig,
}

impl<'a> TargetBuilder<'a> {
    pub fn new(
        sample_info: &'a SampleInfo,
        alterations: Option<&'a AlterationTables>,
        config: &'a TargetConfig,
    ) -> Self {
        Self {
            sample_info,
            alterations,
            config,
        }
    }

    pub fn build_target(&self, spec: &TargetSpec) -> Result<TargetLabels, TargetError> {
        let labels = match spec {
            TargetSpec::CancerType(code) => self.build_cancer_type(spec, code)?,
            TargetSpec::Gene {
                symbol,
                alterations,
            } => self.build_gene(spec, symbol, alterations.as_ref())?,
        };
        log::info!(
            "Target {} ({}): {} positives, {} negatives, {} samples excluded",
            spec.identifier(),
            spec.kind(),
            labels.balance.positives,
            labels.balance.negatives,
            labels.excluded.len()
        );
        Ok(labels)
    }

    fn build_cancer_type(&self, spec: &TargetSpec, code: &str) -> Result<TargetLabels, TargetError> {
        if !self.sample_info.cancer_types().contains(code) {
            return Err(TargetError::UnknownCancerType(code.to_string()));
        }

        let (sample_ids, status): (Vec<String>, Vec<bool>) = self
            .sample_info
            .iter()
            .map(|(id, record)| (id.to_string(), record.cancer_type == code))
            .unzip();

        Ok(TargetLabels {
            spec: spec.clone(),
            alterations: AlterationSet::new(),
            balance: ClassBalance::from_labels(&status),
            sample_ids,
            status,
            log10_mut: None,
            excluded: Vec::new(),
            cancer_type_stats: Vec::new(),
        })
    }

    fn build_gene(
        &self,
        spec: &TargetSpec,
        symbol: &str,
        explicit: Option<&AlterationSet>,
    ) -> Result<TargetLabels, TargetError> {
        let tables = self.alterations.ok_or(TargetError::NoAlterationTables)?;
        let alterations = tables.alterations_for(symbol, explicit, self.config.include_copy);
        if alterations.is_empty() {
            return Err(TargetError::EmptyAlterationSet(symbol.to_string()));
        }

        let mut sources = Vec::with_capacity(alterations.len());
        for &alteration in &alterations {
            let table = tables
                .source(alteration)
                .ok_or(TargetError::MissingAlterationSource(alteration))?;
            let calls = table
                .calls(symbol)?
                .ok_or_else(|| TargetError::UnknownGene(symbol.to_string()))?;
            sources.push((alteration, calls));
        }

        let needs_burden = self.config.hyper_filter.is_some() || self.config.add_burden_covariate;
        let burden = match (&tables.burden, needs_burden) {
            (Some(burden), _) => Some(burden),
            (None, true) => return Err(TargetError::MissingMutationBurden),
            (None, false) => None,
        };

        // Label every sample with determinate calls for the whole alteration set.
        let mut excluded = Vec::new();
        let mut candidates: Vec<(String, &str, bool, Option<f64>)> = Vec::new();
        'samples: for (id, record) in self.sample_info.iter() {
            let mut altered = false;
            for (alteration, calls) in &sources {
                match calls.get(id) {
                    Some(&call) => altered |= call,
                    None => {
                        let reason = match alteration {
                            AlterationType::Mutation => ExclusionReason::MissingMutationCall,
                            AlterationType::CopyGain | AlterationType::CopyLoss => {
                                ExclusionReason::MissingCopyCall
                            }
                        };
                        excluded.push((id.to_string(), reason));
                        continue 'samples;
                    }
                }
            }
            let log10_mut = match burden {
                Some(burden) => match burden.get(id) {
                    Some(value) => Some(value),
                    None => {
                        excluded.push((id.to_string(), ExclusionReason::MissingMutationBurden));
                        continue;
                    }
                },
                None => None,
            };
            candidates.push((id.to_string(), record.cancer_type.as_str(), altered, log10_mut));
        }

        let cancer_type_stats = self.cancer_type_stats(&candidates);
        let included: Vec<&str> = cancer_type_stats
            .iter()
            .filter(|stats| stats.included)
            .map(|stats| stats.cancer_type.as_str())
            .collect();

        let burden_cutoff = match (self.config.hyper_filter, burden) {
            (Some(factor), Some(_)) => {
                let values: Vec<f64> = candidates.iter().filter_map(|c| c.3).collect();
                Some(factor * sample_std(&values))
            }
            _ => None,
        };

        let mut sample_ids = Vec::with_capacity(candidates.len());
        let mut status = Vec::with_capacity(candidates.len());
        let mut log10_mut = Vec::with_capacity(candidates.len());
        for (id, cancer_type, altered, burden_value) in candidates {
            if let (Some(cutoff), Some(value)) = (burden_cutoff, burden_value) {
                if value >= cutoff {
                    excluded.push((id, ExclusionReason::Hypermutated));
                    continue;
                }
            }
            if !included.contains(&cancer_type) {
                excluded.push((id, ExclusionReason::CancerTypeFiltered));
                continue;
            }
            sample_ids.push(id);
            status.push(altered);
            if let Some(value) = burden_value {
                log10_mut.push(value);
            }
        }

        log::debug!(
            "{}: {} of {} cancer types pass the count/proportion filter",
            symbol,
            included.len(),
            cancer_type_stats.len()
        );

        Ok(TargetLabels {
            spec: spec.clone(),
            alterations,
            balance: ClassBalance::from_labels(&status),
            sample_ids,
            status,
            log10_mut: burden.map(|_| log10_mut),
            excluded,
            cancer_type_stats,
        })
    }

    fn cancer_type_stats(
        &self,
        candidates: &[(String, &str, bool, Option<f64>)],
    ) -> Vec<CancerTypeStats> {
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (_, cancer_type, altered, _) in candidates {
            let entry = counts.entry(*cancer_type).or_default();
            entry.0 += 1;
            if *altered {
                entry.1 += 1;
            }
        }
        counts
            .into_iter()
            .map(|(cancer_type, (count, positives))| {
                let proportion = positives as f64 / count as f64;
                CancerTypeStats {
                    cancer_type: cancer_type.to_string(),
                    count,
                    positives,
                    proportion,
                    included: positives > self.config.filter_count
                        && proportion > self.config.filter_prop,
                }
            })
            .collect()
    }
}

/// Sample standard deviation (n - 1 denominator). Zero for fewer than two
/// values.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (n - 1.0)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::alterations::{GeneClass, GeneSet, MutationBurden, StatusTable};
    use crate::data::sample_info::SampleRecord;
    use approx::assert_abs_diff_eq;

    fn sample_info(n_per_type: usize, types: &[&str]) -> SampleInfo {
        SampleInfo::from_records(types.iter().flat_map(|t| {
            (0..n_per_type).map(move |i| {
                (
                    format!("{t}-{i:03}"),
                    SampleRecord::new(t, "TP", None),
                )
            })
        }))
    }

    fn permissive_config() -> TargetConfig {
        TargetConfig {
            filter_count: 0,
            filter_prop: 0.0,
            hyper_filter: None,
            add_burden_covariate: false,
            ..TargetConfig::default()
        }
    }

    #[test]
    fn test_cancer_type_is_one_vs_rest() {
        let info = sample_info(3, &["BRCA", "LUAD"]);
        let config = TargetConfig::default();
        let labels = TargetBuilder::new(&info, None, &config)
            .build_target(&TargetSpec::cancer_type("LUAD"))
            .unwrap();

        assert_eq!(labels.balance, ClassBalance { positives: 3, negatives: 3 });
        assert!(labels.excluded.is_empty());
        let positives: Vec<_> = labels
            .sample_ids
            .iter()
            .zip(&labels.status)
            .filter(|(_, s)| **s)
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(positives, vec!["LUAD-000", "LUAD-001", "LUAD-002"]);
    }

    #[test]
    fn test_unknown_cancer_type_is_not_a_configuration_error() {
        let info = sample_info(2, &["BRCA"]);
        let config = TargetConfig::default();
        let err = TargetBuilder::new(&info, None, &config)
            .build_target(&TargetSpec::cancer_type("XXXX"))
            .unwrap_err();
        assert!(matches!(err, TargetError::UnknownCancerType(_)));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_gene_label_combines_mutation_and_loss() {
        let info = sample_info(4, &["BRCA"]);
        let ids: Vec<String> = info.sample_ids().map(str::to_string).collect();
        let tables = AlterationTables {
            mutation: Some(
                StatusTable::from_calls(
                    &[("TP53", vec![Some(true), Some(false), Some(false), None])],
                    ids.clone(),
                )
                .unwrap(),
            ),
            copy_loss: Some(
                StatusTable::from_calls(
                    &[("TP53", vec![Some(false), Some(true), Some(false), Some(true)])],
                    ids,
                )
                .unwrap(),
            ),
            genes: Some(GeneSet::from_genes([(
                "TP53".to_string(),
                GeneClass::TumorSuppressor,
            )])),
            ..AlterationTables::default()
        };
        let config = permissive_config();
        let labels = TargetBuilder::new(&info, Some(&tables), &config)
            .build_target(&TargetSpec::gene("TP53"))
            .unwrap();

        assert_eq!(labels.status, vec![true, true, false]);
        assert_eq!(
            labels.excluded,
            vec![("BRCA-003".to_string(), ExclusionReason::MissingMutationCall)]
        );
        assert!(labels.alterations.contains(&AlterationType::CopyLoss));
    }

    #[test]
    fn test_requested_copy_source_must_exist() {
        let info = sample_info(2, &["BRCA"]);
        let ids: Vec<String> = info.sample_ids().map(str::to_string).collect();
        let tables = AlterationTables {
            mutation: Some(
                StatusTable::from_calls(&[("KRAS", vec![Some(true), Some(false)])], ids).unwrap(),
            ),
            genes: Some(GeneSet::from_genes([("KRAS".to_string(), GeneClass::Oncogene)])),
            ..AlterationTables::default()
        };
        let config = permissive_config();
        let err = TargetBuilder::new(&info, Some(&tables), &config)
            .build_target(&TargetSpec::gene("KRAS"))
            .unwrap_err();
        assert!(matches!(
            err,
            TargetError::MissingAlterationSource(AlterationType::CopyGain)
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_explicit_empty_alteration_set_is_a_configuration_error() {
        let info = sample_info(6, &["BRCA"]);
        let ids: Vec<String> = info.sample_ids().map(str::to_string).collect();
        let calls = (0..6).map(|i| Some(i < 3)).collect();
        let tables = AlterationTables {
            mutation: Some(StatusTable::from_calls(&[("TP53", calls)], ids).unwrap()),
            ..AlterationTables::default()
        };
        let config = permissive_config();
        let spec = TargetSpec::Gene {
            symbol: "TP53".to_string(),
            alterations: Some(AlterationSet::new()),
        };
        let err = TargetBuilder::new(&info, Some(&tables), &config)
            .build_target(&spec)
            .unwrap_err();
        assert!(matches!(err, TargetError::EmptyAlterationSet(ref gene) if gene == "TP53"));
        assert!(err.is_configuration());
        assert_eq!(err.reason(), "empty_alteration_set");
    }

    #[test]
    fn test_cancer_type_filter_uses_count_and_proportion() {
        // BRCA: 20 of 40 mutated; LUAD: 3 of 40 mutated.
        let info = sample_info(40, &["BRCA", "LUAD"]);
        let ids: Vec<String> = info.sample_ids().map(str::to_string).collect();
        let calls: Vec<Option<bool>> = ids
            .iter()
            .map(|id| {
                let i: usize = id[5..].parse().unwrap();
                Some(if id.starts_with("BRCA") { i < 20 } else { i < 3 })
            })
            .collect();
        let tables = AlterationTables {
            mutation: Some(StatusTable::from_calls(&[("PIK3CA", calls)], ids).unwrap()),
            ..AlterationTables::default()
        };
        let config = TargetConfig {
            include_copy: false,
            hyper_filter: None,
            add_burden_covariate: false,
            ..TargetConfig::default()
        };
        let labels = TargetBuilder::new(&info, Some(&tables), &config)
            .build_target(&TargetSpec::gene("PIK3CA"))
            .unwrap();

        assert_eq!(labels.len(), 40);
        assert_eq!(labels.balance, ClassBalance { positives: 20, negatives: 20 });
        let luad = &labels.cancer_type_stats[1];
        assert_eq!(luad.cancer_type, "LUAD");
        assert!(!luad.included);
        assert_abs_diff_eq!(luad.proportion, 3.0 / 40.0, epsilon = 1e-12);
        assert!(
            labels
                .excluded
                .iter()
                .all(|(_, reason)| *reason == ExclusionReason::CancerTypeFiltered)
        );
    }

    #[test]
    fn test_hypermutated_samples_excluded() {
        let info = sample_info(10, &["SKCM"]);
        let ids: Vec<String> = info.sample_ids().map(str::to_string).collect();
        let calls = (0..10).map(|i| Some(i % 2 == 0)).collect();
        let burden = MutationBurden::from_values(
            ids.iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), if i == 9 { 40.0 } else { 1.0 })),
        );
        let tables = AlterationTables {
            mutation: Some(StatusTable::from_calls(&[("BRAF", calls)], ids).unwrap()),
            burden: Some(burden),
            ..AlterationTables::default()
        };
        let config = TargetConfig {
            include_copy: false,
            filter_count: 0,
            filter_prop: 0.0,
            hyper_filter: Some(2.0),
            ..TargetConfig::default()
        };
        let labels = TargetBuilder::new(&info, Some(&tables), &config)
            .build_target(&TargetSpec::gene("BRAF"))
            .unwrap();

        assert_eq!(labels.len(), 9);
        assert_eq!(
            labels.excluded,
            vec![("SKCM-009".to_string(), ExclusionReason::Hypermutated)]
        );
        assert_eq!(labels.log10_mut.as_ref().map(Vec::len), Some(9));
    }

    #[test]
    fn test_balance_check_reports_shortfall() {
        let balance = ClassBalance { positives: 1, negatives: 499 };
        let err = balance.check(5, 5).unwrap_err();
        assert_eq!(err.reason(), "too_few_positives");
        assert!(balance.check(1, 5).is_ok());
    }
}
