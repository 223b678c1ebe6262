//! # Stratified Splitter
//!
//! Partitions samples into TRAIN and TEST (or into K folds) so that every
//! stratification group contributes its share of TEST samples. Within a group,
//! members are ordered by a seeded priority derived from `(seed, sample_id)`
//! alone, which makes a split:
//!
//! - deterministic for a given key map, fraction and seed,
//! - independent of the order the samples were enumerated in,
//! - stable under restriction: dropping samples never reorders the others, so a
//!   split of one modality is reproduced on another restricted to the overlap.

use crate::seeding::sample_priority;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Sample id → stratification key.
pub type StrataMap = BTreeMap<String, String>;

/// How the per-group test count `test_fraction × group_size` is rounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Round half away from zero.
    #[default]
    Nearest,
    Floor,
    Ceil,
}

// Guards against 0.2 * 60 = 12.000000000000002 rounding up under `Ceil`.
const ROUNDING_SLACK: f64 = 1e-9;

impl Rounding {
    pub fn apply(self, x: f64) -> usize {
        let rounded = match self {
            Self::Nearest => x.round(),
            Self::Floor => (x + ROUNDING_SLACK).floor(),
            Self::Ceil => (x - ROUNDING_SLACK).ceil(),
        };
        rounded.max(0.0) as usize
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Test fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidTestFraction(f64),
    #[error("Cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),
    #[error("No eligible samples to split.")]
    EmptySampleSet,
    #[error("Fold {fold} of {k} received no test samples ({n_samples} eligible samples).")]
    EmptyFold {
        fold: usize,
        k: usize,
        n_samples: usize,
    },
}

impl SplitError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidTestFraction(_) | Self::TooFewFolds(_))
    }
}

/// One TRAIN/TEST partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Sorted sample ids.
    pub train: Vec<String>,
    /// Sorted sample ids.
    pub test: Vec<String>,
    /// Stratification keys whose groups were too small to contribute to TEST.
    pub excluded_from_test: Vec<String>,
    pub seed: u64,
    /// Fold index for K-fold partitions, `None` for a holdout split.
    pub fold: Option<usize>,
}

impl Split {
    pub fn n_samples(&self) -> usize {
        self.train.len() + self.test.len()
    }

    /// Cuts every TRAIN group (as named by `groups`) down to the size of the
    /// smallest one, keeping members in seeded priority order. TEST is left
    /// alone. Returns the number of TRAIN samples dropped.
    pub fn subsample_train_groups(&mut self, groups: &StrataMap, seed: u64) -> usize {
        let mut by_group: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for id in &self.train {
            if let Some(group) = groups.get(id) {
                by_group.entry(group.as_str()).or_default().push(id.as_str());
            }
        }
        let Some(smallest) = by_group.values().map(Vec::len).min() else {
            return 0;
        };
        let mut kept: Vec<String> = by_group
            .into_values()
            .flat_map(|members| {
                order_group(members, seed)
                    .into_iter()
                    .take(smallest)
                    .map(str::to_string)
            })
            .collect();
        kept.sort_unstable();
        let dropped = self.train.len() - kept.len();
        self.train = kept;
        dropped
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StratifiedSplitter {
    pub min_group_size: usize,
    pub rounding: Rounding,
}

impl Default for StratifiedSplitter {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            rounding: Rounding::Nearest,
        }
    }
}

impl StratifiedSplitter {
    pub fn new(min_group_size: usize, rounding: Rounding) -> Self {
        Self {
            min_group_size,
            rounding,
        }
    }

    /// Number of TEST members for a group of `group_size`. A group that is
    /// eligible for TEST always keeps at least one TRAIN member.
    pub fn test_count(&self, group_size: usize, test_fraction: f64) -> usize {
        if group_size < self.min_group_size.max(1) {
            return 0;
        }
        let count = self.rounding.apply(test_fraction * group_size as f64);
        count.min(group_size.saturating_sub(1))
    }

    pub fn split(
        &self,
        strata: &StrataMap,
        test_fraction: f64,
        seed: u64,
    ) -> Result<Split, SplitError> {
        if !(test_fraction.is_finite() && test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(SplitError::InvalidTestFraction(test_fraction));
        }
        if strata.is_empty() {
            return Err(SplitError::EmptySampleSet);
        }

        let mut train = Vec::with_capacity(strata.len());
        let mut test = Vec::new();
        let mut excluded_from_test = Vec::new();

        for (key, members) in group_by_key(strata) {
            if members.len() < self.min_group_size {
                log::debug!(
                    "Stratification group '{}' has {} samples (< {}); kept in TRAIN",
                    key,
                    members.len(),
                    self.min_group_size
                );
                excluded_from_test.push(key.to_string());
                train.extend(members.into_iter().map(str::to_string));
                continue;
            }
            let n_test = self.test_count(members.len(), test_fraction);
            let ordered = order_group(members, seed);
            test.extend(ordered[..n_test].iter().map(|id| id.to_string()));
            train.extend(ordered[n_test..].iter().map(|id| id.to_string()));
        }

        if !excluded_from_test.is_empty() {
            log::info!(
                "{} stratification groups below the minimum size of {} were excluded from TEST",
                excluded_from_test.len(),
                self.min_group_size
            );
        }

        train.sort_unstable();
        test.sort_unstable();
        Ok(Split {
            train,
            test,
            excluded_from_test,
            seed,
            fold: None,
        })
    }

    /// Stratified K-fold partitions. Rank `r` of each group goes to fold
    /// `(offset + r) mod k`; the offset carries over from one group to the next
    /// (in key order) so fold sizes stay balanced even when every group is
    /// smaller than `k`.
    pub fn k_fold(&self, strata: &StrataMap, k: usize, seed: u64) -> Result<Vec<Split>, SplitError> {
        if k < 2 {
            return Err(SplitError::TooFewFolds(k));
        }
        if strata.is_empty() {
            return Err(SplitError::EmptySampleSet);
        }

        let mut folds: Vec<Vec<&str>> = vec![Vec::new(); k];
        let mut always_train: Vec<&str> = Vec::new();
        let mut excluded_from_test = Vec::new();
        let mut offset = 0usize;

        for (key, members) in group_by_key(strata) {
            if members.len() < self.min_group_size {
                excluded_from_test.push(key.to_string());
                always_train.extend(members);
                continue;
            }
            let n = members.len();
            for (rank, id) in order_group(members, seed).into_iter().enumerate() {
                folds[(offset + rank) % k].push(id);
            }
            offset = (offset + n) % k;
        }

        let n_samples = strata.len();
        let mut splits = Vec::with_capacity(k);
        for fold in 0..k {
            if folds[fold].is_empty() {
                return Err(SplitError::EmptyFold { fold, k, n_samples });
            }
            let mut test: Vec<String> = folds[fold].iter().map(|id| id.to_string()).collect();
            let mut train: Vec<String> = folds
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != fold)
                .flat_map(|(_, ids)| ids.iter())
                .chain(always_train.iter())
                .map(|id| id.to_string())
                .collect();
            train.sort_unstable();
            test.sort_unstable();
            splits.push(Split {
                train,
                test,
                excluded_from_test: excluded_from_test.clone(),
                seed,
                fold: Some(fold),
            });
        }
        Ok(splits)
    }
}

fn group_by_key(strata: &StrataMap) -> BTreeMap<&str, Vec<&str>> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, key) in strata {
        groups.entry(key.as_str()).or_default().push(id.as_str());
    }
    groups
}

/// Orders group members by seeded priority, ties broken by id.
pub(crate) fn order_group(mut members: Vec<&str>, seed: u64) -> Vec<&str> {
    members.sort_by_cached_key(|id| (sample_priority(seed, id), *id));
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;

    fn two_type_strata() -> StrataMap {
        (0..100)
            .map(|i| {
                let key = if i < 60 { "A" } else { "B" };
                (format!("S{i:03}"), key.to_string())
            })
            .collect()
    }

    fn count_key(ids: &[String], strata: &StrataMap, key: &str) -> usize {
        ids.iter().filter(|id| strata[*id] == key).count()
    }

    #[test]
    fn test_sixty_forty_holdout() {
        let strata = two_type_strata();
        let split = StratifiedSplitter::default().split(&strata, 0.2, 42).unwrap();

        assert_eq!(count_key(&split.test, &strata, "A"), 12);
        assert_eq!(count_key(&split.test, &strata, "B"), 8);
        assert_eq!(split.train.len(), 80);
        assert!(split.excluded_from_test.is_empty());
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let strata = two_type_strata();
        for seed in 0..20 {
            let split = StratifiedSplitter::default().split(&strata, 0.3, seed).unwrap();
            let train: AHashSet<&String> = split.train.iter().collect();
            let test: AHashSet<&String> = split.test.iter().collect();
            assert!(train.is_disjoint(&test));
            assert_eq!(train.len() + test.len(), strata.len());
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let strata = two_type_strata();
        let splitter = StratifiedSplitter::default();
        let a = splitter.split(&strata, 0.2, 7).unwrap();
        let b = splitter.split(&strata, 0.2, 7).unwrap();
        let c = splitter.split(&strata, 0.2, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_small_groups_forced_into_train() {
        let mut strata = two_type_strata();
        strata.insert("RARE-1".to_string(), "C".to_string());
        let split = StratifiedSplitter::default().split(&strata, 0.2, 1).unwrap();
        assert_eq!(split.excluded_from_test, vec!["C".to_string()]);
        assert!(split.train.contains(&"RARE-1".to_string()));
    }

    #[test]
    fn test_group_fraction_within_tolerance() {
        let splitter = StratifiedSplitter::default();
        for size in 10..200 {
            for fraction in [0.1, 0.2, 0.25, 0.33] {
                let n_test = splitter.test_count(size, fraction);
                let deviation = (n_test as f64 / size as f64 - fraction).abs();
                assert!(deviation <= 0.5 / size as f64 + 1e-12);
                assert!(deviation <= 0.05 + 1e-12);
            }
        }
    }

    #[test]
    fn test_rounding_rules() {
        assert_eq!(Rounding::Nearest.apply(2.5), 3);
        assert_eq!(Rounding::Floor.apply(0.2 * 60.0), 12);
        assert_eq!(Rounding::Ceil.apply(0.2 * 60.0), 12);
        assert_eq!(Rounding::Ceil.apply(0.2 * 61.0), 13);
        let floor = StratifiedSplitter::new(2, Rounding::Floor);
        assert_eq!(floor.test_count(9, 0.2), 1);
        // A group of two never loses both members to TEST.
        let ceil = StratifiedSplitter::new(2, Rounding::Ceil);
        assert_eq!(ceil.test_count(2, 0.9), 1);
    }

    #[test]
    fn test_restriction_preserves_relative_order() {
        let ids: Vec<String> = (0..50).map(|i| format!("S{i}")).collect();
        let full = order_group(ids.iter().map(String::as_str).collect(), 11);
        let subset: Vec<&str> = ids.iter().step_by(3).map(String::as_str).collect();
        let restricted = order_group(subset.clone(), 11);
        let expected: Vec<&str> = full.into_iter().filter(|id| subset.contains(id)).collect();
        assert_eq!(restricted, expected);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let strata = two_type_strata();
        let err = StratifiedSplitter::default()
            .split(&strata, 1.0, 1)
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            StratifiedSplitter::default().split(&StrataMap::new(), 0.2, 1),
            Err(SplitError::EmptySampleSet)
        );
    }

    #[test]
    fn test_k_fold_covers_every_sample_once() {
        let strata = two_type_strata();
        let folds = StratifiedSplitter::default().k_fold(&strata, 4, 3).unwrap();
        assert_eq!(folds.len(), 4);

        let mut seen: Vec<&String> = folds.iter().flat_map(|f| f.test.iter()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 100);
        for fold in &folds {
            assert_eq!(fold.test.len(), 25);
            assert_eq!(count_key(&fold.test, &strata, "A"), 15);
            assert_eq!(fold.n_samples(), 100);
        }
    }

    #[test]
    fn test_k_fold_balances_small_groups() {
        // Ten groups of three; no group can reach every fold on its own.
        let strata: StrataMap = (0..30)
            .map(|i| (format!("S{i:02}"), format!("K{}", i / 3)))
            .collect();
        let folds = StratifiedSplitter::default().k_fold(&strata, 5, 9).unwrap();
        for fold in &folds {
            assert_eq!(fold.test.len(), 6);
        }
    }

    #[test]
    fn test_subsample_train_to_smallest_group() {
        let strata = two_type_strata();
        let mut split = StratifiedSplitter::default().split(&strata, 0.2, 3).unwrap();
        let test_before = split.test.clone();

        let dropped = split.subsample_train_groups(&strata, 5);
        assert_eq!(dropped, 16);
        assert_eq!(count_key(&split.train, &strata, "A"), 32);
        assert_eq!(count_key(&split.train, &strata, "B"), 32);
        assert_eq!(split.test, test_before);

        let mut again = StratifiedSplitter::default().split(&strata, 0.2, 3).unwrap();
        again.subsample_train_groups(&strata, 5);
        assert_eq!(split, again);
    }

    #[test]
    fn test_k_fold_more_folds_than_samples() {
        let strata: StrataMap = (0..3).map(|i| (format!("S{i}"), "A".to_string())).collect();
        assert!(matches!(
            StratifiedSplitter::default().k_fold(&strata, 4, 1),
            Err(SplitError::EmptyFold { fold: 3, .. })
        ));
    }
}
