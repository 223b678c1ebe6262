use super::table::{self, DataError};
use crate::split::StrataMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const SAMPLE_ID_COLUMN: &str = "sample_id";
const CANCER_TYPE_COLUMN: &str = "cancer_type";
const SAMPLE_TYPE_COLUMN: &str = "sample_type";
const SUBTYPE_COLUMN: &str = "subtype";

/// Builds the stratification key for a sample.
///
/// This is the only place the key is constructed. Cancer type and sample type
/// are concatenated without a separator, followed by the molecular subtype when
/// one is known, so the same sample always maps to the same bytes regardless of
/// which modality's metadata it was read from.
pub fn stratification_key(cancer_type: &str, sample_type: &str, subtype: Option<&str>) -> String {
    let mut key = String::with_capacity(
        cancer_type.len() + sample_type.len() + subtype.map_or(0, str::len),
    );
    key.push_str(cancer_type);
    key.push_str(sample_type);
    if let Some(subtype) = subtype {
        key.push_str(subtype);
    }
    key
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub cancer_type: String,
    pub sample_type: String,
    pub subtype: Option<String>,
    pub stratification_key: String,
}

impl SampleRecord {
    pub fn new(cancer_type: &str, sample_type: &str, subtype: Option<&str>) -> Self {
        Self {
            cancer_type: cancer_type.to_string(),
            sample_type: sample_type.to_string(),
            subtype: subtype.map(str::to_string),
            stratification_key: stratification_key(cancer_type, sample_type, subtype),
        }
    }
}

/// Sample metadata for one modality, keyed by sample identifier.
#[derive(Debug, Clone, Default)]
pub struct SampleInfo {
    records: BTreeMap<String, SampleRecord>,
}

impl SampleInfo {
    /// Loads a table with `sample_id`, `cancer_type`, `sample_type` and an
    /// optional `subtype` column. A precomputed `id_for_stratification` column,
    /// if present, is ignored in favor of [`stratification_key`].
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let df = table::read_tsv(path)?;
        table::require_columns(&df, &[SAMPLE_ID_COLUMN, CANCER_TYPE_COLUMN, SAMPLE_TYPE_COLUMN])?;

        let ids = table::string_values(&df, SAMPLE_ID_COLUMN)?;
        let cancer_types = table::string_values(&df, CANCER_TYPE_COLUMN)?;
        let sample_types = table::string_values(&df, SAMPLE_TYPE_COLUMN)?;
        let subtypes = if table::column_names(&df).iter().any(|c| c == SUBTYPE_COLUMN) {
            table::optional_string_values(&df, SUBTYPE_COLUMN)?
        } else {
            vec![None; ids.len()]
        };

        let mut records = BTreeMap::new();
        for (((id, cancer_type), sample_type), subtype) in
            ids.into_iter().zip(cancer_types).zip(sample_types).zip(subtypes)
        {
            let record = SampleRecord::new(&cancer_type, &sample_type, subtype.as_deref());
            if records.insert(id.clone(), record).is_some() {
                return Err(DataError::DuplicateSample(id, path.display().to_string()));
            }
        }

        log::info!(
            "Loaded sample info for {} samples from '{}'",
            records.len(),
            path.display()
        );
        Ok(Self { records })
    }

    pub fn from_records(records: impl IntoIterator<Item = (String, SampleRecord)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, sample_id: &str) -> Option<&SampleRecord> {
        self.records.get(sample_id)
    }

    /// Sample identifiers in sorted order.
    pub fn sample_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SampleRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn cancer_types(&self) -> BTreeSet<&str> {
        self.records
            .values()
            .map(|record| record.cancer_type.as_str())
            .collect()
    }

    /// Stratification keys for the given samples. Unknown identifiers are
    /// skipped.
    pub fn strata<'a>(&self, sample_ids: impl IntoIterator<Item = &'a str>) -> StrataMap {
        sample_ids
            .into_iter()
            .filter_map(|id| {
                self.records
                    .get(id)
                    .map(|record| (id.to_string(), record.stratification_key.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::test_support::create_test_tsv;

    #[test]
    fn test_key_is_plain_concatenation() {
        assert_eq!(
            stratification_key("BRCA", "Primary Solid Tumor", None),
            "BRCAPrimary Solid Tumor"
        );
        assert_eq!(
            stratification_key("BRCA", "Primary Solid Tumor", Some("LumA")),
            "BRCAPrimary Solid TumorLumA"
        );
    }

    #[test]
    fn test_load_recomputes_keys() {
        let content = "sample_id\tsample_type\tcancer_type\tid_for_stratification\n\
                       TCGA-A1-0001-01\tPrimary Solid Tumor\tBRCA\tstale\n\
                       TCGA-B2-0002-06\tMetastatic\tSKCM\tstale";
        let file = create_test_tsv(content).unwrap();
        let info = SampleInfo::load(file.path()).unwrap();

        assert_eq!(info.len(), 2);
        let record = info.get("TCGA-B2-0002-06").unwrap();
        assert_eq!(record.cancer_type, "SKCM");
        assert_eq!(record.stratification_key, "SKCMMetastatic");
        assert_eq!(
            info.cancer_types().into_iter().collect::<Vec<_>>(),
            vec!["BRCA", "SKCM"]
        );
    }

    #[test]
    fn test_subtype_column_extends_key() {
        let content = "sample_id\tcancer_type\tsample_type\tsubtype\n\
                       S1\tBRCA\tTP\tLumA\n\
                       S2\tBRCA\tTP\tNA";
        let file = create_test_tsv(content).unwrap();
        let info = SampleInfo::load(file.path()).unwrap();
        assert_eq!(info.get("S1").unwrap().stratification_key, "BRCATPLumA");
        assert_eq!(info.get("S2").unwrap().stratification_key, "BRCATP");
    }

    #[test]
    fn test_strata_skips_unknown_samples() {
        let info = SampleInfo::from_records([
            ("S1".to_string(), SampleRecord::new("LUAD", "TP", None)),
            ("S2".to_string(), SampleRecord::new("LUSC", "TP", None)),
        ]);
        let strata = info.strata(["S2", "S9"]);
        assert_eq!(strata.len(), 1);
        assert_eq!(strata["S2"], "LUSCTP");
    }
}
