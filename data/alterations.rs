use super::table::{self, DataError};
use crate::config::DataPaths;
use ahash::AHashMap;
use clap::ValueEnum;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A kind of genomic event that can make a gene count as altered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum AlterationType {
    Mutation,
    CopyGain,
    CopyLoss,
}

impl AlterationType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::CopyGain => "copy_gain",
            Self::CopyLoss => "copy_loss",
        }
    }
}

impl fmt::Display for AlterationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlterationType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mutation" => Ok(Self::Mutation),
            "copy_gain" | "gain" => Ok(Self::CopyGain),
            "copy_loss" | "loss" => Ok(Self::CopyLoss),
            _ => Err(DataError::UnknownAlterationType(s.to_string())),
        }
    }
}

pub type AlterationSet = BTreeSet<AlterationType>;

/// Parses a comma-separated alteration list such as `mutation,copy_loss`.
/// A list without any alteration type is rejected.
pub fn parse_alteration_set(s: &str) -> Result<AlterationSet, DataError> {
    let set = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(<AlterationType as FromStr>::from_str)
        .collect::<Result<AlterationSet, _>>()?;
    if set.is_empty() {
        return Err(DataError::EmptyAlterationSet(s.to_string()));
    }
    Ok(set)
}

/// Role of a gene in the curated cancer gene list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneClass {
    Oncogene,
    TumorSuppressor,
    Unknown,
}

impl GeneClass {
    fn parse(gene: &str, value: &str) -> Result<Self, DataError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oncogene" => Ok(Self::Oncogene),
            "tsg" | "tumor_suppressor" | "tumor suppressor" => Ok(Self::TumorSuppressor),
            "" | "unknown" | "na" => Ok(Self::Unknown),
            _ => Err(DataError::UnknownGeneClass {
                gene: gene.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Oncogenes are activated by gain, tumor suppressors inactivated by loss.
    /// Copy-number events are only added when `include_copy` is set.
    pub fn default_alterations(self, include_copy: bool) -> AlterationSet {
        let mut set = AlterationSet::new();
        set.insert(AlterationType::Mutation);
        if include_copy {
            match self {
                Self::Oncogene => {
                    set.insert(AlterationType::CopyGain);
                }
                Self::TumorSuppressor => {
                    set.insert(AlterationType::CopyLoss);
                }
                Self::Unknown => {}
            }
        }
        set
    }
}

/// Curated gene list (gene symbol → class).
#[derive(Debug, Clone, Default)]
pub struct GeneSet {
    genes: BTreeMap<String, GeneClass>,
}

impl GeneSet {
    /// Reads a table with `gene` and `classification` columns.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let df = table::read_tsv(path)?;
        table::require_columns(&df, &["gene", "classification"])?;
        let genes = table::string_values(&df, "gene")?;
        let classes = table::optional_string_values(&df, "classification")?;

        let mut map = BTreeMap::new();
        for (gene, class) in genes.into_iter().zip(classes) {
            let class = GeneClass::parse(&gene, class.as_deref().unwrap_or_default())?;
            map.insert(gene, class);
        }
        log::info!("Loaded {} genes from '{}'", map.len(), path.display());
        Ok(Self { genes: map })
    }

    pub fn from_genes(genes: impl IntoIterator<Item = (String, GeneClass)>) -> Self {
        Self {
            genes: genes.into_iter().collect(),
        }
    }

    pub fn class_of(&self, gene: &str) -> Option<GeneClass> {
        self.genes.get(gene).copied()
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> {
        self.genes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

/// A samples × genes table of binary calls (mutation, gain or loss).
///
/// The first column holds sample identifiers; every other column is one gene.
/// Any positive value counts as a call, zero as no call, and null as
/// indeterminate.
#[derive(Debug, Clone)]
pub struct StatusTable {
    sample_ids: Vec<String>,
    df: DataFrame,
}

impl StatusTable {
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let df = table::read_tsv(path)?;
        let names = table::column_names(&df);
        if names.is_empty() {
            return Err(DataError::EmptyTable(path.to_path_buf()));
        }
        let sample_ids = table::string_values(&df, &names[0])?;
        Ok(Self { sample_ids, df })
    }

    pub fn from_calls(
        gene_columns: &[(&str, Vec<Option<bool>>)],
        sample_ids: Vec<String>,
    ) -> Result<Self, DataError> {
        use polars::prelude::Column;

        let mut columns = vec![Column::new("sample_id".into(), sample_ids.clone())];
        for (gene, calls) in gene_columns {
            let values: Vec<Option<f64>> = calls
                .iter()
                .map(|call| call.map(|c| if c { 1.0 } else { 0.0 }))
                .collect();
            columns.push(Column::new((*gene).into(), values));
        }
        let df = DataFrame::new(columns)?;
        Ok(Self { sample_ids, df })
    }

    pub fn has_gene(&self, gene: &str) -> bool {
        self.df.column(gene).is_ok() && table::column_names(&self.df)[0] != gene
    }

    /// Determinate calls for one gene. Samples with a null entry are left out.
    pub fn calls(&self, gene: &str) -> Result<Option<AHashMap<String, bool>>, DataError> {
        if !self.has_gene(gene) {
            return Ok(None);
        }
        let values = table::numeric_values(&self.df, gene)?;
        let calls = self
            .sample_ids
            .iter()
            .zip(values)
            .filter_map(|(id, value)| value.map(|v| (id.clone(), v > 0.0)))
            .collect();
        Ok(Some(calls))
    }
}

/// log10 mutation burden per sample.
#[derive(Debug, Clone, Default)]
pub struct MutationBurden {
    values: AHashMap<String, f64>,
}

impl MutationBurden {
    /// Reads a table whose first column is the sample id and which carries a
    /// `log10_mut` column.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let df = table::read_tsv(path)?;
        table::require_columns(&df, &["log10_mut"])?;
        let names = table::column_names(&df);
        let ids = table::string_values(&df, &names[0])?;
        let burden = table::numeric_values(&df, "log10_mut")?;
        let values = ids
            .into_iter()
            .zip(burden)
            .filter_map(|(id, value)| value.filter(|v| v.is_finite()).map(|v| (id, v)))
            .collect();
        Ok(Self { values })
    }

    pub fn from_values(values: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn get(&self, sample_id: &str) -> Option<f64> {
        self.values.get(sample_id).copied()
    }
}

/// Every alteration source a gene target can draw from.
#[derive(Debug, Clone, Default)]
pub struct AlterationTables {
    pub mutation: Option<StatusTable>,
    pub copy_gain: Option<StatusTable>,
    pub copy_loss: Option<StatusTable>,
    pub burden: Option<MutationBurden>,
    pub genes: Option<GeneSet>,
}

impl AlterationTables {
    /// Loads every table whose file is configured or present in the data
    /// directory. Absent tables stay `None`; a gene target that needs one
    /// fails on its own.
    pub fn load(paths: &DataPaths) -> Result<Self, DataError> {
        let status = |path: Option<PathBuf>| path.as_deref().map(StatusTable::load).transpose();
        let tables = Self {
            mutation: status(paths.mutations_path())?,
            copy_gain: status(paths.copy_gain_path())?,
            copy_loss: status(paths.copy_loss_path())?,
            burden: paths
                .mutation_burden_path()
                .as_deref()
                .map(MutationBurden::load)
                .transpose()?,
            genes: paths
                .gene_set_path()
                .as_deref()
                .map(GeneSet::load)
                .transpose()?,
        };
        log::debug!(
            "Alteration tables: mutation={} copy_gain={} copy_loss={} burden={} genes={}",
            tables.mutation.is_some(),
            tables.copy_gain.is_some(),
            tables.copy_loss.is_some(),
            tables.burden.is_some(),
            tables.genes.as_ref().map_or(0, GeneSet::len)
        );
        Ok(tables)
    }

    pub fn source(&self, alteration: AlterationType) -> Option<&StatusTable> {
        match alteration {
            AlterationType::Mutation => self.mutation.as_ref(),
            AlterationType::CopyGain => self.copy_gain.as_ref(),
            AlterationType::CopyLoss => self.copy_loss.as_ref(),
        }
    }

    /// The alteration set for `gene`: the explicit override when given,
    /// otherwise derived from the gene's class in the curated list.
    pub fn alterations_for(
        &self,
        gene: &str,
        explicit: Option<&AlterationSet>,
        include_copy: bool,
    ) -> AlterationSet {
        if let Some(set) = explicit {
            return set.clone();
        }
        let class = self
            .genes
            .as_ref()
            .and_then(|genes| genes.class_of(gene))
            .unwrap_or(GeneClass::Unknown);
        class.default_alterations(include_copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::test_support::create_test_tsv;

    #[test]
    fn test_parse_alteration_set() {
        let set = parse_alteration_set("mutation, copy_loss").unwrap();
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec![AlterationType::Mutation, AlterationType::CopyLoss]
        );
        assert!(matches!(
            parse_alteration_set("mutation,fusion"),
            Err(DataError::UnknownAlterationType(v)) if v == "fusion"
        ));
    }

    #[test]
    fn test_empty_alteration_list_rejected() {
        for input in ["", ",", " , ,"] {
            let err = parse_alteration_set(input).unwrap_err();
            assert!(matches!(err, DataError::EmptyAlterationSet(_)));
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_default_alterations_follow_gene_class() {
        let onco = GeneClass::Oncogene.default_alterations(true);
        assert!(onco.contains(&AlterationType::CopyGain));
        assert!(!onco.contains(&AlterationType::CopyLoss));

        let tsg = GeneClass::TumorSuppressor.default_alterations(true);
        assert!(tsg.contains(&AlterationType::CopyLoss));

        let no_copy = GeneClass::TumorSuppressor.default_alterations(false);
        assert_eq!(no_copy.len(), 1);
    }

    #[test]
    fn test_status_table_skips_null_calls() {
        let file = create_test_tsv("sample_id\tTP53\tKRAS\nS1\t1\t0\nS2\tNA\t1\nS3\t0\t0").unwrap();
        let table = StatusTable::load(file.path()).unwrap();

        let calls = table.calls("TP53").unwrap().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls["S1"]);
        assert!(!calls["S3"]);
        assert!(table.calls("BRAF").unwrap().is_none());
        assert!(table.calls("sample_id").unwrap().is_none());
    }

    #[test]
    fn test_gene_set_classes() {
        let file =
            create_test_tsv("gene\tclassification\nTP53\tTSG\nKRAS\tOncogene\nFOO\tNA").unwrap();
        let genes = GeneSet::load(file.path()).unwrap();
        assert_eq!(genes.class_of("TP53"), Some(GeneClass::TumorSuppressor));
        assert_eq!(genes.class_of("KRAS"), Some(GeneClass::Oncogene));
        assert_eq!(genes.class_of("FOO"), Some(GeneClass::Unknown));
        assert_eq!(genes.class_of("BRAF"), None);
    }
}
