#![deny(unused_variables)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use mpmp::config::HarnessConfig;
use mpmp::data::alterations::parse_alteration_set;
use mpmp::data::{Modality, TargetBuilder, TargetKind, TargetSpec};
use mpmp::pipeline::{draw_splits, eligible_strata};
use mpmp::progress::{SweepObserver, SweepStage};
use mpmp::results::ResultAggregator;
use mpmp::results::files::{metrics_table_path, save_model_options};
use mpmp::split::Rounding;
use mpmp::sweep::{Sweep, SweepData};

/// Settings shared by every subcommand. Flags override values from
/// `--config`, which in turn override the defaults.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// TOML file with harness settings
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the input tables
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Explicit feature matrix, instead of the modality's file in the data directory
    #[arg(long, value_name = "PATH")]
    pub features: Option<PathBuf>,

    /// Explicit sample metadata table
    #[arg(long, value_name = "PATH")]
    pub sample_info: Option<PathBuf>,

    /// Directory that receives metrics tables and per-run artifacts
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub modality: Option<Modality>,

    /// Use the compressed (PCA) representation with this many dimensions
    #[arg(long, value_name = "N")]
    pub n_dims: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Fraction of each stratum held out for TEST
    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Evaluate with K outer folds instead of a single holdout
    #[arg(long, value_name = "K")]
    pub num_folds: Option<usize>,

    /// Number of inner cross-validation folds for hyperparameter selection
    #[arg(long, value_name = "K")]
    pub inner_folds: Option<usize>,

    /// Keep only the N modality features with the largest MAD on TRAIN
    #[arg(long, value_name = "N", conflicts_with = "all_features")]
    pub subset_mad_genes: Option<usize>,

    /// Use every modality feature
    #[arg(long)]
    pub all_features: bool,

    /// Strata smaller than this always go to TRAIN
    #[arg(long)]
    pub min_group_size: Option<usize>,

    #[arg(long, value_enum)]
    pub rounding: Option<Rounding>,

    /// Subsample each cancer type in TRAIN to the size of the smallest one
    #[arg(long)]
    pub subsample_to_smallest_cancer_type: bool,

    /// Restrict samples to those present in every listed modality
    #[arg(long, value_enum, value_delimiter = ',')]
    pub overlap_data_types: Vec<Modality>,

    /// Write gzipped TEST predictions for every run
    #[arg(long)]
    pub output_preds: bool,

    /// Skip targets whose coefficient table already exists
    #[arg(long)]
    pub skip_existing: bool,

    /// Run targets in parallel
    #[arg(long)]
    pub parallel: bool,
}

impl CommonArgs {
    fn build_config(&self) -> Result<HarnessConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => {
                log::info!("Loading settings from '{}'", path.display());
                HarnessConfig::load(path)?
            }
            None => HarnessConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.paths.data_dir = dir.clone();
        }
        if let Some(path) = &self.features {
            config.paths.features = Some(path.clone());
        }
        if let Some(path) = &self.sample_info {
            config.paths.sample_info = Some(path.clone());
        }
        if let Some(dir) = &self.results_dir {
            config.results_dir = dir.clone();
        }
        if let Some(modality) = self.modality {
            config.modality = modality;
        }
        if self.n_dims.is_some() {
            config.n_dims = self.n_dims;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(fraction) = self.test_fraction {
            config.split.test_fraction = fraction;
        }
        if self.num_folds.is_some() {
            config.split.num_folds = self.num_folds;
        }
        if let Some(k) = self.inner_folds {
            config.model.inner_folds = k;
        }
        if self.all_features {
            config.model.subset_mad_genes = None;
        } else if self.subset_mad_genes.is_some() {
            config.model.subset_mad_genes = self.subset_mad_genes;
        }
        if let Some(size) = self.min_group_size {
            config.split.min_group_size = size;
        }
        if let Some(rounding) = self.rounding {
            config.split.rounding = rounding;
        }
        config.split.subsample_to_smallest_cancer_type |= self.subsample_to_smallest_cancer_type;
        if !self.overlap_data_types.is_empty() {
            config.overlap = self.overlap_data_types.clone();
        }
        config.output.output_preds |= self.output_preds;
        config.output.skip_existing |= self.skip_existing;
        config.output.parallel_targets |= self.parallel;

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct GeneArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Genes to classify (default: every gene in the curated list)
    #[arg(long, value_delimiter = ',')]
    pub genes: Vec<String>,

    /// Alteration types counted as positive, e.g. `mutation,copy_loss`
    /// (default: derived from each gene's class)
    #[arg(long)]
    pub alterations: Option<String>,

    /// Count only mutations, never copy-number events, by default
    #[arg(long)]
    pub no_copy: bool,

    /// Drop samples whose log10 mutation burden exceeds this many standard deviations
    #[arg(long, conflicts_with = "no_hyper_filter")]
    pub hyper_filter: Option<f64>,

    #[arg(long)]
    pub no_hyper_filter: bool,

    /// Do not append one-hot cancer type covariates
    #[arg(long)]
    pub no_cancer_type_covariate: bool,

    /// Do not append the mutation burden covariate
    #[arg(long)]
    pub no_burden_covariate: bool,
}

#[derive(Args, Debug)]
pub struct CancerTypeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Cancer types to classify (default: every type in the sample metadata)
    #[arg(long, value_delimiter = ',')]
    pub cancer_types: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Split the samples of this gene target, after its exclusions
    #[arg(long, conflicts_with = "cancer_type")]
    pub gene: Option<String>,

    /// Alteration types counted as positive for `--gene`
    #[arg(long, requires = "gene")]
    pub alterations: Option<String>,

    /// Split the samples of this cancer-type target
    #[arg(long)]
    pub cancer_type: Option<String>,

    /// Where to write the assignment table
    /// (default: `{results_dir}/splits/{modality}_s{seed}_splits.tsv`)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "mpmp",
    about = "Stratified cross-validated classification across molecular data modalities",
    version
)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict gene alteration status from one modality
    #[command(about = "Classify gene alteration status (outputs: gene/*_classify_metrics.tsv)")]
    Genes(GeneArgs),

    /// Predict cancer type membership from one modality
    #[command(about = "Classify cancer types (outputs: cancer_type/*_classify_metrics.tsv)")]
    CancerTypes(CancerTypeArgs),

    /// Write the stratified TRAIN/TEST assignment without fitting anything
    #[command(about = "Write stratified split assignments (outputs: splits/*_splits.tsv)")]
    Split(SplitArgs),
}

struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self { bar }
    }
}

impl SweepObserver for ProgressBarObserver {
    fn on_stage_start(&self, stage: SweepStage, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message(stage.to_string());
    }

    fn on_target_finish(&self, target: &str) {
        self.bar.set_message(target.to_string());
        self.bar.inc(1);
    }

    fn on_stage_finish(&self, _stage: SweepStage) {
        self.bar.finish_and_clear();
    }
}

fn run_sweep(
    config: HarnessConfig,
    kind: TargetKind,
    requested: impl FnOnce(&SweepData) -> Result<Vec<TargetSpec>, Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
    let data = SweepData::load(&config, kind)?;
    let targets = requested(&data)?;
    if targets.is_empty() {
        return Err(format!("no {kind} targets to classify").into());
    }

    let options = save_model_options(&config.results_dir, kind, &config)?;
    log::debug!("Saved options to '{}'", options.display());
    let metrics = metrics_table_path(
        &config.results_dir,
        kind,
        config.modality,
        config.seed,
        config.n_dims,
    );
    let aggregator = ResultAggregator::create(&metrics)?;
    let observer = ProgressBarObserver::new();

    println!(
        "Classifying {} {} targets from {} data (seed {})",
        targets.len(),
        kind,
        config.modality,
        config.seed
    );
    let summary = Sweep::new(&config, &data, &aggregator).run(&targets, &observer)?;
    let path = aggregator.finalize()?;
    println!(
        "{} completed, {} skipped, {} failed. Metrics written to: {}",
        summary.completed,
        summary.skipped,
        summary.failed,
        path.display()
    );
    Ok(())
}

fn run_genes(args: GeneArgs) -> Result<(), Box<dyn Error>> {
    let mut config = args.common.build_config()?;
    if args.no_copy {
        config.target.include_copy = false;
    }
    if args.no_hyper_filter {
        config.target.hyper_filter = None;
    } else if args.hyper_filter.is_some() {
        config.target.hyper_filter = args.hyper_filter;
    }
    if args.no_cancer_type_covariate {
        config.target.add_cancer_type_covariate = false;
    }
    if args.no_burden_covariate {
        config.target.add_burden_covariate = false;
    }
    config.validate()?;

    let alterations = args
        .alterations
        .as_deref()
        .map(parse_alteration_set)
        .transpose()?;
    let genes = args.genes;

    run_sweep(config, TargetKind::Gene, move |data| {
        if genes.is_empty() {
            let targets = data.default_gene_targets();
            if targets.is_empty() {
                return Err("no genes given and no curated gene list found".into());
            }
            return Ok(targets);
        }
        Ok(genes
            .iter()
            .map(|gene| TargetSpec::Gene {
                symbol: gene.clone(),
                alterations: alterations.clone(),
            })
            .collect())
    })
}

fn run_cancer_types(args: CancerTypeArgs) -> Result<(), Box<dyn Error>> {
    let config = args.common.build_config()?;
    let cancer_types = args.cancer_types;
    run_sweep(config, TargetKind::CancerType, move |data| {
        if cancer_types.is_empty() {
            Ok(data.default_cancer_type_targets())
        } else {
            Ok(cancer_types
                .iter()
                .map(|code| TargetSpec::cancer_type(code))
                .collect())
        }
    })
}

#[derive(serde::Serialize)]
struct AssignmentRow<'a> {
    sample_id: &'a str,
    stratification_key: &'a str,
    fold: Option<usize>,
    partition: &'static str,
}

fn run_split(args: SplitArgs) -> Result<(), Box<dyn Error>> {
    let config = args.common.build_config()?;
    let target = match (args.gene, args.cancer_type) {
        (Some(symbol), _) => Some(TargetSpec::Gene {
            symbol,
            alterations: args
                .alterations
                .as_deref()
                .map(parse_alteration_set)
                .transpose()?,
        }),
        (None, Some(code)) => Some(TargetSpec::CancerType(code)),
        (None, None) => None,
    };
    let kind = target.as_ref().map_or(TargetKind::CancerType, TargetSpec::kind);

    // Same loading as a sweep: incomplete rows dropped, overlap applied.
    let data = SweepData::load(&config, kind)?;
    let strata = match &target {
        Some(spec) => {
            let labels = TargetBuilder::new(
                &data.sample_info,
                data.alterations.as_ref(),
                &config.target,
            )
            .build_target(spec)?;
            if let Err(e) = labels
                .balance
                .check(config.target.min_positive, config.target.min_negative)
            {
                log::warn!("{}: a classification run would be skipped: {}", spec.identifier(), e);
            }
            eligible_strata(&data.features, &data.sample_info, &labels)
        }
        None => data
            .sample_info
            .strata(data.features.sample_ids().iter().map(String::as_str)),
    };
    log::info!(
        "{} of {} samples with features are eligible",
        strata.len(),
        data.features.n_samples()
    );

    let splits = draw_splits(&config, &data.sample_info, &strata, config.seed)?;

    let output = match args.output {
        Some(path) => path,
        None => {
            let dir = config.results_dir.join("splits");
            std::fs::create_dir_all(&dir)?;
            dir.join(format!("{}_s{}_splits.tsv", config.modality, config.seed))
        }
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&output)?;
    for split in &splits {
        let partitions = [("train", &split.train), ("test", &split.test)];
        for (partition, ids) in partitions {
            for id in ids {
                writer.serialize(AssignmentRow {
                    sample_id: id,
                    stratification_key: strata.get(id).map(String::as_str).unwrap_or_default(),
                    fold: split.fold,
                    partition,
                })?;
            }
        }
        // Samples left out by TRAIN subsampling.
        for (id, key) in &strata {
            if split.train.binary_search(id).is_err() && split.test.binary_search(id).is_err() {
                writer.serialize(AssignmentRow {
                    sample_id: id,
                    stratification_key: key,
                    fold: split.fold,
                    partition: "unused",
                })?;
            }
        }
    }
    writer.flush()?;

    for split in &splits {
        println!(
            "Fold {}: {} TRAIN, {} TEST ({} strata kept out of TEST)",
            split.fold.map_or_else(|| "-".to_string(), |f| f.to_string()),
            split.train.len(),
            split.test.len(),
            split.excluded_from_test.len()
        );
    }
    println!("Assignments written to: {}", output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let Cli { verbose, command } = cli;

    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match command {
        Some(Commands::Genes(args)) => run_genes(args),
        Some(Commands::CancerTypes(args)) => run_cancer_types(args),
        Some(Commands::Split(args)) => run_split(args),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
