use mpmp::config::HarnessConfig;
use mpmp::data::{FeatureMatrix, SampleInfo, SampleRecord, TargetBuilder, TargetSpec};
use mpmp::pipeline::run_classification;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

fn config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.model.alphas = vec![1.0, 0.1, 0.01];
    config.model.l1_ratios = vec![0.0, 0.5];
    config.model.inner_folds = 3;
    config.model.subset_mad_genes = None;
    config
}

/// `n` samples over three cancer types. With `signal`, type "A" is shifted
/// along the first two features; otherwise every feature is pure noise.
fn fixture(n: usize, signal: bool, rng_seed: u64) -> (FeatureMatrix, SampleInfo) {
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let ids: Vec<String> = (0..n).map(|i| format!("S{i:04}")).collect();
    let types: Vec<&str> = (0..n).map(|i| ["A", "B", "C"][i % 3]).collect();
    let x = Array2::from_shape_fn((n, 6), |(i, j)| {
        let shift = if signal && j < 2 && types[i] == "A" { 1.5 } else { 0.0 };
        shift + noise.sample(&mut rng)
    });
    let names = (0..6).map(|j| format!("g{j}")).collect();
    let features = FeatureMatrix::new(ids.clone(), names, x).unwrap();
    let info = SampleInfo::from_records(
        ids.into_iter()
            .zip(types)
            .map(|(id, t)| (id, SampleRecord::new(t, "TP", None))),
    );
    (features, info)
}

#[test]
fn shuffled_baseline_averages_to_chance() {
    let config = config();
    let (features, info) = fixture(240, false, 77);
    let labels = TargetBuilder::new(&info, None, &config.target)
        .build_target(&TargetSpec::cancer_type("A"))
        .unwrap();

    let mut aurocs = Vec::new();
    for seed in 0..20 {
        let output = run_classification(&config, &features, &info, &labels, seed).unwrap();
        for fold in &output.folds {
            if let Some((shuffled, _)) = &fold.shuffled {
                aurocs.push(shuffled.evaluation.test.auroc);
            }
        }
    }
    assert_eq!(aurocs.len(), 20);
    let mean = aurocs.iter().sum::<f64>() / aurocs.len() as f64;
    assert!((mean - 0.5).abs() < 0.1, "mean shuffled AUROC {mean}");
}

#[test]
fn shuffled_baseline_falls_below_real_signal() {
    let config = config();
    let (features, info) = fixture(300, true, 5);
    let labels = TargetBuilder::new(&info, None, &config.target)
        .build_target(&TargetSpec::cancer_type("A"))
        .unwrap();
    let output = run_classification(&config, &features, &info, &labels, 3).unwrap();
    let fold = &output.folds[0];
    let (shuffled, shuffle_seed) = fold.shuffled.as_ref().unwrap();
    assert_ne!(*shuffle_seed, 3);
    assert!(fold.real.evaluation.test.auroc > 0.8);
    assert!(fold.real.evaluation.test.auroc > shuffled.evaluation.test.auroc);
}

#[test]
fn perturbing_a_test_sample_leaves_the_model_unchanged() {
    let config = config();
    let (features, info) = fixture(210, true, 12);
    let labels = TargetBuilder::new(&info, None, &config.target)
        .build_target(&TargetSpec::cancer_type("A"))
        .unwrap();
    let before = run_classification(&config, &features, &info, &labels, 8).unwrap();

    let test_id = before.splits[0].test[0].clone();
    let row = features.row_of(&test_id).unwrap();
    let mut values = features.values().to_owned();
    values[[row, 0]] += 100.0;
    values[[row, 3]] -= 50.0;
    let perturbed = FeatureMatrix::new(
        features.sample_ids().to_vec(),
        features.feature_names().to_vec(),
        values,
    )
    .unwrap();
    let after = run_classification(&config, &perturbed, &info, &labels, 8).unwrap();

    assert_eq!(before.splits, after.splits);
    let (a, b) = (&before.folds[0].real.model, &after.folds[0].real.model);
    assert_eq!(a.penalty, b.penalty);
    assert_eq!(a.intercept, b.intercept);
    assert_eq!(a.coefficients, b.coefficients);
    assert_eq!(a.scaler, b.scaler);
    assert_eq!(
        before.folds[0].real.evaluation.grid.len(),
        after.folds[0].real.evaluation.grid.len()
    );
}
