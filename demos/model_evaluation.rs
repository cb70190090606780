use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use survival_analysis::{
    bootstrap_cohort_ci, concordance_index, evaluate_models, kaplan_meier, predict_cohort,
    weighted_log_rank_test, BootstrapConfig, CoxModel, EvaluationConfig, KaplanMeierModel,
    MonotonicityPolicy, RankWeight, SurvivalData, TieMethod,
};

fn generate_cohort(n_samples: usize, seed: u64) -> Result<SurvivalData, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let true_coefficients: Array1<f64> = Array1::from(vec![0.7, -0.4, 0.0, 0.25]);
    let n_features = true_coefficients.len();

    let covariates = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-1.5..1.5));

    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for row in covariates.rows() {
        let hazard = 0.15 * row.dot(&true_coefficients).exp();
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        let time = -u.ln() / hazard;
        let censoring_time = rng.gen_range(0.5..12.0);
        times.push(time.min(censoring_time));
        events.push(time < censoring_time);
    }

    let names = (0..n_features).map(|j| format!("marker_{}", j)).collect();
    Ok(SurvivalData::new(times, events, covariates)?.with_feature_names(names)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Survival Model Evaluation Example");
    println!("=================================\n");

    let data = generate_cohort(1200, 17)?;
    let train_idx: Vec<usize> = (0..800).collect();
    let test_idx: Vec<usize> = (800..1200).collect();
    let train = data.subset(&train_idx)?;
    let test = data.subset(&test_idx)?;

    println!("train: {} subjects, {} events", train.n_samples(), train.n_events());
    println!("test:  {} subjects, {} events\n", test.n_samples(), test.n_events());

    // do high and low marker_0 differ, early and overall?
    let strata: Vec<&str> = train
        .covariates()
        .column(0)
        .iter()
        .map(|&x| if x > 0.0 { "high" } else { "low" })
        .collect();
    for weight in [RankWeight::LogRank, RankWeight::GehanWilcoxon, RankWeight::TaroneWare] {
        let res = weighted_log_rank_test(&train, &strata, weight)?;
        println!("{:<14} chi2 = {:>8.3}, p = {:.2e}", format!("{:?}", weight), res.statistic, res.p_value);
    }
    println!();

    let breslow = CoxModel::new().fit(&train)?;
    let efron_ridge = CoxModel::new()
        .with_ties(TieMethod::Efron)
        .with_l2_penalty(5.0)
        .fit(&train)?;
    let reference = KaplanMeierModel::fit(&train);

    breslow.summary(0.05)?.print();
    println!();
    println!("summary as json:\n{}\n", serde_json::to_string_pretty(&efron_ridge.summary(0.05)?)?);

    let grid: Vec<f64> = (1..=20).map(|k| k as f64 * 0.5).collect();
    let config = EvaluationConfig::new(grid.clone())
        .with_tau_max(9.0)
        .with_parallel(true);

    let report = evaluate_models(&[&breslow, &efron_ridge, &reference], &train, &test, &config);
    report.print();
    println!();

    let interval = bootstrap_cohort_ci(
        &test,
        |cohort| {
            let predictions = predict_cohort(&breslow, cohort, &grid, MonotonicityPolicy::Strict)?;
            concordance_index(cohort, &predictions)
        },
        &BootstrapConfig::new(200, 0.025, 2024).with_parallel(true),
    )?;
    println!(
        "test c-index {:.4}, 95% bootstrap interval [{:.4}, {:.4}] ({} failed resamples)",
        interval.estimate, interval.lower, interval.upper, interval.n_failed
    );
    println!();

    println!("test-set kaplan-meier curve (csv):");
    kaplan_meier(&test).write_csv(std::io::stdout())?;

    Ok(())
}
