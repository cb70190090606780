use ndarray::Array2;
use survival_analysis::{
    estimator::ConfidenceMethod, kaplan_meier, log_rank_test, nelson_aalen, rmst::rmst_curve,
    CoxModel, SurvivalData, TieMethod,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Survival Analysis - Basic Usage Example");
    println!("=======================================\n");

    // Create sample survival data
    let times = vec![1.2, 2.1, 3.5, 4.2, 5.8, 6.1, 7.3, 8.9, 9.2, 10.5,
                     2.3, 3.1, 4.8, 5.2, 6.9, 7.1, 8.3, 9.8, 10.1, 11.2];

    let events = vec![true, false, true, true, false, true, true, false, true, false,
                      true, true, false, true, true, false, true, true, false, true];

    // Covariates: age, treatment (0/1), biomarker_level
    let covariates = Array2::from_shape_vec((20, 3), vec![
        // age, treatment, biomarker
        65.0, 0.0, 2.3,  // Patient 1
        70.0, 1.0, 1.8,  // Patient 2
        55.0, 0.0, 3.1,  // Patient 3
        62.0, 1.0, 2.1,  // Patient 4
        68.0, 0.0, 2.8,  // Patient 5
        72.0, 1.0, 1.5,  // Patient 6
        58.0, 0.0, 3.4,  // Patient 7
        66.0, 1.0, 1.9,  // Patient 8
        71.0, 0.0, 2.6,  // Patient 9
        59.0, 1.0, 2.0,  // Patient 10
        63.0, 0.0, 2.9,  // Patient 11
        69.0, 1.0, 1.7,  // Patient 12
        57.0, 0.0, 3.2,  // Patient 13
        64.0, 1.0, 2.2,  // Patient 14
        67.0, 0.0, 2.7,  // Patient 15
        73.0, 1.0, 1.6,  // Patient 16
        61.0, 0.0, 3.0,  // Patient 17
        65.0, 1.0, 1.8,  // Patient 18
        70.0, 0.0, 2.5,  // Patient 19
        56.0, 1.0, 2.4,  // Patient 20
    ])?;

    let feature_names = vec![
        "age".to_string(),
        "treatment".to_string(),
        "biomarker".to_string(),
    ];
    let data = SurvivalData::new(times, events, covariates)?.with_feature_names(feature_names)?;

    println!("Dataset Information:");
    println!("  - Number of samples: {}", data.n_samples());
    println!("  - Number of features: {}", data.n_features());
    println!("  - Number of events: {}", data.n_events());
    println!("  - Number of censored: {}", data.n_samples() - data.n_events());
    println!();

    // Example 1: Kaplan-Meier with confidence band
    println!("Example 1: Kaplan-Meier Estimate");
    println!("--------------------------------");

    let curve = kaplan_meier(&data);
    let band = curve.confidence_band(0.05, ConfidenceMethod::LogLog)?;
    println!("{:>6} {:>6} {:>6} {:>8} {:>8} {:>8}", "time", "n", "d", "S(t)", "lower", "upper");
    for (p, ci) in curve.points().iter().zip(&band) {
        println!(
            "{:>6.1} {:>6} {:>6} {:>8.4} {:>8.4} {:>8.4}{}",
            p.time, p.n_at_risk, p.n_events, p.survival, ci.lower, ci.upper,
            if p.is_censoring_mark() { " +" } else { "" }
        );
    }
    match curve.median_survival() {
        Some(m) => println!("median survival: {:.2}", m),
        None => println!("median survival: not reached"),
    }
    let na = nelson_aalen(&data);
    println!("nelson-aalen H(8.0) = {:.4}", na.hazard_at(8.0));
    println!();

    // Example 2: Restricted mean survival time
    println!("Example 2: Restricted Mean Survival Time");
    println!("----------------------------------------");
    for (tau, area) in rmst_curve(&curve, &[2.0, 5.0, 10.0, 15.0])? {
        println!("  RMST(tau = {:>4.1}) = {:.3}", tau, area);
    }
    println!();

    // Example 3: Log-rank test by treatment arm
    println!("Example 3: Log-Rank Test (treatment vs control)");
    println!("-----------------------------------------------");
    let arms: Vec<&str> = data
        .covariates()
        .column(1)
        .iter()
        .map(|&x| if x > 0.5 { "treatment" } else { "control" })
        .collect();
    let test = log_rank_test(&data, &arms)?;
    for g in &test.groups {
        println!("  {:<10} n = {:>2}, observed = {:.0}, expected = {:.2}", g.label, g.n, g.observed, g.expected);
    }
    println!("  chi2 = {:.4} on {} df, p = {:.4}", test.statistic, test.degrees_of_freedom, test.p_value);
    println!();

    // Example 4: Cox regression
    println!("Example 4: Cox Regression (Breslow ties)");
    println!("----------------------------------------");
    let basic_model = CoxModel::new().fit(&data)?;
    basic_model.summary(0.05)?.print();
    println!();

    println!("Example 5: Cox Regression with Efron ties & ridge penalty");
    println!("---------------------------------------------------------");
    let ridge_model = CoxModel::new()
        .with_ties(TieMethod::Efron)
        .with_l2_penalty(0.1)
        .fit(&data)?;
    ridge_model.summary(0.05)?.print();
    println!();

    // Example 6: Predictions for new patients
    println!("Example 6: Predictions for New Patients");
    println!("---------------------------------------");

    let new_patients = Array2::from_shape_vec((3, 3), vec![
        60.0, 0.0, 2.5,  // Patient A: age 60, no treatment, biomarker 2.5
        75.0, 1.0, 1.2,  // Patient B: age 75, treatment, biomarker 1.2
        52.0, 0.0, 3.8,  // Patient C: age 52, no treatment, biomarker 3.8
    ])?;

    let hazard_ratios = basic_model.predict_hazard_ratios(new_patients.view())?;
    let time_points = [1.0, 2.0, 3.0, 5.0, 10.0];
    let survival_probs = basic_model.predict_survival_matrix(new_patients.view(), &time_points)?;

    println!("Time:                 1.0    2.0    3.0    5.0   10.0");
    for i in 0..3 {
        print!("Patient {} (HR {:>6.3}):", (b'A' + i as u8) as char, hazard_ratios[i]);
        for j in 0..time_points.len() {
            print!(" {:.3}", survival_probs[[i, j]]);
        }
        println!();
    }

    Ok(())
}
