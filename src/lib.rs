//! # survival analysis
//!
//! time-to-event statistics on right-censored data - estimate, compare, model, evaluate
//!
//! ## what you get
//!
//! - kaplan-meier & nelson-aalen curves (greenwood variance, confidence bands, median)
//! - log-rank tests for k groups, plus gehan-wilcoxon / tarone-ware weights
//! - restricted mean survival time
//! - cox regression (newton-raphson, breslow or efron ties, optional ridge penalty)
//! - one prediction interface for any model family, checked survival matrices
//! - concordance, ipcw brier score & integrated brier score
//! - seeded bootstrap intervals for any statistic
//! - parallel pair loops / resamples / time grids when you want them
//!
//! ## quick start
//!
//! ```rust
//! use survival_analysis::{
//!     concordance_index, kaplan_meier, log_rank_test, predict_cohort, CoxModel,
//!     MonotonicityPolicy, SurvivalData,
//! };
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // setup some survival data
//! let times = vec![2.0, 3.0, 3.0, 4.0, 4.0, 6.0, 7.0, 8.0, 10.0, 10.0];
//! let events = vec![true, true, false, true, true, false, true, false, false, true]; // false = censored
//! let covariates = Array2::from_shape_vec((10, 1), vec![
//!     1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, // treatment arm
//! ])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//!
//! // population curve
//! let curve = kaplan_meier(&data);
//! assert!((curve.survival_at(2.0) - 0.9).abs() < 1e-12);
//!
//! // do the arms differ?
//! let arms = [1, 1, 0, 1, 0, 1, 0, 0, 1, 0];
//! let test = log_rank_test(&data, &arms)?;
//! println!("log-rank chi2 = {:.3}, p = {:.3}", test.statistic, test.p_value);
//!
//! // fit cox & score it
//! let model = CoxModel::new().fit(&data)?;
//! let grid = [1.0, 3.0, 5.0, 7.0, 9.0];
//! let predictions = predict_cohort(&model, &data, &grid, MonotonicityPolicy::Strict)?;
//! let c = concordance_index(&data, &predictions)?;
//! assert!((0.0..=1.0).contains(&c));
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod brier;
pub mod data;
pub mod error;
pub mod estimator;
pub mod evaluation;
pub mod formula;
pub mod linalg;
pub mod logrank;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod prediction;
pub mod rmst;

pub use bootstrap::{bootstrap_ci, bootstrap_cohort_ci, BootstrapConfig, BootstrapInterval};
pub use brier::{brier_score, integrated_brier_score, CensoringDistribution};
pub use data::SurvivalData;
pub use error::{Result, SurvivalError};
pub use estimator::{kaplan_meier, nelson_aalen, ConfidenceMethod, SurvivalCurve};
pub use evaluation::{evaluate_models, EvaluationConfig, EvaluationReport};
pub use formula::{Formula, Table};
pub use logrank::{log_rank_test, weighted_log_rank_test, LogRankResult, RankWeight};
pub use metrics::{concordance_index, harrell_c_index};
pub use model::{CoxModel, FittedCoxModel};
pub use optimization::{OptimizationConfig, TieMethod};
pub use prediction::{
    predict, predict_cohort, predict_table, KaplanMeierFitter, KaplanMeierModel,
    MonotonicityPolicy, PredictionMatrix, SurvivalFitter, SurvivalModel,
};
pub use rmst::rmst;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_basic_functionality() {
        let n_samples = 100;
        let n_features = 5;

        let times: Vec<f64> = (0..n_samples).map(|i| 1.0 + i as f64).collect();
        let events = vec![true; n_samples];
        let covariates = Array2::zeros((n_samples, n_features));

        let data = SurvivalData::new(times, events, covariates).unwrap();
        assert_eq!(data.n_samples(), n_samples);
        assert_eq!(data.n_features(), n_features);

        // every subject fails, so the curve ends at zero
        let curve = kaplan_meier(&data);
        assert_eq!(curve.survival_at(1000.0), 0.0);
        // 1 + 0.99 + ... + 0.01
        assert_relative_eq!(rmst(&curve, 1000.0).unwrap(), 50.5, epsilon = 1e-9);
    }
}
