use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    estimator::{normal_quantile, CumulativeHazardCurve},
    formula::{Formula, Table},
    linalg,
    metrics::harrell_c_index,
    optimization::{
        baseline_cumulative_hazard, BaselineHazard, CoxOptimizer, OptimizationConfig, TieMethod,
    },
    prediction::{SurvivalFitter, SurvivalModel},
};

/// cox proportional hazards model - builder for a fit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoxModel {
    config: OptimizationConfig,
}

impl CoxModel {
    /// new cox model w/ defaults (breslow ties, no penalty)
    pub fn new() -> Self {
        Self::default()
    }

    /// tie handling for the partial likelihood and the baseline hazard
    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.config.ties = ties;
        self
    }

    /// add ridge penalty (L2) - shrinks coefficients
    pub fn with_l2_penalty(mut self, penalty: f64) -> Self {
        self.config.l2_penalty = penalty;
        self
    }

    /// max newton steps before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.config.max_iterations = max_iter;
        self
    }

    /// how small the gradient norm has to get
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.config.tolerance = tol;
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// fit the model to data - this does the actual work
    pub fn fit(&self, data: &SurvivalData) -> Result<FittedCoxModel> {
        let optimizer = CoxOptimizer::new(self.config.clone());
        let outcome = optimizer.optimize(data)?;

        let covariance = linalg::invert(&outcome.information)?;
        let baseline = baseline_cumulative_hazard(data, outcome.beta.view(), self.config.ties);

        let feature_names = match data.feature_names() {
            Some(names) => names.to_vec(),
            None => (0..data.n_features()).map(|i| format!("x{}", i)).collect(),
        };

        let linear_predictor = data.covariates().dot(&outcome.beta);
        let concordance =
            harrell_c_index(linear_predictor.view(), data.times(), data.events()).ok();

        Ok(FittedCoxModel {
            coefficients: outcome.beta,
            covariance,
            feature_names,
            baseline,
            log_likelihood: outcome.log_likelihood,
            null_log_likelihood: outcome.null_log_likelihood,
            iterations: outcome.iterations,
            gradient_norm: outcome.gradient_norm,
            concordance,
            n_samples: data.n_samples(),
            n_events: data.n_events(),
            config: self.config.clone(),
        })
    }
}

impl SurvivalFitter for CoxModel {
    type Model = FittedCoxModel;

    fn fit_formula(&self, formula: &Formula, table: &Table) -> Result<FittedCoxModel> {
        let data = SurvivalData::from_table(table, formula)?;
        self.fit(&data)
    }
}

/// result of one cox fit; immutable
#[derive(Debug, Clone)]
pub struct FittedCoxModel {
    coefficients: Array1<f64>,
    covariance: Array2<f64>, // inverse (penalized) information
    feature_names: Vec<String>,
    baseline: BaselineHazard,
    log_likelihood: f64,
    null_log_likelihood: f64,
    iterations: usize,
    gradient_norm: f64,
    concordance: Option<f64>,
    n_samples: usize,
    n_events: usize,
    config: OptimizationConfig,
}

impl FittedCoxModel {
    /// the betas
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    pub fn standard_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(f64::sqrt)
    }

    pub fn hazard_ratios(&self) -> Array1<f64> {
        self.coefficients.mapv(f64::exp)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// breslow (or efron) baseline cumulative hazard at x = 0
    pub fn baseline_hazard(&self) -> CumulativeHazardCurve {
        self.baseline.at_zero()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn gradient_norm(&self) -> f64 {
        self.gradient_norm
    }

    pub fn ties(&self) -> TieMethod {
        self.config.ties
    }

    fn check_width(&self, covariates: &ArrayView2<f64>) -> Result<()> {
        if covariates.ncols() != self.coefficients.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "feature count mismatch: expected {}, got {}",
                self.coefficients.len(),
                covariates.ncols()
            )));
        }
        Ok(())
    }

    /// linear predictor x·beta for new subjects
    pub fn predict_risk(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.check_width(&covariates)?;
        Ok(covariates.dot(&self.coefficients))
    }

    /// exp(x·beta)
    pub fn predict_hazard_ratios(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_risk(covariates)?.mapv(f64::exp))
    }

    /// `S(t|x) = exp(-H0(t)·exp(x·beta))`, subjects x times
    ///
    /// evaluated relative to the training reference predictor, so large `x·beta` stays finite
    pub fn predict_survival_matrix(
        &self,
        covariates: ArrayView2<f64>,
        times: &[f64],
    ) -> Result<Array2<f64>> {
        let eta = self.predict_risk(covariates)?;

        Ok(Array2::from_shape_fn((eta.len(), times.len()), |(i, k)| {
            (-self.baseline.hazard_at(times[k], eta[i])).exp()
        }))
    }

    /// coefficient table & fit statistics at confidence level `1 - alpha`
    pub fn summary(&self, alpha: f64) -> Result<CoxModelSummary> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SurvivalError::domain("alpha", alpha, "must be in (0, 1)"));
        }
        let z_crit = normal_quantile(1.0 - alpha / 2.0)?;
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| SurvivalError::domain("normal", "N(0,1)", e.to_string()))?;
        let std_errors = self.standard_errors();

        let terms = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let coefficient = self.coefficients[j];
                let std_error = std_errors[j];
                let z = coefficient / std_error;
                CoefficientSummary {
                    name: name.clone(),
                    coefficient,
                    std_error,
                    hazard_ratio: coefficient.exp(),
                    z,
                    p_value: 2.0 * (1.0 - normal.cdf(z.abs())),
                    hazard_ratio_lower: (coefficient - z_crit * std_error).exp(),
                    hazard_ratio_upper: (coefficient + z_crit * std_error).exp(),
                }
            })
            .collect();

        let df = self.coefficients.len();
        let lr_statistic = 2.0 * (self.log_likelihood - self.null_log_likelihood);
        let lr_p_value = if df > 0 {
            let chi = ChiSquared::new(df as f64)
                .map_err(|e| SurvivalError::domain("df", df, e.to_string()))?;
            Some(1.0 - chi.cdf(lr_statistic.max(0.0)))
        } else {
            None
        };

        Ok(CoxModelSummary {
            terms,
            log_likelihood: self.log_likelihood,
            null_log_likelihood: self.null_log_likelihood,
            lr_statistic,
            lr_p_value,
            aic: 2.0 * df as f64 - 2.0 * self.log_likelihood,
            concordance: self.concordance,
            n_samples: self.n_samples,
            n_events: self.n_events,
            iterations: self.iterations,
            ties: self.config.ties,
            l2_penalty: self.config.l2_penalty,
        })
    }
}

impl SurvivalModel for FittedCoxModel {
    fn name(&self) -> &str {
        "cox"
    }

    fn covariate_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_survival(&self, covariates: ArrayView2<f64>, times: &[f64]) -> Result<Array2<f64>> {
        self.predict_survival_matrix(covariates, times)
    }
}

/// one row of the coefficient table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSummary {
    pub name: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub hazard_ratio: f64,
    pub z: f64,
    pub p_value: f64,
    pub hazard_ratio_lower: f64,
    pub hazard_ratio_upper: f64,
}

/// nice summary of what the model learned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxModelSummary {
    pub terms: Vec<CoefficientSummary>,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub lr_statistic: f64,      // 2 (l(beta) - l(0))
    pub lr_p_value: Option<f64>, // none for a covariate-free fit
    pub aic: f64,
    pub concordance: Option<f64>, // harrell's c on the training data
    pub n_samples: usize,
    pub n_events: usize,
    pub iterations: usize,
    pub ties: TieMethod,
    pub l2_penalty: f64,
}

impl CoxModelSummary {
    /// print out what we learned
    pub fn print(&self) {
        println!("cox proportional hazards model summary");
        println!("=====================================");
        println!(
            "n = {}, events = {}, ties = {:?}, l2 penalty = {:.4}",
            self.n_samples, self.n_events, self.ties, self.l2_penalty
        );
        println!();

        println!(
            "{:<16} {:>10} {:>10} {:>10} {:>8} {:>10}",
            "feature", "coef", "exp(coef)", "se(coef)", "z", "p"
        );
        println!("{:-<69}", "");
        for t in &self.terms {
            println!(
                "{:<16} {:>10.5} {:>10.5} {:>10.5} {:>8.3} {:>10.4}",
                t.name, t.coefficient, t.hazard_ratio, t.std_error, t.z, t.p_value
            );
        }
        println!();

        println!("log-likelihood: {:.4} (null {:.4})", self.log_likelihood, self.null_log_likelihood);
        if let Some(p) = self.lr_p_value {
            println!("likelihood ratio test: {:.4} on {} df, p = {:.4}", self.lr_statistic, self.terms.len(), p);
        }
        if let Some(c) = self.concordance {
            println!("concordance: {:.4}", c);
        }
        println!("newton-raphson iterations: {}", self.iterations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::{predict_cohort, MonotonicityPolicy};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let events = vec![true, false, true, true, false, true, true, false];
        let covariates = Array2::from_shape_vec(
            (8, 3),
            vec![
                1.0, 0.0, 0.5, //
                0.0, 1.0, -0.5, //
                1.0, 1.0, 0.0, //
                -1.0, 0.0, 1.0, //
                0.0, -1.0, -1.0, //
                1.0, -1.0, 0.5, //
                -1.0, 1.0, -0.5, //
                0.0, 0.0, 0.0,
            ],
        )
        .unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    /// two-arm trial with a binary treatment covariate
    fn binary_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let events = vec![true, true, false, true, true, true, false, true, true, false];
        let covariates = Array2::from_shape_vec(
            (10, 1),
            vec![1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        )
        .unwrap();
        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let model = CoxModel::new()
            .with_l2_penalty(0.05)
            .with_ties(TieMethod::Efron)
            .with_max_iterations(500);

        assert_eq!(model.config().l2_penalty, 0.05);
        assert_eq!(model.config().max_iterations, 500);
        assert_eq!(model.config().ties, TieMethod::Efron);
    }

    #[test]
    fn test_fit_and_summary() {
        let fitted = CoxModel::new().fit(&binary_data()).unwrap();
        let summary = fitted.summary(0.05).unwrap();

        assert_eq!(summary.terms.len(), 1);
        let term = &summary.terms[0];
        assert_eq!(term.name, "x0");
        assert!(term.std_error > 0.0);
        assert!(term.hazard_ratio_lower < term.hazard_ratio);
        assert!(term.hazard_ratio_upper > term.hazard_ratio);
        assert!((0.0..=1.0).contains(&term.p_value));
        assert_relative_eq!(term.hazard_ratio, term.coefficient.exp(), epsilon = 1e-12);
        assert!(summary.lr_statistic >= 0.0);
        assert!(summary.lr_p_value.is_some());
        assert!(summary.concordance.unwrap() > 0.5);
    }

    #[test]
    fn test_prediction_dimension_mismatch() {
        let fitted = CoxModel::new().fit(&create_test_data()).unwrap();
        let wrong_covariates = Array2::zeros((5, 2));
        assert!(fitted.predict_risk(wrong_covariates.view()).is_err());
    }

    #[test]
    fn test_survival_prediction_uses_baseline() {
        let data = binary_data();
        let fitted = CoxModel::new().fit(&data).unwrap();
        let beta = fitted.coefficients()[0];

        let x = Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap();
        let s = fitted.predict_survival_matrix(x.view(), &[0.5, 4.0, 20.0]).unwrap();

        // before the first event nobody has any hazard
        assert_eq!(s[[0, 0]], 1.0);
        let h0 = fitted.baseline_hazard().hazard_at(4.0);
        assert_relative_eq!(s[[0, 1]], (-h0).exp(), epsilon = 1e-12);
        assert_relative_eq!(s[[1, 1]], (-h0 * beta.exp()).exp(), epsilon = 1e-12);
        // flat past the last event time
        let h_end = fitted.baseline_hazard().hazard_at(20.0);
        assert_relative_eq!(s[[0, 2]], (-h_end).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_predictions_are_valid_curves() {
        let data = create_test_data();
        let fitted = CoxModel::new().with_l2_penalty(0.1).fit(&data).unwrap();
        let grid: Vec<f64> = (0..20).map(|k| k as f64 * 0.5).collect();
        let m = predict_cohort(&fitted, &data, &grid, MonotonicityPolicy::Strict).unwrap();
        assert_eq!(m.n_subjects(), 8);
        assert_eq!(m.n_times(), 20);
    }

    #[test]
    fn test_covariate_free_fit() {
        let data = SurvivalData::without_covariates(
            vec![1.0, 2.0, 2.0, 3.0],
            vec![true, true, false, true],
        )
        .unwrap();
        let fitted = CoxModel::new().fit(&data).unwrap();
        assert_eq!(fitted.coefficients().len(), 0);
        let summary = fitted.summary(0.05).unwrap();
        assert_eq!(summary.lr_p_value, None);
        // 1/4 + 1/3 + 1/1
        assert_relative_eq!(fitted.baseline_hazard().hazard_at(3.0), 0.25 + 1.0 / 3.0 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_from_formula() {
        let table = Table::new()
            .with_column("time", vec![5.0, 3.0, 8.0, 2.0, 9.0, 4.0, 7.0, 6.0])
            .unwrap()
            .with_column("status", vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])
            .unwrap()
            .with_column("dose", vec![1.0, 2.0, 0.0, 2.5, 0.5, 1.0, 0.0, 1.5])
            .unwrap();
        let formula = Formula::parse("Surv(time, status) ~ dose").unwrap();
        let fitted = CoxModel::new().fit_formula(&formula, &table).unwrap();
        assert_eq!(fitted.covariate_names(), &["dose"]);
        assert!(fitted.coefficients()[0] > 0.0);
    }

    #[test]
    fn test_bad_alpha() {
        let fitted = CoxModel::new().fit(&binary_data()).unwrap();
        assert!(fitted.summary(0.0).is_err());
    }

    #[test]
    fn test_large_linear_predictors_keep_predictions_finite() {
        let data = binary_data();
        let lifted = SurvivalData::new(
            data.times().to_vec(),
            data.events().to_vec(),
            data.covariates().mapv(|x| x + 1000.0),
        )
        .unwrap();

        let fitted = CoxModel::new().fit(&data).unwrap();
        let lifted_fit = CoxModel::new().fit(&lifted).unwrap();
        // beta is about 1.7, so x·beta sits far beyond where exp() overflows
        assert!(lifted_fit.coefficients()[0] * 1000.0 > 710.0);
        assert_relative_eq!(lifted_fit.coefficients()[0], fitted.coefficients()[0], epsilon = 1e-6);

        let grid = [0.5, 2.0, 4.0, 6.0, 9.0, 12.0];
        let expected = predict_cohort(&fitted, &data, &grid, MonotonicityPolicy::Strict).unwrap();
        let actual = predict_cohort(&lifted_fit, &lifted, &grid, MonotonicityPolicy::Strict).unwrap();
        for i in 0..data.n_samples() {
            for &t in &grid {
                let s = actual.survival_at(i, t);
                assert!(s.is_finite());
                assert_relative_eq!(s, expected.survival_at(i, t), epsilon = 1e-5);
            }
        }
    }
}
