use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    estimator::{CumulativeHazardCurve, HazardPoint},
    linalg,
};

/// How tied event times share the risk-set denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TieMethod {
    /// All tied events see the full risk set.
    #[default]
    Breslow,
    /// Tied events progressively remove their average weight from the denominator.
    Efron,
}

/// Configuration for Newton-Raphson on the log partial likelihood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64, // on the euclidean norm of the penalized gradient
    pub max_step_halvings: usize,
    pub ties: TieMethod,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l2_penalty: 0.0,
            max_iterations: 50,
            tolerance: 1e-7,
            max_step_halvings: 30,
            ties: TieMethod::Breslow,
        }
    }
}

/// log partial likelihood with first & second derivatives at one beta
#[derive(Debug, Clone)]
pub struct LikelihoodDerivatives {
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    /// observed information, i.e. minus the hessian
    pub information: Array2<f64>,
}

/// what a finished Newton-Raphson run hands back
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub beta: Array1<f64>,
    pub log_likelihood: f64,      // unpenalized, at beta
    pub null_log_likelihood: f64, // unpenalized, at beta = 0
    pub information: Array2<f64>, // penalized, at beta
    pub gradient_norm: f64,
    pub iterations: usize,
}

/// Groups of sample indices sharing a time, latest time first.
fn descending_time_groups(data: &SurvivalData) -> Vec<Vec<usize>> {
    let times = data.times();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for &i in data.sorted_indices().iter().rev() {
        match groups.last_mut() {
            Some(group) if times[group[0]] == times[i] => group.push(i),
            _ => groups.push(vec![i]),
        }
    }
    groups
}

/// (fraction of tied weight removed, multiplicity) for each term of a tied group
fn tie_terms(ties: TieMethod, n_events: usize) -> Vec<(f64, f64)> {
    match ties {
        TieMethod::Breslow => vec![(0.0, n_events as f64)],
        TieMethod::Efron => (0..n_events)
            .map(|l| (l as f64 / n_events as f64, 1.0))
            .collect(),
    }
}

fn linear_predictors(data: &SurvivalData, beta: ArrayView1<f64>) -> Array1<f64> {
    data.covariates().dot(&beta)
}

/// Evaluate the log partial likelihood and its derivatives in one backwards sweep over time.
///
/// Exponents are shifted by their maximum before exponentiating; the shift is
/// added back to the log denominators so the likelihood is unaffected.
pub fn partial_likelihood(
    data: &SurvivalData,
    beta: ArrayView1<f64>,
    ties: TieMethod,
) -> LikelihoodDerivatives {
    let p = data.n_features();
    let x = data.covariates();
    let events = data.events();

    let eta = linear_predictors(data, beta);
    let shift = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = eta.mapv(|e| (e - shift).exp());

    let mut log_likelihood = 0.0;
    let mut gradient = Array1::zeros(p);
    let mut information = Array2::zeros((p, p));

    // running risk-set sums
    let mut s0 = 0.0;
    let mut s1 = Array1::<f64>::zeros(p);
    let mut s2 = Array2::<f64>::zeros((p, p));

    for group in descending_time_groups(data) {
        let mut t0 = 0.0;
        let mut t1 = Array1::<f64>::zeros(p);
        let mut t2 = Array2::<f64>::zeros((p, p));
        let mut n_events = 0;

        for &i in &group {
            let xi = x.row(i);
            let wi = weights[i];
            let outer = outer_product(xi) * wi;

            s0 += wi;
            s1.scaled_add(wi, &xi);
            s2 += &outer;

            if events[i] {
                n_events += 1;
                t0 += wi;
                t1.scaled_add(wi, &xi);
                t2 += &outer;
                log_likelihood += eta[i];
                gradient += &xi;
            }
        }

        if n_events == 0 {
            continue;
        }

        for (frac, mult) in tie_terms(ties, n_events) {
            let a0 = s0 - frac * t0;
            let a1 = &s1 - &(frac * &t1);
            let a2 = &s2 - &(frac * &t2);
            let mean = &a1 / a0;

            log_likelihood -= mult * (a0.ln() + shift);
            gradient.scaled_add(-mult, &mean);
            let variance = &a2 / a0 - &outer_product(mean.view());
            information.scaled_add(mult, &variance);
        }
    }

    LikelihoodDerivatives {
        log_likelihood,
        gradient,
        information,
    }
}

fn outer_product(v: ArrayView1<f64>) -> Array2<f64> {
    let col = v.insert_axis(Axis(1));
    let row = v.insert_axis(Axis(0));
    col.dot(&row)
}

/// Cox proportional hazards optimizer (Newton-Raphson with step halving)
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

/// penalized objective pieces at one beta
struct Evaluation {
    derivs: LikelihoodDerivatives,
    penalized_log_likelihood: f64,
    penalized_gradient: Array1<f64>,
    penalized_information: Array2<f64>,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    fn evaluate(&self, data: &SurvivalData, beta: &Array1<f64>) -> Evaluation {
        let lambda = self.config.l2_penalty;
        let derivs = partial_likelihood(data, beta.view(), self.config.ties);

        let penalized_log_likelihood = derivs.log_likelihood - 0.5 * lambda * beta.dot(beta);
        let penalized_gradient = &derivs.gradient - &(lambda * beta);
        let mut penalized_information = derivs.information.clone();
        for j in 0..beta.len() {
            penalized_information[[j, j]] += lambda;
        }

        Evaluation {
            derivs,
            penalized_log_likelihood,
            penalized_gradient,
            penalized_information,
        }
    }

    /// maximize the (optionally ridge-penalized) log partial likelihood starting at beta = 0
    pub fn optimize(&self, data: &SurvivalData) -> Result<OptimizationOutcome> {
        if data.n_events() == 0 {
            return Err(SurvivalError::insufficient_data(
                "cox fit needs at least one event",
            ));
        }
        if self.config.l2_penalty < 0.0 || !self.config.l2_penalty.is_finite() {
            return Err(SurvivalError::domain(
                "l2_penalty",
                self.config.l2_penalty,
                "must be finite and non-negative",
            ));
        }
        if !(self.config.tolerance > 0.0) {
            return Err(SurvivalError::domain(
                "tolerance",
                self.config.tolerance,
                "must be positive",
            ));
        }

        let mut beta = Array1::zeros(data.n_features());
        let mut current = self.evaluate(data, &beta);
        let null_log_likelihood = current.derivs.log_likelihood;

        for iteration in 0..=self.config.max_iterations {
            let gradient_norm = current.penalized_gradient.dot(&current.penalized_gradient).sqrt();
            debug!(
                "newton-raphson iteration {}: loglik = {:.8}, |gradient| = {:e}",
                iteration, current.penalized_log_likelihood, gradient_norm
            );

            if gradient_norm < self.config.tolerance {
                info!(
                    "cox fit converged after {} iterations (loglik = {:.6})",
                    iteration, current.derivs.log_likelihood
                );
                return Ok(OptimizationOutcome {
                    beta,
                    log_likelihood: current.derivs.log_likelihood,
                    null_log_likelihood,
                    information: current.penalized_information,
                    gradient_norm,
                    iterations: iteration,
                });
            }

            if iteration == self.config.max_iterations {
                return Err(SurvivalError::Convergence {
                    iterations: iteration,
                    gradient_norm,
                });
            }

            let mut step = linalg::solve(&current.penalized_information, &current.penalized_gradient)?;
            let mut candidate = &beta + &step;
            let mut next = self.evaluate(data, &candidate);

            let mut halvings = 0;
            while !(next.penalized_log_likelihood.is_finite()
                && next.penalized_log_likelihood >= current.penalized_log_likelihood)
                && halvings < self.config.max_step_halvings
            {
                step *= 0.5;
                candidate = &beta + &step;
                next = self.evaluate(data, &candidate);
                halvings += 1;
            }

            if !next.penalized_log_likelihood.is_finite() {
                return Err(SurvivalError::Convergence {
                    iterations: iteration + 1,
                    gradient_norm: f64::NAN,
                });
            }
            if halvings > 0 {
                debug!("step halved {} times", halvings);
            }

            beta = candidate;
            current = next;
        }

        // the loop always returns on its final pass
        Err(SurvivalError::Convergence {
            iterations: self.config.max_iterations,
            gradient_norm: f64::NAN,
        })
    }
}

/// Baseline cumulative hazard expressed at a reference linear predictor.
///
/// The curve is the cumulative hazard of a subject with `x·beta = reference`,
/// where `reference` is the largest linear predictor of the training cohort.
/// Increments stay finite for any magnitude of `x·beta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineHazard {
    reference: f64,
    curve: CumulativeHazardCurve,
}

impl BaselineHazard {
    pub fn reference(&self) -> f64 {
        self.reference
    }

    /// hazard curve of a subject at the reference linear predictor
    pub fn reference_curve(&self) -> &CumulativeHazardCurve {
        &self.curve
    }

    /// `H(t | x) = H_ref(t) · exp(eta - reference)` for linear predictor `eta`
    pub fn hazard_at(&self, t: f64, eta: f64) -> f64 {
        let h = self.curve.hazard_at(t);
        if h == 0.0 {
            0.0
        } else {
            h * (eta - self.reference).exp()
        }
    }

    /// the curve at x = 0; underflows towards 0 when the training predictors are very large
    pub fn at_zero(&self) -> CumulativeHazardCurve {
        let scale = (-self.reference).exp();
        CumulativeHazardCurve::new(
            self.curve
                .points()
                .iter()
                .map(|p| HazardPoint {
                    time: p.time,
                    cumulative_hazard: p.cumulative_hazard * scale,
                    variance: p.variance * scale * scale,
                })
                .collect(),
        )
    }
}

/// Breslow-type baseline cumulative hazard at `beta`, kept relative to the largest linear predictor.
///
/// With Efron ties the increment at a tied time is `Σ_l 1 / (S0 - l/d · T0)`.
pub fn baseline_cumulative_hazard(
    data: &SurvivalData,
    beta: ArrayView1<f64>,
    ties: TieMethod,
) -> BaselineHazard {
    let times = data.times();
    let events = data.events();
    let eta = linear_predictors(data, beta);
    let shift = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = eta.mapv(|e| (e - shift).exp());

    let mut s0 = 0.0;
    let mut increments: Vec<(f64, f64, f64)> = Vec::new(); // (time, dH, dVar)

    for group in descending_time_groups(data) {
        let mut t0 = 0.0;
        let mut n_events = 0;
        for &i in &group {
            s0 += weights[i];
            if events[i] {
                t0 += weights[i];
                n_events += 1;
            }
        }
        if n_events == 0 {
            continue;
        }

        let mut d_hazard = 0.0;
        let mut d_variance = 0.0;
        for (frac, mult) in tie_terms(ties, n_events) {
            let denom = s0 - frac * t0;
            d_hazard += mult / denom;
            d_variance += mult / (denom * denom);
        }
        increments.push((times[group[0]], d_hazard, d_variance));
    }

    let mut hazard = 0.0;
    let mut variance = 0.0;
    let points = increments
        .into_iter()
        .rev()
        .map(|(time, dh, dv)| {
            hazard += dh;
            variance += dv;
            HazardPoint {
                time,
                cumulative_hazard: hazard,
                variance,
            }
        })
        .collect();

    BaselineHazard {
        reference: shift,
        curve: CumulativeHazardCurve::new(points),
    }
}
