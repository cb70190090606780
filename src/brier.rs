//! Inverse-probability-of-censoring weighted Brier score.
//!
//! The censoring distribution `G` is the Kaplan-Meier curve of the training
//! cohort with the event indicator reversed. A subject observed beyond `t`
//! is weighted by `1/G(t)`, a subject with an event by `t` by `1/G(T_i)`, and
//! a subject censored by `t` gets weight 0.

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    estimator::{kaplan_meier, SurvivalCurve},
    prediction::PredictionMatrix,
};

/// marginal censoring survival `G(t)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensoringDistribution {
    curve: SurvivalCurve,
}

impl CensoringDistribution {
    /// kaplan-meier on the reversed event indicator
    pub fn estimate(train: &SurvivalData) -> Self {
        Self {
            curve: kaplan_meier(&train.reversed()),
        }
    }

    pub fn curve(&self) -> &SurvivalCurve {
        &self.curve
    }

    /// G(t)
    pub fn survival_at(&self, t: f64) -> f64 {
        self.curve.survival_at(t)
    }
}

fn inverse(g: f64, time: f64) -> Result<f64> {
    if g > 0.0 {
        Ok(1.0 / g)
    } else {
        Err(SurvivalError::UndefinedWeight { time })
    }
}

/// IPCW weight of one subject at evaluation time `t`
pub fn ipcw_weight(
    time: f64,
    event: bool,
    t: f64,
    censoring: &CensoringDistribution,
) -> Result<f64> {
    if time > t {
        inverse(censoring.survival_at(t), t)
    } else if event {
        inverse(censoring.survival_at(time), time)
    } else {
        Ok(0.0)
    }
}

/// weights for every subject of a cohort at `t`
pub fn censoring_weights(
    data: &SurvivalData,
    t: f64,
    censoring: &CensoringDistribution,
) -> Result<Array1<f64>> {
    let times = data.times();
    data.events()
        .iter()
        .enumerate()
        .map(|(i, &event)| ipcw_weight(times[i], event, t, censoring))
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}

fn check_subjects(data: &SurvivalData, predictions: &PredictionMatrix) -> Result<()> {
    if predictions.n_subjects() != data.n_samples() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "prediction matrix has {} subjects, cohort has {}",
            predictions.n_subjects(),
            data.n_samples()
        )));
    }
    Ok(())
}

/// Brier score at `t`: mean over subjects of `w_i(t) · (1[T_i > t] - S_i(t))²`.
pub fn brier_score(
    data: &SurvivalData,
    predictions: &PredictionMatrix,
    t: f64,
    censoring: &CensoringDistribution,
) -> Result<f64> {
    check_subjects(data, predictions)?;
    if !(t >= 0.0) || !t.is_finite() {
        return Err(SurvivalError::domain("t", t, "evaluation time must be finite and non-negative"));
    }

    let times = data.times();
    let events = data.events();
    let mut total = 0.0;

    for i in 0..data.n_samples() {
        let weight = ipcw_weight(times[i], events[i], t, censoring)?;
        if weight == 0.0 {
            continue;
        }
        let survived = if times[i] > t { 1.0 } else { 0.0 };
        let predicted = predictions.survival_at(i, t);
        total += weight * (survived - predicted).powi(2);
    }

    Ok(total / data.n_samples() as f64)
}

/// one grid point's Brier score or the reason it is undefined
#[derive(Debug, Clone, PartialEq)]
pub struct TimePointScore {
    pub time: f64,
    pub score: Result<f64>,
}

/// Brier score at every grid time of `predictions`; failures stay attached to their time point
pub fn brier_curve(
    data: &SurvivalData,
    predictions: &PredictionMatrix,
    censoring: &CensoringDistribution,
    parallel: bool,
) -> Vec<TimePointScore> {
    let score_at = |&time: &f64| TimePointScore {
        time,
        score: brier_score(data, predictions, time, censoring),
    };

    if parallel {
        predictions.times().par_iter().map(score_at).collect()
    } else {
        predictions.times().iter().map(score_at).collect()
    }
}

/// Trapezoidal integral of the Brier score over the grid times `<= tau_max`, divided by `tau_max`.
pub fn integrated_brier_score(
    data: &SurvivalData,
    predictions: &PredictionMatrix,
    censoring: &CensoringDistribution,
    tau_max: f64,
) -> Result<f64> {
    if !(tau_max > 0.0) || !tau_max.is_finite() {
        return Err(SurvivalError::domain("tau_max", tau_max, "must be positive and finite"));
    }

    let grid: Vec<f64> = predictions
        .times()
        .iter()
        .copied()
        .filter(|&t| t <= tau_max)
        .collect();
    if grid.len() < 2 {
        return Err(SurvivalError::insufficient_data(format!(
            "need at least 2 grid times <= {} to integrate, have {}",
            tau_max,
            grid.len()
        )));
    }

    let scores = grid
        .iter()
        .map(|&t| brier_score(data, predictions, t, censoring))
        .collect::<Result<Vec<f64>>>()?;

    Ok(trapezoid(&grid, &scores) / tau_max)
}

pub(crate) fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (ys[0] + ys[1]) * (xs[1] - xs[0]))
        .sum()
}
