use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SurvivalError},
    estimator::SurvivalCurve,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmstEstimate {
    pub tau: f64,
    pub estimate: f64,
    pub variance: f64,
}

fn check_tau(tau: f64) -> Result<()> {
    if !(tau > 0.0) || !tau.is_finite() {
        return Err(SurvivalError::domain("tau", tau, "horizon must be positive and finite"));
    }
    Ok(())
}

/// `∫_0^tau S(u) du` for the step function; past the last step the final value is held flat.
pub fn rmst(curve: &SurvivalCurve, tau: f64) -> Result<f64> {
    check_tau(tau)?;
    Ok(area_up_to(curve, tau))
}

fn area_up_to(curve: &SurvivalCurve, tau: f64) -> f64 {
    let mut area = 0.0;
    let mut prev_time = 0.0;
    let mut level = 1.0;
    for p in curve.points() {
        if p.time >= tau {
            break;
        }
        area += level * (p.time - prev_time);
        prev_time = p.time;
        level = p.survival;
    }
    area + level * (tau - prev_time)
}

/// rmst at several horizons
pub fn rmst_curve(curve: &SurvivalCurve, taus: &[f64]) -> Result<Vec<(f64, f64)>> {
    taus.iter()
        .map(|&tau| rmst(curve, tau).map(|area| (tau, area)))
        .collect()
}

/// Rmst with its variance `Σ A_i² d_i / (n_i (n_i - d_i))`, `A_i` the area from event time `t_i` to `tau`.
///
/// Curves built without risk-set counts report zero variance.
pub fn rmst_with_variance(curve: &SurvivalCurve, tau: f64) -> Result<RmstEstimate> {
    let estimate = rmst(curve, tau)?;

    let mut variance = 0.0;
    for p in curve.points().iter().filter(|p| p.time <= tau && p.n_events > 0) {
        if p.n_at_risk <= p.n_events {
            continue;
        }
        let tail = estimate - area_up_to(curve, p.time);
        let n = p.n_at_risk as f64;
        let d = p.n_events as f64;
        variance += tail * tail * d / (n * (n - d));
    }

    Ok(RmstEstimate {
        tau,
        estimate,
        variance,
    })
}
