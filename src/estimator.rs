//! Kaplan-Meier and Nelson-Aalen estimators.
//!
//! Both are pure functions of [`SurvivalData::risk_set_table`], so ties are
//! handled exactly the same way here as in the log-rank test and the Cox
//! baseline hazard.

use std::io::Write;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};

/// one step of a product-limit curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub time: f64,
    pub n_at_risk: usize,
    pub n_events: usize,
    pub n_censored: usize,
    pub survival: f64,
    pub variance: f64, // greenwood
}

impl CurvePoint {
    /// true when at least one subject was censored at this time
    pub fn is_censoring_mark(&self) -> bool {
        self.n_censored > 0
    }
}

/// right-continuous, non-increasing step function with S = 1 before the first point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalCurve {
    points: Vec<CurvePoint>,
}

/// pointwise confidence interval transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceMethod {
    /// S ± z·se, clamped to [0, 1]
    Plain,
    /// interval built on log(-log S), always inside (0, 1)
    LogLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub time: f64,
    pub lower: f64,
    pub upper: f64,
}

impl SurvivalCurve {
    /// build a curve from explicit steps (no counts, zero variance)
    pub fn from_steps(times: &[f64], survival: &[f64]) -> Result<Self> {
        if times.len() != survival.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} times but {} survival values",
                times.len(),
                survival.len()
            )));
        }

        let mut prev_time = f64::NEG_INFINITY;
        let mut prev_surv = 1.0;
        for (&t, &s) in times.iter().zip(survival) {
            if !t.is_finite() || t < 0.0 || t <= prev_time {
                return Err(SurvivalError::invalid_input(
                    "curve times must be finite, non-negative and strictly increasing",
                ));
            }
            if !(0.0..=1.0).contains(&s) || s > prev_surv {
                return Err(SurvivalError::invariant_violation(format!(
                    "survival {} at t = {} is outside [0, 1] or increases",
                    s, t
                )));
            }
            prev_time = t;
            prev_surv = s;
        }

        let points = times
            .iter()
            .zip(survival)
            .map(|(&time, &survival)| CurvePoint {
                time,
                n_at_risk: 0,
                n_events: 0,
                n_censored: 0,
                survival,
                variance: 0.0,
            })
            .collect();
        Ok(Self { points })
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.time).collect()
    }

    /// time of the last step (0 for an empty curve)
    pub fn last_time(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.time)
    }

    /// S(t), right-continuous
    pub fn survival_at(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.time <= t);
        if idx == 0 {
            1.0
        } else {
            self.points[idx - 1].survival
        }
    }

    /// S(t-), the value just before any step at t
    pub fn survival_before(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.time < t);
        if idx == 0 {
            1.0
        } else {
            self.points[idx - 1].survival
        }
    }

    /// greenwood variance at t
    pub fn variance_at(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.time <= t);
        if idx == 0 {
            0.0
        } else {
            self.points[idx - 1].variance
        }
    }

    /// first time where S(t) <= 0.5, if the curve ever gets there
    pub fn median_survival(&self) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.survival <= 0.5)
            .map(|p| p.time)
    }

    /// pointwise `1 - alpha` bands at every step
    pub fn confidence_band(
        &self,
        alpha: f64,
        method: ConfidenceMethod,
    ) -> Result<Vec<ConfidenceInterval>> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SurvivalError::domain("alpha", alpha, "must be in (0, 1)"));
        }
        let z = normal_quantile(1.0 - alpha / 2.0)?;

        Ok(self
            .points
            .iter()
            .map(|p| {
                let s = p.survival;
                let se = p.variance.sqrt();
                let (lower, upper) = match method {
                    ConfidenceMethod::Plain => {
                        ((s - z * se).max(0.0), (s + z * se).min(1.0))
                    }
                    ConfidenceMethod::LogLog => {
                        if s <= 0.0 || s >= 1.0 || se == 0.0 {
                            (s, s)
                        } else {
                            let se_loglog = se / (s * s.ln().abs());
                            (s.powf((z * se_loglog).exp()), s.powf((-z * se_loglog).exp()))
                        }
                    }
                };
                ConfidenceInterval {
                    time: p.time,
                    lower,
                    upper,
                }
            })
            .collect())
    }

    /// write one csv row per step
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for point in &self.points {
            wtr.serialize(point)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

pub(crate) fn normal_quantile(p: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| SurvivalError::domain("normal", "N(0,1)", e.to_string()))?;
    Ok(normal.inverse_cdf(p))
}

/// product-limit estimate `S(t) = Π (1 - d_i/n_i)` with greenwood variance
pub fn kaplan_meier(data: &SurvivalData) -> SurvivalCurve {
    let mut survival = 1.0;
    let mut greenwood_sum = 0.0;

    let points = data
        .risk_set_table()
        .into_iter()
        .map(|row| {
            let n = row.n_at_risk as f64;
            let d = row.n_events as f64;

            if row.n_events > 0 && survival > 0.0 {
                if row.n_events == row.n_at_risk {
                    // risk set exhausted - curve stays at 0 with no spread
                    survival = 0.0;
                } else {
                    survival *= 1.0 - d / n;
                    greenwood_sum += d / (n * (n - d));
                }
            }

            let variance = if survival > 0.0 {
                survival * survival * greenwood_sum
            } else {
                0.0
            };

            CurvePoint {
                time: row.time,
                n_at_risk: row.n_at_risk,
                n_events: row.n_events,
                n_censored: row.n_censored,
                survival,
                variance,
            }
        })
        .collect();

    SurvivalCurve { points }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardPoint {
    pub time: f64,
    pub cumulative_hazard: f64,
    pub variance: f64,
}

/// right-continuous non-decreasing step function, H = 0 before the first point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeHazardCurve {
    points: Vec<HazardPoint>,
}

impl CumulativeHazardCurve {
    pub(crate) fn new(points: Vec<HazardPoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[HazardPoint] {
        &self.points
    }

    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.time).collect()
    }

    pub fn hazard_at(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.time <= t);
        if idx == 0 {
            0.0
        } else {
            self.points[idx - 1].cumulative_hazard
        }
    }

    /// `exp(-H(t))` at each step
    pub fn to_survival(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.time, (-p.cumulative_hazard).exp()))
            .collect()
    }
}

/// nelson-aalen `H(t) = Σ d_i/n_i` with variance `Σ d_i/n_i²`, stepping at event times
pub fn nelson_aalen(data: &SurvivalData) -> CumulativeHazardCurve {
    let mut hazard = 0.0;
    let mut variance = 0.0;

    let points = data
        .risk_set_table()
        .into_iter()
        .filter(|row| row.n_events > 0)
        .map(|row| {
            let n = row.n_at_risk as f64;
            let d = row.n_events as f64;
            hazard += d / n;
            variance += d / (n * n);
            HazardPoint {
                time: row.time,
                cumulative_hazard: hazard,
                variance,
            }
        })
        .collect();

    CumulativeHazardCurve { points }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn toy_cohort() -> SurvivalData {
        SurvivalData::without_covariates(
            vec![2.0, 3.0, 3.0, 4.0, 4.0, 6.0, 7.0, 8.0, 10.0, 10.0],
            vec![true, true, false, true, true, false, true, false, false, true],
        )
        .unwrap()
    }

    #[test]
    fn test_product_limit_toy_values() {
        let km = kaplan_meier(&toy_cohort());

        assert_relative_eq!(km.survival_at(0.0), 1.0);
        assert_relative_eq!(km.survival_at(1.9), 1.0);
        assert_relative_eq!(km.survival_at(2.0), 0.9, epsilon = 1e-12);
        assert_relative_eq!(km.survival_at(3.0), 0.8, epsilon = 1e-12);
        // 0.8 * (1 - 2/7)
        assert_relative_eq!(km.survival_at(4.0), 0.8 * 5.0 / 7.0, epsilon = 1e-12);
        assert_relative_eq!(km.survival_at(6.5), 0.8 * 5.0 / 7.0, epsilon = 1e-12);
        // one event among 4 at risk at t = 7
        assert_relative_eq!(km.survival_at(7.0), 0.8 * 5.0 / 7.0 * 0.75, epsilon = 1e-12);
        // the subject censored at 10 is still at risk there: n = 2, d = 1
        let s10 = 0.8 * 5.0 / 7.0 * 0.75 * 0.5;
        assert_relative_eq!(km.survival_at(10.0), s10, epsilon = 1e-12);
        assert_relative_eq!(km.survival_at(100.0), s10, epsilon = 1e-12);
    }

    #[test]
    fn test_curve_non_increasing() {
        let km = kaplan_meier(&toy_cohort());
        let mut prev = 1.0;
        for p in km.points() {
            assert!(p.survival <= prev);
            prev = p.survival;
        }
    }

    #[test]
    fn test_censoring_marks() {
        let km = kaplan_meier(&toy_cohort());
        let marks: Vec<f64> = km
            .points()
            .iter()
            .filter(|p| p.is_censoring_mark())
            .map(|p| p.time)
            .collect();
        assert_eq!(marks, vec![3.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_greenwood_variance() {
        let km = kaplan_meier(&toy_cohort());
        // after t = 3: S = 0.8, sum = 1/(10*9) + 1/(9*8)
        let expected = 0.8_f64.powi(2) * (1.0 / 90.0 + 1.0 / 72.0);
        assert_relative_eq!(km.variance_at(3.0), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_exhausted_risk_set_has_zero_variance() {
        let data = SurvivalData::without_covariates(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![true, true, true, true],
        )
        .unwrap();
        let km = kaplan_meier(&data);
        let last = km.points().last().unwrap();
        assert_eq!(last.survival, 0.0);
        assert_eq!(last.variance, 0.0);
        assert!(km.points().iter().all(|p| p.variance.is_finite()));
    }

    #[test]
    fn test_all_censored_is_flat() {
        let data =
            SurvivalData::without_covariates(vec![1.0, 2.0, 3.0], vec![false, false, false]).unwrap();
        let km = kaplan_meier(&data);
        assert!(km.points().iter().all(|p| p.survival == 1.0));
        assert_eq!(km.median_survival(), None);
    }

    #[test]
    fn test_estimate_is_restartable() {
        let data = toy_cohort();
        assert_eq!(kaplan_meier(&data), kaplan_meier(&data));
    }

    #[test]
    fn test_median_survival() {
        let km = kaplan_meier(&toy_cohort());
        // S(7) = 0.4286 is the first value <= 0.5
        assert_eq!(km.median_survival(), Some(7.0));
    }

    #[test]
    fn test_left_limit() {
        let km = kaplan_meier(&toy_cohort());
        assert_relative_eq!(km.survival_before(3.0), 0.9, epsilon = 1e-12);
        assert_relative_eq!(km.survival_before(2.0), 1.0);
    }

    #[test]
    fn test_nelson_aalen() {
        let na = nelson_aalen(&toy_cohort());
        assert_eq!(na.times(), vec![2.0, 3.0, 4.0, 7.0, 10.0]);
        assert_relative_eq!(na.hazard_at(1.0), 0.0);
        assert_relative_eq!(na.hazard_at(3.5), 0.1 + 1.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(
            na.hazard_at(10.0),
            0.1 + 1.0 / 9.0 + 2.0 / 7.0 + 0.25 + 0.5,
            epsilon = 1e-12
        );
        let mut prev = 0.0;
        for p in na.points() {
            assert!(p.cumulative_hazard >= prev);
            prev = p.cumulative_hazard;
        }
    }

    #[test]
    fn test_confidence_bands_contain_estimate() {
        let km = kaplan_meier(&toy_cohort());
        for method in [ConfidenceMethod::Plain, ConfidenceMethod::LogLog] {
            let band = km.confidence_band(0.05, method).unwrap();
            for (ci, p) in band.iter().zip(km.points()) {
                assert!(ci.lower <= p.survival + 1e-12);
                assert!(ci.upper >= p.survival - 1e-12);
                assert!(ci.lower >= 0.0 && ci.upper <= 1.0);
            }
        }
        assert!(km.confidence_band(1.5, ConfidenceMethod::Plain).is_err());
    }

    #[test]
    fn test_from_steps_validation() {
        assert!(SurvivalCurve::from_steps(&[1.0, 2.0], &[0.9, 0.95]).is_err());
        assert!(SurvivalCurve::from_steps(&[2.0, 1.0], &[0.9, 0.8]).is_err());
        assert!(SurvivalCurve::from_steps(&[1.0], &[0.9, 0.8]).is_err());
        let curve = SurvivalCurve::from_steps(&[1.0, 2.0], &[0.9, 0.5]).unwrap();
        assert_eq!(curve.survival_at(1.5), 0.9);
    }

    #[test]
    fn test_write_csv() {
        let km = kaplan_meier(&toy_cohort());
        let mut buf = Vec::new();
        km.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "time,n_at_risk,n_events,n_censored,survival,variance"
        );
        assert_eq!(lines.count(), km.len());
    }
}
