//! Percentile bootstrap intervals for any scalar statistic.
//!
//! Randomness is explicit: every run is driven by the seed in
//! [`BootstrapConfig`]. One seed per resample is drawn up front from a single
//! `StdRng`, so sequential and parallel runs produce identical intervals.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
};

/// fewest resamples (and fewest successful replicates) accepted for a percentile interval
pub const MIN_RESAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub n_resamples: usize,
    /// interval runs from the `alpha` to the `1 - alpha` quantile
    pub alpha: f64,
    pub seed: u64,
    pub parallel: bool,
}

impl BootstrapConfig {
    pub fn new(n_resamples: usize, alpha: f64, seed: u64) -> Self {
        Self {
            n_resamples,
            alpha,
            seed,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 0.5) {
            return Err(SurvivalError::domain("alpha", self.alpha, "must lie in (0, 0.5)"));
        }
        if self.n_resamples < MIN_RESAMPLES {
            return Err(SurvivalError::domain(
                "n_resamples",
                self.n_resamples,
                format!("need at least {} resamples", MIN_RESAMPLES),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapInterval {
    /// statistic on the original sample
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub alpha: f64,
    pub n_resamples: usize,
    /// resamples whose statistic errored or was not finite
    pub n_failed: usize,
}

/// Percentile interval for `statistic` over resamples of `sample` drawn with replacement.
pub fn bootstrap_ci<T, F>(sample: &[T], statistic: F, config: &BootstrapConfig) -> Result<BootstrapInterval>
where
    T: Clone + Sync,
    F: Fn(&[T]) -> Result<f64> + Sync,
{
    config.validate()?;
    if sample.is_empty() {
        return Err(SurvivalError::invalid_input("cannot bootstrap an empty sample"));
    }

    let estimate = statistic(sample)?;
    let replicate = |indices: &[usize]| {
        let resample: Vec<T> = indices.iter().map(|&i| sample[i].clone()).collect();
        statistic(&resample)
    };

    summarize(estimate, run_resamples(sample.len(), config, &replicate), config)
}

/// Percentile interval for a statistic of a cohort, resampling whole subjects.
pub fn bootstrap_cohort_ci<F>(
    data: &SurvivalData,
    statistic: F,
    config: &BootstrapConfig,
) -> Result<BootstrapInterval>
where
    F: Fn(&SurvivalData) -> Result<f64> + Sync,
{
    config.validate()?;

    let estimate = statistic(data)?;
    let replicate = |indices: &[usize]| statistic(&data.subset(indices)?);

    summarize(estimate, run_resamples(data.n_samples(), config, &replicate), config)
}

fn resample_indices(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

/// replicate values in resample order
fn run_resamples(
    n: usize,
    config: &BootstrapConfig,
    replicate: &(dyn Fn(&[usize]) -> Result<f64> + Sync),
) -> Vec<Result<f64>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let seeds: Vec<u64> = (0..config.n_resamples).map(|_| rng.gen()).collect();

    let one = |(b, &seed): (usize, &u64)| {
        let value = replicate(&resample_indices(n, seed));
        if let Err(e) = &value {
            debug!("resample {} failed: {}", b, e);
        }
        value
    };

    if config.parallel {
        seeds.par_iter().enumerate().map(one).collect()
    } else {
        seeds.iter().enumerate().map(one).collect()
    }
}

fn summarize(
    estimate: f64,
    replicates: Vec<Result<f64>>,
    config: &BootstrapConfig,
) -> Result<BootstrapInterval> {
    let mut values: Vec<f64> = replicates
        .into_iter()
        .filter_map(|r| r.ok())
        .filter(|v| v.is_finite())
        .collect();
    let n_failed = config.n_resamples - values.len();

    if n_failed > 0 {
        warn!(
            "{} of {} bootstrap resamples failed and were skipped",
            n_failed, config.n_resamples
        );
    }
    if values.len() < MIN_RESAMPLES {
        return Err(SurvivalError::insufficient_data(format!(
            "only {} successful resamples, need {}",
            values.len(),
            MIN_RESAMPLES
        )));
    }

    values.sort_by(|a, b| a.total_cmp(b));

    Ok(BootstrapInterval {
        estimate,
        lower: quantile(&values, config.alpha),
        upper: quantile(&values, 1.0 - config.alpha),
        alpha: config.alpha,
        n_resamples: config.n_resamples,
        n_failed,
    })
}

/// type-7 quantile of sorted, non-empty values
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}
