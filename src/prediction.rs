//! Model-agnostic prediction interface.
//!
//! Every model family (Cox here; exponential, Weibull or forest models from
//! other libraries) implements [`SurvivalFitter`] and [`SurvivalModel`]. The
//! evaluation code only ever sees a [`PredictionMatrix`], which is checked to
//! be a valid set of survival curves when it is built.

use log::warn;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};
use crate::estimator::{kaplan_meier, SurvivalCurve};
use crate::formula::{Formula, Table};

/// allowed upward wiggle between consecutive grid points before a curve counts as increasing
pub const MONOTONICITY_TOLERANCE: f64 = 1e-12;

/// what to do with predictions that are not valid survival curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MonotonicityPolicy {
    /// raise `InvariantViolation`
    #[default]
    Strict,
    /// clamp into [0, 1] and take the running minimum along time
    Clip,
}

/// a fitted model that can produce survival probabilities
pub trait SurvivalModel {
    /// family label used in reports
    fn name(&self) -> &str;

    /// covariate columns the model reads, in order; empty for covariate-free models
    fn covariate_names(&self) -> &[String];

    /// raw survival probabilities, one row per subject and one column per query time
    fn predict_survival(&self, covariates: ArrayView2<f64>, times: &[f64]) -> Result<Array2<f64>>;
}

/// something that fits a [`SurvivalModel`] from a formula and a table
pub trait SurvivalFitter {
    type Model: SurvivalModel;

    fn fit_formula(&self, formula: &Formula, table: &Table) -> Result<Self::Model>;
}

/// survival probabilities on a shared time grid: rows are grid times, columns are subjects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMatrix {
    times: Vec<f64>,
    values: Array2<f64>,
}

fn validate_grid(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(SurvivalError::invalid_input("time grid is empty"));
    }
    if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(SurvivalError::invalid_input(
            "time grid values must be finite and non-negative",
        ));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(SurvivalError::invalid_input("time grid must be strictly increasing"));
    }
    Ok(())
}

impl PredictionMatrix {
    /// normalize a `subjects x times` matrix (the usual library layout)
    pub fn from_subject_rows(
        times: &[f64],
        survival: Array2<f64>,
        policy: MonotonicityPolicy,
    ) -> Result<Self> {
        Self::from_time_rows(times, survival.reversed_axes(), policy)
    }

    /// build from a `times x subjects` matrix
    pub fn from_time_rows(
        times: &[f64],
        mut values: Array2<f64>,
        policy: MonotonicityPolicy,
    ) -> Result<Self> {
        validate_grid(times)?;
        if values.nrows() != times.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "prediction has {} time points, grid has {}",
                values.nrows(),
                times.len()
            )));
        }

        let mut clipped = 0usize;
        for (subject, mut curve) in values.axis_iter_mut(Axis(1)).enumerate() {
            let mut running_min = 1.0_f64;
            for (k, v) in curve.iter_mut().enumerate() {
                if v.is_nan() {
                    return Err(SurvivalError::invariant_violation(format!(
                        "subject {} has NaN survival at t = {}",
                        subject, times[k]
                    )));
                }

                let out_of_range = *v < 0.0 || *v > 1.0;
                let increasing = k > 0 && *v > running_min + MONOTONICITY_TOLERANCE;

                if out_of_range || increasing {
                    match policy {
                        MonotonicityPolicy::Strict => {
                            return Err(SurvivalError::invariant_violation(format!(
                                "subject {}: survival {} at t = {} is {}",
                                subject,
                                v,
                                times[k],
                                if out_of_range {
                                    "outside [0, 1]"
                                } else {
                                    "above an earlier value"
                                }
                            )));
                        }
                        MonotonicityPolicy::Clip => clipped += 1,
                    }
                }

                if policy == MonotonicityPolicy::Clip {
                    *v = v.clamp(0.0, 1.0).min(running_min);
                }
                running_min = running_min.min(*v);
            }
        }

        if clipped > 0 {
            warn!("clipped {} prediction values into valid survival curves", clipped);
        }

        Ok(Self {
            times: times.to_vec(),
            values,
        })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_subjects(&self) -> usize {
        self.values.ncols()
    }

    /// one subject's curve along the grid
    pub fn subject_curve(&self, subject: usize) -> ArrayView1<'_, f64> {
        self.values.column(subject)
    }

    /// every subject at grid point `k`
    pub fn at_time_index(&self, k: usize) -> ArrayView1<'_, f64> {
        self.values.row(k)
    }

    /// index of the last grid time <= t
    pub fn grid_index(&self, t: f64) -> Option<usize> {
        self.times.partition_point(|&g| g <= t).checked_sub(1)
    }

    /// step lookup: value at the latest grid time <= t, 1.0 before the grid starts
    pub fn survival_at(&self, subject: usize, t: f64) -> f64 {
        match self.grid_index(t) {
            Some(k) => self.values[[k, subject]],
            None => 1.0,
        }
    }

    /// keep only the given subjects (duplicates allowed)
    pub fn select_subjects(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&j| j >= self.n_subjects()) {
            return Err(SurvivalError::invalid_dimensions("subject index out of bounds"));
        }
        Ok(Self {
            times: self.times.clone(),
            values: self.values.select(Axis(1), indices),
        })
    }
}

/// run a model on a covariate matrix and normalize the output onto `grid`
pub fn predict<M: SurvivalModel + ?Sized>(
    model: &M,
    covariates: ArrayView2<f64>,
    grid: &[f64],
    policy: MonotonicityPolicy,
) -> Result<PredictionMatrix> {
    validate_grid(grid)?;
    let expected = model.covariate_names().len();
    if expected > 0 && covariates.ncols() != expected {
        return Err(SurvivalError::invalid_dimensions(format!(
            "{} model expects {} covariates, got {}",
            model.name(),
            expected,
            covariates.ncols()
        )));
    }

    let raw = model.predict_survival(covariates, grid)?;
    if raw.dim() != (covariates.nrows(), grid.len()) {
        return Err(SurvivalError::invalid_dimensions(format!(
            "{} model returned a {:?} matrix for {} subjects x {} times",
            model.name(),
            raw.dim(),
            covariates.nrows(),
            grid.len()
        )));
    }

    PredictionMatrix::from_subject_rows(grid, raw, policy)
}

/// same as [`predict`], selecting the model's covariate columns from a table
pub fn predict_table<M: SurvivalModel + ?Sized>(
    model: &M,
    table: &Table,
    grid: &[f64],
    policy: MonotonicityPolicy,
) -> Result<PredictionMatrix> {
    let covariates = table.matrix(model.covariate_names())?;
    predict(model, covariates.view(), grid, policy)
}

/// predictions for a cohort's own subjects, in cohort order
pub fn predict_cohort<M: SurvivalModel + ?Sized>(
    model: &M,
    data: &SurvivalData,
    grid: &[f64],
    policy: MonotonicityPolicy,
) -> Result<PredictionMatrix> {
    if model.covariate_names().is_empty() {
        let none = Array2::zeros((data.n_samples(), 0));
        return predict(model, none.view(), grid, policy);
    }
    predict(model, data.covariates(), grid, policy)
}

/// fits the population kaplan-meier curve and ignores covariates
#[derive(Debug, Clone, Copy, Default)]
pub struct KaplanMeierFitter;

/// covariate-free reference model: every subject gets the same curve
#[derive(Debug, Clone)]
pub struct KaplanMeierModel {
    curve: SurvivalCurve,
    names: Vec<String>,
}

impl KaplanMeierModel {
    pub fn fit(data: &SurvivalData) -> Self {
        Self {
            curve: kaplan_meier(data),
            names: Vec::new(),
        }
    }

    pub fn curve(&self) -> &SurvivalCurve {
        &self.curve
    }
}

impl SurvivalModel for KaplanMeierModel {
    fn name(&self) -> &str {
        "kaplan-meier"
    }

    fn covariate_names(&self) -> &[String] {
        &self.names
    }

    fn predict_survival(&self, covariates: ArrayView2<f64>, times: &[f64]) -> Result<Array2<f64>> {
        let n = covariates.nrows();
        Ok(Array2::from_shape_fn((n, times.len()), |(_, k)| {
            self.curve.survival_at(times[k])
        }))
    }
}

impl SurvivalFitter for KaplanMeierFitter {
    type Model = KaplanMeierModel;

    fn fit_formula(&self, formula: &Formula, table: &Table) -> Result<KaplanMeierModel> {
        let outcome_only = Formula::new(formula.time.clone(), formula.status.clone(), Vec::new());
        let data = SurvivalData::from_table(table, &outcome_only)?;
        Ok(KaplanMeierModel::fit(&data))
    }
}
