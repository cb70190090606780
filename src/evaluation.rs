//! Batch evaluation of several fitted models on one train/test split.
//!
//! Every (model, metric, time point) result is stored as its own `Result`;
//! a model whose predictions are invalid, or a time point where the censoring
//! weight is undefined, is reported next to the successful entries.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    brier::{brier_curve, integrated_brier_score, CensoringDistribution, TimePointScore},
    data::SurvivalData,
    error::{Result, SurvivalError},
    metrics::concordance_counts,
    prediction::{predict_cohort, MonotonicityPolicy, SurvivalModel},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub time_grid: Vec<f64>,
    /// IBS horizon, defaults to the last grid time
    pub tau_max: Option<f64>,
    pub policy: MonotonicityPolicy,
    pub parallel: bool,
}

impl EvaluationConfig {
    pub fn new(time_grid: Vec<f64>) -> Self {
        Self {
            time_grid,
            tau_max: None,
            policy: MonotonicityPolicy::default(),
            parallel: false,
        }
    }

    pub fn with_tau_max(mut self, tau_max: f64) -> Self {
        self.tau_max = Some(tau_max);
        self
    }

    pub fn with_policy(mut self, policy: MonotonicityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn horizon(&self) -> Result<f64> {
        match (self.tau_max, self.time_grid.last()) {
            (Some(tau), _) => Ok(tau),
            (None, Some(&last)) => Ok(last),
            (None, None) => Err(SurvivalError::invalid_input("time grid is empty")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluation {
    pub model: String,
    pub concordance: Result<f64>,
    pub brier: Vec<TimePointScore>,
    pub integrated_brier: Result<f64>,
}

impl ModelEvaluation {
    fn failed(model: &str, grid: &[f64], error: SurvivalError) -> Self {
        Self {
            model: model.to_string(),
            concordance: Err(error.clone()),
            brier: grid
                .iter()
                .map(|&time| TimePointScore {
                    time,
                    score: Err(error.clone()),
                })
                .collect(),
            integrated_brier: Err(error),
        }
    }

    /// true when no entry failed
    pub fn is_complete(&self) -> bool {
        self.concordance.is_ok()
            && self.integrated_brier.is_ok()
            && self.brier.iter().all(|p| p.score.is_ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub models: Vec<ModelEvaluation>,
}

impl EvaluationReport {
    /// first entry for a model name
    pub fn get(&self, model: &str) -> Option<&ModelEvaluation> {
        self.models.iter().find(|m| m.model == model)
    }

    pub fn print(&self) {
        fn show(r: &Result<f64>) -> String {
            match r {
                Ok(v) => format!("{:.4}", v),
                Err(e) => format!("n/a ({})", e),
            }
        }

        println!("model evaluation");
        println!("================");
        for m in &self.models {
            println!();
            println!("{}", m.model);
            println!("  c-index: {}", show(&m.concordance));
            println!("  ibs:     {}", show(&m.integrated_brier));
            for p in &m.brier {
                println!("  brier(t = {:>8.3}): {}", p.time, show(&p.score));
            }
        }
    }
}

/// Evaluate one model against a test cohort, with `G` already estimated from training data.
pub fn evaluate_model<M: SurvivalModel + ?Sized>(
    model: &M,
    test: &SurvivalData,
    censoring: &CensoringDistribution,
    config: &EvaluationConfig,
) -> ModelEvaluation {
    let grid = &config.time_grid;
    let predictions = match predict_cohort(model, test, grid, config.policy) {
        Ok(p) => p,
        Err(e) => {
            warn!("{} model: prediction failed: {}", model.name(), e);
            return ModelEvaluation::failed(model.name(), grid, e);
        }
    };

    let concordance = concordance_counts(test, &predictions, config.parallel).and_then(|c| c.c_index());
    let brier = brier_curve(test, &predictions, censoring, config.parallel);
    let integrated_brier = config
        .horizon()
        .and_then(|tau| integrated_brier_score(test, &predictions, censoring, tau));

    let evaluation = ModelEvaluation {
        model: model.name().to_string(),
        concordance,
        brier,
        integrated_brier,
    };
    if !evaluation.is_complete() {
        warn!("{} model: some metrics are undefined", model.name());
    }
    evaluation
}

/// Evaluate every model on the same split; the censoring distribution comes from `train`.
pub fn evaluate_models(
    models: &[&dyn SurvivalModel],
    train: &SurvivalData,
    test: &SurvivalData,
    config: &EvaluationConfig,
) -> EvaluationReport {
    let censoring = CensoringDistribution::estimate(train);
    info!(
        "evaluating {} models on {} test subjects at {} time points",
        models.len(),
        test.n_samples(),
        config.time_grid.len()
    );

    EvaluationReport {
        models: models
            .iter()
            .map(|&model| evaluate_model(model, test, &censoring, config))
            .collect(),
    }
}
