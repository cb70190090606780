use std::ops::Add;

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    prediction::PredictionMatrix,
};

/// the same record can't be compared with itself
pub fn is_same_subject(i: usize, j: usize) -> bool {
    i == j
}

/// neither subject's event was observed - no ordering information
pub fn both_censored(event_i: bool, event_j: bool) -> bool {
    !event_i && !event_j
}

/// identical times - neither subject is known to have failed first
pub fn tied_times(time_i: f64, time_j: f64) -> bool {
    time_i == time_j
}

/// the earlier of the two times is a censoring, so we don't know who failed first
pub fn censored_before_event(time_i: f64, event_i: bool, time_j: f64, event_j: bool) -> bool {
    if time_i < time_j {
        !event_i
    } else {
        !event_j
    }
}

/// If subjects i and j form a comparable pair, return them as `(first_to_fail, other)`.
pub fn comparable_pair(
    i: usize,
    j: usize,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Option<(usize, usize)> {
    let (ti, ei, tj, ej) = (times[i], events[i], times[j], events[j]);

    if is_same_subject(i, j)
        || both_censored(ei, ej)
        || tied_times(ti, tj)
        || censored_before_event(ti, ei, tj, ej)
    {
        return None;
    }

    if ti < tj {
        Some((i, j))
    } else {
        Some((j, i))
    }
}

/// pair counts behind a concordance estimate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCounts {
    pub concordant: u64,
    pub discordant: u64,
    pub tied: u64, // equal predictions, counted half each way
}

impl PairCounts {
    pub fn comparable(&self) -> u64 {
        self.concordant + self.discordant + self.tied
    }

    /// `(concordant + tied/2) / comparable`
    pub fn c_index(&self) -> Result<f64> {
        let total = self.comparable();
        if total == 0 {
            return Err(SurvivalError::undefined_metric(
                "no comparable pairs for concordance",
            ));
        }
        Ok((self.concordant as f64 + 0.5 * self.tied as f64) / total as f64)
    }

    fn record(&mut self, first_lower: bool, equal: bool) {
        if equal {
            self.tied += 1;
        } else if first_lower {
            self.concordant += 1;
        } else {
            self.discordant += 1;
        }
    }
}

impl Add for PairCounts {
    type Output = PairCounts;

    fn add(self, other: PairCounts) -> PairCounts {
        PairCounts {
            concordant: self.concordant + other.concordant,
            discordant: self.discordant + other.discordant,
            tied: self.tied + other.tied,
        }
    }
}

/// pairs where `i` is the subject who failed first
fn counts_for_subject(
    i: usize,
    times: ArrayView1<f64>,
    events: &[bool],
    score: &(dyn Fn(usize, usize) -> (f64, f64) + Sync),
) -> PairCounts {
    let mut counts = PairCounts::default();
    if !events[i] {
        return counts;
    }

    for j in 0..times.len() {
        if let Some((first, other)) = comparable_pair(i, j, times, events) {
            if first != i {
                continue;
            }
            // (value for the early failure, value for the other subject); lower = worse outlook
            let (early, late) = score(first, other);
            counts.record(early < late, early == late);
        }
    }
    counts
}

fn count_pairs(
    times: ArrayView1<f64>,
    events: &[bool],
    parallel: bool,
    score: &(dyn Fn(usize, usize) -> (f64, f64) + Sync),
) -> PairCounts {
    let n = times.len();
    if parallel {
        (0..n)
            .into_par_iter()
            .map(|i| counts_for_subject(i, times, events, score))
            .reduce(PairCounts::default, |a, b| a + b)
    } else {
        (0..n)
            .map(|i| counts_for_subject(i, times, events, score))
            .fold(PairCounts::default(), |a, b| a + b)
    }
}

/// Concordance of predicted survival with observed times.
///
/// For a comparable pair where `i` failed first, both subjects' predicted
/// survival is read at `time_i`; the pair is concordant when `i`'s is lower.
pub fn concordance_index(data: &SurvivalData, predictions: &PredictionMatrix) -> Result<f64> {
    concordance_counts(data, predictions, false)?.c_index()
}

/// [`concordance_index`] with the pair loop split across the rayon pool
pub fn par_concordance_index(data: &SurvivalData, predictions: &PredictionMatrix) -> Result<f64> {
    concordance_counts(data, predictions, true)?.c_index()
}

/// raw pair counts behind [`concordance_index`]
pub fn concordance_counts(
    data: &SurvivalData,
    predictions: &PredictionMatrix,
    parallel: bool,
) -> Result<PairCounts> {
    if predictions.n_subjects() != data.n_samples() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "prediction matrix has {} subjects, cohort has {}",
            predictions.n_subjects(),
            data.n_samples()
        )));
    }

    let times = data.times();
    let score = |first: usize, other: usize| {
        let t = times[first];
        (predictions.survival_at(first, t), predictions.survival_at(other, t))
    };

    Ok(count_pairs(times, data.events(), parallel, &score))
}

/// Harrell's C on risk scores: higher risk should mean earlier failure.
pub fn harrell_c_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvivalError::invalid_dimensions(
            "risk scores, times, and events must have same length",
        ));
    }

    // negate so "lower = worse outlook" holds like for survival probabilities
    let score = |first: usize, other: usize| (-risk_scores[first], -risk_scores[other]);
    count_pairs(times, events, false, &score).c_index()
}
