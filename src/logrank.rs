//! Log-rank family of tests comparing hazard experience across groups.

use std::collections::BTreeMap;
use std::fmt::Display;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    linalg,
};

/// per-time weight applied to observed-minus-expected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RankWeight {
    /// w = 1
    #[default]
    LogRank,
    /// w = n_i, emphasizes early differences
    GehanWilcoxon,
    /// w = sqrt(n_i)
    TaroneWare,
}

impl RankWeight {
    fn weight(self, n_at_risk: f64) -> f64 {
        match self {
            RankWeight::LogRank => 1.0,
            RankWeight::GehanWilcoxon => n_at_risk,
            RankWeight::TaroneWare => n_at_risk.sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub label: String,
    pub n: usize,
    pub observed: f64, // events
    pub expected: f64, // under equal hazards
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRankResult {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    pub groups: Vec<GroupSummary>,
    pub weight: RankWeight,
}

/// unweighted log-rank test of `groups` (one label per subject)
pub fn log_rank_test<G>(data: &SurvivalData, groups: &[G]) -> Result<LogRankResult>
where
    G: Ord + Clone + Display,
{
    weighted_log_rank_test(data, groups, RankWeight::LogRank)
}

/// log-rank test on the labels attached with [`SurvivalData::with_groups`]
pub fn log_rank_by_group(data: &SurvivalData) -> Result<LogRankResult> {
    let groups = data.groups().ok_or_else(|| {
        SurvivalError::invalid_input("cohort has no group labels attached")
    })?;
    log_rank_test(data, groups)
}

/// Weighted log-rank test over all distinct event times of the pooled cohort.
///
/// With `U_g = Σ w_i (O_gi - E_gi)` and hypergeometric covariance `V`, the
/// statistic is `U' V⁻¹ U` over all but one group, chi-squared with
/// `groups - 1` degrees of freedom.
pub fn weighted_log_rank_test<G>(
    data: &SurvivalData,
    groups: &[G],
    weight: RankWeight,
) -> Result<LogRankResult>
where
    G: Ord + Clone + Display,
{
    if groups.len() != data.n_samples() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "groups len ({}) != n_samples ({})",
            groups.len(),
            data.n_samples()
        )));
    }

    let mut index: BTreeMap<G, usize> = BTreeMap::new();
    for g in groups {
        let next = index.len();
        index.entry(g.clone()).or_insert(next);
    }
    // renumber in label order so output is deterministic
    for (k, slot) in index.values_mut().enumerate() {
        *slot = k;
    }
    let k = index.len();
    let group_of: Vec<usize> = groups.iter().map(|g| index[g]).collect();

    let times = data.times();
    let events = data.events();

    let mut size = vec![0usize; k];
    let mut event_counts = vec![0usize; k];
    for (i, &g) in group_of.iter().enumerate() {
        size[g] += 1;
        if events[i] {
            event_counts[g] += 1;
        }
    }
    let groups_with_events = event_counts.iter().filter(|&&c| c > 0).count();
    if groups_with_events < 2 {
        return Err(SurvivalError::insufficient_data(format!(
            "log-rank needs at least 2 groups with events, found {}",
            groups_with_events
        )));
    }

    let mut at_risk: Vec<f64> = size.iter().map(|&s| s as f64).collect();
    let mut observed = Array1::<f64>::zeros(k);
    let mut expected = Array1::<f64>::zeros(k);
    let mut u = Array1::<f64>::zeros(k);
    let mut v = Array2::<f64>::zeros((k, k));

    let order = data.sorted_indices();
    let mut pos = 0;
    while pos < order.len() {
        let t = times[order[pos]];
        let mut d_group = vec![0.0; k];
        let mut leaving = vec![0.0; k];

        while pos < order.len() && times[order[pos]] == t {
            let i = order[pos];
            let g = group_of[i];
            leaving[g] += 1.0;
            if events[i] {
                d_group[g] += 1.0;
            }
            pos += 1;
        }

        let d: f64 = d_group.iter().sum();
        let n: f64 = at_risk.iter().sum();

        if d > 0.0 {
            let w = weight.weight(n);
            for g in 0..k {
                let e = d * at_risk[g] / n;
                observed[g] += d_group[g];
                expected[g] += e;
                u[g] += w * (d_group[g] - e);
            }

            if n > 1.0 {
                let c = w * w * d * (n - d) / (n * n * (n - 1.0));
                for g in 0..k {
                    for h in 0..k {
                        let delta = if g == h { n } else { 0.0 };
                        v[[g, h]] += c * at_risk[g] * (delta - at_risk[h]);
                    }
                }
            }
        }

        for g in 0..k {
            at_risk[g] -= leaving[g];
        }
    }

    // groups never sharing a risk set with another carry no information
    let active: Vec<usize> = (0..k).filter(|&g| v[[g, g]] > 0.0).collect();
    if active.len() < 2 {
        return Err(SurvivalError::insufficient_data(
            "fewer than 2 groups overlap in their risk sets",
        ));
    }
    let kept = &active[..active.len() - 1];
    let u_sub = Array1::from_iter(kept.iter().map(|&g| u[g]));
    let v_sub = Array2::from_shape_fn((kept.len(), kept.len()), |(a, b)| v[[kept[a], kept[b]]]);

    let solved = linalg::solve(&v_sub, &u_sub)?;
    let statistic = u_sub.dot(&solved).max(0.0);
    let degrees_of_freedom = kept.len();

    let chi = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| SurvivalError::domain("degrees_of_freedom", degrees_of_freedom, e.to_string()))?;
    let p_value = 1.0 - chi.cdf(statistic);

    let summaries = index
        .iter()
        .map(|(label, &g)| GroupSummary {
            label: label.to_string(),
            n: size[g],
            observed: observed[g],
            expected: expected[g],
        })
        .collect();

    Ok(LogRankResult {
        statistic,
        degrees_of_freedom,
        p_value,
        groups: summaries,
        weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cohort(times: Vec<f64>, events: Vec<bool>) -> SurvivalData {
        SurvivalData::without_covariates(times, events).unwrap()
    }

    #[test]
    fn test_identical_groups_give_zero() {
        let base_t = vec![2.0, 3.0, 3.0, 4.0, 4.0, 6.0, 7.0, 8.0, 10.0, 10.0];
        let base_e = vec![true, true, false, true, true, false, true, false, false, true];
        let times: Vec<f64> = base_t.iter().chain(base_t.iter()).copied().collect();
        let events: Vec<bool> = base_e.iter().chain(base_e.iter()).copied().collect();
        let groups: Vec<&str> = (0..20).map(|i| if i < 10 { "a" } else { "b" }).collect();

        let res = log_rank_test(&cohort(times, events), &groups).unwrap();
        assert_relative_eq!(res.statistic, 0.0, epsilon = 1e-12);
        assert_relative_eq!(res.p_value, 1.0, epsilon = 1e-12);
        assert_eq!(res.degrees_of_freedom, 1);
    }

    #[test]
    fn test_two_group_matches_hand_computation() {
        // group a: events at 1, 3; group b: events at 2, censored at 4
        let data = cohort(vec![1.0, 3.0, 2.0, 4.0], vec![true, true, true, false]);
        let groups = [0, 0, 1, 1];
        let res = log_rank_test(&data, &groups).unwrap();

        // t=1: n=4, na=2, d=1 -> E=0.5, V=0.25
        // t=2: n=3, na=1, d=1 -> E=1/3, V=2/9
        // t=3: n=2, na=1, d=1 -> E=0.5, V=0.25
        let o_minus_e = 2.0 - (0.5 + 1.0 / 3.0 + 0.5);
        let var = 0.25 + 2.0 / 9.0 + 0.25;
        assert_relative_eq!(res.statistic, o_minus_e * o_minus_e / var, epsilon = 1e-12);
        assert_relative_eq!(res.groups[0].observed, 2.0);
        assert_relative_eq!(res.groups[0].expected, 0.5 + 1.0 / 3.0 + 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_observed_equals_expected_in_total() {
        let data = cohort(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 1.5, 2.5, 3.5, 6.0, 7.0, 2.0, 8.0],
            vec![true, true, false, true, true, true, true, true, false, true, true, false],
        );
        let groups = ["x", "x", "x", "x", "x", "y", "y", "y", "y", "y", "z", "z"];
        let res = log_rank_test(&data, &groups).unwrap();
        let o: f64 = res.groups.iter().map(|g| g.observed).sum();
        let e: f64 = res.groups.iter().map(|g| g.expected).sum();
        assert_relative_eq!(o, e, epsilon = 1e-10);
        assert_eq!(res.degrees_of_freedom, 2);
        assert!(res.statistic >= 0.0);
        assert!((0.0..=1.0).contains(&res.p_value));
    }

    #[test]
    fn test_three_group_statistic_ignores_dropped_group() {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 1.5, 2.5, 3.5, 6.0, 7.0, 2.0, 8.0];
        let events = vec![true, true, false, true, true, true, true, true, false, true, true, false];
        let groups = ["x", "x", "x", "x", "x", "y", "y", "y", "y", "y", "z", "z"];
        let res = log_rank_test(&cohort(times.clone(), events.clone()), &groups).unwrap();
        // hypergeometric U'V⁻¹U worked out over the 8 distinct event times
        assert_relative_eq!(res.statistic, 0.995_937_003_274_994, epsilon = 1e-9);

        // reversed labels put a different group last, so a different one is left out
        let relabeled: Vec<&str> = groups
            .iter()
            .map(|&g| match g {
                "x" => "c",
                "y" => "b",
                _ => "a",
            })
            .collect();
        let other = log_rank_test(&cohort(times, events), &relabeled).unwrap();
        assert_relative_eq!(other.statistic, res.statistic, epsilon = 1e-10);
        assert_relative_eq!(other.p_value, res.p_value, epsilon = 1e-10);
        assert_eq!(other.degrees_of_freedom, 2);
    }

    #[test]
    fn test_clear_difference_is_significant() {
        let mut times = Vec::new();
        let mut events = Vec::new();
        let mut groups = Vec::new();
        for i in 0..20 {
            times.push(1.0 + i as f64 * 0.1);
            events.push(true);
            groups.push("early");
            times.push(10.0 + i as f64);
            events.push(true);
            groups.push("late");
        }
        let res = log_rank_test(&cohort(times, events), &groups).unwrap();
        assert!(res.p_value < 0.001);
    }

    #[test]
    fn test_needs_two_groups_with_events() {
        let data = cohort(vec![1.0, 2.0, 3.0, 4.0], vec![true, true, false, false]);
        let res = log_rank_test(&data, &[1, 1, 2, 2]);
        assert!(matches!(res, Err(SurvivalError::InsufficientData { .. })));

        let single = log_rank_test(&data, &[1, 1, 1, 1]);
        assert!(matches!(single, Err(SurvivalError::InsufficientData { .. })));
    }

    #[test]
    fn test_weights_change_statistic() {
        let data = cohort(
            vec![1.0, 2.0, 3.0, 8.0, 9.0, 1.5, 4.0, 5.0, 6.0, 7.0],
            vec![true; 10],
        );
        let groups = [0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let lr = weighted_log_rank_test(&data, &groups, RankWeight::LogRank).unwrap();
        let gw = weighted_log_rank_test(&data, &groups, RankWeight::GehanWilcoxon).unwrap();
        let tw = weighted_log_rank_test(&data, &groups, RankWeight::TaroneWare).unwrap();
        assert!((lr.statistic - gw.statistic).abs() > 1e-6);
        assert!((lr.statistic - tw.statistic).abs() > 1e-6);
        assert_eq!(gw.weight, RankWeight::GehanWilcoxon);
    }

    #[test]
    fn test_by_attached_groups() {
        let data = cohort(vec![1.0, 3.0, 2.0, 4.0], vec![true, true, true, false])
            .with_groups(vec!["a".into(), "a".into(), "b".into(), "b".into()])
            .unwrap();
        let res = log_rank_by_group(&data).unwrap();
        assert_eq!(res.groups[0].label, "a");
        assert_eq!(res.groups[1].n, 2);

        let unlabeled = cohort(vec![1.0, 2.0], vec![true, true]);
        assert!(log_rank_by_group(&unlabeled).is_err());
    }
}
