use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurvivalError};

/// one row of the risk-set decomposition: everything that happened at a single distinct time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSetRow {
    pub time: f64,
    pub n_at_risk: usize, // subjects with time >= this time
    pub n_events: usize,  // events exactly at this time
    pub n_censored: usize, // censorings exactly at this time
}

/// survival cohort - times, events, covariates and optional group labels
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,              // time to event/censoring
    events: Vec<bool>,               // true = event, false = censored
    covariates: Array2<f64>,         // n_samples x n_features
    feature_names: Option<Vec<String>>,
    groups: Option<Vec<String>>,     // optional stratum / arm labels
    order: Vec<usize>,               // sample indices sorted by increasing time
}

impl SurvivalData {
    /// make a cohort from raw vecs/arrays
    pub fn new(times: Vec<f64>, events: Vec<bool>, covariates: Array2<f64>) -> Result<Self> {
        let n_samples = times.len();

        if n_samples == 0 {
            return Err(SurvivalError::invalid_input("cohort is empty"));
        }

        if events.len() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                n_samples,
                events.len()
            )));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "covariates rows ({}) != n_samples ({})",
                covariates.nrows(),
                n_samples
            )));
        }

        if let Some((i, t)) = times
            .iter()
            .enumerate()
            .find(|(_, t)| !t.is_finite() || **t < 0.0)
        {
            return Err(SurvivalError::invalid_input(format!(
                "time at index {} is {} - times must be finite and non-negative",
                i, t
            )));
        }

        if covariates.iter().any(|x| !x.is_finite()) {
            return Err(SurvivalError::invalid_input("covariates must be finite"));
        }

        let mut order: Vec<usize> = (0..n_samples).collect();
        order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

        Ok(Self {
            times: Array1::from(times),
            events,
            covariates,
            feature_names: None,
            groups: None,
            order,
        })
    }

    /// cohort with no covariates (for KM / log-rank only work)
    pub fn without_covariates(times: Vec<f64>, events: Vec<bool>) -> Result<Self> {
        let n = times.len();
        Self::new(times, events, Array2::zeros((n, 0)))
    }

    /// attach column names for the covariate matrix
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_features() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} feature names for {} covariates",
                names.len(),
                self.n_features()
            )));
        }
        self.feature_names = Some(names);
        Ok(self)
    }

    /// attach a group label to every subject
    pub fn with_groups(mut self, groups: Vec<String>) -> Result<Self> {
        if groups.len() != self.n_samples() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "groups len ({}) != n_samples ({})",
                groups.len(),
                self.n_samples()
            )));
        }
        self.groups = Some(groups);
        Ok(self)
    }

    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    pub fn groups(&self) -> Option<&[String]> {
        self.groups.as_deref()
    }

    /// sample indices ordered by increasing time (stable for ties)
    pub fn sorted_indices(&self) -> &[usize] {
        &self.order
    }

    /// unique event times in order
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .order
            .iter()
            .filter(|&&i| self.events[i])
            .map(|&i| self.times[i])
            .collect();
        times.dedup();
        times
    }

    /// largest observed time
    pub fn max_time(&self) -> f64 {
        self.order
            .last()
            .map(|&i| self.times[i])
            .unwrap_or(0.0)
    }

    /// `(t_i, d_i, n_i)` for every distinct observed time, ascending.
    ///
    /// All records sharing a timestamp are simultaneous: subjects censored at
    /// `t_i` are still counted in `n_i` and leave the risk set right after.
    pub fn risk_set_table(&self) -> Vec<RiskSetRow> {
        let n = self.n_samples();
        let mut rows: Vec<RiskSetRow> = Vec::new();
        let mut k = 0;

        while k < n {
            let time = self.times[self.order[k]];
            let n_at_risk = n - k;
            let mut n_events = 0;
            let mut n_censored = 0;

            while k < n && self.times[self.order[k]] == time {
                if self.events[self.order[k]] {
                    n_events += 1;
                } else {
                    n_censored += 1;
                }
                k += 1;
            }

            rows.push(RiskSetRow {
                time,
                n_at_risk,
                n_events,
                n_censored,
            });
        }

        rows
    }

    /// same subjects with the event indicator flipped (censoring becomes the event)
    pub fn reversed(&self) -> Self {
        let mut flipped = self.clone();
        flipped.events.iter_mut().for_each(|e| *e = !*e);
        flipped
    }

    /// grab a subset of subjects by indices (duplicates allowed, e.g. for resampling)
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvivalError::invalid_dimensions("subset index out of bounds"));
        }

        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(Axis(0), indices);

        let mut data = Self::new(times, events, covariates)?;
        data.feature_names = self.feature_names.clone();
        data.groups = self
            .groups
            .as_ref()
            .map(|g| indices.iter().map(|&i| g[i].clone()).collect());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let events = vec![true, false, true, true, false];
        let covariates = Array2::from_shape_vec(
            (5, 2),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0],
        )
        .unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    fn toy_cohort() -> SurvivalData {
        SurvivalData::without_covariates(
            vec![2.0, 3.0, 3.0, 4.0, 4.0, 6.0, 7.0, 8.0, 10.0, 10.0],
            vec![true, true, false, true, true, false, true, false, false, true],
        )
        .unwrap()
    }

    #[test]
    fn test_survival_data_creation() {
        let data = create_test_data();
        assert_eq!(data.n_samples(), 5);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.n_events(), 3);
        assert_eq!(data.event_times(), vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_invalid_dimensions() {
        let times = vec![1.0, 2.0];
        let events = vec![true];
        let covariates = Array2::zeros((2, 2));

        assert!(matches!(
            SurvivalData::new(times, events, covariates),
            Err(SurvivalError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_invalid_times() {
        let covariates = Array2::zeros((2, 1));
        assert!(matches!(
            SurvivalData::new(vec![-1.0, 2.0], vec![true, false], covariates.clone()),
            Err(SurvivalError::InvalidInput { .. })
        ));
        assert!(matches!(
            SurvivalData::new(vec![f64::NAN, 2.0], vec![true, false], covariates.clone()),
            Err(SurvivalError::InvalidInput { .. })
        ));
        assert!(matches!(
            SurvivalData::new(vec![f64::INFINITY, 2.0], vec![true, false], covariates),
            Err(SurvivalError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_empty_cohort_rejected() {
        assert!(matches!(
            SurvivalData::without_covariates(vec![], vec![]),
            Err(SurvivalError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_zero_time_allowed() {
        let data = SurvivalData::without_covariates(vec![0.0, 1.0], vec![true, false]).unwrap();
        assert_eq!(data.risk_set_table()[0].time, 0.0);
    }

    #[test]
    fn test_risk_set_table_collapses_ties() {
        let table = toy_cohort().risk_set_table();
        let times: Vec<f64> = table.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0, 6.0, 7.0, 8.0, 10.0]);

        // censored subject at 3 is still at risk at 3
        assert_eq!(table[1].n_at_risk, 9);
        assert_eq!(table[1].n_events, 1);
        assert_eq!(table[1].n_censored, 1);

        assert_eq!(table[2].n_at_risk, 7);
        assert_eq!(table[2].n_events, 2);

        let last = table.last().unwrap();
        assert_eq!(last.n_at_risk, 2);
        assert_eq!(last.n_events, 1);
        assert_eq!(last.n_censored, 1);

        for pair in table.windows(2) {
            assert!(pair[1].n_at_risk <= pair[0].n_at_risk);
        }
        for row in &table {
            assert!(row.n_events <= row.n_at_risk);
        }
    }

    #[test]
    fn test_risk_set_table_ignores_input_order() {
        let shuffled = SurvivalData::without_covariates(
            vec![10.0, 3.0, 2.0, 4.0, 10.0, 6.0, 7.0, 4.0, 8.0, 3.0],
            vec![false, true, true, true, true, false, true, true, false, false],
        )
        .unwrap();
        assert_eq!(shuffled.risk_set_table(), toy_cohort().risk_set_table());
    }

    #[test]
    fn test_reversed_flips_events() {
        let data = create_test_data();
        let rev = data.reversed();
        assert_eq!(rev.events(), &[false, true, false, false, true]);
        assert_eq!(rev.times(), data.times());
    }

    #[test]
    fn test_subset() {
        let data = create_test_data()
            .with_groups(vec!["a".into(), "b".into(), "a".into(), "b".into(), "a".into()])
            .unwrap();
        let subset = data.subset(&[0, 2, 4, 4]).unwrap();

        assert_eq!(subset.n_samples(), 4);
        assert_eq!(subset.times()[0], 1.0);
        assert_eq!(subset.times()[1], 3.0);
        assert_eq!(subset.times()[3], 5.0);
        assert_eq!(subset.groups().unwrap(), &["a", "a", "a", "a"]);
        assert!(data.subset(&[7]).is_err());
    }

    #[test]
    fn test_feature_names_length_checked() {
        let data = create_test_data();
        assert!(data.clone().with_feature_names(vec!["age".into()]).is_err());
        let named = data
            .with_feature_names(vec!["age".into(), "dose".into()])
            .unwrap();
        assert_eq!(named.feature_names().unwrap()[1], "dose");
    }
}
