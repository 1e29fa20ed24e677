use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use crate::error::{CoxnetError, Result};

/// one risk set per distinct event time - the bookkeeping the partial
/// likelihood runs on
#[derive(Debug, Clone)]
pub struct RiskSet {
    /// the distinct event time
    pub time: f64,
    /// rows under observation at this time (start < t <= stop)
    pub at_risk: Vec<usize>,
    /// rows experiencing an event exactly at this time (Breslow ties collapse here)
    pub event_rows: Vec<usize>,
    /// d_t: sum of weights of the event rows
    pub event_weight: f64,
    /// total weight of the at-risk rows
    pub at_risk_weight: f64,
    /// sum of w_i * x_i over the event rows
    pub event_covariate_sum: Array1<f64>,
}

/// survival data - interval bounds, events, weights, and covariates
///
/// holds either right-censored (time, event) rows or counting-process
/// (start, stop, event) rows; the risk sets are built once at construction
/// and shared read-only by every likelihood evaluation afterwards
#[derive(Debug, Clone)]
pub struct SurvivalData {
    starts: Array1<f64>,             // entry times (all zero for right-censored)
    stops: Array1<f64>,              // event/censoring times
    events: Array1<bool>,            // true = event, false = censored
    weights: Array1<f64>,            // per-row observation weights
    covariates: Array2<f64>,         // feature matrix (n_rows x n_features)
    feature_names: Option<Vec<String>>,
    risk_sets: Vec<RiskSet>,         // precomputed, ordered by event time
}

impl SurvivalData {
    /// right-censored data: (time, event) pairs
    pub fn new(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
    ) -> Result<Self> {
        let starts = vec![0.0; times.len()];
        Self::from_counting_process(starts, times, events, covariates)
    }

    /// counting-process data: (start, stop, event) triples, one row per
    /// observation interval - this is how time-varying covariates come in
    pub fn from_counting_process(
        starts: Vec<f64>,
        stops: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
    ) -> Result<Self> {
        let n_rows = stops.len();

        if starts.len() != n_rows || events.len() != n_rows {
            return Err(CoxnetError::invalid_dimensions(format!(
                "starts/stops/events lengths disagree: {} / {} / {}",
                starts.len(),
                n_rows,
                events.len()
            )));
        }
        if covariates.nrows() != n_rows {
            return Err(CoxnetError::invalid_dimensions(format!(
                "covariates rows ({}) != n_rows ({})",
                covariates.nrows(),
                n_rows
            )));
        }
        for i in 0..n_rows {
            if !starts[i].is_finite() || !stops[i].is_finite() || starts[i] < 0.0 {
                return Err(CoxnetError::invalid_survival_data(format!(
                    "row {}: times must be finite and non-negative", i
                )));
            }
            if stops[i] <= starts[i] {
                return Err(CoxnetError::invalid_survival_data(format!(
                    "row {}: stop ({}) must exceed start ({})", i, stops[i], starts[i]
                )));
            }
        }
        if !events.iter().any(|&e| e) {
            return Err(CoxnetError::invalid_survival_data(
                "no events in the data - partial likelihood is undefined",
            ));
        }
        if covariates.iter().any(|v| !v.is_finite()) {
            return Err(CoxnetError::invalid_survival_data(
                "covariates contain non-finite values",
            ));
        }

        let mut data = Self {
            starts: Array1::from(starts),
            stops: Array1::from(stops),
            events: Array1::from(events),
            weights: Array1::ones(n_rows),
            covariates,
            feature_names: None,
            risk_sets: Vec::new(),
        };
        data.compute_risk_sets();
        Ok(data)
    }

    /// attach per-row observation weights (default is all ones)
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.n_rows() {
            return Err(CoxnetError::invalid_dimensions(format!(
                "weights len ({}) != n_rows ({})",
                weights.len(),
                self.n_rows()
            )));
        }
        if weights.iter().any(|&w| !w.is_finite() || w <= 0.0) {
            return Err(CoxnetError::invalid_survival_data(
                "weights must be positive & finite",
            ));
        }
        self.weights = Array1::from(weights);
        self.compute_risk_sets();
        Ok(self)
    }

    /// give names to your features for nicer downstream output
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_features() {
            return Err(CoxnetError::invalid_dimensions(format!(
                "feature names len ({}) != n_features ({})",
                names.len(),
                self.n_features()
            )));
        }
        self.feature_names = Some(names);
        Ok(self)
    }

    /// build one risk set per distinct event time
    ///
    /// membership `start < t <= stop` handles both formats in one go:
    /// right-censored rows have start = 0, and counting-process rows whose
    /// interval has not yet begun at t drop out through the start bound
    fn compute_risk_sets(&mut self) {
        let mut event_times: Vec<f64> = self
            .stops
            .iter()
            .zip(self.events.iter())
            .filter_map(|(time, event)| if *event { Some(*time) } else { None })
            .collect();
        event_times.sort_by(f64::total_cmp);
        event_times.dedup(); // tied events share one aggregated entry

        let p = self.n_features();
        self.risk_sets.clear();

        for &t in &event_times {
            let at_risk: Vec<usize> = (0..self.n_rows())
                .filter(|&i| self.starts[i] < t && self.stops[i] >= t)
                .collect();
            let event_rows: Vec<usize> = (0..self.n_rows())
                .filter(|&i| self.stops[i] == t && self.events[i])
                .collect();

            let at_risk_weight = at_risk.iter().map(|&i| self.weights[i]).sum();
            let event_weight = event_rows.iter().map(|&i| self.weights[i]).sum();

            let mut event_covariate_sum = Array1::zeros(p);
            for &i in &event_rows {
                event_covariate_sum.scaled_add(self.weights[i], &self.covariates.row(i));
            }

            self.risk_sets.push(RiskSet {
                time: t,
                at_risk,
                event_rows,
                event_weight,
                at_risk_weight,
                event_covariate_sum,
            });
        }
    }

    /// how many observation rows (intervals for counting-process data)
    pub fn n_rows(&self) -> usize {
        self.stops.len()
    }

    /// how many features per row
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    /// entry times (all zero for right-censored data)
    pub fn starts(&self) -> ArrayView1<'_, f64> {
        self.starts.view()
    }

    /// event/censoring times
    pub fn stops(&self) -> ArrayView1<'_, f64> {
        self.stops.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        self.events.as_slice().unwrap()
    }

    /// per-row observation weights
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// feature matrix
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    /// precomputed risk sets, ordered by event time
    pub fn risk_sets(&self) -> &[RiskSet] {
        &self.risk_sets
    }

    /// distinct event times in order
    pub fn event_times(&self) -> Vec<f64> {
        self.risk_sets.iter().map(|rs| rs.time).collect()
    }

    /// grab a subset of rows by indices - risk sets are rebuilt for the subset
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_rows()) {
            return Err(CoxnetError::invalid_dimensions("subset index out of bounds"));
        }

        let starts: Vec<f64> = indices.iter().map(|&i| self.starts[i]).collect();
        let stops: Vec<f64> = indices.iter().map(|&i| self.stops[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let weights: Vec<f64> = indices.iter().map(|&i| self.weights[i]).collect();
        let covariates = self.covariates.select(ndarray::Axis(0), indices);

        let mut sub = Self::from_counting_process(starts, stops, events, covariates)?
            .with_weights(weights)?;
        sub.feature_names = self.feature_names.clone();
        Ok(sub)
    }

    /// standardize features (mean=0, std=1) in place, returns (means, stds)
    pub fn standardize_covariates(&mut self) -> Result<(Array1<f64>, Array1<f64>)> {
        let means = self
            .covariates
            .mean_axis(ndarray::Axis(0))
            .ok_or_else(|| CoxnetError::invalid_dimensions("no rows to standardize"))?;
        let stds = self.covariates.std_axis(ndarray::Axis(0), 0.0);

        for j in 0..self.n_features() {
            if stds[j] == 0.0 {
                return Err(CoxnetError::numerical_error(format!(
                    "feature {} has zero variance - can't standardize", j
                )));
            }
            for i in 0..self.n_rows() {
                self.covariates[[i, j]] = (self.covariates[[i, j]] - means[j]) / stds[j];
            }
        }

        // covariate sums cached in the risk sets are stale now
        self.compute_risk_sets();
        Ok((means, stds))
    }
}
