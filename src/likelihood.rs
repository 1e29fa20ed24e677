//! Negative Cox partial log-likelihood and its gradient over precomputed
//! risk sets, Breslow tie handling throughout.
//!
//! Both entry points are pure functions of (data, beta): no shared mutable
//! state, so different beta values can be evaluated concurrently against the
//! same risk sets.

use ndarray::{Array1, ArrayView1};
use crate::{
    data::SurvivalData,
    error::{CoxnetError, Result},
};

/// Weighted risk-set statistics at one event time: log-sum-exp of the
/// linear predictors and the exp-weighted covariate mean.
///
/// The per-set maximum linear predictor is subtracted before exponentiating
/// so `exp(x·beta)` cannot overflow for large linear predictors.
fn risk_set_statistics(
    data: &SurvivalData,
    linear_pred: &Array1<f64>,
    at_risk: &[usize],
    with_mean: bool,
) -> Result<(f64, Option<Array1<f64>>)> {
    let max_lp = at_risk
        .iter()
        .map(|&i| linear_pred[i])
        .fold(f64::NEG_INFINITY, f64::max);

    if !max_lp.is_finite() {
        return Err(CoxnetError::numerical_error(
            "non-finite linear predictor in risk set",
        ));
    }

    let weights = data.weights();
    let mut denom = 0.0;
    let mut numer = if with_mean {
        Some(Array1::zeros(data.n_features()))
    } else {
        None
    };

    for &i in at_risk {
        let w_exp = weights[i] * (linear_pred[i] - max_lp).exp();
        denom += w_exp;
        if let Some(num) = numer.as_mut() {
            num.scaled_add(w_exp, &data.covariates().row(i));
        }
    }

    if denom <= 0.0 || !denom.is_finite() {
        return Err(CoxnetError::numerical_error("risk set sum is degenerate"));
    }

    let log_sum = max_lp + denom.ln();
    let mean = numer.map(|num| num / denom);
    Ok((log_sum, mean))
}

/// Negative log partial likelihood at `beta`:
/// `sum_t [ d_t * log(sum_{j at risk} w_j exp(x_j·beta)) - sum_{i event} w_i x_i·beta ]`.
pub fn neg_log_partial_likelihood(data: &SurvivalData, beta: ArrayView1<f64>) -> Result<f64> {
    if beta.len() != data.n_features() {
        return Err(CoxnetError::invalid_dimensions(format!(
            "beta len ({}) != n_features ({})",
            beta.len(),
            data.n_features()
        )));
    }

    let linear_pred = data.covariates().dot(&beta);
    let mut neg_loglik = 0.0;

    for rs in data.risk_sets() {
        let (log_sum, _) = risk_set_statistics(data, &linear_pred, &rs.at_risk, false)?;
        let event_lp = rs.event_covariate_sum.dot(&beta);
        neg_loglik += rs.event_weight * log_sum - event_lp;
    }

    if !neg_loglik.is_finite() {
        return Err(CoxnetError::numerical_error(
            "partial likelihood is non-finite",
        ));
    }
    Ok(neg_loglik)
}

/// Gradient of the negative log partial likelihood at `beta`:
/// `sum_t [ d_t * (exp-weighted covariate mean over risk set) - sum_{i event} w_i x_i ]`.
pub fn gradient(data: &SurvivalData, beta: ArrayView1<f64>) -> Result<Array1<f64>> {
    if beta.len() != data.n_features() {
        return Err(CoxnetError::invalid_dimensions(format!(
            "beta len ({}) != n_features ({})",
            beta.len(),
            data.n_features()
        )));
    }

    let linear_pred = data.covariates().dot(&beta);
    let mut grad = Array1::zeros(data.n_features());

    for rs in data.risk_sets() {
        let (_, mean) = risk_set_statistics(data, &linear_pred, &rs.at_risk, true)?;
        let mean = mean.ok_or_else(|| {
            CoxnetError::numerical_error("risk set statistics missing covariate mean")
        })?;
        grad.scaled_add(rs.event_weight, &mean);
        grad -= &rs.event_covariate_sum;
    }

    if grad.iter().any(|g| !g.is_finite()) {
        return Err(CoxnetError::numerical_error("gradient is non-finite"));
    }
    Ok(grad)
}
