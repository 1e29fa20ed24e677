//! Proximal-gradient solver for the elastic-net penalized Cox objective
//!
//!   f(beta) = negloglik(beta) + lambda * (alpha * ||beta||_1 + (1-alpha)/2 * ||beta||_2^2)
//!
//! The smooth part is handled by gradient steps with Barzilai-Borwein step
//! sizes, the non-smooth part by the elastic-net proximal operator. BB steps
//! are non-monotone, so per-iteration descent is not guaranteed; the stopping
//! rule on the scaled iterate change is what terminates the loop.

use ndarray::{Array1, ArrayView1};
use crate::{
    data::SurvivalData,
    error::{CoxnetError, Result},
    likelihood,
};

/// Fallback step when the BB denominator degenerates. Never surfaced to the
/// caller; the controller recovers locally.
const FALLBACK_STEP: f64 = 1e-4;

/// Keep BB steps inside a sane positive range.
const STEP_MIN: f64 = 1e-12;
const STEP_MAX: f64 = 1e12;

/// In the ridge limit (alpha -> 0) the analytic lambda_max diverges, so the
/// mixing parameter is floored before dividing. Same convention as glmnet.
const ALPHA_FLOOR: f64 = 1e-3;

/// Elastic-net proximal step: soft-threshold the gradient trial point at
/// `step*lambda*alpha`, then ridge-shrink by `1/(1 + step*lambda*(1-alpha))`.
///
/// `penalized` optionally marks coordinates subject to the penalty; an
/// unpenalized coordinate keeps its plain gradient update. By default every
/// coordinate is penalized.
pub fn prox_elastic_net(
    beta: ArrayView1<f64>,
    grad: ArrayView1<f64>,
    step: f64,
    lambda: f64,
    alpha: f64,
    penalized: Option<&[bool]>,
) -> Array1<f64> {
    let threshold = step * lambda * alpha;
    let ridge_scale = 1.0 / (1.0 + step * lambda * (1.0 - alpha));

    Array1::from_iter(beta.iter().zip(grad.iter()).enumerate().map(|(j, (&b, &g))| {
        let trial = b - step * g;
        if penalized.map_or(false, |mask| !mask[j]) {
            trial
        } else {
            soft_threshold(trial, threshold) * ridge_scale
        }
    }))
}

fn soft_threshold(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

/// Long Barzilai-Borwein step from successive (iterate, gradient) pairs:
/// `(s·s) / |s·g|` with `s = beta - beta_prev`, `g = grad - grad_prev`.
///
/// Falls back to a small positive constant when the secant denominator is
/// degenerate; the returned step is always strictly positive and finite.
pub fn bb_step(
    beta: ArrayView1<f64>,
    beta_prev: ArrayView1<f64>,
    grad: ArrayView1<f64>,
    grad_prev: ArrayView1<f64>,
) -> f64 {
    let s = &beta - &beta_prev;
    let g = &grad - &grad_prev;

    let ss = s.dot(&s);
    let sg = s.dot(&g).abs();

    if sg <= f64::EPSILON * ss.max(1.0) {
        return FALLBACK_STEP;
    }

    let step = ss / sg;
    if !step.is_finite() || step <= 0.0 {
        FALLBACK_STEP
    } else {
        step.clamp(STEP_MIN, STEP_MAX)
    }
}

/// First-iteration step when no previous (iterate, gradient) pair exists yet:
/// bounds the initial update norm by one.
fn initial_step(grad: ArrayView1<f64>) -> f64 {
    let norm = grad.dot(&grad).sqrt();
    if norm > 1.0 { 1.0 / norm } else { 1.0 }
}

/// Terminal state of one proximal-gradient run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    MaxIterReached,
}

/// Outcome of one (lambda, alpha) fit.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub beta: Array1<f64>,
    pub status: SolveStatus,
    pub iterations: usize,
}

impl SolveOutcome {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Proximal-gradient iterator for a single (lambda, alpha) pair.
#[derive(Debug, Clone)]
pub struct ProxGradient {
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for ProxGradient {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6 }
    }
}

impl ProxGradient {
    pub fn new(max_iter: usize, tol: f64) -> Self {
        Self { max_iter, tol }
    }

    /// Run to convergence from `beta0` (zero vector or a warm start).
    ///
    /// Stops when `||beta_new - beta|| / step < tol` or when `max_iter` is
    /// hit; both return the current beta, the latter flagged as
    /// `MaxIterReached` for the caller to treat as a non-fatal warning.
    pub fn solve(
        &self,
        data: &SurvivalData,
        lambda: f64,
        alpha: f64,
        beta0: Array1<f64>,
    ) -> Result<SolveOutcome> {
        if beta0.len() != data.n_features() {
            return Err(CoxnetError::invalid_dimensions(format!(
                "warm start len ({}) != n_features ({})",
                beta0.len(),
                data.n_features()
            )));
        }

        let mut beta = beta0;
        let mut grad = likelihood::gradient(data, beta.view())?;
        let mut beta_prev: Option<Array1<f64>> = None;
        let mut grad_prev: Option<Array1<f64>> = None;

        for iteration in 1..=self.max_iter {
            let step = match (&beta_prev, &grad_prev) {
                (Some(bp), Some(gp)) => bb_step(beta.view(), bp.view(), grad.view(), gp.view()),
                _ => initial_step(grad.view()),
            };

            let beta_new = prox_elastic_net(beta.view(), grad.view(), step, lambda, alpha, None);

            let delta = (&beta_new - &beta).mapv(|d| d * d).sum().sqrt();

            beta_prev = Some(std::mem::replace(&mut beta, beta_new));
            if delta / step < self.tol {
                return Ok(SolveOutcome {
                    beta,
                    status: SolveStatus::Converged,
                    iterations: iteration,
                });
            }

            let grad_new = likelihood::gradient(data, beta.view())?;
            grad_prev = Some(std::mem::replace(&mut grad, grad_new));
        }

        Ok(SolveOutcome {
            beta,
            status: SolveStatus::MaxIterReached,
            iterations: self.max_iter,
        })
    }
}

/// Per-coordinate KKT stationarity audit at a candidate solution.
///
/// For `beta_j != 0` the penalized score
/// `grad_j + lambda*alpha*sign(beta_j) + lambda*(1-alpha)*beta_j` must vanish;
/// for `beta_j = 0` the subgradient condition `|grad_j| <= lambda*alpha` must
/// hold. Returns one pass/fail per coordinate; informational, not fatal.
pub fn kkt_check(
    grad: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    lambda: f64,
    alpha: f64,
    tol: f64,
) -> Vec<bool> {
    grad.iter()
        .zip(beta.iter())
        .map(|(&g, &b)| {
            if b != 0.0 {
                (g + lambda * alpha * b.signum() + lambda * (1.0 - alpha) * b).abs() <= tol
            } else {
                g.abs() <= lambda * alpha + tol
            }
        })
        .collect()
}

/// Smallest lambda at which the null model is stationary:
/// `max_j |grad_j(beta = 0)| / alpha` (alpha floored away from zero).
///
/// Everything above this bound yields the all-zero solution, so descending
/// lambda sequences start here.
pub fn lambda_max(data: &SurvivalData, alpha: f64) -> Result<f64> {
    let null_beta = Array1::zeros(data.n_features());
    let grad = likelihood::gradient(data, null_beta.view())?;
    let max_abs = grad.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));

    if max_abs == 0.0 {
        return Err(CoxnetError::numerical_error(
            "null gradient is identically zero - lambda_max is undefined",
        ));
    }
    Ok(max_abs / alpha.max(ALPHA_FLOOR))
}
