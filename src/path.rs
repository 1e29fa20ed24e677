//! Warm-started regularization path: descending lambda sweep at one alpha,
//! each lambda seeded from the previous lambda's solution.

use log::{debug, warn};
use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;
use crate::{
    data::SurvivalData,
    error::{CoxnetError, Result},
    likelihood,
    solver::{kkt_check, lambda_max, ProxGradient},
};

/// Configuration for one path fit. Builder-style, validated before any
/// optimization work begins.
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub alpha: f64,
    /// explicit descending lambda sequence; generated from the data when None
    pub lambdas: Option<Vec<f64>>,
    /// length of the generated lambda sequence
    pub nlambda: usize,
    /// ratio of the smallest generated lambda to lambda_max
    pub lambda_min_ratio: f64,
    /// fraction of the generated sequence actually computed
    pub path_fraction: f64,
    pub max_iter: usize,
    pub tol: f64,
    /// record non-convergence as a flag and keep going, instead of failing fast
    pub allow_nonconvergence: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            lambdas: None,
            nlambda: 50,
            lambda_min_ratio: 1e-3,
            path_fraction: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            allow_nonconvergence: true,
        }
    }
}

impl PathConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// elastic net mixing: alpha=0 -> pure ridge, alpha=1 -> pure lasso
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_lambdas(mut self, lambdas: Vec<f64>) -> Self {
        self.lambdas = Some(lambdas);
        self
    }

    pub fn with_nlambda(mut self, nlambda: usize) -> Self {
        self.nlambda = nlambda;
        self
    }

    pub fn with_lambda_min_ratio(mut self, ratio: f64) -> Self {
        self.lambda_min_ratio = ratio;
        self
    }

    /// compute only the first `fraction` of the lambda sequence - the tail
    /// end of the path is rarely selected and costs the most iterations
    pub fn with_path_fraction(mut self, fraction: f64) -> Self {
        self.path_fraction = fraction;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_allow_nonconvergence(mut self, allow: bool) -> Self {
        self.allow_nonconvergence = allow;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(CoxnetError::invalid_parameter("alpha", self.alpha.to_string()));
        }
        if let Some(lambdas) = &self.lambdas {
            if lambdas.is_empty() {
                return Err(CoxnetError::invalid_parameter("lambdas", "empty"));
            }
            if lambdas.iter().any(|&l| !l.is_finite() || l < 0.0) {
                return Err(CoxnetError::invalid_parameter("lambdas", "negative or non-finite"));
            }
            if lambdas.windows(2).any(|w| w[1] > w[0]) {
                return Err(CoxnetError::invalid_parameter("lambdas", "not descending"));
            }
        }
        if self.nlambda == 0 {
            return Err(CoxnetError::invalid_parameter("nlambda", "0"));
        }
        if !(0.0 < self.lambda_min_ratio && self.lambda_min_ratio < 1.0) {
            return Err(CoxnetError::invalid_parameter(
                "lambda_min_ratio",
                self.lambda_min_ratio.to_string(),
            ));
        }
        if !(0.0 < self.path_fraction && self.path_fraction <= 1.0) {
            return Err(CoxnetError::invalid_parameter(
                "path_fraction",
                self.path_fraction.to_string(),
            ));
        }
        if self.max_iter == 0 {
            return Err(CoxnetError::invalid_parameter("max_iter", "0"));
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(CoxnetError::invalid_parameter("tol", self.tol.to_string()));
        }
        Ok(())
    }
}

/// Fitted regularization path at one alpha.
#[derive(Debug, Clone)]
pub struct PathFit {
    pub alpha: f64,
    /// descending lambda sequence actually computed
    pub lambdas: Vec<f64>,
    /// one coefficient vector per lambda
    pub coefficients: Vec<Array1<f64>>,
    pub converged: Vec<bool>,
    pub iterations: Vec<usize>,
    /// unpenalized negative log partial likelihood at each solution
    pub neg_loglik: Vec<f64>,
    /// per lambda: coordinates violating KKT stationarity at the returned
    /// solution (informational, usually empty)
    pub kkt_violations: Vec<Vec<usize>>,
    pub feature_names: Option<Vec<String>>,
}

impl PathFit {
    pub fn n_lambdas(&self) -> usize {
        self.lambdas.len()
    }

    /// nonzero coefficient count per lambda
    pub fn nonzero_counts(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .map(|beta| beta.iter().filter(|&&b| b != 0.0).count())
            .collect()
    }

    /// risk scores x·beta for the solution at lambda index `idx`
    pub fn linear_predictor(&self, idx: usize, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let beta = self.coefficients.get(idx).ok_or_else(|| {
            CoxnetError::invalid_parameter("lambda index", idx.to_string())
        })?;
        if covariates.ncols() != beta.len() {
            return Err(CoxnetError::invalid_dimensions(format!(
                "feature count mismatch: expected {}, got {}",
                beta.len(),
                covariates.ncols()
            )));
        }
        Ok(covariates.dot(beta))
    }

    pub fn n_nonconverged(&self) -> usize {
        self.converged.iter().filter(|&&c| !c).count()
    }
}

/// Log-spaced descending lambda sequence from `lambda_max` down to
/// `lambda_max * min_ratio`, truncated to the leading `fraction` of entries.
pub fn lambda_sequence(lmax: f64, nlambda: usize, min_ratio: f64, fraction: f64) -> Vec<f64> {
    if nlambda == 1 {
        return vec![lmax];
    }
    let n_kept = ((nlambda as f64 * fraction).ceil() as usize).clamp(1, nlambda);
    let log_max = lmax.ln();
    let log_min = (lmax * min_ratio).ln();
    (0..n_kept)
        .map(|k| {
            let frac = k as f64 / (nlambda - 1) as f64;
            (log_max + frac * (log_min - log_max)).exp()
        })
        .collect()
}

/// Fit the full warm-started path for one alpha.
///
/// The first lambda starts from zero (exactly the solution at the
/// `lambda_max` boundary when the sequence is generated); every later lambda
/// starts from its predecessor's solution. Non-convergence at a lambda is
/// recorded per entry and reported in aggregate, unless the caller asked to
/// fail fast.
pub fn fit_path(data: &SurvivalData, config: &PathConfig) -> Result<PathFit> {
    config.validate()?;

    let lambdas = match &config.lambdas {
        Some(explicit) => explicit.clone(),
        None => {
            let lmax = lambda_max(data, config.alpha)?;
            lambda_sequence(lmax, config.nlambda, config.lambda_min_ratio, config.path_fraction)
        }
    };

    let solver = ProxGradient::new(config.max_iter, config.tol);
    let mut beta = Array1::zeros(data.n_features());

    let mut coefficients = Vec::with_capacity(lambdas.len());
    let mut converged = Vec::with_capacity(lambdas.len());
    let mut iterations = Vec::with_capacity(lambdas.len());
    let mut neg_loglik = Vec::with_capacity(lambdas.len());
    let mut kkt_violations = Vec::with_capacity(lambdas.len());

    // loose audit tolerance: the stopping rule bounds the scaled iterate
    // change, not the subgradient residual directly
    let audit_tol = config.tol.sqrt();

    for (k, &lambda) in lambdas.iter().enumerate() {
        let outcome = solver.solve(data, lambda, config.alpha, beta)?;

        if !outcome.converged() && !config.allow_nonconvergence {
            return Err(CoxnetError::optimization_failed(format!(
                "no convergence at lambda {} (index {}) after {} iterations",
                lambda, k, config.max_iter
            )));
        }

        let grad = likelihood::gradient(data, outcome.beta.view())?;
        let violations: Vec<usize> = kkt_check(grad.view(), outcome.beta.view(), lambda, config.alpha, audit_tol)
            .iter()
            .enumerate()
            .filter_map(|(j, &ok)| if ok { None } else { Some(j) })
            .collect();

        debug!(
            "lambda[{}] = {:.6}: {} iterations, converged = {}, kkt violations = {}",
            k,
            lambda,
            outcome.iterations,
            outcome.converged(),
            violations.len()
        );

        neg_loglik.push(likelihood::neg_log_partial_likelihood(data, outcome.beta.view())?);
        converged.push(outcome.converged());
        iterations.push(outcome.iterations);
        kkt_violations.push(violations);
        beta = outcome.beta.clone();
        coefficients.push(outcome.beta);
    }

    let fit = PathFit {
        alpha: config.alpha,
        lambdas,
        coefficients,
        converged,
        iterations,
        neg_loglik,
        kkt_violations,
        feature_names: data.feature_names().map(<[String]>::to_vec),
    };

    let failed = fit.n_nonconverged();
    if failed > 0 {
        warn!("{} of {} lambda values failed to converge", failed, fit.n_lambdas());
    }
    Ok(fit)
}

/// Fit one path per alpha, in parallel.
///
/// Each alpha is an independent unit of work sharing only the read-only data;
/// results come back in alpha index order regardless of completion order, so
/// the output matches running [`fit_path`] sequentially per alpha.
pub fn fit_paths(data: &SurvivalData, alphas: &[f64], base: &PathConfig) -> Result<Vec<PathFit>> {
    if alphas.is_empty() {
        return Err(CoxnetError::invalid_parameter("alphas", "empty"));
    }
    alphas
        .par_iter()
        .map(|&alpha| fit_path(data, &base.clone().with_alpha(alpha)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic_data(n: usize, p: usize, seed: u64) -> SurvivalData {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut cov = Vec::with_capacity(n * p);
        for _ in 0..(n * p) {
            cov.push(rng.gen_range(-1.5..1.5));
        }
        let covariates = Array2::from_shape_vec((n, p), cov).unwrap();

        let mut times = Vec::with_capacity(n);
        let mut events = Vec::with_capacity(n);
        for i in 0..n {
            // first two features drive the hazard
            let lp: f64 = 0.9 * covariates[[i, 0]] - 0.7 * covariates[[i, 1]];
            let time = -rng.r#gen::<f64>().ln() / (0.2 * lp.exp());
            let censor = rng.gen_range(1.0..12.0);
            if time < censor {
                times.push(time.max(1e-3));
                events.push(true);
            } else {
                times.push(censor);
                events.push(false);
            }
        }

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_lambda_sequence_shape() {
        let seq = lambda_sequence(2.0, 10, 0.01, 1.0);
        assert_eq!(seq.len(), 10);
        assert_relative_eq!(seq[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(seq[9], 0.02, epsilon = 1e-12);
        assert!(seq.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_lambda_sequence_fraction_truncates() {
        let full = lambda_sequence(2.0, 10, 0.01, 1.0);
        let partial = lambda_sequence(2.0, 10, 0.01, 0.5);
        assert_eq!(partial.len(), 5);
        // the kept prefix matches the full sequence, spacing unchanged
        for (a, b) in partial.iter().zip(full.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(PathConfig::new().with_alpha(1.5).validate().is_err());
        assert!(PathConfig::new().with_alpha(-0.1).validate().is_err());
        assert!(PathConfig::new().with_nlambda(0).validate().is_err());
        assert!(PathConfig::new().with_lambda_min_ratio(1.0).validate().is_err());
        assert!(PathConfig::new().with_path_fraction(0.0).validate().is_err());
        assert!(PathConfig::new().with_tolerance(0.0).validate().is_err());
        assert!(PathConfig::new().with_lambdas(vec![0.1, 0.5]).validate().is_err());
        assert!(PathConfig::new().with_lambdas(vec![0.5, 0.1]).validate().is_ok());
    }

    #[test]
    fn test_path_starts_empty_and_fills_in() {
        let data = synthetic_data(120, 5, 7);
        let config = PathConfig::new()
            .with_nlambda(12)
            .with_lambda_min_ratio(0.05)
            .with_max_iterations(5000)
            .with_tolerance(1e-7);
        let fit = fit_path(&data, &config).unwrap();

        assert_eq!(fit.n_lambdas(), 12);
        let nnz = fit.nonzero_counts();
        // the generated sequence starts at lambda_max, where nothing is active
        assert_eq!(nnz[0], 0);
        assert!(*nnz.last().unwrap() > 0);
    }

    #[test]
    fn test_support_monotone_along_descending_path() {
        let data = synthetic_data(150, 5, 11);
        let config = PathConfig::new()
            .with_alpha(1.0)
            .with_nlambda(14)
            .with_lambda_min_ratio(0.05)
            .with_max_iterations(8000)
            .with_tolerance(1e-8);
        let fit = fit_path(&data, &config).unwrap();
        assert!(fit.converged.iter().all(|&c| c));

        // descending lambda: the active set can only grow or plateau
        let nnz = fit.nonzero_counts();
        assert!(
            nnz.windows(2).all(|w| w[1] >= w[0]),
            "active set shrank along the path: {:?}",
            nnz
        );
    }

    #[test]
    fn test_warm_start_no_worse_than_cold() {
        let data = synthetic_data(100, 4, 23);
        let config = PathConfig::new()
            .with_nlambda(10)
            .with_lambda_min_ratio(0.05)
            .with_max_iterations(10000)
            .with_tolerance(1e-8);
        let warm = fit_path(&data, &config).unwrap();

        let solver = ProxGradient::new(10000, 1e-8);
        let mut cold_iterations = 0;
        for (k, &lambda) in warm.lambdas.iter().enumerate() {
            let cold = solver
                .solve(&data, lambda, 1.0, Array1::zeros(4))
                .unwrap();
            cold_iterations += cold.iterations;

            let warm_obj = objective(&data, &warm.coefficients[k], lambda, 1.0);
            let cold_obj = objective(&data, &cold.beta, lambda, 1.0);
            assert!(
                warm_obj <= cold_obj + 1e-4 * cold_obj.abs().max(1.0),
                "warm start worse at lambda index {}: {} vs {}",
                k, warm_obj, cold_obj
            );
        }

        let warm_iterations: usize = warm.iterations.iter().sum();
        assert!(warm_iterations <= cold_iterations);
    }

    fn objective(data: &SurvivalData, beta: &Array1<f64>, lambda: f64, alpha: f64) -> f64 {
        let nll = likelihood::neg_log_partial_likelihood(data, beta.view()).unwrap();
        let l1: f64 = beta.iter().map(|b| b.abs()).sum();
        let l2: f64 = beta.iter().map(|b| b * b).sum();
        nll + lambda * (alpha * l1 + 0.5 * (1.0 - alpha) * l2)
    }

    #[test]
    fn test_kkt_audit_is_clean_on_converged_path() {
        let data = synthetic_data(100, 4, 13);
        let config = PathConfig::new()
            .with_nlambda(8)
            .with_lambda_min_ratio(0.1)
            .with_max_iterations(10000)
            .with_tolerance(1e-9);
        let fit = fit_path(&data, &config).unwrap();

        assert!(fit.converged.iter().all(|&c| c));
        for violations in &fit.kkt_violations {
            assert!(violations.is_empty(), "stationarity violated: {:?}", violations);
        }
    }

    #[test]
    fn test_fit_paths_matches_per_alpha_fits() {
        let data = synthetic_data(90, 3, 19);
        let base = PathConfig::new()
            .with_nlambda(6)
            .with_lambda_min_ratio(0.1)
            .with_max_iterations(5000)
            .with_tolerance(1e-7);
        let alphas = [0.5, 1.0];

        let parallel = fit_paths(&data, &alphas, &base).unwrap();
        assert_eq!(parallel.len(), 2);

        for (i, &alpha) in alphas.iter().enumerate() {
            let single = fit_path(&data, &base.clone().with_alpha(alpha)).unwrap();
            assert_eq!(parallel[i].alpha, alpha);
            assert_eq!(parallel[i].lambdas, single.lambdas);
            for (a, b) in parallel[i].coefficients.iter().zip(single.coefficients.iter()) {
                for j in 0..3 {
                    assert_relative_eq!(a[j], b[j], epsilon = 1e-15);
                }
            }
        }
    }

    #[test]
    fn test_explicit_lambdas_are_used_verbatim() {
        let data = synthetic_data(80, 3, 5);
        let lambdas = vec![1.0, 0.5, 0.25];
        let config = PathConfig::new()
            .with_lambdas(lambdas.clone())
            .with_max_iterations(5000)
            .with_tolerance(1e-7);
        let fit = fit_path(&data, &config).unwrap();
        assert_eq!(fit.lambdas, lambdas);
    }

    #[test]
    fn test_fail_fast_on_nonconvergence() {
        let data = synthetic_data(100, 4, 31);
        let config = PathConfig::new()
            .with_nlambda(5)
            .with_max_iterations(1)
            .with_tolerance(1e-14)
            .with_allow_nonconvergence(false);
        assert!(fit_path(&data, &config).is_err());
    }
}
