//! K-fold cross-validation over a (lambda, alpha) grid.
//!
//! Fold assignment is computed once up front from an explicitly seeded
//! generator; (fold x alpha) work units are independent and run on a rayon
//! pool, sharing only read-only data. Results are merged in (alpha, fold)
//! index order, so the aggregated tables are identical whether the sweep ran
//! sequentially or in parallel.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use crate::{
    data::SurvivalData,
    error::{CoxnetError, Result},
    likelihood,
    path::{fit_path, lambda_sequence, PathConfig, PathFit},
    solver::lambda_max,
};

/// How held-out deviance is computed for a training-fold solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevianceKind {
    /// -2 * partial log-likelihood of the held-out fold, risk sets built from
    /// the held-out fold alone
    Basic,
    /// Verweij-Van Houwelingen: -2 * (full-data loglik - training loglik), so
    /// risk sets spanning the fold boundary contribute
    VV,
}

/// Cross-validation configuration wrapping a per-fit [`PathConfig`].
#[derive(Debug, Clone)]
pub struct CvConfig {
    pub path: PathConfig,
    /// elastic-net mixing values to sweep; the path config's own alpha is
    /// ignored in favor of these
    pub alphas: Vec<f64>,
    pub nfolds: usize,
    /// explicit fold id per observation (in 0..nfolds); overrides the seeded
    /// randomized assignment
    pub fold_ids: Option<Vec<usize>>,
    pub deviance: DevianceKind,
    pub seed: u64,
    /// worker threads for the (fold x alpha) sweep; 0 = rayon default,
    /// 1 = strictly sequential
    pub nworkers: usize,
    /// refit the full-data path at the selected alpha
    pub refit: bool,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            path: PathConfig::default(),
            alphas: vec![1.0],
            nfolds: 5,
            fold_ids: None,
            deviance: DevianceKind::VV,
            seed: 0,
            nworkers: 0,
            refit: false,
        }
    }
}

impl CvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: PathConfig) -> Self {
        self.path = path;
        self
    }

    pub fn with_alphas(mut self, alphas: Vec<f64>) -> Self {
        self.alphas = alphas;
        self
    }

    pub fn with_nfolds(mut self, nfolds: usize) -> Self {
        self.nfolds = nfolds;
        self
    }

    pub fn with_fold_ids(mut self, fold_ids: Vec<usize>) -> Self {
        self.fold_ids = Some(fold_ids);
        self
    }

    pub fn with_deviance(mut self, deviance: DevianceKind) -> Self {
        self.deviance = deviance;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_nworkers(mut self, nworkers: usize) -> Self {
        self.nworkers = nworkers;
        self
    }

    pub fn with_refit(mut self, refit: bool) -> Self {
        self.refit = refit;
        self
    }

    fn validate(&self, n_rows: usize) -> Result<()> {
        self.path.validate()?;
        if self.alphas.is_empty() {
            return Err(CoxnetError::invalid_parameter("alphas", "empty"));
        }
        for &a in &self.alphas {
            if !(0.0..=1.0).contains(&a) {
                return Err(CoxnetError::invalid_parameter("alpha", a.to_string()));
            }
        }
        if self.nfolds < 3 {
            return Err(CoxnetError::invalid_parameter("nfolds", self.nfolds.to_string()));
        }
        if self.nfolds > n_rows {
            return Err(CoxnetError::invalid_parameter(
                "nfolds",
                format!("{} folds for {} rows", self.nfolds, n_rows),
            ));
        }
        if let Some(ids) = &self.fold_ids {
            if ids.len() != n_rows {
                return Err(CoxnetError::invalid_dimensions(format!(
                    "fold_ids len ({}) != n_rows ({})",
                    ids.len(),
                    n_rows
                )));
            }
            for k in 0..self.nfolds {
                if !ids.iter().any(|&id| id == k) {
                    return Err(CoxnetError::invalid_parameter(
                        "fold_ids",
                        format!("fold {} is empty", k),
                    ));
                }
            }
            if ids.iter().any(|&id| id >= self.nfolds) {
                return Err(CoxnetError::invalid_parameter(
                    "fold_ids",
                    "fold id out of range",
                ));
            }
        }
        Ok(())
    }
}

/// One row of the aggregated cross-validation table.
#[derive(Debug, Clone, PartialEq)]
pub struct CvRecord {
    pub alpha: f64,
    pub lambda: f64,
    pub mean_deviance: f64,
    pub se_deviance: f64,
}

/// Terminal artifact of a cross-validation run.
#[derive(Debug, Clone)]
pub struct CvFit {
    /// mean/se deviance per (alpha, lambda), alphas outer, lambdas inner
    /// (descending)
    pub table: Vec<CvRecord>,
    /// lambda minimizing mean deviance at the optimal alpha
    pub lambda_min: f64,
    /// largest lambda within one standard error of the minimum
    pub lambda_1se: f64,
    /// alpha attaining the global deviance minimum
    pub alpha_opt: f64,
    /// fold assignment actually used, for reproducibility
    pub fold_ids: Vec<usize>,
    /// full-data path at `alpha_opt`, present when refit was requested
    pub refit: Option<PathFit>,
}

impl CvFit {
    /// table rows for one alpha, in descending-lambda order
    pub fn records_for_alpha(&self, alpha: f64) -> Vec<&CvRecord> {
        self.table.iter().filter(|r| r.alpha == alpha).collect()
    }
}

/// Randomized fold assignment: shuffle the row indices with a seeded
/// generator, then deal them round-robin so fold sizes differ by at most one.
pub fn assign_folds(n_rows: usize, nfolds: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n_rows).collect();
    order.shuffle(&mut rng);

    let mut fold_ids = vec![0; n_rows];
    for (position, &row) in order.iter().enumerate() {
        fold_ids[row] = position % nfolds;
    }
    fold_ids
}

/// Held-out deviance of each lambda's coefficients for one fold.
fn fold_deviances(
    full: &SurvivalData,
    train: &SurvivalData,
    test: &SurvivalData,
    fit: &PathFit,
    kind: DevianceKind,
) -> Result<Vec<f64>> {
    fit.coefficients
        .iter()
        .map(|beta| match kind {
            DevianceKind::Basic => {
                let nll_test = likelihood::neg_log_partial_likelihood(test, beta.view())?;
                Ok(2.0 * nll_test)
            }
            DevianceKind::VV => {
                let nll_full = likelihood::neg_log_partial_likelihood(full, beta.view())?;
                let nll_train = likelihood::neg_log_partial_likelihood(train, beta.view())?;
                Ok(2.0 * (nll_full - nll_train))
            }
        })
        .collect()
}

struct FoldOutcome {
    alpha_idx: usize,
    deviances: Vec<f64>,
    nonconverged: usize,
}

fn run_fold(
    data: &SurvivalData,
    fold_ids: &[usize],
    fold: usize,
    alpha_idx: usize,
    alpha: f64,
    lambdas: &[f64],
    config: &CvConfig,
) -> Result<FoldOutcome> {
    let train_rows: Vec<usize> = (0..data.n_rows()).filter(|&i| fold_ids[i] != fold).collect();
    let test_rows: Vec<usize> = (0..data.n_rows()).filter(|&i| fold_ids[i] == fold).collect();

    let train = data.subset(&train_rows).map_err(|e| {
        CoxnetError::invalid_survival_data(format!("training split for fold {}: {}", fold, e))
    })?;

    let path_config = config
        .path
        .clone()
        .with_alpha(alpha)
        .with_lambdas(lambdas.to_vec());
    let fit = fit_path(&train, &path_config)?;

    let deviances = match config.deviance {
        DevianceKind::Basic => {
            let test = data.subset(&test_rows).map_err(|e| {
                CoxnetError::invalid_survival_data(format!("held-out split for fold {}: {}", fold, e))
            })?;
            fold_deviances(data, &train, &test, &fit, DevianceKind::Basic)?
        }
        DevianceKind::VV => fold_deviances(data, &train, &train, &fit, DevianceKind::VV)?,
    };

    debug!(
        "fold {} alpha {}: {} lambdas evaluated, {} nonconverged",
        fold,
        alpha,
        deviances.len(),
        fit.n_nonconverged()
    );

    Ok(FoldOutcome {
        alpha_idx,
        deviances,
        nonconverged: fit.n_nonconverged(),
    })
}

/// Run the full cross-validation sweep and select (alpha, lambda).
///
/// Every fold shares one lambda sequence per alpha, derived from the
/// full-data `lambda_max`, so fold deviances line up for aggregation. The
/// (fold x alpha) units run on a rayon pool sized by `nworkers`; merging in
/// index order keeps the output independent of completion order.
pub fn cross_validate(data: &SurvivalData, config: &CvConfig) -> Result<CvFit> {
    config.validate(data.n_rows())?;

    let fold_ids = match &config.fold_ids {
        Some(ids) => ids.clone(),
        None => assign_folds(data.n_rows(), config.nfolds, config.seed),
    };

    // one shared lambda grid per alpha, anchored at the full-data bound
    let mut lambda_grids = Vec::with_capacity(config.alphas.len());
    for &alpha in &config.alphas {
        let grid = match &config.path.lambdas {
            Some(explicit) => explicit.clone(),
            None => {
                let lmax = lambda_max(data, alpha)?;
                lambda_sequence(
                    lmax,
                    config.path.nlambda,
                    config.path.lambda_min_ratio,
                    config.path.path_fraction,
                )
            }
        };
        lambda_grids.push(grid);
    }

    // (alpha, fold) task list, fixed order for deterministic merging
    let tasks: Vec<(usize, usize)> = (0..config.alphas.len())
        .flat_map(|a| (0..config.nfolds).map(move |k| (a, k)))
        .collect();

    let run = |&(alpha_idx, fold): &(usize, usize)| -> Result<FoldOutcome> {
        run_fold(
            data,
            &fold_ids,
            fold,
            alpha_idx,
            config.alphas[alpha_idx],
            &lambda_grids[alpha_idx],
            config,
        )
    };

    let outcomes: Vec<FoldOutcome> = if config.nworkers == 1 {
        tasks.iter().map(run).collect::<Result<_>>()?
    } else if config.nworkers == 0 {
        tasks.par_iter().map(run).collect::<Result<_>>()?
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.nworkers)
            .build()
            .map_err(|e| CoxnetError::invalid_parameter("nworkers", e.to_string()))?;
        pool.install(|| tasks.par_iter().map(run).collect::<Result<_>>())?
    };

    let nonconverged: usize = outcomes.iter().map(|o| o.nonconverged).sum();
    if nonconverged > 0 {
        warn!(
            "{} path fits across folds had lambdas that failed to converge",
            nonconverged
        );
    }

    // aggregate mean/se per (alpha, lambda) in index order
    let mut table = Vec::new();
    for (alpha_idx, &alpha) in config.alphas.iter().enumerate() {
        let per_fold: Vec<&FoldOutcome> = outcomes
            .iter()
            .filter(|o| o.alpha_idx == alpha_idx)
            .collect();
        let k = per_fold.len() as f64;

        for (lambda_idx, &lambda) in lambda_grids[alpha_idx].iter().enumerate() {
            let devs: Vec<f64> = per_fold.iter().map(|o| o.deviances[lambda_idx]).collect();
            let mean = devs.iter().sum::<f64>() / k;
            let var = devs.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / (k - 1.0);
            let se = (var / k).sqrt();

            table.push(CvRecord {
                alpha,
                lambda,
                mean_deviance: mean,
                se_deviance: se,
            });
        }
    }

    // global minimum picks alpha; lambda_min and lambda_1se within that alpha
    let best = table
        .iter()
        .min_by(|a, b| a.mean_deviance.total_cmp(&b.mean_deviance))
        .ok_or_else(|| CoxnetError::numerical_error("empty cross-validation table"))?;
    let alpha_opt = best.alpha;
    let lambda_min = best.lambda;
    let dev_threshold = best.mean_deviance + best.se_deviance;

    // lambdas are descending, so the first record within threshold has the
    // largest lambda
    let lambda_1se = table
        .iter()
        .filter(|r| r.alpha == alpha_opt && r.mean_deviance <= dev_threshold)
        .map(|r| r.lambda)
        .next()
        .unwrap_or(lambda_min);

    let refit = if config.refit {
        let alpha_idx = config
            .alphas
            .iter()
            .position(|&a| a == alpha_opt)
            .ok_or_else(|| CoxnetError::numerical_error("selected alpha not in grid"))?;
        let path_config = config
            .path
            .clone()
            .with_alpha(alpha_opt)
            .with_lambdas(lambda_grids[alpha_idx].clone());
        Some(fit_path(data, &path_config)?)
    } else {
        None
    };

    Ok(CvFit {
        table,
        lambda_min,
        lambda_1se,
        alpha_opt,
        fold_ids,
        refit,
    })
}
