//! # coxnet
//!
//! elastic-net penalized cox proportional hazards - regularization paths,
//! cross-validation, and nothing you didn't ask for
//!
//! ## what you get
//!
//! - cox partial likelihood over precomputed risk sets (breslow ties,
//!   counting-process start/stop data, observation weights)
//! - proximal gradient solver with barzilai-borwein step sizes
//! - warm-started lambda paths with KKT auditing
//! - k-fold cross-validation over a (lambda, alpha) grid, parallel via rayon
//!
//! ## quick start
//!
//! ```rust
//! use coxnet::{SurvivalData, PathConfig, fit_path};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // setup some survival data
//! let times = vec![1.0, 2.5, 3.2, 4.1];
//! let events = vec![true, false, true, true]; // true = died, false = censored
//! let covariates = Array2::from_shape_vec((4, 2), vec![
//!     1.0, 0.5,
//!     2.0, 1.0,
//!     1.5, 0.0,
//!     3.0, 1.5,
//! ])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//!
//! // fit a short lasso path
//! let config = PathConfig::new().with_alpha(1.0).with_nlambda(10);
//! let path = fit_path(&data, &config)?;
//!
//! // coefficients at the smallest lambda
//! let beta = &path.coefficients[path.n_lambdas() - 1];
//! assert_eq!(beta.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod likelihood;
pub mod solver;
pub mod path;
pub mod cv;
pub mod error;

pub use data::{RiskSet, SurvivalData};
pub use error::{CoxnetError, Result};
pub use solver::{kkt_check, lambda_max, ProxGradient, SolveOutcome, SolveStatus};
pub use path::{fit_path, fit_paths, lambda_sequence, PathConfig, PathFit};
pub use cv::{assign_folds, cross_validate, CvConfig, CvFit, CvRecord, DevianceKind};
