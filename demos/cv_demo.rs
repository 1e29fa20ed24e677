use coxnet::{cross_validate, CvConfig, DevianceKind, PathConfig, SurvivalData};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn generate_synthetic_dataset(n_rows: usize, n_features: usize, seed: u64) -> coxnet::Result<SurvivalData> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut covariates_vec = Vec::with_capacity(n_rows * n_features);
    for _ in 0..(n_rows * n_features) {
        covariates_vec.push(rng.gen_range(-2.0..2.0));
    }
    let covariates = Array2::from_shape_vec((n_rows, n_features), covariates_vec).unwrap();

    // only the first three features affect survival
    let true_beta = [0.8, -0.5, 0.3];

    let mut times = Vec::with_capacity(n_rows);
    let mut events = Vec::with_capacity(n_rows);
    for i in 0..n_rows {
        let lp: f64 = true_beta
            .iter()
            .enumerate()
            .map(|(j, &b)| b * covariates[[i, j]])
            .sum();
        let hazard = 0.1 * lp.exp();
        let time = (-rng.r#gen::<f64>().ln() / hazard).max(1e-3);
        let censoring_time = rng.gen_range(1.0..15.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    SurvivalData::new(times, events, covariates)
}

fn main() -> coxnet::Result<()> {
    env_logger::init();

    let data = generate_synthetic_dataset(200, 10, 42)?;
    let n_events = data.events().iter().filter(|&&e| e).count();
    println!("dataset: {} rows, {} features, {} events", data.n_rows(), data.n_features(), n_events);

    let config = CvConfig::new()
        .with_path(
            PathConfig::new()
                .with_nlambda(50)
                .with_lambda_min_ratio(1e-3)
                .with_path_fraction(0.6)
                .with_max_iterations(5000)
                .with_tolerance(1e-6),
        )
        .with_alphas(vec![0.5, 1.0])
        .with_nfolds(5)
        .with_deviance(DevianceKind::VV)
        .with_seed(2024)
        .with_refit(true);

    let fit = cross_validate(&data, &config)?;

    println!();
    println!("{:<8} {:<12} {:<14} {:<12}", "alpha", "lambda", "mean deviance", "se");
    println!("{:-<48}", "");
    for record in &fit.table {
        println!(
            "{:<8.2} {:<12.6} {:<14.4} {:<12.4}",
            record.alpha, record.lambda, record.mean_deviance, record.se_deviance
        );
    }

    println!();
    println!("alpha.optimal: {:.2}", fit.alpha_opt);
    println!("lambda.min:    {:.6}", fit.lambda_min);
    println!("lambda.1se:    {:.6}", fit.lambda_1se);

    if let Some(refit) = &fit.refit {
        let idx = refit
            .lambdas
            .iter()
            .position(|&l| l == fit.lambda_min)
            .expect("lambda.min is on the refit grid");
        let beta = &refit.coefficients[idx];

        println!();
        println!("coefficients at lambda.min:");
        for (j, &b) in beta.iter().enumerate() {
            if b != 0.0 {
                println!("  x{:<3} {:>10.6}", j, b);
            }
        }
    }

    Ok(())
}
