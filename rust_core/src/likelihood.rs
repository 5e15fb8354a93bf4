/// Gaussian log-likelihood of one dataset under a parameter draw, together
/// with the prediction RMSE reported alongside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LikelihoodEval {
    pub log_likelihood: f64,
    pub rmse: f64,
}

/// Evaluate predictions against targets under i.i.d. Normal(0, tau_sq) residuals.
pub fn evaluate(predictions: &[f64], targets: &[f64], tau_sq: f64) -> LikelihoodEval {
    LikelihoodEval {
        log_likelihood: log_likelihood(predictions, targets, tau_sq),
        rmse: rmse(predictions, targets),
    }
}

/// `-(n/2)·ln(2π·tau_sq) - Σ(t - p)² / (2·tau_sq)`
///
/// # Panics
///
/// If `tau_sq` is not strictly positive or the slices differ in length.
pub fn log_likelihood(predictions: &[f64], targets: &[f64], tau_sq: f64) -> f64 {
    assert!(
        tau_sq > 0.0,
        "noise variance must be strictly positive, got {tau_sq}"
    );
    let n = targets.len() as f64;
    let sum_sq = sum_sq_residuals(predictions, targets);
    -0.5 * n * (std::f64::consts::TAU * tau_sq).ln() - 0.5 * sum_sq / tau_sq
}

/// Root of the mean squared residual.
pub fn rmse(predictions: &[f64], targets: &[f64]) -> f64 {
    (sum_sq_residuals(predictions, targets) / targets.len() as f64).sqrt()
}

fn sum_sq_residuals(predictions: &[f64], targets: &[f64]) -> f64 {
    assert_eq!(
        predictions.len(),
        targets.len(),
        "{} predictions for {} targets",
        predictions.len(),
        targets.len()
    );
    predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| {
            let d = t - p;
            d * d
        })
        .sum()
}
