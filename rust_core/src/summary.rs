use serde::{Deserialize, Serialize};

use crate::trace::PosteriorTrace;

/// Per-row predictive mean with a 5%–95% percentile band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBand {
    pub mean: Vec<f64>,
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    /// Index of the first retained trace entry.
    pub burn_in: usize,
    /// Number of retained entries.
    pub num_draws: usize,
    pub rmse_train_mean: f64,
    pub rmse_train_std: f64,
    pub rmse_test_mean: f64,
    pub rmse_test_std: f64,
    pub tau_sq_mean: f64,
    pub weight_mean: Vec<f64>,
    pub weight_std: Vec<f64>,
    pub train_band: PredictionBand,
    pub test_band: PredictionBand,
}

impl PosteriorSummary {
    /// Summarise `trace`, discarding the first `burn_in` fraction of entries.
    ///
    /// # Panics
    ///
    /// If the trace is empty.
    pub fn from_trace(trace: &PosteriorTrace, burn_in: f64) -> Self {
        assert!(!trace.is_empty(), "cannot summarise an empty trace");
        let frac = if burn_in.is_finite() {
            burn_in.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let start = ((frac * trace.len() as f64) as usize).min(trace.len() - 1);
        let kept = &trace.entries()[start..];

        let rmse_train: Vec<f64> = kept.iter().map(|e| e.rmse_train).collect();
        let rmse_test: Vec<f64> = kept.iter().map(|e| e.rmse_test).collect();
        let tau_sq: Vec<f64> = kept.iter().map(|e| e.tau_sq).collect();

        let w_size = kept[0].w.len();
        let weight_cols: Vec<Vec<f64>> = (0..w_size)
            .map(|k| kept.iter().map(|e| e.w[k]).collect())
            .collect();

        let train_draws: Vec<&[f64]> = kept.iter().map(|e| e.pred_train.as_slice()).collect();
        let test_draws: Vec<&[f64]> = kept.iter().map(|e| e.pred_test.as_slice()).collect();

        Self {
            burn_in: start,
            num_draws: kept.len(),
            rmse_train_mean: mean(&rmse_train),
            rmse_train_std: std(&rmse_train),
            rmse_test_mean: mean(&rmse_test),
            rmse_test_std: std(&rmse_test),
            tau_sq_mean: mean(&tau_sq),
            weight_mean: weight_cols.iter().map(|c| mean(c)).collect(),
            weight_std: weight_cols.iter().map(|c| std(c)).collect(),
            train_band: prediction_band(&train_draws),
            test_band: prediction_band(&test_draws),
        }
    }

    /// Render the summary as a formatted table string.
    pub fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} draws after discarding {} burn-in entries",
            self.num_draws, self.burn_in
        ));
        lines.push(String::new());
        lines.push(format!("{:<12} {:>10} {:>10}", "", "mean", "std"));
        lines.push("─".repeat(34));
        lines.push(format!(
            "{:<12} {:>10.5} {:>10.5}",
            "rmse train", self.rmse_train_mean, self.rmse_train_std
        ));
        lines.push(format!(
            "{:<12} {:>10.5} {:>10.5}",
            "rmse test", self.rmse_test_mean, self.rmse_test_std
        ));
        lines.push(format!("{:<12} {:>10.5}", "tau_sq", self.tau_sq_mean));
        lines.push("─".repeat(34));

        let width = |b: &PredictionBand| -> f64 {
            if b.mean.is_empty() {
                return f64::NAN;
            }
            b.high
                .iter()
                .zip(&b.low)
                .map(|(h, l)| h - l)
                .sum::<f64>()
                / b.mean.len() as f64
        };
        lines.push(format!(
            "Mean 90% band width: train {:.5}  │  test {:.5}",
            width(&self.train_band),
            width(&self.test_band)
        ));

        lines.join("\n")
    }
}

// ── Internal helpers ────────────────────────────────────────────────

/// `draws[d][r]` is the prediction of draw `d` for row `r`.
fn prediction_band(draws: &[&[f64]]) -> PredictionBand {
    let rows = draws[0].len();
    let mut band = PredictionBand {
        mean: Vec::with_capacity(rows),
        low: Vec::with_capacity(rows),
        high: Vec::with_capacity(rows),
    };
    for r in 0..rows {
        let mut col: Vec<f64> = draws.iter().map(|d| d[r]).collect();
        band.mean.push(mean(&col));
        sort_floats(&mut col);
        band.low.push(quantile_sorted(&col, 0.05));
        band.high.push(quantile_sorted(&col, 0.95));
    }
    band
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
fn std(data: &[f64]) -> f64 {
    let m = mean(data);
    (data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

fn sort_floats(data: &mut [f64]) {
    data.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Linear-interpolated quantile of sorted data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = q * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let frac = idx - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi.min(sorted.len() - 1)] * frac
}
