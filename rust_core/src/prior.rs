use serde::{Deserialize, Serialize};

use crate::network::Topology;
use crate::{Error, Result};

/// Hyperparameters of the joint prior: a zero-mean Gaussian with variance
/// `sigma_sq` on every weight, and an inverse-gamma shaped prior with
/// `(nu_1, nu_2)` on the noise variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    pub sigma_sq: f64,
    pub nu_1: f64,
    pub nu_2: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            sigma_sq: 25.0,
            nu_1: 0.0,
            nu_2: 0.0,
        }
    }
}

impl PriorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma_sq.is_finite() && self.sigma_sq > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "prior weight variance must be finite and > 0, got {}",
                self.sigma_sq
            )));
        }
        if !(self.nu_1.is_finite() && self.nu_2.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "prior noise hyperparameters must be finite, got ({}, {})",
                self.nu_1, self.nu_2
            )));
        }
        Ok(())
    }

    /// Unnormalised log prior density of `(w, tau_sq)`.
    ///
    /// The weight normaliser counts `d·h + h + 2` terms regardless of the
    /// output width; with `nu_1 = nu_2 = 0` the noise term reduces to
    /// `-ln(tau_sq)`.
    pub fn log_prior(&self, topology: &Topology, w: &[f64], tau_sq: f64) -> f64 {
        let d = topology.input() as f64;
        let h = topology.hidden() as f64;
        let sum_sq: f64 = w.iter().map(|wi| wi * wi).sum();

        let part1 = -((d * h + h + 2.0) / 2.0) * self.sigma_sq.ln();
        let part2 = sum_sq / (2.0 * self.sigma_sq);
        part1 - part2 - (1.0 + self.nu_1) * tau_sq.ln() - self.nu_2 / tau_sq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matches_closed_form() {
        let topology = Topology::new(4, 5, 1).unwrap();
        let prior = PriorConfig {
            sigma_sq: 4.0,
            nu_1: 1.0,
            nu_2: 0.5,
        };
        let w = vec![1.0; topology.w_size()];
        let tau_sq = 2.0;

        let expected = -(27.0 / 2.0) * 4.0_f64.ln() - 31.0 / 8.0 - 2.0 * 2.0_f64.ln() - 0.25;
        assert_relative_eq!(prior.log_prior(&topology, &w, tau_sq), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_default_noise_term_is_scale_invariant_prior() {
        let topology = Topology::default();
        let prior = PriorConfig::default();
        let w = vec![0.0; topology.w_size()];
        let a = prior.log_prior(&topology, &w, 1.0);
        let b = prior.log_prior(&topology, &w, std::f64::consts::E);
        assert_relative_eq!(a - b, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_larger_weights_are_less_probable() {
        let topology = Topology::default();
        let prior = PriorConfig::default();
        let small = vec![0.1; topology.w_size()];
        let large = vec![3.0; topology.w_size()];
        assert!(prior.log_prior(&topology, &small, 1.0) > prior.log_prior(&topology, &large, 1.0));
    }

    #[test]
    fn test_rejects_non_positive_weight_variance() {
        let prior = PriorConfig {
            sigma_sq: 0.0,
            ..PriorConfig::default()
        };
        assert!(prior.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let prior: PriorConfig = serde_json::from_str(r#"{"sigma_sq": 10.0}"#).unwrap();
        assert_eq!(prior.sigma_sq, 10.0);
        assert_eq!(prior.nu_1, 0.0);
        assert_eq!(prior.nu_2, 0.0);
    }
}
