use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Regularization variant used during training passes. Mask values carry
/// the forward scaling, so backward reuses them as its correction factor.
///
/// | kind          | site            | mask value                    |
/// |---------------|-----------------|-------------------------------|
/// | `None`        | pre-activation  | `1`                           |
/// | `Dropout`     | pre-activation  | `Bernoulli(1 - p) / (1 - p)`  |
/// | `DropConnect` | weight matrix   | `Bernoulli(1 - p) / (1 - p)`  |
/// | `Gaussian`    | pre-activation  | `Normal(1, p(1 - p))`         |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropoutKind {
    #[default]
    None,
    Dropout,
    DropConnect,
    Gaussian,
}

/// Where a layer mask is multiplied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskSite {
    /// One factor per unit, applied to `x·W - b` before the activation.
    PreActivation,
    /// One factor per weight, applied to the weight matrix before the product.
    Weights,
}

impl DropoutKind {
    pub fn site(self) -> MaskSite {
        match self {
            DropoutKind::DropConnect => MaskSite::Weights,
            DropoutKind::None | DropoutKind::Dropout | DropoutKind::Gaussian => {
                MaskSite::PreActivation
            }
        }
    }

    /// Check a dropout rate for use with this kind.
    pub fn validate_rate(self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must lie in [0, 1), got {rate}"
            )));
        }
        Ok(())
    }

    /// Draw one mask factor for a unit (or weight) at dropout rate `rate`.
    #[inline]
    fn draw(self, rate: f64, rng: &mut ChaCha8Rng) -> f64 {
        match self {
            DropoutKind::None => 1.0,
            DropoutKind::Dropout | DropoutKind::DropConnect => {
                if rng.gen::<f64>() > rate {
                    1.0 / (1.0 - rate)
                } else {
                    0.0
                }
            }
            DropoutKind::Gaussian => {
                let std_dev = (rate * (1.0 - rate)).sqrt();
                let z: f64 = StandardNormal.sample(rng);
                1.0 + std_dev * z
            }
        }
    }
}

impl std::str::FromStr for DropoutKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(DropoutKind::None),
            "dropout" => Ok(DropoutKind::Dropout),
            "drop_connect" | "dropconnect" => Ok(DropoutKind::DropConnect),
            "gaussian" => Ok(DropoutKind::Gaussian),
            other => Err(Error::InvalidConfig(format!(
                "unknown dropout kind '{other}', expected none, dropout, drop_connect or gaussian"
            ))),
        }
    }
}

/// The mask for one layer, kept between a training forward pass and the
/// backward pass that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMask {
    site: MaskSite,
    values: Vec<f64>,
}

impl LayerMask {
    /// An identity mask of `len` factors at `site`.
    pub fn identity(site: MaskSite, len: usize) -> Self {
        Self {
            site,
            values: vec![1.0; len],
        }
    }

    /// Redraw the mask in place. A zero rate always yields the identity and
    /// consumes no randomness.
    pub fn resample(&mut self, kind: DropoutKind, rate: f64, rng: &mut ChaCha8Rng) {
        debug_assert_eq!(self.site, kind.site());
        if rate == 0.0 || kind == DropoutKind::None {
            self.reset();
            return;
        }
        for m in &mut self.values {
            *m = kind.draw(rate, rng);
        }
    }

    /// Force the mask back to the identity (evaluation mode).
    pub fn reset(&mut self) {
        self.values.fill(1.0);
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_identity(&self) -> bool {
        self.values.iter().all(|&m| m == 1.0)
    }

    /// Forward rule for the pre-activation of unit `j`.
    #[inline]
    pub fn pre_activation(&self, j: usize, z: f64) -> f64 {
        match self.site {
            MaskSite::PreActivation => z * self.values[j],
            MaskSite::Weights => z,
        }
    }

    /// Forward rule for weight `idx` of the row-major weight matrix.
    #[inline]
    pub fn weight(&self, idx: usize, w: f64) -> f64 {
        match self.site {
            MaskSite::PreActivation => w,
            MaskSite::Weights => w * self.values[idx],
        }
    }

    /// Backward correction of the error signal of unit `j`.
    #[inline]
    pub fn delta(&self, j: usize, delta: f64) -> f64 {
        match self.site {
            MaskSite::PreActivation => delta * self.values[j],
            MaskSite::Weights => delta,
        }
    }

    /// Backward correction of the gradient for weight `idx`.
    #[inline]
    pub fn weight_grad(&self, idx: usize, grad: f64) -> f64 {
        match self.site {
            MaskSite::PreActivation => grad,
            MaskSite::Weights => grad * self.values[idx],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_kinds_parse_from_names() {
        assert_eq!("none".parse::<DropoutKind>(), Ok(DropoutKind::None));
        assert_eq!("Dropout".parse::<DropoutKind>(), Ok(DropoutKind::Dropout));
        assert_eq!("drop_connect".parse::<DropoutKind>(), Ok(DropoutKind::DropConnect));
        assert_eq!("dropconnect".parse::<DropoutKind>(), Ok(DropoutKind::DropConnect));
        assert_eq!("gaussian".parse::<DropoutKind>(), Ok(DropoutKind::Gaussian));
        assert!(matches!(
            "zoneout".parse::<DropoutKind>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_rate_is_identity_and_draws_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let reference = ChaCha8Rng::seed_from_u64(7);

        for kind in [
            DropoutKind::None,
            DropoutKind::Dropout,
            DropoutKind::DropConnect,
            DropoutKind::Gaussian,
        ] {
            let mut mask = LayerMask::identity(kind.site(), 16);
            mask.resample(kind, 0.0, &mut rng);
            assert!(mask.is_identity(), "{kind:?} mask not identity at p = 0");
        }
        assert_eq!(rng.get_word_pos(), reference.get_word_pos());
    }

    #[test]
    fn test_inverted_dropout_scales_kept_units() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut mask = LayerMask::identity(MaskSite::PreActivation, 2000);
        mask.resample(DropoutKind::Dropout, 0.25, &mut rng);

        let kept = mask.values().iter().filter(|&&m| m > 0.0).count();
        for &m in mask.values() {
            assert!(m == 0.0 || (m - 1.0 / 0.75).abs() < 1e-12);
        }
        let frac = kept as f64 / 2000.0;
        assert!((frac - 0.75).abs() < 0.05, "kept fraction {frac}");
    }

    #[test]
    fn test_gaussian_mask_has_unit_mean_and_rate_variance() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut mask = LayerMask::identity(MaskSite::PreActivation, 20_000);
        mask.resample(DropoutKind::Gaussian, 0.5, &mut rng);

        let n = mask.values().len() as f64;
        let mean = mask.values().iter().sum::<f64>() / n;
        let var = mask.values().iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        assert!((mean - 1.0).abs() < 0.02, "mean {mean}");
        assert!((var - 0.25).abs() < 0.02, "variance {var}");
    }

    #[test]
    fn test_drop_connect_masks_weights_not_units() {
        let mask = LayerMask {
            site: MaskSite::Weights,
            values: vec![0.0, 2.0],
        };
        assert_eq!(mask.weight(0, 3.0), 0.0);
        assert_eq!(mask.weight(1, 3.0), 6.0);
        assert_eq!(mask.pre_activation(1, 3.0), 3.0);
        assert_eq!(mask.delta(1, 3.0), 3.0);
        assert_eq!(mask.weight_grad(1, 3.0), 6.0);
    }

    #[test]
    fn test_rates_outside_unit_interval_are_rejected() {
        assert!(DropoutKind::Dropout.validate_rate(0.0).is_ok());
        assert!(DropoutKind::Dropout.validate_rate(0.5).is_ok());
        assert!(DropoutKind::Dropout.validate_rate(1.0).is_err());
        assert!(DropoutKind::Gaussian.validate_rate(-0.1).is_err());
        assert!(DropoutKind::Gaussian.validate_rate(f64::NAN).is_err());
    }
}
