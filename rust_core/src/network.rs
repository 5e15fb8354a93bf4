use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::regularization::{DropoutKind, LayerMask, MaskSite};
use crate::{Error, Result};

/// Layer sizes `(input, hidden, output)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    input: usize,
    hidden: usize,
    output: usize,
}

impl Topology {
    pub fn new(input: usize, hidden: usize, output: usize) -> Result<Self> {
        let topology = Self {
            input,
            hidden,
            output,
        };
        topology.validate()?;
        Ok(topology)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input == 0 || self.hidden == 0 || self.output == 0 {
            return Err(Error::InvalidConfig(format!(
                "all layer sizes must be > 0, got ({}, {}, {})",
                self.input, self.hidden, self.output
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn input(&self) -> usize {
        self.input
    }

    #[inline]
    pub fn hidden(&self) -> usize {
        self.hidden
    }

    #[inline]
    pub fn output(&self) -> usize {
        self.output
    }

    /// Length of the flat parameter vector.
    #[inline]
    pub fn w_size(&self) -> usize {
        self.input * self.hidden + self.hidden * self.output + self.hidden + self.output
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            input: 4,
            hidden: 5,
            output: 1,
        }
    }
}

/// Three-layer sigmoid network. Both layers compute `sigmoid(x·W - B)`.
///
/// The weights are scratch space: callers decode a parameter vector before
/// every evaluation. Parameter layout (`w_size = d·h + h·o + h + o`):
///
/// ```text
/// [ W1 (d × h, row-major) | W2 (h × o, row-major) | B1 (h) | B2 (o) ]
/// ```
#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    learn_rate: f64,
    dropout: DropoutKind,
    input_dropout: f64,
    hidden_dropout: f64,

    /// Row-major `(input, hidden)`.
    w1: Vec<f64>,
    /// Row-major `(hidden, output)`.
    w2: Vec<f64>,
    b1: Vec<f64>,
    b2: Vec<f64>,

    hidden_out: Vec<f64>,
    out: Vec<f64>,
    out_delta: Vec<f64>,
    hid_delta: Vec<f64>,

    /// Mask of the first layer (`input_dropout`), kept for the next backward pass.
    input_mask: LayerMask,
    /// Mask of the second layer (`hidden_dropout`).
    hidden_mask: LayerMask,
}

impl Network {
    /// Build a network with scaled standard-normal initial weights.
    pub fn new(
        topology: Topology,
        learn_rate: f64,
        dropout: DropoutKind,
        input_dropout: f64,
        hidden_dropout: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self> {
        topology.validate()?;
        dropout.validate_rate(input_dropout)?;
        dropout.validate_rate(hidden_dropout)?;
        if !learn_rate.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite, got {learn_rate}"
            )));
        }

        let (d, h, o) = (topology.input, topology.hidden, topology.output);
        let mut randn = |n: usize, scale: f64| -> Vec<f64> {
            (0..n)
                .map(|_| {
                    let z: f64 = StandardNormal.sample(rng);
                    z / scale
                })
                .collect()
        };
        let w1 = randn(d * h, (d as f64).sqrt());
        let b1 = randn(h, (h as f64).sqrt());
        let w2 = randn(h * o, (h as f64).sqrt());
        let b2 = randn(o, (h as f64).sqrt());

        let (input_mask, hidden_mask) = match dropout.site() {
            MaskSite::PreActivation => (
                LayerMask::identity(MaskSite::PreActivation, h),
                LayerMask::identity(MaskSite::PreActivation, o),
            ),
            MaskSite::Weights => (
                LayerMask::identity(MaskSite::Weights, d * h),
                LayerMask::identity(MaskSite::Weights, h * o),
            ),
        };

        Ok(Self {
            topology,
            learn_rate,
            dropout,
            input_dropout,
            hidden_dropout,
            w1,
            w2,
            b1,
            b2,
            hidden_out: vec![0.0; h],
            out: vec![0.0; o],
            out_delta: vec![0.0; o],
            hid_delta: vec![0.0; h],
            input_mask,
            hidden_mask,
        })
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    #[inline]
    pub fn dropout(&self) -> DropoutKind {
        self.dropout
    }

    /// Output of the most recent forward pass.
    #[inline]
    pub fn output(&self) -> &[f64] {
        &self.out
    }

    /// Masks drawn by the most recent forward pass (first layer, second layer).
    pub fn masks(&self) -> (&LayerMask, &LayerMask) {
        (&self.input_mask, &self.hidden_mask)
    }

    /// Training-mode forward pass: draws fresh masks for both layers and keeps
    /// them for the following [`Network::backward`].
    pub fn forward_train(&mut self, x: &[f64], rng: &mut ChaCha8Rng) -> &[f64] {
        self.input_mask.resample(self.dropout, self.input_dropout, rng);
        self.hidden_mask.resample(self.dropout, self.hidden_dropout, rng);
        self.propagate(x);
        &self.out
    }

    /// Evaluation-mode forward pass: masks are the identity regardless of the
    /// configured rates.
    pub fn forward_eval(&mut self, x: &[f64]) -> &[f64] {
        self.input_mask.reset();
        self.hidden_mask.reset();
        self.propagate(x);
        &self.out
    }

    /// Forward pass in either mode. `rng` is only touched when `training`.
    pub fn forward(&mut self, x: &[f64], training: bool, rng: &mut ChaCha8Rng) -> &[f64] {
        if training {
            self.forward_train(x, rng)
        } else {
            self.forward_eval(x)
        }
    }

    fn propagate(&mut self, x: &[f64]) {
        let (d, h, o) = (self.topology.input, self.topology.hidden, self.topology.output);
        assert_eq!(x.len(), d, "input row has {} values, expected {d}", x.len());

        for j in 0..h {
            let mut z = 0.0;
            for (i, &xi) in x.iter().enumerate() {
                let idx = i * h + j;
                z += xi * self.input_mask.weight(idx, self.w1[idx]);
            }
            z -= self.b1[j];
            self.hidden_out[j] = sigmoid(self.input_mask.pre_activation(j, z));
        }

        for k in 0..o {
            let mut z = 0.0;
            for j in 0..h {
                let idx = j * o + k;
                z += self.hidden_out[j] * self.hidden_mask.weight(idx, self.w2[idx]);
            }
            z -= self.b2[k];
            self.out[k] = sigmoid(self.hidden_mask.pre_activation(k, z));
        }
    }

    /// One stochastic gradient step on a single row, using the activations
    /// and masks left behind by the preceding forward pass.
    pub fn backward(&mut self, input: &[f64], target: &[f64]) {
        let (d, h, o) = (self.topology.input, self.topology.hidden, self.topology.output);
        assert_eq!(input.len(), d, "input row has {} values, expected {d}", input.len());
        assert_eq!(target.len(), o, "target row has {} values, expected {o}", target.len());

        for k in 0..o {
            let y = self.out[k];
            self.out_delta[k] = (target[k] - y) * y * (1.0 - y);
        }
        // Hidden deltas use the second-layer weights before this step updates them.
        for j in 0..h {
            let mut back = 0.0;
            for k in 0..o {
                back += self.out_delta[k] * self.w2[j * o + k];
            }
            let a = self.hidden_out[j];
            self.hid_delta[j] = back * a * (1.0 - a);
        }

        let lr = self.learn_rate;

        for k in 0..o {
            let delta = self.hidden_mask.delta(k, self.out_delta[k]);
            for j in 0..h {
                let idx = j * o + k;
                let grad = self.hidden_mask.weight_grad(idx, self.hidden_out[j] * delta);
                self.w2[idx] += lr * grad;
            }
            self.b2[k] -= lr * delta;
        }

        for j in 0..h {
            let delta = self.input_mask.delta(j, self.hid_delta[j]);
            for (i, &xi) in input.iter().enumerate() {
                let idx = i * h + j;
                let grad = self.input_mask.weight_grad(idx, xi * delta);
                self.w1[idx] += lr * grad;
            }
            self.b1[j] -= lr * delta;
        }
    }

    /// Mean squared error of the latest output against `target`.
    pub fn sample_error(&self, target: &[f64]) -> f64 {
        debug_assert_eq!(target.len(), self.out.len());
        let sum: f64 = self
            .out
            .iter()
            .zip(target)
            .map(|(y, t)| (y - t) * (y - t))
            .sum();
        sum / self.out.len() as f64
    }

    /// Flatten the weights into a parameter vector.
    pub fn encode(&self) -> Vec<f64> {
        let mut w = Vec::with_capacity(self.topology.w_size());
        w.extend_from_slice(&self.w1);
        w.extend_from_slice(&self.w2);
        w.extend_from_slice(&self.b1);
        w.extend_from_slice(&self.b2);
        w
    }

    /// Load a parameter vector into the weights.
    ///
    /// # Panics
    ///
    /// If `w.len() != topology.w_size()`.
    pub fn decode(&mut self, w: &[f64]) {
        assert_eq!(
            w.len(),
            self.topology.w_size(),
            "parameter vector has length {}, expected {}",
            w.len(),
            self.topology.w_size()
        );
        let (n1, n2, h) = (self.w1.len(), self.w2.len(), self.b1.len());
        let (w1, rest) = w.split_at(n1);
        let (w2, rest) = rest.split_at(n2);
        let (b1, b2) = rest.split_at(h);
        self.w1.copy_from_slice(w1);
        self.w2.copy_from_slice(w2);
        self.b1.copy_from_slice(b1);
        self.b2.copy_from_slice(b2);
    }

    /// Decode `w`, run `depth` epochs of per-row SGD over `data` in row order,
    /// and return the resulting parameter vector.
    ///
    /// This is the gradient step the sampler centres Langevin proposals on.
    pub fn langevin_gradient(
        &mut self,
        data: &Dataset,
        w: &[f64],
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<f64> {
        self.decode(w);
        for _ in 0..depth {
            for row in 0..data.len() {
                let x = data.covariates(row);
                self.forward(x, true, rng);
                self.backward(x, data.targets(row));
            }
        }
        self.encode()
    }

    /// Decode `w` and return the first output unit for every row of `data`.
    /// Runs in evaluation mode; the weights are not modified.
    pub fn evaluate_proposal(&mut self, data: &Dataset, w: &[f64]) -> Vec<f64> {
        self.decode(w);
        (0..data.len())
            .map(|row| self.forward_eval(data.covariates(row))[0])
            .collect()
    }
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn net(kind: DropoutKind, p_in: f64, p_hid: f64, seed: u64) -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let topology = Topology::new(3, 4, 1).unwrap();
        Network::new(topology, 0.1, kind, p_in, p_hid, &mut rng).unwrap()
    }

    fn toy_data() -> Dataset {
        let rows: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let a = i as f64 / 12.0;
                vec![a, 1.0 - a, 0.5 * a, 0.2 + 0.5 * a]
            })
            .collect();
        Dataset::from_rows(&rows, 3).unwrap()
    }

    #[test]
    fn test_topology_rejects_zero_dims_and_counts_params() {
        assert!(Topology::new(0, 5, 1).is_err());
        assert!(Topology::new(4, 0, 1).is_err());
        assert_eq!(Topology::new(4, 5, 1).unwrap().w_size(), 4 * 5 + 5 + 5 + 1);
    }

    #[test]
    fn test_decode_encode_round_trip_is_exact() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 0);
        let w: Vec<f64> = (0..n.topology().w_size())
            .map(|i| (i as f64 * 0.37).sin() * 3.0)
            .collect();
        n.decode(&w);
        assert_eq!(n.encode(), w);
    }

    #[test]
    fn test_encode_layout_is_w1_w2_b1_b2() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 0);
        let w: Vec<f64> = (0..n.topology().w_size()).map(|i| i as f64).collect();
        n.decode(&w);
        assert_eq!(n.w1[6], 6.0);
        assert_eq!(n.w2[3], 15.0);
        assert_eq!(n.b1[0], 16.0);
        assert_eq!(n.b2[0], 20.0);
    }

    #[test]
    #[should_panic(expected = "parameter vector has length")]
    fn test_decode_rejects_wrong_length() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 0);
        n.decode(&[0.0; 3]);
    }

    #[test]
    fn test_forward_matches_hand_computation() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 0);
        let mut w = vec![0.0; n.topology().w_size()];
        // W1 column 0 = [1, 0, 0], B1[0] = 0.5, W2[0] = 2, B2 = -1.
        w[0] = 1.0;
        w[12] = 2.0;
        w[16] = 0.5;
        w[20] = -1.0;
        n.decode(&w);

        let x = [0.8, 0.3, -0.2];
        let h0 = sigmoid(0.8 - 0.5);
        let h_rest = sigmoid(0.0);
        let expected = sigmoid(2.0 * h0 + 0.0 * h_rest + 1.0);
        let y = n.forward_eval(&x)[0];
        assert_abs_diff_eq!(y, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rate_training_pass_is_seed_independent() {
        for kind in [DropoutKind::Dropout, DropoutKind::DropConnect, DropoutKind::Gaussian] {
            let mut n = net(kind, 0.0, 0.0, 5);
            let w = n.encode();
            let x = [0.1, 0.7, -0.4];

            let mut rng_a = ChaCha8Rng::seed_from_u64(1);
            let mut rng_b = ChaCha8Rng::seed_from_u64(999);
            let a = n.forward_train(&x, &mut rng_a).to_vec();
            let b = n.forward_train(&x, &mut rng_b).to_vec();
            let e = n.forward_eval(&x).to_vec();
            assert_eq!(a, b);
            assert_eq!(a, e);
            assert_eq!(n.encode(), w);
        }
    }

    #[test]
    fn test_eval_pass_ignores_configured_rates() {
        let mut n = net(DropoutKind::Dropout, 0.5, 0.5, 2);
        let x = [0.3, 0.2, 0.1];
        let first = n.forward_eval(&x).to_vec();
        let second = n.forward_eval(&x).to_vec();
        assert_eq!(first, second);
        assert!(n.masks().0.is_identity() && n.masks().1.is_identity());
    }

    #[test]
    fn test_training_pass_keeps_masks_for_backward() {
        let mut n = net(DropoutKind::DropConnect, 0.5, 0.5, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        n.forward_train(&[0.3, 0.2, 0.1], &mut rng);
        let (m1, m2) = n.masks();
        assert_eq!(m1.values().len(), 12);
        assert_eq!(m2.values().len(), 4);
        assert!(!m1.is_identity() || !m2.is_identity());
    }

    #[test]
    fn test_dropped_weights_receive_no_update() {
        let mut n = net(DropoutKind::DropConnect, 0.5, 0.5, 4);
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let x = [0.9, -0.5, 0.4];
        let before = n.w1.clone();
        n.forward_train(&x, &mut rng);
        let mask = n.masks().0.values().to_vec();
        n.backward(&x, &[0.8]);
        for (idx, m) in mask.iter().enumerate() {
            if *m == 0.0 {
                assert_eq!(n.w1[idx], before[idx], "masked weight {idx} moved");
            }
        }
    }

    #[test]
    fn test_langevin_gradient_reduces_training_error() {
        let data = toy_data();
        let mut n = net(DropoutKind::None, 0.0, 0.0, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let w0 = n.encode();

        let sse = |n: &mut Network, w: &[f64]| -> f64 {
            let preds = n.evaluate_proposal(&data, w);
            preds
                .iter()
                .zip(data.target_column())
                .map(|(p, t)| (p - t) * (p - t))
                .sum()
        };

        let before = sse(&mut n, &w0);
        let w1 = n.langevin_gradient(&data, &w0, 50, &mut rng);
        let after = sse(&mut n, &w1);
        assert!(after < before, "SGD did not help: {before} -> {after}");
    }

    #[test]
    fn test_evaluate_proposal_leaves_weights_untouched() {
        let data = toy_data();
        let mut n = net(DropoutKind::Gaussian, 0.2, 0.2, 9);
        let w = n.encode();
        let preds = n.evaluate_proposal(&data, &w);
        assert_eq!(preds.len(), data.len());
        assert_eq!(n.encode(), w);
        assert!(preds.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_sample_error_averages_over_outputs() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 0);
        let w = vec![0.0; n.topology().w_size()];
        n.decode(&w);
        n.forward_eval(&[1.0, 2.0, 3.0]);
        // All-zero weights give sigmoid(0) = 0.5.
        assert_abs_diff_eq!(n.sample_error(&[1.0]), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_forward_dispatches_on_training_flag() {
        let mut n = net(DropoutKind::Dropout, 0.5, 0.5, 12);
        let x = [0.4, -0.1, 0.7];
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let pos = rng.get_word_pos();

        let eval = n.forward_eval(&x).to_vec();
        let via_flag = n.forward(&x, false, &mut rng).to_vec();
        assert_eq!(via_flag, eval);
        assert_eq!(rng.get_word_pos(), pos, "evaluation pass consumed randomness");
        assert!(n.masks().0.is_identity() && n.masks().1.is_identity());

        n.forward(&x, true, &mut rng);
        assert!(rng.get_word_pos() > pos);
        // Inverted dropout at p = 0.5 gives factors 0 or 2, never 1.
        assert!(!n.masks().0.is_identity());
        assert!(!n.masks().1.is_identity());
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut n = net(DropoutKind::None, 0.0, 0.0, 13);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x = [0.6, -0.3, 0.9];
        let t = [0.2];
        let lr = 0.1;
        let w0 = n.encode();

        n.forward(&x, true, &mut rng);
        n.backward(&x, &t);
        let w1 = n.encode();

        let loss = |n: &mut Network, w: &[f64]| -> f64 {
            n.decode(w);
            let y = n.forward_eval(&x)[0];
            0.5 * (t[0] - y) * (t[0] - y)
        };
        let eps = 1e-6;
        for k in 0..w0.len() {
            let mut wp = w0.clone();
            let mut wm = w0.clone();
            wp[k] += eps;
            wm[k] -= eps;
            let numeric = (loss(&mut n, &wp) - loss(&mut n, &wm)) / (2.0 * eps);
            let analytic = -(w1[k] - w0[k]) / lr;
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dropout_backward_inverts_the_forward_mask() {
        let p = 0.5;
        let lr = 0.1;
        let x = [0.9, -0.5, 0.4];
        let h = 4;
        let mut n = net(DropoutKind::Dropout, p, 0.0, 14);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        // Redraw until the first-layer mask both drops and keeps units.
        let mut mask = Vec::new();
        for _ in 0..200 {
            n.forward_train(&x, &mut rng);
            mask = n.masks().0.values().to_vec();
            if mask.contains(&0.0) && mask.iter().any(|&m| m > 0.0) {
                break;
            }
        }
        assert!(mask.contains(&0.0) && mask.iter().any(|&m| m > 0.0));

        let (w1_before, b1_before) = (n.w1.clone(), n.b1.clone());
        n.backward(&x, &[0.8]);

        for j in 0..h {
            if mask[j] == 0.0 {
                assert_eq!(n.b1[j], b1_before[j], "dropped unit {j} bias moved");
                for i in 0..x.len() {
                    assert_eq!(n.w1[i * h + j], w1_before[i * h + j]);
                }
            } else {
                assert_abs_diff_eq!(mask[j], 1.0 / (1.0 - p), epsilon = 1e-12);
                let delta = n.hid_delta[j] / (1.0 - p);
                assert_abs_diff_eq!(n.b1[j], b1_before[j] - lr * delta, epsilon = 1e-12);
                for (i, &xi) in x.iter().enumerate() {
                    let idx = i * h + j;
                    assert_abs_diff_eq!(n.w1[idx], w1_before[idx] + lr * xi * delta, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_gaussian_backward_scales_by_the_drawn_mask() {
        let lr = 0.1;
        let x = [0.2, 0.5, -0.6];
        let h = 4;
        let mut n = net(DropoutKind::Gaussian, 0.3, 0.3, 15);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        n.forward_train(&x, &mut rng);
        let m1 = n.masks().0.values().to_vec();
        let m2 = n.masks().1.values().to_vec();
        assert!(m1.iter().all(|&m| m != 1.0));

        let (w1_before, b1_before) = (n.w1.clone(), n.b1.clone());
        let (w2_before, b2_before) = (n.w2.clone(), n.b2.clone());
        let hidden = n.hidden_out.clone();
        n.backward(&x, &[0.1]);

        let out_delta = n.out_delta[0] * m2[0];
        assert_abs_diff_eq!(n.b2[0], b2_before[0] - lr * out_delta, epsilon = 1e-12);
        for j in 0..h {
            assert_abs_diff_eq!(n.w2[j], w2_before[j] + lr * hidden[j] * out_delta, epsilon = 1e-12);

            let delta = n.hid_delta[j] * m1[j];
            assert_abs_diff_eq!(n.b1[j], b1_before[j] - lr * delta, epsilon = 1e-12);
            for (i, &xi) in x.iter().enumerate() {
                let idx = i * h + j;
                assert_abs_diff_eq!(n.w1[idx], w1_before[idx] + lr * xi * delta, epsilon = 1e-12);
            }
        }
    }
}
