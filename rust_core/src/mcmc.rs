use log::{debug, info, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::likelihood;
use crate::network::{Network, Topology};
use crate::prior::PriorConfig;
use crate::progress::ProgressState;
use crate::regularization::DropoutKind;
use crate::trace::{PosteriorTrace, TraceEntry};
use crate::{Error, Result};

/// Configuration of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub topology: Topology,
    /// Trace length, including the initial state.
    pub num_samples: usize,
    pub learn_rate: f64,
    pub dropout: DropoutKind,
    pub input_dropout: f64,
    pub hidden_dropout: f64,
    /// Standard deviation of the weight proposal.
    pub step_w: f64,
    /// Standard deviation of the log noise variance proposal.
    pub step_eta: f64,
    pub use_langevin_gradients: bool,
    /// Probability of taking the gradient-informed branch.
    pub l_prob: f64,
    /// SGD epochs per Langevin step.
    pub sgd_depth: usize,
    pub prior: PriorConfig,
    /// Starting weights; drawn from N(0, 1) when absent.
    pub init_weights: Option<Vec<f64>>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            num_samples: 5000,
            learn_rate: 0.01,
            dropout: DropoutKind::None,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
            step_w: 0.025,
            step_eta: 0.2,
            use_langevin_gradients: true,
            l_prob: 0.5,
            sgd_depth: 1,
            prior: PriorConfig::default(),
            init_weights: None,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<()> {
        self.topology.validate()?;
        if self.num_samples == 0 {
            return Err(Error::InvalidConfig(
                "num_samples must be >= 1".to_owned(),
            ));
        }
        if !self.learn_rate.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "learn_rate must be finite, got {}",
                self.learn_rate
            )));
        }
        self.dropout.validate_rate(self.input_dropout)?;
        self.dropout.validate_rate(self.hidden_dropout)?;
        for (name, step) in [("step_w", self.step_w), ("step_eta", self.step_eta)] {
            if !(step.is_finite() && step > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and > 0, got {step}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.l_prob) {
            return Err(Error::InvalidConfig(format!(
                "l_prob must lie in [0, 1], got {}",
                self.l_prob
            )));
        }
        if self.use_langevin_gradients && self.sgd_depth == 0 {
            return Err(Error::InvalidConfig(
                "sgd_depth must be >= 1 when Langevin proposals are enabled".to_owned(),
            ));
        }
        self.prior.validate()?;
        if let Some(w) = &self.init_weights {
            if w.len() != self.topology.w_size() {
                return Err(Error::InvalidShape(format!(
                    "init_weights has length {}, topology needs {}",
                    w.len(),
                    self.topology.w_size()
                )));
            }
            if w.iter().any(|v| !v.is_finite()) {
                return Err(Error::InvalidConfig(
                    "init_weights must be finite".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

/// Lifecycle of a [`Sampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Running,
    Done,
}

/// What happened in one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub accepted: bool,
    pub langevin: bool,
    pub log_ratio: f64,
}

/// Output of a finished chain.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub trace: PosteriorTrace,
    pub accepted: usize,
    /// Accepted proposals as a percentage of iterations.
    pub accept_ratio: f64,
    /// Iterations that took the gradient-informed branch.
    pub langevin_count: usize,
}

#[derive(Debug, Clone)]
struct ChainState {
    w: Vec<f64>,
    eta: f64,
    log_likelihood: f64,
    log_prior: f64,
}

/// One Metropolis-Hastings chain over network weights and `eta = ln(tau_sq)`.
///
/// Weight proposals are a Gaussian random walk or, with probability `l_prob`,
/// a Gaussian centred on an SGD step from the current weights; the latter
/// adds its reverse/forward density ratio to the acceptance test. Owns its
/// RNG, its current state, its trace and the network used as scratch space.
pub struct Sampler<'a> {
    config: ChainConfig,
    train: &'a Dataset,
    test: &'a Dataset,
    y_train: Vec<f64>,
    y_test: Vec<f64>,
    network: Network,
    rng: ChaCha8Rng,
    state: ChainState,
    trace: PosteriorTrace,
    iteration: usize,
    accepted: usize,
    langevin_count: usize,
}

impl<'a> Sampler<'a> {
    /// Validate everything, draw the initial state and record it as trace
    /// entry 0.
    pub fn new(
        config: ChainConfig,
        train: &'a Dataset,
        test: &'a Dataset,
        mut rng: ChaCha8Rng,
    ) -> Result<Self> {
        config.validate()?;
        check_dataset("train", train, &config.topology)?;
        check_dataset("test", test, &config.topology)?;

        let mut network = Network::new(
            config.topology,
            config.learn_rate,
            config.dropout,
            config.input_dropout,
            config.hidden_dropout,
            &mut rng,
        )?;

        let w = match &config.init_weights {
            Some(w) => w.clone(),
            None => gaussian_step(&vec![0.0; config.topology.w_size()], 1.0, &mut rng),
        };

        let y_train = train.target_column();
        let y_test = test.target_column();

        let pred_train = network.evaluate_proposal(train, &w);
        let pred_test = network.evaluate_proposal(test, &w);
        let eta = initial_eta(&pred_train, &y_train);
        let tau_sq = eta.exp();

        let train_eval = likelihood::evaluate(&pred_train, &y_train, tau_sq);
        let test_eval = likelihood::evaluate(&pred_test, &y_test, tau_sq);
        let log_prior = config.prior.log_prior(&config.topology, &w, tau_sq);

        info!(
            "initial state: log-likelihood {:.4}, log-prior {:.4}, train rmse {:.5}, tau_sq {:.5}",
            train_eval.log_likelihood, log_prior, train_eval.rmse, tau_sq
        );

        let mut trace = PosteriorTrace::with_capacity(config.num_samples);
        trace.push(TraceEntry {
            w: w.clone(),
            tau_sq,
            pred_train,
            pred_test,
            rmse_train: train_eval.rmse,
            rmse_test: test_eval.rmse,
        });

        Ok(Self {
            state: ChainState {
                w,
                eta,
                log_likelihood: train_eval.log_likelihood,
                log_prior,
            },
            config,
            train,
            test,
            y_train,
            y_test,
            network,
            rng,
            trace,
            iteration: 0,
            accepted: 0,
            langevin_count: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        if self.is_done() {
            Phase::Done
        } else if self.iteration == 0 {
            Phase::Initialized
        } else {
            Phase::Running
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.iteration + 1 >= self.config.num_samples
    }

    #[inline]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn trace(&self) -> &PosteriorTrace {
        &self.trace
    }

    pub fn current_weights(&self) -> &[f64] {
        &self.state.w
    }

    pub fn current_tau_sq(&self) -> f64 {
        self.state.eta.exp()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.state.log_likelihood
    }

    pub fn log_prior(&self) -> f64 {
        self.state.log_prior
    }

    /// Run one propose/evaluate/accept cycle and append to the trace.
    /// Returns `None` once the configured number of samples is reached.
    pub fn step(&mut self) -> Option<StepOutcome> {
        if self.is_done() {
            return None;
        }
        let i = self.iteration;

        let lx: f64 = self.rng.gen();
        let langevin = self.config.use_langevin_gradients && lx < self.config.l_prob;
        let (w_proposal, diff_prop) = if langevin {
            self.langevin_count += 1;
            self.langevin_proposal()
        } else {
            let w = gaussian_step(&self.state.w, self.config.step_w, &mut self.rng);
            (w, 0.0)
        };

        let z: f64 = StandardNormal.sample(&mut self.rng);
        let eta_proposal = self.state.eta + self.config.step_eta * z;
        let tau_sq_proposal = eta_proposal.exp();

        let pred_train = self.network.evaluate_proposal(self.train, &w_proposal);
        let pred_test = self.network.evaluate_proposal(self.test, &w_proposal);
        let train_eval = likelihood::evaluate(&pred_train, &self.y_train, tau_sq_proposal);
        // Reported only; never part of the decision.
        let test_eval = likelihood::evaluate(&pred_test, &self.y_test, tau_sq_proposal);
        let log_prior_proposal = self.config.prior.log_prior(
            &self.config.topology,
            &w_proposal,
            tau_sq_proposal,
        );

        let log_ratio = (train_eval.log_likelihood - self.state.log_likelihood)
            + (log_prior_proposal - self.state.log_prior)
            + diff_prop;
        let accept_prob = acceptance_probability(log_ratio);

        let u: f64 = self.rng.gen();
        let accepted = u < accept_prob;

        if accepted {
            self.accepted += 1;
            if i % 10 == 0 {
                debug!(
                    "iteration {i}: accepted, log-likelihood {:.4}, log-prior {:.4}, diff_prop {:.4}, rmse train {:.5} test {:.5}",
                    train_eval.log_likelihood,
                    log_prior_proposal,
                    diff_prop,
                    train_eval.rmse,
                    test_eval.rmse
                );
            }
            self.trace.push(TraceEntry {
                w: w_proposal.clone(),
                tau_sq: tau_sq_proposal,
                pred_train,
                pred_test,
                rmse_train: train_eval.rmse,
                rmse_test: test_eval.rmse,
            });
            self.state = ChainState {
                w: w_proposal,
                eta: eta_proposal,
                log_likelihood: train_eval.log_likelihood,
                log_prior: log_prior_proposal,
            };
        } else {
            self.trace.repeat_last();
        }

        self.iteration += 1;
        Some(StepOutcome {
            accepted,
            langevin,
            log_ratio,
        })
    }

    /// Propose around one SGD step from the current weights and return the
    /// proposal with its log proposal-density correction.
    fn langevin_proposal(&mut self) -> (Vec<f64>, f64) {
        let step_w = self.config.step_w;
        let depth = self.config.sgd_depth;

        let w_gd = self
            .network
            .langevin_gradient(self.train, &self.state.w, depth, &mut self.rng);
        let w_proposal = gaussian_step(&w_gd, step_w, &mut self.rng);
        // Reverse move: the gradient step taken from the proposal. It shares the
        // chain RNG and training-mode masks, so under dropout diff_prop is
        // itself a random quantity.
        let w_prop_gd = self
            .network
            .langevin_gradient(self.train, &w_proposal, depth, &mut self.rng);

        let diff_prop =
            langevin_log_correction(&self.state.w, &w_proposal, &w_gd, &w_prop_gd, step_w);
        (w_proposal, diff_prop)
    }

    /// Drive the chain to completion.
    pub fn run(mut self, progress: Option<&ProgressState>) -> ChainResult {
        while let Some(outcome) = self.step() {
            if let Some(p) = progress {
                p.record(outcome.accepted, outcome.langevin);
            }
        }

        let iterations = self.config.num_samples - 1;
        let accept_ratio = if iterations > 0 {
            self.accepted as f64 / iterations as f64 * 100.0
        } else {
            0.0
        };
        info!(
            "chain finished: {} of {} proposals accepted ({:.2}%), {} Langevin proposals",
            self.accepted, iterations, accept_ratio, self.langevin_count
        );

        ChainResult {
            trace: self.trace,
            accepted: self.accepted,
            accept_ratio,
            langevin_count: self.langevin_count,
        }
    }
}

/// Build a sampler and run it to completion.
pub fn run_chain(
    config: ChainConfig,
    train: &Dataset,
    test: &Dataset,
    rng: ChaCha8Rng,
    progress: Option<&ProgressState>,
) -> Result<ChainResult> {
    Ok(Sampler::new(config, train, test, rng)?.run(progress))
}

/// `min(1, exp(log_ratio))` without overflow. A NaN ratio never accepts.
#[inline]
pub fn acceptance_probability(log_ratio: f64) -> f64 {
    if log_ratio.is_nan() {
        0.0
    } else {
        log_ratio.min(0.0).exp()
    }
}

/// `ln q(w | w_proposal) - ln q(w_proposal | w)` for isotropic Gaussian
/// proposals of standard deviation `step_w` centred on gradient steps.
/// Normalising constants cancel.
pub fn langevin_log_correction(
    w: &[f64],
    w_proposal: &[f64],
    w_gd: &[f64],
    w_prop_gd: &[f64],
    step_w: f64,
) -> f64 {
    let sigma_sq = step_w * step_w;
    let first = -0.5 * sq_dist(w, w_prop_gd) / sigma_sq;
    let second = -0.5 * sq_dist(w_proposal, w_gd) / sigma_sq;
    first - second
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn gaussian_step(center: &[f64], step: f64, rng: &mut ChaCha8Rng) -> Vec<f64> {
    center
        .iter()
        .map(|&c| {
            let z: f64 = StandardNormal.sample(rng);
            c + step * z
        })
        .collect()
}

/// `ln var(pred - y)` of the initial residuals, or 0 when that variance is
/// degenerate.
fn initial_eta(pred: &[f64], y: &[f64]) -> f64 {
    let n = y.len() as f64;
    let residuals: Vec<f64> = pred.iter().zip(y).map(|(p, t)| p - t).collect();
    let mean = residuals.iter().sum::<f64>() / n;
    let var = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    if var.is_finite() && var > 0.0 {
        var.ln()
    } else {
        warn!("initial residual variance {var} is degenerate, starting from tau_sq = 1");
        0.0
    }
}

fn check_dataset(name: &str, data: &Dataset, topology: &Topology) -> Result<()> {
    if data.input_dim() != topology.input() || data.target_dim() != topology.output() {
        return Err(Error::InvalidShape(format!(
            "{name} data has {} covariates + {} targets, topology expects {} + {}",
            data.input_dim(),
            data.target_dim(),
            topology.input(),
            topology.output()
        )));
    }
    Ok(())
}
