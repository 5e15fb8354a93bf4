use crate::data::Dataset;
use crate::mcmc::{self, ChainConfig, ChainResult};
use crate::progress::{self, ProgressState};
use crate::summary::PosteriorSummary;
use crate::{Error, Result};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for running several independent chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub num_chains: usize,
    pub seed: u64,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
    pub show_progress: bool,
    pub chain: ChainConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_chains: 1,
            seed: 42,
            num_threads: 0,
            show_progress: false,
            chain: ChainConfig::default(),
        }
    }
}

/// Result of sampling across all chains.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub chains: Vec<ChainResult>,
}

impl SampleResult {
    pub fn accept_ratios(&self) -> Vec<f64> {
        self.chains.iter().map(|c| c.accept_ratio).collect()
    }

    pub fn langevin_counts(&self) -> Vec<usize> {
        self.chains.iter().map(|c| c.langevin_count).collect()
    }

    /// Per-chain posterior summaries after discarding `burn_in` (a fraction
    /// of each trace).
    pub fn summaries(&self, burn_in: f64) -> Vec<PosteriorSummary> {
        self.chains
            .iter()
            .map(|c| PosteriorSummary::from_trace(&c.trace, burn_in))
            .collect()
    }
}

/// Run independent chains in parallel on shared, read-only datasets.
///
/// Each chain gets a deterministic RNG seeded from `config.seed + chain_index`,
/// guaranteeing reproducible results regardless of thread scheduling. Chains
/// never exchange state.
pub fn sample(train: &Dataset, test: &Dataset, config: SamplerConfig) -> Result<SampleResult> {
    if config.num_chains == 0 {
        return Err(Error::InvalidConfig("num_chains must be >= 1".to_owned()));
    }
    config.chain.validate()?;

    if config.num_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build_global()
            .ok();
    }

    info!(
        "sampling {} chain(s) of {} samples, {} train / {} test rows",
        config.num_chains,
        config.chain.num_samples,
        train.len(),
        test.len()
    );

    let progress = config.show_progress.then(|| {
        let state = Arc::new(ProgressState::new(
            config.num_chains,
            config.chain.num_samples,
        ));
        let handle = progress::spawn_progress_thread(Arc::clone(&state));
        (state, handle)
    });
    let progress_ref = progress.as_ref().map(|(state, _)| state.as_ref());

    let chain_indices: Vec<usize> = (0..config.num_chains).collect();

    let results: Result<Vec<ChainResult>> = chain_indices
        .par_iter()
        .map(|&chain_idx| {
            let rng = ChaCha8Rng::seed_from_u64(config.seed + chain_idx as u64);
            mcmc::run_chain(config.chain.clone(), train, test, rng, progress_ref)
        })
        .collect();

    if let Some((state, handle)) = progress {
        state.finish();
        let _ = handle.join();
    }

    Ok(SampleResult { chains: results? })
}
