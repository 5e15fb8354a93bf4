pub mod data;
pub mod error;
pub mod likelihood;
pub mod mcmc;
pub mod network;
pub mod prior;
pub mod progress;
pub mod regularization;
pub mod sampler;
pub mod summary;
pub mod trace;

pub use data::Dataset;
pub use error::{Error, Result};
pub use likelihood::LikelihoodEval;
pub use mcmc::{run_chain, ChainConfig, ChainResult, Phase, Sampler, StepOutcome};
pub use network::{Network, Topology};
pub use prior::PriorConfig;
pub use regularization::{DropoutKind, LayerMask, MaskSite};
pub use sampler::{sample, SampleResult, SamplerConfig};
pub use summary::{PosteriorSummary, PredictionBand};
pub use trace::{PosteriorTrace, TraceEntry};


// Future: evaluate proposals over the whole dataset as one batched matrix
// product instead of row-by-row forward passes.
