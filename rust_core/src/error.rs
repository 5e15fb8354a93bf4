use thiserror::Error;

/// Errors raised while constructing a network, dataset, or sampler.
///
/// Contract violations on the hot path (a parameter vector of the wrong length
/// handed to `Network::decode`, a non-positive noise variance handed to the
/// likelihood) panic instead; everything a caller can get wrong through
/// configuration surfaces here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
