use thiserror::Error;

use crate::pipelines::PipelineClass;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The request named a sampler outside the supported set.
    #[error("Scheduler not implemented for sampler value {0}.")]
    UnsupportedSampler(i32),
    #[error("Unknown engine class `{0}`.")]
    UnknownEngineClass(String),
    #[error("No loader registered for engine class `{0}`.")]
    MissingLoader(PipelineClass),
    #[error("No pipeline registered with id `{0}`.")]
    UnknownPipeline(String),
    #[error("Failed to build engine `{id}`: {source}")]
    Load {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    /// Errors raised by the model itself are passed through untouched.
    #[error(transparent)]
    Model(#[from] candle_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
