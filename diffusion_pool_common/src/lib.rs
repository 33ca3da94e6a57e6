mod progress;
mod tokens;
mod weight_source;

pub use progress::{
    ProgressCallback, ProgressIter, ProgressReporter, ProgressSnapshot, StopSignal,
    DEFAULT_MIN_INTERVAL,
};
pub use tokens::{get_token, TokenSource, HF_TOKEN_ENV_VAR};
pub use weight_source::{normalize_path, FileLoader, WeightSource};
