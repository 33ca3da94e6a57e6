use std::{env, fmt, fs};
use thiserror::Error;

use anyhow::Result;
use tracing::warn;

/// Environment variable consulted for a Hugging Face token when a manager is created.
pub const HF_TOKEN_ENV_VAR: &str = "HF_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
/// The source of the HF token.
pub enum TokenSource {
    Literal(String),
    /// The login cached by `huggingface-cli` under `~/.cache/huggingface/token`.
    CacheToken,
    None,
}

impl TokenSource {
    /// The token an engine manager threads through to authenticated engines: the
    /// contents of [`HF_TOKEN_ENV_VAR`] if set, otherwise the ambient cached login.
    pub fn from_env_or_cache() -> Self {
        match env::var(HF_TOKEN_ENV_VAR) {
            Ok(token) => Self::Literal(token),
            Err(_) => Self::CacheToken,
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never print the secret itself.
            TokenSource::Literal(_) => write!(f, "literal:<redacted>"),
            TokenSource::CacheToken => write!(f, "cache"),
            TokenSource::None => write!(f, "none"),
        }
    }
}

#[derive(Error, Debug)]
enum TokenRetrievalError {
    #[error("No home directory.")]
    HomeDirectoryMissing,
}

/// This reads a token from a specified source. If the cached token cannot be read, a warning
/// is logged with `tracing` and *no token is used*.
pub fn get_token(source: &TokenSource) -> Result<Option<String>> {
    let token = match source {
        TokenSource::Literal(data) => Some(data.clone()),
        TokenSource::CacheToken => {
            let home = dirs::home_dir()
                .ok_or(TokenRetrievalError::HomeDirectoryMissing)?
                .join(".cache/huggingface/token");
            let token = fs::read_to_string(&home).ok();
            if token.is_none() {
                warn!("Could not load token at {}, using no HF token.", home.display());
            }
            token
        }
        TokenSource::None => None,
    };

    Ok(token.map(|s| s.trim().to_string()))
}
