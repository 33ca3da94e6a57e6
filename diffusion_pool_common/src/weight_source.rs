use std::{
    fmt::Display,
    fs,
    path::{Component, Path, PathBuf},
};

use crate::{get_token, TokenSource};
use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use tracing::debug;

/// Where the weights of an engine are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// An existing directory on disk.
    Local(PathBuf),
    /// A Hugging Face model ID.
    Remote(String),
}

impl Display for WeightSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "local path: {}", path.display()),
            Self::Remote(model_id) => write!(f, "model id: {model_id}"),
        }
    }
}

impl WeightSource {
    /// Pick the weight location for an engine.
    ///
    /// A `local` override is joined onto `weight_root` unless it is already absolute, then
    /// lexically normalized. It is used only if that directory exists; otherwise the remote
    /// model ID is used.
    pub fn resolve<P: AsRef<Path>>(weight_root: P, remote: &str, local: Option<&str>) -> Self {
        if let Some(local) = local.filter(|local| !local.is_empty()) {
            let local = Path::new(local);
            let candidate = if local.is_absolute() {
                local.to_path_buf()
            } else {
                weight_root.as_ref().join(local)
            };
            let candidate = normalize_path(&candidate);
            if candidate.is_dir() {
                return Self::Local(candidate);
            }
            debug!(
                "local weights at `{}` not found, falling back to `{remote}`",
                candidate.display()
            );
        }
        Self::Remote(remote.to_string())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the preceding
/// component. The filesystem is not consulted, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Reads files out of a [`WeightSource`].
pub enum FileLoader {
    Local(PathBuf),
    Api(Box<ApiRepo>),
}

impl FileLoader {
    pub fn from_weight_source(
        source: &WeightSource,
        silent: bool,
        token: &TokenSource,
        revision: Option<String>,
    ) -> anyhow::Result<Self> {
        match source {
            WeightSource::Local(path) => Ok(Self::Local(path.clone())),
            WeightSource::Remote(model_id) => {
                let api_builder = ApiBuilder::new()
                    .with_progress(!silent)
                    .with_token(get_token(token)?)
                    .build()?;
                let revision = revision.unwrap_or("main".to_string());
                let api = api_builder.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision,
                ));

                Ok(Self::Api(Box::new(api)))
            }
        }
    }

    /// Resolve a file to a path on disk, downloading it first for remote sources.
    pub fn read_file(&self, name: &str) -> anyhow::Result<PathBuf> {
        match self {
            Self::Api(api) => api
                .get(name)
                .map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(root) => {
                let path = root.join(name);
                if !path.is_file() {
                    anyhow::bail!("`{name}` not found under `{}`", root.display());
                }
                Ok(path)
            }
        }
    }

    pub fn read_to_string(&self, name: &str) -> anyhow::Result<String> {
        Ok(fs::read_to_string(self.read_file(name)?)?)
    }
}
