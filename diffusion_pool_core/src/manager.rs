use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
};

use diffusion_pool_common::{TokenSource, WeightSource};
use tracing::{debug, info, warn};

use crate::{
    config::{EngineConfig, ManagerConfig, NsfwBehaviour},
    mode::EngineMode,
    pipelines::{LoadOptions, LoaderRegistry, PipelineClass, PipelineWrapper},
    EngineError, Result,
};

/// Tracks which pipeline, if any, currently occupies the accelerator.
///
/// All residency changes go through [`ActivePipeline::swap`], which keeps at most one
/// wrapper resident.
#[derive(Debug, Default)]
struct ActivePipeline(Option<String>);

impl ActivePipeline {
    fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    fn swap(&mut self, pipelines: &mut HashMap<String, PipelineWrapper>, id: &str) -> Result<()> {
        if self.get() == Some(id) {
            return Ok(());
        }
        if !pipelines.contains_key(id) {
            return Err(EngineError::UnknownPipeline(id.to_string()));
        }

        if let Some(current) = self.0.take() {
            if let Some(wrapper) = pipelines.get_mut(&current) {
                if let Err(e) = wrapper.deactivate() {
                    self.0 = Some(current);
                    return Err(e);
                }
            }
        }

        pipelines
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownPipeline(id.to_string()))?
            .activate()?;
        self.0 = Some(id.to_string());
        Ok(())
    }

    /// Take a wrapper that is about to be dropped off the accelerator. If it was the active
    /// one, nothing is active afterwards.
    fn release(&mut self, id: &str, wrapper: &mut PipelineWrapper) -> Result<()> {
        if self.get() == Some(id) {
            wrapper.deactivate()?;
            self.0 = None;
        }
        Ok(())
    }
}

/// Builds the declared engines and hands out pipelines, keeping only one resident on the
/// accelerator at a time.
pub struct EngineManager {
    engines: Vec<EngineConfig>,
    weight_root: PathBuf,
    mode: Arc<EngineMode>,
    nsfw_behaviour: NsfwBehaviour,
    token: TokenSource,
    loaders: LoaderRegistry,
    pipelines: HashMap<String, PipelineWrapper>,
    default: Option<String>,
    active: ActivePipeline,
    silent: bool,
}

impl EngineManager {
    /// The token for authenticated engines is read from `HF_API_TOKEN`, falling back to the
    /// cached Hugging Face login.
    pub fn new<P: Into<PathBuf>>(
        engines: Vec<EngineConfig>,
        weight_root: P,
        mode: EngineMode,
        nsfw_behaviour: NsfwBehaviour,
        loaders: LoaderRegistry,
    ) -> Self {
        Self {
            engines,
            weight_root: weight_root.into(),
            mode: Arc::new(mode),
            nsfw_behaviour,
            token: TokenSource::from_env_or_cache(),
            loaders,
            pipelines: HashMap::new(),
            default: None,
            active: ActivePipeline::default(),
            silent: false,
        }
    }

    pub fn from_config(config: ManagerConfig, loaders: LoaderRegistry) -> Self {
        let mode = config.mode();
        Self::new(
            config.engines,
            config.weight_root,
            mode,
            config.nsfw_behaviour,
            loaders,
        )
    }

    /// Override the token passed to engines with `use_auth_token`.
    pub fn with_token(mut self, token: TokenSource) -> Self {
        self.token = token;
        self
    }

    /// Hide progress bars of every pipeline built from now on.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn mode(&self) -> &EngineMode {
        &self.mode
    }

    pub fn engines(&self) -> &[EngineConfig] {
        &self.engines
    }

    /// The weight location an engine would be loaded from.
    pub fn weight_source(&self, engine: &EngineConfig) -> WeightSource {
        WeightSource::resolve(
            &self.weight_root,
            &engine.model,
            engine.local_model.as_deref(),
        )
    }

    /// Build the wrapper for one engine. Nothing is registered.
    pub fn build_pipeline(&self, engine: &EngineConfig) -> Result<PipelineWrapper> {
        let class: PipelineClass = engine.class.parse()?;
        let loader = self.loaders.get(class)?;
        let source = self.weight_source(engine);
        let token = if engine.use_auth_token {
            self.token.clone()
        } else {
            TokenSource::None
        };
        let options = LoadOptions {
            flag_only_safety_checker: self.nsfw_behaviour == NsfwBehaviour::Flag,
        };

        info!(
            "building engine `{}` ({class}, loader `{}`) from {source}",
            engine.id,
            loader.name()
        );
        debug!("engine `{}` token source: {token}", engine.id);
        let pipeline =
            loader
                .load(&source, &token, &options)
                .map_err(|source| EngineError::Load {
                    id: engine.id.clone(),
                    source,
                })?;

        Ok(PipelineWrapper::new(&engine.id, self.mode.clone(), pipeline)?.silent(self.silent))
    }

    /// Build and register every enabled engine. Stops at the first engine that fails.
    ///
    /// Calling this again rebuilds every engine. A replaced pipeline that was active is
    /// moved off the accelerator first, and no pipeline is active afterwards.
    pub fn load_pipelines(&mut self) -> Result<()> {
        for engine in self.engines.clone() {
            if !engine.is_enabled() {
                continue;
            }

            let pipe = self.build_pipeline(&engine)?;
            if let Some(mut replaced) = self.pipelines.insert(engine.id.clone(), pipe) {
                warn!("replacing the pipeline of engine `{}`", engine.id);
                self.active.release(&engine.id, &mut replaced)?;
            }
            if engine.default {
                self.default = Some(engine.id.clone());
            }
        }
        info!("{} of {} engines loaded", self.pipelines.len(), self.engines.len());
        Ok(())
    }

    /// Readiness of every engine that was not explicitly disabled.
    pub fn status(&self) -> BTreeMap<String, bool> {
        self.engines
            .iter()
            .filter(|engine| !engine.is_disabled())
            .map(|engine| (engine.id.clone(), self.pipelines.contains_key(&engine.id)))
            .collect()
    }

    /// Get a pipeline, making it the active one.
    ///
    /// If another pipeline is active it is deactivated first. Asking for the active
    /// pipeline again does nothing.
    pub fn get_pipe(&mut self, id: &str) -> Result<&mut PipelineWrapper> {
        self.active.swap(&mut self.pipelines, id)?;
        self.pipelines
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownPipeline(id.to_string()))
    }

    /// Activate and return the engine marked as default.
    pub fn get_default_pipe(&mut self) -> Result<&mut PipelineWrapper> {
        let id = self
            .default
            .clone()
            .ok_or_else(|| EngineError::UnknownPipeline("<default>".to_string()))?;
        self.get_pipe(&id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.get()
    }

    pub fn default_id(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Look at a registered pipeline without changing residency.
    pub fn pipeline(&self, id: &str) -> Option<&PipelineWrapper> {
        self.pipelines.get(id)
    }
}
