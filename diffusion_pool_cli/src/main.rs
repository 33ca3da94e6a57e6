use std::path::PathBuf;

use clap::{Parser, Subcommand};
use diffusion_pool_core::{
    prepare_scheduler, EngineManager, FileLoader, LoaderRegistry, ManagerConfig, NsfwBehaviour,
    PipelineClass, SamplerKind, SchedulerConfig, SchedulerSet, SchedulerType, TokenSource,
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

const SCHEDULER_CONFIG: &str = "scheduler/scheduler_config.json";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the device and memory optimisations the configuration selects on this machine.
    Mode,

    /// List the declared engines and where their weights would be loaded from.
    Engines,

    /// Print the timesteps a sampler would visit.
    Timesteps {
        /// Sampler value as sent on the wire (0 = DDIM, 1 = DDPM, 2 = Euler, 3 = Euler ancestral, 7 = LMS).
        #[arg(short, long)]
        sampler: Option<i32>,

        /// Number of denoising steps.
        #[arg(short, long, default_value_t = 50)]
        num_steps: usize,

        /// A `scheduler_config.json` to use as the pipeline default. If neither this nor
        /// `--engine` is specified, a DDIM scheduler with Stable Diffusion hyperparameters is used.
        #[arg(long, conflicts_with = "engine")]
        scheduler_config: Option<PathBuf>,

        /// Read the default scheduler from the weights of this engine (local or Hugging Face).
        #[arg(short, long)]
        engine: Option<String>,
    },
}

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Manager configuration (JSON). If not specified, the defaults are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the VRAM optimisation level of the configuration.
    #[arg(long)]
    vram_optimisation_level: Option<u8>,

    /// Override the NSFW behaviour of the configuration.
    #[arg(long, value_enum)]
    nsfw_behaviour: Option<NsfwBehaviour>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => {
            info!("reading configuration from `{}`", path.display());
            ManagerConfig::from_json_file(path)?
        }
        None => ManagerConfig::default(),
    };
    if let Some(level) = args.vram_optimisation_level {
        config.vram_optimisation_level = level;
    }
    if let Some(nsfw_behaviour) = args.nsfw_behaviour {
        config.nsfw_behaviour = nsfw_behaviour;
    }

    match args.command {
        Command::Mode => {
            let mode = config.mode();
            println!("device:          {}", mode.device_kind());
            println!("vram level:      {}", mode.vram_optimisation_level());
            println!("attention slice: {}", mode.attention_slice());
            println!("fp16:            {}", mode.fp16());
            println!("cuda-only unet:  {}", mode.cuda_only_unet());
            println!("nsfw behaviour:  {}", config.nsfw_behaviour);
        }
        Command::Engines => {
            let manager = EngineManager::from_config(config, LoaderRegistry::new());
            for engine in manager.engines() {
                let class = match engine.class.parse::<PipelineClass>() {
                    Ok(class) => class.to_string(),
                    Err(e) => {
                        warn!("{e}");
                        format!("{} (unknown)", engine.class)
                    }
                };
                let state = if engine.is_enabled() {
                    "enabled"
                } else if engine.is_disabled() {
                    "disabled"
                } else {
                    "not enabled"
                };
                println!(
                    "{}{}: {class}, {state}, {}",
                    engine.id,
                    if engine.default { " (default)" } else { "" },
                    manager.weight_source(engine)
                );
            }
        }
        Command::Timesteps {
            sampler,
            num_steps,
            scheduler_config,
            engine,
        } => {
            let default = match (scheduler_config, engine) {
                (Some(path), _) => SchedulerConfig::from_json(&std::fs::read_to_string(path)?)?,
                (None, Some(id)) => {
                    let manager = EngineManager::from_config(config, LoaderRegistry::new());
                    let engine = manager
                        .engines()
                        .iter()
                        .find(|engine| engine.id == id)
                        .ok_or_else(|| anyhow::anyhow!("no engine with id `{id}`"))?;
                    let token = if engine.use_auth_token {
                        TokenSource::from_env_or_cache()
                    } else {
                        TokenSource::None
                    };
                    let source = manager.weight_source(engine);
                    info!("reading the scheduler of `{id}` from {source}");
                    let loader = FileLoader::from_weight_source(&source, false, &token, None)?;
                    SchedulerConfig::from_json(&loader.read_to_string(SCHEDULER_CONFIG)?)?
                }
                (None, None) => SchedulerConfig::new(SchedulerType::Ddim),
            };
            let schedulers = SchedulerSet::new(prepare_scheduler(default)?)?;
            let sampler = SamplerKind::resolve(sampler)?;
            let run = schedulers.get(sampler).begin(num_steps, 0.)?;
            println!(
                "{sampler:?} (init noise sigma {:.4}): {}",
                run.init_noise_sigma(),
                serde_json::to_string(run.timesteps())?
            );
        }
    }

    Ok(())
}
