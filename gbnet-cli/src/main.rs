//! gbnet CLI: configuration checks and cascade simulation.
//!
//! Commands:
//! - `check`: load a TOML config, validate it, print the resolved settings
//! - `simulate`: build a cascade of pointwise-conv stages, walk it through
//!   stage-wise activation on a synthetic volume and print a JSON report

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{ArrayD, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbnet_core::autocontext::stage_in_channels;
use gbnet_core::learners::PointwiseConv;
use gbnet_core::tensor::weight_histogram;
use gbnet_core::{BaseLearner, Cascade, CascadeConfig, CombinationMode, EnsembleResult};

#[derive(Parser)]
#[command(name = "gbnet", about = "gbnet: cascaded segmentation learner orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a TOML cascade config and print the resolved settings.
    Check {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run stage-wise activation and forward passes on a synthetic volume.
    Simulate {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of cascade stages.
        #[arg(long, default_value_t = 3)]
        stages: usize,

        /// Raw input channels.
        #[arg(long, default_value_t = 1)]
        channels: usize,

        /// Spatial extent, comma separated (e.g. 8,16,16).
        #[arg(long, value_delimiter = ',', default_value = "8,16,16")]
        shape: Vec<usize>,

        /// Batch size.
        #[arg(long, default_value_t = 2)]
        batch: usize,

        /// Seed for learner construction and the synthetic volume.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

// ─── Reports ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CheckReport {
    fingerprint: String,
    combination_mode: CombinationMode,
    config: CascadeConfig,
}

#[derive(Serialize)]
struct PassReport {
    stage: usize,
    training: bool,
    trainable_stages: Vec<usize>,
    layers_reset: Option<usize>,
    per_stage: bool,
    output_shape: Vec<usize>,
    output_mean: f32,
    volatile: bool,
    grad_stages: Vec<usize>,
    weight_histogram: Option<[usize; 9]>,
}

#[derive(Serialize)]
struct SimulationReport {
    fingerprint: String,
    stages: usize,
    input_shape: Vec<usize>,
    passes: Vec<PassReport>,
}

/// Level used when `RUST_LOG` is unset or unparsable.
const DEFAULT_LOG: &str = "warn";

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG))
}

fn main() -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => run_check(&config),
        Commands::Simulate {
            config,
            stages,
            channels,
            shape,
            batch,
            seed,
        } => run_simulate(config.as_deref(), stages, channels, &shape, batch, seed),
    }
}

fn load_config(path: &Path) -> Result<CascadeConfig> {
    CascadeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn run_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let combination_mode = config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    let report = CheckReport {
        fingerprint: config.fingerprint(),
        combination_mode,
        config,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_simulate(
    config_path: Option<&Path>,
    stages: usize,
    channels: usize,
    spatial: &[usize],
    batch: usize,
    seed: u64,
) -> Result<()> {
    if stages == 0 || channels == 0 || batch == 0 {
        bail!("--stages, --channels and --batch must be positive");
    }
    if spatial.is_empty() || spatial.contains(&0) {
        bail!("--shape needs at least one positive extent");
    }

    let config = match config_path {
        Some(path) => load_config(path)?,
        None => CascadeConfig::default(),
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let learners: Vec<Box<dyn BaseLearner>> = (0..stages)
        .map(|i| {
            let in_channels =
                stage_in_channels(i, channels, config.num_classes, config.auto_context);
            Box::new(PointwiseConv::new(
                format!("stage{i}"),
                in_channels,
                config.num_classes,
                spatial.len(),
                true,
                &mut rng,
            )) as Box<dyn BaseLearner>
        })
        .collect();
    let mut cascade = Cascade::new(learners, &config)?;

    let mut input_shape = vec![batch, channels];
    input_shape.extend_from_slice(spatial);
    let input = synthetic_volume(&input_shape, &mut rng)?;
    let labels = threshold_labels(&input, config.num_classes);

    let mut passes = Vec::with_capacity(stages + 1);
    for stage in 0..stages {
        let layers_reset = cascade.activate_for_training(stage, true)?;
        let result = cascade.run_forward(&input, Some(&labels))?;
        passes.push(pass_report(&cascade, stage, layers_reset, &result));
        info!(stage, "training pass done");
    }
    cascade.activate_for_inference(None)?;
    let result = cascade.run_forward(&input, None)?;
    passes.push(pass_report(&cascade, stages - 1, None, &result));

    let report = SimulationReport {
        fingerprint: cascade.fingerprint().to_string(),
        stages,
        input_shape,
        passes,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Standard-normal volume.
fn synthetic_volume(shape: &[usize], rng: &mut StdRng) -> Result<ArrayD<f32>> {
    let normal = Normal::new(0.0_f32, 1.0)?;
    Ok(ArrayD::from_shape_fn(IxDyn(shape), |_| normal.sample(&mut *rng)))
}

/// Labels from equal-width bins of the first input channel over `[-2, 2]`.
fn threshold_labels(input: &ArrayD<f32>, num_classes: usize) -> ArrayD<usize> {
    let first = input.index_axis(Axis(1), 0);
    let bins = num_classes as f32;
    first
        .mapv(|v| {
            let t = ((v + 2.0) / 4.0 * bins).floor();
            t.clamp(0.0, bins - 1.0) as usize
        })
        .insert_axis(Axis(1))
}

fn pass_report(
    cascade: &Cascade,
    stage: usize,
    layers_reset: Option<usize>,
    result: &EnsembleResult,
) -> PassReport {
    let state = cascade.state();
    let (output_shape, output_mean, volatile, grad_stages) = match result.final_output() {
        Some(output) => (
            output.shape().to_vec(),
            output.data().mean().unwrap_or(0.0),
            output.is_volatile(),
            output.history().stages(),
        ),
        None => (Vec::new(), 0.0, false, Vec::new()),
    };
    PassReport {
        stage,
        training: state.is_training(),
        trainable_stages: cascade.trainable_stages().collect(),
        layers_reset,
        per_stage: result.is_per_stage(),
        output_shape,
        output_mean,
        volatile,
        grad_stages,
        weight_histogram: result.final_weight().map(|w| weight_histogram(w.view())),
    }
}
