//! Binary entrypoint for the dcmesh pipeline.
mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dcmesh_core::{Device, PipelineRequest, RunStatus};
use dcmesh_mesh::{LabelOutcome, LabeledVolume, MeshExtractor};
use dcmesh_stages::config::PipelineConfig;
use tracing::{info, Level};

use crate::progress::RunView;

/// Overrides the configuration file when `--config` is not given.
const CONFIG_VAR: &str = "DCMESH_CONFIG";

#[derive(Parser)]
#[command(name = "dcmesh", version, about = "Turn DICOM studies into segmented STL meshes")]
struct Cli {
    /// Pipeline configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert, segment and mesh up to five study directories
    Run(RunArgs),
    /// Mesh an existing segmentation volume
    Mesh(MeshArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Study directories (at most five), processed in order
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Directory receiving one `<study>_stl` folder per input
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Segmentation device: cpu, cuda or mps
    #[arg(short, long, default_value = "cpu")]
    device: Device,

    /// Print every event as a JSON line instead of a progress bar
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MeshArgs {
    /// Labeled NIfTI volume
    segmentation: PathBuf,

    /// Output directory for the STL files
    out_dir: PathBuf,

    /// Labels to extract, comma-separated (default: from configuration)
    #[arg(short, long, value_delimiter = ',')]
    labels: Option<Vec<i32>>,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// `--config` first, then `$DCMESH_CONFIG`, then built-in defaults.
fn resolve_config(flag: Option<&Path>, env: Option<PathBuf>) -> Result<PipelineConfig> {
    match flag.map(Path::to_path_buf).or(env) {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

async fn run(config: &PipelineConfig, args: RunArgs) -> Result<()> {
    let orchestrator = Arc::new(dcmesh_stages::orchestrator(config));
    let request = PipelineRequest::new(args.inputs, &args.output, args.device);
    let view = if args.json {
        RunView::json()
    } else {
        RunView::bar(request.input_dirs.len())
    };

    let mut handle = orchestrator
        .start_run(request)
        .context("Failed to start the pipeline")?;
    info!(run_id = %handle.run_id(), pipeline = orchestrator.pipeline_id(), "run started");

    let mut status = None;
    while status.is_none() {
        tokio::select! {
            event = handle.events().recv() => match event {
                Some(event) => status = view.on_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if orchestrator.cancel() {
                    info!("interrupt received, cancelling");
                }
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || handle.wait())
        .await
        .context("Pipeline worker did not finish")?;
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    }

    match summary.status {
        RunStatus::Success => Ok(()),
        RunStatus::Cancelled => bail!("Run cancelled"),
        RunStatus::Error => bail!("{}", summary.message),
    }
}

fn mesh(config: &PipelineConfig, args: MeshArgs) -> Result<()> {
    let volume = LabeledVolume::from_nifti(&args.segmentation)
        .with_context(|| format!("Failed to read {}", args.segmentation.display()))?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let labels = args.labels.unwrap_or_else(|| config.mesh.labels.clone());
    let extractor = MeshExtractor::new(config.mesh.label_spec(), config.mesh.smoothing);
    let outcomes = extractor.extract(&volume, &labels, &args.out_dir)?;

    for outcome in &outcomes {
        match outcome {
            LabelOutcome::Saved { name, path, triangles, .. } => {
                println!("{name}: {triangles} triangles -> {}", path.display())
            }
            LabelOutcome::Skipped { label, name } => {
                println!("{name}: no voxels for label {label}, skipped")
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let env = std::env::var_os(CONFIG_VAR).map(PathBuf::from);
    let config = resolve_config(cli.config.as_deref(), env)?;

    match cli.command {
        Command::Run(args) => run(&config, args).await,
        Command::Mesh(args) => mesh(&config, args),
        Command::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "dcmesh", "-vv", "run", "/data/a", "/data/b", "--output", "/out", "--device", "cuda",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.inputs, vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]);
                assert_eq!(args.output, PathBuf::from("/out"));
                assert_eq!(args.device, Device::Cuda);
                assert!(!args.json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_inputs_and_known_device() {
        assert!(Cli::try_parse_from(["dcmesh", "run"]).is_err());
        assert!(Cli::try_parse_from(["dcmesh", "run", "/a", "-d", "tpu"]).is_err());
    }

    #[test]
    fn test_mesh_label_list() {
        let cli = Cli::try_parse_from(["dcmesh", "mesh", "seg.nii.gz", "out", "--labels", "2,5"])
            .unwrap();
        match cli.command {
            Command::Mesh(args) => assert_eq!(args.labels, Some(vec![2, 5])),
            _ => panic!("expected mesh"),
        }
    }

    #[test]
    fn test_config_flag_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("flag.yaml");
        let env = dir.path().join("env.yaml");
        std::fs::write(&flag, "converter:\n  program: from-flag\n").unwrap();
        std::fs::write(&env, "converter:\n  program: from-env\n").unwrap();

        let config = resolve_config(Some(&flag), Some(env.clone())).unwrap();
        assert_eq!(config.converter.program, "from-flag");
        let config = resolve_config(None, Some(env)).unwrap();
        assert_eq!(config.converter.program, "from-env");
        assert_eq!(resolve_config(None, None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_missing_config_is_reported() {
        let err = resolve_config(Some(Path::new("/no/such/dcmesh.yaml")), None).unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/dcmesh.yaml"));
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(log_level(0), Level::WARN);
        assert_eq!(log_level(1), Level::INFO);
        assert_eq!(log_level(5), Level::TRACE);
    }
}
