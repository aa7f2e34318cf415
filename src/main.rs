//! neuromesh - mesh segmented occupancy volumes on a pool of worker nodes
//!
//! Subcommands:
//! - `mesh`: Mesh a sparse body or dense `.npy` volume into an OBJ file
//! - `decode`: Convert a sparse body into a dense `.npy` volume

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};

use neuromesh::dispatch::HttpTransport;
use neuromesh::mesh::save_obj;
use neuromesh::settings::{get_settings_path, load_settings, Settings};
use neuromesh::volume::{assemble, decode_file, npy, Granularity};
use neuromesh::{JobStatus, MeshJob};

#[derive(Parser, Debug)]
#[command(name = "neuromesh")]
#[command(about = "Distributed block meshing of segmented occupancy volumes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mesh a volume on the worker pool and write an OBJ file
    Mesh(MeshArgs),
    /// Decode a sparse body into a dense .npy volume
    Decode(DecodeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    /// Pick by file extension: .npy is dense, anything else sparse
    Auto,
    Sparse,
    Npy,
}

#[derive(Parser, Debug)]
struct MeshArgs {
    /// Sparse body (optionally gzipped) or .npy volume
    #[arg(short, long)]
    input: PathBuf,

    /// Output OBJ file path
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "auto")]
    format: InputFormat,

    /// Worker configuration JSON (default: <config dir>/neuromesh/workers.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker URL; repeat for several. Replaces the configured pool
    #[arg(short, long = "worker")]
    workers: Vec<String>,

    /// Resolution for sparse input: bit, subblock or block
    #[arg(long)]
    granularity: Option<Granularity>,

    /// Edge length of dispatch blocks
    #[arg(long)]
    block_size: Option<usize>,

    /// Invert a dense input before meshing
    #[arg(long)]
    invert: bool,
}

#[derive(Parser, Debug)]
struct DecodeArgs {
    /// Sparse body, optionally gzipped
    #[arg(short, long)]
    input: PathBuf,

    /// Output .npy path
    #[arg(short, long)]
    output: PathBuf,

    /// Output resolution: bit, subblock or block
    #[arg(long, default_value = "bit")]
    granularity: Granularity,
}

fn resolve_format(format: InputFormat, path: &Path) -> InputFormat {
    match format {
        InputFormat::Auto => {
            let is_npy = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("npy"));
            if is_npy {
                InputFormat::Npy
            } else {
                InputFormat::Sparse
            }
        }
        explicit => explicit,
    }
}

fn job_settings(args: &MeshArgs) -> Result<Settings> {
    let mut settings = if !args.workers.is_empty() {
        Settings::with_workers(args.workers.iter().cloned())
    } else {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => get_settings_path()?,
        };
        load_settings(&path)
            .with_context(|| format!("Failed to load worker config {}", path.display()))?
    };

    if let Some(granularity) = args.granularity {
        settings.granularity = granularity;
    }
    if let Some(edge) = args.block_size {
        settings.block_size = [edge; 3];
    }
    Ok(settings)
}

async fn run_mesh(args: MeshArgs) -> Result<()> {
    let settings = job_settings(&args)?;
    let job = MeshJob::new(&settings, HttpTransport::new())?;

    let output = match resolve_format(args.format, &args.input) {
        InputFormat::Npy => {
            let mut volume = npy::read(&args.input)
                .with_context(|| format!("Failed to read {}", args.input.display()))?;
            if args.invert {
                volume = volume.inverted();
            }
            job.mesh_volume(volume).await?
        }
        _ => {
            if args.invert {
                bail!("--invert only applies to dense .npy input");
            }
            job.mesh_sparse_file(&args.input)
                .await
                .with_context(|| format!("Failed to mesh {}", args.input.display()))?
        }
    };

    match output.status {
        JobStatus::Complete => {}
        JobStatus::CompleteWithFailures { failed, dispatched } => {
            warn!("{} of {} blocks failed, writing partial mesh", failed, dispatched);
        }
        JobStatus::AllBlocksFailed { dispatched } => {
            bail!("all {} dispatched blocks failed, no mesh written", dispatched);
        }
    }

    save_obj(&output.mesh, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(
        "wrote {} ({} vertices, {} faces)",
        args.output.display(),
        output.mesh.vertex_count(),
        output.mesh.face_count()
    );
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let (header, blocks) = decode_file(&args.input, args.granularity)
        .with_context(|| format!("Failed to decode {}", args.input.display()))?;
    let volume = assemble(&blocks).context("Failed to assemble blocks")?;

    npy::write(&args.output, &volume)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(
        "label {}: wrote {:?} volume to {}",
        header.label,
        volume.dims(),
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Mesh(args) => run_mesh(args).await,
        Commands::Decode(args) => run_decode(args),
    }
}
