use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vrdf::config::{DEFAULT_CONFIG_PATH, DEFAULT_STORAGE_ROOT};
use vrdf::{
    CompressionLevel, CompressionMethod, ConversionPipeline, ConversionRequest, PipelineConfig,
};

/// Convert a study volume and its segmentation into a VRDF file
#[derive(Debug, Parser)]
#[command(name = "vrdf-convert", version)]
struct Args {
    /// Directory containing one sub-directory per study
    #[arg(long, env = "VRDF_STORAGE_ROOT", default_value = DEFAULT_STORAGE_ROOT)]
    root: PathBuf,

    /// Study identifier (directory name under the root)
    #[arg(long)]
    study: String,

    /// Input volume, e.g. patientA-t1n.nii.gz
    #[arg(long)]
    input: String,

    /// Segmentation labelmap, e.g. patientA-seg.nii.gz
    #[arg(long)]
    seg: String,

    /// JSON config with an optional transfer_function
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Payload compression: none, deflate or zstd
    #[arg(long, default_value = "zstd")]
    compression: CompressionMethod,

    /// Compression level 0-9
    #[arg(long, default_value_t = 6)]
    level: u8,

    /// Refuse inputs whose channel volume exceeds this many MiB
    #[arg(long)]
    memory_budget_mb: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "vrdf=info,vrdf_convert=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let mut config = PipelineConfig::new(&args.root)
        .with_compression(args.compression, CompressionLevel::new(args.level));
    if let Some(mb) = args.memory_budget_mb {
        config = config.with_memory_budget(mb.saturating_mul(1024 * 1024));
    }

    let pipeline = ConversionPipeline::with_vrdf_encoder(config);
    let request =
        ConversionRequest::new(args.study, args.input, args.seg).with_config_path(args.config);

    match pipeline.run(&request).await {
        Ok(report) => {
            tracing::info!(shape = ?report.shape, modality = %report.modality, "Conversion completed");
            println!("{}", report.artifact_name);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error ({}): {}", err.kind().status_code(), err);
            if let Some(path) = &err.intermediate {
                eprintln!("intermediate kept at {}", path.display());
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
