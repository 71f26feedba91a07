//! segmask: command-line front end for segmentation and enhancement.
//!
//! Reads an image, drives a [`Session`] through one operation and writes
//! the rendered result as PNG. With a credential (`--token` or
//! `HF_TOKEN`) the hosted models are tried first; without one, or when
//! they fail, the local algorithms run instead.
//!
//! # Usage
//!
//! ```text
//! segmask enhance photo.jpg -o sharp.png
//! segmask segment photo.jpg -o clusters.png --clusters 6
//! segmask segment photo.jpg -o overlay.png --point 120,80 --exclude 10,10 --cutout object.png
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use segmask_io::{
    CUTOUT_FILE_NAME, Endpoints, Export, HttpTransport, RemoteClient, Rendered, Session, TaskMode,
};
use segmask_pipeline::{
    DownsampleFilter, KMeansConfig, PromptPoint, RegionGrowConfig, RegionGrowerKind,
    SegmentConfig,
};
use tracing_subscriber::EnvFilter;

/// Image segmentation and enhancement with remote inference and local
/// fallbacks.
#[derive(Parser)]
#[command(name = "segmask", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Remote inference credential. Without one everything runs locally.
    #[arg(long, env = "HF_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Enhancement model endpoint.
    #[arg(long, global = true, default_value = Endpoints::DEFAULT_ENHANCE_URL)]
    enhance_url: String,

    /// Segmentation model endpoint.
    #[arg(long, global = true, default_value = Endpoints::DEFAULT_SEGMENT_URL)]
    segment_url: String,

    /// Remote request timeout in seconds.
    #[arg(long, global = true, default_value_t = HttpTransport::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Log at debug level (`RUST_LOG` takes precedence).
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Super-resolve an image remotely, or sharpen it locally.
    Enhance {
        /// Path to the input image (PNG, JPEG, BMP, WebP).
        input: PathBuf,

        /// Where to write the result PNG.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Segment an image, from seed points or automatically.
    Segment(SegmentArgs),
}

#[derive(Args)]
struct SegmentArgs {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Where to write the rendered overlay PNG.
    #[arg(short, long)]
    output: PathBuf,

    /// Include the region around X,Y. Repeatable.
    ///
    /// Any point switches to interactive segmentation; without points
    /// the whole image is segmented automatically.
    #[arg(long = "point", value_name = "X,Y", value_parser = parse_point)]
    points: Vec<(u32, u32)>,

    /// Exclude the region around X,Y. Repeatable.
    #[arg(long = "exclude", value_name = "X,Y", value_parser = parse_point)]
    excludes: Vec<(u32, u32)>,

    /// Also write the segmented object on a transparent background.
    #[arg(long)]
    cutout: Option<PathBuf>,

    /// Region growing strategy for the local fallback.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_GROWER)]
    grower: Grower,

    /// Number of color clusters for automatic segmentation.
    #[arg(long, default_value_t = KMeansConfig::DEFAULT_CLUSTERS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    clusters: usize,

    /// k-means iterations.
    #[arg(long, default_value_t = KMeansConfig::DEFAULT_ITERATIONS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    iterations: usize,

    /// Seed for reproducible clustering.
    #[arg(long)]
    seed: Option<u64>,

    /// Overlay opacity (0.0-1.0).
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_OVERLAY_ALPHA)]
    alpha: f32,

    /// Downsample filter for the working-resolution copy.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_FILTER)]
    downsample_filter: Filter,

    /// Full segmentation config as a JSON string.
    ///
    /// When provided, all other segmentation parameter flags are ignored.
    /// The JSON must be a valid `SegmentConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Region growing strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Grower {
    /// Adaptive local tolerance with edge gating.
    Adaptive,
    /// Fixed tolerance around the seed color.
    SeedColor,
}

/// Working-copy resampling filter, mirroring [`DownsampleFilter`].
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Keep the source resolution.
    Disabled,
    /// Nearest neighbor.
    Nearest,
    /// Bilinear.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Three-lobe Lanczos.
    Lanczos3,
}

const fn grower_from_pipeline(kind: RegionGrowerKind) -> Grower {
    match kind {
        RegionGrowerKind::Adaptive => Grower::Adaptive,
        RegionGrowerKind::SeedColor => Grower::SeedColor,
    }
}

const fn filter_from_pipeline(f: DownsampleFilter) -> Filter {
    match f {
        DownsampleFilter::Disabled => Filter::Disabled,
        DownsampleFilter::Nearest => Filter::Nearest,
        DownsampleFilter::Triangle => Filter::Triangle,
        DownsampleFilter::CatmullRom => Filter::CatmullRom,
        DownsampleFilter::Gaussian => Filter::Gaussian,
        DownsampleFilter::Lanczos3 => Filter::Lanczos3,
    }
}

/// CLI defaults derived from the pipeline defaults so the two cannot
/// silently diverge.
const CLI_DEFAULT_GROWER: Grower = grower_from_pipeline(RegionGrowConfig::DEFAULT_GROWER);
const CLI_DEFAULT_FILTER: Filter = filter_from_pipeline(SegmentConfig::DEFAULT_DOWNSAMPLE_FILTER);

/// Parse an `X,Y` pixel coordinate.
fn parse_point(s: &str) -> Result<(u32, u32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid coordinate {v:?}: {e}"))
    };
    Ok((coord(x)?, coord(y)?))
}

/// Build a [`SegmentConfig`] from the segment arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_args(args: &SegmentArgs) -> Result<SegmentConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let defaults = SegmentConfig::default();
    Ok(SegmentConfig {
        region: RegionGrowConfig {
            grower: match args.grower {
                Grower::Adaptive => RegionGrowerKind::Adaptive,
                Grower::SeedColor => RegionGrowerKind::SeedColor,
            },
            ..defaults.region
        },
        kmeans: KMeansConfig {
            clusters: args.clusters,
            iterations: args.iterations,
            seed: args.seed,
        },
        overlay_alpha: args.alpha,
        downsample_filter: match args.downsample_filter {
            Filter::Disabled => DownsampleFilter::Disabled,
            Filter::Nearest => DownsampleFilter::Nearest,
            Filter::Triangle => DownsampleFilter::Triangle,
            Filter::CatmullRom => DownsampleFilter::CatmullRom,
            Filter::Gaussian => DownsampleFilter::Gaussian,
            Filter::Lanczos3 => DownsampleFilter::Lanczos3,
        },
        ..defaults
    })
}

/// Prompt points in submission order: includes, then excludes.
fn prompt_points(args: &SegmentArgs) -> Vec<PromptPoint> {
    let includes = args.points.iter().map(|&(x, y)| PromptPoint::include(x, y));
    let excludes = args.excludes.iter().map(|&(x, y)| PromptPoint::exclude(x, y));
    includes.chain(excludes).collect()
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), String> {
    let (mode, input, output, config) = match &cli.command {
        Command::Enhance { input, output } => {
            (TaskMode::Enhance, input, output, SegmentConfig::default())
        }
        Command::Segment(args) => (
            TaskMode::Segment,
            &args.input,
            &args.output,
            config_from_args(args)?,
        ),
    };

    tracing::debug!(?mode, ?config, "starting");

    let transport = HttpTransport::new(Duration::from_secs(cli.timeout))
        .map_err(|e| format!("Error creating HTTP client: {e}"))?;
    let endpoints = Endpoints {
        enhance_url: cli.enhance_url.clone(),
        segment_url: cli.segment_url.clone(),
    };
    let session = Session::new(RemoteClient::new(transport, endpoints), config)
        .map_err(|e| format!("Error in configuration: {e}"))?;
    if let Some(ref token) = cli.token {
        session.set_credential(token).await;
    }
    if !session.has_credential().await {
        eprintln!("No token provided; using local processing.");
    }

    let bytes = tokio::fs::read(input)
        .await
        .map_err(|e| format!("Error reading {}: {e}", input.display()))?;
    let dims = session
        .load_input(bytes)
        .await
        .map_err(|e| format!("Error decoding {}: {e}", input.display()))?;
    eprintln!(
        "Image: {} ({}x{})",
        input.display(),
        dims.width,
        dims.height
    );
    session.set_mode(mode).await;

    let result = match &cli.command {
        Command::Segment(args) if !args.points.is_empty() || !args.excludes.is_empty() => {
            session.set_interactive(true).await;
            session.add_points(&prompt_points(args)).await
        }
        _ => session.run().await,
    };
    let rendered = result
        .map_err(|e| format!("Processing error: {e}"))?
        .ok_or_else(|| "Processing produced no result".to_owned())?;
    write_result(&rendered, output).await?;

    if let Command::Segment(SegmentArgs {
        cutout: Some(path), ..
    }) = &cli.command
    {
        write_cutout(&session, path).await?;
    }
    Ok(())
}

async fn write_result(rendered: &Rendered, path: &Path) -> Result<(), String> {
    let export = Export::result(&rendered.image).map_err(|e| format!("Error encoding PNG: {e}"))?;
    export
        .write_to(path)
        .await
        .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    eprintln!(
        "Result ({:?}) written to {} ({} bytes)",
        rendered.source,
        path.display(),
        export.png.len(),
    );
    Ok(())
}

async fn write_cutout(session: &Session<HttpTransport>, path: &Path) -> Result<(), String> {
    let export = session
        .export()
        .await
        .map_err(|e| format!("Error exporting cut-out: {e}"))?;
    if export.file_name != CUTOUT_FILE_NAME {
        eprintln!("Nothing was segmented interactively; no cut-out written.");
        return Ok(());
    }
    export
        .write_to(path)
        .await
        .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    eprintln!(
        "Cut-out written to {} ({} bytes)",
        path.display(),
        export.png.len()
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn segment_args(extra: &[&str]) -> SegmentArgs {
        let mut argv = vec!["segmask", "segment", "in.png", "-o", "out.png"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Segment(args) => args,
            Command::Enhance { .. } => unreachable!("parsed a segment command"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_point_accepts_spaces() {
        assert_eq!(parse_point("12, 34").unwrap(), (12, 34));
    }

    #[test]
    fn parse_point_rejects_garbage() {
        assert!(parse_point("12").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("-1,4").is_err());
    }

    #[test]
    fn flags_default_to_pipeline_defaults() {
        let config = config_from_args(&segment_args(&[])).unwrap();
        assert_eq!(config, SegmentConfig::default());
    }

    #[test]
    fn flags_override_config() {
        let args = segment_args(&[
            "--clusters",
            "6",
            "--seed",
            "3",
            "--grower",
            "seed-color",
            "--downsample-filter",
            "nearest",
        ]);
        let config = config_from_args(&args).unwrap();
        assert_eq!(config.kmeans.clusters, 6);
        assert_eq!(config.kmeans.seed, Some(3));
        assert_eq!(config.region.grower, RegionGrowerKind::SeedColor);
        assert_eq!(config.downsample_filter, DownsampleFilter::Nearest);
    }

    #[test]
    fn config_json_overrides_flags() {
        let args = segment_args(&[
            "--clusters",
            "6",
            "--config-json",
            r#"{"kmeans": {"clusters": 2}}"#,
        ]);
        let config = config_from_args(&args).unwrap();
        assert_eq!(config.kmeans.clusters, 2);
        assert_eq!(config.kmeans.iterations, KMeansConfig::DEFAULT_ITERATIONS);
    }

    #[test]
    fn points_are_submitted_includes_first() {
        let args = segment_args(&["--exclude", "1,1", "--point", "5,6", "--point", "7,8"]);
        assert_eq!(
            prompt_points(&args),
            vec![
                PromptPoint::include(5, 6),
                PromptPoint::include(7, 8),
                PromptPoint::exclude(1, 1),
            ]
        );
    }
}
