//! aetherscan: land-cover change detection between two images.
//!
//! Reads a before/after image pair, aligns the second onto the first,
//! runs the index-delta (NDVI) and structural-similarity (SSIM) change
//! detectors and writes the requested artifacts:
//!
//! - a side-by-side overlay PNG for visual review
//! - GeoJSON polygons and binary mask PNGs for each detector
//! - a JSON report of the change statistics
//!
//! The legend lines are printed to stdout (or the JSON report with
//! `--json`); progress and logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin aetherscan -- --before t0.tif --after t1.tif --out overlay.png
//! cargo run --release --bin aetherscan -- \
//!     --before-bands t0/B02.tif,t0/B03.tif,t0/B04.tif,t0/B08.tif \
//!     --after-bands t1/B02.tif,t1/B03.tif,t1/B04.tif,t1/B08.tif --ndvi-geojson ndvi.geojson
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use aetherscan_export::ExportError;
use aetherscan_export::report::ChangeSummary;
use aetherscan_io::{DecodedRaster, IoError};
use aetherscan_pipeline::types::RgbImage;
use aetherscan_pipeline::{
    BandRequest, BandSelection, ChangeReport, DetectionConfig, DetectionError, FeatureCollection,
    GeoTransform, RasterImage,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Detect land-cover change between two co-registered images.
///
/// With at least four bands (or explicit `--red`/`--nir`) both NDVI and
/// SSIM change are reported; otherwise only SSIM change.
#[derive(Parser)]
#[command(name = "aetherscan", version)]
struct Cli {
    /// Earlier image (GeoTIFF, PNG, JPEG, BMP, WebP).
    #[arg(long, required_unless_present = "before_bands", conflicts_with = "before_bands")]
    before: Option<PathBuf>,

    /// Earlier image as comma-separated single-band files, stacked in
    /// order (e.g. `B02.tif,B03.tif,B04.tif,B08.tif`). Bands are
    /// resampled onto the grid of the first one.
    #[arg(long, value_delimiter = ',')]
    before_bands: Vec<PathBuf>,

    /// Later image. Resampled onto the grid of `--before` if sizes differ.
    #[arg(long, required_unless_present = "after_bands", conflicts_with = "after_bands")]
    after: Option<PathBuf>,

    /// Later image as comma-separated single-band files.
    #[arg(long, value_delimiter = ',')]
    after_bands: Vec<PathBuf>,

    /// Zero-based red band index. Needs `--nir`.
    #[arg(long, requires = "nir")]
    red: Option<usize>,

    /// Zero-based near-infrared band index. Needs `--red`.
    #[arg(long, requires = "red")]
    nir: Option<usize>,

    /// Zero-based green band index for NDWI. Falls back to band 1 when
    /// out of range.
    #[arg(long, default_value_t = aetherscan_pipeline::bands::DEFAULT_GREEN_BAND)]
    green: usize,

    /// NDWI value above which pixels are treated as water.
    #[arg(long, default_value_t = DetectionConfig::DEFAULT_WATER_THRESHOLD, allow_negative_numbers = true)]
    water_threshold: f32,

    /// Keep change over water.
    #[arg(long)]
    no_water_mask: bool,

    /// Dead zone around zero NDVI delta for gain/loss counting.
    #[arg(long, default_value_t = DetectionConfig::DEFAULT_DELTA_EPS)]
    delta_eps: f32,

    /// Drop polygons covering fewer pixels than this.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    min_area_px: Option<u32>,

    /// Skip polygon extraction.
    #[arg(long)]
    no_polygons: bool,

    /// Affine transform of `--before` as `a,b,c,d,e,f`
    /// (`x = a*col + b*row + c`, `y = d*col + e*row + f`). Overrides
    /// georeferencing embedded in a GeoTIFF.
    #[arg(long, value_parser = parse_transform, allow_hyphen_values = true, conflicts_with = "world_file")]
    transform: Option<GeoTransform>,

    /// World file (`.pgw`, `.tfw`, ...) georeferencing `--before`.
    /// Overrides georeferencing embedded in a GeoTIFF.
    #[arg(long)]
    world_file: Option<PathBuf>,

    /// Filter used to resample `--after` onto the `--before` grid.
    #[arg(long, value_enum, default_value_t = Filter::Triangle)]
    resample_filter: Filter,

    /// Weight of the red change overlay (0.0-1.0).
    #[arg(long, default_value_t = aetherscan_export::DEFAULT_OVERLAY_ALPHA)]
    alpha: f32,

    /// Write the side-by-side overlay PNG to this path.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write NDVI change polygons as GeoJSON to this path.
    #[arg(long)]
    ndvi_geojson: Option<PathBuf>,

    /// Write SSIM change polygons as GeoJSON to this path.
    #[arg(long)]
    ssim_geojson: Option<PathBuf>,

    /// Write the refined NDVI change mask as a PNG to this path.
    #[arg(long)]
    ndvi_mask: Option<PathBuf>,

    /// Write the refined SSIM change mask as a PNG to this path.
    #[arg(long)]
    ssim_mask: Option<PathBuf>,

    /// Write the JSON report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the JSON report to stdout instead of the legend lines.
    #[arg(long)]
    json: bool,

    /// Full detection config as a JSON string.
    ///
    /// When provided, the individual detection flags are ignored. The
    /// JSON must be a valid `DetectionConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Log debug events (overridden by `RUST_LOG`).
    #[arg(short, long)]
    verbose: bool,
}

/// Resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor.
    Nearest,
    /// Bilinear interpolation.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

impl From<Filter> for aetherscan_io::ResampleFilter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => Self::Nearest,
            Filter::Triangle => Self::Triangle,
            Filter::CatmullRom => Self::CatmullRom,
            Filter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Everything that can stop a run.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error parsing --config-json: {0}")]
    ConfigJson(#[source] serde_json::Error),

    #[error("{}: {source}", path.display())]
    Input { path: PathBuf, source: IoError },

    #[error("--{flag}: {source}")]
    Bands { flag: &'static str, source: IoError },

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Parse `a,b,c,d,e,f` into a [`GeoTransform`].
fn parse_transform(s: &str) -> Result<GeoTransform, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let coefficients: [f64; 6] = values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected 6 coefficients, got {}", v.len()))?;
    Ok(GeoTransform::from_coefficients(coefficients))
}

/// Build a [`DetectionConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual detection flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<DetectionConfig, CliError> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(CliError::ConfigJson);
    }

    Ok(DetectionConfig {
        water_threshold: cli.water_threshold,
        water_masking: !cli.no_water_mask,
        delta_eps: cli.delta_eps,
        min_area_px: cli.min_area_px,
        export_polygons: !cli.no_polygons,
        ..DetectionConfig::default()
    })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    eprintln!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

fn load_raster(path: &Path) -> Result<DecodedRaster, CliError> {
    let bytes = read_file(path)?;
    aetherscan_io::decode_raster(&bytes).map_err(|source| CliError::Input {
        path: path.to_path_buf(),
        source,
    })
}

/// Load one date: a single image, or band files stacked in order.
fn load_input(
    single: Option<&Path>,
    bands: &[PathBuf],
    flag: &'static str,
) -> Result<DecodedRaster, CliError> {
    if let Some(path) = single {
        return load_raster(path);
    }
    let sources = bands
        .iter()
        .map(|path| load_raster(path))
        .collect::<Result<Vec<_>, _>>()?;
    aetherscan_io::stack_bands(sources).map_err(|source| CliError::Bands { flag, source })
}

/// Explicit georeferencing from `--transform` or `--world-file`.
fn transform_override(cli: &Cli) -> Result<Option<GeoTransform>, CliError> {
    if let Some(transform) = cli.transform {
        return Ok(Some(transform));
    }
    let Some(ref path) = cli.world_file else {
        return Ok(None);
    };
    let bytes = read_file(path)?;
    aetherscan_io::parse_world_file(&String::from_utf8_lossy(&bytes))
        .map(Some)
        .map_err(|source| CliError::Input {
            path: path.clone(),
            source,
        })
}

/// Place `decoded` with the override, else its embedded transform, else
/// pixel coordinates.
fn place(decoded: DecodedRaster, explicit: Option<GeoTransform>) -> RasterImage {
    match (explicit, decoded.georeferencing) {
        (Some(transform), embedded) => {
            if embedded.is_some() {
                tracing::info!("explicit transform overrides embedded GeoTIFF georeferencing");
            }
            decoded.raster.with_transform(transform)
        }
        (None, Some(embedded)) => {
            tracing::debug!(
                transform = ?embedded.transform,
                epsg = embedded.epsg,
                "using embedded georeferencing"
            );
            decoded.raster
        }
        (None, None) => {
            tracing::warn!("no georeferencing found; polygons use pixel coordinates");
            decoded.raster
        }
    }
}

/// Render the review panels: NDVI change over both dates (when
/// available) followed by SSIM change over the later date.
fn overlay_panels(
    before: &RasterImage,
    after: &RasterImage,
    report: &ChangeReport,
    alpha: f32,
) -> Result<RgbImage, ExportError> {
    let rgb_before = aetherscan_export::rgb_composite(before);
    let rgb_after = aetherscan_export::rgb_composite(after);

    let mut panels = Vec::with_capacity(3);
    if let Some(vegetation) = &report.vegetation {
        panels.push(aetherscan_export::overlay_mask(&rgb_before, &vegetation.mask, alpha)?);
        panels.push(aetherscan_export::overlay_mask(&rgb_after, &vegetation.mask, alpha)?);
    } else {
        panels.push(rgb_before);
    }
    panels.push(aetherscan_export::overlay_mask(
        &rgb_after,
        &report.structural.mask,
        alpha,
    )?);
    aetherscan_export::stack_horizontal(&panels)
}

fn write_polygons(path: &Path, polygons: &FeatureCollection) -> Result<(), CliError> {
    let geojson = aetherscan_export::to_geojson(polygons)?;
    write_file(path, geojson.as_bytes())
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = config_from_cli(cli)?;
    config.validate()?;
    let explicit = transform_override(cli)?;

    let before = load_input(cli.before.as_deref(), &cli.before_bands, "before-bands")?;
    let after = load_input(cli.after.as_deref(), &cli.after_bands, "after-bands")?;
    if before.epsg() != after.epsg() {
        tracing::warn!(
            before = before.epsg(),
            after = after.epsg(),
            "before and after declare different CRS; results assume they overlap"
        );
    }
    let before = place(before, explicit);
    let after = after.raster;
    tracing::info!(
        before = %before.dimensions(),
        before_bands = before.band_count(),
        after = %after.dimensions(),
        after_bands = after.band_count(),
        "loaded image pair"
    );
    let (after, _) = aetherscan_io::align_to(
        before.dimensions(),
        after,
        cli.resample_filter.into(),
    )?;

    let request = BandRequest {
        red: cli.red,
        nir: cli.nir,
        green: cli.green,
    };
    let selection = BandSelection::resolve(&before, &after, &request)?;
    if selection.spectral().is_none() {
        tracing::info!("NDVI disabled (no NIR band); pass --red/--nir for NDVI mode");
    }

    let report = aetherscan_pipeline::detect(&before, &after, &selection, &config)?;

    if let Some(ref path) = cli.out {
        let composite = overlay_panels(&before, &after, &report, cli.alpha)?;
        write_file(path, &aetherscan_io::encode_rgb_png(&composite)?)?;
    }

    match &report.vegetation {
        Some(vegetation) => {
            if let Some(ref path) = cli.ndvi_geojson {
                write_polygons(path, &vegetation.polygons)?;
            }
            if let Some(ref path) = cli.ndvi_mask {
                write_file(path, &aetherscan_io::encode_gray_png(&vegetation.mask)?)?;
            }
        }
        None => {
            if cli.ndvi_geojson.is_some() || cli.ndvi_mask.is_some() {
                tracing::warn!("NDVI outputs requested but NDVI is disabled; skipping them");
            }
        }
    }
    if let Some(ref path) = cli.ssim_geojson {
        write_polygons(path, &report.structural.polygons)?;
    }
    if let Some(ref path) = cli.ssim_mask {
        write_file(path, &aetherscan_io::encode_gray_png(&report.structural.mask)?)?;
    }

    let summary = ChangeSummary::new(&report, &config);
    if let Some(ref path) = cli.report {
        write_file(path, aetherscan_export::to_report_json(&summary)?.as_bytes())?;
    }

    if cli.json {
        println!("{}", aetherscan_export::to_report_json(&summary)?);
    } else {
        for line in aetherscan_export::summary_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
