use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use takeoff_core::persistence::snapshot_path;
use takeoff_core::{
    compute_quantity, measure_pixels, parse_scale_notation, BoundingBox, CancellationToken,
    GeometryData, GeometryMetrics, LengthUnit, MeasurementType, Page, PageId, Quantity,
    RecalculationReport, Scale, ScaleBarDetector, ScaleResolver, Takeoff, TakeoffConfig,
};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "takeoff")]
#[command(about = "Quantity takeoff tools for construction drawings")]
pub struct Cli {
    /// TOML configuration file; environment overrides still apply.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a scale notation and print every candidate.
    ParseScale {
        #[arg(value_name = "TEXT")]
        text: String,
        /// Resolution the sheet was rendered at.
        #[arg(long)]
        dpi: Option<f64>,
        #[arg(long, default_value = "ft")]
        unit: LengthUnit,
    },
    /// Look for graphical scale bars in a raster image.
    DetectScaleBar {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        /// Search region as x,y,width,height in pixels.
        #[arg(long, value_parser = parse_region)]
        region: Option<BoundingBox>,
    },
    /// Derive pixels per unit from a known distance.
    Calibrate {
        #[arg(long)]
        pixels: f64,
        #[arg(long)]
        distance: f64,
        #[arg(long, default_value = "ft")]
        unit: LengthUnit,
        #[arg(long, default_value = "ft")]
        page_unit: LengthUnit,
    },
    /// Compute the quantity of one shape.
    Measure {
        /// Shape as JSON, e.g. {"type":"line","start":{"x":0,"y":0},"end":{"x":10,"y":0}}
        #[arg(long)]
        geometry: String,
        #[arg(long)]
        ppu: f64,
        #[arg(long = "type", value_enum)]
        measurement_type: MeasurementKind,
        /// Depth in inches for volume.
        #[arg(long)]
        depth: Option<f64>,
        #[arg(long, default_value = "ft")]
        page_unit: LengthUnit,
    },
    /// Recalculate every calibrated page in a snapshot and write it back.
    ///
    /// Accepts the snapshot itself or the drawing it belongs to.
    Recalculate {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MeasurementKind {
    Linear,
    Area,
    Volume,
    Count,
}

impl From<MeasurementKind> for MeasurementType {
    fn from(kind: MeasurementKind) -> Self {
        match kind {
            MeasurementKind::Linear => MeasurementType::Linear,
            MeasurementKind::Area => MeasurementType::Area,
            MeasurementKind::Volume => MeasurementType::Volume,
            MeasurementKind::Count => MeasurementType::Count,
        }
    }
}

#[derive(Debug, Serialize)]
struct MeasureOutput {
    quantity: Quantity,
    metrics: GeometryMetrics,
}

#[derive(Debug, Serialize)]
struct PageReport {
    page_id: PageId,
    #[serde(flatten)]
    report: RecalculationReport,
}

#[derive(Debug, Serialize)]
struct RecalculateOutput {
    pages: Vec<PageReport>,
    skipped_uncalibrated: Vec<PageId>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::ParseScale { text, dpi, unit } => {
            print_json(&parse_scale_notation(&text, dpi, unit))
        }
        Commands::DetectScaleBar { image, region } => {
            let config = load_config(cli.config.as_deref())?;
            run_detect_scale_bar(&config, &image, region)
        }
        Commands::Calibrate { pixels, distance, unit, page_unit } => {
            let config = load_config(cli.config.as_deref())?;
            let resolver = ScaleResolver::new(config.resolver, config.scale_bar)?;
            let mut page = Page::new(0, 0, 0).with_unit(page_unit);
            let result = resolver.calibrate_manual(&mut page, pixels, distance, unit)?;
            print_json(&result)
        }
        Commands::Measure { geometry, ppu, measurement_type, depth, page_unit } => {
            run_measure(&geometry, ppu, measurement_type.into(), depth, page_unit)
        }
        Commands::Recalculate { snapshot } => {
            let config = load_config(cli.config.as_deref())?;
            run_recalculate(config, &snapshot)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TakeoffConfig> {
    let Some(path) = path else {
        return TakeoffConfig::from_env().context("invalid configuration in environment");
    };
    let mut config = TakeoffConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config
        .apply_env_overrides(|name| std::env::var(name).ok())
        .context("invalid configuration in environment")?;
    Ok(config)
}

/// A `.json` path is the snapshot itself; anything else is a drawing whose
/// sidecar snapshot is used
fn resolve_snapshot(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "json") {
        path.to_path_buf()
    } else {
        snapshot_path(path)
    }
}

fn run_detect_scale_bar(config: &TakeoffConfig, image: &Path, region: Option<BoundingBox>) -> Result<()> {
    if !image.is_file() {
        anyhow::bail!("file does not exist: {}", image.display());
    }
    let raster = image::open(image)
        .with_context(|| format!("failed to read image {}", image.display()))?
        .to_luma8();
    debug!(width = raster.width(), height = raster.height(), "image loaded");

    let detector = ScaleBarDetector::new(config.scale_bar.clone())?;
    let candidates = detector.detect(&raster, region, &CancellationToken::new())?;
    print_json(&candidates)
}

fn run_measure(
    geometry: &str,
    ppu: f64,
    measurement_type: MeasurementType,
    depth: Option<f64>,
    page_unit: LengthUnit,
) -> Result<()> {
    let geometry: GeometryData = serde_json::from_str(geometry).context("failed to parse geometry JSON")?;
    let scale = Scale::new(ppu, page_unit)?;
    let quantity = compute_quantity(&geometry, measurement_type, &scale, depth)?;
    let metrics = measure_pixels(&geometry)?;
    print_json(&MeasureOutput { quantity, metrics })
}

fn run_recalculate(config: TakeoffConfig, path: &Path) -> Result<()> {
    let snapshot = resolve_snapshot(path);
    let snapshot = snapshot.as_path();
    debug!(snapshot = %snapshot.display(), "loading snapshot");
    let takeoff = Takeoff::new(config)?;
    if !takeoff.load(snapshot)? {
        anyhow::bail!("snapshot does not exist: {}", snapshot.display());
    }

    let mut output = RecalculateOutput { pages: Vec::new(), skipped_uncalibrated: Vec::new() };
    for page in takeoff.pages() {
        if page.pixels_per_unit().is_none() {
            output.skipped_uncalibrated.push(page.id());
            continue;
        }
        let report = takeoff
            .recalculate_all_on_page(page.id())
            .with_context(|| format!("failed to recalculate page {}", page.id()))?;
        output.pages.push(PageReport { page_id: page.id(), report });
    }

    let inconsistent = takeoff.verify_aggregates();
    if !inconsistent.is_empty() {
        anyhow::bail!("{} condition totals disagree with their measurements", inconsistent.len());
    }
    takeoff.save(snapshot).context("failed to write snapshot")?;
    print_json(&output)
}

fn parse_region(value: &str) -> std::result::Result<BoundingBox, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("region must be four numbers: {e}"))?;
    match parts.as_slice() {
        [x, y, width, height] if *width > 0.0 && *height > 0.0 => {
            Ok(BoundingBox::new(*x, *y, *width, *height))
        }
        [_, _, _, _] => Err("region width and height must be positive".to_string()),
        _ => Err(format!("region must be x,y,width,height, got {value}")),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
