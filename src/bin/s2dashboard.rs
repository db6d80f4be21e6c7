//! s2dashboard: search, harmonize, normalize and render a seasonal Sentinel-2 dashboard

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use s2cube::config::PipelineConfig;
use s2cube::core::ProcessingPlan;
use s2cube::io::{ArrayLoader, CatalogSearch, GdalLoader, SceneMetadata, StacApiClient, StaticCatalog};
use s2cube::viz::{Dashboard, LayerStyle, PngRenderer};

#[derive(Parser)]
#[command(name = "s2dashboard")]
#[command(author, version, about = "Seasonal Sentinel-2 reflectance dashboards", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the scenes matching the configured search
    Search {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Load, harmonize, normalize and render the dashboard
    Run {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Local STAC item collection used instead of the remote API
        #[arg(short, long)]
        items: Option<PathBuf>,
        /// Output directory, overriding the configured one
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => {
            log::info!("No configuration given; using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

fn search(config: &PipelineConfig, items: Option<&PathBuf>) -> Result<Vec<SceneMetadata>> {
    let query = config.search.to_query();
    let scenes = match items {
        Some(path) => StaticCatalog::from_json_file(path)
            .with_context(|| format!("Failed to read item collection {}", path.display()))?
            .search(&query)?,
        None => StacApiClient::with_options(&config.search.stac_root, config.search.client_options())?
            .search(&query)
            .context("Catalog search failed")?,
    };
    Ok(scenes)
}

/// Configured bands, or every band asset of the first scene
fn resolve_bands(config: &PipelineConfig, scenes: &[SceneMetadata]) -> Vec<String> {
    match &config.bands {
        Some(bands) => bands.clone(),
        None => scenes.first().map(|s| s.band_assets()).unwrap_or_default(),
    }
}

fn run(config: PipelineConfig, items: Option<&PathBuf>, out: Option<PathBuf>) -> Result<()> {
    let start = Instant::now();

    let scenes = search(&config, items)?;
    if scenes.is_empty() {
        anyhow::bail!("No scenes match the search");
    }
    let bands = resolve_bands(&config, &scenes);
    log::info!("Loading bands {:?}", bands);

    let loader = GdalLoader::new();
    let source = loader.describe(&scenes, &bands, &config.search.bbox)?;
    let plan = ProcessingPlan::new(source)
        .harmonize(config.harmonization.clone())
        .normalize(config.normalization.clone());
    plan.validate()?;

    let mut cube = loader
        .load(&scenes, &bands, &config.search.bbox)
        .context("Failed to load reflectance cube")?;
    if let Some(sentinel) = config.nodata {
        let masked = cube.mask_nodata(sentinel);
        log::info!("Masked {} cells equal to {}", masked, sentinel);
    }
    let processed = plan.execute(&cube)?;

    let output_dir = out.unwrap_or_else(|| config.dashboard.output_dir.clone());
    let mut style = LayerStyle::for_cube(&processed);
    style.tiles = config.dashboard.tiles.clone();
    style.frame_width = config.dashboard.frame_width;

    let dashboard = Dashboard::seasonal(
        &processed,
        &config.dashboard.season_times(),
        &config.dashboard.rgb_bands,
        style,
    )?
    .with_gallery(config.dashboard.gallery_entries(), config.dashboard.gallery_time_index);

    let mut renderer = PngRenderer::new(&output_dir)?;
    let manifest = dashboard.render(&processed, &mut renderer, &output_dir)?;

    println!("Dashboard written to {}", output_dir.display());
    for panel in &manifest.panels {
        println!("  {} -> {}", panel.image.title, panel.image.path.display());
    }
    println!("  Processing time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Search { config } => {
            let config = load_config(config.as_ref())?;
            let scenes = search(&config, None)?;
            println!("{} scenes", scenes.len());
            for scene in &scenes {
                let cloud = scene
                    .cloud_cover
                    .map(|c| format!("{:.1}%", c))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("  {}  {}  cloud {}", scene.datetime.format("%Y-%m-%d"), scene.id, cloud);
            }
        }
        Commands::Run { config, items, out } => {
            let config = load_config(config.as_ref())?;
            run(config, items.as_ref(), out)?;
        }
    }
    Ok(())
}
