//! card-scanner - scan photos of trading cards
//!
//! Runs the card pipeline over image files or folders and stores every card
//! it can read in a local JSON card store.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use card_scanner::batch::{BatchEvent, BatchScanner, ScanGeometry};
use card_scanner::capture::collect_image_paths;
use card_scanner::config::{self, AppConfig};
use card_scanner::storage::{self, CardRepository, JsonCardStore, ProcessedSet};
use card_scanner::vision::{CardPipeline, DetectorStrategy, ModelManager, Rect, Size};

/// card-scanner - find trading cards in photos and read them
#[derive(Parser, Debug)]
#[command(name = "card-scanner")]
#[command(about = "Detects trading cards in photos and extracts player, year and team")]
struct Args {
    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region detector to use, overriding the configuration
    #[arg(long, value_enum)]
    strategy: Option<DetectorStrategy>,

    /// Scan frame in viewport coordinates: x,y,width,height
    #[arg(long, value_parser = parse_rect, requires = "viewport")]
    scan_frame: Option<Rect>,

    /// Viewport size the scan frame refers to: width,height
    #[arg(long, value_parser = parse_size)]
    viewport: Option<Size>,

    /// Card store file, overriding the configuration
    #[arg(long)]
    store: Option<PathBuf>,

    /// Scan and print without storing cards
    #[arg(long)]
    dry_run: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Image files or folders to scan
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn parse_numbers(value: &str, count: usize) -> Result<Vec<f64>> {
    let numbers = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("'{}' is not a list of numbers", value))?;
    if numbers.len() != count {
        bail!("expected {} comma-separated numbers, got {}", count, numbers.len());
    }
    Ok(numbers)
}

fn parse_rect(value: &str) -> Result<Rect> {
    let n = parse_numbers(value, 4)?;
    Ok(Rect::new(n[0], n[1], n[2], n[3]))
}

fn parse_size(value: &str) -> Result<Size> {
    let n = parse_numbers(value, 2)?;
    Ok(Size::new(n[0], n[1]))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_or_create_config(),
    };
    if let Some(strategy) = args.strategy {
        config.detection.strategy = strategy;
    }

    let paths = collect_image_paths(&args.paths)?;
    if paths.is_empty() {
        bail!("No supported images found in {:?}", args.paths);
    }
    info!("card-scanner starting: {} images, {:?} detection", paths.len(), config.detection.strategy);

    let models = match &config.detection.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    info!("Models directory: {:?}", models.models_dir());
    let pipeline = CardPipeline::from_config(&config, models)?;

    let store = if args.dry_run {
        JsonCardStore::in_memory()
    } else {
        let store_path = match args.store.clone().or_else(|| config.storage.store_path.clone()) {
            Some(path) => path,
            None => storage::default_store_path()?,
        };
        JsonCardStore::open(&store_path).await?
    };
    let processed = Arc::new(ProcessedSet::with_identifiers(store.identifiers().await));
    let store = Arc::new(store);

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let scanner = BatchScanner::new(pipeline, store.clone(), processed)
        .with_events(events_tx)
        .with_geometry(ScanGeometry {
            scan_frame: args.scan_frame,
            viewport_size: args.viewport,
        })
        .dry_run(args.dry_run);

    let control = scanner.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current image");
            control.cancel();
        }
    });

    let printer = std::thread::spawn(move || {
        for event in events_rx {
            print_event(&event);
        }
    });

    let summary = scanner.run(paths).await;
    drop(scanner);
    if printer.join().is_err() {
        warn!("Progress printer panicked");
    }

    let total_cards = store.list().await?.len();
    println!(
        "{} scanned, {} skipped, {} failed; {} cards found, {} stored ({} in store){}",
        summary.scanned,
        summary.skipped,
        summary.failed,
        summary.cards_found,
        summary.cards_stored,
        total_cards,
        if summary.cancelled { " - cancelled" } else { "" }
    );

    Ok(())
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::Scanned { path, outcome, stored } => match &outcome.card_info {
            Some(info) => println!(
                "{}: {} | {} | {}{}",
                path.display(),
                info.player_name.as_deref().unwrap_or("?"),
                info.year.map(|y| y.to_string()).unwrap_or_else(|| "?".to_string()),
                info.team.as_deref().unwrap_or("?"),
                if *stored { "" } else { " (not stored)" }
            ),
            None => println!("{}: no card ({} regions)", path.display(), outcome.regions.len()),
        },
        BatchEvent::Skipped { path } => println!("{}: already scanned", path.display()),
        BatchEvent::Failed { path, error } => println!("{}: failed: {}", path.display(), error),
        BatchEvent::Paused => println!("Paused"),
        BatchEvent::Resumed => println!("Resumed"),
        BatchEvent::Started { .. } | BatchEvent::Finished(_) => {}
    }
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring invalid configuration: {:#}", e),
            }
        } else if let Err(e) = config::save_config(&AppConfig::default(), &config_path) {
            warn!("Could not write default configuration: {:#}", e);
        } else {
            info!("Wrote default configuration to {:?}", config_path);
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
