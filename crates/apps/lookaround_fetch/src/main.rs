use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use clap::{Parser, Subcommand};
use foundation::{GeoPoint, great_circle_distance, initial_bearing, normalize_degrees};
use panorama::{
    JPEG_DATA_URL_PREFIX, LoadOutcome, PanoramaConfig, PanoramaRecord, PanoramaServices,
    StaticHandshake,
};
use settings::{FeatureToggle, FileToggleStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use viewer::{TileUrlCallback, build_descriptor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Look Around coverage and imagery fetcher")]
struct Args {
    /// JSON configuration file (default: LOOKAROUND_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resolution tier override, 0 (sharpest) to 7
    #[arg(long)]
    tier: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the panorama closest to a location
    Closest {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Print the navigation neighbors of the panorama closest to a location
    Neighbors {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Download and stitch the panorama closest to a location
    Fetch {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Output directory
        #[arg(long, default_value = "data/lookaround")]
        out: String,
    },

    /// Show or change the persisted viewer toggle
    Toggle {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,

        /// Settings file
        #[arg(long, default_value = "data/settings.json")]
        store: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Command::Toggle {
        enable,
        disable,
        store,
    } = &args.command
    {
        return toggle(store, *enable, *disable);
    }

    let config = load_config(args.config.as_deref(), args.tier)?;
    let services = PanoramaServices::http(config, StaticHandshake::from_env());

    match args.command {
        Command::Closest { lat, lon } => closest(&services, lat, lon).await?,
        Command::Neighbors { lat, lon } => neighbors(&services, lat, lon).await?,
        Command::Fetch { lat, lon, out } => fetch(&services, lat, lon, &out).await?,
        Command::Toggle { .. } => {}
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    tier: Option<u8>,
) -> Result<PanoramaConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => PanoramaConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => PanoramaConfig::from_env()?,
    };
    Ok(match tier {
        Some(tier) => config.with_resolution_tier(tier)?,
        None => config,
    })
}

async fn resolve(
    services: &PanoramaServices,
    lat: f64,
    lon: f64,
) -> Result<PanoramaRecord, Box<dyn std::error::Error>> {
    services
        .resolver
        .closest_panorama(lat, lon)
        .await?
        .ok_or_else(|| format!("no coverage near {lat},{lon}").into())
}

async fn closest(
    services: &PanoramaServices,
    lat: f64,
    lon: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = resolve(services, lat, lon).await?;
    let meters = 1000.0 * great_circle_distance(GeoPoint::new(lat, lon), record.position());
    info!("closest panorama is {meters:.1} m away");
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn neighbors(
    services: &PanoramaServices,
    lat: f64,
    lon: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let origin = resolve(services, lat, lon).await?;
    println!("origin\t{}", origin.composite_id());

    for n in services.resolver.neighbors(&origin).await {
        let km = great_circle_distance(origin.position(), n.position());
        let bearing = initial_bearing(origin.position(), n.position());
        println!(
            "{}\t{:.1} m\t{:.0} deg\t{}",
            n.composite_id(),
            km * 1000.0,
            bearing,
            n.date.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn fetch(
    services: &PanoramaServices,
    lat: f64,
    lon: f64,
    out_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = resolve(services, lat, lon).await?;
    let key = record.key();
    let state = services.state();
    state.begin_round();
    let heading = normalize_degrees(record.heading + services.config.heading_calibration);
    state.set_origin(record.clone(), heading);

    let loaded = match services.loader.load(key.clone()).await {
        LoadOutcome::Committed { loaded } => loaded,
        other => return Err(format!("load of {key} did not complete: {other:?}").into()),
    };
    if loaded == 0 {
        return Err(format!("no imagery could be fetched for {key}").into());
    }

    let out_dir = PathBuf::from(out_dir).join(format!("{}_{}", key.pano_id, key.region_id));
    tokio::fs::create_dir_all(&out_dir).await?;

    for column in 0..4 {
        let Some(data_url) = state.tile(column) else {
            warn!("{key} column {column} missing");
            continue;
        };
        let payload = data_url
            .strip_prefix(JPEG_DATA_URL_PREFIX)
            .ok_or("stitched tile is not a JPEG data URL")?;
        let jpeg = base64::engine::general_purpose::STANDARD.decode(payload)?;
        let path = out_dir.join(format!("{column}.jpg"));
        tokio::fs::write(&path, jpeg).await?;
        info!("wrote {}", path.display());
    }

    let state_for_tiles = state.clone();
    let descriptor = build_descriptor(
        &key.composite_id(),
        &services.config,
        heading,
        Some((record.lat, record.lon)),
        TileUrlCallback::new(move |_, _, x, _| {
            state_for_tiles
                .tile(x as usize)
                .unwrap_or_else(|| JPEG_DATA_URL_PREFIX.to_string())
        }),
    );
    let path = out_dir.join("descriptor.json");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&descriptor)?).await?;
    info!("wrote {}", path.display());

    println!("{loaded}/4 tiles -> {}", out_dir.display());
    Ok(())
}

fn toggle(store: &str, enable: bool, disable: bool) -> Result<(), Box<dyn std::error::Error>> {
    let toggle = FeatureToggle::new(Arc::new(FileToggleStore::new(store)));
    if enable || disable {
        toggle.set_enabled(enable)?;
    }
    let state = if toggle.is_enabled() {
        "enabled"
    } else {
        "disabled"
    };
    println!("{} = {state}", toggle.key());
    Ok(())
}
