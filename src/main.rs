use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;

use roadsign_localizer::live_status::LiveStatus;
use roadsign_localizer::observer::SeedPolicy;
use roadsign_localizer::replay::load_session;
use roadsign_localizer::runtime::{spawn_localizer, Command};
use roadsign_localizer::types::{LandmarkPresenceEvent, Pose};
use roadsign_localizer::{FusionEvent, Localizer, LocalizerConfig};

#[derive(Parser, Debug)]
#[command(name = "roadsign_localizer")]
#[command(about = "Replay a recorded drive through the road-sign landmark EKF", long_about = None)]
struct Args {
    /// Recorded session (*.json or *.json.gz)
    #[arg(long)]
    session: PathBuf,

    /// Landmark map (*.xml roadSign layout or *.json)
    #[arg(long)]
    map: Option<PathBuf>,

    /// JSON file with localizer options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lateral camera offset (m)
    #[arg(long)]
    camera_offset_lateral: Option<f64>,

    /// Longitudinal camera offset (m)
    #[arg(long)]
    camera_offset_longitudinal: Option<f64>,

    /// Camera yaw offset (deg)
    #[arg(long)]
    camera_offset_yaw: Option<f64>,

    /// Nominal wheel speed scale
    #[arg(long)]
    speed_scale: Option<f64>,

    /// Seed from the map heading even when the sign is seen at an angle
    #[arg(long, default_value_t = false)]
    trust_map_heading: bool,

    /// Feed each emitted pose back in as fused pose feedback
    #[arg(long, default_value_t = false)]
    loop_back: bool,

    /// Output directory
    #[arg(long, default_value = "localizer_sessions")]
    output_dir: String,
}

#[derive(Serialize)]
struct ReplayOutput {
    poses: Vec<Pose>,
    presence_events: Vec<LandmarkPresenceEvent>,
    diagnostics: Vec<FusionEvent>,
}

fn build_config(args: &Args) -> Result<LocalizerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => LocalizerConfig::default(),
    };
    if let Some(map) = &args.map {
        config.landmark_map_path = map.clone();
    }
    if let Some(v) = args.camera_offset_lateral {
        config.camera_offset_lateral = v;
    }
    if let Some(v) = args.camera_offset_longitudinal {
        config.camera_offset_longitudinal = v;
    }
    if let Some(v) = args.camera_offset_yaw {
        config.camera_offset_yaw_deg = v;
    }
    if let Some(v) = args.speed_scale {
        config.speed_scale = v;
    }
    if args.trust_map_heading {
        config.seed_policy = SeedPolicy::TrustMapHeading;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Road-sign localizer starting", ts_now());
    println!("  Session: {}", args.session.display());
    println!("  Output Dir: {}", args.output_dir);

    let config = build_config(&args)?;
    println!("  Map: {}", config.landmark_map_path.display());
    println!("  Seed policy: {:?}", config.seed_policy);
    if args.loop_back {
        println!("  Pose feedback: looped back from emitted poses");
    }

    let localizer = Localizer::from_config(config).context("loading landmark map")?;
    let session = load_session(&args.session).context("loading session")?;
    std::fs::create_dir_all(&args.output_dir)?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(256);
    let (out_tx, mut out_rx) = mpsc::channel::<FusionEvent>(256);
    let handle = spawn_localizer(localizer, cmd_rx, out_tx, args.loop_back);

    let collector = tokio::spawn(async move {
        let mut output = ReplayOutput {
            poses: Vec::new(),
            presence_events: Vec::new(),
            diagnostics: Vec::new(),
        };
        while let Some(event) = out_rx.recv().await {
            match event {
                FusionEvent::Pose(p) => output.poses.push(p),
                FusionEvent::LandmarkPresence(ev) => output.presence_events.push(ev),
                other => output.diagnostics.push(other),
            }
        }
        output
    });

    let total = session.events.len();
    for event in session.events {
        cmd_tx
            .send(Command::Event(event))
            .await
            .context("localizer task stopped early")?;
    }
    drop(cmd_tx);

    let localizer = handle.await?;
    let output = collector.await?;

    let filename = format!("{}/localization_{}.json", args.output_dir, ts_now_clean());
    std::fs::write(&filename, serde_json::to_string_pretty(&output)?)?;
    println!(
        "[{}] Replayed {} events: {} poses, {} presence events -> {}",
        ts_now(),
        total,
        output.poses.len(),
        output.presence_events.len(),
        filename
    );

    let snapshot = localizer.snapshot();
    let mut status = LiveStatus::new();
    status.update_from(&snapshot);
    status.poses_emitted = output.poses.len() as u64;
    status.presence_events = output.presence_events.len() as u64;
    let status_path = format!("{}/live_status_final.json", args.output_dir);
    let _ = status.save(&status_path);

    println!("\n=== Final Stats ===");
    println!("Mode: {:?}", snapshot.mode);
    println!(
        "Pose: ({:.2}, {:.2}) heading {:.1}° ±{:.2} m",
        snapshot.pose.x,
        snapshot.pose.y,
        snapshot.pose.heading.to_degrees(),
        snapshot.pose.radius
    );
    println!(
        "Detections: {} (seeds {}, corrections {}, unmapped {})",
        snapshot.stats.detections,
        snapshot.stats.seeds,
        snapshot.stats.corrections,
        snapshot.stats.unmapped
    );

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
