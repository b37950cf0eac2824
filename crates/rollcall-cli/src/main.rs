mod config;
mod display;
mod enroll;
mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use display::{LogSink, SnapshotSink};
use rollcall_core::ledger::{self, Ledger, MarkOutcome};
use rollcall_core::gallery::read_samples;
use rollcall_core::{Classifier, Gallery, KnnClassifier, ScrfdDetector};
use rollcall_hw::Camera;
use session::{CropSpec, FrameSink, Session};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance register")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and mark recognised people present
    Run {
        /// Attendance date; prompted for when omitted
        #[arg(short, long)]
        date: Option<String>,
        /// Stop after this many frames (0 = until interrupted)
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Capture face samples for one person into the gallery
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Number of samples to capture
        #[arg(short, long)]
        samples: Option<usize>,
    },
    /// Create the ledger with one row per gallery identity
    Roster,
    /// Mark one person present without the camera
    Mark {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Classify a stored sample against the gallery
    Classify {
        /// `.npy` file of samples
        file: PathBuf,
        /// Row of the file to classify
        #[arg(long, default_value_t = 0)]
        row: usize,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { date, max_frames } => run(&config, date, max_frames),
        Commands::Enroll { name, samples } => enroll(&config, &name, samples),
        Commands::Roster => roster(&config),
        Commands::Mark { name, date } => mark(&config, &name, date),
        Commands::Classify { file, row } => classify(&config, &file, row),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

/// The `--date` value, or the operator's answer to a prompt.
fn resolve_date(date: Option<String>) -> Result<String> {
    let date = match date {
        Some(date) => date,
        None => {
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            let stdin = std::io::stdin();
            config::prompt_date(stdin.lock(), std::io::stdout(), &today)
                .context("reading date")?
        }
    };
    Ok(config::check_date(&date)?.to_string())
}

fn crop_spec(config: &Config) -> CropSpec {
    CropSpec {
        size: config.face_size,
        margin: config.crop_margin,
        order: config.channel_order,
    }
}

fn run(config: &Config, date: Option<String>, max_frames: Option<u64>) -> Result<()> {
    let date = resolve_date(date)?;
    let gallery = Gallery::load(&config.gallery_dir)
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;
    let mut detector = ScrfdDetector::load(&config.detector_model, config.detection_threshold)?;

    let mut session = Session::new(
        &gallery,
        KnnClassifier { k: config.k },
        Ledger::open(&config.ledger_path),
        date,
        crop_spec(config),
    )?;

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    let mut stream = camera.stream()?;
    stream.discard(config.warmup_frames);

    let mut sink: Box<dyn FrameSink> = match &config.snapshot_path {
        Some(path) => Box::new(SnapshotSink::new(path.clone())),
        None => Box::new(LogSink::default()),
    };
    let stats = session.run(
        &mut stream,
        &mut detector,
        sink.as_mut(),
        max_frames.unwrap_or(config.max_frames),
    )?;

    println!(
        "{} frames ({} dark), {} faces, {} marked present",
        stats.frames,
        stats.dark_frames,
        stats.faces,
        stats.marked.len()
    );
    for name in &stats.marked {
        println!("  {name}");
    }
    if stats.ledger_failures > 0 {
        println!("{} ledger update(s) could not be saved", stats.ledger_failures);
    }
    Ok(())
}

fn enroll(config: &Config, name: &str, samples: Option<usize>) -> Result<()> {
    let path = enroll::sample_path(&config.gallery_dir, name)?;
    let count = samples.unwrap_or(config.enroll_samples);
    if count == 0 {
        bail!("sample count must be at least 1");
    }

    let mut detector = ScrfdDetector::load(&config.detector_model, config.detection_threshold)?;
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    let mut stream = camera.stream()?;
    stream.discard(config.warmup_frames);

    println!("Look at the camera; capturing {count} samples...");
    let stack = enroll::collect_samples(
        &mut stream,
        &mut detector,
        crop_spec(config),
        count,
        config.enroll_stride,
    )?;
    let total = enroll::save_samples(&path, &stack)?;
    println!("Saved {} samples to {} ({total} total)", stack.nrows(), path.display());
    Ok(())
}

fn roster(config: &Config) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_dir)
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;
    ledger::create_roster(&config.ledger_path, gallery.identities())?;
    println!(
        "Created {} with {} identities",
        config.ledger_path.display(),
        gallery.identities().len()
    );
    Ok(())
}

fn mark(config: &Config, name: &str, date: Option<String>) -> Result<()> {
    let date = resolve_date(date)?;
    let mut ledger = Ledger::open(&config.ledger_path);
    match ledger.ensure_present(name, &date)? {
        MarkOutcome::Marked => println!("{name} marked present on {date}"),
        MarkOutcome::AlreadyPresent => println!("{name} already present on {date}"),
        MarkOutcome::NotOnRoster => {
            bail!("{name} is not on the roster in {}", config.ledger_path.display())
        }
    }
    Ok(())
}

fn classify(config: &Config, file: &Path, row: usize) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_dir)
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;
    let samples =
        read_samples(file).with_context(|| format!("reading samples {}", file.display()))?;
    if row >= samples.nrows() {
        bail!("{} has {} rows, no row {row}", file.display(), samples.nrows());
    }

    let query = samples.row(row).to_vec();
    let class_id = KnnClassifier { k: config.k }.classify(gallery.training_set(), &query)?;
    println!("{}", gallery.name(class_id)?);
    Ok(())
}
