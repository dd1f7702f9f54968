use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use rollcall_core::attendance::AttendanceLog;
use rollcall_core::schedule::{parse_time, Schedule, ScheduleStore};
use rollcall_core::settings::{SettingsPatch, SettingsStore};
use rollcall_core::store::SimilarityStore;
use rollcall_core::{Embedding, LoadOutcome};
use rollcall_hw::{is_dark_frame, Camera, DARK_FRAME_THRESHOLD};
use std::path::{Path, PathBuf};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the roster of known identities
    #[command(subcommand)]
    Identities(IdentityCommand),
    /// Match an embedding against the roster
    Search {
        /// JSON file containing the embedding as an array of numbers
        #[arg(short, long)]
        embedding: PathBuf,
        /// Only verify this identity
        #[arg(short, long)]
        target: Option<String>,
        /// Similarity threshold (defaults to the configured one)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Inspect or replace the period schedule
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Inspect or clear the attendance log
    #[command(subcommand)]
    Logs(LogCommand),
    /// Inspect or change runtime settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Camera diagnostics
    #[command(subcommand)]
    Camera(CameraCommand),
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// List enrolled identities
    List,
    /// Enroll an identity from a precomputed embedding
    Add {
        #[arg(short, long)]
        name: String,
        /// JSON file containing the embedding as an array of numbers
        #[arg(short, long)]
        embedding: PathBuf,
        /// Reference photo to store alongside the identity
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Remove the first identity with this name
    Remove { name: String },
    /// Remove every identity and stored photo
    Clear,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Print the whole schedule
    Show,
    /// Print the active period
    Current {
        /// Resolve at this time (HH:MM) instead of now
        #[arg(long)]
        at: Option<String>,
    },
    /// Print the next period to start
    Next {
        /// Resolve at this time (HH:MM) instead of now
        #[arg(long)]
        at: Option<String>,
    },
    /// Replace the schedule with the contents of a JSON file
    Set { file: PathBuf },
}

#[derive(Subcommand)]
enum LogCommand {
    /// Print log entries, oldest first
    Show {
        /// Only the last N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Delete every entry
    Clear,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set {
        #[arg(long)]
        detection_time: Option<u64>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        manual_detection_time: Option<u64>,
        #[arg(long)]
        auto_detection_time: Option<u64>,
        #[arg(long)]
        auto_cooldown: Option<u64>,
        #[arg(long)]
        auto_idle: Option<u64>,
    },
    /// Restore the defaults
    Reset,
}

#[derive(Subcommand)]
enum CameraCommand {
    /// List V4L2 capture devices
    List,
    /// Grab one frame and report on it
    Test {
        /// Device path (defaults to ROLLCALL_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Identities(cmd) => identities(&config, cmd),
        Commands::Search {
            embedding,
            target,
            threshold,
        } => search(&config, &embedding, target.as_deref(), threshold),
        Commands::Schedule(cmd) => schedule(&config, cmd),
        Commands::Logs(cmd) => logs(&config, cmd),
        Commands::Settings(cmd) => settings(&config, cmd),
        Commands::Camera(cmd) => camera(&config, cmd),
    }
}

fn open_store(config: &Config) -> SimilarityStore {
    let (store, outcome) = SimilarityStore::open(config.store_paths());
    report_recovery("identity store", &outcome);
    store
}

fn report_recovery(what: &str, outcome: &LoadOutcome) {
    if let LoadOutcome::Recovered { reason } = outcome {
        eprintln!("warning: {what} was unreadable and has been reset in memory: {reason}");
    }
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read embedding file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))
}

fn identities(config: &Config, cmd: IdentityCommand) -> Result<()> {
    let mut store = open_store(config);

    match cmd {
        IdentityCommand::List => {
            if store.is_empty() {
                println!("No identities enrolled");
            }
            for record in store.records().iter() {
                let image = if record.image_ref.is_empty() {
                    "-"
                } else {
                    record.image_ref.as_str()
                };
                println!("{}\tdim={}\t{}", record.name, record.embedding.dim(), image);
            }
        }
        IdentityCommand::Add {
            name,
            embedding,
            image,
        } => {
            let embedding = read_embedding(&embedding)?;
            match image {
                Some(path) => {
                    store
                        .add_with_image(&name, embedding, &path)
                        .with_context(|| format!("failed to enroll {name} with {}", path.display()))?;
                }
                None => store
                    .add(&name, embedding, "")
                    .with_context(|| format!("failed to enroll {name}"))?,
            }
            println!("Enrolled {name} ({} identities)", store.len());
        }
        IdentityCommand::Remove { name } => {
            store.delete(&name)?;
            println!("Removed {name}");
        }
        IdentityCommand::Clear => {
            let report = store.clear();
            println!("Cleared roster ({} files removed)", report.files_removed);
            for err in &report.errors {
                eprintln!("warning: {err}");
            }
        }
    }

    Ok(())
}

fn search(config: &Config, embedding: &Path, target: Option<&str>, threshold: Option<f32>) -> Result<()> {
    let store = open_store(config);
    let query = read_embedding(embedding)?;
    let threshold = match threshold {
        Some(t) => t,
        None => SettingsStore::new(config.settings_path()).load().0.threshold,
    };

    let found = match target {
        Some(target) => store.search_specific(&query, target, threshold)?,
        None => store.search(&query, threshold)?,
    };

    match found {
        Some(m) => println!("{}\t{:.4}", m.name, m.similarity),
        None => println!("No match at threshold {threshold}"),
    }
    Ok(())
}

fn resolve_at(at: Option<String>) -> Result<NaiveTime> {
    match at {
        Some(raw) => Ok(parse_time(&raw)?),
        None => Ok(chrono::Local::now().time()),
    }
}

fn schedule(config: &Config, cmd: ScheduleCommand) -> Result<()> {
    let store = ScheduleStore::new(config.schedule_path());

    match cmd {
        ScheduleCommand::Show => {
            let (schedule, outcome) = store.load();
            report_recovery("schedule", &outcome);
            for slot in schedule.slots() {
                println!(
                    "{}\t{}-{}\t{}",
                    slot.period,
                    slot.start.format("%H:%M"),
                    slot.end.format("%H:%M"),
                    slot.faculty
                );
            }
        }
        ScheduleCommand::Current { at } => {
            let now = resolve_at(at)?;
            let (schedule, _) = store.load();
            match schedule.current_period(now) {
                Some(slot) => println!("{}\t{}", slot.label(), slot.faculty),
                None => println!("No active period"),
            }
        }
        ScheduleCommand::Next { at } => {
            let now = resolve_at(at)?;
            let (schedule, _) = store.load();
            match schedule.next_period(now) {
                Some(next) => println!(
                    "{}\t{}\tin {} min",
                    next.slot.label(),
                    next.slot.faculty,
                    next.minutes_until
                ),
                None => println!("No further periods today"),
            }
        }
        ScheduleCommand::Set { file } => {
            let raw = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let schedule: Schedule = serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not a valid schedule", file.display()))?;
            if schedule.is_empty() {
                bail!("refusing to install an empty schedule");
            }
            store.save(&schedule)?;
            println!("Schedule updated ({} periods)", schedule.slots().len());
        }
    }

    Ok(())
}

fn logs(config: &Config, cmd: LogCommand) -> Result<()> {
    let log = AttendanceLog::new(config.log_path());

    match cmd {
        LogCommand::Show { limit } => {
            let entries = log.read_all()?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for e in entries.iter().skip(skip) {
                println!(
                    "{}\t{:?}\t{}\t{:.3}\t{}\t{}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.status,
                    e.name,
                    e.confidence,
                    e.period_label,
                    e.mode
                );
            }
        }
        LogCommand::Clear => {
            log.clear()?;
            println!("Attendance log cleared");
        }
    }

    Ok(())
}

fn settings(config: &Config, cmd: SettingsCommand) -> Result<()> {
    let store = SettingsStore::new(config.settings_path());

    let current = match cmd {
        SettingsCommand::Show => {
            let (settings, outcome) = store.load();
            report_recovery("settings", &outcome);
            settings
        }
        SettingsCommand::Set {
            detection_time,
            threshold,
            manual_detection_time,
            auto_detection_time,
            auto_cooldown,
            auto_idle,
        } => {
            let patch = SettingsPatch {
                detection_time_secs: detection_time,
                threshold,
                manual_detection_time_secs: manual_detection_time,
                auto_detection_time_secs: auto_detection_time,
                auto_cooldown_secs: auto_cooldown,
                auto_idle_secs: auto_idle,
            };
            if patch == SettingsPatch::default() {
                bail!("no settings given");
            }
            store.update(&patch)?
        }
        SettingsCommand::Reset => store.reset()?,
    };

    println!("{}", serde_json::to_string_pretty(&current)?);
    Ok(())
}

fn camera(config: &Config, cmd: CameraCommand) -> Result<()> {
    match cmd {
        CameraCommand::List => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}\t{}\t{}\t{}", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        CameraCommand::Test { device } => {
            let path = device.unwrap_or_else(|| config.camera_device.clone());
            let camera = Camera::open(&path).with_context(|| format!("failed to open {path}"))?;
            let frame = camera.capture_frame()?;
            println!("device:     {path}");
            println!("format:     {:?} {}x{}", camera.pixel_format(), frame.width, frame.height);
            println!("brightness: {:.1}", frame.avg_brightness());
            println!(
                "dark:       {}",
                is_dark_frame(&frame.data, DARK_FRAME_THRESHOLD)
            );
        }
    }

    Ok(())
}
