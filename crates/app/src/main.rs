use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod capture;
mod config;
mod supervisor;

use quietmic_core::levels::LevelsUpdate;

#[derive(Parser)]
#[command(name = "quietmic")]
#[command(about = "QuietMic: AI noise suppression for a virtual microphone", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available input devices
    List,
    /// Run the producer in the foreground (press Ctrl+C to stop)
    Run {
        /// Input device name, or "default"
        #[arg(short, long)]
        input: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::List) => list_devices(),
        Some(Commands::Run { input }) => run(input.as_deref()),
        None => run(None),
    }
}

fn list_devices() -> Result<()> {
    println!("Input devices:");
    for name in capture::list_input_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

fn run(input: Option<&str>) -> Result<()> {
    let mut cfg = config::AppConfig::load();
    if let Some(input) = input {
        cfg.input_device = input.to_owned();
        cfg.save();
    }

    let (levels_tx, levels_rx) = crossbeam_channel::bounded::<LevelsUpdate>(4);
    let mut supervisor = supervisor::Supervisor::new(levels_tx);
    supervisor.set_device(&cfg.input_device)?;
    supervisor.set_enabled(true)?;
    println!("QuietMic active. Select the QuietMic microphone in your applications.");
    println!("Press Ctrl+C to stop.");

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::Relaxed);
    })?;

    let mut last_report = Instant::now();
    let mut last_refresh = Instant::now();
    let mut latest: Option<LevelsUpdate> = None;
    while running.load(Ordering::Relaxed) {
        // Coalesce level updates; only the freshest matters.
        while let Ok(update) = levels_rx.try_recv() {
            latest = Some(update);
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            if let Some(update) = latest.take() {
                debug!(
                    "levels: in {:.4} rms, out {:.4} rms",
                    update.rms_in, update.rms_out
                );
            }
            last_report = Instant::now();
        }

        // The CLI has no hotplug notifications, so poll occasionally; the
        // refresh only disturbs capture if the selected device vanished.
        if last_refresh.elapsed() >= Duration::from_secs(2) {
            if let Err(e) = supervisor.refresh_devices() {
                warn!("device refresh failed: {e}");
            }
            last_refresh = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    supervisor.set_enabled(false)?;
    println!("QuietMic stopped.");
    Ok(())
}
