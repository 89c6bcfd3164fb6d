//! CLI entry point for the acquisition engine.
//!
//! Runs a configured acquisition sequence against the in-process mock
//! microscope, which is useful for exercising feature lists without
//! physical hardware:
//!
//! ```bash
//! lsm-engine z-stack --config lsm-engine.toml
//! lsm-engine autofocus
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use lsm_engine::config::Settings;
use lsm_engine::context::{event_channel, AcquisitionEvent};
use lsm_engine::engine::{AcquisitionEngine, RunOptions};
use lsm_engine::hardware::mock::MockMicroscope;
use lsm_engine::registry::FeatureDescriptor;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lsm-engine")]
#[command(about = "Light-sheet acquisition engine (mock hardware demo)", long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long, default_value = "lsm-engine.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a z-stack over the configured channels and positions
    ZStack,
    /// Run a coarse/fine autofocus search
    Autofocus,
    /// Run a constant-velocity sweep of the scan axis
    Scan,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = if cli.config.exists() {
        Settings::load_from(&cli.config)?
    } else {
        Settings::default()
    };

    let (width, height) = (512, 512);
    let scope = Arc::new(MockMicroscope::new(width, height).with_best_focus(25.0));
    let (events, event_rx) = event_channel();
    let engine = AcquisitionEngine::new(scope, Arc::new(settings), events);

    let report = match cli.command {
        Commands::ZStack => engine.run(&vec![vec![
            FeatureDescriptor::named("z_stack"),
            FeatureDescriptor::named("snap"),
        ]])?,
        Commands::Autofocus => engine.run_with(
            &vec![vec![FeatureDescriptor::named("autofocus")]],
            &RunOptions {
                stop_after_frames: None,
            },
        )?,
        Commands::Scan => engine.run(&vec![vec![FeatureDescriptor::named(
            "constant_velocity_acquisition",
        )]])?,
    };

    println!(
        "acquired {} frames ({} consumed)",
        report.frames_produced, report.frames_consumed
    );
    for event in event_rx.try_iter() {
        match &event {
            AcquisitionEvent::AutofocusPlot(_) | AcquisitionEvent::ResolutionChanged { .. } => {
                println!("{}", serde_json::to_string(&event)?);
            }
            AcquisitionEvent::FrameReady(_) => {}
        }
    }
    Ok(())
}
