//! Engine configuration loaded with Figment.
//!
//! Strongly-typed settings for one acquisition run. Configuration is loaded
//! from:
//! 1. an `lsm-engine.toml` file (base configuration)
//! 2. environment variables (prefixed with `LSM_ENGINE_`)
//!
//! Nodes read these structures through their context; they never mutate
//! them. [`Settings::validate`] is the fail-fast pass run before any
//! hardware motion is issued.
//!
//! # Example
//! ```no_run
//! use lsm_engine::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("z steps: {}", settings.microscope.number_z_steps);
//! # Ok::<(), lsm_engine::error::EngineError>(())
//! ```

use crate::error::{EngineError, EngineResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Engine-level knobs (buffer size, poll timeouts)
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Microscope state for the active imaging mode
    #[serde(default)]
    pub microscope: MicroscopeState,
    /// Current stage position cursors
    #[serde(default)]
    pub stage: StageParameters,
    /// Autofocus search parameters
    #[serde(default)]
    pub autofocus: AutofocusSettings,
    /// Constant-velocity scan parameters
    #[serde(default)]
    pub scan: ConstantVelocitySettings,
}

/// Engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Number of slots in the frame ring buffer
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// How long one data tick waits for new frames, in milliseconds
    #[serde(default = "default_poll_timeout")]
    pub data_poll_timeout_ms: u64,
    /// Consecutive empty polls tolerated before the data thread concludes
    /// no more frames will arrive
    #[serde(default = "default_idle_poll_limit")]
    pub idle_poll_limit: u32,
}

/// Channel cycling order for z-stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StackCyclingMode {
    /// Exhaust all z positions before switching channel
    #[default]
    PerStack,
    /// Switch channel at every z position
    PerSlice,
}

/// One laser/filter channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel index as exposed by the microscope (1-based)
    pub id: u32,
    /// Whether the channel takes part in the acquisition
    #[serde(default = "default_true")]
    pub is_selected: bool,
    /// Camera exposure time in milliseconds
    #[serde(default = "default_exposure")]
    pub camera_exposure_ms: f64,
    /// Focus offset applied while this channel is active, in micrometers
    #[serde(default)]
    pub defocus: f64,
}

/// Microscope state shared by the built-in features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroscopeState {
    /// Active resolution mode name (e.g. "high", "low", "Nanoscale")
    #[serde(default = "default_resolution")]
    pub resolution_mode: String,
    /// Zoom value for the active mode
    #[serde(default = "default_zoom")]
    pub zoom: String,
    /// Channel cycling order
    #[serde(default)]
    pub stack_cycling_mode: StackCyclingMode,
    /// Configured channels
    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
    /// Number of z steps per stack
    #[serde(default = "default_one")]
    pub number_z_steps: u32,
    /// Relative z start of the stack, micrometers
    #[serde(default)]
    pub start_position: f64,
    /// Relative z end of the stack, micrometers
    #[serde(default)]
    pub end_position: f64,
    /// z step size, micrometers
    #[serde(default = "default_step")]
    pub step_size: f64,
    /// Relative focus start of the stack, micrometers
    #[serde(default)]
    pub start_focus: f64,
    /// Relative focus end of the stack, micrometers
    #[serde(default)]
    pub end_focus: f64,
    /// Number of timepoints to acquire
    #[serde(default = "default_one")]
    pub timepoints: u32,
    /// Whether to cycle through `stage_positions`
    #[serde(default)]
    pub is_multiposition: bool,
    /// Multiposition table (used when `is_multiposition` is set)
    #[serde(default)]
    pub stage_positions: Vec<StageParameters>,
    /// Absolute scan start for constant-velocity mode, micrometers
    #[serde(default)]
    pub abs_z_start: f64,
    /// Absolute scan stop for constant-velocity mode, micrometers
    #[serde(default = "default_scan_stop")]
    pub abs_z_end: f64,
}

/// Absolute stage position cursors, all in device units (micrometers and
/// degrees for theta).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StageParameters {
    /// Lateral position, micrometers
    pub x: f64,
    /// Lateral position, micrometers
    pub y: f64,
    /// Axial position, micrometers
    pub z: f64,
    /// Rotation, degrees
    pub theta: f64,
    /// Focus position, micrometers
    pub f: f64,
}

/// Autofocus search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutofocusSettings {
    /// Run the coarse sweep
    #[serde(default = "default_true")]
    pub coarse_selected: bool,
    /// Coarse sweep total range, micrometers
    #[serde(default = "default_coarse_range")]
    pub coarse_range: f64,
    /// Coarse sweep step size, micrometers
    #[serde(default = "default_coarse_step")]
    pub coarse_step_size: f64,
    /// Run the fine sweep
    #[serde(default = "default_true")]
    pub fine_selected: bool,
    /// Fine sweep total range, micrometers
    #[serde(default = "default_fine_range")]
    pub fine_range: f64,
    /// Fine sweep step size, micrometers
    #[serde(default = "default_fine_step")]
    pub fine_step_size: f64,
    /// Handoff-queue deadline per remaining step, in seconds
    #[serde(default = "default_handoff_timeout")]
    pub handoff_timeout_secs: u64,
    /// PSF support diameter used by the entropy metric, in pixels
    #[serde(default = "default_psf_support")]
    pub psf_support_diameter: f64,
}

/// Constant-velocity scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantVelocitySettings {
    /// Stage axis driven by the scan
    #[serde(default = "default_axis")]
    pub axis: char,
    /// External trigger line armed for the scan
    #[serde(default = "default_trigger")]
    pub trigger_source: String,
    /// Desired axial sampling, nanometers
    #[serde(default = "default_sampling")]
    pub desired_sampling_nm: f64,
    /// Stage encoder resolution, nanometers per count
    #[serde(default = "default_encoder")]
    pub encoder_resolution_nm: f64,
    /// Pause between stop-position polls, milliseconds
    #[serde(default = "default_scan_poll")]
    pub poll_interval_ms: u64,
    /// Number of stop-position polls before declaring the scan stuck
    #[serde(default = "default_scan_polls")]
    pub max_polls: u32,
}

fn default_buffer_capacity() -> usize {
    100
}

fn default_poll_timeout() -> u64 {
    500
}

fn default_idle_poll_limit() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_exposure() -> f64 {
    100.0
}

fn default_resolution() -> String {
    "high".to_string()
}

fn default_zoom() -> String {
    "N/A".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_step() -> f64 {
    1.0
}

fn default_scan_stop() -> f64 {
    100.0
}

fn default_coarse_range() -> f64 {
    500.0
}

fn default_coarse_step() -> f64 {
    50.0
}

fn default_fine_range() -> f64 {
    50.0
}

fn default_fine_step() -> f64 {
    5.0
}

fn default_handoff_timeout() -> u64 {
    10
}

fn default_psf_support() -> f64 {
    3.0
}

fn default_axis() -> char {
    'z'
}

fn default_trigger() -> String {
    "/PXI6259/PFI1".to_string()
}

fn default_sampling() -> f64 {
    160.0
}

fn default_encoder() -> f64 {
    22.0
}

fn default_scan_poll() -> u64 {
    500
}

fn default_scan_polls() -> u32 {
    20
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            data_poll_timeout_ms: default_poll_timeout(),
            idle_poll_limit: default_idle_poll_limit(),
        }
    }
}

impl Default for MicroscopeState {
    fn default() -> Self {
        Self {
            resolution_mode: default_resolution(),
            zoom: default_zoom(),
            stack_cycling_mode: StackCyclingMode::default(),
            channels: vec![ChannelSettings {
                id: 1,
                is_selected: true,
                camera_exposure_ms: default_exposure(),
                defocus: 0.0,
            }],
            number_z_steps: 1,
            start_position: 0.0,
            end_position: 0.0,
            step_size: default_step(),
            start_focus: 0.0,
            end_focus: 0.0,
            timepoints: 1,
            is_multiposition: false,
            stage_positions: Vec::new(),
            abs_z_start: 0.0,
            abs_z_end: default_scan_stop(),
        }
    }
}

impl Default for AutofocusSettings {
    fn default() -> Self {
        Self {
            coarse_selected: true,
            coarse_range: default_coarse_range(),
            coarse_step_size: default_coarse_step(),
            fine_selected: true,
            fine_range: default_fine_range(),
            fine_step_size: default_fine_step(),
            handoff_timeout_secs: default_handoff_timeout(),
            psf_support_diameter: default_psf_support(),
        }
    }
}

impl Default for ConstantVelocitySettings {
    fn default() -> Self {
        Self {
            axis: default_axis(),
            trigger_source: default_trigger(),
            desired_sampling_nm: default_sampling(),
            encoder_resolution_nm: default_encoder(),
            poll_interval_ms: default_scan_poll(),
            max_polls: default_scan_polls(),
        }
    }
}

impl MicroscopeState {
    /// Channel ids taking part in the acquisition, in configuration order.
    pub fn selected_channels(&self) -> Vec<u32> {
        self.channels
            .iter()
            .filter(|c| c.is_selected)
            .map(|c| c.id)
            .collect()
    }

    /// Settings for one channel id, if configured.
    pub fn channel(&self, id: u32) -> Option<&ChannelSettings> {
        self.channels.iter().find(|c| c.id == id)
    }
}

impl Settings {
    /// Load settings from `lsm-engine.toml` and the environment.
    pub fn load() -> EngineResult<Self> {
        Self::load_from(Path::new("lsm-engine.toml"))
    }

    /// Load settings from an explicit TOML file path plus the environment.
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LSM_ENGINE_").split("__"))
            .extract()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what serde can express.
    ///
    /// Runs before any hardware motion is issued; every failure is a
    /// `Configuration` error naming the offending field.
    pub fn validate(&self) -> EngineResult<()> {
        if self.acquisition.buffer_capacity == 0 {
            return Err(EngineError::Configuration(
                "acquisition.buffer_capacity must be at least 1".into(),
            ));
        }
        if self.microscope.number_z_steps == 0 {
            return Err(EngineError::Configuration(
                "microscope.number_z_steps must be at least 1".into(),
            ));
        }
        if self.microscope.timepoints == 0 {
            return Err(EngineError::Configuration(
                "microscope.timepoints must be at least 1".into(),
            ));
        }
        if self.microscope.selected_channels().is_empty() {
            return Err(EngineError::Configuration(
                "microscope.channels must contain at least one selected channel".into(),
            ));
        }
        if self.microscope.is_multiposition && self.microscope.stage_positions.is_empty() {
            return Err(EngineError::Configuration(
                "microscope.stage_positions is empty but is_multiposition is set".into(),
            ));
        }
        if self.autofocus.coarse_selected && self.autofocus.coarse_step_size <= 0.0 {
            return Err(EngineError::Configuration(
                "autofocus.coarse_step_size must be positive".into(),
            ));
        }
        if self.autofocus.fine_selected && self.autofocus.fine_step_size <= 0.0 {
            return Err(EngineError::Configuration(
                "autofocus.fine_step_size must be positive".into(),
            ));
        }
        if self.scan.desired_sampling_nm <= 0.0 || self.scan.encoder_resolution_nm <= 0.0 {
            return Err(EngineError::Configuration(
                "scan sampling and encoder resolution must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.microscope.selected_channels(), vec![1]);
    }

    #[test]
    fn rejects_zero_z_steps() {
        let mut settings = Settings::default();
        settings.microscope.number_z_steps = 0;
        let err = settings.validate().expect_err("should fail");
        assert!(err.to_string().contains("number_z_steps"));
    }

    #[test]
    fn rejects_empty_multiposition_table() {
        let mut settings = Settings::default();
        settings.microscope.is_multiposition = true;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[microscope]
number_z_steps = 5
step_size = 2.0
timepoints = 3
stack_cycling_mode = "per_slice"

[[microscope.channels]]
id = 1

[[microscope.channels]]
id = 2
camera_exposure_ms = 50.0
"#
        )
        .expect("write");

        let settings = Settings::load_from(file.path()).expect("load");
        assert_eq!(settings.microscope.number_z_steps, 5);
        assert_eq!(settings.microscope.timepoints, 3);
        assert_eq!(
            settings.microscope.stack_cycling_mode,
            StackCyclingMode::PerSlice
        );
        assert_eq!(settings.microscope.selected_channels(), vec![1, 2]);
    }
}
