//! Hardware abstraction: the traits the engine drives devices through.
//!
//! The engine never talks to a device directly; everything goes through
//! [`MicroscopeControl`] and the stage traits, so the same acquisition
//! code runs against real instruments or the in-process mocks.
//!
//! All calls are blocking. Motion commands report completion (or
//! rejection) through their return value rather than an error: an
//! out-of-bounds target is a normal occurrence during scanning, not a
//! fault, so [`Stage::move_axis_absolute`] returns a sentinel `false` and
//! the caller keeps its previous position bookkeeping.

pub mod mock;

use crate::buffer::FrameSlot;
use crate::error::EngineResult;
use std::sync::Arc;

/// Absolute positioning on a multi-axis sample stage.
///
/// Axes are addressed by single letters: `x`, `y`, `z`, `r` (rotation)
/// and `f` (focus).
pub trait Stage: Send + Sync {
    /// Command one axis to an absolute position.
    ///
    /// Returns `false` without moving if the target is outside the
    /// stage's travel range. With `wait_until_done` the call blocks until
    /// motion settles.
    fn move_axis_absolute(&self, axis: char, position: f64, wait_until_done: bool) -> bool;

    /// Current position of one axis.
    fn position(&self, axis: char) -> f64;

    /// Halt all motion immediately.
    fn stop(&self);
}

/// A stage that can run hardware-timed constant-velocity sweeps.
pub trait ScanStage: Stage {
    /// The controller's normal positioning speed, restored after a sweep.
    fn default_speed(&self) -> f64;

    /// Set the axis speed in controller units.
    fn set_speed(&self, speed: f64);

    /// Read back the configured speed.
    fn speed(&self) -> f64;

    /// Arm a constant-velocity sweep over `[start_mm, stop_mm]` with the
    /// encoder divider controlling the output-pulse spacing.
    fn configure_scan(&self, axis: char, start_mm: f64, stop_mm: f64, encoder_divide: u32);

    /// Begin the armed sweep.
    fn start_scan(&self, axis: char);

    /// Disarm / halt the sweep.
    fn stop_scan(&self);
}

/// The facade the engine holds for one microscope.
///
/// Implementations own the camera, stage and remaining devices and are
/// shared between the signal and data threads, so interior mutability is
/// theirs to manage.
pub trait MicroscopeControl: Send + Sync {
    /// Put the instrument into an acquiring state (open shutters, arm the
    /// camera).
    fn prepare_acquisition(&self) -> EngineResult<()>;

    /// Leave the acquiring state and park the hardware.
    fn end_acquisition(&self) -> EngineResult<()>;

    /// The channel the hardware is currently configured for, 0 if none.
    fn current_channel(&self) -> u32;

    /// Reconfigure filter wheel, laser and exposure for one channel.
    fn prepare_channel(&self, channel: u32) -> EngineResult<()>;

    /// Advance to the next configured channel in cycling order.
    fn prepare_next_channel(&self) -> EngineResult<()>;

    /// Route camera triggering to an external line, or back to software
    /// triggering with `None`.
    fn set_external_trigger(&self, source: Option<&str>) -> EngineResult<()>;

    /// Swap the optical path to another resolution mode and zoom.
    fn change_resolution(&self, resolution_mode: &str, zoom: &str) -> EngineResult<()>;

    /// The sample stage.
    fn stage(&self) -> Arc<dyn ScanStage>;

    /// Expose one frame into `slot`, filling pixels and geometry. The
    /// caller owns frame id and position stamping.
    fn expose(&self, slot: &mut FrameSlot) -> EngineResult<()>;

    /// Sensor geometry as `(width, height)`.
    fn frame_shape(&self) -> (usize, usize);
}
