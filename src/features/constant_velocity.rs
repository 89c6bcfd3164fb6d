//! Constant-velocity scan using the stage's hardware-timed trigger mode.
//!
//! Instead of discrete trigger-per-frame stepping, the stage sweeps the
//! scan axis at a computed velocity while its encoder emits camera
//! triggers every `encoder_divide` counts. The feature arms the sweep at
//! `init` and then polls (bounded) until the stage reports the programmed
//! stop position, restoring the trigger source and stage speed afterward.

use crate::context::SignalContext;
use crate::error::{EngineError, EngineResult};
use crate::hardware::ScanStage;
use crate::node::{FeaturePair, NodeSpec, SignalHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Signal-side driver of one encoder-triggered sweep.
pub struct ConstantVelocityAcquisition {
    stage: Option<Arc<dyn ScanStage>>,
    /// Speed to restore at cleanup; `Some` only while the sweep owns the
    /// stage, making cleanup idempotent.
    saved_speed: Option<f64>,
    axis: char,
    stop_position_mm: f64,
    start_position_um: f64,
    polls_left: u32,
    poll_interval: Duration,
}

impl ConstantVelocityAcquisition {
    /// A sweep configured from the scan settings at `init`.
    pub fn build() -> FeaturePair {
        FeaturePair {
            name: "constant_velocity_acquisition",
            spec: NodeSpec::multi_step().device_related(),
            signal: Some(Box::new(Self {
                stage: None,
                saved_speed: None,
                axis: 'z',
                stop_position_mm: 0.0,
                start_position_um: 0.0,
                polls_left: 0,
                poll_interval: Duration::ZERO,
            })),
            data: None,
        }
    }

    fn restore(&mut self, cx: &mut SignalContext<'_>) {
        let Some(speed) = self.saved_speed.take() else {
            return;
        };
        if let Some(stage) = &self.stage {
            stage.stop_scan();
            stage.set_speed(speed);
            stage.stop();
            stage.move_axis_absolute(self.axis, self.start_position_um, false);
        }
        if let Err(err) = cx.scope.set_external_trigger(None) {
            debug!(error = %err, "failed restoring software trigger");
        }
    }
}

impl SignalHandler for ConstantVelocityAcquisition {
    fn init(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<()> {
        let scan = &cx.settings.scan;
        self.axis = scan.axis;
        self.poll_interval = Duration::from_millis(scan.poll_interval_ms);
        self.polls_left = scan.max_polls;

        cx.scope.prepare_next_channel()?;
        cx.scope.set_external_trigger(Some(&scan.trigger_source))?;
        let stage = cx.scope.stage();

        let channel = cx.scope.current_channel();
        let exposure_secs = cx
            .settings
            .microscope
            .channel(channel)
            .map(|c| c.camera_exposure_ms / 1000.0)
            .ok_or_else(|| {
                EngineError::Configuration(format!("no settings for channel {channel}"))
            })?;
        if exposure_secs <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "channel {channel} has a non-positive exposure time"
            )));
        }

        // quadrature device: minimum usable divide is 4 encoder counts
        let minimum_encoder_divide = scan.encoder_resolution_nm * 4.0;
        // stage travels at 45 degrees to the optical axis
        let step_size_nm = scan.desired_sampling_nm * 2.0 / std::f64::consts::SQRT_2;
        let encoder_divide = (step_size_nm / minimum_encoder_divide).ceil() as u32;

        let start_position_mm = cx.settings.microscope.abs_z_start / 1000.0;
        self.stop_position_mm = cx.settings.microscope.abs_z_end / 1000.0;
        self.start_position_um = cx.settings.microscope.abs_z_start;

        stage.move_axis_absolute(self.axis, self.start_position_um, true);

        self.saved_speed = Some(stage.default_speed());
        // scan speed derived from the per-slice step and exposure, with the
        // same 45-degree projection
        let step_size_mm =
            cx.settings.microscope.step_size * std::f64::consts::SQRT_2 / 1000.0;
        let expected_speed = step_size_mm / exposure_secs;
        stage.set_speed(expected_speed);
        info!(
            axis = %self.axis,
            speed = stage.speed(),
            encoder_divide,
            "constant-velocity sweep armed"
        );

        stage.configure_scan(self.axis, start_position_mm, self.stop_position_mm, encoder_divide);
        stage.start_scan(self.axis);

        self.stage = Some(stage);
        Ok(())
    }

    fn end(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        let Some(stage) = self.stage.clone() else {
            return Ok(true);
        };
        let position = stage.position(self.axis);
        if (position - self.stop_position_mm * 1000.0).abs() < 1.0 {
            self.restore(cx);
            return Ok(true);
        }
        if self.polls_left == 0 {
            return Err(EngineError::ScanTimeout { axis: self.axis });
        }
        self.polls_left -= 1;
        std::thread::sleep(self.poll_interval);
        Ok(false)
    }

    fn cleanup(&mut self, cx: &mut SignalContext<'_>) {
        self.restore(cx);
    }
}
