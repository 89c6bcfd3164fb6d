//! Z-stack acquisition over positions, timepoints, channels and z steps.

use crate::config::{StackCyclingMode, StageParameters};
use crate::context::SignalContext;
use crate::error::{EngineError, EngineResult};
use crate::node::{FeaturePair, NodeSpec, SignalHandler};
use tracing::debug;

/// Multi-position, multi-timepoint, multi-channel z-stack.
///
/// One `main` tick per captured frame. The cycling mode decides whether a
/// whole stack is exhausted before switching channel (`per_stack`) or the
/// channel changes at every slice (`per_slice`). Total frames produced is
/// positions x timepoints x channels x z steps.
pub struct ZStackAcquisition {
    number_z_steps: u32,
    start_z_position: f64,
    start_focus: f64,
    z_step_size: f64,
    focus_step_size: f64,
    timepoints: u32,

    positions: Vec<StageParameters>,
    current_position_idx: usize,
    current_z_position: f64,
    current_focus_position: f64,
    need_to_move_new_position: bool,
    need_to_move_z_position: bool,
    z_position_moved_time: u32,

    stack_cycling_mode: StackCyclingMode,
    channels: Vec<u32>,
    current_channel_in_list: usize,

    /// `(z, f)` to restore after the stack when not multi-position
    restore: Option<(f64, f64)>,
}

impl ZStackAcquisition {
    /// A stack configured from the microscope settings at `init`.
    pub fn build() -> FeaturePair {
        FeaturePair {
            name: "z_stack",
            spec: NodeSpec::multi_step().device_related(),
            signal: Some(Box::new(Self {
                number_z_steps: 0,
                start_z_position: 0.0,
                start_focus: 0.0,
                z_step_size: 0.0,
                focus_step_size: 0.0,
                timepoints: 0,
                positions: Vec::new(),
                current_position_idx: 0,
                current_z_position: 0.0,
                current_focus_position: 0.0,
                need_to_move_new_position: true,
                need_to_move_z_position: true,
                z_position_moved_time: 0,
                stack_cycling_mode: StackCyclingMode::PerStack,
                channels: vec![1],
                current_channel_in_list: 0,
                restore: None,
            })),
            data: None,
        }
    }

    fn update_channel(&mut self, cx: &mut SignalContext<'_>) {
        self.current_channel_in_list = (self.current_channel_in_list + 1) % self.channels.len();
        cx.state.target_channel = self.channels[self.current_channel_in_list];
    }

    /// First z/f of the current position's stack.
    fn rehome_stack(&mut self) {
        self.current_z_position =
            self.start_z_position + self.positions[self.current_position_idx].z;
        self.current_focus_position =
            self.start_focus + self.positions[self.current_position_idx].f;
    }
}

impl SignalHandler for ZStackAcquisition {
    fn init(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<()> {
        let microscope = &cx.settings.microscope;

        self.stack_cycling_mode = microscope.stack_cycling_mode;
        self.channels = microscope.selected_channels();
        if self.channels.is_empty() {
            return Err(EngineError::Configuration(
                "z-stack needs at least one selected channel".into(),
            ));
        }
        self.current_channel_in_list = 0;

        self.number_z_steps = microscope.number_z_steps;
        if self.number_z_steps == 0 {
            return Err(EngineError::Configuration(
                "z-stack needs number_z_steps > 0".into(),
            ));
        }

        self.start_z_position = microscope.start_position;
        self.z_step_size = microscope.step_size;
        self.start_focus = microscope.start_focus;
        self.focus_step_size =
            (microscope.end_focus - microscope.start_focus) / f64::from(self.number_z_steps);

        self.timepoints = microscope.timepoints;

        self.positions = if microscope.is_multiposition {
            microscope.stage_positions.clone()
        } else {
            vec![cx.settings.stage]
        };
        if self.positions.is_empty() {
            return Err(EngineError::Configuration(
                "z-stack multiposition list is empty".into(),
            ));
        }

        self.current_position_idx = 0;
        self.z_position_moved_time = 0;
        self.need_to_move_new_position = true;
        self.need_to_move_z_position = true;
        self.rehome_stack();

        self.restore = if microscope.is_multiposition {
            None
        } else {
            let stage = cx.scope.stage();
            Some((stage.position('z'), stage.position('f')))
        };
        Ok(())
    }

    fn main(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        if cx.stop_requested() {
            return Ok(false);
        }

        if self.need_to_move_new_position {
            self.need_to_move_new_position = false;

            let position = self.positions[self.current_position_idx];
            cx.pause_data_thread();
            cx.move_stage(
                &[('x', position.x), ('y', position.y), ('r', position.theta)],
                true,
            );
            cx.resume_data_thread();
        }

        if self.need_to_move_z_position {
            cx.pause_data_thread();
            cx.move_stage(
                &[('z', self.current_z_position), ('f', self.current_focus_position)],
                true,
            );
            cx.resume_data_thread();
        }

        if self.stack_cycling_mode == StackCyclingMode::PerSlice {
            // switch channel at every slice; advance z only after each
            // channel has seen the current slice
            self.update_channel(cx);
            self.need_to_move_z_position = self.current_channel_in_list == 0;
        }

        if self.need_to_move_z_position {
            self.current_z_position += self.z_step_size;
            self.current_focus_position += self.focus_step_size;
            self.z_position_moved_time += 1;
        }

        Ok(true)
    }

    fn end(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        if cx.stop_requested() {
            return Ok(true);
        }

        if self.z_position_moved_time >= self.number_z_steps {
            self.z_position_moved_time = 0;
            self.rehome_stack();

            if self.stack_cycling_mode == StackCyclingMode::PerStack {
                self.update_channel(cx);
                // all channels done at this position, move on
                if self.current_channel_in_list == 0 {
                    self.need_to_move_new_position = true;
                }
            } else {
                self.need_to_move_new_position = true;
            }

            if self.need_to_move_new_position {
                self.current_position_idx += 1;
                if self.current_position_idx == self.positions.len() {
                    self.timepoints -= 1;
                    self.current_position_idx = 0;
                }
                self.rehome_stack();
            }
        }

        if self.timepoints == 0 {
            if let Some((z, f)) = self.restore {
                debug!(z, f, "restoring pre-stack z and focus");
                cx.move_stage(&[('z', z), ('f', f)], true);
            }
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelSettings, Settings};
    use crate::hardware::Stage;
    use crate::test_support::Harness;

    fn stack_settings(channels: u32, z_steps: u32, timepoints: u32) -> Settings {
        let mut settings = Settings::default();
        settings.microscope.channels = (1..=channels)
            .map(|id| ChannelSettings {
                id,
                is_selected: true,
                camera_exposure_ms: 10.0,
                defocus: 0.0,
            })
            .collect();
        settings.microscope.number_z_steps = z_steps;
        settings.microscope.start_position = 0.0;
        settings.microscope.end_position = f64::from(z_steps);
        settings.microscope.step_size = 1.0;
        settings.microscope.timepoints = timepoints;
        settings
    }

    fn drive_to_completion(harness: &Harness, handler: &mut dyn SignalHandler) -> u32 {
        let mut ticks = 0;
        harness.with_signal_cx(|cx| {
            handler.init(cx).expect("init");
            loop {
                handler.main(cx).expect("main");
                ticks += 1;
                if handler.end(cx).expect("end") {
                    break;
                }
                assert!(ticks < 10_000, "z-stack never completed");
            }
        });
        ticks
    }

    #[test]
    fn per_stack_two_channels_three_slices_takes_six_ticks() {
        let settings = stack_settings(2, 3, 1);
        let harness = Harness::with_settings(settings);
        let pair = ZStackAcquisition::build();
        let mut handler = pair.signal.expect("signal side");

        let ticks = drive_to_completion(&harness, handler.as_mut());
        assert_eq!(ticks, 6);
    }

    #[test]
    fn total_ticks_scale_with_every_dimension() {
        // 1 position x 2 timepoints x 3 channels x 4 z steps
        let settings = stack_settings(3, 4, 2);
        let harness = Harness::with_settings(settings);
        let pair = ZStackAcquisition::build();
        let mut handler = pair.signal.expect("signal side");

        let ticks = drive_to_completion(&harness, handler.as_mut());
        assert_eq!(ticks, 2 * 3 * 4);
    }

    #[test]
    fn per_slice_cycles_channel_every_tick() {
        let mut settings = stack_settings(2, 2, 1);
        settings.microscope.stack_cycling_mode = StackCyclingMode::PerSlice;
        let harness = Harness::with_settings(settings);
        let pair = ZStackAcquisition::build();
        let mut handler = pair.signal.expect("signal side");

        let mut observed = Vec::new();
        harness.with_signal_cx(|cx| {
            handler.init(cx).expect("init");
            loop {
                handler.main(cx).expect("main");
                observed.push(cx.state.target_channel);
                if handler.end(cx).expect("end") {
                    break;
                }
            }
        });
        // channel toggles at every slice rather than per stack
        assert_eq!(observed, vec![2, 1, 2, 1]);
    }

    #[test]
    fn positions_cycle_before_timepoints_decrement() {
        let mut settings = stack_settings(1, 2, 2);
        settings.microscope.is_multiposition = true;
        settings.microscope.stage_positions = vec![
            StageParameters {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                theta: 0.0,
                f: 0.0,
            },
            StageParameters {
                x: 100.0,
                y: 50.0,
                z: 0.0,
                theta: 0.0,
                f: 0.0,
            },
        ];
        let harness = Harness::with_settings(settings);
        let pair = ZStackAcquisition::build();
        let mut handler = pair.signal.expect("signal side");

        let ticks = drive_to_completion(&harness, handler.as_mut());
        assert_eq!(ticks, 2 * 2 * 2, "P x T x C x Z");

        // XY moves: one per (position, timepoint), positions exhausted
        // before the timepoint counter drops
        let moves = harness.stage().move_log();
        let xy_targets: Vec<f64> = moves
            .iter()
            .filter(|(axis, _)| *axis == 'x')
            .map(|&(_, target)| target)
            .collect();
        assert_eq!(xy_targets, vec![0.0, 100.0, 0.0, 100.0]);
    }

    #[test]
    fn z_restored_when_not_multiposition() {
        let settings = stack_settings(1, 3, 1);
        let harness = Harness::with_settings(settings);
        harness.stage().move_axis_absolute('z', 42.0, true);
        harness.stage().move_axis_absolute('f', 7.0, true);

        let pair = ZStackAcquisition::build();
        let mut handler = pair.signal.expect("signal side");
        drive_to_completion(&harness, handler.as_mut());

        assert_eq!(harness.stage().position('z'), 42.0);
        assert_eq!(harness.stage().position('f'), 7.0);
    }
}
