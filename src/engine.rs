//! The acquisition engine: two worker threads driving the compiled
//! programs.
//!
//! The signal thread owns hardware: per tick it prepares the target
//! channel, advances the signal program's pre-capture pass, captures one
//! frame into the ring buffer, publishes the frame id and runs the
//! post-capture pass. The data thread consumes published ids in order and
//! drives the data program with each new batch. The two threads share
//! nothing but the stop flag, the pause barrier and the frame buffer.
//!
//! Thread lifetime is one call to [`AcquisitionEngine::run`]; both workers
//! are joined before it returns.

use crate::config::Settings;
use crate::container::{DataProgram, SignalProgram};
use crate::context::{
    AcquisitionEvent, AcquisitionState, DataContext, EngineShared, EventSender, SignalContext,
};
use crate::error::{EngineError, EngineResult};
use crate::hardware::MicroscopeControl;
use crate::registry::{FeatureList, FeatureRegistry};
use crate::sync::{PauseBarrier, StopFlag};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-run knobs beyond what [`Settings`] carries.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop the acquisition once this many frames have been consumed
    /// (used by bounded routines such as a standalone autofocus run).
    pub stop_after_frames: Option<u64>,
}

/// Outcome of one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    /// Frames captured and published by the signal thread
    pub frames_produced: u64,
    /// Frames consumed by the data thread
    pub frames_consumed: u64,
}

/// Drives compiled feature programs against one microscope.
pub struct AcquisitionEngine {
    scope: Arc<dyn MicroscopeControl>,
    settings: Arc<Settings>,
    registry: FeatureRegistry,
    events: EventSender,
}

impl AcquisitionEngine {
    /// An engine over `scope` with the built-in feature set.
    pub fn new(
        scope: Arc<dyn MicroscopeControl>,
        settings: Arc<Settings>,
        events: EventSender,
    ) -> Self {
        Self {
            scope,
            settings,
            registry: FeatureRegistry::with_builtins(),
            events,
        }
    }

    /// Replace the feature registry (to add custom features).
    pub fn with_registry(mut self, registry: FeatureRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Compile `features` and run them to completion.
    pub fn run(&self, features: &FeatureList) -> EngineResult<AcquisitionReport> {
        self.run_with(features, &RunOptions::default())
    }

    /// Compile `features` and run them with explicit options.
    pub fn run_with(
        &self,
        features: &FeatureList,
        options: &RunOptions,
    ) -> EngineResult<AcquisitionReport> {
        let (signal_program, data_program) = self.registry.compile(features, &self.settings)?;
        self.run_programs(signal_program, data_program, options)
    }

    fn run_programs(
        &self,
        mut signal_program: SignalProgram,
        mut data_program: DataProgram,
        options: &RunOptions,
    ) -> EngineResult<AcquisitionReport> {
        self.settings.validate()?;
        let (width, height) = self.scope.frame_shape();
        let shared = EngineShared {
            stop: StopFlag::new(),
            pause: PauseBarrier::new(),
            buffer: crate::buffer::FrameBuffer::new(
                self.settings.acquisition.buffer_capacity,
                width,
                height,
            ),
        };

        self.scope.prepare_acquisition()?;
        info!("acquisition started");

        let mut signal_outcome: EngineResult<u64> = Ok(0);
        let mut data_outcome: EngineResult<u64> = Ok(0);

        std::thread::scope(|threads| {
            let signal_worker = threads.spawn(|| {
                self.signal_loop(&shared, &mut signal_program)
            });
            let data_worker = threads.spawn(|| {
                self.data_loop(&shared, &mut data_program, options)
            });

            // a panicking worker leaves the run unrecoverable
            signal_outcome = signal_worker
                .join()
                .unwrap_or_else(|_| Err(EngineError::Aborted));
            data_outcome = data_worker
                .join()
                .unwrap_or_else(|_| Err(EngineError::Aborted));
        });

        if let Err(err) = self.scope.end_acquisition() {
            warn!(error = %err, "failed parking hardware after acquisition");
        }

        let frames_produced = signal_outcome?;
        let frames_consumed = data_outcome?;
        info!(frames_produced, frames_consumed, "acquisition finished");
        Ok(AcquisitionReport {
            frames_produced,
            frames_consumed,
        })
    }

    fn signal_loop(
        &self,
        shared: &EngineShared,
        program: &mut SignalProgram,
    ) -> EngineResult<u64> {
        let mut state = AcquisitionState::from_settings(&self.settings);
        let mut cx = SignalContext {
            state: &mut state,
            scope: self.scope.as_ref(),
            shared,
            settings: &self.settings,
            events: &self.events,
        };
        let result = self.signal_ticks(&mut cx, program);

        // whatever happened, release the data side and close open nodes
        shared.buffer.finish();
        if result.is_err() || shared.stop.is_set() {
            program.abort(&mut cx);
        }
        if let Err(err) = &result {
            error!(error = %err, "signal thread failed");
            shared.stop.set();
        }
        result
    }

    fn signal_ticks(
        &self,
        cx: &mut SignalContext<'_>,
        program: &mut SignalProgram,
    ) -> EngineResult<u64> {
        let mut produced = 0u64;
        loop {
            if cx.stop_requested() {
                debug!("signal thread honoring stop flag");
                break;
            }
            if program.is_complete() {
                break;
            }

            self.prepare_target_channel(cx)?;

            program.run(cx, false)?;

            let frame_id = cx.next_frame_id();
            if !cx.shared.buffer.wait_for_capacity(frame_id, || {
                cx.shared.stop.is_set()
            }) {
                break;
            }

            let position = cx.state.position;
            let channel = self.scope.current_channel();
            cx.shared.buffer.write_slot(frame_id, |slot| {
                slot.position = position;
                slot.channel = channel;
                self.scope.expose(slot)
            })?;
            cx.shared.buffer.publish(frame_id);
            produced += 1;

            program.run(cx, true)?;
        }
        Ok(produced)
    }

    /// Reconfigure hardware when the program retargeted the channel,
    /// applying the channel's defocus offset.
    fn prepare_target_channel(&self, cx: &mut SignalContext<'_>) -> EngineResult<()> {
        let target = cx.state.target_channel;
        if target == self.scope.current_channel() {
            return Ok(());
        }
        self.scope.prepare_channel(target)?;
        let defocus = self
            .settings
            .microscope
            .channel(target)
            .map(|c| c.defocus)
            .unwrap_or(0.0);
        // always re-command the focus axis: a zero-defocus channel must
        // drop the previous channel's offset, not inherit it
        let stage = self.scope.stage();
        stage.move_axis_absolute('f', cx.state.position.f + defocus, true);
        Ok(())
    }

    fn data_loop(
        &self,
        shared: &EngineShared,
        program: &mut DataProgram,
        options: &RunOptions,
    ) -> EngineResult<u64> {
        let mut cx = DataContext {
            scope: self.scope.as_ref(),
            shared,
            settings: &self.settings,
            events: &self.events,
        };
        let result = self.data_ticks(&mut cx, program, options);

        shared.pause.data_exited();
        program.abort(&mut cx);
        if let Err(err) = &result {
            error!(error = %err, "data thread failed");
            shared.stop.set();
        }
        result
    }

    fn data_ticks(
        &self,
        cx: &mut DataContext<'_>,
        program: &mut DataProgram,
        options: &RunOptions,
    ) -> EngineResult<u64> {
        let timeout = Duration::from_millis(self.settings.acquisition.data_poll_timeout_ms);
        let idle_limit = self.settings.acquisition.idle_poll_limit;
        let mut seen = 0u64;
        let mut idle_polls = 0u32;

        loop {
            cx.shared.pause.checkpoint();
            if cx.stop_requested() {
                debug!("data thread honoring stop flag");
                break;
            }

            let frames = cx.shared.buffer.wait_for_frames(seen, timeout);
            if frames.is_empty() {
                if cx.shared.buffer.is_finished() {
                    break;
                }
                idle_polls += 1;
                if idle_polls >= idle_limit {
                    warn!(idle_polls, "data thread giving up after idle polls");
                    break;
                }
                continue;
            }
            idle_polls = 0;

            program.run(cx, &frames)?;

            seen = frames[frames.len() - 1] + 1;
            cx.shared.buffer.mark_consumed(seen);
            for &frame_id in &frames {
                cx.send_event(AcquisitionEvent::FrameReady(frame_id));
            }

            if let Some(budget) = options.stop_after_frames {
                if seen >= budget {
                    debug!(budget, "frame budget reached, stopping acquisition");
                    cx.shared.stop.set();
                    break;
                }
            }
        }
        Ok(seen)
    }
}
