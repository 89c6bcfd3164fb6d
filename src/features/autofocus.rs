//! Coarse-then-fine focus search scored by DCT Shannon entropy.
//!
//! The signal side steps the focus axis through the coarse candidates,
//! pushing a `(frame_id, steps_remaining, position)` tuple into the
//! handoff queue per requested move. The data side pulls tuples, waits
//! for the named frame to land in the buffer, scores it and tracks the
//! running maximum; when a phase's candidates are exhausted it hands the
//! best position back through a second queue, on which the signal side
//! blocks (bounded) before centering the fine phase there. The closing
//! tick moves the stage to the overall winner.

use crate::analysis::normalized_dct_shannon_entropy;
use crate::context::{AcquisitionEvent, DataContext, SignalContext};
use crate::error::{EngineError, EngineResult};
use crate::node::{DataHandler, FeaturePair, NodeSpec, SignalHandler};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info};

/// `(frame_id, steps_remaining, focus_position)` handed signal -> data.
type FrameTicket = (u64, u32, f64);

/// Number of candidate positions and the centering offset for one phase.
fn phase_steps(range: f64, step_size: f64) -> (u32, f64) {
    let steps = (range / step_size).floor() as u32 + 1;
    let pos_offset = f64::from(steps / 2) * step_size + step_size;
    (steps, pos_offset)
}

/// Frames one full search requests, given the selected phases.
fn total_frames(settings: &crate::config::AutofocusSettings) -> u32 {
    let mut frames = 0;
    if settings.coarse_selected {
        frames += phase_steps(settings.coarse_range, settings.coarse_step_size).0;
    }
    if settings.fine_selected {
        frames += phase_steps(settings.fine_range, settings.fine_step_size).0;
    }
    frames
}

/// Coarse/fine focus search driven by the DCT entropy metric.
pub struct Autofocus;

impl Autofocus {
    /// Both thread sides sharing the frame-ticket and best-position queues.
    pub fn build() -> FeaturePair {
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<FrameTicket>();
        let (pos_tx, pos_rx) = crossbeam_channel::unbounded::<f64>();
        FeaturePair {
            name: "autofocus",
            spec: NodeSpec::multi_step().device_related(),
            signal: Some(Box::new(AutofocusSignal {
                frame_queue: frame_tx,
                pos_queue: pos_rx,
                total_frame_num: 0,
                coarse_steps: 0,
                coarse_step_size: 0.0,
                fine_step_size: 0.0,
                fine_pos_offset: 0.0,
                init_pos: 0.0,
                signal_id: 0,
                timeout: Duration::ZERO,
            })),
            data: Some(Box::new(AutofocusData {
                frame_queue: frame_rx,
                pos_queue: pos_tx,
                total_frame_num: 0,
                frames_seen: 0,
                pending: None,
                max_entropy: 0.0,
                best_pos: 0.0,
                plot_data: Vec::new(),
            })),
        }
    }
}

struct AutofocusSignal {
    frame_queue: Sender<FrameTicket>,
    pos_queue: Receiver<f64>,
    total_frame_num: u32,
    coarse_steps: u32,
    coarse_step_size: f64,
    fine_step_size: f64,
    fine_pos_offset: f64,
    init_pos: f64,
    signal_id: u32,
    timeout: Duration,
}

impl AutofocusSignal {
    fn best_position(&self) -> EngineResult<f64> {
        self.pos_queue
            .recv_timeout(self.timeout)
            .map_err(|_| EngineError::QueueTimeout {
                feature: "autofocus",
                waited: self.timeout,
            })
    }
}

impl SignalHandler for AutofocusSignal {
    fn init(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<()> {
        let settings = &cx.settings.autofocus;
        if !settings.coarse_selected && !settings.fine_selected {
            return Err(EngineError::Configuration(
                "autofocus needs at least one phase selected".into(),
            ));
        }

        let focus_pos = cx.state.position.f;
        self.total_frame_num = total_frames(settings);
        self.coarse_steps = 0;
        self.init_pos = 0.0;
        if settings.fine_selected {
            self.fine_step_size = settings.fine_step_size;
            let (_, fine_pos_offset) = phase_steps(settings.fine_range, settings.fine_step_size);
            self.fine_pos_offset = fine_pos_offset;
            self.init_pos = focus_pos - fine_pos_offset;
        }
        if settings.coarse_selected {
            self.coarse_step_size = settings.coarse_step_size;
            let (coarse_steps, coarse_pos_offset) =
                phase_steps(settings.coarse_range, settings.coarse_step_size);
            self.coarse_steps = coarse_steps;
            self.init_pos = focus_pos - coarse_pos_offset;
        }
        self.signal_id = 0;
        self.timeout =
            Duration::from_secs(u64::from(self.coarse_steps.max(1)) * settings.handoff_timeout_secs);
        Ok(())
    }

    fn main(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        if self.signal_id < self.coarse_steps {
            // coarse phase
            self.init_pos += self.coarse_step_size;
            cx.move_stage(&[('f', self.init_pos)], true);
            let _ = self.frame_queue.send((
                cx.next_frame_id(),
                self.coarse_steps - self.signal_id,
                self.init_pos,
            ));
        } else if self.signal_id < self.total_frame_num {
            // fine phase, centered on the best coarse position
            if self.signal_id > 0 && self.signal_id == self.coarse_steps {
                self.init_pos = self.best_position()? - self.fine_pos_offset;
            }
            self.init_pos += self.fine_step_size;
            cx.move_stage(&[('f', self.init_pos)], true);
            let _ = self.frame_queue.send((
                cx.next_frame_id(),
                self.total_frame_num - self.signal_id,
                self.init_pos,
            ));
        } else {
            // all candidates scored, settle on the winner
            self.init_pos = self.best_position()?;
            info!(position = self.init_pos, "autofocus best position");
            cx.move_stage(&[('f', self.init_pos)], true);
        }

        self.signal_id += 1;
        Ok(true)
    }

    fn end(&mut self, _cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        Ok(self.signal_id > self.total_frame_num)
    }
}

struct AutofocusData {
    frame_queue: Receiver<FrameTicket>,
    pos_queue: Sender<f64>,
    total_frame_num: u32,
    frames_seen: u32,
    pending: Option<FrameTicket>,
    max_entropy: f64,
    best_pos: f64,
    plot_data: Vec<(f64, f64)>,
}

impl DataHandler for AutofocusData {
    fn init(&mut self, cx: &mut DataContext<'_>) -> EngineResult<()> {
        self.total_frame_num = total_frames(&cx.settings.autofocus);
        self.frames_seen = 0;
        self.pending = None;
        self.max_entropy = 0.0;
        self.best_pos = 0.0;
        self.plot_data.clear();
        Ok(())
    }

    fn main(
        &mut self,
        cx: &mut DataContext<'_>,
        frame_ids: &[u64],
    ) -> EngineResult<Option<Vec<u64>>> {
        self.frames_seen += frame_ids.len() as u32;
        let psf_support = cx.settings.autofocus.psf_support_diameter;

        loop {
            if self.pending.is_none() {
                self.pending = self.frame_queue.try_recv().ok();
            }
            let Some((frame_id, steps_remaining, focus_pos)) = self.pending else {
                break;
            };
            if !frame_ids.contains(&frame_id) {
                // requested frame not captured yet, try again next tick
                break;
            }

            let entropy = cx
                .with_frame(frame_id, |slot| {
                    normalized_dct_shannon_entropy(
                        &slot.pixels,
                        slot.width,
                        slot.height,
                        psf_support,
                    )
                })
                .unwrap_or(0.0);
            debug!(frame_id, focus = focus_pos, entropy, "autofocus score");
            self.plot_data.push((focus_pos, entropy));

            if entropy > self.max_entropy {
                self.max_entropy = entropy;
                self.best_pos = focus_pos;
            }
            self.pending = None;

            if steps_remaining == 1 {
                // phase finished, hand the winner back to the signal side
                info!(
                    entropy = self.max_entropy,
                    position = self.best_pos,
                    "autofocus phase best"
                );
                let _ = self.pos_queue.send(self.best_pos);
            }
        }

        if self.frames_seen > self.total_frame_num {
            Ok(Some(frame_ids.to_vec()))
        } else {
            Ok(None)
        }
    }

    fn end(&mut self, cx: &mut DataContext<'_>) -> EngineResult<bool> {
        if self.frames_seen <= self.total_frame_num {
            return Ok(false);
        }
        cx.send_event(AcquisitionEvent::AutofocusPlot(std::mem::take(
            &mut self.plot_data,
        )));
        Ok(true)
    }
}
