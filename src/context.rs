//! Execution contexts handed to node hooks.
//!
//! Every hook receives an explicit context instead of reaching into global
//! model state: the signal side gets mutable acquisition cursors plus the
//! hardware facade, the data side gets read access to published frames.
//! Ownership of the cursors is enforced by program ordering (exactly one
//! node runs per thread at a time), not by locks.

use crate::buffer::FrameBuffer;
use crate::config::{Settings, StageParameters};
use crate::hardware::MicroscopeControl;
use crate::sync::{PauseBarrier, StopFlag};
use tracing::warn;

/// UI-facing events published on the outbound queue.
///
/// Fire-and-forget: the engine never reads these back. Serializable so an
/// embedding application can forward them over a wire as JSON.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "payload")]
pub enum AcquisitionEvent {
    /// Autofocus sweep finished: `(focus position, entropy)` pairs
    AutofocusPlot(Vec<(f64, f64)>),
    /// A new frame id reached the data thread
    FrameReady(u64),
    /// The resolution switch completed under quiescence
    ResolutionChanged {
        resolution: String,
        zoom: String,
    },
}

/// Outbound event channel.
pub type EventSender = crossbeam_channel::Sender<AcquisitionEvent>;
/// Receiving side handed to the embedding application.
pub type EventReceiver = crossbeam_channel::Receiver<AcquisitionEvent>;

/// Shared engine state both worker threads hold a reference to.
pub struct EngineShared {
    /// Global cancellation flag
    pub stop: StopFlag,
    /// Two-phase pause handshake
    pub pause: PauseBarrier,
    /// Frame ring buffer
    pub buffer: FrameBuffer,
}

/// Acquisition cursors, mutated only by the node owning the current tick.
#[derive(Debug, Clone)]
pub struct AcquisitionState {
    /// Cached absolute stage position
    pub position: StageParameters,
    /// Channel the next frame should be captured with
    pub target_channel: u32,
    /// Active resolution mode name
    pub resolution_mode: String,
    /// Active zoom value
    pub zoom: String,
}

impl AcquisitionState {
    /// Initial cursors derived from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let target_channel = settings
            .microscope
            .selected_channels()
            .first()
            .copied()
            .unwrap_or(1);
        Self {
            position: settings.stage,
            target_channel,
            resolution_mode: settings.microscope.resolution_mode.clone(),
            zoom: settings.microscope.zoom.clone(),
        }
    }
}

/// Context passed to signal-side hooks.
pub struct SignalContext<'a> {
    /// Mutable acquisition cursors
    pub state: &'a mut AcquisitionState,
    /// Hardware facade
    pub scope: &'a dyn MicroscopeControl,
    /// Stop flag, pause barrier, frame buffer
    pub shared: &'a EngineShared,
    /// Read-only run settings
    pub settings: &'a Settings,
    /// Outbound event queue
    pub events: &'a EventSender,
}

impl SignalContext<'_> {
    /// The id of the frame the current tick will capture.
    pub fn next_frame_id(&self) -> u64 {
        self.shared.buffer.next_frame_id()
    }

    /// Whether an abort has been requested.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.is_set()
    }

    /// Move one or more stage axes to absolute positions.
    ///
    /// Out-of-bounds targets are reported by the stage as a sentinel `false`
    /// and treated as a no-op for that axis; the position cursor is updated
    /// only for axes that moved. Returns `true` only if every axis moved.
    pub fn move_stage(&mut self, moves: &[(char, f64)], wait_until_done: bool) -> bool {
        let stage = self.scope.stage();
        let mut all_ok = true;
        for &(axis, target) in moves {
            if stage.move_axis_absolute(axis, target, wait_until_done) {
                match axis {
                    'x' => self.state.position.x = target,
                    'y' => self.state.position.y = target,
                    'z' => self.state.position.z = target,
                    'r' => self.state.position.theta = target,
                    'f' => self.state.position.f = target,
                    other => warn!(axis = %other, "move on unknown axis ignored"),
                }
            } else {
                warn!(axis = %axis, target, "stage rejected move, keeping prior position");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Quiesce the data thread (two-phase handshake, blocks until
    /// acknowledged).
    pub fn pause_data_thread(&self) {
        self.shared.pause.request_pause();
    }

    /// Release the data thread after a pause. Idempotent.
    pub fn resume_data_thread(&self) {
        self.shared.pause.resume();
    }

    /// Publish a UI event; drops silently if the receiver is gone.
    pub fn send_event(&self, event: AcquisitionEvent) {
        let _ = self.events.send(event);
    }
}

/// Context passed to data-side hooks.
pub struct DataContext<'a> {
    /// Hardware facade (read-only use)
    pub scope: &'a dyn MicroscopeControl,
    /// Stop flag, pause barrier, frame buffer
    pub shared: &'a EngineShared,
    /// Read-only run settings
    pub settings: &'a Settings,
    /// Outbound event queue
    pub events: &'a EventSender,
}

impl DataContext<'_> {
    /// Whether an abort has been requested.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.is_set()
    }

    /// Read a published frame slot, if it still holds `frame_id`.
    pub fn with_frame<R>(
        &self,
        frame_id: u64,
        f: impl FnOnce(&crate::buffer::FrameSlot) -> R,
    ) -> Option<R> {
        self.shared.buffer.with_frame(frame_id, f)
    }

    /// Publish a UI event; drops silently if the receiver is gone.
    pub fn send_event(&self, event: AcquisitionEvent) {
        let _ = self.events.send(event);
    }
}

/// Create the outbound event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
