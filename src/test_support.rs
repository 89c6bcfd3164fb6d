//! Shared fixtures for unit tests.

use crate::buffer::FrameBuffer;
use crate::config::Settings;
use crate::context::{
    event_channel, AcquisitionState, DataContext, EventReceiver, EventSender, SignalContext,
};
use crate::hardware::mock::{MockMicroscope, MockStage};
use crate::sync::{PauseBarrier, StopFlag};
use std::cell::RefCell;
use std::sync::Arc;

/// Everything a node hook needs, wired to mock hardware.
pub struct Harness {
    /// Mock microscope the contexts talk to
    pub scope: MockMicroscope,
    /// Stop flag, pause barrier and frame buffer
    pub shared: crate::context::EngineShared,
    /// Settings visible through the contexts
    pub settings: Settings,
    /// Outbound event side
    pub events: EventSender,
    /// Receiving end for event assertions
    pub event_rx: EventReceiver,
    state: RefCell<AcquisitionState>,
}

impl Harness {
    /// A harness over default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// A harness over the given settings and a 16x16 mock.
    pub fn with_settings(settings: Settings) -> Self {
        let scope = MockMicroscope::new(16, 16);
        Self::with_parts(settings, scope)
    }

    /// A harness over an explicitly built mock.
    pub fn with_parts(settings: Settings, scope: MockMicroscope) -> Self {
        let (events, event_rx) = event_channel();
        let state = RefCell::new(AcquisitionState::from_settings(&settings));
        // no data thread runs in unit fixtures; keep pause requests from
        // blocking forever
        let pause = PauseBarrier::new();
        pause.data_exited();
        Self {
            scope,
            shared: crate::context::EngineShared {
                stop: StopFlag::new(),
                pause,
                buffer: FrameBuffer::new(16, 16, 16),
            },
            settings,
            events,
            event_rx,
            state,
        }
    }

    /// The mock stage, for move-log assertions.
    pub fn stage(&self) -> Arc<MockStage> {
        self.scope.mock_stage()
    }

    /// Run `f` with a signal context borrowing the harness state.
    pub fn with_signal_cx<R>(&self, f: impl FnOnce(&mut SignalContext<'_>) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let mut cx = SignalContext {
            state: &mut state,
            scope: &self.scope,
            shared: &self.shared,
            settings: &self.settings,
            events: &self.events,
        };
        f(&mut cx)
    }

    /// Run `f` with a data context borrowing the harness state.
    pub fn with_data_cx<R>(&self, f: impl FnOnce(&mut DataContext<'_>) -> R) -> R {
        let mut cx = DataContext {
            scope: &self.scope,
            shared: &self.shared,
            settings: &self.settings,
            events: &self.events,
        };
        f(&mut cx)
    }
}
