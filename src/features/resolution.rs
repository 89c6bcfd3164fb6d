//! Optical-path resolution switching under the pause handshake.

use crate::context::{AcquisitionEvent, SignalContext};
use crate::error::EngineResult;
use crate::node::{FeaturePair, NodeSpec, SignalHandler};
use tracing::debug;

/// Swap the resolution mode and zoom with the data thread quiesced.
///
/// The pause handshake guarantees no frame captured under the old optical
/// configuration is processed under the new one: the data thread is
/// provably parked for the whole reconfiguration window.
pub struct ChangeResolution {
    resolution_mode: String,
    zoom: String,
}

impl ChangeResolution {
    /// A switch to `resolution_mode`/`zoom`, applied under the pause handshake.
    pub fn build(resolution_mode: impl Into<String>, zoom: impl Into<String>) -> FeaturePair {
        FeaturePair {
            name: "change_resolution",
            spec: NodeSpec::default().device_related(),
            signal: Some(Box::new(Self {
                resolution_mode: resolution_mode.into(),
                zoom: zoom.into(),
            })),
            data: None,
        }
    }
}

impl SignalHandler for ChangeResolution {
    fn main(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        cx.pause_data_thread();

        cx.scope.end_acquisition()?;
        cx.state.resolution_mode = self.resolution_mode.clone();
        cx.state.zoom = self.zoom.clone();
        cx.scope.change_resolution(&self.resolution_mode, &self.zoom)?;
        debug!(resolution = %self.resolution_mode, zoom = %self.zoom, "resolution switched");
        cx.scope.prepare_acquisition()?;
        cx.send_event(AcquisitionEvent::ResolutionChanged {
            resolution: self.resolution_mode.clone(),
            zoom: self.zoom.clone(),
        });

        cx.resume_data_thread();
        Ok(true)
    }

    fn cleanup(&mut self, cx: &mut SignalContext<'_>) {
        // never leave the data thread parked if the switch aborted mid-way
        cx.resume_data_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[test]
    fn switch_applies_and_publishes_event() {
        let harness = Harness::new();
        let pair = ChangeResolution::build("nanoscale", "N/A");
        let mut handler = pair.signal.expect("signal side");

        harness.with_signal_cx(|cx| {
            assert!(handler.main(cx).expect("switch"));
            assert_eq!(cx.state.resolution_mode, "nanoscale");
        });

        let (resolution, zoom) = harness.scope.resolution();
        assert_eq!(resolution, "nanoscale");
        assert_eq!(zoom, "N/A");
        assert!(matches!(
            harness.event_rx.try_recv(),
            Ok(AcquisitionEvent::ResolutionChanged { .. })
        ));
    }
}
