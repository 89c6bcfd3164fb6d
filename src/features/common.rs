//! Small single-purpose features: frame logging and cross-thread gating.

use crate::context::{DataContext, SignalContext};
use crate::error::EngineResult;
use crate::node::{DataHandler, FeaturePair, NodeSpec, SignalHandler};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Log every captured frame id with its channel. Data side only.
pub struct Snap;

impl Snap {
    /// A data-only logging node.
    pub fn build() -> FeaturePair {
        FeaturePair {
            name: "snap",
            spec: NodeSpec::default(),
            signal: None,
            data: Some(Box::new(SnapData)),
        }
    }
}

struct SnapData;

impl DataHandler for SnapData {
    fn main(
        &mut self,
        cx: &mut DataContext<'_>,
        frame_ids: &[u64],
    ) -> EngineResult<Option<Vec<u64>>> {
        info!(channel = cx.scope.current_channel(), ?frame_ids, "snap");
        Ok(Some(frame_ids.to_vec()))
    }
}

/// Holds the data program at this node until the frame allocated by the
/// matching signal tick has actually been captured.
///
/// Placing one of these between two features keeps the data side from
/// racing ahead into a region of the program whose frames do not exist
/// yet.
pub struct WaitToContinue;

impl WaitToContinue {
    /// Paired gate: the signal side releases, the data side waits.
    pub fn build() -> FeaturePair {
        let released = Arc::new(AtomicBool::new(false));
        let target_frame = Arc::new(AtomicU64::new(u64::MAX));
        FeaturePair {
            name: "wait_to_continue",
            spec: NodeSpec::default(),
            signal: Some(Box::new(WaitSignal {
                released: Arc::clone(&released),
                target_frame: Arc::clone(&target_frame),
            })),
            data: Some(Box::new(WaitData {
                released,
                target_frame,
            })),
        }
    }
}

struct WaitSignal {
    released: Arc<AtomicBool>,
    target_frame: Arc<AtomicU64>,
}

impl SignalHandler for WaitSignal {
    fn main(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        self.target_frame.store(cx.next_frame_id(), Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

struct WaitData {
    released: Arc<AtomicBool>,
    target_frame: Arc<AtomicU64>,
}

impl DataHandler for WaitData {
    fn pre_main(&mut self, _cx: &mut DataContext<'_>, frame_ids: &[u64]) -> bool {
        self.released.load(Ordering::SeqCst)
            && frame_ids.contains(&self.target_frame.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_gate_opens_only_for_the_target_frame() {
        let pair = WaitToContinue::build();
        let mut signal = pair.signal.expect("signal side");
        let mut data = pair.data.expect("data side");

        let harness = crate::test_support::Harness::new();
        // before the signal tick the gate is closed
        harness.with_data_cx(|cx| {
            assert!(!data.pre_main(cx, &[0, 1]));
        });

        harness.with_signal_cx(|cx| {
            signal.main(cx).expect("signal main");
        });

        harness.with_data_cx(|cx| {
            assert!(!data.pre_main(cx, &[5]), "wrong frame keeps the gate shut");
            assert!(data.pre_main(cx, &[0]), "target frame opens the gate");
        });
    }
}
