//! Feature nodes: the unit of acquisition logic.
//!
//! A feature contributes a signal-side handler and/or a data-side handler.
//! Handlers are plain traits with default no-op hook bodies, so a feature
//! implements only the hooks it needs — the structural equivalent of
//! optional capability slots.
//!
//! [`SignalNode`] and [`DataNode`] wrap a handler with the per-activation
//! state the executor drives: lazy `init` on first entry, the
//! wait-for-response protocol on the signal side, the `pre-main` frame
//! gate on the data side, and multi-step completion via `end`.

use crate::context::{DataContext, SignalContext};
use crate::error::EngineResult;
use tracing::debug;

/// How often a node's `main` hook runs per activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// `main` executes exactly once per activation
    #[default]
    SingleStep,
    /// `main` loops; `end` decides completion each tick
    MultiStep,
}

/// Scheduling tags attached to a node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSpec {
    /// Single- or multi-step execution
    pub kind: NodeKind,
    /// Executing this node may block on physical hardware motion
    pub device_related: bool,
}

impl NodeSpec {
    /// A node whose `end` hook decides when it is finished.
    pub fn multi_step() -> Self {
        Self {
            kind: NodeKind::MultiStep,
            device_related: false,
        }
    }

    /// Mark the node as issuing hardware motion.
    pub fn device_related(mut self) -> Self {
        self.device_related = true;
        self
    }
}

/// Signal-side lifecycle hooks. All hooks are optional except none: every
/// method has a default body, so a pure data-side feature can use
/// [`NoopSignal`].
pub trait SignalHandler: Send {
    /// Runs once when the node is first entered.
    fn init(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<()> {
        let _ = cx;
        Ok(())
    }

    /// Runs every tick. The returned flag is the node's result value,
    /// gating descent into a nested child program.
    fn main(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        let _ = cx;
        Ok(true)
    }

    /// Whether this handler defines a post-capture response hook.
    fn has_response(&self) -> bool {
        false
    }

    /// Runs after the tick's frame has been captured, when
    /// [`SignalHandler::has_response`] is true.
    fn response(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        let _ = cx;
        Ok(true)
    }

    /// Completion check for multi-step nodes, run every tick after `main`.
    fn end(&mut self, cx: &mut SignalContext<'_>) -> EngineResult<bool> {
        let _ = cx;
        Ok(true)
    }

    /// Always runs on node exit, including abort. Must be idempotent and
    /// safe to call from a partially-moved hardware state.
    fn cleanup(&mut self, cx: &mut SignalContext<'_>) {
        let _ = cx;
    }
}

/// Data-side lifecycle hooks, with default bodies like [`SignalHandler`].
pub trait DataHandler: Send {
    /// Runs once when the node is first entered.
    fn init(&mut self, cx: &mut DataContext<'_>) -> EngineResult<()> {
        let _ = cx;
        Ok(())
    }

    /// Gate: decide whether this tick's frames are addressed to the node.
    fn pre_main(&mut self, cx: &mut DataContext<'_>, frame_ids: &[u64]) -> bool {
        let _ = (cx, frame_ids);
        true
    }

    /// Runs with the frame ids newly published this tick. Returns `None`
    /// while the node is still waiting ("not yet"), or the subset of ids it
    /// has fully processed.
    fn main(
        &mut self,
        cx: &mut DataContext<'_>,
        frame_ids: &[u64],
    ) -> EngineResult<Option<Vec<u64>>> {
        let _ = cx;
        Ok(Some(frame_ids.to_vec()))
    }

    /// Completion check for multi-step nodes.
    fn end(&mut self, cx: &mut DataContext<'_>) -> EngineResult<bool> {
        let _ = cx;
        Ok(true)
    }

    /// Always runs on node exit, including abort. Must be idempotent.
    fn cleanup(&mut self, cx: &mut DataContext<'_>) {
        let _ = cx;
    }
}

/// Signal handler with every hook left at its default.
pub struct NoopSignal;
impl SignalHandler for NoopSignal {}

/// Data handler with every hook left at its default.
pub struct NoopData;
impl DataHandler for NoopData {}

/// A feature's contribution to the two programs.
///
/// This is the sole extension point for feature authors: a name, the node
/// spec, and the two optional handlers (a missing side falls back to the
/// no-op handler so both program trees keep the same shape).
pub struct FeaturePair {
    /// Node name used in logs and error context
    pub name: &'static str,
    /// Kind and device tag shared by both sides
    pub spec: NodeSpec,
    /// Signal-side handler, if any
    pub signal: Option<Box<dyn SignalHandler>>,
    /// Data-side handler, if any
    pub data: Option<Box<dyn DataHandler>>,
}

/// Runtime wrapper around a signal handler.
pub struct SignalNode {
    pub(crate) name: &'static str,
    pub(crate) kind: NodeKind,
    pub(crate) device_related: bool,
    handler: Box<dyn SignalHandler>,
    initialized: bool,
    waiting_response: bool,
    has_response: bool,
}

impl SignalNode {
    pub(crate) fn new(name: &'static str, spec: NodeSpec, handler: Box<dyn SignalHandler>) -> Self {
        // a multi-step node that never blocks on hardware needs a response
        // slot so its end check happens after the capture
        let has_response = handler.has_response()
            || (spec.kind == NodeKind::MultiStep && !spec.device_related);
        Self {
            name,
            kind: spec.kind,
            device_related: spec.device_related,
            handler,
            initialized: false,
            waiting_response: false,
            has_response,
        }
    }

    /// Whether the node has been entered but not yet exited.
    pub(crate) fn is_open(&self) -> bool {
        self.initialized
    }

    /// Drive the node for one tick. Returns `(result, is_end)`.
    pub(crate) fn run(
        &mut self,
        cx: &mut SignalContext<'_>,
        wait_response: bool,
    ) -> EngineResult<(bool, bool)> {
        if !self.initialized {
            debug!(node = self.name, "signal node init");
            self.handler.init(cx)?;
            self.initialized = true;
        }

        let mut result;
        if !wait_response {
            result = self.handler.main(cx)?;
            if self.has_response {
                self.waiting_response = true;
                return Ok((result, false));
            }
        } else if self.waiting_response {
            result = self.handler.response(cx)?;
            self.waiting_response = false;
        } else if self.device_related {
            return Ok((false, false));
        } else {
            result = self.handler.main(cx)?;
            if self.has_response {
                result = self.handler.response(cx)?;
            }
        }

        if self.waiting_response
            || (self.kind == NodeKind::MultiStep && !self.handler.end(cx)?)
        {
            return Ok((result, false));
        }

        self.initialized = false;
        Ok((result, true))
    }

    /// Run the handler's cleanup if the node is still open. No-op otherwise.
    pub(crate) fn cleanup(&mut self, cx: &mut SignalContext<'_>) {
        if self.initialized {
            debug!(node = self.name, "signal node cleanup");
            self.handler.cleanup(cx);
            self.initialized = false;
            self.waiting_response = false;
        }
    }
}

/// Runtime wrapper around a data handler.
pub struct DataNode {
    pub(crate) name: &'static str,
    pub(crate) kind: NodeKind,
    pub(crate) device_related: bool,
    handler: Box<dyn DataHandler>,
    initialized: bool,
}

impl DataNode {
    pub(crate) fn new(name: &'static str, spec: NodeSpec, handler: Box<dyn DataHandler>) -> Self {
        Self {
            name,
            kind: spec.kind,
            device_related: spec.device_related,
            handler,
            initialized: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.initialized
    }

    /// Drive the node for one tick. Returns `(result, is_end)`.
    pub(crate) fn run(
        &mut self,
        cx: &mut DataContext<'_>,
        frame_ids: &[u64],
    ) -> EngineResult<(bool, bool)> {
        if !self.initialized {
            debug!(node = self.name, "data node init");
            self.handler.init(cx)?;
            self.initialized = true;
        }

        if !self.handler.pre_main(cx, frame_ids) {
            return Ok((false, false));
        }

        let result = self
            .handler
            .main(cx, frame_ids)?
            .is_some_and(|ids| !ids.is_empty());

        if self.kind == NodeKind::MultiStep && !self.handler.end(cx)? {
            return Ok((result, false));
        }

        self.initialized = false;
        Ok((result, true))
    }

    pub(crate) fn cleanup(&mut self, cx: &mut DataContext<'_>) {
        if self.initialized {
            debug!(node = self.name, "data node cleanup");
            self.handler.cleanup(cx);
            self.initialized = false;
        }
    }
}
