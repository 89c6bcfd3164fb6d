//! Feature container: compiles feature lists into executable programs.
//!
//! A feature list is an ordered list of sublists. Within a sublist,
//! consecutive features are siblings (a sequence); the first feature of
//! each following sublist becomes the child of the previous sublist's last
//! node, forming a child/sibling tree. A multi-step parent therefore
//! repeats its nested child program until its own `end` hook reports
//! completion.
//!
//! [`compile`] produces two parallel programs over that tree — one for the
//! signal thread, one for the data thread — with identical shape.
//! Execution order is deterministic: a dry run of the same feature list
//! always visits nodes in the same order.
//!
//! # Error policy
//!
//! A feature-scoped failure (handoff-queue or scan timeout) closes only
//! the failing node: its `cleanup` hook runs, the program advances to its
//! sibling, and the stage stays wherever the last issued command left it.
//! If no sibling exists the failure is terminal. Any other hook error
//! aborts the whole program: every still-open node's `cleanup` runs in
//! reverse activation order and one aggregated error carrying the node
//! name is reported.

use crate::context::{DataContext, SignalContext};
use crate::error::EngineResult;
use crate::node::{DataNode, FeaturePair, NoopData, NoopSignal, SignalNode};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    sibling: Option<usize>,
    child: Option<usize>,
}

/// Compile a feature list into the two thread programs.
///
/// `number_of_execution` is how many times the signal program repeats the
/// whole tree before flagging completion (normally 1).
pub fn compile(
    features: Vec<Vec<FeaturePair>>,
    number_of_execution: u32,
) -> (SignalProgram, DataProgram) {
    let mut signal_nodes = Vec::new();
    let mut data_nodes = Vec::new();
    let mut links: Vec<Links> = Vec::new();

    let mut previous: Option<usize> = None;
    for sublist in features {
        let mut first_in_sublist = true;
        for pair in sublist {
            let index = links.len();
            let signal = pair.signal.unwrap_or_else(|| Box::new(NoopSignal));
            let data = pair.data.unwrap_or_else(|| Box::new(NoopData));
            signal_nodes.push(SignalNode::new(pair.name, pair.spec, signal));
            data_nodes.push(DataNode::new(pair.name, pair.spec, data));
            links.push(Links::default());

            if let Some(prev) = previous {
                if first_in_sublist {
                    links[prev].child = Some(index);
                } else {
                    links[prev].sibling = Some(index);
                }
            }
            previous = Some(index);
            first_in_sublist = false;
        }
    }

    let root = if links.is_empty() { None } else { Some(0) };
    (
        SignalProgram {
            nodes: signal_nodes,
            links: links.clone(),
            root,
            current: None,
            end_flag: root.is_none(),
            number_of_execution,
            remaining_executions: number_of_execution,
        },
        DataProgram {
            nodes: data_nodes,
            links,
            root,
            current: None,
        },
    )
}

/// The signal thread's program: one traversal step per call to [`run`].
///
/// [`run`]: SignalProgram::run
pub struct SignalProgram {
    nodes: Vec<SignalNode>,
    links: Vec<Links>,
    root: Option<usize>,
    current: Option<usize>,
    end_flag: bool,
    number_of_execution: u32,
    remaining_executions: u32,
}

impl SignalProgram {
    /// Whether the program has flagged completion.
    pub fn is_complete(&self) -> bool {
        self.end_flag
    }

    /// Rewind for another acquisition run.
    pub fn reset(&mut self) {
        self.current = None;
        self.end_flag = self.root.is_none();
        self.remaining_executions = self.number_of_execution;
    }

    /// Advance the program for one tick.
    ///
    /// `wait_response` distinguishes the post-capture pass (response hooks)
    /// from the pre-capture pass (main hooks).
    pub fn run(&mut self, cx: &mut SignalContext<'_>, wait_response: bool) -> EngineResult<()> {
        if self.end_flag {
            return Ok(());
        }
        let Some(root) = self.root else {
            self.end_flag = true;
            return Ok(());
        };

        let mut wait_response = wait_response;
        'descend: loop {
            if self.current.is_none() {
                self.current = Some(root);
            }

            let mut result;
            let last = loop {
                let Some(index) = self.current else {
                    return Ok(());
                };
                let (node_result, is_end) = match self.nodes[index].run(cx, wait_response) {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_feature_scoped() => {
                        let name = self.nodes[index].name;
                        self.nodes[index].cleanup(cx);
                        if let Some(sibling) = self.links[index].sibling {
                            warn!(node = name, error = %err, "feature failed, skipping to next node");
                            self.current = Some(sibling);
                            if self.nodes[sibling].device_related {
                                return Ok(());
                            }
                            continue;
                        }
                        // nothing else left to run: the failure is terminal
                        self.end_flag = true;
                        return Err(err.in_node(name));
                    }
                    Err(err) => {
                        let name = self.nodes[index].name;
                        self.abort(cx);
                        return Err(err.in_node(name));
                    }
                };
                result = node_result;
                if !is_end {
                    return Ok(());
                }
                match self.links[index].sibling {
                    None => break index,
                    Some(sibling) => {
                        self.current = Some(sibling);
                        if self.nodes[sibling].device_related {
                            return Ok(());
                        }
                    }
                }
            };

            if result {
                if let Some(child) = self.links[last].child {
                    self.current = Some(child);
                    if self.nodes[child].device_related {
                        return Ok(());
                    }
                    wait_response = false;
                    continue 'descend;
                }
            }

            self.current = None;
            if self.remaining_executions > 0 {
                self.remaining_executions -= 1;
                self.end_flag = self.remaining_executions == 0;
            }
            return Ok(());
        }
    }

    /// Abort: close every still-open node in reverse activation order.
    ///
    /// Nodes are stored in traversal order, so reverse index order is
    /// reverse activation order. Idempotent: already-clean nodes are
    /// untouched.
    pub fn abort(&mut self, cx: &mut SignalContext<'_>) {
        for node in self.nodes.iter_mut().rev() {
            if node.is_open() {
                debug!(node = node.name, "closing open signal node on abort");
            }
            node.cleanup(cx);
        }
        self.current = None;
        self.end_flag = true;
    }
}

/// The data thread's program, driven with each tick's new frame ids.
pub struct DataProgram {
    nodes: Vec<DataNode>,
    links: Vec<Links>,
    root: Option<usize>,
    current: Option<usize>,
}

impl DataProgram {
    /// Advance the program for one tick with the newly published ids.
    pub fn run(&mut self, cx: &mut DataContext<'_>, frame_ids: &[u64]) -> EngineResult<()> {
        let Some(root) = self.root else {
            return Ok(());
        };

        'descend: loop {
            if self.current.is_none() {
                self.current = Some(root);
            }

            let mut result;
            let last = loop {
                let Some(index) = self.current else {
                    return Ok(());
                };
                let (node_result, is_end) = match self.nodes[index].run(cx, frame_ids) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let name = self.nodes[index].name;
                        self.abort(cx);
                        return Err(err.in_node(name));
                    }
                };
                result = node_result;
                if !is_end {
                    return Ok(());
                }
                match self.links[index].sibling {
                    None => break index,
                    Some(sibling) => {
                        self.current = Some(sibling);
                        if self.nodes[sibling].device_related {
                            return Ok(());
                        }
                    }
                }
            };

            if result {
                if let Some(child) = self.links[last].child {
                    self.current = Some(child);
                    if self.nodes[child].device_related {
                        return Ok(());
                    }
                    continue 'descend;
                }
            }

            self.current = None;
            return Ok(());
        }
    }

    /// Close every still-open node in reverse activation order. Idempotent.
    pub fn abort(&mut self, cx: &mut DataContext<'_>) {
        for node in self.nodes.iter_mut().rev() {
            if node.is_open() {
                debug!(node = node.name, "closing open data node on abort");
            }
            node.cleanup(cx);
        }
        self.current = None;
    }
}
