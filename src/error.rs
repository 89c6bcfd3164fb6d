//! Custom error types for the acquisition engine.
//!
//! This module defines the primary error type, `EngineError`, used across the
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify the failure modes of an acquisition run:
//!
//! - **`Configuration`**: a required setting is missing or malformed. Raised
//!   at node `init`, before any hardware motion is issued.
//! - **`QueueTimeout`**: a bounded handoff-queue read between the signal and
//!   data threads exceeded its deadline. Fatal to the enclosing feature, not
//!   to the whole acquisition (unless that feature is the only one running).
//! - **`ScanTimeout`**: a constant-velocity scan never reported reaching its
//!   programmed stop position within the bounded poll budget.
//! - **`Aborted`**: the shared stop flag was raised externally.
//! - **`Hook`**: a node hook failed; carries the node name so the aggregated
//!   failure reported by the executor identifies the culprit.
//! - **`UnknownFeature`**: a feature descriptor named something the registry
//!   has no constructor for.
//!
//! Hardware move failures are deliberately *not* represented here: an
//! out-of-bounds move is signaled by a sentinel `false` return from
//! [`crate::hardware::Stage::move_axis_absolute`] and recovered locally by
//! the calling node.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Everything that can go wrong during an acquisition run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required setting is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bounded inter-thread handoff read exceeded its deadline.
    #[error("Handoff queue timeout in feature '{feature}' after {waited:?}")]
    QueueTimeout { feature: &'static str, waited: Duration },

    /// A constant-velocity scan never reported its stop position.
    #[error("Constant-velocity scan on axis '{axis}' did not reach its stop position")]
    ScanTimeout { axis: char },

    /// The shared stop flag was raised, or a worker thread panicked.
    #[error("Acquisition aborted")]
    Aborted,

    /// A node hook failed; carries the node name for the aggregated report.
    #[error("Hook failure in node '{node}': {source}")]
    Hook {
        node: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A feature descriptor named something the registry cannot build.
    #[error("Unknown feature '{0}'")]
    UnknownFeature(String),
}

impl EngineError {
    /// Whether this error terminates only the enclosing feature.
    ///
    /// Feature-scoped errors close the failing node (its `cleanup` hook runs)
    /// and let the rest of the program continue; everything else aborts the
    /// whole acquisition.
    pub fn is_feature_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::QueueTimeout { .. } | EngineError::ScanTimeout { .. }
        )
    }

    /// Wrap this error with the name of the node whose hook raised it.
    pub fn in_node(self, node: &str) -> Self {
        EngineError::Hook {
            node: node.to_string(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_timeout_is_feature_scoped() {
        let err = EngineError::QueueTimeout {
            feature: "autofocus",
            waited: Duration::from_secs(50),
        };
        assert!(err.is_feature_scoped());
        assert!(!EngineError::Aborted.is_feature_scoped());
    }

    #[test]
    fn hook_wrapper_keeps_node_context() {
        let err = EngineError::Configuration("missing channels".into()).in_node("z_stack");
        let msg = err.to_string();
        assert!(msg.contains("z_stack"));
        match err {
            EngineError::Hook { source, .. } => {
                assert!(matches!(*source, EngineError::Configuration(_)));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
