//! Failure boundary between a connection and whoever manages node health.
//!
//! The connection only reports; deciding whether to rebuild, retry or give
//! up on a node belongs to the [`FailureHandler`].

use std::fmt;

use memtls_common::FailureMode;
use tracing::warn;

/// Transport-fatal failure on one node's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Address of the node the connection pointed at.
    pub node: String,
    /// Rendered error that broke the connection.
    pub error: String,
    /// Configured policy for this node.
    pub mode: FailureMode,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {} (mode {:?})", self.node, self.error, self.mode)
    }
}

/// What to do with a node after its connection broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Drop the connection and open a fresh one on next use.
    Reconnect,
    /// Stop using the node; later calls fail fast.
    Discard,
}

/// Receives connection failures.
pub trait FailureHandler: Send + Sync {
    fn on_connection_failure(&self, failure: &NodeFailure) -> FailureAction;
}

/// Maps the configured [`FailureMode`] to an action: `Cancel` discards the
/// node, `Retry` and `Redistribute` reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeFailureHandler;

impl FailureHandler for ModeFailureHandler {
    fn on_connection_failure(&self, failure: &NodeFailure) -> FailureAction {
        warn!(
            node = %failure.node,
            error = %failure.error,
            mode = ?failure.mode,
            "node connection failed"
        );
        match failure.mode {
            FailureMode::Cancel => FailureAction::Discard,
            FailureMode::Retry | FailureMode::Redistribute => FailureAction::Reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(mode: FailureMode) -> NodeFailure {
        NodeFailure {
            node: "127.0.0.1:11211".into(),
            error: "tls connection is closed".into(),
            mode,
        }
    }

    #[test]
    fn cancel_mode_discards() {
        let handler = ModeFailureHandler;
        assert_eq!(
            handler.on_connection_failure(&failure(FailureMode::Cancel)),
            FailureAction::Discard
        );
    }

    #[test]
    fn retry_and_redistribute_reconnect() {
        let handler = ModeFailureHandler;
        for mode in [FailureMode::Retry, FailureMode::Redistribute] {
            assert_eq!(
                handler.on_connection_failure(&failure(mode)),
                FailureAction::Reconnect
            );
        }
    }
}
