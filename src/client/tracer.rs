use std::fmt;

use tracing::debug;

use crate::error::AlbatrossResult;

/// Emits one debug event before and one after every dispatched operation,
/// tagged with the logical name it ran against.
#[derive(Debug, Clone)]
pub struct OperationTracer {
    scope: String,
}

impl OperationTracer {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn before(&self, op: &str, args: &dyn fmt::Debug) {
        debug!(scope = %self.scope, op, args = ?args, "dispatch");
    }

    pub fn after<T>(&self, op: &str, outcome: &AlbatrossResult<T>) {
        match outcome {
            Ok(_) => debug!(scope = %self.scope, op, outcome = "ok", "completed"),
            Err(err) => debug!(scope = %self.scope, op, outcome = "err", error = %err, "failed"),
        }
    }
}
