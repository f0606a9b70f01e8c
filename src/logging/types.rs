//! Core logging types: write steps, their status, and the [`Log`] trait.
use crate::error::Operation;
use crate::path::NodePath;

/// One dispatched writer step, kept for the transaction summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEntry {
    /// Concrete path of the written node.
    pub path: NodePath,
    /// Operation the writer performed.
    pub operation: Operation,
    /// Outcome of the step.
    pub status: StepStatus,
    /// Optional detail (error text for failed steps).
    pub message: Option<String>,
}

/// Outcome of a writer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The writer completed.
    Ok,
    /// The writer failed; the plan stopped here.
    Failed,
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) is the only implementation. The engine
/// creates one per write transaction, and writers reach it through
/// [`WriteContext::log`](crate::context::WriteContext::log).
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Record a writer step for the summary.
    fn record_step(
        &self,
        path: &NodePath,
        operation: Operation,
        status: StepStatus,
        message: Option<&str>,
    );
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn step_status_equality() {
        assert_eq!(StepStatus::Ok, StepStatus::Ok);
        assert_ne!(StepStatus::Ok, StepStatus::Failed);
    }

    #[test]
    fn step_entry_clone() {
        let entry = StepEntry {
            path: "/interfaces/interface[name=eth0]".parse().unwrap(),
            operation: Operation::Create,
            status: StepStatus::Ok,
            message: None,
        };
        assert_eq!(entry.clone(), entry);
    }
}
