//! Per-transaction logger with step collection.
use std::sync::{Mutex, PoisonError};

use super::subscriber::STAGE_TARGET;
use super::types::{Log, StepEntry, StepStatus};
use crate::error::Operation;
use crate::path::NodePath;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// The `record_step` method is **not** included because its signature differs
/// from the `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Logger for one transaction.
///
/// Messages go to [`tracing`] tagged with the transaction id; writer steps
/// are also kept in memory for the write report and [`summary`](Self::summary).
#[derive(Debug)]
pub struct Logger {
    transaction: u64,
    steps: Mutex<Vec<StepEntry>>,
}

impl Logger {
    /// Create a logger for transaction `transaction`.
    #[must_use]
    pub const fn new(transaction: u64) -> Self {
        Self {
            transaction,
            steps: Mutex::new(Vec::new()),
        }
    }

    /// Transaction id this logger belongs to.
    #[must_use]
    pub const fn transaction(&self) -> u64 {
        self.transaction
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!(target: "treeconf::transaction", tx = self.transaction, "{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!(target: "treeconf::transaction", tx = self.transaction, "{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, tx = self.transaction, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!(target: "treeconf::transaction", tx = self.transaction, "{msg}");
    }

    /// Log a debug message.
    pub fn debug(&self, msg: &str) {
        tracing::debug!(target: "treeconf::transaction", tx = self.transaction, "{msg}");
    }

    /// Record a writer step.
    pub fn record_step(
        &self,
        path: &NodePath,
        operation: Operation,
        status: StepStatus,
        message: Option<&str>,
    ) {
        match status {
            StepStatus::Ok => self.debug(&format!("{operation} {path}")),
            StepStatus::Failed => self.warn(&format!(
                "{operation} {path} failed{}",
                message.map_or_else(String::new, |m| format!(": {m}"))
            )),
        }
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StepEntry {
                path: path.clone(),
                operation,
                status,
                message: message.map(String::from),
            });
    }

    /// All recorded steps in execution order.
    #[must_use]
    pub fn steps(&self) -> Vec<StepEntry> {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return `true` if any recorded step has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    /// Count the number of failed steps.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    /// One-line summary of the recorded steps, also emitted at `INFO`.
    ///
    /// ```
    /// use treeconf::error::Operation;
    /// use treeconf::logging::{Logger, StepStatus};
    ///
    /// let log = Logger::new(1);
    /// log.record_step(&"/a".parse().unwrap(), Operation::Create, StepStatus::Ok, None);
    /// log.record_step(&"/b".parse().unwrap(), Operation::Delete, StepStatus::Ok, None);
    /// assert_eq!(log.summary(), "2 steps: 1 created, 0 updated, 1 deleted, 0 failed");
    /// ```
    #[must_use]
    pub fn summary(&self) -> String {
        let steps = self.steps();
        let mut created = 0usize;
        let mut updated = 0usize;
        let mut deleted = 0usize;
        let mut failed = 0usize;
        for step in &steps {
            match (step.status, step.operation) {
                (StepStatus::Failed, _) => failed += 1,
                (StepStatus::Ok, Operation::Create) => created += 1,
                (StepStatus::Ok, Operation::Update) => updated += 1,
                (StepStatus::Ok, Operation::Delete) => deleted += 1,
            }
        }
        let line = format!(
            "{} steps: {created} created, {updated} updated, {deleted} deleted, {failed} failed",
            steps.len()
        );
        self.info(&line);
        line
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error);

    fn record_step(
        &self,
        path: &NodePath,
        operation: Operation,
        status: StepStatus,
        message: Option<&str>,
    ) {
        self.record_step(path, operation, status, message);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;
    use std::fs;

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    #[test]
    fn logger_new() {
        let log = Logger::new(7);
        assert!(log.steps().is_empty());
        assert_eq!(log.transaction(), 7);
    }

    #[test]
    fn record_step_with_message() {
        let log = Logger::new(1);
        log.record_step(&path("/a"), Operation::Update, StepStatus::Failed, Some("timeout"));
        let steps = log.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].operation, Operation::Update);
        assert_eq!(steps[0].message, Some("timeout".to_string()));
    }

    #[test]
    fn failure_count_returns_correct_count() {
        let log = Logger::new(1);
        assert!(!log.has_failures());
        log.record_step(&path("/a"), Operation::Create, StepStatus::Ok, None);
        log.record_step(&path("/b"), Operation::Create, StepStatus::Failed, Some("e"));
        assert_eq!(log.failure_count(), 1);
        assert!(log.has_failures());
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let log = Logger::new(1);
        let log_ref: &dyn Log = &log;
        log_ref.record_step(&path("/via-trait"), Operation::Delete, StepStatus::Ok, None);
        assert_eq!(log.steps().len(), 1);
    }

    #[test]
    fn messages_reach_log_file_with_transaction_id() {
        let (log, path, _tmp, _guard) = isolated_logger(42);
        log.warn("warn-marker");
        log.record_step(&"/x".parse().unwrap(), Operation::Create, StepStatus::Ok, None);
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("[warn] treeconf::transaction: warn-marker tx=42"));
        assert!(contents.contains("create /x"));
    }

    #[test]
    fn summary_written_to_file() {
        let (log, path, _tmp, _guard) = isolated_logger(3);
        log.record_step(&"/x".parse().unwrap(), Operation::Update, StepStatus::Ok, None);
        assert_eq!(
            log.summary(),
            "1 steps: 0 created, 1 updated, 0 deleted, 0 failed"
        );
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("1 updated"));
    }
}
