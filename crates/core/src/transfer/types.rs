//! Transfer task and batch snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::InvoiceId;

/// Identifier of a task within a batch.
pub type TaskId = String;

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected locally before any network call.
    Validation,
    /// Network or timeout; worth retrying.
    Transient,
    /// Rejected by the repository; retrying the same input will likely fail.
    Persistent,
    /// Never started because the batch was cancelled.
    Cancelled,
    /// The worker itself crashed.
    Internal,
}

/// Status of one transfer.
///
/// ```text
/// Pending -> InProgress -> Succeeded | Duplicate | Failed
///    |                                               |
///    +-> Failed (cancelled before start)             +-> Pending (retry)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress {
        percent: u8,
    },
    /// The repository accepted the file and started processing it.
    Succeeded {
        invoice_id: InvoiceId,
    },
    /// The repository already holds this content.
    Duplicate {
        #[serde(skip_serializing_if = "Option::is_none")]
        existing_id: Option<InvoiceId>,
    },
    Failed {
        reason: String,
        kind: FailureKind,
    },
}

impl TaskStatus {
    /// Failure carrying the conventional "cancelled" reason.
    pub fn cancelled() -> Self {
        TaskStatus::Failed {
            reason: "cancelled".to_string(),
            kind: FailureKind::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. } | TaskStatus::Duplicate { .. } | TaskStatus::Failed { .. }
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, TaskStatus::InProgress { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }

    /// Whether moving to `next` respects pending -> in progress -> terminal.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress { .. }) => true,
            // Skipped or crashed before reporting start.
            (TaskStatus::Pending, TaskStatus::Failed { .. }) => true,
            (TaskStatus::InProgress { .. }, TaskStatus::InProgress { .. }) => true,
            (TaskStatus::InProgress { .. }, next) => next.is_terminal(),
            (TaskStatus::Failed { .. }, TaskStatus::Pending) => true,
            _ => false,
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress { percent } => *percent,
            _ => 100,
        }
    }

    /// Returns the status type as a string (for logging and metrics).
    pub fn status_type(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress { .. } => "in_progress",
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::Duplicate { .. } => "duplicate",
            TaskStatus::Failed {
                kind: FailureKind::Cancelled,
                ..
            } => "cancelled",
            TaskStatus::Failed { .. } => "failed",
        }
    }
}

/// One file moving between the device and the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub id: TaskId,
    /// Local path or remote invoice id being transferred.
    pub source_ref: String,
    /// File name or invoice number shown to the user.
    pub display_name: String,
    pub status: TaskStatus,
    /// Number of times a worker picked this task up.
    pub attempts: u32,
}

impl TransferTask {
    pub fn new(
        id: impl Into<TaskId>,
        source_ref: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            display_name: display_name.into(),
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }

    /// The successful invoice id, if any.
    pub fn invoice_id(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Succeeded { invoice_id } => Some(invoice_id),
            _ => None,
        }
    }
}

/// Immutable snapshot of a batch.
///
/// Every transition produces a new snapshot; counters are derived from the
/// task list so they can never drift from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub id: String,
    /// Tasks in submission order.
    pub tasks: Vec<TransferTask>,
    pub cancellation_requested: bool,
    /// Incremented every time a retry re-opens a settled batch.
    pub run: u32,
    pub created_at: DateTime<Utc>,
}

impl TransferBatch {
    pub fn new(id: impl Into<String>, tasks: Vec<TransferTask>) -> Self {
        Self {
            id: id.into(),
            tasks,
            cancellation_requested: false,
            run: 1,
            created_at: Utc::now(),
        }
    }

    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed_count(&self) -> usize {
        self.count(TaskStatus::is_terminal)
    }

    pub fn success_count(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Succeeded { .. }))
    }

    pub fn duplicate_count(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Duplicate { .. }))
    }

    pub fn failure_count(&self) -> usize {
        self.count(TaskStatus::is_failed)
    }

    pub fn in_progress_count(&self) -> usize {
        self.count(TaskStatus::is_in_progress)
    }

    pub fn is_settled(&self) -> bool {
        self.completed_count() == self.total_count()
    }

    pub fn task(&self, id: &str) -> Option<&TransferTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Ids of successfully created invoices, in submission order.
    pub fn invoice_ids(&self) -> Vec<InvoiceId> {
        self.tasks
            .iter()
            .filter_map(|t| t.invoice_id().map(str::to_string))
            .collect()
    }

    /// Copy of this batch with task `index` moved to `status`.
    ///
    /// Returns `None` if the index is unknown or the move would break the
    /// task's status ordering.
    pub fn with_task_status(&self, index: usize, status: TaskStatus) -> Option<Self> {
        let current = self.tasks.get(index)?;
        if !current.status.can_transition_to(&status) {
            return None;
        }
        let starting = matches!(current.status, TaskStatus::Pending)
            && matches!(status, TaskStatus::InProgress { .. });

        let mut next = self.clone();
        let task = &mut next.tasks[index];
        task.status = status;
        if starting {
            task.attempts += 1;
        }
        Some(next)
    }

    /// Copy of this batch with the cancellation flag raised.
    pub fn with_cancellation(&self) -> Self {
        let mut next = self.clone();
        next.cancellation_requested = true;
        next
    }

    /// Copy of this batch re-opened for another run.
    pub fn with_next_run(&self) -> Self {
        let mut next = self.clone();
        next.run += 1;
        next
    }

    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.status)).count()
    }
}
