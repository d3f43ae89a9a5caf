use crate::broadcast::{CancelFlag, LogLevel};

/// Events emitted by the reconciler while it applies a plan.
pub enum ReconcileEvent {
    /// One candidate has been fully handled (or skipped).
    ItemFinished { label: String },
    Log { level: LogLevel, message: String },
}

pub trait ReconcileProgress: Send + Sync {
    fn report(&self, event: ReconcileEvent);

    /// Flag polled between batches.
    fn cancel_flag(&self) -> CancelFlag;
}

/// No-op reporter for unit tests and one-off runs.
#[derive(Default)]
pub struct NoopProgress {
    cancel: CancelFlag,
}

impl NoopProgress {
    /// A reporter whose runs stop once `cancel` is raised.
    pub fn with_cancel(cancel: CancelFlag) -> Self {
        Self { cancel }
    }
}

impl ReconcileProgress for NoopProgress {
    fn report(&self, event: ReconcileEvent) {
        if let ReconcileEvent::Log { level, message } = event {
            log::log!(level.to_log_level(), "{}", message);
        }
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}
