//! Dispatch gateway: decides which thread services a task.
use std::sync::Arc;

use crate::ports::{
    dispatcher::{Rejected, TaskDispatcher},
    task::ServiceTask,
};

/// Hands tasks to a worker pool, or services them inline when no pool is
/// configured.
#[derive(Clone, Default)]
pub struct TaskGateway {
    dispatcher: Option<Arc<dyn TaskDispatcher>>,
}

impl TaskGateway {
    pub fn new(dispatcher: Option<Arc<dyn TaskDispatcher>>) -> Self {
        Self { dispatcher }
    }

    /// Gateway that always services on the calling thread.
    pub fn inline() -> Self {
        Self::default()
    }

    pub fn is_inline(&self) -> bool {
        self.dispatcher.is_none()
    }

    pub fn dispatcher(&self) -> Option<&Arc<dyn TaskDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Queue `task` on the pool and return immediately, or run it to
    /// completion right here.
    ///
    /// A pool that no longer accepts work gets its task cancelled so the
    /// connection behind it is released.
    pub fn submit(&self, task: Box<dyn ServiceTask>) {
        match &self.dispatcher {
            Some(dispatcher) => {
                if let Err(Rejected(task)) = dispatcher.submit(task) {
                    tracing::warn!("Task dispatcher rejected a task; cancelling it");
                    task.cancel();
                }
            }
            None => task.service(),
        }
    }
}

impl std::fmt::Debug for TaskGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGateway")
            .field("inline", &self.is_inline())
            .finish()
    }
}
