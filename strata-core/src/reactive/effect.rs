//! Deferred Work
//!
//! Two kinds of work are deferred by the event loop:
//!
//! - Side effects, queued by running behaviors and flushed in enqueue order
//!   once every behavior of the event has finished.
//! - Queued actions, submitted with `action_async` while the graph is busy
//!   and run as separate events once the current one completes.

use std::fmt;

use crate::error::BoxError;

/// Externally visible work queued during an event.
pub(crate) struct SideEffect {
    name: Option<String>,
    run: Box<dyn FnOnce() + Send>,
}

impl SideEffect {
    pub(crate) fn new<F>(name: Option<String>, run: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("side effect")
    }

    pub(crate) fn run(self) {
        (self.run)()
    }
}

impl fmt::Debug for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffect").field("name", &self.name).finish()
    }
}

/// An action waiting for the graph to become idle.
pub(crate) struct QueuedAction {
    pub(crate) name: Option<String>,
    pub(crate) run: Box<dyn FnOnce() -> Result<(), BoxError> + Send>,
}

impl QueuedAction {
    pub(crate) fn new<F>(name: Option<String>, run: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }
}
