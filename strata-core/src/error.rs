//! Error types for graph operations
//!
//! Every failure surfaced by the runtime falls into one of four categories:
//! structural misconfiguration, dependency cycles, illegal use of the API,
//! and errors raised by user closures. Structural errors carry the debug
//! descriptions of the offending nodes so they can be diagnosed from the
//! message alone.

use thiserror::Error;

/// Error type returned by user closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or running a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declared links cannot be satisfied, e.g. two behaviors supplying
    /// one resource or a link onto a resource the behavior may not reach.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Ordering found a dependency cycle.
    #[error("dependency cycle at {behavior} through [{}]", .cycle.join(" <- "))]
    Cycle {
        behavior: String,
        /// Resources forming the cycle, starting from a demand of `behavior`.
        cycle: Vec<String>,
    },

    /// The API was used outside the context it is valid in.
    #[error("illegal use: {message}")]
    IllegalUse { message: String },

    /// A user closure failed; the event was aborted.
    #[error("{behavior} failed: {source}")]
    Run {
        behavior: String,
        #[source]
        source: BoxError,
    },
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        GraphError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn illegal_use(message: impl Into<String>) -> Self {
        GraphError::IllegalUse {
            message: message.into(),
        }
    }

    /// Convert an error returned by a user closure.
    ///
    /// Graph errors raised inside the closure (an illegal update, say) keep
    /// their category; anything else becomes [`GraphError::Run`].
    pub(crate) fn from_run(behavior: impl Into<String>, error: BoxError) -> Self {
        match error.downcast::<GraphError>() {
            Ok(graph_error) => *graph_error,
            Err(source) => GraphError::Run {
                behavior: behavior.into(),
                source,
            },
        }
    }

    /// Whether this error came from the structure of the graph rather than
    /// from user code.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GraphError::Configuration { .. } | GraphError::Cycle { .. }
        )
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::configuration(format!("invalid graph configuration: {err}"))
    }
}
