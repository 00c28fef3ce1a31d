//! Run Context
//!
//! The context handed to a behavior's run closure. It identifies the event
//! and behavior being processed and is the entry point for queueing side
//! effects.
//!
//! # Phases
//!
//! An event moves through three phases. Resource updates are legal only in
//! the first two; side effects may only be queued in the second.
//!
//! 1. `Action`: the action closure runs.
//! 2. `Updates`: activated behaviors run in order.
//! 3. `SideEffects`: queued side effects run in enqueue order.

use super::runtime::Graph;
use super::Event;
use crate::error::GraphResult;
use crate::graph::BehaviorId;

/// Where the event loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopPhase {
    Idle,
    Action,
    Updates,
    SideEffects,
}

impl EventLoopPhase {
    /// Whether resources may be updated in this phase.
    pub fn is_processing(&self) -> bool {
        matches!(self, EventLoopPhase::Action | EventLoopPhase::Updates)
    }
}

/// Scope of one behavior run.
pub struct RunContext<'a> {
    graph: &'a Graph,
    behavior: BehaviorId,
    event: Event,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(graph: &'a Graph, behavior: BehaviorId, event: Event) -> Self {
        Self {
            graph,
            behavior,
            event,
        }
    }

    /// The event being processed.
    pub fn event(&self) -> Event {
        self.event
    }

    /// The behavior being run.
    pub fn behavior(&self) -> BehaviorId {
        self.behavior
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Queue work to run after every behavior of this event has finished.
    pub fn side_effect<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.graph.side_effect(f)
    }

    /// Like [`side_effect`](Self::side_effect), with a name for tracing.
    pub fn side_effect_named<F>(&self, name: &str, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.graph.side_effect_named(name, f)
    }
}
