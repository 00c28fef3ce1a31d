//! Moment Resources
//!
//! A Moment records that something happened during an event. It carries no
//! data and is only "just updated" in the event that updated it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::resource::{Linkable, ResourceCore};
use super::runtime::Graph;
use super::{Behavior, Event};
use crate::error::GraphResult;
use crate::graph::{ExtentId, GraphId, ResourceId, ResourceKind};

/// A resource marking that something happened in an event.
#[derive(Clone)]
pub struct Moment {
    core: ResourceCore,
    updated: Arc<RwLock<Option<Event>>>,
}

impl Moment {
    pub(crate) fn new(graph: &Graph, extent: ExtentId, debug_name: Option<String>) -> Self {
        Self {
            core: ResourceCore::register(graph, extent, ResourceKind::Moment, debug_name, None),
            updated: Arc::new(RwLock::new(None)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id()
    }

    /// Mark the moment as happened and activate demanders.
    pub fn update(&self) -> GraphResult<()> {
        let (graph, event) = self.core.begin_update()?;
        self.activate(&graph, event);
        Ok(())
    }

    /// Open an action and [`update`](Self::update) in it.
    pub fn update_with_action(&self) -> GraphResult<()> {
        let graph = self.core.graph()?;
        graph.action(|| Ok(self.update()?))
    }

    /// Record an update without validating the caller.
    pub(crate) fn activate(&self, graph: &Graph, event: Event) {
        *self.updated.write() = Some(event);
        graph.touch(self.core.id(), event);
    }

    /// Whether the moment happened in the running event.
    pub fn just_updated(&self) -> bool {
        self.core.accessed();
        self.core.is_current(*self.updated.read())
    }

    /// The last event in which the moment happened.
    pub fn event(&self) -> Option<Event> {
        self.core.accessed();
        *self.updated.read()
    }

    pub fn supplied_by(&self) -> Option<Behavior> {
        self.core.supplied_by()
    }

    pub fn debug_name(&self) -> Option<String> {
        self.core.debug_name()
    }
}

impl Linkable for Moment {
    fn resource_id(&self) -> ResourceId {
        self.core.id()
    }

    fn graph_id(&self) -> GraphId {
        self.core.graph_id()
    }
}

impl fmt::Debug for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Moment")
            .field("id", &self.core.id())
            .field("updated", &*self.updated.read())
            .finish()
    }
}
