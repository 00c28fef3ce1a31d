//! Resources
//!
//! A resource is a node that behaviors demand and supply. The typed flavors
//! ([`State`](super::State), [`Moment`](super::Moment) and
//! [`TypedMoment`](super::TypedMoment)) carry data; a plain [`Resource`]
//! carries nothing and is useful to order two behaviors without implying any
//! other relationship.
//!
//! Every flavor implements [`Linkable`], which is what the behavior builder
//! and the relinking calls accept.

use std::fmt;
use std::sync::Arc;

use super::runtime::{Graph, WeakGraph};
use super::{Behavior, Event};
use crate::error::GraphResult;
use crate::graph::{ExtentId, GraphId, Link, ResourceId, ResourceKind, Transient};

/// Anything a behavior can demand or supply.
pub trait Linkable {
    fn resource_id(&self) -> ResourceId;

    /// The graph the resource belongs to.
    fn graph_id(&self) -> GraphId;

    /// A demand that activates the behavior when the resource updates.
    fn link(&self) -> Link {
        Link::reactive(self.graph_id(), self.resource_id())
    }

    /// A demand that orders the behavior after the resource's supplier
    /// without activating it.
    fn order(&self) -> Link {
        Link::order(self.graph_id(), self.resource_id())
    }
}

impl Linkable for Link {
    fn resource_id(&self) -> ResourceId {
        self.resource()
    }

    fn graph_id(&self) -> GraphId {
        self.graph()
    }

    fn link(&self) -> Link {
        *self
    }
}

/// Graph-facing half shared by every resource handle.
#[derive(Clone)]
pub(crate) struct ResourceCore {
    graph: WeakGraph,
    graph_id: GraphId,
    id: ResourceId,
}

impl ResourceCore {
    pub(crate) fn register(
        graph: &Graph,
        extent: ExtentId,
        kind: ResourceKind,
        debug_name: Option<String>,
        transient: Option<Arc<dyn Transient>>,
    ) -> Self {
        let id = graph
            .lock()
            .scheduler
            .add_resource(extent, kind, debug_name, transient);
        Self {
            graph: graph.downgrade(),
            graph_id: graph.id(),
            id,
        }
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub(crate) fn graph(&self) -> GraphResult<Graph> {
        self.graph.upgrade()
    }

    /// Validate an update from the calling context.
    pub(crate) fn begin_update(&self) -> GraphResult<(Graph, Event)> {
        let graph = self.graph()?;
        let event = graph.prepare_update(self.id)?;
        Ok((graph, event))
    }

    pub(crate) fn is_current(&self, event: Option<Event>) -> bool {
        match (event, self.graph.current_sequence()) {
            (Some(event), Some(current)) => event.sequence() == current,
            _ => false,
        }
    }

    pub(crate) fn accessed(&self) {
        if let Ok(graph) = self.graph() {
            graph.check_access(self.id);
        }
    }

    pub(crate) fn extent(&self) -> GraphResult<ExtentId> {
        let graph = self.graph()?;
        let extent = graph.lock().scheduler.resource(self.id).extent;
        Ok(extent)
    }

    pub(crate) fn supplied_by(&self) -> Option<Behavior> {
        let graph = self.graph().ok()?;
        let supplier = graph.lock().scheduler.resource(self.id).supplied_by?;
        Some(Behavior::new(&graph, supplier))
    }

    pub(crate) fn debug_name(&self) -> Option<String> {
        let graph = self.graph().ok()?;
        let name = graph.lock().scheduler.resource(self.id).debug_name.clone();
        name
    }
}

impl fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A resource without data, used purely for ordering.
#[derive(Clone, Debug)]
pub struct Resource {
    core: ResourceCore,
}

impl Resource {
    pub(crate) fn new(graph: &Graph, extent: ExtentId, debug_name: Option<String>) -> Self {
        Self {
            core: ResourceCore::register(graph, extent, ResourceKind::Plain, debug_name, None),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id()
    }

    /// The behavior supplying this resource, once linked.
    pub fn supplied_by(&self) -> Option<Behavior> {
        self.core.supplied_by()
    }

    pub fn debug_name(&self) -> Option<String> {
        self.core.debug_name()
    }
}

impl Linkable for Resource {
    fn resource_id(&self) -> ResourceId {
        self.core.id()
    }

    fn graph_id(&self) -> GraphId {
        self.core.graph_id()
    }
}
