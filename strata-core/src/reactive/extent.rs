//! Extents
//!
//! An extent groups the resources and behaviors that live and die together.
//! It is added to the graph in one event and removed in a later one; once
//! removed it can never be added again.
//!
//! # Lifetimes
//!
//! Extents can be arranged in a lifetime tree with
//! [`Extent::add_child_lifetime`], and extents that come and go together can
//! share one node of that tree with [`Extent::unify_lifetime`]. Removing an
//! extent removes the extents sharing its lifetime and every descendant,
//! descendants first. With lifetime validation on, a behavior may statically
//! link only to resources of its own lifetime or of an ancestor, and a child
//! may only be added once its parent is in the graph.
//!
//! # Ownership
//!
//! An extent holds its graph strongly. An extent stored in a resource value,
//! or captured by a behavior closure, of its own graph keeps that graph alive
//! until the extent holding it is removed.

use std::fmt;

use super::behavior::BehaviorBuilder;
use super::resource::Resource;
use super::runtime::Graph;
use super::{Moment, State, TypedMoment};
use crate::error::{BoxError, GraphError, GraphResult};
use crate::graph::{ExtentId, ExtentLifecycle};

/// A group of resources and behaviors added to and removed from a graph as
/// a unit.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
///
/// let graph = Graph::new();
/// let extent = Extent::named(&graph, "greeter");
/// let greeted = extent.state(false);
///
/// let g = greeted.clone();
/// extent
///     .behavior()
///     .demands(&[extent.did_add()])
///     .supplies(&[&greeted])
///     .runs(move |_ctx| {
///         g.update(true)?;
///         Ok(())
///     });
///
/// extent.add_to_graph_with_action().unwrap();
/// assert!(greeted.value());
/// assert_eq!(extent.lifecycle(), ExtentLifecycle::Added);
/// ```
#[derive(Clone)]
pub struct Extent {
    graph: Graph,
    id: ExtentId,
    did_add: Moment,
}

impl Extent {
    pub fn new(graph: &Graph) -> Self {
        Self::create(graph, None)
    }

    /// Create an extent with a name used in diagnostics.
    pub fn named(graph: &Graph, name: impl Into<String>) -> Self {
        Self::create(graph, Some(name.into()))
    }

    fn create(graph: &Graph, name: Option<String>) -> Self {
        let id = graph.lock().scheduler.add_extent(name);
        let label = graph.lock().scheduler.extent(id).debug_name.clone();
        let did_add = Moment::new(graph, id, Some(format!("{label} did add")));
        graph.lock().scheduler.extent_mut(id).did_add = Some(did_add.id());
        Self {
            graph: graph.clone(),
            id,
            did_add,
        }
    }

    pub fn id(&self) -> ExtentId {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn debug_name(&self) -> String {
        self.graph.lock().scheduler.extent(self.id).debug_name.clone()
    }

    pub fn lifecycle(&self) -> ExtentLifecycle {
        self.graph.lock().scheduler.extent(self.id).lifecycle
    }

    /// Sequence of the event that added this extent.
    pub fn added_when(&self) -> Option<u64> {
        self.graph.lock().scheduler.extent(self.id).added_when
    }

    // ------------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------------

    pub fn state<T>(&self, initial: T) -> State<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        State::new(&self.graph, self.id, initial, None)
    }

    pub fn state_named<T>(&self, initial: T, name: impl Into<String>) -> State<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        State::new(&self.graph, self.id, initial, Some(name.into()))
    }

    pub fn moment(&self) -> Moment {
        Moment::new(&self.graph, self.id, None)
    }

    pub fn moment_named(&self, name: impl Into<String>) -> Moment {
        Moment::new(&self.graph, self.id, Some(name.into()))
    }

    pub fn typed_moment<T>(&self) -> TypedMoment<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        TypedMoment::new(&self.graph, self.id, None)
    }

    pub fn typed_moment_named<T>(&self, name: impl Into<String>) -> TypedMoment<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        TypedMoment::new(&self.graph, self.id, Some(name.into()))
    }

    /// A data-less resource for ordering behaviors.
    pub fn resource(&self, name: impl Into<String>) -> Resource {
        Resource::new(&self.graph, self.id, Some(name.into()))
    }

    /// Start declaring a behavior on this extent.
    pub fn behavior(&self) -> BehaviorBuilder {
        BehaviorBuilder::new(self.graph.clone(), self.id)
    }

    /// The moment that happens in the event adding this extent.
    pub fn did_add(&self) -> &Moment {
        &self.did_add
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Add this extent to the graph in the running event.
    ///
    /// Its behaviors are linked before the next behavior runs and
    /// [`did_add`](Self::did_add) happens in this event.
    pub fn add_to_graph(&self) -> GraphResult<()> {
        let event = self.graph.attach_extent(self.id)?;
        self.did_add.activate(&self.graph, event);
        Ok(())
    }

    /// Open an action and [`add_to_graph`](Self::add_to_graph) in it.
    pub fn add_to_graph_with_action(&self) -> GraphResult<()> {
        self.graph
            .action_named("add extent", || Ok(self.add_to_graph()?))
    }

    /// Remove this extent and every lifetime descendant in the running
    /// event. None of their behaviors run again, including any already
    /// activated in this event, and links other behaviors hold onto their
    /// resources are severed.
    pub fn remove_from_graph(&self) -> GraphResult<()> {
        self.graph.detach_extent(self.id)
    }

    pub fn remove_from_graph_with_action(&self) -> GraphResult<()> {
        self.graph
            .action_named("remove extent", || Ok(self.remove_from_graph()?))
    }

    /// Make `child` a lifetime child of this extent, so it is removed with
    /// it and may link to this extent's resources.
    pub fn add_child_lifetime(&self, child: &Extent) -> GraphResult<()> {
        self.check_same_graph(child)?;
        self.graph
            .lock()
            .scheduler
            .add_child_lifetime(self.id, child.id)
    }

    /// Give `other` the same lifetime as this extent: each may statically
    /// link to the other's resources and removing either removes both.
    ///
    /// Must be called before `other` is added to the graph.
    pub fn unify_lifetime(&self, other: &Extent) -> GraphResult<()> {
        self.check_same_graph(other)?;
        self.graph.lock().scheduler.unify_lifetime(self.id, other.id)
    }

    fn check_same_graph(&self, other: &Extent) -> GraphResult<()> {
        if self.graph.ptr_eq(&other.graph) {
            Ok(())
        } else {
            Err(GraphError::illegal_use(
                "extents of different graphs cannot share a lifetime",
            ))
        }
    }

    // ------------------------------------------------------------------------
    // Conveniences
    // ------------------------------------------------------------------------

    /// Queue a side effect from inside a running behavior.
    pub fn side_effect<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.graph.side_effect(f)
    }

    /// Run `f` as an action on this extent's graph.
    pub fn action<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        self.graph.action(f)
    }
}

impl PartialEq for Extent {
    fn eq(&self, other: &Self) -> bool {
        self.graph.ptr_eq(&other.graph) && self.id == other.id
    }
}

impl fmt::Debug for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.graph.lock();
        let node = inner.scheduler.extent(self.id);
        f.debug_struct("Extent")
            .field("id", &self.id)
            .field("name", &node.debug_name)
            .field("lifecycle", &node.lifecycle)
            .finish()
    }
}
