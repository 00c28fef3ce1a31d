//! Graph Nodes
//!
//! This module defines the node records that live in the dependency arena.
//! Resources, behaviors and extents are stored in flat vectors and refer to
//! each other only through the integer handles defined here, so the arena
//! never contains reference cycles between owning structures.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::BoxError;
use crate::reactive::{Event, RunContext};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            /// Index of this node inside its arena.
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Stable handle of a resource node.
    ResourceId,
    "Resource"
);
arena_id!(
    /// Stable handle of a behavior node.
    BehaviorId,
    "Behavior"
);
arena_id!(
    /// Stable handle of an extent node.
    ExtentId,
    "Extent"
);
arena_id!(
    /// Handle of a group of extents sharing one lifetime.
    LifetimeId,
    "Lifetime"
);

/// Process-unique identity of a graph. Handles of one graph are meaningless
/// in another, so links carry the identity of the graph they were made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Graph#{}", self.0)
    }
}

/// How a demand link participates in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Updating the resource activates the demanding behavior.
    Reactive,

    /// The demanding behavior is ordered after the resource's supplier but is
    /// not activated when the resource updates.
    Order,
}

/// A demand (or supply) edge onto a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub(crate) graph: GraphId,
    pub(crate) resource: ResourceId,
    pub(crate) link_type: LinkType,
}

impl Link {
    pub(crate) fn reactive(graph: GraphId, resource: ResourceId) -> Self {
        Self {
            graph,
            resource,
            link_type: LinkType::Reactive,
        }
    }

    pub(crate) fn order(graph: GraphId, resource: ResourceId) -> Self {
        Self {
            graph,
            resource,
            link_type: LinkType::Order,
        }
    }

    /// The linked resource.
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// The graph the linked resource belongs to.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Whether the link activates or only orders.
    pub fn link_type(&self) -> LinkType {
        self.link_type
    }
}

/// The flavor of a resource, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    State,
    Moment,
    TypedMoment,
    Plain,
}

/// Per-event scratch data attached to a resource handle that must be
/// discarded when the event closes.
pub(crate) trait Transient: Send + Sync {
    fn clear(&self);
}

/// A resource node: identity, owner and its links to behaviors.
pub(crate) struct ResourceNode {
    pub(crate) extent: ExtentId,
    pub(crate) kind: ResourceKind,
    pub(crate) debug_name: Option<String>,

    /// Behaviors currently demanding this resource.
    pub(crate) subsequents: IndexSet<BehaviorId>,

    /// The single behavior allowed to update this resource.
    pub(crate) supplied_by: Option<BehaviorId>,

    /// Last event in which the resource was activated.
    pub(crate) updated: Option<Event>,

    pub(crate) transient: Option<Arc<dyn Transient>>,
}

impl ResourceNode {
    pub(crate) fn new(
        extent: ExtentId,
        kind: ResourceKind,
        debug_name: Option<String>,
        transient: Option<Arc<dyn Transient>>,
    ) -> Self {
        Self {
            extent,
            kind,
            debug_name,
            subsequents: IndexSet::new(),
            supplied_by: None,
            updated: None,
            transient,
        }
    }

    pub(crate) fn just_updated(&self, sequence: u64) -> bool {
        self.updated.map(|e| e.sequence()) == Some(sequence)
    }
}

/// Progress of a behavior through the incremental ordering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderingState {
    /// Not yet linked into the graph.
    Untracked,

    /// Its order may be stale and must be recomputed.
    NeedsOrdering,

    /// Collected for the current ordering pass.
    Clearing,

    /// On the active depth-first path; reaching it again means a cycle.
    Ordering,

    /// Order is consistent with every supplier.
    Ordered,
}

pub(crate) type RunFn = Arc<dyn Fn(&RunContext<'_>) -> Result<(), BoxError> + Send + Sync>;

/// The closure left in place of a removed behavior's, so whatever the
/// original captured is released.
pub(crate) fn inert_run() -> RunFn {
    Arc::new(|_| Ok(()))
}

/// A behavior node: its links, its place in the ordering and its closure.
pub(crate) struct BehaviorNode {
    pub(crate) extent: ExtentId,
    pub(crate) debug_name: Option<String>,

    /// Linked demands. Ordering demands are a subset.
    pub(crate) demands: IndexSet<ResourceId>,
    pub(crate) ordering_demands: IndexSet<ResourceId>,

    /// Linked supplies.
    pub(crate) supplies: IndexSet<ResourceId>,

    /// Declared links; merged into the linked sets on the next link pass.
    pub(crate) static_demands: SmallVec<[Link; 4]>,
    pub(crate) dynamic_demands: Option<Vec<Link>>,
    pub(crate) static_supplies: SmallVec<[ResourceId; 2]>,
    pub(crate) dynamic_supplies: Option<Vec<ResourceId>>,

    pub(crate) enqueued_when: Option<u64>,
    pub(crate) removed_when: Option<u64>,
    pub(crate) ordering: OrderingState,
    pub(crate) order: u64,

    /// Why the declared links cannot be linked, reported on the first link
    /// pass.
    pub(crate) link_error: Option<String>,

    pub(crate) run: RunFn,
}

impl BehaviorNode {
    pub(crate) fn new(
        extent: ExtentId,
        debug_name: Option<String>,
        static_demands: SmallVec<[Link; 4]>,
        static_supplies: SmallVec<[ResourceId; 2]>,
        run: RunFn,
    ) -> Self {
        Self {
            extent,
            debug_name,
            demands: IndexSet::new(),
            ordering_demands: IndexSet::new(),
            supplies: IndexSet::new(),
            static_demands,
            dynamic_demands: None,
            static_supplies,
            dynamic_supplies: None,
            enqueued_when: None,
            removed_when: None,
            ordering: OrderingState::Untracked,
            order: 0,
            link_error: None,
            run,
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed_when.is_some()
    }
}

/// Lifecycle of an extent. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentLifecycle {
    Unattached,
    Added,
    Removed,
}

/// An extent node: its members and its place in the lifetime tree.
pub(crate) struct ExtentNode {
    pub(crate) debug_name: String,
    pub(crate) lifecycle: ExtentLifecycle,
    pub(crate) added_when: Option<u64>,
    pub(crate) resources: Vec<ResourceId>,
    pub(crate) behaviors: Vec<BehaviorId>,

    /// Set once the extent takes part in a lifetime relationship.
    pub(crate) lifetime: Option<LifetimeId>,

    /// The moment activated when the extent is added.
    pub(crate) did_add: Option<ResourceId>,
}

impl ExtentNode {
    pub(crate) fn new(debug_name: String) -> Self {
        Self {
            debug_name,
            lifecycle: ExtentLifecycle::Unattached,
            added_when: None,
            resources: Vec::new(),
            behaviors: Vec::new(),
            lifetime: None,
            did_add: None,
        }
    }
}

/// Extents that live and die together, and the lifetimes nested in them.
#[derive(Default)]
pub(crate) struct LifetimeNode {
    pub(crate) extents: IndexSet<ExtentId>,
    pub(crate) parent: Option<LifetimeId>,
    pub(crate) children: IndexSet<LifetimeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> RunFn {
        Arc::new(|_| Ok(()))
    }

    #[test]
    fn ids_display_with_kind_prefix() {
        assert_eq!(ResourceId::from_index(3).to_string(), "Resource#3");
        assert_eq!(BehaviorId::from_index(0).to_string(), "Behavior#0");
        assert_eq!(ExtentId::from_index(12).index(), 12);
    }

    #[test]
    fn behavior_starts_untracked() {
        let node = BehaviorNode::new(
            ExtentId::from_index(0),
            None,
            SmallVec::new(),
            SmallVec::new(),
            noop(),
        );
        assert_eq!(node.ordering, OrderingState::Untracked);
        assert_eq!(node.order, 0);
        assert!(!node.is_removed());
    }

    #[test]
    fn resource_just_updated_tracks_sequence() {
        let mut node = ResourceNode::new(ExtentId::from_index(0), ResourceKind::Moment, None, None);
        assert!(!node.just_updated(1));

        node.updated = Some(Event::new(4, 0));
        assert!(node.just_updated(4));
        assert!(!node.just_updated(5));
    }

    #[test]
    fn link_constructors_set_type() {
        let graph = GraphId::next();
        let r = ResourceId::from_index(1);
        assert_eq!(Link::reactive(graph, r).link_type(), LinkType::Reactive);
        assert_eq!(Link::order(graph, r).link_type(), LinkType::Order);
        assert_eq!(Link::order(graph, r).resource(), r);
        assert_eq!(Link::order(graph, r).graph(), graph);
    }

    #[test]
    fn graph_ids_are_unique() {
        let first = GraphId::next();
        let second = GraphId::next();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("Graph#"));
    }
}
