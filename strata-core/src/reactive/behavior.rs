//! Behaviors
//!
//! A behavior is a unit of computation. It declares the resources it
//! demands (reads) and supplies (writes), and runs at most once per event,
//! after every behavior supplying one of its demands.
//!
//! # Dynamic Links
//!
//! A behavior's links can change at run time. The primitive is
//! [`Behavior::set_dynamic_demands`] / [`Behavior::set_dynamic_supplies`],
//! which replace the dynamic part of the links from inside an event; the
//! static part declared on the builder always stays.
//!
//! The builder's `dynamic_demands` / `dynamic_supplies` clauses are built on
//! that primitive. Each creates a hidden link behavior on the same extent
//! that demands the trigger resources (and the extent's did-add moment),
//! recomputes the links when any of them updates, and applies them with the
//! primitive. A hidden ordering resource places the link behavior either
//! right before the main behavior ([`RelinkingOrder::Prior`]) or right
//! after it ([`RelinkingOrder::Subsequent`]). A behavior created on an
//! extent that is already in the graph computes its links in the first event
//! that links it.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::warn;

use super::context::RunContext;
use super::resource::Linkable;
use super::runtime::{Graph, WeakGraph};
use crate::error::{BoxError, GraphResult};
use crate::graph::{
    BehaviorId, ExtentId, ExtentLifecycle, GraphId, Link, ResourceId, ResourceKind, RunFn,
};

/// When declaratively computed links are applied relative to the behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelinkingOrder {
    /// Before the behavior runs, so it runs against the new links.
    #[default]
    Prior,

    /// After the behavior runs, typically because it supplies the resources
    /// the links are computed from.
    Subsequent,
}

type LinkFn = Arc<dyn Fn() -> Vec<Link> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relink {
    Demands,
    Supplies,
}

impl fmt::Display for Relink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relink::Demands => write!(f, "demands"),
            Relink::Supplies => write!(f, "supplies"),
        }
    }
}

struct DynamicLinks {
    kind: Relink,
    triggers: Vec<Link>,
    order: RelinkingOrder,
    links: LinkFn,
}

/// Declares a behavior's links and closure. Created by
/// [`Extent::behavior`](super::Extent::behavior).
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
///
/// let graph = Graph::new();
/// let extent = Extent::new(&graph);
/// let email = extent.state(String::new());
/// let valid = extent.state(false);
///
/// let (e, v) = (email.clone(), valid.clone());
/// extent
///     .behavior()
///     .named("validate email")
///     .demands(&[&email])
///     .supplies(&[&valid])
///     .runs(move |_ctx| {
///         v.update(e.value().contains('@'))?;
///         Ok(())
///     });
/// extent.add_to_graph_with_action().unwrap();
///
/// email.update_with_action("someone@example.com".to_string()).unwrap();
/// assert!(valid.value());
/// ```
#[must_use = "a behavior is only created by calling `runs`"]
pub struct BehaviorBuilder {
    graph: Graph,
    extent: ExtentId,
    name: Option<String>,
    demands: SmallVec<[Link; 4]>,
    supplies: SmallVec<[ResourceId; 2]>,
    dynamic: SmallVec<[DynamicLinks; 2]>,

    /// First declared link onto another graph's resource.
    foreign: Option<(ResourceId, GraphId)>,
}

impl BehaviorBuilder {
    pub(crate) fn new(graph: Graph, extent: ExtentId) -> Self {
        Self {
            graph,
            extent,
            name: None,
            demands: SmallVec::new(),
            supplies: SmallVec::new(),
            dynamic: SmallVec::new(),
            foreign: None,
        }
    }

    /// Keep `link` unless it belongs to another graph.
    fn local(&mut self, link: Link) -> Option<Link> {
        if link.graph() == self.graph.id() {
            return Some(link);
        }
        self.foreign.get_or_insert((link.resource(), link.graph()));
        None
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add static demands. Use [`Linkable::order`] for an ordering-only
    /// demand.
    pub fn demands(mut self, links: &[&dyn Linkable]) -> Self {
        for link in links {
            if let Some(link) = self.local(link.link()) {
                self.demands.push(link);
            }
        }
        self
    }

    /// Add static supplies.
    pub fn supplies(mut self, resources: &[&dyn Linkable]) -> Self {
        for resource in resources {
            if let Some(link) = self.local(resource.link()) {
                self.supplies.push(link.resource());
            }
        }
        self
    }

    /// Recompute the dynamic demands from `links` whenever a trigger updates,
    /// before the behavior runs.
    pub fn dynamic_demands<F>(self, triggers: &[&dyn Linkable], links: F) -> Self
    where
        F: Fn() -> Vec<Link> + Send + Sync + 'static,
    {
        self.dynamic_demands_with(triggers, RelinkingOrder::Prior, links)
    }

    pub fn dynamic_demands_with<F>(
        self,
        triggers: &[&dyn Linkable],
        order: RelinkingOrder,
        links: F,
    ) -> Self
    where
        F: Fn() -> Vec<Link> + Send + Sync + 'static,
    {
        self.dynamic_links(Relink::Demands, triggers, order, Arc::new(links))
    }

    /// Recompute the dynamic supplies from `links` whenever a trigger
    /// updates, before the behavior runs.
    pub fn dynamic_supplies<F>(self, triggers: &[&dyn Linkable], links: F) -> Self
    where
        F: Fn() -> Vec<Link> + Send + Sync + 'static,
    {
        self.dynamic_supplies_with(triggers, RelinkingOrder::Prior, links)
    }

    pub fn dynamic_supplies_with<F>(
        self,
        triggers: &[&dyn Linkable],
        order: RelinkingOrder,
        links: F,
    ) -> Self
    where
        F: Fn() -> Vec<Link> + Send + Sync + 'static,
    {
        self.dynamic_links(Relink::Supplies, triggers, order, Arc::new(links))
    }

    fn dynamic_links(
        mut self,
        kind: Relink,
        triggers: &[&dyn Linkable],
        order: RelinkingOrder,
        links: LinkFn,
    ) -> Self {
        let triggers: Vec<Link> = triggers
            .iter()
            .filter_map(|trigger| self.local(trigger.link()))
            .collect();
        // One declarative clause of each kind; the later one wins.
        self.dynamic.retain(|existing| existing.kind != kind);
        self.dynamic.push(DynamicLinks {
            kind,
            triggers,
            order,
            links,
        });
        self
    }

    /// Create the behavior with `run` as its closure.
    ///
    /// A behavior created on an extent that is already in the graph is
    /// linked at the start of the next event processing pass. Links onto
    /// resources of another graph are refused with
    /// [`GraphError::IllegalUse`](crate::GraphError::IllegalUse) when the
    /// behavior is linked.
    pub fn runs<F>(self, run: F) -> Behavior
    where
        F: Fn(&RunContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let Self {
            graph,
            extent,
            name,
            mut demands,
            mut supplies,
            dynamic,
            foreign,
        } = self;
        let graph_id = graph.id();

        let mut inner = graph.lock();
        let scheduler = &mut inner.scheduler;
        let lifecycle = scheduler.extent(extent).lifecycle;
        if lifecycle == ExtentLifecycle::Removed {
            warn!(
                extent = %scheduler.extent(extent).debug_name,
                "behavior created on a removed extent will never run"
            );
        }
        let label = name.clone().unwrap_or_else(|| "behavior".to_string());
        let link_error = foreign.map(|(resource, owner)| {
            format!("{label} in {graph_id} cannot link {resource} of {owner}")
        });
        if let Some(reason) = &link_error {
            warn!(%reason, "behavior links a resource of another graph");
        }

        let mut relinks: SmallVec<[(DynamicLinks, ResourceId); 2]> = SmallVec::new();
        for links in dynamic {
            let ordering = scheduler.add_resource(
                extent,
                ResourceKind::Plain,
                Some(format!("{label} {} ordering", links.kind)),
                None,
            );
            match links.order {
                RelinkingOrder::Prior => demands.push(Link::order(graph_id, ordering)),
                RelinkingOrder::Subsequent => supplies.push(ordering),
            }
            relinks.push((links, ordering));
        }

        let id = scheduler.add_behavior(extent, name, demands, supplies, Arc::new(run));
        if let Some(reason) = &link_error {
            scheduler.reject_links(id, reason.clone());
        }
        let did_add = scheduler.extent(extent).did_add;

        for (links, ordering) in relinks {
            let mut link_demands: SmallVec<[Link; 4]> = links.triggers.into_iter().collect();
            link_demands.extend(did_add.map(|did_add| Link::reactive(graph_id, did_add)));
            let mut link_supplies: SmallVec<[ResourceId; 2]> = SmallVec::new();
            match links.order {
                RelinkingOrder::Prior => link_supplies.push(ordering),
                RelinkingOrder::Subsequent => link_demands.push(Link::order(graph_id, ordering)),
            }

            let kind = links.kind;
            let compute = links.links;
            let relink: RunFn = Arc::new(move |ctx: &RunContext<'_>| -> Result<(), BoxError> {
                let graph = ctx.graph();
                if graph.lock().scheduler.behavior(id).is_removed() {
                    return Ok(());
                }
                let computed = compute();
                match kind {
                    Relink::Demands => graph.set_dynamic_demands(id, Some(computed))?,
                    Relink::Supplies => graph.set_dynamic_supplies(id, Some(computed))?,
                }
                Ok(())
            });
            let relink_id = scheduler.add_behavior(
                extent,
                Some(format!("{label} {kind} relink")),
                link_demands,
                link_supplies,
                relink,
            );
            if let Some(reason) = &link_error {
                scheduler.reject_links(relink_id, reason.clone());
            }
            // did-add has already happened, so nothing else would compute
            // the first links.
            if lifecycle == ExtentLifecycle::Added {
                scheduler.activate_when_linked(relink_id);
            }
        }
        drop(inner);

        Behavior::new(&graph, id)
    }
}

/// Handle to a behavior in a graph.
#[derive(Clone)]
pub struct Behavior {
    graph: WeakGraph,
    id: BehaviorId,
}

impl Behavior {
    pub(crate) fn new(graph: &Graph, id: BehaviorId) -> Self {
        Self {
            graph: graph.downgrade(),
            id,
        }
    }

    pub fn id(&self) -> BehaviorId {
        self.id
    }

    /// Replace the dynamic demands with `links`.
    ///
    /// Only valid inside an event, on a behavior whose extent is in the
    /// graph. The change is applied before the next behavior runs; if a new
    /// demand was already updated in this event the behavior is activated.
    pub fn set_dynamic_demands<I>(&self, links: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = Link>,
    {
        self.graph
            .upgrade()?
            .set_dynamic_demands(self.id, Some(links.into_iter().collect()))
    }

    /// Drop every dynamic demand, keeping the static ones.
    pub fn clear_dynamic_demands(&self) -> GraphResult<()> {
        self.graph.upgrade()?.set_dynamic_demands(self.id, None)
    }

    /// Replace the dynamic supplies with the resources of `links`.
    pub fn set_dynamic_supplies<I>(&self, links: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = Link>,
    {
        self.graph
            .upgrade()?
            .set_dynamic_supplies(self.id, Some(links.into_iter().collect()))
    }

    pub fn clear_dynamic_supplies(&self) -> GraphResult<()> {
        self.graph.upgrade()?.set_dynamic_supplies(self.id, None)
    }

    /// Currently linked demands, ordering demands included.
    pub fn demands(&self) -> Vec<ResourceId> {
        self.inspect(|graph| {
            graph
                .lock()
                .scheduler
                .behavior(self.id)
                .demands
                .iter()
                .copied()
                .collect()
        })
    }

    /// Currently linked supplies.
    pub fn supplies(&self) -> Vec<ResourceId> {
        self.inspect(|graph| {
            graph
                .lock()
                .scheduler
                .behavior(self.id)
                .supplies
                .iter()
                .copied()
                .collect()
        })
    }

    /// Position in the run order: greater than the order of every behavior
    /// supplying one of its demands.
    pub fn order(&self) -> u64 {
        self.inspect(|graph| graph.lock().scheduler.behavior(self.id).order)
    }

    pub fn is_removed(&self) -> bool {
        self.inspect(|graph| graph.lock().scheduler.behavior(self.id).is_removed())
    }

    pub fn debug_name(&self) -> Option<String> {
        self.inspect(|graph| graph.lock().scheduler.behavior(self.id).debug_name.clone())
    }

    pub(crate) fn belongs_to(&self, graph: &Graph) -> bool {
        self.graph.refers_to(graph)
    }

    fn inspect<R: Default>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        self.graph
            .upgrade()
            .map(|graph| f(&graph))
            .unwrap_or_default()
    }
}

impl PartialEq for Behavior {
    fn eq(&self, other: &Self) -> bool {
        self.graph.ptr_eq(&other.graph) && self.id == other.id
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
