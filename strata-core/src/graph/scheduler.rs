//! Scheduler
//!
//! The scheduler owns the node arena and decides which behaviors run, and in
//! what order, during an event.
//!
//! # Algorithm
//!
//! Every behavior carries an integer order such that
//! `order(B) > order(S)` for every behavior `S` supplying one of `B`'s
//! demands. Orders are maintained incrementally:
//!
//! 1. Newly added or relinked behaviors are queued for linking. Linking
//!    diffs the declared demand/supply sets against the linked ones and
//!    rewrites the resource edges.
//! 2. A behavior whose links changed is marked as needing ordering, along
//!    with every behavior downstream of its supplies.
//! 3. Marked behaviors are re-sorted depth-first: a behavior's order is one
//!    more than the largest order among its suppliers. Reaching a behavior
//!    that is still on the active path means the graph has a cycle.
//! 4. Activated behaviors wait in a priority queue keyed by order, which is
//!    rebuilt whenever an ordering pass changes any order.
//!
//! # Failed Events
//!
//! The first change an event makes to a behavior's links records the links
//! it had before. When the event fails, every recorded behavior gets its old
//! links back and extents added by the event return to unattached. Newly
//! created behaviors that could not be linked, or that closed a cycle, are
//! discarded so the next event does not trip over them again.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::node::{
    inert_run, BehaviorId, BehaviorNode, ExtentId, ExtentLifecycle, ExtentNode, LifetimeId,
    LifetimeNode, Link, LinkType, OrderingState, ResourceId, ResourceKind, ResourceNode, RunFn,
    Transient,
};
use super::queue::BehaviorQueue;
use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::reactive::Event;

/// A behavior's links as they were before the running event changed them.
struct LinkSnapshot {
    linked: bool,
    demands: IndexSet<ResourceId>,
    ordering_demands: IndexSet<ResourceId>,
    supplies: IndexSet<ResourceId>,
    dynamic_demands: Option<Vec<Link>>,
    dynamic_supplies: Option<Vec<ResourceId>>,
}

impl LinkSnapshot {
    fn of(behavior: &BehaviorNode) -> Self {
        Self {
            linked: behavior.ordering != OrderingState::Untracked,
            demands: behavior.demands.clone(),
            ordering_demands: behavior.ordering_demands.clone(),
            supplies: behavior.supplies.clone(),
            dynamic_demands: behavior.dynamic_demands.clone(),
            dynamic_supplies: behavior.dynamic_supplies.clone(),
        }
    }
}

/// The node arena plus the bookkeeping of one event's pending link changes.
pub(crate) struct Scheduler {
    resources: Vec<ResourceNode>,
    behaviors: Vec<BehaviorNode>,
    extents: Vec<ExtentNode>,
    lifetimes: Vec<LifetimeNode>,

    /// Behaviors activated in the current event, lowest order first.
    activated: BehaviorQueue,

    /// Behaviors of freshly added extents that have never been linked.
    untracked: Vec<BehaviorId>,
    modified_demands: Vec<BehaviorId>,
    modified_supplies: Vec<BehaviorId>,
    needs_ordering: Vec<BehaviorId>,

    /// Link behaviors to run in the event that links them. Kept until that
    /// event completes.
    activate_on_link: Vec<BehaviorId>,

    /// Resources updated this event whose handles hold per-event data.
    updated_transients: Vec<Arc<dyn Transient>>,

    /// Pre-event links of every behavior relinked since the last completed
    /// event.
    journal: IndexMap<BehaviorId, LinkSnapshot>,
    /// Extents added since the last completed event.
    attached: Vec<ExtentId>,
    /// Behaviors that failed to link or were found on a cycle.
    rejected: IndexSet<BehaviorId>,

    /// Shared closure of every removed behavior.
    retired: RunFn,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub(crate) fn new() -> Self {
        Self {
            resources: Vec::new(),
            behaviors: Vec::new(),
            extents: Vec::new(),
            lifetimes: Vec::new(),
            activated: BehaviorQueue::new(),
            untracked: Vec::new(),
            modified_demands: Vec::new(),
            modified_supplies: Vec::new(),
            needs_ordering: Vec::new(),
            activate_on_link: Vec::new(),
            updated_transients: Vec::new(),
            journal: IndexMap::new(),
            attached: Vec::new(),
            rejected: IndexSet::new(),
            retired: inert_run(),
        }
    }

    // ------------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------------

    pub(crate) fn add_extent(&mut self, debug_name: Option<String>) -> ExtentId {
        let id = ExtentId::from_index(self.extents.len());
        let debug_name = debug_name.unwrap_or_else(|| id.to_string());
        self.extents.push(ExtentNode::new(debug_name));
        id
    }

    pub(crate) fn add_resource(
        &mut self,
        extent: ExtentId,
        kind: ResourceKind,
        debug_name: Option<String>,
        transient: Option<Arc<dyn Transient>>,
    ) -> ResourceId {
        let id = ResourceId::from_index(self.resources.len());
        self.resources
            .push(ResourceNode::new(extent, kind, debug_name, transient));
        self.extents[extent.index()].resources.push(id);
        id
    }

    /// Add a behavior to its extent.
    ///
    /// Behaviors created on an extent that is already part of the graph are
    /// linked on the next pass.
    pub(crate) fn add_behavior(
        &mut self,
        extent: ExtentId,
        debug_name: Option<String>,
        demands: SmallVec<[Link; 4]>,
        supplies: SmallVec<[ResourceId; 2]>,
        run: RunFn,
    ) -> BehaviorId {
        let id = BehaviorId::from_index(self.behaviors.len());
        self.behaviors
            .push(BehaviorNode::new(extent, debug_name, demands, supplies, run));
        let owner = &mut self.extents[extent.index()];
        owner.behaviors.push(id);
        if owner.lifecycle == ExtentLifecycle::Added {
            self.untracked.push(id);
            self.record(id);
        }
        id
    }

    /// Refuse to link a behavior whose declared links cannot be honored.
    pub(crate) fn reject_links(&mut self, id: BehaviorId, reason: String) {
        self.behaviors[id.index()].link_error = Some(reason);
    }

    pub(crate) fn resource(&self, id: ResourceId) -> &ResourceNode {
        &self.resources[id.index()]
    }

    pub(crate) fn behavior(&self, id: BehaviorId) -> &BehaviorNode {
        &self.behaviors[id.index()]
    }

    pub(crate) fn extent(&self, id: ExtentId) -> &ExtentNode {
        &self.extents[id.index()]
    }

    pub(crate) fn extent_mut(&mut self, id: ExtentId) -> &mut ExtentNode {
        &mut self.extents[id.index()]
    }

    pub(crate) fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    pub(crate) fn describe_resource(&self, id: ResourceId) -> String {
        let node = &self.resources[id.index()];
        let extent = &self.extents[node.extent.index()].debug_name;
        match &node.debug_name {
            Some(name) => format!("{id} '{name}' ({:?}) in {extent}", node.kind),
            None => format!("{id} ({:?}) in {extent}", node.kind),
        }
    }

    pub(crate) fn describe_behavior(&self, id: BehaviorId) -> String {
        let node = &self.behaviors[id.index()];
        let extent = &self.extents[node.extent.index()].debug_name;
        match &node.debug_name {
            Some(name) => format!("{id} '{name}' in {extent}"),
            None => format!("{id} in {extent}"),
        }
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Record that a resource was activated in `event` and activate every
    /// behavior reactively demanding it.
    pub(crate) fn resource_touched(&mut self, id: ResourceId, event: Event) {
        let node = &mut self.resources[id.index()];
        node.updated = Some(event);
        if let Some(transient) = &node.transient {
            self.updated_transients.push(Arc::clone(transient));
        }
        let activated: SmallVec<[BehaviorId; 8]> = node
            .subsequents
            .iter()
            .filter(|b| !self.behaviors[b.index()].ordering_demands.contains(&id))
            .copied()
            .collect();
        for behavior in activated {
            self.activate(behavior, event.sequence());
        }
    }

    /// Queue a behavior to run in the event `sequence`, at most once.
    pub(crate) fn activate(&mut self, id: BehaviorId, sequence: u64) {
        let behavior = &mut self.behaviors[id.index()];
        if behavior.is_removed() {
            return;
        }
        if behavior.enqueued_when.map_or(true, |when| when < sequence) {
            behavior.enqueued_when = Some(sequence);
            self.activated.push(id, behavior.order);
        }
    }

    /// Next activated behavior to run, skipping removed ones.
    pub(crate) fn pop_next(&mut self) -> Option<BehaviorId> {
        while let Some(id) = self.activated.pop() {
            if !self.behaviors[id.index()].is_removed() {
                return Some(id);
            }
            trace!(behavior = %id, "skipping removed behavior");
        }
        None
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        !self.activated.is_empty()
            || !self.untracked.is_empty()
            || !self.modified_demands.is_empty()
            || !self.modified_supplies.is_empty()
            || !self.needs_ordering.is_empty()
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Replace a behavior's dynamic demands; applied on the next link pass.
    pub(crate) fn update_demands(&mut self, id: BehaviorId, links: Option<Vec<Link>>) {
        self.record(id);
        self.behaviors[id.index()].dynamic_demands = links;
        self.modified_demands.push(id);
    }

    /// Replace a behavior's dynamic supplies; applied on the next link pass.
    pub(crate) fn update_supplies(&mut self, id: BehaviorId, supplies: Option<Vec<ResourceId>>) {
        self.record(id);
        self.behaviors[id.index()].dynamic_supplies = supplies;
        self.modified_supplies.push(id);
    }

    /// Activate `id` in the link pass that first links it.
    pub(crate) fn activate_when_linked(&mut self, id: BehaviorId) {
        self.activate_on_link.push(id);
    }

    /// Apply every pending link change for the event `sequence`.
    pub(crate) fn link_pending(&mut self, sequence: u64, config: &GraphConfig) -> GraphResult<()> {
        for id in std::mem::take(&mut self.untracked) {
            self.modified_supplies.push(id);
            self.modified_demands.push(id);
        }

        // Supplies first so that demand linking sees the new suppliers.
        for id in std::mem::take(&mut self.modified_supplies) {
            if self.behaviors[id.index()].is_removed() {
                continue;
            }
            if let Err(err) = self.link_supplies(id, config) {
                self.rejected.insert(id);
                return Err(err);
            }
        }
        for id in std::mem::take(&mut self.modified_demands) {
            if self.behaviors[id.index()].is_removed() {
                continue;
            }
            if let Err(err) = self.link_demands(id, sequence, config) {
                self.rejected.insert(id);
                return Err(err);
            }
        }

        for index in 0..self.activate_on_link.len() {
            let id = self.activate_on_link[index];
            self.activate(id, sequence);
        }
        Ok(())
    }

    fn check_link_error(&self, id: BehaviorId) -> GraphResult<()> {
        match &self.behaviors[id.index()].link_error {
            Some(reason) => Err(GraphError::illegal_use(reason.clone())),
            None => Ok(()),
        }
    }

    fn link_supplies(&mut self, id: BehaviorId, config: &GraphConfig) -> GraphResult<()> {
        self.check_link_error(id)?;
        let behavior = &self.behaviors[id.index()];
        if config.validate_lifetimes {
            for &supply in &behavior.static_supplies {
                let supply_extent = self.resources[supply.index()].extent;
                if !self.has_compatible_lifetime(behavior.extent, supply_extent) {
                    return Err(GraphError::configuration(format!(
                        "{} may only supply resources of its own extent or an ancestor extent, but declares {}",
                        self.describe_behavior(id),
                        self.describe_resource(supply)
                    )));
                }
            }
        }

        let mut all: IndexSet<ResourceId> = behavior.static_supplies.iter().copied().collect();
        if let Some(dynamic) = &behavior.dynamic_supplies {
            for &supply in dynamic {
                let owner = self.resources[supply.index()].extent;
                if self.extents[owner.index()].lifecycle != ExtentLifecycle::Added {
                    return Err(GraphError::configuration(format!(
                        "{} cannot dynamically supply {}: its extent is not part of the graph",
                        self.describe_behavior(id),
                        self.describe_resource(supply)
                    )));
                }
                all.insert(supply);
            }
        }

        // Validate every claim before touching any edge.
        for &supply in &all {
            if let Some(other) = self.resources[supply.index()].supplied_by {
                if other != id {
                    return Err(GraphError::configuration(format!(
                        "{} cannot be supplied by more than one behavior: supplied by {}, also claimed by {}",
                        self.describe_resource(supply),
                        self.describe_behavior(other),
                        self.describe_behavior(id)
                    )));
                }
            }
        }

        for previous in std::mem::take(&mut self.behaviors[id.index()].supplies) {
            let node = &mut self.resources[previous.index()];
            if node.supplied_by == Some(id) {
                node.supplied_by = None;
            }
        }
        for &supply in &all {
            self.resources[supply.index()].supplied_by = Some(id);
        }

        self.behaviors[id.index()].supplies = all;
        // Downstream behaviors may need new orders.
        self.mark_needs_ordering(id);
        Ok(())
    }

    fn link_demands(&mut self, id: BehaviorId, sequence: u64, config: &GraphConfig) -> GraphResult<()> {
        self.check_link_error(id)?;
        let behavior = &self.behaviors[id.index()];
        if config.validate_lifetimes {
            for link in &behavior.static_demands {
                let demand_extent = self.resources[link.resource.index()].extent;
                if !self.has_compatible_lifetime(behavior.extent, demand_extent) {
                    return Err(GraphError::configuration(format!(
                        "{} may only statically demand resources of its own extent or an ancestor extent, but declares {}",
                        self.describe_behavior(id),
                        self.describe_resource(link.resource)
                    )));
                }
            }
        }

        let mut all: IndexMap<ResourceId, LinkType> = IndexMap::new();
        for link in behavior
            .static_demands
            .iter()
            .chain(behavior.dynamic_demands.iter().flatten())
        {
            all.entry(link.resource)
                .and_modify(|existing| {
                    if link.link_type == LinkType::Reactive {
                        *existing = LinkType::Reactive;
                    }
                })
                .or_insert(link.link_type);
        }

        for &resource in all.keys() {
            let owner = self.resources[resource.index()].extent;
            if self.extents[owner.index()].lifecycle != ExtentLifecycle::Added {
                return Err(GraphError::illegal_use(format!(
                    "{} cannot demand {}: its extent is not part of the graph",
                    self.describe_behavior(id),
                    self.describe_resource(resource)
                )));
            }
        }

        let removed: SmallVec<[ResourceId; 8]> = behavior
            .demands
            .iter()
            .filter(|r| !all.contains_key(*r))
            .copied()
            .collect();
        let added: SmallVec<[ResourceId; 8]> = all
            .keys()
            .filter(|r| !behavior.demands.contains(*r))
            .copied()
            .collect();
        let order = behavior.order;
        let mut needs_ordering = behavior.ordering != OrderingState::Ordered;
        let mut needs_running = false;

        for resource in &removed {
            self.resources[resource.index()].subsequents.swap_remove(&id);
        }
        for resource in &added {
            let node = &mut self.resources[resource.index()];
            node.subsequents.insert(id);
            if all[resource] == LinkType::Reactive && node.just_updated(sequence) {
                needs_running = true;
            }
            if !needs_ordering {
                if let Some(prior) = node.supplied_by {
                    let prior = &self.behaviors[prior.index()];
                    if prior.ordering == OrderingState::Ordered && prior.order >= order {
                        needs_ordering = true;
                    }
                }
            }
        }

        if !removed.is_empty() || !added.is_empty() {
            debug!(
                behavior = %id,
                added = added.len(),
                removed = removed.len(),
                "relinked demands"
            );
        }

        let behavior = &mut self.behaviors[id.index()];
        behavior.ordering_demands = all
            .iter()
            .filter(|(_, link_type)| **link_type == LinkType::Order)
            .map(|(resource, _)| *resource)
            .collect();
        behavior.demands = all.into_keys().collect();

        if needs_ordering {
            self.mark_needs_ordering(id);
        }
        if needs_running {
            self.activate(id, sequence);
        }
        Ok(())
    }

    fn mark_needs_ordering(&mut self, id: BehaviorId) {
        let behavior = &mut self.behaviors[id.index()];
        if behavior.ordering != OrderingState::NeedsOrdering {
            behavior.ordering = OrderingState::NeedsOrdering;
            self.needs_ordering.push(id);
        }
    }

    // ------------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------------

    /// Recompute orders for every behavior marked as needing it, and for
    /// everything downstream of those.
    pub(crate) fn order_behaviors(&mut self) -> GraphResult<()> {
        if self.needs_ordering.is_empty() {
            return Ok(());
        }

        let mut pass = Vec::new();
        let mut x = 0;
        while x < self.needs_ordering.len() {
            let id = self.needs_ordering[x];
            x += 1;

            let behavior = &mut self.behaviors[id.index()];
            if behavior.is_removed() || behavior.ordering != OrderingState::NeedsOrdering {
                continue;
            }
            behavior.ordering = OrderingState::Clearing;
            pass.push(id);

            let supplies: SmallVec<[ResourceId; 4]> = behavior.supplies.iter().copied().collect();
            for supply in supplies {
                for &subsequent in &self.resources[supply.index()].subsequents {
                    let dependent = &mut self.behaviors[subsequent.index()];
                    if dependent.ordering == OrderingState::Ordered {
                        dependent.ordering = OrderingState::NeedsOrdering;
                        self.needs_ordering.push(subsequent);
                    }
                }
            }
        }
        self.needs_ordering.clear();

        let mut changed = false;
        for id in pass {
            changed |= self.sort_dfs(id)?;
        }

        if changed {
            let behaviors = &self.behaviors;
            self.activated.reheap(|id| behaviors[id.index()].order);
            trace!(queued = self.activated.len(), "re-keyed activated behaviors");
        }
        Ok(())
    }

    /// Depth-first ordering from `root` towards its suppliers.
    ///
    /// Returns whether any order changed.
    fn sort_dfs(&mut self, root: BehaviorId) -> GraphResult<bool> {
        let mut changed = false;
        let mut stack: Vec<(BehaviorId, bool)> = vec![(root, false)];

        while let Some(&(id, expanded)) = stack.last() {
            if expanded {
                stack.pop();
                let mut order = 0;
                for demand in &self.behaviors[id.index()].demands {
                    if let Some(prior) = self.resources[demand.index()].supplied_by {
                        order = order.max(self.behaviors[prior.index()].order + 1);
                    }
                }
                let behavior = &mut self.behaviors[id.index()];
                behavior.ordering = OrderingState::Ordered;
                if behavior.order != order {
                    trace!(behavior = %id, from = behavior.order, to = order, "reordered");
                    behavior.order = order;
                    changed = true;
                }
                continue;
            }

            match self.behaviors[id.index()].ordering {
                OrderingState::Ordered | OrderingState::Untracked => {
                    stack.pop();
                }
                OrderingState::Ordering => return Err(self.cycle_error(id)),
                OrderingState::Clearing | OrderingState::NeedsOrdering => {
                    self.behaviors[id.index()].ordering = OrderingState::Ordering;
                    if let Some(top) = stack.last_mut() {
                        top.1 = true;
                    }
                    let suppliers: SmallVec<[BehaviorId; 8]> = self.behaviors[id.index()]
                        .demands
                        .iter()
                        .filter_map(|demand| self.resources[demand.index()].supplied_by)
                        .collect();
                    for prior in suppliers {
                        match self.behaviors[prior.index()].ordering {
                            OrderingState::Ordered => {}
                            OrderingState::Ordering => return Err(self.cycle_error(prior)),
                            _ => stack.push((prior, false)),
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    fn cycle_error(&mut self, id: BehaviorId) -> GraphError {
        let path = self.debug_cycle(id);
        self.rejected.insert(id);
        for resource in &path {
            if let Some(supplier) = self.resources[resource.index()].supplied_by {
                self.rejected.insert(supplier);
            }
        }
        let cycle = path
            .into_iter()
            .map(|resource| self.describe_resource(resource))
            .collect();
        GraphError::Cycle {
            behavior: self.describe_behavior(id),
            cycle,
        }
    }

    /// The demanded resources leading from `target` back to itself, or an
    /// empty list when `target` is not on a cycle.
    pub(crate) fn debug_cycle(&self, target: BehaviorId) -> Vec<ResourceId> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.cycle_dfs(target, target, &mut path, &mut visited) {
            path
        } else {
            Vec::new()
        }
    }

    fn cycle_dfs(
        &self,
        current: BehaviorId,
        target: BehaviorId,
        path: &mut Vec<ResourceId>,
        visited: &mut HashSet<BehaviorId>,
    ) -> bool {
        if !visited.insert(current) {
            return false;
        }
        for &demand in &self.behaviors[current.index()].demands {
            if let Some(prior) = self.resources[demand.index()].supplied_by {
                path.push(demand);
                if prior == target || self.cycle_dfs(prior, target, path, visited) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // Lifetimes
    // ------------------------------------------------------------------------

    fn lifetime_of(&mut self, extent: ExtentId) -> LifetimeId {
        if let Some(id) = self.extents[extent.index()].lifetime {
            return id;
        }
        let id = LifetimeId::from_index(self.lifetimes.len());
        let mut node = LifetimeNode::default();
        node.extents.insert(extent);
        self.lifetimes.push(node);
        self.extents[extent.index()].lifetime = Some(id);
        id
    }

    /// Whether `inner` is `outer` or nested somewhere below it.
    fn lifetime_contains(&self, outer: LifetimeId, inner: LifetimeId) -> bool {
        let mut cursor = Some(inner);
        while let Some(current) = cursor {
            if current == outer {
                return true;
            }
            cursor = self.lifetimes[current.index()].parent;
        }
        false
    }

    fn describe_lifetime(&self, id: LifetimeId) -> String {
        let names: Vec<&str> = self.lifetimes[id.index()]
            .extents
            .iter()
            .map(|extent| self.extents[extent.index()].debug_name.as_str())
            .collect();
        names.join(", ")
    }

    fn ensure_not_removed(&self, id: ExtentId) -> GraphResult<()> {
        let extent = &self.extents[id.index()];
        if extent.lifecycle == ExtentLifecycle::Removed {
            return Err(GraphError::illegal_use(format!(
                "extent {} has been removed from the graph",
                extent.debug_name
            )));
        }
        Ok(())
    }

    /// Whether `to` shares the lifetime of `from` or encloses it.
    pub(crate) fn has_compatible_lifetime(&self, from: ExtentId, to: ExtentId) -> bool {
        if from == to {
            return true;
        }
        match (
            self.extents[from.index()].lifetime,
            self.extents[to.index()].lifetime,
        ) {
            (Some(from), Some(to)) => self.lifetime_contains(to, from),
            _ => false,
        }
    }

    pub(crate) fn add_child_lifetime(&mut self, parent: ExtentId, child: ExtentId) -> GraphResult<()> {
        self.ensure_not_removed(parent)?;
        self.ensure_not_removed(child)?;

        let outer = self.lifetime_of(parent);
        let inner = self.lifetime_of(child);
        if self.lifetime_contains(inner, outer) {
            return Err(GraphError::configuration(format!(
                "extent lifetime cannot be a child of itself: {} already contains {}",
                self.extents[child.index()].debug_name,
                self.extents[parent.index()].debug_name
            )));
        }

        match self.lifetimes[inner.index()].parent {
            Some(existing) if existing == outer => Ok(()),
            Some(existing) => Err(GraphError::configuration(format!(
                "extent {} already has parent lifetime {}",
                self.extents[child.index()].debug_name,
                self.describe_lifetime(existing)
            ))),
            None => {
                self.lifetimes[inner.index()].parent = Some(outer);
                self.lifetimes[outer.index()].children.insert(inner);
                Ok(())
            }
        }
    }

    /// Merge the lifetime of `other` into the lifetime of `extent`.
    ///
    /// None of the extents joining must be in the graph yet. The merged
    /// lifetime keeps every child of both and the parent of either.
    pub(crate) fn unify_lifetime(&mut self, extent: ExtentId, other: ExtentId) -> GraphResult<()> {
        self.ensure_not_removed(extent)?;
        self.ensure_not_removed(other)?;

        let joining: Vec<ExtentId> = match self.extents[other.index()].lifetime {
            Some(lifetime) => self.lifetimes[lifetime.index()].extents.iter().copied().collect(),
            None => vec![other],
        };
        if let Some(added) = joining
            .iter()
            .find(|id| self.extents[id.index()].lifecycle == ExtentLifecycle::Added)
        {
            return Err(GraphError::illegal_use(format!(
                "extent {} is already in the graph; a shared lifetime must be established before adding it",
                self.extents[added.index()].debug_name
            )));
        }

        let target = self.lifetime_of(extent);
        let source = self.lifetime_of(other);
        if target == source {
            return Ok(());
        }
        if self.lifetime_contains(target, source) || self.lifetime_contains(source, target) {
            return Err(GraphError::configuration(format!(
                "extents {} and {} already have nested lifetimes",
                self.extents[extent.index()].debug_name,
                self.extents[other.index()].debug_name
            )));
        }

        let source_parent = self.lifetimes[source.index()].parent;
        match (self.lifetimes[target.index()].parent, source_parent) {
            (Some(a), Some(b)) if a != b => {
                return Err(GraphError::configuration(format!(
                    "extents {} and {} have different parent lifetimes",
                    self.extents[extent.index()].debug_name,
                    self.extents[other.index()].debug_name
                )));
            }
            (None, Some(parent)) => {
                self.lifetimes[target.index()].parent = Some(parent);
                self.lifetimes[parent.index()].children.insert(target);
            }
            _ => {}
        }
        if let Some(parent) = source_parent {
            self.lifetimes[parent.index()].children.swap_remove(&source);
        }

        let merged = std::mem::take(&mut self.lifetimes[source.index()]);
        for child in merged.children {
            self.lifetimes[child.index()].parent = Some(target);
            self.lifetimes[target.index()].children.insert(child);
        }
        for member in merged.extents {
            self.extents[member.index()].lifetime = Some(target);
            self.lifetimes[target.index()].extents.insert(member);
        }
        debug!(lifetime = %self.describe_lifetime(target), "unified extent lifetimes");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Extent lifecycle
    // ------------------------------------------------------------------------

    /// Make an extent's behaviors schedulable from the event `sequence` on.
    pub(crate) fn attach_extent(
        &mut self,
        id: ExtentId,
        sequence: u64,
        config: &GraphConfig,
    ) -> GraphResult<()> {
        let extent = &self.extents[id.index()];
        match extent.lifecycle {
            ExtentLifecycle::Unattached => {}
            ExtentLifecycle::Added => {
                return Err(GraphError::illegal_use(format!(
                    "extent {} has already been added to the graph",
                    extent.debug_name
                )))
            }
            ExtentLifecycle::Removed => {
                return Err(GraphError::illegal_use(format!(
                    "extent {} was removed and cannot be added again",
                    extent.debug_name
                )))
            }
        }
        if config.validate_lifetimes {
            let parent = extent
                .lifetime
                .and_then(|lifetime| self.lifetimes[lifetime.index()].parent);
            if let Some(parent) = parent {
                let parent_added = self.lifetimes[parent.index()]
                    .extents
                    .iter()
                    .any(|member| self.extents[member.index()].lifecycle == ExtentLifecycle::Added);
                if !parent_added {
                    return Err(GraphError::illegal_use(format!(
                        "extent {} must be added after its parent lifetime {}",
                        extent.debug_name,
                        self.describe_lifetime(parent)
                    )));
                }
            }
        }

        let extent = &mut self.extents[id.index()];
        extent.lifecycle = ExtentLifecycle::Added;
        extent.added_when = Some(sequence);
        debug!(extent = %extent.debug_name, sequence, "extent added");
        let behaviors = extent.behaviors.clone();
        for behavior in behaviors {
            self.record(behavior);
            self.untracked.push(behavior);
        }
        self.attached.push(id);
        Ok(())
    }

    /// Extents to remove for `root`: its lifetime peers and every nested
    /// lifetime, descendants first and `root` last.
    pub(crate) fn removal_order(&self, root: ExtentId) -> Vec<ExtentId> {
        let Some(lifetime) = self.extents[root.index()].lifetime else {
            return vec![root];
        };
        let mut order = Vec::new();
        let mut stack = vec![(lifetime, false)];
        while let Some((id, expanded)) = stack.pop() {
            let node = &self.lifetimes[id.index()];
            if expanded {
                order.extend(node.extents.iter().copied().filter(|extent| *extent != root));
                continue;
            }
            stack.push((id, true));
            for &child in node.children.iter().rev() {
                stack.push((child, false));
            }
        }
        order.push(root);
        order
    }

    /// Permanently exclude an extent from scheduling and sever every link a
    /// live behavior still holds onto its resources.
    pub(crate) fn detach_extent(&mut self, id: ExtentId, sequence: u64) {
        let extent = &mut self.extents[id.index()];
        if extent.lifecycle == ExtentLifecycle::Removed {
            return;
        }
        let was_added = extent.lifecycle == ExtentLifecycle::Added;
        extent.lifecycle = ExtentLifecycle::Removed;
        debug!(extent = %extent.debug_name, sequence, "extent removed");
        if !was_added {
            return;
        }

        let behaviors = extent.behaviors.clone();
        let resources = extent.resources.clone();
        for behavior in behaviors {
            self.remove_behavior(behavior, sequence);
        }
        for resource in resources {
            self.sever_resource(resource);
        }
    }

    /// Drop every linked edge of a behavior, keeping its declared links.
    fn unlink(&mut self, id: BehaviorId) {
        let behavior = &mut self.behaviors[id.index()];
        let demands = std::mem::take(&mut behavior.demands);
        let supplies = std::mem::take(&mut behavior.supplies);
        behavior.ordering_demands.clear();

        for demand in demands {
            self.resources[demand.index()].subsequents.swap_remove(&id);
        }
        for supply in supplies {
            let node = &mut self.resources[supply.index()];
            if node.supplied_by == Some(id) {
                node.supplied_by = None;
            }
        }
    }

    fn remove_behavior(&mut self, id: BehaviorId, sequence: u64) {
        self.unlink(id);
        let behavior = &mut self.behaviors[id.index()];
        behavior.static_demands.clear();
        behavior.static_supplies.clear();
        behavior.dynamic_demands = None;
        behavior.dynamic_supplies = None;
        behavior.ordering = OrderingState::Untracked;
        behavior.removed_when = Some(sequence);
        behavior.run = Arc::clone(&self.retired);
    }

    fn sever_resource(&mut self, id: ResourceId) {
        let node = &mut self.resources[id.index()];
        let subsequents = std::mem::take(&mut node.subsequents);
        let supplier = node.supplied_by.take();
        node.transient = None;

        for demander in subsequents {
            let behavior = &mut self.behaviors[demander.index()];
            behavior.demands.swap_remove(&id);
            behavior.ordering_demands.swap_remove(&id);
            behavior.static_demands.retain(|link| link.resource != id);
            if let Some(dynamic) = &mut behavior.dynamic_demands {
                dynamic.retain(|link| link.resource != id);
            }
            debug!(behavior = %demander, resource = %id, "severed demand on removed resource");
        }

        if let Some(supplier) = supplier {
            let behavior = &mut self.behaviors[supplier.index()];
            behavior.supplies.swap_remove(&id);
            behavior.static_supplies.retain(|supply| *supply != id);
            if let Some(dynamic) = &mut behavior.dynamic_supplies {
                dynamic.retain(|supply| *supply != id);
            }
            debug!(behavior = %supplier, resource = %id, "severed supply of removed resource");
        }
    }

    // ------------------------------------------------------------------------
    // Event completion
    // ------------------------------------------------------------------------

    /// Remember the links of `id` before the running event first changes
    /// them.
    fn record(&mut self, id: BehaviorId) {
        if !self.journal.contains_key(&id) {
            let snapshot = LinkSnapshot::of(&self.behaviors[id.index()]);
            self.journal.insert(id, snapshot);
        }
    }

    fn resource_removed(&self, id: ResourceId) -> bool {
        let owner = self.resources[id.index()].extent;
        self.extents[owner.index()].lifecycle == ExtentLifecycle::Removed
    }

    /// Put back the links a behavior had before the failed event, minus
    /// those onto resources removed since.
    fn restore_links(&mut self, id: BehaviorId, snapshot: LinkSnapshot) {
        let demands: IndexSet<ResourceId> = snapshot
            .demands
            .into_iter()
            .filter(|resource| !self.resource_removed(*resource))
            .collect();
        let supplies: IndexSet<ResourceId> = snapshot
            .supplies
            .into_iter()
            .filter(|resource| !self.resource_removed(*resource))
            .collect();
        let ordering_demands = snapshot
            .ordering_demands
            .into_iter()
            .filter(|resource| demands.contains(resource))
            .collect();
        let dynamic_demands = snapshot.dynamic_demands.map(|links| {
            links
                .into_iter()
                .filter(|link| !self.resource_removed(link.resource))
                .collect()
        });
        let dynamic_supplies = snapshot.dynamic_supplies.map(|resources| {
            resources
                .into_iter()
                .filter(|resource| !self.resource_removed(*resource))
                .collect()
        });

        for &demand in &demands {
            self.resources[demand.index()].subsequents.insert(id);
        }
        for &supply in &supplies {
            self.resources[supply.index()].supplied_by = Some(id);
        }

        let behavior = &mut self.behaviors[id.index()];
        behavior.demands = demands;
        behavior.ordering_demands = ordering_demands;
        behavior.supplies = supplies;
        behavior.dynamic_demands = dynamic_demands;
        behavior.dynamic_supplies = dynamic_supplies;
        behavior.ordering = OrderingState::NeedsOrdering;
    }

    /// Discard per-event data held by updated resources.
    pub(crate) fn clear_transients(&mut self) {
        for transient in self.updated_transients.drain(..) {
            transient.clear();
        }
    }

    /// Keep the link changes of the completed event.
    pub(crate) fn commit(&mut self) {
        self.activate_on_link.clear();
        self.journal.clear();
        self.attached.clear();
        self.rejected.clear();
        self.clear_transients();
    }

    /// Return to the links of the last completed event after the event
    /// `sequence` failed.
    ///
    /// Extents added by the failed event become unattached again. Behaviors
    /// created on an extent already in the graph are linked again on the
    /// next pass, unless they caused the failure, in which case they are
    /// removed.
    pub(crate) fn reset(&mut self, sequence: u64) {
        self.activated.clear();
        self.untracked.clear();
        self.modified_demands.clear();
        self.modified_supplies.clear();
        self.needs_ordering.clear();
        self.clear_transients();

        let activate_on_link = std::mem::take(&mut self.activate_on_link);
        let journal = std::mem::take(&mut self.journal);
        let rejected = std::mem::take(&mut self.rejected);
        for &id in journal.keys() {
            self.unlink(id);
        }
        for id in std::mem::take(&mut self.attached) {
            let extent = &mut self.extents[id.index()];
            if extent.lifecycle == ExtentLifecycle::Added {
                extent.lifecycle = ExtentLifecycle::Unattached;
                extent.added_when = None;
                debug!(extent = %extent.debug_name, "extent addition rolled back");
            }
        }

        for (id, snapshot) in journal {
            if self.behaviors[id.index()].is_removed() {
                continue;
            }
            if snapshot.linked {
                self.restore_links(id, snapshot);
                continue;
            }

            let behavior = &mut self.behaviors[id.index()];
            behavior.ordering = OrderingState::Untracked;
            behavior.dynamic_demands = snapshot.dynamic_demands;
            behavior.dynamic_supplies = snapshot.dynamic_supplies;
            let extent = behavior.extent;
            if self.extents[extent.index()].lifecycle != ExtentLifecycle::Added {
                continue;
            }
            if rejected.contains(&id) {
                warn!(behavior = %self.describe_behavior(id), "discarding behavior that failed to link");
                self.remove_behavior(id, sequence);
            } else {
                self.record(id);
                self.untracked.push(id);
            }
        }
        self.activate_on_link = activate_on_link
            .into_iter()
            .filter(|id| self.untracked.contains(id))
            .collect();

        for (index, behavior) in self.behaviors.iter_mut().enumerate() {
            let unresolved = matches!(
                behavior.ordering,
                OrderingState::NeedsOrdering | OrderingState::Clearing | OrderingState::Ordering
            );
            if unresolved && !behavior.is_removed() {
                behavior.ordering = OrderingState::NeedsOrdering;
                self.needs_ordering.push(BehaviorId::from_index(index));
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphId;
    use smallvec::smallvec;

    fn noop() -> RunFn {
        Arc::new(|_| Ok(()))
    }

    fn reactive(resource: ResourceId) -> Link {
        Link::reactive(GraphId::next(), resource)
    }

    fn config() -> GraphConfig {
        GraphConfig::default()
    }

    struct Fixture {
        scheduler: Scheduler,
        extent: ExtentId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scheduler = Scheduler::new();
            let extent = scheduler.add_extent(Some("Test".to_string()));
            Self { scheduler, extent }
        }

        fn resource(&mut self) -> ResourceId {
            self.scheduler
                .add_resource(self.extent, ResourceKind::Moment, None, None)
        }

        fn behavior(&mut self, demands: &[ResourceId], supplies: &[ResourceId]) -> BehaviorId {
            self.scheduler.add_behavior(
                self.extent,
                None,
                demands.iter().copied().map(reactive).collect(),
                supplies.iter().copied().collect(),
                noop(),
            )
        }

        fn attach(&mut self, sequence: u64) -> GraphResult<()> {
            self.scheduler.attach_extent(self.extent, sequence, &config())?;
            self.scheduler.link_pending(sequence, &config())?;
            self.scheduler.order_behaviors()
        }
    }

    #[test]
    fn orders_follow_supply_chain() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let c = fx.resource();

        // Declared out of order on purpose.
        let last = fx.behavior(&[b], &[c]);
        let first = fx.behavior(&[a], &[b]);
        fx.attach(1).unwrap();

        let first_order = fx.scheduler.behavior(first).order;
        let last_order = fx.scheduler.behavior(last).order;
        assert!(last_order > first_order);
        assert_eq!(fx.scheduler.resource(c).supplied_by, Some(last));
        assert!(fx.scheduler.resource(b).subsequents.contains(&last));
    }

    #[test]
    fn touched_resource_activates_in_order() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let downstream = fx.behavior(&[a, b], &[]);
        let upstream = fx.behavior(&[a], &[b]);
        fx.attach(1).unwrap();

        fx.scheduler.resource_touched(a, Event::new(2, 0));
        assert_eq!(fx.scheduler.pop_next(), Some(upstream));
        assert_eq!(fx.scheduler.pop_next(), Some(downstream));
        assert_eq!(fx.scheduler.pop_next(), None);
    }

    #[test]
    fn behavior_activates_once_per_event() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let demander = fx.behavior(&[a, b], &[]);
        fx.attach(1).unwrap();

        fx.scheduler.resource_touched(a, Event::new(2, 0));
        fx.scheduler.resource_touched(b, Event::new(2, 0));
        assert_eq!(fx.scheduler.pop_next(), Some(demander));
        assert_eq!(fx.scheduler.pop_next(), None);

        fx.scheduler.resource_touched(a, Event::new(3, 0));
        assert_eq!(fx.scheduler.pop_next(), Some(demander));
    }

    #[test]
    fn order_links_do_not_activate() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let id = fx.scheduler.add_behavior(fx.extent, None, smallvec![Link::order(GraphId::next(), a)], SmallVec::new(), noop());
        fx.attach(1).unwrap();

        assert!(fx.scheduler.behavior(id).ordering_demands.contains(&a));
        fx.scheduler.resource_touched(a, Event::new(2, 0));
        assert_eq!(fx.scheduler.pop_next(), None);
    }

    #[test]
    fn double_supply_is_rejected() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        fx.behavior(&[], &[a]);
        fx.behavior(&[], &[a]);

        let err = fx.attach(1).unwrap_err();
        assert!(matches!(err, GraphError::Configuration { .. }), "{err}");
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        fx.behavior(&[a], &[b]);
        fx.behavior(&[b], &[a]);

        match fx.attach(1).unwrap_err() {
            GraphError::Cycle { cycle, .. } => assert_eq!(cycle.len(), 2),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn relink_reorders_existing_behaviors() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let x_out = fx.resource();
        let y_out = fx.resource();
        let x = fx.behavior(&[a], &[x_out]);
        let y = fx.behavior(&[a], &[y_out]);
        fx.attach(1).unwrap();

        fx.scheduler.update_demands(y, Some(vec![reactive(x_out)]));
        fx.scheduler.link_pending(2, &config()).unwrap();
        fx.scheduler.order_behaviors().unwrap();
        assert!(fx.scheduler.behavior(y).order > fx.scheduler.behavior(x).order);

        fx.scheduler.update_demands(y, None);
        fx.scheduler.update_demands(x, Some(vec![reactive(y_out)]));
        fx.scheduler.link_pending(3, &config()).unwrap();
        fx.scheduler.order_behaviors().unwrap();
        assert!(fx.scheduler.behavior(x).order > fx.scheduler.behavior(y).order);
    }

    #[test]
    fn removal_order_lists_descendants_first() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.add_extent(Some("root".to_string()));
        let child = scheduler.add_extent(Some("child".to_string()));
        let grandchild = scheduler.add_extent(Some("grandchild".to_string()));
        scheduler.add_child_lifetime(root, child).unwrap();
        scheduler.add_child_lifetime(child, grandchild).unwrap();

        assert_eq!(scheduler.removal_order(root), vec![grandchild, child, root]);
        assert!(scheduler.has_compatible_lifetime(grandchild, root));
        assert!(!scheduler.has_compatible_lifetime(root, grandchild));
    }

    #[test]
    fn lifetime_cannot_contain_itself() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.add_extent(Some("root".to_string()));
        let child = scheduler.add_extent(Some("child".to_string()));
        scheduler.add_child_lifetime(root, child).unwrap();

        let err = scheduler.add_child_lifetime(child, root).unwrap_err();
        assert!(matches!(err, GraphError::Configuration { .. }));
    }

    #[test]
    fn detach_severs_foreign_demands() {
        let mut scheduler = Scheduler::new();
        let parent = scheduler.add_extent(Some("parent".to_string()));
        let child = scheduler.add_extent(Some("child".to_string()));
        scheduler.add_child_lifetime(parent, child).unwrap();

        let child_resource = scheduler.add_resource(child, ResourceKind::Moment, None, None);
        let watcher = scheduler.add_behavior(parent, None, SmallVec::new(), SmallVec::new(), noop());

        scheduler.attach_extent(parent, 1, &config()).unwrap();
        scheduler.attach_extent(child, 1, &config()).unwrap();
        scheduler.link_pending(1, &config()).unwrap();
        scheduler.update_demands(watcher, Some(vec![reactive(child_resource)]));
        scheduler.link_pending(1, &config()).unwrap();
        scheduler.order_behaviors().unwrap();
        assert!(scheduler.behavior(watcher).demands.contains(&child_resource));

        scheduler.detach_extent(child, 2);
        assert!(!scheduler.behavior(watcher).demands.contains(&child_resource));
        assert!(scheduler.resource(child_resource).subsequents.is_empty());
        assert_eq!(scheduler.extent(child).lifecycle, ExtentLifecycle::Removed);
    }

    #[test]
    fn removed_behaviors_are_never_popped() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        fx.behavior(&[a], &[]);
        fx.attach(1).unwrap();

        fx.scheduler.resource_touched(a, Event::new(2, 0));
        fx.scheduler.detach_extent(fx.extent, 2);
        assert_eq!(fx.scheduler.pop_next(), None);
    }

    #[test]
    fn failed_attach_rolls_back_to_unattached() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let first = fx.behavior(&[a], &[b]);
        fx.behavior(&[b], &[a]);
        assert!(fx.attach(1).is_err());

        fx.scheduler.reset(1);
        assert_eq!(fx.scheduler.extent(fx.extent).lifecycle, ExtentLifecycle::Unattached);
        assert_eq!(fx.scheduler.extent(fx.extent).added_when, None);
        assert!(fx.scheduler.resource(a).subsequents.is_empty());
        assert_eq!(fx.scheduler.resource(b).supplied_by, None);
        assert_eq!(fx.scheduler.behavior(first).ordering, OrderingState::Untracked);
        assert!(!fx.scheduler.has_pending_work());
    }

    #[test]
    fn failed_relink_restores_previous_links() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let upstream = fx.behavior(&[a], &[b]);
        let downstream = fx.behavior(&[b], &[]);
        fx.attach(1).unwrap();

        // Supplying `a` from downstream closes a cycle through `b`.
        fx.scheduler.update_supplies(downstream, Some(vec![a]));
        fx.scheduler.link_pending(2, &config()).unwrap();
        assert!(fx.scheduler.order_behaviors().is_err());

        fx.scheduler.reset(2);
        fx.scheduler.order_behaviors().unwrap();
        assert_eq!(fx.scheduler.resource(a).supplied_by, None);
        assert_eq!(fx.scheduler.behavior(downstream).dynamic_supplies, None);
        assert!(fx.scheduler.behavior(downstream).order > fx.scheduler.behavior(upstream).order);
        assert!(!fx.scheduler.behavior(downstream).is_removed());
    }

    #[test]
    fn late_behavior_closing_a_cycle_is_discarded() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let kept = fx.behavior(&[a], &[b]);
        fx.attach(1).unwrap();

        let late = fx.behavior(&[b], &[a]);
        fx.scheduler.link_pending(2, &config()).unwrap();
        assert!(fx.scheduler.order_behaviors().is_err());

        fx.scheduler.reset(2);
        assert!(fx.scheduler.behavior(late).is_removed());
        assert!(!fx.scheduler.behavior(kept).is_removed());
        assert_eq!(fx.scheduler.resource(a).supplied_by, None);
        assert_eq!(fx.scheduler.resource(b).supplied_by, Some(kept));

        fx.scheduler.link_pending(3, &config()).unwrap();
        fx.scheduler.order_behaviors().unwrap();
        fx.scheduler.resource_touched(a, Event::new(3, 0));
        assert_eq!(fx.scheduler.pop_next(), Some(kept));
    }

    #[test]
    fn supply_collision_leaves_links_untouched() {
        let mut fx = Fixture::new();
        let a = fx.resource();
        let b = fx.resource();
        let owner = fx.behavior(&[], &[a]);
        let claimer = fx.behavior(&[], &[b]);
        fx.attach(1).unwrap();

        fx.scheduler.update_supplies(claimer, Some(vec![a]));
        let err = fx.scheduler.link_pending(2, &config()).unwrap_err();
        assert!(matches!(err, GraphError::Configuration { .. }), "{err}");
        assert_eq!(fx.scheduler.resource(a).supplied_by, Some(owner));
        assert_eq!(fx.scheduler.resource(b).supplied_by, Some(claimer));
        assert!(fx.scheduler.behavior(claimer).supplies.contains(&b));
    }

    #[test]
    fn unified_lifetimes_are_compatible_and_removed_together() {
        let mut scheduler = Scheduler::new();
        let parent = scheduler.add_extent(Some("parent".to_string()));
        let left = scheduler.add_extent(Some("left".to_string()));
        let right = scheduler.add_extent(Some("right".to_string()));
        let nested = scheduler.add_extent(Some("nested".to_string()));
        scheduler.add_child_lifetime(parent, left).unwrap();
        scheduler.add_child_lifetime(right, nested).unwrap();
        scheduler.unify_lifetime(left, right).unwrap();

        assert!(scheduler.has_compatible_lifetime(left, right));
        assert!(scheduler.has_compatible_lifetime(right, left));
        assert!(scheduler.has_compatible_lifetime(right, parent));
        assert!(scheduler.has_compatible_lifetime(nested, left));
        assert!(!scheduler.has_compatible_lifetime(parent, right));

        assert_eq!(scheduler.removal_order(right), vec![nested, left, right]);
        let from_parent = scheduler.removal_order(parent);
        assert_eq!(from_parent.last(), Some(&parent));
        assert_eq!(from_parent.len(), 4);
    }

    #[test]
    fn unify_rejects_added_extents_and_nesting() {
        let mut scheduler = Scheduler::new();
        let outer = scheduler.add_extent(Some("outer".to_string()));
        let inner = scheduler.add_extent(Some("inner".to_string()));
        let added = scheduler.add_extent(Some("added".to_string()));
        scheduler.add_child_lifetime(outer, inner).unwrap();
        scheduler.attach_extent(added, 1, &config()).unwrap();

        let err = scheduler.unify_lifetime(outer, inner).unwrap_err();
        assert!(matches!(err, GraphError::Configuration { .. }), "{err}");
        let err = scheduler.unify_lifetime(outer, added).unwrap_err();
        assert!(matches!(err, GraphError::IllegalUse { .. }), "{err}");
        // The added extent may still take others into its lifetime.
        scheduler.unify_lifetime(added, outer).unwrap();
        assert!(scheduler.has_compatible_lifetime(inner, added));
    }

    #[test]
    fn removal_drops_closures_and_transients() {
        struct Noop;
        impl Transient for Noop {
            fn clear(&self) {}
        }

        let mut fx = Fixture::new();
        let transient: Arc<dyn Transient> = Arc::new(Noop);
        let state = fx.scheduler.add_resource(
            fx.extent,
            ResourceKind::State,
            None,
            Some(Arc::clone(&transient)),
        );
        let captured = Arc::new(());
        let held = Arc::clone(&captured);
        let id = fx.scheduler.add_behavior(
            fx.extent,
            None,
            smallvec![reactive(state)],
            SmallVec::new(),
            Arc::new(move |_| {
                let _ = &held;
                Ok(())
            }),
        );
        fx.attach(1).unwrap();
        assert_eq!(Arc::strong_count(&captured), 2);
        assert_eq!(Arc::strong_count(&transient), 2);

        fx.scheduler.detach_extent(fx.extent, 2);
        assert!(fx.scheduler.behavior(id).is_removed());
        assert_eq!(Arc::strong_count(&captured), 1);
        assert_eq!(Arc::strong_count(&transient), 1);
    }
}
