//! State Resources
//!
//! A State holds a value that persists across events. It remembers the event
//! that produced its value and, while an event is running, the value it held
//! before its first update in that event.
//!
//! # Updates
//!
//! 1. `update(v)` does nothing when `v` equals the current value.
//!
//! 2. Otherwise the current value and event move into the prior slot (only
//!    on the first update of the event), `v` becomes current, and every
//!    behavior demanding the state is activated.
//!
//! 3. `update_force(v)` skips the equality check, for values whose contents
//!    changed without them comparing unequal.
//!
//! # Memory Layout
//!
//! Only two slots are kept: current and prior. The prior slot is cleared
//! when the event closes, which is what makes `trace_value` read the value
//! from before the event without a growing history.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::resource::{Linkable, ResourceCore};
use super::runtime::Graph;
use super::{Behavior, Event};
use crate::error::GraphResult;
use crate::graph::{ExtentId, GraphId, ResourceId, ResourceKind, Transient};

struct StateSlot<T> {
    value: T,
    event: Event,
    /// Value and event from before the first update in the running event.
    prior: Option<(T, Event)>,
}

impl<T: Send + Sync> Transient for RwLock<StateSlot<T>> {
    fn clear(&self) {
        self.write().prior = None;
    }
}

/// A resource holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
///
/// let graph = Graph::new();
/// let extent = Extent::new(&graph);
/// let count = extent.state(0);
/// extent.add_to_graph_with_action().unwrap();
///
/// count.update_with_action(5).unwrap();
/// assert_eq!(count.value(), 5);
/// assert_eq!(count.event().sequence(), 2);
/// ```
pub struct State<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: ResourceCore,
    slot: Arc<RwLock<StateSlot<T>>>,
}

impl<T> State<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(graph: &Graph, extent: ExtentId, initial: T, debug_name: Option<String>) -> Self {
        let slot = Arc::new(RwLock::new(StateSlot {
            value: initial,
            event: Event::INITIAL,
            prior: None,
        }));
        let transient: Arc<dyn Transient> = slot.clone();
        let core = ResourceCore::register(graph, extent, ResourceKind::State, debug_name, Some(transient));
        Self { core, slot }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id()
    }

    /// The current value.
    pub fn value(&self) -> T {
        self.core.accessed();
        self.slot.read().value.clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.accessed();
        f(&self.slot.read().value)
    }

    /// The event in which the current value was set.
    pub fn event(&self) -> Event {
        self.core.accessed();
        self.slot.read().event
    }

    /// The value as of the start of the running event, ignoring updates made
    /// earlier in the same event. Outside an event this is the current value.
    ///
    /// Reading a trace value does not require a demand.
    pub fn trace_value(&self) -> T {
        let slot = self.slot.read();
        match &slot.prior {
            Some((value, _)) => value.clone(),
            None => slot.value.clone(),
        }
    }

    /// The event of [`trace_value`](Self::trace_value).
    pub fn trace_event(&self) -> Event {
        let slot = self.slot.read();
        match &slot.prior {
            Some((_, event)) => *event,
            None => slot.event,
        }
    }

    /// Whether the state was updated in the running event.
    pub fn just_updated(&self) -> bool {
        self.core.accessed();
        let event = self.slot.read().event;
        self.core.is_current(Some(event))
    }

    /// Update the value and activate demanders, even if it is unchanged.
    pub fn update_force(&self, value: T) -> GraphResult<()> {
        let (graph, event) = self.core.begin_update()?;
        self.store(value, event);
        graph.touch(self.core.id(), event);
        Ok(())
    }

    /// Open an action and [`update_force`](Self::update_force) in it.
    pub fn update_force_with_action(&self, value: T) -> GraphResult<()> {
        let graph = self.core.graph()?;
        graph.action(|| Ok(self.update_force(value)?))
    }

    fn store(&self, value: T, event: Event) {
        let mut slot = self.slot.write();
        let previous_value = std::mem::replace(&mut slot.value, value);
        let previous_event = std::mem::replace(&mut slot.event, event);
        if slot.prior.is_none() {
            slot.prior = Some((previous_value, previous_event));
        }
    }

    /// The behavior supplying this state, once linked.
    pub fn supplied_by(&self) -> Option<Behavior> {
        self.core.supplied_by()
    }

    pub fn debug_name(&self) -> Option<String> {
        self.core.debug_name()
    }
}

impl<T> State<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Update the value and activate demanders. Does nothing when `value`
    /// equals the current value.
    pub fn update(&self, value: T) -> GraphResult<()> {
        let (graph, event) = self.core.begin_update()?;
        if self.slot.read().value == value {
            return Ok(());
        }
        self.store(value, event);
        graph.touch(self.core.id(), event);
        Ok(())
    }

    /// Open an action and [`update`](Self::update) in it.
    pub fn update_with_action(&self, value: T) -> GraphResult<()> {
        let graph = self.core.graph()?;
        graph.action(|| Ok(self.update(value)?))
    }

    /// Whether the state was updated in the running event and now equals
    /// `value`.
    pub fn just_updated_to(&self, value: &T) -> bool {
        self.just_updated() && self.slot.read().value == *value
    }

    /// Whether the state was updated in the running event and held `value`
    /// before that.
    pub fn just_updated_from(&self, value: &T) -> bool {
        if !self.just_updated() {
            return false;
        }
        matches!(&self.slot.read().prior, Some((prior, _)) if prior == value)
    }

    pub fn just_updated_to_from(&self, to: &T, from: &T) -> bool {
        self.just_updated_to(to) && self.just_updated_from(from)
    }
}

impl<T> Clone for State<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Linkable for State<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn resource_id(&self) -> ResourceId {
        self.core.id()
    }

    fn graph_id(&self) -> GraphId {
        self.core.graph_id()
    }
}

impl<T> fmt::Debug for State<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("State")
            .field("id", &self.core.id())
            .field("value", &slot.value)
            .field("sequence", &slot.event.sequence())
            .finish()
    }
}
