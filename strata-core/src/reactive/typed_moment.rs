//! Typed Moment Resources
//!
//! A TypedMoment is a Moment that carries a value, such as the result of a
//! network call. The value is only readable during the event that updated
//! the moment; it is dropped when that event closes.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::behavior::BehaviorBuilder;
use super::resource::{Linkable, ResourceCore};
use super::runtime::Graph;
use super::{Behavior, Event};
use crate::error::GraphResult;
use crate::graph::{ExtentId, GraphId, ResourceId, ResourceKind, Transient};

struct Happened<T> {
    event: Option<Event>,
    value: Option<T>,
}

impl<T: Send + Sync> Transient for RwLock<Happened<T>> {
    fn clear(&self) {
        self.write().value = None;
    }
}

/// A moment carrying a value of type `T` for the duration of one event.
pub struct TypedMoment<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: ResourceCore,
    happened: Arc<RwLock<Happened<T>>>,
}

impl<T> TypedMoment<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(graph: &Graph, extent: ExtentId, debug_name: Option<String>) -> Self {
        let happened = Arc::new(RwLock::new(Happened {
            event: None,
            value: None,
        }));
        let transient: Arc<dyn Transient> = happened.clone();
        let core = ResourceCore::register(
            graph,
            extent,
            ResourceKind::TypedMoment,
            debug_name,
            Some(transient),
        );
        Self { core, happened }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id()
    }

    /// Mark the moment as happened with `value` and activate demanders.
    pub fn update(&self, value: T) -> GraphResult<()> {
        let (graph, event) = self.core.begin_update()?;
        {
            let mut happened = self.happened.write();
            happened.event = Some(event);
            happened.value = Some(value);
        }
        graph.touch(self.core.id(), event);
        Ok(())
    }

    /// Open an action and [`update`](Self::update) in it.
    pub fn update_with_action(&self, value: T) -> GraphResult<()> {
        let graph = self.core.graph()?;
        graph.action(|| Ok(self.update(value)?))
    }

    /// The value, if the moment happened in the running event.
    pub fn value(&self) -> Option<T> {
        self.core.accessed();
        let happened = self.happened.read();
        if self.core.is_current(happened.event) {
            happened.value.clone()
        } else {
            None
        }
    }

    /// Whether the moment happened in the running event.
    pub fn just_updated(&self) -> bool {
        self.core.accessed();
        self.core.is_current(self.happened.read().event)
    }

    /// The last event in which the moment happened.
    pub fn event(&self) -> Option<Event> {
        self.core.accessed();
        self.happened.read().event
    }

    /// Run `on_updated` as a side effect after every event in which the
    /// moment happens.
    ///
    /// The observer is a behavior on the moment's extent. When that extent
    /// is already in the graph the observer is linked in the next event.
    pub fn observe_updates<F>(&self, on_updated: F) -> GraphResult<Behavior>
    where
        F: Fn(T, Event) + Send + Sync + 'static,
    {
        let graph = self.core.graph()?;
        let extent = self.core.extent()?;
        let on_updated = Arc::new(on_updated);
        let moment = self.clone();
        let observer = BehaviorBuilder::new(graph, extent)
            .named(format!("observe {}", self.core.id()))
            .demands(&[self])
            .runs(move |ctx| {
                if let Some(value) = moment.value() {
                    let on_updated = Arc::clone(&on_updated);
                    let event = ctx.event();
                    ctx.side_effect(move || on_updated(value, event))?;
                }
                Ok(())
            });
        Ok(observer)
    }

    pub fn supplied_by(&self) -> Option<Behavior> {
        self.core.supplied_by()
    }

    pub fn debug_name(&self) -> Option<String> {
        self.core.debug_name()
    }
}

impl<T> TypedMoment<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Whether the moment happened in the running event with `value`.
    pub fn just_updated_to(&self, value: &T) -> bool {
        self.value().as_ref() == Some(value)
    }
}

impl<T> Clone for TypedMoment<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            happened: Arc::clone(&self.happened),
        }
    }
}

impl<T> Linkable for TypedMoment<T>
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

impl<T> fmt::Debug for TypedMoment<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let happened = self.happened.read();
        f.debug_struct("TypedMoment")
            .field("id", &self.core.id())
            .field("event", &happened.event)
            .field("value", &happened.value)
            .finish()
    }
}
