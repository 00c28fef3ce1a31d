//! Graph Runtime
//!
//! The graph is the transaction boundary. It owns the node arena and runs
//! the event loop that turns one action into a fully propagated result.
//!
//! # How It Works
//!
//! 1. `action(f)` opens a new event and runs `f`, which updates resources.
//!
//! 2. Every update activates the behaviors demanding the updated resource.
//!
//! 3. The loop links any pending relinks, re-sorts any behaviors whose order
//!    may be stale, then runs the activated behavior with the lowest order.
//!    Behaviors may update the resources they supply and may relink, both of
//!    which can activate further behaviors. This repeats until nothing is
//!    left to run.
//!
//! 4. Side effects queued by behaviors run in enqueue order.
//!
//! 5. Per-event data is cleared and the event closes.
//!
//! # Thread Safety
//!
//! A graph can be shared across threads. Events are serialized by a gate:
//! an `action` on another thread blocks until the running event finishes.
//! The internal lock is never held while user code runs, so closures are
//! free to read and update resources. Calling `action` from the thread that
//! is already running an event is an error; `action_async` queues instead.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info_span, trace, warn};

use super::context::{EventLoopPhase, RunContext};
use super::effect::{QueuedAction, SideEffect};
use super::{Behavior, Event};
use crate::config::{system_clock, DateProvider, GraphConfig};
use crate::error::{BoxError, GraphError, GraphResult};
use crate::graph::{BehaviorId, ExtentId, ExtentLifecycle, GraphId, Link, ResourceId, Scheduler};

/// State guarded by the graph lock.
pub(crate) struct GraphInner {
    pub(crate) scheduler: Scheduler,
    pub(crate) config: GraphConfig,
    current_event: Option<Event>,
    last_event: Event,
    phase: EventLoopPhase,
    loop_thread: Option<ThreadId>,
    current_behavior: Option<BehaviorId>,
    effects: VecDeque<SideEffect>,
}

impl GraphInner {
    fn on_loop_thread(&self) -> bool {
        self.loop_thread == Some(thread::current().id())
    }

    /// The current event, if the calling thread may update resources now.
    fn processing_event(&self) -> Option<Event> {
        if self.phase.is_processing() && self.on_loop_thread() {
            self.current_event
        } else {
            None
        }
    }
}

struct GraphShared {
    id: GraphId,
    inner: Mutex<GraphInner>,

    /// Held for the whole of an event, serializing actions across threads.
    gate: Mutex<()>,

    queued: Mutex<VecDeque<QueuedAction>>,

    /// Sequence of the open event, or 0. Read without the lock by
    /// `just_updated` checks.
    current_sequence: AtomicU64,

    clock: Arc<dyn DateProvider>,
}

/// A behavior graph.
///
/// Cloning a `Graph` yields another handle to the same graph.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
///
/// let graph = Graph::new();
/// let extent = Extent::new(&graph);
/// let celsius = extent.state(20.0_f64);
/// let fahrenheit = extent.state(68.0_f64);
///
/// let (c, f) = (celsius.clone(), fahrenheit.clone());
/// extent
///     .behavior()
///     .demands(&[&celsius])
///     .supplies(&[&fahrenheit])
///     .runs(move |_ctx| {
///         f.update(c.value() * 9.0 / 5.0 + 32.0)?;
///         Ok(())
///     });
/// extent.add_to_graph_with_action().unwrap();
///
/// celsius.update_with_action(100.0).unwrap();
/// assert_eq!(fahrenheit.value(), 212.0);
/// ```
#[derive(Clone)]
pub struct Graph {
    shared: Arc<GraphShared>,
}

/// A non-owning graph handle held by resources and behaviors.
#[derive(Clone)]
pub(crate) struct WeakGraph {
    shared: Weak<GraphShared>,
}

impl WeakGraph {
    pub(crate) fn upgrade(&self) -> GraphResult<Graph> {
        self.shared
            .upgrade()
            .map(|shared| Graph { shared })
            .ok_or_else(|| GraphError::illegal_use("the graph owning this node has been dropped"))
    }

    pub(crate) fn ptr_eq(&self, other: &WeakGraph) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether this handle refers to `graph`.
    pub(crate) fn refers_to(&self, graph: &Graph) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Arc::as_ptr(&graph.shared))
    }

    /// Sequence of the open event, if any.
    pub(crate) fn current_sequence(&self) -> Option<u64> {
        self.shared.upgrade().and_then(|shared| {
            match shared.current_sequence.load(Ordering::SeqCst) {
                0 => None,
                sequence => Some(sequence),
            }
        })
    }
}

/// Restores the graph to idle if an event unwinds or fails.
struct EventGuard<'a> {
    graph: &'a Graph,
    event: Event,
    completed: bool,
}

impl Drop for EventGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.graph.abort_event(self.event);
        }
    }
}

impl Graph {
    /// Create a graph with the default configuration and the system clock.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a graph whose events are stamped by `clock`.
    pub fn with_clock(config: GraphConfig, clock: Arc<dyn DateProvider>) -> Self {
        let inner = GraphInner {
            scheduler: Scheduler::new(),
            config,
            current_event: None,
            last_event: Event::INITIAL,
            phase: EventLoopPhase::Idle,
            loop_thread: None,
            current_behavior: None,
            effects: VecDeque::new(),
        };
        Self {
            shared: Arc::new(GraphShared {
                id: GraphId::next(),
                inner: Mutex::new(inner),
                gate: Mutex::new(()),
                queued: Mutex::new(VecDeque::new()),
                current_sequence: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Identity of this graph, carried by every [`Link`] made from its
    /// resources.
    pub fn id(&self) -> GraphId {
        self.shared.id
    }

    pub fn config(&self) -> GraphConfig {
        self.lock().config.clone()
    }

    /// The open event, if an event is running.
    pub fn current_event(&self) -> Option<Event> {
        self.lock().current_event
    }

    /// The most recently completed event, or [`Event::INITIAL`].
    pub fn last_event(&self) -> Event {
        self.lock().last_event
    }

    pub fn phase(&self) -> EventLoopPhase {
        self.lock().phase
    }

    pub fn resource_count(&self) -> usize {
        self.lock().scheduler.resource_count()
    }

    pub fn behavior_count(&self) -> usize {
        self.lock().scheduler.behavior_count()
    }

    /// The resources forming a dependency cycle through `behavior`, or an
    /// empty list when it is not on one.
    pub fn debug_cycle(&self, behavior: &Behavior) -> Vec<ResourceId> {
        if !behavior.belongs_to(self) {
            return Vec::new();
        }
        self.lock().scheduler.debug_cycle(behavior.id())
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Run `f` as a new event and propagate its updates.
    ///
    /// Blocks while another thread's event is running. Returns once every
    /// activated behavior and every side effect of the event has run.
    pub fn action<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        self.run_action(None, f)
    }

    /// Like [`action`](Self::action), with a name for tracing and errors.
    pub fn action_named<F>(&self, name: &str, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        self.run_action(Some(name), f)
    }

    /// Run `f` as a new event as soon as the graph is idle.
    ///
    /// When the graph is idle the action runs before this returns. When an
    /// event is running, on this thread or another, the action is queued and
    /// runs after that event completes. Queued actions run in submission
    /// order. Failures of queued actions are logged; when the actions run
    /// before this returns, the first failure is also returned.
    pub fn action_async<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.shared.queued.lock().push_back(QueuedAction::new(None, f));
        self.drain_queued()
    }

    pub fn action_async_named<F>(&self, name: &str, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.shared
            .queued
            .lock()
            .push_back(QueuedAction::new(Some(name.to_string()), f));
        self.drain_queued()
    }

    fn run_action<F>(&self, name: Option<&str>, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        {
            let inner = self.lock();
            if inner.on_loop_thread() {
                let message = if inner.phase == EventLoopPhase::SideEffects {
                    "action cannot be called from a side effect; use action_async to run it after the current event"
                } else {
                    "action cannot be nested inside another action or a behavior"
                };
                return Err(GraphError::illegal_use(message));
            }
        }

        let result = {
            let _gate = self.shared.gate.lock();
            self.run_event(name, f)
        };
        let drained = self.drain_queued();
        result.and(drained)
    }

    /// Run queued actions until the queue is empty or another caller holds
    /// the gate.
    fn drain_queued(&self) -> GraphResult<()> {
        let mut first_error = None;
        loop {
            let Some(gate) = self.shared.gate.try_lock() else {
                break;
            };
            loop {
                let next = self.shared.queued.lock().pop_front();
                let Some(action) = next else {
                    break;
                };
                if let Err(err) = self.run_event(action.name.as_deref(), action.run) {
                    error!(
                        action = action.name.as_deref().unwrap_or("async action"),
                        error = %err,
                        "queued action failed"
                    );
                    first_error.get_or_insert(err);
                }
            }
            drop(gate);

            // Work queued between the last pop and releasing the gate.
            if self.shared.queued.lock().is_empty() {
                break;
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------------

    fn run_event<F>(&self, name: Option<&str>, f: F) -> GraphResult<()>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        let event = {
            let mut inner = self.lock();
            let event = Event::new(inner.last_event.sequence() + 1, self.shared.clock.now());
            inner.current_event = Some(event);
            inner.phase = EventLoopPhase::Action;
            inner.loop_thread = Some(thread::current().id());
            event
        };
        self.shared
            .current_sequence
            .store(event.sequence(), Ordering::SeqCst);

        let span = info_span!("event", sequence = event.sequence());
        let _entered = span.enter();
        debug!(action = name.unwrap_or("action"), "event opened");

        let mut guard = EventGuard {
            graph: self,
            event,
            completed: false,
        };

        f().map_err(|err| GraphError::from_run(name.unwrap_or("action"), err))?;
        self.run_behaviors(event)?;
        self.run_side_effects();

        guard.completed = true;
        self.close_event(event);
        Ok(())
    }

    fn run_behaviors(&self, event: Event) -> GraphResult<()> {
        loop {
            let (id, run) = {
                let mut guard = self.lock();
                let inner = &mut *guard;
                inner.phase = EventLoopPhase::Updates;
                if !inner.scheduler.has_pending_work() {
                    break;
                }
                inner
                    .scheduler
                    .link_pending(event.sequence(), &inner.config)?;
                inner.scheduler.order_behaviors()?;
                let Some(id) = inner.scheduler.pop_next() else {
                    continue;
                };
                inner.current_behavior = Some(id);
                (id, Arc::clone(&inner.scheduler.behavior(id).run))
            };

            trace!(behavior = %id, "running behavior");
            let context = RunContext::new(self, id, event);
            let result = run(&context);

            let mut inner = self.lock();
            inner.current_behavior = None;
            if let Err(err) = result {
                let behavior = inner.scheduler.describe_behavior(id);
                return Err(GraphError::from_run(behavior, err));
            }
        }
        Ok(())
    }

    fn run_side_effects(&self) {
        loop {
            let effect = {
                let mut inner = self.lock();
                inner.phase = EventLoopPhase::SideEffects;
                inner.effects.pop_front()
            };
            let Some(effect) = effect else {
                break;
            };
            trace!(effect = effect.name(), "running side effect");
            effect.run();
        }
    }

    fn close_event(&self, event: Event) {
        let mut inner = self.lock();
        inner.scheduler.commit();
        inner.last_event = event;
        inner.current_event = None;
        inner.phase = EventLoopPhase::Idle;
        inner.loop_thread = None;
        self.shared.current_sequence.store(0, Ordering::SeqCst);
        debug!(sequence = event.sequence(), "event closed");
    }

    fn abort_event(&self, event: Event) {
        let mut inner = self.lock();
        inner.scheduler.reset(event.sequence());
        let discarded = inner.effects.len();
        inner.effects.clear();
        inner.current_behavior = None;
        inner.last_event = event;
        inner.current_event = None;
        inner.phase = EventLoopPhase::Idle;
        inner.loop_thread = None;
        self.shared.current_sequence.store(0, Ordering::SeqCst);
        debug!(
            sequence = event.sequence(),
            discarded_side_effects = discarded,
            "event aborted"
        );
    }

    // ------------------------------------------------------------------------
    // Side effects
    // ------------------------------------------------------------------------

    /// Queue `f` to run after every behavior of the current event finished.
    ///
    /// Only valid inside a running behavior.
    pub fn side_effect<F>(&self, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_side_effect(None, f)
    }

    pub fn side_effect_named<F>(&self, name: &str, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_side_effect(Some(name.to_string()), f)
    }

    fn enqueue_side_effect<F>(&self, name: Option<String>, f: F) -> GraphResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.lock();
        let in_behavior = inner.phase == EventLoopPhase::Updates
            && inner.on_loop_thread()
            && inner.current_behavior.is_some();
        if !in_behavior {
            return Err(GraphError::illegal_use(
                "side effects can only be created inside a running behavior",
            ));
        }
        inner.effects.push_back(SideEffect::new(name, f));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------------

    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.shared.inner.lock()
    }

    pub(crate) fn downgrade(&self) -> WeakGraph {
        WeakGraph {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Validate that the calling context may update `id`; returns the event
    /// the update belongs to.
    pub(crate) fn prepare_update(&self, id: ResourceId) -> GraphResult<Event> {
        let inner = self.lock();
        let scheduler = &inner.scheduler;
        let Some(event) = inner.processing_event() else {
            return Err(GraphError::illegal_use(format!(
                "{} can only be updated inside an action or a behavior",
                scheduler.describe_resource(id)
            )));
        };

        let node = scheduler.resource(id);
        if scheduler.extent(node.extent).lifecycle == ExtentLifecycle::Removed {
            return Err(GraphError::illegal_use(format!(
                "{} belongs to a removed extent and cannot be updated",
                scheduler.describe_resource(id)
            )));
        }

        if inner.config.validate_dependencies {
            match (node.supplied_by, inner.current_behavior) {
                (Some(supplier), current) if current != Some(supplier) => {
                    return Err(GraphError::illegal_use(format!(
                        "{} can only be updated by its supplier {}",
                        scheduler.describe_resource(id),
                        scheduler.describe_behavior(supplier)
                    )));
                }
                (None, Some(current)) => {
                    return Err(GraphError::illegal_use(format!(
                        "{} is not supplied by {} and can only be updated in an action",
                        scheduler.describe_resource(id),
                        scheduler.describe_behavior(current)
                    )));
                }
                _ => {}
            }
        }
        Ok(event)
    }

    /// Record an update of `id` and activate its demanders.
    pub(crate) fn touch(&self, id: ResourceId, event: Event) {
        self.lock().scheduler.resource_touched(id, event);
    }

    /// Warn when the running behavior reads a resource it is not linked to.
    pub(crate) fn check_access(&self, id: ResourceId) {
        let inner = self.lock();
        if !inner.config.validate_dependencies || !inner.on_loop_thread() {
            return;
        }
        let Some(current) = inner.current_behavior else {
            return;
        };
        let scheduler = &inner.scheduler;
        if scheduler.resource(id).supplied_by == Some(current)
            || scheduler.behavior(current).demands.contains(&id)
        {
            return;
        }
        warn!(
            resource = %scheduler.describe_resource(id),
            behavior = %scheduler.describe_behavior(current),
            "behavior read a resource it neither demands nor supplies"
        );
    }

    /// Add an extent in the current event.
    pub(crate) fn attach_extent(&self, id: ExtentId) -> GraphResult<Event> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(event) = inner.processing_event() else {
            return Err(GraphError::illegal_use(format!(
                "extent {} can only be added inside an action or a behavior",
                inner.scheduler.extent(id).debug_name
            )));
        };
        inner
            .scheduler
            .attach_extent(id, event.sequence(), &inner.config)?;
        Ok(event)
    }

    /// Remove an extent and all of its lifetime descendants in the current
    /// event, descendants first.
    pub(crate) fn detach_extent(&self, id: ExtentId) -> GraphResult<()> {
        let mut inner = self.lock();
        let Some(event) = inner.processing_event() else {
            return Err(GraphError::illegal_use(format!(
                "extent {} can only be removed inside an action or a behavior",
                inner.scheduler.extent(id).debug_name
            )));
        };
        if inner.scheduler.extent(id).lifecycle != ExtentLifecycle::Added {
            return Err(GraphError::illegal_use(format!(
                "extent {} is not part of the graph",
                inner.scheduler.extent(id).debug_name
            )));
        }
        for extent in inner.scheduler.removal_order(id) {
            inner.scheduler.detach_extent(extent, event.sequence());
        }
        Ok(())
    }

    fn check_relink(inner: &GraphInner, id: BehaviorId) -> GraphResult<()> {
        let scheduler = &inner.scheduler;
        if inner.processing_event().is_none() {
            return Err(GraphError::illegal_use(format!(
                "links of {} can only change inside an action or a behavior",
                scheduler.describe_behavior(id)
            )));
        }
        let behavior = scheduler.behavior(id);
        if behavior.is_removed()
            || scheduler.extent(behavior.extent).lifecycle != ExtentLifecycle::Added
        {
            return Err(GraphError::illegal_use(format!(
                "{} must belong to an extent in the graph to change its links",
                scheduler.describe_behavior(id)
            )));
        }
        Ok(())
    }

    /// Reject links made from another graph's resources.
    fn check_foreign(&self, inner: &GraphInner, id: BehaviorId, links: &[Link]) -> GraphResult<()> {
        match links.iter().find(|link| link.graph() != self.id()) {
            Some(link) => Err(GraphError::illegal_use(format!(
                "{} of {} cannot link {} of {}",
                inner.scheduler.describe_behavior(id),
                self.id(),
                link.resource(),
                link.graph()
            ))),
            None => Ok(()),
        }
    }

    /// Replace the dynamic demands of `id`; `None` removes them.
    pub(crate) fn set_dynamic_demands(&self, id: BehaviorId, links: Option<Vec<Link>>) -> GraphResult<()> {
        let mut inner = self.lock();
        Self::check_relink(&inner, id)?;
        self.check_foreign(&inner, id, links.as_deref().unwrap_or_default())?;
        inner.scheduler.update_demands(id, links);
        Ok(())
    }

    /// Replace the dynamic supplies of `id`; `None` removes them.
    pub(crate) fn set_dynamic_supplies(&self, id: BehaviorId, links: Option<Vec<Link>>) -> GraphResult<()> {
        let mut inner = self.lock();
        Self::check_relink(&inner, id)?;
        self.check_foreign(&inner, id, links.as_deref().unwrap_or_default())?;
        let supplies = links.map(|links| links.into_iter().map(|link| link.resource()).collect());
        inner.scheduler.update_supplies(id, supplies);
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Graph")
            .field("phase", &inner.phase)
            .field("current_event", &inner.current_event)
            .field("last_event", &inner.last_event)
            .field("resources", &inner.scheduler.resource_count())
            .field("behaviors", &inner.scheduler.behavior_count())
            .finish()
    }
}
