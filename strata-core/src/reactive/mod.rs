//! Reactive Runtime
//!
//! This module is the public face of the crate: the graph, its extents, the
//! resources behaviors communicate through, and the behaviors themselves.
//!
//! # Concepts
//!
//! ## Resources
//!
//! A resource is a node behaviors read and write. [`State`] holds a value
//! across events, [`Moment`] records that something happened in one event,
//! and [`TypedMoment`] does the same while carrying a value. Each resource
//! has at most one supplying behavior.
//!
//! ## Behaviors
//!
//! A [`Behavior`] demands resources and supplies others. When a demanded
//! resource updates the behavior is activated, and it runs once in that
//! event, after every behavior supplying one of its demands.
//!
//! ## Extents
//!
//! An [`Extent`] owns resources and behaviors and adds or removes them as a
//! unit.
//!
//! ## Events
//!
//! Every [`Graph::action`] runs as one [`Event`]: the action's updates
//! propagate through all activated behaviors, then queued side effects run.
//!
//! # Implementation Notes
//!
//! Handles are cheap to clone. Resource handles keep their data behind a
//! lock of their own and refer to the graph weakly, so a behavior closure
//! capturing resource handles does not keep its graph alive.

mod behavior;
mod context;
mod effect;
mod event;
mod extent;
mod moment;
mod resource;
mod runtime;
mod state;
mod typed_moment;

pub use behavior::{Behavior, BehaviorBuilder, RelinkingOrder};
pub use context::{EventLoopPhase, RunContext};
pub use event::Event;
pub use extent::Extent;
pub use moment::Moment;
pub use resource::{Linkable, Resource};
pub use runtime::Graph;
pub use state::State;
pub use typed_moment::TypedMoment;
