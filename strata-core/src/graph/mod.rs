//! Dependency Graph
//!
//! This module implements the arena that stores every resource, behavior and
//! extent of a graph, together with the engine that links and orders them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Resource nodes hold observable state or moments
//! - Behavior nodes demand (read) and supply (write) resources
//! - An edge runs from a resource's single supplier to every behavior that
//!   demands it
//!
//! When a resource is updated, every behavior reactively demanding it is
//! activated. Activated behaviors run lowest order first, so a supplier always
//! runs before the behaviors that read what it writes.
//!
//! # Design Decisions
//!
//! 1. Nodes live in flat vectors behind integer handles rather than being
//!    linked through shared pointers:
//!    - Edges are plain handle sets, so relinking never fights ownership
//!    - The public handle types stay `Copy` and cheap to pass around
//!    - Removal is a state change, so handles never dangle
//!
//! 2. Orders are maintained incrementally. Only behaviors whose links changed,
//!    and the behaviors downstream of them, are re-sorted.
//!
//! 3. Extents form a lifetime tree used for cascading removal and for
//!    validating which cross-extent links are legal. Unified extents share
//!    one node of that tree.
//!
//! 4. Link changes made during an event are journaled. A failed event rolls
//!    them back, so the graph keeps the links of the last completed event.

mod node;
mod queue;
mod scheduler;

pub use node::{
    BehaviorId, ExtentId, ExtentLifecycle, GraphId, Link, LinkType, ResourceId, ResourceKind,
};

pub(crate) use node::{RunFn, Transient};
pub(crate) use scheduler::Scheduler;
