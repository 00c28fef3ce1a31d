//! Strata Core
//!
//! This crate provides a transactional behavior-graph runtime. Application
//! state lives in resources; behaviors declare which resources they read and
//! write; the graph runs every affected behavior exactly once per event, in
//! dependency order, and only then runs externally visible side effects.
//!
//! It implements:
//!
//! - State, moment and typed-moment resources
//! - Behaviors with static and dynamic links
//! - Incremental ordering with cycle detection
//! - Extents with cascading lifetimes
//! - Actions with deferred side effects, serialized across threads
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The public API (graph, extents, resources, behaviors)
//! - `graph`: The node arena and the linking and ordering engine
//! - `config`: Validation switches and the event clock
//! - `error`: The error taxonomy
//!
//! # Example
//!
//! ```rust
//! use strata_core::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! let graph = Graph::new();
//! let extent = Extent::new(&graph);
//! let desired = extent.state(60);
//! let current = extent.state(60);
//! let heat_on = extent.state(false);
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let (d, c, h, l) = (desired.clone(), current.clone(), heat_on.clone(), log.clone());
//! extent
//!     .behavior()
//!     .demands(&[&desired, &current])
//!     .supplies(&[&heat_on])
//!     .runs(move |ctx| {
//!         h.update(d.value() > c.value())?;
//!         if h.just_updated() {
//!             let on = h.value();
//!             let l = l.clone();
//!             ctx.side_effect(move || l.lock().unwrap().push(on))?;
//!         }
//!         Ok(())
//!     });
//! extent.add_to_graph_with_action().unwrap();
//!
//! desired.update_with_action(61).unwrap();
//! assert_eq!(*log.lock().unwrap(), vec![true]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{DateProvider, GraphConfig, SystemClock};
pub use error::{BoxError, GraphError, GraphResult};

/// Everything needed to build and drive a graph.
pub mod prelude {
    pub use crate::config::{DateProvider, GraphConfig};
    pub use crate::error::{BoxError, GraphError, GraphResult};
    pub use crate::graph::{ExtentLifecycle, GraphId, Link, LinkType};
    pub use crate::reactive::{
        Behavior, Event, EventLoopPhase, Extent, Graph, Linkable, Moment, RelinkingOrder,
        Resource, RunContext, State, TypedMoment,
    };
}
