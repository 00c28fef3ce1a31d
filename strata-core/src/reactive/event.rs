//! Events
//!
//! Every action runs as one event. Events are numbered by a per-graph
//! sequence that only increases, which is what `just_updated` checks and
//! state history queries compare against.

/// One transaction on a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event {
    sequence: u64,
    timestamp: u64,
}

impl Event {
    /// The event every state's initial value belongs to.
    pub const INITIAL: Event = Event {
        sequence: 0,
        timestamp: 0,
    };

    pub(crate) fn new(sequence: u64, timestamp: u64) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    /// Position of this event in the graph's history. The first action is 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Milliseconds reported by the graph's clock when the event opened.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::INITIAL
    }
}
