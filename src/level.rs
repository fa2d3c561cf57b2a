//! The total-ordered hierarchy level tagging every event.

/// An ordered tag on an event used to select parent/child relationships and
/// pool affinity. `Run > TimeSlice > Event > SubEvent`, matching the order
/// in which a real experiment decomposes a data stream: one run contains
/// many time slices, each containing one physics event, optionally split
/// into sub-events for parallel processing.
///
/// The total order is what rules out reference cycles between events (see
/// `DESIGN.md`): a child is always strictly below its parent, so the arena
/// can hand out plain indices without needing cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Run,
    TimeSlice,
    Event,
    SubEvent,
}

impl Level {
    /// The level directly above this one, if any.
    pub fn parent_level(self) -> Option<Level> {
        match self {
            Level::Run => None,
            Level::TimeSlice => Some(Level::Run),
            Level::Event => Some(Level::TimeSlice),
            Level::SubEvent => Some(Level::Event),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Run => "run",
            Level::TimeSlice => "timeslice",
            Level::Event => "event",
            Level::SubEvent => "subevent",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_matches_hierarchy() {
        assert!(Level::Run < Level::TimeSlice);
        assert!(Level::TimeSlice < Level::Event);
        assert!(Level::Event < Level::SubEvent);
    }

    #[test]
    fn parent_level_chain() {
        assert_eq!(Level::SubEvent.parent_level(), Some(Level::Event));
        assert_eq!(Level::Event.parent_level(), Some(Level::TimeSlice));
        assert_eq!(Level::TimeSlice.parent_level(), Some(Level::Run));
        assert_eq!(Level::Run.parent_level(), None);
    }
}
