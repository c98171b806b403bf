use rand::Rng;
use serde::Serialize;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

// -----------------------------------------------------------------------------
// ----- CorrelationId ---------------------------------------------------------

/// Token linking a dispatched job frame to its eventual response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- CorrelationIdGenerator ------------------------------------------------

/// Monotonic id source. The starting point is random so ids from a previous
/// process never line up with late responses still in flight from agents.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        let mut rng = rand::rng();

        // lower half of the range leaves 2^63 ids before wrap
        Self::starting_at(rng.random_range(1..u64::MAX / 2))
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = CorrelationIdGenerator::starting_at(41);
        assert_eq!(ids.next_id(), CorrelationId(41));
        assert_eq!(ids.next_id(), CorrelationId(42));
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = std::sync::Arc::new(CorrelationIdGenerator::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(CorrelationId(255).to_string(), "00000000000000ff");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
