use std::sync::atomic::{AtomicU32, Ordering};

/// Source of correlation ids for outgoing requests.
///
/// Ids are 32-bit and wrap: a fresh generator yields `1, 2, …, u32::MAX, 0, 1, …`.
/// Increments are atomic, so one generator may be shared (behind an `Arc`)
/// by any number of clients and tasks without handing out duplicates.
///
/// Wraparound does not check whether an id is still outstanding. With a
/// 2^32 cycle this only matters under a backlog of billions of requests.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl IdGenerator {
    // ---

    /// Create a generator whose first id is `1`.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator whose first id is `first`.
    pub fn starting_at(first: u32) -> Self {
        // ---
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next id. Never blocks.
    pub fn next(&self) -> u32 {
        // fetch_add wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        // ---
        let ids = IdGenerator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_wraps_to_zero_after_max() {
        // ---
        let ids = IdGenerator::starting_at(u32::MAX - 1);
        assert_eq!(ids.next(), u32::MAX - 1);
        assert_eq!(ids.next(), u32::MAX);
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
    }

    #[test]
    fn test_full_cycle_returns_to_start() {
        // ---
        // A full 2^32 cycle is fetch_add of 2^32 == 0 mod 2^32; take the
        // last stretch of the cycle explicitly.
        let start = 1u32;
        let ids = IdGenerator::starting_at(start.wrapping_sub(1000));
        for _ in 0..1000 {
            ids.next();
        }
        assert_eq!(ids.peek(), start);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        // ---
        let ids = Arc::new(IdGenerator::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
