//! Process-unique resource ids
//!
//! Ids key the view cache and the resource tracker. The counter starts at a
//! random origin so ids from two runs are unlikely to match in logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static NEXT_UUID: OnceLock<AtomicU64> = OnceLock::new();

/// Return an id never returned before in this process
pub fn next_uuid() -> u64 {
    NEXT_UUID
        .get_or_init(|| AtomicU64::new(rand::random::<u32>() as u64 + 1))
        .fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<u64> = (0..1000).map(|_| next_uuid()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(!ids.contains(&0));
    }
}
