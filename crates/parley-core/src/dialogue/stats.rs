//! End-state counters per registry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Counts of finished dialogues by end state, split by initiator.
#[derive(Debug)]
pub struct DialogueStats<E> {
    inner: Mutex<Counts<E>>,
}

#[derive(Debug)]
struct Counts<E> {
    self_initiated: HashMap<E, u64>,
    other_initiated: HashMap<E, u64>,
}

impl<E: Copy + Eq + Hash> Default for DialogueStats<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Counts {
                self_initiated: HashMap::new(),
                other_initiated: HashMap::new(),
            }),
        }
    }
}

impl<E: Copy + Eq + Hash> DialogueStats<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_end_state(&self, end_state: E, is_self_initiated: bool) {
        // A poisoned lock only means a panicked writer; counters stay usable.
        let mut g = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let map = if is_self_initiated {
            &mut g.self_initiated
        } else {
            &mut g.other_initiated
        };
        *map.entry(end_state).or_insert(0) += 1;
    }

    pub fn self_initiated(&self, end_state: E) -> u64 {
        self.read(|c| c.self_initiated.get(&end_state).copied().unwrap_or(0))
    }

    pub fn other_initiated(&self, end_state: E) -> u64 {
        self.read(|c| c.other_initiated.get(&end_state).copied().unwrap_or(0))
    }

    fn read<T>(&self, f: impl FnOnce(&Counts<E>) -> T) -> T {
        match self.inner.lock() {
            Ok(g) => f(&g),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_by_initiator() {
        let s = DialogueStats::<u8>::new();
        s.add_end_state(1, true);
        s.add_end_state(1, true);
        s.add_end_state(1, false);
        assert_eq!(s.self_initiated(1), 2);
        assert_eq!(s.other_initiated(1), 1);
        assert_eq!(s.other_initiated(2), 0);
    }
}
