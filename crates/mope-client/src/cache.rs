//! Client-side cache of plaintexts known to be in the tree
//!
//! The tree only ever grows, so anything seen once stays valid. Two cached
//! neighbours of a new value bracket the subtree it must land in, which lets
//! an insert start below the root.

use std::collections::BTreeSet;
use std::ops::Bound;

/// Where a plaintext falls relative to the cached values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bounds {
    /// Too few entries, or outside the cached min/max
    Unbounded,
    /// The plaintext itself is cached
    Present,
    /// Closest cached values on either side
    Between { lower: String, upper: String },
}

#[derive(Debug, Default, Clone)]
pub struct ClientCache {
    entries: BTreeSet<String>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, plaintext: &str) -> bool {
        self.entries.contains(plaintext)
    }

    /// Returns true if the value was not cached yet
    pub fn insert(&mut self, plaintext: &str) -> bool {
        if self.entries.contains(plaintext) {
            return false;
        }
        self.entries.insert(plaintext.to_string())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn search(&self, plaintext: &str) -> Bounds {
        if self.entries.len() < 2 {
            return Bounds::Unbounded;
        }

        let (Some(min), Some(max)) = (self.entries.first(), self.entries.last()) else {
            return Bounds::Unbounded;
        };
        if plaintext < min.as_str() || plaintext > max.as_str() {
            return Bounds::Unbounded;
        }
        if self.entries.contains(plaintext) {
            return Bounds::Present;
        }

        let lower = self
            .entries
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(plaintext)))
            .next_back();
        let upper = self
            .entries
            .range::<str, _>((Bound::Excluded(plaintext), Bound::Unbounded))
            .next();

        match (lower, upper) {
            (Some(lower), Some(upper)) => Bounds::Between {
                lower: lower.clone(),
                upper: upper.clone(),
            },
            _ => Bounds::Unbounded,
        }
    }
}
