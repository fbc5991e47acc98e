//! Randomized balanced search tree (treap)
//!
//! Every node carries a random priority and the tree keeps the heap
//! invariant that a parent's priority is strictly larger than its
//! children's. With independently drawn priorities the expected height is
//! O(log n).
//!
//! All structural updates are expressed through two primitives that are
//! each other's inverse:
//!   merge(left, right) => treap, requires every key of left <= every key of right
//!   split(treap, key)  => (left, right)
//!
//! Both recurse along a single root-to-leaf path, so stack depth is the
//! tree height. Priorities come from an internally seeded generator, which
//! keeps adversarial shapes out of reach of callers.

mod iter;
mod node;

pub use iter::Iter;

use std::ops::{Bound, RangeBounds};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use node::{Node, NodeArena, NodeId};

/// Errors raised by treap mutation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TreapError {
    /// The node arena could not grow.
    #[error("failed to allocate a treap node")]
    OutOfMemory,
}

/// Decides which side of a split an exactly matching key lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Left part holds keys `< key`
    Lt,
    /// Left part holds keys `<= key`
    Leq,
}

/// Ordered key/value store balanced by random priorities
#[derive(Debug)]
pub struct Treap<K, V> {
    arena: NodeArena<K, V>,
    root: Option<NodeId>,
    rng: StdRng,
}

impl<K: Ord + Copy, V> Default for Treap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, V> Treap<K, V> {
    /// Seed used by [`Treap::new`]
    pub const DEFAULT_SEED: u64 = 1234;

    /// Create an empty treap with the default seed
    pub fn new() -> Self {
        Self::with_seed(Self::DEFAULT_SEED)
    }

    /// Create an empty treap whose priorities derive from `seed`
    ///
    /// The same seed and the same sequence of operations always produce
    /// the same tree shape.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            arena: NodeArena::new(),
            root: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of stored keys
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.live()
    }

    /// True when no key is stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Look up the value stored under `key`
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(self.root, key).map(|id| &self.arena.get(id).value)
    }

    /// Mutable lookup
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.find(self.root, key)?;
        Some(&mut self.arena.get_mut(id).value)
    }

    /// True when `key` is stored
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(self.root, key).is_some()
    }

    /// Insert `value` under `key`, or overwrite the existing value
    ///
    /// Overwriting keeps the node (and its priority), so the tree shape is
    /// unchanged.
    pub fn upsert(&mut self, key: K, value: V) -> Result<(), TreapError> {
        // (LEQ_k, GT_k)
        let (left, right) = self.split(self.root, &key, SplitMode::Leq);
        if let Some(found) = self.find(left, &key) {
            self.arena.get_mut(found).value = value;
            self.root = self.merge(left, right);
            return Ok(());
        }

        let priority = self.rng.gen::<u64>();
        let node = match self.arena.alloc(Node::new(key, value, priority)) {
            Ok(id) => id,
            Err(err) => {
                self.root = self.merge(left, right);
                return Err(err);
            }
        };
        // merge(merge(LEQ_k, k), GT_k)
        let left = self.merge(left, Some(node));
        self.root = self.merge(left, right);
        Ok(())
    }

    /// Remove `key`, returning its value; absent keys are a no-op
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // (LEQ_k, GT_k)
        let (leq, gt) = self.split(self.root, key, SplitMode::Leq);
        // (LT_k, EQ_k): keys are unique, so the right part is at most one node
        let (lt, eq) = self.split(leq, key, SplitMode::Lt);
        self.root = self.merge(lt, gt);
        eq.map(|id| {
            debug_assert!(self.arena.get(id).left.is_none() && self.arena.get(id).right.is_none());
            self.arena.free(id).value
        })
    }

    /// Greatest entry whose key is `<= key`
    pub fn floor(&self, key: &K) -> Option<(&K, &V)> {
        let mut best = None;
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.arena.get(id);
            if node.key <= *key {
                best = Some(id);
                current = node.right;
            } else {
                current = node.left;
            }
        }
        best.map(|id| self.entry(id))
    }

    /// Least entry whose key is `> key`
    pub fn higher(&self, key: &K) -> Option<(&K, &V)> {
        let mut best = None;
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.arena.get(id);
            if node.key > *key {
                best = Some(id);
                current = node.left;
            } else {
                current = node.right;
            }
        }
        best.map(|id| self.entry(id))
    }

    /// Entry with the smallest key
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut current = self.root?;
        while let Some(left) = self.arena.get(current).left {
            current = left;
        }
        Some(self.entry(current))
    }

    /// Entry with the largest key
    pub fn last(&self) -> Option<(&K, &V)> {
        let mut current = self.root?;
        while let Some(right) = self.arena.get(current).right {
            current = right;
        }
        Some(self.entry(current))
    }

    /// Iterate all entries in key order
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.arena, self.root, Bound::Unbounded, Bound::Unbounded)
    }

    /// Iterate the entries whose keys fall in `range`, in key order
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Iter<'_, K, V> {
        Iter::new(
            &self.arena,
            self.root,
            range.start_bound().cloned(),
            range.end_bound().cloned(),
        )
    }

    /// Reserve room for `additional` new keys
    ///
    /// After a successful call the next `additional` inserts of new keys
    /// cannot fail.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TreapError> {
        self.arena.reserve(additional)
    }

    #[cfg(test)]
    pub(crate) fn limit_nodes(&mut self, max_nodes: usize) {
        self.arena.limit_slots(max_nodes);
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
    }

    /// Length of the longest root-to-leaf path
    pub fn height(&self) -> usize {
        let mut max = 0;
        let mut stack = Vec::new();
        if let Some(root) = self.root {
            stack.push((root, 1));
        }
        while let Some((id, depth)) = stack.pop() {
            max = max.max(depth);
            let node = self.arena.get(id);
            if let Some(left) = node.left {
                stack.push((left, depth + 1));
            }
            if let Some(right) = node.right {
                stack.push((right, depth + 1));
            }
        }
        max
    }

    fn entry(&self, id: NodeId) -> (&K, &V) {
        let node = self.arena.get(id);
        (&node.key, &node.value)
    }

    fn find(&self, mut current: Option<NodeId>, key: &K) -> Option<NodeId> {
        while let Some(id) = current {
            let node = self.arena.get(id);
            if node.key == *key {
                return Some(id);
            }
            current = if *key < node.key { node.left } else { node.right };
        }
        None
    }

    /// Split the subtree at `head` around `key`
    fn split(
        &mut self,
        head: Option<NodeId>,
        key: &K,
        mode: SplitMode,
    ) -> (Option<NodeId>, Option<NodeId>) {
        let Some(id) = head else {
            return (None, None);
        };
        let node_key = self.arena.get(id).key;
        let goes_left = match mode {
            SplitMode::Leq => node_key <= *key,
            SplitMode::Lt => node_key < *key,
        };
        if goes_left {
            let right = self.arena.get(id).right;
            let (lower, upper) = self.split(right, key, mode);
            self.arena.get_mut(id).right = lower;
            (Some(id), upper)
        } else {
            let left = self.arena.get(id).left;
            let (lower, upper) = self.split(left, key, mode);
            self.arena.get_mut(id).left = upper;
            (lower, Some(id))
        }
    }

    /// Join two subtrees; every key in `left` must be <= every key in `right`
    fn merge(&mut self, left: Option<NodeId>, right: Option<NodeId>) -> Option<NodeId> {
        let (l, r) = match (left, right) {
            (None, other) | (other, None) => return other,
            (Some(l), Some(r)) => (l, r),
        };
        if self.arena.get(l).priority > self.arena.get(r).priority {
            //   L
            //    \
            //     R
            let l_right = self.arena.get(l).right;
            let merged = self.merge(l_right, Some(r));
            self.arena.get_mut(l).right = merged;
            Some(l)
        } else {
            //     R
            //    /
            //   L
            let r_left = self.arena.get(r).left;
            let merged = self.merge(Some(l), r_left);
            self.arena.get_mut(r).left = merged;
            Some(r)
        }
    }
}
