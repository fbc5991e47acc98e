//! In-order traversal with an explicit stack

use std::ops::Bound;

use super::node::{NodeArena, NodeId};

/// Ordered iterator over a (possibly bounded) key range of a treap
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    arena: &'a NodeArena<K, V>,
    stack: Vec<NodeId>,
    end: Bound<K>,
}

impl<'a, K: Ord + Copy, V> Iter<'a, K, V> {
    pub(crate) fn new(
        arena: &'a NodeArena<K, V>,
        root: Option<NodeId>,
        start: Bound<K>,
        end: Bound<K>,
    ) -> Self {
        let mut stack = Vec::new();
        let mut current = root;

        // Stack every node on the search path that lies at or after `start`;
        // the top of the stack is then the first key in range.
        while let Some(id) = current {
            let node = arena.get(id);
            let in_range = match start {
                Bound::Included(ref k) => node.key >= *k,
                Bound::Excluded(ref k) => node.key > *k,
                Bound::Unbounded => true,
            };
            if in_range {
                stack.push(id);
                current = node.left;
            } else {
                current = node.right;
            }
        }

        Self { arena, stack, end }
    }

    fn push_left_spine(&mut self, mut current: Option<NodeId>) {
        while let Some(id) = current {
            self.stack.push(id);
            current = self.arena.get(id).left;
        }
    }
}

impl<'a, K: Ord + Copy, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let arena = self.arena;
        let node = arena.get(id);

        let before_end = match self.end {
            Bound::Included(ref k) => node.key <= *k,
            Bound::Excluded(ref k) => node.key < *k,
            Bound::Unbounded => true,
        };
        if !before_end {
            self.stack.clear();
            return None;
        }

        self.push_left_spine(node.right);
        Some((&node.key, &node.value))
    }
}
