//! Treap node storage
//!
//! Nodes live in a slot arena addressed by `NodeId`. Vacant slots are
//! chained through an intrusive free list, so freeing a node never
//! allocates and a freed slot is the next one handed out.

use super::TreapError;

/// Index of a node inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single treap node
#[derive(Debug)]
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) priority: u64,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V, priority: u64) -> Self {
        Self {
            key,
            value,
            priority,
            left: None,
            right: None,
        }
    }
}

#[derive(Debug)]
enum Slot<K, V> {
    Occupied(Node<K, V>),
    Vacant { next_free: Option<NodeId> },
}

/// Slot arena owning every node of one treap
#[derive(Debug)]
pub(crate) struct NodeArena<K, V> {
    slots: Vec<Slot<K, V>>,
    free_head: Option<NodeId>,
    live: usize,
    max_slots: usize,
}

impl<K, V> NodeArena<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            max_slots: Self::MAX_SLOTS,
        }
    }

    /// Slot count addressable by a 32-bit `NodeId`
    const MAX_SLOTS: usize = (u32::MAX as usize).saturating_add(1);

    #[cfg(test)]
    pub(crate) fn limit_slots(&mut self, max_slots: usize) {
        self.max_slots = max_slots.min(Self::MAX_SLOTS);
    }

    /// Make sure the next `additional` allocations cannot fail
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<(), TreapError> {
        let vacant = self.slots.len() - self.live;
        let grow = additional.saturating_sub(vacant);
        if grow == 0 {
            return Ok(());
        }
        if self.slots.len().saturating_add(grow) > self.max_slots {
            return Err(TreapError::OutOfMemory);
        }
        self.slots
            .try_reserve(grow)
            .map_err(|_| TreapError::OutOfMemory)
    }

    /// Number of occupied slots
    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Store `node`, reusing a vacant slot when one exists
    pub(crate) fn alloc(&mut self, node: Node<K, V>) -> Result<NodeId, TreapError> {
        if let Some(id) = self.free_head {
            let slot = &mut self.slots[id.index()];
            self.free_head = match slot {
                Slot::Vacant { next_free } => *next_free,
                Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied(node);
            self.live += 1;
            return Ok(id);
        }

        if self.slots.len() >= self.max_slots {
            return Err(TreapError::OutOfMemory);
        }
        let index = u32::try_from(self.slots.len()).map_err(|_| TreapError::OutOfMemory)?;
        self.slots
            .try_reserve(1)
            .map_err(|_| TreapError::OutOfMemory)?;
        self.slots.push(Slot::Occupied(node));
        self.live += 1;
        Ok(NodeId(index))
    }

    /// Drop a node out of the arena and hand it back
    pub(crate) fn free(&mut self, id: NodeId) -> Node<K, V> {
        let vacant = Slot::Vacant {
            next_free: self.free_head,
        };
        match std::mem::replace(&mut self.slots[id.index()], vacant) {
            Slot::Occupied(node) => {
                self.free_head = Some(id);
                self.live -= 1;
                node
            }
            Slot::Vacant { .. } => panic!("double free of treap node {:?}", id),
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<K, V> {
        match &self.slots[id.index()] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => panic!("dangling treap node {:?}", id),
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        match &mut self.slots[id.index()] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => panic!("dangling treap node {:?}", id),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.live = 0;
    }
}
