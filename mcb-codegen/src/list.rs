//! Instruction list
//!
//! A doubly-linked list kept in an arena. Handles ([`InstId`]) stay valid
//! across insertions anywhere in the list, which is what the rewriter needs
//! when it wraps spill code around an instruction while walking the list.
//! Removed slots are never reused, so a stale handle can't alias a newer
//! instruction.

use crate::asm::Instruction;
use std::ops::{Index, IndexMut};

/// Stable handle to an instruction in an [`InstList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node<O> {
    inst: Option<Instruction<O>>,
    prev: Option<InstId>,
    next: Option<InstId>,
}

#[derive(Debug, Clone)]
pub struct InstList<O> {
    nodes: Vec<Node<O>>,
    head: Option<InstId>,
    tail: Option<InstId>,
    len: usize,
}

impl<O> Default for InstList<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> InstList<O> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of live instructions
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn front(&self) -> Option<InstId> {
        self.head
    }

    pub fn back(&self) -> Option<InstId> {
        self.tail
    }

    pub fn contains(&self, id: InstId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|node| node.inst.is_some())
    }

    pub fn get(&self, id: InstId) -> Option<&Instruction<O>> {
        self.nodes.get(id.index()).and_then(|node| node.inst.as_ref())
    }

    pub fn get_mut(&mut self, id: InstId) -> Option<&mut Instruction<O>> {
        self.nodes
            .get_mut(id.index())
            .and_then(|node| node.inst.as_mut())
    }

    pub fn next(&self, id: InstId) -> Option<InstId> {
        self.live_node(id).next
    }

    pub fn prev(&self, id: InstId) -> Option<InstId> {
        self.live_node(id).prev
    }

    pub fn push_back(&mut self, inst: Instruction<O>) -> InstId {
        let id = self.alloc(inst, self.tail, None);
        match self.tail {
            Some(tail) => self.nodes[tail.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    pub fn push_front(&mut self, inst: Instruction<O>) -> InstId {
        let id = self.alloc(inst, None, self.head);
        match self.head {
            Some(head) => self.nodes[head.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        id
    }

    /// Insert `inst` immediately before `anchor`.
    ///
    /// Panics if `anchor` has been removed.
    pub fn insert_before(&mut self, anchor: InstId, inst: Instruction<O>) -> InstId {
        let prev = self.live_node(anchor).prev;
        let id = self.alloc(inst, prev, Some(anchor));
        self.nodes[anchor.index()].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Insert `inst` immediately after `anchor`.
    ///
    /// Panics if `anchor` has been removed.
    pub fn insert_after(&mut self, anchor: InstId, inst: Instruction<O>) -> InstId {
        let next = self.live_node(anchor).next;
        let id = self.alloc(inst, Some(anchor), next);
        self.nodes[anchor.index()].next = Some(id);
        match next {
            Some(next) => self.nodes[next.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        id
    }

    /// Unlink an instruction and hand it back. Returns `None` if it was
    /// already removed.
    pub fn remove(&mut self, id: InstId) -> Option<Instruction<O>> {
        let node = self.nodes.get_mut(id.index())?;
        let inst = node.inst.take()?;
        let (prev, next) = (node.prev.take(), node.next.take());
        match prev {
            Some(prev) => self.nodes[prev.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next.index()].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        Some(inst)
    }

    /// Snapshot of the current handles in list order
    pub fn ids(&self) -> Vec<InstId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> Iter<'_, O> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Instructions in list order, without handles
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction<O>> {
        self.iter().map(|(_, inst)| inst)
    }

    fn alloc(&mut self, inst: Instruction<O>, prev: Option<InstId>, next: Option<InstId>) -> InstId {
        let id = InstId(self.nodes.len() as u32);
        self.nodes.push(Node {
            inst: Some(inst),
            prev,
            next,
        });
        self.len += 1;
        id
    }

    fn live_node(&self, id: InstId) -> &Node<O> {
        match self.nodes.get(id.index()) {
            Some(node) if node.inst.is_some() => node,
            _ => panic!("instruction handle {id:?} is not in the list"),
        }
    }
}

impl<O> Index<InstId> for InstList<O> {
    type Output = Instruction<O>;

    fn index(&self, id: InstId) -> &Self::Output {
        match self.get(id) {
            Some(inst) => inst,
            None => panic!("instruction handle {id:?} is not in the list"),
        }
    }
}

impl<O> IndexMut<InstId> for InstList<O> {
    fn index_mut(&mut self, id: InstId) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(inst) => inst,
            None => panic!("instruction handle {id:?} is not in the list"),
        }
    }
}

pub struct Iter<'a, O> {
    list: &'a InstList<O>,
    cursor: Option<InstId>,
}

impl<'a, O> Iterator for Iter<'a, O> {
    type Item = (InstId, &'a Instruction<O>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = &self.list.nodes[id.index()];
        self.cursor = node.next;
        node.inst.as_ref().map(|inst| (id, inst))
    }
}

impl<'a, O> IntoIterator for &'a InstList<O> {
    type Item = (InstId, &'a Instruction<O>);
    type IntoIter = Iter<'a, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
