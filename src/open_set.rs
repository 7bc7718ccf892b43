// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Priority queue of open paths supporting removal of arbitrary members.
//!
//! Members are kept in a doubly linked list ordered by key. Two sparse index
//! lists skip over the list: every 32nd insertion is also threaded through
//! the fine index, and every 1024th through the coarse index. Insertion first
//! walks the coarse index, then the fine one, then the full list, so its
//! expected cost stays low without any rebalancing. Entries with equal keys
//! are popped in insertion order.

const NIL: u32 = u32::MAX;
const FINE_EVERY: u64 = 32;
const COARSE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Links {
    prev: u32,
    next: u32,
}

impl Links {
    const EMPTY: Self = Self {
        prev: NIL,
        next: NIL,
    };
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: i64,
    member: bool,
    fine: bool,
    coarse: bool,
    lists: [Links; 3],
}

impl Slot {
    const EMPTY: Self = Self {
        key: 0,
        member: false,
        fine: false,
        coarse: false,
        lists: [Links::EMPTY; 3],
    };
}

const PRIMARY: usize = 0;
const FINE: usize = 1;
const COARSE: usize = 2;

/// Ordered set of `(id, key)` pairs, smallest key first.
///
/// Ids are small dense integers (path arena indices); each id is a member at most once.
#[derive(Debug, Default, Clone)]
pub struct OpenSet {
    slots: Vec<Slot>,
    heads: [u32; 3],
    len: usize,
    insertions: u64,
}

impl OpenSet {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            heads: [NIL; 3],
            len: 0,
            insertions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `id` is currently a member.
    pub fn contains(&self, id: usize) -> bool {
        self.slots.get(id).is_some_and(|s| s.member)
    }

    /// Inserts `id` with the given key. A member is moved to its new position.
    pub fn add(&mut self, id: usize, key: i64) {
        if self.contains(id) {
            self.remove(id);
        }
        if id >= self.slots.len() {
            self.slots.resize(id + 1, Slot::EMPTY);
        }

        let coarse = self.last_not_greater(COARSE, self.heads[COARSE], key);
        let fine_start = if coarse == NIL {
            self.heads[FINE]
        } else {
            coarse
        };
        let fine = self.last_not_greater(FINE, fine_start, key);
        let primary_start = if fine == NIL {
            self.heads[PRIMARY]
        } else {
            fine
        };
        let primary = self.last_not_greater(PRIMARY, primary_start, key);

        let id32 = id as u32;
        self.slots[id] = Slot {
            key,
            member: true,
            ..Slot::EMPTY
        };
        self.link_after(PRIMARY, primary, id32);

        self.insertions += 1;
        if self.insertions % FINE_EVERY == 0 {
            self.slots[id].fine = true;
            self.link_after(FINE, fine, id32);
        }
        if self.insertions % COARSE_EVERY == 0 {
            self.slots[id].coarse = true;
            self.link_after(COARSE, coarse, id32);
        }

        self.len += 1;
    }

    /// Removes `id`. Removing a non-member is a no-op.
    pub fn remove(&mut self, id: usize) {
        if !self.contains(id) {
            return;
        }

        let id32 = id as u32;
        self.unlink(PRIMARY, id32);
        if self.slots[id].fine {
            self.unlink(FINE, id32);
        }
        if self.slots[id].coarse {
            self.unlink(COARSE, id32);
        }

        self.slots[id] = Slot::EMPTY;
        self.len -= 1;
    }

    /// Returns the member with the smallest key, and that key.
    pub fn first(&self) -> Option<(usize, i64)> {
        let head = self.heads[PRIMARY];
        if head == NIL {
            None
        } else {
            Some((head as usize, self.slots[head as usize].key))
        }
    }

    /// Removes and returns the member with the smallest key.
    pub fn pop_first(&mut self) -> Option<(usize, i64)> {
        let first = self.first()?;
        self.remove(first.0);
        Some(first)
    }

    /// Removes all members.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.heads = [NIL; 3];
        self.len = 0;
    }

    /// Walks `list` from `start` and returns its last element with a key
    /// not greater than `key`, or NIL if `start` already has a greater key.
    fn last_not_greater(&self, list: usize, start: u32, key: i64) -> u32 {
        if start == NIL || self.slots[start as usize].key > key {
            return NIL;
        }

        let mut current = start;
        loop {
            let next = self.slots[current as usize].lists[list].next;
            if next == NIL || self.slots[next as usize].key > key {
                return current;
            }
            current = next;
        }
    }

    fn link_after(&mut self, list: usize, after: u32, id: u32) {
        let next = if after == NIL {
            self.heads[list]
        } else {
            self.slots[after as usize].lists[list].next
        };

        self.slots[id as usize].lists[list] = Links { prev: after, next };
        if after == NIL {
            self.heads[list] = id;
        } else {
            self.slots[after as usize].lists[list].next = id;
        }
        if next != NIL {
            self.slots[next as usize].lists[list].prev = id;
        }
    }

    fn unlink(&mut self, list: usize, id: u32) {
        let Links { prev, next } = self.slots[id as usize].lists[list];
        if prev == NIL {
            self.heads[list] = next;
        } else {
            self.slots[prev as usize].lists[list].next = next;
        }
        if next != NIL {
            self.slots[next as usize].lists[list].prev = prev;
        }
    }
}
