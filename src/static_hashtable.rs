//! provides `StaticHashtable`, the build-once table behind the hash join.
//!
//! A hash join first materializes its whole build side, so the number of entries is known before the table
//! is built.  `JoinList` is the append-only list the build phase writes into; `JoinList::build` turns it into a
//! `StaticHashtable` with a fixed bucket count that is never rehashed.  The list's pool moves into the table,
//! so the table owns every node outright.

use crate::hashtable::{alloc_node, bucket_count_for, chain_find, set_next, Node};
use crate::memory_pool::MemoryPool;
use std::ptr::NonNull;

/// append-only singly linked list of `(hash, payload)` nodes.
pub struct JoinList {
    head: *mut Node,
    len: usize,
    pool: MemoryPool,
}

impl JoinList {
    pub fn new() -> JoinList {
        JoinList::with_pool(MemoryPool::new())
    }

    pub fn with_pool(pool: MemoryPool) -> JoinList {
        JoinList {
            head: std::ptr::null_mut(),
            len: 0,
            pool,
        }
    }

    /// adds a node and returns the address of its `size` byte payload for the caller to fill.
    pub fn append(&mut self, hash: u64, size: usize) -> NonNull<u8> {
        let node = alloc_node(&mut self.pool, hash, size, self.head);
        self.head = node.as_ptr();
        self.len += 1;
        Node::payload_ptr(node)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// threads every node into the buckets of a new `StaticHashtable`. The list's structure is not preserved.
    pub fn build(self) -> StaticHashtable {
        let mut buckets = vec![std::ptr::null_mut::<Node>(); bucket_count_for(self.len)];
        let mask = (buckets.len() - 1) as u64;
        let mut cur = self.head;
        while let Some(n) = NonNull::new(cur) {
            // Safety: list nodes are live allocations in self.pool, which moves into the table below.
            let idx = unsafe {
                cur = n.as_ref().next_ptr();
                (n.as_ref().hash() & mask) as usize
            };
            unsafe { set_next(n, buckets[idx]) };
            buckets[idx] = n.as_ptr();
        }
        StaticHashtable {
            buckets,
            len: self.len,
            _pool: self.pool,
        }
    }
}

impl Default for JoinList {
    fn default() -> Self {
        JoinList::new()
    }
}

pub struct StaticHashtable {
    buckets: Vec<*mut Node>,
    len: usize,
    _pool: MemoryPool,
}

impl StaticHashtable {
    pub fn lookup(&self, hash: u64) -> Option<NonNull<Node>> {
        let mask = (self.buckets.len() - 1) as u64;
        chain_find(self.buckets[(hash & mask) as usize], hash)
    }

    pub fn next_same_hash(&self, node: NonNull<Node>, hash: u64) -> Option<NonNull<Node>> {
        // Safety: node came from this table.
        chain_find(unsafe { node.as_ref().next_ptr() }, hash)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// visits bucket by bucket, chain by chain.
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.buckets.iter().flat_map(|head| {
            let mut cur = *head;
            std::iter::from_fn(move || {
                let n = NonNull::new(cur)?;
                // Safety: nodes live as long as the table's pool.
                let node = unsafe { &*n.as_ptr() };
                cur = node.next_ptr();
                Some(node)
            })
        })
    }
}

#[cfg(test)]
fn list_of(n: u64, hash_of: impl Fn(u64) -> u64) -> JoinList {
    let mut l = JoinList::new();
    for v in 0..n {
        let p = l.append(hash_of(v), 8);
        unsafe { std::ptr::write_unaligned(p.as_ptr() as *mut u64, v) };
    }
    l
}

#[cfg(test)]
fn value_of(node: &Node) -> u64 {
    u64::from_ne_bytes(node.payload()[..8].try_into().unwrap())
}

#[test]
fn test_static_hashtable_visits_each_node_once() {
    for n in [0u64, 1, 2, 7, 100, 1000] {
        let sht = list_of(n, crate::hashing::mix64).build();
        assert_eq!(sht.len() as u64, n);
        let mut seen: Vec<u64> = sht.iter().map(value_of).collect();
        seen.sort();
        assert_eq!(seen, (0..n).collect::<Vec<u64>>());
    }
}

#[test]
fn test_static_hashtable_bucket_count_fits_load_factor() {
    let sht = list_of(12, |v| v).build();
    assert_eq!(sht.bucket_count(), 16);
    let sht = list_of(13, |v| v).build();
    assert_eq!(sht.bucket_count(), 32);
}

#[test]
fn test_static_hashtable_lookup_with_duplicate_hashes() {
    let sht = list_of(20, |v| v % 4).build();
    let mut found = vec![];
    let mut cur = sht.lookup(2);
    while let Some(n) = cur {
        found.push(value_of(unsafe { n.as_ref() }));
        cur = sht.next_same_hash(n, 2);
    }
    found.sort();
    assert_eq!(found, vec![2, 6, 10, 14, 18]);
    assert!(sht.lookup(5).is_none());
}
