//! provides `Hashtable`, the chained hash table that keyed group-by builds at query run time.
//!
//! The table only knows about 64-bit hash codes and opaque payloads. Callers that need exact key matching
//! compare the payload contents themselves after a `lookup`, walking further candidates with `next_same_hash`.
//!
//! Nodes live in the table's own `MemoryPool` and are never freed one at a time; rehashing re-threads
//! the existing nodes into a bigger bucket array without copying payloads.

use crate::memory_pool::MemoryPool;
use std::ptr::NonNull;

pub const LOAD_FACTOR: f64 = 0.75;
pub const DEFAULT_BUCKET_COUNT: usize = 16;

/// Size of the node header that precedes every payload. Generated code adds this to a node address to find
/// the payload.
pub const NODE_HEADER_SIZE: usize = std::mem::size_of::<Node>();

/// header of one stored entry. The payload bytes follow the header directly.
#[repr(C)]
pub struct Node {
    next: *mut Node,
    hash: u64,
    size: u64,
}

impl Node {
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn payload_ptr(node: NonNull<Node>) -> NonNull<u8> {
        // Safety: the payload directly follows the header inside the same pool allocation.
        unsafe { NonNull::new_unchecked((node.as_ptr() as *mut u8).add(NODE_HEADER_SIZE)) }
    }

    pub fn payload(&self) -> &[u8] {
        let p = Node::payload_ptr(NonNull::from(self));
        // Safety: every node was allocated with `size` payload bytes.
        unsafe { std::slice::from_raw_parts(p.as_ptr(), self.size as usize) }
    }

    pub(crate) fn next_ptr(&self) -> *mut Node {
        self.next
    }
}

/// Allocates a node for `size` payload bytes in `pool` and fills in the header. The node is not linked anywhere.
pub(crate) fn alloc_node(pool: &mut MemoryPool, hash: u64, size: usize, next: *mut Node) -> NonNull<Node> {
    let raw = pool.malloc(NODE_HEADER_SIZE + size).cast::<Node>();
    // Safety: raw is 8-aligned and large enough for the header.
    unsafe {
        raw.as_ptr().write(Node {
            next,
            hash,
            size: size as u64,
        })
    };
    raw
}

/// Links `node` at the head of the bucket chosen by its hash.
/// Returns true if no node with the same hash code was in that bucket before.
fn link(buckets: &mut [*mut Node], node: NonNull<Node>) -> bool {
    let mask = (buckets.len() - 1) as u64;
    // Safety: nodes handed to `link` are live pool allocations.
    let hash = unsafe { node.as_ref().hash };
    let idx = (hash & mask) as usize;
    let new_hash = chain_find(buckets[idx], hash).is_none();
    unsafe { set_next(node, buckets[idx]) };
    buckets[idx] = node.as_ptr();
    new_hash
}

/// # Safety
///
/// `node` must be a live node that is not currently reachable from any other chain being walked.
pub(crate) unsafe fn set_next(node: NonNull<Node>, next: *mut Node) {
    (*node.as_ptr()).next = next;
}

pub(crate) fn chain_find(mut cur: *mut Node, hash: u64) -> Option<NonNull<Node>> {
    while let Some(n) = NonNull::new(cur) {
        // Safety: chain links always point at live nodes or are null.
        let node = unsafe { n.as_ref() };
        if node.hash == hash {
            return Some(n);
        }
        cur = node.next;
    }
    None
}

pub(crate) fn bucket_count_for(len: usize) -> usize {
    let wanted = (len as f64 / LOAD_FACTOR).ceil() as usize;
    wanted.max(1).next_power_of_two()
}

pub struct Hashtable {
    buckets: Vec<*mut Node>,
    distinct_hashes: usize,
    len: usize,
    rehash_count: usize,
    pool: MemoryPool,
}

impl Hashtable {
    pub fn new() -> Hashtable {
        Hashtable::with_buckets(DEFAULT_BUCKET_COUNT)
    }

    /// Creates a table with at least `bucket_count` buckets (rounded up to a power of two).
    pub fn with_buckets(bucket_count: usize) -> Hashtable {
        Hashtable {
            buckets: vec![std::ptr::null_mut(); bucket_count.max(1).next_power_of_two()],
            distinct_hashes: 0,
            len: 0,
            rehash_count: 0,
            pool: MemoryPool::new(),
        }
    }

    /// bulk-loads `(hash, payload)` pairs. Buckets are sized up front from the number of entries.
    pub fn from_entries<'a, I>(entries: I) -> Hashtable
    where
        I: ExactSizeIterator<Item = (u64, &'a [u8])>,
    {
        let mut ht = Hashtable::with_buckets(bucket_count_for(entries.len()));
        for (hash, payload) in entries {
            let p = ht.insert(hash, payload.len());
            // Safety: p has room for exactly payload.len() bytes.
            unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), p.as_ptr(), payload.len()) };
        }
        ht
    }

    fn mask(&self) -> u64 {
        (self.buckets.len() - 1) as u64
    }

    /// allocates a `size` byte payload for `hash`, links it into the table, and returns the payload address.
    /// The caller writes the payload through the returned pointer.
    pub fn insert(&mut self, hash: u64, size: usize) -> NonNull<u8> {
        let node = alloc_node(&mut self.pool, hash, size, std::ptr::null_mut());
        if link(&mut self.buckets, node) {
            self.distinct_hashes += 1;
        }
        self.len += 1;
        if self.distinct_hashes as f64 > LOAD_FACTOR * self.buckets.len() as f64 {
            self.rehash();
        }
        Node::payload_ptr(node)
    }

    fn rehash(&mut self) {
        let doubled = vec![std::ptr::null_mut(); self.buckets.len() * 2];
        let old = std::mem::replace(&mut self.buckets, doubled);
        self.distinct_hashes = 0;
        for head in old {
            let mut cur = head;
            while let Some(n) = NonNull::new(cur) {
                // Safety: n is a live node of this table.
                cur = unsafe { n.as_ref().next };
                if link(&mut self.buckets, n) {
                    self.distinct_hashes += 1;
                }
            }
        }
        self.rehash_count += 1;
        tracing::debug!(buckets = self.buckets.len(), entries = self.len, "hashtable rehashed");
    }

    /// returns the first node with this hash code, if any.
    pub fn lookup(&self, hash: u64) -> Option<NonNull<Node>> {
        chain_find(self.buckets[(hash & self.mask()) as usize], hash)
    }

    /// returns the next node after `node` in the same bucket that also has hash code `hash`.
    pub fn next_same_hash(&self, node: NonNull<Node>, hash: u64) -> Option<NonNull<Node>> {
        // Safety: node came from this table.
        chain_find(unsafe { node.as_ref().next }, hash)
    }

    /// first node of a full scan over all buckets.
    pub fn first(&self) -> Option<NonNull<Node>> {
        self.first_from_bucket(0)
    }

    fn first_from_bucket(&self, start: usize) -> Option<NonNull<Node>> {
        self.buckets[start.min(self.buckets.len())..]
            .iter()
            .find_map(|b| NonNull::new(*b))
    }

    /// node after `node` in a full scan.
    pub fn next(&self, node: NonNull<Node>) -> Option<NonNull<Node>> {
        // Safety: node came from this table.
        let n = unsafe { node.as_ref() };
        match NonNull::new(n.next) {
            Some(next) => Some(next),
            None => self.first_from_bucket((n.hash & self.mask()) as usize + 1),
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            table: self,
            cur: self.first(),
        }
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

    pub fn rehash_count(&self) -> usize {
        self.rehash_count
    }
}

impl Default for Hashtable {
    fn default() -> Self {
        Hashtable::new()
    }
}

pub struct Iter<'a> {
    table: &'a Hashtable,
    cur: Option<NonNull<Node>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let n = self.cur?;
        self.cur = self.table.next(n);
        // Safety: nodes live as long as the table's pool.
        Some(unsafe { &*n.as_ptr() })
    }
}

#[cfg(test)]
fn write_u64(p: NonNull<u8>, v: u64) {
    unsafe { std::ptr::write_unaligned(p.as_ptr() as *mut u64, v) }
}

#[cfg(test)]
fn read_u64(node: &Node) -> u64 {
    u64::from_ne_bytes(node.payload()[..8].try_into().unwrap())
}

#[test]
fn test_hashtable_insert_lookup_survives_rehash() {
    let mut ht = Hashtable::with_buckets(16);
    let n = (16.0 * LOAD_FACTOR) as u64 + 1;
    for h in 0..n * 4 {
        let hash = crate::hashing::mix64(h);
        write_u64(ht.insert(hash, 8), h * 10);
    }
    assert!(ht.rehash_count() >= 1);
    assert_eq!(ht.len() as u64, n * 4);
    for h in 0..n * 4 {
        let hash = crate::hashing::mix64(h);
        let node = ht.lookup(hash).expect("inserted hash should be found");
        assert_eq!(read_u64(unsafe { node.as_ref() }), h * 10);
    }
    assert!(ht.lookup(crate::hashing::mix64(n * 4 + 1)).is_none());
}

#[test]
fn test_hashtable_duplicate_hashes_are_all_reachable() {
    let mut ht = Hashtable::new();
    for v in 0..5u64 {
        write_u64(ht.insert(42, 8), v);
    }
    write_u64(ht.insert(42 + 16, 8), 99); // same bucket, different hash.
    let mut seen = vec![];
    let mut cur = ht.lookup(42);
    while let Some(n) = cur {
        seen.push(read_u64(unsafe { n.as_ref() }));
        cur = ht.next_same_hash(n, 42);
    }
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_hashtable_duplicates_do_not_trigger_rehash() {
    let mut ht = Hashtable::with_buckets(4);
    for v in 0..100u64 {
        write_u64(ht.insert(7, 8), v);
    }
    assert_eq!(ht.rehash_count(), 0);
    assert_eq!(ht.bucket_count(), 4);
}

#[test]
fn test_hashtable_full_scan_visits_every_node_once() {
    let mut ht = Hashtable::with_buckets(2);
    for v in 0..37u64 {
        write_u64(ht.insert(v % 11, 8), v);
    }
    let mut seen: Vec<u64> = ht.iter().map(read_u64).collect();
    seen.sort();
    assert_eq!(seen, (0..37).collect::<Vec<u64>>());
}

#[test]
fn test_hashtable_from_entries() {
    let payloads: Vec<[u8; 8]> = (0..10u64).map(|v| v.to_ne_bytes()).collect();
    let ht = Hashtable::from_entries(payloads.iter().enumerate().map(|(i, p)| (i as u64 * 3, &p[..])));
    assert_eq!(ht.len(), 10);
    assert_eq!(ht.bucket_count(), 16);
    let node = ht.lookup(9).unwrap();
    assert_eq!(read_u64(unsafe { node.as_ref() }), 3);
}
