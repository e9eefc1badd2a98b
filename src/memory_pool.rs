//! provides a bump-pointer arena allocator.
//!
//! A `MemoryPool` hands out raw, 8-byte aligned regions carved out of a growing list of heap blocks.
//! There is no way to free a single allocation: every block is released at once when the pool is dropped.
//! Hashtables and the hash join's build list keep their nodes in a pool, so that tearing down the
//! structure is one call no matter how many rows went through it.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Size of the first real block, unless the pool is built with `with_block_size`.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

const ALIGNMENT: usize = 8;

struct Block {
    start: NonNull<u8>,
    current: usize, // offset of the next free byte.
    size: usize,
}

impl Block {
    // The zero-size block lets the hot path in `malloc` always look at `blocks.last()`.
    fn empty() -> Block {
        Block {
            start: NonNull::dangling(),
            current: 0,
            size: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.size - self.current
    }

    fn layout(size: usize) -> Layout {
        match Layout::from_size_align(size, ALIGNMENT) {
            Ok(l) => l,
            Err(_) => panic!("Memory pool block size {} is not representable.", size),
        }
    }
}

pub struct MemoryPool {
    blocks: Vec<Block>,
    next_block_size: usize,
    allocated_bytes: usize,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Creates a pool whose first real block has `block_size` bytes. Each later block doubles in size.
    pub fn with_block_size(block_size: usize) -> MemoryPool {
        MemoryPool {
            blocks: vec![Block::empty()],
            next_block_size: round_up(block_size.max(ALIGNMENT)),
            allocated_bytes: 0,
        }
    }

    /// returns a pointer to `n` fresh bytes, aligned to 8.
    ///
    /// The contents of the region are uninitialized.  The region stays valid until the pool is dropped.
    ///
    /// # Panics
    ///
    /// Never returns null: when the system allocator fails, the process is aborted via `handle_alloc_error`.
    pub fn malloc(&mut self, n: usize) -> NonNull<u8> {
        let n = round_up(n);
        let needs_block = match self.blocks.last() {
            Some(b) => b.remaining() < n,
            None => true,
        };
        if needs_block {
            self.grow(n);
        }
        let block = self
            .blocks
            .last_mut()
            .unwrap_or_else(|| unreachable!("memory pool always holds a block"));
        // Safety: current + n <= size, checked above, so the result is inside the block.
        let p = unsafe { block.start.as_ptr().add(block.current) };
        block.current += n;
        self.allocated_bytes += n;
        // Safety: p is derived from a non-null block start (or dangling for n == 0 on the empty block).
        unsafe { NonNull::new_unchecked(p) }
    }

    fn grow(&mut self, n: usize) {
        let size = self.next_block_size.max(n);
        let layout = Block::layout(size);
        // Safety: size is non-zero because next_block_size >= ALIGNMENT.
        let start = unsafe { alloc(layout) };
        let start = match NonNull::new(start) {
            Some(p) => p,
            None => handle_alloc_error(layout),
        };
        tracing::trace!(size, blocks = self.blocks.len(), "memory pool: new block");
        self.blocks.push(Block {
            start,
            current: 0,
            size,
        });
        self.next_block_size = self.next_block_size.saturating_mul(2);
    }

    /// number of bytes handed out so far, including alignment padding.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// number of heap blocks, not counting the initial empty block.
    pub fn block_count(&self) -> usize {
        self.blocks.len() - 1
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        MemoryPool::new()
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        for b in self.blocks.drain(..) {
            if b.size == 0 {
                continue;
            }
            // Safety: every non-empty block was allocated in `grow` with this exact layout.
            unsafe { dealloc(b.start.as_ptr(), Block::layout(b.size)) };
        }
    }
}

fn round_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[test]
fn test_pool_starts_without_real_blocks() {
    let pool = MemoryPool::new();
    assert_eq!(pool.block_count(), 0);
    assert_eq!(pool.allocated_bytes(), 0);
}

#[test]
fn test_pool_allocations_do_not_overlap() {
    let mut pool = MemoryPool::with_block_size(64);
    let mut regions: Vec<(NonNull<u8>, usize, u8)> = vec![];
    for i in 0..500usize {
        let size = 1 + (i * 37) % 200;
        let p = pool.malloc(size);
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        let fill = (i % 251) as u8;
        unsafe { std::ptr::write_bytes(p.as_ptr(), fill, size) };
        regions.push((p, size, fill));
    }
    // Every earlier region still holds what was written into it.
    for (p, size, fill) in regions.iter() {
        let s = unsafe { std::slice::from_raw_parts(p.as_ptr(), *size) };
        assert!(s.iter().all(|b| b == fill));
    }
    let mut sorted: Vec<(usize, usize)> = regions
        .iter()
        .map(|(p, size, _)| (p.as_ptr() as usize, *size))
        .collect();
    sorted.sort();
    for w in sorted.windows(2) {
        assert!(w[0].0 + w[0].1 <= w[1].0 || w[0].0 >= w[1].0 + w[1].1);
    }
}

#[test]
fn test_pool_block_growth_is_geometric() {
    let mut pool = MemoryPool::with_block_size(64);
    pool.malloc(64);
    assert_eq!(pool.block_count(), 1);
    pool.malloc(8);
    assert_eq!(pool.block_count(), 2); // second block has 128 bytes.
    pool.malloc(120);
    assert_eq!(pool.block_count(), 2);
    // An allocation larger than the next block size gets a block of its own size.
    pool.malloc(10_000);
    assert_eq!(pool.block_count(), 3);
}

#[test]
fn test_pool_zero_sized_malloc() {
    let mut pool = MemoryPool::new();
    let _ = pool.malloc(0);
    let p = pool.malloc(16);
    unsafe { std::ptr::write_bytes(p.as_ptr(), 7, 16) };
}
