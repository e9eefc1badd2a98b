//! provides `Vector`, an untyped growable array of fixed-size elements.
//!
//! Table columns, null indicators and branch bitmaps are all `Vector`s. Generated code reads them through
//! raw pointers (`as_ptr`), so elements are stored contiguously and 8-byte aligned.
//!
//! Capacity starts at `DEFAULT_CAPACITY` elements, doubles when full, and halves when the element count
//! drops to half the capacity (never below the default).

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::ptr::NonNull;

pub const DEFAULT_CAPACITY: usize = 2;
const ALIGNMENT: usize = 8;

pub struct Vector {
    data: NonNull<u8>,
    element_size: usize,
    len: usize,
    capacity: usize,
}

impl Vector {
    /// Creates an empty vector of elements that are `element_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `element_size` is zero.
    pub fn new(element_size: usize) -> Vector {
        assert!(element_size > 0, "Vector elements must have a non-zero size.");
        let layout = Self::layout_for(element_size, DEFAULT_CAPACITY);
        // Safety: layout has non-zero size.
        let data = unsafe { alloc(layout) };
        let data = NonNull::new(data).unwrap_or_else(|| handle_alloc_error(layout));
        Vector {
            data,
            element_size,
            len: 0,
            capacity: DEFAULT_CAPACITY,
        }
    }

    fn layout_for(element_size: usize, capacity: usize) -> Layout {
        match Layout::from_size_align(element_size * capacity, ALIGNMENT) {
            Ok(l) => l,
            Err(_) => panic!("Vector capacity overflow: {} x {} bytes", capacity, element_size),
        }
    }

    fn resize_capacity(&mut self, new_capacity: usize) {
        let old = Self::layout_for(self.element_size, self.capacity);
        let new = Self::layout_for(self.element_size, new_capacity);
        // Safety: data was allocated with `old`; the new size is non-zero.
        let p = unsafe { realloc(self.data.as_ptr(), old, new.size()) };
        self.data = NonNull::new(p).unwrap_or_else(|| handle_alloc_error(new));
        self.capacity = new_capacity;
    }

    /// appends a copy of `element`, which must be exactly `element_size` bytes long.
    pub fn push_back(&mut self, element: &[u8]) {
        assert_eq!(element.len(), self.element_size);
        let slot = self.reserve_back();
        // Safety: slot points to element_size writable bytes that do not overlap `element`.
        unsafe { std::ptr::copy_nonoverlapping(element.as_ptr(), slot.as_ptr(), self.element_size) };
    }

    /// grows the vector by one element and returns a pointer to the new, uninitialized slot.
    pub fn reserve_back(&mut self) -> NonNull<u8> {
        if self.len == self.capacity {
            self.resize_capacity(self.capacity * 2);
        }
        let slot = self.element_ptr(self.len);
        self.len += 1;
        slot
    }

    pub fn pop_back(&mut self) {
        if self.len == 0 {
            return;
        }
        self.len -= 1;
        let half = self.capacity / 2;
        if self.len <= half && half >= DEFAULT_CAPACITY {
            self.resize_capacity(half);
        }
    }

    fn element_ptr(&self, idx: usize) -> NonNull<u8> {
        // Safety: idx <= capacity, so the offset stays within (or one past) the allocation.
        unsafe { NonNull::new_unchecked(self.data.as_ptr().add(idx * self.element_size)) }
    }

    pub fn at(&self, idx: usize) -> &[u8] {
        assert!(idx < self.len, "Vector index {} out of range {}", idx, self.len);
        // Safety: element idx is initialized and inside the allocation.
        unsafe { std::slice::from_raw_parts(self.element_ptr(idx).as_ptr(), self.element_size) }
    }

    pub fn at_mut(&mut self, idx: usize) -> &mut [u8] {
        assert!(idx < self.len, "Vector index {} out of range {}", idx, self.len);
        // Safety: as in `at`, and we hold the unique borrow.
        unsafe { std::slice::from_raw_parts_mut(self.element_ptr(idx).as_ptr(), self.element_size) }
    }

    pub fn front(&self) -> Option<&[u8]> {
        match self.is_empty() {
            true => None,
            false => Some(self.at(0)),
        }
    }

    pub fn back(&self) -> Option<&[u8]> {
        match self.is_empty() {
            true => None,
            false => Some(self.at(self.len - 1)),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// address of the first element. Only valid until the next push or pop.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_ptr()
    }
}

impl Drop for Vector {
    fn drop(&mut self) {
        // Safety: data was allocated with this layout.
        unsafe { dealloc(self.data.as_ptr(), Self::layout_for(self.element_size, self.capacity)) };
    }
}

impl std::fmt::Debug for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vector")
            .field("element_size", &self.element_size)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[test]
fn test_vector_push_and_access() {
    let mut v = Vector::new(4);
    assert!(v.is_empty());
    assert_eq!(v.front(), None);
    for i in 0..10i32 {
        v.push_back(&i.to_ne_bytes());
    }
    assert_eq!(v.len(), 10);
    assert_eq!(v.at(3), &3i32.to_ne_bytes());
    assert_eq!(v.front(), Some(&0i32.to_ne_bytes()[..]));
    assert_eq!(v.back(), Some(&9i32.to_ne_bytes()[..]));
    v.at_mut(3).copy_from_slice(&42i32.to_ne_bytes());
    assert_eq!(v.at(3), &42i32.to_ne_bytes());
}

#[test]
fn test_vector_capacity_doubles_and_halves() {
    let mut v = Vector::new(8);
    assert_eq!(v.capacity(), DEFAULT_CAPACITY);
    for i in 0..5u64 {
        v.push_back(&i.to_ne_bytes());
    }
    assert_eq!(v.capacity(), 8);
    v.pop_back(); // 4 left, half of 8.
    assert_eq!(v.capacity(), 4);
    v.pop_back();
    assert_eq!(v.capacity(), 4);
    v.pop_back(); // 2 left.
    assert_eq!(v.capacity(), 2);
    v.pop_back();
    assert_eq!(v.capacity(), DEFAULT_CAPACITY);
    assert_eq!(v.at(0), &0u64.to_ne_bytes());
    v.pop_back();
    assert!(v.is_empty());
    v.pop_back();
    assert!(v.is_empty());
}

#[test]
fn test_vector_reserve_back() {
    let mut v = Vector::new(16);
    let slot = v.reserve_back();
    unsafe { std::ptr::write_bytes(slot.as_ptr(), 0xab, 16) };
    assert_eq!(v.len(), 1);
    assert!(v.at(0).iter().all(|b| *b == 0xab));
}
