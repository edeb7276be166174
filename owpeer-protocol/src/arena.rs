//! Payload arena for Data objects
//!
//! Data payloads are the only variable-size storage the bus needs. They are
//! carved from a region reserved for the bus alone, so a burst of large
//! transfers can neither starve nor fragment the rest of the firmware heap.
//! A [`PayloadBuf`] frees its bytes back to the region when dropped.
//!
//! ```rust,ignore
//! static ARENA: PayloadArena = PayloadArena::new();
//! static REGION: StaticCell<[MaybeUninit<u8>; PAYLOAD_ARENA_SIZE]> = StaticCell::new();
//!
//! ARENA.init(REGION.init([MaybeUninit::uninit(); PAYLOAD_ARENA_SIZE]))?;
//! ```

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::mem::{size_of, MaybeUninit};
use core::ptr::NonNull;
use core::slice;

use embedded_alloc::LlffHeap as Heap;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

/// Default arena size in bytes
pub const PAYLOAD_ARENA_SIZE: usize = 32 * 1024;

/// Smallest region the heap can manage
pub const MIN_REGION_SIZE: usize = 4 * size_of::<usize>();

/// Arena errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArenaError {
    /// The region has no free block large enough for the requested length
    Exhausted { requested: usize, available: usize },
}

/// Heap over a region reserved for payload buffers
///
/// Lives in a `static` so buffers can outlive the stage that filled them.
/// Until [`init`](Self::init) is called every non-empty allocation fails.
pub struct PayloadArena {
    heap: Heap,
    capacity: AtomicUsize,
    ready: AtomicBool,
}

impl PayloadArena {
    /// Create an arena with no backing region yet
    pub const fn new() -> Self {
        Self {
            heap: Heap::empty(),
            capacity: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Hand the arena its backing region
    ///
    /// The region is given back if the arena already has one or if it is
    /// smaller than [`MIN_REGION_SIZE`].
    #[allow(unsafe_code)]
    pub fn init(
        &self,
        region: &'static mut [MaybeUninit<u8>],
    ) -> Result<(), &'static mut [MaybeUninit<u8>]> {
        if region.len() < MIN_REGION_SIZE || self.ready.swap(true, Ordering::AcqRel) {
            return Err(region);
        }

        let size = region.len();
        // SAFETY: the region is borrowed mutably for 'static and reaches the
        // heap exactly once, guarded by `ready`
        unsafe { self.heap.init(region.as_mut_ptr() as usize, size) }
        self.capacity.store(size, Ordering::Release);
        Ok(())
    }

    /// Region size in bytes, 0 before `init`
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Bytes held by live buffers, including allocator rounding
    pub fn used(&self) -> usize {
        self.heap.used()
    }

    /// Bytes still free in the region
    pub fn available(&self) -> usize {
        self.heap.free()
    }

    /// Allocate a zeroed buffer of `len` bytes
    #[allow(unsafe_code)]
    pub fn alloc(&'static self, len: usize) -> Result<PayloadBuf, ArenaError> {
        if len == 0 {
            return Ok(PayloadBuf {
                ptr: NonNull::dangling(),
                len: 0,
                arena: self,
            });
        }

        let exhausted = ArenaError::Exhausted {
            requested: len,
            available: self.available(),
        };
        let layout = Layout::from_size_align(len, 1).map_err(|_| exhausted)?;
        // SAFETY: `layout` has a non-zero size
        let ptr = unsafe { GlobalAlloc::alloc_zeroed(&self.heap, layout) };

        NonNull::new(ptr)
            .map(|ptr| PayloadBuf {
                ptr,
                len,
                arena: self,
            })
            .ok_or(exhausted)
    }

    /// Allocate a buffer holding a copy of `data`
    pub fn alloc_from(&'static self, data: &[u8]) -> Result<PayloadBuf, ArenaError> {
        let mut buf = self.alloc(data.len())?;
        buf.as_mut_slice().copy_from_slice(data);
        Ok(buf)
    }

    #[allow(unsafe_code)]
    fn free(&self, ptr: NonNull<u8>, len: usize) {
        if len == 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(len, 1) {
            // SAFETY: `ptr` came from `alloc` on this heap with the same layout
            unsafe { GlobalAlloc::dealloc(&self.heap, ptr.as_ptr(), layout) }
        }
    }
}

impl Default for PayloadArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PayloadArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}

/// A payload buffer carved from a [`PayloadArena`]
pub struct PayloadBuf {
    ptr: NonNull<u8>,
    len: usize,
    arena: &'static PayloadArena,
}

// SAFETY: a PayloadBuf is the only handle to its bytes, and the arena's heap
// serializes alloc/free behind a critical section
#[allow(unsafe_code)]
unsafe impl Send for PayloadBuf {}

// SAFETY: shared access only hands out `&[u8]`
#[allow(unsafe_code)]
unsafe impl Sync for PayloadBuf {}

impl PayloadBuf {
    /// Buffer length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length buffer
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` initialized bytes (dangling only when `len` is 0)
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the access exclusive
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PayloadBuf {
    fn drop(&mut self) {
        self.arena.free(self.ptr, self.len);
    }
}

impl PartialEq for PayloadBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for PayloadBuf {}

impl fmt::Debug for PayloadBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadBuf")
            .field("len", &self.len)
            .field("bytes", &self.as_slice())
            .finish()
    }
}

/// Arena over a leaked heap region, for host tests
#[cfg(test)]
pub(crate) fn leak_arena(size: usize) -> &'static PayloadArena {
    use std::boxed::Box;

    let arena: &'static PayloadArena = Box::leak(Box::new(PayloadArena::new()));
    let region = Box::leak(std::vec![MaybeUninit::uninit(); size].into_boxed_slice());
    assert!(arena.init(region).is_ok());
    arena
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release() {
        let arena = leak_arena(256);

        let buf = arena.alloc(10).unwrap();
        assert_eq!(buf.len(), 10);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert!(arena.used() >= 10);
        assert!(arena.available() <= 246);

        drop(buf);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_buffers_live_in_region() {
        static ARENA: PayloadArena = PayloadArena::new();
        use std::boxed::Box;

        let region = Box::leak(std::vec![MaybeUninit::uninit(); 256].into_boxed_slice());
        let start = region.as_ptr() as usize;
        let end = start + region.len();
        assert!(ARENA.init(region).is_ok());
        assert_eq!(ARENA.capacity(), 256);

        let a = ARENA.alloc_from(b"first").unwrap();
        let b = ARENA.alloc_from(b"second").unwrap();
        assert_eq!(a.as_slice(), b"first");
        assert_eq!(b.as_slice(), b"second");
        for buf in [&a, &b] {
            let at = buf.as_slice().as_ptr() as usize;
            assert!(at >= start && at + buf.len() <= end);
        }
    }

    #[test]
    fn test_exhausted() {
        let arena = leak_arena(128);

        let held = arena.alloc(100).unwrap();
        match arena.alloc(100) {
            Err(ArenaError::Exhausted {
                requested,
                available,
            }) => {
                assert_eq!(requested, 100);
                assert!(available < 100);
            }
            other => panic!("unexpected {:?}", other),
        }
        // A failed request must not leak space
        assert!(arena.used() >= 100);

        drop(held);
        assert_eq!(arena.used(), 0);
        assert!(arena.alloc(100).is_ok());
    }

    #[test]
    fn test_alloc_from_copies() {
        let arena = leak_arena(64);

        let buf = arena.alloc_from(b"abc").unwrap();
        assert_eq!(buf.as_slice(), b"abc");
        assert!(arena.used() >= 3);
    }

    #[test]
    fn test_zero_length_needs_no_region() {
        static ARENA: PayloadArena = PayloadArena::new();

        let buf = ARENA.alloc(0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), &[] as &[u8]);
        assert!(matches!(
            ARENA.alloc(1),
            Err(ArenaError::Exhausted { requested: 1, .. })
        ));
    }

    #[test]
    fn test_init_once() {
        static ARENA: PayloadArena = PayloadArena::new();
        use std::boxed::Box;

        let tiny = Box::leak(std::vec![MaybeUninit::uninit(); MIN_REGION_SIZE - 1].into_boxed_slice());
        assert!(ARENA.init(tiny).is_err());
        assert_eq!(ARENA.capacity(), 0);

        let first = Box::leak(std::vec![MaybeUninit::uninit(); 64].into_boxed_slice());
        let second = Box::leak(std::vec![MaybeUninit::uninit(); 64].into_boxed_slice());
        assert!(ARENA.init(first).is_ok());
        assert!(ARENA.init(second).is_err());
        assert_eq!(ARENA.capacity(), 64);
    }
}
