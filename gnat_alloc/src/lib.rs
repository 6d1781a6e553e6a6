/*!

## About

`gnat_alloc`: a gnat-sized, index-linked free-list allocator.

- **Gnat-sized state:** two 16-bit links per block instead of full-width
  pointers. On the 8-, 16- and 32-bit microcontrollers this crate targets,
  pointer-width link fields are most of an allocator's overhead; here a
  whole block header is four bytes.

- **Fragmentation-resistant:** freed blocks merge eagerly with their
  physical neighbors in both directions, so no two adjacent free blocks
  ever exist and the largest contiguous free run stays as large as the
  allocation pattern allows.

`gnat_alloc` manages one statically provisioned, word-aligned byte region
and offers the three classic operations — allocate, release, resize — plus
a diagnostic walk over the whole region. It never asks the environment for
more memory, never blocks, and fails by returning `None`.

## Using `gnat_alloc`

Hand it a region:

```
let region = Box::leak(vec![0u8; 1024].into_boxed_slice());
let heap = gnat_alloc::GnatAlloc::new(region);

let p = heap.alloc(16).unwrap();
unsafe { heap.free(p.as_ptr()) };
```

Or, with the `static_heap` feature, let it own a built-in zeroed region and
serve as the global allocator:

```ignore
#[global_allocator]
static ALLOC: gnat_alloc::GnatAlloc<'static> = gnat_alloc::GnatAlloc::INIT;
```

Payloads start four bytes into an 8-byte-aligned cell, so returned pointers
promise 4-byte alignment and the `GlobalAlloc` impl refuses stronger
requests with null. That makes the global-allocator role a fit for targets
whose primitive alignments top out at four bytes (i.e. the usual 8/16/32-bit
MCU, not a 64-bit host).

## `cargo` Features

- **extra_assertions**: Enable various extra, expensive integrity
  assertions, including a full structural walk of the heap after every
  mutating operation. Useful when debugging heap corruption, or
  `gnat_alloc` itself.

- **first_fit**: Take the first free block that fits instead of the best
  one. The scan gets cheaper; fragmentation gets worse.

- **static_heap**: Provide the built-in backing region and
  `GnatAlloc::INIT`. The region defaults to 32 KiB and is sized at build
  time by the `GNAT_ALLOC_STATIC_HEAP_BYTES` environment variable.

- **log**: Emit `debug!`/`trace!` diagnostics through the `log` facade.
  Nothing is ever logged at `error!` level; every failure is already
  reported by a return value.

## Implementation Notes and Constraints

- The region is viewed as an array of 8-byte cells. Cell 0 is the sentinel:
  it anchors both chains and never belongs to an allocation. A block's
  header holds its physical next/prev as 15-bit cell indices; bit 15 of
  `next` flags a free block. A free block's first four body bytes hold its
  free-list links, so the free list costs nothing beyond the blocks
  themselves:

```text
        0        2        4        6
        +--------+--------+--------+--------+
   used |  next  |  prev  |      payload -> |
        +--------+--------+--------+--------+
   free |  next* |  prev  |  nfree |  pfree |      (* = bit 15 set)
        +--------+--------+--------+--------+
```

- The 15-bit index caps a heap at 32767 cells (256 KiB of cells). Larger
  regions are truncated.

- Allocation is *O(free list)*; release and resize are *O(1)* apart from
  payload copies. A resize tries, in order: same cell count, growing over a
  free successor, sliding down over a free predecessor (one overlap-safe
  copy), shrinking in place, and finally fresh-allocate/copy/release.

- Every operation runs inside one critical section (a spin lock); the
  engine never re-enters it. There is no per-allocation alignment beyond
  the cell geometry, no zeroing, and no quarantine.

 */

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod extra_assert;

mod block;
mod const_init;
mod exclusive;
mod heap;

cfg_if::cfg_if! {
    if #[cfg(feature = "static_heap")] {
        mod imp_static;
    }
}

use core::alloc::{GlobalAlloc, Layout};
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use memory_units::Bytes;

use crate::block::BODY_ALIGN;
use crate::exclusive::Exclusive;
use crate::heap::Heap;

pub use crate::heap::HeapReport;

#[cfg(feature = "static_heap")]
use crate::const_init::ConstInit;

/// Allocation failed; reported publicly as `None`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AllocErr;

/// An index-linked free-list allocator over a single byte region.
///
/// All four operations serialize on one internal lock, so a `GnatAlloc`
/// can be shared freely (it is `Sync`); none of them ever suspends.
pub struct GnatAlloc<'a> {
    heap: Exclusive<Heap>,
    _region: PhantomData<&'a mut [u8]>,
}

unsafe impl<'a> Sync for GnatAlloc<'a> {}

#[cfg(feature = "static_heap")]
impl GnatAlloc<'static> {
    /// A `const` allocator over the built-in static region.
    ///
    /// Usable for initializing the `static` that gets set as the global
    /// allocator. The region is bound on first use; create at most one
    /// allocator from `INIT`, since they would all name the same region.
    pub const INIT: Self = GnatAlloc {
        heap: Exclusive::INIT,
        _region: PhantomData,
    };
}

impl<'a> GnatAlloc<'a> {
    /// Take ownership of `region` and manage it as a heap.
    ///
    /// The region is aligned inward to an 8-byte boundary and truncated to
    /// whole cells (at most 32767 of them); it does not need to be zeroed.
    /// A region too small for the sentinel plus one block will simply
    /// refuse every allocation.
    pub fn new(region: &'a mut [u8]) -> GnatAlloc<'a> {
        let len = Bytes(region.len());
        let heap = unsafe { Heap::new(region.as_mut_ptr(), len) };
        GnatAlloc {
            heap: Exclusive::new(heap),
            _region: PhantomData,
        }
    }

    fn with_heap<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Heap) -> T,
    {
        self.heap.lock_with(|heap| {
            #[cfg(feature = "static_heap")]
            crate::imp_static::bind(heap);
            f(heap)
        })
    }

    /// Allocate `size` bytes.
    ///
    /// Returns `None` when `size` is zero or no block can satisfy the
    /// request. The pointer is 4-byte aligned and stays valid until it is
    /// passed to [`free`][GnatAlloc::free] or reshaped by
    /// [`realloc`][GnatAlloc::realloc].
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.with_heap(|heap| heap.alloc(Bytes(size)).ok())
    }

    /// Release an allocation. A null `ptr` is a silent no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this allocator that
    /// has not been freed or reshaped since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.with_heap(|heap| heap.free_ptr(ptr));
        }
    }

    /// Resize an allocation, preserving the first `min(old, new)` payload
    /// bytes.
    ///
    /// `realloc(null, n)` behaves as `alloc(n)`; `realloc(p, 0)` frees `p`
    /// and returns `None`. On failure the original allocation is untouched,
    /// still owned by the caller, and `None` is returned.
    ///
    /// # Safety
    ///
    /// As for [`free`][GnatAlloc::free].
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return self.alloc(size),
        };
        if size == 0 {
            self.free(ptr.as_ptr());
            return None;
        }
        self.with_heap(|heap| heap.realloc_ptr(ptr, Bytes(size)).ok())
    }

    /// Walk the heap and report block and cell counts.
    ///
    /// When `probe` is non-null and names the first cell of a currently
    /// free block, the report's `probe_matched_free` echoes it back — a
    /// cheap "is this already on the free list?" check. `probe` is only
    /// compared, never dereferenced. With the `log` feature enabled,
    /// `force_dump` raises the per-block walk lines from `trace!` to
    /// `debug!`.
    pub fn info(&self, probe: *const u8, force_dump: bool) -> HeapReport {
        self.with_heap(|heap| heap.info(probe, force_dump))
    }
}

/// The drop-in-replacement surface.
///
/// `dealloc` recovers the block size from the header, so the layout is not
/// consulted; `alloc` and `realloc` refuse alignments above four bytes with
/// null, since the cell geometry cannot honor them.
unsafe impl GlobalAlloc for GnatAlloc<'static> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > BODY_ALIGN {
            return ptr::null_mut();
        }
        match GnatAlloc::alloc(self, layout.size()) {
            Some(ptr) => ptr.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        GnatAlloc::free(self, ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > BODY_ALIGN {
            return ptr::null_mut();
        }
        match GnatAlloc::realloc(self, ptr, new_size) {
            Some(ptr) => ptr.as_ptr(),
            None => ptr::null_mut(),
        }
    }
}
