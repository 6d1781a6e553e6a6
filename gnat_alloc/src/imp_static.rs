//! A built-in, zeroed backing region with a size fixed at compile time.
//!
//! The size is baked in by the build script from the
//! `GNAT_ALLOC_STATIC_HEAP_BYTES` environment variable.

use crate::heap::Heap;
use memory_units::Bytes;

const STATIC_HEAP_BYTES: usize =
    include!(concat!(env!("OUT_DIR"), "/gnat_alloc_static_heap_bytes.txt"));

#[repr(align(8))]
struct StaticRegion([u8; STATIC_HEAP_BYTES]);

static mut STATIC_HEAP: StaticRegion = StaticRegion([0; STATIC_HEAP_BYTES]);

/// Bind an unbound heap to the built-in region.
///
/// Called with the exclusive lock held, before every operation on a heap
/// created via `GnatAlloc::INIT`. Heaps that already have a region keep it.
pub(crate) fn bind(heap: &mut Heap) {
    if !heap.is_bound() {
        unsafe {
            let base = core::ptr::addr_of_mut!(STATIC_HEAP) as *mut u8;
            heap.bind(base, Bytes(STATIC_HEAP_BYTES));
        }
    }
}
