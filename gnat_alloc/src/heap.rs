//! The heap bookkeeping engine.
//!
//! The region is a flat array of cells threaded by two interlocking doubly
//! linked lists: the physical chain over every logical block in address
//! order, and the free list over the free ones. Both are rooted at cell 0,
//! the sentinel, and both encode their links as 16-bit cell indices, so
//! there are no null-pointer edge cases anywhere below here.
//!
//! ```text
//!             physical chain (next/prev)
//!      +-----+------+--------------+------+-------------+
//!      |  0  | used |     free     | used |    free ... |
//!      +-----+------+--------------+------+-------------+
//!         |             ^                      ^
//!         |  free list  |                      |
//!         +-------------+----------------------+
//!              (next-free/prev-free, in the bodies)
//! ```
//!
//! The physically last block's `next` index is 0, meaning "the next cell is
//! the sentinel": that is the end-of-heap marker. A zeroed region is left
//! untouched until the first allocation, which materializes block 1 lazily.

use core::cmp;
use core::ptr::{self, NonNull};

use memory_units::Bytes;

use crate::block::{Block, BLOCK_BYTES, BODY_BYTES, FREE_FLAG, HEADER_BYTES, INDEX_MASK};
use crate::const_init::ConstInit;
use crate::AllocErr;

#[cfg(feature = "log")]
macro_rules! debug_log {
    ( $( $t:tt )* ) => { log::debug!( $( $t )* ) }
}

#[cfg(not(feature = "log"))]
macro_rules! debug_log {
    ( $( $t:tt )* ) => {{}};
}

/// The best-fit scan's "no candidate yet" span, per the 15-bit index width.
#[cfg(not(feature = "first_fit"))]
const NO_CANDIDATE: u16 = 0x7FFF;

/// Where a free-list scan landed.
enum Fit {
    /// A free block inside the heap that satisfies the request, and its
    /// span in cells.
    Inner(u16, u16),

    /// No inner block fits; the index of the end-of-heap block if the scan
    /// saw one, or 0 on a heap that has never been touched.
    End(u16),
}

/// Counts gathered by a full walk of the physical chain.
///
/// "Entries" are logical blocks; "blocks" are cells. The sentinel cell is
/// not counted, so a quiescent heap always accounts for `N - 1` cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapReport {
    /// Logical blocks seen by the walk.
    pub total_entries: u16,
    /// Cells seen by the walk.
    pub total_blocks: u16,
    /// Logical blocks currently handed out.
    pub used_entries: u16,
    /// Cells currently handed out.
    pub used_blocks: u16,
    /// Logical blocks on the free list.
    pub free_entries: u16,
    /// Cells on the free list.
    pub free_blocks: u16,
    /// Set when the probe pointer passed to [`crate::GnatAlloc::info`]
    /// named the first cell of a currently-free block.
    pub probe_matched_free: Option<NonNull<u8>>,
}

/// Convert a payload size in bytes to a span in cells.
///
/// The first cell contributes its body (the free links are overwritten once
/// the block is in use); every further cell contributes all eight bytes.
pub(crate) fn blocks_for_size(size: Bytes) -> u16 {
    extra_assert!(size.0 > 0);
    if size.0 <= BODY_BYTES {
        return 1;
    }
    let n = 2 + (size.0 - 1 - BODY_BYTES) / BLOCK_BYTES;
    cmp::min(n, usize::from(u16::MAX)) as u16
}

/// The engine state: a raw, word-aligned region viewed as `blocks` cells.
///
/// `Heap` on its own provides no locking; it is always owned by an
/// `Exclusive` cell in the public allocator.
pub(crate) struct Heap {
    base: *mut u8,
    blocks: u16,
}

impl ConstInit for Heap {
    const INIT: Heap = Heap {
        base: ptr::null_mut(),
        blocks: 0,
    };
}

impl Heap {
    /// View `len` bytes at `base` as a heap.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes for the
    /// lifetime of the `Heap`, and nothing else may touch the region's
    /// link words while it lives.
    pub(crate) unsafe fn new(base: *mut u8, len: Bytes) -> Heap {
        let mut heap = Heap::INIT;
        heap.bind(base, len);
        heap
    }

    pub(crate) fn is_bound(&self) -> bool {
        !self.base.is_null()
    }

    /// Late-bind a region; see [`Heap::new`] for the safety contract.
    ///
    /// Only the sentinel cell needs to be pristine, so the region is not
    /// zero-filled here; the first allocation writes block 1 in full.
    pub(crate) unsafe fn bind(&mut self, base: *mut u8, len: Bytes) {
        let offset = base.align_offset(BLOCK_BYTES);
        if len.0 < offset + BLOCK_BYTES {
            return;
        }
        let base = base.add(offset);
        let cells = (len.0 - offset) / BLOCK_BYTES;

        self.base = base;
        self.blocks = cmp::min(cells, usize::from(INDEX_MASK)) as u16;
        ptr::write_bytes(base, 0, BLOCK_BYTES);
    }

    #[inline]
    fn block(&self, c: u16) -> &Block {
        extra_assert!(c < self.blocks);
        unsafe { &*(self.base as *const Block).add(usize::from(c)) }
    }

    /// Span of the logical block at `c`, in cells. For the physically last
    /// block the end marker stands in for "cell N".
    fn span(&self, c: u16) -> u16 {
        let next = self.block(c).next_index();
        if next == 0 {
            self.blocks - c
        } else {
            next - c
        }
    }

    fn header_ptr(&self, c: u16) -> *const u8 {
        unsafe { self.base.add(usize::from(c) * BLOCK_BYTES) }
    }

    fn data_ptr(&self, c: u16) -> *mut u8 {
        unsafe { self.base.add(usize::from(c) * BLOCK_BYTES + HEADER_BYTES) }
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base as usize;
        let end = start + usize::from(self.blocks) * BLOCK_BYTES;
        (start..end).contains(&(ptr as usize))
    }

    /// Recover the cell index behind a payload pointer. The flooring
    /// division absorbs the header offset.
    fn index_of(&self, ptr: *const u8) -> u16 {
        extra_assert!(self.contains(ptr), "pointer does not belong to this heap");
        ((ptr as usize - self.base as usize) / BLOCK_BYTES) as u16
    }

    fn result_ptr(&self, c: u16) -> Result<NonNull<u8>, AllocErr> {
        NonNull::new(self.data_ptr(c)).ok_or(AllocErr)
    }
}

/// Structural primitives. These maintain the two chains but decide nothing;
/// the public operations sequence them.
impl Heap {
    /// Split the block at `c` so that a new block starts at `c + blocks`,
    /// marked free iff `freemask` is the free flag.
    ///
    /// The new block is wired into the physical chain only. Callers that
    /// keep the head free rely on the head's free-list links being
    /// untouched; callers that split off a free tail push it through the
    /// freeing path themselves.
    fn make_new_block(&self, c: u16, blocks: u16, freemask: u16) {
        let s = c + blocks;
        let n = self.block(c).next_index();

        self.block(s).set_next_raw(n);
        self.block(s).set_prev_index(c);

        self.block(n).set_prev_index(s);
        self.block(c).set_next_raw(s | freemask);
    }

    /// Unlink `c` from the free list and clear its free flag. Safe when its
    /// free links reference the sentinel: cell 0's body words are scratch.
    fn disconnect_from_free_list(&self, c: u16) {
        extra_assert!(self.block(c).is_free());
        let nf = self.block(c).next_free();
        let pf = self.block(c).prev_free();

        self.block(pf).set_next_free(nf);
        self.block(nf).set_prev_free(pf);

        self.block(c).mark_used();
    }

    /// If the physical successor of `c` is free, dissolve it into `c`.
    /// `c` keeps its own free/used state; only its span grows.
    fn assimilate_up(&self, c: u16) {
        let n = self.block(c).next_index();
        if !self.block(n).is_free() {
            return;
        }

        self.disconnect_from_free_list(n);

        let nn = self.block(n).next_index();
        self.block(nn).set_prev_index(c);
        self.block(c).set_next_raw(nn);
    }

    /// Dissolve `c` into its physical predecessor, which the caller has
    /// checked is free (and, when `freemask` is 0, already unlinked for
    /// reuse as a live block). Returns the predecessor's index.
    fn assimilate_down(&self, c: u16, freemask: u16) -> u16 {
        let p = self.block(c).prev_index();
        let n = self.block(c).next_index();

        self.block(p).set_next_raw(n | freemask);
        self.block(n).set_prev_index(p);
        p
    }
}

/// The free-list search policy, chosen at build time.
impl Heap {
    /// Stop at the first free block whose span satisfies the request.
    #[cfg(feature = "first_fit")]
    fn find_fit(&self, blocks: u16) -> Fit {
        let mut cf = self.block(0).next_free();
        let mut end = 0;

        while cf != 0 {
            let next = self.block(cf).next_index();
            if next == 0 {
                // The end-of-heap block is never a candidate; it is grown
                // into by the extension path instead.
                end = cf;
            } else if next - cf >= blocks {
                return Fit::Inner(cf, next - cf);
            }
            cf = self.block(cf).next_free();
        }

        Fit::End(end)
    }

    /// Walk the whole free list and keep the tightest-fitting block.
    /// Ties go to the earliest entry.
    #[cfg(not(feature = "first_fit"))]
    fn find_fit(&self, blocks: u16) -> Fit {
        let mut cf = self.block(0).next_free();
        let mut end = 0;
        let mut best_block = 0;
        let mut best_size = NO_CANDIDATE;

        while cf != 0 {
            let next = self.block(cf).next_index();
            if next == 0 {
                // The end-of-heap block is never a candidate; it is grown
                // into by the extension path instead.
                end = cf;
            } else {
                let span = next - cf;
                if span >= blocks && span < best_size {
                    best_block = cf;
                    best_size = span;
                }
            }
            cf = self.block(cf).next_free();
        }

        if best_size != NO_CANDIDATE {
            Fit::Inner(best_block, best_size)
        } else {
            Fit::End(end)
        }
    }
}

/// The public operations, minus locking and pointer/null plumbing.
impl Heap {
    pub(crate) fn alloc(&self, size: Bytes) -> Result<NonNull<u8>, AllocErr> {
        if size.0 == 0 || self.blocks < 2 {
            return Err(AllocErr);
        }

        let blocks = blocks_for_size(size);

        let c = match self.find_fit(blocks) {
            Fit::Inner(cf, span) => {
                if span == blocks {
                    // Exact fit: just unhook it.
                    self.disconnect_from_free_list(cf);
                    cf
                } else {
                    // Carve the allocation from the tail so the shrunken
                    // head keeps its place on the free list untouched.
                    self.make_new_block(cf, span - blocks, FREE_FLAG);
                    cf + (span - blocks)
                }
            }

            Fit::End(mut cf) => {
                if cf == 0 && self.block(0).next_index() != 0 {
                    // Initialized, but nothing free reaches the end of the
                    // heap anymore.
                    debug_log!("alloc: {} bytes -> out of memory", size.0);
                    return Err(AllocErr);
                }
                if u32::from(cf) + u32::from(blocks) + 1 >= u32::from(self.blocks) {
                    debug_log!("alloc: {} bytes -> out of memory", size.0);
                    return Err(AllocErr);
                }

                if cf == 0 {
                    // First allocation against a pristine region:
                    // materialize block 1 as the whole free run.
                    self.block(0).set_next_raw(1);
                    self.block(0).set_next_free(1);

                    let first = self.block(1);
                    first.set_next_raw(FREE_FLAG);
                    first.set_prev_index(0);
                    first.set_next_free(0);
                    first.set_prev_free(0);
                    cf = 1;
                }

                // Slide the end-of-heap block up past the new allocation:
                // re-aim its free-list neighbours, move the cell verbatim,
                // then stitch the physical chain.
                let s = cf + blocks;
                let nf = self.block(cf).next_free();
                let pf = self.block(cf).prev_free();
                self.block(pf).set_next_free(s);
                self.block(nf).set_prev_free(s);

                self.block(s).copy_from(self.block(cf));
                self.block(cf).set_next_raw(s);
                self.block(s).set_prev_index(cf);
                cf
            }
        };

        debug_log!("alloc: {} bytes -> {} cells at block {}", size.0, blocks, c);
        assert_heap_integrity(self);
        self.result_ptr(c)
    }

    pub(crate) fn free_ptr(&self, ptr: NonNull<u8>) {
        let c = self.index_of(ptr.as_ptr());
        extra_assert_eq!(
            ptr.as_ptr(),
            self.data_ptr(c),
            "not an allocation's payload pointer"
        );
        self.free_index(c);
        assert_heap_integrity(self);
    }

    /// The freeing path proper. Factored off the pointer entry point so
    /// realloc's shrink path can re-free a carved-off tail while already
    /// inside the critical section.
    fn free_index(&self, c: u16) {
        debug_log!("free: block {} ({} cells)", c, self.span(c));

        // Eagerly absorb a free successor, end-of-heap run included.
        self.assimilate_up(c);

        let p = self.block(c).prev_index();
        if self.block(p).is_free() {
            // The predecessor is already on the free list; growing it over
            // `c` is the whole job.
            self.assimilate_down(c, FREE_FLAG);
        } else {
            // Push `c` onto the head of the free list. No address-ordered
            // scan here; the search policy amortizes the disorder.
            let head = self.block(0).next_free();
            self.block(head).set_prev_free(c);
            self.block(c).set_next_free(head);
            self.block(c).set_prev_free(0);
            self.block(0).set_next_free(c);
            self.block(c).mark_free();
        }
    }

    pub(crate) fn realloc_ptr(
        &self,
        ptr: NonNull<u8>,
        size: Bytes,
    ) -> Result<NonNull<u8>, AllocErr> {
        let mut c = self.index_of(ptr.as_ptr());
        let blocks = blocks_for_size(size);
        let cur_span = self.span(c);
        let cur_bytes = usize::from(cur_span) * BLOCK_BYTES - HEADER_BYTES;

        if cur_span == blocks {
            // Same cell count before and after; nothing to do.
            return Ok(ptr);
        }

        // Absorbing a free successor is cheap and never wrong: either the
        // request grows into it, or the shrink below re-frees the surplus.
        self.assimilate_up(c);

        let mut ptr = ptr.as_ptr();
        let p = self.block(c).prev_index();
        if self.block(p).is_free() && blocks <= self.span(c) + (c - p) {
            // The predecessor plus this block holds the request. Merge
            // downward for reuse and slide the payload into place; the
            // ranges overlap, so this must be an overlap-safe copy.
            self.disconnect_from_free_list(p);
            c = self.assimilate_down(c, 0);

            let dst = self.data_ptr(c);
            unsafe { ptr::copy(ptr as *const u8, dst, cur_bytes) };
            ptr = dst;
        }

        let span = self.span(c);
        if span == blocks {
            // Grown (or moved) exactly into place.
        } else if span > blocks {
            // Too big now: carve off the surplus as a used block and send
            // it through the ordinary freeing path, which re-merges it
            // with whatever free space follows.
            self.make_new_block(c, blocks, 0);
            self.free_index(c + blocks);
        } else {
            // No way to grow in place; fall back to fresh-copy-release.
            // On failure the original block is left exactly as it was.
            let fresh = self.alloc(size)?;
            unsafe { ptr::copy_nonoverlapping(ptr as *const u8, fresh.as_ptr(), cur_bytes) };
            self.free_index(c);
            ptr = fresh.as_ptr();
        }

        debug_log!("realloc: {} bytes -> {} cells at block {}", size.0, blocks, c);
        assert_heap_integrity(self);
        NonNull::new(ptr).ok_or(AllocErr)
    }

    pub(crate) fn info(&self, probe: *const u8, force: bool) -> HeapReport {
        let mut report = HeapReport::default();
        if self.blocks == 0 {
            return report;
        }

        let mut c = self.block(0).next_index();
        if c == 0 {
            // Never-touched region: everything past the sentinel is one
            // implicit free run that no allocation has materialized yet.
            report.free_blocks = self.blocks - 1;
            report.total_blocks = self.blocks - 1;
            report_line(force, &report);
            return report;
        }

        loop {
            let block = self.block(c);
            let next = block.next_index();
            let span = self.span(c);

            report.total_entries += 1;
            report.total_blocks += span;
            if block.is_free() {
                report.free_entries += 1;
                report.free_blocks += span;
                if !probe.is_null() && core::ptr::eq(probe, self.header_ptr(c)) {
                    debug_log!("info: probe {:p} is a free block", probe);
                    report.probe_matched_free = NonNull::new(probe as *mut u8);
                }
            } else {
                report.used_entries += 1;
                report.used_blocks += span;
            }
            walk_line(force, c, span, block.is_free());

            if next == 0 {
                break;
            }
            c = next;
        }

        report_line(force, &report);
        report
    }
}

fn walk_line(force: bool, c: u16, span: u16, free: bool) {
    #[cfg(feature = "log")]
    {
        let state = if free { "free" } else { "used" };
        if force {
            log::debug!("info: block {:>5} spans {:>5} cells, {}", c, span, state);
        } else {
            log::trace!("info: block {:>5} spans {:>5} cells, {}", c, span, state);
        }
    }
    #[cfg(not(feature = "log"))]
    let _ = (force, c, span, free);
}

fn report_line(force: bool, report: &HeapReport) {
    #[cfg(feature = "log")]
    {
        if force {
            log::debug!(
                "info: {} entries, {} used / {} free cells",
                report.total_entries,
                report.used_blocks,
                report.free_blocks
            );
        } else {
            log::trace!(
                "info: {} entries, {} used / {} free cells",
                report.total_entries,
                report.used_blocks,
                report.free_blocks
            );
        }
    }
    #[cfg(not(feature = "log"))]
    let _ = (force, report);
}

// Walk the whole heap and check the structural invariants:
//
// - the physical chain starts at block 1, strictly advances, and its back
//   links agree;
// - no two physically adjacent blocks are both free;
// - every cell past the sentinel belongs to exactly one block;
// - the free list is cycle-free, consistent in both directions, and holds
//   exactly the flag-set blocks.
//
// This is O(heap), so it only runs under `extra_assertions`, after every
// mutating operation; otherwise it is an inlined-away no-op.
#[cfg_attr(
    not(feature = "extra_assertions"),
    allow(unused_variables),
    inline(always)
)]
fn assert_heap_integrity(heap: &Heap) {
    #[cfg(feature = "extra_assertions")]
    {
        if heap.blocks < 2 || heap.block(0).next_index() == 0 {
            return;
        }

        let mut c = heap.block(0).next_index();
        assert_eq!(c, 1, "the first block follows the sentinel");

        let mut flagged: u16 = 0;
        let mut cells: u32 = 0;
        loop {
            let next = heap.block(c).next_index();
            if heap.block(c).is_free() {
                flagged += 1;
            }
            cells += u32::from(heap.span(c));

            if next == 0 {
                break;
            }
            assert!(next > c, "the physical chain advances");
            assert_eq!(heap.block(next).prev_index(), c, "prev(next(c)) == c");
            assert!(
                !(heap.block(c).is_free() && heap.block(next).is_free()),
                "adjacent blocks are never both free"
            );
            c = next;
        }
        assert_eq!(
            cells,
            u32::from(heap.blocks) - 1,
            "every cell past the sentinel is accounted for"
        );

        let mut count: u16 = 0;
        let mut prev = 0;
        let mut f = heap.block(0).next_free();
        while f != 0 {
            assert!(count < heap.blocks, "the free list is cycle-free");
            assert!(heap.block(f).is_free(), "free-list members carry the flag");
            assert_eq!(heap.block(f).prev_free(), prev, "free-list back link agrees");
            prev = f;
            f = heap.block(f).next_free();
            count += 1;
        }
        assert_eq!(count, flagged, "the free list holds exactly the flagged blocks");
    }
}
