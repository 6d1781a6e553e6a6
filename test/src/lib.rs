//! Shared machinery for the randomized allocator tests: a script of
//! allocator operations, a quickcheck generator for such scripts, and an
//! interpreter that runs one against a `GnatAlloc` while mirroring every
//! live allocation in ordinary std memory. Payloads are filled with a
//! per-allocation pattern and re-verified before every free and resize, so
//! any block overlap or bookkeeping corruption shows up as a byte mismatch
//! — and the `extra_assertions` walker checks the chains after every
//! operation on top of that.

use std::ptr::{self, NonNull};

use gnat_alloc::GnatAlloc;
use quickcheck::{Arbitrary, Gen};

/// The region every script runs against, in bytes.
pub const HEAP_BYTES: usize = 8 * 1024;

const NUM_OPERATIONS: usize = 2_000;

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    // Allocate this many bytes.
    Alloc(usize),

    // Free the n^th allocation we've made, or no-op if it is already gone.
    Free(usize),

    // Resize the n^th allocation to this many bytes, or no-op if it is
    // already gone.
    Realloc(usize, usize),
}

use Operation::*;

fn arbitrary_size(g: &mut Gen) -> usize {
    // Mostly hand-sized requests, some spanning many cells, and the
    // occasional zero to exercise the refusal paths.
    match u8::arbitrary(g) % 20 {
        0 => 0,
        1 | 2 => 64 + usize::arbitrary(g) % 200,
        _ => 1 + usize::arbitrary(g) % 16,
    }
}

#[derive(Debug, Clone)]
pub struct Operations(pub Vec<Operation>);

impl Arbitrary for Operations {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut num_allocs = 0;
        let mut active = vec![];
        let mut operations = Vec::with_capacity(NUM_OPERATIONS);

        for _ in 0..NUM_OPERATIONS {
            let roll = u8::arbitrary(g) % 8;
            if !active.is_empty() && roll < 2 {
                let i = usize::arbitrary(g) % active.len();
                operations.push(Free(active.swap_remove(i)));
            } else if !active.is_empty() && roll < 4 {
                let i = usize::arbitrary(g) % active.len();
                operations.push(Realloc(active[i], arbitrary_size(g)));
            } else {
                operations.push(Alloc(arbitrary_size(g)));
                active.push(num_allocs);
                num_allocs += 1;
            }
        }

        // Close the script by releasing whatever is still live, so a run
        // always ends with the heap fully drained.
        operations.reserve_exact(active.len());
        while let Some(i) = active.pop() {
            operations.push(Free(i));
        }

        Operations(operations)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        // Shrinking to a prefix keeps every ordinal reference valid.
        if self.0.len() <= 1 {
            return Box::new(std::iter::empty());
        }
        let half = Operations(self.0[..self.0.len() / 2].to_vec());
        Box::new(std::iter::once(half))
    }
}

fn pattern_for(ordinal: usize) -> u8 {
    (ordinal as u8).wrapping_mul(31).wrapping_add(7)
}

fn write_payload(ptr: NonNull<u8>, bytes: &[u8]) {
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
}

fn verify_payload(ptr: NonNull<u8>, bytes: &[u8]) {
    for (i, expected) in bytes.iter().enumerate() {
        let got = unsafe { ptr.as_ptr().add(i).read() };
        assert_eq!(
            got, *expected,
            "payload byte {} of allocation at {:p} was clobbered",
            i,
            ptr.as_ptr()
        );
    }
}

/// Run a script against a fresh heap and check every payload byte along
/// the way.
pub fn run(ops: &Operations) {
    let mut region = vec![0u8; HEAP_BYTES];
    let heap = GnatAlloc::new(&mut region);

    // One slot per Alloc in script order; `None` once gone (or refused).
    let mut slots: Vec<Option<(NonNull<u8>, Vec<u8>)>> = Vec::new();

    for op in &ops.0 {
        match *op {
            Alloc(size) => match heap.alloc(size) {
                Some(p) => {
                    assert!(size > 0, "zero-size allocations must be refused");
                    assert_eq!(p.as_ptr() as usize % 4, 0, "payloads are 4-byte aligned");
                    let seed = pattern_for(slots.len());
                    let bytes: Vec<u8> =
                        (0..size).map(|i| seed.wrapping_add(i as u8)).collect();
                    write_payload(p, &bytes);
                    slots.push(Some((p, bytes)));
                }
                None => slots.push(None),
            },

            Free(i) => {
                if let Some((p, bytes)) = slots[i].take() {
                    verify_payload(p, &bytes);
                    unsafe { heap.free(p.as_ptr()) };
                }
            }

            Realloc(i, new_size) => {
                let (p, bytes) = match slots[i].take() {
                    Some(slot) => slot,
                    None => continue,
                };
                verify_payload(p, &bytes);

                match unsafe { heap.realloc(p.as_ptr(), new_size) } {
                    Some(q) => {
                        let keep = bytes.len().min(new_size);
                        verify_payload(q, &bytes[..keep]);

                        let seed = pattern_for(i);
                        let mut new_bytes = bytes[..keep].to_vec();
                        new_bytes
                            .extend((keep..new_size).map(|j| seed.wrapping_add(j as u8)));
                        write_payload(q, &new_bytes);
                        slots[i] = Some((q, new_bytes));
                    }
                    None if new_size == 0 => {
                        // realloc-to-zero is a free
                    }
                    None => {
                        // A refused resize leaves the original intact.
                        verify_payload(p, &bytes);
                        slots[i] = Some((p, bytes));
                    }
                }
            }
        }
    }

    // The script drains the heap, so everything must have coalesced back
    // into a single free run.
    assert!(slots.iter().all(|slot| slot.is_none()));
    let report = heap.info(ptr::null(), false);
    assert_eq!(report.used_entries, 0);
    assert_eq!(report.used_blocks, 0);
    if report.total_entries != 0 {
        assert_eq!(report.free_entries, 1, "a drained heap is one free run");
        assert_eq!(report.free_blocks, report.total_blocks);
    }
}
