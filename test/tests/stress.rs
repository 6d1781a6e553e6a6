//! A deterministic, heavier churn run with a seeded RNG. Unlike the
//! quickcheck scripts this one keeps the heap under pressure for tens of
//! thousands of operations and cross-checks the walker's cell accounting
//! as it goes.

use gnat_alloc::GnatAlloc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ptr;

#[test]
fn seeded_churn() {
    let mut rng = StdRng::seed_from_u64(0x6a77_a110c);
    let mut region = vec![0u8; 16 * 1024];
    let heap = GnatAlloc::new(&mut region);

    let mut live: Vec<(ptr::NonNull<u8>, usize, u8)> = Vec::new();
    let mut total_cells = None;

    for step in 0..30_000u32 {
        let roll: f64 = rng.gen();
        if !live.is_empty() && roll < 0.40 {
            let i = rng.gen_range(0..live.len());
            let (p, size, seed) = live.swap_remove(i);
            verify(p, size, seed);
            unsafe { heap.free(p.as_ptr()) };
        } else if !live.is_empty() && roll < 0.55 {
            let i = rng.gen_range(0..live.len());
            let (p, size, seed) = live[i];
            verify(p, size, seed);
            let new_size = rng.gen_range(1..=160);
            if let Some(q) = unsafe { heap.realloc(p.as_ptr(), new_size) } {
                verify(q, size.min(new_size), seed);
                let seed = seed.wrapping_add(1);
                fill(q, new_size, seed);
                live[i] = (q, new_size, seed);
            } else {
                verify(p, size, seed);
            }
        } else {
            let size = rng.gen_range(1..=96);
            if let Some(p) = heap.alloc(size) {
                let seed = (step as u8).wrapping_mul(13).wrapping_add(1);
                fill(p, size, seed);
                live.push((p, size, seed));
            }
        }

        if step % 1024 == 0 {
            let report = heap.info(ptr::null(), false);
            assert_eq!(
                report.used_blocks + report.free_blocks,
                report.total_blocks
            );
            match total_cells {
                None => total_cells = Some(report.total_blocks),
                Some(n) => assert_eq!(report.total_blocks, n, "cells never leak"),
            }
        }
    }

    for (p, size, seed) in live.drain(..) {
        verify(p, size, seed);
        unsafe { heap.free(p.as_ptr()) };
    }

    let report = heap.info(ptr::null(), false);
    assert_eq!(report.used_entries, 0);
    assert_eq!(report.free_entries, 1, "a drained heap is one free run");
}

fn fill(p: ptr::NonNull<u8>, size: usize, seed: u8) {
    for i in 0..size {
        unsafe { p.as_ptr().add(i).write(seed.wrapping_add(i as u8)) };
    }
}

fn verify(p: ptr::NonNull<u8>, size: usize, seed: u8) {
    for i in 0..size {
        let got = unsafe { p.as_ptr().add(i).read() };
        assert_eq!(got, seed.wrapping_add(i as u8), "byte {} of {:p}", i, p);
    }
}
