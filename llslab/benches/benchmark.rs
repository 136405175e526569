use criterion::{Criterion, criterion_group, criterion_main};

use llslab::LLSlab;

//  Hot path: one allocation and its release, everything served from the active super-block.
fn allocate_release(c: &mut Criterion) {
    let slab = LLSlab::new(64).unwrap();
    slab.warm_up().expect("registration capacity available");

    c.bench_function("allocate_release_64", |b| {
        b.iter(|| {
            let slot = slab.allocate().expect("memory available");
            unsafe { slab.deallocate(slot) };
        })
    });
}

//  Carving: fill a whole super-block and drain it, amortizing the fresh-block and retirement paths.
fn fill_drain(c: &mut Criterion) {
    let slots_per_block = (16384 - 16) / 64;

    let slab = LLSlab::new(64).unwrap();
    slab.warm_up().expect("registration capacity available");

    let mut slots = Vec::with_capacity(slots_per_block);

    c.bench_function("fill_drain_block_64", |b| {
        b.iter(|| {
            for _ in 0..slots_per_block {
                slots.push(slab.allocate().expect("memory available"));
            }

            for slot in slots.drain(..) {
                unsafe { slab.deallocate(slot) };
            }
        })
    });
}

criterion_group!(benches, allocate_release, fill_drain);
criterion_main!(benches);
