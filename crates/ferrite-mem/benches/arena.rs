// Arena container benchmarks
//
// These benchmarks measure bump placement (raw and typed), arena creation
// and teardown, and scoped arena allocation through the facade compared
// with single-object containers.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ferrite_mem::{
    ArenaContainer, ContainerTag, Memory, MemoryConfig, ObjectContainer, PlacementHint, TypeInfo,
    release_object, retain_object,
};

static POINT: TypeInfo = TypeInfo::instance("Point", 16, &[]);

/// Benchmark raw byte placement of different sizes.
///
/// The arena is recreated whenever it fills, so the numbers include an
/// amortized share of creation and teardown.
fn bench_place(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_place");
    group.sample_size(1000);

    for size in &[8usize, 32, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut arena = ArenaContainer::new(64 * 1024).unwrap();
            b.iter(|| {
                if arena.place(black_box(size)).is_none() {
                    arena = ArenaContainer::new(64 * 1024).unwrap();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark typed placement (align, stamp header, record for teardown).
fn bench_place_object(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_place_object");
    group.sample_size(1000);

    group.bench_function("point", |b| {
        let mut arena = ArenaContainer::new(64 * 1024).unwrap();
        b.iter(|| {
            if arena.place_object(black_box(&POINT)).is_none() {
                arena = ArenaContainer::new(64 * 1024).unwrap();
            }
        });
    });

    group.finish();
}

/// Benchmark creating and tearing down an arena.
fn bench_arena_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_lifecycle");

    for capacity in &[1024usize, 64 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    let arena = ArenaContainer::new(black_box(capacity)).unwrap();
                    arena.close();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark arena-hinted allocation against single-object containers.
///
/// Both sides allocate 64 points; the arena side also opens and closes the
/// scope.
fn bench_scoped_vs_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped_vs_single");
    let memory = Memory::new(MemoryConfig::default());

    group.bench_function("arena_scope", |b| {
        b.iter(|| {
            let scope = memory.enter_arena_with_capacity(64 * 32).unwrap();
            for _ in 0..64 {
                black_box(memory.alloc_instance(&POINT, PlacementHint::Arena).unwrap());
            }
            drop(scope);
        });
    });

    group.bench_function("single_object", |b| {
        b.iter(|| {
            for _ in 0..64 {
                let obj = ObjectContainer::new(&POINT, ContainerTag::Normal)
                    .unwrap()
                    .place();
                unsafe {
                    retain_object(Some(obj));
                    release_object(Some(black_box(obj)));
                }
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_place,
    bench_place_object,
    bench_arena_lifecycle,
    bench_scoped_vs_single,
);
criterion_main!(benches);
