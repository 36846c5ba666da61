use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filament_core::reactive::{Cell, Computed, Observer, Runtime};

fn build_chain(rt: &Runtime, depth: usize) -> (Cell<i64>, Computed<i64>) {
    let source = rt.cell(0i64);

    let source_clone = source.clone();
    let mut tail = rt.computed(move || source_clone.get() + 1);
    for _ in 1..depth {
        let prev = tail.clone();
        tail = rt.computed(move || prev.get() + 1);
    }
    (source, tail)
}

fn bench_cell_read(c: &mut Criterion) {
    let rt = Runtime::new();
    let cell = rt.cell(42i64);

    c.bench_function("cell_read_untracked_context", |b| {
        b.iter(|| black_box(cell.get()))
    });
}

fn bench_cell_write_no_subscribers(c: &mut Criterion) {
    let rt = Runtime::new();
    let cell = rt.cell(0i64);

    c.bench_function("cell_write_no_subscribers", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n = n.wrapping_add(1);
            cell.set(black_box(n));
        })
    });
}

fn bench_computed_cached_read(c: &mut Criterion) {
    let rt = Runtime::new();
    let (_source, tail) = build_chain(&rt, 10);
    tail.get();

    c.bench_function("computed_chain_10_cached_read", |b| {
        b.iter(|| black_box(tail.get()))
    });
}

fn bench_chain_invalidate_and_read(c: &mut Criterion) {
    let rt = Runtime::new();
    let (source, tail) = build_chain(&rt, 10);
    tail.get();

    c.bench_function("computed_chain_10_write_then_read", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n = n.wrapping_add(1);
            source.set(n);
            black_box(tail.get())
        })
    });
}

fn bench_fanout_notify(c: &mut Criterion) {
    let rt = Runtime::new();
    let source = rt.cell(0i64);

    let observers: Vec<Observer> = (0..100)
        .map(|_| {
            let obs = Observer::new(&rt, || {});
            let source_clone = source.clone();
            obs.run(move || {
                source_clone.get();
            });
            obs
        })
        .collect();

    c.bench_function("cell_write_100_observers", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n = n.wrapping_add(1);
            source.set(black_box(n));
        })
    });

    drop(observers);
}

fn bench_batched_writes(c: &mut Criterion) {
    let rt = Runtime::new();
    let cells: Vec<Cell<i64>> = (0..10).map(|i| rt.cell(i)).collect();

    let obs = Observer::new(&rt, || {});
    let cells_clone = cells.clone();
    obs.run(move || {
        for cell in &cells_clone {
            cell.get();
        }
    });

    c.bench_function("batch_10_writes_1_flush", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n = n.wrapping_add(1);
            rt.batch(|| {
                for cell in &cells {
                    cell.set(n);
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_cell_read,
    bench_cell_write_no_subscribers,
    bench_computed_cached_read,
    bench_chain_invalidate_and_read,
    bench_fanout_notify,
    bench_batched_writes,
);
criterion_main!(benches);
