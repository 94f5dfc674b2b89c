use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use worldview_core::timeseries::{top, Aggregate, Context, Duration, Reducer, Time, TimeSeries};

fn series(ctx: &Context, seed: usize) -> TimeSeries {
    let data = (0..ctx.points_count())
        .map(|i| if (i + seed) % 17 == 0 { f32::NAN } else { ((i * 31 + seed * 7) % 100) as f32 })
        .collect();
    TimeSeries::from_data(ctx.from, ctx.step, data)
}

fn benchmark_aggregate(c: &mut Criterion) {
    let ctx = Context::new(Time(0), Time(3600), Duration(15));
    let inputs: Vec<TimeSeries> = (0..200).map(|i| series(&ctx, i)).collect();

    c.bench_function("aggregate_nansum_200", |b| {
        b.iter(|| {
            let mut agg = Aggregate::new(Reducer::NanSum);
            agg.add_all(inputs.iter());
            black_box(agg.get())
        })
    });

    c.bench_function("aggregate_max_200", |b| {
        b.iter(|| {
            let mut agg = Aggregate::new(Reducer::Max);
            agg.add_all(inputs.iter());
            black_box(agg.get())
        })
    });
}

fn benchmark_top(c: &mut Criterion) {
    let ctx = Context::new(Time(0), Time(3600), Duration(15));
    let named: BTreeMap<String, TimeSeries> = (0..500).map(|i| (format!("container-{}", i), series(&ctx, i))).collect();

    c.bench_function("top_10_of_500", |b| {
        b.iter(|| black_box(top(&named, &Reducer::NanSum, 10)))
    });
}

criterion_group!(benches, benchmark_aggregate, benchmark_top);
criterion_main!(benches);
