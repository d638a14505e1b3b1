use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shmarray::{ElementLayout, Scalar, ShmContext};

fn bench_raw(c: &mut Criterion) {
    let ctx = ShmContext::new();
    let mut array = ctx.create_array(4096, ElementLayout::Raw).unwrap();

    c.bench_function("raw_set_get", |b| {
        b.iter(|| {
            array.set_byte(black_box(17), black_box(42)).unwrap();
            black_box(array.get_byte(black_box(17)).unwrap());
        })
    });
}

fn bench_record(c: &mut Criterion) {
    let ctx = ShmContext::new();
    let mut array = ctx
        .create_array(4096, ElementLayout::record("ddd").unwrap())
        .unwrap();
    let record = [Scalar::F64(1.0), Scalar::F64(2.0), Scalar::F64(3.0)];

    c.bench_function("record_set_get", |b| {
        b.iter(|| {
            array.set_record(black_box(17), black_box(&record)).unwrap();
            black_box(array.get_record(black_box(17)).unwrap());
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    let ctx = ShmContext::new();
    let mut array = ctx
        .create_array(1024, ElementLayout::record("<3f").unwrap())
        .unwrap();
    for i in 0..1024 {
        let v = i as f32;
        array
            .set_record(i as isize, &[v.into(), (v * 2.0).into(), (v * 3.0).into()])
            .unwrap();
    }

    c.bench_function("iterate_1024_records", |b| {
        b.iter(|| {
            let sum: f64 = array
                .iter()
                .map(|e| match e {
                    shmarray::Element::Record(fields) => fields[0].as_f64(),
                    shmarray::Element::Byte(byte) => byte as f64,
                })
                .sum();
            black_box(sum)
        })
    });
}

criterion_group!(benches, bench_raw, bench_record, bench_iterate);
criterion_main!(benches);
