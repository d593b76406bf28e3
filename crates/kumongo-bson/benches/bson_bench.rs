use criterion::{criterion_group, criterion_main, Criterion};
use kumongo_bson::{decode, encode_to_vec, Document};

fn bench_document_creation(c: &mut Criterion) {
    c.bench_function("document_create", |b| {
        b.iter(|| {
            let mut doc = Document::new();
            doc.insert("name", "kumongo");
            doc.insert("iter", 16i64);
            doc.insert("label", "bench");
            doc
        })
    });
}

fn bench_document_encode(c: &mut Criterion) {
    let mut doc = Document::new();
    doc.insert("name", "kumongo");
    doc.insert("iter", 16i64);
    doc.insert("active", true);
    doc.insert("score", 99.5f64);

    c.bench_function("document_encode", |b| b.iter(|| encode_to_vec(&doc)));
}

fn bench_document_decode(c: &mut Criterion) {
    let mut doc = Document::new();
    doc.insert("name", "kumongo");
    doc.insert("iter", 16i64);
    doc.insert("active", true);
    doc.insert("score", 99.5f64);

    let encoded = encode_to_vec(&doc).unwrap();

    c.bench_function("document_decode", |b| b.iter(|| decode(&encoded)));
}

criterion_group!(
    benches,
    bench_document_creation,
    bench_document_encode,
    bench_document_decode
);
criterion_main!(benches);
