use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dlcache::DiskLruCache;
use tempfile::TempDir;

fn put(cache: &DiskLruCache, key: &str, data: &[u8]) {
    if let Some(editor) = cache.edit(key).unwrap() {
        editor.set(0, data).unwrap();
        editor.commit().unwrap();
    }
}

fn bench_snapshot_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 10 * 1024 * 1024).unwrap();
        let data = vec![b'x'; 1024];

        let keys: Vec<String> = (0..100).map(|i| format!("key{}", i)).collect();
        for key in &keys {
            put(&cache, key, &data);
        }

        let mut counter = 0;
        b.iter(|| {
            let mut snapshot = cache.get(&keys[counter % 100]).unwrap().unwrap();
            black_box(snapshot.read_to_end(0).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.sample_size(20);
    group.throughput(Throughput::Elements(1));

    group.bench_function("commit_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 10 * 1024 * 1024).unwrap();
        let data = vec![b'x'; 1024];

        let mut counter = 0u64;
        b.iter(|| {
            put(&cache, &format!("key{}", counter % 1000), &data);
            counter += 1;
        });
    });

    group.finish();
}

fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(20);
    group.throughput(Throughput::Elements(1));

    group.bench_function("commit_over_budget", |b| {
        let dir = TempDir::new().unwrap();
        // Room for 10 values; every further commit evicts one.
        let cache = DiskLruCache::open(dir.path(), 1, 1, 10 * 1024).unwrap();
        let data = vec![b'x'; 1024];

        let mut counter = 0u64;
        b.iter(|| {
            put(&cache, &format!("key{}", counter), &data);
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_snapshot_read,
    bench_commit,
    bench_eviction_churn
);
criterion_main!(benches);
