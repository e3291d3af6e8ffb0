use criterion::{criterion_group, criterion_main, Criterion};
use hoard::{ClipPayload, HistoryConfig, HistoryQuery, HistoryStore, ListOrder};
use tempfile::TempDir;

const SNIPPETS: &[&str] = &[
    "cargo build --release",
    "SELECT id, preview FROM clip_items WHERE pinned = 1",
    "https://example.com/docs/getting-started",
    "Meeting moved to Thursday at 3pm",
    "fn main() { println!(\"hello world\"); }",
    "Riverside Drive 221B",
];

fn setup_store(count: usize) -> (HistoryStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = HistoryConfig {
        max_unpinned_items: count + 1,
        ..Default::default()
    };
    let store = HistoryStore::open_at(temp_dir.path().join("bench.sqlite"), &config).unwrap();
    for i in 0..count {
        let snippet = SNIPPETS[i % SNIPPETS.len()];
        store
            .capture(ClipPayload::Text(format!("{} #{}", snippet, i)))
            .unwrap();
    }
    (store, temp_dir)
}

fn bench_queries(c: &mut Criterion) {
    let (store, _temp) = setup_store(5_000);
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("query");
    group.sample_size(20);

    group.bench_function("list_pinned_first", |b| {
        b.iter(|| store.list(ListOrder::PinnedFirst).unwrap())
    });
    group.bench_function("list_first_page", |b| {
        b.iter(|| store.query(&HistoryQuery::new().page(50, 0)).unwrap())
    });

    let keywords = vec![("short", "hi"), ("word", "riverside"), ("miss", "zzzzzz")];
    for (name, keyword) in keywords {
        group.bench_function(format!("search_{}", name), |b| {
            b.iter(|| store.search(keyword).unwrap())
        });
    }

    group.bench_function("search_async", |b| {
        b.iter(|| {
            rt.block_on(async { store.query_async(HistoryQuery::new().keyword("hello")).await.unwrap() })
        })
    });
    group.finish();
}

fn bench_capture(c: &mut Criterion) {
    let (store, _temp) = setup_store(1_000);
    let mut counter = 0u64;

    c.bench_function("capture_new", |b| {
        b.iter(|| {
            counter += 1;
            store
                .capture(ClipPayload::Text(format!("bench capture {}", counter)))
                .unwrap()
        })
    });
    c.bench_function("capture_repeat", |b| {
        b.iter(|| store.capture(ClipPayload::Text("bench repeat".into())).unwrap())
    });
}

criterion_group!(benches, bench_queries, bench_capture);
criterion_main!(benches);
