use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use Dirkv::core::backend::Backend;
use Dirkv::core::config::{Config, IndexSpec};
use Dirkv::core::types::Attributes;
use Dirkv::kv::memory::MemoryStore;
use Dirkv::protocol::request::{AddRequest, RequestMeta, Scope, SearchRequest};
use Dirkv::protocol::response::ChannelSink;
use Dirkv::query::parser::parse_filter;
use Dirkv::storage::sequence::CounterSequence;
use std::sync::Arc;
use rand::Rng;
use tokio::runtime::Runtime;

const CITIES: [&str; 6] = ["Paris", "Lima", "Oslo", "Kyiv", "Quito", "Hanoi"];

fn bench_config() -> Config {
    Config {
        suffix: "o=bench".to_string(),
        bucket: "bench".to_string(),
        indexes: vec![IndexSpec::unique("uid"), IndexSpec::non_unique("cn"), IndexSpec::non_unique("l")],
        ..Config::default()
    }
}

fn new_backend() -> Backend {
    Backend::with_store(bench_config(), Arc::new(MemoryStore::new()))
        .unwrap()
        .with_sequence(Arc::new(CounterSequence::default()))
}

/// Helper to create test people
fn person(id: u64) -> Attributes {
    let mut rng = rand::thread_rng();
    let city = CITIES[rng.gen_range(0..CITIES.len())];
    let cn = format!("user{}", id);
    let uid = format!("u{}", id);
    Attributes::new()
        .with("objectclass", &["person"])
        .with("cn", &[cn.as_str()])
        .with("uid", &[uid.as_str()])
        .with("l", &[city])
}

async fn add(backend: &Backend, dn: &str, attributes: Attributes) {
    let (sink, _rx) = ChannelSink::new();
    let request = AddRequest { meta: RequestMeta::new("bench"), dn: dn.to_string(), attributes };
    backend.add(request, Arc::new(sink)).await;
}

fn populated(rt: &Runtime, size: u64) -> Backend {
    let backend = new_backend();
    rt.block_on(async {
        let root = Attributes::new().with("objectclass", &["organization"]).with("o", &["bench"]);
        add(&backend, "o=bench", root).await;
        for id in 0..size {
            add(&backend, &format!("cn=user{}, o=bench", id), person(id)).await;
        }
    });
    backend
}

/// Benchmark filter parsing and evaluation
fn bench_filters(c: &mut Criterion) {
    let text = "(&(objectclass=person)(|(l=Paris)(l=Oslo))(cn=user1*)(!(uid=u10)))";
    let filter = parse_filter(text).unwrap();
    let entry = person(1).with("l", &["Paris"]);

    c.bench_function("filter_parse", |b| b.iter(|| parse_filter(black_box(text)).unwrap()));
    c.bench_function("filter_match", |b| b.iter(|| black_box(&filter).matches(black_box(&entry))));
}

/// Benchmark the add pipeline end to end over the in-memory store
fn bench_add(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let backend = populated(&rt, 1);
    let mut id = 1_000_000u64;

    c.bench_function("add_entry", |b| {
        b.iter(|| {
            id += 1;
            rt.block_on(add(&backend, &format!("cn=user{}, o=bench", id), person(id)));
        });
    });
}

/// Benchmark subtree search, index-narrowed vs full scan
fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("subtree_search");

    for size in [100u64, 1000].iter() {
        let backend = populated(&rt, *size);
        for (label, filter) in [("indexed", "(l=Paris)"), ("scan", "(objectclass=person)")] {
            group.bench_with_input(BenchmarkId::new(label, size), size, |b, _| {
                b.iter(|| {
                    let (sink, _rx) = ChannelSink::new();
                    let request = SearchRequest::new(
                        RequestMeta::new("bench"),
                        "o=bench",
                        Scope::Sub,
                        parse_filter(filter).unwrap(),
                    );
                    rt.block_on(backend.search(request, Arc::new(sink)))
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_filters, bench_add, bench_search);
criterion_main!(benches);
