use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use labelgraph::{
    BatchLoader, EdgeBatch, EdgeLabel, EdgeRecord, LoaderConfig, MigrationOptions, PropertyDefinition, PropertyType,
    SchemaDefinition, SchemaVersion, SqliteExecutor, VertexBatch, VertexLabel, VertexRecord, VertexRef,
    install_schema, plan_migration,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const EDGE_SEED: u64 = 0xA17C;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn bench_scales() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[1_000, 5_000]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[10_000, 50_000, 100_000]
    }
}

fn social() -> SchemaDefinition {
    SchemaDefinition::new(SchemaVersion::new(1, 0, 0))
        .with_vertex(
            "Person",
            VertexLabel::new()
                .property("name", PropertyDefinition::new(PropertyType::String).required())
                .property("age", PropertyDefinition::new(PropertyType::Integer))
                .index("name"),
        )
        .with_edge(
            "KNOWS",
            EdgeLabel::new("Person", "Person").property("weight", PropertyDefinition::new(PropertyType::Number)),
        )
}

fn random_edges(nodes: usize, seed: u64) -> Vec<EdgeRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..nodes.saturating_mul(3))
        .map(|_| {
            EdgeRecord::new(
                VertexRef::staged("Person", rng.gen_range(0..nodes)),
                VertexRef::staged("Person", rng.gen_range(0..nodes)),
            )
            .with("weight", rng.gen_range(0.0..1.0))
        })
        .collect()
}

fn bench_load_vertices(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_vertices");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    let schema = social();
    for &nodes in bench_scales() {
        for batch_size in [100, 1_000] {
            let id = format!("{nodes}_batch{batch_size}");
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                b.iter(|| {
                    let mut executor = SqliteExecutor::open_in_memory().expect("executor");
                    install_schema(&mut executor, &schema, &MigrationOptions::apply()).expect("schema");
                    let people = VertexBatch::streaming("Person", || {
                        (0..nodes).map(|n| VertexRecord::new().with("name", format!("p{n}")).with("age", n % 90))
                    });
                    let config = LoaderConfig {
                        batch_size,
                        ..LoaderConfig::default()
                    };
                    BatchLoader::new(&mut executor, config)
                        .load(&schema, &[people], &[])
                        .expect("load");
                });
            });
        }
    }
    group.finish();
}

fn bench_load_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_graph");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    let schema = social();
    for &nodes in bench_scales() {
        let edges = random_edges(nodes, EDGE_SEED + nodes as u64);
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| {
                let mut executor = SqliteExecutor::open_in_memory().expect("executor");
                install_schema(&mut executor, &schema, &MigrationOptions::apply()).expect("schema");
                let people = VertexBatch::streaming("Person", || {
                    (0..nodes).map(|n| VertexRecord::new().with("name", format!("p{n}")))
                });
                let knows = EdgeBatch::streaming("KNOWS", || edges.iter().cloned());
                BatchLoader::new(&mut executor, LoaderConfig::default())
                    .load(&schema, &[people], &[knows])
                    .expect("load");
            });
        });
    }
    group.finish();
}

fn bench_plan_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_migration");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for labels in [10, 100] {
        let mut old = SchemaDefinition::new(SchemaVersion::new(1, 0, 0));
        let mut new = SchemaDefinition::new(SchemaVersion::new(2, 0, 0));
        for n in 0..labels {
            let base = VertexLabel::new().property("name", PropertyDefinition::new(PropertyType::String));
            old = old.with_vertex(format!("L{n}"), base.clone());
            new = new.with_vertex(
                format!("L{n}"),
                base.property("score", PropertyDefinition::new(PropertyType::Number)).index("name"),
            );
        }
        group.bench_function(BenchmarkId::from_parameter(labels), |b| {
            b.iter(|| plan_migration(&old, &new).expect("plan"));
        });
    }
    group.finish();
}

criterion_group!(
    name = load_benches;
    config = Criterion::default();
    targets = bench_load_vertices, bench_load_graph, bench_plan_migration
);
criterion_main!(load_benches);
