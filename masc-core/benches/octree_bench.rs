use criterion::{black_box, criterion_group, criterion_main, Criterion};
use masc_core::index::Octree;
use masc_core::nalgebra::Vector3;
use rand::{thread_rng, Rng};

fn gen_random_positions(count: usize) -> Vec<Vector3<f64>> {
    let mut rng = thread_rng();
    (0..count)
        .map(|_| Vector3::new(rng.gen(), rng.gen(), rng.gen()))
        .collect()
}

fn knn_all(octree: &Octree, queries: &[Vector3<f64>], level: u8) {
    let mut neighbors = Vec::new();
    for query in queries {
        black_box(octree.knn_into(query, 16, level, f64::INFINITY, &mut neighbors));
    }
}

fn bench(c: &mut Criterion) {
    let positions = gen_random_positions(65536);
    let queries = gen_random_positions(1024);

    c.bench_function("octree_build", |b| {
        b.iter(|| black_box(Octree::build(&positions)));
    });

    let octree = Octree::build(&positions);
    let matched_level = octree.level_for_population(16.0);
    c.bench_function("octree_knn_matched_level", |b| {
        b.iter(|| knn_all(&octree, &queries, matched_level));
    });
    c.bench_function("octree_knn_coarse_level", |b| {
        b.iter(|| knn_all(&octree, &queries, matched_level.saturating_sub(2)));
    });
    c.bench_function("octree_radius_search", |b| {
        let level = octree.level_for_radius(0.05);
        b.iter(|| {
            for query in &queries {
                black_box(octree.radius_search(query, 0.05, level));
            }
        });
    });
}

criterion_group! {
    name = octree;
    config = Criterion::default().sample_size(20);
    targets = bench
}
criterion_main!(octree);
