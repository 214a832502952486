use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kornia_association as ka;
use rand::{rngs::StdRng, Rng, SeedableRng};

type AssociationDataset = (Vec<ka::Point2D>, Vec<ka::Point2D>);

fn generate_dataset_with_seed(num_map: usize, num_obs: usize, seed: u64) -> AssociationDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let map = (0..num_map)
        .map(|_| ka::Point2D::new(rng.random_range(0.0..50.0), rng.random_range(0.0..25.0)))
        .collect::<Vec<_>>();

    // observe the first landmarks from a fixed pose with mild noise
    let gt = ka::Pose2D::new(20.0, 10.0, 0.4);
    let obs = map[..num_obs]
        .iter()
        .map(|p| {
            let o = gt.inverse_transform_point(p);
            ka::Point2D::new(
                o.x + rng.random_range(-0.1..0.1),
                o.y + rng.random_range(-0.1..0.1),
            )
        })
        .collect();

    (map, obs)
}

fn config(min_inliers: usize, max_inliers: usize) -> ka::RansacConfig {
    ka::RansacConfig {
        noise_std: 0.15,
        min_inliers,
        max_inliers,
        mahalanobis_threshold: 5.0,
        probability: 0.999,
        min_iterations: 1000,
        strategy: ka::SamplingStrategy::Landmarks,
        fusion: ka::FusionParams {
            position_tolerance: 0.01,
            angle_tolerance: 0.1_f64.to_radians(),
            fuse_by_correspondences: true,
        },
    }
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_rigid_transform");
    for &n in &[2usize, 10, 100, 1000] {
        let (map, _) = generate_dataset_with_seed(n, 0, 42);
        let gt = ka::Pose2D::new(1.0, 2.0, 0.3);
        let corrs = map
            .iter()
            .enumerate()
            .map(|(i, p)| ka::Correspondence {
                map_index: i,
                obs_index: i,
                map_point: *p,
                obs_point: gt.inverse_transform_point(p),
            })
            .collect::<Vec<_>>();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = ka::fit_rigid_transform(&corrs, 0.1).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac_landmarks");
    group.sample_size(10);
    for &(num_map, num_obs) in &[(30usize, 6usize), (100, 10)] {
        let (map, obs) = generate_dataset_with_seed(num_map, num_obs, 7);
        let pool = ka::build_correspondences(&map, &obs).unwrap();
        let engine = ka::RansacEngine::new(config(num_obs - 1, pool.len())).unwrap();
        group.throughput(Throughput::Elements(pool.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("serial", format!("{num_map}x{num_obs}")),
            &pool,
            |b, pool| {
                b.iter(|| {
                    let mut rng = StdRng::seed_from_u64(0);
                    let res = engine.run(pool, &mut rng).unwrap();
                    std::hint::black_box(res);
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("parallel", format!("{num_map}x{num_obs}")),
            &pool,
            |b, pool| {
                b.iter(|| {
                    let res = engine
                        .run_parallel(pool, 0, 4, &ka::StopSignal::never())
                        .unwrap();
                    std::hint::black_box(res);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_fit, bench_ransac);
criterion_main!(benches);
