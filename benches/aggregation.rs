//! Performance benchmarks for the hot aggregation paths.
//!
//! Run with: `cargo bench --bench aggregation`
//!
//! The Bernoulli fold runs once per (realization, site, cell) contribution
//! and dominates large reductions; rupture sampling dominates the setup
//! phase of big source models.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hazard_kernel::{
    number_sources, sample_source, EngineParams, GroupId, Hypocenter, ImtLevels, MagnitudeRate,
    ProbabilityMap, SeismicSource, SiteId,
};

fn make_params() -> EngineParams {
    let imtls = ImtLevels::new(vec![("PGA".to_string(), vec![0.1, 0.2, 0.4, 0.8])]).unwrap();
    let mut params = EngineParams::new(imtls);
    params.ses_per_logic_tree_path = 10;
    params.investigation_time = 50.0;
    params
}

fn make_sources(n: usize) -> Vec<SeismicSource> {
    (0..n)
        .map(|i| SeismicSource {
            id: format!("src-{i}"),
            group_id: GroupId(0),
            hypocenter: Hypocenter {
                lon: 10.0 + i as f64 * 0.01,
                lat: 45.0,
                depth_km: 8.0,
            },
            rates: vec![
                MagnitudeRate {
                    magnitude: 5.5,
                    annual_rate: 0.1,
                },
                MagnitudeRate {
                    magnitude: 6.5,
                    annual_rate: 0.01,
                },
            ],
        })
        .collect()
}

fn bench_bernoulli_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("bernoulli_fold");
    for num_sites in [16usize, 256] {
        let contributions: Vec<(SiteId, Vec<f64>)> = (0..num_sites as u32)
            .map(|sid| (SiteId(sid), vec![0.01; 4]))
            .collect();
        group.throughput(Throughput::Elements(num_sites as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_sites),
            &contributions,
            |b, contributions| {
                b.iter(|| {
                    let mut pmap = ProbabilityMap::new(4);
                    for _ in 0..100 {
                        for (sid, poes) in contributions {
                            pmap.update(*sid, poes).unwrap();
                        }
                    }
                    black_box(pmap)
                });
            },
        );
    }
    group.finish();
}

fn bench_sampling(c: &mut Criterion) {
    let params = make_params();
    let mut group = c.benchmark_group("rupture_sampling");
    for n in [10usize, 100] {
        let sources = make_sources(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &sources, |b, sources| {
            b.iter(|| {
                let numbered = number_sources(sources).unwrap();
                let total: usize = numbered
                    .iter()
                    .map(|n| sample_source(n, &params).unwrap().len())
                    .sum();
                black_box(total)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bernoulli_fold, bench_sampling);
criterion_main!(benches);
