//! Benchmarks for similarity, abstractness and sampling hot paths.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use akh_disjoint::abstractness::AbstractnessFilter;
use akh_disjoint::concept::ConceptId;
use akh_disjoint::config::{AbstractnessConfig, SamplingConfig};
use akh_disjoint::sampler::EvidenceSampler;
use akh_disjoint::similarity::SimilarityEstimator;
use akh_disjoint::taxonomy::memory::MemoryTaxonomy;

/// A random layered taxonomy: `layers` levels of `width` collections, each
/// specializing one or two collections of the level above.
fn layered(layers: usize, width: usize) -> (Arc<MemoryTaxonomy>, Vec<Vec<ConceptId>>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let tax = MemoryTaxonomy::new();
    let root = tax.add_collection("Thing").unwrap();
    let mut levels = vec![vec![root]];
    for layer in 1..=layers {
        let mut current = Vec::with_capacity(width);
        for i in 0..width {
            let c = tax.add_collection(&format!("L{layer}n{i}")).unwrap();
            let above = &levels[layer - 1];
            let parents = if rng.gen_bool(0.3) { 2 } else { 1 };
            for parent in above.choose_multiple(&mut rng, parents) {
                tax.add_genls(c, *parent).unwrap();
            }
            current.push(c);
        }
        levels.push(current);
    }
    (Arc::new(tax), levels)
}

fn bench_taxonomic_similarity(c: &mut Criterion) {
    let (tax, levels) = layered(6, 60);
    let leaves = &levels[6];
    let sim = SimilarityEstimator::new(tax.as_ref());

    c.bench_function("taxonomic_similarity_depth6", |bench| {
        bench.iter(|| black_box(sim.taxonomic(leaves[0], leaves[59])))
    });
    c.bench_function("jaccard_similarity_depth6", |bench| {
        bench.iter(|| black_box(sim.jaccard(leaves[0], leaves[59])))
    });
}

fn bench_abstractness(c: &mut Criterion) {
    let (tax, levels) = layered(4, 80);
    let parent = levels[3][0];
    for child in &levels[4] {
        tax.add_genls(*child, parent).unwrap();
    }

    c.bench_function("abstractness_80_children", |bench| {
        bench.iter(|| {
            // Fresh filter each time so the memo does not hide the work.
            let filter = AbstractnessFilter::new(
                tax.clone(),
                AbstractnessConfig::default(),
                &SamplingConfig::default(),
            );
            black_box(filter.score(parent))
        })
    });
}

fn bench_sampling(c: &mut Criterion) {
    let (tax, levels) = layered(3, 200);
    let parent = levels[2][0];
    let target = tax.add_collection("Target").unwrap();
    for child in &levels[3] {
        tax.add_genls(*child, parent).unwrap();
        tax.add_disjoint(*child, target).unwrap();
    }
    let sampler = EvidenceSampler::new(tax.clone(), SamplingConfig::default());

    c.bench_function("sample_200_children", |bench| {
        bench.iter(|| black_box(sampler.sample(parent, target)))
    });
}

criterion_group!(benches, bench_taxonomic_similarity, bench_abstractness, bench_sampling);
criterion_main!(benches);
