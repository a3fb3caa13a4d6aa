//! Abstractness filter: is a collection too heterogeneous to generalize from?
//!
//! The score of a concept is the mean of the lowest tail (default 20%) of
//! pairwise taxonomic similarities among a sample of its children. Averaging
//! the tail rather than the whole list catches collections whose members are
//! mostly unrelated even when a few of them cluster tightly.
//!
//! Scores are memoized per concept for the lifetime of the filter; the first
//! computed value wins if two workers race on the same concept.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use rand::seq::{IteratorRandom, SliceRandom};

use crate::concept::ConceptId;
use crate::config::{AbstractnessConfig, SamplingConfig};
use crate::similarity::SimilarityEstimator;
use crate::taxonomy::Taxonomy;

/// Memoizing abstractness judge shared across workers.
pub struct AbstractnessFilter {
    taxonomy: Arc<dyn Taxonomy>,
    config: AbstractnessConfig,
    max_exploration: usize,
    cache: DashMap<ConceptId, f32>,
}

impl AbstractnessFilter {
    pub fn new(
        taxonomy: Arc<dyn Taxonomy>,
        config: AbstractnessConfig,
        sampling: &SamplingConfig,
    ) -> Self {
        Self {
            taxonomy,
            config,
            max_exploration: sampling.max_exploration,
            cache: DashMap::new(),
        }
    }

    /// Whether the concept's children are too dissimilar to trust statistics from.
    pub fn is_too_abstract(&self, concept: ConceptId) -> bool {
        self.score(concept) < self.config.threshold
    }

    /// Lower-tail mean similarity of the concept's children (memoized).
    pub fn score(&self, concept: ConceptId) -> f32 {
        if let Some(cached) = self.cache.get(&concept) {
            return *cached.value();
        }
        let computed = self.compute(concept);
        let stored = *self.cache.entry(concept).or_insert(computed).value();
        tracing::debug!(
            concept = %self.taxonomy.label(concept),
            abstractness = stored,
            "abstractness computed"
        );
        stored
    }

    /// Cached score, if already computed.
    pub fn cached(&self, concept: ConceptId) -> Option<f32> {
        self.cache.get(&concept).map(|r| *r.value())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn compute(&self, concept: ConceptId) -> f32 {
        let children: Vec<ConceptId> = self
            .taxonomy
            .max_specializations(concept)
            .into_iter()
            .collect();
        if children.len() <= self.config.min_children {
            return self.config.neutral_score;
        }

        let mut rng = rand::thread_rng();
        let sample: Vec<ConceptId> = if children.len() > self.max_exploration {
            (0..self.max_exploration)
                .filter_map(|_| children.choose(&mut rng).copied())
                .collect()
        } else {
            children
        };

        let mut scores = self.pairwise_scores(&sample, &mut rng);
        lower_tail_mean(&mut scores, self.config.tail_fraction).unwrap_or(self.config.neutral_score)
    }

    fn pairwise_scores(&self, sample: &[ConceptId], rng: &mut impl Rng) -> Vec<f32> {
        let sim = SimilarityEstimator::new(self.taxonomy.as_ref());
        let pairs = (0..sample.len())
            .flat_map(|i| ((i + 1)..sample.len()).map(move |j| (i, j)))
            .filter(|&(i, j)| sample[i] != sample[j]);

        let total = sample.len() * sample.len().saturating_sub(1) / 2;
        let chosen: Vec<(usize, usize)> = if total > self.config.max_pairs {
            pairs.choose_multiple(rng, self.config.max_pairs)
        } else {
            pairs.collect()
        };

        chosen
            .into_iter()
            .filter_map(|(i, j)| sim.taxonomic(sample[i], sample[j]).score())
            .collect()
    }
}

/// Mean of the lowest `fraction` of `scores` (at least one entry).
///
/// Returns `None` for an empty list.
pub fn lower_tail_mean(scores: &mut [f32], fraction: f32) -> Option<f32> {
    if scores.is_empty() {
        return None;
    }
    scores.sort_by(|a, b| a.total_cmp(b));
    let take = ((scores.len() as f32 * fraction) as usize).clamp(1, scores.len());
    Some(scores[..take].iter().sum::<f32>() / take as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::memory::MemoryTaxonomy;

    fn filter_for(tax: MemoryTaxonomy) -> (Arc<MemoryTaxonomy>, AbstractnessFilter) {
        let tax = Arc::new(tax);
        let filter = AbstractnessFilter::new(
            tax.clone(),
            AbstractnessConfig::default(),
            &SamplingConfig::default(),
        );
        (tax, filter)
    }

    #[test]
    fn tail_mean_uses_lowest_fifth() {
        let mut scores = vec![0.9, 0.1, 0.8, 0.2, 0.7, 0.9, 0.9, 0.9, 0.9, 0.9];
        let mean = lower_tail_mean(&mut scores, 0.2).unwrap();
        assert!((mean - 0.15).abs() < 1e-6);
    }

    #[test]
    fn tail_mean_takes_at_least_one() {
        let mut scores = vec![0.6, 0.4];
        assert_eq!(lower_tail_mean(&mut scores, 0.2), Some(0.4));
        assert_eq!(lower_tail_mean(&mut [], 0.2), None);
    }

    #[test]
    fn small_collections_are_never_too_abstract() {
        let tax = MemoryTaxonomy::new();
        let root = tax.add_collection("Root").unwrap();
        for i in 0..5 {
            let c = tax.add_collection(&format!("C{i}")).unwrap();
            tax.add_genls(c, root).unwrap();
        }
        let (_tax, filter) = filter_for(tax);
        assert!(!filter.is_too_abstract(root));
        assert_eq!(filter.cached(root), Some(AbstractnessConfig::default().neutral_score));
    }

    #[test]
    fn homogeneous_children_pass() {
        // Deep siblings meet at their parent: similarity 1.
        let tax = MemoryTaxonomy::new();
        let thing = tax.add_collection("Thing").unwrap();
        let mid = tax.add_collection("Mid").unwrap();
        let animal = tax.add_collection("Animal").unwrap();
        tax.add_genls(mid, thing).unwrap();
        tax.add_genls(animal, mid).unwrap();
        for i in 0..8 {
            let c = tax.add_collection(&format!("Species{i}")).unwrap();
            tax.add_genls(c, animal).unwrap();
        }
        let (_tax, filter) = filter_for(tax);
        assert_eq!(filter.score(animal), 1.0);
        assert!(!filter.is_too_abstract(animal));
    }

    #[test]
    fn heterogeneous_children_are_too_abstract_and_memoized() {
        // Children of a shallow root each descend from their own deep lineage.
        let tax = MemoryTaxonomy::new();
        let thing = tax.add_collection("Thing").unwrap();
        let stuff = tax.add_collection("Stuff").unwrap();
        tax.add_genls(stuff, thing).unwrap();
        for i in 0..8 {
            let mut prev = thing;
            for level in 0..5 {
                let link = tax.add_collection(&format!("Line{i}-{level}")).unwrap();
                tax.add_genls(link, prev).unwrap();
                prev = link;
            }
            let child = tax.add_collection(&format!("Odd{i}")).unwrap();
            tax.add_genls(child, stuff).unwrap();
            tax.add_genls(child, prev).unwrap();
        }
        let (_tax, filter) = filter_for(tax);
        // Stuff at depth 1, children at depth 6: 1 / (12 - 2) = 0.1.
        let score = filter.score(stuff);
        assert!((score - 0.1).abs() < 1e-6);
        assert!(filter.is_too_abstract(stuff));
        assert_eq!(filter.cache_len(), 1);
        assert_eq!(filter.score(stuff), score);
    }
}
