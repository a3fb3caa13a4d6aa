//! Evidence mining from external relation corpora.
//!
//! Observations `(relation, left, right)` arrive as raw names. Each name is
//! resolved to a set of candidate concepts (never collapsed to one), every
//! left × right candidate pair is classified against the taxonomy once per
//! relation, and the result feeds the [`ReliabilityAggregator`]. Assertion
//! happens only in [`MiningPipeline::sweep`].
//!
//! ## Resolution
//!
//! A name that the [`NameResolver`] cannot map may still be resolved through
//! an `IsA` observation naming it: the hinted types stand in for it.
//! Individuals contribute their direct types; collections contribute
//! themselves plus their direct types. Only tangible candidates deep enough
//! and not typed by an excluded collection survive.

use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, ConceptPair};
use crate::config::{AncestorBucketing, DisjointConfig};
use crate::error::{DisjointResult, MiningError};
use crate::explored::ExploredSet;
use crate::pool::WorkerPool;
use crate::reliability::{Classification, ReliabilityAggregator, RelationSummary, SweepReport};
use crate::similarity::SimilarityEstimator;
use crate::taxonomy::resolve::{NameResolver, normalize_name};
use crate::taxonomy::{Relation, Taxonomy, TaxonomyRoots};
use crate::writer::AssertionWriter;

/// Relation whose observations double as resolution hints.
pub const ISA_RELATION: &str = "IsA";

/// One corpus triple, still in surface names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub relation: String,
    pub left: String,
    pub right: String,
}

impl Observation {
    pub fn new(relation: &str, left: &str, right: &str) -> Self {
        Self {
            relation: relation.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

/// Observations parsed from a TSV source.
#[derive(Debug, Default)]
pub struct ParsedObservations {
    pub observations: Vec<Observation>,
    /// Lines that did not have three non-empty tab-separated fields.
    pub malformed: usize,
}

/// Parse `relation \t left \t right` lines. Blank lines and `#` comments are
/// ignored; malformed lines are logged and counted.
pub fn parse_observations(reader: impl BufRead) -> DisjointResult<ParsedObservations> {
    let mut parsed = ParsedObservations::default();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| MiningError::Io {
            path: "<reader>".into(),
            source,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
        match fields.as_slice() {
            [relation, left, right] if fields.iter().all(|f| !f.is_empty()) => {
                parsed
                    .observations
                    .push(Observation::new(relation, left, right));
            }
            _ => {
                let err = MiningError::Malformed {
                    line_no: i + 1,
                    line: line.clone(),
                };
                tracing::warn!(error = %err, "skipping observation");
                parsed.malformed += 1;
            }
        }
    }
    Ok(parsed)
}

/// Read observations from a TSV file.
pub fn read_observations(path: &Path) -> DisjointResult<ParsedObservations> {
    let file = std::fs::File::open(path).map_err(|source| MiningError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_observations(std::io::BufReader::new(file))
}

/// Name resolution counters, one count per cached resolution of a name.
///
/// A name that first fails and later resolves through a hint counts in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub resolved: usize,
    /// Resolved only through an `IsA` hint.
    pub transitively_resolved: usize,
    pub not_found: usize,
}

/// Totals for one ingestion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub observations: usize,
    /// Observations with a side that had no surviving candidate.
    pub unresolved: usize,
    pub pairs: usize,
    /// Pairs already classified under the same relation.
    pub duplicates: usize,
    pub disjoint: usize,
    pub conjoint: usize,
    pub unknown: usize,
    pub abandoned: usize,
}

impl IngestStats {
    fn absorb(&mut self, other: IngestStats) {
        self.observations += other.observations;
        self.unresolved += other.unresolved;
        self.pairs += other.pairs;
        self.duplicates += other.duplicates;
        self.disjoint += other.disjoint;
        self.conjoint += other.conjoint;
        self.unknown += other.unknown;
        self.abandoned += other.abandoned;
    }
}

/// Summary of a mining run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningReport {
    pub ingest: IngestStats,
    pub resolution: ResolutionStats,
    pub relations: BTreeMap<String, RelationSummary>,
    pub sweep: SweepReport,
    pub malformed_lines: usize,
    pub dropped_writes: usize,
}

/// State shared with workers.
struct MiningState {
    taxonomy: Arc<dyn Taxonomy>,
    resolver: Arc<dyn NameResolver>,
    roots: TaxonomyRoots,
    excluded: Vec<ConceptId>,
    min_depth: Option<u32>,
    bucketing: AncestorBucketing,
    explored: ExploredSet<(String, ConceptPair)>,
    aggregator: ReliabilityAggregator,
    candidates: DashMap<String, Arc<Vec<ConceptId>>>,
    hints: DashMap<String, HashSet<String>>,
    resolved: AtomicUsize,
    transitively_resolved: AtomicUsize,
    not_found: AtomicUsize,
}

impl MiningState {
    fn observe(&self, obs: &Observation) -> IngestStats {
        let mut stats = IngestStats {
            observations: 1,
            ..IngestStats::default()
        };
        let left = self.candidates(&obs.left);
        let right = self.candidates(&obs.right);
        if left.is_empty() || right.is_empty() {
            tracing::trace!(left = %obs.left, right = %obs.right, "observation unresolved");
            stats.unresolved = 1;
            return stats;
        }

        for &l in left.iter() {
            for &r in right.iter() {
                let pair = ConceptPair::new(l, r);
                if pair.is_reflexive() {
                    continue;
                }
                stats.pairs += 1;
                if !self.explored.try_claim((obs.relation.clone(), pair)) {
                    stats.duplicates += 1;
                    continue;
                }
                let classification = self.classify(l, r);
                match classification {
                    Classification::Disjoint => stats.disjoint += 1,
                    Classification::Conjoint => stats.conjoint += 1,
                    Classification::Unknown => stats.unknown += 1,
                }
                let backing = self.backing_ancestors(l, r);
                self.aggregator
                    .observe(&obs.relation, l, r, classification, backing);
            }
        }
        stats
    }

    fn classify(&self, a: ConceptId, b: ConceptId) -> Classification {
        if self.taxonomy.prove(Relation::DisjointWith, a, b) {
            Classification::Disjoint
        } else if self.taxonomy.is_conjoint(a, b) {
            Classification::Conjoint
        } else {
            Classification::Unknown
        }
    }

    /// Tangible common ancestors (each side counting itself), reduced to the
    /// most specific under
    /// [`AncestorBucketing::Minimal`].
    fn backing_ancestors(&self, a: ConceptId, b: ConceptId) -> Vec<ConceptId> {
        let sim = SimilarityEstimator::new(self.taxonomy.as_ref());
        let mut left = sim.ancestors(a);
        left.insert(a);
        let mut right = sim.ancestors(b);
        right.insert(b);
        let common: HashSet<ConceptId> = left
            .intersection(&right)
            .copied()
            .filter(|&c| self.roots.is_tangible(self.taxonomy.as_ref(), c))
            .collect();

        let mut backing: Vec<ConceptId> = match self.bucketing {
            AncestorBucketing::All => common.into_iter().collect(),
            AncestorBucketing::Minimal => common
                .iter()
                .copied()
                .filter(|&c| {
                    !common.iter().any(|&other| {
                        other != c && self.taxonomy.all_generalizations(other).contains(&c)
                    })
                })
                .collect(),
        };
        backing.sort();
        backing
    }

    /// Filtered candidates for a surface name, cached per normalized name.
    ///
    /// Resolution counters move only for the worker whose result is cached.
    fn candidates(&self, name: &str) -> Arc<Vec<ConceptId>> {
        let key = normalize_name(name);
        if let Some(cached) = self.candidates.get(&key) {
            return Arc::clone(cached.value());
        }
        let (computed, counter) = self.compute_candidates(name, &key);
        match self.candidates.entry(key) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                counter.fetch_add(1, Ordering::Relaxed);
                Arc::clone(slot.insert(Arc::new(computed)).value())
            }
        }
    }

    fn compute_candidates(&self, name: &str, key: &str) -> (Vec<ConceptId>, &AtomicUsize) {
        let mut resolved = self.resolver.resolve_name(name);
        let counter = if !resolved.is_empty() {
            &self.resolved
        } else {
            let hinted: Vec<String> = self
                .hints
                .get(key)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default();
            for type_name in hinted {
                resolved.extend(self.resolver.resolve_name(&type_name));
            }
            if resolved.is_empty() {
                tracing::debug!(name, "name not found");
                return (Vec::new(), &self.not_found);
            }
            &self.transitively_resolved
        };

        let mut expanded = HashSet::new();
        for concept in resolved {
            if !self.taxonomy.is_individual(concept) {
                expanded.insert(concept);
            }
            expanded.extend(self.taxonomy.min_types(concept));
        }

        let mut candidates: Vec<ConceptId> = expanded
            .into_iter()
            .filter(|&c| self.admissible(c))
            .collect();
        candidates.sort();
        (candidates, counter)
    }

    fn admissible(&self, concept: ConceptId) -> bool {
        let Some(depth) = self.taxonomy.depth(concept) else {
            return false;
        };
        if self.min_depth.is_some_and(|min| depth < min) {
            return false;
        }
        if !self.excluded.is_empty() {
            let types = self.taxonomy.all_types(concept);
            if self
                .excluded
                .iter()
                .any(|x| *x == concept || types.contains(x))
            {
                return false;
            }
        }
        self.roots.is_tangible(self.taxonomy.as_ref(), concept)
    }
}

/// Evidence mining over one taxonomy.
pub struct MiningPipeline {
    config: DisjointConfig,
    state: Arc<MiningState>,
    writer: Arc<AssertionWriter>,
}

impl MiningPipeline {
    /// Validate `config`, resolve the tangible root and excluded types.
    pub fn new(
        taxonomy: Arc<dyn Taxonomy>,
        resolver: Arc<dyn NameResolver>,
        config: DisjointConfig,
    ) -> DisjointResult<Self> {
        config.validate()?;
        let roots = TaxonomyRoots::resolve(taxonomy.as_ref(), &config.tangible_root)?;
        let excluded = config
            .mining
            .excluded_types
            .iter()
            .filter_map(|name| {
                let found = taxonomy.find_concept(name);
                if found.is_none() {
                    tracing::warn!(name = %name, "excluded type not in taxonomy");
                }
                found
            })
            .collect();
        let writer = Arc::new(AssertionWriter::new(
            taxonomy.clone(),
            config.max_write_attempts,
        ));
        let state = Arc::new(MiningState {
            taxonomy,
            resolver,
            roots,
            excluded,
            min_depth: config.mining.min_candidate_depth,
            bucketing: config.mining.bucketing,
            explored: ExploredSet::new(),
            aggregator: ReliabilityAggregator::new(),
            candidates: DashMap::new(),
            hints: DashMap::new(),
            resolved: AtomicUsize::new(0),
            transitively_resolved: AtomicUsize::new(0),
            not_found: AtomicUsize::new(0),
        });
        Ok(Self {
            config,
            state,
            writer,
        })
    }

    /// Register `IsA` observations as fallbacks for unresolvable names.
    ///
    /// A new hint evicts the cached candidates of its name, so a name that
    /// failed in an earlier batch is resolved again through the hint.
    pub fn register_hints<'a>(&self, observations: impl IntoIterator<Item = &'a Observation>) {
        for obs in observations {
            if !obs.relation.eq_ignore_ascii_case(ISA_RELATION) {
                continue;
            }
            let key = normalize_name(&obs.left);
            let added = self
                .state
                .hints
                .entry(key.clone())
                .or_default()
                .insert(obs.right.clone());
            if added {
                self.state.candidates.remove(&key);
            }
        }
    }

    /// Classify observations on the worker pool, one pool per batch.
    pub fn ingest(&self, observations: Vec<Observation>) -> DisjointResult<IngestStats> {
        self.register_hints(&observations);
        let mut stats = IngestStats::default();
        let mut remaining = observations.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<Observation> = remaining
                .by_ref()
                .take(self.config.mining.batch_size)
                .collect();
            let pool = WorkerPool::new(&self.config.pool)?;
            let state = Arc::clone(&self.state);
            let outcome = pool.run_batch(batch, move |obs| state.observe(&obs));
            stats.abandoned += outcome.abandoned();
            for result in outcome.results {
                stats.absorb(result);
            }
        }
        tracing::info!(
            observations = stats.observations,
            pairs = stats.pairs,
            unresolved = stats.unresolved,
            "observations ingested"
        );
        Ok(stats)
    }

    /// Assert pending pairs of relations that have become reliable.
    pub fn sweep(&self) -> SweepReport {
        let report = self.state.aggregator.sweep(&self.writer, &self.config.mining);
        tracing::info!(
            swept = report.swept_relations.len(),
            asserted = report.asserted.len(),
            vetoed = report.vetoed,
            "reliability sweep finished"
        );
        report
    }

    /// Ingest everything, then sweep once.
    pub fn run(&self, observations: Vec<Observation>) -> DisjointResult<MiningReport> {
        let ingest = self.ingest(observations)?;
        let sweep = self.sweep();
        Ok(MiningReport {
            ingest,
            resolution: self.resolution_stats(),
            relations: self.state.aggregator.summary(&self.config.mining),
            sweep,
            malformed_lines: 0,
            dropped_writes: self.writer.dropped_count(),
        })
    }

    pub fn aggregator(&self) -> &ReliabilityAggregator {
        &self.state.aggregator
    }

    pub fn resolution_stats(&self) -> ResolutionStats {
        ResolutionStats {
            resolved: self.state.resolved.load(Ordering::Relaxed),
            transitively_resolved: self.state.transitively_resolved.load(Ordering::Relaxed),
            not_found: self.state.not_found.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::taxonomy::memory::MemoryTaxonomy;
    use crate::taxonomy::resolve::AliasIndex;

    #[test]
    fn tsv_parsing_skips_malformed_lines() {
        let input = "AtLocation\tspoon\tkitchen\n\
                     # comment\n\
                     \n\
                     UsedFor\tonly-two\n\
                     IsA\tfido\tdog\n\
                     AtLocation\t\tkitchen\n";
        let parsed = parse_observations(input.as_bytes()).unwrap();
        assert_eq!(parsed.observations.len(), 2);
        assert_eq!(parsed.malformed, 2);
        assert_eq!(parsed.observations[1], Observation::new("IsA", "fido", "dog"));
    }

    struct World {
        tax: Arc<MemoryTaxonomy>,
        pipeline: MiningPipeline,
        dog: ConceptId,
        cat: ConceptId,
        spoon: ConceptId,
        animal: ConceptId,
    }

    fn world(config: DisjointConfig) -> World {
        let tax = MemoryTaxonomy::new();
        let thing = tax.add_collection("Thing").unwrap();
        let pt = tax.add_collection("PartiallyTangible").unwrap();
        tax.add_genls(pt, thing).unwrap();
        let animal = tax.add_collection("Animal").unwrap();
        tax.add_genls(animal, pt).unwrap();
        let dog = tax.add_collection("Dog").unwrap();
        let cat = tax.add_collection("Cat").unwrap();
        tax.add_genls(dog, animal).unwrap();
        tax.add_genls(cat, animal).unwrap();
        let spoon = tax.add_collection("Spoon").unwrap();
        tax.add_genls(spoon, pt).unwrap();
        let rex = tax.add_individual("Rex").unwrap();
        tax.add_isa(rex, dog).unwrap();
        let idea = tax.add_collection("Idea").unwrap();
        tax.add_genls(idea, thing).unwrap();
        tax.add_disjoint(dog, spoon).unwrap();

        let tax = Arc::new(tax);
        let index = AliasIndex::from_labels(tax.as_ref(), [dog, cat, spoon, rex, idea, animal]);
        let pipeline = MiningPipeline::new(tax.clone(), Arc::new(index), config).unwrap();
        World {
            tax,
            pipeline,
            dog,
            cat,
            spoon,
            animal,
        }
    }

    fn small_pool() -> DisjointConfig {
        DisjointConfig {
            pool: PoolConfig {
                workers: 2,
                per_item_timeout_ms: 5_000,
            },
            ..DisjointConfig::default()
        }
    }

    #[test]
    fn individuals_resolve_to_their_types() {
        let w = world(small_pool());
        assert_eq!(*w.pipeline.state.candidates("rex"), vec![w.dog]);
        assert_eq!(*w.pipeline.state.candidates("Dog"), vec![w.dog]);
        // Non-tangible and unknown names yield nothing.
        assert!(w.pipeline.state.candidates("idea").is_empty());
        assert!(w.pipeline.state.candidates("unicorn").is_empty());
        let stats = w.pipeline.resolution_stats();
        assert_eq!(stats.resolved, 3);
        assert_eq!(stats.not_found, 1);
    }

    #[test]
    fn isa_hints_resolve_unknown_names() {
        let w = world(small_pool());
        let observations = vec![
            Observation::new("IsA", "Fido_(pet)", "dog"),
            Observation::new("AtLocation", "fido", "spoon"),
        ];
        let stats = w.pipeline.ingest(observations).unwrap();
        assert_eq!(stats.disjoint, 1);
        assert_eq!(w.pipeline.resolution_stats().transitively_resolved, 1);
    }

    #[test]
    fn late_isa_hint_resolves_name_that_failed_earlier() {
        let w = world(small_pool());
        let first = w
            .pipeline
            .ingest(vec![Observation::new("AtLocation", "fido", "spoon")])
            .unwrap();
        assert_eq!(first.unresolved, 1);

        let second = w
            .pipeline
            .ingest(vec![
                Observation::new("IsA", "fido", "dog"),
                Observation::new("AtLocation", "fido", "spoon"),
            ])
            .unwrap();
        assert_eq!(second.unresolved, 0);
        assert_eq!(second.disjoint, 1);
        let stats = w.pipeline.resolution_stats();
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.transitively_resolved, 1);
    }

    #[test]
    fn pairs_are_classified_once_per_relation() {
        let w = world(small_pool());
        let observations = vec![
            Observation::new("AtLocation", "dog", "spoon"),
            Observation::new("AtLocation", "spoon", "dog"),
            Observation::new("AtLocation", "dog", "animal"),
            Observation::new("AtLocation", "cat", "spoon"),
            Observation::new("UsedFor", "dog", "spoon"),
            Observation::new("UsedFor", "dog", "unicorn"),
        ];
        let stats = w.pipeline.ingest(observations).unwrap();
        assert_eq!(stats.observations, 6);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!((stats.disjoint, stats.conjoint, stats.unknown), (2, 1, 1));

        let at = w.pipeline.aggregator().relation_counts("AtLocation");
        assert_eq!((at.disjoint, at.conjoint, at.unknown), (1, 1, 1));
        assert_eq!(w.pipeline.aggregator().pending_count("AtLocation"), 1);
        // Dog and Animal meet at Animal itself.
        assert_eq!(
            w.pipeline.aggregator().bucket_counts("AtLocation", w.animal).conjoint,
            1
        );
        assert!(!w.tax.prove(Relation::DisjointWith, w.cat, w.spoon));
    }

    #[test]
    fn minimal_bucketing_keeps_most_specific_ancestor() {
        let mut config = small_pool();
        config.mining.bucketing = AncestorBucketing::Minimal;
        let w = world(config);
        let puppy = w.tax.add_collection("Puppy").unwrap();
        w.tax.add_genls(puppy, w.dog).unwrap();
        assert_eq!(w.pipeline.state.backing_ancestors(puppy, w.cat), vec![w.animal]);
        assert_eq!(w.pipeline.state.backing_ancestors(puppy, w.dog), vec![w.dog]);

        let all = world(small_pool());
        let puppy = all.tax.add_collection("Puppy").unwrap();
        all.tax.add_genls(puppy, all.dog).unwrap();
        assert_eq!(
            all.pipeline.state.backing_ancestors(puppy, all.dog),
            vec![all.animal, all.dog]
        );
    }

    #[test]
    fn excluded_and_shallow_candidates_are_dropped() {
        let mut config = small_pool();
        config.mining.min_candidate_depth = Some(3);
        let w = world(config);
        assert_eq!(*w.pipeline.state.candidates("dog"), vec![w.dog]);
        assert!(w.pipeline.state.candidates("spoon").is_empty());

        let mut config = small_pool();
        config.mining.excluded_types = vec!["Animal".into()];
        let w = world(config);
        assert!(w.pipeline.state.candidates("animal").is_empty());
        assert_eq!(*w.pipeline.state.candidates("spoon"), vec![w.spoon]);
    }
}
