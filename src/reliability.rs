//! Reliability aggregation for mined relations.
//!
//! Every classified observation increments the global counters of its
//! relation and the counters of each backing ancestor bucket
//! `(relation, ancestor)`. Counters are atomics inside lazily created
//! [`DashMap`] entries and never decrease within a run.
//!
//! Unknown pairs are parked as [`PendingUnknown`]s. A caller-triggered
//! [`ReliabilityAggregator::sweep`] asserts them for relations whose global
//! score clears the relation threshold, unless any backing bucket with
//! enough samples falls below the bucket threshold.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::concept::ConceptId;
use crate::config::MiningConfig;
use crate::taxonomy::Provenance;
use crate::writer::AssertionWriter;

/// How an observed pair relates in the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Disjoint,
    Conjoint,
    Unknown,
}

/// Reliability of a counter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Fewer decided samples than required; never compared to a threshold.
    Insufficient,
    Score(f64),
}

impl Reliability {
    pub fn score(self) -> Option<f64> {
        match self {
            Reliability::Score(s) => Some(s),
            Reliability::Insufficient => None,
        }
    }

    /// `None` when there is not enough data to judge.
    pub fn meets(self, threshold: f64) -> Option<bool> {
        self.score().map(|s| s >= threshold)
    }
}

/// Point-in-time copy of a counter triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub disjoint: u64,
    pub conjoint: u64,
    pub unknown: u64,
}

impl CountSnapshot {
    /// `disjoint / (disjoint + conjoint)` once that sum reaches `min_samples`.
    pub fn reliability(&self, min_samples: u64) -> Reliability {
        let decided = self.disjoint + self.conjoint;
        if decided == 0 || decided < min_samples {
            return Reliability::Insufficient;
        }
        Reliability::Score(self.disjoint as f64 / decided as f64)
    }
}

#[derive(Debug, Default)]
struct Counts {
    disjoint: AtomicU64,
    conjoint: AtomicU64,
    unknown: AtomicU64,
}

impl Counts {
    fn record(&self, classification: Classification) {
        let counter = match classification {
            Classification::Disjoint => &self.disjoint,
            Classification::Conjoint => &self.conjoint,
            Classification::Unknown => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CountSnapshot {
        CountSnapshot {
            disjoint: self.disjoint.load(Ordering::Relaxed),
            conjoint: self.conjoint.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}

/// An unknown pair awaiting a sweep, with the ancestors whose buckets back it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnknown {
    pub left: ConceptId,
    pub right: ConceptId,
    pub backing: Vec<ConceptId>,
}

/// Summary of one relation at report time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSummary {
    pub counts: CountSnapshot,
    pub reliability: Reliability,
    pub pending: usize,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Relations whose global score cleared the threshold.
    pub swept_relations: Vec<String>,
    /// Newly written facts as `(relation, left, right)`.
    pub asserted: Vec<(String, ConceptId, ConceptId)>,
    /// Pending pairs blocked by an unreliable backing bucket.
    pub vetoed: usize,
    /// Accepted pairs the writer had already handled this run.
    pub duplicates: usize,
}

#[derive(Debug, Default)]
pub struct ReliabilityAggregator {
    relations: DashMap<String, Counts>,
    buckets: DashMap<(String, ConceptId), Counts>,
    pending: DashMap<String, Vec<PendingUnknown>>,
}

impl ReliabilityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one classified pair and its backing ancestors.
    pub fn observe(
        &self,
        relation: &str,
        left: ConceptId,
        right: ConceptId,
        classification: Classification,
        backing: Vec<ConceptId>,
    ) {
        self.relations
            .entry(relation.to_string())
            .or_default()
            .record(classification);
        for &ancestor in &backing {
            self.buckets
                .entry((relation.to_string(), ancestor))
                .or_default()
                .record(classification);
        }
        if classification == Classification::Unknown {
            self.pending
                .entry(relation.to_string())
                .or_default()
                .push(PendingUnknown {
                    left,
                    right,
                    backing,
                });
        }
    }

    pub fn relation_counts(&self, relation: &str) -> CountSnapshot {
        self.relations
            .get(relation)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    pub fn bucket_counts(&self, relation: &str, ancestor: ConceptId) -> CountSnapshot {
        self.buckets
            .get(&(relation.to_string(), ancestor))
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, relation: &str) -> usize {
        self.pending.get(relation).map_or(0, |p| p.len())
    }

    /// Every relation seen so far with its counters and score.
    pub fn summary(&self, config: &MiningConfig) -> BTreeMap<String, RelationSummary> {
        self.relations
            .iter()
            .map(|entry| {
                let counts = entry.value().snapshot();
                let summary = RelationSummary {
                    counts,
                    reliability: counts.reliability(config.relation_min_samples),
                    pending: self.pending_count(entry.key()),
                };
                (entry.key().clone(), summary)
            })
            .collect()
    }

    /// Assert pending pairs of reliable relations through `writer`.
    ///
    /// Pending lists of swept relations are consumed; those of relations
    /// below the threshold are kept for a later sweep.
    pub fn sweep(&self, writer: &AssertionWriter, config: &MiningConfig) -> SweepReport {
        let mut report = SweepReport::default();
        let mut relations: Vec<String> = self.relations.iter().map(|e| e.key().clone()).collect();
        relations.sort();

        for relation in relations {
            let reliability = self
                .relation_counts(&relation)
                .reliability(config.relation_min_samples);
            if reliability.meets(config.relation_threshold) != Some(true) {
                tracing::debug!(%relation, ?reliability, "relation below sweep threshold");
                continue;
            }
            let Some((_, pending)) = self.pending.remove(&relation) else {
                continue;
            };
            tracing::info!(
                %relation,
                score = reliability.score(),
                pending = pending.len(),
                "sweeping reliable relation"
            );

            let provenance = Provenance::Mined {
                relation: relation.clone(),
            };
            for item in pending {
                if let Some(ancestor) = self.unreliable_backing(&relation, &item, config) {
                    tracing::debug!(
                        %relation,
                        left = %item.left,
                        right = %item.right,
                        %ancestor,
                        "pending pair vetoed by backing bucket"
                    );
                    report.vetoed += 1;
                    continue;
                }
                if writer.assert_disjoint(item.left, item.right, provenance.clone()) {
                    report
                        .asserted
                        .push((relation.clone(), item.left, item.right));
                } else {
                    report.duplicates += 1;
                }
            }
            report.swept_relations.push(relation);
        }
        report
    }

    /// First backing bucket with enough samples that scores below threshold.
    fn unreliable_backing(
        &self,
        relation: &str,
        item: &PendingUnknown,
        config: &MiningConfig,
    ) -> Option<ConceptId> {
        item.backing.iter().copied().find(|&ancestor| {
            self.bucket_counts(relation, ancestor)
                .reliability(config.bucket_min_samples)
                .meets(config.bucket_threshold)
                == Some(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::taxonomy::memory::MemoryTaxonomy;
    use crate::taxonomy::{Relation, Taxonomy};

    fn cid(id: u64) -> ConceptId {
        ConceptId::new(id).unwrap()
    }

    #[test]
    fn reliability_requires_min_samples() {
        let counts = CountSnapshot {
            disjoint: 3,
            conjoint: 1,
            unknown: 50,
        };
        assert_eq!(counts.reliability(5), Reliability::Insufficient);
        assert_eq!(counts.reliability(4), Reliability::Score(0.75));
        assert_eq!(Reliability::Insufficient.meets(0.0), None);
        assert_eq!(CountSnapshot::default().reliability(0), Reliability::Insufficient);
    }

    #[test]
    fn observations_feed_relation_and_buckets() {
        let agg = ReliabilityAggregator::new();
        agg.observe("AtLocation", cid(1), cid(2), Classification::Disjoint, vec![cid(9)]);
        agg.observe("AtLocation", cid(3), cid(4), Classification::Unknown, vec![cid(9), cid(8)]);
        agg.observe("UsedFor", cid(1), cid(3), Classification::Conjoint, vec![]);

        let at = agg.relation_counts("AtLocation");
        assert_eq!((at.disjoint, at.conjoint, at.unknown), (1, 0, 1));
        assert_eq!(agg.bucket_counts("AtLocation", cid(9)).disjoint, 1);
        assert_eq!(agg.bucket_counts("AtLocation", cid(8)).unknown, 1);
        assert_eq!(agg.bucket_counts("UsedFor", cid(9)), CountSnapshot::default());
        assert_eq!(agg.pending_count("AtLocation"), 1);
        assert_eq!(agg.relation_counts("UsedFor").conjoint, 1);
    }

    struct Fixture {
        tax: Arc<MemoryTaxonomy>,
        writer: AssertionWriter,
        left: ConceptId,
        right: ConceptId,
        ancestor: ConceptId,
    }

    fn fixture() -> Fixture {
        let tax = MemoryTaxonomy::new();
        let ancestor = tax.add_collection("Artifact").unwrap();
        let left = tax.add_collection("Spoon").unwrap();
        let right = tax.add_collection("Garage").unwrap();
        let tax = Arc::new(tax);
        let writer = AssertionWriter::new(tax.clone(), 3);
        Fixture {
            tax,
            writer,
            left,
            right,
            ancestor,
        }
    }

    fn config(bucket_min_samples: u64) -> MiningConfig {
        MiningConfig {
            relation_threshold: 0.95,
            relation_min_samples: 100,
            bucket_threshold: 0.95,
            bucket_min_samples,
            ..MiningConfig::default()
        }
    }

    /// Unbacked AtLocation observations with the given split.
    fn unbacked(agg: &ReliabilityAggregator, disjoint: u64, conjoint: u64) {
        for i in 0..disjoint + conjoint {
            let class = if i < disjoint {
                Classification::Disjoint
            } else {
                Classification::Conjoint
            };
            agg.observe("AtLocation", cid(1000 + i), cid(2000 + i), class, vec![]);
        }
    }

    #[test]
    fn unreliable_backing_bucket_vetoes_pending_pair() {
        let f = fixture();
        let agg = ReliabilityAggregator::new();
        // 190 disjoint / 10 conjoint overall; the Artifact bucket holds 1 / 3.
        unbacked(&agg, 189, 7);
        let backed = vec![f.ancestor];
        for i in 0..3 {
            let (l, r) = (cid(3000 + i), cid(4000 + i));
            agg.observe("AtLocation", l, r, Classification::Conjoint, backed.clone());
        }
        agg.observe("AtLocation", cid(5000), cid(5001), Classification::Disjoint, backed.clone());
        agg.observe("AtLocation", f.left, f.right, Classification::Unknown, backed);
        let global = agg.relation_counts("AtLocation").reliability(100);
        assert_eq!(global, Reliability::Score(0.95));

        let report = agg.sweep(&f.writer, &config(4));
        assert_eq!(report.swept_relations, vec!["AtLocation".to_string()]);
        assert_eq!(report.vetoed, 1);
        assert!(report.asserted.is_empty());
        assert!(!f.tax.prove(Relation::DisjointWith, f.left, f.right));
    }

    #[test]
    fn thin_backing_bucket_does_not_veto() {
        let f = fixture();
        let agg = ReliabilityAggregator::new();
        unbacked(&agg, 190, 9);
        let backed = vec![f.ancestor];
        agg.observe("AtLocation", cid(3000), cid(3001), Classification::Conjoint, backed.clone());
        agg.observe("AtLocation", f.left, f.right, Classification::Unknown, backed);

        let report = agg.sweep(&f.writer, &config(100));
        assert_eq!(report.asserted, vec![("AtLocation".to_string(), f.left, f.right)]);
        assert!(f.tax.prove(Relation::DisjointWith, f.left, f.right));
        assert_eq!(agg.pending_count("AtLocation"), 0);

        // A second sweep has nothing left to do.
        assert!(agg.sweep(&f.writer, &config(100)).asserted.is_empty());
    }

    #[test]
    fn unreliable_relation_keeps_its_pending_pairs() {
        let f = fixture();
        let agg = ReliabilityAggregator::new();
        for i in 0..200u64 {
            let class = if i % 2 == 0 {
                Classification::Disjoint
            } else {
                Classification::Conjoint
            };
            agg.observe("RelatedTo", cid(1000 + i), cid(2000 + i), class, vec![]);
        }
        agg.observe("RelatedTo", f.left, f.right, Classification::Unknown, vec![]);

        let report = agg.sweep(&f.writer, &config(4));
        assert!(report.swept_relations.is_empty());
        assert_eq!(agg.pending_count("RelatedTo"), 1);
        assert_eq!(f.tax.write_count(), 0);
    }
}
