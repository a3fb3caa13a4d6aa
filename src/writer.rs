//! Assertion writer: at most one new disjointness fact per pair per run.
//!
//! The dedup key is the canonical [`ConceptPair`], so `(A, B)` and `(B, A)` are
//! the same request. Claiming the key is an atomic insert-if-absent; only the
//! claiming worker talks to the store. Store failures are retried a bounded
//! number of times, after which the candidate is dropped and the claim
//! released.
//!
//! Every successful write is logged with its sequence number, so the facts a
//! run produced can be read back from the writer even when the worker that
//! wrote one was abandoned by its batch. [`AssertionWriter::close`] waits for
//! in-flight writes and refuses any later ones.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::{DashMap, DashSet};

use crate::concept::{ConceptId, ConceptPair};
use crate::taxonomy::{Fact, Provenance, Relation, Taxonomy};

pub struct AssertionWriter {
    taxonomy: Arc<dyn Taxonomy>,
    claimed: DashSet<ConceptPair>,
    /// Successful writes: sequence number and the pair in requested order.
    written: DashMap<ConceptPair, (u64, ConceptId, ConceptId)>,
    sequence: AtomicU64,
    /// Held shared for the duration of each write; `false` once closed.
    open: RwLock<bool>,
    max_attempts: usize,
    dropped: AtomicUsize,
}

impl AssertionWriter {
    pub fn new(taxonomy: Arc<dyn Taxonomy>, max_attempts: usize) -> Self {
        Self {
            taxonomy,
            claimed: DashSet::new(),
            written: DashMap::new(),
            sequence: AtomicU64::new(0),
            open: RwLock::new(true),
            max_attempts: max_attempts.max(1),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Request `(disjointWith a b)`. Returns `true` if this call created it.
    pub fn assert_disjoint(&self, a: ConceptId, b: ConceptId, provenance: Provenance) -> bool {
        if a == b {
            return false;
        }
        let open = self.open.read().expect("writer lock poisoned");
        if !*open {
            tracing::debug!(
                a = %self.taxonomy.label(a),
                b = %self.taxonomy.label(b),
                "writer closed; late acceptance discarded"
            );
            return false;
        }
        let pair = ConceptPair::new(a, b);
        if !self.claimed.insert(pair) {
            return false;
        }

        let fact = Fact {
            relation: Relation::DisjointWith,
            arg1: a,
            arg2: b,
            provenance,
        };
        for attempt in 1..=self.max_attempts {
            match self.taxonomy.create_fact(fact.clone()) {
                Ok(()) => {
                    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                    self.written.insert(pair, (seq, a, b));
                    tracing::info!(
                        a = %self.taxonomy.label(a),
                        b = %self.taxonomy.label(b),
                        creator = %fact.provenance.creator(),
                        "disjointness asserted"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max = self.max_attempts,
                        error = %e,
                        "fact creation failed"
                    );
                }
            }
        }

        tracing::warn!(
            a = %self.taxonomy.label(a),
            b = %self.taxonomy.label(b),
            "dropping candidate after repeated store failures"
        );
        self.claimed.remove(&pair);
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Wait for writes in flight, then refuse every later request.
    pub fn close(&self) {
        *self.open.write().expect("writer lock poisoned") = false;
    }

    pub fn is_closed(&self) -> bool {
        !*self.open.read().expect("writer lock poisoned")
    }

    /// Whether the pair is claimed or written in this run.
    pub fn was_asserted(&self, a: ConceptId, b: ConceptId) -> bool {
        self.claimed.contains(&ConceptPair::new(a, b))
    }

    /// Facts written so far, in the order they reached the store.
    pub fn written(&self) -> Vec<(ConceptId, ConceptId)> {
        let mut log: Vec<(u64, ConceptId, ConceptId)> =
            self.written.iter().map(|e| *e.value()).collect();
        log.sort_by_key(|&(seq, _, _)| seq);
        log.into_iter().map(|(_, a, b)| (a, b)).collect()
    }

    /// Number of facts written so far in this run.
    pub fn asserted_count(&self) -> usize {
        self.written.len()
    }

    /// Number of candidates given up after store failures.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::memory::MemoryTaxonomy;

    fn setup() -> (Arc<MemoryTaxonomy>, ConceptId, ConceptId) {
        let tax = MemoryTaxonomy::new();
        let a = tax.add_collection("Fish").unwrap();
        let b = tax.add_collection("Bicycle").unwrap();
        (Arc::new(tax), a, b)
    }

    #[test]
    fn second_request_in_either_order_is_a_noop() {
        let (tax, a, b) = setup();
        let writer = AssertionWriter::new(tax.clone(), 3);
        assert!(writer.assert_disjoint(a, b, Provenance::BubbleUp));
        assert!(!writer.assert_disjoint(b, a, Provenance::BubbleUp));
        assert_eq!(tax.write_count(), 1);
        assert!(tax.prove(Relation::DisjointWith, b, a));
        assert!(writer.was_asserted(b, a));
    }

    #[test]
    fn transient_failures_are_retried() {
        let (tax, a, b) = setup();
        tax.fail_next_writes(2);
        let writer = AssertionWriter::new(tax.clone(), 3);
        assert!(writer.assert_disjoint(a, b, Provenance::BubbleUp));
        assert_eq!(tax.write_count(), 3);
        assert_eq!(writer.dropped_count(), 0);
    }

    #[test]
    fn persistent_failure_drops_the_candidate() {
        let (tax, a, b) = setup();
        tax.fail_next_writes(10);
        let writer = AssertionWriter::new(tax.clone(), 3);
        assert!(!writer.assert_disjoint(a, b, Provenance::BubbleUp));
        assert_eq!(tax.write_count(), 3);
        assert_eq!(writer.dropped_count(), 1);
        assert!(!writer.was_asserted(a, b));
        assert!(!tax.prove(Relation::DisjointWith, a, b));
    }

    #[test]
    fn concurrent_acceptance_writes_once() {
        let (tax, a, b) = setup();
        let writer = Arc::new(AssertionWriter::new(tax.clone(), 3));
        std::thread::scope(|s| {
            for i in 0..8 {
                let writer = writer.clone();
                s.spawn(move || {
                    if i % 2 == 0 {
                        writer.assert_disjoint(a, b, Provenance::BubbleUp);
                    } else {
                        writer.assert_disjoint(b, a, Provenance::BubbleUp);
                    }
                });
            }
        });
        assert_eq!(tax.write_count(), 1);
        assert_eq!(writer.asserted_count(), 1);
    }

    #[test]
    fn reflexive_pairs_are_ignored() {
        let (tax, a, _) = setup();
        let writer = AssertionWriter::new(tax.clone(), 3);
        assert!(!writer.assert_disjoint(a, a, Provenance::BubbleUp));
        assert_eq!(tax.write_count(), 0);
    }

    #[test]
    fn written_log_keeps_request_order() {
        let (tax, a, b) = setup();
        let c = tax.add_collection("Kettle").unwrap();
        let writer = AssertionWriter::new(tax.clone(), 3);
        writer.assert_disjoint(b, a, Provenance::BubbleUp);
        writer.assert_disjoint(a, c, Provenance::BubbleUp);
        assert_eq!(writer.written(), vec![(b, a), (a, c)]);
    }

    #[test]
    fn closed_writer_refuses_late_requests() {
        let (tax, a, b) = setup();
        let writer = AssertionWriter::new(tax.clone(), 3);
        writer.close();
        assert!(writer.is_closed());
        assert!(!writer.assert_disjoint(a, b, Provenance::BubbleUp));
        assert_eq!(tax.write_count(), 0);
        assert!(writer.written().is_empty());
        assert_eq!(writer.dropped_count(), 0);
    }
}
