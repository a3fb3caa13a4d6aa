//! Per-pair classification and the acceptance decision.
//!
//! An [`Evaluator`] is shared by every worker in a bubble-up run. For a
//! matched `(candidate, target)` pair it claims the pair in the explored set,
//! short-circuits on already-known facts, samples both directions, and hands
//! accepted pairs to the assertion writer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::abstractness::AbstractnessFilter;
use crate::concept::{ConceptId, ConceptPair};
use crate::config::{AcceptancePolicy, BubbleUpConfig};
use crate::explored::ExploredSet;
use crate::sampler::{EvidenceSampler, SampleOutcome};
use crate::similarity::SimilarityEstimator;
use crate::taxonomy::{Provenance, Relation, Taxonomy};
use crate::writer::AssertionWriter;

/// Outcome of combining both sampling directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    /// Neither direction produced enough evidence to decide.
    Indeterminate,
}

/// Combine two sampling directions under `policy`.
///
/// A conjoint veto in either direction is handled by the caller before this
/// point; here a vetoed or insufficient direction simply carries no evidence.
pub fn decide(
    policy: AcceptancePolicy,
    threshold: f32,
    forward: &SampleOutcome,
    backward: &SampleOutcome,
) -> Decision {
    let f = forward.accepts(threshold);
    let b = backward.accepts(threshold);
    match policy {
        AcceptancePolicy::Either => match (f, b) {
            (Some(true), _) | (_, Some(true)) => Decision::Accept,
            (None, None) => Decision::Indeterminate,
            _ => Decision::Reject,
        },
        AcceptancePolicy::Both => match (f, b) {
            (Some(true), Some(true)) => Decision::Accept,
            (Some(false), _) | (_, Some(false)) => Decision::Reject,
            _ => Decision::Indeterminate,
        },
    }
}

/// What happened to one matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Another worker or obligation already claimed the pair.
    AlreadyExplored,
    /// The taxonomy already proves the pair disjoint.
    AlreadyDisjoint,
    /// The pair overlaps; the candidate's subtree is cut.
    Conjoint,
    /// A sampled child was conjoint with the other side.
    Vetoed,
    Indeterminate,
    Rejected,
    /// Accepted; `asserted` is false when the writer had nothing new to do.
    Accepted { asserted: bool },
}

impl Verdict {
    /// Whether the candidate and everything above it should be cut.
    pub fn cuts(self) -> bool {
        matches!(self, Verdict::Conjoint | Verdict::Vetoed)
    }
}

/// Audit trail for one sampled pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub candidate: String,
    pub target: String,
    /// Taxonomic similarity; 1.0 when depth metadata is missing.
    pub similarity: f32,
    pub candidate_abstractness: f32,
    pub target_abstractness: f32,
    /// Candidate's children sampled against the target.
    pub forward: SampleOutcome,
    /// Target's children sampled against the candidate.
    pub backward: SampleOutcome,
    pub verdict: Verdict,
    pub reason: String,
}

/// Result of evaluating one `(candidate, target)` pair.
#[derive(Debug, Clone)]
pub struct PairEvaluation {
    pub candidate: ConceptId,
    pub target: ConceptId,
    pub verdict: Verdict,
    /// Present only when sampling actually ran.
    pub record: Option<DecisionRecord>,
}

pub struct Evaluator {
    taxonomy: Arc<dyn Taxonomy>,
    sampler: EvidenceSampler,
    abstractness: Arc<AbstractnessFilter>,
    explored: ExploredSet,
    writer: Arc<AssertionWriter>,
    config: BubbleUpConfig,
}

impl Evaluator {
    pub fn new(
        taxonomy: Arc<dyn Taxonomy>,
        sampler: EvidenceSampler,
        abstractness: Arc<AbstractnessFilter>,
        writer: Arc<AssertionWriter>,
        config: BubbleUpConfig,
    ) -> Self {
        Self {
            taxonomy,
            sampler,
            abstractness,
            explored: ExploredSet::new(),
            writer,
            config,
        }
    }

    pub fn explored(&self) -> &ExploredSet {
        &self.explored
    }

    pub fn evaluate(&self, candidate: ConceptId, target: ConceptId) -> PairEvaluation {
        let verdict_only = |verdict| PairEvaluation {
            candidate,
            target,
            verdict,
            record: None,
        };

        let pair = ConceptPair::new(candidate, target);
        if pair.is_reflexive() {
            return verdict_only(Verdict::Conjoint);
        }
        if !self.explored.try_claim(pair) {
            // A pair rejected earlier in the run still cuts this tree.
            let verdict = if self.explored.is_rejected(&pair) {
                Verdict::Conjoint
            } else {
                Verdict::AlreadyExplored
            };
            return verdict_only(verdict);
        }

        if self.taxonomy.prove(Relation::DisjointWith, candidate, target) {
            return verdict_only(Verdict::AlreadyDisjoint);
        }
        if self.taxonomy.is_conjoint(candidate, target) {
            self.explored.reject(pair);
            return verdict_only(Verdict::Conjoint);
        }

        let forward = self.sampler.sample(candidate, target);
        let backward = self.sampler.sample(target, candidate);

        let (verdict, reason) = if forward.is_conjoint() || backward.is_conjoint() {
            self.explored.reject(pair);
            (Verdict::Vetoed, "conjoint child found while sampling".to_string())
        } else {
            let threshold = self.config.acceptance_ratio;
            match decide(self.config.acceptance, threshold, &forward, &backward) {
                Decision::Accept => {
                    let asserted =
                        self.writer
                            .assert_disjoint(candidate, target, Provenance::BubbleUp);
                    (
                        Verdict::Accepted { asserted },
                        format!("ratio above {threshold}"),
                    )
                }
                Decision::Reject => (Verdict::Rejected, format!("ratio not above {threshold}")),
                Decision::Indeterminate => (
                    Verdict::Indeterminate,
                    "insufficient children to sample".to_string(),
                ),
            }
        };

        let record = self.record(candidate, target, forward, backward, verdict, reason);
        tracing::debug!(
            candidate = %record.candidate,
            target = %record.target,
            verdict = ?record.verdict,
            similarity = record.similarity,
            reason = %record.reason,
            "pair evaluated"
        );

        PairEvaluation {
            candidate,
            target,
            verdict,
            record: Some(record),
        }
    }

    fn record(
        &self,
        candidate: ConceptId,
        target: ConceptId,
        forward: SampleOutcome,
        backward: SampleOutcome,
        verdict: Verdict,
        reason: String,
    ) -> DecisionRecord {
        let similarity = SimilarityEstimator::new(self.taxonomy.as_ref())
            .taxonomic(candidate, target)
            .or_sentinel();
        DecisionRecord {
            candidate: self.taxonomy.label(candidate),
            target: self.taxonomy.label(target),
            similarity,
            candidate_abstractness: self.abstractness.score(candidate),
            target_abstractness: self.abstractness.score(target),
            forward,
            backward,
            verdict,
            reason,
        }
    }
}
