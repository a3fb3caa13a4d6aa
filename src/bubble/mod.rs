//! Bubble-up: generalize known disjointness facts to ancestor collections.
//!
//! Every stored `(disjointWith X Y)` seeds two obligations, "find ancestors of
//! X disjoint with Y" and the mirror. Obligations from deeper sources run
//! first. For each obligation the source's [`CandidateTree`] is matched level
//! by level against the target on a fresh [`WorkerPool`]; conjoint results
//! cut the offending subtree before the next level is dispatched.
//!
//! Facts asserted during a pass seed the next one, up to
//! [`BubbleUpConfig::max_iterations`](crate::config::BubbleUpConfig). They are
//! read back from the [`AssertionWriter`], which also sees writes made by
//! evaluations their batch had already abandoned.

pub mod evaluate;
pub mod tree;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::abstractness::AbstractnessFilter;
use crate::concept::{ConceptId, ConceptPair};
use crate::config::DisjointConfig;
use crate::error::DisjointResult;
use crate::pool::WorkerPool;
use crate::sampler::EvidenceSampler;
use crate::taxonomy::{Relation, Taxonomy, TaxonomyRoots};
use crate::writer::AssertionWriter;

use self::evaluate::{DecisionRecord, Evaluator, PairEvaluation, Verdict};
use self::tree::CandidateTree;

/// Summary of a bubble-up run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BubbleUpReport {
    pub iterations: usize,
    pub obligations: usize,
    /// Pairs dispatched to workers whose results came back.
    pub evaluated: usize,
    pub already_explored: usize,
    pub already_disjoint: usize,
    pub conjoint: usize,
    pub vetoed: usize,
    pub indeterminate: usize,
    pub rejected: usize,
    pub accepted: usize,
    /// Pairs newly written to the store, as `(candidate, target)`, in write order.
    pub asserted: Vec<(ConceptId, ConceptId)>,
    /// Facts written during each pass; late writes count toward the last pass.
    pub asserted_per_pass: Vec<usize>,
    pub explored_pairs: usize,
    pub abandoned_batches: usize,
    pub abandoned_pairs: usize,
    pub dropped_writes: usize,
    pub records: Vec<DecisionRecord>,
}

impl BubbleUpReport {
    fn absorb(&mut self, eval: PairEvaluation) {
        self.evaluated += 1;
        match eval.verdict {
            Verdict::AlreadyExplored => self.already_explored += 1,
            Verdict::AlreadyDisjoint => self.already_disjoint += 1,
            Verdict::Conjoint => self.conjoint += 1,
            Verdict::Vetoed => self.vetoed += 1,
            Verdict::Indeterminate => self.indeterminate += 1,
            Verdict::Rejected => self.rejected += 1,
            Verdict::Accepted { .. } => self.accepted += 1,
        }
        if let Some(record) = eval.record {
            self.records.push(record);
        }
    }
}

/// A bubble-up run over one taxonomy.
pub struct BubbleUp {
    taxonomy: Arc<dyn Taxonomy>,
    config: DisjointConfig,
    roots: TaxonomyRoots,
    abstractness: Arc<AbstractnessFilter>,
    writer: Arc<AssertionWriter>,
    evaluator: Arc<Evaluator>,
}

impl BubbleUp {
    /// Validate `config` and resolve the tangible root.
    pub fn new(taxonomy: Arc<dyn Taxonomy>, config: DisjointConfig) -> DisjointResult<Self> {
        config.validate()?;
        let roots = TaxonomyRoots::resolve(taxonomy.as_ref(), &config.tangible_root)?;
        let abstractness = Arc::new(AbstractnessFilter::new(
            taxonomy.clone(),
            config.abstractness.clone(),
            &config.sampling,
        ));
        let writer = Arc::new(AssertionWriter::new(
            taxonomy.clone(),
            config.max_write_attempts,
        ));
        let evaluator = Arc::new(Evaluator::new(
            taxonomy.clone(),
            EvidenceSampler::new(taxonomy.clone(), config.sampling.clone()),
            abstractness.clone(),
            writer.clone(),
            config.bubble_up.clone(),
        ));
        Ok(Self {
            taxonomy,
            config,
            roots,
            abstractness,
            writer,
            evaluator,
        })
    }

    /// Run every pass and return the combined report.
    ///
    /// The writer is closed before returning, so the store does not change
    /// after this call even if abandoned evaluations are still running.
    pub fn run(self) -> DisjointResult<BubbleUpReport> {
        let mut report = BubbleUpReport::default();
        let mut trees: HashMap<ConceptId, CandidateTree> = HashMap::new();
        let mut seeded: HashSet<ConceptPair> = HashSet::new();
        let mut seeds: Vec<(ConceptId, ConceptId)> = self
            .taxonomy
            .facts(Relation::DisjointWith)
            .into_iter()
            .map(|f| (f.arg1, f.arg2))
            .collect();

        tracing::info!(seeds = seeds.len(), "bubble-up starting");

        for iteration in 0..self.config.bubble_up.max_iterations {
            if seeds.is_empty() {
                break;
            }
            report.iterations = iteration + 1;

            let obligations = self.obligations(&seeds);
            tracing::info!(iteration, obligations = obligations.len(), "bubble-up pass");
            for (source, target) in obligations {
                report.obligations += 1;
                let tree = trees.entry(source).or_insert_with(|| {
                    CandidateTree::build(
                        source,
                        self.taxonomy.as_ref(),
                        &self.roots,
                        &self.abstractness,
                        self.config.bubble_up.min_maturity,
                    )
                });
                self.discharge(tree, target, &mut report)?;
            }

            seeds = self.fresh_writes(&mut seeded);
            report.asserted_per_pass.push(seeds.len());
        }

        self.writer.close();
        let late = self.fresh_writes(&mut seeded).len();
        if let Some(last) = report.asserted_per_pass.last_mut() {
            *last += late;
        }
        report.asserted = self.writer.written();
        report.explored_pairs = self.evaluator.explored().len();
        report.dropped_writes = self.writer.dropped_count();
        tracing::info!(
            iterations = report.iterations,
            evaluated = report.evaluated,
            asserted = report.asserted.len(),
            vetoed = report.vetoed + report.conjoint,
            abandoned = report.abandoned_pairs,
            "bubble-up finished"
        );
        Ok(report)
    }

    /// Directed obligations for `seeds`, deepest source first.
    fn obligations(&self, seeds: &[(ConceptId, ConceptId)]) -> Vec<(ConceptId, ConceptId)> {
        let mut seen = HashSet::new();
        let mut obligations: Vec<(ConceptId, ConceptId)> = seeds
            .iter()
            .flat_map(|&(x, y)| [(x, y), (y, x)])
            .filter(|&(x, y)| !ConceptPair::new(x, y).is_reflexive() && seen.insert((x, y)))
            .collect();
        // Concepts without depth sort last.
        obligations.sort_by_cached_key(|&(source, target)| {
            (std::cmp::Reverse(self.taxonomy.depth(source)), source, target)
        });
        obligations
    }

    /// Written facts not yet handed out as seeds.
    fn fresh_writes(&self, seeded: &mut HashSet<ConceptPair>) -> Vec<(ConceptId, ConceptId)> {
        self.writer
            .written()
            .into_iter()
            .filter(|&(a, b)| seeded.insert(ConceptPair::new(a, b)))
            .collect()
    }

    /// Match one source tree against `target` until it is exhausted.
    fn discharge(
        &self,
        tree: &mut CandidateTree,
        target: ConceptId,
        report: &mut BubbleUpReport,
    ) -> DisjointResult<()> {
        tree.begin_pass(target);
        let pool = WorkerPool::new(&self.config.pool)?;

        while let Some(level) = tree.next_level() {
            if level.is_empty() {
                continue;
            }
            let evaluator = Arc::clone(&self.evaluator);
            let batch = pool.run_batch(level, move |(idx, candidate)| {
                (idx, evaluator.evaluate(candidate, target))
            });
            if batch.timed_out {
                report.abandoned_batches += 1;
            }
            report.abandoned_pairs += batch.abandoned();

            for (idx, eval) in batch.results {
                if eval.verdict.cuts() {
                    tree.cut(idx);
                }
                report.absorb(eval);
            }
        }
        Ok(())
    }
}
