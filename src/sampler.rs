//! Evidence sampler: how many children of a parent are disjoint with a target?
//!
//! The children of `parent` are its most general direct specializations. Small
//! collections yield [`SampleOutcome::Insufficient`]; large ones are sampled
//! uniformly with replacement. A single child conjoint with the target vetoes
//! the whole evaluation, however much supporting evidence was gathered.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::concept::ConceptId;
use crate::config::SamplingConfig;
use crate::taxonomy::{Relation, Taxonomy};

/// Evidence gathered from a sufficient sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// `disjoint_count / sample_size`.
    pub ratio: f32,
    pub disjoint_count: usize,
    pub sample_size: usize,
}

/// Result of sampling `parent`'s children against a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleOutcome {
    /// Too few children to decide anything.
    Insufficient { children: usize },
    /// A sampled child is conjoint with the target: hard rejection.
    Conjoint { child: ConceptId },
    Sampled(Evidence),
}

impl SampleOutcome {
    pub fn evidence(&self) -> Option<Evidence> {
        match self {
            SampleOutcome::Sampled(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_conjoint(&self) -> bool {
        matches!(self, SampleOutcome::Conjoint { .. })
    }

    /// Whether this direction clears `threshold`. `None` when there is no
    /// evidence to decide from (insufficient or vetoed).
    pub fn accepts(&self, threshold: f32) -> Option<bool> {
        self.evidence().map(|e| e.ratio > threshold)
    }
}

/// Samples children against targets using a shared taxonomy.
#[derive(Clone)]
pub struct EvidenceSampler {
    taxonomy: Arc<dyn Taxonomy>,
    config: SamplingConfig,
}

impl EvidenceSampler {
    pub fn new(taxonomy: Arc<dyn Taxonomy>, config: SamplingConfig) -> Self {
        Self { taxonomy, config }
    }

    /// Classify a sample of `parent`'s children against `target`.
    pub fn sample(&self, parent: ConceptId, target: ConceptId) -> SampleOutcome {
        let mut children: Vec<ConceptId> = self
            .taxonomy
            .max_specializations(parent)
            .into_iter()
            .collect();
        if children.len() <= self.config.min_children {
            return SampleOutcome::Insufficient {
                children: children.len(),
            };
        }

        let sample: Vec<ConceptId> = if children.len() > self.config.max_exploration {
            let mut rng = rand::thread_rng();
            (0..self.config.max_exploration)
                .filter_map(|_| children.choose(&mut rng).copied())
                .collect()
        } else {
            children.sort();
            children
        };

        let mut disjoint_count = 0;
        for &child in &sample {
            if self.taxonomy.prove(Relation::DisjointWith, child, target) {
                disjoint_count += 1;
            } else if self.taxonomy.is_conjoint(child, target) {
                return SampleOutcome::Conjoint { child };
            }
        }

        SampleOutcome::Sampled(Evidence {
            ratio: disjoint_count as f32 / sample.len() as f32,
            disjoint_count,
            sample_size: sample.len(),
        })
    }
}
