//! Concept relatedness in [0, 1] computed from the taxonomy.
//!
//! Two measures are provided:
//!
//! - **Jaccard** overlap of full ancestor sets (`isa` ∪ `genls` closures).
//! - **Taxonomic** similarity from the depth of the deepest common ancestor
//!   relative to the path length through it. This needs depth metadata on
//!   both concepts; without it the measure is [`Similarity::Indeterminate`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::concept::ConceptId;
use crate::taxonomy::Taxonomy;

/// Value reported in audit records when similarity cannot be judged.
pub const INDETERMINATE_SENTINEL: f32 = 1.0;

/// Outcome of a taxonomic similarity query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Similarity {
    Score(f32),
    /// Depth metadata missing for either concept; "cannot judge", never
    /// "maximally similar".
    Indeterminate,
}

impl Similarity {
    pub fn score(self) -> Option<f32> {
        match self {
            Similarity::Score(s) => Some(s),
            Similarity::Indeterminate => None,
        }
    }

    /// Flatten to a float, mapping `Indeterminate` to the 1.0 sentinel.
    pub fn or_sentinel(self) -> f32 {
        self.score().unwrap_or(INDETERMINATE_SENTINEL)
    }
}

/// Computes similarity scores against a taxonomy.
pub struct SimilarityEstimator<'a> {
    taxonomy: &'a dyn Taxonomy,
}

impl<'a> SimilarityEstimator<'a> {
    pub fn new(taxonomy: &'a dyn Taxonomy) -> Self {
        Self { taxonomy }
    }

    /// Union of all `isa` and `genls` ancestors.
    pub fn ancestors(&self, concept: ConceptId) -> HashSet<ConceptId> {
        let mut parents = self.taxonomy.all_generalizations(concept);
        parents.extend(self.taxonomy.all_types(concept));
        parents
    }

    /// Jaccard overlap of the two ancestor sets.
    pub fn jaccard(&self, a: ConceptId, b: ConceptId) -> f32 {
        if a == b {
            return 1.0;
        }
        let left = self.ancestors(a);
        let right = self.ancestors(b);
        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f32 / union as f32
    }

    /// Depth of the deepest common ancestor over the path length joining the
    /// two concepts through it, clamped to [0, 1].
    pub fn taxonomic(&self, a: ConceptId, b: ConceptId) -> Similarity {
        let (Some(depth_a), Some(depth_b)) = (self.taxonomy.depth(a), self.taxonomy.depth(b))
        else {
            return Similarity::Indeterminate;
        };
        if a == b {
            return Similarity::Score(1.0);
        }

        let left = self.ancestors(a);
        let right = self.ancestors(b);
        let lowest = left
            .intersection(&right)
            .filter_map(|c| self.taxonomy.depth(*c))
            .max()
            .unwrap_or(0);

        let path = (depth_a + depth_b) as f32 - 2.0 * lowest as f32;
        if path <= 0.0 {
            return Similarity::Score(1.0);
        }
        Similarity::Score((lowest as f32 / path).clamp(0.0, 1.0))
    }
}
