//! Taxonomy access facade.
//!
//! The engine never owns the taxonomy. It reads concepts and relations through
//! the [`Taxonomy`] trait and requests new facts through [`Taxonomy::create_fact`].
//!
//! - **Reference store** ([`memory::MemoryTaxonomy`]): petgraph-backed, in-memory
//! - **Name resolution** ([`resolve`]): alias lookup for the mining pipeline

pub mod memory;
pub mod resolve;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::concept::ConceptId;
use crate::error::{DisjointResult, TaxonomyError};

/// The relations the engine reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// `(Genls spec general)`: every instance of `spec` is an instance of `general`.
    Genls,
    /// `(Isa instance collection)`.
    Isa,
    /// `(DisjointWith a b)`: no common instance.
    DisjointWith,
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relation::Genls => write!(f, "genls"),
            Relation::Isa => write!(f, "isa"),
            Relation::DisjointWith => write!(f, "disjointWith"),
        }
    }
}

/// Which heuristic produced a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Asserted by a human or loaded from the source taxonomy.
    Curated,
    /// Generalized upward from lower-level disjoint facts.
    BubbleUp,
    /// Mined from corpus evidence under the named relation.
    Mined { relation: String },
}

impl Provenance {
    /// Synthetic creator marker attached to facts in the store.
    pub fn creator(&self) -> String {
        match self {
            Provenance::Curated => "Curated".into(),
            Provenance::BubbleUp => "BubbleUpDisjoint".into(),
            Provenance::Mined { relation } => format!("RelationMining:{relation}"),
        }
    }
}

/// A directed ternary fact `(relation, arg1, arg2)`. Immutable once asserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub relation: Relation,
    pub arg1: ConceptId,
    pub arg2: ConceptId,
    pub provenance: Provenance,
}

/// Queries and writes the engine needs from a taxonomy store.
///
/// All methods take `&self`; implementations must be safe to call from many
/// worker threads at once.
pub trait Taxonomy: Send + Sync {
    /// Prove `(relation arg1 arg2)` against the store, including inherited facts.
    fn prove(&self, relation: Relation, arg1: ConceptId, arg2: ConceptId) -> bool;

    /// True if `a` and `b` are related by generalization in either direction,
    /// or share a common specialization or instance.
    fn is_conjoint(&self, a: ConceptId, b: ConceptId) -> bool;

    /// Most specific direct generalizations.
    fn min_generalizations(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Most general direct specializations (the concept's children).
    fn max_specializations(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Transitive generalizations, excluding the concept itself.
    fn all_generalizations(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Transitive specializations, excluding the concept itself.
    fn all_specializations(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Most specific collections the concept is an instance of.
    fn min_types(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Transitive types (via `isa` then `genls`).
    fn all_types(&self, concept: ConceptId) -> HashSet<ConceptId>;

    /// Distance from the taxonomy root; `None` when unavailable.
    fn depth(&self, concept: ConceptId) -> Option<u32>;

    /// Display name of a concept.
    fn label(&self, concept: ConceptId) -> String;

    /// Look a concept up by its exact name.
    fn find_concept(&self, name: &str) -> Option<ConceptId>;

    /// Whether the concept is an individual rather than a collection.
    fn is_individual(&self, concept: ConceptId) -> bool;

    /// Create a new fact. Not assumed idempotent.
    fn create_fact(&self, fact: Fact) -> DisjointResult<()>;

    /// Every stored fact with the given relation.
    fn facts(&self, relation: Relation) -> Vec<Fact>;
}

/// Well-known root concepts resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct TaxonomyRoots {
    /// The category all tangible concepts specialize.
    pub tangible: ConceptId,
}

impl TaxonomyRoots {
    /// Resolve required roots; a missing root is a configuration error.
    pub fn resolve(taxonomy: &dyn Taxonomy, tangible_root: &str) -> DisjointResult<Self> {
        let tangible = taxonomy
            .find_concept(tangible_root)
            .ok_or_else(|| TaxonomyError::MissingRoot {
                name: tangible_root.to_string(),
            })?;
        Ok(Self { tangible })
    }

    /// A concept is tangible when it provably specializes the tangible root.
    /// The root itself is excluded as too generic to reason about.
    pub fn is_tangible(&self, taxonomy: &dyn Taxonomy, concept: ConceptId) -> bool {
        concept != self.tangible && taxonomy.prove(Relation::Genls, concept, self.tangible)
    }
}
