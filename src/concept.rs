//! Core concept types for the disjointness engine.
//!
//! Concepts are owned by the taxonomy store; the engine only reads them.
//! Every concept is identified by a [`ConceptId`] and described by
//! [`ConceptMeta`]. The [`AtomicConceptAllocator`] provides thread-safe ID
//! generation for store implementations.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DisjointResult, TaxonomyError};

/// Unique, niche-optimized identifier for a concept.
///
/// Uses `NonZeroU64` so that `Option<ConceptId>` is the same size as `ConceptId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConceptId(NonZeroU64);

impl ConceptId {
    /// Create a `ConceptId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ConceptId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "concept:{}", self.0)
    }
}

/// Classification of a concept in the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConceptKind {
    /// A class of things (has instances, may have specializations).
    Collection,
    /// A single thing, an instance of one or more collections.
    Individual,
    /// A function-denoted concept; carries no depth metadata.
    Function,
}

impl std::fmt::Display for ConceptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConceptKind::Collection => write!(f, "Collection"),
            ConceptKind::Individual => write!(f, "Individual"),
            ConceptKind::Function => write!(f, "Function"),
        }
    }
}

/// Metadata describing a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMeta {
    /// Unique identifier.
    pub id: ConceptId,
    /// What kind of concept this is.
    pub kind: ConceptKind,
    /// Human-readable name.
    pub label: String,
}

impl ConceptMeta {
    pub fn new(id: ConceptId, kind: ConceptKind, label: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
        }
    }
}

/// Unordered pair of concepts, used as a deduplication key.
///
/// The pair is stored in canonical order (larger id first), so
/// `ConceptPair::new(a, b) == ConceptPair::new(b, a)` and both hash alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptPair {
    high: ConceptId,
    low: ConceptId,
}

impl ConceptPair {
    pub fn new(a: ConceptId, b: ConceptId) -> Self {
        if a >= b {
            Self { high: a, low: b }
        } else {
            Self { high: b, low: a }
        }
    }

    /// The canonical `(first, second)` ordering of the pair.
    pub fn ordered(self) -> (ConceptId, ConceptId) {
        (self.high, self.low)
    }

    /// Whether both members are the same concept.
    pub fn is_reflexive(self) -> bool {
        self.high == self.low
    }

    pub fn contains(self, concept: ConceptId) -> bool {
        self.high == concept || self.low == concept
    }
}

/// Thread-safe concept ID allocator.
///
/// Produces monotonically increasing IDs starting from 1.
#[derive(Debug)]
pub struct AtomicConceptAllocator {
    next: AtomicU64,
}

impl AtomicConceptAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next concept ID.
    pub fn next_id(&self) -> DisjointResult<ConceptId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        ConceptId::new(raw).ok_or_else(|| TaxonomyError::AllocatorExhausted.into())
    }
}

impl Default for AtomicConceptAllocator {
    fn default() -> Self {
        Self::new()
    }
}
