//! In-memory taxonomy store.
//!
//! Uses `petgraph` for the genls/isa structure and `DashMap` for lookups by
//! id and label. Disjointness facts are kept in a separate pair index since
//! they are inherited downward rather than traversed.
//!
//! Depths are memoized across calls and invalidated whenever an edge is added.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::concept::{AtomicConceptAllocator, ConceptId, ConceptKind, ConceptMeta, ConceptPair};
use crate::error::{DisjointResult, TaxonomyError};

use super::{Fact, Provenance, Relation, Taxonomy};

/// Reference [`Taxonomy`] implementation held entirely in memory.
pub struct MemoryTaxonomy {
    /// Edges point from the specific concept to the general one.
    graph: RwLock<DiGraph<ConceptId, Relation>>,
    node_index: DashMap<ConceptId, NodeIndex>,
    concepts: DashMap<ConceptId, ConceptMeta>,
    /// Lowercased label → id.
    labels: DashMap<String, ConceptId>,
    disjoint_pairs: DashSet<ConceptPair>,
    disjoint_facts: RwLock<Vec<Fact>>,
    depths: DashMap<ConceptId, Option<u32>>,
    /// Bumped under the graph write lock whenever an edge is added.
    depth_epoch: AtomicU64,
    allocator: AtomicConceptAllocator,
    /// Number of `create_fact` calls that reached the store.
    writes: AtomicUsize,
    /// Remaining writes to reject, for exercising retry paths.
    failing_writes: AtomicUsize,
}

impl MemoryTaxonomy {
    /// Create an empty taxonomy.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
            concepts: DashMap::new(),
            labels: DashMap::new(),
            disjoint_pairs: DashSet::new(),
            disjoint_facts: RwLock::new(Vec::new()),
            depths: DashMap::new(),
            depth_epoch: AtomicU64::new(0),
            allocator: AtomicConceptAllocator::new(),
            writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Register a concept. Labels are unique, case-insensitively.
    pub fn add_concept(&self, kind: ConceptKind, label: &str) -> DisjointResult<ConceptId> {
        // The label stays claimed until the concept is fully registered.
        let slot = match self.labels.entry(label.to_lowercase()) {
            Entry::Occupied(existing) => {
                return Err(TaxonomyError::DuplicateLabel {
                    label: label.to_string(),
                    existing_id: existing.get().get(),
                }
                .into());
            }
            Entry::Vacant(slot) => slot,
        };
        let id = self.allocator.next_id()?;
        let idx = {
            let mut graph = self.graph.write().expect("taxonomy lock poisoned");
            graph.add_node(id)
        };
        self.node_index.insert(id, idx);
        self.concepts.insert(id, ConceptMeta::new(id, kind, label));
        slot.insert(id);
        Ok(id)
    }

    pub fn add_collection(&self, label: &str) -> DisjointResult<ConceptId> {
        self.add_concept(ConceptKind::Collection, label)
    }

    pub fn add_individual(&self, label: &str) -> DisjointResult<ConceptId> {
        self.add_concept(ConceptKind::Individual, label)
    }

    /// Assert `(genls spec general)`.
    pub fn add_genls(&self, spec: ConceptId, general: ConceptId) -> DisjointResult<()> {
        self.add_edge(spec, general, Relation::Genls)
    }

    /// Assert `(isa instance collection)`.
    pub fn add_isa(&self, instance: ConceptId, collection: ConceptId) -> DisjointResult<()> {
        self.add_edge(instance, collection, Relation::Isa)
    }

    /// Assert a curated `(disjointWith a b)`.
    pub fn add_disjoint(&self, a: ConceptId, b: ConceptId) -> DisjointResult<()> {
        self.require(a)?;
        self.require(b)?;
        self.record_disjoint(Fact {
            relation: Relation::DisjointWith,
            arg1: a,
            arg2: b,
            provenance: Provenance::Curated,
        });
        Ok(())
    }

    /// Reject the next `count` fact writes with [`TaxonomyError::WriteFailed`].
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of fact-creation requests received (including rejected ones).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Disjointness facts asserted with the given provenance.
    pub fn facts_by(&self, provenance: &Provenance) -> Vec<Fact> {
        self.disjoint_facts
            .read()
            .expect("taxonomy lock poisoned")
            .iter()
            .filter(|f| &f.provenance == provenance)
            .cloned()
            .collect()
    }

    /// Metadata for a concept.
    pub fn meta(&self, concept: ConceptId) -> Option<ConceptMeta> {
        self.concepts.get(&concept).map(|r| r.value().clone())
    }

    /// Number of registered concepts.
    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    /// Every registered concept id, sorted.
    pub fn concept_ids(&self) -> Vec<ConceptId> {
        let mut ids: Vec<ConceptId> = self.concepts.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    fn require(&self, concept: ConceptId) -> DisjointResult<NodeIndex> {
        self.node_index
            .get(&concept)
            .map(|r| *r.value())
            .ok_or_else(|| {
                TaxonomyError::ConceptNotFound {
                    concept_id: concept.get(),
                }
                .into()
            })
    }

    fn add_edge(&self, from: ConceptId, to: ConceptId, relation: Relation) -> DisjointResult<()> {
        let from_idx = self.require(from)?;
        let to_idx = self.require(to)?;
        let mut graph = self.graph.write().expect("taxonomy lock poisoned");
        let exists = graph
            .edges_connecting(from_idx, to_idx)
            .any(|e| *e.weight() == relation);
        if !exists {
            graph.add_edge(from_idx, to_idx, relation);
            self.depth_epoch.fetch_add(1, Ordering::SeqCst);
            self.depths.clear();
        }
        Ok(())
    }

    fn record_disjoint(&self, fact: Fact) {
        if self.disjoint_pairs.insert(ConceptPair::new(fact.arg1, fact.arg2)) {
            self.disjoint_facts
                .write()
                .expect("taxonomy lock poisoned")
                .push(fact);
        }
    }

    /// Direct neighbours of a concept along `relation` edges.
    fn neighbours(&self, concept: ConceptId, relation: Relation, dir: Direction) -> Vec<ConceptId> {
        let Some(idx) = self.node_index.get(&concept).map(|r| *r.value()) else {
            return vec![];
        };
        let graph = self.graph.read().expect("taxonomy lock poisoned");
        graph
            .edges_directed(idx, dir)
            .filter(|e| *e.weight() == relation)
            .filter_map(|e| {
                let other = match dir {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                graph.node_weight(other).copied()
            })
            .collect()
    }

    /// Transitive closure along `genls` edges, excluding the start concepts.
    fn genls_closure(&self, start: &[ConceptId], dir: Direction) -> HashSet<ConceptId> {
        let mut seen: HashSet<ConceptId> = HashSet::new();
        let mut queue: VecDeque<ConceptId> = start.iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            for next in self.neighbours(node, Relation::Genls, dir) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        for s in start {
            seen.remove(s);
        }
        seen
    }

    /// Concept plus all of its specializations and their instances.
    fn extension(&self, concept: ConceptId) -> HashSet<ConceptId> {
        let mut down = self.all_specializations(concept);
        down.insert(concept);
        let instances: Vec<ConceptId> = down
            .iter()
            .flat_map(|c| self.neighbours(*c, Relation::Isa, Direction::Incoming))
            .collect();
        down.extend(instances);
        down
    }

    /// Concept plus everything it inherits disjointness from.
    fn upward(&self, concept: ConceptId) -> HashSet<ConceptId> {
        let mut up = self.all_generalizations(concept);
        up.extend(self.all_types(concept));
        up.insert(concept);
        up
    }

    /// Keep only the members that do not generalize another member.
    fn most_specific(&self, set: Vec<ConceptId>) -> HashSet<ConceptId> {
        let all: HashSet<ConceptId> = set.iter().copied().collect();
        set.into_iter()
            .filter(|c| {
                !all.iter()
                    .any(|other| other != c && self.all_generalizations(*other).contains(c))
            })
            .collect()
    }

    fn depth_memo(
        &self,
        concept: ConceptId,
        memo: &mut HashMap<ConceptId, Option<u32>>,
        visiting: &mut HashSet<ConceptId>,
    ) -> Option<u32> {
        if let Some(d) = memo.get(&concept) {
            return *d;
        }
        if let Some(d) = self.depths.get(&concept) {
            return *d.value();
        }
        if self.kind(concept)? == ConceptKind::Function || !visiting.insert(concept) {
            return None;
        }
        let mut parents = self.neighbours(concept, Relation::Genls, Direction::Outgoing);
        parents.extend(self.neighbours(concept, Relation::Isa, Direction::Outgoing));
        let depth = if parents.is_empty() {
            Some(0)
        } else {
            parents
                .into_iter()
                .filter_map(|p| self.depth_memo(p, memo, visiting))
                .max()
                .map(|d| d + 1)
        };
        visiting.remove(&concept);
        memo.insert(concept, depth);
        depth
    }

    fn kind(&self, concept: ConceptId) -> Option<ConceptKind> {
        self.concepts.get(&concept).map(|r| r.value().kind)
    }

    /// Build a taxonomy from a name-based snapshot.
    pub fn from_snapshot(snapshot: &TaxonomySnapshot) -> DisjointResult<Self> {
        let taxonomy = Self::new();
        for concept in &snapshot.concepts {
            taxonomy.add_concept(concept.kind, &concept.name)?;
        }
        let lookup = |name: &str| {
            taxonomy
                .find_concept(name)
                .ok_or_else(|| TaxonomyError::Snapshot {
                    message: format!("edge references undeclared concept \"{name}\""),
                })
        };
        for [spec, general] in &snapshot.genls {
            taxonomy.add_genls(lookup(spec.as_str())?, lookup(general.as_str())?)?;
        }
        for [instance, collection] in &snapshot.isa {
            taxonomy.add_isa(lookup(instance.as_str())?, lookup(collection.as_str())?)?;
        }
        for [a, b] in &snapshot.disjoint {
            taxonomy.add_disjoint(lookup(a.as_str())?, lookup(b.as_str())?)?;
        }
        tracing::info!(
            concepts = taxonomy.concept_count(),
            disjoint = snapshot.disjoint.len(),
            "taxonomy snapshot loaded"
        );
        Ok(taxonomy)
    }

    /// Load a JSON snapshot from disk.
    pub fn load_json(path: &Path) -> DisjointResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TaxonomyError::Snapshot {
            message: format!("{}: {e}", path.display()),
        })?;
        let snapshot: TaxonomySnapshot =
            serde_json::from_str(&content).map_err(|e| TaxonomyError::Snapshot {
                message: format!("{}: {e}", path.display()),
            })?;
        Self::from_snapshot(&snapshot)
    }
}

impl Taxonomy for MemoryTaxonomy {
    fn prove(&self, relation: Relation, arg1: ConceptId, arg2: ConceptId) -> bool {
        match relation {
            Relation::Genls => arg1 == arg2 || self.all_generalizations(arg1).contains(&arg2),
            Relation::Isa => self.all_types(arg1).contains(&arg2),
            Relation::DisjointWith => {
                if arg1 == arg2 {
                    return false;
                }
                let left = self.upward(arg1);
                let right = self.upward(arg2);
                left.iter().any(|x| {
                    right
                        .iter()
                        .any(|y| self.disjoint_pairs.contains(&ConceptPair::new(*x, *y)))
                })
            }
        }
    }

    fn is_conjoint(&self, a: ConceptId, b: ConceptId) -> bool {
        if a == b {
            return true;
        }
        let left = self.extension(a);
        let right = self.extension(b);
        !left.is_disjoint(&right)
    }

    fn min_generalizations(&self, concept: ConceptId) -> HashSet<ConceptId> {
        self.most_specific(self.neighbours(concept, Relation::Genls, Direction::Outgoing))
    }

    fn max_specializations(&self, concept: ConceptId) -> HashSet<ConceptId> {
        let children = self.neighbours(concept, Relation::Genls, Direction::Incoming);
        let all: HashSet<ConceptId> = children.iter().copied().collect();
        children
            .into_iter()
            .filter(|c| {
                !all.iter()
                    .any(|other| other != c && self.all_specializations(*other).contains(c))
            })
            .collect()
    }

    fn all_generalizations(&self, concept: ConceptId) -> HashSet<ConceptId> {
        self.genls_closure(&[concept], Direction::Outgoing)
    }

    fn all_specializations(&self, concept: ConceptId) -> HashSet<ConceptId> {
        self.genls_closure(&[concept], Direction::Incoming)
    }

    fn min_types(&self, concept: ConceptId) -> HashSet<ConceptId> {
        self.most_specific(self.neighbours(concept, Relation::Isa, Direction::Outgoing))
    }

    fn all_types(&self, concept: ConceptId) -> HashSet<ConceptId> {
        let direct = self.neighbours(concept, Relation::Isa, Direction::Outgoing);
        let mut types = self.genls_closure(&direct, Direction::Outgoing);
        types.extend(direct);
        types
    }

    fn depth(&self, concept: ConceptId) -> Option<u32> {
        if let Some(d) = self.depths.get(&concept) {
            return *d.value();
        }
        let epoch = self.depth_epoch.load(Ordering::SeqCst);
        let mut memo = HashMap::new();
        let depth = self.depth_memo(concept, &mut memo, &mut HashSet::new());

        // Edges are added under the write lock, so no edge lands between the
        // epoch check and the inserts below.
        let _graph = self.graph.read().expect("taxonomy lock poisoned");
        if self.depth_epoch.load(Ordering::SeqCst) == epoch {
            for (c, d) in memo {
                self.depths.insert(c, d);
            }
        }
        depth
    }

    fn label(&self, concept: ConceptId) -> String {
        self.concepts
            .get(&concept)
            .map(|r| r.value().label.clone())
            .unwrap_or_else(|| concept.to_string())
    }

    fn find_concept(&self, name: &str) -> Option<ConceptId> {
        self.labels.get(&name.to_lowercase()).map(|r| *r.value())
    }

    fn is_individual(&self, concept: ConceptId) -> bool {
        self.kind(concept) == Some(ConceptKind::Individual)
    }

    fn create_fact(&self, fact: Fact) -> DisjointResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TaxonomyError::WriteFailed {
                message: "store temporarily unavailable".into(),
            }
            .into());
        }
        self.require(fact.arg1)?;
        self.require(fact.arg2)?;
        match fact.relation {
            Relation::DisjointWith => {
                self.record_disjoint(fact);
                Ok(())
            }
            Relation::Genls => self.add_genls(fact.arg1, fact.arg2),
            Relation::Isa => self.add_isa(fact.arg1, fact.arg2),
        }
    }

    fn facts(&self, relation: Relation) -> Vec<Fact> {
        if relation == Relation::DisjointWith {
            return self
                .disjoint_facts
                .read()
                .expect("taxonomy lock poisoned")
                .clone();
        }
        let graph = self.graph.read().expect("taxonomy lock poisoned");
        graph
            .edge_references()
            .filter(|e| *e.weight() == relation)
            .filter_map(|e| {
                Some(Fact {
                    relation,
                    arg1: *graph.node_weight(e.source())?,
                    arg2: *graph.node_weight(e.target())?,
                    provenance: Provenance::Curated,
                })
            })
            .collect()
    }
}

impl Default for MemoryTaxonomy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTaxonomy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTaxonomy")
            .field("concepts", &self.concept_count())
            .field("disjoint", &self.disjoint_pairs.len())
            .finish()
    }
}

/// Name-based, serializable description of a taxonomy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    pub concepts: Vec<SnapshotConcept>,
    /// `[spec, general]` pairs.
    #[serde(default)]
    pub genls: Vec<[String; 2]>,
    /// `[instance, collection]` pairs.
    #[serde(default)]
    pub isa: Vec<[String; 2]>,
    #[serde(default)]
    pub disjoint: Vec<[String; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConcept {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ConceptKind,
}

fn default_kind() -> ConceptKind {
    ConceptKind::Collection
}
