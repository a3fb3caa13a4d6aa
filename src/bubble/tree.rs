//! Arena-backed candidate tree of a source concept's admissible ancestors.
//!
//! Node 0 is the source concept itself. Its descendants in the tree are
//! ancestors in the taxonomy, discovered breadth-first through minimal
//! generalizations. Abstract or non-tangible ancestors are pruned together
//! with everything above them; a concept reachable along several paths is
//! attached under the first parent that reaches it.
//!
//! Nodes carry two flags. `explored` gates matching and is reset by
//! [`CandidateTree::begin_pass`]. `cut` marks a subtree proven conjoint with
//! the current target and survives a reset for that same target.

use std::collections::{HashMap, VecDeque};

use crate::abstractness::AbstractnessFilter;
use crate::concept::ConceptId;
use crate::taxonomy::{Taxonomy, TaxonomyRoots};

#[derive(Debug, Clone)]
pub struct CandidateNode {
    pub concept: ConceptId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Breadth-first distance from the source.
    pub level: usize,
    /// Has more direct specializations than the maturity minimum.
    pub mature: bool,
    explored: bool,
    cut: bool,
}

impl CandidateNode {
    pub fn is_explored(&self) -> bool {
        self.explored
    }

    pub fn is_cut(&self) -> bool {
        self.cut
    }
}

#[derive(Debug)]
pub struct CandidateTree {
    nodes: Vec<CandidateNode>,
    index: HashMap<ConceptId, usize>,
    /// Target the current cut flags were computed against.
    cut_target: Option<ConceptId>,
}

impl CandidateTree {
    /// Build the tree above `source`.
    pub fn build(
        source: ConceptId,
        taxonomy: &dyn Taxonomy,
        roots: &TaxonomyRoots,
        abstractness: &AbstractnessFilter,
        min_maturity: usize,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            cut_target: None,
        };
        let root = tree.push(source, None, taxonomy, min_maturity);

        let mut queue = VecDeque::from([root]);
        while let Some(idx) = queue.pop_front() {
            let mut parents: Vec<ConceptId> = taxonomy
                .min_generalizations(tree.nodes[idx].concept)
                .into_iter()
                .collect();
            parents.sort();
            for parent in parents {
                if tree.index.contains_key(&parent) {
                    continue;
                }
                if !roots.is_tangible(taxonomy, parent) || abstractness.is_too_abstract(parent) {
                    tracing::trace!(concept = %taxonomy.label(parent), "ancestor pruned");
                    continue;
                }
                let child = tree.push(parent, Some(idx), taxonomy, min_maturity);
                queue.push_back(child);
            }
        }

        tracing::debug!(
            source = %taxonomy.label(source),
            nodes = tree.nodes.len(),
            "candidate tree built"
        );
        tree
    }

    fn push(
        &mut self,
        concept: ConceptId,
        parent: Option<usize>,
        taxonomy: &dyn Taxonomy,
        min_maturity: usize,
    ) -> usize {
        let idx = self.nodes.len();
        let level = parent.map_or(0, |p| self.nodes[p].level + 1);
        self.nodes.push(CandidateNode {
            concept,
            parent,
            children: Vec::new(),
            level,
            mature: taxonomy.max_specializations(concept).len() > min_maturity,
            explored: false,
            cut: false,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        self.index.insert(concept, idx);
        idx
    }

    /// Reset explored flags before matching against `target`.
    ///
    /// Cuts are kept when the target is unchanged and cleared otherwise. The
    /// source node is always explored: it is the seed, not a candidate.
    pub fn begin_pass(&mut self, target: ConceptId) {
        let keep_cuts = self.cut_target == Some(target);
        for node in &mut self.nodes {
            if !keep_cuts {
                node.cut = false;
            }
            node.explored = node.cut;
        }
        self.nodes[0].explored = true;
        self.cut_target = Some(target);
    }

    /// Claim the shallowest level that still has unexplored nodes.
    ///
    /// Every unexplored node on that level is marked explored; the mature
    /// ones are returned for evaluation. `None` once the tree is exhausted.
    /// An empty vector means the level held only immature nodes.
    pub fn next_level(&mut self) -> Option<Vec<(usize, ConceptId)>> {
        let level = self
            .nodes
            .iter()
            .filter(|n| !n.explored)
            .map(|n| n.level)
            .min()?;
        let mut batch = Vec::new();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if node.level == level && !node.explored {
                node.explored = true;
                if node.mature {
                    batch.push((idx, node.concept));
                }
            }
        }
        Some(batch)
    }

    /// Cut `idx` and every node above it in the tree.
    pub fn cut(&mut self, idx: usize) {
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            let node = &mut self.nodes[i];
            node.cut = true;
            node.explored = true;
            stack.extend(node.children.iter().copied());
        }
    }

    pub fn node(&self, idx: usize) -> &CandidateNode {
        &self.nodes[idx]
    }

    pub fn position(&self, concept: ConceptId) -> Option<usize> {
        self.index.get(&concept).copied()
    }

    pub fn contains(&self, concept: ConceptId) -> bool {
        self.index.contains_key(&concept)
    }

    pub fn source(&self) -> ConceptId {
        self.nodes[0].concept
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{AbstractnessConfig, SamplingConfig};
    use crate::taxonomy::memory::MemoryTaxonomy;

    struct Fixture {
        tax: Arc<MemoryTaxonomy>,
        roots: TaxonomyRoots,
        filter: AbstractnessFilter,
    }

    fn fixture(tax: MemoryTaxonomy) -> Fixture {
        let tax = Arc::new(tax);
        let roots = TaxonomyRoots::resolve(tax.as_ref(), "PartiallyTangible").unwrap();
        let filter = AbstractnessFilter::new(
            tax.clone(),
            AbstractnessConfig::default(),
            &SamplingConfig::default(),
        );
        Fixture { tax, roots, filter }
    }

    /// Thing > PartiallyTangible > Organism > Animal > Mammal > Dog,
    /// plus a non-tangible Pet above Dog.
    fn lineage() -> (MemoryTaxonomy, Vec<ConceptId>) {
        let tax = MemoryTaxonomy::new();
        let names = ["Thing", "PartiallyTangible", "Organism", "Animal", "Mammal", "Dog"];
        let ids: Vec<ConceptId> = names.iter().map(|n| tax.add_collection(n).unwrap()).collect();
        for w in ids.windows(2) {
            tax.add_genls(w[1], w[0]).unwrap();
        }
        let pet = tax.add_collection("Pet").unwrap();
        tax.add_genls(pet, ids[0]).unwrap();
        tax.add_genls(ids[5], pet).unwrap();
        // Give Mammal and Organism enough members to be mature.
        for i in 0..3 {
            let m = tax.add_collection(&format!("Mammal{i}")).unwrap();
            tax.add_genls(m, ids[4]).unwrap();
        }
        (tax, ids)
    }

    #[test]
    fn tree_keeps_only_tangible_ancestors() {
        let (tax, ids) = lineage();
        let f = fixture(tax);
        let tree = CandidateTree::build(ids[5], f.tax.as_ref(), &f.roots, &f.filter, 2);
        assert_eq!(tree.source(), ids[5]);
        assert!(tree.contains(ids[4]));
        assert!(tree.contains(ids[3]));
        assert!(tree.contains(ids[2]));
        assert!(!tree.contains(ids[1]), "the tangible root itself is excluded");
        assert!(!tree.contains(ids[0]));
        assert!(f.tax.find_concept("Pet").is_some_and(|pet| !tree.contains(pet)));
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.node(tree.position(ids[2]).unwrap()).level, 3);
    }

    #[test]
    fn levels_are_claimed_bottom_up_and_skip_immature() {
        let (tax, ids) = lineage();
        let f = fixture(tax);
        let mut tree = CandidateTree::build(ids[5], f.tax.as_ref(), &f.roots, &f.filter, 2);
        tree.begin_pass(ids[0]);

        // Mammal has Dog plus three siblings: mature.
        assert_eq!(tree.next_level(), Some(vec![(1, ids[4])]));
        // Animal and Organism each have a single child.
        assert_eq!(tree.next_level(), Some(vec![]));
        assert_eq!(tree.next_level(), Some(vec![]));
        assert_eq!(tree.next_level(), None);
    }

    #[test]
    fn cut_propagates_up_and_survives_reset_for_same_target() {
        let (tax, ids) = lineage();
        let f = fixture(tax);
        let mut tree = CandidateTree::build(ids[5], f.tax.as_ref(), &f.roots, &f.filter, 0);
        tree.begin_pass(ids[0]);
        let first = tree.next_level().unwrap();
        assert_eq!(first, vec![(1, ids[4])]);
        tree.cut(1);
        assert!(tree.node(tree.position(ids[2]).unwrap()).is_cut());
        assert_eq!(tree.next_level(), None);

        tree.begin_pass(ids[0]);
        assert_eq!(tree.next_level(), None);

        // A different target starts from a clean slate.
        tree.begin_pass(ids[1]);
        assert_eq!(tree.next_level(), Some(vec![(1, ids[4])]));
    }

    #[test]
    fn abstract_ancestor_is_pruned_with_everything_above() {
        let tax = MemoryTaxonomy::new();
        let thing = tax.add_collection("Thing").unwrap();
        let pt = tax.add_collection("PartiallyTangible").unwrap();
        tax.add_genls(pt, thing).unwrap();
        let artifact = tax.add_collection("Artifact").unwrap();
        tax.add_genls(artifact, pt).unwrap();
        let stuff = tax.add_collection("Stuff").unwrap();
        tax.add_genls(stuff, artifact).unwrap();
        let mut leaves = Vec::new();
        for i in 0..8 {
            let mut prev = pt;
            for level in 0..5 {
                let link = tax.add_collection(&format!("Line{i}-{level}")).unwrap();
                tax.add_genls(link, prev).unwrap();
                prev = link;
            }
            let child = tax.add_collection(&format!("Odd{i}")).unwrap();
            tax.add_genls(child, stuff).unwrap();
            tax.add_genls(child, prev).unwrap();
            leaves.push(child);
        }
        let leaf = leaves[0];
        let f = fixture(tax);
        assert!(f.filter.is_too_abstract(stuff));

        let tree = CandidateTree::build(leaf, f.tax.as_ref(), &f.roots, &f.filter, 0);
        assert!(!tree.contains(stuff));
        assert!(!tree.contains(artifact));
        assert!(f.tax.find_concept("Line0-4").is_some_and(|c| tree.contains(c)));
    }
}
