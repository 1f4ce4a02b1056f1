use crate::lifted::GroundAtom;
use deneb_collections::create_ref_type;
use deneb_collections::set::IdSet;
use std::ops::Index;

create_ref_type!(FactId);

/// A propositional atom of the grounded task.
///
/// Facts are immutable after creation except for the global renumbering
/// performed by [`Facts::sort_by_name`] and [`Facts::delete`].
#[derive(Clone)]
pub struct Fact {
    pub name: String,
    /// The ground atom this fact was created from, if any. Facts introduced
    /// by compilations (negations) have none.
    pub ground_atom: Option<GroundAtom>,
    /// The negation fact introduced by the conditional-effect compilation.
    pub neg_of: Option<FactId>,
    pub is_private: bool,
}

impl Fact {
    pub fn new(name: impl Into<String>) -> Fact {
        Fact {
            name: name.into(),
            ground_atom: None,
            neg_of: None,
            is_private: false,
        }
    }

    pub fn with_atom(name: impl Into<String>, atom: GroundAtom) -> Fact {
        Fact {
            name: name.into(),
            ground_atom: Some(atom),
            neg_of: None,
            is_private: false,
        }
    }
}

/// Mapping from the ids before a renumbering to the ids after it.
/// Deleted facts map to `None`.
pub type FactRemap = Vec<Option<FactId>>;

#[derive(Default, Clone)]
pub struct Facts {
    facts: Vec<Fact>,
}

impl Facts {
    pub fn add(&mut self, fact: Fact) -> FactId {
        self.facts.push(fact);
        FactId::from(self.facts.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FactId> {
        (0..self.facts.len()).map(FactId::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = (FactId, &Fact)> {
        self.facts.iter().enumerate().map(|(i, f)| (FactId::from(i), f))
    }

    pub fn get_mut(&mut self, id: FactId) -> &mut Fact {
        &mut self.facts[usize::from(id)]
    }

    /// Sorts facts by name and returns the id remap (old id -> new id).
    /// `neg_of` cross-references are rewritten.
    pub fn sort_by_name(&mut self) -> FactRemap {
        let mut order: Vec<usize> = (0..self.facts.len()).collect();
        order.sort_by(|&a, &b| self.facts[a].name.cmp(&self.facts[b].name));

        let mut remap: FactRemap = vec![None; self.facts.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = Some(FactId::from(new));
        }

        let mut sorted = Vec::with_capacity(self.facts.len());
        for &old in &order {
            sorted.push(self.facts[old].clone());
        }
        self.facts = sorted;
        self.rewrite_neg_of(&remap);
        remap
    }

    /// Removes the given facts, compacting ids monotonically.
    /// Returns the remap; deleted facts map to `None`.
    pub fn delete(&mut self, del: &IdSet<FactId>) -> FactRemap {
        let mut remap: FactRemap = vec![None; self.facts.len()];
        let mut kept = Vec::with_capacity(self.facts.len().saturating_sub(del.len()));
        for (i, fact) in self.facts.drain(..).enumerate() {
            let id = FactId::from(i);
            if !del.contains(id) {
                remap[i] = Some(FactId::from(kept.len()));
                kept.push(fact);
            }
        }
        self.facts = kept;
        self.rewrite_neg_of(&remap);
        remap
    }

    fn rewrite_neg_of(&mut self, remap: &FactRemap) {
        for fact in &mut self.facts {
            fact.neg_of = fact.neg_of.and_then(|old| remap[usize::from(old)]);
        }
    }
}

impl Index<FactId> for Facts {
    type Output = Fact;

    fn index(&self, id: FactId) -> &Fact {
        &self.facts[usize::from(id)]
    }
}
