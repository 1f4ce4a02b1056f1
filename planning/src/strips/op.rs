use crate::strips::fact::{FactId, FactRemap};
use deneb_collections::create_ref_type;
use deneb_collections::set::IdSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

create_ref_type!(OpId);

/// An effect triggered only when its own precondition holds in the state
/// the operator is applied to.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CondEff {
    pub pre: IdSet<FactId>,
    pub add: IdSet<FactId>,
    pub del: IdSet<FactId>,
}

/// A ground operator.
#[derive(Clone)]
pub struct Operator {
    pub name: String,
    pub cost: u32,
    pub pre: IdSet<FactId>,
    pub add: IdSet<FactId>,
    pub del: IdSet<FactId>,
    pub cond_eff: Vec<CondEff>,
}

impl Operator {
    pub fn new(name: impl Into<String>) -> Operator {
        Operator {
            name: name.into(),
            cost: 1,
            pre: IdSet::new(),
            add: IdSet::new(),
            del: IdSet::new(),
            cond_eff: Vec::new(),
        }
    }

    /// Establishes `del ∩ add = ∅` and `add ∩ pre = ∅`.
    pub fn normalize(&mut self) {
        self.del.minus(&self.add);
        self.add.minus(&self.pre);
    }

    /// True if applying the operator can never change a state.
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.del.is_empty() && self.cond_eff.is_empty()
    }

    pub fn clone_without_cond_eff(&self) -> Operator {
        Operator {
            name: self.name.clone(),
            cost: self.cost,
            pre: self.pre.clone(),
            add: self.add.clone(),
            del: self.del.clone(),
            cond_eff: Vec::new(),
        }
    }

    pub fn remap_facts(&mut self, remap: &FactRemap) {
        let map = |f: FactId| remap[usize::from(f)];
        self.pre.remap(map);
        self.add.remap(map);
        self.del.remap(map);
        for ce in &mut self.cond_eff {
            ce.pre.remap(map);
            ce.add.remap(map);
            ce.del.remap(map);
        }
    }

    /// Removes the given facts from all sets. A conditional effect whose
    /// precondition becomes empty merges into the main effects.
    pub fn remove_facts(&mut self, facts: &IdSet<FactId>) {
        self.pre.minus(facts);
        self.add.minus(facts);
        self.del.minus(facts);

        let mut merged = false;
        for ce in &mut self.cond_eff {
            ce.pre.minus(facts);
            ce.add.minus(facts);
            ce.del.minus(facts);
            if ce.pre.is_empty() {
                self.add.union_with(&ce.add);
                self.del.union_with(&ce.del);
                merged = true;
            }
        }
        if merged {
            self.cond_eff.retain(|ce| !ce.pre.is_empty());
            self.normalize();
        }
    }

    /// Structural equality on pre/add/del and the ordered conditional effects.
    /// The name and the cost do not participate.
    pub fn same_effects(&self, other: &Operator) -> bool {
        self.pre == other.pre
            && self.add == other.add
            && self.del == other.del
            && self.cond_eff == other.cond_eff
    }

    /// Hash of the structural identity, built from the sorted element
    /// sequences of all sets with a delimiter between blocks.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut feed = |set: &IdSet<FactId>| {
            for f in set.iter() {
                usize::from(f).hash(&mut hasher);
            }
            usize::MAX.hash(&mut hasher);
        };
        feed(&self.pre);
        feed(&self.add);
        feed(&self.del);
        for ce in &self.cond_eff {
            feed(&ce.pre);
            feed(&ce.add);
            feed(&ce.del);
        }
        hasher.finish()
    }
}

/// The operator store. Operators are addressed by [`OpId`]; ids are
/// compacted on every deletion.
#[derive(Default, Clone)]
pub struct Operators {
    ops: Vec<Operator>,
}

impl Operators {
    pub fn new() -> Self {
        Default::default()
    }

    /// Normalizes and stores the operator; no-op operators are discarded.
    pub fn add(&mut self, mut op: Operator) -> Option<OpId> {
        op.normalize();
        if op.is_noop() {
            return None;
        }
        self.ops.push(op);
        Some(OpId::from(self.ops.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = OpId> {
        (0..self.ops.len()).map(OpId::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operator> {
        self.ops.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Operator> {
        self.ops.iter_mut()
    }

    pub fn entries(&self) -> impl Iterator<Item = (OpId, &Operator)> {
        self.ops.iter().enumerate().map(|(i, o)| (OpId::from(i), o))
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Drops the given operators, compacting ids monotonically.
    pub fn delete(&mut self, del: &IdSet<OpId>) {
        if del.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.ops.len().saturating_sub(del.len()));
        for (i, op) in self.ops.drain(..).enumerate() {
            if !del.contains(OpId::from(i)) {
                kept.push(op);
            }
        }
        self.ops = kept;
    }

    pub fn remap_facts(&mut self, remap: &FactRemap) {
        for op in &mut self.ops {
            op.remap_facts(remap);
        }
    }

    pub fn remove_facts(&mut self, facts: &IdSet<FactId>) {
        for op in &mut self.ops {
            op.remove_facts(facts);
        }
    }

    /// Removes duplicate operators, keeping for each structural equivalence
    /// class the representative with the lowest cost.
    pub fn deduplicate(&mut self) {
        let mut keyed: Vec<(u64, u32, usize)> = self
            .ops
            .iter()
            .enumerate()
            .map(|(i, op)| (op.structural_hash(), op.cost, i))
            .collect();
        keyed.sort_unstable();

        let mut remove: IdSet<OpId> = IdSet::new();
        let mut start = 0;
        while start < keyed.len() {
            let mut end = start + 1;
            while end < keyed.len() && keyed[end].0 == keyed[start].0 {
                end += 1;
            }
            // within a hash group, the lowest-cost entry comes first
            for i in start..end {
                let (_, _, a) = keyed[i];
                if remove.contains(OpId::from(a)) {
                    continue;
                }
                for &(_, _, b) in &keyed[i + 1..end] {
                    if !remove.contains(OpId::from(b)) && self.ops[a].same_effects(&self.ops[b]) {
                        remove.add(OpId::from(b));
                    }
                }
            }
            start = end;
        }
        self.delete(&remove);
    }

    /// Sorts operators by name, then preconditions and effects, so that the
    /// emitted task is deterministic.
    pub fn sort(&mut self) {
        self.ops.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.pre.cmp(&b.pre))
                .then_with(|| a.add.cmp(&b.add))
                .then_with(|| a.del.cmp(&b.del))
        });
    }
}

impl Index<OpId> for Operators {
    type Output = Operator;

    fn index(&self, id: OpId) -> &Operator {
        &self.ops[usize::from(id)]
    }
}

impl IndexMut<OpId> for Operators {
    fn index_mut(&mut self, id: OpId) -> &mut Operator {
        &mut self.ops[usize::from(id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(i: usize) -> FactId {
        FactId::from(i)
    }

    fn op(name: &str, cost: u32, pre: &[usize], add: &[usize], del: &[usize]) -> Operator {
        let mut o = Operator::new(name);
        o.cost = cost;
        o.pre = pre.iter().map(|&i| fact(i)).collect();
        o.add = add.iter().map(|&i| fact(i)).collect();
        o.del = del.iter().map(|&i| fact(i)).collect();
        o
    }

    #[test]
    fn normalization_invariants() {
        let mut o = op("a", 1, &[0, 1], &[1, 2], &[2, 3]);
        o.normalize();
        // del \ add, then add \ pre
        assert!(o.del.is_disjoint(&o.add));
        assert!(o.add.is_disjoint(&o.pre));
        assert_eq!(o.del.iter().collect::<Vec<_>>(), vec![fact(3)]);
        assert_eq!(o.add.iter().collect::<Vec<_>>(), vec![fact(2)]);
    }

    #[test]
    fn add_discards_noops() {
        let mut ops = Operators::new();
        assert!(ops.add(op("noop", 1, &[0], &[0], &[])).is_none());
        assert!(ops.add(op("real", 1, &[0], &[1], &[])).is_some());
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn dedup_keeps_the_cheapest() {
        let mut ops = Operators::new();
        ops.add(op("expensive", 5, &[0], &[1], &[]));
        ops.add(op("cheap", 2, &[0], &[1], &[]));
        ops.add(op("other", 1, &[0], &[2], &[]));
        ops.deduplicate();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|o| o.name == "cheap"));
        assert!(ops.iter().all(|o| o.name != "expensive"));
    }

    #[test]
    fn removing_facts_merges_unguarded_cond_effs() {
        let mut o = op("a", 1, &[0], &[], &[]);
        o.cond_eff.push(CondEff {
            pre: [fact(3)].into_iter().collect(),
            add: [fact(4)].into_iter().collect(),
            del: IdSet::new(),
        });
        let mut gone = IdSet::new();
        gone.add(fact(3));
        o.remove_facts(&gone);
        assert!(o.cond_eff.is_empty());
        assert!(o.add.contains(fact(4)));
    }

    #[test]
    fn delete_compacts_ids() {
        let mut ops = Operators::new();
        let a = ops.add(op("a", 1, &[0], &[1], &[])).unwrap();
        let b = ops.add(op("b", 1, &[0], &[2], &[])).unwrap();
        let c = ops.add(op("c", 1, &[0], &[3], &[])).unwrap();
        let mut del = IdSet::new();
        del.add(b);
        ops.delete(&del);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[a].name, "a");
        // ids were compacted: the former `c` now sits at index 1
        assert_eq!(ops[OpId::from(1usize)].name, "c");
        let _ = c;
    }
}
