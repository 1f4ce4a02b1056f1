use crate::mgroup::MGroups;
use crate::strips::{FactId, FactRemap};
use fixedbitset::FixedBitSet;
use itertools::Itertools;

/// Symmetric mutex relation over fact ids.
///
/// `(f, f)` is only ever stored for unreachable facts (a fact that cannot be
/// true at all is mutex with itself).
#[derive(Clone)]
pub struct MutexPairs {
    n: usize,
    bits: FixedBitSet,
    count: usize,
}

impl MutexPairs {
    pub fn new(num_facts: usize) -> MutexPairs {
        MutexPairs {
            n: num_facts,
            bits: FixedBitSet::with_capacity(num_facts * num_facts),
            count: 0,
        }
    }

    pub fn num_facts(&self) -> usize {
        self.n
    }

    /// Number of distinct stored pairs (unreachable facts count once).
    pub fn num_mutex_pairs(&self) -> usize {
        self.count
    }

    fn index(&self, f: FactId, g: FactId) -> usize {
        let (a, b) = (usize::from(f), usize::from(g));
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        lo * self.n + hi
    }

    pub fn add(&mut self, f: FactId, g: FactId) {
        let idx = self.index(f, g);
        if !self.bits.contains(idx) {
            self.bits.insert(idx);
            self.count += 1;
        }
    }

    pub fn is_mutex(&self, f: FactId, g: FactId) -> bool {
        self.bits.contains(self.index(f, g))
    }

    /// True if `f` is mutex with some member of the set (or unreachable).
    pub fn is_mutex_with_set(
        &self,
        f: FactId,
        set: &deneb_collections::set::IdSet<FactId>,
    ) -> bool {
        set.iter().any(|g| self.is_mutex(f, g))
    }

    /// True if the set contains a mutex pair (including an unreachable member).
    pub fn has_mutex_within(&self, set: &deneb_collections::set::IdSet<FactId>) -> bool {
        let members: Vec<FactId> = set.iter().collect();
        members.iter().any(|&f| self.is_mutex(f, f))
            || members
                .iter()
                .tuple_combinations()
                .any(|(&f, &g)| self.is_mutex(f, g))
    }

    /// Marks every pair within every mutex group.
    pub fn add_mgroups(&mut self, mgroups: &MGroups) {
        for mg in mgroups.iter() {
            let members: Vec<FactId> = mg.facts.iter().collect();
            for (i, &f) in members.iter().enumerate() {
                for &g in &members[i + 1..] {
                    self.add(f, g);
                }
            }
        }
    }

    /// Rebuilds the relation after a fact renumbering.
    pub fn reduce(&mut self, remap: &FactRemap, new_num_facts: usize) {
        let mut next = MutexPairs::new(new_num_facts);
        for a in 0..self.n {
            let Some(na) = remap[a] else { continue };
            for b in a..self.n {
                let Some(nb) = remap[b] else { continue };
                if self.bits.contains(a * self.n + b) {
                    next.add(na, nb);
                }
            }
        }
        *self = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deneb_collections::set::IdSet;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    #[test]
    fn symmetric_and_counted_once() {
        let mut m = MutexPairs::new(4);
        m.add(fid(2), fid(0));
        assert!(m.is_mutex(fid(0), fid(2)));
        assert!(m.is_mutex(fid(2), fid(0)));
        m.add(fid(0), fid(2));
        assert_eq!(m.num_mutex_pairs(), 1);
    }

    #[test]
    fn set_queries() {
        let mut m = MutexPairs::new(4);
        m.add(fid(0), fid(1));
        let set: IdSet<FactId> = [fid(1), fid(3)].into_iter().collect();
        assert!(m.is_mutex_with_set(fid(0), &set));
        assert!(!m.is_mutex_with_set(fid(2), &set));
        let pair: IdSet<FactId> = [fid(0), fid(1)].into_iter().collect();
        assert!(m.has_mutex_within(&pair));
        // a self-mutex (unreachable fact) is detected too
        let mut m2 = MutexPairs::new(4);
        m2.add(fid(3), fid(3));
        let single: IdSet<FactId> = [fid(3)].into_iter().collect();
        assert!(m2.has_mutex_within(&single));
    }

    #[test]
    fn reduce_keeps_surviving_pairs() {
        let mut m = MutexPairs::new(3);
        m.add(fid(0), fid(2));
        m.add(fid(1), fid(2));
        // fact 1 disappears, 2 becomes 1
        let remap = vec![Some(fid(0)), None, Some(fid(1))];
        m.reduce(&remap, 2);
        assert!(m.is_mutex(fid(0), fid(1)));
        assert_eq!(m.num_mutex_pairs(), 1);
    }
}
