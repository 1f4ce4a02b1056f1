use crate::ref_store::Ref;
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Ordered set of references, stored as a sorted duplicate-free vector.
///
/// This is the working representation for fact sets and operator sets:
/// cheap ordered iteration, merge-based set algebra, and lexicographic
/// comparison (used when sorting operators).
pub struct IdSet<K> {
    elems: Vec<u32>,
    phantom: PhantomData<K>,
}

impl<K> Default for IdSet<K> {
    fn default() -> Self {
        IdSet {
            elems: Vec::new(),
            phantom: PhantomData,
        }
    }
}

impl<K> Clone for IdSet<K> {
    fn clone(&self) -> Self {
        IdSet {
            elems: self.elems.clone(),
            phantom: PhantomData,
        }
    }
}

impl<K> PartialEq for IdSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.elems == other.elems
    }
}
impl<K> Eq for IdSet<K> {}

impl<K> PartialOrd for IdSet<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> Ord for IdSet<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elems.cmp(&other.elems)
    }
}

impl<K> std::hash::Hash for IdSet<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.elems.hash(state);
    }
}

impl<K: Ref> IdSet<K> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn clear(&mut self) {
        self.elems.clear();
    }

    pub fn add(&mut self, k: K) {
        let id = k.into() as u32;
        if let Err(pos) = self.elems.binary_search(&id) {
            self.elems.insert(pos, id);
        }
    }

    pub fn remove(&mut self, k: K) {
        let id = k.into() as u32;
        if let Ok(pos) = self.elems.binary_search(&id) {
            self.elems.remove(pos);
        }
    }

    pub fn contains(&self, k: K) -> bool {
        let id = k.into() as u32;
        self.elems.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = K> + '_ {
        self.elems.iter().map(|&i| K::from(i as usize))
    }

    /// In-place union with `other`.
    pub fn union_with(&mut self, other: &IdSet<K>) {
        if other.elems.is_empty() {
            return;
        }
        let merged = merge(&self.elems, &other.elems, |in_a, in_b| in_a || in_b);
        self.elems = merged;
    }

    /// In-place difference: removes all members of `other`.
    pub fn minus(&mut self, other: &IdSet<K>) {
        if self.elems.is_empty() || other.elems.is_empty() {
            return;
        }
        let merged = merge(&self.elems, &other.elems, |in_a, in_b| in_a && !in_b);
        self.elems = merged;
    }

    /// In-place intersection with `other`.
    pub fn intersect_with(&mut self, other: &IdSet<K>) {
        let merged = merge(&self.elems, &other.elems, |in_a, in_b| in_a && in_b);
        self.elems = merged;
    }

    pub fn union(&self, other: &IdSet<K>) -> IdSet<K> {
        let mut res = self.clone();
        res.union_with(other);
        res
    }

    pub fn intersection(&self, other: &IdSet<K>) -> IdSet<K> {
        let mut res = self.clone();
        res.intersect_with(other);
        res
    }

    pub fn difference(&self, other: &IdSet<K>) -> IdSet<K> {
        let mut res = self.clone();
        res.minus(other);
        res
    }

    /// Number of elements common to both sets, without materializing the intersection.
    pub fn intersection_size(&self, other: &IdSet<K>) -> usize {
        let mut count = 0;
        let mut i = 0;
        let mut j = 0;
        while i < self.elems.len() && j < other.elems.len() {
            match self.elems[i].cmp(&other.elems[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    count += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        count
    }

    pub fn is_disjoint(&self, other: &IdSet<K>) -> bool {
        self.intersection_size(other) == 0
    }

    pub fn is_subset(&self, other: &IdSet<K>) -> bool {
        self.intersection_size(other) == self.len()
    }

    /// Rewrites every member through `map`; members mapped to `None` are dropped.
    /// The result is re-sorted, so non-monotone maps are allowed.
    pub fn remap(&mut self, map: impl Fn(K) -> Option<K>) {
        let mut mapped: Vec<u32> = self
            .elems
            .iter()
            .filter_map(|&i| map(K::from(i as usize)).map(|k| k.into() as u32))
            .collect();
        mapped.sort_unstable();
        mapped.dedup();
        self.elems = mapped;
    }
}

/// Linear merge of two sorted sequences, keeping the values selected by `keep`.
fn merge(a: &[u32], b: &[u32], keep: impl Fn(bool, bool) -> bool) -> Vec<u32> {
    let mut res = Vec::with_capacity(a.len().max(b.len()));
    let mut i = 0;
    let mut j = 0;
    while i < a.len() || j < b.len() {
        if j >= b.len() || (i < a.len() && a[i] < b[j]) {
            if keep(true, false) {
                res.push(a[i]);
            }
            i += 1;
        } else if i >= a.len() || b[j] < a[i] {
            if keep(false, true) {
                res.push(b[j]);
            }
            j += 1;
        } else {
            if keep(true, true) {
                res.push(a[i]);
            }
            i += 1;
            j += 1;
        }
    }
    res
}

impl<K: Ref> FromIterator<K> for IdSet<K> {
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        let mut elems: Vec<u32> = iter.into_iter().map(|k| k.into() as u32).collect();
        elems.sort_unstable();
        elems.dedup();
        IdSet {
            elems,
            phantom: PhantomData,
        }
    }
}

impl<K: Ref> Extend<K> for IdSet<K> {
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for k in iter {
            self.add(k);
        }
    }
}

impl<K: Ref + Debug> Debug for IdSet<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
