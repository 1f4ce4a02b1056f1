//! Symmetries of the grounded task, derived from automorphisms of the
//! problem description graph (PDG).
//!
//! The graph-automorphism engine itself is an external collaborator hidden
//! behind [`AutomorphismBackend`]; without a backend the symmetry features
//! are simply unavailable.

use crate::strips::{FactId, OpId, StripsTask};
use anyhow::{ensure, Result};
use deneb_collections::set::IdSet;
use tracing::info;

/// Minimal surface the symmetry detection needs from a graph-automorphism
/// library: build a vertex-labelled directed graph and enumerate generators.
pub trait AutomorphismBackend {
    fn add_vertex(&mut self, color: usize) -> usize;
    fn add_edge(&mut self, from: usize, to: usize);
    /// Calls `hook` once per automorphism generator; the slice maps each
    /// vertex to its image. Enumeration stops after `max_generators` hooks
    /// if a cap is given.
    fn find_automorphisms(&mut self, max_generators: Option<usize>, hook: &mut dyn FnMut(&[usize]));
}

/// One symmetry generator: permutations of facts and of operators that
/// preserve the task, with their inverses and the cycle decomposition of the
/// operator permutation.
pub struct SymGen {
    pub fact: Vec<FactId>,
    pub fact_inv: Vec<FactId>,
    pub op: Vec<OpId>,
    pub op_inv: Vec<OpId>,
    pub op_cycles: Vec<IdSet<OpId>>,
}

impl SymGen {
    fn from_vertex_map(aut: &[usize], fact_size: usize, op_size: usize) -> SymGen {
        let op_offset = 3 * fact_size;
        let mut fact: Vec<FactId> = (0..fact_size).map(FactId::from).collect();
        let mut fact_inv = fact.clone();
        for f1 in 0..fact_size {
            let f2 = aut[f1];
            debug_assert!(f2 < fact_size, "fact vertex mapped outside the fact block");
            fact[f1] = FactId::from(f2);
            fact_inv[f2] = FactId::from(f1);
        }
        let mut op: Vec<OpId> = (0..op_size).map(OpId::from).collect();
        let mut op_inv = op.clone();
        for o1 in 0..op_size {
            let o2 = aut[op_offset + o1] - op_offset;
            debug_assert!(o2 < op_size, "operator vertex mapped outside the operator block");
            op[o1] = OpId::from(o2);
            op_inv[o2] = OpId::from(o1);
        }
        let op_cycles = cycles_of(&op);
        SymGen {
            fact,
            fact_inv,
            op,
            op_inv,
            op_cycles,
        }
    }

    pub fn apply_fact_set(&self, set: &IdSet<FactId>) -> IdSet<FactId> {
        set.iter().map(|f| self.fact[usize::from(f)]).collect()
    }

    pub fn apply_op_set(&self, set: &IdSet<OpId>) -> IdSet<OpId> {
        set.iter().map(|o| self.op[usize::from(o)]).collect()
    }
}

/// Decomposition of a permutation into its non-trivial cycles.
fn cycles_of(perm: &[OpId]) -> Vec<IdSet<OpId>> {
    let mut used = vec![false; perm.len()];
    let mut cycles = Vec::new();
    for start in 0..perm.len() {
        if used[start] || usize::from(perm[start]) == start {
            continue;
        }
        let mut cycle = IdSet::new();
        let mut cur = start;
        while !used[cur] {
            used[cur] = true;
            cycle.add(OpId::from(cur));
            cur = usize::from(perm[cur]);
        }
        cycles.push(cycle);
    }
    cycles
}

/// The set of symmetry generators of a STRIPS task.
pub struct StripsSym {
    pub gens: Vec<SymGen>,
    pub fact_size: usize,
    pub op_size: usize,
}

impl StripsSym {
    /// Builds the PDG and harvests automorphism generators from the backend.
    ///
    /// Vertices: one per fact, then per fact a "true" and a "false" vertex
    /// (the true vertex colored by init/goal membership), then one vertex
    /// per operator colored by its cost. Edges: fact -> its value vertices;
    /// pre(true) -> op; op -> add(true); op -> del(false).
    pub fn from_pdg(
        strips: &StripsTask,
        backend: &mut dyn AutomorphismBackend,
        max_generators: Option<usize>,
    ) -> Result<StripsSym> {
        ensure!(
            !strips.has_cond_eff,
            "symmetry detection does not support conditional effects"
        );
        let fact_size = strips.facts.len();
        let op_size = strips.ops.len();

        const COLOR_INIT: usize = 1;
        const COLOR_GOAL: usize = 2;
        const COLOR_OP: usize = 4;

        for _ in 0..fact_size {
            backend.add_vertex(0); // fact vertex
        }
        for f in strips.facts.ids() {
            let mut color = 0;
            if strips.init.contains(f) {
                color |= COLOR_INIT;
            }
            if strips.goal.contains(f) {
                color |= COLOR_GOAL;
            }
            backend.add_vertex(color); // fact-true vertex
            backend.add_vertex(0); // fact-false vertex
        }
        for op in strips.ops.iter() {
            backend.add_vertex(COLOR_OP + op.cost as usize);
        }

        let vtrue = |f: FactId| fact_size + 2 * usize::from(f);
        let vfalse = |f: FactId| fact_size + 2 * usize::from(f) + 1;
        for f in strips.facts.ids() {
            backend.add_edge(usize::from(f), vtrue(f));
            backend.add_edge(usize::from(f), vfalse(f));
        }
        for (op_id, op) in strips.ops.entries() {
            let vop = 3 * fact_size + usize::from(op_id);
            for f in op.pre.iter() {
                backend.add_edge(vtrue(f), vop);
            }
            for f in op.add.iter() {
                backend.add_edge(vop, vtrue(f));
            }
            for f in op.del.iter() {
                backend.add_edge(vop, vfalse(f));
            }
        }

        let mut gens = Vec::new();
        backend.find_automorphisms(max_generators, &mut |aut| {
            gens.push(SymGen::from_vertex_map(aut, fact_size, op_size));
        });
        info!("Symmetry detection DONE: {} generators", gens.len());
        Ok(StripsSym {
            gens,
            fact_size,
            op_size,
        })
    }

    /// Closes the given family of fact sets under all generators. New images
    /// are appended; the original entries keep their positions.
    pub fn all_fact_set_symmetries(&self, sets: &mut Vec<IdSet<FactId>>) {
        self.close_under(sets, |gen, set| gen.apply_fact_set(set));
    }

    /// Closes the given family of operator sets under all generators.
    pub fn all_op_set_symmetries(&self, sets: &mut Vec<IdSet<OpId>>) {
        self.close_under(sets, |gen, set| gen.apply_op_set(set));
    }

    fn close_under<T: Clone + PartialEq>(
        &self,
        sets: &mut Vec<T>,
        apply: impl Fn(&SymGen, &T) -> T,
    ) {
        let mut queue: Vec<usize> = (0..sets.len()).collect();
        while let Some(i) = queue.pop() {
            for gen in &self.gens {
                let img = apply(gen, &sets[i]);
                if !sets.contains(&img) {
                    sets.push(img);
                    queue.push(sets.len() - 1);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::strips::tests::task;

    /// Backend stub that records the graph and replays pre-computed vertex
    /// permutations; stands in for a real automorphism engine.
    pub(crate) struct FixedBackend {
        pub vertices: Vec<usize>,
        pub edges: Vec<(usize, usize)>,
        pub automorphisms: Vec<Vec<usize>>,
    }

    impl FixedBackend {
        pub(crate) fn new(automorphisms: Vec<Vec<usize>>) -> FixedBackend {
            FixedBackend {
                vertices: Vec::new(),
                edges: Vec::new(),
                automorphisms,
            }
        }
    }

    impl AutomorphismBackend for FixedBackend {
        fn add_vertex(&mut self, color: usize) -> usize {
            self.vertices.push(color);
            self.vertices.len() - 1
        }

        fn add_edge(&mut self, from: usize, to: usize) {
            self.edges.push((from, to));
        }

        fn find_automorphisms(
            &mut self,
            max_generators: Option<usize>,
            hook: &mut dyn FnMut(&[usize]),
        ) {
            let cap = max_generators.unwrap_or(usize::MAX);
            for aut in self.automorphisms.iter().take(cap) {
                hook(aut);
            }
        }
    }

    /// Two independent, interchangeable switches: facts s1, s2; operators
    /// flip1, flip2. Swapping them is a task symmetry.
    fn symmetric_task() -> StripsTask {
        task(
            &["s1", "s2"],
            &[("flip1", &[], &[0], &[]), ("flip2", &[], &[1], &[])],
            &[],
            &[0, 1],
        )
    }

    /// The vertex permutation swapping facts 0/1 and operators 0/1 in the
    /// PDG layout (2 facts -> vertices 0..6, ops at 6..8).
    fn swap_permutation() -> Vec<usize> {
        vec![1, 0, 4, 5, 2, 3, 7, 6]
    }

    #[test]
    fn pdg_has_the_expected_shape() {
        let t = symmetric_task();
        let mut backend = FixedBackend::new(vec![]);
        StripsSym::from_pdg(&t, &mut backend, None).unwrap();
        // 3 vertices per fact + 1 per operator
        assert_eq!(backend.vertices.len(), 3 * 2 + 2);
        // fact->value edges + one add edge per operator
        assert_eq!(backend.edges.len(), 2 * 2 + 2);
    }

    #[test]
    fn generator_permutes_facts_and_ops_with_inverses() {
        let t = symmetric_task();
        let mut backend = FixedBackend::new(vec![swap_permutation()]);
        let sym = StripsSym::from_pdg(&t, &mut backend, None).unwrap();
        assert_eq!(sym.gens.len(), 1);
        let gen = &sym.gens[0];

        assert_eq!(gen.fact[0], FactId::from(1usize));
        assert_eq!(gen.fact_inv[1], FactId::from(0usize));
        assert_eq!(gen.op[0], OpId::from(1usize));
        assert_eq!(gen.op_cycles.len(), 1);
        assert_eq!(gen.op_cycles[0].len(), 2);

        // applying the generator to init and goal preserves them
        assert_eq!(gen.apply_fact_set(&t.init), t.init);
        assert_eq!(gen.apply_fact_set(&t.goal), t.goal);
    }

    #[test]
    fn fact_set_closure_adds_all_images() {
        let t = symmetric_task();
        let mut backend = FixedBackend::new(vec![swap_permutation()]);
        let sym = StripsSym::from_pdg(&t, &mut backend, None).unwrap();

        let mut sets: Vec<IdSet<FactId>> = vec![[FactId::from(0usize)].into_iter().collect()];
        sym.all_fact_set_symmetries(&mut sets);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1], [FactId::from(1usize)].into_iter().collect());

        let mut op_sets: Vec<IdSet<OpId>> = vec![[OpId::from(0usize)].into_iter().collect()];
        sym.all_op_set_symmetries(&mut op_sets);
        assert_eq!(op_sets.len(), 2);
        assert_eq!(op_sets[1], [OpId::from(1usize)].into_iter().collect());
    }

    #[test]
    fn generator_cap_limits_the_enumeration() {
        let t = symmetric_task();
        let mut backend = FixedBackend::new(vec![swap_permutation(), swap_permutation()]);
        let sym = StripsSym::from_pdg(&t, &mut backend, Some(1)).unwrap();
        assert_eq!(sym.gens.len(), 1);
    }
}
