//! h² reachability pruning: a pair of facts is reachable if some operator
//! can make both true starting from reachable pairs. Unreachable pairs are
//! mutexes; operators whose precondition contains a mutex pair are removed.

use crate::mgroup::MGroups;
use crate::mutex::MutexPairs;
use crate::strips::{FactId, OpId, StripsTask};
use anyhow::{ensure, Result};
use deneb_collections::set::IdSet;
use fixedbitset::FixedBitSet;
use tracing::info;

/// Symmetric table of fact pairs; the diagonal tracks single-fact
/// reachability.
struct PairTable {
    n: usize,
    bits: FixedBitSet,
}

impl PairTable {
    fn new(n: usize) -> PairTable {
        PairTable {
            n,
            bits: FixedBitSet::with_capacity(n * n),
        }
    }

    fn idx(&self, a: usize, b: usize) -> usize {
        if a <= b {
            a * self.n + b
        } else {
            b * self.n + a
        }
    }

    fn set(&mut self, a: usize, b: usize) -> bool {
        let i = self.idx(a, b);
        let fresh = !self.bits.contains(i);
        self.bits.insert(i);
        fresh
    }

    fn get(&self, a: usize, b: usize) -> bool {
        self.bits.contains(self.idx(a, b))
    }
}

/// The pair fixpoint: `seed` holds the initially reachable pairs, `ops` the
/// (pre, add, del) view of each operator, `alive` masks removed operators.
fn pair_fixpoint(
    n: usize,
    seed: PairTable,
    ops: &[(IdSet<FactId>, IdSet<FactId>, IdSet<FactId>)],
    alive: &[bool],
) -> PairTable {
    let mut reach = seed;
    let mut changed = true;
    while changed {
        changed = false;
        for (op_i, (pre, add, del)) in ops.iter().enumerate() {
            if !alive[op_i] {
                continue;
            }
            let pre_ids: Vec<usize> = pre.iter().map(usize::from).collect();
            let applicable = pre_ids
                .iter()
                .enumerate()
                .all(|(i, &p)| pre_ids[i..].iter().all(|&q| reach.get(p, q)));
            if !applicable {
                continue;
            }
            let add_ids: Vec<usize> = add.iter().map(usize::from).collect();
            for (i, &a) in add_ids.iter().enumerate() {
                for &b in &add_ids[i..] {
                    changed |= reach.set(a, b);
                }
            }
            for f in 0..n {
                if !reach.get(f, f)
                    || del.contains(FactId::from(f))
                    || add.contains(FactId::from(f))
                {
                    continue;
                }
                if pre_ids.iter().all(|&p| reach.get(f, p)) {
                    for &a in &add_ids {
                        changed |= reach.set(a, f);
                    }
                }
            }
        }
    }
    reach
}

fn forward_seed(task: &StripsTask) -> PairTable {
    let mut seed = PairTable::new(task.facts.len());
    let init: Vec<usize> = task.init.iter().map(usize::from).collect();
    for (i, &f) in init.iter().enumerate() {
        for &g in &init[i..] {
            seed.set(f, g);
        }
    }
    seed
}

fn op_views(task: &StripsTask) -> Vec<(IdSet<FactId>, IdSet<FactId>, IdSet<FactId>)> {
    task.ops
        .iter()
        .map(|op| (op.pre.clone(), op.add.clone(), op.del.clone()))
        .collect()
}

/// Reversed operators for the backward pass: applying an operator backwards
/// requires its add effects, re-establishes its precondition, and may
/// restore anything it deleted.
fn reversed_op_views(task: &StripsTask) -> Vec<(IdSet<FactId>, IdSet<FactId>, IdSet<FactId>)> {
    task.ops
        .iter()
        .map(|op| {
            let pre = op.add.clone();
            let add = op.pre.union(&op.del);
            let del = op.add.clone();
            (pre, add, del)
        })
        .collect()
}

/// Harvests new mutexes from a fixpoint and kills operators whose relevant
/// set contains a mutex pair. Returns true if anything changed.
fn harvest(
    n: usize,
    reach: &PairTable,
    relevant: impl Fn(usize) -> IdSet<FactId>,
    mutex: &mut MutexPairs,
    alive: &mut [bool],
) -> bool {
    let mut changed = false;
    for a in 0..n {
        for b in a..n {
            if !reach.get(a, b) && !mutex.is_mutex(FactId::from(a), FactId::from(b)) {
                mutex.add(FactId::from(a), FactId::from(b));
                changed = true;
            }
        }
    }
    for op_i in 0..alive.len() {
        if alive[op_i] && mutex.has_mutex_within(&relevant(op_i)) {
            alive[op_i] = false;
            changed = true;
        }
    }
    changed
}

fn collect_results(
    task: &StripsTask,
    mutex: &MutexPairs,
    alive: &[bool],
    rm_facts: &mut IdSet<FactId>,
    rm_ops: &mut IdSet<OpId>,
) {
    for f in task.facts.ids() {
        if mutex.is_mutex(f, f) {
            rm_facts.add(f);
        }
    }
    for (i, &a) in alive.iter().enumerate() {
        if !a {
            rm_ops.add(OpId::from(i));
        }
    }
}

/// Forward h². Extends `mutex`, collects unreachable facts and operators.
/// Returns true if the goal was detected unreachable.
pub fn h2_fw(
    task: &StripsTask,
    mutex: &mut MutexPairs,
    rm_facts: &mut IdSet<FactId>,
    rm_ops: &mut IdSet<OpId>,
) -> Result<bool> {
    ensure!(
        !task.has_cond_eff,
        "h^2 does not support conditional effects"
    );
    info!("h^2 fw. facts: {}, ops: {}", task.facts.len(), task.ops.len());

    let n = task.facts.len();
    let ops = op_views(task);
    let mut alive = vec![true; ops.len()];
    let reach = pair_fixpoint(n, forward_seed(task), &ops, &alive);
    harvest(n, &reach, |i| task.ops[OpId::from(i)].pre.clone(), mutex, &mut alive);
    collect_results(task, mutex, &alive, rm_facts, rm_ops);

    let goal_unreachable = mutex.has_mutex_within(&task.goal);
    info!(
        "h^2 fw DONE. mutex pairs: {}, unreachable facts: {}, removed ops: {}",
        mutex.num_mutex_pairs(),
        rm_facts.len(),
        rm_ops.len()
    );
    Ok(goal_unreachable)
}

/// Facts that may still be true when the goal holds: not mutex with any goal
/// fact, and not excluded by an exactly-one group already decided by the goal.
fn possible_at_goal(task: &StripsTask, mgroups: &MGroups, mutex: &MutexPairs) -> FixedBitSet {
    let mut possible = FixedBitSet::with_capacity(task.facts.len());
    for f in task.facts.ids() {
        let fi = usize::from(f);
        if mutex.is_mutex(f, f) || mutex.is_mutex_with_set(f, &task.goal) {
            continue;
        }
        let excluded = mgroups.iter().any(|mg| {
            mg.is_exactly_one
                && mg.facts.contains(f)
                && !task.goal.contains(f)
                && !mg.facts.is_disjoint(&task.goal)
        });
        if !excluded {
            possible.insert(fi);
        }
    }
    possible
}

/// Forward/backward h²: both directions are iterated until neither shrinks
/// the reachable-pair set. Returns true if the goal was detected unreachable.
pub fn h2_fw_bw(
    task: &StripsTask,
    mgroups: &MGroups,
    mutex: &mut MutexPairs,
    rm_facts: &mut IdSet<FactId>,
    rm_ops: &mut IdSet<OpId>,
) -> Result<bool> {
    ensure!(
        !task.has_cond_eff,
        "h^2 does not support conditional effects"
    );
    info!("h^2 fw/bw. facts: {}, ops: {}", task.facts.len(), task.ops.len());

    let n = task.facts.len();
    let fw_ops = op_views(task);
    let bw_ops = reversed_op_views(task);
    let mut alive = vec![true; fw_ops.len()];
    let mut goal_unreachable = false;

    loop {
        let mut changed = false;

        let reach = pair_fixpoint(n, forward_seed(task), &fw_ops, &alive);
        changed |= harvest(n, &reach, |i| task.ops[OpId::from(i)].pre.clone(), mutex, &mut alive);

        // the backward pass starts from every state compatible with the goal
        let possible = possible_at_goal(task, mgroups, mutex);
        let mut seed = PairTable::new(n);
        for a in possible.ones() {
            for b in possible.ones() {
                if a <= b && !mutex.is_mutex(FactId::from(a), FactId::from(b)) {
                    seed.set(a, b);
                }
            }
        }
        let bw_reach = pair_fixpoint(n, seed, &bw_ops, &alive);
        changed |= harvest(n, &bw_reach, |i| task.ops[OpId::from(i)].add.clone(), mutex, &mut alive);

        goal_unreachable = goal_unreachable
            || mutex.has_mutex_within(&task.goal)
            || mutex.has_mutex_within(&task.init);

        if !changed {
            break;
        }
    }

    collect_results(task, mutex, &alive, rm_facts, rm_ops);
    info!(
        "h^2 fw/bw DONE. mutex pairs: {}, unreachable facts: {}, removed ops: {}",
        mutex.num_mutex_pairs(),
        rm_facts.len(),
        rm_ops.len()
    );
    Ok(goal_unreachable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strips::tests::task;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    #[test]
    fn serial_chain_yields_pairwise_mutexes() {
        // a -> b -> c, one fact true at a time
        let t = task(
            &["a", "b", "c"],
            &[("ab", &[0], &[1], &[0]), ("bc", &[1], &[2], &[1])],
            &[0],
            &[2],
        );
        let mut mutex = MutexPairs::new(3);
        let mut rm_f = IdSet::new();
        let mut rm_o = IdSet::new();
        let goal_unreachable = h2_fw(&t, &mut mutex, &mut rm_f, &mut rm_o).unwrap();

        assert!(!goal_unreachable);
        assert!(mutex.is_mutex(fid(0), fid(1)));
        assert!(mutex.is_mutex(fid(0), fid(2)));
        assert!(mutex.is_mutex(fid(1), fid(2)));
        assert!(rm_f.is_empty());
        assert!(rm_o.is_empty());
    }

    #[test]
    fn unreachable_fact_and_operator_are_removed() {
        let t = task(
            &["a", "b", "ghost"],
            &[("ab", &[0], &[1], &[0]), ("use-ghost", &[2], &[1], &[])],
            &[0],
            &[1],
        );
        let mut mutex = MutexPairs::new(3);
        let mut rm_f = IdSet::new();
        let mut rm_o = IdSet::new();
        h2_fw(&t, &mut mutex, &mut rm_f, &mut rm_o).unwrap();

        assert!(rm_f.contains(fid(2)));
        assert!(mutex.is_mutex(fid(2), fid(2)));
        assert_eq!(rm_o.len(), 1);
    }

    #[test]
    fn elevator_operators_survive_h2() {
        // the move task after grounding: both operators stay
        let t = task(
            &["at-l1", "at-l2"],
            &[("m12", &[0], &[1], &[0]), ("m21", &[1], &[0], &[1])],
            &[0],
            &[1],
        );
        let mut mutex = MutexPairs::new(2);
        let mut rm_f = IdSet::new();
        let mut rm_o = IdSet::new();
        let goal_unreachable = h2_fw(&t, &mut mutex, &mut rm_f, &mut rm_o).unwrap();
        assert!(!goal_unreachable);
        assert!(rm_o.is_empty());
        assert!(mutex.is_mutex(fid(0), fid(1)));
    }

    #[test]
    fn backward_pass_removes_goal_dead_facts() {
        // x is reachable but from x the goal cannot be reached
        let t = task(
            &["a", "b", "x"],
            &[("ab", &[0], &[1], &[0]), ("ax", &[0], &[2], &[0])],
            &[0],
            &[1],
        );
        let mut mutex = MutexPairs::new(3);
        let mut rm_f = IdSet::new();
        let mut rm_o = IdSet::new();
        let goal_unreachable =
            h2_fw_bw(&t, &MGroups::new(), &mut mutex, &mut rm_f, &mut rm_o).unwrap();

        assert!(!goal_unreachable);
        assert!(rm_f.contains(fid(2)), "x cannot appear on any path to the goal");
        assert_eq!(rm_o.len(), 1, "the operator producing x is dropped");
    }
}
