//! Projection of a lifted task onto its objects.

use crate::lifted::mgroups::LiftedMGroup;
use crate::lifted::{ActionSchema, GroundAtom, LiftedTask, ObjId};
use crate::strips::{CondEff, Fact, FactId, Operator, StripsTask};
use anyhow::Result;
use deneb_utils::{enumerate, StreamingIterator};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Grounding configuration. The lifted mutex groups are optional; without
/// them no pruning happens during enumeration.
#[derive(Default)]
pub struct GroundConfig<'a> {
    pub lifted_mgroups: Option<&'a [LiftedMGroup]>,
    /// Drop candidates whose precondition contains a mutex pair.
    pub prune_pre_mutex: bool,
    /// Drop candidates that produce more members of an exactly-one group
    /// than they consume.
    pub prune_dead_end: bool,
}

struct CandidateOp {
    name: String,
    cost: u32,
    pre: Vec<GroundAtom>,
    add: Vec<GroundAtom>,
    del: Vec<GroundAtom>,
    cond_eff: Vec<(Vec<GroundAtom>, Vec<GroundAtom>, Vec<GroundAtom>)>,
}

/// One fully instantiated lifted mutex group.
struct GroupInstance<'a> {
    group: &'a LiftedMGroup,
    binding: Vec<ObjId>,
    exactly_one: bool,
}

impl GroupInstance<'_> {
    fn contains(&self, task: &LiftedTask, atom: &GroundAtom) -> bool {
        self.group.contains_ground(task, &self.binding, atom)
    }
}

fn group_instances<'a>(task: &LiftedTask, groups: &'a [LiftedMGroup]) -> Vec<GroupInstance<'a>> {
    let mut res = Vec::new();
    for lg in groups {
        let domains: Vec<Vec<ObjId>> = lg
            .fixed
            .iter()
            .map(|&t| task.objects.instances_of(&task.types, t))
            .collect();
        let mut iter = enumerate(domains.into_iter().map(|d| d.into_iter()).collect());
        while let Some(binding) = iter.next() {
            res.push(GroupInstance {
                group: lg,
                binding: binding.to_vec(),
                exactly_one: lg.exactly_one,
            });
        }
    }
    res
}

/// The precondition holds two distinct facts of one mutex-group instance.
fn pre_has_mutex(task: &LiftedTask, instances: &[GroupInstance], pre: &[GroundAtom]) -> bool {
    let distinct: Vec<&GroundAtom> = {
        let mut seen = HashSet::new();
        pre.iter().filter(|a| seen.insert(*a)).collect()
    };
    instances.iter().any(|inst| {
        distinct
            .iter()
            .filter(|a| inst.contains(task, a))
            .count()
            > 1
    })
}

/// The effect leaves more than one member of an exactly-one group true.
fn effect_is_dead_end(task: &LiftedTask, instances: &[GroupInstance], op: &CandidateOp) -> bool {
    instances.iter().any(|inst| {
        if !inst.exactly_one {
            return false;
        }
        let produced = count_distinct(task, inst, &op.add);
        if produced == 0 {
            return false;
        }
        let consumed = op
            .del
            .iter()
            .filter(|d| op.pre.contains(d) && inst.contains(task, d))
            .collect::<HashSet<_>>()
            .len();
        produced > consumed
    })
}

fn count_distinct(task: &LiftedTask, inst: &GroupInstance, atoms: &[GroundAtom]) -> usize {
    atoms
        .iter()
        .filter(|a| inst.contains(task, a))
        .collect::<HashSet<_>>()
        .len()
}

fn instantiate(action: &ActionSchema, params: &[ObjId], task: &LiftedTask) -> CandidateOp {
    let mut name = action.name.clone();
    for &p in params {
        name.push(' ');
        name.push_str(task.objects.name(p));
    }
    let ground_all = |atoms: &[crate::lifted::Atom]| -> Vec<GroundAtom> {
        atoms.iter().map(|a| a.ground(params)).collect()
    };
    CandidateOp {
        name,
        cost: action.cost,
        pre: ground_all(&action.pre),
        add: ground_all(&action.add),
        del: ground_all(&action.del),
        cond_eff: action
            .cond_eff
            .iter()
            .map(|ce| (ground_all(&ce.pre), ground_all(&ce.add), ground_all(&ce.del)))
            .collect(),
    }
}

/// Grounds the task: every action is projected over all type-compatible
/// argument tuples, optionally pruned against the lifted mutex groups, and
/// the result is restricted to delete-relaxed reachable facts.
///
/// An unreachable goal is not an error: the `goal_is_unreachable` flag is
/// set on the emitted task instead.
pub fn ground(task: &LiftedTask, cfg: &GroundConfig) -> Result<StripsTask> {
    info!(
        "Grounding [prune-pre: {}, prune-dead-end: {}]",
        cfg.prune_pre_mutex && cfg.lifted_mgroups.is_some(),
        cfg.prune_dead_end && cfg.lifted_mgroups.is_some(),
    );

    let instances = match cfg.lifted_mgroups {
        Some(groups) if cfg.prune_pre_mutex || cfg.prune_dead_end => {
            group_instances(task, groups)
        }
        _ => Vec::new(),
    };

    // enumerate all type-compatible candidates
    let mut candidates: Vec<CandidateOp> = Vec::new();
    let mut pruned_pre = 0usize;
    let mut pruned_dead_end = 0usize;
    for action in &task.actions {
        let domains: Vec<Vec<ObjId>> = action
            .params
            .iter()
            .map(|&t| task.objects.instances_of(&task.types, t))
            .collect();
        let mut iter = enumerate(domains.into_iter().map(|d| d.into_iter()).collect());
        while let Some(params) = iter.next() {
            let op = instantiate(action, params, task);
            if cfg.prune_pre_mutex && pre_has_mutex(task, &instances, &op.pre) {
                pruned_pre += 1;
                continue;
            }
            if cfg.prune_dead_end && effect_is_dead_end(task, &instances, &op) {
                pruned_dead_end += 1;
                continue;
            }
            candidates.push(op);
        }
    }
    info!(
        "Enumerated {} candidate operators ({} pruned on preconditions, {} dead-end)",
        candidates.len(),
        pruned_pre,
        pruned_dead_end
    );

    // delete-relaxed reachability from the initial state
    let mut reached: HashSet<GroundAtom> = task.init.iter().cloned().collect();
    let mut applicable = vec![false; candidates.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for (i, op) in candidates.iter().enumerate() {
            if op.pre.iter().any(|p| !reached.contains(p)) {
                continue;
            }
            if !applicable[i] {
                applicable[i] = true;
                for a in &op.add {
                    changed |= reached.insert(a.clone());
                }
            }
            for (ce_pre, ce_add, _) in &op.cond_eff {
                if ce_pre.iter().all(|p| reached.contains(p)) {
                    for a in ce_add {
                        changed |= reached.insert(a.clone());
                    }
                }
            }
        }
    }

    // facts: reachable atoms used anywhere, plus init and goal
    let mut atoms: HashSet<GroundAtom> = task.init.iter().cloned().collect();
    atoms.extend(task.goal.iter().cloned());
    for (i, op) in candidates.iter().enumerate() {
        if !applicable[i] {
            continue;
        }
        for a in op.pre.iter().chain(op.add.iter()) {
            atoms.insert(a.clone());
        }
        for (ce_pre, ce_add, _) in &op.cond_eff {
            for a in ce_pre.iter().chain(ce_add.iter()) {
                if reached.contains(a) {
                    atoms.insert(a.clone());
                }
            }
        }
    }

    let mut named: Vec<(String, GroundAtom)> =
        atoms.into_iter().map(|a| (a.name(task), a)).collect();
    named.sort();

    let mut strips = StripsTask {
        domain_name: task.domain_name.clone(),
        problem_name: task.problem_name.clone(),
        domain_file: task.domain_file.clone(),
        problem_file: task.problem_file.clone(),
        ..Default::default()
    };
    let mut fact_ids: HashMap<GroundAtom, FactId> = HashMap::new();
    for (name, atom) in named {
        let id = strips.facts.add(Fact::with_atom(name, atom.clone()));
        fact_ids.insert(atom, id);
    }

    for (i, cand) in candidates.into_iter().enumerate() {
        if !applicable[i] {
            continue;
        }
        let mut op = Operator::new(cand.name);
        op.cost = cand.cost;
        op.pre = cand.pre.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
        op.add = cand.add.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
        op.del = cand.del.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
        for (ce_pre, ce_add, ce_del) in &cand.cond_eff {
            let pre: deneb_collections::set::IdSet<FactId> =
                ce_pre.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
            // a conditional effect guarded by an unreachable fact never fires
            if pre.len() != ce_pre.iter().collect::<HashSet<_>>().len() {
                continue;
            }
            let ce = CondEff {
                pre,
                add: ce_add.iter().filter_map(|a| fact_ids.get(a).copied()).collect(),
                del: ce_del.iter().filter_map(|a| fact_ids.get(a).copied()).collect(),
            };
            if ce.pre.is_empty() {
                op.add.union_with(&ce.add);
                op.del.union_with(&ce.del);
            } else if !ce.add.is_empty() || !ce.del.is_empty() {
                op.cond_eff.push(ce);
            }
        }
        strips.ops.add(op);
    }
    strips.ops.sort();

    strips.init = task.init.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
    strips.goal = task.goal.iter().filter_map(|a| fact_ids.get(a).copied()).collect();
    strips.goal_is_unreachable = task.goal.iter().any(|g| !reached.contains(g));
    strips.refresh_has_cond_eff();

    info!(
        "Grounding DONE. facts: {}, ops: {}, goal unreachable: {}",
        strips.facts.len(),
        strips.ops.len(),
        strips.goal_is_unreachable
    );
    Ok(strips)
}
