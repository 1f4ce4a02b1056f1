//! Fact-alternating mutex group inference on the grounded task, driven by a
//! mixed-integer LP: maximize the number of selected facts subject to the
//! initial state selecting at most one and no operator producing more than
//! it consumes. Every solution with value above zero is a fam-group; a skip
//! constraint then excludes it (and, in maximal mode, its subsets) and the
//! model is solved again.

use crate::lp::{LpModel, LpSolver, Sense};
use crate::mgroup::{MGroup, MGroups};
use crate::mutex::MutexPairs;
use crate::strips::{FactId, OpId, StripsTask};
use crate::sym::StripsSym;
use anyhow::{ensure, Result};
use deneb_collections::set::IdSet;
use std::time::{Duration, Instant};
use tracing::info;

pub struct FamGroupConfig<'a> {
    /// Infer only maximal fam-groups (skip constraints exclude subsets).
    pub maximal: bool,
    /// Only fam-groups intersecting the goal.
    pub goal: bool,
    /// Derive all symmetric images of every found group instead of
    /// re-running the LP for them.
    pub sym: Option<&'a StripsSym>,
    /// With `sym`, keep only the asymmetric representatives in the output.
    pub keep_only_asymmetric: bool,
    /// Re-weight the objective to prefer facts not covered yet.
    pub prioritize_uncovered: bool,
    /// Upper bound on the number of inferred groups (0 = unlimited).
    pub limit: usize,
    /// Wall-clock bound; on expiry the pass returns what it has.
    pub time_limit: Option<Duration>,
}

impl Default for FamGroupConfig<'_> {
    fn default() -> Self {
        FamGroupConfig {
            maximal: true,
            goal: false,
            sym: None,
            keep_only_asymmetric: false,
            prioritize_uncovered: false,
            limit: 0,
            time_limit: None,
        }
    }
}

fn pre_del(op: &crate::strips::Operator) -> IdSet<FactId> {
    op.pre.intersection(&op.del)
}

struct Infer<'a> {
    strips: &'a StripsTask,
    model: Box<dyn LpModel>,
}

impl Infer<'_> {
    fn skip_group(&mut self, facts: &IdSet<FactId>, maximal: bool) {
        if maximal {
            // any future group must contain a fact outside this one
            let row = self.model.add_row(1., Sense::Ge);
            for f in self.strips.facts.ids() {
                if !facts.contains(f) {
                    self.model.set_coef(row, usize::from(f), 1.);
                }
            }
        } else {
            // exclude exactly this set
            let row = self.model.add_row(facts.len() as f64 - 1., Sense::Le);
            for f in facts.iter() {
                self.model.set_coef(row, usize::from(f), 1.);
            }
        }
    }

    fn prioritize_uncovered(&mut self, mgroups: &MGroups) {
        let mut covered: IdSet<FactId> = IdSet::new();
        for mg in mgroups.iter() {
            covered.union_with(&mg.facts);
        }
        for f in self.strips.facts.ids() {
            let col = usize::from(f);
            if covered.contains(f) {
                self.model.set_obj(col, 1.);
            } else {
                self.model.set_obj(col, covered.len() as f64);
            }
            self.model.set_var_binary(col);
        }
    }
}

/// Infers fam-groups and appends them to `mgroups` (whose members are
/// excluded from the search). Returns the number of groups found.
pub fn infer_fam_groups(
    mgroups: &mut MGroups,
    strips: &StripsTask,
    cfg: &FamGroupConfig,
    solver: &dyn LpSolver,
) -> Result<usize> {
    ensure!(
        !strips.has_cond_eff,
        "fam-groups do not support conditional effects"
    );
    info!(
        "Inference of fam-groups [maximal: {}, goal: {}, sym: {}, limit: {}] ...",
        cfg.maximal,
        cfg.goal,
        cfg.sym.is_some(),
        cfg.limit
    );
    let start = Instant::now();
    let limit = if cfg.limit == 0 { usize::MAX } else { cfg.limit };

    let mut infer = Infer {
        strips,
        model: solver.new_model(strips.facts.len()),
    };

    for f in strips.facts.ids() {
        infer.model.set_obj(usize::from(f), 1.);
        infer.model.set_var_binary(usize::from(f));
    }

    // the initial state makes at most one member true
    let row = infer.model.add_row(1., Sense::Le);
    for f in strips.init.iter() {
        infer.model.set_coef(row, usize::from(f), 1.);
    }

    // no operator produces more members than it consumes
    for op in strips.ops.iter() {
        let row = infer.model.add_row(0., Sense::Le);
        for f in op.add.iter() {
            infer.model.set_coef(row, usize::from(f), 1.);
        }
        for f in pre_del(op).iter() {
            infer.model.set_coef(row, usize::from(f), -1.);
        }
    }

    if cfg.goal {
        let row = infer.model.add_row(1., Sense::Ge);
        for f in strips.goal.iter() {
            infer.model.set_coef(row, usize::from(f), 1.);
        }
    }

    let existing: Vec<IdSet<FactId>> = mgroups.iter().map(|mg| mg.facts.clone()).collect();
    for facts in &existing {
        infer.skip_group(facts, cfg.maximal);
    }

    let mut found = 0;
    while found < limit {
        let Some((value, assignment)) = infer.model.solve()? else {
            break;
        };
        if value <= 0.5 {
            break;
        }
        let facts: IdSet<FactId> = strips
            .facts
            .ids()
            .filter(|&f| assignment[usize::from(f)] > 0.5)
            .collect();

        let mut mg = MGroup::new(facts.clone());
        mg.is_fam_group = true;
        mgroups.add(mg);
        found += 1;
        infer.skip_group(&facts, cfg.maximal);

        if let Some(sym) = cfg.sym {
            let mut sets = vec![facts];
            sym.all_fact_set_symmetries(&mut sets);
            for img in &sets[1..] {
                if !cfg.keep_only_asymmetric {
                    let mut mg = MGroup::new(img.clone());
                    mg.is_fam_group = true;
                    mgroups.add(mg);
                    found += 1;
                }
                infer.skip_group(img, cfg.maximal);
            }
        }

        if cfg.prioritize_uncovered {
            infer.prioritize_uncovered(mgroups);
        }

        if cfg.time_limit.is_some_and(|tl| start.elapsed() > tl) {
            info!("Inference of fam-groups hit the time limit");
            break;
        }
    }

    info!("Inference of fam-groups DONE: {found} fam-groups found.");
    Ok(found)
}

/// Detects operators that consume more of a conserved, goal-relevant
/// resource than they produce: with a fam-group intersecting the goal,
/// `|pre ∩ del ∩ G| > |add ∩ G|` means no plan can use the operator.
/// Operators with conditional effects are skipped.
pub fn dead_end_ops(mgroups: &MGroups, strips: &StripsTask) -> IdSet<OpId> {
    let mut dead: IdSet<OpId> = IdSet::new();
    for mg in mgroups.iter() {
        if !mg.is_fam_group || mg.facts.is_disjoint(&strips.goal) {
            continue;
        }
        for (op_id, op) in strips.ops.entries() {
            if !op.cond_eff.is_empty() {
                continue;
            }
            let consumed = pre_del(op).intersection_size(&mg.facts);
            let produced = op.add.intersection_size(&mg.facts);
            if consumed > produced {
                dead.add(op_id);
            }
        }
    }
    dead
}

/// Propagates fam-group pairs into the mutex relation.
pub fn add_fam_group_mutexes(mgroups: &MGroups, mutex: &mut MutexPairs) {
    mutex.add_mgroups(mgroups);
}
