//! Ground STRIPS representation: facts, operators and the task bundle.

pub mod cond_eff;
pub mod cross_ref;
pub mod fact;
pub mod op;

pub use fact::{Fact, FactId, FactRemap, Facts};
pub use op::{CondEff, OpId, Operator, Operators};

use crate::mutex::MutexPairs;
use anyhow::Result;
use deneb_collections::set::IdSet;
use serde_json::json;
use std::io::Write;
use tracing::info;

/// A grounded planning task.
///
/// Invariants: `init ⊆ facts`, `goal ⊆ facts`, and every fact id referenced
/// by an operator is in range. `has_cond_eff` is true iff some operator
/// carries a conditional effect.
#[derive(Default, Clone)]
pub struct StripsTask {
    pub domain_name: Option<String>,
    pub problem_name: Option<String>,
    pub domain_file: Option<String>,
    pub problem_file: Option<String>,
    pub facts: Facts,
    pub ops: Operators,
    pub init: IdSet<FactId>,
    pub goal: IdSet<FactId>,
    pub goal_is_unreachable: bool,
    pub has_cond_eff: bool,
}

impl StripsTask {
    /// Recomputes `has_cond_eff` from the operator store.
    pub fn refresh_has_cond_eff(&mut self) {
        self.has_cond_eff = self.ops.iter().any(|op| !op.cond_eff.is_empty());
    }

    /// Turns the task into a trivially unsolvable one: no operators, empty
    /// initial state, a single-fact goal.
    pub fn make_unsolvable(&mut self) {
        assert!(!self.facts.is_empty(), "cannot make a task without facts unsolvable");
        self.ops.clear();
        self.init.clear();
        self.goal.clear();
        self.goal.add(FactId::from(0usize));
        self.has_cond_eff = false;
    }

    /// Operators applicable in the given state.
    pub fn applicable_ops(&self, state: &IdSet<FactId>) -> IdSet<OpId> {
        self.ops
            .entries()
            .filter(|(_, op)| op.pre.is_subset(state))
            .map(|(id, _)| id)
            .collect()
    }

    /// Introduces the negation of `fact_id`, named `NOT-<name>`.
    ///
    /// Every operator adding the fact also deletes the negation and vice
    /// versa (including conditional effects), and the negation joins the
    /// initial state iff the fact is absent from it.
    pub fn add_neg_fact(&mut self, fact_id: FactId) -> FactId {
        assert!(
            self.facts[fact_id].neg_of.is_none(),
            "fact already has a negation"
        );
        let name = format!("NOT-{}", self.facts[fact_id].name);
        let mut neg = Fact::new(name);
        neg.is_private = self.facts[fact_id].is_private;
        neg.neg_of = Some(fact_id);
        let neg_id = self.facts.add(neg);
        self.facts.get_mut(fact_id).neg_of = Some(neg_id);

        for op in self.ops.iter_mut() {
            if op.del.contains(fact_id) {
                op.add.add(neg_id);
            }
            if op.add.contains(fact_id) {
                op.del.add(neg_id);
            }
            for ce in &mut op.cond_eff {
                if ce.del.contains(fact_id) {
                    ce.add.add(neg_id);
                }
                if ce.add.contains(fact_id) {
                    ce.del.add(neg_id);
                }
            }
        }

        if !self.init.contains(fact_id) {
            self.init.add(neg_id);
        }
        neg_id
    }

    /// Drops the given facts and operators, compacting all ids monotonically
    /// and rewriting every set. Operators left without any effect are
    /// removed as well. Returns the fact remap if facts were deleted, so
    /// that satellite structures (mutexes, mutex groups) can follow.
    pub fn reduce(&mut self, del_facts: &IdSet<FactId>, del_ops: &IdSet<OpId>) -> Option<FactRemap> {
        if !del_ops.is_empty() {
            self.ops.delete(del_ops);
        }
        if del_facts.is_empty() {
            return None;
        }

        self.ops.remove_facts(del_facts);
        let remap = self.facts.delete(del_facts);
        self.ops.remap_facts(&remap);

        self.init.minus(del_facts);
        self.init.remap(|f| remap[usize::from(f)]);
        self.goal.minus(del_facts);
        self.goal.remap(|f| remap[usize::from(f)]);

        let noop: IdSet<OpId> = self
            .ops
            .entries()
            .filter(|(_, op)| op.is_noop())
            .map(|(id, _)| id)
            .collect();
        self.ops.delete(&noop);

        if self.has_cond_eff {
            self.refresh_has_cond_eff();
        }
        Some(remap)
    }

    /// Removes facts that no operator ever adds or deletes and that hold
    /// initially: they are true in every reachable state.
    pub fn remove_static_facts(&mut self) -> usize {
        let mut nonstatic = vec![false; self.facts.len()];
        let mut in_init = vec![false; self.facts.len()];
        for f in self.init.iter() {
            in_init[usize::from(f)] = true;
        }
        for op in self.ops.iter() {
            for f in op.add.iter().chain(op.del.iter()) {
                nonstatic[usize::from(f)] = true;
            }
            for ce in &op.cond_eff {
                for f in ce.add.iter().chain(ce.del.iter()) {
                    nonstatic[usize::from(f)] = true;
                }
            }
        }

        let del: IdSet<FactId> = self
            .facts
            .ids()
            .filter(|&f| in_init[usize::from(f)] && !nonstatic[usize::from(f)])
            .collect();
        info!("Found {} static facts", del.len());
        if !del.is_empty() {
            self.reduce(&del, &IdSet::new());
        }
        del.len()
    }

    /// Removes delete effects that can never fire: deletes of a fact that is
    /// mutex with the precondition, or whose negation is a precondition.
    pub fn remove_useless_del_effs(&mut self, mutex: Option<&MutexPairs>) -> usize {
        let mut changed_ops = 0;

        let find_useless = |facts: &Facts,
                            pre: &IdSet<FactId>,
                            pre2: Option<&IdSet<FactId>>,
                            del: &IdSet<FactId>| {
            let mut useless = IdSet::new();
            for f in del.iter() {
                let is_mutex = mutex.is_some_and(|m| {
                    m.is_mutex_with_set(f, pre) || pre2.is_some_and(|p| m.is_mutex_with_set(f, p))
                });
                let neg_in_pre = facts[f]
                    .neg_of
                    .is_some_and(|n| pre.contains(n) || pre2.is_some_and(|p| p.contains(n)));
                if is_mutex || neg_in_pre {
                    useless.add(f);
                }
            }
            useless
        };

        let facts = &self.facts;
        for op in self.ops.iter_mut() {
            let mut changed = false;
            let useless = find_useless(facts, &op.pre, None, &op.del);
            if !useless.is_empty() {
                op.del.minus(&useless);
                changed = true;
            }
            for cei in 0..op.cond_eff.len() {
                let useless = find_useless(facts, &op.pre, Some(&op.cond_eff[cei].pre), &op.cond_eff[cei].del);
                if !useless.is_empty() {
                    op.cond_eff[cei].del.minus(&useless);
                    changed = true;
                }
            }
            if changed {
                changed_ops += 1;
            }
        }
        info!("Removing useless delete effects DONE. (modified ops: {changed_ops})");
        changed_ops
    }

    /// Flattens operators whose conditional effects all share one
    /// precondition and whose unconditional effects are empty.
    pub fn merge_cond_eff_if_possible(&mut self) -> bool {
        if !self.has_cond_eff {
            return false;
        }
        let mut change = false;
        for op in self.ops.iter_mut() {
            if op.cond_eff.is_empty() || !op.add.is_empty() || !op.del.is_empty() {
                continue;
            }
            let same_pre = op.cond_eff.windows(2).all(|w| w[0].pre == w[1].pre);
            if same_pre {
                op.pre.union_with(&op.cond_eff[0].pre.clone());
                for ce in std::mem::take(&mut op.cond_eff) {
                    op.del.union_with(&ce.del);
                    op.add.union_with(&ce.add);
                }
                op.normalize();
                change = true;
            }
        }
        if change {
            self.refresh_has_cond_eff();
        }
        change
    }

    /// True if no operator can increase the number of true facts of the set.
    pub fn is_fam_group(&self, facts: &IdSet<FactId>) -> bool {
        self.ops.iter().all(|op| {
            if !fam_balance(facts, &op.pre, &op.add, &op.del) {
                return false;
            }
            op.cond_eff.is_empty() || is_fam_group_ce(facts, op)
        })
    }

    /// STRIPS text format: fact block, operator block, init, goal, flags.
    pub fn write_text(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Fact[{}]:", self.facts.len())?;
        for (id, fact) in self.facts.entries() {
            writeln!(out, "  {}: ({})", usize::from(id), fact.name)?;
        }
        writeln!(out, "Op[{}]:", self.ops.len())?;
        for op in self.ops.iter() {
            writeln!(out, "  ({}), cost: {}", op.name, op.cost)?;
            writeln!(out, "    pre:{}", self.fact_set(&op.pre))?;
            writeln!(out, "    add:{}", self.fact_set(&op.add))?;
            writeln!(out, "    del:{}", self.fact_set(&op.del))?;
            if !op.cond_eff.is_empty() {
                writeln!(out, "    cond-eff[{}]:", op.cond_eff.len())?;
                for ce in &op.cond_eff {
                    writeln!(out, "      pre:{}", self.fact_set(&ce.pre))?;
                    writeln!(out, "      add:{}", self.fact_set(&ce.add))?;
                    writeln!(out, "      del:{}", self.fact_set(&ce.del))?;
                }
            }
        }
        writeln!(out, "Init State:{}", self.fact_set(&self.init))?;
        writeln!(out, "Goal:{}", self.fact_set(&self.goal))?;
        if self.goal_is_unreachable {
            writeln!(out, "Goal is unreachable")?;
        }
        if self.has_cond_eff {
            writeln!(out, "Has conditional effects")?;
        }
        Ok(())
    }

    fn fact_set(&self, set: &IdSet<FactId>) -> String {
        let mut s = String::new();
        for f in set.iter() {
            s.push_str(" (");
            s.push_str(&self.facts[f].name);
            s.push(')');
        }
        s
    }

    /// Dictionary-style record for dynamically-typed consumers.
    pub fn to_json(&self) -> serde_json::Value {
        let set = |s: &IdSet<FactId>| s.iter().map(usize::from).collect::<Vec<_>>();
        json!({
            "domain_file": self.domain_file,
            "problem_file": self.problem_file,
            "domain_name": self.domain_name,
            "problem_name": self.problem_name,
            "fact": self.facts.iter().map(|f| format!("({})", f.name)).collect::<Vec<_>>(),
            "op": self.ops.iter().map(|op| json!({
                "name": op.name,
                "cost": op.cost,
                "pre": set(&op.pre),
                "add": set(&op.add),
                "del": set(&op.del),
                "cond_eff": op.cond_eff.iter().map(|ce| json!({
                    "pre": set(&ce.pre),
                    "add": set(&ce.add),
                    "del": set(&ce.del),
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "init": set(&self.init),
            "goal": set(&self.goal),
            "goal_is_unreachable": self.goal_is_unreachable,
            "has_cond_eff": self.has_cond_eff,
        })
    }
}

/// `|add ∩ facts| ≤ |(pre ∩ del) ∩ facts|`: the operator cannot increase the
/// number of true facts of the group.
fn fam_balance(
    facts: &IdSet<FactId>,
    pre: &IdSet<FactId>,
    add: &IdSet<FactId>,
    del: &IdSet<FactId>,
) -> bool {
    let predel = pre.intersection(del);
    add.intersection_size(facts) <= predel.intersection_size(facts)
}

fn cond_effs_disjoint_on(op: &Operator, facts: &IdSet<FactId>) -> bool {
    for (i, ce1) in op.cond_eff.iter().enumerate() {
        let del1 = ce1.del.intersection(facts);
        let add1 = ce1.add.intersection(facts);
        for ce2 in &op.cond_eff[i + 1..] {
            let del2 = ce2.del.intersection(facts);
            let add2 = ce2.add.intersection(facts);
            if !del1.is_disjoint(&del2) || !add1.is_disjoint(&add2) {
                return false;
            }
        }
    }
    true
}

fn is_fam_group_ce(facts: &IdSet<FactId>, op: &Operator) -> bool {
    if cond_effs_disjoint_on(op, facts) {
        // each conditional effect can be checked against the base effects alone
        op.cond_eff.iter().all(|ce| {
            fam_balance(
                facts,
                &op.pre.union(&ce.pre),
                &op.add.union(&ce.add),
                &op.del.union(&ce.del),
            )
        })
    } else {
        is_fam_group_ce_rec(facts, op, 0, &op.pre, &op.add, &op.del)
    }
}

/// Checks every union of a suffix-subset of conditional effects.
fn is_fam_group_ce_rec(
    facts: &IdSet<FactId>,
    op: &Operator,
    from: usize,
    pre: &IdSet<FactId>,
    add: &IdSet<FactId>,
    del: &IdSet<FactId>,
) -> bool {
    for cei in from..op.cond_eff.len() {
        let ce = &op.cond_eff[cei];
        let pre = pre.union(&ce.pre);
        let add = add.union(&ce.add);
        let del = del.union(&ce.del);
        if !fam_balance(facts, &pre, &add, &del) {
            return false;
        }
        if cei + 1 < op.cond_eff.len() && !is_fam_group_ce_rec(facts, op, cei + 1, &pre, &add, &del) {
            return false;
        }
    }
    true
}
