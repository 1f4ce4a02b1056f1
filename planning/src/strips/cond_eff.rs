//! Compilation of conditional effects into plain STRIPS operators.
//!
//! Every operator with `k` conditional effects is replaced by operators for
//! all `2^k` subsets: effects in the subset fire (their preconditions join
//! the operator precondition), effects outside it are prevented by requiring
//! the negation of one of their precondition facts.

use crate::strips::{FactId, OpId, StripsTask};
use deneb_collections::set::IdSet;
use tracing::info;

pub fn compile_away_cond_eff(task: &mut StripsTask) {
    if !task.has_cond_eff || task.ops.is_empty() {
        return;
    }
    info!("Compiling away conditional effects. ops: {}", task.ops.len());

    create_neg_facts(task);

    let carriers: IdSet<OpId> = task
        .ops
        .entries()
        .filter(|(_, op)| !op.cond_eff.is_empty())
        .map(|(id, _)| id)
        .collect();
    for op_id in carriers.iter() {
        compile_op(task, op_id);
    }

    task.ops.delete(&carriers);
    task.ops.deduplicate();
    task.ops.sort();
    task.has_cond_eff = false;
    info!("Conditional effects compiled away. ops: {}", task.ops.len());
}

/// Creates the negation of every fact occurring in a conditional-effect
/// precondition, then restores the name ordering of the fact store.
fn create_neg_facts(task: &mut StripsTask) {
    let mut need_neg: IdSet<FactId> = IdSet::new();
    for op in task.ops.iter() {
        for ce in &op.cond_eff {
            for f in ce.pre.iter() {
                need_neg.add(f);
            }
        }
    }

    let fact_count = task.facts.len();
    for f in need_neg.iter() {
        if task.facts[f].neg_of.is_none() {
            task.add_neg_fact(f);
        }
    }

    if task.facts.len() != fact_count {
        let remap = task.facts.sort_by_name();
        task.ops.remap_facts(&remap);
        task.init.remap(|f| remap[usize::from(f)]);
        task.goal.remap(|f| remap[usize::from(f)]);
    }
}

fn compile_op(task: &mut StripsTask, op_id: OpId) {
    let src = task.ops[op_id].clone();
    let k = src.cond_eff.len();
    assert!(
        k < usize::BITS as usize,
        "operator has too many conditional effects for subset enumeration"
    );

    for comb in 0usize..(1usize << k) {
        let mut op = src.clone_without_cond_eff();
        let mut neg_pre: Vec<IdSet<FactId>> = Vec::new();
        for (i, ce) in src.cond_eff.iter().enumerate() {
            if comb & (1 << i) != 0 {
                // the effect fires: merge it into the operator
                op.pre.union_with(&ce.pre);
                op.add.minus(&ce.del);
                op.del.union_with(&ce.del);
                op.add.union_with(&ce.add);
            } else {
                // the effect must not fire: one of its precondition facts
                // has to be false
                let negs: IdSet<FactId> = ce
                    .pre
                    .iter()
                    .map(|f| {
                        task.facts[f]
                            .neg_of
                            .expect("negation fact must have been created")
                    })
                    .collect();
                neg_pre.push(negs);
            }
        }
        add_with_neg_pre(task, op, &neg_pre, 0);
    }
}

/// Adds one operator per choice of a negated precondition fact for every
/// suppressed conditional effect (the cross product of the negations).
fn add_with_neg_pre(task: &mut StripsTask, op: crate::strips::Operator, neg_pre: &[IdSet<FactId>], cur: usize) {
    if cur == neg_pre.len() {
        let mut op = op;
        op.normalize();
        if !op.add.is_empty() {
            task.ops.add(op);
        }
        return;
    }
    for neg_fact in neg_pre[cur].iter() {
        let positive = task.facts[neg_fact].neg_of.expect("negation always points back");
        if op.pre.contains(positive) {
            // the operator requires the fact to be true, this disjunct
            // cannot be satisfied
            continue;
        }
        let mut next = op.clone();
        next.pre.add(neg_fact);
        add_with_neg_pre(task, next, neg_pre, cur + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strips::{CondEff, Fact, Operator};

    fn find_fact(task: &StripsTask, name: &str) -> FactId {
        task.facts
            .entries()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    /// Spec scenario: pre {p}, add {q}, one conditional effect (r -> s).
    fn one_cond_eff_task() -> StripsTask {
        let mut t = StripsTask::default();
        let p = t.facts.add(Fact::new("p"));
        let _q = t.facts.add(Fact::new("q"));
        let r = t.facts.add(Fact::new("r"));
        let _s = t.facts.add(Fact::new("s"));
        let mut op = Operator::new("A");
        op.pre.add(p);
        op.add.add(FactId::from(1usize));
        op.cond_eff.push(CondEff {
            pre: [r].into_iter().collect(),
            add: [FactId::from(3usize)].into_iter().collect(),
            del: IdSet::new(),
        });
        t.ops.add(op);
        t.init = [p].into_iter().collect();
        t.goal = [FactId::from(1usize)].into_iter().collect();
        t.refresh_has_cond_eff();
        t
    }

    #[test]
    fn single_cond_eff_splits_into_two_operators() {
        let mut t = one_cond_eff_task();
        compile_away_cond_eff(&mut t);

        assert!(!t.has_cond_eff);
        assert!(t.ops.iter().all(|op| op.cond_eff.is_empty()));
        assert_eq!(t.ops.len(), 2);

        let p = find_fact(&t, "p");
        let q = find_fact(&t, "q");
        let r = find_fact(&t, "r");
        let s = find_fact(&t, "s");
        let not_r = find_fact(&t, "NOT-r");

        let fired = t
            .ops
            .iter()
            .find(|op| op.pre.contains(r))
            .expect("variant with the effect fired");
        assert!(fired.pre.contains(p));
        assert!(fired.add.contains(q) && fired.add.contains(s));

        let suppressed = t
            .ops
            .iter()
            .find(|op| op.pre.contains(not_r))
            .expect("variant with the effect suppressed");
        assert!(suppressed.add.contains(q));
        assert!(!suppressed.add.contains(s));

        // NOT-r is initially true because r is not
        assert!(t.init.contains(not_r));
        assert_eq!(t.facts[not_r].neg_of, Some(r));
        assert_eq!(t.facts[r].neg_of, Some(not_r));
    }

    #[test]
    fn impossible_suppression_is_dropped() {
        // the conditional effect's precondition is also the operator's
        // precondition: the effect always fires, only one operator remains
        let mut t = StripsTask::default();
        let p = t.facts.add(Fact::new("p"));
        let q = t.facts.add(Fact::new("q"));
        let mut op = Operator::new("A");
        op.pre.add(p);
        op.cond_eff.push(CondEff {
            pre: [p].into_iter().collect(),
            add: [q].into_iter().collect(),
            del: IdSet::new(),
        });
        t.ops.add(op);
        t.refresh_has_cond_eff();

        compile_away_cond_eff(&mut t);
        assert_eq!(t.ops.len(), 1);
        let op = t.ops.iter().next().unwrap();
        assert!(op.add.contains(find_fact(&t, "q")));
    }

    #[test]
    fn two_cond_effs_enumerate_all_subsets() {
        let mut t = StripsTask::default();
        let p = t.facts.add(Fact::new("p"));
        let r1 = t.facts.add(Fact::new("r1"));
        let r2 = t.facts.add(Fact::new("r2"));
        let s1 = t.facts.add(Fact::new("s1"));
        let s2 = t.facts.add(Fact::new("s2"));
        let mut op = Operator::new("A");
        op.add.add(p);
        op.cond_eff.push(CondEff {
            pre: [r1].into_iter().collect(),
            add: [s1].into_iter().collect(),
            del: IdSet::new(),
        });
        op.cond_eff.push(CondEff {
            pre: [r2].into_iter().collect(),
            add: [s2].into_iter().collect(),
            del: IdSet::new(),
        });
        t.ops.add(op);
        t.refresh_has_cond_eff();

        compile_away_cond_eff(&mut t);
        // four subsets, each yields exactly one operator here
        assert_eq!(t.ops.len(), 4);
        assert!(!t.has_cond_eff);
    }
}
