//! Irrelevance analysis: backward reachability from the goal over the
//! add/del cross-references, plus detection of individually static facts.

use crate::strips::cross_ref::FactCrossRefs;
use crate::strips::{FactId, OpId, StripsTask};
use anyhow::{ensure, Result};
use deneb_collections::set::IdSet;
use tracing::info;

pub struct IrrelevanceResult {
    pub irrelevant_facts: IdSet<FactId>,
    pub irrelevant_ops: IdSet<OpId>,
    /// Facts never added or deleted by any operator that hold initially;
    /// they are true in every reachable state and can be factored out.
    pub static_facts: IdSet<FactId>,
}

/// Marks facts and operators that no backward chain from the goal needs.
/// Facts and operators passed in as already irrelevant are skipped by the
/// backward sweep.
pub fn irrelevance_analysis(
    task: &StripsTask,
    known_irrelevant_facts: &IdSet<FactId>,
    known_irrelevant_ops: &IdSet<OpId>,
) -> Result<IrrelevanceResult> {
    ensure!(
        !task.has_cond_eff,
        "irrelevance analysis does not support conditional effects"
    );
    info!(
        "Irrelevance analysis. facts: {}, ops: {}",
        task.facts.len(),
        task.ops.len()
    );

    let cref = FactCrossRefs::new(task, true, true, false, true, true);

    // 0 = undecided, 1 = known irrelevant (skipped), -1 = relevant
    let mut fact_state = vec![0i8; task.facts.len()];
    let mut op_state = vec![0i8; task.ops.len()];
    for f in known_irrelevant_facts.iter() {
        fact_state[usize::from(f)] = 1;
    }
    for o in known_irrelevant_ops.iter() {
        op_state[usize::from(o)] = 1;
    }

    let mut static_facts = IdSet::new();
    for f in task.facts.ids() {
        let r = cref.fact(f);
        if r.is_init && r.op_add.is_empty() && r.op_del.is_empty() {
            fact_state[usize::from(f)] = 1;
            static_facts.add(f);
        }
    }

    // backward sweep from the goal across add and del effects
    let mut queue: Vec<FactId> = Vec::new();
    for f in task.goal.iter() {
        if fact_state[usize::from(f)] == 0 {
            fact_state[usize::from(f)] = -1;
            queue.push(f);
        }
    }
    while let Some(f) = queue.pop() {
        let r = cref.fact(f);
        for op_id in r.op_add.iter().chain(r.op_del.iter()) {
            if op_state[usize::from(op_id)] != 0 {
                continue;
            }
            op_state[usize::from(op_id)] = -1;
            for p in task.ops[op_id].pre.iter() {
                if fact_state[usize::from(p)] == 0 {
                    fact_state[usize::from(p)] = -1;
                    queue.push(p);
                }
            }
        }
    }

    let irrelevant_facts: IdSet<FactId> = task
        .facts
        .ids()
        .filter(|&f| fact_state[usize::from(f)] >= 0)
        .collect();
    let irrelevant_ops: IdSet<OpId> = task
        .ops
        .ids()
        .filter(|&o| op_state[usize::from(o)] >= 0)
        .collect();

    info!(
        "Irrelevance analysis DONE: irrelevant facts: {}, irrelevant ops: {}, static facts: {}",
        irrelevant_facts.len(),
        irrelevant_ops.len(),
        static_facts.len()
    );
    Ok(IrrelevanceResult {
        irrelevant_facts,
        irrelevant_ops,
        static_facts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strips::tests::task;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    #[test]
    fn static_init_fact_is_factored_out() {
        // fact 0 sits in init, no operator touches it
        let mut t = task(
            &["road", "a", "b"],
            &[("drive", &[0, 1], &[2], &[1])],
            &[0, 1],
            &[2],
        );
        let res = irrelevance_analysis(&t, &IdSet::new(), &IdSet::new()).unwrap();
        assert!(res.static_facts.contains(fid(0)));
        assert!(res.irrelevant_facts.contains(fid(0)));
        assert!(res.irrelevant_ops.is_empty());

        t.reduce(&res.irrelevant_facts, &res.irrelevant_ops);
        assert!(t.ops.iter().all(|op| !op.pre.contains(fid(2))));
        assert_eq!(t.facts.len(), 2);
    }

    #[test]
    fn operators_not_needed_for_the_goal_are_irrelevant() {
        // "decorate" adds a fact nothing needs
        let t = task(
            &["a", "b", "shiny"],
            &[("ab", &[0], &[1], &[0]), ("decorate", &[0], &[2], &[])],
            &[0],
            &[1],
        );
        let res = irrelevance_analysis(&t, &IdSet::new(), &IdSet::new()).unwrap();
        assert!(res.irrelevant_facts.contains(fid(2)));
        let decorate = OpId::from(1usize);
        assert!(res.irrelevant_ops.contains(decorate));
    }

    #[test]
    fn cond_eff_tasks_are_rejected() {
        let mut t = task(&["a", "b"], &[("ab", &[0], &[1], &[])], &[0], &[1]);
        let op = t.ops.ids().next().unwrap();
        t.ops[op].cond_eff.push(crate::strips::CondEff::default());
        t.refresh_has_cond_eff();
        assert!(irrelevance_analysis(&t, &IdSet::new(), &IdSet::new()).is_err());
    }
}
