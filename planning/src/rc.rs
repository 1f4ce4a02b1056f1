//! Relaxed-composition (RC) model: a purely classical task whose reachable
//! goal states witness HTN decomposability, so any classical heuristic can
//! score HTN search states.
//!
//! The state bits of the HTN model are extended with one `tdr_` fact per
//! primitive (the task is reachable top-down) and one `bur_` fact per task
//! (the task has been produced bottom-up). Primitives require their TDR
//! fact and add their BUR fact; every method becomes an operator turning the
//! BUR facts of its subtasks into the BUR fact of the decomposed task.

use crate::htn::{HtnModel, TaskId};
use crate::strips::{Fact, FactId, Operator, StripsTask};
use anyhow::Result;
use tracing::info;

pub struct RcConfig {
    /// Cost of the operators generated from methods.
    pub method_cost: u32,
    /// Add the top-down-reachability facts and preconditions.
    pub use_tdr: bool,
}

impl Default for RcConfig {
    fn default() -> Self {
        RcConfig {
            method_cost: 1,
            use_tdr: true,
        }
    }
}

pub struct RcModel {
    pub strips: StripsTask,
    /// TDR fact per primitive task (only with `use_tdr`).
    pub tdr: Vec<Option<FactId>>,
    /// BUR fact per task.
    pub bur: Vec<FactId>,
    /// Number of operators stemming from primitives; the rest are methods.
    pub num_action_ops: usize,
}

impl RcModel {
    pub fn tdr_fact(&self, t: TaskId) -> Option<FactId> {
        self.tdr[usize::from(t)]
    }

    pub fn bur_fact(&self, t: TaskId) -> FactId {
        self.bur[usize::from(t)]
    }
}

/// Builds the RC model of the given HTN model.
pub fn build(htn: &HtnModel, cfg: &RcConfig) -> Result<RcModel> {
    debug_assert!(htn.check());
    info!(
        "Building RC model [tdr: {}, method-cost: {}]. facts: {}, actions: {}, methods: {}",
        cfg.use_tdr,
        cfg.method_cost,
        htn.fact_names.len(),
        htn.num_actions(),
        htn.methods.len()
    );

    let mut strips = StripsTask::default();
    for name in &htn.fact_names {
        strips.facts.add(Fact::new(name.clone()));
    }

    let mut tdr: Vec<Option<FactId>> = vec![None; htn.num_tasks()];
    if cfg.use_tdr {
        for a in 0..htn.num_actions() {
            let id = strips.facts.add(Fact::new(format!("tdr_{}", htn.task_names[a])));
            tdr[a] = Some(id);
        }
    }
    let bur: Vec<FactId> = (0..htn.num_tasks())
        .map(|t| strips.facts.add(Fact::new(format!("bur_{}", htn.task_names[t]))))
        .collect();

    // primitive tasks keep their operator, gated top-down and reporting
    // bottom-up
    for (a, action) in htn.actions.iter().enumerate() {
        let mut op = Operator::new(htn.task_names[a].clone());
        op.cost = action.cost;
        op.pre = action.pre.clone();
        if let Some(t) = tdr[a] {
            op.pre.add(t);
        }
        op.add = action.add.clone();
        op.add.add(bur[a]);
        op.del = action.del.clone();
        strips
            .ops
            .add(op)
            .expect("a primitive's RC operator always has an effect");
    }
    let num_action_ops = strips.ops.len();
    debug_assert_eq!(num_action_ops, htn.num_actions());

    // one operator per method: subtasks produced => decomposed task produced.
    // A method whose decomposed task is among its own subtasks normalizes to
    // a no-op (producing the task requires it already) and is dropped.
    let mut method_ops: Vec<Option<crate::strips::OpId>> = Vec::with_capacity(htn.methods.len());
    for m in &htn.methods {
        let mut op = Operator::new(format!(
            "{}@{}",
            m.name,
            htn.task_names[usize::from(m.task)]
        ));
        op.cost = cfg.method_cost;
        op.pre = m
            .distinct_subtasks()
            .iter()
            .map(|st| bur[usize::from(st)])
            .collect();
        op.add.add(bur[usize::from(m.task)]);
        method_ops.push(strips.ops.add(op));
    }

    strips.init = htn.init.clone();
    if cfg.use_tdr {
        for t in tdr.iter().flatten() {
            strips.init.add(*t);
        }
    }
    strips.goal = htn.goal.clone();
    strips.goal.add(bur[usize::from(htn.initial_task)]);

    #[cfg(debug_assertions)]
    check_rc(htn, &strips, &bur, &method_ops);
    #[cfg(not(debug_assertions))]
    let _ = &method_ops;

    info!(
        "RC model DONE. facts: {}, ops: {}",
        strips.facts.len(),
        strips.ops.len()
    );
    Ok(RcModel {
        strips,
        tdr,
        bur,
        num_action_ops,
    })
}

/// Method operators and subtask lists must mirror each other exactly, and no
/// operator may mention a fact twice in one set (sets make this structural).
#[cfg(debug_assertions)]
fn check_rc(
    htn: &HtnModel,
    strips: &StripsTask,
    bur: &[FactId],
    method_ops: &[Option<crate::strips::OpId>],
) {
    use deneb_collections::set::IdSet;
    for (m, op_id) in htn.methods.iter().zip(method_ops) {
        let Some(op_id) = op_id else { continue };
        let op = &strips.ops[*op_id];
        let expected: IdSet<FactId> = m
            .distinct_subtasks()
            .iter()
            .map(|st| bur[usize::from(st)])
            .collect();
        assert_eq!(
            op.pre, expected,
            "method operator preconditions must match the subtasks"
        );
        assert!(op.add.contains(bur[usize::from(m.task)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::htn::tests::{small_htn, tid};
    use crate::strips::OpId;
    use deneb_collections::set::IdSet;

    #[test]
    fn rc_model_shape() {
        let htn = small_htn();
        let rc = build(&htn, &RcConfig::default()).unwrap();

        // 3 state bits + 2 tdr + 4 bur
        assert_eq!(rc.strips.facts.len(), 3 + 2 + 4);
        // 2 primitives + 3 methods
        assert_eq!(rc.strips.ops.len(), 5);
        assert_eq!(rc.num_action_ops, 2);

        // primitives gained the TDR precondition and the BUR add
        let walk = &rc.strips.ops[OpId::from(0usize)];
        assert!(walk.pre.contains(rc.tdr_fact(tid(0)).unwrap()));
        assert!(walk.add.contains(rc.bur_fact(tid(0))));

        // the goal requires the initial task to be produced
        assert!(rc.strips.goal.contains(rc.bur_fact(tid(3))));
        // all TDR facts hold initially
        assert!(rc.strips.init.contains(rc.tdr_fact(tid(1)).unwrap()));
    }

    #[test]
    fn method_operators_mirror_subtasks() {
        let htn = small_htn();
        let rc = build(&htn, &RcConfig::default()).unwrap();
        let m_walk_open = &rc.strips.ops[OpId::from(2usize)];
        assert_eq!(m_walk_open.name, "m-walk-open@enter");
        let expected: IdSet<FactId> =
            [rc.bur_fact(tid(0)), rc.bur_fact(tid(1))].into_iter().collect();
        assert_eq!(m_walk_open.pre, expected);
        assert_eq!(m_walk_open.add.iter().collect::<Vec<_>>(), vec![rc.bur_fact(tid(2))]);
        assert_eq!(m_walk_open.cost, 1);
    }

    #[test]
    fn rc_plan_witnesses_a_decomposition() {
        // executing walk, open, then the method operators reaches the goal
        let htn = small_htn();
        let rc = build(&htn, &RcConfig::default()).unwrap();
        let mut state = rc.strips.init.clone();
        for op_idx in [0usize, 1, 2, 4] {
            let op = &rc.strips.ops[OpId::from(op_idx)];
            assert!(op.pre.is_subset(&state), "operator {} not applicable", op.name);
            state.minus(&op.del);
            state.union_with(&op.add);
        }
        assert!(rc.strips.goal.is_subset(&state));
    }

    #[test]
    fn without_tdr_no_gating_facts_exist() {
        let htn = small_htn();
        let rc = build(
            &htn,
            &RcConfig {
                method_cost: 0,
                use_tdr: false,
            },
        )
        .unwrap();
        assert_eq!(rc.strips.facts.len(), 3 + 4);
        assert!(rc.tdr_fact(tid(0)).is_none());
        let m_top = &rc.strips.ops[OpId::from(4usize)];
        assert_eq!(m_top.cost, 0);
    }
}
