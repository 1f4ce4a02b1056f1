use crate::strips::{FactId, OpId, StripsTask};
use deneb_collections::set::IdSet;

/// Per-fact cross-references into the rest of the task.
#[derive(Default, Clone)]
pub struct FactCrossRef {
    pub is_init: bool,
    pub is_goal: bool,
    /// Operators with this fact in their precondition.
    pub op_pre: IdSet<OpId>,
    /// Operators with this fact among their add effects.
    pub op_add: IdSet<OpId>,
    /// Operators with this fact among their delete effects.
    pub op_del: IdSet<OpId>,
}

pub struct FactCrossRefs {
    facts: Vec<FactCrossRef>,
}

impl FactCrossRefs {
    /// Builds the selected cross-references; the flags keep the construction
    /// as cheap as each caller needs. Conditional effects contribute to the
    /// add/del references of their operator.
    pub fn new(
        task: &StripsTask,
        init: bool,
        goal: bool,
        op_pre: bool,
        op_add: bool,
        op_del: bool,
    ) -> FactCrossRefs {
        let mut facts = vec![FactCrossRef::default(); task.facts.len()];

        if init {
            for f in task.init.iter() {
                facts[usize::from(f)].is_init = true;
            }
        }
        if goal {
            for f in task.goal.iter() {
                facts[usize::from(f)].is_goal = true;
            }
        }

        for (op_id, op) in task.ops.entries() {
            if op_pre {
                for f in op.pre.iter() {
                    facts[usize::from(f)].op_pre.add(op_id);
                }
            }
            if op_add {
                for f in op.add.iter() {
                    facts[usize::from(f)].op_add.add(op_id);
                }
                for ce in &op.cond_eff {
                    for f in ce.add.iter() {
                        facts[usize::from(f)].op_add.add(op_id);
                    }
                }
            }
            if op_del {
                for f in op.del.iter() {
                    facts[usize::from(f)].op_del.add(op_id);
                }
                for ce in &op.cond_eff {
                    for f in ce.del.iter() {
                        facts[usize::from(f)].op_del.add(op_id);
                    }
                }
            }
        }

        FactCrossRefs { facts }
    }

    pub fn fact(&self, f: FactId) -> &FactCrossRef {
        &self.facts[usize::from(f)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strips::tests::task;

    #[test]
    fn references_point_back() {
        let t = task(
            &["a", "b", "c"],
            &[("x", &[0], &[1], &[]), ("y", &[1], &[2], &[1])],
            &[0],
            &[2],
        );
        let cref = FactCrossRefs::new(&t, true, true, true, true, true);
        let a = FactId::from(0usize);
        let b = FactId::from(1usize);
        assert!(cref.fact(a).is_init);
        assert!(!cref.fact(a).is_goal);
        assert_eq!(cref.fact(b).op_add.len(), 1);
        assert_eq!(cref.fact(b).op_pre.len(), 1);
        assert_eq!(cref.fact(b).op_del.len(), 1);
    }
}
