//! The grounded HTN model consumed by the relaxed-composition construction.

use deneb_collections::create_ref_type;
use deneb_collections::set::IdSet;
use crate::strips::FactId;

create_ref_type!(TaskId);
create_ref_type!(MethodId);

/// A primitive task: a classical operator over the model's state bits.
#[derive(Clone)]
pub struct HtnOperator {
    pub pre: IdSet<FactId>,
    pub add: IdSet<FactId>,
    pub del: IdSet<FactId>,
    pub cost: u32,
}

/// Decomposition method: rewrites `task` into the ordered `subtasks`.
#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub task: TaskId,
    pub subtasks: Vec<TaskId>,
}

impl Method {
    /// The sorted, duplicate-free subtask list.
    pub fn distinct_subtasks(&self) -> IdSet<TaskId> {
        self.subtasks.iter().copied().collect()
    }
}

/// A grounded hierarchical task network.
///
/// Tasks `0..num_actions` are primitive and carry an [`HtnOperator`];
/// the remaining tasks are abstract and are decomposed by methods.
pub struct HtnModel {
    /// Names of the state bits.
    pub fact_names: Vec<String>,
    /// Operators of the primitive tasks, index-aligned with the first
    /// `num_actions` entries of `task_names`.
    pub actions: Vec<HtnOperator>,
    /// Names of all tasks, primitives first.
    pub task_names: Vec<String>,
    pub methods: Vec<Method>,
    pub initial_task: TaskId,
    pub init: IdSet<FactId>,
    pub goal: IdSet<FactId>,
}

impl HtnModel {
    pub fn num_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn num_tasks(&self) -> usize {
        self.task_names.len()
    }

    pub fn is_primitive(&self, t: TaskId) -> bool {
        usize::from(t) < self.actions.len()
    }

    pub fn tasks(&self) -> impl Iterator<Item = TaskId> {
        (0..self.task_names.len()).map(TaskId::from)
    }

    pub fn methods(&self) -> impl Iterator<Item = MethodId> {
        (0..self.methods.len()).map(MethodId::from)
    }

    /// Back-reference: the methods decomposing each task.
    pub fn decomposed_by(&self) -> Vec<Vec<MethodId>> {
        let mut res = vec![Vec::new(); self.num_tasks()];
        for (mi, m) in self.methods.iter().enumerate() {
            res[usize::from(m.task)].push(MethodId::from(mi));
        }
        res
    }

    /// Back-reference: the methods each task appears in as a subtask.
    pub fn subtask_of(&self) -> Vec<Vec<MethodId>> {
        let mut res = vec![Vec::new(); self.num_tasks()];
        for (mi, m) in self.methods.iter().enumerate() {
            for st in m.distinct_subtasks().iter() {
                res[usize::from(st)].push(MethodId::from(mi));
            }
        }
        res
    }

    /// Structural sanity of the model; used by debug assertions.
    pub fn check(&self) -> bool {
        self.actions.len() <= self.task_names.len()
            && usize::from(self.initial_task) < self.num_tasks()
            && self
                .methods
                .iter()
                .all(|m| {
                    usize::from(m.task) < self.num_tasks()
                        && m.subtasks.iter().all(|&s| usize::from(s) < self.num_tasks())
                })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    pub(crate) fn tid(i: usize) -> TaskId {
        TaskId::from(i)
    }

    /// Two primitives (walk, open), an abstract `enter` decomposed either
    /// into walk;open or into open alone, plus a top task.
    pub(crate) fn small_htn() -> HtnModel {
        let walk = HtnOperator {
            pre: [fid(0)].into_iter().collect(),
            add: [fid(1)].into_iter().collect(),
            del: [fid(0)].into_iter().collect(),
            cost: 1,
        };
        let open = HtnOperator {
            pre: [fid(1)].into_iter().collect(),
            add: [fid(2)].into_iter().collect(),
            del: IdSet::new(),
            cost: 1,
        };
        HtnModel {
            fact_names: vec!["outside".into(), "at-door".into(), "inside".into()],
            actions: vec![walk, open],
            task_names: vec!["walk".into(), "open".into(), "enter".into(), "top".into()],
            methods: vec![
                Method {
                    name: "m-walk-open".into(),
                    task: tid(2),
                    subtasks: vec![tid(0), tid(1)],
                },
                Method {
                    name: "m-open".into(),
                    task: tid(2),
                    subtasks: vec![tid(1)],
                },
                Method {
                    name: "m-top".into(),
                    task: tid(3),
                    subtasks: vec![tid(2)],
                },
            ],
            initial_task: tid(3),
            init: [fid(0)].into_iter().collect(),
            goal: [fid(2)].into_iter().collect(),
        }
    }

    #[test]
    fn back_references() {
        let htn = small_htn();
        assert!(htn.check());
        let dec = htn.decomposed_by();
        assert_eq!(dec[2].len(), 2);
        assert_eq!(dec[3].len(), 1);
        let sub = htn.subtask_of();
        assert_eq!(sub[1].len(), 2, "open is a subtask of both enter methods");
        assert_eq!(sub[3].len(), 0);
    }

    #[test]
    fn distinct_subtasks_are_sorted_and_deduplicated() {
        let m = Method {
            name: "m".into(),
            task: tid(1),
            subtasks: vec![tid(2), tid(0), tid(2)],
        };
        let d = m.distinct_subtasks();
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![tid(0), tid(2)]);
    }
}
