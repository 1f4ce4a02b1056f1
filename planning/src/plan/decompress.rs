//! Reversal of the encoding tricks HTN compilers leave in emitted plans:
//! compressed macro-actions (`%b1#n1#b2#n2%`), compressed methods
//! (`<main;task[args];method;pos;translation>`), and artificial tasks or
//! methods (`_`-prefixed, `_!` for the ones that must go first).
//!
//! The conversion is a fixed point. The processing order matters: urgent
//! `_!` methods first, then macro expansion together with `_!` tasks, then
//! compressed methods, then artificial methods, then artificial tasks, and
//! finally the `|`-suffix cleanup. Expanding in a different order can ask a
//! compressed method to reassemble subtasks that still contain unexpanded
//! markers.

use crate::plan::{parse_bracketed, ParsedPlan, PlanStep, PlanTaskId};
use std::collections::BTreeSet;
use tracing::debug;

/// Rebuilds the `contained_in` back-index from the subtask lists.
fn update_index(plan: &mut ParsedPlan) {
    plan.contained_in.clear();
    for (&task, subs) in &plan.subtasks {
        for &sub in subs {
            plan.contained_in.insert(sub, task);
        }
    }
}

/// Removes an artificial task: a primitive is spliced out of the primitive
/// plan, an abstract task is replaced by its subtasks in its parent (or in
/// the root list).
fn compress_task(plan: &mut ParsedPlan, task: PlanTaskId) {
    let subtasks_of_removed: Vec<PlanTaskId> = if plan.tasks[&task].declared_primitive {
        let pos = plan
            .primitive_plan
            .iter()
            .position(|&t| t == task)
            .unwrap_or_else(|| {
                panic!("declared primitive {task} not contained in primitive plan")
            });
        plan.primitive_plan.remove(pos);
        plan.pos_in_primitive_plan.remove(&task);
        for later in &plan.primitive_plan[pos..] {
            *plan.pos_in_primitive_plan.get_mut(later).expect("indexed primitive") -= 1;
        }
        Vec::new()
    } else {
        plan.subtasks.get(&task).cloned().unwrap_or_default()
    };

    let parent = plan.contained_in.get(&task).copied();
    let current: Vec<PlanTaskId> = match parent {
        Some(p) => plan.subtasks[&p].clone(),
        None => plan.root_tasks.clone(),
    };
    let mut new_ids = Vec::with_capacity(current.len() + subtasks_of_removed.len());
    for id in current {
        if id == task {
            new_ids.extend(subtasks_of_removed.iter().copied());
        } else {
            new_ids.push(id);
        }
    }
    for &id in &new_ids {
        match parent {
            Some(p) => {
                plan.contained_in.insert(id, p);
            }
            None => {
                plan.contained_in.remove(&id);
            }
        }
    }
    match parent {
        Some(p) => {
            plan.subtasks.insert(p, new_ids);
        }
        None => plan.root_tasks = new_ids,
    }

    plan.tasks.remove(&task);
    plan.applied_method.remove(&task);
    plan.subtasks.remove(&task);
    plan.contained_in.remove(&task);
}

/// Batch removal of artificial primitives, fixing up the primitive-plan
/// positions in one sweep.
fn compress_primitives(plan: &mut ParsedPlan, prims: &BTreeSet<PlanTaskId>) {
    let mut removed = 0usize;
    let mut new_plan = Vec::with_capacity(plan.primitive_plan.len());
    for &p in &plan.primitive_plan.clone() {
        if prims.contains(&p) {
            plan.pos_in_primitive_plan.remove(&p);
            removed += 1;
        } else {
            let pos = plan.pos_in_primitive_plan.get_mut(&p).expect("indexed primitive");
            *pos -= removed;
            assert_eq!(*pos, new_plan.len(), "primitive plan positions drifted");
            new_plan.push(p);
        }
    }
    assert_eq!(
        removed,
        prims.len(),
        "not all artificial primitives were in the primitive plan"
    );
    plan.primitive_plan = new_plan;

    for &task in prims {
        let parent = plan.contained_in.get(&task).copied();
        let keep = |ids: &[PlanTaskId]| ids.iter().copied().filter(|&i| i != task).collect();
        match parent {
            Some(p) => {
                let pruned = keep(&plan.subtasks[&p]);
                plan.subtasks.insert(p, pruned);
            }
            None => plan.root_tasks = keep(&plan.root_tasks),
        }
        plan.tasks.remove(&task);
        plan.applied_method.remove(&task);
        plan.subtasks.remove(&task);
        plan.contained_in.remove(&task);
    }
}

/// Expands a compressed macro-action `%b1#n1#b2#n2%`: one fresh primitive
/// per block, consuming the declared number of arguments from the macro's
/// argument list, spliced in place in both the containing method and the
/// primitive plan.
fn expand_macro(plan: &mut ParsedPlan, task: PlanTaskId) {
    let step = plan.tasks[&task].clone();
    let name = &step.name;
    debug!("expanding compressed action {task} {name}");
    let inner = &name[1..name.len() - 1];
    let blocks: Vec<&str> = inner.split('#').collect();
    assert!(
        blocks.len() % 2 == 0,
        "malformed compressed action name: {name}"
    );

    let mut replacement = Vec::with_capacity(blocks.len() / 2);
    let mut arg_pos = 0usize;
    for pair in blocks.chunks(2) {
        let count: usize = pair[1]
            .parse()
            .unwrap_or_else(|_| panic!("malformed argument count in {name}"));
        let id = plan.next_free_id();
        plan.tasks.insert(
            id,
            PlanStep {
                name: pair[0].to_string(),
                args: step.args[arg_pos..arg_pos + count].to_vec(),
                declared_primitive: true,
            },
        );
        arg_pos += count;
        replacement.push(id);
    }

    plan.tasks.remove(&task);

    // splice into every subtask list mentioning the macro
    for subs in plan.subtasks.values_mut() {
        if subs.contains(&task) {
            let mut renewed = Vec::with_capacity(subs.len() + replacement.len());
            for &i in subs.iter() {
                if i == task {
                    renewed.extend(replacement.iter().copied());
                } else {
                    renewed.push(i);
                }
            }
            *subs = renewed;
        }
    }

    // splice into the primitive plan, rebuilding the position index
    let mut new_plan = Vec::with_capacity(plan.primitive_plan.len() + replacement.len());
    plan.pos_in_primitive_plan.clear();
    for &i in &plan.primitive_plan.clone() {
        if i == task {
            for &j in &replacement {
                plan.pos_in_primitive_plan.insert(j, new_plan.len());
                new_plan.push(j);
            }
        } else {
            plan.pos_in_primitive_plan.insert(i, new_plan.len());
            new_plan.push(i);
        }
    }
    plan.primitive_plan = new_plan;
}

/// Expands a compressed method `<main;task[args];inner;pos;translation>`:
/// reintroduces the folded-away inner task with its own method and restores
/// the outer method's subtask list.
fn expand_compressed_method(plan: &mut ParsedPlan, task: PlanTaskId) {
    let method_name = plan.applied_method[&task].clone();
    let method_subtasks = plan.subtasks[&task].clone();
    debug!("expanding compressed method of task {task}: {method_name}");

    // split on top-level ';', honoring nested <...> in the block contents
    let inner = &method_name[1..method_name.len() - 1];
    let mut blocks: Vec<String> = vec![String::new()];
    let mut level = 0;
    for c in inner.chars() {
        match c {
            ';' if level == 0 => blocks.push(String::new()),
            '<' => {
                level += 1;
                blocks.last_mut().unwrap().push(c);
            }
            '>' => {
                level -= 1;
                blocks.last_mut().unwrap().push(c);
            }
            _ => blocks.last_mut().unwrap().push(c),
        }
    }
    assert_eq!(blocks.len(), 5, "malformed compressed method name: {method_name}");

    let main_method = blocks[0].clone();
    let (inner_task, inner_task_args) = parse_bracketed(&blocks[1]);
    let inner_method = blocks[2].clone();
    let inner_pos: usize = blocks[3]
        .parse()
        .unwrap_or_else(|_| panic!("malformed inner position in {method_name}"));
    let translation: Vec<i64> = blocks[4]
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .unwrap_or_else(|_| panic!("malformed translation entry in {method_name}"))
        })
        .collect();
    assert_eq!(
        translation.len(),
        method_subtasks.len(),
        "translation length does not match the subtask count"
    );

    // subtasks moving into the reintroduced inner task, by inner position
    let mut inner_by_pos: std::collections::BTreeMap<usize, PlanTaskId> = Default::default();
    for (i, &t) in translation.iter().enumerate() {
        if t < 0 {
            inner_by_pos.insert((-t - 1) as usize, method_subtasks[i]);
        }
    }

    let new_task = plan.next_free_id();
    plan.tasks.insert(
        new_task,
        PlanStep {
            name: inner_task,
            args: inner_task_args,
            declared_primitive: false,
        },
    );
    plan.applied_method.insert(new_task, inner_method);
    plan.subtasks
        .insert(new_task, inner_by_pos.values().copied().collect());

    // the outer method keeps its remaining subtasks in translation order,
    // with the new task inserted at its declared position
    let mut outer_by_pos: std::collections::BTreeMap<usize, PlanTaskId> = Default::default();
    for (i, &t) in translation.iter().enumerate() {
        if t >= 0 {
            outer_by_pos.insert(t as usize, method_subtasks[i]);
        }
    }
    let mut outer: Vec<PlanTaskId> = outer_by_pos.values().copied().collect();
    outer.insert(inner_pos.min(outer.len()), new_task);
    plan.applied_method.insert(task, main_method);
    plan.subtasks.insert(task, outer);
}

/// Drives the fixed point. Each round rebuilds the back-index, applies the
/// most urgent applicable rewrite class, and restarts until nothing marked
/// by a compiler remains.
pub fn convert(plan: &mut ParsedPlan) {
    loop {
        update_index(plan);

        // urgent artificial methods block everything else
        let urgent: Vec<PlanTaskId> = plan
            .applied_method
            .iter()
            .filter(|(_, m)| m.starts_with("_!"))
            .map(|(&t, _)| t)
            .collect();
        if !urgent.is_empty() {
            for t in urgent {
                compress_task(plan, t);
            }
            continue;
        }

        // compressed macro-actions and urgent artificial tasks
        let expand: Vec<PlanTaskId> = plan
            .tasks
            .iter()
            .filter(|(_, s)| s.name.starts_with('%'))
            .map(|(&t, _)| t)
            .collect();
        let urgent_tasks: Vec<PlanTaskId> = plan
            .tasks
            .iter()
            .filter(|(_, s)| s.name.starts_with("_!"))
            .map(|(&t, _)| t)
            .collect();
        if !expand.is_empty() || !urgent_tasks.is_empty() {
            for t in urgent_tasks {
                compress_task(plan, t);
            }
            for t in expand {
                expand_macro(plan, t);
            }
            continue;
        }

        // compressed methods
        let compressed: Vec<PlanTaskId> = plan
            .applied_method
            .iter()
            .filter(|(_, m)| m.starts_with('<'))
            .map(|(&t, _)| t)
            .collect();
        if !compressed.is_empty() {
            for t in compressed {
                expand_compressed_method(plan, t);
            }
            continue;
        }

        // remaining artificial methods; removing them may invalidate
        // expansion markers, which is why they wait until here
        let artificial_methods: Vec<PlanTaskId> = plan
            .applied_method
            .iter()
            .filter(|(_, m)| m.starts_with('_'))
            .map(|(&t, _)| t)
            .collect();
        if !artificial_methods.is_empty() {
            for t in artificial_methods {
                compress_task(plan, t);
            }
            continue;
        }

        // remaining artificial tasks: primitives in one batch, the rest one
        // by one
        let mut artificial_prims: BTreeSet<PlanTaskId> = BTreeSet::new();
        let mut artificial_abstract: Vec<PlanTaskId> = Vec::new();
        for (&t, step) in &plan.tasks {
            if step.name.starts_with('_') {
                if step.declared_primitive {
                    artificial_prims.insert(t);
                } else {
                    artificial_abstract.push(t);
                }
            }
        }
        if !artificial_prims.is_empty() || !artificial_abstract.is_empty() {
            compress_primitives(plan, &artificial_prims);
            update_index(plan);
            for t in artificial_abstract {
                compress_task(plan, t);
            }
            continue;
        }

        break;
    }

    // compiler-added pipe suffixes
    for step in plan.tasks.values_mut() {
        if let Some(i) = step.name.find('|') {
            step.name.truncate(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parse_plan;

    fn converted(input: &str) -> ParsedPlan {
        let mut plan = parse_plan(input).unwrap();
        convert(&mut plan);
        plan.check_primitive_index();
        plan
    }

    #[test]
    fn macro_action_expansion() {
        let input = "\
==>
0 %foo#1#bar#2%(x,y,z)
root 1
1 top -> m 0
<==
";
        let plan = converted(input);
        assert_eq!(plan.primitive_plan.len(), 2);
        let first = &plan.tasks[&plan.primitive_plan[0]];
        let second = &plan.tasks[&plan.primitive_plan[1]];
        assert_eq!((first.name.as_str(), first.args.as_slice()), ("foo", ["x".to_string()].as_slice()));
        assert_eq!(second.name, "bar");
        assert_eq!(second.args, vec!["y", "z"]);
        // the containing method was rewritten to the fresh ids
        assert_eq!(plan.subtasks[&1], plan.primitive_plan);
        // the macro's id is gone
        assert!(!plan.tasks.contains_key(&0));
    }

    #[test]
    fn compressed_method_expansion() {
        // outer subtasks [s0, s1, s2, s3]; translation 0,-1,-2,1 moves s1,s2
        // into a reintroduced inner task at position 1
        let input = "\
==>
10 a
11 b
12 c
13 d
root 5
5 top t1 -> <M;t[a,b];N;1;0,-1,-2,1> 10 11 12 13
<==
";
        let plan = converted(input);
        // new task got the next free id
        let new_task = 14;
        assert_eq!(plan.tasks[&new_task].name, "t");
        assert_eq!(plan.tasks[&new_task].args, vec!["a", "b"]);
        assert_eq!(plan.applied_method[&new_task], "N");
        assert_eq!(plan.subtasks[&new_task], vec![11, 12]);

        assert_eq!(plan.applied_method[&5], "M");
        assert_eq!(plan.subtasks[&5], vec![10, new_task, 13]);
    }

    #[test]
    fn urgent_artificial_method_is_removed_first() {
        // the method of task 2 is urgent; task 2 dissolves into its subtasks
        let input = "\
==>
0 a
1 b
root 2
2 _phantom -> _!m 3
3 real -> m-real 0 1
<==
";
        let plan = converted(input);
        assert_eq!(plan.root_tasks, vec![3]);
        assert!(!plan.tasks.contains_key(&2));
        assert_eq!(plan.subtasks[&3], vec![0, 1]);
    }

    #[test]
    fn artificial_primitive_batch_removal() {
        let input = "\
==>
0 _noop
1 real-a
2 _gap
3 real-b
root 4
4 top -> m 0 1 2 3
<==
";
        let plan = converted(input);
        assert_eq!(plan.primitive_plan, vec![1, 3]);
        assert_eq!(plan.pos_in_primitive_plan[&1], 0);
        assert_eq!(plan.pos_in_primitive_plan[&3], 1);
        assert_eq!(plan.subtasks[&4], vec![1, 3]);
    }

    #[test]
    fn artificial_abstract_task_dissolves_into_parent() {
        let input = "\
==>
0 a
1 b
root 3
3 top -> m-top 2
2 _bridge -> m-bridge 0 1
<==
";
        let plan = converted(input);
        assert!(!plan.tasks.contains_key(&2));
        assert_eq!(plan.subtasks[&3], vec![0, 1]);
    }

    #[test]
    fn artificial_root_dissolves_into_root_list() {
        let input = "\
==>
0 a
root 1
1 _top -> _m 0
<==
";
        let plan = converted(input);
        assert_eq!(plan.root_tasks, vec![0]);
        assert!(plan.applied_method.is_empty());
    }

    #[test]
    fn pipe_suffix_is_stripped() {
        let input = "\
==>
0 walk|compiled_0
root 1
1 go|x -> m 0
<==
";
        let plan = converted(input);
        assert_eq!(plan.tasks[&0].name, "walk");
        assert_eq!(plan.tasks[&1].name, "go");
    }

    #[test]
    fn conversion_is_idempotent() {
        let input = "\
==>
0 %foo#1#bar#2%(x,y,z)
5 _setup
root 1
1 top -> <M;t[a];N;0;-1,0> 6 5
6 tail -> m-tail 0
<==
";
        let mut plan = parse_plan(input).unwrap();
        convert(&mut plan);
        let once = plan.to_string();
        let mut plan2 = parse_plan(&once).unwrap();
        convert(&mut plan2);
        assert_eq!(once, plan2.to_string());
    }

    #[test]
    fn all_marker_kinds_converge_together() {
        // a macro below a task folded away by a compressed method; the
        // method expansion reintroduces the inner task, the macro expands,
        // and the artificial primitive disappears
        let input = "\
==>
0 %foo#1#bar#2%(x,y,z)
5 _setup
root 1
1 top -> <M;t[a];N;0;-1,0> 6 5
6 tail -> m-tail 0
<==
";
        let plan = converted(input);
        assert!(plan.tasks.values().all(|s| !s.name.starts_with('%')));
        assert!(plan.tasks.values().all(|s| !s.name.starts_with('_')));
        assert!(plan
            .applied_method
            .values()
            .all(|m| !m.starts_with('<') && !m.starts_with('_')));
        let names: Vec<&str> = plan
            .primitive_plan
            .iter()
            .map(|t| plan.tasks[t].name.as_str())
            .collect();
        assert_eq!(names, vec!["foo", "bar"]);
        // top now applies the outer method to the reintroduced task
        assert_eq!(plan.applied_method[&1], "M");
    }
}
