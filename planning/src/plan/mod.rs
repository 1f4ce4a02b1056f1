//! Parsing and printing of hierarchical plans.
//!
//! The textual format frames the plan in `==>` / `<==`, lists one primitive
//! step per line, a `root` line, and one decomposition line per abstract
//! task (`<id> <name> <args> -> <method> <subtask ids>`). Arguments may be
//! written `name(a,b,c)` or `name a b c`.

pub mod decompress;

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use tracing::warn;

pub type PlanTaskId = u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanStep {
    pub name: String,
    pub args: Vec<String>,
    pub declared_primitive: bool,
}

/// A parsed plan. Tasks are looked up by id; the `contained_in` back-index
/// is derivative and rebuilt by the decompressor whenever the structure
/// changed.
#[derive(Default, Clone)]
pub struct ParsedPlan {
    pub tasks: BTreeMap<PlanTaskId, PlanStep>,
    /// The executable trace.
    pub primitive_plan: Vec<PlanTaskId>,
    /// Inverse of `primitive_plan`; kept in lock-step with it.
    pub pos_in_primitive_plan: BTreeMap<PlanTaskId, usize>,
    pub applied_method: BTreeMap<PlanTaskId, String>,
    pub subtasks: BTreeMap<PlanTaskId, Vec<PlanTaskId>>,
    pub root_tasks: Vec<PlanTaskId>,
    /// For each task, the task whose method contains it (absent for roots).
    pub contained_in: BTreeMap<PlanTaskId, PlanTaskId>,
    next_id: PlanTaskId,
}

impl ParsedPlan {
    /// Fresh ids come from a monotone counter seeded past every parsed id,
    /// so deleted ids are never reused.
    pub fn next_free_id(&mut self) -> PlanTaskId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The `pos_in_primitive_plan` map must be the exact inverse of the
    /// primitive plan sequence.
    pub fn check_primitive_index(&self) {
        assert_eq!(
            self.pos_in_primitive_plan.len(),
            self.primitive_plan.len(),
            "primitive plan index out of sync"
        );
        for (pos, id) in self.primitive_plan.iter().enumerate() {
            assert_eq!(
                self.pos_in_primitive_plan.get(id),
                Some(&pos),
                "primitive plan index drifted for task {id}"
            );
        }
    }
}

/// Splits `name[a,b,c]` into the name and its bracketed arguments.
pub(crate) fn parse_bracketed(s: &str) -> (String, Vec<String>) {
    match s.split_once('[') {
        None => (s.to_string(), Vec::new()),
        Some((name, rest)) => {
            let inner = rest.strip_suffix(']').unwrap_or(rest);
            let args = inner
                .split(',')
                .filter(|a| !a.is_empty())
                .map(|a| a.to_string())
                .collect();
            (name.to_string(), args)
        }
    }
}

/// Parses `name(a,b,c)`, `name a b c` or `name[a,b]` into a plan step.
fn parse_step(input: &str, declared_primitive: bool) -> PlanStep {
    let cleaned: String = input
        .chars()
        .map(|c| if c == '(' || c == ')' || c == ',' { ' ' } else { c })
        .collect();
    let mut tokens = cleaned.split_whitespace();
    let (name, mut args) = match tokens.next() {
        Some(first) => parse_bracketed(first),
        None => (String::new(), Vec::new()),
    };
    args.extend(tokens.map(|t| t.to_string()));
    PlanStep {
        name,
        args,
        declared_primitive,
    }
}

/// Parses a whitespace-separated id list; non-integer tokens are ignored
/// with a warning, negative ids are dropped the same way.
fn parse_id_list(input: &str) -> Vec<PlanTaskId> {
    let mut ids = Vec::new();
    for tok in input.split_whitespace() {
        match tok.parse::<i64>() {
            Ok(x) if x >= 0 => ids.push(x as PlanTaskId),
            Ok(x) => warn!("ignoring negative id {x} in id list"),
            Err(_) => warn!("expected integer but found {tok:?}, ignoring"),
        }
    }
    ids
}

fn parse_task_id(tok: &str) -> Result<PlanTaskId> {
    let id: i64 = tok
        .parse()
        .with_context(|| format!("expected a task id, found {tok:?}"))?;
    if id < 0 {
        bail!("negative id: {id}");
    }
    Ok(id as PlanTaskId)
}

/// Parses the plan format of the solvers' output stream.
pub fn parse_plan(input: &str) -> Result<ParsedPlan> {
    let mut lines = input.lines();
    for line in lines.by_ref() {
        if line.split_whitespace().any(|t| t == "==>") {
            break;
        }
    }

    let mut plan = ParsedPlan::default();
    let mut in_methods = false;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap();
        if head == "<==" {
            break;
        }

        if !in_methods {
            if head == "root" {
                plan.root_tasks = parse_id_list(&line[head.len()..]);
                in_methods = true;
                continue;
            }
            let id = parse_task_id(head)?;
            if plan.tasks.contains_key(&id) {
                bail!("two primitive tasks have the same id: {id}");
            }
            let step = parse_step(&line[head.len()..], true);
            plan.primitive_plan.push(id);
            plan.pos_in_primitive_plan.insert(id, plan.primitive_plan.len() - 1);
            plan.tasks.insert(id, step);
        } else {
            let id = parse_task_id(head)?;
            if plan.tasks.contains_key(&id) {
                bail!("two tasks have the same id: {id}");
            }
            let rest: Vec<&str> = tokens.collect();
            let arrow = rest
                .iter()
                .position(|&t| t == "->")
                .with_context(|| format!("missing '->' in decomposition line for task {id}"))?;
            let step = parse_step(&rest[..arrow].join(" "), false);
            let method = rest
                .get(arrow + 1)
                .with_context(|| format!("missing method name for task {id}"))?
                .to_string();
            let subtasks = parse_id_list(&rest[arrow + 2..].join(" "));
            plan.tasks.insert(id, step);
            plan.applied_method.insert(id, method);
            plan.subtasks.insert(id, subtasks);
        }
    }

    plan.next_id = plan.tasks.keys().max().map_or(0, |&m| m + 1);
    Ok(plan)
}

impl Display for ParsedPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "==>")?;
        for &id in &self.primitive_plan {
            let step = &self.tasks[&id];
            write!(f, "{id} {}", step.name)?;
            for a in &step.args {
                write!(f, " {a}")?;
            }
            writeln!(f)?;
        }
        write!(f, "root")?;
        for r in &self.root_tasks {
            write!(f, " {r}")?;
        }
        writeln!(f)?;
        for (&id, step) in &self.tasks {
            if step.declared_primitive {
                continue;
            }
            write!(f, "{id} {}", step.name)?;
            for a in &step.args {
                write!(f, " {a}")?;
            }
            write!(f, " -> {}", self.applied_method.get(&id).map_or("", |m| m.as_str()))?;
            if let Some(subs) = self.subtasks.get(&id) {
                for s in subs {
                    write!(f, " {s}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
some preamble
==>
0 pick a b
1 drop(a,b)
root 2
2 fetch a -> m-fetch 0 1
<==
";

    #[test]
    fn parses_primitives_roots_and_methods() {
        let plan = parse_plan(SIMPLE).unwrap();
        assert_eq!(plan.primitive_plan, vec![0, 1]);
        assert_eq!(plan.tasks[&0].name, "pick");
        assert_eq!(plan.tasks[&0].args, vec!["a", "b"]);
        // parenthesized argument form
        assert_eq!(plan.tasks[&1].name, "drop");
        assert_eq!(plan.tasks[&1].args, vec!["a", "b"]);
        assert_eq!(plan.root_tasks, vec![2]);
        assert_eq!(plan.applied_method[&2], "m-fetch");
        assert_eq!(plan.subtasks[&2], vec![0, 1]);
        assert!(!plan.tasks[&2].declared_primitive);
        plan.check_primitive_index();
    }

    #[test]
    fn print_then_parse_is_identity() {
        let plan = parse_plan(SIMPLE).unwrap();
        let printed = plan.to_string();
        let again = parse_plan(&printed).unwrap();
        assert_eq!(plan.primitive_plan, again.primitive_plan);
        assert_eq!(plan.tasks, again.tasks);
        assert_eq!(plan.subtasks, again.subtasks);
        assert_eq!(plan.root_tasks, again.root_tasks);
    }

    #[test]
    fn fresh_ids_are_monotone() {
        let mut plan = parse_plan(SIMPLE).unwrap();
        assert_eq!(plan.next_free_id(), 3);
        assert_eq!(plan.next_free_id(), 4);
        // deleting a task must not make its id reusable
        plan.tasks.remove(&2);
        assert_eq!(plan.next_free_id(), 5);
    }

    #[test]
    fn negative_ids_are_an_error() {
        let input = "==>\n-3 oops\nroot\n";
        assert!(parse_plan(input).is_err());
    }

    #[test]
    fn duplicate_ids_are_an_error() {
        let input = "==>\n0 a\n0 b\nroot 0\n";
        assert!(parse_plan(input).is_err());
    }

    #[test]
    fn non_integer_subtasks_are_skipped_with_a_warning() {
        let input = "==>\n0 go\nroot 1\n1 top -> m 0 garbage\n<==\n";
        let plan = parse_plan(input).unwrap();
        assert_eq!(plan.subtasks[&1], vec![0]);
    }

    #[test]
    fn missing_plan_marker_yields_an_empty_plan_error_free_input() {
        // a stream that never opens a plan parses to an empty plan
        let plan = parse_plan("no plan here\n").unwrap();
        assert!(plan.tasks.is_empty());
        assert!(plan.primitive_plan.is_empty());
    }

    #[test]
    fn bracketed_task_names() {
        let (name, args) = parse_bracketed("move[truck1,depot]");
        assert_eq!(name, "move");
        assert_eq!(args, vec!["truck1", "depot"]);
        let (name, args) = parse_bracketed("noop");
        assert_eq!(name, "noop");
        assert!(args.is_empty());
    }
}
