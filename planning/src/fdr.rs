//! Projection of the STRIPS task onto finite-domain variables and the
//! Fast-Downward textual output format.

use crate::mgroup::MGroups;
use crate::mutex::MutexPairs;
use crate::strips::{FactId, StripsTask};
use anyhow::Result;
use deneb_collections::set::IdSet;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::info;

/// Variable allocation policy.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VarAlloc {
    /// Exactly-one groups first (they need no "none of those" value),
    /// largest first within each class.
    EssentialFirst,
    /// Purely largest-first over the uncovered facts.
    LargestFirst,
    /// Largest-first over whole groups; a fact appearing in several mutex
    /// groups is encoded into every corresponding variable.
    LargestFirstMulti,
}

pub struct FdrValue {
    pub name: String,
    /// `None` encodes "none of those".
    pub fact: Option<FactId>,
}

pub struct FdrVar {
    pub name: String,
    pub values: Vec<FdrValue>,
}

impl FdrVar {
    pub fn none_value(&self) -> Option<usize> {
        self.values.iter().position(|v| v.fact.is_none())
    }
}

pub struct FdrVars {
    pub vars: Vec<FdrVar>,
    /// Per fact, every (variable, value) pair encoding it; the first entry
    /// is the primary encoding (the back-mapping is by fact, not by group).
    encodings: Vec<Vec<(usize, usize)>>,
}

impl FdrVars {
    pub fn encodings(&self, f: FactId) -> &[(usize, usize)] {
        &self.encodings[usize::from(f)]
    }

    pub fn primary(&self, f: FactId) -> (usize, usize) {
        self.encodings[usize::from(f)][0]
    }

    /// Allocates variables from the mutex groups; facts covered by no group
    /// become binary variables.
    pub fn allocate(strips: &StripsTask, mgroups: &MGroups, alloc: VarAlloc) -> FdrVars {
        let mut vars: Vec<FdrVar> = Vec::new();
        let mut encodings: Vec<Vec<(usize, usize)>> = vec![Vec::new(); strips.facts.len()];
        let mut uncovered: IdSet<FactId> = strips.facts.ids().collect();

        let mut groups: Vec<&crate::mgroup::MGroup> = mgroups.iter().collect();
        loop {
            let pick = match alloc {
                VarAlloc::EssentialFirst => groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.facts.intersection_size(&uncovered) >= 2)
                    .max_by_key(|(_, g)| {
                        (g.is_exactly_one, g.facts.intersection_size(&uncovered))
                    })
                    .map(|(i, _)| i),
                VarAlloc::LargestFirst => groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.facts.intersection_size(&uncovered) >= 2)
                    .max_by_key(|(_, g)| g.facts.intersection_size(&uncovered))
                    .map(|(i, _)| i),
                VarAlloc::LargestFirstMulti => groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.facts.intersection_size(&uncovered) >= 1)
                    .max_by_key(|(_, g)| g.facts.len())
                    .map(|(i, _)| i),
            };
            let Some(gi) = pick else { break };
            let group = groups.remove(gi);

            let members: IdSet<FactId> = match alloc {
                // in multi mode the whole group becomes the domain even if
                // parts of it are covered elsewhere
                VarAlloc::LargestFirstMulti => group.facts.clone(),
                _ => group.facts.intersection(&uncovered),
            };
            let full_group = members == group.facts;
            let var_idx = vars.len();
            let mut values: Vec<FdrValue> = members
                .iter()
                .map(|f| FdrValue {
                    name: format!("Atom {}", strips.facts[f].name),
                    fact: Some(f),
                })
                .collect();
            // an exactly-one group always has one member true; a partial
            // domain or a plain mutex group needs the escape value
            if !(full_group && group.is_exactly_one) {
                values.push(FdrValue {
                    name: "<none of those>".to_string(),
                    fact: None,
                });
            }
            for (vi, value) in values.iter().enumerate() {
                if let Some(f) = value.fact {
                    encodings[usize::from(f)].push((var_idx, vi));
                }
            }
            uncovered.minus(&members);
            vars.push(FdrVar {
                name: format!("var{var_idx}"),
                values,
            });
        }

        // binary variables for everything left over
        for f in uncovered.iter() {
            let var_idx = vars.len();
            encodings[usize::from(f)].push((var_idx, 0));
            vars.push(FdrVar {
                name: format!("var{var_idx}"),
                values: vec![
                    FdrValue {
                        name: format!("Atom {}", strips.facts[f].name),
                        fact: Some(f),
                    },
                    FdrValue {
                        name: "<none of those>".to_string(),
                        fact: None,
                    },
                ],
            });
        }

        info!(
            "FDR variables allocated ({:?}): {} variables for {} facts",
            alloc,
            vars.len(),
            strips.facts.len()
        );
        FdrVars { vars, encodings }
    }
}

/// Writes the task in the Fast-Downward translator format.
pub fn write_fd(
    strips: &StripsTask,
    mgroups: &MGroups,
    _mutex: &MutexPairs,
    vars: &FdrVars,
    out: &mut dyn Write,
) -> Result<()> {
    writeln!(out, "begin_version\n3\nend_version")?;
    writeln!(out, "begin_metric\n1\nend_metric")?;

    writeln!(out, "{}", vars.vars.len())?;
    for var in &vars.vars {
        writeln!(out, "begin_variable")?;
        writeln!(out, "{}", var.name)?;
        writeln!(out, "-1")?;
        writeln!(out, "{}", var.values.len())?;
        for v in &var.values {
            writeln!(out, "{}", v.name)?;
        }
        writeln!(out, "end_variable")?;
    }

    // mutex groups, in the primary encoding
    writeln!(out, "{}", mgroups.len())?;
    for mg in mgroups.iter() {
        writeln!(out, "begin_mutex_group")?;
        writeln!(out, "{}", mg.facts.len())?;
        for f in mg.facts.iter() {
            let (var, val) = vars.primary(f);
            writeln!(out, "{var} {val}")?;
        }
        writeln!(out, "end_mutex_group")?;
    }

    // initial state: per variable the value whose fact holds initially
    writeln!(out, "begin_state")?;
    for var in &vars.vars {
        let val = var
            .values
            .iter()
            .position(|v| v.fact.is_some_and(|f| strips.init.contains(f)))
            .or_else(|| var.none_value())
            .expect("initial state leaves an exactly-one variable without a value");
        writeln!(out, "{val}")?;
    }
    writeln!(out, "end_state")?;

    writeln!(out, "begin_goal")?;
    writeln!(out, "{}", strips.goal.len())?;
    for f in strips.goal.iter() {
        let (var, val) = vars.primary(f);
        writeln!(out, "{var} {val}")?;
    }
    writeln!(out, "end_goal")?;

    writeln!(out, "{}", strips.ops.len())?;
    for op in strips.ops.iter() {
        // per-variable view of the operator
        let mut pre_val: BTreeMap<usize, usize> = BTreeMap::new();
        let mut post_val: BTreeMap<usize, usize> = BTreeMap::new();
        for f in op.pre.iter() {
            for &(var, val) in vars.encodings(f) {
                let old = pre_val.insert(var, val);
                debug_assert!(
                    old.is_none() || old == Some(val),
                    "precondition holds two values of one variable"
                );
            }
        }
        for f in op.add.iter() {
            for &(var, val) in vars.encodings(f) {
                post_val.insert(var, val);
            }
        }
        for f in op.del.iter() {
            for &(var, _) in vars.encodings(f) {
                if !post_val.contains_key(&var) {
                    if let Some(none) = vars.vars[var].none_value() {
                        post_val.insert(var, none);
                    }
                    // without an escape value the delete is implied by the
                    // add of a sibling value and needs no effect here
                }
            }
        }

        let prevail: Vec<(usize, usize)> = pre_val
            .iter()
            .filter(|(var, _)| !post_val.contains_key(var))
            .map(|(&var, &val)| (var, val))
            .collect();

        writeln!(out, "begin_operator")?;
        writeln!(out, "{}", op.name)?;
        writeln!(out, "{}", prevail.len())?;
        for (var, val) in prevail {
            writeln!(out, "{var} {val}")?;
        }
        writeln!(out, "{}", post_val.len())?;
        for (&var, &val) in &post_val {
            let pre = pre_val.get(&var).map(|&v| v as i64).unwrap_or(-1);
            writeln!(out, "0 {var} {pre} {val}")?;
        }
        writeln!(out, "{}", op.cost)?;
        writeln!(out, "end_operator")?;
    }

    // no axioms
    writeln!(out, "0")?;
    Ok(())
}
