//! Inference of lifted mutex groups.
//!
//! A candidate is a set of atom schemata over a shared tuple of fixed
//! variables, where each atom may additionally use one *counted* variable of
//! its own. A candidate is a fact-alternating mutex group (fam-group) if the
//! initial state holds at most one member per instantiation of the fixed
//! variables and no action can increase the member count: every add effect
//! that can produce a member must be balanced by a precondition fact of the
//! same instance that is deleted.
//!
//! The monotonicity variant weakens the balance requirement to "deleted"
//! (the deleted fact need not be a precondition), yielding invariants in the
//! style of Fast Downward's translator.

use crate::lifted::{ActionSchema, Atom, GroundAtom, LiftedTask, ObjId, PredId, Term, TypeId};
use deneb_utils::{enumerate, StreamingIterator};
use itertools::Itertools;
use std::collections::{HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use tracing::info;

/// Bounds on the candidate search.
#[derive(Copy, Clone, Debug)]
pub struct InferLimits {
    pub max_candidates: usize,
    pub max_mgroups: usize,
}

impl Default for InferLimits {
    fn default() -> Self {
        InferLimits {
            max_candidates: 10_000,
            max_mgroups: 10_000,
        }
    }
}

/// One slot of a candidate atom.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CandArg {
    /// One of the group's universally quantified variables.
    Fixed(usize),
    /// The atom's own counted variable (at most one per atom).
    Counted(TypeId),
    /// A constant object.
    Obj(ObjId),
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CandAtom {
    pub pred: PredId,
    pub args: Vec<CandArg>,
}

impl CandAtom {
    fn counted_slots(&self) -> usize {
        self.args
            .iter()
            .filter(|a| matches!(a, CandArg::Counted(_)))
            .count()
    }
}

#[derive(Clone)]
pub struct LiftedMGroup {
    /// Types of the fixed (universally quantified) variables.
    pub fixed: Vec<TypeId>,
    pub atoms: Vec<CandAtom>,
    /// The initial state holds exactly one member per instantiation.
    pub exactly_one: bool,
    /// No action has an add effect intersecting the group.
    pub is_static: bool,
}

impl LiftedMGroup {
    fn new(fixed: Vec<TypeId>, atoms: Vec<CandAtom>) -> LiftedMGroup {
        debug_assert!(atoms.iter().all(|a| a.counted_slots() <= 1));
        LiftedMGroup {
            fixed,
            atoms,
            exactly_one: false,
            is_static: false,
        }
    }

    /// A canonical rendering used to deduplicate candidates: atoms sorted,
    /// fixed variables renamed in order of first use.
    fn canonical_key(&self) -> String {
        let mut rendered: Vec<String> = self
            .atoms
            .iter()
            .map(|a| {
                let args = a
                    .args
                    .iter()
                    .map(|arg| match arg {
                        CandArg::Fixed(v) => format!("x{v}"),
                        CandArg::Counted(t) => format!("C{}", usize::from(*t)),
                        CandArg::Obj(o) => format!("o{}", usize::from(*o)),
                    })
                    .join(" ");
                format!("{} {args}", usize::from(a.pred))
            })
            .collect();
        rendered.sort();
        // rename fixed variables in first-occurrence order
        let joined = rendered.join(";");
        let mut order: Vec<String> = Vec::new();
        let mut out = String::new();
        for token in joined.split(' ') {
            if let Some(v) = token.strip_prefix('x') {
                if v.chars().all(|c| c.is_ascii_digit()) {
                    let pos = match order.iter().position(|x| x == v) {
                        Some(p) => p,
                        None => {
                            order.push(v.to_string());
                            order.len() - 1
                        }
                    };
                    out.push_str(&format!("x{pos} "));
                    continue;
                }
            }
            out.push_str(token);
            out.push(' ');
        }
        out
    }

    pub fn display<'a>(&'a self, task: &'a LiftedTask) -> impl Display + 'a {
        deneb_utils::Fmt(move |f: &mut Formatter| {
            write!(f, "{{")?;
            for (i, atom) in self.atoms.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "({}", task.preds[atom.pred].name)?;
                for arg in &atom.args {
                    match arg {
                        CandArg::Fixed(v) => write!(f, " x{v}")?,
                        CandArg::Counted(t) => write!(f, " C:{}", task.types.name(*t))?,
                        CandArg::Obj(o) => write!(f, " {}", task.objects.name(*o))?,
                    }
                }
                write!(f, ")")?;
            }
            write!(f, "}}")?;
            if self.exactly_one {
                write!(f, " :exactly-one")?;
            }
            if self.is_static {
                write!(f, " :static")?;
            }
            Ok(())
        })
    }

    /// True if the ground atom is a member of the instance given by the
    /// assignment of the fixed variables.
    pub fn contains_ground(&self, task: &LiftedTask, binding: &[ObjId], atom: &GroundAtom) -> bool {
        self.atoms.iter().any(|m| {
            m.pred == atom.pred
                && m.args.len() == atom.args.len()
                && m.args.iter().zip(&atom.args).all(|(arg, &obj)| match arg {
                    CandArg::Fixed(v) => binding[*v] == obj,
                    CandArg::Counted(t) => task.types.is_subtype(task.objects.tpe(obj), *t),
                    CandArg::Obj(o) => *o == obj,
                })
        })
    }
}

/// How an add effect must be compensated for the count not to grow.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Balance {
    /// Balanced by a fact that is both a precondition and deleted (fam-group).
    PreDel,
    /// Balanced by any deleted fact (monotonicity invariant).
    Del,
}

/// Unifier of an action atom against a candidate atom: the terms the fixed
/// variables are forced to, plus equality constraints on action parameters
/// matched against group constants.
#[derive(Clone, PartialEq, Eq)]
struct Binding {
    fixed: Vec<Option<Term>>,
    param_eq: Vec<(usize, ObjId)>,
}

fn term_type(task: &LiftedTask, action: &ActionSchema, t: Term) -> TypeId {
    match t {
        Term::Param(i) => action.params[i],
        Term::Obj(o) => task.objects.tpe(o),
    }
}

/// Attempts to unify an action atom with a candidate atom. Returns the
/// binding if every ground instance of the action *may* produce a member of
/// the group (an over-approximation: parameter slots are never assumed
/// distinct).
fn match_atom(
    task: &LiftedTask,
    action: &ActionSchema,
    atom: &Atom,
    cand: &CandAtom,
    fixed: &[TypeId],
) -> Option<Binding> {
    if atom.pred != cand.pred || atom.args.len() != cand.args.len() {
        return None;
    }
    let mut binding = Binding {
        fixed: vec![None; fixed.len()],
        param_eq: Vec::new(),
    };
    for (term, arg) in atom.args.iter().zip(&cand.args) {
        match arg {
            CandArg::Fixed(v) => {
                if !task.types.overlap(term_type(task, action, *term), fixed[*v]) {
                    return None;
                }
                // candidate atoms use each fixed variable at most once
                debug_assert!(binding.fixed[*v].is_none());
                binding.fixed[*v] = Some(*term);
            }
            CandArg::Counted(t) => {
                if !task.types.overlap(term_type(task, action, *term), *t) {
                    return None;
                }
            }
            CandArg::Obj(o) => match term {
                Term::Obj(o2) => {
                    if o != o2 {
                        return None;
                    }
                }
                Term::Param(p) => {
                    if !task.types.is_subtype(task.objects.tpe(*o), action.params[*p]) {
                        return None;
                    }
                    binding.param_eq.push((*p, *o));
                }
            },
        }
    }
    Some(binding)
}

/// True if the constraints of `weaker` are implied by those of `stronger`:
/// the balancing fact is then a member of every instance the threat lands in.
fn binding_implied(weaker: &Binding, stronger: &Binding) -> bool {
    weaker
        .fixed
        .iter()
        .zip(&stronger.fixed)
        .all(|(w, s)| match w {
            None => true,
            Some(t) => s.as_ref() == Some(t),
        })
        && weaker.param_eq.iter().all(|c| stronger.param_eq.contains(c))
}

/// An add effect that could increase the member count of a candidate,
/// recorded by the action and the unifier that produced it.
struct Threat {
    action: usize,
    binding: Binding,
}

/// Flattened view of an action: its base effects plus, per conditional
/// effect, the union with the outer sets.
fn virtual_actions(action: &ActionSchema) -> Vec<(Vec<Atom>, Vec<Atom>, Vec<Atom>)> {
    let mut res = vec![(action.pre.clone(), action.add.clone(), action.del.clone())];
    for ce in &action.cond_eff {
        let mut pre = action.pre.clone();
        pre.extend(ce.pre.iter().cloned());
        let mut add = action.add.clone();
        add.extend(ce.add.iter().cloned());
        let mut del = action.del.clone();
        del.extend(ce.del.iter().cloned());
        res.push((pre, add, del));
    }
    res
}

/// Checks the balance criterion for one candidate. On failure returns the
/// first unbalanced threat, which guides the candidate refinement.
fn check_balance(
    task: &LiftedTask,
    group: &LiftedMGroup,
    balance: Balance,
) -> Result<(), Threat> {
    for (ai, action) in task.actions.iter().enumerate() {
        for (pre, add, del) in virtual_actions(action) {
            let mut matched: Vec<(usize, Binding)> = Vec::new();
            for (ei, eff) in add.iter().enumerate() {
                for cand in &group.atoms {
                    if let Some(b) = match_atom(task, action, eff, cand, &group.fixed) {
                        matched.push((ei, b.clone()));
                        let balanced = del.iter().any(|d| {
                            let in_pre =
                                balance == Balance::Del || pre.iter().any(|p| p == d);
                            in_pre
                                && group.atoms.iter().any(|m2| {
                                    match_atom(task, action, d, m2, &group.fixed)
                                        .is_some_and(|bd| binding_implied(&bd, &b))
                                })
                        });
                        if !balanced {
                            return Err(Threat { action: ai, binding: b });
                        }
                    }
                }
            }
            // two distinct add effects must not be able to produce two
            // different members of the same instance
            for (i, (e1, b1)) in matched.iter().enumerate() {
                for (e2, b2) in &matched[i + 1..] {
                    if e1 == e2 {
                        continue;
                    }
                    let same_instance_possible =
                        b1.fixed.iter().zip(&b2.fixed).all(|(t1, t2)| match (t1, t2) {
                            (Some(Term::Obj(a)), Some(Term::Obj(b))) => a == b,
                            _ => true,
                        });
                    let same_fact_always = add[*e1] == add[*e2];
                    if same_instance_possible && !same_fact_always {
                        return Err(Threat {
                            action: ai,
                            binding: b1.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Counts the initial-state members per instantiation of the fixed
/// variables; returns (min, max) over all instantiations.
fn init_weights(task: &LiftedTask, group: &LiftedMGroup) -> (usize, usize) {
    let domains: Vec<Vec<ObjId>> = group
        .fixed
        .iter()
        .map(|&t| task.objects.instances_of(&task.types, t))
        .collect();
    let mut min = usize::MAX;
    let mut max = 0;
    let mut iter = enumerate(domains.into_iter().map(|d| d.into_iter()).collect());
    while let Some(binding) = iter.next() {
        let weight = task
            .init
            .iter()
            .filter(|g| group.contains_ground(task, binding, g))
            .count();
        min = min.min(weight);
        max = max.max(weight);
    }
    if min == usize::MAX {
        // no instantiation at all (a fixed type without objects)
        (0, 0)
    } else {
        (min, max)
    }
}

fn is_static(task: &LiftedTask, group: &LiftedMGroup) -> bool {
    task.actions.iter().all(|action| {
        virtual_actions(action).iter().all(|(_, add, _)| {
            add.iter().all(|eff| {
                group
                    .atoms
                    .iter()
                    .all(|cand| match_atom(task, action, eff, cand, &group.fixed).is_none())
            })
        })
    })
}

/// Initial candidates: one per predicate and per choice of the counted slot
/// (including none), with a fresh fixed variable in every other slot.
fn seed_candidates(task: &LiftedTask) -> VecDeque<LiftedMGroup> {
    let mut queue = VecDeque::new();
    for pred_id in task.preds.keys() {
        let params = &task.preds[pred_id].params;
        let slots = params.len();
        let choices: Vec<Option<usize>> =
            std::iter::once(None).chain((0..slots).map(Some)).collect();
        for counted in choices {
            let mut fixed = Vec::new();
            let args = params
                .iter()
                .enumerate()
                .map(|(i, &t)| {
                    if counted == Some(i) {
                        CandArg::Counted(t)
                    } else {
                        fixed.push(t);
                        CandArg::Fixed(fixed.len() - 1)
                    }
                })
                .collect();
            queue.push_back(LiftedMGroup::new(fixed, vec![CandAtom { pred: pred_id, args }]));
        }
    }
    queue
}

/// Refines a failed candidate: extends it with a schema derived from each
/// balancing fact of the unbalanced action, projected onto the threat's
/// variable bindings.
fn refinements(
    task: &LiftedTask,
    group: &LiftedMGroup,
    threat: &Threat,
    balance: Balance,
) -> Vec<LiftedMGroup> {
    let action = &task.actions[threat.action];
    let mut out = Vec::new();
    let sources: Vec<&Atom> = match balance {
        Balance::PreDel => action
            .del
            .iter()
            .filter(|d| action.pre.iter().any(|p| p == *d))
            .collect(),
        Balance::Del => action.del.iter().collect(),
    };
    'src: for eff in sources {
        let mut args = Vec::with_capacity(eff.args.len());
        let mut counted_used = false;
        let mut vars_used = Vec::new();
        for term in &eff.args {
            let fixed_var = threat
                .binding
                .fixed
                .iter()
                .position(|b| b.as_ref() == Some(term));
            if let Some(v) = fixed_var {
                if vars_used.contains(&v) {
                    continue 'src; // an atom uses each fixed variable once
                }
                vars_used.push(v);
                args.push(CandArg::Fixed(v));
            } else if let Term::Obj(o) = term {
                args.push(CandArg::Obj(*o));
            } else if let Term::Param(p) = term {
                if counted_used {
                    continue 'src; // a second counted slot is not allowed
                }
                counted_used = true;
                args.push(CandArg::Counted(action.params[*p]));
            }
        }
        let atom = CandAtom { pred: eff.pred, args };
        if group.atoms.contains(&atom) {
            continue;
        }
        let mut atoms = group.atoms.clone();
        atoms.push(atom);
        out.push(LiftedMGroup::new(group.fixed.clone(), atoms));
    }
    out
}

fn infer(task: &LiftedTask, limits: &InferLimits, balance: Balance) -> (Vec<LiftedMGroup>, Vec<LiftedMGroup>) {
    let mut queue = seed_candidates(task);
    let mut seen: HashSet<String> = queue.iter().map(|c| c.canonical_key()).collect();
    let mut mgroups: Vec<LiftedMGroup> = Vec::new();
    let mut invariants: Vec<LiftedMGroup> = Vec::new();
    let mut processed = 0;

    while let Some(group) = queue.pop_front() {
        if processed >= limits.max_candidates || mgroups.len() >= limits.max_mgroups {
            break;
        }
        processed += 1;

        match check_balance(task, &group, balance) {
            Ok(()) => {
                let (min_w, max_w) = init_weights(task, &group);
                if balance == Balance::Del {
                    invariants.push(group.clone());
                }
                if max_w <= 1 {
                    let mut group = group;
                    group.exactly_one = min_w == 1 && max_w == 1;
                    group.is_static = is_static(task, &group);
                    mgroups.push(group);
                }
            }
            Err(threat) => {
                for refined in refinements(task, &group, &threat, balance) {
                    let key = refined.canonical_key();
                    if seen.insert(key) {
                        queue.push_back(refined);
                    }
                }
            }
        }
    }
    (mgroups, invariants)
}

/// Fact-alternating mutex group inference: balance through pre-and-delete.
pub fn infer_fam_groups(task: &LiftedTask, limits: &InferLimits) -> Vec<LiftedMGroup> {
    info!(
        "Inference of lifted fam-groups [max-candidates: {}, max-mgroups: {}]",
        limits.max_candidates, limits.max_mgroups
    );
    let (mgroups, _) = infer(task, limits, Balance::PreDel);
    info!("Inference of lifted fam-groups DONE: {} groups", mgroups.len());
    mgroups
}

pub struct MonotonicityResult {
    /// Invariants whose initial weight is at most one: usable as mutex groups.
    pub mgroups: Vec<LiftedMGroup>,
    /// All inferred monotonicity invariants.
    pub invariants: Vec<LiftedMGroup>,
}

/// Weaker inference: the count never increases, balanced by any delete.
pub fn infer_monotonicity(task: &LiftedTask, limits: &InferLimits) -> MonotonicityResult {
    info!(
        "Inference of monotonicity invariants [max-candidates: {}, max-mgroups: {}]",
        limits.max_candidates, limits.max_mgroups
    );
    let (mgroups, invariants) = infer(task, limits, Balance::Del);
    info!(
        "Inference of monotonicity invariants DONE: {} mgroups, {} invariants",
        mgroups.len(),
        invariants.len()
    );
    MonotonicityResult { mgroups, invariants }
}
