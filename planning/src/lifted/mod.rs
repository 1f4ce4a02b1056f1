//! First-order (lifted) representation of a planning task.
//!
//! This is the input interface of the toolchain: a PDDL front end (an
//! external collaborator) is expected to produce a [`LiftedTask`], which the
//! grounder projects onto objects and the mutex-group inference reasons
//! about symbolically.

pub mod mgroups;

use deneb_collections::create_ref_type;
use deneb_collections::ref_store::RefVec;
use std::fmt::{Display, Formatter};

create_ref_type!(TypeId);
create_ref_type!(ObjId);
create_ref_type!(PredId);

/// Type hierarchy. Every type has an optional parent; an object of type `t`
/// is an instance of `t` and of all its ancestors.
#[derive(Default, Clone)]
pub struct Types {
    names: Vec<String>,
    parent: Vec<Option<TypeId>>,
}

impl Types {
    pub fn add(&mut self, name: impl Into<String>, parent: Option<TypeId>) -> TypeId {
        self.names.push(name.into());
        self.parent.push(parent);
        TypeId::from(self.names.len() - 1)
    }

    pub fn name(&self, t: TypeId) -> &str {
        &self.names[usize::from(t)]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True if `sub` equals `sup` or derives from it through the parent chain.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut cur = Some(sub);
        while let Some(t) = cur {
            if t == sup {
                return true;
            }
            cur = self.parent[usize::from(t)];
        }
        false
    }

    /// True if some object could belong to both types (one derives from the other).
    pub fn overlap(&self, a: TypeId, b: TypeId) -> bool {
        self.is_subtype(a, b) || self.is_subtype(b, a)
    }
}

#[derive(Clone)]
pub struct Object {
    pub name: String,
    pub tpe: TypeId,
}

#[derive(Default, Clone)]
pub struct Objects {
    objs: RefVec<ObjId, Object>,
}

impl Objects {
    pub fn add(&mut self, name: impl Into<String>, tpe: TypeId) -> ObjId {
        self.objs.push(Object { name: name.into(), tpe })
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn name(&self, o: ObjId) -> &str {
        &self.objs[o].name
    }

    pub fn tpe(&self, o: ObjId) -> TypeId {
        self.objs[o].tpe
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjId> {
        self.objs.keys()
    }

    /// All objects that are instances of the given type.
    pub fn instances_of(&self, types: &Types, tpe: TypeId) -> Vec<ObjId> {
        self.objs
            .entries()
            .filter(|(_, o)| types.is_subtype(o.tpe, tpe))
            .map(|(id, _)| id)
            .collect()
    }
}

#[derive(Clone)]
pub struct Predicate {
    pub name: String,
    pub params: Vec<TypeId>,
}

/// Argument of a lifted atom: either one of the enclosing action's
/// parameters or a constant object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Param(usize),
    Obj(ObjId),
}

/// Atom of an action schema, with arguments referring to action parameters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub pred: PredId,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(pred: PredId, args: Vec<Term>) -> Atom {
        Atom { pred, args }
    }

    /// Instantiates the atom under a binding of the action parameters.
    pub fn ground(&self, params: &[ObjId]) -> GroundAtom {
        GroundAtom {
            pred: self.pred,
            args: self
                .args
                .iter()
                .map(|t| match t {
                    Term::Param(i) => params[*i],
                    Term::Obj(o) => *o,
                })
                .collect(),
        }
    }
}

/// A fully instantiated atom.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct GroundAtom {
    pub pred: PredId,
    pub args: Vec<ObjId>,
}

impl GroundAtom {
    /// The textual fact name, e.g. `at obj1 loc2`.
    pub fn name(&self, task: &LiftedTask) -> String {
        let mut s = task.preds[self.pred].name.clone();
        for &a in &self.args {
            s.push(' ');
            s.push_str(task.objects.name(a));
        }
        s
    }
}

#[derive(Clone)]
pub struct CondEffSchema {
    pub pre: Vec<Atom>,
    pub add: Vec<Atom>,
    pub del: Vec<Atom>,
}

/// A lifted action: typed parameters, positive preconditions and effects,
/// optional conditional effects.
#[derive(Clone)]
pub struct ActionSchema {
    pub name: String,
    pub params: Vec<TypeId>,
    pub pre: Vec<Atom>,
    pub add: Vec<Atom>,
    pub del: Vec<Atom>,
    pub cond_eff: Vec<CondEffSchema>,
    pub cost: u32,
}

impl ActionSchema {
    pub fn new(name: impl Into<String>, params: Vec<TypeId>) -> ActionSchema {
        ActionSchema {
            name: name.into(),
            params,
            pre: Vec::new(),
            add: Vec::new(),
            del: Vec::new(),
            cond_eff: Vec::new(),
            cost: 1,
        }
    }
}

/// The complete lifted task, input of grounding and of the lifted
/// mutex-group inference.
#[derive(Default, Clone)]
pub struct LiftedTask {
    pub domain_name: Option<String>,
    pub problem_name: Option<String>,
    pub domain_file: Option<String>,
    pub problem_file: Option<String>,
    pub types: Types,
    pub objects: Objects,
    pub preds: RefVec<PredId, Predicate>,
    pub actions: Vec<ActionSchema>,
    pub init: Vec<GroundAtom>,
    pub goal: Vec<GroundAtom>,
}

impl LiftedTask {
    pub fn add_predicate(&mut self, name: impl Into<String>, params: Vec<TypeId>) -> PredId {
        self.preds.push(Predicate {
            name: name.into(),
            params,
        })
    }

    pub fn display_atom<'a>(&'a self, atom: &'a GroundAtom) -> impl Display + 'a {
        deneb_utils::Fmt(move |f: &mut Formatter| write!(f, "({})", atom.name(self)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two locations, one object, a single `move` action.
    /// This is the elevator-style task used across the pipeline tests.
    pub(crate) fn move_task() -> LiftedTask {
        let mut task = LiftedTask::default();
        let t_obj = task.types.add("movable", None);
        let t_loc = task.types.add("location", None);
        let o = task.objects.add("o", t_obj);
        let l1 = task.objects.add("l1", t_loc);
        let l2 = task.objects.add("l2", t_loc);
        let at = task.add_predicate("at", vec![t_obj, t_loc]);

        let mut mv = ActionSchema::new("move", vec![t_obj, t_loc, t_loc]);
        mv.pre = vec![Atom::new(at, vec![Term::Param(0), Term::Param(1)])];
        mv.del = vec![Atom::new(at, vec![Term::Param(0), Term::Param(1)])];
        mv.add = vec![Atom::new(at, vec![Term::Param(0), Term::Param(2)])];
        task.actions.push(mv);

        task.init = vec![GroundAtom { pred: at, args: vec![o, l1] }];
        task.goal = vec![GroundAtom { pred: at, args: vec![o, l2] }];
        task
    }

    #[test]
    fn subtyping() {
        let mut types = Types::default();
        let top = types.add("object", None);
        let veh = types.add("vehicle", Some(top));
        let truck = types.add("truck", Some(veh));
        assert!(types.is_subtype(truck, top));
        assert!(types.is_subtype(truck, truck));
        assert!(!types.is_subtype(top, truck));
        assert!(types.overlap(top, truck));
    }

    #[test]
    fn instances_respect_the_hierarchy() {
        let mut task = LiftedTask::default();
        let top = task.types.add("object", None);
        let veh = task.types.add("vehicle", Some(top));
        let a = task.objects.add("a", top);
        let b = task.objects.add("b", veh);
        assert_eq!(task.objects.instances_of(&task.types, top), vec![a, b]);
        assert_eq!(task.objects.instances_of(&task.types, veh), vec![b]);
    }

    #[test]
    fn grounding_an_atom() {
        let task = move_task();
        let at = task.preds.keys().next().unwrap();
        let atom = Atom::new(at, vec![Term::Param(0), Term::Param(1)]);
        let objs: Vec<ObjId> = task.objects.iter().collect();
        let g = atom.ground(&[objs[0], objs[1]]);
        assert_eq!(g.name(&task), "at o l1");
        assert_eq!(task.display_atom(&g).to_string(), "(at o l1)");
    }
}
