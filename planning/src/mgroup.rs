use crate::lifted::mgroups::LiftedMGroup;
use crate::lifted::{LiftedTask, ObjId};
use crate::strips::{FactId, FactRemap, StripsTask};
use deneb_collections::set::IdSet;
use deneb_utils::{enumerate, StreamingIterator};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use tracing::info;

/// A ground mutex group.
#[derive(Clone)]
pub struct MGroup {
    pub facts: IdSet<FactId>,
    /// Provably fact-alternating: no operator increases the member count.
    pub is_fam_group: bool,
    /// The initial state assigns exactly one member true.
    pub is_exactly_one: bool,
    /// The group intersects the goal.
    pub is_goal: bool,
    /// The lifted mutex group this one was grounded from, if any.
    pub lifted_mgroup_id: Option<usize>,
}

impl MGroup {
    pub fn new(facts: IdSet<FactId>) -> MGroup {
        MGroup {
            facts,
            is_fam_group: false,
            is_exactly_one: false,
            is_goal: false,
            lifted_mgroup_id: None,
        }
    }
}

#[derive(Default, Clone)]
pub struct MGroups {
    groups: Vec<MGroup>,
}

impl MGroups {
    pub fn new() -> MGroups {
        Default::default()
    }

    pub fn add(&mut self, mg: MGroup) -> usize {
        self.groups.push(mg);
        self.groups.len() - 1
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MGroup> {
        self.groups.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MGroup> {
        self.groups.iter_mut()
    }

    pub fn get(&self, i: usize) -> &MGroup {
        &self.groups[i]
    }

    /// Instantiates the lifted mutex groups against the grounded task.
    ///
    /// For every assignment of a group's fixed variables, the instance
    /// collects all facts of the task that match one of the group's atom
    /// schemata. Instances with fewer than two facts carry no information
    /// and are dropped, as are duplicated instances.
    /// `fam` states that the lifted groups came from the fam-group inference,
    /// so every instance is fact-alternating as well.
    pub fn ground(
        lifted: &[LiftedMGroup],
        task: &LiftedTask,
        strips: &StripsTask,
        fam: bool,
    ) -> MGroups {
        let mut by_atom: HashMap<&crate::lifted::GroundAtom, FactId> = HashMap::new();
        for (id, fact) in strips.facts.entries() {
            if let Some(atom) = &fact.ground_atom {
                by_atom.insert(atom, id);
            }
        }

        let mut res = MGroups::new();
        let mut seen: HashSet<IdSet<FactId>> = HashSet::new();
        for (li, lg) in lifted.iter().enumerate() {
            let domains: Vec<Vec<ObjId>> = lg
                .fixed
                .iter()
                .map(|&t| task.objects.instances_of(&task.types, t))
                .collect();
            let mut iter = enumerate(domains.into_iter().map(|d| d.into_iter()).collect());
            while let Some(binding) = iter.next() {
                let facts: IdSet<FactId> = by_atom
                    .iter()
                    .filter(|(atom, _)| lg.contains_ground(task, binding, atom))
                    .map(|(_, &id)| id)
                    .collect();
                if facts.len() < 2 || !seen.insert(facts.clone()) {
                    continue;
                }
                let mut mg = MGroup::new(facts);
                mg.is_fam_group = fam;
                mg.lifted_mgroup_id = Some(li);
                res.add(mg);
            }
        }
        info!("Grounded {} mutex groups", res.len());
        res
    }

    /// Recomputes the exactly-one flag against the task's initial state.
    /// The flag additionally requires the group to be fact-alternating,
    /// otherwise the property is not preserved by operator application.
    pub fn set_exactly_one(&mut self, strips: &StripsTask) {
        for mg in &mut self.groups {
            mg.is_exactly_one = mg.is_fam_group && mg.facts.intersection_size(&strips.init) == 1;
        }
    }

    /// Recomputes the goal-intersection flag.
    pub fn set_goal(&mut self, strips: &StripsTask) {
        for mg in &mut self.groups {
            mg.is_goal = !mg.facts.is_disjoint(&strips.goal);
        }
    }

    /// Rewrites the groups after a fact renumbering; groups shrunk below two
    /// facts are dropped.
    pub fn reduce(&mut self, remap: &FactRemap) {
        for mg in &mut self.groups {
            mg.facts.remap(|f| remap[usize::from(f)]);
        }
        self.groups.retain(|mg| mg.facts.len() >= 2);
    }

    /// Number of facts covered by at least one group.
    pub fn cover_number(&self) -> usize {
        let mut covered: IdSet<FactId> = IdSet::new();
        for mg in &self.groups {
            covered.union_with(&mg.facts);
        }
        covered.len()
    }

    /// One line per group, textual fact names.
    pub fn write_text(&self, strips: &StripsTask, out: &mut dyn Write) -> anyhow::Result<()> {
        for mg in &self.groups {
            let mut first = true;
            for f in mg.facts.iter() {
                if !first {
                    write!(out, " ")?;
                }
                first = false;
                write!(out, "({})", strips.facts[f].name)?;
            }
            let mut flags = Vec::new();
            if mg.is_fam_group {
                flags.push("fam");
            }
            if mg.is_exactly_one {
                flags.push("exactly-one");
            }
            if mg.is_goal {
                flags.push("goal");
            }
            if !flags.is_empty() {
                write!(out, "  :{}", flags.join(":"))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strips::tests::task;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    #[test]
    fn flags_follow_init_and_goal() {
        let t = task(
            &["a", "b", "c"],
            &[("mv", &[0], &[1], &[0])],
            &[0],
            &[1],
        );
        let mut mgs = MGroups::new();
        let mut g = MGroup::new([fid(0), fid(1)].into_iter().collect());
        g.is_fam_group = true;
        mgs.add(g);
        mgs.add(MGroup::new([fid(1), fid(2)].into_iter().collect()));

        mgs.set_exactly_one(&t);
        mgs.set_goal(&t);
        assert!(mgs.get(0).is_exactly_one);
        assert!(mgs.get(0).is_goal);
        // not a fam-group, so never exactly-one
        assert!(!mgs.get(1).is_exactly_one);
        assert!(mgs.get(1).is_goal);
    }

    #[test]
    fn reduce_drops_degenerate_groups() {
        let mut mgs = MGroups::new();
        mgs.add(MGroup::new([fid(0), fid(1)].into_iter().collect()));
        mgs.add(MGroup::new([fid(1), fid(2)].into_iter().collect()));
        // fact 0 deleted, others compacted
        let remap: FactRemap = vec![None, Some(fid(0)), Some(fid(1))];
        mgs.reduce(&remap);
        assert_eq!(mgs.len(), 1);
        assert_eq!(mgs.get(0).facts, [fid(0), fid(1)].into_iter().collect());
    }

    #[test]
    fn text_writer_prints_names_and_flags() {
        let t = task(&["a", "b"], &[("mv", &[0], &[1], &[0])], &[0], &[1]);
        let mut mgs = MGroups::new();
        let mut g = MGroup::new([fid(0), fid(1)].into_iter().collect());
        g.is_fam_group = true;
        mgs.add(g);
        mgs.set_exactly_one(&t);
        mgs.set_goal(&t);

        let mut out = Vec::new();
        mgs.write_text(&t, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "(a) (b)  :fam:exactly-one:goal\n");
    }

    #[test]
    fn cover_number_counts_distinct_facts() {
        let mut mgs = MGroups::new();
        mgs.add(MGroup::new([fid(0), fid(1)].into_iter().collect()));
        mgs.add(MGroup::new([fid(1), fid(2)].into_iter().collect()));
        assert_eq!(mgs.cover_number(), 3);
    }
}
