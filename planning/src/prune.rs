//! The pruning cascade over the grounded task: dead-end operators, h²
//! (forward or forward/backward), irrelevance analysis, and one reduction
//! that renumbers facts and operators and drags the mutex structures along.

use crate::famgroup;
use crate::h2;
use crate::irrelevance;
use crate::mgroup::MGroups;
use crate::mutex::MutexPairs;
use crate::strips::{FactId, OpId, StripsTask};
use anyhow::Result;
use deneb_collections::set::IdSet;
use tracing::info;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum H2Variant {
    None,
    Fw,
    FwBw,
}

pub struct PruneConfig {
    pub dead_end_ops: bool,
    pub h2: H2Variant,
    pub irrelevance: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        PruneConfig {
            dead_end_ops: true,
            h2: H2Variant::FwBw,
            irrelevance: true,
        }
    }
}

/// Runs the cascade in place. Mutex groups are reduced along with the task
/// and their flags recomputed. Returns the mutex pairs valid for the
/// reduced task.
pub fn prune(strips: &mut StripsTask, mgroups: &mut MGroups, cfg: &PruneConfig) -> Result<MutexPairs> {
    info!("Pruning. facts: {}, ops: {}", strips.facts.len(), strips.ops.len());

    let mut mutex = MutexPairs::new(strips.facts.len());
    mutex.add_mgroups(mgroups);

    let mut rm_facts: IdSet<FactId> = IdSet::new();
    let mut rm_ops: IdSet<OpId> = IdSet::new();
    let mut goal_unreachable = false;

    if cfg.dead_end_ops {
        let dead = famgroup::dead_end_ops(mgroups, strips);
        info!("Pruning dead-end operators done. Dead end ops: {}", dead.len());
        rm_ops.union_with(&dead);
    } else {
        info!("Pruning dead-end operators disabled");
    }

    match cfg.h2 {
        H2Variant::None => info!("h^2 disabled"),
        _ if strips.has_cond_eff => {
            info!("h^2 disabled because the problem has conditional effects")
        }
        H2Variant::Fw => {
            goal_unreachable |= h2::h2_fw(strips, &mut mutex, &mut rm_facts, &mut rm_ops)?;
        }
        H2Variant::FwBw => {
            goal_unreachable |=
                h2::h2_fw_bw(strips, mgroups, &mut mutex, &mut rm_facts, &mut rm_ops)?;
        }
    }

    if strips.has_cond_eff {
        info!("irrelevance analysis disabled because the problem has conditional effects");
    } else if cfg.irrelevance {
        let res = irrelevance::irrelevance_analysis(strips, &rm_facts, &rm_ops)?;
        rm_facts.union_with(&res.irrelevant_facts);
        rm_ops.union_with(&res.irrelevant_ops);
    }

    if !rm_facts.is_empty() || !rm_ops.is_empty() {
        if let Some(remap) = strips.reduce(&rm_facts, &rm_ops) {
            mutex.reduce(&remap, strips.facts.len());
            mgroups.reduce(&remap);
            mgroups.set_exactly_one(strips);
            mgroups.set_goal(strips);
        }
    }
    if goal_unreachable {
        strips.goal_is_unreachable = true;
    }

    info!(
        "Pruning DONE. facts: {}, ops: {}, mutex pairs: {}, mutex groups: {}",
        strips.facts.len(),
        strips.ops.len(),
        mutex.num_mutex_pairs(),
        mgroups.len()
    );
    Ok(mutex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground::{ground, GroundConfig};
    use crate::lifted::mgroups::{infer_fam_groups, InferLimits};
    use crate::lifted::tests::move_task;
    use crate::mgroup::MGroup;
    use crate::strips::tests::task;

    fn fid(i: usize) -> FactId {
        FactId::from(i)
    }

    #[test]
    fn full_pipeline_on_the_move_task() {
        let lifted = move_task();
        let groups = infer_fam_groups(&lifted, &InferLimits::default());
        let mut strips = ground(&lifted, &GroundConfig::default()).unwrap();
        let mut mgroups = MGroups::ground(&groups, &lifted, &strips, true);
        mgroups.set_exactly_one(&strips);
        mgroups.set_goal(&strips);
        assert!(mgroups.len() >= 1);

        let mutex = prune(&mut strips, &mut mgroups, &PruneConfig::default()).unwrap();

        // both moves survive, the two at-facts are mutex
        assert_eq!(strips.ops.len(), 2);
        assert_eq!(strips.facts.len(), 2);
        assert!(mutex.is_mutex(fid(0), fid(1)));
        assert!(!strips.goal_is_unreachable);
        assert!(mgroups.iter().any(|mg| mg.is_exactly_one && mg.is_goal));
    }

    #[test]
    fn dead_end_operator_is_pruned() {
        // fam-group {a, b} with exactly-one, goal a; "burn" consumes a
        let mut strips = task(
            &["a", "b"],
            &[("burn", &[0], &[], &[0]), ("swap", &[0], &[1], &[0]), ("back", &[1], &[0], &[1])],
            &[0],
            &[0],
        );
        let mut mgroups = MGroups::new();
        let mut mg = MGroup::new([fid(0), fid(1)].into_iter().collect());
        mg.is_fam_group = true;
        mgroups.add(mg);
        mgroups.set_exactly_one(&strips);
        mgroups.set_goal(&strips);

        let cfg = PruneConfig {
            dead_end_ops: true,
            h2: H2Variant::None,
            irrelevance: false,
        };
        prune(&mut strips, &mut mgroups, &cfg).unwrap();
        assert_eq!(strips.ops.len(), 2);
        assert!(strips.ops.iter().all(|op| op.name != "burn"));
    }

    #[test]
    fn irrelevance_composes_with_h2() {
        let mut strips = task(
            &["a", "b", "shiny"],
            &[("ab", &[0], &[1], &[0]), ("decorate", &[0], &[2], &[])],
            &[0],
            &[1],
        );
        let mut mgroups = MGroups::new();
        let cfg = PruneConfig {
            dead_end_ops: false,
            h2: H2Variant::Fw,
            irrelevance: true,
        };
        prune(&mut strips, &mut mgroups, &cfg).unwrap();
        assert_eq!(strips.facts.len(), 2);
        assert!(strips.ops.iter().all(|op| op.name != "decorate"));
    }
}
