//! Per-cycle schedule computation.
//!
//! Given the cycle's request bits, static priorities, and the lifted conflict
//! relation, this module computes the granted set: conflict-free (no two
//! granted actions are conflict-related), priority-respecting (a requester
//! never loses to a conflicting requester of strictly lower priority), and
//! maximal within each conflict component. The computation is a pure function
//! of its inputs, so an unchanged snapshot always yields the same schedule.

use tracing::debug;

use crate::arbiter::PriorityArbiter;
use crate::common::BitVec;

/// One schedulable action's view for a single cycle.
#[derive(Clone, Copy, Debug)]
pub struct SchedNode {
    /// Whether the action requests to run this cycle (request and readiness
    /// already folded together by the caller).
    pub requesting: bool,
    /// Static priority; higher wins among conflicting requesters.
    pub priority: u32,
}

/// The outcome of one cycle's arbitration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Granted actions, by node index.
    pub granted: BitVec,
}

/// Computes the schedule for one cycle.
///
/// Within each conflict component the pass is greedy highest-priority-first:
/// repeatedly grant the highest-priority requester not conflicting with an
/// already-granted action, breaking priority ties through the priority
/// arbiter (lowest index wins). Requesters outside every conflict edge are
/// granted unconditionally by the same walk.
pub fn compute(nodes: &[SchedNode], conflicts: &[BitVec], components: &[Vec<usize>]) -> Schedule {
    let n = nodes.len();
    let arbiter = PriorityArbiter::new(n);
    let mut granted = BitVec::zeros(n);
    let mut blocked = BitVec::zeros(n);

    for component in components {
        loop {
            // Highest priority among still-eligible requesters of this component.
            let best = component
                .iter()
                .filter(|t| nodes[**t].requesting && !granted.get(**t) && !blocked.get(**t))
                .map(|t| nodes[*t].priority)
                .max();
            let Some(best) = best else {
                break;
            };

            let tied = BitVec::from_fn(n, |t| {
                component.contains(&t)
                    && nodes[t].requesting
                    && nodes[t].priority == best
                    && !granted.get(t)
                    && !blocked.get(t)
            });
            // At least one bit is set by construction of `best`.
            let Some(winner) = arbiter.select_one(&tied) else {
                break;
            };

            granted.set(winner, true);
            blocked.or_with(&conflicts[winner]);
        }
    }

    debug!(granted = ?granted, "schedule computed");
    Schedule { granted }
}
