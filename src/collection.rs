//! The elevator collection: every live cabin plus the bidirectional mapping
//! between a live request and the cabin that owns it (§4.4).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::cabin::{self, Cabin, CabinHandle, CabinTimings};
use crate::event::WakeEvent;
use crate::event_bus::EventBus;
use crate::floor::{DestinationHeuristic, DirectedFloor, ElevatorId, Floor};

pub struct Elevators {
    cabins: HashMap<ElevatorId, CabinHandle>,
    by_cabin: HashMap<ElevatorId, Vec<DirectedFloor>>,
    by_request: HashMap<DirectedFloor, ElevatorId>,
    floor_bounds: (Floor, Floor),
    events_tx: mpsc::UnboundedSender<String>,
    bus: EventBus,
    next_id: ElevatorId,
}

impl Elevators {
    pub fn new(floor_bounds: (Floor, Floor), events_tx: mpsc::UnboundedSender<String>, bus: EventBus) -> Self {
        Elevators {
            cabins: HashMap::new(),
            by_cabin: HashMap::new(),
            by_request: HashMap::new(),
            floor_bounds,
            events_tx,
            bus,
            next_id: 1,
        }
    }

    pub fn cabin_ids(&self) -> impl Iterator<Item = ElevatorId> + '_ {
        self.cabins.keys().copied()
    }

    pub fn cabin(&self, id: ElevatorId) -> Option<&Rc<RefCell<Cabin>>> {
        self.cabins.get(&id).map(|h| &h.cabin)
    }

    pub fn len(&self) -> usize {
        self.cabins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cabins.is_empty()
    }

    /// Add a freshly-started cabin at `initial_floor`, returning its id.
    pub fn spawn_cabin(&mut self, initial_floor: Floor, timings: CabinTimings) -> ElevatorId {
        let id = self.next_id;
        self.next_id += 1;
        let handle = CabinHandle::new(id, initial_floor, self.floor_bounds, timings, self.events_tx.clone(), self.bus.clone());
        self.cabins.insert(id, handle);
        self.by_cabin.insert(id, Vec::new());
        id
    }

    /// Remove cabin `id`, reassigning its live requests to `survivor_ids` by
    /// estimate (greedy per-request), and hand back its handle for the
    /// caller to stop. Hall calls move to whichever survivor finishes them
    /// soonest; car calls (a passenger's own button press inside the
    /// retiring cabin) move the same way, since there is no surviving cabin
    /// for that passenger to stay in.
    ///
    /// Synchronous on purpose: stopping the returned handle takes an
    /// `.await`, and callers must not hold our `RefCell` borrow across it,
    /// since another task's command-guard could need to borrow us meanwhile.
    pub fn take_cabin_for_retirement(&mut self, id: ElevatorId, survivor_ids: &[ElevatorId]) -> Option<CabinHandle> {
        let handle = self.cabins.remove(&id)?;
        let orphaned = self.by_cabin.remove(&id).unwrap_or_default();
        for df in orphaned {
            let is_hall_call = self.by_request.remove(&df).is_some();

            let mut best: Option<(ElevatorId, f64)> = None;
            for &survivor in survivor_ids {
                let Some(cabin) = self.cabin(survivor) else { continue };
                let estimate = cabin.borrow().estimate_total_duration(Some(df), DestinationHeuristic::Mean);
                let better = match best {
                    Some((_, best_estimate)) => estimate < best_estimate,
                    None => true,
                };
                if better {
                    best = Some((survivor, estimate));
                }
            }
            if let Some((winner, _)) = best {
                let cabin_rc = self.cabin(winner).expect("winner exists").clone();
                cabin::commit_floor(&cabin_rc, df.floor, df.direction, None);
                self.by_cabin.entry(winner).or_default().push(df);
                if is_hall_call {
                    self.by_request.insert(df, winner);
                }
            }
        }
        Some(handle)
    }

    /// Dispatch a hall call (`call_up`/`call_down`): `eid` is the cabin the
    /// controller chose to serve it. Tracked in both maps so a later
    /// `cancel_commit(df)` or [`Self::reassign`] can find it by floor alone.
    pub fn commit_floor(&mut self, eid: ElevatorId, df: DirectedFloor, event: Option<WakeEvent>) -> Option<WakeEvent> {
        let cabin_rc = self.cabin(eid)?.clone();
        let wake = cabin::commit_floor(&cabin_rc, df.floor, df.direction, event);
        self.by_cabin.entry(eid).or_default().push(df);
        self.by_request.insert(df, eid);
        Some(wake)
    }

    /// Cancel a hall call by floor and direction alone, without knowing
    /// which cabin ended up serving it.
    pub fn cancel_commit(&mut self, df: DirectedFloor) -> Option<WakeEvent> {
        let eid = self.by_request.remove(&df)?;
        if let Some(requests) = self.by_cabin.get_mut(&eid) {
            requests.retain(|r| *r != df);
        }
        let cabin_rc = self.cabin(eid)?.clone();
        cabin::cancel_commit(&cabin_rc, df.floor, df.direction)
    }

    /// Commit a car call: a passenger pressing a button inside a specific
    /// cabin, which already names that cabin, so there is no dispatch
    /// decision and no entry in the building-wide hall-call map.
    pub fn commit_floor_on(&mut self, eid: ElevatorId, df: DirectedFloor, event: Option<WakeEvent>) -> Option<WakeEvent> {
        let cabin_rc = self.cabin(eid)?.clone();
        let wake = cabin::commit_floor(&cabin_rc, df.floor, df.direction, event);
        self.by_cabin.entry(eid).or_default().push(df);
        Some(wake)
    }

    /// Cancel a car call on a specific cabin.
    pub fn cancel_commit_on(&mut self, eid: ElevatorId, df: DirectedFloor) -> Option<WakeEvent> {
        if let Some(requests) = self.by_cabin.get_mut(&eid) {
            requests.retain(|r| *r != df);
        }
        let cabin_rc = self.cabin(eid)?.clone();
        cabin::cancel_commit(&cabin_rc, df.floor, df.direction)
    }

    /// The cabin whose own (non-minimax) estimate for `df` is lowest, used
    /// by the GREEDY strategy.
    pub fn best_cabin_greedy(&self, df: DirectedFloor, heuristic: DestinationHeuristic) -> Option<ElevatorId> {
        let mut best: Option<(ElevatorId, f64)> = None;
        for (&id, handle) in &self.cabins {
            let estimate = handle.cabin.borrow().estimate_total_duration(Some(df), heuristic);
            let better = match best {
                Some((_, best_estimate)) => estimate < best_estimate,
                None => true,
            };
            if better {
                best = Some((id, estimate));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Replace the live assignment with `new_assignment`, preserving the
    /// `WakeEvent` identity of every migrated request so its waiter is
    /// never spuriously woken.
    pub fn reassign(&mut self, new_assignment: &HashMap<ElevatorId, Vec<DirectedFloor>>, strict: bool) {
        let mut new_owner: HashMap<DirectedFloor, ElevatorId> = HashMap::new();
        for (&eid, requests) in new_assignment {
            for &df in requests {
                new_owner.insert(df, eid);
            }
        }

        let current_requests: Vec<DirectedFloor> = self.by_request.keys().copied().collect();
        for df in current_requests {
            let old_owner = self.by_request[&df];
            let new = new_owner.get(&df).copied();
            match new {
                Some(eid) if eid == old_owner && !strict => {}
                Some(eid) => {
                    let Some(old_cabin) = self.cabin(old_owner).cloned() else { continue };
                    let Some(new_cabin) = self.cabin(eid).cloned() else { continue };
                    let wake = cabin::cancel_commit(&old_cabin, df.floor, df.direction);
                    cabin::commit_floor(&new_cabin, df.floor, df.direction, wake);
                    if let Some(reqs) = self.by_cabin.get_mut(&old_owner) {
                        reqs.retain(|r| *r != df);
                    }
                    self.by_cabin.entry(eid).or_default().push(df);
                    self.by_request.insert(df, eid);
                    debug!(from = old_owner, to = eid, request = %df, "reassigned");
                }
                None => {
                    let Some(old_cabin) = self.cabin(old_owner).cloned() else { continue };
                    cabin::cancel_commit(&old_cabin, df.floor, df.direction);
                    if let Some(reqs) = self.by_cabin.get_mut(&old_owner) {
                        reqs.retain(|r| *r != df);
                    }
                    self.by_request.remove(&df);
                }
            }
        }

        for (&eid, requests) in new_assignment {
            for &df in requests {
                if !self.by_request.contains_key(&df) {
                    let Some(cabin_rc) = self.cabin(eid).cloned() else { continue };
                    cabin::commit_floor(&cabin_rc, df.floor, df.direction, None);
                    self.by_cabin.entry(eid).or_default().push(df);
                    self.by_request.insert(df, eid);
                }
            }
        }
    }

    /// Drain every cabin out (clearing the request maps along with them),
    /// for the caller to stop without holding our `RefCell` borrow across
    /// each cabin's `.stop().await`. Used by the controller's `stop`/`reset`
    /// lifecycle, where nothing survives to reassign onto.
    pub fn take_all_cabins(&mut self) -> Vec<CabinHandle> {
        self.by_cabin.clear();
        self.by_request.clear();
        self.cabins.drain().map(|(_, handle)| handle).collect()
    }

    /// The live hall calls: requests a cabin has been dispatched to but
    /// that a passenger did not press from inside that specific cabin, and
    /// so are free to migrate between cabins under reassignment.
    pub fn live_hall_calls(&self) -> Vec<DirectedFloor> {
        self.by_request.keys().copied().collect()
    }

    /// Every way of distributing the live hall calls across cabins that
    /// uses as many distinct cabins as the call count allows, one
    /// assignment per combination of `(cabin, call)` pairings. Mirrors
    /// `itertools.combinations_with_replacement` over cabin ids, zipped
    /// against the calls in a stable order.
    pub fn most_possible_assignments(&self) -> Vec<HashMap<ElevatorId, Vec<DirectedFloor>>> {
        let mut eids: Vec<ElevatorId> = self.cabins.keys().copied().collect();
        eids.sort_unstable();
        let requests = self.live_hall_calls();

        if eids.is_empty() {
            return vec![HashMap::new()];
        }
        if requests.is_empty() {
            let assignment = eids.iter().map(|&eid| (eid, Vec::new())).collect();
            return vec![assignment];
        }

        let max_eid_count = eids.len().min(requests.len());
        let mut assignments = Vec::new();
        for plan in combinations_with_replacement(&eids, requests.len()) {
            let distinct: HashSet<ElevatorId> = plan.iter().copied().collect();
            if distinct.len() < max_eid_count {
                continue;
            }
            let mut assignment: HashMap<ElevatorId, Vec<DirectedFloor>> =
                eids.iter().map(|&eid| (eid, Vec::new())).collect();
            for (&eid, &df) in plan.iter().zip(requests.iter()) {
                assignment.entry(eid).or_default().push(df);
            }
            assignments.push(assignment);
        }
        assignments
    }

    /// Score a candidate joint assignment entirely from the hypothetical
    /// `assignment` map rather than each cabin's actual plan — used to
    /// search candidates from [`Self::most_possible_assignments`] without
    /// mutating any cabin.
    ///
    /// With no `extra_request`: the slowest cabin's own estimate under
    /// `assignment`. With one: for each candidate cabin, the max completion
    /// time across all cabins assuming that candidate also takes the
    /// request; returns the minimum of those maxima and the cabin
    /// achieving it.
    pub fn estimate_assignment(
        &self,
        assignment: &HashMap<ElevatorId, Vec<DirectedFloor>>,
        extra_request: Option<DirectedFloor>,
        heuristic: DestinationHeuristic,
    ) -> (f64, Option<ElevatorId>) {
        let empty = Vec::new();
        match extra_request {
            None => {
                let worst = self
                    .cabins
                    .keys()
                    .map(|eid| {
                        let requests = assignment.get(eid).unwrap_or(&empty);
                        self.cabins[eid].cabin.borrow().estimate_duration_for_requests(requests, heuristic)
                    })
                    .fold(0.0_f64, f64::max);
                (worst, None)
            }
            Some(extra) => {
                let mut best: Option<(f64, ElevatorId)> = None;
                for &candidate in self.cabins.keys() {
                    let max_completion = self
                        .cabins
                        .keys()
                        .map(|&eid| {
                            let requests = assignment.get(&eid).unwrap_or(&empty);
                            if eid == candidate {
                                let mut with_extra = requests.clone();
                                with_extra.push(extra);
                                self.cabins[&eid].cabin.borrow().estimate_duration_for_requests(&with_extra, heuristic)
                            } else {
                                self.cabins[&eid].cabin.borrow().estimate_duration_for_requests(requests, heuristic)
                            }
                        })
                        .fold(0.0_f64, f64::max);
                    let better = match best {
                        Some((best_max, _)) => max_completion < best_max,
                        None => true,
                    };
                    if better {
                        best = Some((max_completion, candidate));
                    }
                }
                match best {
                    Some((max_completion, cabin_id)) => (max_completion, Some(cabin_id)),
                    None => (0.0, None),
                }
            }
        }
    }
}

/// Every non-decreasing sequence of length `k` drawn from `items`, i.e.
/// `itertools::combinations_with_replacement` without the dependency:
/// plain recursive backtracking over a sorted slice.
fn combinations_with_replacement(items: &[ElevatorId], k: usize) -> Vec<Vec<ElevatorId>> {
    fn go(items: &[ElevatorId], k: usize, start: usize, current: &mut Vec<ElevatorId>, out: &mut Vec<Vec<ElevatorId>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..items.len() {
            current.push(items[i]);
            go(items, k, i, current, out);
            current.pop();
        }
    }
    let mut out = Vec::new();
    go(items, k, 0, &mut Vec::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::Direction;
    use std::collections::HashSet;

    fn timings() -> CabinTimings {
        CabinTimings {
            floor_travel_duration: 1.0,
            accelerate_duration: 0.0,
            door_move_duration: 1.0,
            door_stay_duration: 1.0,
        }
    }

    fn elevators() -> Elevators {
        let (tx, _rx) = mpsc::unbounded_channel::<String>();
        let bounds = (Floor::from_display(1), Floor::from_display(10));
        Elevators::new(bounds, tx, EventBus::new())
    }

    #[test]
    fn most_possible_assignments_never_lumps_two_calls_onto_one_cabin_when_two_are_free() {
        let mut elevators = elevators();
        let near = elevators.spawn_cabin(Floor::from_display(1), timings());
        elevators.spawn_cabin(Floor::from_display(1), timings());

        let a = DirectedFloor::new(Floor::from_display(3), Direction::Up);
        let b = DirectedFloor::new(Floor::from_display(5), Direction::Up);
        elevators.commit_floor(near, a, None);
        elevators.commit_floor(near, b, None);

        let candidates = elevators.most_possible_assignments();
        assert_eq!(candidates.len(), 1, "only the both-cabins-used combination survives the distinct-cabin filter");
        let assignment = &candidates[0];
        assert_eq!(assignment.len(), 2);
        for requests in assignment.values() {
            assert_eq!(requests.len(), 1, "each cabin gets exactly one of the two calls");
        }
        let all: HashSet<DirectedFloor> = assignment.values().flatten().copied().collect();
        assert_eq!(all, [a, b].into_iter().collect());
    }

    #[test]
    fn most_possible_assignments_is_the_identity_assignment_with_one_cabin() {
        let mut elevators = elevators();
        let only = elevators.spawn_cabin(Floor::from_display(1), timings());
        let a = DirectedFloor::new(Floor::from_display(3), Direction::Up);
        elevators.commit_floor(only, a, None);

        let candidates = elevators.most_possible_assignments();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].get(&only), Some(&vec![a]));
    }

    #[test]
    fn estimate_assignment_with_extra_request_prefers_the_idle_cabin() {
        let mut elevators = elevators();
        let busy = elevators.spawn_cabin(Floor::from_display(1), timings());
        let idle = elevators.spawn_cabin(Floor::from_display(9), timings());

        let existing = DirectedFloor::new(Floor::from_display(2), Direction::Up);
        let mut assignment = HashMap::new();
        assignment.insert(busy, vec![existing]);
        assignment.insert(idle, vec![]);

        let extra = DirectedFloor::new(Floor::from_display(8), Direction::Up);
        let (_, winner) = elevators.estimate_assignment(&assignment, Some(extra), DestinationHeuristic::Mean);
        assert_eq!(winner, Some(idle));
    }

    #[test]
    fn reassign_migrates_a_call_to_the_assignment_it_names() {
        let mut elevators = elevators();
        let a = elevators.spawn_cabin(Floor::from_display(1), timings());
        let b = elevators.spawn_cabin(Floor::from_display(1), timings());

        let df = DirectedFloor::new(Floor::from_display(3), Direction::Up);
        elevators.commit_floor(a, df, None);
        assert_eq!(elevators.by_request[&df], a);

        let mut assignment = HashMap::new();
        assignment.insert(b, vec![df]);
        assignment.insert(a, vec![]);
        elevators.reassign(&assignment, true);
        assert_eq!(elevators.by_request[&df], b);
    }
}
