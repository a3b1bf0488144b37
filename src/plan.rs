//! The three-chain LOOK plan: `current`, `next` and `future` directional
//! stop lists that together encode the SCAN/LOOK sweep-and-reverse
//! discipline without needing a priority queue with a mutable sort key.

use crate::error::CoreError;
use crate::event::AsyncEvent;
use crate::floor::{DestinationHeuristic, DirectedFloor, Direction, Floor};
use crate::stop_list::DirectionalStopList;

#[derive(Debug)]
pub struct ThreeChainPlan {
    current: DirectionalStopList,
    next: DirectionalStopList,
    future: DirectionalStopList,
    /// Set whenever a rotation occurs, so a pending `get()` re-checks.
    swap_event: AsyncEvent,
}

impl ThreeChainPlan {
    pub fn new() -> Self {
        ThreeChainPlan {
            current: DirectionalStopList::new(Direction::Idle),
            next: DirectionalStopList::new(Direction::Idle),
            future: DirectionalStopList::new(Direction::Idle),
            swap_event: AsyncEvent::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.current.direction()
    }

    pub fn set_direction(&mut self, new_direction: Direction) {
        if new_direction == self.direction() {
            return;
        }
        if new_direction == Direction::Idle {
            assert!(self.is_empty(), "cannot set plan direction to IDLE while non-empty");
        }
        self.current.set_direction(new_direction);
        self.next.set_direction(-new_direction);
        self.future.set_direction(new_direction);
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.next.is_empty() && self.future.is_empty()
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.next.len() + self.future.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectedFloor> {
        self.current.iter().chain(self.next.iter()).chain(self.future.iter())
    }

    pub fn contains(&self, df: DirectedFloor) -> bool {
        self.current.contains(df) || self.next.contains(df) || self.future.contains(df)
    }

    pub fn top(&self) -> Result<DirectedFloor, CoreError> {
        self.iter().next().copied().ok_or(CoreError::Empty)
    }

    pub fn bottom(&self) -> Result<DirectedFloor, CoreError> {
        if !self.future.is_empty() {
            self.future.bottom()
        } else if !self.next.is_empty() {
            self.next.bottom()
        } else {
            self.current.bottom()
        }
    }

    /// Choose the chain a new directed floor belongs to, initialising the
    /// plan direction if currently idle.
    fn select_chain(&mut self, requested_direction: Direction, target_direction: Direction) -> ChainSlot {
        let d = self.direction();
        if d == Direction::Idle {
            if requested_direction != Direction::Idle {
                self.set_direction(requested_direction);
            } else if target_direction != Direction::Idle {
                self.set_direction(target_direction);
            }
            return ChainSlot::Current;
        }
        if requested_direction == Direction::Idle {
            if target_direction == d || target_direction == Direction::Idle {
                ChainSlot::Current
            } else {
                ChainSlot::Next
            }
        } else if requested_direction == d {
            if target_direction == d || target_direction == Direction::Idle {
                ChainSlot::Current
            } else {
                ChainSlot::Future
            }
        } else {
            ChainSlot::Next
        }
    }

    pub fn add(&mut self, directed_floor: DirectedFloor, target_direction: Direction) -> Result<(), CoreError> {
        let slot = self.select_chain(directed_floor.direction, target_direction);
        self.slot_mut(slot).add(directed_floor.floor, directed_floor.direction)
    }

    fn slot_mut(&mut self, slot: ChainSlot) -> &mut DirectionalStopList {
        match slot {
            ChainSlot::Current => &mut self.current,
            ChainSlot::Next => &mut self.next,
            ChainSlot::Future => &mut self.future,
        }
    }

    /// Rotate current <- next <- future <- empty, as many times as needed
    /// until current is non-empty or the whole plan is empty.
    fn rotate_while_current_empty(&mut self) {
        while self.current.is_empty() && !self.is_empty() {
            self.swap_event.set();
            let new_future_direction = -self.future.direction();
            let new_current = std::mem::replace(&mut self.next, DirectionalStopList::new(Direction::Idle));
            let new_next = std::mem::replace(&mut self.future, DirectionalStopList::new(Direction::Idle));
            self.current = new_current;
            self.next = new_next;
            self.future = DirectionalStopList::new(new_future_direction);
        }
    }

    pub fn pop_front(&mut self) -> Result<DirectedFloor, CoreError> {
        if self.current.is_empty() {
            if self.is_empty() {
                return Err(CoreError::Empty);
            }
            self.rotate_while_current_empty();
        }
        let df = self.current.pop_front()?;
        if self.current.is_empty() && !self.is_empty() {
            self.rotate_while_current_empty();
        }
        // Direction deliberately stays set even if the whole plan emptied;
        // the caller resets it to IDLE once the door has closed.
        Ok(df)
    }

    pub fn remove(&mut self, df: DirectedFloor) -> Result<(), CoreError> {
        if self.current.contains(df) {
            self.current.remove(df)?;
            if !self.is_empty() {
                self.rotate_while_current_empty();
            } else {
                self.set_direction(Direction::Idle);
            }
            return Ok(());
        }
        if self.next.contains(df) {
            return self.next.remove(df);
        }
        if self.future.contains(df) {
            return self.future.remove(df);
        }
        Err(CoreError::NotPresent(df))
    }

    /// Cheap `Rc`-clones of the readiness flags, for a caller that needs to
    /// `.await` them after releasing a `RefCell` borrow of the owning
    /// cabin (see `cabin::wait_for_next_target`).
    pub fn readiness_handles(&self) -> PlanReadiness {
        PlanReadiness {
            current: self.current.nonempty.clone(),
            next: self.next.nonempty.clone(),
            future: self.future.nonempty.clone(),
            swap: self.swap_event.clone(),
        }
    }

    fn clone_detached(&self) -> Self {
        ThreeChainPlan {
            current: self.current.clone_detached(),
            next: self.next.clone_detached(),
            future: self.future.clone_detached(),
            swap_event: AsyncEvent::new(),
        }
    }

    /// (floors travelled, stop count) to complete this plan starting from
    /// `start_position`, extrapolating unresolved directional stops per
    /// `heuristic`. `bounds` supplies MIN/MAX for the FURTHEST heuristic.
    pub fn get_metric(
        &self,
        start_position: f64,
        heuristic: DestinationHeuristic,
        bounds: (Floor, Floor),
    ) -> (f64, f64) {
        match heuristic {
            DestinationHeuristic::None => {
                let mut n_floors = 0.0;
                let mut prev = start_position;
                for df in self.iter() {
                    n_floors += (df.floor.internal() as f64 - prev).abs();
                    prev = df.floor.internal() as f64;
                }
                (n_floors, self.len() as f64)
            }
            DestinationHeuristic::Nearest | DestinationHeuristic::Furthest => {
                let mut clone = self.clone_detached();
                for (chain, clone_chain) in [
                    (&self.current, &mut clone.current),
                    (&self.next, &mut clone.next),
                    (&self.future, &mut clone.future),
                ] {
                    for action in chain.iter() {
                        match action.direction {
                            Direction::Idle => continue,
                            Direction::Up => {
                                let extra = match heuristic {
                                    DestinationHeuristic::Nearest => action.floor + 1,
                                    _ => bounds.1,
                                };
                                let _ = clone_chain.add_unique(extra, Direction::Idle);
                            }
                            Direction::Down => {
                                let extra = match heuristic {
                                    DestinationHeuristic::Nearest => action.floor - 1,
                                    _ => bounds.0,
                                };
                                let _ = clone_chain.add_unique(extra, Direction::Idle);
                            }
                        }
                    }
                }
                clone.get_metric(start_position, DestinationHeuristic::None, bounds)
            }
            DestinationHeuristic::Mean => {
                let nearest = self.get_metric(start_position, DestinationHeuristic::Nearest, bounds);
                let furthest = self.get_metric(start_position, DestinationHeuristic::Furthest, bounds);
                ((nearest.0 + furthest.0) / 2.0, (nearest.1 + furthest.1) / 2.0)
            }
        }
    }
}

impl Default for ThreeChainPlan {
    fn default() -> Self {
        Self::new()
    }
}

/// Readiness flags pulled out of a plan so they can be awaited without
/// holding a borrow of the plan (or its owning cabin) across the wait.
pub struct PlanReadiness {
    current: AsyncEvent,
    next: AsyncEvent,
    future: AsyncEvent,
    swap: AsyncEvent,
}

impl PlanReadiness {
    /// Wait for any chain to become non-empty or for a rotation to occur.
    pub async fn wait_any(&self) {
        tokio::select! {
            _ = self.current.wait() => {}
            _ = self.next.wait() => {}
            _ = self.future.wait() => {}
            _ = self.swap.wait() => { self.swap.clear(); }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ChainSlot {
    Current,
    Next,
    Future,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(n: i32) -> Floor {
        Floor::from_display(n)
    }

    fn df(n: i32, d: Direction) -> DirectedFloor {
        DirectedFloor::new(f(n), d)
    }

    /// LOOK ordering scenario (spec §8.4): cabin at floor 1 headed UP,
    /// commit (3,UP), (5,UP), (2,UP), (4,DOWN); arrival order must be
    /// 2, 3, 5, 4, with 4 parked in next_chain.
    #[test]
    fn look_ordering_matches_scenario() {
        let mut plan = ThreeChainPlan::new();
        plan.add(df(3, Direction::Up), Direction::Up).unwrap();
        plan.add(df(5, Direction::Up), Direction::Up).unwrap();
        plan.add(df(2, Direction::Up), Direction::Up).unwrap();
        plan.add(df(4, Direction::Down), Direction::Up).unwrap();

        assert!(plan.contains(df(4, Direction::Down)));
        assert!(!plan.current.contains(df(4, Direction::Down)));
        assert!(plan.next.contains(df(4, Direction::Down)));

        let mut order = Vec::new();
        while !plan.is_empty() {
            order.push(plan.pop_front().unwrap().floor.display());
        }
        assert_eq!(order, vec![2, 3, 5, 4]);
    }

    #[test]
    fn rotation_invariant_after_pop() {
        let mut plan = ThreeChainPlan::new();
        plan.add(df(2, Direction::Up), Direction::Up).unwrap();
        plan.add(df(4, Direction::Down), Direction::Up).unwrap();
        plan.pop_front().unwrap(); // pops 2, current empties, rotates
        assert_eq!(plan.direction(), Direction::Down);
        assert!(!plan.is_empty());
    }

    #[test]
    fn direction_triple_invariant_holds_when_set() {
        let mut plan = ThreeChainPlan::new();
        plan.add(df(3, Direction::Up), Direction::Up).unwrap();
        assert_eq!(plan.current.direction(), Direction::Up);
        assert_eq!(plan.future.direction(), Direction::Up);
        assert_eq!(plan.next.direction(), Direction::Down);
    }

    #[test]
    fn remove_absent_is_not_present() {
        let mut plan = ThreeChainPlan::new();
        let err = plan.remove(df(1, Direction::Idle)).unwrap_err();
        assert!(matches!(err, CoreError::NotPresent(_)));
    }

    #[test]
    fn idempotent_add_cancel_leaves_plan_as_before() {
        let mut plan = ThreeChainPlan::new();
        plan.add(df(3, Direction::Up), Direction::Up).unwrap();
        assert_eq!(plan.len(), 1);
        plan.remove(df(3, Direction::Up)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.direction(), Direction::Idle);
    }

    #[tokio::test]
    async fn readiness_handles_wake_on_add() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let plan = Rc::new(RefCell::new(ThreeChainPlan::new()));
                let plan2 = plan.clone();
                let handle = tokio::task::spawn_local(async move {
                    loop {
                        let readiness = {
                            let p = plan2.borrow();
                            if let Ok(top) = p.top() {
                                return top;
                            }
                            p.readiness_handles()
                        };
                        readiness.wait_any().await;
                    }
                });
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                plan.borrow_mut().add(df(2, Direction::Up), Direction::Up).unwrap();
                let got = tokio::time::timeout(std::time::Duration::from_millis(200), handle)
                    .await
                    .expect("readiness should resolve after add")
                    .unwrap();
                assert_eq!(got.floor.display(), 2);
            })
            .await;
    }
}
