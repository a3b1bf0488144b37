//! A single elevator cabin: the three-chain plan plus physical state
//! (floor, motion state, door state, timings), and the two cooperating
//! loops (`motion_loop`, `door_loop`) that drive it.
//!
//! Every cabin's state lives behind a single `Rc<RefCell<Cabin>>`, shared
//! between its two loop tasks and the controller. Both loops run on the
//! same single-threaded `LocalSet` (see `main.rs`), so a `RefCell` borrow is
//! never contended by another thread — only by another task that happens to
//! run during an `.await`. Every borrow in this module is therefore scoped
//! to end *before* the next `.await`, per the project-wide rule of never
//! holding a `Ref`/`RefMut` across a suspension point.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::{new_wake_event, AsyncEvent, WakeEvent};
use crate::event_bus::{BusEvent, EventBus};
use crate::floor::{DestinationHeuristic, DirectedFloor, Direction, DoorAction, ElevatorId, Floor};
use crate::plan::ThreeChainPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    Opened,
    Closed,
    Opening,
    Closing,
}

impl DoorState {
    pub fn is_open(self) -> bool {
        self != DoorState::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CabinState {
    MovingUp,
    MovingDown,
    StoppedDoorClosed,
    StoppedDoorOpened,
    OpeningDoor,
    ClosingDoor,
}

impl CabinState {
    pub fn moving_direction(self) -> Direction {
        match self {
            CabinState::MovingUp => Direction::Up,
            CabinState::MovingDown => Direction::Down,
            _ => Direction::Idle,
        }
    }

    pub fn door_state(self) -> DoorState {
        match self {
            CabinState::StoppedDoorOpened => DoorState::Opened,
            CabinState::OpeningDoor => DoorState::Opening,
            CabinState::ClosingDoor => DoorState::Closing,
            _ => DoorState::Closed,
        }
    }

    pub fn is_moving(self) -> bool {
        matches!(self, CabinState::MovingUp | CabinState::MovingDown)
    }
}

/// Timing parameters for a single cabin (a per-cabin copy of the relevant
/// slice of `Config`, so an already-running cabin keeps its own timings
/// even if the controller's config is updated mid-flight — only newly
/// (re)started cabins pick up new values).
#[derive(Debug, Clone, Copy)]
pub struct CabinTimings {
    pub floor_travel_duration: f64,
    pub accelerate_duration: f64,
    pub door_move_duration: f64,
    pub door_stay_duration: f64,
}

impl From<&crate::config::Config> for CabinTimings {
    fn from(config: &crate::config::Config) -> Self {
        CabinTimings {
            floor_travel_duration: config.floor_travel_duration,
            accelerate_duration: config.accelerate_duration,
            door_move_duration: config.door_move_duration,
            door_stay_duration: config.door_stay_duration,
        }
    }
}

fn arrival_message(floor: Floor, direction: Direction, id: ElevatorId) -> String {
    match direction {
        Direction::Idle => format!("floor_arrived@{floor}#{id}"),
        Direction::Up => format!("up_floor_arrived@{floor}#{id}"),
        Direction::Down => format!("down_floor_arrived@{floor}#{id}"),
    }
}

pub struct Cabin {
    pub id: ElevatorId,
    timings: CabinTimings,
    floor_bounds: (Floor, Floor),

    plan: ThreeChainPlan,
    arrival_map: HashMap<DirectedFloor, WakeEvent>,
    /// Directed floors short-circuited by `commit_floor` (already at that
    /// floor, compatible direction, not moving) that bypass the plan
    /// entirely. Tracked separately from `arrival_map` so the plan/map
    /// membership invariant stays exactly 1:1.
    pending_commits: HashMap<DirectedFloor, WakeEvent>,
    /// Floors currently selected from inside the cabin, tracked purely for
    /// the controller's "already selected" dedup check.
    pub selected_floors: std::collections::HashSet<Floor>,

    current_floor: Floor,
    state: CabinState,
    moving_timestamp: Option<Instant>,
    door_last_state_change: Option<Instant>,

    pub door_idle: AsyncEvent,
    /// Set while the door is fully open (`STOPPED_DOOR_OPENED`); lets a
    /// `commit_floor` short-circuit wait for "the door has actually
    /// opened" distinct from "the door loop acknowledged the action".
    door_open: AsyncEvent,
    door_action_tx: mpsc::UnboundedSender<(DoorAction, AsyncEvent)>,

    pub exit: AsyncEvent,
    pub move_loop_started: AsyncEvent,
    pub door_loop_started: AsyncEvent,

    events_tx: mpsc::UnboundedSender<String>,
    bus: EventBus,
}

impl Cabin {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: ElevatorId,
        initial_floor: Floor,
        floor_bounds: (Floor, Floor),
        timings: CabinTimings,
        events_tx: mpsc::UnboundedSender<String>,
        bus: EventBus,
        door_action_tx: mpsc::UnboundedSender<(DoorAction, AsyncEvent)>,
    ) -> Self {
        Cabin {
            id,
            timings,
            floor_bounds,
            plan: ThreeChainPlan::new(),
            arrival_map: HashMap::new(),
            pending_commits: HashMap::new(),
            selected_floors: std::collections::HashSet::new(),
            current_floor: initial_floor,
            state: CabinState::StoppedDoorClosed,
            moving_timestamp: None,
            door_last_state_change: None,
            door_idle: AsyncEvent::new(),
            door_open: AsyncEvent::new(),
            door_action_tx,
            exit: AsyncEvent::new(),
            move_loop_started: AsyncEvent::new(),
            door_loop_started: AsyncEvent::new(),
            events_tx,
            bus,
        }
    }

    fn emit(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(cabin = self.id, %message, "emit event");
        let _ = self.events_tx.send(message);
    }

    fn set_state(&mut self, new_state: CabinState) {
        if self.state == new_state {
            return;
        }
        self.state = new_state;
        self.bus.publish(BusEvent::CabinStateChanged {
            id: self.id,
            floor: self.current_floor,
            door_state: new_state.door_state(),
            moving_direction: new_state.moving_direction(),
        });
    }

    fn set_current_floor(&mut self, new_floor: Floor) {
        if self.current_floor == new_floor {
            return;
        }
        self.current_floor = new_floor;
        debug!(cabin = self.id, floor = %new_floor, "floor changed");
        self.bus.publish(BusEvent::CabinFloorChanged {
            id: self.id,
            floor: new_floor,
            door_state: self.state.door_state(),
            moving_direction: self.state.moving_direction(),
        });
    }

    pub fn state(&self) -> CabinState {
        self.state
    }

    pub fn current_floor(&self) -> Floor {
        self.current_floor
    }

    pub fn committed_direction(&self) -> Direction {
        self.plan.direction()
    }

    pub fn directed_floor(&self) -> DirectedFloor {
        DirectedFloor::new(self.current_floor, self.committed_direction())
    }

    pub fn direction_to(&self, target_floor: Floor) -> Direction {
        let pos = self.current_position();
        let target = target_floor.internal() as f64;
        if target > pos {
            Direction::Up
        } else if target < pos {
            Direction::Down
        } else {
            Direction::Idle
        }
    }

    pub fn position_percentage(&self) -> f64 {
        match self.moving_timestamp {
            None => 0.0,
            Some(start) => {
                let p = start.elapsed().as_secs_f64() / self.timings.floor_travel_duration;
                p.clamp(0.0, 1.0)
            }
        }
    }

    pub fn current_position(&self) -> f64 {
        let base = self.current_floor.internal() as f64;
        match self.state.moving_direction() {
            Direction::Up => base + self.position_percentage(),
            Direction::Down => base - self.position_percentage(),
            Direction::Idle => base,
        }
    }

    pub fn door_position_percentage(&self) -> f64 {
        let p = match self.state {
            CabinState::StoppedDoorOpened => 1.0,
            CabinState::OpeningDoor => self
                .door_last_state_change
                .map(|t| t.elapsed().as_secs_f64() / self.timings.door_move_duration)
                .unwrap_or(0.0),
            CabinState::ClosingDoor => {
                1.0 - self
                    .door_last_state_change
                    .map(|t| t.elapsed().as_secs_f64() / self.timings.door_move_duration)
                    .unwrap_or(0.0)
            }
            CabinState::StoppedDoorClosed | CabinState::MovingUp | CabinState::MovingDown => 0.0,
        };
        p.clamp(0.0, 1.0)
    }

    /// The plan-insertion path: idempotent with respect to `(floor,
    /// requested_direction)`. Does not know about the same-floor
    /// short-circuit; that lives in the free function `commit_floor` below,
    /// which needs the owning `Rc` to spawn the door-open continuation.
    fn commit_floor_plan(&mut self, floor: Floor, requested_direction: Direction, event: Option<WakeEvent>) -> WakeEvent {
        let df = DirectedFloor::new(floor, requested_direction);
        if let Some(existing) = self.arrival_map.get(&df) {
            debug!(cabin = self.id, %df, "floor already committed");
            return existing.clone();
        }
        let target_direction = self.direction_to(floor);
        self.plan
            .add(df, target_direction)
            .expect("select_chain always picks a direction-compatible chain");
        let wake = event.unwrap_or_else(new_wake_event);
        self.arrival_map.insert(df, wake.clone());
        debug!(cabin = self.id, %df, "committed floor");
        wake
    }

    /// No-op if the pair isn't pending or in the plan. Returns the
    /// discarded (never signalled) wake event, if any.
    pub fn cancel_commit(&mut self, floor: Floor, requested_direction: Direction) -> Option<WakeEvent> {
        let df = DirectedFloor::new(floor, requested_direction);
        if let Some(w) = self.pending_commits.remove(&df) {
            debug!(cabin = self.id, %df, "cancelled short-circuited commit");
            return Some(w);
        }
        match self.plan.remove(df) {
            Ok(()) => {
                debug!(cabin = self.id, %df, "cancelled commit");
                self.arrival_map.remove(&df)
            }
            Err(crate::error::CoreError::NotPresent(_)) => None,
            Err(e) => {
                error!(cabin = self.id, %df, error = %e, "cancel_commit invariant violation");
                None
            }
        }
    }

    /// Pop the plan's top entry, removing and signalling its wake event.
    fn pop_target(&mut self) -> DirectedFloor {
        let df = self
            .plan
            .pop_front()
            .expect("pop_target is only called when the plan is known non-empty");
        if let Some(event) = self.arrival_map.remove(&df) {
            event.set();
        }
        df
    }

    fn estimate_door_close_time(&self) -> f64 {
        let Some(changed_at) = self.door_last_state_change else {
            return 0.0;
        };
        let passed = changed_at.elapsed().as_secs_f64();
        let t = &self.timings;
        let duration = match self.state {
            CabinState::OpeningDoor => t.door_move_duration - passed + t.door_stay_duration + t.door_move_duration,
            CabinState::StoppedDoorOpened => t.door_stay_duration - passed + t.door_move_duration,
            CabinState::ClosingDoor => t.door_move_duration - passed,
            _ => 0.0,
        };
        duration.max(0.0)
    }

    fn estimate_door_open_time(&self) -> f64 {
        let t = &self.timings;
        let Some(changed_at) = self.door_last_state_change else {
            return t.door_move_duration;
        };
        let passed = changed_at.elapsed().as_secs_f64();
        let duration = match self.state {
            CabinState::OpeningDoor => t.door_move_duration - passed,
            CabinState::StoppedDoorOpened => 0.0,
            CabinState::ClosingDoor => passed,
            CabinState::StoppedDoorClosed => t.door_move_duration,
            _ => {
                error!(cabin = self.id, state = ?self.state, "invalid state for estimating door open time");
                t.door_move_duration
            }
        };
        duration.max(0.0)
    }

    fn calculate_duration(&self, n_floors: f64, n_stops: f64) -> f64 {
        let t = &self.timings;
        n_floors * t.floor_travel_duration + n_stops * (t.door_move_duration * 2.0 + t.door_stay_duration)
    }

    /// Deterministic estimate of the time to finish the plan, optionally
    /// after committing an additional directed floor.
    pub fn estimate_total_duration(&self, directed_request: Option<DirectedFloor>, heuristic: DestinationHeuristic) -> f64 {
        let Some(request) = directed_request else {
            let mut duration = 0.0;
            if !self.state.is_moving() {
                duration += self.estimate_door_close_time();
            }
            let (n_floors, n_stops) = self.plan.get_metric(self.current_position(), heuristic, self.floor_bounds);
            duration += self.calculate_duration(n_floors, n_stops);
            return duration;
        };

        if request.floor == self.current_floor
            && (self.committed_direction() == request.direction || request.direction == Direction::Idle)
            && !self.state.is_moving()
        {
            let t = &self.timings;
            let mut duration = self.estimate_door_open_time() + t.door_stay_duration + t.door_move_duration;
            if self.plan.is_empty() {
                return duration;
            }
            let (n_floors, n_stops) = self.plan.get_metric(self.current_position(), heuristic, self.floor_bounds);
            duration += self.calculate_duration(n_floors, n_stops);
            return duration;
        }

        let target_direction = self.direction_to(request.floor);
        let mut plan_copy = self.plan_snapshot();
        plan_copy
            .add(request, target_direction)
            .expect("select_chain always picks a direction-compatible chain");

        let mut duration = 0.0;
        if !self.state.is_moving() {
            duration += self.estimate_door_close_time();
        }
        let (n_floors, n_stops) = plan_copy.get_metric(self.current_position(), heuristic, self.floor_bounds);
        duration += self.calculate_duration(n_floors, n_stops);
        duration
    }

    /// Deterministic estimate of the time to finish a hypothetical plan
    /// built from scratch out of `requests`, ignoring whatever is actually
    /// committed. Used to score a candidate joint reassignment without
    /// mutating the real plan.
    pub fn estimate_duration_for_requests(&self, requests: &[DirectedFloor], heuristic: DestinationHeuristic) -> f64 {
        let mut plan = ThreeChainPlan::new();
        for &df in requests {
            let target_direction = if df.direction == Direction::Idle {
                self.direction_to(df.floor)
            } else {
                df.direction
            };
            plan.add(df, target_direction)
                .expect("select_chain always picks a direction-compatible chain");
        }
        let mut duration = 0.0;
        if !self.state.is_moving() {
            duration += self.estimate_door_close_time();
        }
        let (n_floors, n_stops) = plan.get_metric(self.current_position(), heuristic, self.floor_bounds);
        duration += self.calculate_duration(n_floors, n_stops);
        duration
    }

    fn plan_snapshot(&self) -> ThreeChainPlan {
        let mut snapshot = ThreeChainPlan::new();
        if self.plan.direction() != Direction::Idle {
            snapshot.set_direction(self.plan.direction());
        }
        for df in self.plan.iter() {
            snapshot
                .add(*df, df.direction)
                .expect("re-adding an already-valid plan entry cannot violate direction compatibility");
        }
        snapshot
    }
}

/// Owns a cabin's shared state plus the `JoinHandle`s of its two loops.
pub struct CabinHandle {
    pub cabin: Rc<RefCell<Cabin>>,
    move_task: Option<JoinHandle<()>>,
    door_task: Option<JoinHandle<()>>,
}

impl CabinHandle {
    pub fn new(
        id: ElevatorId,
        initial_floor: Floor,
        floor_bounds: (Floor, Floor),
        timings: CabinTimings,
        events_tx: mpsc::UnboundedSender<String>,
        bus: EventBus,
    ) -> Self {
        let (door_action_tx, door_action_rx) = mpsc::unbounded_channel();
        let cabin = Rc::new(RefCell::new(Cabin::new(
            id,
            initial_floor,
            floor_bounds,
            timings,
            events_tx,
            bus,
            door_action_tx,
        )));
        let mut handle = CabinHandle {
            cabin,
            move_task: None,
            door_task: None,
        };
        handle.start(door_action_rx);
        handle
    }

    fn start(&mut self, door_action_rx: mpsc::UnboundedReceiver<(DoorAction, AsyncEvent)>) {
        self.cabin.borrow().door_idle.set();
        let move_cabin = self.cabin.clone();
        let door_cabin = self.cabin.clone();
        self.move_task = Some(tokio::task::spawn_local(motion_loop(move_cabin)));
        self.door_task = Some(tokio::task::spawn_local(door_loop(door_cabin, door_action_rx)));
    }

    pub async fn stop(&mut self) {
        self.cabin.borrow().exit.set();
        if let Some(t) = self.move_task.take() {
            t.abort();
            let _ = t.await;
        }
        if let Some(t) = self.door_task.take() {
            t.abort();
            let _ = t.await;
        }
        self.cabin.borrow().move_loop_started.clear();
        self.cabin.borrow().door_loop_started.clear();
    }

    pub fn is_started(&self) -> bool {
        self.cabin.borrow().move_loop_started.is_set() || self.cabin.borrow().door_loop_started.is_set()
    }
}

/// Idempotent with respect to `(floor, requested_direction)`. If the cabin
/// is already at `floor`, its committed direction is compatible, and it
/// isn't moving, the arrival event is emitted synchronously and a door-open
/// is scheduled in the background; the returned `WakeEvent` fires once that
/// door has actually opened (not merely been acknowledged). Otherwise the
/// directed floor is inserted into the plan (§4.2) as usual.
pub fn commit_floor(cabin: &Rc<RefCell<Cabin>>, floor: Floor, requested_direction: Direction, event: Option<WakeEvent>) -> WakeEvent {
    let df = DirectedFloor::new(floor, requested_direction);
    {
        let c = cabin.borrow();
        if let Some(existing) = c.arrival_map.get(&df) {
            return existing.clone();
        }
        if let Some(existing) = c.pending_commits.get(&df) {
            return existing.clone();
        }
    }

    let short_circuit = {
        let c = cabin.borrow();
        floor == c.current_floor()
            && (requested_direction == Direction::Idle || requested_direction == c.committed_direction())
            && !c.state().is_moving()
    };

    if !short_circuit {
        return cabin.borrow_mut().commit_floor_plan(floor, requested_direction, event);
    }

    let wake = event.unwrap_or_else(new_wake_event);
    {
        let mut c = cabin.borrow_mut();
        let arrival_direction = if c.committed_direction() == Direction::Idle {
            requested_direction
        } else {
            c.committed_direction()
        };
        let msg = arrival_message(floor, arrival_direction, c.id);
        c.emit(msg);
        c.pending_commits.insert(df, wake.clone());
    }

    let cabin_for_task = cabin.clone();
    let wake_for_task = wake.clone();
    tokio::task::spawn_local(async move {
        commit_door(&cabin_for_task, DoorAction::Open).await;
        let door_open = cabin_for_task.borrow().door_open.clone();
        door_open.wait().await;
        let still_pending = cabin_for_task.borrow_mut().pending_commits.remove(&df).is_some();
        if still_pending {
            wake_for_task.set();
        }
    });

    wake
}

pub fn cancel_commit(cabin: &Rc<RefCell<Cabin>>, floor: Floor, requested_direction: Direction) -> Option<WakeEvent> {
    cabin.borrow_mut().cancel_commit(floor, requested_direction)
}

/// Enqueue a door action and wait until the door loop has reacted to it.
/// Each call gets its own single-shot acknowledgement event, so concurrent
/// callers never race over a shared flag.
pub async fn commit_door(cabin: &Rc<RefCell<Cabin>>, action: DoorAction) {
    let ack = AsyncEvent::new();
    let tx = cabin.borrow().door_action_tx.clone();
    if tx.send((action, ack.clone())).is_err() {
        warn!("door loop is gone, dropping door action");
        return;
    }
    ack.wait().await;
}

/// Suspend until the plan has a top entry or the cabin is exiting, without
/// ever holding the cabin's `RefCell` borrow across the wait.
async fn wait_for_next_target(cabin: &Rc<RefCell<Cabin>>) -> Option<DirectedFloor> {
    loop {
        let readiness = {
            let c = cabin.borrow();
            if let Ok(top) = c.plan.top() {
                return Some(top);
            }
            if c.exit.is_set() {
                return None;
            }
            c.plan.readiness_handles()
        };
        let exit = cabin.borrow().exit.clone();
        tokio::select! {
            _ = readiness.wait_any() => {}
            _ = exit.wait() => {}
        }
    }
}

fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}

async fn motion_loop(cabin: Rc<RefCell<Cabin>>) {
    cabin.borrow().move_loop_started.set();
    loop {
        let Some(directed_floor) = wait_for_next_target(&cabin).await else {
            debug!("motion loop exiting");
            break;
        };
        let target = directed_floor.floor;
        let mut direction = directed_floor.direction;

        let (door_idle_set, same_as_current, state) = {
            let c = cabin.borrow();
            (c.door_idle.is_set(), c.directed_floor() == directed_floor, c.state())
        };

        if !door_idle_set && same_as_current {
            match state {
                CabinState::ClosingDoor => {
                    commit_door(&cabin, DoorAction::Open).await;
                    continue;
                }
                CabinState::OpeningDoor | CabinState::StoppedDoorOpened => {
                    cabin.borrow_mut().pop_target();
                    continue;
                }
                other => {
                    error!(state = ?other, "invalid state while waiting for door to close");
                    continue;
                }
            }
        }

        if !door_idle_set {
            let door_idle = cabin.borrow().door_idle.clone();
            door_idle.wait().await;
            let still_same = cabin.borrow().plan.top().ok() == Some(directed_floor);
            if !still_same {
                continue;
            }
        }

        cabin.borrow_mut().moving_timestamp = Some(Instant::now());
        let (current, travel) = {
            let c = cabin.borrow();
            (c.current_floor(), c.timings.floor_travel_duration)
        };

        if current.internal() < target.internal() {
            cabin.borrow_mut().set_state(CabinState::MovingUp);
            tokio::time::sleep(secs(travel)).await;
            let mut c = cabin.borrow_mut();
            let next = c.current_floor() + 1;
            c.set_current_floor(next);
            if c.plan.is_empty() {
                // Target floor deselected while we were in flight.
                c.set_state(CabinState::StoppedDoorClosed);
            }
        } else if current.internal() > target.internal() {
            cabin.borrow_mut().set_state(CabinState::MovingDown);
            tokio::time::sleep(secs(travel)).await;
            let mut c = cabin.borrow_mut();
            let next = c.current_floor() - 1;
            c.set_current_floor(next);
            if c.plan.is_empty() {
                c.set_state(CabinState::StoppedDoorClosed);
            }
        } else {
            cabin.borrow_mut().set_state(CabinState::StoppedDoorClosed);
            commit_door(&cabin, DoorAction::Open).await;

            let mut committed_direction = direction;
            loop {
                let (popped_floor, id) = {
                    let mut c = cabin.borrow_mut();
                    let popped = c.pop_target();
                    (popped.floor, c.id)
                };
                let (plan_empty, next_top) = {
                    let c = cabin.borrow();
                    (c.plan.is_empty(), c.plan.top().ok())
                };
                if plan_empty {
                    if direction == Direction::Idle {
                        direction = directed_floor.direction;
                    }
                    cabin.borrow().emit(arrival_message(popped_floor, direction, id));
                    break;
                }
                let next = next_top.expect("plan non-empty");
                if next.floor == popped_floor {
                    if direction == Direction::Idle {
                        committed_direction = next.direction;
                    }
                    assert_ne!(committed_direction, Direction::Idle);
                    if next.direction == -committed_direction {
                        cabin.borrow().emit(arrival_message(popped_floor, committed_direction, id));
                        break;
                    }
                    info!(cabin = id, floor = %popped_floor, "already-serviced same-direction stop, skipping");
                    continue;
                } else if next.floor.internal() > popped_floor.internal() {
                    cabin.borrow().emit(arrival_message(popped_floor, Direction::Up, id));
                } else {
                    cabin.borrow().emit(arrival_message(popped_floor, Direction::Down, id));
                }
                break;
            }
        }
        cabin.borrow_mut().moving_timestamp = None;
    }
}

async fn open_door_phase(cabin: Rc<RefCell<Cabin>>, remaining: Duration) {
    let door_move = cabin.borrow().timings.door_move_duration;
    {
        let mut c = cabin.borrow_mut();
        c.door_open.clear();
        c.set_state(CabinState::OpeningDoor);
        c.door_last_state_change = Instant::now().checked_sub(secs(door_move).saturating_sub(remaining));
    }
    tokio::time::sleep(remaining).await;
    let stay = {
        let mut c = cabin.borrow_mut();
        c.set_state(CabinState::StoppedDoorOpened);
        c.door_last_state_change = Some(Instant::now());
        c.door_open.set();
        c.emit(format!("door_opened#{}", c.id));
        c.timings.door_stay_duration
    };
    tokio::time::sleep(secs(stay)).await;
    let full = cabin.borrow().timings.door_move_duration;
    close_door_phase(cabin, secs(full)).await;
}

async fn close_door_phase(cabin: Rc<RefCell<Cabin>>, remaining: Duration) {
    {
        let mut c = cabin.borrow_mut();
        c.door_open.clear();
        c.set_state(CabinState::ClosingDoor);
        c.door_last_state_change = Some(Instant::now());
    }
    tokio::time::sleep(remaining).await;
    let mut c = cabin.borrow_mut();
    c.set_state(CabinState::StoppedDoorClosed);
    c.emit(format!("door_closed#{}", c.id));
    c.door_idle.set();
    if c.plan.is_empty() {
        c.plan.set_direction(Direction::Idle);
    }
}

async fn abort_and_join(task: &mut Option<JoinHandle<()>>) {
    if let Some(t) = task.take() {
        t.abort();
        let _ = t.await;
    }
}

async fn door_loop(cabin: Rc<RefCell<Cabin>>, mut rx: mpsc::UnboundedReceiver<(DoorAction, AsyncEvent)>) {
    cabin.borrow().door_loop_started.set();
    let mut task: Option<JoinHandle<()>> = None;
    let exit = cabin.borrow().exit.clone();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some((action, ack)) = received else { break };
                let (state, eid) = { let c = cabin.borrow(); (c.state(), c.id) };
                debug!(cabin = eid, action = ?action, state = ?state, "door action received");

                match (state, action) {
                    (CabinState::MovingUp, _) | (CabinState::MovingDown, _) => {
                        info!(cabin = eid, "cannot commit door state while moving");
                    }
                    (CabinState::OpeningDoor, _) => {}
                    (CabinState::StoppedDoorClosed, DoorAction::Open) => {
                        cabin.borrow().door_idle.clear();
                        let full = cabin.borrow().timings.door_move_duration;
                        task = Some(tokio::task::spawn_local(open_door_phase(cabin.clone(), secs(full))));
                    }
                    (CabinState::StoppedDoorClosed, DoorAction::Close) => {}
                    (CabinState::StoppedDoorOpened, DoorAction::Close) => {
                        abort_and_join(&mut task).await;
                        let full = cabin.borrow().timings.door_move_duration;
                        task = Some(tokio::task::spawn_local(close_door_phase(cabin.clone(), secs(full))));
                    }
                    (CabinState::StoppedDoorOpened, DoorAction::Open) => {}
                    (CabinState::ClosingDoor, DoorAction::Open) => {
                        let elapsed = {
                            let c = cabin.borrow();
                            let full = secs(c.timings.door_move_duration);
                            c.door_last_state_change
                                .map(|t| t.elapsed())
                                .unwrap_or_default()
                                .min(full)
                        };
                        abort_and_join(&mut task).await;
                        cabin.borrow().door_idle.clear();
                        task = Some(tokio::task::spawn_local(open_door_phase(cabin.clone(), elapsed)));
                    }
                    (CabinState::ClosingDoor, DoorAction::Close) => {}
                }

                ack.set();
            }
            _ = exit.wait() => {
                break;
            }
        }
    }

    abort_and_join(&mut task).await;
    cabin.borrow().door_loop_started.clear();
}
