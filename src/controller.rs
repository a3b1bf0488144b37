//! Parses incoming command strings (§6), dispatches them onto the cabin
//! collection, and keeps one long-lived task per live request so that an
//! explicit cancel command can find and abort it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cabin::{self, CabinTimings};
use crate::collection::Elevators;
use crate::config::Config;
use crate::error::CoreError;
use crate::event_bus::EventBus;
use crate::floor::{DestinationHeuristic, DirectedFloor, Direction, DoorAction, ElevatorId, Floor, Strategy};

const HEURISTIC: DestinationHeuristic = DestinationHeuristic::Mean;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reset,
    CallUp(Floor),
    CallDown(Floor),
    CancelCallUp(Floor),
    CancelCallDown(Floor),
    SelectFloor(Floor, ElevatorId),
    DeselectFloor(Floor, ElevatorId),
    OpenDoor(ElevatorId),
    CloseDoor(ElevatorId),
}

impl FromStr for Command {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        let unknown = || CoreError::UnknownCommand(s.to_string());

        if s == "reset" {
            return Ok(Command::Reset);
        }
        if let Some(rest) = s.strip_prefix("cancel_call_up@") {
            return Ok(Command::CancelCallUp(parse_floor(rest).ok_or_else(unknown)?));
        }
        if let Some(rest) = s.strip_prefix("cancel_call_down@") {
            return Ok(Command::CancelCallDown(parse_floor(rest).ok_or_else(unknown)?));
        }
        if let Some(rest) = s.strip_prefix("call_up@") {
            return Ok(Command::CallUp(parse_floor(rest).ok_or_else(unknown)?));
        }
        if let Some(rest) = s.strip_prefix("call_down@") {
            return Ok(Command::CallDown(parse_floor(rest).ok_or_else(unknown)?));
        }
        if let Some(rest) = s.strip_prefix("deselect_floor@") {
            let (floor, id) = parse_floor_and_id(rest).ok_or_else(unknown)?;
            return Ok(Command::DeselectFloor(floor, id));
        }
        if let Some(rest) = s.strip_prefix("select_floor@") {
            let (floor, id) = parse_floor_and_id(rest).ok_or_else(unknown)?;
            return Ok(Command::SelectFloor(floor, id));
        }
        if let Some(rest) = s.strip_prefix("open_door#") {
            return Ok(Command::OpenDoor(rest.parse().map_err(|_| unknown())?));
        }
        if let Some(rest) = s.strip_prefix("close_door#") {
            return Ok(Command::CloseDoor(rest.parse().map_err(|_| unknown())?));
        }
        Err(unknown())
    }
}

fn parse_floor(s: &str) -> Option<Floor> {
    s.parse::<i32>().ok().map(Floor::from_display)
}

fn parse_floor_and_id(s: &str) -> Option<(Floor, ElevatorId)> {
    let (floor_s, id_s) = s.split_once('#')?;
    Some((parse_floor(floor_s)?, id_s.parse().ok()?))
}

impl Command {
    /// For a `cancel_*`/`deselect_*` command, the key of the task it targets.
    fn target_key(&self) -> Option<String> {
        match *self {
            Command::CancelCallUp(floor) => Some(format!("call_up@{floor}")),
            Command::CancelCallDown(floor) => Some(format!("call_down@{floor}")),
            Command::DeselectFloor(floor, id) => Some(format!("select_floor@{floor}#{id}")),
            _ => None,
        }
    }
}

/// What a command task's finally-handler must undo if the task is aborted
/// (or simply clean up once it completes): a hall call is cancelled through
/// the building-wide map, a car call through its owning cabin directly,
/// and door commands carry nothing to undo.
enum Cleanup {
    HallCall(DirectedFloor),
    CarCall(ElevatorId, DirectedFloor),
    None,
}

struct CommandGuard {
    elevators: Rc<RefCell<Elevators>>,
    tasks: Rc<RefCell<HashMap<String, JoinHandle<()>>>>,
    key: String,
    cleanup: Cleanup,
}

impl Drop for CommandGuard {
    fn drop(&mut self) {
        match self.cleanup {
            Cleanup::HallCall(df) => {
                self.elevators.borrow_mut().cancel_commit(df);
            }
            Cleanup::CarCall(eid, df) => {
                self.elevators.borrow_mut().cancel_commit_on(eid, df);
            }
            Cleanup::None => {}
        }
        self.tasks.borrow_mut().remove(&self.key);
    }
}

pub struct Controller {
    config: Config,
    elevators: Rc<RefCell<Elevators>>,
    tasks: Rc<RefCell<HashMap<String, JoinHandle<()>>>>,
    events_tx: mpsc::UnboundedSender<String>,
    bus: EventBus,
}

impl Controller {
    pub fn new(config: Config, events_tx: mpsc::UnboundedSender<String>, bus: EventBus) -> Self {
        let floor_bounds = config.floor_bounds();
        let elevators = Elevators::new(floor_bounds, events_tx.clone(), bus.clone());
        Controller {
            config,
            elevators: Rc::new(RefCell::new(elevators)),
            tasks: Rc::new(RefCell::new(HashMap::new())),
            events_tx,
            bus,
        }
    }

    /// Spawn the configured number of cabins at `default_floor`.
    pub fn start(&mut self) {
        let timings = CabinTimings::from(&self.config);
        let default_floor = self.config.default_floor();
        for _ in 0..self.config.elevator_count {
            self.elevators.borrow_mut().spawn_cabin(default_floor, timings);
        }
    }

    /// Abort every live command task and stop every cabin loop.
    pub async fn stop(&mut self) {
        let keys: Vec<String> = self.tasks.borrow().keys().cloned().collect();
        for key in keys {
            if let Some(task) = self.tasks.borrow_mut().remove(&key) {
                task.abort();
                let _ = task.await;
            }
        }
        // Drain the cabins out from under the RefCell first so their
        // `.stop().await` never happens while `elevators` is borrowed.
        let handles = self.elevators.borrow_mut().take_all_cabins();
        for mut handle in handles {
            handle.stop().await;
        }
    }

    /// Stop everything and restart fresh cabins at `default_floor`. Any
    /// outgoing events still buffered on `events_tx`'s unbounded channel are
    /// the receiver's to drain; the controller does not own that end.
    pub async fn reset(&mut self) {
        self.stop().await;
        self.start();
    }

    pub async fn update_config(&mut self, config: Config) {
        config.validate().expect("caller validates before applying");
        let old_count = self.config.elevator_count;
        self.config = config;
        if self.config.elevator_count != old_count {
            self.apply_elevator_count().await;
        }
    }

    async fn apply_elevator_count(&mut self) {
        let target = self.config.elevator_count;
        let current = self.elevators.borrow().len() as u32;
        if target > current {
            let timings = CabinTimings::from(&self.config);
            let default_floor = self.config.default_floor();
            for _ in current..target {
                self.elevators.borrow_mut().spawn_cabin(default_floor, timings);
            }
        } else if target < current {
            let mut ids: Vec<ElevatorId> = self.elevators.borrow().cabin_ids().collect();
            ids.sort_unstable();
            let survivors = ids.split_off((target as usize).min(ids.len()));
            let retirees = ids;
            for id in retirees {
                // Release the borrow before awaiting: another task's
                // command-guard may need `elevators` while this one sleeps.
                let handle = self.elevators.borrow_mut().take_cabin_for_retirement(id, &survivors);
                if let Some(mut handle) = handle {
                    handle.stop().await;
                }
            }
        }
    }

    /// Parse and dispatch a single incoming command line. Unparseable input
    /// is logged and dropped, matching §7's `UnknownCommand` policy.
    pub async fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match line.parse::<Command>() {
            Ok(command) => self.dispatch(line.to_string(), command).await,
            Err(e) => warn!(command = line, error = %e, "dropping unrecognised command"),
        }
    }

    async fn dispatch(&mut self, raw: String, command: Command) {
        if let Some(target) = command.target_key() {
            self.cancel_task(&target);
            return;
        }

        if self.tasks.borrow().contains_key(&raw) {
            debug!(command = %raw, "command already in flight, coalescing");
            return;
        }

        match command {
            Command::Reset => self.reset().await,
            Command::OpenDoor(id) => self.spawn_door_task(raw, id, DoorAction::Open),
            Command::CloseDoor(id) => self.spawn_door_task(raw, id, DoorAction::Close),
            Command::CallUp(floor) => self.spawn_hall_call(raw, floor, Direction::Up),
            Command::CallDown(floor) => self.spawn_hall_call(raw, floor, Direction::Down),
            Command::SelectFloor(floor, id) => self.spawn_car_call(raw, floor, id),
            Command::CancelCallUp(_) | Command::CancelCallDown(_) | Command::DeselectFloor(_, _) => {
                unreachable!("handled via target_key above")
            }
        }
    }

    fn cancel_task(&mut self, key: &str) {
        if let Some(task) = self.tasks.borrow_mut().remove(key) {
            task.abort();
        } else {
            debug!(command = key, "nothing to cancel");
        }
    }

    fn pick_cabin(&self, df: DirectedFloor) -> Option<ElevatorId> {
        match self.config.strategy {
            Strategy::Greedy => self.elevators.borrow().best_cabin_greedy(df, HEURISTIC),
            Strategy::Optimal => self.optimal_reassign(Some(df)),
        }
    }

    /// Jointly reassign every live hall call to the minimax-optimal
    /// distribution: enumerate every candidate assignment from
    /// `Elevators::most_possible_assignments`, score each whole candidate
    /// (with `extra` layered on top, if given) with
    /// `Elevators::estimate_assignment`, and apply the winner via a strict
    /// `reassign` so every cabin actually ends up holding what the winning
    /// candidate says it should, not just the ones that changed. Returns
    /// the cabin the winning candidate would send `extra` to.
    fn optimal_reassign(&self, extra: Option<DirectedFloor>) -> Option<ElevatorId> {
        let candidates = self.elevators.borrow().most_possible_assignments();
        let mut best: Option<(f64, HashMap<ElevatorId, Vec<DirectedFloor>>, Option<ElevatorId>)> = None;
        for assignment in candidates {
            let (duration, eid) = self.elevators.borrow().estimate_assignment(&assignment, extra, HEURISTIC);
            let better = match &best {
                Some((best_duration, ..)) => duration < *best_duration,
                None => true,
            };
            if better {
                best = Some((duration, assignment, eid));
            }
        }
        let (_, best_assignment, best_eid) = best?;
        self.elevators.borrow_mut().reassign(&best_assignment, true);
        best_eid
    }

    fn spawn_hall_call(&mut self, key: String, floor: Floor, direction: Direction) {
        let df = DirectedFloor::new(floor, direction);
        let Some(eid) = self.pick_cabin(df) else {
            warn!(%df, "no cabin available to serve hall call");
            return;
        };
        let Some(wake) = self.elevators.borrow_mut().commit_floor(eid, df, None) else {
            warn!(%df, cabin = eid, "cabin vanished before commit");
            return;
        };

        let guard = CommandGuard {
            elevators: self.elevators.clone(),
            tasks: self.tasks.clone(),
            key: key.clone(),
            cleanup: Cleanup::HallCall(df),
        };
        let task = tokio::task::spawn_local(async move {
            wake.wait().await;
            drop(guard);
        });
        self.tasks.borrow_mut().insert(key, task);
    }

    fn spawn_car_call(&mut self, key: String, floor: Floor, eid: ElevatorId) {
        let df = DirectedFloor::new(floor, Direction::Idle);
        let Some(wake) = self.elevators.borrow_mut().commit_floor_on(eid, df, None) else {
            warn!(floor = %floor, cabin = eid, "unknown cabin for select_floor");
            return;
        };

        let guard = CommandGuard {
            elevators: self.elevators.clone(),
            tasks: self.tasks.clone(),
            key: key.clone(),
            cleanup: Cleanup::CarCall(eid, df),
        };
        let task = tokio::task::spawn_local(async move {
            wake.wait().await;
            drop(guard);
        });
        self.tasks.borrow_mut().insert(key, task);

        if self.config.strategy == Strategy::Optimal {
            self.reoptimize();
        }
    }

    fn spawn_door_task(&mut self, key: String, eid: ElevatorId, action: DoorAction) {
        let Some(cabin) = self.elevators.borrow().cabin(eid).cloned() else {
            warn!(cabin = eid, "unknown cabin for door command");
            return;
        };
        let guard = CommandGuard {
            elevators: self.elevators.clone(),
            tasks: self.tasks.clone(),
            key: key.clone(),
            cleanup: Cleanup::None,
        };
        let task = tokio::task::spawn_local(async move {
            cabin::commit_door(&cabin, action).await;
            drop(guard);
        });
        self.tasks.borrow_mut().insert(key, task);
    }

    /// Re-run the joint optimal search over every live hall call and
    /// migrate any that now belong elsewhere, preserving WakeEvent identity
    /// (§9). Car calls are never reassigned: they belong to the cabin the
    /// passenger is already inside, and never enter the hall-call map.
    fn reoptimize(&self) {
        self.optimal_reassign(None);
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hall_and_car_calls() {
        assert_eq!("call_up@3".parse::<Command>().unwrap(), Command::CallUp(Floor::from_display(3)));
        assert_eq!("call_down@-2".parse::<Command>().unwrap(), Command::CallDown(Floor::from_display(-2)));
        assert_eq!(
            "select_floor@5#2".parse::<Command>().unwrap(),
            Command::SelectFloor(Floor::from_display(5), 2)
        );
        assert_eq!(
            "deselect_floor@5#2".parse::<Command>().unwrap(),
            Command::DeselectFloor(Floor::from_display(5), 2)
        );
        assert_eq!("open_door#1".parse::<Command>().unwrap(), Command::OpenDoor(1));
        assert_eq!("close_door#1".parse::<Command>().unwrap(), Command::CloseDoor(1));
        assert_eq!("reset".parse::<Command>().unwrap(), Command::Reset);
    }

    #[test]
    fn rejects_garbage() {
        assert!("fly_up@3".parse::<Command>().is_err());
        assert!("call_up@abc".parse::<Command>().is_err());
        assert!("select_floor@5".parse::<Command>().is_err());
    }

    #[test]
    fn cancel_targets_the_originating_key() {
        let cancel = "cancel_call_up@3".parse::<Command>().unwrap();
        assert_eq!(cancel.target_key(), Some("call_up@3".to_string()));
        let deselect = "deselect_floor@5#2".parse::<Command>().unwrap();
        assert_eq!(deselect.target_key(), Some("select_floor@5#2".to_string()));
    }

    #[tokio::test]
    async fn straight_up_call_emits_arrival_and_door_events() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
                let bus = EventBus::new();
                let mut config = Config::default();
                config.elevator_count = 1;
                config.floor_travel_duration = 0.02;
                config.door_move_duration = 0.02;
                config.door_stay_duration = 0.02;
                let mut controller = Controller::new(config, events_tx, bus);
                controller.start();

                controller.handle_line("call_up@3").await;

                let first = tokio::time::timeout(std::time::Duration::from_millis(500), events_rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(first, "up_floor_arrived@3#1");

                controller.stop().await;
            })
            .await;
    }

    #[tokio::test]
    async fn unknown_cabin_select_floor_is_a_no_op() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (events_tx, _events_rx) = mpsc::unbounded_channel::<String>();
                let bus = EventBus::new();
                let mut controller = Controller::new(Config::default(), events_tx, bus);
                controller.start();

                controller.handle_line("select_floor@5#99").await;
                assert!(controller.tasks.borrow().is_empty());

                controller.stop().await;
            })
            .await;
    }
}
