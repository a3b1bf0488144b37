//! End-to-end scenarios from the concrete worked examples: a cabin (or a
//! pair of cabins) driven through real commands, observed only through the
//! emitted event strings and public query methods.

use std::time::Duration;

use tokio::sync::mpsc;

use elevator_core::cabin::{self, CabinHandle, CabinTimings};
use elevator_core::collection::Elevators;
use elevator_core::config::Config;
use elevator_core::event_bus::EventBus;
use elevator_core::floor::{DestinationHeuristic, DirectedFloor, Direction, Floor};
use elevator_core::Controller;

fn fast_config(elevator_count: u32) -> Config {
    let mut config = Config::default();
    config.elevator_count = elevator_count;
    config.floor_travel_duration = 0.02;
    config.accelerate_duration = 0.0;
    config.door_move_duration = 0.02;
    config.door_stay_duration = 0.02;
    config
}

fn fast_timings() -> CabinTimings {
    CabinTimings {
        floor_travel_duration: 0.02,
        accelerate_duration: 0.0,
        door_move_duration: 0.02,
        door_stay_duration: 0.02,
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("event expected within timeout")
        .expect("channel should still be open")
}

/// Scenario 1: single call, straight up.
#[tokio::test]
async fn single_call_straight_up_emits_arrive_open_close() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let mut controller = Controller::new(fast_config(1), events_tx, bus);
            controller.start();

            controller.handle_line("call_up@3").await;

            assert_eq!(recv(&mut events_rx).await, "up_floor_arrived@3#1");
            assert_eq!(recv(&mut events_rx).await, "door_opened#1");
            assert_eq!(recv(&mut events_rx).await, "door_closed#1");

            controller.stop().await;
        })
        .await;
}

/// Scenario 2: a second OPEN during CLOSING reopens instead of letting the
/// close finish; the first close is aborted and never emits `door_closed`.
#[tokio::test]
async fn reopening_during_close_preempts_the_close() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let mut config = fast_config(1);
            config.door_move_duration = 0.05;
            config.door_stay_duration = 0.05;
            let mut controller = Controller::new(config, events_tx, bus);
            controller.start();

            controller.handle_line("open_door#1").await;
            assert_eq!(recv(&mut events_rx).await, "door_opened#1");

            // Closing starts at +0.05s (stay) after the open, i.e. +0.10s
            // from the door_opened event's own completion (~0s here); catch
            // it in the middle of the 0.05s-long close.
            tokio::time::sleep(Duration::from_millis(75)).await;
            controller.handle_line("open_door#1").await;

            // Reopened: a second door_opened, then (after stay) a real close.
            assert_eq!(recv(&mut events_rx).await, "door_opened#1");
            assert_eq!(recv(&mut events_rx).await, "door_closed#1");

            controller.stop().await;
        })
        .await;
}

/// Scenario 3: opposite-direction stop at the same floor — both directed
/// floors are served from a stop, in the order they were committed.
#[tokio::test]
async fn opposite_direction_stop_at_same_floor_serves_both() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let bounds = (Floor::from_display(1), Floor::from_display(10));
            let mut handle = CabinHandle::new(1, Floor::from_display(2), bounds, fast_timings(), events_tx, bus);

            cabin::commit_floor(&handle.cabin, Floor::from_display(2), Direction::Up, None);
            cabin::commit_floor(&handle.cabin, Floor::from_display(2), Direction::Down, None);

            assert_eq!(recv(&mut events_rx).await, "up_floor_arrived@2#1");
            assert_eq!(recv(&mut events_rx).await, "door_opened#1");
            assert_eq!(recv(&mut events_rx).await, "door_closed#1");
            assert_eq!(recv(&mut events_rx).await, "down_floor_arrived@2#1");
            assert_eq!(recv(&mut events_rx).await, "door_opened#1");
            assert_eq!(recv(&mut events_rx).await, "door_closed#1");

            handle.stop().await;
        })
        .await;
}

/// Scenario 4: LOOK ordering. From floor 1, committing (3,UP), (5,UP),
/// (2,UP), (4,DOWN) must arrive in the order 2, 3, 5, 4 — (4,DOWN) waits in
/// `next_chain` until the UP sweep finishes.
#[tokio::test]
async fn look_ordering_arrives_in_sweep_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let mut controller = Controller::new(fast_config(1), events_tx, bus);
            controller.start();

            controller.handle_line("call_up@3").await;
            controller.handle_line("call_up@5").await;
            controller.handle_line("call_up@2").await;
            controller.handle_line("call_down@4").await;

            let mut arrivals = Vec::new();
            while arrivals.len() < 4 {
                let event = recv(&mut events_rx).await;
                if let Some(rest) = event.strip_prefix("up_floor_arrived@") {
                    arrivals.push(rest.split('#').next().unwrap().parse::<i32>().unwrap());
                } else if let Some(rest) = event.strip_prefix("down_floor_arrived@") {
                    arrivals.push(rest.split('#').next().unwrap().parse::<i32>().unwrap());
                }
                // door_opened/door_closed events are skipped.
            }
            assert_eq!(arrivals, vec![2, 3, 5, 4]);

            controller.stop().await;
        })
        .await;
}

/// Scenario 5: greedy assignment picks the cabin with the lower estimate;
/// the other cabin is left untouched.
#[tokio::test]
async fn greedy_assignment_prefers_the_nearer_cabin() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, _events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let bounds = (Floor::from_display(1), Floor::from_display(10));
            let mut elevators = Elevators::new(bounds, events_tx, bus);
            let near = elevators.spawn_cabin(Floor::from_display(1), fast_timings());
            let far = elevators.spawn_cabin(Floor::from_display(8), fast_timings());

            let request = DirectedFloor::new(Floor::from_display(3), Direction::Up);
            let winner = elevators
                .best_cabin_greedy(request, DestinationHeuristic::Mean)
                .expect("a cabin should be available");
            assert_eq!(winner, near);

            let far_cabin = elevators.cabin(far).unwrap().clone();
            assert_eq!(far_cabin.borrow().current_floor(), Floor::from_display(8));
            assert_eq!(far_cabin.borrow().committed_direction(), Direction::Idle);
        })
        .await;
}

/// Scenario 6: committing then immediately cancelling never wakes the
/// original waiter, and leaves no live task behind.
#[tokio::test]
async fn cancellation_does_not_wake_the_original_waiter() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
            let bus = EventBus::new();
            let mut controller = Controller::new(fast_config(1), events_tx, bus);
            controller.start();

            controller.handle_line("call_up@3").await;
            controller.handle_line("cancel_call_up@3").await;

            // No arrival should ever show up for floor 3.
            let saw_nothing = tokio::time::timeout(Duration::from_millis(150), events_rx.recv()).await;
            assert!(saw_nothing.is_err(), "cancelled call must not produce an arrival event");

            controller.stop().await;
        })
        .await;
}
