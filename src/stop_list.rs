//! A single directional stop list: one monotone sweep's worth of committed
//! stops, kept sorted so `pop_front` is always "the next stop on this sweep".

use crate::error::CoreError;
use crate::event::AsyncEvent;
use crate::floor::{DirectedFloor, Direction, Floor};

/// Car calls (IDLE direction) always sort before a directional stop at the
/// same floor, so the cabin services the passenger's own selection before
/// continuing the sweep through that floor.
fn direction_rank(direction: Direction) -> i32 {
    if direction == Direction::Idle {
        0
    } else {
        1
    }
}

#[derive(Debug)]
pub struct DirectionalStopList {
    direction: Direction,
    entries: Vec<DirectedFloor>,
    pub nonempty: AsyncEvent,
}

impl DirectionalStopList {
    pub fn new(direction: Direction) -> Self {
        DirectionalStopList {
            direction,
            entries: Vec::new(),
            nonempty: AsyncEvent::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Change the list's sweep direction. The list must be empty: a
    /// non-empty list's sort order can't change underneath its entries.
    pub fn set_direction(&mut self, new_direction: Direction) {
        if new_direction == self.direction {
            return;
        }
        assert!(
            self.is_empty(),
            "cannot change stop-list direction from {:?} to {:?} while non-empty",
            self.direction,
            new_direction
        );
        self.direction = new_direction;
    }

    fn sort_key(&self, df: DirectedFloor) -> (i32, i32) {
        let floor_key = match self.direction {
            Direction::Up => df.floor.internal(),
            Direction::Down => -df.floor.internal(),
            Direction::Idle => 0,
        };
        (floor_key, direction_rank(df.direction))
    }

    pub fn add(&mut self, floor: Floor, requested_direction: Direction) -> Result<(), CoreError> {
        if requested_direction != Direction::Idle && requested_direction != self.direction {
            return Err(CoreError::DirectionMismatch {
                requested: requested_direction,
                list_direction: self.direction,
            });
        }
        let df = DirectedFloor::new(floor, requested_direction);
        if self.direction == Direction::Idle {
            // Arbitrary but stable insertion order.
            self.entries.push(df);
        } else {
            let key = self.sort_key(df);
            let pos = self
                .entries
                .partition_point(|existing| self.sort_key(*existing) <= key);
            self.entries.insert(pos, df);
        }
        self.nonempty.set();
        Ok(())
    }

    /// Like `add`, but a no-op if the directed floor is already present.
    pub fn add_unique(&mut self, floor: Floor, requested_direction: Direction) -> Result<(), CoreError> {
        let df = DirectedFloor::new(floor, requested_direction);
        if self.entries.contains(&df) {
            return Ok(());
        }
        self.add(floor, requested_direction)
    }

    pub fn remove(&mut self, df: DirectedFloor) -> Result<(), CoreError> {
        let pos = self
            .entries
            .iter()
            .position(|e| *e == df)
            .ok_or(CoreError::NotPresent(df))?;
        self.entries.remove(pos);
        if self.is_empty() {
            self.nonempty.clear();
        }
        Ok(())
    }

    pub fn pop_front(&mut self) -> Result<DirectedFloor, CoreError> {
        if self.entries.is_empty() {
            return Err(CoreError::Empty);
        }
        let df = self.entries.remove(0);
        if self.is_empty() {
            self.nonempty.clear();
        }
        Ok(df)
    }

    pub fn top(&self) -> Result<DirectedFloor, CoreError> {
        self.entries.first().copied().ok_or(CoreError::Empty)
    }

    pub fn bottom(&self) -> Result<DirectedFloor, CoreError> {
        self.entries.last().copied().ok_or(CoreError::Empty)
    }

    pub fn contains(&self, df: DirectedFloor) -> bool {
        self.entries.contains(&df)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectedFloor> {
        self.entries.iter()
    }

    /// A fresh list with the same direction, entries and a freshly-set
    /// readiness flag — used when simulating a plan mutation for estimation.
    pub fn clone_detached(&self) -> Self {
        let mut clone = DirectionalStopList::new(self.direction);
        clone.entries = self.entries.clone();
        if !clone.is_empty() {
            clone.nonempty.set();
        }
        clone
    }
}
