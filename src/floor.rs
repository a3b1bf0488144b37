//! Core value types: floors, directions and the directed-floor primitive.
//!
//! Floors are displayed to the outside world with no "0" (…,-2,-1,1,2,3,…)
//! but stored internally on a contiguous integer axis, so that ordering and
//! arithmetic never have to special-case the missing ground level.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

pub type ElevatorId = u32;

/// A floor, stored as a contiguous internal integer.
///
/// `internal = displayed` when `displayed > 0`, else `internal = displayed + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Floor(i32);

impl Floor {
    /// Construct a `Floor` from its externally displayed label.
    pub fn from_display(displayed: i32) -> Self {
        let internal = if displayed > 0 { displayed } else { displayed + 1 };
        Floor(internal)
    }

    /// Construct a `Floor` directly from its internal contiguous representation.
    pub fn from_internal(internal: i32) -> Self {
        Floor(internal)
    }

    pub fn internal(self) -> i32 {
        self.0
    }

    /// The externally displayed label (never zero).
    pub fn display(self) -> i32 {
        if self.0 > 0 {
            self.0
        } else {
            self.0 - 1
        }
    }

    pub fn direction_to(self, other: Floor) -> Direction {
        match self.0.cmp(&other.0) {
            Ordering::Less => Direction::Up,
            Ordering::Greater => Direction::Down,
            Ordering::Equal => Direction::Idle,
        }
    }
}

impl fmt::Display for Floor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl Add<i32> for Floor {
    type Output = Floor;
    fn add(self, rhs: i32) -> Floor {
        Floor(self.0 + rhs)
    }
}

impl Sub<i32> for Floor {
    type Output = Floor;
    fn sub(self, rhs: i32) -> Floor {
        Floor(self.0 - rhs)
    }
}

impl Sub<Floor> for Floor {
    type Output = i32;
    fn sub(self, rhs: Floor) -> i32 {
        self.0 - rhs.0
    }
}

/// Travel direction of a cabin, or of a requested stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Up,
    Down,
    Idle,
}

impl Neg for Direction {
    type Output = Direction;
    fn neg(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Idle => Direction::Idle,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Idle => write!(f, "idle"),
        }
    }
}

/// A request to open or close a door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorAction {
    Open,
    Close,
}

/// The (floor, requested-direction) pair that is the atomic unit of a stop plan.
///
/// Two cars stopping at the same floor but continuing in opposite directions
/// are distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectedFloor {
    pub floor: Floor,
    pub direction: Direction,
}

impl DirectedFloor {
    pub fn new(floor: Floor, direction: Direction) -> Self {
        DirectedFloor { floor, direction }
    }
}

impl fmt::Display for DirectedFloor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.floor, self.direction)
    }
}

/// Assignment strategy used by the controller to pick a cabin for a hall call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Greedy,
    Optimal,
}

/// How to extrapolate the unknown destination of a directional-only stop
/// (a hall call whose passenger has not yet selected a floor) when
/// estimating travel metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationHeuristic {
    None,
    Nearest,
    Furthest,
    Mean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_skips_zero() {
        assert_eq!(Floor::from_display(1).display(), 1);
        assert_eq!(Floor::from_display(-1).display(), -1);
        assert_eq!(Floor::from_display(3).display(), 3);
    }

    #[test]
    fn internal_is_contiguous() {
        assert_eq!(Floor::from_display(-1).internal(), 0);
        assert_eq!(Floor::from_display(1).internal(), 1);
        assert_eq!(Floor::from_display(2).internal(), 2);
    }

    #[test]
    fn ordering_follows_internal_axis() {
        assert!(Floor::from_display(-1) < Floor::from_display(1));
        assert!(Floor::from_display(1) < Floor::from_display(2));
    }

    #[test]
    fn direction_negation() {
        assert_eq!(-Direction::Up, Direction::Down);
        assert_eq!(-Direction::Down, Direction::Up);
        assert_eq!(-Direction::Idle, Direction::Idle);
    }

    #[test]
    fn direction_to_other_floor() {
        let a = Floor::from_display(1);
        let b = Floor::from_display(3);
        assert_eq!(a.direction_to(b), Direction::Up);
        assert_eq!(b.direction_to(a), Direction::Down);
        assert_eq!(a.direction_to(a), Direction::Idle);
    }
}
