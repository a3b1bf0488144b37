//! Runtime-mutable configuration for the controller (§6).

use crate::error::CoreError;
use crate::floor::{Floor, Strategy};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub floor_travel_duration: f64,
    pub accelerate_duration: f64,
    pub door_move_duration: f64,
    pub door_stay_duration: f64,
    pub floors: Vec<i32>,
    pub default_floor: i32,
    pub elevator_count: u32,
    pub strategy: Strategy,
}

impl Config {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.elevator_count == 0 {
            return Err(CoreError::InvalidConfiguration("elevator_count must be positive".into()));
        }
        if self.floors.is_empty() {
            return Err(CoreError::InvalidConfiguration("floors must be non-empty".into()));
        }
        if self.floors.contains(&0) {
            return Err(CoreError::InvalidConfiguration("floor 0 does not exist".into()));
        }
        if !self.floors.contains(&self.default_floor) {
            return Err(CoreError::InvalidConfiguration("default_floor must be one of floors".into()));
        }
        for d in [
            self.floor_travel_duration,
            self.accelerate_duration,
            self.door_move_duration,
            self.door_stay_duration,
        ] {
            if !d.is_finite() || d < 0.0 {
                return Err(CoreError::InvalidConfiguration("durations must be non-negative".into()));
            }
        }
        Ok(())
    }

    pub fn floor_bounds(&self) -> (Floor, Floor) {
        let min = self.floors.iter().min().copied().unwrap_or(1);
        let max = self.floors.iter().max().copied().unwrap_or(1);
        (Floor::from_display(min), Floor::from_display(max))
    }

    pub fn default_floor(&self) -> Floor {
        Floor::from_display(self.default_floor)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            floor_travel_duration: 3.0,
            accelerate_duration: 0.5,
            door_move_duration: 1.0,
            door_stay_duration: 3.0,
            floors: (1..=10).collect(),
            default_floor: 1,
            elevator_count: 1,
            strategy: Strategy::Greedy,
        }
    }
}
