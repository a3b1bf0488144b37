//! Error taxonomy for the dispatch/motion core.
//!
//! `DirectionMismatch`, `Empty` and most `NotPresent` occurrences indicate a
//! caller bug in this crate and are logged at the task boundary rather than
//! surfaced to a human; `UnknownCommand` and `InvalidConfiguration` are
//! expected to occur at the system's external edges.

use crate::floor::DirectedFloor;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("direction {requested} is incompatible with list direction {list_direction}")]
    DirectionMismatch {
        requested: crate::floor::Direction,
        list_direction: crate::floor::Direction,
    },

    #[error("directed floor {0} is not present")]
    NotPresent(DirectedFloor),

    #[error("operation attempted on an empty list or plan")]
    Empty,

    #[error("unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
