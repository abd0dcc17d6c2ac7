use thiserror::Error;

/// Everything that can make a decoding call refuse its inputs.
/// An infeasible model (no admissible path) is not an error: the call
/// succeeds and every returned path reports `found() == false`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("the number of states must be positive")]
    NoStates,

    #[error("{states} states exceed the {width} state index limit of {max}")]
    TooManyStates {
        states: usize,
        width: &'static str,
        max: usize,
    },

    #[error("nbest must be in 1..=65535")]
    InvalidNBest,

    #[error("max_iter must be positive")]
    InvalidIterations,

    #[error("{what}: expected {expected} values but got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("observation length {observations} does not match the grid length {positions}")]
    LengthMismatch { observations: usize, positions: usize },

    #[error("no observations have been set")]
    MissingSequence,

    #[error("the sequence to decode is empty")]
    EmptySequence,

    #[error("positions must be non-decreasing, but position {index} goes back")]
    UnsortedPositions { index: usize },

    #[error("position {position} lies outside the gene string of length {len}")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("a gene string is required for {0}")]
    MissingGeneString(&'static str),

    #[error("invalid PLiF: {0}")]
    InvalidPlif(&'static str),

    #[error("unknown PLiF id {id} (only {len} PLiFs)")]
    UnknownPlif { id: usize, len: usize },

    #[error("dictionary weights for order {order}: expected {expected} words but got {actual}")]
    InvalidDictionary {
        order: usize,
        expected: usize,
        actual: usize,
    },

    #[error("sparse transition lists are out of date; call rebuild_sparse() before decoding")]
    StaleTransitions,

    #[error("score cache moved backward from position {last} to {requested}")]
    CacheOrder { last: isize, requested: usize },

    #[error("invalid ORF frame {0}; frames are -1 or 0..=2")]
    InvalidOrfFrame(i64),

    #[error("transition {from}->{to} leaves a reading frame but enters a state without one")]
    OrfMismatch { from: usize, to: usize },
}
