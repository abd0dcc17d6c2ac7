//! Piecewise-linear penalty functions (PLiFs) and the matrix assigning them
//! to transitions and states.
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Monotone transform applied to the input of a PLiF before the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    Linear,
    Log,
    LogPlusOne,
    LogPlusThree,
    LinearPlusThree,
}

impl Transform {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Transform::Linear => x,
            Transform::Log => x.ln(),
            Transform::LogPlusOne => (x + 1f64).ln(),
            Transform::LogPlusThree => (x + 3f64).ln(),
            Transform::LinearPlusThree => x + 3f64,
        }
    }
}

/// Which value a PLiF reads when it scores a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlifInput {
    /// The length of the segment, in positions of the gene string.
    SegmentLength,
    /// The cached word score at the end of the segment.
    WordScore,
}

/// A piecewise-linear penalty function.
/// `limits` are the supports (strictly increasing) and `penalties` the values on them.
/// Between two supports the value is interpolated linearly, outside them it is clamped to
/// the first/last value.
/// Optionally, the admissible segment lengths are bounded; a segment outside
/// `[min_len, max_len]` gets `-inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plif {
    name: String,
    limits: Vec<f64>,
    penalties: Vec<f64>,
    transform: Transform,
    input: PlifInput,
    min_len: usize,
    max_len: Option<usize>,
}

impl Plif {
    pub fn new(limits: Vec<f64>, penalties: Vec<f64>) -> Result<Self, DecodeError> {
        if limits.is_empty() {
            return Err(DecodeError::InvalidPlif("no breakpoints"));
        }
        if limits.len() != penalties.len() {
            return Err(DecodeError::InvalidPlif(
                "supports and values differ in length",
            ));
        }
        if limits.iter().chain(penalties.iter()).any(|x| !x.is_finite()) {
            return Err(DecodeError::InvalidPlif("breakpoints must be finite"));
        }
        if limits.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DecodeError::InvalidPlif(
                "supports must be strictly increasing",
            ));
        }
        Ok(Self {
            name: String::new(),
            limits,
            penalties,
            transform: Transform::Linear,
            input: PlifInput::SegmentLength,
            min_len: 0,
            max_len: None,
        })
    }
    /// A PLiF with a constant value.
    pub fn constant(value: f64) -> Result<Self, DecodeError> {
        Self::new(vec![0f64], vec![value])
    }
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
    pub fn with_input(mut self, input: PlifInput) -> Self {
        self.input = input;
        self
    }
    pub fn with_length_bounds(mut self, min_len: usize, max_len: Option<usize>) -> Self {
        self.min_len = min_len;
        self.max_len = max_len;
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn input(&self) -> PlifInput {
        self.input
    }
    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }
    pub fn min_len(&self) -> usize {
        self.min_len
    }
    /// Evaluate the function at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        let x = self.transform.apply(x);
        // Number of supports at or below x. NaN falls to the left end.
        let idx = self.limits.partition_point(|&limit| limit <= x);
        if idx == 0 {
            self.penalties[0]
        } else if idx == self.limits.len() {
            self.penalties[idx - 1]
        } else {
            let (lo, hi) = (self.limits[idx - 1], self.limits[idx]);
            (self.penalties[idx] * (x - lo) + self.penalties[idx - 1] * (hi - x)) / (hi - lo)
        }
    }
    /// The value this PLiF reads for a segment, before the transform.
    pub fn input_value(&self, length: usize, word_score: f64) -> f64 {
        match self.input {
            PlifInput::SegmentLength => length as f64,
            PlifInput::WordScore => word_score,
        }
    }
    /// Score a segment of `length` positions whose end has the word score `word_score`.
    pub fn lookup(&self, length: usize, word_score: f64) -> f64 {
        if length < self.min_len || self.max_len.map_or(false, |max| max < length) {
            return f64::NEG_INFINITY;
        }
        self.evaluate(self.input_value(length, word_score))
    }
}

/// Index of a PLiF in a [`PenaltyMatrix`].
pub type PlifId = usize;

/// What one PLiF contributed to a segment: the raw input it read and the value it returned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlifValue {
    pub id: PlifId,
    pub input: f64,
    pub value: f64,
}

fn check_id_len(what: &'static str, expected: usize, ids: &[i64]) -> Result<(), DecodeError> {
    if ids.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::ShapeMismatch {
            what,
            expected,
            actual: ids.len(),
        })
    }
}

fn valid_ids(ids: &[i64]) -> impl Iterator<Item = (usize, PlifId)> + '_ {
    ids.iter()
        .enumerate()
        .filter(|&(_, &id)| 0 <= id)
        .map(|(i, &id)| (i, id as PlifId))
}

/// Assignment of PLiFs to transitions and states.
/// A transition can carry several PLiFs; their values are summed.
/// A state can carry one PLiF, which maps the raw observation value of that state to its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyMatrix {
    num_states: usize,
    plifs: Vec<Plif>,
    transitions: Vec<Vec<PlifId>>,
    states: Vec<Option<PlifId>>,
}

impl PenaltyMatrix {
    pub fn new(num_states: usize, plifs: Vec<Plif>) -> Self {
        Self {
            num_states,
            plifs,
            transitions: vec![vec![]; num_states * num_states],
            states: vec![None; num_states],
        }
    }
    /// Build from a `num_states x num_states` id matrix (row-major by `from`),
    /// where a negative id means "no PLiF" on that transition.
    pub fn from_transition_ids(
        num_states: usize,
        plifs: Vec<Plif>,
        ids: &[i64],
    ) -> Result<Self, DecodeError> {
        check_id_len("transition PLiF ids", num_states * num_states, ids)?;
        let mut matrix = Self::new(num_states, plifs);
        for (i, id) in valid_ids(ids) {
            matrix.set_transition_penalty(i / num_states, i % num_states, vec![id])?;
        }
        Ok(matrix)
    }
    /// Build from one id per state, where a negative id means "no state signal".
    pub fn from_state_ids(
        num_states: usize,
        plifs: Vec<Plif>,
        ids: &[i64],
    ) -> Result<Self, DecodeError> {
        check_id_len("state PLiF ids", num_states, ids)?;
        let mut matrix = Self::new(num_states, plifs);
        for (state, id) in valid_ids(ids) {
            matrix.set_state_penalty(state, Some(id))?;
        }
        Ok(matrix)
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }
    pub fn plifs(&self) -> &[Plif] {
        &self.plifs
    }
    pub fn set_transition_penalty(
        &mut self,
        from: usize,
        to: usize,
        ids: Vec<PlifId>,
    ) -> Result<(), DecodeError> {
        assert!(from < self.num_states && to < self.num_states);
        for &id in ids.iter() {
            self.check_id(id)?;
        }
        self.transitions[from * self.num_states + to] = ids;
        Ok(())
    }
    pub fn set_state_penalty(
        &mut self,
        state: usize,
        id: Option<PlifId>,
    ) -> Result<(), DecodeError> {
        assert!(state < self.num_states);
        if let Some(id) = id {
            self.check_id(id)?;
        }
        self.states[state] = id;
        Ok(())
    }
    pub fn transition_plifs(&self, from: usize, to: usize) -> impl Iterator<Item = &Plif> {
        self.transitions[from * self.num_states + to]
            .iter()
            .map(move |&id| &self.plifs[id])
    }
    /// Summed penalty of the `from -> to` transition spanning a segment of `length` positions.
    pub fn transition_penalty(
        &self,
        from: usize,
        to: usize,
        length: usize,
        word_score: f64,
    ) -> f64 {
        self.transition_plifs(from, to)
            .map(|plif| plif.lookup(length, word_score))
            .sum()
    }
    /// Input and value of each PLiF on the `from -> to` transition, in chain order.
    pub fn transition_values(
        &self,
        from: usize,
        to: usize,
        length: usize,
        word_score: f64,
    ) -> Vec<PlifValue> {
        self.transitions[from * self.num_states + to]
            .iter()
            .map(|&id| {
                let plif = &self.plifs[id];
                PlifValue {
                    id,
                    input: plif.input_value(length, word_score),
                    value: plif.lookup(length, word_score),
                }
            })
            .collect()
    }
    /// Score of observing `value` in `state`. Without a PLiF the value is used as is.
    pub fn state_signal(&self, state: usize, value: f64) -> f64 {
        match self.states[state] {
            Some(id) => self.plifs[id].evaluate(value),
            None => value,
        }
    }
    pub fn has_state_signals(&self) -> bool {
        self.states.iter().any(|x| x.is_some())
    }
    /// The largest finite segment-length bound among the PLiFs on transitions.
    /// `None` if no transition PLiF is bounded.
    pub fn max_len(&self) -> Option<usize> {
        let mut max_len = None;
        for plif in self.transitions.iter().flatten().map(|&id| &self.plifs[id]) {
            match (plif.max_len(), max_len) {
                (Some(len), Some(current)) if current < len => max_len = Some(len),
                (Some(len), None) => max_len = Some(len),
                _ => {}
            }
        }
        max_len
    }
    fn check_id(&self, id: PlifId) -> Result<(), DecodeError> {
        if id < self.plifs.len() {
            Ok(())
        } else {
            Err(DecodeError::UnknownPlif {
                id,
                len: self.plifs.len(),
            })
        }
    }
}
