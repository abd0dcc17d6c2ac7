//! State model: the dense transition matrix, initial and terminal scores,
//! and the sparse adjacency lists derived from them.
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Width of the state index. The width is fixed when a model is created
/// and the number of states is validated against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateWidth {
    /// Up to 255 states.
    Narrow,
    /// Up to 65535 states.
    Wide,
}

impl StateWidth {
    pub fn max_states(&self) -> usize {
        match self {
            StateWidth::Narrow => u8::MAX as usize,
            StateWidth::Wide => u16::MAX as usize,
        }
    }
    fn name(&self) -> &'static str {
        match self {
            StateWidth::Narrow => "narrow",
            StateWidth::Wide => "wide",
        }
    }
}

impl std::default::Default for StateWidth {
    fn default() -> Self {
        StateWidth::Narrow
    }
}

/// An edge in the sparse transition lists. In a forward list `state` is the
/// successor, in a backward list it is the predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    state: u16,
    pub value: f64,
}

impl Edge {
    pub fn state(&self) -> usize {
        self.state as usize
    }
}

/// Transition model of a decoder. Scores are additive (log-space).
/// A transition with score `-inf` does not exist.
/// The dense matrix is the only thing one can mutate; the sparse lists are a derived view,
/// rebuilt by [`TransitionModel::rebuild_sparse`]. Decoding refuses a model whose lists are stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionModel {
    num_states: usize,
    width: StateWidth,
    // transitions[from * num_states + to]
    transitions: Vec<f64>,
    initial: Vec<f64>,
    terminal: Vec<f64>,
    forward: Vec<Vec<Edge>>,
    backward: Vec<Vec<Edge>>,
    sparse_current: bool,
}

impl TransitionModel {
    /// Create a model with `num_states` states where no transition exists
    /// and every state may start and end a path with score zero.
    pub fn new(num_states: usize, width: StateWidth) -> Result<Self, DecodeError> {
        if num_states == 0 {
            return Err(DecodeError::NoStates);
        }
        if width.max_states() < num_states {
            return Err(DecodeError::TooManyStates {
                states: num_states,
                width: width.name(),
                max: width.max_states(),
            });
        }
        Ok(Self {
            num_states,
            width,
            transitions: vec![f64::NEG_INFINITY; num_states * num_states],
            initial: vec![0f64; num_states],
            terminal: vec![0f64; num_states],
            forward: vec![vec![]; num_states],
            backward: vec![vec![]; num_states],
            sparse_current: true,
        })
    }
    /// Create a model from the initial scores `p`, the terminal scores `q` and the
    /// row-major transition matrix `a` (`a[from * n + to]`). The sparse lists are built.
    pub fn from_dense(
        num_states: usize,
        width: StateWidth,
        p: &[f64],
        q: &[f64],
        a: &[f64],
    ) -> Result<Self, DecodeError> {
        let mut model = Self::new(num_states, width)?;
        check_len("initial scores", num_states, p.len())?;
        check_len("terminal scores", num_states, q.len())?;
        check_len("transition matrix", num_states * num_states, a.len())?;
        model.initial.copy_from_slice(p);
        model.terminal.copy_from_slice(q);
        model.transitions.copy_from_slice(a);
        model.rebuild_sparse();
        Ok(model)
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }
    pub fn width(&self) -> StateWidth {
        self.width
    }
    pub fn set_transition(&mut self, from: usize, to: usize, value: f64) {
        self.check_state(from);
        self.check_state(to);
        self.transitions[from * self.num_states + to] = value;
        self.sparse_current = false;
    }
    pub fn get_transition(&self, from: usize, to: usize) -> f64 {
        self.check_state(from);
        self.check_state(to);
        self.transitions[from * self.num_states + to]
    }
    /// Set several transitions at once, given as `(from, to, value)` triples.
    /// Every other transition is left untouched.
    pub fn set_transitions(&mut self, transitions: &[(usize, usize, f64)]) {
        for &(from, to, value) in transitions {
            self.set_transition(from, to, value);
        }
    }
    pub fn set_initial(&mut self, state: usize, value: f64) {
        self.check_state(state);
        self.initial[state] = value;
    }
    pub fn get_initial(&self, state: usize) -> f64 {
        self.check_state(state);
        self.initial[state]
    }
    pub fn set_terminal(&mut self, state: usize, value: f64) {
        self.check_state(state);
        self.terminal[state] = value;
    }
    pub fn get_terminal(&self, state: usize) -> f64 {
        self.check_state(state);
        self.terminal[state]
    }
    /// Derive the forward/backward lists from the dense matrix.
    /// Calling it twice gives the same lists.
    pub fn rebuild_sparse(&mut self) {
        let n = self.num_states;
        self.forward.iter_mut().for_each(|xs| xs.clear());
        self.backward.iter_mut().for_each(|xs| xs.clear());
        for (from, row) in self.transitions.chunks_exact(n).enumerate() {
            for (to, &value) in row.iter().enumerate() {
                if value == f64::NEG_INFINITY || value.is_nan() {
                    continue;
                }
                self.forward[from].push(Edge {
                    state: to as u16,
                    value,
                });
                self.backward[to].push(Edge {
                    state: from as u16,
                    value,
                });
            }
        }
        self.sparse_current = true;
    }
    pub fn is_sparse_current(&self) -> bool {
        self.sparse_current
    }
    /// Successors of `from`, in increasing state order.
    pub fn forward(&self, from: usize) -> &[Edge] {
        &self.forward[from]
    }
    /// Predecessors of `to`, in increasing state order.
    pub fn backward(&self, to: usize) -> &[Edge] {
        &self.backward[to]
    }
    pub fn num_edges(&self) -> usize {
        self.forward.iter().map(|xs| xs.len()).sum()
    }
    fn check_state(&self, state: usize) {
        assert!(
            state < self.num_states,
            "state {} is out of range (the model has {} states)",
            state,
            self.num_states
        );
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), DecodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

impl std::fmt::Display for TransitionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "States:{}", self.num_states)?;
        writeln!(f, "Transition:")?;
        for row in self.transitions.chunks_exact(self.num_states) {
            let scores: Vec<_> = row.iter().map(|x| format!("{:.3}", x)).collect();
            writeln!(f, "{}", scores.join("\t"))?;
        }
        let initial: Vec<_> = self.initial.iter().map(|x| format!("{:.2}", x)).collect();
        writeln!(f, "Initial:{}", initial.join("\t"))?;
        let terminal: Vec<_> = self.terminal.iter().map(|x| format!("{:.2}", x)).collect();
        write!(f, "Terminal:{}", terminal.join("\t"))
    }
}
