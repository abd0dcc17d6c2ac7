//! The N-best recursion itself. Everything here works on validated, borrowed inputs;
//! the checks live in the session types of the parent module.
use super::BestPath;
use crate::cache::SegmentSumCache;
use crate::dptable::{Back, Entry, NBestTable};
use crate::error::DecodeError;
use crate::model::TransitionModel;
use crate::orf::{OrfFrame, OrfScanner, StopCodons};
use crate::plif::PenaltyMatrix;

/// Observation values at or below this forbid the state at that step.
pub const FORBIDDEN_SCORE: f64 = -1e20;

/// Observation matrix, `num_states x steps` (row-major by state).
pub(crate) struct Emissions<'a> {
    pub values: &'a [f64],
    pub signals: Option<&'a PenaltyMatrix>,
}

pub(crate) struct SegmentWeights<'a> {
    pub values: &'a [f64],
    pub span: usize,
}

pub(crate) struct OrfGate<'a> {
    pub frames: &'a [OrfFrame],
    pub stops: &'a StopCodons,
    pub gate: bool,
}

/// A fully resolved decoding problem.
/// The score of a path visiting states `s_0..s_k` at steps `t_0 = 0 < t_1 < .. < t_k = T-1`
/// (every step when `free_termination` is on) is
/// `p[s_0] + e(s_0, 0) + w(0) + sum_i (a[s_i-1][s_i] + plif + e(s_i, t_i) + w(t_i) + seg) + q[s_k]`
/// where each term other than the transition scores is optional.
pub(crate) struct Trellis<'a> {
    pub model: &'a TransitionModel,
    pub positions: &'a [usize],
    pub emissions: Option<Emissions<'a>>,
    pub penalties: Option<&'a PenaltyMatrix>,
    pub word_scores: Option<&'a [f64]>,
    pub add_word_scores: bool,
    pub segment: Option<SegmentWeights<'a>>,
    pub orf: Option<OrfGate<'a>>,
    pub lookback: usize,
    pub free_termination: bool,
}

pub(crate) struct Decoded {
    pub paths: Vec<BestPath>,
    /// Best terminal score per step. Only filled with `free_termination`.
    pub best_by_step: Vec<f64>,
}

impl<'a> Trellis<'a> {
    fn steps(&self) -> usize {
        self.positions.len()
    }
    fn emission(&self, state: usize, step: usize) -> f64 {
        match self.emissions.as_ref() {
            None => 0f64,
            Some(emissions) => {
                let value = emissions.values[state * self.steps() + step];
                if value <= FORBIDDEN_SCORE {
                    f64::NEG_INFINITY
                } else {
                    emissions
                        .signals
                        .map_or(value, |signals| signals.state_signal(state, value))
                }
            }
        }
    }
    fn word_score(&self, step: usize) -> f64 {
        self.word_scores.map_or(0f64, |scores| scores[step])
    }
    /// A segment leaving a state with a `from` frame must enter a state with a `to` frame,
    /// and a segment entering a state with a `to` frame must leave one with a `from` frame.
    pub fn check_orf_pairs(&self) -> Result<(), DecodeError> {
        let frames = match self.orf.as_ref() {
            Some(orf) => orf.frames,
            None => return Ok(()),
        };
        for from in 0..self.model.num_states() {
            for edge in self.model.forward(from) {
                let to = edge.state();
                if frames[from].from.is_some() != frames[to].to.is_some() {
                    return Err(DecodeError::OrfMismatch { from, to });
                }
            }
        }
        Ok(())
    }
    pub fn run(&self, nbest: usize) -> Result<Decoded, DecodeError> {
        let (steps, states) = (self.steps(), self.model.num_states());
        debug!(
            "DECODE\t{}\t{}\t{}\t{}\t{}",
            steps,
            states,
            self.model.num_edges(),
            nbest,
            self.lookback
        );
        let mut table = NBestTable::new(steps, states, nbest);
        let mut terminal = NBestTable::new(1, 1, nbest);
        let mut best_by_step = match self.free_termination {
            true => vec![f64::NEG_INFINITY; steps],
            false => vec![],
        };
        let init_word = if self.add_word_scores { self.word_score(0) } else { 0f64 };
        for state in 0..states {
            let score = self.model.get_initial(state) + self.emission(state, 0) + init_word;
            if score > f64::NEG_INFINITY {
                table.push(0, state, Entry { score, back: None });
            }
        }
        let mut segment = match self.segment.as_ref() {
            Some(seg) => Some(SegmentSumCache::new(seg.values, states, seg.span)?),
            None => None,
        };
        let mut scanner = self.orf.as_ref().map(|orf| OrfScanner::new(orf.stops));
        for anchor in 0..steps {
            if self.free_termination || anchor + 1 == steps {
                for state in 0..states {
                    let q = self.model.get_terminal(state);
                    for (rank, entry) in table.get(anchor, state).iter().enumerate() {
                        let score = entry.score + q;
                        if !(score > f64::NEG_INFINITY) {
                            continue;
                        }
                        if let Some(best) = best_by_step.get_mut(anchor) {
                            *best = best.max(score);
                        }
                        let back = Back {
                            step: anchor as u32,
                            state: state as u16,
                            rank: rank as u16,
                        };
                        let back = Some(back);
                        if !terminal.push(0, 0, Entry { score, back }) {
                            break;
                        }
                    }
                }
            }
            if anchor + 1 == steps {
                break;
            }
            let sources: Vec<(usize, Vec<Entry>)> = (0..states)
                .filter(|&state| !table.is_empty(anchor, state))
                .map(|state| (state, table.get(anchor, state).to_vec()))
                .collect();
            trace!("ANCHOR\t{}\t{}", anchor, sources.len());
            if sources.is_empty() {
                continue;
            }
            let start = self.positions[anchor];
            if let Some(seg) = segment.as_mut() {
                seg.reset(start);
            }
            if let Some(scanner) = scanner.as_mut() {
                scanner.reset(start);
            }
            for step in anchor + 1..steps {
                let pos = self.positions[step];
                let length = pos - start;
                if anchor + 1 < step && self.lookback < length {
                    break;
                }
                if let Some(seg) = segment.as_mut() {
                    seg.extend(pos)?;
                }
                let word = self.word_score(step);
                let word_term = if self.add_word_scores { word } else { 0f64 };
                for (from, entries) in sources.iter() {
                    let from = *from;
                    for edge in self.model.forward(from) {
                        let to = edge.state();
                        let emission = self.emission(to, step);
                        if emission == f64::NEG_INFINITY {
                            continue;
                        }
                        if let (Some(orf), Some(scanner)) = (self.orf.as_ref(), scanner.as_mut()) {
                            if !scanner.admits(orf.frames[from], orf.frames[to], pos, orf.gate) {
                                continue;
                            }
                        }
                        let penalty = self
                            .penalties
                            .map_or(0f64, |p| p.transition_penalty(from, to, length, word));
                        let seg_term = segment.as_ref().map_or(0f64, |seg| seg.value(to));
                        let gain = edge.value + penalty + emission + word_term + seg_term;
                        if !(gain > f64::NEG_INFINITY) {
                            continue;
                        }
                        for (rank, entry) in entries.iter().enumerate() {
                            let back = Back {
                                step: anchor as u32,
                                state: from as u16,
                                rank: rank as u16,
                            };
                            let candidate = Entry {
                                score: entry.score + gain,
                                back: Some(back),
                            };
                            // Later entries of the same source rank below this one.
                            if !table.push(step, to, candidate) {
                                break;
                            }
                        }
                    }
                }
            }
        }
        let mut paths: Vec<_> = terminal
            .get(0, 0)
            .iter()
            .map(|entry| self.backtrack(&table, entry))
            .collect();
        if paths.is_empty() {
            debug!("DECODE\tNo admissible path");
        }
        paths.resize(nbest, BestPath::not_found());
        Ok(Decoded {
            paths,
            best_by_step,
        })
    }
    fn backtrack(&self, table: &NBestTable, end: &Entry) -> BestPath {
        let (mut states, mut steps) = (vec![], vec![]);
        let mut back = end.back;
        while let Some(Back { step, state, rank }) = back {
            let (step, state) = (step as usize, state as usize);
            states.push(state);
            steps.push(step);
            back = table.get(step, state)[rank as usize].back;
        }
        states.reverse();
        steps.reverse();
        let penalties = (1..steps.len())
            .map(|i| {
                let (from, to) = (states[i - 1], states[i]);
                let length = self.positions[steps[i]] - self.positions[steps[i - 1]];
                let word = self.word_score(steps[i]);
                self.penalties.map_or(vec![], |p| p.transition_values(from, to, length, word))
            })
            .collect();
        BestPath {
            score: end.score,
            states,
            positions: steps.iter().map(|&step| self.positions[step]).collect(),
            penalties,
        }
    }
}
