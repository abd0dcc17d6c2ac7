//! N-best Viterbi decoding of gene structures.
//!
//! A [`DynProg`] session borrows a [`TransitionModel`] (and optionally a [`PenaltyMatrix`]),
//! owns the per-sequence inputs, and decodes them into the `nbest` highest scoring state paths.
//! Paths jump between breakpoints of a position grid: a step from grid point `t'` to `t`
//! spans the segment `[pos[t'], pos[t])`, and the PLiFs, the segment weights, and the ORF
//! constraints all look at that segment.
//! Which terms enter the score is decided by [`ScoringTerms`]:
//! - `trans`: observations, transition PLiFs, word scores, and ORF gating.
//! - `two_struct`: as `trans` with per-state segment weights and without ORF gating.
//! - `simple`: plain Viterbi over `0..T` with observations and transition scores only.
//! - `no_emission`: transition scores and PLiFs only.
//!
//! Multiple sessions can run in parallel on the same model; each owns its caches and buffers.
use crate::cache::{DictionaryWeights, WordIndex, WordScoreCache};
use crate::error::DecodeError;
use crate::model::TransitionModel;
use crate::orf::{parse_orf_info, OrfFrame, StopCodons};
use crate::plif::{PenaltyMatrix, PlifValue};
use serde::{Deserialize, Serialize};
mod trellis;
pub use trellis::FORBIDDEN_SCORE;
use trellis::{Emissions, OrfGate, SegmentWeights, Trellis};

/// Terms of the candidate score. A term whose input has not been given is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringTerms {
    pub use_observations: bool,
    /// Transition PLiFs and state signals of the penalty matrix.
    pub use_transition_scores: bool,
    /// Word score of the dictionary cache at each breakpoint.
    pub use_cache_scores: bool,
    /// Per-state segment weights summed over each segment.
    pub use_segment_scores: bool,
    /// Reject segments containing in-frame stop codons.
    pub use_orf_gating: bool,
    /// Decode over the position grid instead of `0..T`.
    pub use_position_grid: bool,
}

impl ScoringTerms {
    pub const fn trans() -> Self {
        Self {
            use_observations: true,
            use_transition_scores: true,
            use_cache_scores: true,
            use_segment_scores: false,
            use_orf_gating: true,
            use_position_grid: true,
        }
    }
    pub const fn two_struct() -> Self {
        Self {
            use_observations: true,
            use_transition_scores: true,
            use_cache_scores: true,
            use_segment_scores: true,
            use_orf_gating: false,
            use_position_grid: true,
        }
    }
    pub const fn simple() -> Self {
        Self {
            use_observations: true,
            use_transition_scores: false,
            use_cache_scores: false,
            use_segment_scores: false,
            use_orf_gating: false,
            use_position_grid: false,
        }
    }
    pub const fn no_emission() -> Self {
        Self {
            use_observations: false,
            use_transition_scores: true,
            use_cache_scores: false,
            use_segment_scores: false,
            use_orf_gating: false,
            use_position_grid: true,
        }
    }
}

impl std::default::Default for ScoringTerms {
    fn default() -> Self {
        Self::trans()
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecodeConfig {
    pub terms: ScoringTerms,
    /// Longest segment, in positions, a step may span. The immediate predecessor is always allowed.
    /// Defaults to the largest length bound of the transition PLiFs, or zero.
    pub max_lookback: Option<usize>,
    /// Width of the trailing window of the word score. Defaults to the look-back (at least one).
    pub word_window: Option<usize>,
}

impl DecodeConfig {
    pub fn new(terms: ScoringTerms) -> Self {
        Self {
            terms,
            ..Default::default()
        }
    }
}

/// A decoded path. A rank without any admissible path has score `-inf` and no states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPath {
    pub score: f64,
    pub states: Vec<usize>,
    /// Position of each visited breakpoint.
    pub positions: Vec<usize>,
    /// `penalties[i]` lists the transition PLiFs of the segment ending at breakpoint `i + 1`.
    pub penalties: Vec<Vec<PlifValue>>,
}

impl BestPath {
    pub fn not_found() -> Self {
        Self {
            score: f64::NEG_INFINITY,
            states: vec![],
            positions: vec![],
            penalties: vec![],
        }
    }
    /// Sum of the transition PLiF values along the path.
    pub fn penalty_total(&self) -> f64 {
        self.penalties.iter().flatten().map(|x| x.value).sum()
    }
    pub fn found(&self) -> bool {
        self.score > f64::NEG_INFINITY && !self.states.is_empty()
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Result of [`decode_free_length`].
#[derive(Debug, Clone, PartialEq)]
pub struct FreeLengthPaths {
    pub paths: Vec<BestPath>,
    /// Length of the best path, if any.
    pub best_iter: Option<usize>,
    /// `best_by_length[i]` is the best score among paths of length `i + 1`.
    pub best_by_length: Vec<f64>,
}

fn check_nbest(nbest: usize) -> Result<(), DecodeError> {
    if nbest == 0 || (u16::MAX as usize) < nbest {
        Err(DecodeError::InvalidNBest)
    } else {
        Ok(())
    }
}

/// Decode paths that start anywhere `p` allows and may stop at any of the first `max_iter` steps.
/// No observations are involved; the score is `p[s_0] + sum a[s_i-1][s_i] + q[s_k]`.
pub fn decode_free_length(
    model: &TransitionModel,
    max_iter: usize,
    nbest: usize,
) -> Result<FreeLengthPaths, DecodeError> {
    check_nbest(nbest)?;
    if max_iter == 0 {
        return Err(DecodeError::InvalidIterations);
    }
    if !model.is_sparse_current() {
        return Err(DecodeError::StaleTransitions);
    }
    let positions: Vec<usize> = (0..max_iter).collect();
    let trellis = Trellis {
        model,
        positions: &positions,
        emissions: None,
        penalties: None,
        word_scores: None,
        add_word_scores: false,
        segment: None,
        orf: None,
        lookback: 1,
        free_termination: true,
    };
    let decoded = trellis.run(nbest)?;
    let best_iter = decoded.paths.first().filter(|p| p.found()).map(|p| p.len());
    Ok(FreeLengthPaths {
        paths: decoded.paths,
        best_iter,
        best_by_length: decoded.best_by_step,
    })
}

/// Word score at every grid position, in one forward pass.
fn word_scores(
    dict: &DictionaryWeights,
    genestr: &[u8],
    positions: &[usize],
    window: usize,
) -> Result<Vec<f64>, DecodeError> {
    let index = WordIndex::new(genestr, dict.orders());
    let mut cache = WordScoreCache::init(dict, positions[0], genestr.len(), window);
    positions.iter().map(|&pos| cache.extend(&index, pos)).collect()
}

/// A decoding session over one sequence.
#[derive(Debug, Clone)]
pub struct DynProg<'a> {
    model: &'a TransitionModel,
    penalties: Option<&'a PenaltyMatrix>,
    // num_states x seq_len, row-major by state.
    observations: Option<Vec<f64>>,
    positions: Option<Vec<usize>>,
    orf_info: Option<Vec<OrfFrame>>,
    genestr: Option<Vec<u8>>,
    dict_weights: Option<DictionaryWeights>,
    // num_states x span, and span.
    segment_weights: Option<(Vec<f64>, usize)>,
    config: DecodeConfig,
    paths: Vec<BestPath>,
}

impl<'a> DynProg<'a> {
    pub fn new(model: &'a TransitionModel) -> Self {
        Self {
            model,
            penalties: None,
            observations: None,
            positions: None,
            orf_info: None,
            genestr: None,
            dict_weights: None,
            segment_weights: None,
            config: DecodeConfig::default(),
            paths: vec![],
        }
    }
    pub fn model(&self) -> &TransitionModel {
        self.model
    }
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }
    pub fn set_config(&mut self, config: DecodeConfig) {
        self.config = config;
    }
    /// Set the `dim x len` observation matrix (row-major by state).
    pub fn set_observations(
        &mut self,
        values: &[f64],
        dim: usize,
        len: usize,
    ) -> Result<(), DecodeError> {
        let states = self.model.num_states();
        if dim != states {
            return Err(DecodeError::ShapeMismatch {
                what: "observation rows",
                expected: states,
                actual: dim,
            });
        }
        if values.len() != dim * len {
            return Err(DecodeError::ShapeMismatch {
                what: "observations",
                expected: dim * len,
                actual: values.len(),
            });
        }
        self.observations = Some(values.to_vec());
        Ok(())
    }
    /// Set the genomic position of each step. Positions must be non-decreasing.
    pub fn set_positions(&mut self, positions: &[usize]) -> Result<(), DecodeError> {
        if let Some(i) = positions.windows(2).position(|w| w[1] < w[0]) {
            return Err(DecodeError::UnsortedPositions { index: i + 1 });
        }
        self.positions = Some(positions.to_vec());
        Ok(())
    }
    /// Set the `(from, to)` frame of each state as a `rows x 2` matrix, -1 meaning "no frame".
    pub fn set_orf_info(
        &mut self,
        info: &[i64],
        rows: usize,
        cols: usize,
    ) -> Result<(), DecodeError> {
        let states = self.model.num_states();
        if rows != states {
            return Err(DecodeError::ShapeMismatch {
                what: "ORF info rows",
                expected: states,
                actual: rows,
            });
        }
        self.orf_info = Some(parse_orf_info(info, rows, cols)?);
        Ok(())
    }
    pub fn set_penalties(&mut self, penalties: &'a PenaltyMatrix) -> Result<(), DecodeError> {
        let states = self.model.num_states();
        if penalties.num_states() != states {
            return Err(DecodeError::ShapeMismatch {
                what: "penalty matrix states",
                expected: states,
                actual: penalties.num_states(),
            });
        }
        self.penalties = Some(penalties);
        Ok(())
    }
    pub fn set_genestr(&mut self, genestr: &[u8]) {
        self.genestr = Some(genestr.to_vec());
    }
    pub fn set_dict_weights(&mut self, dict: DictionaryWeights) {
        self.dict_weights = Some(dict);
    }
    /// Set the `rows x cols` segment weights (row-major by state, one column per position).
    pub fn set_segment_weights(
        &mut self,
        values: &[f64],
        rows: usize,
        cols: usize,
    ) -> Result<(), DecodeError> {
        let states = self.model.num_states();
        if rows != states || values.len() != rows * cols {
            return Err(DecodeError::ShapeMismatch {
                what: "segment weights",
                expected: states * cols,
                actual: values.len(),
            });
        }
        self.segment_weights = Some((values.to_vec(), cols));
        Ok(())
    }
    /// Decode with the configured terms, switching ORF gating on or off.
    pub fn decode(&mut self, nbest: usize, use_orf: bool) -> Result<(), DecodeError> {
        let terms = ScoringTerms {
            use_orf_gating: use_orf,
            ..self.config.terms
        };
        self.decode_with(nbest, terms)
    }
    /// Decode the `nbest` best paths. On error the previous results are cleared.
    pub fn decode_with(&mut self, nbest: usize, terms: ScoringTerms) -> Result<(), DecodeError> {
        self.paths.clear();
        check_nbest(nbest)?;
        if !self.model.is_sparse_current() {
            return Err(DecodeError::StaleTransitions);
        }
        let states = self.model.num_states();
        let steps = match (terms.use_observations, &self.observations, &self.positions) {
            (true, Some(obs), _) | (false, Some(obs), None) => obs.len() / states,
            (false, _, Some(positions)) => positions.len(),
            (true, None, _) | (false, None, None) => return Err(DecodeError::MissingSequence),
        };
        if steps == 0 {
            return Err(DecodeError::EmptySequence);
        }
        let grid = terms.use_position_grid;
        let identity: Vec<usize>;
        let positions: &[usize] = match self.positions.as_deref() {
            Some(positions) if grid => {
                if positions.len() != steps {
                    return Err(DecodeError::LengthMismatch {
                        observations: steps,
                        positions: positions.len(),
                    });
                }
                positions
            }
            _ => {
                identity = (0..steps).collect();
                &identity
            }
        };
        let penalties = self.penalties.filter(|_| grid && terms.use_transition_scores);
        let lookback = match grid {
            true => self
                .config
                .max_lookback
                .or_else(|| penalties.and_then(|p| p.max_len()))
                .unwrap_or(0),
            false => 1,
        };
        let emissions = match &self.observations {
            Some(values) if terms.use_observations => Some(Emissions {
                values,
                signals: penalties.filter(|p| p.has_state_signals()),
            }),
            _ => None,
        };
        let word_scores = match &self.dict_weights {
            Some(dict) if grid && (terms.use_cache_scores || penalties.is_some()) => {
                let genestr = self
                    .genestr
                    .as_deref()
                    .ok_or(DecodeError::MissingGeneString("word scores"))?;
                let window = self.config.word_window.unwrap_or_else(|| lookback.max(1));
                Some(word_scores(dict, genestr, positions, window)?)
            }
            _ => None,
        };
        let segment = match &self.segment_weights {
            Some((values, span)) if grid && terms.use_segment_scores => Some(SegmentWeights {
                values,
                span: *span,
            }),
            _ => None,
        };
        let stops;
        let orf = match &self.orf_info {
            Some(frames) if grid => {
                let gate = terms.use_orf_gating;
                stops = match (gate, self.genestr.as_deref()) {
                    (_, Some(genestr)) => StopCodons::from_genestr(genestr),
                    (false, None) => StopCodons::from_genestr(&[]),
                    (true, None) => return Err(DecodeError::MissingGeneString("ORF gating")),
                };
                Some(OrfGate {
                    frames,
                    stops: &stops,
                    gate,
                })
            }
            _ => None,
        };
        let decoded = {
            let trellis = Trellis {
                model: self.model,
                positions,
                emissions,
                penalties,
                word_scores: word_scores.as_deref(),
                add_word_scores: terms.use_cache_scores,
                segment,
                orf,
                lookback,
                free_termination: false,
            };
            trellis.check_orf_pairs()?;
            trellis.run(nbest)?
        };
        self.paths = decoded.paths;
        Ok(())
    }
    pub fn paths(&self) -> &[BestPath] {
        &self.paths
    }
    pub fn scores(&self) -> Vec<f64> {
        self.paths.iter().map(|p| p.score).collect()
    }
    pub fn state_paths(&self) -> Vec<&[usize]> {
        self.paths.iter().map(|p| p.states.as_slice()).collect()
    }
    pub fn position_paths(&self) -> Vec<&[usize]> {
        self.paths.iter().map(|p| p.positions.as_slice()).collect()
    }
    /// Number of breakpoints of the `rank`-th path; zero if there is no such path.
    pub fn path_len(&self, rank: usize) -> usize {
        self.paths.get(rank).map_or(0, |p| p.len())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::gen_seq;
    use crate::model::StateWidth;
    use crate::plif::{Plif, PlifInput};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    const EPS: f64 = 1e-8;
    fn emission(obs: &[f64], steps: usize, state: usize, t: usize) -> f64 {
        let value = obs[state * steps + t];
        if value <= FORBIDDEN_SCORE {
            f64::NEG_INFINITY
        } else {
            value
        }
    }
    // Every state sequence of length `steps`, with its plain Viterbi score, best first.
    fn brute_force_simple(
        model: &TransitionModel,
        obs: &[f64],
        steps: usize,
    ) -> Vec<(f64, Vec<usize>)> {
        let n = model.num_states();
        let mut paths = vec![];
        for code in 0..n.pow(steps as u32) {
            let path: Vec<usize> = (0..steps).map(|t| code / n.pow(t as u32) % n).collect();
            let mut score = model.get_initial(path[0]) + emission(obs, steps, path[0], 0);
            for t in 1..steps {
                score += model.get_transition(path[t - 1], path[t]);
                score += emission(obs, steps, path[t], t);
            }
            score += model.get_terminal(path[steps - 1]);
            if score > f64::NEG_INFINITY {
                paths.push((score, path));
            }
        }
        paths.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        paths
    }
    fn assert_top_scores(decoded: &[f64], expected: &[(f64, Vec<usize>)]) {
        for (i, score) in decoded.iter().enumerate() {
            match expected.get(i) {
                Some((exp, _)) => assert!((score - exp).abs() < EPS, "{}\t{}\t{}", i, score, exp),
                None => assert_eq!(*score, f64::NEG_INFINITY),
            }
        }
    }
    #[test]
    fn simple_equals_brute_force() {
        for seed in 0..200 {
            let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
            let n = rng.gen_range(1..=4);
            let steps = rng.gen_range(1..=6);
            let model = gen_seq::random_model(&mut rng, n, 0.6);
            let obs = gen_seq::random_observations(&mut rng, n, steps, 0.1);
            let expected = brute_force_simple(&model, &obs, steps);
            let mut dp = DynProg::new(&model);
            dp.set_observations(&obs, n, steps).unwrap();
            dp.decode_with(1, ScoringTerms::simple()).unwrap();
            let best = dp.paths()[0].clone();
            match expected.first() {
                None => assert!(!best.found()),
                Some((score, path)) => {
                    assert!(best.found());
                    assert!((best.score - score).abs() < EPS);
                    assert_eq!(best.positions, (0..steps).collect::<Vec<_>>());
                    let unique = expected.get(1).map_or(true, |x| x.0 < score - EPS);
                    if unique {
                        assert_eq!(&best.states, path);
                    }
                }
            }
            dp.decode_with(5, ScoringTerms::simple()).unwrap();
            let scores = dp.scores();
            assert_eq!(scores.len(), 5);
            assert!(scores.windows(2).all(|w| w[1] <= w[0]));
            assert_eq!(scores[0], best.score);
            assert_top_scores(&scores, &expected);
            // Each path scores what it claims.
            for path in dp.paths().iter().filter(|p| p.found()) {
                let (score, _) = expected.iter().find(|x| x.1 == path.states).unwrap();
                assert!((score - path.score).abs() < EPS);
            }
        }
    }
    #[test]
    fn deterministic_ties() {
        let (p, q, a) = ([0.; 2], [0.; 2], [0.; 4]);
        let model = TransitionModel::from_dense(2, StateWidth::Narrow, &p, &q, &a).unwrap();
        let mut dp = DynProg::new(&model);
        dp.set_observations(&[0.; 6], 2, 3).unwrap();
        dp.decode_with(8, ScoringTerms::simple()).unwrap();
        let paths: Vec<Vec<usize>> = dp.state_paths().iter().map(|p| p.to_vec()).collect();
        let expected = vec![
            vec![0, 0, 0],
            vec![1, 0, 0],
            vec![0, 1, 0],
            vec![1, 1, 0],
            vec![0, 0, 1],
            vec![1, 0, 1],
            vec![0, 1, 1],
            vec![1, 1, 1],
        ];
        assert_eq!(paths, expected);
        assert!(dp.scores().iter().all(|&x| x == 0.));
        let first = dp.paths().to_vec();
        dp.decode_with(8, ScoringTerms::simple()).unwrap();
        assert_eq!(first, dp.paths());
    }
    fn two_state_model() -> TransitionModel {
        let a = [-2., -0.5, -3., -0.2];
        TransitionModel::from_dense(2, StateWidth::Narrow, &[-0.1, -2.], &[-3., -0.1], &a).unwrap()
    }
    #[test]
    fn two_states_three_steps() {
        let model = two_state_model();
        let mut penalties = PenaltyMatrix::new(2, vec![Plif::constant(-1.).unwrap()]);
        penalties.set_state_penalty(1, Some(0)).unwrap();
        let mut dp = DynProg::new(&model);
        dp.set_observations(&[0.; 6], 2, 3).unwrap();
        dp.decode_with(3, ScoringTerms::simple()).unwrap();
        let scores = dp.scores();
        for (score, exp) in scores.iter().zip(vec![-0.9, -2.5, -2.7]) {
            assert!((score - exp).abs() < EPS);
        }
        assert_eq!(dp.state_paths(), vec![&[0usize, 1, 1][..], &[1, 1, 1], &[0, 0, 1]]);
        assert_eq!(dp.path_len(0), 3);
        assert_eq!(dp.path_len(10), 0);
        // Over a grid without PLiFs, decoding is Markovian in the grid.
        dp.set_positions(&[0, 10, 20]).unwrap();
        dp.decode(1, false).unwrap();
        assert!((dp.scores()[0] + 0.9).abs() < EPS);
        assert_eq!(dp.position_paths()[0], &[0, 10, 20]);
        // A state signal replaces the raw observation of state 1.
        dp.set_penalties(&penalties).unwrap();
        dp.decode(1, false).unwrap();
        assert!((dp.scores()[0] + 2.9).abs() < EPS);
        assert_eq!(dp.state_paths()[0], &[0, 1, 1]);
        // Transition scores alone.
        let mut bare = DynProg::new(&model);
        bare.set_positions(&[0, 1, 2]).unwrap();
        bare.decode_with(2, ScoringTerms::no_emission()).unwrap();
        assert!((bare.scores()[0] + 0.9).abs() < EPS);
        assert!((bare.scores()[1] + 2.5).abs() < EPS);
    }
    struct Problem {
        model: TransitionModel,
        penalties: PenaltyMatrix,
        obs: Vec<f64>,
        positions: Vec<usize>,
        genestr: Vec<u8>,
        dict: DictionaryWeights,
        segment: Vec<f64>,
        span: usize,
        max_lookback: Option<usize>,
    }
    impl Problem {
        // With `word_plifs`, each transition also carries a PLiF reading the word score,
        // the look-back is fixed, and the model uses wide state indices.
        fn new<R: Rng>(rng: &mut R, word_plifs: bool) -> Self {
            let n = rng.gen_range(1..=3);
            let steps = rng.gen_range(1..=6);
            let model = match word_plifs {
                true => gen_seq::random_model_with_width(rng, n, 0.7, StateWidth::Wide),
                false => gen_seq::random_model(rng, n, 0.7),
            };
            let positions = gen_seq::random_positions(rng, steps, 3);
            let span = positions[steps - 1] + 1;
            let genestr = gen_seq::generate_seq(rng, span + 4);
            let obs = gen_seq::random_observations(rng, n, steps, 0.1);
            let mut plifs = vec![];
            let mut ids = vec![];
            for from in 0..n {
                for edge in model.forward(from) {
                    let max_len = rng.gen_range(1..=6);
                    let mut chain = vec![plifs.len()];
                    plifs.push(gen_seq::random_length_plif(rng, max_len));
                    if word_plifs {
                        let values = (0..3).map(|_| rng.gen_range(-1f64..1f64)).collect();
                        let plif = Plif::new(vec![-1., 0., 1.], values).unwrap();
                        chain.push(plifs.len());
                        plifs.push(plif.with_input(PlifInput::WordScore));
                    }
                    ids.push((from, edge.state(), chain));
                }
            }
            let mut penalties = PenaltyMatrix::new(n, plifs);
            for (from, to, chain) in ids {
                penalties.set_transition_penalty(from, to, chain).unwrap();
            }
            let weights = vec![
                (0..4).map(|_| rng.gen_range(-1f64..1f64)).collect(),
                (0..16).map(|_| rng.gen_range(-1f64..1f64)).collect(),
            ];
            let dict = DictionaryWeights::new(vec![1, 2], weights).unwrap();
            let segment = (0..n * span).map(|_| rng.gen_range(-1f64..1f64)).collect();
            let max_lookback = match word_plifs {
                true => Some(rng.gen_range(1..=6)),
                false => None,
            };
            Self {
                model,
                penalties,
                obs,
                positions,
                genestr,
                dict,
                segment,
                span,
                max_lookback,
            }
        }
        fn steps(&self) -> usize {
            self.positions.len()
        }
        fn session(&self, terms: ScoringTerms, window: usize) -> DynProg {
            let n = self.model.num_states();
            let mut dp = DynProg::new(&self.model);
            dp.set_observations(&self.obs, n, self.steps()).unwrap();
            dp.set_positions(&self.positions).unwrap();
            dp.set_penalties(&self.penalties).unwrap();
            dp.set_genestr(&self.genestr);
            dp.set_dict_weights(self.dict.clone());
            dp.set_segment_weights(&self.segment, n, self.span).unwrap();
            dp.set_config(DecodeConfig {
                terms,
                max_lookback: self.max_lookback,
                word_window: Some(window),
            });
            dp
        }
        fn word_score(&self, pos: usize, window: usize) -> f64 {
            let index = WordIndex::new(&self.genestr, self.dict.orders());
            let mut cache = WordScoreCache::init(&self.dict, 0, self.genestr.len(), window);
            cache.reset(pos);
            cache.extend(&index, pos).unwrap()
        }
        // Score of visiting `states` at the grid steps `breaks`.
        fn score(&self, breaks: &[usize], states: &[usize], window: usize, terms: Terms) -> f64 {
            let steps = self.steps();
            let word = |t: usize| self.word_score(self.positions[t], window);
            let mut score = self.model.get_initial(states[0]);
            score += emission(&self.obs, steps, states[0], 0) + word(0);
            for i in 1..breaks.len() {
                let (u, v) = (breaks[i - 1], breaks[i]);
                let (a, b) = (states[i - 1], states[i]);
                let (start, end) = (self.positions[u], self.positions[v]);
                score += self.model.get_transition(a, b);
                score += emission(&self.obs, steps, b, v) + word(v);
                if terms.plifs {
                    score += self.penalties.transition_penalty(a, b, end - start, word(v));
                }
                if terms.segment {
                    let row = b * self.span;
                    score += self.segment[row + start..row + end].iter().sum::<f64>();
                }
            }
            score + self.model.get_terminal(states[states.len() - 1])
        }
        fn brute_force(&self, window: usize, segment: bool) -> Vec<(f64, Vec<usize>)> {
            let steps = self.steps();
            let n = self.model.num_states();
            let lookback = self
                .max_lookback
                .or_else(|| self.penalties.max_len())
                .unwrap_or(0);
            let terms = Terms {
                plifs: true,
                segment,
            };
            let inner = steps.saturating_sub(2);
            let mut paths = vec![];
            for mask in 0..1usize << inner {
                let mut breaks = vec![0];
                breaks.extend((0..inner).filter(|i| mask >> i & 1 == 1).map(|i| i + 1));
                if 1 < steps {
                    breaks.push(steps - 1);
                }
                let reachable = breaks.windows(2).all(|w| {
                    w[1] == w[0] + 1 || self.positions[w[1]] - self.positions[w[0]] <= lookback
                });
                if !reachable {
                    continue;
                }
                let k = breaks.len();
                for code in 0..n.pow(k as u32) {
                    let states: Vec<usize> = (0..k).map(|i| code / n.pow(i as u32) % n).collect();
                    let score = self.score(&breaks, &states, window, terms);
                    if score > f64::NEG_INFINITY {
                        paths.push((score, states));
                    }
                }
            }
            paths.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            paths
        }
        fn rescore(&self, path: &BestPath, window: usize, terms: Terms) -> f64 {
            let breaks: Vec<usize> = path
                .positions
                .iter()
                .map(|pos| self.positions.binary_search(pos).unwrap())
                .collect();
            self.score(&breaks, &path.states, window, terms)
        }
        // The PLiF values of a path are what the PLiFs read and return on each segment,
        // and together with the other terms they add up to the path score.
        fn check_penalties(&self, path: &BestPath, window: usize, segment: bool) {
            assert_eq!(path.penalties.len() + 1, path.len());
            for (i, values) in path.penalties.iter().enumerate() {
                let (from, to) = (path.states[i], path.states[i + 1]);
                let end = path.positions[i + 1];
                let length = end - path.positions[i];
                assert_eq!(values.len(), self.penalties.transition_plifs(from, to).count());
                for value in values.iter() {
                    let plif = &self.penalties.plifs()[value.id];
                    let input = match plif.input() {
                        PlifInput::SegmentLength => length as f64,
                        PlifInput::WordScore => self.word_score(end, window),
                    };
                    assert!((value.input - input).abs() < EPS);
                    assert!((value.value - plif.lookup(length, value.input)).abs() < EPS);
                }
            }
            let terms = Terms {
                plifs: false,
                segment,
            };
            let rest = self.rescore(path, window, terms);
            assert!((rest + path.penalty_total() - path.score).abs() < EPS);
        }
    }
    #[derive(Debug, Clone, Copy)]
    struct Terms {
        plifs: bool,
        segment: bool,
    }
    #[test]
    fn semi_markov_equals_brute_force() {
        let window = 3;
        let modes = [
            (ScoringTerms::two_struct(), true),
            (ScoringTerms::trans(), false),
        ];
        for seed in 0..150 {
            let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
            let problem = Problem::new(&mut rng, false);
            for &(terms, segment) in modes.iter() {
                let expected = problem.brute_force(window, segment);
                let mut dp = problem.session(terms, window);
                dp.decode(4, false).unwrap();
                assert_top_scores(&dp.scores(), &expected);
                let last = *problem.positions.last().unwrap();
                for path in dp.paths().iter().filter(|p| p.found()) {
                    assert_eq!(path.positions[0], 0);
                    assert_eq!(*path.positions.last().unwrap(), last);
                    let terms = Terms {
                        plifs: true,
                        segment,
                    };
                    let score = problem.rescore(path, window, terms);
                    assert!((score - path.score).abs() < EPS, "{}\t{}", score, path.score);
                    problem.check_penalties(path, window, segment);
                }
            }
        }
    }
    #[test]
    fn word_plifs_with_fixed_lookback() {
        let window = 2;
        for seed in 0..150 {
            let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
            let problem = Problem::new(&mut rng, true);
            assert_eq!(problem.model.width(), StateWidth::Wide);
            let expected = problem.brute_force(window, false);
            let mut dp = problem.session(ScoringTerms::trans(), window);
            assert_eq!(dp.config().max_lookback, problem.max_lookback);
            dp.decode(4, false).unwrap();
            assert_top_scores(&dp.scores(), &expected);
            for path in dp.paths().iter().filter(|p| p.found()) {
                let lookback = problem.max_lookback.unwrap();
                let mut jumps = path.positions.windows(2);
                assert!(jumps.all(|w| w[1] - w[0] <= lookback || is_next(&problem, w)));
                problem.check_penalties(path, window, false);
            }
            assert!(dp.paths().iter().filter(|p| !p.found()).all(|p| p.penalties.is_empty()));
        }
    }
    // Whether the two positions are consecutive grid points.
    fn is_next(problem: &Problem, w: &[usize]) -> bool {
        let i = problem.positions.binary_search(&w[0]).unwrap();
        problem.positions.get(i + 1) == Some(&w[1])
    }
    // States: 0 intergenic, 1 gene start (reads frame 0 onward), 2 gene end (ends in frame 0).
    fn gene_model() -> TransitionModel {
        let mut model = TransitionModel::new(3, StateWidth::Narrow).unwrap();
        model.set_transitions(&[(0, 0, 0.), (0, 1, 0.), (1, 2, 0.), (2, 0, 0.)]);
        model.set_initial(1, f64::NEG_INFINITY);
        model.set_initial(2, f64::NEG_INFINITY);
        model.set_terminal(1, f64::NEG_INFINITY);
        model.rebuild_sparse();
        model
    }
    const GENE_ORF: [i64; 6] = [-1, -1, 0, -1, -1, 0];
    fn genestr_with_stop(len: usize, stop: usize) -> Vec<u8> {
        let mut genestr = vec![b'C'; len];
        genestr[stop..stop + 3].copy_from_slice(b"TAA");
        genestr
    }
    #[test]
    fn orf_gating() {
        let model = gene_model();
        #[rustfmt::skip]
        let obs = [
            0., 0., 0., 0.,
            0., 5., 1., 0.,
            0., 0., 5., 1.,
        ];
        let mut dp = DynProg::new(&model);
        dp.set_observations(&obs, 3, 4).unwrap();
        dp.set_positions(&[0, 3, 15, 18]).unwrap();
        dp.set_orf_info(&GENE_ORF, 3, 2).unwrap();
        dp.set_genestr(&genestr_with_stop(21, 6));
        dp.decode(1, false).unwrap();
        assert!((dp.scores()[0] - 10.).abs() < EPS);
        assert_eq!(dp.state_paths()[0], &[0, 1, 2, 0]);
        // The stop codon at 6 lies in frame within [3, 15).
        dp.decode(3, true).unwrap();
        assert!((dp.scores()[0] - 2.).abs() < EPS);
        assert_eq!(dp.state_paths()[0], &[0, 0, 1, 2]);
        assert_eq!(dp.position_paths()[0], &[0, 3, 15, 18]);
        assert_eq!(dp.scores()[1], 0.);
        assert_eq!(dp.state_paths()[1], &[0, 0, 0, 0]);
        assert!(!dp.paths()[2].found());
        // Segment lengths must fit the frames even without gating.
        dp.set_positions(&[0, 3, 14, 18]).unwrap();
        dp.decode(1, false).unwrap();
        assert_eq!(dp.scores()[0], 0.);
        assert_eq!(dp.state_paths()[0], &[0, 0, 0, 0]);
    }
    #[test]
    fn no_feasible_path() {
        let mut model = TransitionModel::new(2, StateWidth::Narrow).unwrap();
        model.set_transition(0, 1, 0.);
        model.set_initial(1, f64::NEG_INFINITY);
        model.set_terminal(0, f64::NEG_INFINITY);
        model.rebuild_sparse();
        let mut dp = DynProg::new(&model);
        dp.set_observations(&[0.; 4], 2, 2).unwrap();
        dp.set_positions(&[0, 12]).unwrap();
        dp.set_orf_info(&[0, -1, -1, 0], 2, 2).unwrap();
        assert_eq!(dp.decode(1, true), Err(DecodeError::MissingGeneString("ORF gating")));
        dp.set_genestr(&genestr_with_stop(15, 3));
        dp.decode(2, true).unwrap();
        assert!(dp.paths().iter().all(|p| !p.found() && p.is_empty()));
        assert_eq!(dp.scores(), vec![f64::NEG_INFINITY; 2]);
        dp.decode(1, false).unwrap();
        assert!(dp.paths()[0].found());
        assert_eq!(dp.position_paths()[0], &[0, 12]);
    }
    #[test]
    fn preconditions() {
        let model = two_state_model();
        let penalties = PenaltyMatrix::new(3, vec![]);
        let mut dp = DynProg::new(&model);
        assert_eq!(dp.decode(1, false), Err(DecodeError::MissingSequence));
        assert!(matches!(
            dp.set_observations(&[0.; 9], 3, 3),
            Err(DecodeError::ShapeMismatch { .. })
        ));
        dp.set_observations(&[0.; 6], 2, 3).unwrap();
        assert_eq!(dp.decode(0, false), Err(DecodeError::InvalidNBest));
        assert_eq!(
            dp.set_positions(&[0, 4, 2]),
            Err(DecodeError::UnsortedPositions { index: 2 })
        );
        dp.set_positions(&[0, 1, 2, 3]).unwrap();
        assert_eq!(
            dp.decode(1, false),
            Err(DecodeError::LengthMismatch {
                observations: 3,
                positions: 4
            })
        );
        assert!(dp.paths().is_empty());
        // Simple mode ignores the grid.
        assert!(dp.decode_with(1, ScoringTerms::simple()).is_ok());
        dp.set_orf_info(&[0, -1, -1, -1], 2, 2).unwrap();
        dp.set_positions(&[0, 1, 2]).unwrap();
        assert_eq!(
            dp.decode(1, false),
            Err(DecodeError::OrfMismatch { from: 0, to: 0 })
        );
        // Entering a framed state from an unframed one.
        dp.set_orf_info(&[-1, -1, -1, 0], 2, 2).unwrap();
        assert_eq!(
            dp.decode(1, false),
            Err(DecodeError::OrfMismatch { from: 0, to: 1 })
        );
        assert!(dp.set_penalties(&penalties).is_err());
        let mut stale = two_state_model();
        stale.set_transition(1, 0, -1.);
        let mut dp = DynProg::new(&stale);
        dp.set_observations(&[0.; 6], 2, 3).unwrap();
        assert_eq!(dp.decode(1, false), Err(DecodeError::StaleTransitions));
        assert_eq!(
            decode_free_length(&stale, 3, 1),
            Err(DecodeError::StaleTransitions)
        );
        assert_eq!(
            decode_free_length(&model, 0, 1),
            Err(DecodeError::InvalidIterations)
        );
    }
    #[test]
    fn free_length_equals_brute_force() {
        for seed in 0..100 {
            let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
            let n = rng.gen_range(1..=3);
            let max_iter = rng.gen_range(1..=5);
            let model = gen_seq::random_model(&mut rng, n, 0.6);
            let obs = vec![0f64; n * max_iter];
            let mut expected = vec![];
            let mut best_by_length = vec![];
            for len in 1..=max_iter {
                let paths = brute_force_simple(&model, &obs[..n * len], len);
                best_by_length.push(paths.first().map_or(f64::NEG_INFINITY, |x| x.0));
                expected.extend(paths);
            }
            expected.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            let result = decode_free_length(&model, max_iter, 3).unwrap();
            let scores: Vec<_> = result.paths.iter().map(|p| p.score).collect();
            assert_top_scores(&scores, &expected);
            assert_eq!(result.best_by_length.len(), max_iter);
            for (x, y) in result.best_by_length.iter().zip(best_by_length.iter()) {
                let both_infeasible = *x == f64::NEG_INFINITY && *y == f64::NEG_INFINITY;
                assert!((x - y).abs() < EPS || both_infeasible);
            }
            match result.best_iter {
                Some(len) => {
                    assert_eq!(result.paths[0].positions, (0..len).collect::<Vec<_>>());
                    assert!((result.best_by_length[len - 1] - scores[0]).abs() < EPS);
                }
                None => assert!(expected.is_empty()),
            }
        }
    }
    #[test]
    fn concurrent_sessions() {
        use rayon::prelude::*;
        let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(1209);
        let model = gen_seq::random_model(&mut rng, 6, 0.5);
        let inputs: Vec<Vec<f64>> = (0..32)
            .map(|_| gen_seq::random_observations(&mut rng, 6, 40, 0.05))
            .collect();
        let decode = |obs: &Vec<f64>| {
            let mut dp = DynProg::new(&model);
            dp.set_observations(obs, 6, 40).unwrap();
            dp.decode_with(3, ScoringTerms::simple()).unwrap();
            dp.paths().to_vec()
        };
        let sequential: Vec<_> = inputs.iter().map(decode).collect();
        let parallel: Vec<_> = inputs.par_iter().map(decode).collect();
        assert_eq!(sequential, parallel);
    }
}
