//! Incremental per-position scores over the gene string.
//!
//! [`WordScoreCache`] turns DNA words found in a trailing window into one scalar per position,
//! using a dictionary of word weights for several word orders.
//! [`SegmentSumCache`] sums per-state weights over a segment whose end moves forward.
//! Both caches only move forward; moving back is an error, and jumping
//! elsewhere requires an explicit `reset`.
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Word orders used when nothing else is given.
pub const DEFAULT_WORD_ORDERS: [usize; 4] = [3, 4, 5, 6];
/// Longest supported word. 4^15 codes fit in a u32.
pub const MAX_WORD_ORDER: usize = 15;

const fn base_table() -> [u8; 256] {
    let mut slots = [4; 256];
    slots[b'A' as usize] = 0;
    slots[b'C' as usize] = 1;
    slots[b'G' as usize] = 2;
    slots[b'T' as usize] = 3;
    slots[b'a' as usize] = 0;
    slots[b'c' as usize] = 1;
    slots[b'g' as usize] = 2;
    slots[b't' as usize] = 3;
    slots
}
const BASE_TABLE: [u8; 256] = base_table();

/// Weight of each DNA word, for each word order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryWeights {
    orders: Vec<usize>,
    weights: Vec<Vec<f64>>,
}

impl DictionaryWeights {
    /// `weights[i]` has one entry per word of length `orders[i]`, indexed by the word code
    /// (A=0, C=1, G=2, T=3, the first base being the most significant).
    pub fn new(orders: Vec<usize>, weights: Vec<Vec<f64>>) -> Result<Self, DecodeError> {
        if orders.len() != weights.len() {
            return Err(DecodeError::ShapeMismatch {
                what: "dictionary weights",
                expected: orders.len(),
                actual: weights.len(),
            });
        }
        for (&order, ws) in orders.iter().zip(weights.iter()) {
            if order == 0 || MAX_WORD_ORDER < order {
                return Err(DecodeError::InvalidDictionary {
                    order,
                    expected: 0,
                    actual: ws.len(),
                });
            }
            let expected = 1 << (2 * order);
            if ws.len() != expected {
                return Err(DecodeError::InvalidDictionary {
                    order,
                    expected,
                    actual: ws.len(),
                });
            }
        }
        Ok(Self { orders, weights })
    }
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }
    pub fn weights(&self, order_idx: usize) -> &[f64] {
        &self.weights[order_idx]
    }
}

/// Translate `genestr` into the codes of the words of length `order` starting at each position.
/// Words containing anything but ACGT have no code.
pub fn translate_from_single_order(genestr: &[u8], order: usize) -> Vec<Option<u32>> {
    assert!(0 < order && order <= MAX_WORD_ORDER);
    let mask = ((1u64 << (2 * order)) - 1) as u32;
    let mut words = Vec::with_capacity((genestr.len() + 1).saturating_sub(order));
    let (mut code, mut run) = (0u32, 0);
    for (j, &b) in genestr.iter().enumerate() {
        let base = BASE_TABLE[b as usize];
        if base < 4 {
            code = ((code << 2) | base as u32) & mask;
            run += 1;
        } else {
            code = 0;
            run = 0;
        }
        if order <= j + 1 {
            words.push((order <= run).then(|| code));
        }
    }
    words
}

/// Words of the gene string, one code table per word order.
#[derive(Debug, Clone)]
pub struct WordIndex {
    orders: Vec<usize>,
    words: Vec<Vec<Option<u32>>>,
}

impl WordIndex {
    pub fn new(genestr: &[u8], orders: &[usize]) -> Self {
        let words = orders
            .iter()
            .map(|&k| translate_from_single_order(genestr, k))
            .collect();
        Self {
            orders: orders.to_vec(),
            words,
        }
    }
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }
    pub fn words(&self, order_idx: usize) -> &[Option<u32>] {
        &self.words[order_idx]
    }
}

// Running sums of one word order.
// Words starting in [removed_until, added_until) are folded into `counts`.
#[derive(Debug, Clone)]
struct OrderAccumulator {
    order: usize,
    counts: Vec<u32>,
    unnormalized: f64,
    unique: usize,
    removed_until: usize,
    added_until: usize,
    last: isize,
}

impl OrderAccumulator {
    fn new(order: usize, start_pos: usize) -> Self {
        Self {
            order,
            counts: vec![0; 1 << (2 * order)],
            unnormalized: 0f64,
            unique: 0,
            removed_until: 0,
            added_until: 0,
            last: start_pos as isize - 1,
        }
    }
    fn reset(&mut self, pos: usize) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.unnormalized = 0f64;
        self.unique = 0;
        self.removed_until = 0;
        self.added_until = 0;
        self.last = pos as isize - 1;
    }
    fn add(&mut self, word: u32, weights: &[f64]) {
        let count = &mut self.counts[word as usize];
        if *count == 0 {
            self.unnormalized += weights[word as usize];
            self.unique += 1;
        }
        *count += 1;
    }
    fn remove(&mut self, word: u32, weights: &[f64]) {
        let count = &mut self.counts[word as usize];
        assert!(0 < *count);
        *count -= 1;
        if *count == 0 {
            self.unique -= 1;
            if self.unique == 0 {
                self.unnormalized = 0f64;
            } else {
                self.unnormalized -= weights[word as usize];
            }
        }
    }
    fn slide(&mut self, words: &[Option<u32>], weights: &[f64], pos: usize, lookback: usize) {
        let lo = pos.saturating_sub(lookback);
        let hi = (pos + 1).saturating_sub(self.order);
        let remove_end = lo.min(self.added_until);
        for i in self.removed_until..remove_end {
            if let Some(&Some(word)) = words.get(i) {
                self.remove(word, weights);
            }
        }
        self.removed_until = self.removed_until.max(lo);
        let add_start = self.added_until.max(lo);
        for i in add_start..hi {
            if let Some(&Some(word)) = words.get(i) {
                self.add(word, weights);
            }
        }
        self.added_until = add_start.max(hi);
        self.last = pos as isize;
    }
    fn score(&self) -> f64 {
        match self.unique {
            0 => 0f64,
            n => self.unnormalized / (n as f64).sqrt(),
        }
    }
}

/// Word score of the trailing window `[pos - max_lookback, pos)`.
/// For each word order, the weights of the distinct words fully inside the window are summed
/// and divided by the square root of their number; the orders are then summed.
/// A word occurring several times in the window counts once.
#[derive(Debug, Clone)]
pub struct WordScoreCache<'a> {
    dict: &'a DictionaryWeights,
    accumulators: Vec<OrderAccumulator>,
    seq_len: usize,
    max_lookback: usize,
}

impl<'a> WordScoreCache<'a> {
    pub fn init(
        dict: &'a DictionaryWeights,
        start_pos: usize,
        seq_len: usize,
        max_lookback: usize,
    ) -> Self {
        let accumulators = dict
            .orders()
            .iter()
            .map(|&order| OrderAccumulator::new(order, start_pos))
            .collect();
        Self {
            dict,
            accumulators,
            seq_len,
            max_lookback,
        }
    }
    /// Drop everything accumulated so far. The next `extend` starts from scratch.
    pub fn reset(&mut self, pos: usize) {
        self.accumulators.iter_mut().for_each(|acc| acc.reset(pos));
    }
    /// Move the window end to `pos` and return the score there.
    pub fn extend(&mut self, words: &WordIndex, pos: usize) -> Result<f64, DecodeError> {
        debug_assert_eq!(words.orders(), self.dict.orders());
        if self.seq_len < pos {
            return Err(DecodeError::PositionOutOfRange {
                position: pos,
                len: self.seq_len,
            });
        }
        let lookback = self.max_lookback;
        for (i, acc) in self.accumulators.iter_mut().enumerate() {
            if (pos as isize) < acc.last {
                return Err(DecodeError::CacheOrder {
                    last: acc.last,
                    requested: pos,
                });
            }
            if pos as isize != acc.last {
                acc.slide(words.words(i), self.dict.weights(i), pos, lookback);
            }
        }
        Ok(self.score())
    }
    pub fn score(&self) -> f64 {
        self.accumulators.iter().map(|acc| acc.score()).sum()
    }
    pub fn last_position(&self) -> isize {
        self.accumulators.iter().map(|acc| acc.last).min().unwrap_or(-1)
    }
    pub fn max_lookback(&self) -> usize {
        self.max_lookback
    }
}

/// Per-state sums of segment weights over `[anchor, pos)`.
/// `weights` is a `num_states x span` row-major matrix indexed by genomic position.
#[derive(Debug, Clone)]
pub struct SegmentSumCache<'a> {
    weights: &'a [f64],
    span: usize,
    values: Vec<f64>,
    last: isize,
}

impl<'a> SegmentSumCache<'a> {
    pub fn new(weights: &'a [f64], num_states: usize, span: usize) -> Result<Self, DecodeError> {
        if weights.len() != num_states * span {
            return Err(DecodeError::ShapeMismatch {
                what: "segment weights",
                expected: num_states * span,
                actual: weights.len(),
            });
        }
        Ok(Self {
            weights,
            span,
            values: vec![0f64; num_states],
            last: 0,
        })
    }
    /// Start a new segment at `pos`.
    pub fn reset(&mut self, pos: usize) {
        self.values.iter_mut().for_each(|x| *x = 0f64);
        self.last = pos as isize;
    }
    /// Move the end of the segment to `pos`.
    pub fn extend(&mut self, pos: usize) -> Result<(), DecodeError> {
        if (pos as isize) < self.last {
            return Err(DecodeError::CacheOrder {
                last: self.last,
                requested: pos,
            });
        }
        if self.span < pos {
            return Err(DecodeError::PositionOutOfRange {
                position: pos,
                len: self.span,
            });
        }
        let (span, last) = (self.span, self.last as usize);
        for (state, value) in self.values.iter_mut().enumerate() {
            let row = &self.weights[state * span..(state + 1) * span];
            *value += row[last..pos].iter().sum::<f64>();
        }
        self.last = pos as isize;
        Ok(())
    }
    pub fn value(&self, state: usize) -> f64 {
        self.values[state]
    }
    pub fn last_position(&self) -> isize {
        self.last
    }
}
