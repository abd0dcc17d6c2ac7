use std::cmp::Ordering;

/// Pointer to the DP entry an entry extends: the `rank`-th best entry of `state` at `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Back {
    pub step: u32,
    pub state: u16,
    pub rank: u16,
}

/// A scored DP entry. Seeds have no back pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub score: f64,
    pub back: Option<Back>,
}

impl Entry {
    const EMPTY: Entry = Entry {
        score: f64::NEG_INFINITY,
        back: None,
    };
}

/// Order of entries in a cell; `Less` is better.
/// Higher score first, then lower predecessor state, then lower predecessor rank,
/// then earlier predecessor step. Seeds go before anything with the same score.
/// Scores are never NaN here.
pub fn rank_order(a: &Entry, b: &Entry) -> Ordering {
    fn key(e: &Entry) -> (bool, u16, u16, u32) {
        match e.back {
            None => (false, 0, 0, 0),
            Some(back) => (true, back.state, back.rank, back.step),
        }
    }
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| key(a).cmp(&key(b)))
}

/// DP table holding, for each (step, state) cell, up to `nbest` entries sorted by [`rank_order`].
/// It is a serialized 3-d array; each cell owns `nbest` slots of which the first `len` are used.
#[derive(Debug, Clone)]
pub struct NBestTable {
    states: usize,
    nbest: usize,
    mem: Vec<Entry>,
    lens: Vec<usize>,
}

impl NBestTable {
    pub fn new(steps: usize, states: usize, nbest: usize) -> Self {
        Self {
            states,
            nbest,
            mem: vec![Entry::EMPTY; steps * states * nbest],
            lens: vec![0; steps * states],
        }
    }
    pub fn nbest(&self) -> usize {
        self.nbest
    }
    pub fn get(&self, step: usize, state: usize) -> &[Entry] {
        let cell = step * self.states + state;
        let start = cell * self.nbest;
        &self.mem[start..start + self.lens[cell]]
    }
    pub fn is_empty(&self, step: usize, state: usize) -> bool {
        self.lens[step * self.states + state] == 0
    }
    /// Insert `entry` into the cell, dropping the worst one if the cell is full.
    /// Return false if the entry did not make it.
    pub fn push(&mut self, step: usize, state: usize, entry: Entry) -> bool {
        let cell = step * self.states + state;
        let nbest = self.nbest;
        let len = self.lens[cell];
        let slots = &mut self.mem[cell * nbest..(cell + 1) * nbest];
        if len == nbest && rank_order(&entry, &slots[nbest - 1]) != Ordering::Less {
            return false;
        }
        let idx = slots[..len].partition_point(|e| rank_order(e, &entry) != Ordering::Greater);
        let end = len.min(nbest - 1);
        slots.copy_within(idx..end, idx + 1);
        slots[idx] = entry;
        self.lens[cell] = (len + 1).min(nbest);
        true
    }
}
