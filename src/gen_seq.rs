//! This module is to generate random models and inputs to assess the performance.
//! Usually, it would not be used in the real-applications.
use crate::model::{StateWidth, TransitionModel};
use crate::plif::Plif;
use rand::seq::SliceRandom;
use rand::Rng;

pub fn generate_seq<T: Rng>(rng: &mut T, len: usize) -> Vec<u8> {
    let bases = b"ACTG";
    (0..len)
        .filter_map(|_| bases.choose(rng))
        .copied()
        .collect()
}

/// A random model where each transition exists with probability `density`.
/// Scores are drawn from [-3, 0). The sparse lists are built.
pub fn random_model<T: Rng>(rng: &mut T, num_states: usize, density: f64) -> TransitionModel {
    let width = if num_states <= StateWidth::Narrow.max_states() {
        StateWidth::Narrow
    } else {
        StateWidth::Wide
    };
    random_model_with_width(rng, num_states, density, width)
}

/// Same as [`random_model`] with an explicit state index width.
pub fn random_model_with_width<T: Rng>(
    rng: &mut T,
    num_states: usize,
    density: f64,
    width: StateWidth,
) -> TransitionModel {
    let p: Vec<_> = (0..num_states).map(|_| random_score(rng, 0.8)).collect();
    let q: Vec<_> = (0..num_states).map(|_| random_score(rng, 0.8)).collect();
    let a: Vec<_> = (0..num_states * num_states)
        .map(|_| random_score(rng, density))
        .collect();
    // Only fails on the number of states, which is the caller's business.
    match TransitionModel::from_dense(num_states, width, &p, &q, &a) {
        Ok(model) => model,
        Err(why) => panic!("{}", why),
    }
}

fn random_score<T: Rng>(rng: &mut T, density: f64) -> f64 {
    if rng.gen_bool(density) {
        -rng.gen_range(0f64..3f64)
    } else {
        f64::NEG_INFINITY
    }
}

/// A `num_states x len` observation matrix (row-major by state).
/// Each value is forbidden (`-inf`) with probability `forbid`.
pub fn random_observations<T: Rng>(
    rng: &mut T,
    num_states: usize,
    len: usize,
    forbid: f64,
) -> Vec<f64> {
    (0..num_states * len)
        .map(|_| {
            if rng.gen_bool(forbid) {
                f64::NEG_INFINITY
            } else {
                rng.gen_range(-2f64..2f64)
            }
        })
        .collect()
}

/// Strictly increasing positions starting at zero, with gaps in `1..=max_gap`.
pub fn random_positions<T: Rng>(rng: &mut T, len: usize, max_gap: usize) -> Vec<usize> {
    let mut pos = 0;
    (0..len)
        .map(|i| {
            if 0 < i {
                pos += rng.gen_range(1..=max_gap);
            }
            pos
        })
        .collect()
}

/// A segment-length PLiF with three random supports within `[1, max_len]`.
pub fn random_length_plif<T: Rng>(rng: &mut T, max_len: usize) -> Plif {
    let mut limits: Vec<f64> = (0..3)
        .map(|_| rng.gen_range(1..=max_len.max(3)) as f64)
        .collect();
    limits.sort_by(|a, b| a.partial_cmp(b).unwrap());
    limits.dedup();
    let penalties: Vec<_> = limits.iter().map(|_| -rng.gen_range(0f64..2f64)).collect();
    match Plif::new(limits, penalties) {
        Ok(plif) => plif.with_length_bounds(1, Some(max_len)),
        Err(why) => panic!("{}", why),
    }
}
