//! N-best Viterbi decoding of gene structures over a grid of candidate breakpoints.
//!
//! A [`TransitionModel`] holds the state graph. Segments between breakpoints are scored by
//! piecewise linear functions ([`plif`]), by a word-dictionary score maintained incrementally
//! along the gene string ([`cache`]), and optionally by per-state segment weights.
//! Segments that must be open reading frames are checked for in-frame stop codons ([`orf`]).
//! [`DynProg`] puts everything together and returns the `nbest` best paths.
//!
//! ```
//! use genedp::{DynProg, ScoringTerms, StateWidth, TransitionModel};
//! let a = [-2., -0.5, -3., -0.2];
//! let (p, q) = ([-0.1, -2.], [-3., -0.1]);
//! let model = TransitionModel::from_dense(2, StateWidth::Narrow, &p, &q, &a).unwrap();
//! let mut dp = DynProg::new(&model);
//! dp.set_observations(&[0.; 6], 2, 3).unwrap();
//! dp.decode_with(1, ScoringTerms::simple()).unwrap();
//! assert_eq!(dp.state_paths()[0], &[0, 1, 1]);
//! ```
#[macro_use]
extern crate log;
pub mod cache;
pub mod dptable;
pub mod dynprog;
pub mod error;
pub mod gen_seq;
pub mod model;
pub mod orf;
pub mod plif;
pub use dynprog::{
    decode_free_length, BestPath, DecodeConfig, DynProg, FreeLengthPaths, ScoringTerms,
};
pub use error::DecodeError;
pub use model::{StateWidth, TransitionModel};
pub use plif::{PenaltyMatrix, Plif, PlifValue};
