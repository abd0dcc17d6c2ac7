//! Open-reading-frame constraints on segments of the gene string.
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

fn is_stop_codon(codon: &[u8]) -> bool {
    let codon = [
        codon[0].to_ascii_uppercase(),
        codon[1].to_ascii_uppercase(),
        codon[2].to_ascii_uppercase(),
    ];
    matches!(&codon, b"TAA" | b"TAG" | b"TGA")
}

/// `is_stop(i)` tells whether a stop codon starts at `i`.
#[derive(Debug, Clone)]
pub struct StopCodons {
    stops: Vec<bool>,
}

impl StopCodons {
    pub fn from_genestr(genestr: &[u8]) -> Self {
        let mut stops = vec![false; genestr.len()];
        for (i, codon) in genestr.windows(3).enumerate() {
            stops[i] = is_stop_codon(codon);
        }
        Self { stops }
    }
    pub fn is_stop(&self, pos: usize) -> bool {
        self.stops.get(pos).copied().unwrap_or(false)
    }
    pub fn len(&self) -> usize {
        self.stops.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

/// Reading frames of a state: `from` is the frame a segment leaving the state starts in,
/// `to` is the frame a segment entering the state ends in. `None` means the state does not care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrfFrame {
    pub from: Option<u8>,
    pub to: Option<u8>,
}

/// Parse a `rows x 2` matrix of frames where -1 means "no frame".
pub fn parse_orf_info(
    info: &[i64],
    rows: usize,
    cols: usize,
) -> Result<Vec<OrfFrame>, DecodeError> {
    if cols != 2 || info.len() != rows * cols {
        return Err(DecodeError::ShapeMismatch {
            what: "ORF info",
            expected: rows * 2,
            actual: info.len(),
        });
    }
    let frame = |x: i64| match x {
        -1 => Ok(None),
        0..=2 => Ok(Some(x as u8)),
        _ => Err(DecodeError::InvalidOrfFrame(x)),
    };
    info.chunks_exact(2)
        .map(|pair| {
            Ok(OrfFrame {
                from: frame(pair[0])?,
                to: frame(pair[1])?,
            })
        })
        .collect()
}

/// Segment length modulo 3 required between the two frames.
pub fn frame_target(from: u8, to: u8) -> usize {
    (to as usize + 3 - from as usize) % 3
}

#[derive(Debug, Clone, Copy)]
struct PhaseScan {
    // The next codon start to examine.
    next: usize,
    first_stop: Option<usize>,
}

/// Scanner looking for in-frame stop codons in segments starting at a fixed anchor.
/// Each codon is examined at most once between two resets, whatever order the segment ends
/// are queried in.
#[derive(Debug, Clone)]
pub struct OrfScanner<'a> {
    stops: &'a StopCodons,
    start: usize,
    phases: [PhaseScan; 3],
}

impl<'a> OrfScanner<'a> {
    pub fn new(stops: &'a StopCodons) -> Self {
        let mut scanner = Self {
            stops,
            start: 0,
            phases: [PhaseScan {
                next: 0,
                first_stop: None,
            }; 3],
        };
        scanner.reset(0);
        scanner
    }
    pub fn reset(&mut self, start: usize) {
        self.start = start;
        for (phase, scan) in self.phases.iter_mut().enumerate() {
            scan.next = start + phase;
            scan.first_stop = None;
        }
    }
    pub fn start(&self) -> usize {
        self.start
    }
    /// Extend the segment `[start, to)` leaving a state in frame `from` and entering a state
    /// in frame `to_frame`. Returns `None` if an in-frame stop codon lies inside, otherwise
    /// the last codon start verified to be free of stops.
    pub fn extend(&mut self, from: u8, to_frame: u8, to: usize) -> Option<usize> {
        let phase = (3 - from as usize % 3) % 3;
        let first = self.start + phase;
        let limit = to as isize - to_frame as isize - 3;
        let stops = self.stops;
        let scan = &mut self.phases[phase];
        if let Some(stop) = scan.first_stop {
            if stop as isize <= limit {
                return None;
            }
        }
        while scan.next as isize <= limit {
            if stops.is_stop(scan.next) {
                scan.first_stop = Some(scan.next);
                return None;
            }
            scan.next += 3;
        }
        let verified = (scan.next as isize - 3).min(limit);
        if verified < first as isize {
            Some(self.start)
        } else {
            Some(first + (verified as usize - first) / 3 * 3)
        }
    }
    /// Whether the segment `[start, to)` may join a state with frames `source` to a state with
    /// frames `target`. The segment length must match the frames; with `gate` it must also be
    /// free of in-frame stop codons.
    pub fn admits(&mut self, source: OrfFrame, target: OrfFrame, to: usize, gate: bool) -> bool {
        match (source.from, target.to) {
            (Some(from), Some(to_frame)) => {
                let length = to - self.start;
                length % 3 == frame_target(from, to_frame)
                    && (!gate || self.extend(from, to_frame, to).is_some())
            }
            _ => true,
        }
    }
}
