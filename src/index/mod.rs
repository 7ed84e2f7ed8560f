pub mod io;
pub mod local_index;
pub mod suffix_array;

use std::path::Path;

use crate::error::Error;
use crate::genome::Genome;
use crate::params::Parameters;

use local_index::{LocalIndex, LocalIndexSet};
use suffix_array::SuffixArray;

/// A concrete genome location resolved from an index lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coord {
    pub ref_id: usize,
    pub refoff: u64,
    pub joined_off: u64,
}

/// Result of a maximal backward search.
///
/// `nelt` is the number of forward-genome locations matching the maximal
/// segment. When `nelt` exceeds the caller's cap the lookup is "too
/// ambiguous, do not use" and `coords` is left empty.
#[derive(Debug, Default)]
pub struct BackwardHit {
    pub extlen: usize,
    pub nelt: usize,
    pub coords: Vec<Coord>,
    pub unique_stop: bool,
}

/// Complete genome index: joined genome + whole-genome suffix array +
/// regionally scoped local windows.
pub struct GenomeIndex {
    pub genome: Genome,
    pub suffix_array: SuffixArray,
    pub local_indexes: LocalIndexSet,
}

impl std::fmt::Debug for GenomeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenomeIndex").finish_non_exhaustive()
    }
}

impl GenomeIndex {
    /// Build a complete genome index from FASTA files.
    pub fn build(params: &Parameters) -> Result<Self, Error> {
        log::info!("Loading FASTA files...");
        let genome = Genome::from_fasta(params)?;

        log::info!(
            "Loaded {} chromosomes, joined genome size: {} bases",
            genome.coords.ref_names().len(),
            genome.forward_length
        );

        log::info!("Building suffix array...");
        let suffix_array = SuffixArray::build(&genome);
        log::info!("Suffix array built: {} entries", suffix_array.len());

        let local_indexes = LocalIndexSet::build(&genome);
        log::info!("Local index windows: {}", local_indexes.len());

        Ok(GenomeIndex {
            genome,
            suffix_array,
            local_indexes,
        })
    }

    pub fn from_genome(genome: Genome) -> Self {
        let suffix_array = SuffixArray::build(&genome);
        let local_indexes = LocalIndexSet::build(&genome);
        GenomeIndex {
            genome,
            suffix_array,
            local_indexes,
        }
    }

    /// Write the index to `dir` as a single binary file.
    pub fn write(&self, dir: &Path) -> Result<(), Error> {
        io::write_index(self, dir)
    }

    /// Load an index previously written with `write`.
    pub fn read(dir: &Path) -> Result<Self, Error> {
        io::read_index(dir)
    }

    /// Whole-genome maximal backward search: the longest segment of `seq`
    /// ending at `extoff` (inclusive) that occurs in the forward genome.
    pub fn global_search_backward(
        &self,
        seq: &[u8],
        extoff: usize,
        max_hits: usize,
        unique_stop: bool,
        min_unique_len: usize,
    ) -> BackwardHit {
        search_backward_over(
            &self.genome,
            self.suffix_array.positions(),
            seq,
            extoff,
            extoff + 1,
            max_hits,
            unique_stop,
            min_unique_len,
            true, // the global SA covers both halves; filter to forward
        )
    }

    /// Backward search restricted to one local index window.
    #[allow(clippy::too_many_arguments)]
    pub fn local_search_backward(
        &self,
        local: &LocalIndex,
        seq: &[u8],
        extoff: usize,
        max_len: usize,
        max_hits: usize,
        unique_stop: bool,
        min_unique_len: usize,
    ) -> BackwardHit {
        search_backward_over(
            &self.genome,
            local.positions(),
            seq,
            extoff,
            max_len,
            max_hits,
            unique_stop,
            min_unique_len,
            false, // window positions are forward-half only
        )
    }
}

/// Maximal backward search over a sorted position list.
///
/// Grows the pattern leftward one base at a time, re-deriving the matching
/// range, until the range empties, the read is exhausted, `max_len` is hit,
/// or a unique match of at least `min_unique_len` is found (`unique_stop`).
#[allow(clippy::too_many_arguments)]
fn search_backward_over(
    genome: &Genome,
    positions: &[u64],
    seq: &[u8],
    extoff: usize,
    max_len: usize,
    max_hits: usize,
    unique_stop: bool,
    min_unique_len: usize,
    filter_forward: bool,
) -> BackwardHit {
    let mut result = BackwardHit::default();
    if extoff >= seq.len() || positions.is_empty() {
        return result;
    }

    let mut best: Option<(usize, usize)> = None;
    let mut extlen = 0usize;
    let limit = max_len.min(extoff + 1);

    for l in 1..=limit {
        let start = extoff + 1 - l;
        if seq[start] >= 4 {
            break; // N in the read: no genomic match possible
        }
        let pattern = &seq[start..=extoff];
        let (lo, hi) = SuffixArray::pattern_range(genome, positions, pattern);
        if lo == hi {
            break;
        }
        best = Some((lo, hi));
        extlen = l;
        if unique_stop && hi - lo == 1 && l >= min_unique_len {
            result.unique_stop = true;
            break;
        }
    }

    let (lo, hi) = match best {
        Some(range) => range,
        None => return result,
    };
    result.extlen = extlen;

    // Ranges far beyond the cap are ambiguous without further inspection
    let scan_cap = max_hits * 4 + 16;
    if hi - lo > scan_cap {
        result.nelt = hi - lo;
        return result;
    }

    let mut coords = Vec::new();
    for &pos in &positions[lo..hi] {
        if filter_forward && pos >= genome.forward_length {
            continue;
        }
        if let Some(frag_id) = genome.coords.map_joined_off_to_seq(pos) {
            let frag = &genome.coords.fragments()[frag_id];
            coords.push(Coord {
                ref_id: frag.seq_id,
                refoff: frag.seq_off + (pos - frag.joined_off),
                joined_off: pos,
            });
        }
    }
    result.nelt = coords.len();
    if result.nelt <= max_hits {
        coords.sort();
        result.coords = coords;
    }
    result
}
