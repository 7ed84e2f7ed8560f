use crate::genome::Genome;

/// Maximum depth of a suffix comparison during sorting.
const MAX_COMPARE_LEN: usize = 2000;

/// Sorted suffix positions of the joined genome.
///
/// Suffixes are compared only up to their enclosing fragment boundary: a
/// suffix that runs out of fragment sorts before any longer suffix with the
/// same prefix. This keeps every downstream consumer (seed clustering,
/// backward search) from ever matching across a contig boundary.
pub struct SuffixArray {
    positions: Vec<u64>,
}

impl SuffixArray {
    /// Build by sorting all joined-genome suffixes.
    ///
    /// Plain comparison sort; a production build would swap in blockwise
    /// bucketing but the ordering contract is identical.
    pub fn build(genome: &Genome) -> Self {
        let len = genome.len();
        let coords = &genome.coords;

        // Per-position fragment end, precomputed once so the comparator
        // does no fragment lookups.
        let mut ends = vec![0u64; len as usize];
        for frag in coords.fragments() {
            let (start, end) = (frag.joined_off, frag.joined_off + frag.len);
            for pos in start..end {
                ends[pos as usize] = end;
            }
            // Mirror fragment on the antisense half
            let (rc_start, rc_end) = (len - end, len - start);
            for pos in rc_start..rc_end {
                ends[pos as usize] = rc_end;
            }
        }

        let seq = &genome.sequence;
        let mut positions: Vec<u64> = (0..len).collect();
        positions.sort_unstable_by(|&a, &b| {
            compare_suffixes(seq, &ends, a, b)
        });

        SuffixArray { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, idx: usize) -> u64 {
        self.positions[idx]
    }

    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    /// Iterate positions in sorted suffix order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.positions.iter().copied()
    }

    pub fn from_positions(positions: Vec<u64>) -> Self {
        SuffixArray { positions }
    }

    /// Range of suffixes beginning with `pattern`, over a sorted slice of
    /// positions. The match must fit within the suffix's fragment.
    pub fn pattern_range(genome: &Genome, positions: &[u64], pattern: &[u8]) -> (usize, usize) {
        let lo = partition_point(positions, |pos| {
            compare_prefix(genome, pos, pattern) == std::cmp::Ordering::Less
        });
        let hi = partition_point(positions, |pos| {
            compare_prefix(genome, pos, pattern) != std::cmp::Ordering::Greater
        });
        (lo, hi)
    }
}

fn partition_point(positions: &[u64], pred: impl Fn(u64) -> bool) -> usize {
    let mut lo = 0usize;
    let mut hi = positions.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(positions[mid]) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Compare the suffix at `pos` against `pattern`, fragment-bounded.
///
/// A suffix that ends before the pattern is exhausted compares Less: a seed
/// straddling a fragment boundary never equals anything.
fn compare_prefix(genome: &Genome, pos: u64, pattern: &[u8]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let end = genome.coords.get_end(pos);
    for (k, &pb) in pattern.iter().enumerate() {
        let p = pos + k as u64;
        if p >= end {
            return Ordering::Less;
        }
        match genome.get_base(p).cmp(&pb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn compare_suffixes(seq: &[u8], ends: &[u64], a: u64, b: u64) -> std::cmp::Ordering {
    compare_suffixes_at(seq, a, ends[a as usize], b, ends[b as usize])
}

/// Compare two fragment-bounded suffixes given their precomputed end offsets.
pub(crate) fn compare_suffixes_at(
    seq: &[u8],
    a: u64,
    a_end: u64,
    b: u64,
    b_end: u64,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let a_len = (a_end - a) as usize;
    let b_len = (b_end - b) as usize;
    let n = a_len.min(b_len).min(MAX_COMPARE_LEN);

    for k in 0..n {
        let ca = seq[(a + k as u64) as usize];
        let cb = seq[(b + k as u64) as usize];
        match ca.cmp(&cb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    if n == MAX_COMPARE_LEN {
        return a.cmp(&b);
    }
    // Shorter (fragment-terminated) suffix first, then by position
    a_len.cmp(&b_len).then(a.cmp(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::fasta::Chromosome;

    fn make_genome(seq: &str) -> Genome {
        let chrom = Chromosome {
            name: "chr1".to_string(),
            sequence: seq
                .bytes()
                .map(|b| match b {
                    b'A' => 0,
                    b'C' => 1,
                    b'G' => 2,
                    b'T' => 3,
                    _ => 4,
                })
                .collect(),
        };
        Genome::from_chromosomes(vec![chrom]).unwrap()
    }

    #[test]
    fn sorted_suffix_order() {
        let genome = make_genome("GATTACA");
        let sa = SuffixArray::build(&genome);
        assert_eq!(sa.len(), 14); // forward + reverse complement

        // Verify adjacency ordering: each suffix <= the next
        for i in 0..sa.len() - 1 {
            let a = sa.get(i);
            let b = sa.get(i + 1);
            let sa_str = genome.get_string(a, genome.coords.get_end(a) - a);
            let sb_str = genome.get_string(b, genome.coords.get_end(b) - b);
            assert!(sa_str <= sb_str, "{sa_str} > {sb_str}");
        }
    }

    #[test]
    fn pattern_range_finds_all_occurrences() {
        let genome = make_genome("ACGTACGT");
        let sa = SuffixArray::build(&genome);
        let pattern = [0u8, 1, 2, 3]; // ACGT
        let (lo, hi) = SuffixArray::pattern_range(&genome, sa.positions(), &pattern);
        // ACGT occurs twice forward and twice on the reverse complement
        assert_eq!(hi - lo, 4);
        for i in lo..hi {
            let pos = sa.get(i);
            assert_eq!(genome.get_string(pos, 4), "ACGT");
        }
    }

    #[test]
    fn pattern_range_empty_for_absent_pattern() {
        let genome = make_genome("AAAA");
        let sa = SuffixArray::build(&genome);
        let pattern = [2u8, 2]; // GG
        let (lo, hi) = SuffixArray::pattern_range(&genome, sa.positions(), &pattern);
        assert_eq!(lo, hi);
    }

    #[test]
    fn fragment_boundary_breaks_matches() {
        // ACGT | N gap | ACGT: the 8-base pattern ACGTACGT must not match
        // across the fragment boundary
        let genome = make_genome("ACGTNNACGT");
        let sa = SuffixArray::build(&genome);
        let pattern = [0u8, 1, 2, 3, 0, 1, 2, 3];
        let (lo, hi) = SuffixArray::pattern_range(&genome, sa.positions(), &pattern);
        assert_eq!(lo, hi, "match must not straddle a fragment boundary");

        let four = [0u8, 1, 2, 3];
        let (lo, hi) = SuffixArray::pattern_range(&genome, sa.positions(), &four);
        assert_eq!(hi - lo, 4); // two forward fragments + two antisense
    }
}
