/// Scoring for alignment extension, gaps, and splice junctions
use crate::genome::Genome;

/// Splice junction motif types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpliceMotif {
    /// GT-AG (canonical, + strand)
    GtAg,
    /// CT-AC (canonical, - strand; reverse complement of GT-AG)
    CtAc,
    /// GC-AG (semi-canonical, + strand)
    GcAg,
    /// CT-GC (semi-canonical, - strand)
    CtGc,
    /// AT-AC (semi-canonical, + strand)
    AtAc,
    /// GT-AT (semi-canonical, - strand)
    GtAt,
    /// Non-canonical
    NonCanonical,
}

impl SpliceMotif {
    pub fn is_canonical(&self) -> bool {
        matches!(self, SpliceMotif::GtAg | SpliceMotif::CtAc)
    }

    pub fn is_noncanonical(&self) -> bool {
        matches!(self, SpliceMotif::NonCanonical)
    }
}

/// Alignment scorer with user-defined penalties.
///
/// Scores are match-bonus based: a perfect end-to-end alignment of length L
/// scores `match_bonus * L`, and every edit subtracts its penalty.
#[derive(Debug, Clone)]
pub struct Scoring {
    pub match_bonus: i64,
    pub mm_penalty: i64,
    /// Per-base value forfeited by hard-trimming a read end.
    pub soft_clip_penalty: i64,
    pub read_gap_open: i64,
    pub read_gap_extend: i64,
    pub ref_gap_open: i64,
    pub ref_gap_extend: i64,
    pub can_splice_penalty: i64,
    pub semi_can_splice_penalty: i64,
    pub noncan_splice_penalty: i64,
    /// Minimum score as a linear function of read length.
    pub score_min_const: f64,
    pub score_min_linear: f64,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring {
            match_bonus: 2,
            mm_penalty: 6,
            soft_clip_penalty: 2,
            read_gap_open: 5,
            read_gap_extend: 3,
            ref_gap_open: 5,
            ref_gap_extend: 3,
            can_splice_penalty: 0,
            semi_can_splice_penalty: 6,
            noncan_splice_penalty: 12,
            score_min_const: 0.0,
            score_min_linear: -0.6,
        }
    }
}

impl Scoring {
    /// Minimum acceptable score for a read of `read_len` bases.
    pub fn min_score(&self, read_len: usize) -> i64 {
        (self.score_min_const + self.score_min_linear * read_len as f64).floor() as i64
    }

    /// Score of a perfect ungapped alignment of `len` bases.
    pub fn perfect_score(&self, len: usize) -> i64 {
        self.match_bonus * len as i64
    }

    /// Penalty of a read gap (deletion) of `len` bases.
    pub fn read_gap_penalty(&self, len: usize) -> i64 {
        self.read_gap_open + self.read_gap_extend * len as i64
    }

    /// Penalty of a reference gap (insertion) of `len` bases.
    pub fn ref_gap_penalty(&self, len: usize) -> i64 {
        self.ref_gap_open + self.ref_gap_extend * len as i64
    }

    /// Penalty of a splice junction. Known (annotated or previously
    /// discovered) sites carry no penalty.
    pub fn splice_penalty(&self, motif: SpliceMotif, known: bool) -> i64 {
        if known {
            return 0;
        }
        match motif {
            SpliceMotif::GtAg | SpliceMotif::CtAc => self.can_splice_penalty,
            SpliceMotif::GcAg | SpliceMotif::CtGc | SpliceMotif::AtAc | SpliceMotif::GtAt => {
                self.semi_can_splice_penalty
            }
            SpliceMotif::NonCanonical => self.noncan_splice_penalty,
        }
    }

    /// Detect the splice motif of an intron in joined-genome coordinates.
    ///
    /// `donor_pos` is the first intronic base; the intron occupies
    /// `[donor_pos, donor_pos + intron_len)`. Bases are read from the
    /// forward genome; the motif pattern itself determines the transcript
    /// strand.
    pub fn detect_splice_motif(
        &self,
        genome: &Genome,
        donor_pos: u64,
        intron_len: u64,
    ) -> SpliceMotif {
        if intron_len < 4 || donor_pos + intron_len > genome.len() {
            return SpliceMotif::NonCanonical;
        }
        let d1 = genome.get_base(donor_pos);
        let d2 = genome.get_base(donor_pos + 1);
        let a1 = genome.get_base(donor_pos + intron_len - 2);
        let a2 = genome.get_base(donor_pos + intron_len - 1);

        // A=0, C=1, G=2, T=3
        match (d1, d2, a1, a2) {
            (2, 3, 0, 2) => SpliceMotif::GtAg,
            (2, 1, 0, 2) => SpliceMotif::GcAg,
            (0, 3, 0, 1) => SpliceMotif::AtAc,
            (1, 3, 0, 1) => SpliceMotif::CtAc,
            (1, 3, 2, 1) => SpliceMotif::CtGc,
            (2, 3, 0, 3) => SpliceMotif::GtAt,
            _ => SpliceMotif::NonCanonical,
        }
    }
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
    fn min_score_is_linear_in_read_length() {
        let sc = Scoring::default();
        assert_eq!(sc.min_score(100), -60);
        assert_eq!(sc.min_score(50), -30);
        assert_eq!(sc.perfect_score(100), 200);
    }

    #[test]
    fn detect_gtag_motif() {
        // AA [GT CCCCCCCC AG] AA : intron at 2..14, length 12
        let genome = make_genome("AAGTCCCCCCCCAGAA");
        let sc = Scoring::default();
        assert_eq!(sc.detect_splice_motif(&genome, 2, 12), SpliceMotif::GtAg);
    }

    #[test]
    fn detect_reverse_strand_motif() {
        // CT ... AC is the reverse complement presentation of GT-AG
        let genome = make_genome("AACTCCCCCCCCACAA");
        let sc = Scoring::default();
        assert_eq!(sc.detect_splice_motif(&genome, 2, 12), SpliceMotif::CtAc);
    }

    #[test]
    fn noncanonical_fallback() {
        let genome = make_genome("AAAACCCCCCCCCCAA");
        let sc = Scoring::default();
        assert_eq!(
            sc.detect_splice_motif(&genome, 2, 12),
            SpliceMotif::NonCanonical
        );
    }

    #[test]
    fn splice_penalties_by_motif() {
        let sc = Scoring::default();
        assert_eq!(sc.splice_penalty(SpliceMotif::GtAg, false), 0);
        assert_eq!(sc.splice_penalty(SpliceMotif::GcAg, false), 6);
        assert_eq!(sc.splice_penalty(SpliceMotif::NonCanonical, false), 12);
        // known sites are free regardless of motif
        assert_eq!(sc.splice_penalty(SpliceMotif::NonCanonical, true), 0);
    }
}
