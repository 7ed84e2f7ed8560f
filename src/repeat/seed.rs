use crate::genome::Genome;

/// Variant type of a `SeedSnp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnpType {
    /// Single-base mismatch against the consensus.
    Single,
    /// Instance is missing bases present in the consensus.
    Deletion,
    /// Instance carries bases absent from the consensus.
    Insertion,
}

/// A single variant at a fixed position relative to a family consensus.
///
/// Deduplicated by value: instances sharing the same variant share one entry
/// in the family registry and refer to it by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSnp {
    pub snp_type: SnpType,
    /// Position in the consensus.
    pub pos: usize,
    /// Gap length (1 for a mismatch).
    pub len: usize,
    /// Base payload: the instance base(s) for single/insertion, the
    /// consensus bases for a deletion.
    pub base: String,
    /// Sequential output id, assigned at serialization time.
    pub id: usize,
}

impl SeedSnp {
    pub fn new(snp_type: SnpType, pos: usize, len: usize, base: String) -> Self {
        SeedSnp {
            snp_type,
            pos,
            len,
            base,
            id: usize::MAX,
        }
    }

    fn same_variant(&self, other: &SeedSnp) -> bool {
        self.snp_type == other.snp_type
            && self.pos == other.pos
            && self.len == other.len
            && self.base == other.base
    }
}

/// Find or insert a variant in a family registry, returning its index.
pub fn lookup_add_snp(registry: &mut Vec<SeedSnp>, snp: SeedSnp) -> usize {
    for (i, existing) in registry.iter().enumerate() {
        if existing.same_variant(&snp) {
            return i;
        }
    }
    registry.push(snp);
    registry.len() - 1
}

/// One repeat instance under extension.
///
/// `pos` grows monotonically outward from `orig_pos` as consensus extension
/// proceeds and never crosses `bound` (the enclosing fragment). Gap lists
/// record indels versus the consensus: positive = deletion in the instance
/// relative to the consensus, negative = insertion.
#[derive(Debug, Clone)]
pub struct SeedExt {
    /// Original seed interval, immutable.
    pub orig_pos: (u64, u64),
    /// Current extended interval.
    pub pos: (u64, u64),
    /// Interval into the family consensus this instance covers.
    pub consensus_pos: (usize, usize),
    /// Enclosing fragment boundaries; extension must never cross these.
    pub bound: (u64, u64),
    /// (offset from extension start, signed gap length), ordered outward.
    pub left_gaps: Vec<(usize, i64)>,
    pub right_gaps: Vec<(usize, i64)>,
    /// Edit distance in the current extension round.
    pub ed: usize,
    /// Accumulated edit distance across rounds.
    pub total_ed: usize,
    /// Finished the current extension round.
    pub done: bool,
    /// Partial match length reached in a failed round.
    pub curr_ext_len: usize,
    /// Successfully aligned to the (possibly merged) consensus.
    pub aligned: bool,
    /// Indices into the family SNP registry.
    pub snps: Vec<usize>,
}

impl Default for SeedExt {
    fn default() -> Self {
        SeedExt {
            orig_pos: (0, 0),
            pos: (0, 0),
            consensus_pos: (0, 0),
            bound: (0, 0),
            left_gaps: Vec::new(),
            right_gaps: Vec::new(),
            ed: 0,
            total_ed: 0,
            done: false,
            curr_ext_len: 0,
            aligned: true,
            snps: Vec::new(),
        }
    }
}

impl SeedExt {
    pub fn reset(&mut self) {
        *self = SeedExt::default();
    }

    pub fn len(&self) -> u64 {
        self.pos.1 - self.pos.0
    }

    pub fn is_empty(&self) -> bool {
        self.pos.0 == self.pos.1
    }

    pub fn valid(&self) -> bool {
        self.pos.0 < self.pos.1
            && self.bound.0 <= self.pos.0
            && self.pos.1 <= self.bound.1
    }

    /// Genomic length of the accumulated left extension.
    pub fn left_ext_len(&self) -> usize {
        (self.orig_pos.0 - self.pos.0) as usize
    }

    /// Genomic length of the accumulated right extension.
    pub fn right_ext_len(&self) -> usize {
        (self.pos.1 - self.orig_pos.1) as usize
    }

    /// Genomic range this instance would span if it covered the whole
    /// consensus, extrapolated from its current consensus interval.
    pub fn extended_range(&self, consensus_len: usize) -> (u64, u64) {
        let left = self.pos.0.saturating_sub(self.consensus_pos.0 as u64);
        let right = self.pos.1 + (consensus_len - self.consensus_pos.1) as u64;
        (left, right)
    }

    /// Instances grouped into one allele share the same consensus interval.
    pub fn same_consensus(a: &SeedExt, b: &SeedExt) -> bool {
        a.consensus_pos == b.consensus_pos
    }

    /// ...and the same variant set.
    pub fn same_snps(a: &SeedExt, b: &SeedExt) -> bool {
        a.snps == b.snps
    }

    /// Reconstruct the consensus-aligned sequence of this instance, with
    /// '-' marking deletions against the consensus. The result has the same
    /// length as the consensus interval this instance covers.
    pub fn extended_seed_sequence(&self, genome: &Genome) -> String {
        let mut seq = String::new();

        // Left of the original seed, walking the gap list outward
        let mut prev_end = self.orig_pos.0;
        for &(off, gap_len) in &self.left_gaps {
            let mut curr_end = self.orig_pos.0 - off as u64;
            debug_assert!(curr_end <= prev_end);
            if curr_end < prev_end {
                seq = genome.get_string(curr_end, prev_end - curr_end) + &seq;
            }
            debug_assert!(gap_len != 0);
            if gap_len > 0 {
                // deletion in the instance
                seq = "-".repeat(gap_len as usize) + &seq;
            } else {
                curr_end = (curr_end as i64 + gap_len) as u64;
            }
            prev_end = curr_end;
        }
        debug_assert!(self.pos.0 <= prev_end);
        if self.pos.0 < prev_end {
            seq = genome.get_string(self.pos.0, prev_end - self.pos.0) + &seq;
        }

        // The original seed itself
        if self.orig_pos.1 > self.orig_pos.0 {
            seq += &genome.get_string(self.orig_pos.0, self.orig_pos.1 - self.orig_pos.0);
        }

        // Right of the original seed
        let mut prev_begin = self.orig_pos.1;
        for &(off, gap_len) in &self.right_gaps {
            let mut curr_begin = self.orig_pos.1 + off as u64;
            debug_assert!(prev_begin <= curr_begin);
            if prev_begin < curr_begin {
                seq += &genome.get_string(prev_begin, curr_begin - prev_begin);
            }
            debug_assert!(gap_len != 0);
            if gap_len > 0 {
                seq += &"-".repeat(gap_len as usize);
            } else {
                curr_begin = (curr_begin as i64 - gap_len) as u64;
            }
            prev_begin = curr_begin;
        }
        debug_assert!(prev_begin <= self.pos.1);
        if prev_begin < self.pos.1 {
            seq += &genome.get_string(prev_begin, self.pos.1 - prev_begin);
        }

        seq
    }

    /// Partition the instance into consensus-aligned segments along its gap
    /// list and emit one variant per differing base or recorded indel,
    /// deduplicated through the family registry.
    pub fn generate_snps(
        &mut self,
        genome: &Genome,
        consensus: &str,
        registry: &mut Vec<SeedSnp>,
    ) {
        // Merge left/right gap lists into instance-relative offsets
        let mut gaps: Vec<(usize, i64)> = Vec::new();
        {
            let left_ext = self.left_ext_len();
            for &(off, gap_len) in &self.left_gaps {
                let merged = (left_ext as i64 - off as i64 + gap_len) as usize;
                gaps.push((merged, gap_len));
            }
            let right_base = (self.orig_pos.1 - self.pos.0) as usize;
            for &(off, gap_len) in &self.right_gaps {
                gaps.push((right_base + off, gap_len));
            }
            gaps.sort_unstable();
        }

        let consensus_b = consensus.as_bytes();
        let mut prev_con_pos = self.consensus_pos.0;
        let mut prev_seq_pos = self.pos.0;

        for &(off, gap_len) in &gaps {
            let curr_seq_pos = self.pos.0 + off as u64;
            let curr_con_pos = prev_con_pos + (curr_seq_pos - prev_seq_pos) as usize;

            let seq_read = genome.get_string(prev_seq_pos, curr_seq_pos - prev_seq_pos);
            for (l, rb) in seq_read.bytes().enumerate() {
                if rb != consensus_b[prev_con_pos + l] {
                    let snp = SeedSnp::new(
                        SnpType::Single,
                        prev_con_pos + l,
                        1,
                        (rb as char).to_string(),
                    );
                    self.snps.push(lookup_add_snp(registry, snp));
                }
            }

            debug_assert!(gap_len != 0);
            if gap_len > 0 {
                // deletion: consensus bases absent from the instance
                let snp = SeedSnp::new(
                    SnpType::Deletion,
                    curr_con_pos,
                    gap_len as usize,
                    consensus[curr_con_pos..curr_con_pos + gap_len as usize].to_string(),
                );
                self.snps.push(lookup_add_snp(registry, snp));
                prev_con_pos = curr_con_pos + gap_len as usize;
                prev_seq_pos = curr_seq_pos;
            } else {
                // insertion: instance bases absent from the consensus
                let ins_len = (-gap_len) as u64;
                let snp = SeedSnp::new(
                    SnpType::Insertion,
                    curr_con_pos,
                    ins_len as usize,
                    genome.get_string(curr_seq_pos, ins_len),
                );
                self.snps.push(lookup_add_snp(registry, snp));
                prev_con_pos = curr_con_pos;
                prev_seq_pos = curr_seq_pos + ins_len;
            }
        }

        debug_assert_eq!(
            self.consensus_pos.1 - prev_con_pos,
            (self.pos.1 - prev_seq_pos) as usize
        );
        let seq_read = genome.get_string(prev_seq_pos, self.pos.1 - prev_seq_pos);
        for (l, rb) in seq_read.bytes().enumerate() {
            if rb != consensus_b[prev_con_pos + l] {
                let snp = SeedSnp::new(
                    SnpType::Single,
                    prev_con_pos + l,
                    1,
                    (rb as char).to_string(),
                );
                self.snps.push(lookup_add_snp(registry, snp));
            }
        }
    }
}

/// Extension ordering: longest first, then leftmost.
pub fn seed_cmp(a: &SeedExt, b: &SeedExt) -> std::cmp::Ordering {
    b.len()
        .cmp(&a.len())
        .then(a.pos.0.cmp(&b.pos.0))
        .then(a.pos.1.cmp(&b.pos.1))
}
