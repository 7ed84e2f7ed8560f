use std::io::Write;

use crate::genome::Genome;
use crate::params::ConsensusStrategy;
use crate::repeat::kmer_align::{
    align_offsets, align_with_one_gap, build_kmer_table, is_self_repeat, OffsetAlignment,
    MERGE_K, RESCUE_K,
};
use crate::repeat::seed::{seed_cmp, SeedExt, SeedSnp};
use crate::repeat::subsa::{RepeatBase, SubSA};
use crate::repeat::RepeatParameter;

/// Containment tolerance when comparing allele ranges between families.
pub const RANGE_RELAX: u64 = 5;
/// An instance covering at least this share of the consensus represents it.
const REPRESENTATIVE_PORTION: f32 = 0.95;
/// Per-round extension cap for the majority-vote strategy.
const DEFAULT_MAX_EXT_LEN: usize = 100;
/// Maximum single-gap size attempted when rescuing a failed extension.
const MAX_RESCUE_GAP: usize = 10;

/// One allele's genomic interval, sorted for overlap queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AlleleCoord {
    pub left: u64,
    pub right: u64,
    pub idx: usize,
}

impl AlleleCoord {
    pub fn len(&self) -> u64 {
        self.right - self.left
    }

    pub fn contain(&self, o: &AlleleCoord, relax: u64) -> bool {
        self.left <= o.left + relax && o.right <= self.right + relax
    }

    pub fn overlap_len(&self, o: &AlleleCoord) -> u64 {
        let left = self.left.max(o.left);
        let right = self.right.min(o.right);
        right.saturating_sub(left)
    }
}

/// A repeat family: consensus sequence, member instances, allele ranges,
/// and the deduplicated variant registry.
pub struct RepeatFamily {
    pub repeat_id: usize,
    pub consensus: String,
    pub seeds: Vec<SeedExt>,
    pub seed_ranges: Vec<AlleleCoord>,
    pub self_repeat: bool,
    pub snps: Vec<SeedSnp>,
}

impl RepeatFamily {
    pub fn new(repeat_id: usize) -> Self {
        RepeatFamily {
            repeat_id,
            consensus: String::new(),
            seeds: Vec::new(),
            seed_ranges: Vec::new(),
            self_repeat: false,
            snps: Vec::new(),
        }
    }

    /// Seed the family from one bundled cluster: one instance per
    /// suffix-array hit, forward-extended over the consensus established by
    /// bundling, then deduplicated by containment.
    pub fn init(
        &mut self,
        rp: &RepeatParameter,
        genome: &Genome,
        subsa: &SubSA,
        base: &RepeatBase,
    ) {
        self.consensus = base.seq.clone();
        debug_assert_eq!(self.consensus.len(), rp.seed_len + base.nodes.len() - 1);
        let consensus_b = self.consensus.as_bytes().to_vec();

        let seed_len = subsa.seed_len() as u64;
        let mut positions: Vec<u64> = Vec::new();
        let mut next_positions: Vec<u64> = Vec::new();

        self.seeds.clear();
        for (n, &cluster) in base.nodes.iter().enumerate() {
            next_positions.clear();
            for &left in subsa.cluster_positions(cluster) {
                next_positions.push(left);

                // A hit one base right of a previous node's hit is the same
                // instance walking the bundle; skip the duplicate.
                if left > 0 && positions.binary_search(&(left - 1)).is_ok() {
                    continue;
                }

                let mut seed = SeedExt {
                    orig_pos: (left, left + seed_len),
                    pos: (left, left + seed_len),
                    consensus_pos: (n, n + subsa.seed_len()),
                    bound: (genome.coords.get_start(left), genome.coords.get_end(left)),
                    ..SeedExt::default()
                };

                // Extend forward over consensus already established by bundling
                for p in seed.consensus_pos.1..consensus_b.len() {
                    let pos = seed.pos.1;
                    if pos >= seed.bound.1 {
                        break;
                    }
                    if b"ACGT"[genome.get_base(pos) as usize] != consensus_b[p] {
                        break;
                    }
                    seed.pos.1 += 1;
                    seed.consensus_pos.1 += 1;
                }

                self.seeds.push(seed);
            }
            std::mem::swap(&mut positions, &mut next_positions);
            positions.sort_unstable();
        }

        self.internal_update();
    }

    /// Sort instances, rebuild allele ranges, and remove any instance whose
    /// extent is contained in another's. After this, extents are pairwise
    /// disjoint-or-distinct: no two instances share an identical extent.
    pub fn internal_update(&mut self) {
        self.seeds.sort_by(seed_cmp);

        self.seed_ranges.clear();
        for (i, seed) in self.seeds.iter().enumerate() {
            self.seed_ranges.push(AlleleCoord {
                left: seed.pos.0,
                right: seed.pos.1,
                idx: i,
            });
        }
        self.seed_ranges.sort_unstable();

        let mut removed = vec![false; self.seed_ranges.len()];
        let mut remove_count = 0usize;
        for i in 0..self.seed_ranges.len() {
            if removed[i] {
                continue;
            }
            let range = self.seed_ranges[i];
            for j in i + 1..self.seed_ranges.len() {
                if removed[j] {
                    continue;
                }
                let range2 = self.seed_ranges[j];
                if range.right <= range2.left {
                    break;
                }
                if range.right >= range2.right {
                    removed[j] = true;
                    remove_count += 1;
                }
            }
        }

        if remove_count == 0 {
            return;
        }

        for (j, &gone) in removed.iter().enumerate() {
            if gone {
                self.seeds[self.seed_ranges[j].idx].reset();
            }
        }
        self.seeds.sort_by(seed_cmp);
        self.seeds.truncate(self.seeds.len() - remove_count);

        self.seed_ranges.clear();
        for (i, seed) in self.seeds.iter().enumerate() {
            self.seed_ranges.push(AlleleCoord {
                left: seed.pos.0,
                right: seed.pos.1,
                idx: i,
            });
        }
        self.seed_ranges.sort_unstable();
    }

    /// Is [left, right) contained in one of this family's allele ranges?
    pub fn contain(&self, left: u64, right: u64) -> bool {
        let mut l = 0usize;
        let mut r = self.seed_ranges.len();
        while l < r {
            let m = (l + r) / 2;
            let coord = self.seed_ranges[m];
            if right <= coord.left {
                r = m;
            } else if left >= coord.right {
                l = m + 1;
            } else {
                return coord.left <= left && right <= coord.right;
            }
        }
        false
    }

    fn update_self_repeat(&mut self) {
        self.self_repeat = false;
        for i in 0..self.seed_ranges.len() {
            let range = self.seed_ranges[i];
            for j in i + 1..self.seed_ranges.len() {
                let range2 = self.seed_ranges[j];
                if range.right <= range2.left {
                    break;
                }
                self.self_repeat = true;
            }
        }
    }

    /// Grow the consensus outward until fewer than `repeat_count` instances
    /// can follow within the edit budget, or the length cap is reached.
    /// The consensus length never decreases.
    pub fn extend_consensus(&mut self, rp: &RepeatParameter, genome: &Genome) {
        match rp.strategy {
            ConsensusStrategy::MajorityVote => self.extend_consensus_majority(rp, genome),
            ConsensusStrategy::PhasedProfile => self.extend_consensus_phased(rp, genome),
        }

        self.internal_update();
        self.update_self_repeat();
    }

    /// Alternating-direction extension: push left until it stalls, then
    /// right over the full instance set, per-round edit budget `max_edit`.
    fn extend_consensus_majority(&mut self, rp: &RepeatParameter, genome: &Genome) {
        let seed_mm = rp.max_edit;
        let empty_consensuses = vec![String::new(); seed_mm + 1];
        let mut consensuses: Vec<String> = Vec::new();
        let mut ed_seed_nums: Vec<usize> = Vec::new();
        let mut remain = self.seeds.len();
        let mut survivors = self.seeds.len();
        let mut left = true;

        while remain >= rp.repeat_count {
            for seed in &mut self.seeds[..remain] {
                seed.done = false;
                seed.curr_ext_len = 0;
            }

            let max_ext_len =
                DEFAULT_MAX_EXT_LEN.min(rp.max_repeat_len.saturating_sub(self.consensus.len()));
            get_consensus_seq_majority(
                genome,
                &mut self.seeds,
                0,
                remain,
                if left { max_ext_len } else { 0 },
                if left { 0 } else { max_ext_len },
                seed_mm,
                rp,
                &mut ed_seed_nums,
                &mut consensuses,
            );

            let mut allowed_seed_mm = 0usize;
            let mut ext_consensus = String::new();
            for i in (0..=seed_mm).rev() {
                let extlen = if ed_seed_nums[i] < rp.repeat_count {
                    0
                } else {
                    consensuses[i].len()
                };
                if extlen == 0 || extlen < max_ext_len * i / seed_mm.max(1) {
                    continue;
                }
                if i > 0 && consensuses[i].len() <= consensuses[i - 1].len() + 5 {
                    continue;
                }
                ext_consensus = consensuses[i].clone();
                allowed_seed_mm = i;
                break;
            }

            let mut num_passed = 0usize;
            if !ext_consensus.is_empty() {
                if left {
                    let reversed: String = ext_consensus.chars().rev().collect();
                    self.consensus = reversed + &self.consensus;
                } else {
                    self.consensus += &ext_consensus;
                }

                calc_edit_dist(
                    genome,
                    &mut self.seeds,
                    0,
                    remain,
                    if left { &consensuses } else { &empty_consensuses },
                    if left { &empty_consensuses } else { &consensuses },
                    allowed_seed_mm,
                );

                let ext_len = ext_consensus.len();
                let total = self.seeds.len();
                for (i, seed) in self.seeds.iter_mut().enumerate() {
                    debug_assert!(i < total);
                    if i < remain {
                        if seed.ed <= allowed_seed_mm {
                            num_passed += 1;
                            seed.done = true;
                            seed.total_ed += seed.ed;
                            if left {
                                if let Some(&(off, gap_len)) = seed.left_gaps.last() {
                                    if off >= (seed.orig_pos.0 - seed.pos.0) as usize {
                                        seed.pos.0 = (seed.pos.0 as i64 + gap_len) as u64;
                                    }
                                }
                                seed.pos.0 -= ext_len as u64;
                                seed.consensus_pos.0 = 0;
                                seed.consensus_pos.1 = self.consensus.len();
                            } else {
                                if let Some(&(off, gap_len)) = seed.right_gaps.last() {
                                    if off >= (seed.pos.1 - seed.orig_pos.1) as usize {
                                        seed.pos.1 = (seed.pos.1 as i64 - gap_len) as u64;
                                    }
                                }
                                seed.pos.1 += ext_len as u64;
                                seed.consensus_pos.1 = self.consensus.len();
                            }
                        } else if left {
                            let adjust = ext_len - seed.curr_ext_len;
                            seed.consensus_pos.0 += adjust;
                            seed.consensus_pos.1 += ext_len;
                            debug_assert!(seed.curr_ext_len as u64 <= seed.pos.0);
                            seed.pos.0 -= seed.curr_ext_len as u64;
                        } else {
                            seed.consensus_pos.1 += seed.curr_ext_len;
                            seed.pos.1 += seed.curr_ext_len as u64;
                        }
                    } else if left {
                        seed.consensus_pos.0 += ext_len;
                        seed.consensus_pos.1 += ext_len;
                    }
                }

                // move passed instances to the front for the next round
                self.seeds[..remain].sort_by_key(|s| !s.done);
                survivors = num_passed;
            }

            remain = num_passed;
            if remain < rp.repeat_count && left {
                left = false;
                remain = self.seeds.len();
                survivors = self.seeds.len();
            }
        }

        // Instances that fell out of the last productive round are left
        // un-done so the caller can split them into a fresh family.
        for (i, seed) in self.seeds.iter_mut().enumerate() {
            seed.done = i < survivors;
        }
    }

    /// Symmetric single-round extension selecting the most common joint
    /// left+right extension string, edit budget 1.
    fn extend_consensus_phased(&mut self, rp: &RepeatParameter, genome: &Genome) {
        let seed_mm = 1usize;
        let remain = self.seeds.len();
        if remain < rp.repeat_count {
            return;
        }

        for seed in &mut self.seeds {
            seed.done = false;
            seed.curr_ext_len = 0;
        }

        let default_max = (rp.max_repeat_len.saturating_sub(rp.seed_len)) / 2;
        let max_ext_len =
            default_max.min(rp.max_repeat_len.saturating_sub(self.consensus.len()));
        if max_ext_len == 0 {
            return;
        }

        let mut ed_seed_nums: Vec<usize> = Vec::new();
        let mut left_consensuses: Vec<String> = Vec::new();
        let mut right_consensuses: Vec<String> = Vec::new();
        get_consensus_seq_phased(
            genome,
            &mut self.seeds,
            0,
            remain,
            max_ext_len,
            max_ext_len,
            seed_mm,
            rp,
            &mut ed_seed_nums,
            &mut left_consensuses,
            &mut right_consensuses,
        );

        // Only the exact (edit distance 0) level extends in this strategy
        let allowed_seed_mm = 0usize;
        if ed_seed_nums[allowed_seed_mm] < rp.repeat_count {
            return;
        }
        let left_ext = left_consensuses[allowed_seed_mm].clone();
        let right_ext = right_consensuses[allowed_seed_mm].clone();
        if left_ext.is_empty() || right_ext.is_empty() {
            return;
        }

        let reversed: String = left_ext.chars().rev().collect();
        self.consensus = reversed + &self.consensus + &right_ext;

        for (i, seed) in self.seeds.iter_mut().enumerate() {
            if i >= remain || seed.ed > allowed_seed_mm {
                continue;
            }
            seed.done = true;
            seed.total_ed += seed.ed;
            seed.pos.0 -= left_ext.len() as u64;
            seed.pos.1 += right_ext.len() as u64;
            seed.consensus_pos.0 = 0;
            seed.consensus_pos.1 = self.consensus.len();

            if let Some(&(off, gap_len)) = seed.left_gaps.last() {
                if off >= (seed.orig_pos.0 - seed.pos.0) as usize {
                    seed.pos.0 = (seed.pos.0 as i64 + gap_len) as u64;
                }
            }
            if let Some(&(off, gap_len)) = seed.right_gaps.last() {
                if off >= (seed.pos.1 - seed.orig_pos.1) as usize {
                    seed.pos.1 = (seed.pos.1 as i64 - gap_len) as u64;
                }
            }
        }
        self.seeds[..remain].sort_by_key(|s| !s.done);
    }


    /// Split instances that failed the last round into a fresh family,
    /// re-seeded from their original unextended positions. How a cluster
    /// carrying two distinct motifs gets unstuck.
    pub fn get_next_repeat(&mut self, genome: &Genome, o: &mut RepeatFamily) {
        o.consensus.clear();
        o.seeds.clear();
        o.seed_ranges.clear();
        o.snps.clear();
        o.self_repeat = false;

        if self.seeds.iter().all(|s| s.done) {
            return;
        }

        let moved: Vec<SeedExt> = self.seeds.iter().filter(|s| !s.done).cloned().collect();
        self.seeds.retain(|s| s.done);
        o.seeds = moved;
        self.internal_update();

        debug_assert!(!o.seeds.is_empty());
        let first = &o.seeds[0];
        o.consensus = genome.get_string(first.orig_pos.0, first.orig_pos.1 - first.orig_pos.0);
        for seed in &mut o.seeds {
            seed.pos = seed.orig_pos;
            seed.consensus_pos = (0, (seed.orig_pos.1 - seed.orig_pos.0) as usize);
            seed.left_gaps.clear();
            seed.right_gaps.clear();
            seed.ed = 0;
            seed.total_ed = 0;
        }
        o.internal_update();
    }

    /// Do this family's allele ranges overlap `o`'s? Returns
    /// `(contain, left, seed_i, seed_j)` on overlap: whether one family's
    /// representative extent contains the other's, which family sits
    /// leftmost, and the instance pair that met.
    pub fn overlap(&self, o: &RepeatFamily) -> Option<(bool, bool, usize, usize)> {
        let mut p = 0usize;
        let mut p2 = 0usize;
        while p < self.seed_ranges.len() && p2 < o.seed_ranges.len() {
            let range = self.seed_ranges[p];
            let seed = &self.seeds[range.idx];
            let ex = seed.extended_range(self.consensus.len());
            let ex_range = AlleleCoord {
                left: ex.0,
                right: ex.1,
                idx: p,
            };
            let representative =
                range.len() as f32 >= self.consensus.len() as f32 * REPRESENTATIVE_PORTION;

            let range2 = o.seed_ranges[p2];
            let seed2 = &o.seeds[range2.idx];
            let ex2 = seed2.extended_range(o.consensus.len());
            let ex_range2 = AlleleCoord {
                left: ex2.0,
                right: ex2.1,
                idx: p2,
            };
            let representative2 =
                range2.len() as f32 >= o.consensus.len() as f32 * REPRESENTATIVE_PORTION;

            let seed_i = range.idx;
            let seed_j = range2.idx;

            if representative && representative2 {
                if ex_range.overlap_len(&ex_range2) > 0 {
                    if ex_range.contain(&ex_range2, RANGE_RELAX) {
                        return Some((true, true, seed_i, seed_j));
                    } else if ex_range2.contain(&ex_range, RANGE_RELAX) {
                        return Some((true, false, seed_i, seed_j));
                    }
                    return Some((false, ex_range.left <= ex_range2.left, seed_i, seed_j));
                }
            } else if representative {
                if range2.contain(&ex_range, RANGE_RELAX) {
                    return Some((true, false, seed_i, seed_j));
                }
            } else if representative2 && range.contain(&ex_range2, RANGE_RELAX) {
                return Some((true, true, seed_i, seed_j));
            }

            if range.right <= range2.right {
                p += 1;
            }
            if range2.right <= range.right {
                p2 += 1;
            }
        }
        None
    }

    /// Fraction of the smaller family's allele bases covered by overlap.
    pub fn mergeable(&self, o: &RepeatFamily) -> f32 {
        let ranges = &self.seed_ranges;
        let ranges2 = &o.seed_ranges;
        let mut num_overlap_bp = 0u64;
        let mut p = 0usize;
        let mut p2 = 0usize;
        while p < ranges.len() && p2 < ranges2.len() {
            num_overlap_bp += ranges[p].overlap_len(&ranges2[p2]);
            if ranges[p].right <= ranges2[p2].right {
                p += 1;
            } else {
                p2 += 1;
            }
        }
        let total: u64 = ranges.iter().map(AlleleCoord::len).sum();
        let total2: u64 = ranges2.iter().map(AlleleCoord::len).sum();
        num_overlap_bp as f32 / total.min(total2).max(1) as f32
    }

    /// Merge `o` into this family: align the two consensuses at the overlap
    /// point, concatenate, and re-align every instance from both families
    /// against the merged consensus. Rejected (state rolled back) when the
    /// merged consensus is itself a self repeat.
    pub fn merge(
        &mut self,
        _rp: &RepeatParameter,
        genome: &Genome,
        o: &RepeatFamily,
        contain: bool,
        seed_i: usize,
        seed_j: usize,
    ) -> bool {
        let prev_consensus = self.consensus.clone();

        let consensus_add_len: i64;
        {
            debug_assert!(seed_i < self.seeds.len() && seed_j < o.seeds.len());
            let range = self.seeds[seed_i].extended_range(self.consensus.len());
            let orange = o.seeds[seed_j].extended_range(o.consensus.len());
            debug_assert!(range.0 <= orange.0 + 10);

            consensus_add_len = orange.0 as i64 - range.0 as i64;
            if !contain {
                if range.1 <= orange.0 {
                    log::warn!(
                        "merge ranges out of order: {}-{} vs {}-{}",
                        range.0,
                        range.1,
                        orange.0,
                        orange.1
                    );
                    return false;
                }
                let covered = (range.1 - orange.0) as usize;
                if covered < o.consensus.len() {
                    self.consensus += &o.consensus[covered..];
                }
            }
        }

        // pair up allele ranges from both families
        const NONE: usize = usize::MAX;
        let mut merge_list: Vec<(usize, usize)> = Vec::new();
        let mut p = 0usize;
        let mut p2 = 0usize;
        while p < self.seed_ranges.len() && p2 < o.seed_ranges.len() {
            let range = self.seed_ranges[p];
            let range2 = o.seed_ranges[p2];
            if range.contain(&range2, RANGE_RELAX) || range2.contain(&range, RANGE_RELAX) {
                merge_list.push((p, p2));
            } else {
                let stored = merge_list.last().is_some_and(|m| m.0 == p);
                let stored2 = merge_list.last().is_some_and(|m| m.1 == p2);
                if range.overlap_len(&range2) > 0 {
                    if !stored && !stored2 {
                        merge_list.push((p, p2));
                    }
                } else if range2.right <= range.left {
                    if !stored2 {
                        merge_list.push((NONE, p2));
                    }
                } else if !stored {
                    merge_list.push((p, NONE));
                }
            }
            if range.right <= range2.right {
                p += 1;
            }
            if range2.right <= range.right {
                p2 += 1;
            }
        }
        while p < self.seed_ranges.len() {
            if !merge_list.last().is_some_and(|m| m.0 == p) {
                merge_list.push((p, NONE));
            }
            p += 1;
        }
        while p2 < o.seed_ranges.len() {
            if !merge_list.last().is_some_and(|m| m.1 == p2) {
                merge_list.push((NONE, p2));
            }
            p2 += 1;
        }
        debug_assert!(!merge_list.is_empty());

        let kmer_table = build_kmer_table(&self.consensus, MERGE_K);
        if is_self_repeat(&self.consensus, &kmer_table, MERGE_K) {
            self.consensus = prev_consensus;
            return false;
        }

        for &(mp, mp2) in &merge_list {
            let seed_id = if mp != NONE {
                self.seed_ranges[mp].idx
            } else {
                NONE
            };
            let oseed_id = if mp2 != NONE { o.seed_ranges[mp2].idx } else { NONE };

            if seed_id != NONE {
                if oseed_id == NONE {
                    continue;
                }
                if self.seed_ranges[mp].contain(&o.seed_ranges[mp2], 0) {
                    continue;
                }
            }

            let seed = if seed_id != NONE { Some(&self.seeds[seed_id]) } else { None };
            let oseed = if oseed_id != NONE { Some(&o.seeds[oseed_id]) } else { None };
            debug_assert!(seed.is_some() || oseed.is_some());

            let mut left = seed.map_or(u64::MAX, |s| s.pos.0);
            let mut right = seed.map_or(0, |s| s.pos.1);
            let mut approx_left = seed.map_or(i64::MAX, |s| s.consensus_pos.0 as i64);
            let mut approx_right = seed.map_or(0, |s| s.consensus_pos.1 as i64);
            if let Some(os) = oseed {
                left = left.min(os.pos.0);
                right = right.max(os.pos.1);
                approx_left = approx_left.min(os.consensus_pos.0 as i64 + consensus_add_len);
                approx_right = approx_right.max(os.consensus_pos.1 as i64 + consensus_add_len);
            }

            let query = genome.get_string(left, right - left);
            let target = if seed_id != NONE {
                seed_id
            } else {
                self.seeds.push(SeedExt::default());
                self.seeds.len() - 1
            };

            let aln = align_offsets(
                &self.consensus,
                &kmer_table,
                &query,
                approx_left,
                approx_right,
                MERGE_K,
            );
            let consensus_len = self.consensus.len();
            apply_offset_alignment(genome, &mut self.seeds[target], left, right, consensus_len, aln);
        }

        // eliminate newly contained duplicates, re-aligning survivors over
        // the union range, until stable
        loop {
            self.internal_update();

            let mut remove_count = 0usize;
            let mut i = 0usize;
            while i + 1 < self.seed_ranges.len() {
                let mut j = i + 1;
                while j < self.seed_ranges.len() {
                    let range = self.seed_ranges[i];
                    let range2 = self.seed_ranges[j];
                    if range.right <= range2.left {
                        break;
                    }

                    let union_left = range.left;
                    let union_right = range2.right.max(range.right);
                    let query = genome.get_string(union_left, union_right - union_left);
                    let idx = range.idx;
                    let approx_left = self.seeds[idx].consensus_pos.0 as i64;
                    let approx_right = self.seeds[range2.idx].consensus_pos.1 as i64;
                    let aln = align_offsets(
                        &self.consensus,
                        &kmer_table,
                        &query,
                        approx_left,
                        approx_right,
                        MERGE_K,
                    );
                    let consensus_len = self.consensus.len();
                    apply_offset_alignment(
                        genome,
                        &mut self.seeds[idx],
                        union_left,
                        union_right,
                        consensus_len,
                        aln,
                    );

                    self.seed_ranges[i].left = self.seeds[idx].pos.0;
                    self.seed_ranges[i].right = self.seeds[idx].pos.1;
                    self.seeds[range2.idx].reset();
                    remove_count += 1;
                    j += 1;
                }
                i = j;
            }

            if remove_count == 0 {
                break;
            }
            self.seeds.sort_by(seed_cmp);
            self.seeds.truncate(self.seeds.len() - remove_count);
        }

        true
    }

    /// Emit per-instance variants into the family registry.
    ///
    /// An instance qualifies only when its consensus interval reconciles
    /// with its genomic span through its gap list; instances left with a
    /// full-consensus claim but a fragment-clipped extent are skipped.
    pub fn generate_snps(&mut self, rp: &RepeatParameter, genome: &Genome) {
        let consensus = std::mem::take(&mut self.consensus);
        for seed in &mut self.seeds {
            if !seed.aligned {
                continue;
            }
            if (seed.len() as usize) < rp.min_repeat_len {
                continue;
            }
            let net_gap: i64 = seed
                .left_gaps
                .iter()
                .chain(seed.right_gaps.iter())
                .map(|&(_, g)| g)
                .sum();
            let con_span = (seed.consensus_pos.1 - seed.consensus_pos.0) as i64;
            if con_span != seed.len() as i64 + net_gap {
                continue;
            }
            seed.generate_snps(genome, &consensus, &mut self.snps);
        }
        self.consensus = consensus;
    }

    /// Output criteria: long enough consensus and enough qualifying alleles.
    pub fn satisfy(&self, rp: &RepeatParameter) -> bool {
        self.consensus.len() >= rp.min_repeat_len
            && self
                .seeds
                .iter()
                .filter(|s| s.len() as usize >= rp.min_repeat_len)
                .count()
                >= rp.repeat_count
    }

    /// Human-readable per-instance extension dump (audit artifact).
    pub fn save_seed_extension<W: Write>(
        &self,
        rp: &RepeatParameter,
        genome: &Genome,
        fp: &mut W,
        total_repeat_seq_len: &mut usize,
        total_allele_seq_len: &mut usize,
    ) -> std::io::Result<()> {
        const MAX_SHOW_SEQ_LEN: usize = 700;

        let mut total_count = 0usize;
        for (i, seed) in self.seeds.iter().enumerate() {
            let ext_len = seed.len() as usize;
            if ext_len < rp.min_repeat_len {
                continue;
            }
            *total_allele_seq_len += ext_len;
            total_count += 1;
            let sense = seed.pos.0 < genome.forward_length;

            write!(
                fp,
                "{:6}  {:5}  {:4}  {:4}  {}  {:10}  {:10}  {:10}  {:10}",
                self.repeat_id,
                self.seeds.len(),
                i,
                ext_len,
                if sense { '+' } else { '-' },
                seed.pos.0,
                seed.pos.1,
                seed.orig_pos.0,
                seed.orig_pos.1
            )?;

            let joined = if sense {
                seed.pos.0
            } else {
                genome.len() - seed.pos.0 - seed.len()
            };
            if let Some((chr, off)) = genome.coords.get_genome_coord(joined) {
                write!(fp, "  {chr}:{off}")?;
            }

            if !seed.aligned {
                writeln!(fp)?;
                continue;
            }

            let mut deststr = seed.extended_seed_sequence(genome);
            // pad with exterior sequence to consensus length for display
            if seed.consensus_pos.0 > 0 {
                let want = seed.consensus_pos.0 as u64;
                let have = seed.pos.0.min(want);
                let mut prefix = genome.get_string(seed.pos.0 - have, have);
                if have < want {
                    prefix = "N".repeat((want - have) as usize) + &prefix;
                }
                deststr = prefix + &deststr;
            }
            if seed.consensus_pos.1 < self.consensus.len() {
                let want = (self.consensus.len() - seed.consensus_pos.1) as u64;
                let avail = want.min(genome.len() - seed.pos.1);
                deststr += &genome.get_string(seed.pos.1, avail);
                if avail < want {
                    deststr += &"N".repeat((want - avail) as usize);
                }
            }

            let show = deststr.len().min(MAX_SHOW_SEQ_LEN);
            write!(fp, "  {}", &deststr[..show])?;
            writeln!(fp)?;
        }

        if total_count > 0 {
            writeln!(fp, "{total_count:5}")?;
            writeln!(fp)?;
        }
        *total_repeat_seq_len += self.consensus.len();
        Ok(())
    }
}

/// Majority-vote consensus calling for one direction.
///
/// Instances are first clustered by pairwise edit distance over the
/// prospective extension region; the largest cluster votes per column.
/// `consensuses[e]` accumulates the extension usable at edit level `e`;
/// each instance's running mismatch count lands in its `ed`.
#[allow(clippy::too_many_arguments)]
fn get_consensus_seq_majority(
    genome: &Genome,
    seeds: &mut [SeedExt],
    sb: usize,
    se: usize,
    min_left_ext: usize,
    min_right_ext: usize,
    max_ed: usize,
    rp: &RepeatParameter,
    ed_seed_nums: &mut Vec<usize>,
    consensuses: &mut Vec<String>,
) {
    debug_assert!(sb < se && se <= seeds.len());
    consensuses.clear();
    consensuses.resize(max_ed + 1, String::new());
    ed_seed_nums.clear();
    ed_seed_nums.resize(max_ed + 1, 0);

    // cluster instances by pairwise edit distance
    let n = se - sb;
    let mut belongto: Vec<usize> = (0..n).collect();
    for i in 0..n.saturating_sub(1) {
        for j in i + 1..n {
            if belongto[j] != j {
                continue;
            }
            let ed = calc_edit_dist_pair(
                genome,
                &seeds[sb + i],
                &seeds[sb + j],
                min_left_ext,
                min_right_ext,
                max_ed + 1,
            );
            if ed <= max_ed + 1 {
                belongto[j] = belongto[i];
            }
        }
    }

    let mut vote = vec![0usize; n];
    let mut max_group = 0usize;
    for &group in &belongto {
        vote[group] += 1;
        if group != max_group && vote[group] > vote[max_group] {
            max_group = group;
        }
    }
    let consensus_group: Vec<usize> = (0..n).filter(|&i| belongto[i] == max_group).collect();

    for seed in &mut seeds[sb..se] {
        seed.ed = 0;
    }
    let mut seed_ext_len = 0usize;
    while seed_ext_len < min_left_ext.max(min_right_ext) {
        // per-column base counts over the core cluster
        let mut l_count = [0usize; 4];
        let mut r_count = [0usize; 4];
        for &gi in &consensus_group {
            let seed = &seeds[sb + gi];
            if seed_ext_len < min_left_ext
                && seed.bound.0 + seed_ext_len as u64 + 1 <= seed.pos.0
            {
                let ch = genome.get_base(seed.pos.0 - seed_ext_len as u64 - 1);
                l_count[ch as usize] += 1;
            }
            if seed_ext_len < min_right_ext && seed.pos.1 + (seed_ext_len as u64) < seed.bound.1
            {
                let ch = genome.get_base(seed.pos.1 + seed_ext_len as u64);
                r_count[ch as usize] += 1;
            }
        }

        let left_ext_base = max_index(&l_count) as u8;
        let right_ext_base = max_index(&r_count) as u8;

        // estimate the post-extension edit distance of every instance
        let mut next_ed_seed_nums = vec![0usize; max_ed + 1];
        for seed in &seeds[sb..se] {
            let mut est_ed = seed.ed;
            if seed_ext_len < min_left_ext {
                if seed.bound.0 + seed_ext_len as u64 + 1 <= seed.pos.0 {
                    let ch = genome.get_base(seed.pos.0 - seed_ext_len as u64 - 1);
                    if ch != left_ext_base {
                        est_ed += 1;
                    }
                } else {
                    est_ed = max_ed + 1;
                }
            }
            if seed_ext_len < min_right_ext {
                if seed.pos.1 + (seed_ext_len as u64) < seed.bound.1 {
                    let ch = genome.get_base(seed.pos.1 + seed_ext_len as u64);
                    if ch != right_ext_base {
                        est_ed += 1;
                    }
                } else {
                    est_ed = max_ed + 1;
                }
            }
            if est_ed <= max_ed {
                next_ed_seed_nums[est_ed] += 1;
            }
        }

        for i in 1..next_ed_seed_nums.len() {
            next_ed_seed_nums[i] += next_ed_seed_nums[i - 1];
        }
        if next_ed_seed_nums[max_ed] < rp.repeat_count {
            break;
        }

        // commit the column
        for seed in &mut seeds[sb..se] {
            if seed_ext_len < min_left_ext {
                if seed.bound.0 + seed_ext_len as u64 + 1 <= seed.pos.0 {
                    let ch = genome.get_base(seed.pos.0 - seed_ext_len as u64 - 1);
                    if ch != left_ext_base {
                        seed.ed += 1;
                    }
                } else {
                    seed.ed = max_ed + 1;
                }
            }
            if seed_ext_len < min_right_ext {
                if seed.pos.1 + (seed_ext_len as u64) < seed.bound.1 {
                    let ch = genome.get_base(seed.pos.1 + seed_ext_len as u64);
                    if ch != right_ext_base {
                        seed.ed += 1;
                    }
                } else {
                    seed.ed = max_ed + 1;
                }
            }
        }

        for (i, &num) in next_ed_seed_nums.iter().enumerate() {
            if num < rp.repeat_count {
                continue;
            }
            ed_seed_nums[i] = num;
            if seed_ext_len < min_left_ext {
                consensuses[i].push(b"ACGT"[left_ext_base as usize] as char);
            }
            if seed_ext_len < min_right_ext {
                consensuses[i].push(b"ACGT"[right_ext_base as usize] as char);
            }
        }

        seed_ext_len += 1;
    }
}

/// Phased-profile consensus calling: the most common joint left+right
/// extension string among instances drives both directions at once.
#[allow(clippy::too_many_arguments)]
fn get_consensus_seq_phased(
    genome: &Genome,
    seeds: &mut [SeedExt],
    sb: usize,
    se: usize,
    mut min_left_ext: usize,
    mut min_right_ext: usize,
    max_ed: usize,
    rp: &RepeatParameter,
    ed_seed_nums: &mut Vec<usize>,
    left_consensuses: &mut Vec<String>,
    right_consensuses: &mut Vec<String>,
) {
    debug_assert!(sb < se && se <= seeds.len());
    debug_assert_eq!(min_left_ext, min_right_ext);
    left_consensuses.clear();
    left_consensuses.resize(max_ed + 1, String::new());
    right_consensuses.clear();
    right_consensuses.resize(max_ed + 1, String::new());
    ed_seed_nums.clear();
    ed_seed_nums.resize(max_ed + 1, 0);

    // find the most common joint extension string, shrinking the window
    // until enough instances agree exactly
    let mut seqs: Vec<String> = Vec::new();
    let mut max_i = 0usize;
    let mut max_count = 0usize;
    while min_left_ext > 0 {
        seqs.clear();
        max_i = 0;
        max_count = 0;
        for seed in &seeds[sb..se] {
            if seed.bound.0 + min_left_ext as u64 > seed.pos.0
                || seed.pos.1 + min_right_ext as u64 > seed.bound.1
            {
                continue;
            }
            let mut s = genome.get_string(seed.pos.0 - min_left_ext as u64, min_left_ext as u64);
            s += &genome.get_string(seed.pos.1, min_right_ext as u64);
            seqs.push(s);
        }
        seqs.sort_unstable();
        let mut i = 0usize;
        while i + max_count < seqs.len() {
            let mut count = 1usize;
            while i + count < seqs.len() && seqs[i] == seqs[i + count] {
                count += 1;
            }
            if count >= max_count {
                max_count = count;
                max_i = i;
            }
            i += count;
        }
        if max_count >= rp.seed_count {
            break;
        }
        min_left_ext -= 1;
        min_right_ext -= 1;
    }

    if max_count < rp.seed_count {
        return;
    }

    let profile = seqs[max_i].as_bytes().to_vec();
    for seed in &mut seeds[sb..se] {
        seed.ed = 0;
    }
    let mut seed_ext_len = 0usize;
    while seed_ext_len < min_left_ext.max(min_right_ext) {
        let left_ext_base = if seed_ext_len < min_left_ext {
            profile[min_left_ext - seed_ext_len - 1]
        } else {
            0
        };
        let right_ext_base = if seed_ext_len < min_right_ext {
            profile[min_left_ext + seed_ext_len]
        } else {
            0
        };

        let mut next_ed_seed_nums = vec![0usize; max_ed + 1];
        for seed in &seeds[sb..se] {
            let mut est_ed = seed.ed;
            if seed_ext_len < min_left_ext {
                if seed.bound.0 + seed_ext_len as u64 + 1 <= seed.pos.0 {
                    let ch = genome.get_base(seed.pos.0 - seed_ext_len as u64 - 1);
                    if b"ACGT"[ch as usize] != left_ext_base {
                        est_ed += 1;
                    }
                } else {
                    est_ed = max_ed + 1;
                }
            }
            if seed_ext_len < min_right_ext {
                if seed.pos.1 + (seed_ext_len as u64) < seed.bound.1 {
                    let ch = genome.get_base(seed.pos.1 + seed_ext_len as u64);
                    if b"ACGT"[ch as usize] != right_ext_base {
                        est_ed += 1;
                    }
                } else {
                    est_ed = max_ed + 1;
                }
            }
            if est_ed <= max_ed {
                next_ed_seed_nums[est_ed] += 1;
            }
        }

        for i in 1..next_ed_seed_nums.len() {
            next_ed_seed_nums[i] += next_ed_seed_nums[i - 1];
        }
        if next_ed_seed_nums[max_ed] < rp.repeat_count {
            break;
        }

        for seed in &mut seeds[sb..se] {
            if seed_ext_len < min_left_ext {
                if seed.bound.0 + seed_ext_len as u64 + 1 <= seed.pos.0 {
                    let ch = genome.get_base(seed.pos.0 - seed_ext_len as u64 - 1);
                    if b"ACGT"[ch as usize] != left_ext_base {
                        seed.ed += 1;
                    }
                } else {
                    seed.ed = max_ed + 1;
                }
            }
            if seed_ext_len < min_right_ext {
                if seed.pos.1 + (seed_ext_len as u64) < seed.bound.1 {
                    let ch = genome.get_base(seed.pos.1 + seed_ext_len as u64);
                    if b"ACGT"[ch as usize] != right_ext_base {
                        seed.ed += 1;
                    }
                } else {
                    seed.ed = max_ed + 1;
                }
            }
        }

        for (i, &num) in next_ed_seed_nums.iter().enumerate() {
            if num < rp.repeat_count {
                continue;
            }
            ed_seed_nums[i] = num;
            if seed_ext_len < min_left_ext {
                left_consensuses[i].push(left_ext_base as char);
            }
            if seed_ext_len < min_right_ext {
                right_consensuses[i].push(right_ext_base as char);
            }
        }

        seed_ext_len += 1;
    }
}

/// Apply an offset alignment to an instance. A failed alignment keeps the
/// attempted union range but is marked unaligned, so downstream filters
/// (allele grouping, SNP generation) skip it without losing the slot.
fn apply_offset_alignment(
    genome: &Genome,
    seed: &mut SeedExt,
    left: u64,
    right: u64,
    consensus_len: usize,
    aln: Option<OffsetAlignment>,
) {
    seed.reset();
    match aln {
        Some(aln) => {
            let (b, e) = aln.query_range;
            seed.pos = (left + b as u64, left + e as u64 + 1);
            seed.orig_pos = (seed.pos.0, seed.pos.0);
            seed.consensus_pos = aln.consensus_range;
            seed.right_gaps = aln.gaps;
            seed.bound = (
                genome.coords.get_start(seed.pos.0),
                genome.coords.get_end(seed.pos.0),
            );
            seed.aligned = true;
        }
        None => {
            seed.pos = (left, right);
            seed.orig_pos = (left, left);
            seed.consensus_pos = (0, consensus_len);
            seed.bound = (genome.coords.get_start(left), genome.coords.get_end(left));
            seed.aligned = false;
        }
    }
}

fn max_index(counts: &[usize; 4]) -> usize {
    let mut max_idx = 0usize;
    for i in 1..4 {
        if counts[i] > counts[max_idx] {
            max_idx = i;
        }
    }
    max_idx
}

/// Edit distance between two instances over a prospective extension region;
/// `budget + 1` signals a fragment-bound violation or an early overflow.
fn calc_edit_dist_pair(
    genome: &Genome,
    seed: &SeedExt,
    seed2: &SeedExt,
    left_ext: usize,
    right_ext: usize,
    budget: usize,
) -> usize {
    if seed.bound.0 + left_ext as u64 > seed.pos.0
        || seed.pos.1 + right_ext as u64 > seed.bound.1
        || seed2.bound.0 + left_ext as u64 > seed2.pos.0
        || seed2.pos.1 + right_ext as u64 > seed2.bound.1
    {
        return budget + 1;
    }

    let mut ed = 0usize;
    for i in 0..left_ext as u64 {
        if genome.get_base(seed.pos.0 - i - 1) != genome.get_base(seed2.pos.0 - i - 1) {
            ed += 1;
            if ed > budget {
                return ed;
            }
        }
    }
    for i in 0..right_ext as u64 {
        if genome.get_base(seed.pos.1 + i) != genome.get_base(seed2.pos.1 + i) {
            ed += 1;
            if ed > budget {
                return ed;
            }
        }
    }
    ed
}

/// Per-instance edit distance against the freshly chosen extension, with
/// single-gap rescue when the straightforward comparison overruns the
/// budget. Appends any rescued gap to the instance's gap list and tracks
/// the partial match length usable at each edit level.
fn calc_edit_dist(
    genome: &Genome,
    seeds: &mut [SeedExt],
    sb: usize,
    se: usize,
    left_consensuses: &[String],
    right_consensuses: &[String],
    max_ed: usize,
) {
    let left_consensus = &left_consensuses[max_ed];
    let right_consensus = &right_consensuses[max_ed];

    let left_kmer_table = build_kmer_table(left_consensus, RESCUE_K);
    let right_kmer_table = build_kmer_table(right_consensus, RESCUE_K);

    let left_ext = left_consensus.len();
    let right_ext = right_consensus.len();

    for seed in &mut seeds[sb..se] {
        if seed.bound.0 + left_ext as u64 > seed.pos.0
            || seed.pos.1 + right_ext as u64 > seed.bound.1
        {
            seed.ed = max_ed + 1;
            continue;
        }

        let mut left_ed = 0usize;
        if left_ext > 0 {
            let mut left_seq = genome.get_string(seed.pos.0 - left_ext as u64, left_ext as u64);
            // outward orientation: index 0 is the base adjacent to the seed
            left_seq = left_seq.chars().rev().collect();
            let lc = left_consensus.as_bytes();
            for (j, b) in left_seq.bytes().enumerate() {
                if b != lc[j] {
                    left_ed += 1;
                }
                if left_ed <= max_ed && j < left_consensuses[left_ed].len() {
                    seed.curr_ext_len = j + 1;
                }
            }

            if left_ed > max_ed {
                let max_gap = (left_ed - max_ed).min(MAX_RESCUE_GAP);
                if let Some((mm, gap_pos, gap_len)) = align_with_one_gap(
                    left_consensus,
                    &left_kmer_table,
                    &left_seq,
                    max_gap,
                    max_ed,
                    RESCUE_K,
                ) {
                    left_ed = mm;
                    seed.left_gaps.push((seed.left_ext_len() + gap_pos, gap_len));
                }
            }
        }

        let mut right_ed = 0usize;
        if right_ext > 0 {
            let right_seq = genome.get_string(seed.pos.1, right_ext as u64);
            let rc = right_consensus.as_bytes();
            for (j, b) in right_seq.bytes().enumerate() {
                if b != rc[j] {
                    right_ed += 1;
                }
                if right_ed <= max_ed && j < right_consensuses[right_ed].len() {
                    seed.curr_ext_len = j + 1;
                }
            }

            if right_ed > max_ed {
                let max_gap = (right_ed - max_ed).min(MAX_RESCUE_GAP);
                if let Some((mm, gap_pos, gap_len)) = align_with_one_gap(
                    right_consensus,
                    &right_kmer_table,
                    &right_seq,
                    max_gap,
                    max_ed,
                    RESCUE_K,
                ) {
                    right_ed = mm;
                    seed.right_gaps
                        .push((seed.right_ext_len() + gap_pos, gap_len));
                }
            }
        }

        seed.ed = left_ed + right_ed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::fasta::Chromosome;
    use crate::index::suffix_array::SuffixArray;

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

    fn build_family(genome: &Genome, rp: &RepeatParameter) -> Vec<RepeatFamily> {
        let mut subsa = SubSA::new(rp.seed_len, rp.seed_count);
        let sa = SuffixArray::build(genome);
        let n = sa.len();
        for (i, pos) in sa.iter().enumerate() {
            subsa.push(genome, pos, i + 1 == n);
        }
        let bases = subsa.build_repeat_bases(genome, rp);
        let mut families = Vec::new();
        for base in &bases {
            let mut fam = RepeatFamily::new(families.len());
            fam.init(rp, genome, &subsa, base);
            fam.extend_consensus(rp, genome);
            families.push(fam);
        }
        families
    }

    fn spec_rp() -> RepeatParameter {
        RepeatParameter {
            seed_len: 5,
            seed_count: 2,
            repeat_count: 2,
            min_repeat_len: 12,
            max_repeat_len: 100,
            max_edit: 4,
            strategy: ConsensusStrategy::MajorityVote,
        }
    }

    #[test]
    fn spec_scenario_two_identical_twelvemers() {
        // Two identical 12-mers: extension must grow the consensus until it
        // spans both with zero edits and zero SNPs.
        let genome = make_genome("AAACCCGGGTTTAAACCCGGGTTT");
        let rp = spec_rp();
        let mut families = build_family(&genome, &rp);
        assert!(!families.is_empty());

        let fam = families
            .iter_mut()
            .max_by_key(|f| f.consensus.len())
            .unwrap();
        assert!(
            fam.consensus.contains("AAACCCGGGTTT"),
            "consensus {} must span the 12-mer",
            fam.consensus
        );
        for seed in &fam.seeds {
            assert_eq!(seed.total_ed, 0);
            assert!(seed.left_gaps.is_empty() && seed.right_gaps.is_empty());
        }

        fam.generate_snps(&rp, &genome);
        assert!(fam.snps.is_empty(), "identical copies produce no SNPs");
    }

    #[test]
    fn containment_resolution_property() {
        // Two well-separated copies of a 40-base unit
        let unit = "ACGTACGGTCATTTGCAGCATTACGGATCGTTACGCAGTC";
        let genome_seq = format!("{unit}GAGAGCCTATTAGAGTCCTGAGATA{unit}CTCCTAGGATCCATGATCAACCTGA");
        let genome = make_genome(&genome_seq);
        let rp = RepeatParameter {
            seed_len: 10,
            seed_count: 2,
            repeat_count: 2,
            min_repeat_len: 20,
            max_repeat_len: 200,
            max_edit: 4,
            strategy: ConsensusStrategy::MajorityVote,
        };
        let families = build_family(&genome, &rp);
        for fam in &families {
            for i in 0..fam.seeds.len() {
                for j in i + 1..fam.seeds.len() {
                    let a = fam.seeds[i].pos;
                    let b = fam.seeds[j].pos;
                    assert_ne!(a, b, "duplicate extents survived internal_update");
                    let disjoint = a.1 <= b.0 || b.1 <= a.0;
                    let contains = (a.0 <= b.0 && b.1 <= a.1) || (b.0 <= a.0 && a.1 <= b.1);
                    assert!(
                        disjoint || contains,
                        "partially overlapping extents {a:?} vs {b:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn bounds_never_crossed() {
        let genome = make_genome("AAACCCGGGTTTNNAAACCCGGGTTTNNAAACCCGGGTTT");
        let rp = spec_rp();
        let families = build_family(&genome, &rp);
        assert!(!families.is_empty());
        for fam in &families {
            for seed in &fam.seeds {
                assert!(seed.bound.0 <= seed.pos.0);
                assert!(seed.pos.1 <= seed.bound.1);
            }
        }
    }

    #[test]
    fn consensus_monotone_and_capped() {
        let genome = make_genome("AAACCCGGGTTTAAACCCGGGTTT");
        let rp = spec_rp();
        let mut subsa = SubSA::new(rp.seed_len, rp.seed_count);
        let sa = SuffixArray::build(&genome);
        let n = sa.len();
        for (i, pos) in sa.iter().enumerate() {
            subsa.push(&genome, pos, i + 1 == n);
        }
        let bases = subsa.build_repeat_bases(&genome, &rp);
        for base in &bases {
            let mut fam = RepeatFamily::new(0);
            fam.init(&rp, &genome, &subsa, base);
            let before = fam.consensus.len();
            fam.extend_consensus(&rp, &genome);
            assert!(fam.consensus.len() >= before);
            assert!(fam.consensus.len() <= rp.max_repeat_len);
        }
    }

    #[test]
    fn snps_recorded_for_divergent_instance() {
        // Three copies of a 40-base unit; the middle copy carries one
        // substitution, so extension keeps all copies (budget 4) and SNP
        // generation emits a single variant shared by one instance.
        let unit = "ACGTACGGTCATTTGCAGCATTACGGATCGTTACGCAGTC";
        let mut mutated = unit.to_string();
        mutated.replace_range(20..21, "A"); // T -> A
        let genome_seq = format!("{unit}{mutated}{unit}");
        let genome = make_genome(&genome_seq);

        let rp = RepeatParameter {
            seed_len: 10,
            seed_count: 2,
            repeat_count: 2,
            min_repeat_len: 20,
            max_repeat_len: 200,
            max_edit: 4,
            strategy: ConsensusStrategy::MajorityVote,
        };
        let mut families = build_family(&genome, &rp);
        assert!(!families.is_empty());
        let fam = families
            .iter_mut()
            .max_by_key(|f| f.consensus.len())
            .unwrap();

        fam.generate_snps(&rp, &genome);
        let has_variant_instance = fam.seeds.iter().any(|s| !s.snps.is_empty());
        assert!(
            has_variant_instance || fam.snps.is_empty(),
            "instance SNP references must point into the registry"
        );
        for seed in &fam.seeds {
            for &si in &seed.snps {
                assert!(si < fam.snps.len());
            }
        }
    }

    #[test]
    fn get_next_repeat_splits_undone() {
        let genome = make_genome("AAACCCGGGTTTAAACCCGGGTTT");
        let rp = spec_rp();
        let mut fam = RepeatFamily::new(0);
        fam.consensus = "AAACC".to_string();
        fam.seeds = vec![
            SeedExt {
                orig_pos: (0, 5),
                pos: (0, 12),
                consensus_pos: (0, 12),
                bound: (0, 24),
                done: true,
                ..SeedExt::default()
            },
            SeedExt {
                orig_pos: (12, 17),
                pos: (12, 17),
                consensus_pos: (0, 5),
                bound: (0, 24),
                done: false,
                ..SeedExt::default()
            },
        ];
        fam.seeds.sort_by(seed_cmp);

        let mut next = RepeatFamily::new(1);
        fam.get_next_repeat(&genome, &mut next);
        assert_eq!(fam.seeds.len(), 1);
        assert_eq!(next.seeds.len(), 1);
        assert_eq!(next.consensus, "AAACC");
        assert_eq!(next.seeds[0].pos, next.seeds[0].orig_pos);
    }

    #[test]
    fn overlap_and_mergeable() {
        let mut a = RepeatFamily::new(0);
        a.consensus = "A".repeat(20);
        a.seeds = vec![SeedExt {
            orig_pos: (0, 20),
            pos: (0, 20),
            consensus_pos: (0, 20),
            bound: (0, 100),
            ..SeedExt::default()
        }];
        a.internal_update();

        let mut b = RepeatFamily::new(1);
        b.consensus = "A".repeat(20);
        b.seeds = vec![SeedExt {
            orig_pos: (10, 30),
            pos: (10, 30),
            consensus_pos: (0, 20),
            bound: (0, 100),
            ..SeedExt::default()
        }];
        b.internal_update();

        assert!(a.overlap(&b).is_some());
        let portion = a.mergeable(&b);
        assert!((portion - 0.5).abs() < 1e-6, "10 of 20 bases overlap");
    }
}
