//! K-mer-anchored approximate alignment used by consensus extension and
//! family merging: single-gap rescue of a failed direct comparison, and
//! offset-map alignment of a whole instance against a merged consensus.

/// Default k for single-gap rescue tables.
pub const RESCUE_K: usize = 5;
/// k for merge-time offset maps.
pub const MERGE_K: usize = 12;

/// Offset-map filtering cutoffs: a segment whose average diagonal differs
/// from its neighbor by more than these is discarded (the smaller cutoff
/// applies when either segment is short).
const DIAG_DIFF_HARD: f32 = 20.0;
const DIAG_DIFF_SOFT: f32 = 10.0;
const SHORT_SEGMENT: usize = 5;

/// Exponential smoothing of the running diagonal during outlier removal.
const EXP_AVG_OLD: f32 = 0.8;
const EXP_AVG_NEW: f32 = 0.2;

/// Minimum length of an ambiguous k-mer run for self-repeat detection.
const SELF_REPEAT_MIN_RUN: usize = 100;

#[inline]
fn base_code(b: u8) -> u64 {
    match b {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => 0,
    }
}

/// Pack the k bases at `offset` into an integer.
pub fn extract_kmer(seq: &[u8], offset: usize, k: usize) -> u64 {
    debug_assert!(offset + k <= seq.len());
    let mut kmer = 0u64;
    for &b in &seq[offset..offset + k] {
        kmer = (kmer << 2) | base_code(b);
    }
    kmer
}

/// Roll one base into an existing k-mer.
pub fn next_kmer(kmer: u64, base: u8, k: usize) -> u64 {
    let masked = kmer & ((1 << ((k - 1) * 2)) - 1);
    (masked << 2) | base_code(base)
}

/// Sorted (kmer, offset) table of a sequence.
pub fn build_kmer_table(seq: &str, k: usize) -> Vec<(u64, usize)> {
    let bytes = seq.as_bytes();
    let mut table = Vec::new();
    if bytes.len() < k {
        return table;
    }
    let mut kmer = 0u64;
    for i in 0..=bytes.len() - k {
        if i == 0 {
            kmer = extract_kmer(bytes, 0, k);
        } else {
            kmer = next_kmer(kmer, bytes[i + k - 1], k);
        }
        table.push((kmer, i));
    }
    table.sort_unstable();
    table
}

fn kmer_lower_bound(table: &[(u64, usize)], kmer: u64) -> usize {
    table.partition_point(|&(k, _)| k < kmer)
}

/// Given two equal-length sequences that differ by one gap of `gap_len`
/// (`del` = the gap sits in `s2`'s source), find the gap position minimizing
/// total mismatches via a left-to-right and right-to-left prefix scan.
///
/// Returns `(gap_pos, mismatches)` or None when no placement stays within
/// `max_mm`.
pub fn find_gap_pos(
    s: &str,
    s2: &str,
    del: bool,
    gap_len: usize,
    max_mm: usize,
) -> Option<(usize, usize)> {
    debug_assert_eq!(s.len(), s2.len());
    let a = s.as_bytes();
    let b = s2.as_bytes();
    let seq_len = a.len();
    if seq_len <= gap_len {
        return None;
    }

    let mut ed = vec![max_mm + 1; seq_len];
    let mut ed2 = vec![max_mm + 1; seq_len];

    // prefix mismatches, left to right
    for i in 0..seq_len {
        let add = usize::from(a[i] != b[i]);
        ed[i] = if i == 0 { add } else { ed[i - 1] + add };
        if ed[i] >= max_mm + 1 {
            break;
        }
    }

    // suffix mismatches, right to left, with the gap applied
    let s_sub = if del { 0 } else { gap_len };
    let s2_sub = if del { gap_len } else { 0 };
    for i in (gap_len..seq_len).rev() {
        let add = usize::from(a[i - s_sub] != b[i - s2_sub]);
        ed2[i] = if i == seq_len - 1 { add } else { ed2[i + 1] + add };
        if ed2[i] > max_mm {
            break;
        }
    }

    let mut min_mm = ed2[gap_len];
    let mut min_mm_i: Option<usize> = None;
    for i in 0..seq_len.saturating_sub(gap_len + 1) {
        if ed[i] > max_mm {
            break;
        }
        let cur = ed[i] + ed2[i + gap_len + 1];
        if cur < min_mm {
            min_mm = cur;
            min_mm_i = Some(i);
        }
    }

    if min_mm > max_mm {
        return None;
    }
    let gap_pos = min_mm_i.map_or(0, |i| i + 1);
    Some((gap_pos, min_mm))
}

/// Try to explain `s2` as `s` plus a single gap: vote for the dominant
/// offset shift via shared k-mers, then place one gap of that size with
/// `find_gap_pos`.
///
/// Returns `(mismatches, gap_pos, signed_gap_len)`; positive = deletion in
/// the instance relative to the consensus.
pub fn align_with_one_gap(
    s: &str,
    s_kmer_table: &[(u64, usize)],
    s2: &str,
    max_gap: usize,
    max_mm: usize,
    k: usize,
) -> Option<(usize, usize, i64)> {
    debug_assert_eq!(s.len(), s2.len());
    if max_gap == 0 || s2.len() < k {
        return None;
    }

    let bytes = s2.as_bytes();
    let mut counts = vec![0usize; max_gap * 2 + 1];
    let mut max_count = 0usize;
    let mut max_count_i = 0usize;
    for i in 0..=bytes.len() - k {
        let kmer = extract_kmer(bytes, i, k);
        let mut lb = kmer_lower_bound(s_kmer_table, kmer);
        while lb < s_kmer_table.len() && s_kmer_table[lb].0 == kmer {
            let gap = s_kmer_table[lb].1 as i64 - i as i64;
            if gap != 0 && (gap.unsigned_abs() as usize) < max_gap {
                let gap_i = (gap + max_gap as i64) as usize;
                counts[gap_i] += 1;
                if counts[gap_i] > max_count {
                    max_count = counts[gap_i];
                    max_count_i = gap_i;
                }
            }
            lb += 1;
        }
    }

    if max_count == 0 {
        return None;
    }

    let gap = max_count_i as i64 - max_gap as i64;
    debug_assert!(gap != 0);
    let abs_gap = gap.unsigned_abs() as usize;
    let del = gap > 0;

    let (gap_pos, mm) = find_gap_pos(s, s2, del, abs_gap, max_mm)?;
    let gap_len = if del { abs_gap as i64 } else { -(abs_gap as i64) };
    Some((mm, gap_pos, gap_len))
}

/// A maximal run of usable offsets and its average diagonal.
fn next_offset_range(offsets: &[i64], from: usize) -> (usize, usize, f32) {
    let mut first = from;
    while first < offsets.len() && offsets[first] < 0 {
        first += 1;
    }
    let mut second = first + 1;
    let mut avg = 0.0f32;
    if first < offsets.len() {
        avg += offsets[first] as f32 - first as f32;
    }
    while second < offsets.len()
        && offsets[second] >= 0
        && offsets[second] >= offsets[second - 1]
    {
        avg += offsets[second] as f32 - second as f32;
        second += 1;
    }
    if second > first {
        avg /= (second - first) as f32;
    }
    (first, second, avg)
}

/// The result of aligning a query against a consensus via its offset map.
#[derive(Debug, Clone)]
pub struct OffsetAlignment {
    /// First and last (inclusive) aligned query offsets.
    pub query_range: (usize, usize),
    /// Covered consensus interval, half-open.
    pub consensus_range: (usize, usize),
    /// (offset from query start, signed gap length), gaps versus consensus.
    pub gaps: Vec<(usize, i64)>,
}

/// Align `query` to `consensus` through shared k-mers: build a noisy
/// per-position offset map, discard locally inconsistent segments, fill
/// interior holes by single-gap placement, extend the two ends by direct
/// comparison, and convert the final monotonic map into a gap list.
pub fn align_offsets(
    consensus: &str,
    kmer_table: &[(u64, usize)],
    query: &str,
    consensus_approx_left: i64,
    consensus_approx_right: i64,
    k: usize,
) -> Option<OffsetAlignment> {
    let qbytes = query.as_bytes();
    let cbytes = consensus.as_bytes();
    if qbytes.len() < k {
        return None;
    }

    let query_len = qbytes.len() as i64;
    let approx_len = consensus_approx_right - consensus_approx_left;
    let abs_gap_len = (approx_len - query_len).abs().max(5);

    // -1 = unseen, -2.. = ambiguous (multiple k-mer placements)
    let mut offsets: Vec<i64> = vec![-1; qbytes.len()];
    let mut kmer = 0u64;
    for i in 0..=qbytes.len() - k {
        if i == 0 {
            kmer = extract_kmer(qbytes, 0, k);
        } else {
            kmer = next_kmer(kmer, qbytes[i + k - 1], k);
        }
        let mut lb = kmer_lower_bound(kmer_table, kmer);
        while lb < kmer_table.len() && kmer_table[lb].0 == kmer {
            let expected = i as i64 + consensus_approx_left;
            let real = kmer_table[lb].1 as i64;
            if (expected - real).abs() <= abs_gap_len * 2 {
                if offsets[i] == -1 {
                    offsets[i] = real;
                } else if offsets[i] >= 0 {
                    offsets[i] = -2;
                } else {
                    offsets[i] -= 1;
                }
            }
            lb += 1;
        }
        if offsets[i] > 0 && i + k == qbytes.len() {
            for j in i + 1..qbytes.len() {
                offsets[j] = offsets[j - 1] + 1;
            }
        }
    }

    // Remove locally inconsistent segments of the offset map
    let (mut r_first, mut r_second, mut r_avg) = next_offset_range(&offsets, 0);
    while r_second < offsets.len() {
        let (r2_first, r2_second, r2_avg) = next_offset_range(&offsets, r_second);
        if r2_first >= offsets.len() {
            break;
        }
        let abs_diff = (r_avg - r2_avg).abs();
        let inconsistent = offsets[r_second - 1] > offsets[r2_first]
            || (abs_diff > DIAG_DIFF_SOFT
                && (r_second - r_first < SHORT_SEGMENT || r2_second - r2_first < SHORT_SEGMENT))
            || abs_diff > DIAG_DIFF_HARD;
        if inconsistent {
            if r_second - r_first < r2_second - r2_first {
                for o in &mut offsets[r_first..r_second] {
                    *o = -1;
                }
                (r_first, r_second, r_avg) = (r2_first, r2_second, r2_avg);
            } else {
                for o in &mut offsets[r2_first..r2_second] {
                    *o = -1;
                }
                r_second = r2_second;
            }
        } else {
            (r_first, r_second, r_avg) = (r2_first, r2_second, r2_avg);
        }
    }

    // Drop stragglers far from the smoothed diagonal
    let mut weighted_avg: Option<f32> = None;
    for i in 0..offsets.len() {
        if offsets[i] < 0 {
            continue;
        }
        let diff = offsets[i] as f32 - i as f32;
        if let Some(avg) = weighted_avg {
            if (diff - avg).abs() > DIAG_DIFF_HARD {
                offsets[i] = -1;
                continue;
            }
            weighted_avg = Some(EXP_AVG_OLD * avg + EXP_AVG_NEW * diff);
        } else {
            weighted_avg = Some(diff);
        }
    }

    // Fill interior holes: matched flanks imply either a clean run or a
    // single gap placed by minimum mismatches
    let mut i = 0usize;
    while i < offsets.len() {
        while i < offsets.len() && offsets[i] >= 0 {
            i += 1;
        }
        if i >= offsets.len() {
            break;
        }
        let mut j = i;
        while j < offsets.len() && offsets[j] < 0 {
            j += 1;
        }
        if i > 0 && j < offsets.len() {
            i -= 1;
            let left = offsets[i];
            let right = offsets[j];
            if left > right {
                return None;
            }
            let ref_len = (right - left + 1) as usize;
            let q_len = j - i + 1;
            if q_len == ref_len {
                for i2 in i + 1..j {
                    offsets[i2] = offsets[i2 - 1] + 1;
                }
            } else {
                let del = q_len < ref_len;
                let gap_len = ref_len.abs_diff(q_len);
                let max_len = ref_len.max(q_len);
                let max_mm = max_len / 25 + 1;
                let very_max_mm = (max_len / 2).max(max_mm);
                if left as usize + max_len > cbytes.len() || i + max_len > qbytes.len() {
                    return None;
                }
                let ca_s = &consensus[left as usize..left as usize + max_len];
                let ca_s2 = &query[i..i + max_len];
                let (gap_pos, _mm) = find_gap_pos(ca_s, ca_s2, del, gap_len, very_max_mm)?;
                if del {
                    for i2 in i + 1..j {
                        if i2 - i == gap_pos {
                            offsets[i2] = offsets[i2 - 1] + gap_len as i64;
                        } else {
                            offsets[i2] = offsets[i2 - 1] + 1;
                        }
                    }
                } else {
                    for i2 in i + 1..j {
                        if i2 - i >= gap_pos && i2 - i < gap_pos + gap_len {
                            offsets[i2] = offsets[i2 - 1];
                        } else {
                            offsets[i2] = offsets[i2 - 1] + 1;
                        }
                    }
                }
            }
        }
        i = j;
    }

    debug_assert!(offsets
        .windows(2)
        .all(|w| w[0] < 0 || w[1] < 0 || w[0] <= w[1]));

    // Trim to the aligned core
    let mut b = 0usize;
    while b < offsets.len() && offsets[b] < 0 {
        b += 1;
    }
    if b >= offsets.len() {
        return None;
    }
    let mut e = offsets.len() - 1;
    while e > b && offsets[e] < 0 {
        e -= 1;
    }
    if b == e {
        return None;
    }
    if offsets[b..=e].iter().any(|&o| o < 0) {
        return None;
    }

    // Fill the two ends by direct comparison while mismatches stay sparse
    if b > 0 {
        let pb = b as i64;
        let mut mm = 0i64;
        for i in (0..b).rev() {
            if offsets[i + 1] == 0 {
                break;
            }
            if qbytes[i] != cbytes[(offsets[i + 1] - 1) as usize] {
                mm += 1;
            }
            if pb - (i as i64) < 25 * (mm - 1) {
                break;
            }
            offsets[i] = offsets[i + 1] - 1;
            b = i;
        }
    }
    if e + 1 < offsets.len() {
        let prev_end = e as i64;
        let mut mm = 0i64;
        for i in e + 1..offsets.len() {
            if offsets[i - 1] + 1 >= cbytes.len() as i64 {
                break;
            }
            if qbytes[i] != cbytes[(offsets[i - 1] + 1) as usize] {
                mm += 1;
            }
            if (i as i64 - prev_end) < 25 * (mm - 1) {
                break;
            }
            offsets[i] = offsets[i - 1] + 1;
            e = i;
        }
    }

    // Monotonic offset map -> gap list
    let mut gaps: Vec<(usize, i64)> = Vec::new();
    let mut p = b;
    while p < e {
        debug_assert!(offsets[p] >= 0 && offsets[p] <= offsets[p + 1]);
        if offsets[p] + 1 == offsets[p + 1] {
            p += 1;
        } else if offsets[p] + 1 < offsets[p + 1] {
            // deletion in the query relative to the consensus
            gaps.push((p + 1 - b, offsets[p + 1] - offsets[p] - 1));
            p += 1;
        } else {
            // insertion: a run of equal offsets
            let mut p2 = p + 1;
            while p2 + 1 <= e && offsets[p2] == offsets[p2 + 1] {
                p2 += 1;
            }
            gaps.push((p + 1 - b, p as i64 - p2 as i64));
            p = p2 + 1;
        }
    }

    Some(OffsetAlignment {
        query_range: (b, e),
        consensus_range: (offsets[b] as usize, offsets[e] as usize + 1),
        gaps,
    })
}

/// Does the consensus recur within itself? Detected via its own k-mer
/// offset map showing two or more ambiguous runs of length >= 100.
pub fn is_self_repeat(consensus: &str, kmer_table: &[(u64, usize)], k: usize) -> bool {
    let bytes = consensus.as_bytes();
    if bytes.len() < k {
        return false;
    }
    let mut offsets: Vec<i64> = vec![-1; bytes.len()];
    let mut kmer = 0u64;
    for i in 0..=bytes.len() - k {
        if i == 0 {
            kmer = extract_kmer(bytes, 0, k);
        } else {
            kmer = next_kmer(kmer, bytes[i + k - 1], k);
        }
        let mut lb = kmer_lower_bound(kmer_table, kmer);
        while lb < kmer_table.len() && kmer_table[lb].0 == kmer {
            if offsets[i] == -1 {
                offsets[i] = kmer_table[lb].1 as i64;
            } else if offsets[i] >= 0 {
                offsets[i] = -2;
            } else {
                offsets[i] -= 1;
            }
            lb += 1;
        }
    }

    let mut repeat_count = 0usize;
    let mut i = 0usize;
    while i + SELF_REPEAT_MIN_RUN < offsets.len() {
        if offsets[i] >= -1 {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < offsets.len() && offsets[j] <= -2 {
            j += 1;
        }
        if j - i >= SELF_REPEAT_MIN_RUN {
            repeat_count += 1;
        }
        i = j;
    }

    repeat_count >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmer_table_rolls_correctly() {
        let table = build_kmer_table("ACGTA", 3);
        assert_eq!(table.len(), 3);
        // ACG = 0b000110 = 6, CGT = 0b011011 = 27, GTA = 0b101100 = 44
        let mut expected = vec![(6u64, 0usize), (27, 1), (44, 2)];
        expected.sort_unstable();
        assert_eq!(table, expected);
    }

    #[test]
    fn gap_pos_finds_clean_deletion() {
        // s has one extra base relative to s2's source: del = true places
        // the gap in s2. s = "AACCGGTT", s2 = "AACGGTTX"-style shift.
        let s = "AACCGGTT";
        let s2 = "AACGGTTA"; // s with one C removed, then one trailing base
        let (gap_pos, mm) = find_gap_pos(s, s2, true, 1, 2).unwrap();
        // deleting either C of the CC run explains the shift
        assert!((2..=4).contains(&gap_pos), "gap near the CC run: {gap_pos}");
        assert_eq!(mm, 0);
    }

    #[test]
    fn gap_pos_rejects_over_budget() {
        let s = "AAAAAAAA";
        let s2 = "TTTTTTTT";
        assert!(find_gap_pos(s, s2, true, 1, 2).is_none());
    }

    #[test]
    fn one_gap_alignment_recovers_deletion() {
        // Consensus and an instance lacking one base at position 10
        let consensus = "ACGTACGGTCATTTGCAGCA";
        let mut inst: String = consensus.to_string();
        inst.remove(10);
        inst.push('A'); // keep lengths equal
        let table = build_kmer_table(consensus, RESCUE_K);
        let (mm, gap_pos, gap_len) =
            align_with_one_gap(consensus, &table, &inst, 5, 2, RESCUE_K).unwrap();
        assert_eq!(gap_len, 1, "one-base deletion in the instance");
        assert!(gap_pos <= 11);
        assert!(mm <= 2);
    }

    #[test]
    fn offset_alignment_exact_match() {
        let consensus = "ACGTACGGTCATTTGCAGCATTACGGAT";
        let table = build_kmer_table(consensus, RESCUE_K);
        let aln = align_offsets(consensus, &table, consensus, 0, consensus.len() as i64, RESCUE_K)
            .unwrap();
        assert_eq!(aln.query_range, (0, consensus.len() - 1));
        assert_eq!(aln.consensus_range, (0, consensus.len()));
        assert!(aln.gaps.is_empty());
    }

    #[test]
    fn offset_alignment_with_insertion() {
        let consensus = "ACGTACGGTCATTTGCAGCATTACGGAT";
        let mut query = consensus.to_string();
        query.insert(14, 'T'); // instance carries one extra base
        let table = build_kmer_table(consensus, RESCUE_K);
        let aln =
            align_offsets(consensus, &table, &query, 0, consensus.len() as i64, RESCUE_K).unwrap();
        assert_eq!(aln.gaps.len(), 1);
        assert_eq!(aln.gaps[0].1, -1, "negative = insertion");
        assert_eq!(aln.consensus_range, (0, consensus.len()));
    }

    #[test]
    fn offset_alignment_with_deletion() {
        let consensus = "ACGTACGGTCATTTGCAGCATTACGGAT";
        let mut query = consensus.to_string();
        query.remove(13);
        let table = build_kmer_table(consensus, RESCUE_K);
        let aln =
            align_offsets(consensus, &table, &query, 0, consensus.len() as i64, RESCUE_K).unwrap();
        assert_eq!(aln.gaps.len(), 1);
        assert_eq!(aln.gaps[0].1, 1, "positive = deletion");
    }

    #[test]
    fn self_repeat_detection() {
        // Two duplicated blocks separated by unique sequence produce two
        // long ambiguous runs in the consensus's own offset map
        let block: String = (0..120)
            .map(|i| ['A', 'C', 'G', 'T'][(i * 7 + i / 3) % 4])
            .collect();
        let unique: String = (0..150)
            .map(|i| ['A', 'C', 'G', 'T'][(i * 11 + i / 5 + 2) % 4])
            .collect();
        let consensus = format!("{block}{unique}{block}");
        let table = build_kmer_table(&consensus, MERGE_K);
        assert!(is_self_repeat(&consensus, &table, MERGE_K));

        let clean = format!("{block}{unique}");
        let clean_table = build_kmer_table(&clean, MERGE_K);
        assert!(!is_self_repeat(&clean, &clean_table, MERGE_K));
    }
}
