use std::collections::HashSet;

use crate::align::hit::GenomeHit;
use crate::align::score::Scoring;
use crate::align::sink::AlnSink;
use crate::align::splice::{SpliceSite, SpliceSiteDb};
use crate::index::GenomeIndex;
use crate::params::Parameters;

/// Hard recursion ceiling; a branch hitting it simply dies.
pub const MAX_RECURSION_DEPTH: usize = 128;
/// Try at most this many consecutive local index windows per stage.
const MAX_LOCAL_WINDOWS: usize = 2;

/// Knobs of the hybrid search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub min_intron_len: usize,
    pub max_intron_len: usize,
    pub min_anchor_len: usize,
    pub min_anchor_len_noncan: usize,
    /// Local index attempt budget per read (the only cancellation
    /// mechanism besides recursion depth).
    pub max_local_index_atts: usize,
    /// Index lookups matching more locations than this are unusable.
    pub max_search_hits: usize,
    pub no_spliced_alignment: bool,
    /// Minimum usable anchor from the whole-genome index.
    pub global_min_len: usize,
    /// Minimum usable anchor from a local index window.
    pub local_min_len: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            min_intron_len: 20,
            max_intron_len: 500000,
            min_anchor_len: 7,
            min_anchor_len_noncan: 14,
            max_local_index_atts: 64,
            max_search_hits: 5,
            no_spliced_alignment: false,
            global_min_len: 16,
            local_min_len: 8,
        }
    }
}

impl SearchParams {
    pub fn from_parameters(params: &Parameters) -> Self {
        SearchParams {
            min_intron_len: params.min_intron_len,
            max_intron_len: params.max_intron_len,
            min_anchor_len: params.min_anchor_len,
            min_anchor_len_noncan: params.min_anchor_len_noncan,
            max_local_index_atts: params.max_local_index_atts,
            max_search_hits: params.max_search_hits,
            no_spliced_alignment: params.no_spliced_alignment,
            ..SearchParams::default()
        }
    }
}

/// Per-depth scratch buffers. Owned by the search instance and indexed by
/// recursion depth, never aliased across frames, so concurrent searches on
/// different instances cannot interfere.
#[derive(Default)]
struct Frame {
    splice_sites: Vec<SpliceSite>,
    local_hits: Vec<GenomeHit>,
}

/// The hybrid splice-aware search: recursively extends one partial
/// alignment using splice-database lookups, local index windows, the
/// whole-genome index, trimming, and direct comparison, in that priority
/// order, reporting completed alignments to the sink.
///
/// One instance serves one read invocation at a time; call `reset` between
/// reads.
pub struct HybridSearch<'a> {
    index: &'a GenomeIndex,
    ssdb: &'a SpliceSiteDb,
    sc: &'a Scoring,
    params: SearchParams,
    searched: HashSet<(usize, usize, usize, usize, u64)>,
    frames: Vec<Frame>,
    local_index_atts: usize,
}

impl<'a> HybridSearch<'a> {
    pub fn new(
        index: &'a GenomeIndex,
        ssdb: &'a SpliceSiteDb,
        sc: &'a Scoring,
        params: SearchParams,
    ) -> Self {
        HybridSearch {
            index,
            ssdb,
            sc,
            params,
            searched: HashSet::new(),
            frames: Vec::new(),
            local_index_atts: 0,
        }
    }

    /// Clear per-read state.
    pub fn reset(&mut self) {
        self.searched.clear();
        self.local_index_atts = 0;
        for frame in &mut self.frames {
            frame.splice_sites.clear();
            frame.local_hits.clear();
        }
    }

    /// Extend every candidate hit mismatch-free, then explore them
    /// best-first. Returns the best completed score.
    pub fn hybrid_search(
        &mut self,
        seq: &[u8],
        mut hits: Vec<GenomeHit>,
        minsc: i64,
        sink: &mut AlnSink,
    ) -> i64 {
        let index = self.index;
        let sc = self.sc;
        for hit in &mut hits {
            hit.extend(seq, &index.genome, sc, usize::MAX, usize::MAX, 0);
        }
        hits.sort_by(|a, b| b.len.cmp(&a.len).then(a.rdoff.cmp(&b.rdoff)));

        let mut maxsc = i64::MIN;
        for hit in &hits {
            let got = self.recur(seq, hit, hit.rdoff, hit.len, minsc, sink, 0);
            maxsc = maxsc.max(got);
        }
        maxsc
    }

    fn searched_key(hit: &GenomeHit) -> (usize, usize, usize, usize, u64) {
        (hit.rdoff, hit.len, hit.trim5, hit.trim3, hit.joined_off)
    }

    /// One node of the recursive search. `hitoff`/`hitlen` describe the
    /// read window considered explored, which can exceed the hit's own
    /// extent after skip-jumps. Returns the best score of any completed
    /// descendant.
    #[allow(clippy::too_many_arguments)]
    fn recur(
        &mut self,
        seq: &[u8],
        hit: &GenomeHit,
        hitoff: usize,
        hitlen: usize,
        minsc: i64,
        sink: &mut AlnSink,
        dep: usize,
    ) -> i64 {
        let rdlen = seq.len();
        let mut maxsc = i64::MIN;

        // mate rescue would soften the floor here; single-end gets none
        let cushion = 0i64;

        if hit.score + cushion < minsc || dep >= MAX_RECURSION_DEPTH {
            return maxsc;
        }

        // memoize only when the explored window matches the hit exactly
        if hitoff == hit.hitoff() && hitlen == hit.hitlen() {
            if !self.searched.insert(Self::searched_key(hit)) {
                return maxsc;
            }
        }

        while self.frames.len() <= dep {
            self.frames.push(Frame::default());
        }

        debug_assert!(hitoff + hitlen <= rdlen);

        if hitoff == 0 && hitlen == rdlen {
            return self.complete(seq, hit, minsc, sink, dep);
        }

        if hitoff > 0 && (hitoff + hitlen == rdlen || hitoff + hitoff < rdlen - hitlen) {
            self.partial_left(seq, hit, hitoff, hitlen, minsc, sink, dep)
        } else {
            self.partial_right(seq, hit, hitoff, hitlen, minsc, sink, dep)
        }
    }

    /// Terminal branch: the hit spans the whole read. Before reporting,
    /// attempt to re-split the alignment at plausible splice junctions near
    /// its two extreme anchors; several (near-)ties may all be reported.
    fn complete(
        &mut self,
        seq: &[u8],
        hit: &GenomeHit,
        minsc: i64,
        sink: &mut AlnSink,
        dep: usize,
    ) -> i64 {
        let index = self.index;
        let sc = self.sc;
        let ssdb = self.ssdb;
        let params = self.params;
        let mut maxsc = i64::MIN;
        if sink.redundant(hit) {
            return maxsc;
        }

        if ssdb.is_empty() || params.no_spliced_alignment {
            if sink.report_hit(hit) {
                maxsc = hit.score;
            }
            return maxsc;
        }

        let rdlen = seq.len();
        let genome = &index.genome;
        let mml = params.global_min_len;
        let mut best_score = hit.score;

        self.frames[dep].local_hits.clear();
        self.frames[dep].local_hits.push(hit.clone());

        // try splitting the left extreme anchor at nearby splice sites
        let (fragoff, fraglen, left) = hit.get_left();
        if fraglen >= mml && left >= mml as u64 && hit.trim5 == 0 {
            let mut sites = std::mem::take(&mut self.frames[dep].splice_sites);
            ssdb
                .left_splice_sites(hit.ref_id, left + mml as u64, mml as u64, &mut sites);
            for ss in &sites {
                if left + fraglen as u64 <= ss.right {
                    continue;
                }
                if fragoff as u64 + ss.right < left + 1 {
                    continue;
                }
                let readoff = (fragoff as u64 + ss.right - left - 1) as usize;
                let Some(mut temp) = self.splice_anchor_left(seq, hit, ss, readoff) else {
                    continue;
                };
                if !temp.compatible_with(
                    hit,
                    params.min_intron_len,
                    params.max_intron_len,
                    false,
                ) {
                    continue;
                }
                let mut local_minsc = minsc.max(best_score);
                let ok = temp.combine_with(
                    hit,
                    seq,
                    genome,
                    sc,
                    Some(ss),
                    params.min_intron_len,
                    params.max_intron_len,
                    1,
                    1,
                    false,
                );
                local_minsc = local_minsc.max(sink.best_unpaired());
                let (anchor_len, nedits) = temp.left_anchor();
                if ok && temp.score >= local_minsc && nedits <= anchor_len / 4 {
                    if self.searched.contains(&Self::searched_key(&temp)) {
                        continue;
                    }
                    if !sink.redundant(&temp) {
                        best_score = best_score.max(temp.score);
                        self.frames[dep].local_hits.push(temp);
                    }
                }
            }
            self.frames[dep].splice_sites = sites;
        }

        // ...then the right extreme anchor, over every candidate found
        let mut i = 0usize;
        while i < self.frames[dep].local_hits.len() {
            let can = self.frames[dep].local_hits[i].clone();
            i += 1;
            if can.score < best_score {
                continue;
            }
            let (fragoff, fraglen, right) = can.get_right();
            if fraglen < mml || can.trim3 != 0 {
                continue;
            }
            let mut sites = std::mem::take(&mut self.frames[dep].splice_sites);
            ssdb.right_splice_sites(
                can.ref_id,
                right + fraglen as u64 - mml as u64,
                mml as u64,
                &mut sites,
            );
            for ss in &sites {
                if right > ss.left {
                    continue;
                }
                let readoff = fragoff + (ss.left - right) as usize + 1;
                if readoff >= rdlen {
                    continue;
                }
                let Some(temp) = self.splice_anchor_right(seq, &can, ss, readoff) else {
                    continue;
                };
                if !can.compatible_with(
                    &temp,
                    params.min_intron_len,
                    params.max_intron_len,
                    false,
                ) {
                    continue;
                }
                let mut combined = can.clone();
                let mut local_minsc = minsc.max(best_score);
                let ok = combined.combine_with(
                    &temp,
                    seq,
                    genome,
                    sc,
                    Some(ss),
                    params.min_intron_len,
                    params.max_intron_len,
                    1,
                    1,
                    false,
                );
                local_minsc = local_minsc.max(sink.best_unpaired());
                let (anchor_len, nedits) = combined.right_anchor();
                if ok && combined.score >= local_minsc && nedits <= anchor_len / 4 {
                    if self.searched.contains(&Self::searched_key(&combined)) {
                        continue;
                    }
                    if !sink.redundant(&combined) {
                        best_score = best_score.max(combined.score);
                        self.frames[dep].local_hits.push(combined);
                    }
                }
            }
            self.frames[dep].splice_sites = sites;
        }

        // report the winners
        for i in 0..self.frames[dep].local_hits.len() {
            let can = self.frames[dep].local_hits[i].clone();
            if can.score < best_score {
                continue;
            }
            if i > 0 {
                self.searched.insert(Self::searched_key(&can));
            }
            if sink.report_hit(&can) {
                maxsc = maxsc.max(can.score);
            }
        }
        maxsc
    }

    /// Build the upstream-exon anchor ending exactly at a splice donor.
    fn splice_anchor_left(
        &self,
        seq: &[u8],
        hit: &GenomeHit,
        ss: &SpliceSite,
        readoff: usize,
    ) -> Option<GenomeHit> {
        let index = self.index;
        let sc = self.sc;
        let genome = &index.genome;
        let joined = genome.coords.text_off_to_joined(hit.ref_id, ss.left)? + 1;
        let mut temp = GenomeHit {
            fw: hit.fw,
            rdoff: readoff + 1,
            len: 0,
            trim5: 0,
            trim3: 0,
            ref_id: hit.ref_id,
            refoff: ss.left + 1,
            joined_off: joined,
            right_joined_off: joined,
            edits: Vec::new(),
            score: 0,
        };
        temp.extend(seq, genome, sc, readoff + 1, 0, 0);
        (temp.len > 0).then_some(temp)
    }

    /// Build the downstream-exon anchor starting exactly at a splice
    /// acceptor.
    fn splice_anchor_right(
        &self,
        seq: &[u8],
        hit: &GenomeHit,
        ss: &SpliceSite,
        readoff: usize,
    ) -> Option<GenomeHit> {
        let index = self.index;
        let sc = self.sc;
        let genome = &index.genome;
        let joined = genome.coords.text_off_to_joined(hit.ref_id, ss.right)?;
        let mut temp = GenomeHit {
            fw: hit.fw,
            rdoff: readoff,
            len: 0,
            trim5: 0,
            trim3: 0,
            ref_id: hit.ref_id,
            refoff: ss.right,
            joined_off: joined,
            right_joined_off: joined,
            edits: Vec::new(),
            score: 0,
        };
        temp.extend(seq, genome, sc, 0, seq.len() - readoff, 0);
        (temp.len > 0).then_some(temp)
    }

    /// The unexplored side is the read prefix. Strategies in priority
    /// order: splice-database extension, local index windows, global index
    /// fallback, trim salvage, direct extension with mismatches.
    #[allow(clippy::too_many_arguments)]
    fn partial_left(
        &mut self,
        seq: &[u8],
        hit: &GenomeHit,
        hitoff: usize,
        hitlen: usize,
        minsc: i64,
        sink: &mut AlnSink,
        dep: usize,
    ) -> i64 {
        let index = self.index;
        let sc = self.sc;
        let ssdb = self.ssdb;
        let params = self.params;
        let rdlen = seq.len();
        let genome = &index.genome;
        let mut maxsc = i64::MIN;
        let cushion = 0i64;

        // (a) known/novel splice sites anchored near the left boundary
        if !ssdb.is_empty() {
            let (fragoff, fraglen, left) = hit.get_left();
            let mml = params.local_min_len;
            if fraglen >= mml && left >= mml as u64 && !params.no_spliced_alignment {
                let mut sites = std::mem::take(&mut self.frames[dep].splice_sites);
                let window = (mml + mml.min(fragoff)) as u64;
                ssdb
                    .left_splice_sites(hit.ref_id, left + mml as u64, window, &mut sites);
                for ss in &sites {
                    if left + fraglen as u64 <= ss.right {
                        continue;
                    }
                    if fragoff as u64 + ss.right < left + 1 {
                        continue;
                    }
                    let readoff = (fragoff as u64 + ss.right - left - 1) as usize;
                    let Some(mut temp) = self.splice_anchor_left(seq, hit, ss, readoff) else {
                        continue;
                    };
                    if !temp.compatible_with(
                        hit,
                        params.min_intron_len,
                        params.max_intron_len,
                        false,
                    ) {
                        continue;
                    }
                    let ok = temp.combine_with(
                        hit,
                        seq,
                        genome,
                        sc,
                        Some(ss),
                        params.min_intron_len,
                        params.max_intron_len,
                        1,
                        1,
                        false,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if ok
                        && temp.score >= local_minsc
                        // soft-clipping the prefix might beat splicing it
                        && temp.score + sc.soft_clip_penalty * hit.rdoff as i64 >= hit.score
                    {
                        debug_assert_eq!(temp.trim5, 0);
                        let tmp =
                            self.recur(seq, &temp, temp.rdoff, temp.len + temp.trim3, minsc, sink, dep + 1);
                        maxsc = maxsc.max(tmp);
                    }
                }
                self.frames[dep].splice_sites = sites;
            }
        }

        // short unexplored prefixes may resolve by plain extension, making
        // the local index unnecessary
        let mut use_localindex = true;
        if hitoff == hit.rdoff && hitoff <= params.global_min_len {
            let mut temp = hit.clone();
            temp.extend(seq, genome, sc, usize::MAX, 0, 1);
            if temp.rdoff == 0 {
                use_localindex = false;
            }
        }

        // (b) local index windows, walking leftward, at most two
        let mut window = index.local_indexes.window_for(hit.joined_off);
        let mut success = false;
        let mut first = true;
        let mut count = 0usize;
        let prev_score = hit.score;
        self.frames[dep].local_hits.clear();
        while !success && count < MAX_LOCAL_WINDOWS && use_localindex {
            count += 1;
            if self.local_index_atts >= params.max_local_index_atts {
                break;
            }
            if first {
                first = false;
            } else {
                match index.local_indexes.prev(window) {
                    Some(w) => window = w,
                    None => break,
                }
                if index.local_indexes.get(window).is_empty() {
                    break;
                }
            }

            let mut extoff = hitoff - 1;
            if extoff > 0 {
                extoff -= 1;
            }
            if extoff < params.min_anchor_len {
                extoff = params.min_anchor_len;
            }
            let mut no_extension = false;
            let mut result = Default::default();
            while extoff < rdlen {
                self.local_index_atts += 1;
                result = index.local_search_backward(
                    index.local_indexes.get(window),
                    seq,
                    extoff,
                    extoff + 1,
                    params.max_search_hits,
                    true,
                    params.local_min_len,
                );
                if extoff + 1 - result.extlen >= hitoff {
                    no_extension = true;
                    break;
                }
                if result.nelt <= params.max_search_hits {
                    break;
                }
                extoff += 1;
            }

            if result.nelt > 0
                && result.nelt <= params.max_search_hits
                && result.extlen >= params.min_anchor_len
                && !no_extension
            {
                for ri in (0..result.coords.len()).rev() {
                    let coord = result.coords[ri];
                    let mut temp = GenomeHit::from_coord(
                        hit.fw,
                        extoff + 1 - result.extlen,
                        result.extlen,
                        coord,
                        sc,
                    );
                    if !temp.compatible_with(
                        hit,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.no_spliced_alignment,
                    ) {
                        if count == 1 {
                            continue;
                        } else {
                            break;
                        }
                    }
                    if result.unique_stop {
                        temp.extend(seq, genome, sc, usize::MAX, 0, 0);
                    }
                    let ok = temp.combine_with(
                        hit,
                        seq,
                        genome,
                        sc,
                        None,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.min_anchor_len,
                        params.min_anchor_len_noncan,
                        params.no_spliced_alignment,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if ok && temp.score >= local_minsc {
                        debug_assert_eq!(temp.trim5, 0);
                        if temp.score >= prev_score - sc.mm_penalty {
                            let tmp = self.recur(
                                seq,
                                &temp,
                                temp.rdoff,
                                temp.len + temp.trim3,
                                minsc,
                                sink,
                                dep + 1,
                            );
                            maxsc = maxsc.max(tmp);
                        } else {
                            self.frames[dep].local_hits.push(temp);
                        }
                    }
                }
            }

            if maxsc >= prev_score - sc.mm_penalty {
                success = true;
            }
            if !success
                && (self.local_index_atts >= params.max_local_index_atts
                    || count == MAX_LOCAL_WINDOWS
                    || index.local_indexes.prev(window).is_none())
            {
                // second pass: the parked, lower-scoring candidates
                for ti in 0..self.frames[dep].local_hits.len() {
                    let temp = self.frames[dep].local_hits[ti].clone();
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if temp.score >= local_minsc {
                        let tmp = self.recur(
                            seq,
                            &temp,
                            temp.rdoff,
                            temp.len + temp.trim3,
                            minsc,
                            sink,
                            dep + 1,
                        );
                        maxsc = maxsc.max(tmp);
                    }
                }
            }
        }

        if success {
            return maxsc;
        }

        // (c) whole-genome index, for unusually long introns
        if hitoff > params.global_min_len
            && self.local_index_atts < params.max_local_index_atts
        {
            let extoff = hitoff - 1;
            let result = index.global_search_backward(
                seq,
                extoff,
                params.max_search_hits,
                true,
                params.global_min_len,
            );
            if result.nelt > 0
                && result.nelt <= params.max_search_hits
                && result.extlen >= params.global_min_len
            {
                for ri in (0..result.coords.len()).rev() {
                    let coord = result.coords[ri];
                    let mut temp = GenomeHit::from_coord(
                        hit.fw,
                        extoff + 1 - result.extlen,
                        result.extlen,
                        coord,
                        sc,
                    );
                    if !temp.compatible_with(
                        hit,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.no_spliced_alignment,
                    ) {
                        continue;
                    }
                    if result.unique_stop {
                        temp.extend(seq, genome, sc, usize::MAX, 0, 0);
                    }
                    let ok = temp.combine_with(
                        hit,
                        seq,
                        genome,
                        sc,
                        None,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.min_anchor_len,
                        params.min_anchor_len_noncan,
                        params.no_spliced_alignment,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if ok && temp.score >= local_minsc {
                        let tmp = self.recur(
                            seq,
                            &temp,
                            temp.rdoff,
                            temp.len + temp.trim3,
                            minsc,
                            sink,
                            dep + 1,
                        );
                        maxsc = maxsc.max(tmp);
                    }
                }
            }
        }

        // (d) trim the unexplored prefix to salvage a lower but valid score
        let trim_room = hit.rdoff - hit.trim5;
        let trim_max = (hit.score - maxsc.max(minsc)) / sc.soft_clip_penalty.max(1);
        if (trim_room as i64) < trim_max {
            let mut trimmed = hit.clone();
            trimmed.trim5(trim_room);
            if trimmed.score > maxsc && trimmed.score >= minsc {
                let tmp = self.recur(seq, &trimmed, 0, trimmed.hitlen(), minsc, sink, dep + 1);
                maxsc = maxsc.max(tmp);
            }
        }

        // (e) direct extension with a computed mismatch allowance
        let mut temp = hit.clone();
        let mm_budget = ((temp.score - minsc) / sc.mm_penalty).max(0) as usize;
        let num_mm = if hitoff <= params.local_min_len {
            temp.rdoff.min(mm_budget)
        } else {
            1
        };
        let (leftext, _) = temp.extend(seq, genome, sc, usize::MAX, 0, num_mm);
        let local_minsc = minsc.max(sink.best_unpaired() - cushion);
        if temp.score >= local_minsc
            && leftext >= params.local_min_len.min(hit.rdoff)
        {
            debug_assert_eq!(temp.trim5, 0);
            let tmp = self.recur(seq, &temp, temp.rdoff, temp.len + temp.trim3, minsc, sink, dep + 1);
            maxsc = maxsc.max(tmp);
        } else if hitoff > params.local_min_len {
            // skip over stubborn bases and retry further left
            let jumplen = if hitoff > params.global_min_len {
                params.global_min_len
            } else {
                params.local_min_len
            };
            let expected = hit.score
                - ((hit.rdoff - hitoff) / jumplen) as i64 * sc.mm_penalty
                - sc.mm_penalty;
            if expected >= local_minsc && hitoff >= jumplen {
                let tmp = self.recur(seq, hit, hitoff - jumplen, hitlen + jumplen, minsc, sink, dep + 1);
                maxsc = maxsc.max(tmp);
            }
        }

        maxsc
    }

    /// Mirror of `partial_left` for the read suffix.
    #[allow(clippy::too_many_arguments)]
    fn partial_right(
        &mut self,
        seq: &[u8],
        hit: &GenomeHit,
        hitoff: usize,
        hitlen: usize,
        minsc: i64,
        sink: &mut AlnSink,
        dep: usize,
    ) -> i64 {
        let index = self.index;
        let sc = self.sc;
        let ssdb = self.ssdb;
        let params = self.params;
        let rdlen = seq.len();
        let genome = &index.genome;
        let mut maxsc = i64::MIN;
        let cushion = 0i64;
        debug_assert!(hitoff + hitlen < rdlen);

        // (a) splice sites anchored near the right boundary
        if !ssdb.is_empty() {
            let (fragoff, fraglen, right) = hit.get_right();
            let mml = params.local_min_len;
            if fraglen >= mml && !params.no_spliced_alignment {
                let right_unmapped = rdlen - fragoff - fraglen;
                let mut sites = std::mem::take(&mut self.frames[dep].splice_sites);
                let window = (mml + mml.min(right_unmapped)) as u64;
                ssdb.right_splice_sites(
                    hit.ref_id,
                    right + fraglen as u64 - mml as u64,
                    window,
                    &mut sites,
                );
                for ss in &sites {
                    if right > ss.left {
                        continue;
                    }
                    let readoff = fragoff + (ss.left - right) as usize + 1;
                    if readoff >= rdlen {
                        continue;
                    }
                    let Some(temp) = self.splice_anchor_right(seq, hit, ss, readoff) else {
                        continue;
                    };
                    if !hit.compatible_with(
                        &temp,
                        params.min_intron_len,
                        params.max_intron_len,
                        false,
                    ) {
                        continue;
                    }
                    let mut combined = hit.clone();
                    let ok = combined.combine_with(
                        &temp,
                        seq,
                        genome,
                        sc,
                        Some(ss),
                        params.min_intron_len,
                        params.max_intron_len,
                        1,
                        1,
                        false,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    let unmapped_tail = rdlen - hit.rdoff - hit.len - hit.trim5;
                    if ok
                        && combined.score >= local_minsc
                        && combined.score + sc.soft_clip_penalty * unmapped_tail as i64
                            >= hit.score
                    {
                        let tmp = self.recur(
                            seq,
                            &combined,
                            combined.rdoff - combined.trim5,
                            combined.len + combined.trim5,
                            minsc,
                            sink,
                            dep + 1,
                        );
                        maxsc = maxsc.max(tmp);
                    }
                }
                self.frames[dep].splice_sites = sites;
            }
        }

        let mut use_localindex = true;
        if hit.len == hitlen && hitoff + hitlen + params.global_min_len > rdlen {
            let mut temp = hit.clone();
            temp.extend(seq, genome, sc, 0, usize::MAX, 1);
            if temp.rdoff + temp.len == rdlen {
                use_localindex = false;
            }
        }

        // (b) local index windows, walking rightward
        let mut window = index.local_indexes.window_for(hit.joined_off);
        let mut success = false;
        let mut first = true;
        let mut count = 0usize;
        let prev_score = hit.score;
        self.frames[dep].local_hits.clear();
        while !success && count < MAX_LOCAL_WINDOWS && use_localindex {
            count += 1;
            if self.local_index_atts >= params.max_local_index_atts {
                break;
            }
            if first {
                first = false;
            } else {
                match index.local_indexes.next(window) {
                    Some(w) => window = w,
                    None => break,
                }
                if index.local_indexes.get(window).is_empty() {
                    break;
                }
            }

            let mut extoff = hitoff + hitlen + params.local_min_len;
            if extoff + 1 < rdlen {
                extoff += 1;
            }
            if extoff >= rdlen {
                extoff = rdlen - 1;
            }
            let mut max_hit_len = (extoff - hitoff - hitlen).max(params.local_min_len);
            let mut no_extension = false;
            let mut result = Default::default();
            while max_hit_len < extoff + 1 && extoff < rdlen {
                self.local_index_atts += 1;
                result = index.local_search_backward(
                    index.local_indexes.get(window),
                    seq,
                    extoff,
                    max_hit_len,
                    params.max_search_hits,
                    false,
                    params.local_min_len,
                );
                if extoff < hitoff + hitlen {
                    no_extension = true;
                    break;
                }
                if result.nelt <= params.max_search_hits {
                    break;
                }
                if extoff + 1 < rdlen {
                    extoff += 1;
                } else if result.extlen < max_hit_len {
                    break;
                } else {
                    max_hit_len += 1;
                }
            }

            if result.nelt > 0
                && result.nelt <= params.max_search_hits
                && result.extlen >= params.min_anchor_len
                && !no_extension
            {
                for ri in 0..result.coords.len() {
                    let coord = result.coords[ri];
                    let mut temp = GenomeHit::from_coord(
                        hit.fw,
                        extoff + 1 - result.extlen,
                        result.extlen,
                        coord,
                        sc,
                    );
                    if !hit.compatible_with(
                        &temp,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.no_spliced_alignment,
                    ) {
                        if count == 1 {
                            continue;
                        } else {
                            break;
                        }
                    }
                    temp.extend(seq, genome, sc, 0, usize::MAX, 0);
                    let mut combined = hit.clone();
                    let ok = combined.combine_with(
                        &temp,
                        seq,
                        genome,
                        sc,
                        None,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.min_anchor_len,
                        params.min_anchor_len_noncan,
                        params.no_spliced_alignment,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if ok && combined.score >= local_minsc {
                        if combined.score >= prev_score - sc.mm_penalty {
                            let tmp = self.recur(
                                seq,
                                &combined,
                                combined.rdoff - combined.trim5,
                                combined.len + combined.trim5,
                                minsc,
                                sink,
                                dep + 1,
                            );
                            maxsc = maxsc.max(tmp);
                        } else {
                            self.frames[dep].local_hits.push(combined);
                        }
                    }
                }
            }

            if maxsc >= prev_score - sc.mm_penalty {
                success = true;
            }
            if !success
                && (self.local_index_atts >= params.max_local_index_atts
                    || count == MAX_LOCAL_WINDOWS
                    || index.local_indexes.next(window).is_none())
            {
                for ti in 0..self.frames[dep].local_hits.len() {
                    let temp = self.frames[dep].local_hits[ti].clone();
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if temp.score >= local_minsc {
                        let tmp = self.recur(
                            seq,
                            &temp,
                            temp.rdoff - temp.trim5,
                            temp.len + temp.trim5,
                            minsc,
                            sink,
                            dep + 1,
                        );
                        maxsc = maxsc.max(tmp);
                    }
                }
            }
        }

        if success {
            return maxsc;
        }

        // (c) whole-genome index fallback
        if hitoff + hitlen + params.global_min_len + 1 < rdlen
            && self.local_index_atts < params.max_local_index_atts
        {
            let extoff = hitoff + hitlen + params.global_min_len + 1;
            let result = index.global_search_backward(
                seq,
                extoff,
                params.max_search_hits,
                true,
                params.global_min_len,
            );
            if result.nelt > 0
                && result.nelt <= params.max_search_hits
                && result.extlen >= params.global_min_len
            {
                for ri in 0..result.coords.len() {
                    let coord = result.coords[ri];
                    let mut temp = GenomeHit::from_coord(
                        hit.fw,
                        extoff + 1 - result.extlen,
                        result.extlen,
                        coord,
                        sc,
                    );
                    if !hit.compatible_with(
                        &temp,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.no_spliced_alignment,
                    ) {
                        continue;
                    }
                    temp.extend(seq, genome, sc, 0, usize::MAX, 0);
                    let mut combined = hit.clone();
                    let ok = combined.combine_with(
                        &temp,
                        seq,
                        genome,
                        sc,
                        None,
                        params.min_intron_len,
                        params.max_intron_len,
                        params.min_anchor_len,
                        params.min_anchor_len_noncan,
                        params.no_spliced_alignment,
                    );
                    let local_minsc = minsc.max(sink.best_unpaired() - cushion);
                    if ok && combined.score >= local_minsc {
                        let tmp = self.recur(
                            seq,
                            &combined,
                            combined.rdoff - combined.trim5,
                            combined.len + combined.trim5,
                            minsc,
                            sink,
                            dep + 1,
                        );
                        maxsc = maxsc.max(tmp);
                    }
                }
            }
        }

        // (d) trim the unexplored suffix
        let trim_len = rdlen - hitoff - hit.len - hit.trim5;
        let trim_max = (hit.score - maxsc.max(minsc)) / sc.soft_clip_penalty.max(1);
        if (trim_len as i64) < trim_max {
            let mut trimmed = hit.clone();
            trimmed.trim3(trim_len, rdlen);
            if trimmed.score > maxsc && trimmed.score >= minsc {
                let tmp = self.recur(
                    seq,
                    &trimmed,
                    trimmed.rdoff - trimmed.trim5,
                    trimmed.hitlen(),
                    minsc,
                    sink,
                    dep + 1,
                );
                maxsc = maxsc.max(tmp);
            }
        }

        // (e) direct extension with mismatches
        let mut temp = hit.clone();
        let mm_budget = ((temp.score - minsc) / sc.mm_penalty).max(0) as usize;
        let num_mm = if rdlen - hitoff - hitlen <= params.local_min_len {
            (rdlen - temp.rdoff - temp.len).min(mm_budget)
        } else {
            1
        };
        let (_, rightext) = temp.extend(seq, genome, sc, 0, usize::MAX, num_mm);
        let local_minsc = minsc.max(sink.best_unpaired() - cushion);
        if temp.score >= local_minsc
            && rightext >= params.local_min_len.min(rdlen - hit.len - hit.rdoff)
        {
            debug_assert_eq!(temp.trim3, 0);
            let tmp = self.recur(
                seq,
                &temp,
                temp.rdoff - temp.trim5,
                temp.len + temp.trim5,
                minsc,
                sink,
                dep + 1,
            );
            maxsc = maxsc.max(tmp);
        } else if hitoff + hitlen + params.local_min_len < rdlen {
            let jumplen = if hitoff + hitlen + params.global_min_len < rdlen {
                params.global_min_len
            } else {
                params.local_min_len
            };
            let expected = hit.score
                - ((hitlen - hit.len) / jumplen) as i64 * sc.mm_penalty
                - sc.mm_penalty;
            if expected >= local_minsc && hitoff + hitlen + jumplen <= rdlen {
                let tmp = self.recur(seq, hit, hitoff, hitlen + jumplen, minsc, sink, dep + 1);
                maxsc = maxsc.max(tmp);
            }
        }

        maxsc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::fasta::Chromosome;
    use crate::genome::Genome;

    fn encode(seq: &str) -> Vec<u8> {
        seq.bytes()
            .map(|b| match b {
                b'A' => 0,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => 4,
            })
            .collect()
    }

    fn make_index(seq: &str) -> GenomeIndex {
        let chrom = Chromosome {
            name: "chr1".to_string(),
            sequence: encode(seq),
        };
        GenomeIndex::from_genome(Genome::from_chromosomes(vec![chrom]).unwrap())
    }

    /// Pseudo-random, low-repeat sequence.
    fn random_seq(len: usize, salt: u64) -> String {
        let mut state = salt.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ['A', 'C', 'G', 'T'][((state >> 33) % 4) as usize]
            })
            .collect()
    }

    fn seed_from_read_end(
        index: &GenomeIndex,
        sc: &Scoring,
        seq: &[u8],
    ) -> Vec<GenomeHit> {
        let res = index.global_search_backward(seq, seq.len() - 1, 5, false, 0);
        res.coords
            .iter()
            .map(|&coord| {
                GenomeHit::from_coord(true, seq.len() - res.extlen, res.extlen, coord, sc)
            })
            .collect()
    }

    #[test]
    fn exact_read_reports_perfect_alignment() {
        let genome_seq = random_seq(200, 1);
        let index = make_index(&genome_seq);
        let sc = Scoring::default();
        let ssdb = SpliceSiteDb::empty(1);
        let seq = encode(&genome_seq[40..140]);

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let hits = seed_from_read_end(&index, &sc, &seq);
        assert!(!hits.is_empty());
        let minsc = sc.min_score(seq.len());
        let maxsc = search.hybrid_search(&seq, hits, minsc, &mut sink);

        assert_eq!(maxsc, sc.perfect_score(100));
        let best = sink.best_alignments();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].hit.rdoff, 0);
        assert_eq!(best[0].hit.len, 100);
        assert!(best[0].hit.edits.is_empty());
    }

    #[test]
    fn one_mismatch_read_scores_match_bonus_minus_penalty() {
        // A 100bp read with one substitution at offset 37 against a
        // contiguous region: exactly one best alignment, one mismatch,
        // score = match_bonus*99 - mm_penalty.
        let genome_seq = random_seq(200, 2);
        let index = make_index(&genome_seq);
        let sc = Scoring::default();
        let ssdb = SpliceSiteDb::empty(1);

        let mut read = genome_seq[50..150].to_string();
        let orig = read.as_bytes()[37];
        let replacement = match orig {
            b'A' => 'C',
            b'C' => 'G',
            b'G' => 'T',
            _ => 'A',
        };
        read.replace_range(37..38, &replacement.to_string());
        let seq = encode(&read);

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let hits = seed_from_read_end(&index, &sc, &seq);
        assert!(!hits.is_empty());
        let minsc = sc.min_score(seq.len());
        let maxsc = search.hybrid_search(&seq, hits, minsc, &mut sink);

        assert_eq!(maxsc, sc.match_bonus * 99 - sc.mm_penalty);
        let best = sink.best_alignments();
        assert_eq!(best.len(), 1, "exactly one best alignment");
        let hit = &best[0].hit;
        assert_eq!(hit.rdoff, 0);
        assert_eq!(hit.len, 100);
        assert_eq!(hit.n_mismatches(), 1);
        assert_eq!(hit.edits.iter().find(|e| e.is_mismatch()).unwrap().pos, 37);

        // score floor respected by everything reported
        for aln in sink.reported() {
            assert!(aln.hit.score >= minsc);
        }
    }

    #[test]
    fn annotated_splice_junction_found() {
        // 40bp exon ending at a known donor + 60bp exon starting at the
        // paired acceptor: one completed alignment of length 100 with zero
        // base edits and a single splice edit. The exon ends in CC so the
        // backward seed cannot slip across the AG acceptor.
        let exon1 = format!("{}CC", random_seq(38, 3));
        let exon2 = random_seq(60, 4);
        let intron_body = random_seq(76, 5);
        let genome_seq = format!("{exon1}GT{intron_body}AG{exon2}TTACG");
        let index = make_index(&genome_seq);
        let sc = Scoring::default();

        // intron occupies genome [40, 120): left = 39, right = 120
        let mut ssdb = SpliceSiteDb::empty(1);
        ssdb.add_known(SpliceSite {
            ref_id: 0,
            left: 39,
            right: 120,
            fw: true,
            from_file: true,
        });
        ssdb.finalize();

        let read = format!("{exon1}{exon2}");
        let seq = encode(&read);

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let hits = seed_from_read_end(&index, &sc, &seq);
        assert!(!hits.is_empty());
        let minsc = sc.min_score(seq.len());
        let maxsc = search.hybrid_search(&seq, hits, minsc, &mut sink);

        assert_eq!(maxsc, sc.perfect_score(100), "known junction is penalty-free");
        let best = sink.best_alignments();
        assert_eq!(best.len(), 1);
        let hit = &best[0].hit;
        assert_eq!(hit.hitoff(), 0);
        assert_eq!(hit.hitlen(), 100);
        assert_eq!(hit.n_mismatches(), 0);
        assert_eq!(hit.n_splices(), 1);
        let splice = hit.edits.iter().find(|e| e.is_splice()).unwrap();
        assert_eq!(splice.pos, 40);
        match splice.kind {
            crate::align::hit::EditKind::Splice { len, known, .. } => {
                assert_eq!(len, 80);
                assert!(known);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn unalignable_read_reports_nothing() {
        let genome_seq = random_seq(200, 6);
        let index = make_index(&genome_seq);
        let sc = Scoring::default();
        let ssdb = SpliceSiteDb::empty(1);
        // a read of pure poly-A against a low-repeat genome
        let seq = encode(&"A".repeat(60));

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let hits = seed_from_read_end(&index, &sc, &seq);
        let minsc = sc.min_score(seq.len());
        search.hybrid_search(&seq, hits, minsc, &mut sink);
        for aln in sink.reported() {
            assert!(aln.hit.score >= minsc);
        }
    }

    #[test]
    fn recursion_always_terminates() {
        // A repetitive genome plus a chimera-ish read pushes the search
        // through every fallback; the budgets must still bound it.
        let unit = random_seq(30, 7);
        let genome_seq = format!("{u}{u}{u}{u}", u = unit);
        let index = make_index(&genome_seq);
        let sc = Scoring::default();
        let ssdb = SpliceSiteDb::empty(1);

        let mut read = unit[5..].to_string();
        read.push_str(&random_seq(40, 8));
        let seq = encode(&read);

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let hits = seed_from_read_end(&index, &sc, &seq);
        let minsc = sc.min_score(seq.len());
        // completing is not required; returning is
        let _ = search.hybrid_search(&seq, hits, minsc, &mut sink);
    }

    #[test]
    fn searched_set_suppresses_duplicate_exploration() {
        let genome_seq = random_seq(200, 9);
        let index = make_index(&genome_seq);
        let sc = Scoring::default();
        let ssdb = SpliceSiteDb::empty(1);
        let seq = encode(&genome_seq[20..120]);

        let mut search = HybridSearch::new(&index, &ssdb, &sc, SearchParams::default());
        let mut sink = AlnSink::new();
        let minsc = sc.min_score(seq.len());

        let hits = seed_from_read_end(&index, &sc, &seq);
        let first = search.hybrid_search(&seq, hits.clone(), minsc, &mut sink);
        assert_eq!(first, sc.perfect_score(100));

        // the same exploration again yields nothing new
        let again = search.hybrid_search(&seq, hits, minsc, &mut sink);
        assert_eq!(again, i64::MIN);
        assert_eq!(sink.best_alignments().len(), 1);
    }
}
