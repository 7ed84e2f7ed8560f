use crate::align::score::{Scoring, SpliceMotif};
use crate::align::splice::SpliceSite;
use crate::genome::Genome;
use crate::index::Coord;

/// One edit of an alignment, positioned by read offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Read offset this edit applies at.
    pub pos: usize,
    pub kind: EditKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    /// Read base differs from the genome base.
    Mismatch { chr: u8, qchr: u8 },
    /// Genome bases absent from the read (deletion).
    ReadGap { len: u64 },
    /// Read bases absent from the genome (insertion).
    RefGap { len: u64 },
    /// Intron between read offsets pos-1 and pos.
    Splice {
        len: u64,
        motif: SpliceMotif,
        known: bool,
    },
}

impl Edit {
    pub fn is_mismatch(&self) -> bool {
        matches!(self.kind, EditKind::Mismatch { .. })
    }

    pub fn is_splice(&self) -> bool {
        matches!(self.kind, EditKind::Splice { .. })
    }

    pub fn is_gap(&self) -> bool {
        matches!(self.kind, EditKind::ReadGap { .. } | EditKind::RefGap { .. })
    }
}

/// A scored, partial-or-complete candidate alignment of a read against the
/// forward genome. `fw` records which orientation of the read is aligned;
/// the aligned sequence is always compared forward.
///
/// Value semantics: the splice search clones hits down recursive branches
/// and never shares mutable state between them.
#[derive(Debug, Clone)]
pub struct GenomeHit {
    pub fw: bool,
    /// First aligned read offset.
    pub rdoff: usize,
    /// Number of aligned read bases.
    pub len: usize,
    /// Hard-trimmed bases on the 5' / 3' ends.
    pub trim5: usize,
    pub trim3: usize,
    pub ref_id: usize,
    /// Chromosome-relative offset of the first aligned base.
    pub refoff: u64,
    /// Joined-genome offset of the first aligned base.
    pub joined_off: u64,
    /// Joined-genome offset one past the last aligned base.
    pub right_joined_off: u64,
    pub edits: Vec<Edit>,
    pub score: i64,
}

impl GenomeHit {
    /// A fresh ungapped hit from an index lookup: `len` exactly matching
    /// bases at `coord`.
    pub fn from_coord(fw: bool, rdoff: usize, len: usize, coord: Coord, sc: &Scoring) -> Self {
        GenomeHit {
            fw,
            rdoff,
            len,
            trim5: 0,
            trim3: 0,
            ref_id: coord.ref_id,
            refoff: coord.refoff,
            joined_off: coord.joined_off,
            right_joined_off: coord.joined_off + len as u64,
            edits: Vec::new(),
            score: sc.perfect_score(len),
        }
    }

    /// Read interval covered including hard trims.
    pub fn hitoff(&self) -> usize {
        self.rdoff - self.trim5
    }

    pub fn hitlen(&self) -> usize {
        self.len + self.trim5 + self.trim3
    }

    /// Number of mismatch edits.
    pub fn n_mismatches(&self) -> usize {
        self.edits.iter().filter(|e| e.is_mismatch()).count()
    }

    pub fn n_splices(&self) -> usize {
        self.edits.iter().filter(|e| e.is_splice()).count()
    }

    /// Genomic span in chromosome coordinates (includes introns and
    /// deletions, excludes insertions).
    pub fn genomic_span(&self) -> u64 {
        let mut span = self.len as u64;
        for edit in &self.edits {
            match edit.kind {
                EditKind::ReadGap { len } | EditKind::Splice { len, .. } => span += len,
                EditKind::RefGap { len } => span -= len,
                EditKind::Mismatch { .. } => {}
            }
        }
        span
    }

    /// Chromosome offset one past the last aligned base.
    pub fn right_refoff(&self) -> u64 {
        self.refoff + self.genomic_span()
    }

    /// Leftmost contiguous segment: (read offset, length, chromosome
    /// offset of the segment start).
    pub fn get_left(&self) -> (usize, usize, u64) {
        let mut fraglen = self.len;
        for edit in &self.edits {
            if !edit.is_mismatch() {
                fraglen = edit.pos - self.rdoff;
                break;
            }
        }
        (self.rdoff, fraglen, self.refoff)
    }

    /// Rightmost contiguous segment: (read offset of segment start, length,
    /// chromosome offset of the segment start).
    pub fn get_right(&self) -> (usize, usize, u64) {
        let mut seg_rdoff = self.rdoff;
        let mut seg_refoff = self.refoff;
        for edit in &self.edits {
            match edit.kind {
                EditKind::Mismatch { .. } => {}
                EditKind::ReadGap { len } | EditKind::Splice { len, .. } => {
                    seg_refoff += (edit.pos - seg_rdoff) as u64 + len;
                    seg_rdoff = edit.pos;
                }
                EditKind::RefGap { len } => {
                    seg_refoff += (edit.pos - seg_rdoff) as u64;
                    seg_rdoff = edit.pos + len as usize;
                }
            }
        }
        let fraglen = self.rdoff + self.len - seg_rdoff;
        (seg_rdoff, fraglen, seg_refoff)
    }

    /// Length of and edit count within the leftmost contiguous segment.
    pub fn left_anchor(&self) -> (usize, usize) {
        let (fragoff, fraglen, _) = self.get_left();
        let nedits = self
            .edits
            .iter()
            .filter(|e| e.pos >= fragoff && e.pos < fragoff + fraglen)
            .count();
        (fraglen, nedits)
    }

    pub fn right_anchor(&self) -> (usize, usize) {
        let (fragoff, fraglen, _) = self.get_right();
        let nedits = self
            .edits
            .iter()
            .filter(|e| e.pos >= fragoff && e.pos < fragoff + fraglen)
            .count();
        (fraglen, nedits)
    }

    /// Recompute the score from the edit list.
    pub fn recompute_score(&mut self, sc: &Scoring) {
        let mut matches = self.len as i64;
        let mut penalty = 0i64;
        for edit in &self.edits {
            match edit.kind {
                EditKind::Mismatch { .. } => {
                    matches -= 1;
                    penalty += sc.mm_penalty;
                }
                EditKind::ReadGap { len } => {
                    penalty += sc.read_gap_penalty(len as usize);
                }
                EditKind::RefGap { len } => {
                    matches -= len as i64;
                    penalty += sc.ref_gap_penalty(len as usize);
                }
                EditKind::Splice { motif, known, .. } => {
                    penalty += sc.splice_penalty(motif, known);
                }
            }
        }
        self.score = matches * sc.match_bonus - penalty;
    }

    /// Extend the hit outward by direct comparison against the genome,
    /// staying within the enclosing fragment and a shared mismatch budget.
    /// Returns the (left, right) extension lengths achieved.
    pub fn extend(
        &mut self,
        seq: &[u8],
        genome: &Genome,
        sc: &Scoring,
        max_left: usize,
        max_right: usize,
        max_mm: usize,
    ) -> (usize, usize) {
        let mut mm_used = 0usize;
        let mut new_edits: Vec<Edit> = Vec::new();

        // left; a zero-length anchor's fragment is the one holding the
        // first base it would read
        let left_probe = if self.len == 0 {
            self.joined_off.saturating_sub(1)
        } else {
            self.joined_off
        };
        let frag_start = if self.joined_off == 0 {
            0
        } else {
            genome.coords.get_start(left_probe)
        };
        let room_left = (self.joined_off - frag_start.min(self.joined_off)) as usize;
        let mut leftext = 0usize;
        while leftext < max_left && leftext < self.rdoff && leftext < room_left {
            let rb = seq[self.rdoff - leftext - 1];
            let gb = genome.get_base(self.joined_off - leftext as u64 - 1);
            if rb == gb {
                leftext += 1;
            } else if rb < 4 && mm_used < max_mm {
                mm_used += 1;
                new_edits.push(Edit {
                    pos: self.rdoff - leftext - 1,
                    kind: EditKind::Mismatch { chr: gb, qchr: rb },
                });
                leftext += 1;
            } else {
                break;
            }
        }

        // right; mirror of the left probe for zero-length anchors
        let last = self.right_joined_off;
        let right_probe = if self.len == 0 { last } else { last - 1 };
        let frag_end = if right_probe < genome.len() {
            genome.coords.get_end(right_probe)
        } else {
            last
        };
        let room_right = frag_end.saturating_sub(last) as usize;
        let mut rightext = 0usize;
        while rightext < max_right
            && self.rdoff + self.len + rightext < seq.len()
            && rightext < room_right
        {
            let rb = seq[self.rdoff + self.len + rightext];
            let gb = genome.get_base(last + rightext as u64);
            if rb == gb {
                rightext += 1;
            } else if rb < 4 && mm_used < max_mm {
                mm_used += 1;
                new_edits.push(Edit {
                    pos: self.rdoff + self.len + rightext,
                    kind: EditKind::Mismatch { chr: gb, qchr: rb },
                });
                rightext += 1;
            } else {
                break;
            }
        }

        if leftext > 0 {
            self.rdoff -= leftext;
            self.refoff -= leftext as u64;
            self.joined_off -= leftext as u64;
            self.len += leftext;
        }
        if rightext > 0 {
            self.len += rightext;
            self.right_joined_off += rightext as u64;
        }
        if !new_edits.is_empty() {
            self.edits.extend(new_edits);
            self.edits.sort_by_key(|e| e.pos);
        }
        self.recompute_score(sc);

        (leftext, rightext)
    }

    /// Can `self` (left) legally join `right` into one alignment?
    ///
    /// Requires identical orientation and chromosome, ordered read and
    /// genome intervals, and a junction gap that is either zero, a small
    /// indel, or an intron within the configured bounds.
    pub fn compatible_with(
        &self,
        right: &GenomeHit,
        min_intron: usize,
        max_intron: usize,
        no_spliced_alignment: bool,
    ) -> bool {
        if self.fw != right.fw || self.ref_id != right.ref_id {
            return false;
        }
        if self.rdoff > right.rdoff
            || self.rdoff + self.len > right.rdoff + right.len
            || self.rdoff + self.len < right.rdoff
        {
            return false;
        }

        let gap = junction_gap(self, right);
        if gap == 0 {
            return true;
        }
        if gap < 0 {
            // insertion: must stay well below the intron scale
            return ((-gap) as usize) < min_intron;
        }
        let gap = gap as usize;
        if gap < min_intron {
            return true; // deletion
        }
        !no_spliced_alignment && gap <= max_intron
    }

    /// Combine `self` (left part) with `right` into one alignment, placing
    /// the junction at the minimum-penalty read offset within the overlap
    /// (or at the point dictated by a known splice site).
    #[allow(clippy::too_many_arguments)]
    pub fn combine_with(
        &mut self,
        right: &GenomeHit,
        _seq: &[u8],
        genome: &Genome,
        sc: &Scoring,
        known_ss: Option<&SpliceSite>,
        min_intron: usize,
        max_intron: usize,
        min_anchor: usize,
        min_anchor_noncan: usize,
        no_spliced_alignment: bool,
    ) -> bool {
        if !self.compatible_with(right, min_intron, max_intron, no_spliced_alignment) {
            return false;
        }

        let self_end_read = self.rdoff + self.len;
        let right_end_read = right.rdoff + right.len;
        let gap = junction_gap(self, right);

        // contiguous: same diagonal, no junction edit
        if gap == 0 {
            let j = self_end_read.min(right_end_read);
            self.merge_edits(right, j, 0);
            self.len = right_end_read - self.rdoff;
            self.trim3 = right.trim3;
            self.right_joined_off = right.right_joined_off;
            self.recompute_score(sc);
            return true;
        }

        // candidate junction read offsets: anywhere both sides cover
        let jlo = right.rdoff.max(self.rdoff + 1);
        let jhi = self_end_read.min(right_end_read - 1);
        if jlo > jhi {
            return false;
        }

        let mut best: Option<(i64, usize, Edit)> = None;
        if gap >= min_intron as i64 {
            let intron = gap as u64;
            if let Some(ss) = known_ss {
                // the junction point is pinned by the annotated boundary
                let j = right.rdoff as i64 + (ss.right as i64 - right.refoff as i64);
                if j < jlo as i64 || j > jhi as i64 {
                    return false;
                }
                let j = j as usize;
                let motif = junction_motif(self, right, genome, j);
                let edit = Edit {
                    pos: j,
                    kind: EditKind::Splice {
                        len: intron,
                        motif,
                        known: true,
                    },
                };
                best = Some((self.kept_edit_penalty(right, j, 0, sc), j, edit));
            } else {
                for j in jlo..=jhi {
                    let motif = junction_motif(self, right, genome, j);
                    let anchor_needed = if motif.is_canonical() {
                        min_anchor
                    } else {
                        min_anchor_noncan
                    };
                    if j - self.rdoff < anchor_needed || right_end_read - j < anchor_needed {
                        continue;
                    }
                    let edit = Edit {
                        pos: j,
                        kind: EditKind::Splice {
                            len: intron,
                            motif,
                            known: false,
                        },
                    };
                    let cost = self.kept_edit_penalty(right, j, 0, sc)
                        + sc.splice_penalty(motif, false);
                    if best.as_ref().is_none_or(|(c, _, _)| cost < *c) {
                        best = Some((cost, j, edit));
                    }
                }
            }
        } else if gap > 0 {
            // deletion
            let del = gap as u64;
            for j in jlo..=jhi {
                let edit = Edit {
                    pos: j,
                    kind: EditKind::ReadGap { len: del },
                };
                let cost = self.kept_edit_penalty(right, j, 0, sc) + sc.read_gap_penalty(del as usize);
                if best.as_ref().is_none_or(|(c, _, _)| cost < *c) {
                    best = Some((cost, j, edit));
                }
            }
        } else {
            // insertion: read bases [j, j+ins) align to nothing
            let ins = (-gap) as usize;
            for j in jlo..=jhi {
                if j + ins > right_end_read {
                    break;
                }
                let edit = Edit {
                    pos: j,
                    kind: EditKind::RefGap { len: ins as u64 },
                };
                let cost =
                    self.kept_edit_penalty(right, j, ins, sc) + sc.ref_gap_penalty(ins);
                if best.as_ref().is_none_or(|(c, _, _)| cost < *c) {
                    best = Some((cost, j, edit));
                }
            }
        }

        let Some((_, j, junction_edit)) = best else {
            return false;
        };

        let skip = match junction_edit.kind {
            EditKind::RefGap { len } => len as usize,
            _ => 0,
        };
        self.merge_edits(right, j, skip);
        self.edits.push(junction_edit);
        self.edits.sort_by_key(|e| e.pos);
        self.len = right_end_read - self.rdoff;
        self.trim3 = right.trim3;
        self.right_joined_off = right.right_joined_off;
        self.recompute_score(sc);
        true
    }

    /// Penalty of the non-junction edits kept when joining at `j` (read
    /// bases below `j` follow this hit, bases at/above `j + skip` follow
    /// `right`).
    fn kept_edit_penalty(&self, right: &GenomeHit, j: usize, skip: usize, sc: &Scoring) -> i64 {
        let mut penalty = 0i64;
        for edit in self.edits.iter().filter(|e| e.pos < j) {
            penalty += edit_penalty(edit, sc);
        }
        for edit in right.edits.iter().filter(|e| e.pos >= j + skip) {
            penalty += edit_penalty(edit, sc);
        }
        penalty
    }

    fn merge_edits(&mut self, right: &GenomeHit, j: usize, skip: usize) {
        self.edits.retain(|e| e.pos < j);
        self.edits
            .extend(right.edits.iter().filter(|e| e.pos >= j + skip).cloned());
        self.edits.sort_by_key(|e| e.pos);
    }

    /// Hard-trim `trim` bases off the unaligned 5' prefix.
    pub fn trim5(&mut self, trim: usize) {
        debug_assert!(self.trim5 + trim <= self.rdoff);
        self.trim5 += trim;
    }

    /// Hard-trim `trim` bases off the unaligned 3' suffix.
    pub fn trim3(&mut self, trim: usize, rdlen: usize) {
        debug_assert!(self.rdoff + self.len + self.trim3 + trim <= rdlen);
        self.trim3 += trim;
    }
}

/// Genomic gap at the junction between a left and right hit, measured in
/// chromosome coordinates and independent of the junction read offset.
fn junction_gap(left: &GenomeHit, right: &GenomeHit) -> i64 {
    let left_end_read = (left.rdoff + left.len) as i64;
    let left_end_ref = left.right_refoff() as i64;
    (right.refoff as i64 - right.rdoff as i64) - (left_end_ref - left_end_read)
}

/// Detect the junction motif from the four intron-boundary bases, read on
/// each side's own diagonal (exact even when the intron crosses fragments).
fn junction_motif(left: &GenomeHit, right: &GenomeHit, genome: &Genome, j: usize) -> SpliceMotif {
    let left_end_read = left.rdoff + left.len;
    let donor = left.right_joined_off - (left_end_read - j) as u64;
    let acceptor_end = right.joined_off + (j - right.rdoff) as u64;
    if donor + 1 >= genome.len() || acceptor_end < 2 {
        return SpliceMotif::NonCanonical;
    }
    let d1 = genome.get_base(donor);
    let d2 = genome.get_base(donor + 1);
    let a1 = genome.get_base(acceptor_end - 2);
    let a2 = genome.get_base(acceptor_end - 1);
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

fn edit_penalty(edit: &Edit, sc: &Scoring) -> i64 {
    match edit.kind {
        // a mismatch also forfeits its match bonus
        EditKind::Mismatch { .. } => sc.mm_penalty + sc.match_bonus,
        EditKind::ReadGap { len } => sc.read_gap_penalty(len as usize),
        EditKind::RefGap { len } => {
            sc.ref_gap_penalty(len as usize) + sc.match_bonus * len as i64
        }
        EditKind::Splice { motif, known, .. } => sc.splice_penalty(motif, known),
    }
}
