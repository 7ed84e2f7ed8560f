use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of recently resolved fragments kept in the lookup cache.
const CACHE_SIZE_JOINED_FRAG: usize = 8;

/// One contiguous non-N run of a chromosome within the joined genome.
///
/// Built once during genome construction; immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Offset of this fragment in the joined (forward) genome.
    pub joined_off: u64,
    /// Offset of this fragment within its chromosome (N runs included).
    pub seq_off: u64,
    /// Fragment length in bases.
    pub len: u64,
    /// Index of the owning chromosome.
    pub seq_id: usize,
    /// Whether this is the first fragment of its chromosome.
    pub first: bool,
}

impl Fragment {
    fn contains(&self, joined_off: u64) -> bool {
        joined_off >= self.joined_off && joined_off < self.joined_off + self.len
    }
}

/// Maps positions in the joined genome (forward + reverse complement) to
/// fragment boundaries and (chromosome, offset) pairs.
///
/// Internally a binary search over the sorted fragment table, fronted by a
/// small round-robin cache of recently resolved fragments so that spatially
/// clustered queries skip the search. The cache is lock-free (atomic slot
/// indices) so a `CoordHelper` can be shared read-only across threads.
pub struct CoordHelper {
    length: u64,
    forward_length: u64,
    fragments: Vec<Fragment>,
    ref_names: Vec<String>,
    cached: [AtomicUsize; CACHE_SIZE_JOINED_FRAG],
    victim: AtomicUsize,
}

impl CoordHelper {
    pub fn new(
        length: u64,
        forward_length: u64,
        fragments: Vec<Fragment>,
        ref_names: Vec<String>,
    ) -> Self {
        debug_assert!(forward_length <= length);
        debug_assert!(fragments.windows(2).all(|w| w[0].joined_off <= w[1].joined_off));
        CoordHelper {
            length,
            forward_length,
            fragments,
            ref_names,
            cached: std::array::from_fn(|_| AtomicUsize::new(usize::MAX)),
            victim: AtomicUsize::new(0),
        }
    }

    /// Total joined length (forward + reverse complement).
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Length of the forward half. Positions below this are sense strand.
    pub fn forward_length(&self) -> u64 {
        self.forward_length
    }

    pub fn ref_names(&self) -> &[String] {
        &self.ref_names
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Resolve a forward-half joined offset to its fragment index.
    pub fn map_joined_off_to_seq(&self, joined_off: u64) -> Option<usize> {
        for slot in &self.cached {
            let idx = slot.load(Ordering::Relaxed);
            if idx < self.fragments.len() && self.fragments[idx].contains(joined_off) {
                return Some(idx);
            }
        }

        let mut top = 0usize;
        let mut bot = self.fragments.len();
        while top + 1 < bot {
            let mid = top + (bot - top) / 2;
            if joined_off < self.fragments[mid].joined_off {
                bot = mid;
            } else {
                top = mid;
            }
        }

        if top < self.fragments.len() && self.fragments[top].contains(joined_off) {
            let victim = self.victim.fetch_add(1, Ordering::Relaxed) % CACHE_SIZE_JOINED_FRAG;
            self.cached[victim].store(top, Ordering::Relaxed);
            Some(top)
        } else {
            None
        }
    }

    /// Exclusive end of the fragment enclosing `pos`, for either strand.
    ///
    /// For antisense positions the fragment map (built on the forward half)
    /// is consulted through the mirror `length - pos - 1`.
    pub fn get_end(&self, pos: u64) -> u64 {
        assert!(pos < self.length);
        let end = if pos < self.forward_length {
            let frag_id = self
                .map_joined_off_to_seq(pos)
                .expect("position outside fragment table");
            let frag = &self.fragments[frag_id];
            frag.joined_off + frag.len
        } else {
            let frag_id = self
                .map_joined_off_to_seq(self.length - pos - 1)
                .expect("position outside fragment table");
            self.length - self.fragments[frag_id].joined_off
        };
        debug_assert!(end <= self.length);
        end
    }

    /// Inclusive start of the fragment enclosing `pos`, for either strand.
    pub fn get_start(&self, pos: u64) -> u64 {
        assert!(pos < self.length);
        let start = if pos < self.forward_length {
            let frag_id = self
                .map_joined_off_to_seq(pos)
                .expect("position outside fragment table");
            self.fragments[frag_id].joined_off
        } else {
            let frag_id = self
                .map_joined_off_to_seq(self.length - pos - 1)
                .expect("position outside fragment table");
            let frag = &self.fragments[frag_id];
            self.length - (frag.joined_off + frag.len)
        };
        debug_assert!(start <= self.length);
        start
    }

    /// Resolve a forward-half joined offset to (chromosome name, offset).
    ///
    /// Antisense positions must be mirrored by the caller first.
    pub fn get_genome_coord(&self, joined_off: u64) -> Option<(&str, u64)> {
        let frag_id = self.map_joined_off_to_seq(joined_off)?;
        let frag = &self.fragments[frag_id];
        let offset = joined_off - frag.joined_off;
        Some((self.ref_names[frag.seq_id].as_str(), frag.seq_off + offset))
    }

    /// Resolve a forward-half joined offset to (chromosome index, offset).
    pub fn get_ref_coord(&self, joined_off: u64) -> Option<(usize, u64)> {
        let frag_id = self.map_joined_off_to_seq(joined_off)?;
        let frag = &self.fragments[frag_id];
        Some((frag.seq_id, frag.seq_off + (joined_off - frag.joined_off)))
    }

    /// Map a (chromosome, offset) pair back to a joined offset. Returns
    /// None when the offset falls into an N gap or past the chromosome.
    pub fn text_off_to_joined(&self, ref_id: usize, refoff: u64) -> Option<u64> {
        for frag in &self.fragments {
            if frag.seq_id != ref_id {
                continue;
            }
            if refoff >= frag.seq_off && refoff < frag.seq_off + frag.len {
                return Some(frag.joined_off + (refoff - frag.seq_off));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two chromosomes: chr1 = [frag 0..10][gap][frag 10..16], chr2 = [frag 16..24].
    // The N gap between chr1's fragments is 4 bases in chromosome coordinates.
    fn make_helper() -> CoordHelper {
        let fragments = vec![
            Fragment {
                joined_off: 0,
                seq_off: 0,
                len: 10,
                seq_id: 0,
                first: true,
            },
            Fragment {
                joined_off: 10,
                seq_off: 14,
                len: 6,
                seq_id: 0,
                first: false,
            },
            Fragment {
                joined_off: 16,
                seq_off: 0,
                len: 8,
                seq_id: 1,
                first: true,
            },
        ];
        CoordHelper::new(
            48,
            24,
            fragments,
            vec!["chr1".to_string(), "chr2".to_string()],
        )
    }

    #[test]
    fn fragment_lookup() {
        let h = make_helper();
        assert_eq!(h.map_joined_off_to_seq(0), Some(0));
        assert_eq!(h.map_joined_off_to_seq(9), Some(0));
        assert_eq!(h.map_joined_off_to_seq(10), Some(1));
        assert_eq!(h.map_joined_off_to_seq(15), Some(1));
        assert_eq!(h.map_joined_off_to_seq(16), Some(2));
        assert_eq!(h.map_joined_off_to_seq(23), Some(2));
        // Repeated lookups hit the cache and must agree
        assert_eq!(h.map_joined_off_to_seq(9), Some(0));
        assert_eq!(h.map_joined_off_to_seq(15), Some(1));
    }

    #[test]
    fn forward_boundaries() {
        let h = make_helper();
        assert_eq!(h.get_start(0), 0);
        assert_eq!(h.get_end(0), 10);
        assert_eq!(h.get_start(9), 0);
        assert_eq!(h.get_end(9), 10);
        assert_eq!(h.get_start(10), 10);
        assert_eq!(h.get_end(10), 16);
        assert_eq!(h.get_start(20), 16);
        assert_eq!(h.get_end(20), 24);
    }

    #[test]
    fn antisense_boundaries_mirror_forward() {
        let h = make_helper();
        // Antisense position p mirrors forward position 48 - p - 1.
        // p = 24 mirrors 23 (chr2 fragment 16..24): start = 48-24 = 24, end = 48-16 = 32
        assert_eq!(h.get_start(24), 24);
        assert_eq!(h.get_end(24), 32);
        // p = 47 mirrors 0 (chr1 fragment 0..10): start = 48-10 = 38, end = 48-0 = 48
        assert_eq!(h.get_start(47), 38);
        assert_eq!(h.get_end(47), 48);
        // p = 33 mirrors 14 (chr1 fragment 10..16): start = 48-16 = 32, end = 48-10 = 38
        assert_eq!(h.get_start(33), 32);
        assert_eq!(h.get_end(33), 38);
    }

    #[test]
    fn genome_coord_accounts_for_gaps() {
        let h = make_helper();
        assert_eq!(h.get_genome_coord(0), Some(("chr1", 0)));
        assert_eq!(h.get_genome_coord(9), Some(("chr1", 9)));
        // Second chr1 fragment starts at chromosome offset 14 (a 4-base N gap)
        assert_eq!(h.get_genome_coord(10), Some(("chr1", 14)));
        assert_eq!(h.get_genome_coord(15), Some(("chr1", 19)));
        assert_eq!(h.get_genome_coord(16), Some(("chr2", 0)));
        assert_eq!(h.get_genome_coord(23), Some(("chr2", 7)));
    }

    #[test]
    fn boundaries_total_over_domain() {
        let h = make_helper();
        for pos in 0..48u64 {
            let start = h.get_start(pos);
            let end = h.get_end(pos);
            assert!(start <= pos && pos < end, "pos {pos} outside [{start}, {end})");
            assert!(end <= h.length());
        }
    }
}
