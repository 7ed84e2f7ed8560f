use std::collections::BTreeMap;
use std::ops::Bound;

use crate::repeat::family::{AlleleCoord, RepeatFamily};
use crate::repeat::RepeatParameter;

/// Interval index over the allele ranges of all registered repeat families:
/// sorted map from genomic interval to the family ids occupying it. Used to
/// detect and collapse redundant repeat groups before they are built out.
#[derive(Default)]
pub struct RepeatManager {
    range_to_repeats: BTreeMap<(u64, u64), Vec<usize>>,
}

impl RepeatManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.range_to_repeats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range_to_repeats.is_empty()
    }

    /// Would a new cluster at `positions` duplicate an existing family?
    ///
    /// Returns true when the new cluster is redundant (>= 90% of its
    /// positions covered by a smaller-or-equal existing family). When the
    /// new cluster instead supersedes existing families, their ids are
    /// appended to `to_remove`.
    pub fn check_redundant(
        &self,
        rp: &RepeatParameter,
        repeat_map: &BTreeMap<usize, RepeatFamily>,
        positions: &[u64],
        to_remove: &mut Vec<usize>,
    ) -> bool {
        to_remove.clear();
        let mut replace = false;

        for &seed_pos in positions {
            let probe = (seed_pos + rp.seed_len as u64, 0u64);
            let iter = self
                .range_to_repeats
                .range((Bound::Unbounded, Bound::Excluded(probe)))
                .rev();

            for (&repeat_range, repeat_ids) in iter {
                if repeat_range.0 + rp.max_repeat_len as u64 <= seed_pos {
                    break;
                }
                debug_assert!(!repeat_ids.is_empty());

                for &repeat_id in repeat_ids {
                    if to_remove.binary_search(&repeat_id).is_ok() {
                        continue;
                    }

                    let overlap = seed_pos < repeat_range.1
                        && seed_pos + rp.seed_len as u64 > repeat_range.0;
                    if !overlap {
                        continue;
                    }

                    let repeat = &repeat_map[&repeat_id];
                    let allele_ranges = repeat.seed_ranges.as_slice();

                    let mut num_contain = 0usize;
                    let mut num_overlap = 0usize;
                    let mut num_close = 0usize;
                    let mut p = 0usize;
                    let mut p2 = 0usize;
                    while p < positions.len() && p2 < allele_ranges.len() {
                        let range = AlleleCoord {
                            left: positions[p],
                            right: positions[p] + rp.seed_len as u64,
                            idx: 0,
                        };
                        let range2 = allele_ranges[p2];
                        if range2.contain(&range, 0) {
                            num_contain += 1;
                        } else if range2.overlap_len(&range) > 0 {
                            num_overlap += 1;
                        } else if range.right + 10 > range2.left && range2.right + 10 > range.left
                        {
                            num_close += 1;
                        }
                        if range.right <= range2.right {
                            p += 1;
                        } else {
                            p2 += 1;
                        }
                    }

                    // >= 90% of the smaller group's positions must match
                    if (num_contain + num_overlap) * 10 + num_close * 8
                        >= positions.len().min(allele_ranges.len()) * 9
                    {
                        if positions.len() <= allele_ranges.len() {
                            return true;
                        }
                        replace = true;
                        to_remove.push(repeat_id);
                        to_remove.sort_unstable();
                    }
                }
            }

            if replace {
                break;
            }
        }
        false
    }

    pub fn add_repeat(&mut self, repeat: &RepeatFamily) {
        for range in &repeat.seed_ranges {
            self.add_range((range.left, range.right), repeat.repeat_id);
        }
    }

    fn add_range(&mut self, range: (u64, u64), repeat_id: usize) {
        let ids = self.range_to_repeats.entry(range).or_default();
        if let Err(idx) = ids.binary_search(&repeat_id) {
            ids.insert(idx, repeat_id);
        }
    }

    pub fn remove_repeat(&mut self, repeat: &RepeatFamily) {
        for range in &repeat.seed_ranges {
            self.remove_range((range.left, range.right), repeat.repeat_id);
        }
    }

    fn remove_range(&mut self, range: (u64, u64), repeat_id: usize) {
        if let Some(ids) = self.range_to_repeats.get_mut(&range) {
            if let Ok(idx) = ids.binary_search(&repeat_id) {
                ids.remove(idx);
            }
            if ids.is_empty() {
                self.range_to_repeats.remove(&range);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repeat::seed::SeedExt;

    fn family_with_ranges(id: usize, ranges: &[(u64, u64)]) -> RepeatFamily {
        let mut fam = RepeatFamily::new(id);
        fam.consensus = "A".repeat(50);
        for &(l, r) in ranges {
            fam.seeds.push(SeedExt {
                orig_pos: (l, r),
                pos: (l, r),
                consensus_pos: (0, (r - l) as usize),
                bound: (0, 1_000_000),
                ..SeedExt::default()
            });
        }
        fam.internal_update();
        fam
    }

    fn test_rp() -> RepeatParameter {
        RepeatParameter {
            seed_len: 50,
            ..RepeatParameter::test_default()
        }
    }

    #[test]
    fn add_remove_round_trip() {
        let fam = family_with_ranges(7, &[(100, 200), (500, 600)]);
        let mut mgr = RepeatManager::new();
        mgr.add_repeat(&fam);
        assert_eq!(mgr.len(), 2);
        mgr.remove_repeat(&fam);
        assert!(mgr.is_empty());
    }

    #[test]
    fn redundant_cluster_detected() {
        let rp = test_rp();
        let fam = family_with_ranges(0, &[(100, 250), (1000, 1150), (5000, 5150)]);
        let mut map = BTreeMap::new();
        let mut mgr = RepeatManager::new();
        mgr.add_repeat(&fam);
        map.insert(0usize, fam);

        // A 2-position cluster fully inside the existing family's alleles
        let positions = vec![110u64, 1010];
        let mut to_remove = Vec::new();
        let redundant = mgr.check_redundant(&rp, &map, &positions, &mut to_remove);
        assert!(redundant);
        assert!(to_remove.is_empty());
    }

    #[test]
    fn larger_cluster_replaces_smaller_family() {
        let rp = test_rp();
        let fam = family_with_ranges(3, &[(100, 250), (1000, 1150)]);
        let mut map = BTreeMap::new();
        let mut mgr = RepeatManager::new();
        mgr.add_repeat(&fam);
        map.insert(3usize, fam);

        // Four positions, two of which cover the existing family
        let positions = vec![110u64, 1010, 20_000, 30_000];
        let mut to_remove = Vec::new();
        let redundant = mgr.check_redundant(&rp, &map, &positions, &mut to_remove);
        assert!(!redundant);
        assert_eq!(to_remove, vec![3]);
    }

    #[test]
    fn unrelated_cluster_passes() {
        let rp = test_rp();
        let fam = family_with_ranges(0, &[(100, 250)]);
        let mut map = BTreeMap::new();
        let mut mgr = RepeatManager::new();
        mgr.add_repeat(&fam);
        map.insert(0usize, fam);

        let positions = vec![800_000u64, 900_000];
        let mut to_remove = Vec::new();
        assert!(!mgr.check_redundant(&rp, &map, &positions, &mut to_remove));
        assert!(to_remove.is_empty());
    }
}
