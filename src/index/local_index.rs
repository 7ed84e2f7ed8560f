use crate::genome::Genome;
use crate::index::suffix_array::compare_suffixes_at;

/// Width of one local index window over the forward genome.
pub const LOCAL_INDEX_WIDTH: u64 = 57344;
/// Overlap between neighboring windows.
pub const LOCAL_INDEX_OVERLAP: u64 = 1024;

/// A regionally scoped mini-index: the sorted suffixes of one window of the
/// forward genome. Used to resolve ambiguous extensions cheaply before
/// falling back to the whole-genome index.
pub struct LocalIndex {
    pub start: u64,
    pub end: u64,
    positions: Vec<u64>,
}

impl LocalIndex {
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// All local index windows of a genome.
pub struct LocalIndexSet {
    windows: Vec<LocalIndex>,
    stride: u64,
}

impl LocalIndexSet {
    /// Build overlapping windows covering the forward half.
    pub fn build(genome: &Genome) -> Self {
        let stride = LOCAL_INDEX_WIDTH - LOCAL_INDEX_OVERLAP;
        let forward = genome.forward_length;
        let mut windows = Vec::new();

        let mut start = 0u64;
        loop {
            let end = (start + LOCAL_INDEX_WIDTH).min(forward);
            let mut entries: Vec<(u64, u64)> = (start..end)
                .map(|pos| (pos, genome.coords.get_end(pos)))
                .collect();
            entries.sort_unstable_by(|a, b| {
                compare_suffixes_at(&genome.sequence, a.0, a.1, b.0, b.1)
            });
            windows.push(LocalIndex {
                start,
                end,
                positions: entries.into_iter().map(|(pos, _)| pos).collect(),
            });

            if end >= forward {
                break;
            }
            start += stride;
        }

        LocalIndexSet { windows, stride }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, idx: usize) -> &LocalIndex {
        &self.windows[idx]
    }

    /// Index of the window covering a forward joined offset.
    pub fn window_for(&self, joined_off: u64) -> usize {
        let idx = (joined_off / self.stride) as usize;
        let idx = idx.min(self.windows.len() - 1);
        // The overlap means the previous window may also cover the offset;
        // prefer the one whose body (not overlap tail) contains it.
        if idx > 0 && joined_off < self.windows[idx].start {
            idx - 1
        } else {
            idx
        }
    }

    pub fn prev(&self, idx: usize) -> Option<usize> {
        idx.checked_sub(1)
    }

    pub fn next(&self, idx: usize) -> Option<usize> {
        if idx + 1 < self.windows.len() {
            Some(idx + 1)
        } else {
            None
        }
    }
}
