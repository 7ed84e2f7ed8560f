use std::path::Path;

use dashmap::DashMap;

use crate::error::Error;
use crate::genome::Genome;

/// One intron boundary pair.
///
/// `left` is the last exonic base of the upstream exon; `right` the first
/// exonic base of the downstream exon (both chromosome-relative, 0-based).
/// The intron occupies `[left + 1, right)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceSite {
    pub ref_id: usize,
    pub left: u64,
    pub right: u64,
    /// Transcript strand of the donor (true = '+').
    pub fw: bool,
    /// Loaded from annotation (vs discovered from reads).
    pub from_file: bool,
}

impl SpliceSite {
    pub fn intron_len(&self) -> u64 {
        self.right - self.left - 1
    }
}

/// Known and discovered splice sites, queryable by boundary windows.
///
/// Annotation-derived sites live in per-chromosome sorted tables built once.
/// Sites discovered from reads during alignment are inserted concurrently
/// into a shared map and consulted by the same range queries; everything
/// else here is immutable during search.
pub struct SpliceSiteDb {
    /// Per chromosome, known sites sorted by `left`.
    known_by_left: Vec<Vec<SpliceSite>>,
    /// Per chromosome, known sites sorted by `right`.
    known_by_right: Vec<Vec<SpliceSite>>,
    /// Sites discovered during alignment, keyed by coordinates.
    novel: DashMap<(usize, u64, u64), SpliceSite>,
    n_known: usize,
}

impl SpliceSiteDb {
    pub fn empty(n_refs: usize) -> Self {
        SpliceSiteDb {
            known_by_left: vec![Vec::new(); n_refs],
            known_by_right: vec![Vec::new(); n_refs],
            novel: DashMap::new(),
            n_known: 0,
        }
    }

    /// Load annotated junctions from a GTF file.
    pub fn from_gtf(path: &Path, genome: &Genome) -> Result<Self, Error> {
        let sites = crate::align::gtf::parse_gtf_junctions(path, genome)?;
        log::info!("loaded {} annotated splice sites", sites.len());
        let mut db = Self::empty(genome.coords.ref_names().len());
        for ss in sites {
            db.add_known(ss);
        }
        db.finalize();
        Ok(db)
    }

    pub fn add_known(&mut self, ss: SpliceSite) {
        debug_assert!(ss.ref_id < self.known_by_left.len());
        self.known_by_left[ss.ref_id].push(ss);
        self.known_by_right[ss.ref_id].push(ss);
        self.n_known += 1;
    }

    /// Sort the per-chromosome tables; call once after the last `add_known`.
    pub fn finalize(&mut self) {
        for sites in &mut self.known_by_left {
            sites.sort_by_key(|s| (s.left, s.right));
        }
        for sites in &mut self.known_by_right {
            sites.sort_by_key(|s| (s.right, s.left));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_known == 0 && self.novel.is_empty()
    }

    pub fn len(&self) -> usize {
        self.n_known + self.novel.len()
    }

    /// Record a splice site discovered from a read. Safe to call from
    /// concurrent alignment workers.
    pub fn add_novel(&self, ss: SpliceSite) {
        self.novel
            .entry((ss.ref_id, ss.left, ss.right))
            .or_insert(SpliceSite {
                from_file: false,
                ..ss
            });
    }

    /// Is this exact junction already known or discovered?
    pub fn contains(&self, ref_id: usize, left: u64, right: u64) -> bool {
        if self.novel.contains_key(&(ref_id, left, right)) {
            return true;
        }
        if ref_id >= self.known_by_left.len() {
            return false;
        }
        let sites = &self.known_by_left[ref_id];
        let idx = sites.partition_point(|s| (s.left, s.right) < (left, right));
        idx < sites.len() && sites[idx].left == left && sites[idx].right == right
    }

    /// Sites usable for extending an alignment leftward: those whose
    /// `right` boundary falls within `window` of `pos`.
    pub fn left_splice_sites(&self, ref_id: usize, pos: u64, window: u64, out: &mut Vec<SpliceSite>) {
        out.clear();
        if ref_id >= self.known_by_right.len() {
            return;
        }
        let lo = pos.saturating_sub(window);
        let hi = pos + window;

        let sites = &self.known_by_right[ref_id];
        let start = sites.partition_point(|s| s.right < lo);
        for ss in &sites[start..] {
            if ss.right > hi {
                break;
            }
            out.push(*ss);
        }

        for entry in self.novel.iter() {
            let ss = *entry.value();
            if ss.ref_id == ref_id && ss.right >= lo && ss.right <= hi {
                out.push(ss);
            }
        }
    }

    /// Sites usable for extending an alignment rightward: those whose
    /// `left` boundary falls within `window` of `pos`.
    pub fn right_splice_sites(
        &self,
        ref_id: usize,
        pos: u64,
        window: u64,
        out: &mut Vec<SpliceSite>,
    ) {
        out.clear();
        if ref_id >= self.known_by_left.len() {
            return;
        }
        let lo = pos.saturating_sub(window);
        let hi = pos + window;

        let sites = &self.known_by_left[ref_id];
        let start = sites.partition_point(|s| s.left < lo);
        for ss in &sites[start..] {
            if ss.left > hi {
                break;
            }
            out.push(*ss);
        }

        for entry in self.novel.iter() {
            let ss = *entry.value();
            if ss.ref_id == ref_id && ss.left >= lo && ss.left <= hi {
                out.push(ss);
            }
        }
    }
}
