use crate::align::hit::GenomeHit;

/// Flags attached to a reported alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlnFlags {
    pub aligned: bool,
    pub mixed_mode: bool,
    pub primary: bool,
    pub opp_fw: bool,
}

impl AlnFlags {
    // TODO: wire mixed_mode/primary/opp_fw through once paired-end mode
    // lands; they are accepted here so call sites won't change.
    pub fn init(aligned: bool, _mixed_mode: bool, _primary: bool, _opp_fw: bool) -> Self {
        AlnFlags {
            aligned,
            mixed_mode: false,
            primary: false,
            opp_fw: false,
        }
    }
}

/// One reported alignment.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub hit: GenomeHit,
    pub flags: AlnFlags,
}

/// Per-read result sink: accumulates reported alignments, answers
/// redundancy queries across them, and tracks the best score seen.
#[derive(Default)]
pub struct AlnSink {
    reported: Vec<Alignment>,
    best_score: Option<i64>,
}

impl AlnSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does this hit only occupy cells an already-reported alignment
    /// covers? Redundant means: same orientation and chromosome, the read
    /// interval contained in a reported alignment's interval, and the
    /// start/end placements on the reported alignment's diagonals. A hit
    /// covering new read territory is never redundant.
    pub fn redundant(&self, hit: &GenomeHit) -> bool {
        for aln in &self.reported {
            let other = &aln.hit;
            if other.fw != hit.fw || other.ref_id != hit.ref_id {
                continue;
            }
            let contained =
                other.rdoff <= hit.rdoff && hit.rdoff + hit.len <= other.rdoff + other.len;
            if !contained {
                continue;
            }
            let start_diag = hit.joined_off as i64 - hit.rdoff as i64;
            let other_start_diag = other.joined_off as i64 - other.rdoff as i64;
            let end_diag = hit.right_joined_off as i64 - (hit.rdoff + hit.len) as i64;
            let other_end_diag =
                other.right_joined_off as i64 - (other.rdoff + other.len) as i64;
            if start_diag == other_start_diag && end_diag == other_end_diag {
                return true;
            }
        }
        false
    }

    /// Record a hit. Returns false when the hit was redundant.
    pub fn report_hit(&mut self, hit: &GenomeHit) -> bool {
        if self.redundant(hit) {
            return false;
        }
        self.best_score = Some(match self.best_score {
            Some(best) => best.max(hit.score),
            None => hit.score,
        });
        self.reported.push(Alignment {
            hit: hit.clone(),
            flags: AlnFlags::init(true, false, true, false),
        });
        true
    }

    /// Best unpaired score so far, or i64::MIN before any report.
    pub fn best_unpaired(&self) -> i64 {
        self.best_score.unwrap_or(i64::MIN)
    }

    pub fn reported(&self) -> &[Alignment] {
        &self.reported
    }

    /// Alignments tied for the best score.
    pub fn best_alignments(&self) -> Vec<&Alignment> {
        match self.best_score {
            Some(best) => self
                .reported
                .iter()
                .filter(|a| a.hit.score == best)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    pub fn into_reported(self) -> Vec<Alignment> {
        self.reported
    }
}
