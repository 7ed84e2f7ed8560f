use std::path::PathBuf;

use clap::Parser;

use crate::align::score::Scoring;
use crate::repeat::RepeatParameter;

// ---------------------------------------------------------------------------
// Run mode enum
// ---------------------------------------------------------------------------

/// `--runMode` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    AlignReads,
    RepeatBuild,
}

impl std::str::FromStr for RunMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alignReads" => Ok(Self::AlignReads),
            "repeatBuild" => Ok(Self::RepeatBuild),
            _ => Err(format!(
                "unknown runMode '{s}'; expected 'alignReads' or 'repeatBuild'"
            )),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlignReads => write!(f, "alignReads"),
            Self::RepeatBuild => write!(f, "repeatBuild"),
        }
    }
}

// ---------------------------------------------------------------------------
// Consensus extension strategy
// ---------------------------------------------------------------------------

/// How the per-family consensus is called during extension.
///
/// `phasedProfile` selects the most common joint left+right extension string
/// among instances; `majorityVote` pre-clusters instances by pairwise edit
/// distance and takes a per-column majority base over the core cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusStrategy {
    PhasedProfile,
    MajorityVote,
}

impl std::str::FromStr for ConsensusStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phasedProfile" => Ok(Self::PhasedProfile),
            "majorityVote" => Ok(Self::MajorityVote),
            _ => Err(format!(
                "unknown consensus strategy '{s}'; expected 'phasedProfile' or 'majorityVote'"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// ruHISAT command-line parameters, `--camelCase` argument names.
///
/// The numeric defaults mirror the empirically tuned values of the original
/// engine; they are deliberately exposed as flags rather than hard-coded so
/// they can be recalibrated without a rebuild.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ruHISAT",
    about = "Repeat-aware, splice-aware RNA-seq aligner core",
    version
)]
pub struct Parameters {
    // ── Run ─────────────────────────────────────────────────────────────
    /// Run mode: alignReads or repeatBuild
    #[arg(long = "runMode", default_value = "alignReads")]
    pub run_mode: RunMode,

    // ── Genome ──────────────────────────────────────────────────────────
    /// Path to genome index directory
    #[arg(long = "genomeDir", default_value = "./GenomeDir")]
    pub genome_dir: PathBuf,

    /// FASTA file(s) with genome reference sequences
    #[arg(long = "genomeFastaFiles", num_args = 1..)]
    pub genome_fasta_files: Vec<PathBuf>,

    // ── Read files ──────────────────────────────────────────────────────
    /// Input read file(s), FASTQ, optionally gzipped
    #[arg(long = "readFilesIn", num_args = 1..)]
    pub read_files_in: Vec<PathBuf>,

    // ── Output ──────────────────────────────────────────────────────────
    /// Output file name prefix (including path)
    #[arg(long = "outFileNamePrefix", default_value = "./")]
    pub out_file_name_prefix: PathBuf,

    // ── Splice site database ────────────────────────────────────────────
    /// GTF file with transcript annotations (source of known splice sites)
    #[arg(long = "sjdbGTFfile")]
    pub sjdb_gtf_file: Option<PathBuf>,

    /// Disable spliced alignment entirely
    #[arg(long = "noSplicedAlignment", default_value_t = false)]
    pub no_spliced_alignment: bool,

    // ── Repeat database construction ────────────────────────────────────
    /// Seed length for repeat clustering (also the minimum shared prefix)
    #[arg(long = "repeatSeedLength", default_value_t = 50)]
    pub repeat_seed_length: usize,

    /// Minimum number of positions sharing a seed to form a cluster
    #[arg(long = "repeatSeedCount", default_value_t = 5)]
    pub repeat_seed_count: usize,

    /// Minimum number of instances that must pass each consensus extension round
    #[arg(long = "repeatCount", default_value_t = 5)]
    pub repeat_count: usize,

    /// Minimum repeat (allele) length written to the repeat database
    #[arg(long = "minRepeatLength", default_value_t = 100)]
    pub min_repeat_length: usize,

    /// Maximum consensus length per repeat family
    #[arg(long = "maxRepeatLength", default_value_t = 10000)]
    pub max_repeat_length: usize,

    /// Per-round edit distance budget for the majority-vote strategy
    #[arg(long = "repeatEdit", default_value_t = 4)]
    pub repeat_edit: usize,

    /// Consensus extension strategy: majorityVote or phasedProfile
    #[arg(long = "repeatConsensusStrategy", default_value = "majorityVote")]
    pub repeat_consensus_strategy: ConsensusStrategy,

    // ── Alignment scoring ───────────────────────────────────────────────
    /// Bonus per matching base
    #[arg(long = "scoreMatch", default_value_t = 2)]
    pub score_match: i64,

    /// Penalty per mismatching base
    #[arg(long = "penMismatch", default_value_t = 6)]
    pub pen_mismatch: i64,

    /// Penalty per soft-clipped base
    #[arg(long = "penSoftClip", default_value_t = 2)]
    pub pen_soft_clip: i64,

    /// Read gap open / extend penalties
    #[arg(long = "penReadGapOpen", default_value_t = 5)]
    pub pen_read_gap_open: i64,
    #[arg(long = "penReadGapExtend", default_value_t = 3)]
    pub pen_read_gap_extend: i64,

    /// Reference gap open / extend penalties
    #[arg(long = "penRefGapOpen", default_value_t = 5)]
    pub pen_ref_gap_open: i64,
    #[arg(long = "penRefGapExtend", default_value_t = 3)]
    pub pen_ref_gap_extend: i64,

    /// Penalty for a canonical (GT-AG) splice junction
    #[arg(long = "penCanSplice", default_value_t = 0)]
    pub pen_can_splice: i64,

    /// Penalty for a GC-AG / AT-AC splice junction
    #[arg(long = "penSemiCanSplice", default_value_t = 6)]
    pub pen_semi_can_splice: i64,

    /// Penalty for a non-canonical splice junction
    #[arg(long = "penNoncanSplice", default_value_t = 12)]
    pub pen_noncan_splice: i64,

    /// Minimum score: constant term
    #[arg(long = "scoreMinConst", default_value_t = 0.0, allow_hyphen_values = true)]
    pub score_min_const: f64,

    /// Minimum score: coefficient of read length
    #[arg(long = "scoreMinLinear", default_value_t = -0.6, allow_hyphen_values = true)]
    pub score_min_linear: f64,

    // ── Alignment search ────────────────────────────────────────────────
    /// Minimum intron length (shorter genomic gaps are deletions)
    #[arg(long = "minIntronLen", default_value_t = 20)]
    pub min_intron_len: usize,

    /// Maximum intron length
    #[arg(long = "maxIntronLen", default_value_t = 500000)]
    pub max_intron_len: usize,

    /// Minimum anchor length over a canonical splice junction
    #[arg(long = "minAnchorLen", default_value_t = 7)]
    pub min_anchor_len: usize,

    /// Minimum anchor length over a non-canonical splice junction
    #[arg(long = "minAnchorLenNoncan", default_value_t = 14)]
    pub min_anchor_len_noncan: usize,

    /// Maximum local index search attempts per read
    #[arg(long = "maxLocalIndexAtts", default_value_t = 64)]
    pub max_local_index_atts: usize,

    /// Maximum genome locations for a usable index lookup
    #[arg(long = "maxSearchHits", default_value_t = 5)]
    pub max_search_hits: usize,
}

impl Parameters {
    /// Bundle the repeat construction parameters.
    pub fn repeat_parameters(&self) -> RepeatParameter {
        RepeatParameter {
            seed_len: self.repeat_seed_length,
            seed_count: self.repeat_seed_count,
            repeat_count: self.repeat_count,
            min_repeat_len: self.min_repeat_length,
            max_repeat_len: self.max_repeat_length,
            max_edit: self.repeat_edit,
            strategy: self.repeat_consensus_strategy,
        }
    }

    /// Bundle the alignment scoring parameters.
    pub fn scoring(&self) -> Scoring {
        Scoring {
            match_bonus: self.score_match,
            mm_penalty: self.pen_mismatch,
            soft_clip_penalty: self.pen_soft_clip,
            read_gap_open: self.pen_read_gap_open,
            read_gap_extend: self.pen_read_gap_extend,
            ref_gap_open: self.pen_ref_gap_open,
            ref_gap_extend: self.pen_ref_gap_extend,
            can_splice_penalty: self.pen_can_splice,
            semi_can_splice_penalty: self.pen_semi_can_splice,
            noncan_splice_penalty: self.pen_noncan_splice,
            score_min_const: self.score_min_const,
            score_min_linear: self.score_min_linear,
        }
    }

    /// Validate parameter combinations that clap alone cannot enforce.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error;

        if self.genome_fasta_files.is_empty() && self.run_mode == RunMode::RepeatBuild {
            return Err(Error::Parameter(
                "--genomeFastaFiles is required when --runMode repeatBuild".into(),
            ));
        }

        if self.run_mode == RunMode::AlignReads && self.read_files_in.is_empty() {
            return Err(Error::Parameter(
                "--readFilesIn is required when --runMode alignReads".into(),
            ));
        }

        if self.repeat_seed_count < 1 {
            return Err(Error::Parameter("--repeatSeedCount must be >= 1".into()));
        }

        if self.repeat_seed_length < 10 {
            return Err(Error::Parameter("--repeatSeedLength must be >= 10".into()));
        }

        if self.min_repeat_length < self.repeat_seed_length {
            return Err(Error::Parameter(
                "--minRepeatLength must be >= --repeatSeedLength".into(),
            ));
        }

        if self.max_repeat_length < self.min_repeat_length {
            return Err(Error::Parameter(
                "--maxRepeatLength must be >= --minRepeatLength".into(),
            ));
        }

        if self.min_intron_len >= self.max_intron_len {
            return Err(Error::Parameter(
                "--minIntronLen must be < --maxIntronLen".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: parse a command line (without program name).
    fn parse(args: &[&str]) -> Parameters {
        let mut full = vec!["ruHISAT"];
        full.extend_from_slice(args);
        Parameters::parse_from(full)
    }

    #[test]
    fn defaults() {
        let p = parse(&["--readFilesIn", "reads.fq"]);
        assert_eq!(p.run_mode, RunMode::AlignReads);
        assert_eq!(p.genome_dir, PathBuf::from("./GenomeDir"));
        assert_eq!(p.repeat_seed_length, 50);
        assert_eq!(p.repeat_seed_count, 5);
        assert_eq!(p.repeat_count, 5);
        assert_eq!(p.min_repeat_length, 100);
        assert_eq!(p.max_repeat_length, 10000);
        assert_eq!(p.repeat_edit, 4);
        assert_eq!(
            p.repeat_consensus_strategy,
            ConsensusStrategy::MajorityVote
        );
        assert_eq!(p.score_match, 2);
        assert_eq!(p.pen_mismatch, 6);
        assert_eq!(p.pen_soft_clip, 2);
        assert_eq!(p.min_intron_len, 20);
        assert_eq!(p.max_intron_len, 500000);
        assert_eq!(p.min_anchor_len, 7);
        assert_eq!(p.min_anchor_len_noncan, 14);
        assert_eq!(p.max_local_index_atts, 64);
        assert_eq!(p.max_search_hits, 5);
        assert!((p.score_min_const - 0.0).abs() < f64::EPSILON);
        assert!((p.score_min_linear - -0.6).abs() < f64::EPSILON);
        assert!(!p.no_spliced_alignment);
        assert!(p.sjdb_gtf_file.is_none());
    }

    #[test]
    fn repeat_build_command() {
        let p = parse(&[
            "--runMode",
            "repeatBuild",
            "--genomeFastaFiles",
            "chr1.fa",
            "chr2.fa",
            "--repeatSeedLength",
            "100",
            "--minRepeatLength",
            "100",
            "--maxRepeatLength",
            "5000",
            "--repeatConsensusStrategy",
            "phasedProfile",
        ]);
        assert_eq!(p.run_mode, RunMode::RepeatBuild);
        assert_eq!(
            p.genome_fasta_files,
            vec![PathBuf::from("chr1.fa"), PathBuf::from("chr2.fa")]
        );
        assert_eq!(p.repeat_seed_length, 100);
        assert_eq!(p.max_repeat_length, 5000);
        assert_eq!(
            p.repeat_consensus_strategy,
            ConsensusStrategy::PhasedProfile
        );
        p.validate().unwrap();
    }

    #[test]
    fn validate_repeat_build_needs_fasta() {
        let p = parse(&["--runMode", "repeatBuild"]);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("genomeFastaFiles"));
    }

    #[test]
    fn validate_align_needs_reads() {
        let p = parse(&["--runMode", "alignReads"]);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("readFilesIn"));
    }

    #[test]
    fn validate_repeat_length_ordering() {
        let p = parse(&[
            "--runMode",
            "repeatBuild",
            "--genomeFastaFiles",
            "g.fa",
            "--minRepeatLength",
            "40",
        ]);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("minRepeatLength"));
    }

    #[test]
    fn scoring_overrides() {
        let p = parse(&[
            "--readFilesIn",
            "r.fq",
            "--scoreMatch",
            "1",
            "--penMismatch",
            "3",
            "--penNoncanSplice",
            "20",
            "--scoreMinLinear",
            "-0.2",
        ]);
        let sc = p.scoring();
        assert_eq!(sc.match_bonus, 1);
        assert_eq!(sc.mm_penalty, 3);
        assert_eq!(sc.noncan_splice_penalty, 20);
        assert!((sc.score_min_linear - -0.2).abs() < f64::EPSILON);
    }
}
