#![allow(non_snake_case)]

//! End-to-end repeat database construction through the public surface:
//! FASTA in, the five repeat artifacts out.

use std::io::Write;

use clap::Parser;
use tempfile::{tempdir, NamedTempFile};

use ruHISAT::params::Parameters;

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

#[test]
fn repeat_build_writes_all_artifacts() {
    // Five identical 120bp copies separated by unique spacers (the unit is
    // not its own reverse complement, so only sense copies cluster)
    let unit = random_seq(120, 21);
    let mut genome_seq = String::new();
    for salt in 22..27 {
        genome_seq.push_str(&unit);
        genome_seq.push_str(&random_seq(60, salt));
    }

    let mut fasta = NamedTempFile::new().unwrap();
    writeln!(fasta, ">chrR").unwrap();
    writeln!(fasta, "{genome_seq}").unwrap();

    let out_dir = tempdir().unwrap();
    let prefix = out_dir.path().join("rb_").display().to_string();
    let genome_dir = out_dir.path().join("GenomeDir").display().to_string();

    let params = Parameters::parse_from([
        "ruHISAT",
        "--runMode",
        "repeatBuild",
        "--genomeFastaFiles",
        fasta.path().to_str().unwrap(),
        "--genomeDir",
        &genome_dir,
        "--outFileNamePrefix",
        &prefix,
        "--repeatSeedLength",
        "50",
        "--repeatSeedCount",
        "5",
        "--repeatCount",
        "5",
        "--minRepeatLength",
        "100",
        "--maxRepeatLength",
        "300",
    ]);
    ruHISAT::run(&params).unwrap();

    // consensus FASTA: one combined record containing the unit
    let fa = std::fs::read_to_string(format!("{prefix}.rep.fa")).unwrap();
    assert!(fa.starts_with(">rep100-300\n"));
    let fa_seq: String = fa.lines().skip(1).collect();
    assert!(
        fa_seq.contains(&unit) || unit.contains(&fa_seq),
        "consensus must carry the repeated unit"
    );
    for line in fa.lines().skip(1) {
        assert!(line.len() <= 60, "FASTA lines wrap at 60 columns");
    }

    // identical copies: no variants, no haplotypes
    let snp = std::fs::read_to_string(format!("{prefix}.rep.snp")).unwrap();
    assert!(snp.is_empty());
    let hapl = std::fs::read_to_string(format!("{prefix}.rep.haplotype")).unwrap();
    assert!(hapl.is_empty());

    // allele records list every genomic instance with strand
    let info = std::fs::read_to_string(format!("{prefix}.rep.info")).unwrap();
    assert!(info.contains(">rpt_0*0"));
    for start in [0u64, 180, 360, 540, 720] {
        assert!(info.contains(&format!("chrR:{start}:+")), "missing instance at {start}");
    }

    // audit dump carries the summary counters
    let seed_dump = std::fs::read_to_string(format!("{prefix}.rep.100-300.seed")).unwrap();
    assert!(seed_dump.contains("total repeat sequence length"));
    assert!(seed_dump.contains("total allele sequence length"));

    // the binary genome index landed next to it
    assert!(std::path::Path::new(&genome_dir).join("genome.idx").exists());
}

#[test]
fn repeat_build_skips_families_below_thresholds() {
    // Only two copies: below repeatSeedCount 5, nothing qualifies
    let unit = random_seq(120, 31);
    let genome_seq = format!("{}{}{}", unit, random_seq(80, 32), unit);

    let mut fasta = NamedTempFile::new().unwrap();
    writeln!(fasta, ">chrS").unwrap();
    writeln!(fasta, "{genome_seq}").unwrap();

    let out_dir = tempdir().unwrap();
    let prefix = out_dir.path().join("lo_").display().to_string();
    let genome_dir = out_dir.path().join("GenomeDir").display().to_string();

    let params = Parameters::parse_from([
        "ruHISAT",
        "--runMode",
        "repeatBuild",
        "--genomeFastaFiles",
        fasta.path().to_str().unwrap(),
        "--genomeDir",
        &genome_dir,
        "--outFileNamePrefix",
        &prefix,
        "--repeatSeedLength",
        "50",
        "--repeatSeedCount",
        "5",
        "--repeatCount",
        "5",
        "--minRepeatLength",
        "100",
        "--maxRepeatLength",
        "300",
    ]);
    ruHISAT::run(&params).unwrap();

    let fa = std::fs::read_to_string(format!("{prefix}.rep.fa")).unwrap();
    let fa_seq: String = fa.lines().skip(1).collect();
    assert!(fa_seq.is_empty(), "no family satisfies the output criteria");
}
