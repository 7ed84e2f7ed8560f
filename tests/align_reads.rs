#![allow(non_snake_case)]

//! End-to-end alignReads runs through the public surface: FASTA + FASTQ
//! (+ optional GTF) in, alignment text out.

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

fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            _ => 'A',
        })
        .collect()
}

#[test]
fn aligns_plain_reads_both_orientations() {
    let genome_seq = random_seq(400, 41);

    let mut fasta = NamedTempFile::new().unwrap();
    writeln!(fasta, ">chr1").unwrap();
    writeln!(fasta, "{genome_seq}").unwrap();

    let fwd_read = &genome_seq[120..220];
    let rev_read = reverse_complement(&genome_seq[250..350]);
    let mut fastq = NamedTempFile::new().unwrap();
    writeln!(fastq, "@fwd").unwrap();
    writeln!(fastq, "{fwd_read}").unwrap();
    writeln!(fastq, "+").unwrap();
    writeln!(fastq, "{}", "I".repeat(100)).unwrap();
    writeln!(fastq, "@rev").unwrap();
    writeln!(fastq, "{rev_read}").unwrap();
    writeln!(fastq, "+").unwrap();
    writeln!(fastq, "{}", "I".repeat(100)).unwrap();

    let out_dir = tempdir().unwrap();
    let prefix = out_dir.path().join("aln_").display().to_string();
    let genome_dir = out_dir.path().join("GenomeDir").display().to_string();

    let params = Parameters::parse_from([
        "ruHISAT",
        "--runMode",
        "alignReads",
        "--genomeFastaFiles",
        fasta.path().to_str().unwrap(),
        "--genomeDir",
        &genome_dir,
        "--readFilesIn",
        fastq.path().to_str().unwrap(),
        "--outFileNamePrefix",
        &prefix,
    ]);
    ruHISAT::run(&params).unwrap();

    let out = std::fs::read_to_string(format!("{prefix}Aligned.out.txt")).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);

    let fwd_line = lines.iter().find(|l| l.starts_with("fwd\t")).unwrap();
    let fields: Vec<&str> = fwd_line.split('\t').collect();
    assert_eq!(fields[1], "+");
    assert_eq!(fields[2], "chr1");
    assert_eq!(fields[3], "120");
    assert_eq!(fields[4], "200"); // perfect score, match bonus 2
    assert_eq!(fields[7], "100M");

    let rev_line = lines.iter().find(|l| l.starts_with("rev\t")).unwrap();
    let fields: Vec<&str> = rev_line.split('\t').collect();
    assert_eq!(fields[1], "-");
    assert_eq!(fields[2], "chr1");
    assert_eq!(fields[3], "250");
    assert_eq!(fields[4], "200");
}

#[test]
fn aligns_spliced_read_with_gtf_annotation() {
    // exon1 (40) + GT..AG intron (80) + exon2 (60)
    let exon1 = format!("{}CC", random_seq(38, 42));
    let exon2 = random_seq(60, 43);
    let intron_body = random_seq(76, 44);
    let tail = random_seq(50, 45);
    let genome_seq = format!("{exon1}GT{intron_body}AG{exon2}{tail}");

    let mut fasta = NamedTempFile::new().unwrap();
    writeln!(fasta, ">chr1").unwrap();
    writeln!(fasta, "{genome_seq}").unwrap();

    // GTF is 1-based inclusive: exon1 = 1..40, exon2 = 121..180
    let mut gtf = NamedTempFile::new().unwrap();
    writeln!(
        gtf,
        "chr1\ttest\texon\t1\t40\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\";"
    )
    .unwrap();
    writeln!(
        gtf,
        "chr1\ttest\texon\t121\t180\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\";"
    )
    .unwrap();

    let mut fastq = NamedTempFile::new().unwrap();
    writeln!(fastq, "@spliced").unwrap();
    writeln!(fastq, "{exon1}{exon2}").unwrap();
    writeln!(fastq, "+").unwrap();
    writeln!(fastq, "{}", "I".repeat(100)).unwrap();

    let out_dir = tempdir().unwrap();
    let prefix = out_dir.path().join("spl_").display().to_string();
    let genome_dir = out_dir.path().join("GenomeDir").display().to_string();

    let params = Parameters::parse_from([
        "ruHISAT",
        "--runMode",
        "alignReads",
        "--genomeFastaFiles",
        fasta.path().to_str().unwrap(),
        "--genomeDir",
        &genome_dir,
        "--readFilesIn",
        fastq.path().to_str().unwrap(),
        "--sjdbGTFfile",
        gtf.path().to_str().unwrap(),
        "--outFileNamePrefix",
        &prefix,
    ]);
    ruHISAT::run(&params).unwrap();

    let out = std::fs::read_to_string(format!("{prefix}Aligned.out.txt")).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields[0], "spliced");
    assert_eq!(fields[1], "+");
    assert_eq!(fields[3], "0");
    assert_eq!(fields[4], "200", "known junction carries no penalty");
    assert_eq!(fields[7], "40M80N60M");
    assert_eq!(fields[8], ".", "no mismatches");
}
