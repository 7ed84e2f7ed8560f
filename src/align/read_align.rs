//! Thin alignReads driver: seeds candidate hits from the whole-genome
//! index, hands each candidate set to the hybrid search, and writes the
//! best alignments as a simple text table.

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::align::hit::{EditKind, GenomeHit};
use crate::align::score::Scoring;
use crate::align::search::{HybridSearch, SearchParams};
use crate::align::sink::{Alignment, AlnSink};
use crate::align::splice::SpliceSiteDb;
use crate::error::Error;
use crate::genome::decode_base;
use crate::index::GenomeIndex;
use crate::io::fastq::{reverse_complement, FastqReader};
use crate::params::Parameters;

/// Summary counters of one alignReads run.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlignStats {
    pub reads: usize,
    pub aligned_reads: usize,
    pub alignments: usize,
}

/// Seed anchor spacing along the read.
const SEED_INTERVAL: usize = 25;

/// Align every read of the input files, writing `<prefix>Aligned.out.txt`.
pub fn align_read_files(params: &Parameters) -> Result<AlignStats, Error> {
    let index = match GenomeIndex::read(&params.genome_dir) {
        Ok(index) => index,
        Err(_) if !params.genome_fasta_files.is_empty() => {
            log::info!("no saved index found; building from FASTA");
            GenomeIndex::build(params)?
        }
        Err(e) => return Err(e),
    };

    let ssdb = match &params.sjdb_gtf_file {
        Some(gtf) => SpliceSiteDb::from_gtf(gtf, &index.genome)?,
        None => SpliceSiteDb::empty(index.genome.coords.ref_names().len()),
    };

    let sc = params.scoring();
    let search_params = SearchParams::from_parameters(params);

    let out_path = format!("{}Aligned.out.txt", params.out_file_name_prefix.display());
    let out = File::create(&out_path).map_err(|e| Error::io(e, out_path.clone()))?;
    let mut out = BufWriter::new(out);

    let mut stats = AlignStats::default();
    let mut search = HybridSearch::new(&index, &ssdb, &sc, search_params);

    for path in &params.read_files_in {
        let mut reader = FastqReader::open(path)?;
        while let Some(read) = reader.next_encoded()? {
            stats.reads += 1;
            let best = align_read(&index, &sc, &mut search, &read.sequence);
            if !best.is_empty() {
                stats.aligned_reads += 1;
            }
            for aln in &best {
                stats.alignments += 1;
                write_alignment(&mut out, &index, &read.name, &read.sequence, aln)
                    .map_err(|e| Error::io(e, out_path.clone()))?;
            }
        }
    }

    out.flush().map_err(|e| Error::io(e, out_path.clone()))?;
    Ok(stats)
}

/// Align one read in both orientations; returns the best-scoring
/// alignments.
pub fn align_read(
    index: &GenomeIndex,
    sc: &Scoring,
    search: &mut HybridSearch,
    read: &[u8],
) -> Vec<Alignment> {
    if read.len() < 2 {
        return Vec::new();
    }
    let minsc = sc.min_score(read.len());
    let mut sink = AlnSink::new();
    let rc = reverse_complement(read);

    for (fw, seq) in [(true, read), (false, rc.as_slice())] {
        let hits = seed_hits(index, sc, seq, fw);
        if hits.is_empty() {
            continue;
        }
        search.reset();
        search.hybrid_search(seq, hits, minsc, &mut sink);
    }

    sink.best_alignments().into_iter().cloned().collect()
}

/// Candidate seed hits: maximal backward matches ending at a few evenly
/// spaced read offsets.
fn seed_hits(index: &GenomeIndex, sc: &Scoring, seq: &[u8], fw: bool) -> Vec<GenomeHit> {
    let rdlen = seq.len();
    let mut hits: Vec<GenomeHit> = Vec::new();

    let mut extoff = rdlen - 1;
    loop {
        let result = index.global_search_backward(seq, extoff, 5, false, 0);
        for &coord in &result.coords {
            let hit = GenomeHit::from_coord(fw, extoff + 1 - result.extlen, result.extlen, coord, sc);
            // skip seeds duplicating an existing diagonal
            let dup = hits.iter().any(|h| {
                h.joined_off as i64 - h.rdoff as i64 == hit.joined_off as i64 - hit.rdoff as i64
            });
            if !dup {
                hits.push(hit);
            }
        }
        if extoff < SEED_INTERVAL {
            break;
        }
        extoff -= SEED_INTERVAL;
    }

    hits
}

fn write_alignment<W: Write>(
    out: &mut W,
    index: &GenomeIndex,
    name: &str,
    read: &[u8],
    aln: &Alignment,
) -> std::io::Result<()> {
    let hit = &aln.hit;
    let chr = &index.genome.coords.ref_names()[hit.ref_id];
    write!(
        out,
        "{name}\t{}\t{chr}\t{}\t{}\t{}\t{}\t",
        if hit.fw { '+' } else { '-' },
        hit.refoff,
        hit.score,
        hit.hitoff(),
        hit.hitlen()
    )?;

    if hit.edits.is_empty() {
        write!(out, "{}M", hit.len)?;
    } else {
        // compact CIGAR-like walk over the edit list
        let mut read_pos = hit.rdoff;
        for edit in &hit.edits {
            match edit.kind {
                EditKind::Mismatch { .. } => {}
                EditKind::ReadGap { len } => {
                    if edit.pos > read_pos {
                        write!(out, "{}M", edit.pos - read_pos)?;
                    }
                    write!(out, "{len}D")?;
                    read_pos = edit.pos;
                }
                EditKind::RefGap { len } => {
                    if edit.pos > read_pos {
                        write!(out, "{}M", edit.pos - read_pos)?;
                    }
                    write!(out, "{len}I")?;
                    read_pos = edit.pos + len as usize;
                }
                EditKind::Splice { len, .. } => {
                    if edit.pos > read_pos {
                        write!(out, "{}M", edit.pos - read_pos)?;
                    }
                    write!(out, "{len}N")?;
                    read_pos = edit.pos;
                }
            }
        }
        if hit.rdoff + hit.len > read_pos {
            write!(out, "{}M", hit.rdoff + hit.len - read_pos)?;
        }
    }

    // mismatch listing: readpos:genomebase>readbase
    write!(out, "\t")?;
    let mut first = true;
    for edit in &hit.edits {
        if let EditKind::Mismatch { chr, qchr } = edit.kind {
            if !first {
                write!(out, ",")?;
            }
            write!(out, "{}:{}>{}", edit.pos, decode_base(chr), decode_base(qchr))?;
            first = false;
        }
    }
    if first {
        write!(out, ".")?;
    }
    writeln!(out, "\t{}", read.len())
}
