//! Minimal GTF exon parsing: consecutive exons of a transcript yield the
//! annotated splice sites loaded into the splice site database.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::align::splice::SpliceSite;
use crate::error::Error;
use crate::genome::Genome;

#[derive(Debug, Clone)]
struct Exon {
    ref_id: usize,
    /// 0-based inclusive start and exclusive end.
    start: u64,
    end: u64,
    fw: bool,
}

/// Parse exon features and derive one splice site per consecutive exon
/// pair of each transcript.
pub fn parse_gtf_junctions(path: &Path, genome: &Genome) -> Result<Vec<SpliceSite>, Error> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let reader = BufReader::new(file);

    let ref_ids: HashMap<&str, usize> = genome
        .coords
        .ref_names()
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut transcripts: HashMap<String, Vec<Exon>> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, path))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            return Err(Error::Gtf(format!(
                "{}:{}: expected 9 tab-separated fields, got {}",
                path.display(),
                line_num + 1,
                fields.len()
            )));
        }

        if fields[2] != "exon" {
            continue;
        }

        // chromosomes absent from the genome are skipped, not an error
        let Some(&ref_id) = ref_ids.get(fields[0]) else {
            continue;
        };

        let start: u64 = fields[3].parse().map_err(|_| {
            Error::Gtf(format!(
                "{}:{}: malformed start '{}'",
                path.display(),
                line_num + 1,
                fields[3]
            ))
        })?;
        let end: u64 = fields[4].parse().map_err(|_| {
            Error::Gtf(format!(
                "{}:{}: malformed end '{}'",
                path.display(),
                line_num + 1,
                fields[4]
            ))
        })?;
        if start == 0 || end < start {
            return Err(Error::Gtf(format!(
                "{}:{}: invalid exon interval {start}-{end}",
                path.display(),
                line_num + 1
            )));
        }
        let fw = fields[6] != "-";

        let Some(transcript_id) = parse_attribute(fields[8], "transcript_id") else {
            continue;
        };

        transcripts.entry(transcript_id).or_default().push(Exon {
            ref_id,
            start: start - 1, // GTF is 1-based inclusive
            end,
            fw,
        });
    }

    let mut sites = Vec::new();
    for exons in transcripts.values_mut() {
        exons.sort_by_key(|e| e.start);
        for pair in exons.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.ref_id != b.ref_id || b.start <= a.end {
                continue; // overlapping or malformed exon pair
            }
            sites.push(SpliceSite {
                ref_id: a.ref_id,
                left: a.end - 1,
                right: b.start,
                fw: a.fw,
                from_file: true,
            });
        }
    }
    sites.sort_by_key(|s| (s.ref_id, s.left, s.right));
    sites.dedup_by_key(|s| (s.ref_id, s.left, s.right));
    Ok(sites)
}

/// Extract a quoted attribute value from a GTF attributes field.
fn parse_attribute(attributes: &str, key: &str) -> Option<String> {
    for attr in attributes.split(';') {
        let attr = attr.trim();
        if let Some(rest) = attr.strip_prefix(key) {
            let value = rest.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
