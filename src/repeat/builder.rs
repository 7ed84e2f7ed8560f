use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::error::Error;
use crate::genome::Genome;
use crate::index::suffix_array::SuffixArray;
use crate::repeat::family::RepeatFamily;
use crate::repeat::manager::RepeatManager;
use crate::repeat::seed::{SeedExt, SeedSnp, SnpType};
use crate::repeat::subsa::SubSA;
use crate::repeat::RepeatParameter;

/// Output line width of the consensus FASTA.
const OUTPUT_WIDTH: usize = 60;
/// Positions per line in the allele coordinate listings.
const POSITIONS_PER_LINE: usize = 10;
/// Minimum haplotype span; variants within twice this of each other are
/// grouped into one haplotype record.
const MIN_HAPLOTYPE_LEN: usize = 16;

/// One haplotype: a consensus interval and the variant ids it carries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeedHaplotype {
    range: (usize, usize),
    snp_ids: Vec<String>,
}

/// Drives repeat database construction: streams the suffix array into seed
/// clusters, grows clusters into consensus families, collapses redundant
/// and overlapping families, and serializes the repeat database.
pub struct RepeatBuilder<'a> {
    genome: &'a Genome,
    filename: String,
    subsa: SubSA,
    repeat_map: BTreeMap<usize, RepeatFamily>,
}

impl<'a> RepeatBuilder<'a> {
    pub fn new(genome: &'a Genome, filename: String) -> Self {
        RepeatBuilder {
            genome,
            filename,
            subsa: SubSA::new(1, 1),
            repeat_map: BTreeMap::new(),
        }
    }

    pub fn families(&self) -> &BTreeMap<usize, RepeatFamily> {
        &self.repeat_map
    }

    /// Stream sorted suffix positions into the clustering stage.
    pub fn read_suffix_array(&mut self, rp: &RepeatParameter, sa: &SuffixArray) {
        self.subsa = SubSA::new(rp.seed_len, rp.seed_count);
        let n = sa.len();
        for (count, sa_elt) in sa.iter().enumerate() {
            if count > 0 && count % 10_000_000 == 0 {
                log::info!("SA count {count}");
            }
            self.subsa.push(self.genome, sa_elt, count + 1 == n);
        }
        log::info!(
            "seed clusters: {} covering {} positions",
            self.subsa.num_clusters(),
            self.subsa.size()
        );
    }

    /// Bundle clusters, grow families, drop redundant groups, and merge
    /// overlapping families.
    pub fn build(&mut self, rp: &RepeatParameter) -> Result<(), Error> {
        let repeat_bases = self.subsa.build_repeat_bases(self.genome, rp);
        log::info!("repeat bases: {}", repeat_bases.len());

        let mut manager = RepeatManager::new();
        let mut next_repeat_id = 0usize;
        let mut to_remove: Vec<usize> = Vec::new();

        for base in &repeat_bases {
            let mut fam = RepeatFamily::new(next_repeat_id);
            next_repeat_id += 1;
            fam.init(rp, self.genome, &self.subsa, base);

            // A bundle can hide several distinct motifs; extension peels
            // off the instances that follow the dominant one, and the rest
            // re-seed further families.
            let mut work = vec![fam];
            while let Some(mut fam) = work.pop() {
                if fam.seeds.len() < rp.repeat_count {
                    continue;
                }
                fam.extend_consensus(rp, self.genome);

                let mut split = RepeatFamily::new(next_repeat_id);
                fam.get_next_repeat(self.genome, &mut split);
                if split.seeds.len() >= rp.repeat_count {
                    next_repeat_id += 1;
                    work.push(split);
                }

                if fam.seeds.len() < rp.repeat_count {
                    continue;
                }

                let positions: Vec<u64> = fam.seed_ranges.iter().map(|r| r.left).collect();
                if manager.check_redundant(rp, &self.repeat_map, &positions, &mut to_remove) {
                    continue;
                }
                for &gone in &to_remove {
                    if let Some(old) = self.repeat_map.remove(&gone) {
                        manager.remove_repeat(&old);
                    }
                }

                manager.add_repeat(&fam);
                self.repeat_map.insert(fam.repeat_id, fam);
            }
        }

        self.merge_families(rp, &mut manager);

        log::info!("number of repeats: {}", self.repeat_map.len());
        Ok(())
    }

    /// Pairwise merge pass: families whose allele ranges overlap are merged
    /// into one consensus; a merge that produces a self-repeating consensus
    /// is rolled back and the pair is not retried.
    fn merge_families(&mut self, rp: &RepeatParameter, manager: &mut RepeatManager) {
        let mut merge_tried = 0usize;
        let mut merged = 0usize;
        let mut failed_pairs: HashSet<(usize, usize)> = HashSet::new();

        'restart: loop {
            let ids: Vec<usize> = self.repeat_map.keys().copied().collect();
            for (ai, &a_id) in ids.iter().enumerate() {
                for &b_id in &ids[ai + 1..] {
                    if failed_pairs.contains(&(a_id, b_id)) {
                        continue;
                    }
                    let fam_a = &self.repeat_map[&a_id];
                    let fam_b = &self.repeat_map[&b_id];
                    let Some((contain, left, seed_i, seed_j)) = fam_a.overlap(fam_b) else {
                        continue;
                    };

                    merge_tried += 1;
                    let (absorber_id, absorbee_id, si, sj) = if left {
                        (a_id, b_id, seed_i, seed_j)
                    } else {
                        (b_id, a_id, seed_j, seed_i)
                    };

                    let absorbee = self.repeat_map.remove(&absorbee_id).unwrap();
                    let mut absorber = self.repeat_map.remove(&absorber_id).unwrap();
                    manager.remove_repeat(&absorbee);
                    manager.remove_repeat(&absorber);

                    let ok = absorber.merge(rp, self.genome, &absorbee, contain, si, sj);
                    if ok {
                        merged += 1;
                        manager.add_repeat(&absorber);
                        self.repeat_map.insert(absorber_id, absorber);
                        continue 'restart;
                    }

                    // rolled back: restore both, do not retry the pair
                    manager.add_repeat(&absorber);
                    manager.add_repeat(&absorbee);
                    self.repeat_map.insert(absorber_id, absorber);
                    self.repeat_map.insert(absorbee_id, absorbee);
                    failed_pairs.insert((a_id, b_id));
                }
            }
            break;
        }

        log::info!("family merges: {merged} of {merge_tried} tried");
    }

    /// Write the repeat database artifacts.
    pub fn save(&mut self, rp: &RepeatParameter) -> Result<(), Error> {
        let rep_name = format!("rep{}-{}", rp.min_repeat_len, rp.max_repeat_len);

        // per-family variants
        for fam in self.repeat_map.values_mut() {
            if fam.satisfy(rp) {
                fam.generate_snps(rp, self.genome);
            }
        }

        self.save_seed_dump(rp)?;
        self.save_snps_info_haplotypes(rp, &rep_name)?;
        self.save_consensus(rp, &rep_name)?;
        Ok(())
    }

    fn open_out(&self, suffix: &str) -> Result<BufWriter<File>, Error> {
        let path = format!("{}{}", self.filename, suffix);
        let file = File::create(&path).map_err(|e| Error::io(e, path.clone()))?;
        Ok(BufWriter::new(file))
    }

    /// `<prefix>.rep.<min>-<max>.seed`: per-instance extension audit dump.
    fn save_seed_dump(&self, rp: &RepeatParameter) -> Result<(), Error> {
        let mut fp = self.open_out(&format!(
            ".rep.{}-{}.seed",
            rp.min_repeat_len, rp.max_repeat_len
        ))?;

        let mut total_rep_seq_len = 0usize;
        let mut total_allele_seq_len = 0usize;
        for fam in self.repeat_map.values() {
            if !fam.satisfy(rp) {
                continue;
            }
            fam.save_seed_extension(
                rp,
                self.genome,
                &mut fp,
                &mut total_rep_seq_len,
                &mut total_allele_seq_len,
            )?;
        }

        let mut total_qual_seeds = 0usize;
        for fam in self.repeat_map.values() {
            total_qual_seeds += fam
                .seeds
                .iter()
                .filter(|s| s.len() as usize >= rp.min_repeat_len)
                .count();
        }

        writeln!(fp, "total repeat sequence length: {total_rep_seq_len}")?;
        writeln!(fp, "total allele sequence length: {total_allele_seq_len}")?;
        writeln!(fp, "total number of seeds: {total_qual_seeds}")?;
        Ok(())
    }

    /// `.rep.snp`, `.rep.info`, and `.rep.haplotype`.
    fn save_snps_info_haplotypes(
        &mut self,
        rp: &RepeatParameter,
        rep_name: &str,
    ) -> Result<(), Error> {
        let mut snp_fp = self.open_out(".rep.snp")?;
        let mut info_fp = self.open_out(".rep.info")?;
        let mut hapl_fp = self.open_out(".rep.haplotype")?;

        let mut consensus_baseoff = 0usize;
        let mut snp_id_base = 0usize;
        let mut hapl_id_base = 0usize;

        let ids: Vec<usize> = self.repeat_map.keys().copied().collect();
        for (grp_id, id) in ids.iter().enumerate() {
            let fam = self.repeat_map.get_mut(id).unwrap();
            if !fam.satisfy(rp) {
                continue;
            }

            // assign sequential ids in consensus-position order
            let mut order: Vec<usize> = (0..fam.snps.len()).collect();
            order.sort_by_key(|&i| (fam.snps[i].pos, fam.snps[i].len));
            for &i in &order {
                fam.snps[i].id = snp_id_base;
                snp_id_base += 1;
            }

            for &i in &order {
                let snp = &fam.snps[i];
                write_snp(&mut snp_fp, snp, rep_name, consensus_baseoff)?;
            }

            let fam = &self.repeat_map[id];
            write_alleles_and_haplotypes(
                &mut info_fp,
                &mut hapl_fp,
                self.genome,
                rp,
                fam,
                grp_id,
                rep_name,
                consensus_baseoff,
                &mut hapl_id_base,
            )?;

            consensus_baseoff += self.repeat_map[id].consensus.len();
        }
        Ok(())
    }

    /// `.rep.fa`: all family consensuses as one combined FASTA record.
    fn save_consensus(&self, rp: &RepeatParameter, rep_name: &str) -> Result<(), Error> {
        let mut fp = self.open_out(".rep.fa")?;
        writeln!(fp, ">{rep_name}")?;

        let mut oskip = 0usize;
        for fam in self.repeat_map.values() {
            if !fam.satisfy(rp) {
                continue;
            }
            let constr = &fam.consensus;
            let mut si = 0usize;
            while si < constr.len() {
                let out_len = (OUTPUT_WIDTH - oskip).min(constr.len() - si);
                write!(fp, "{}", &constr[si..si + out_len])?;
                if oskip + out_len == OUTPUT_WIDTH {
                    writeln!(fp)?;
                    oskip = 0;
                } else {
                    oskip += out_len;
                }
                si += out_len;
            }
        }
        if oskip > 0 {
            writeln!(fp)?;
        }
        Ok(())
    }
}

fn write_snp<W: Write>(
    fp: &mut W,
    snp: &SeedSnp,
    rep_name: &str,
    baseoff: usize,
) -> std::io::Result<()> {
    write!(fp, "rps{}\t", snp.id)?;
    match snp.snp_type {
        SnpType::Single => write!(fp, "single")?,
        SnpType::Deletion => write!(fp, "deletion")?,
        SnpType::Insertion => write!(fp, "insertion")?,
    }
    write!(fp, "\t{rep_name}\t{}\t", baseoff + snp.pos)?;
    match snp.snp_type {
        SnpType::Single | SnpType::Insertion => writeln!(fp, "{}", snp.base)?,
        SnpType::Deletion => writeln!(fp, "{}", snp.len)?,
    }
    Ok(())
}

/// Group instances with identical consensus span and variant set into
/// alleles; write the `.rep.info` records and derive haplotypes.
#[allow(clippy::too_many_arguments)]
fn write_alleles_and_haplotypes<W: Write, W2: Write>(
    info_fp: &mut W,
    hapl_fp: &mut W2,
    genome: &Genome,
    rp: &RepeatParameter,
    fam: &RepeatFamily,
    grp_id: usize,
    rep_name: &str,
    baseoff: usize,
    hapl_id_base: &mut usize,
) -> std::io::Result<()> {
    let seeds = &fam.seeds;
    let mut haplo_list: Vec<SeedHaplotype> = Vec::new();

    let mut allele_id = 0usize;
    let mut sb = 0usize;
    while sb < seeds.len() {
        let mut se = sb + 1;
        while se < seeds.len()
            && SeedExt::same_consensus(&seeds[sb], &seeds[se])
            && SeedExt::same_snps(&seeds[sb], &seeds[se])
            && seeds[sb].aligned == seeds[se].aligned
        {
            se += 1;
        }

        if !seeds[sb].aligned || (seeds[sb].len() as usize) < rp.min_repeat_len {
            sb = se;
            continue;
        }

        write_allele(
            info_fp, genome, fam, grp_id, allele_id, (sb, se), rep_name, baseoff,
        )?;
        generate_haplotypes(fam, &seeds[sb], &mut haplo_list);

        allele_id += 1;
        sb = se;
    }

    haplo_list.sort();
    for haplo in &haplo_list {
        write!(
            hapl_fp,
            "rpht{}\t{}\t{}\t{}\t",
            *hapl_id_base,
            rep_name,
            baseoff + haplo.range.0,
            baseoff + haplo.range.1
        )?;
        *hapl_id_base += 1;
        debug_assert!(!haplo.snp_ids.is_empty());
        writeln!(hapl_fp, "{}", haplo.snp_ids.join(","))?;
    }
    Ok(())
}

fn write_allele<W: Write>(
    fp: &mut W,
    genome: &Genome,
    fam: &RepeatFamily,
    grp_id: usize,
    allele_id: usize,
    range: (usize, usize),
    rep_name: &str,
    baseoff: usize,
) -> std::io::Result<()> {
    let (sb, se) = range;
    let first = &fam.seeds[sb];
    let pos_size = se - sb;

    write!(
        fp,
        ">rpt_{}*{}\t{}\t{}\t{}\t{}\t{}\t",
        grp_id,
        allele_id,
        rep_name,
        baseoff + first.consensus_pos.0,
        first.consensus_pos.1 - first.consensus_pos.0,
        pos_size,
        first.snps.len()
    )?;
    for (i, &si) in first.snps.iter().enumerate() {
        if i > 0 {
            write!(fp, ",")?;
        }
        write!(fp, "rps{}", fam.snps[si].id)?;
    }
    writeln!(fp)?;

    for i in 0..pos_size {
        if i > 0 && i % POSITIONS_PER_LINE == 0 {
            writeln!(fp)?;
        }
        if i % POSITIONS_PER_LINE != 0 {
            write!(fp, " ")?;
        }

        let seed = &fam.seeds[sb + i];
        let mut joined = seed.pos.0;
        let fw = joined < genome.forward_length;
        if !fw {
            joined = genome.len() - joined - first.len();
        }
        if let Some((chr, off)) = genome.coords.get_genome_coord(joined) {
            write!(fp, "{}:{}:{}", chr, off, if fw { '+' } else { '-' })?;
        }
    }
    writeln!(fp)?;
    Ok(())
}

/// Break an allele's variant list into haplotypes: variants within twice
/// the minimum haplotype span of each other group together; each haplotype
/// spans at least `MIN_HAPLOTYPE_LEN` bases, clipped to the allele end.
fn generate_haplotypes(fam: &RepeatFamily, seed: &SeedExt, haplo_list: &mut Vec<SeedHaplotype>) {
    if seed.snps.is_empty() {
        return;
    }

    let mut snps: Vec<&SeedSnp> = seed.snps.iter().map(|&si| &fam.snps[si]).collect();
    snps.sort_by_key(|s| (s.pos, s.len));

    let max_right_pos = seed.consensus_pos.1 - 1;
    debug_assert!(snps.iter().all(|s| s.pos <= max_right_pos));

    let mut eb = 0usize;
    let mut ee = 1usize;
    while ee < snps.len() + 1 {
        if ee == snps.len() || snps[eb].pos + (MIN_HAPLOTYPE_LEN << 1) < snps[ee].pos {
            let left_pos = snps[eb].pos;
            let mut right_pos = snps[ee - 1].pos;
            if snps[ee - 1].snp_type == SnpType::Deletion {
                right_pos += snps[ee - 1].len;
            }
            if left_pos + MIN_HAPLOTYPE_LEN - 1 > right_pos {
                right_pos = left_pos + MIN_HAPLOTYPE_LEN - 1;
            }
            right_pos = right_pos.min(max_right_pos);
            debug_assert!(left_pos <= right_pos);

            let haplotype = SeedHaplotype {
                range: (left_pos, right_pos),
                snp_ids: snps[eb..ee].iter().map(|s| format!("rps{}", s.id)).collect(),
            };
            if !haplo_list.contains(&haplotype) {
                haplo_list.push(haplotype);
            }
            eb = ee;
        }
        ee += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::fasta::Chromosome;
    use crate::params::ConsensusStrategy;

    fn make_genome(seq: &str) -> Genome {
        let chrom = Chromosome {
            name: "chr1".to_string(),
            sequence: seq
                .bytes()
                .map(|b| match b {
                    b'A' => 0,
                    b'C' => 1,
                    b'G' => 2,
                    b'T' => 3,
                    _ => 4,
                })
                .collect(),
        };
        Genome::from_chromosomes(vec![chrom]).unwrap()
    }

    fn spec_rp() -> RepeatParameter {
        RepeatParameter {
            seed_len: 5,
            seed_count: 2,
            repeat_count: 2,
            min_repeat_len: 12,
            max_repeat_len: 100,
            max_edit: 4,
            strategy: ConsensusStrategy::MajorityVote,
        }
    }

    #[test]
    fn end_to_end_two_twelvemers() {
        let genome = make_genome("AAACCCGGGTTTAAACCCGGGTTT");
        let sa = SuffixArray::build(&genome);
        let rp = spec_rp();

        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("test").display().to_string();
        let mut builder = RepeatBuilder::new(&genome, prefix.clone());
        builder.read_suffix_array(&rp, &sa);
        builder.build(&rp).unwrap();

        assert!(!builder.families().is_empty());
        let best = builder
            .families()
            .values()
            .max_by_key(|f| f.consensus.len())
            .unwrap();
        assert!(best.consensus.contains("AAACCCGGGTTT"));

        builder.save(&rp).unwrap();

        let fa = std::fs::read_to_string(format!("{prefix}.rep.fa")).unwrap();
        assert!(fa.starts_with(">rep12-100\n"));
        let fa_seq: String = fa.lines().skip(1).collect();
        assert!(fa_seq.contains("AAACCCGGGTTT"));

        // identical copies: no variants, no haplotypes
        let snp = std::fs::read_to_string(format!("{prefix}.rep.snp")).unwrap();
        assert!(snp.is_empty());
        let hapl = std::fs::read_to_string(format!("{prefix}.rep.haplotype")).unwrap();
        assert!(hapl.is_empty());

        let info = std::fs::read_to_string(format!("{prefix}.rep.info")).unwrap();
        assert!(info.contains(">rpt_"));
        assert!(info.contains("chr1:0:+") || info.contains("chr1:12:+"));
        // the palindromic sequence also places antisense instances
        assert!(info.contains(":-"));

        let seed_dump =
            std::fs::read_to_string(format!("{prefix}.rep.12-100.seed")).unwrap();
        assert!(seed_dump.contains("total repeat sequence length"));
    }

    #[test]
    fn snp_file_format() {
        let mut fp = Vec::new();
        let mut snp = SeedSnp::new(SnpType::Single, 42, 1, "G".into());
        snp.id = 3;
        write_snp(&mut fp, &snp, "rep100-200", 1000).unwrap();
        assert_eq!(String::from_utf8(fp).unwrap(), "rps3\tsingle\trep100-200\t1042\tG\n");

        let mut fp = Vec::new();
        let mut del = SeedSnp::new(SnpType::Deletion, 7, 3, "ACG".into());
        del.id = 4;
        write_snp(&mut fp, &del, "rep100-200", 0).unwrap();
        assert_eq!(String::from_utf8(fp).unwrap(), "rps4\tdeletion\trep100-200\t7\t3\n");

        let mut fp = Vec::new();
        let mut ins = SeedSnp::new(SnpType::Insertion, 9, 2, "TT".into());
        ins.id = 5;
        write_snp(&mut fp, &ins, "rep100-200", 0).unwrap();
        assert_eq!(String::from_utf8(fp).unwrap(), "rps5\tinsertion\trep100-200\t9\tTT\n");
    }

    #[test]
    fn haplotype_grouping() {
        let mut fam = RepeatFamily::new(0);
        fam.consensus = "A".repeat(300);
        for (pos, id) in [(10usize, 0usize), (20, 1), (200, 2)] {
            let mut snp = SeedSnp::new(SnpType::Single, pos, 1, "C".into());
            snp.id = id;
            fam.snps.push(snp);
        }
        let seed = SeedExt {
            orig_pos: (0, 300),
            pos: (0, 300),
            consensus_pos: (0, 300),
            bound: (0, 600),
            snps: vec![0, 1, 2],
            ..SeedExt::default()
        };

        let mut haplos = Vec::new();
        generate_haplotypes(&fam, &seed, &mut haplos);
        // Variants at 10 and 20 group (within 32bp); 200 stands alone
        assert_eq!(haplos.len(), 2);
        assert_eq!(haplos[0].snp_ids, vec!["rps0", "rps1"]);
        assert_eq!(haplos[0].range, (10, 25)); // min span 16: 10..=25
        assert_eq!(haplos[1].snp_ids, vec!["rps2"]);
        assert_eq!(haplos[1].range, (200, 215));
    }

    #[test]
    fn consensus_fasta_wrapping() {
        // Families concatenate into one record wrapped at 60 columns
        let genome = make_genome("AAACCCGGGTTTAAACCCGGGTTT");
        let mut fam = RepeatFamily::new(0);
        fam.consensus = "ACGT".repeat(40); // 160 bases
        fam.seeds = vec![
            SeedExt {
                orig_pos: (0, 12),
                pos: (0, 12),
                consensus_pos: (0, 160),
                bound: (0, 24),
                ..SeedExt::default()
            },
            SeedExt {
                orig_pos: (12, 24),
                pos: (12, 24),
                consensus_pos: (0, 160),
                bound: (0, 24),
                ..SeedExt::default()
            },
        ];
        fam.internal_update();

        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("wrap").display().to_string();
        let mut builder = RepeatBuilder::new(&genome, prefix.clone());
        let rp = RepeatParameter {
            seed_len: 5,
            seed_count: 2,
            repeat_count: 2,
            min_repeat_len: 12,
            max_repeat_len: 1000,
            max_edit: 4,
            strategy: ConsensusStrategy::MajorityVote,
        };
        builder.repeat_map.insert(0, fam);
        builder.save_consensus(&rp, "rep12-1000").unwrap();

        let fa = std::fs::read_to_string(format!("{prefix}.rep.fa")).unwrap();
        let lines: Vec<&str> = fa.lines().collect();
        assert_eq!(lines[0], ">rep12-1000");
        assert_eq!(lines[1].len(), 60);
        assert_eq!(lines[2].len(), 60);
        assert_eq!(lines[3].len(), 40);
    }
}
