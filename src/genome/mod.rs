pub mod coords;
pub mod fasta;

use crate::error::Error;
use crate::params::Parameters;

use coords::{CoordHelper, Fragment};
use fasta::{parse_fasta_files, Chromosome};

/// The joined genome: every non-N stretch of every chromosome concatenated,
/// followed by the reverse complement of that forward half.
///
/// `sequence` holds one byte per base (A=0, C=1, G=2, T=3 — N runs are
/// dropped and recorded as fragment gaps, so every stored base is decodable).
/// A position below `forward_length` is on the sense strand; the antisense
/// copy of forward position `i` sits at `2*forward_length - 1 - i`.
pub struct Genome {
    pub sequence: Vec<u8>,
    pub forward_length: u64,
    pub coords: CoordHelper,
}

impl Genome {
    /// Build the joined genome from FASTA files.
    pub fn from_fasta(params: &Parameters) -> Result<Self, Error> {
        let chromosomes = parse_fasta_files(&params.genome_fasta_files)?;
        Self::from_chromosomes(chromosomes)
    }

    /// Build the joined genome from already-parsed chromosomes.
    pub fn from_chromosomes(chromosomes: Vec<Chromosome>) -> Result<Self, Error> {
        let mut sequence: Vec<u8> = Vec::new();
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut ref_names: Vec<String> = Vec::new();

        for (seq_id, chrom) in chromosomes.iter().enumerate() {
            if chrom.sequence.is_empty() {
                return Err(Error::Fasta(format!(
                    "chromosome '{}' has zero length",
                    chrom.name
                )));
            }
            ref_names.push(chrom.name.clone());

            // Split the chromosome at N runs; each maximal non-N stretch
            // becomes one fragment of the joined genome.
            let mut first = true;
            let mut i = 0usize;
            while i < chrom.sequence.len() {
                if chrom.sequence[i] >= 4 {
                    i += 1;
                    continue;
                }
                let frag_seq_off = i as u64;
                let frag_joined_off = sequence.len() as u64;
                while i < chrom.sequence.len() && chrom.sequence[i] < 4 {
                    sequence.push(chrom.sequence[i]);
                    i += 1;
                }
                fragments.push(Fragment {
                    joined_off: frag_joined_off,
                    seq_off: frag_seq_off,
                    len: i as u64 - frag_seq_off,
                    seq_id,
                    first,
                });
                first = false;
            }

            if first {
                return Err(Error::Fasta(format!(
                    "chromosome '{}' contains no unambiguous bases",
                    chrom.name
                )));
            }
        }

        let forward_length = sequence.len() as u64;

        // Append the reverse complement of the forward half
        sequence.reserve(forward_length as usize);
        for i in (0..forward_length as usize).rev() {
            sequence.push(3 - sequence[i]);
        }

        let coords = CoordHelper::new(forward_length * 2, forward_length, fragments, ref_names);

        Ok(Genome {
            sequence,
            forward_length,
            coords,
        })
    }

    /// Rebuild from parts (used when loading a saved index).
    pub fn from_parts(
        sequence: Vec<u8>,
        forward_length: u64,
        fragments: Vec<Fragment>,
        ref_names: Vec<String>,
    ) -> Self {
        let coords = CoordHelper::new(forward_length * 2, forward_length, fragments, ref_names);
        Genome {
            sequence,
            forward_length,
            coords,
        }
    }

    /// Total joined length (forward + reverse complement).
    pub fn len(&self) -> u64 {
        self.sequence.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Base at a joined position, always in {0,1,2,3}.
    #[inline]
    pub fn get_base(&self, pos: u64) -> u8 {
        debug_assert!(pos < self.len());
        self.sequence[pos as usize]
    }

    /// Decode a joined-genome slice to an ACGT string.
    pub fn get_string(&self, start: u64, len: u64) -> String {
        debug_assert!(start + len <= self.len());
        let mut s = String::with_capacity(len as usize);
        for i in start..start + len {
            s.push(b"ACGT"[self.sequence[i as usize] as usize] as char);
        }
        s
    }
}

/// Decode a single base value to its ACGT character.
#[inline]
pub fn decode_base(b: u8) -> char {
    debug_assert!(b < 4);
    b"ACGT"[b as usize] as char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chrom(name: &str, seq: &str) -> Chromosome {
        Chromosome {
            name: name.to_string(),
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
        }
    }

    #[test]
    fn joined_layout_single_chromosome() {
        let genome = Genome::from_chromosomes(vec![chrom("chr1", "ACGT")]).unwrap();
        assert_eq!(genome.forward_length, 4);
        assert_eq!(genome.len(), 8);
        assert_eq!(genome.get_string(0, 4), "ACGT");
        // Reverse complement of ACGT is ACGT
        assert_eq!(genome.get_string(4, 4), "ACGT");
    }

    #[test]
    fn reverse_complement_mirrors_forward() {
        let genome = Genome::from_chromosomes(vec![chrom("chr1", "AACCG")]).unwrap();
        assert_eq!(genome.forward_length, 5);
        assert_eq!(genome.get_string(5, 5), "CGGTT");
        for i in 0..5u64 {
            assert_eq!(genome.get_base(i), 3 - genome.get_base(9 - i));
        }
    }

    #[test]
    fn n_runs_become_fragment_gaps() {
        let genome =
            Genome::from_chromosomes(vec![chrom("chr1", "ACGTNNNNACG"), chrom("chr2", "TTTT")])
                .unwrap();
        // Joined forward: ACGT + ACG + TTTT = 11 bases, no Ns stored
        assert_eq!(genome.forward_length, 11);
        assert_eq!(genome.get_string(0, 11), "ACGTACGTTTT");

        let frags = genome.coords.fragments();
        assert_eq!(frags.len(), 3);
        assert_eq!((frags[0].joined_off, frags[0].seq_off, frags[0].len), (0, 0, 4));
        assert!(frags[0].first);
        assert_eq!((frags[1].joined_off, frags[1].seq_off, frags[1].len), (4, 8, 3));
        assert!(!frags[1].first);
        assert_eq!((frags[2].joined_off, frags[2].seq_off, frags[2].len), (7, 0, 4));
        assert!(frags[2].first);

        // The gap shows up in chromosome-relative coordinates
        assert_eq!(genome.coords.get_genome_coord(4), Some(("chr1", 8)));
        assert_eq!(genome.coords.get_genome_coord(7), Some(("chr2", 0)));
    }

    #[test]
    fn all_n_chromosome_is_rejected() {
        let result = Genome::from_chromosomes(vec![chrom("chr1", "NNNN")]);
        assert!(result.is_err());
    }

    #[test]
    fn fragment_boundaries_respected_on_both_strands() {
        let genome =
            Genome::from_chromosomes(vec![chrom("chr1", "ACGTNNACG")]).unwrap();
        // Fragments: 0..4 and 4..7 in joined coords
        assert_eq!(genome.coords.get_end(0), 4);
        assert_eq!(genome.coords.get_end(4), 7);
        // Antisense half: position 7 mirrors forward 6 (fragment 4..7)
        assert_eq!(genome.coords.get_start(7), 7);
        assert_eq!(genome.coords.get_end(7), 10);
        // Antisense of fragment 0..4 occupies 10..14
        assert_eq!(genome.coords.get_start(13), 10);
        assert_eq!(genome.coords.get_end(13), 14);
    }
}
