use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Error;
use crate::genome::coords::Fragment;
use crate::genome::Genome;
use crate::index::local_index::LocalIndexSet;
use crate::index::suffix_array::SuffixArray;
use crate::index::GenomeIndex;

const MAGIC: &[u8; 4] = b"RHIX";
const VERSION: u32 = 1;

/// File name of the binary index inside the genome directory.
pub const INDEX_FILE: &str = "genome.idx";

/// Serialize genome + fragment table + suffix array.
///
/// Local index windows are rebuilt on load; they are derived data.
pub fn write_index(index: &GenomeIndex, dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;
    let path = dir.join(INDEX_FILE);
    let file = File::create(&path).map_err(|e| Error::io(e, &path))?;
    let mut w = BufWriter::new(file);

    let io_err = |e: std::io::Error| Error::io(e, &path);

    w.write_all(MAGIC).map_err(io_err)?;
    w.write_u32::<LittleEndian>(VERSION).map_err(io_err)?;

    let genome = &index.genome;
    w.write_u64::<LittleEndian>(genome.forward_length)
        .map_err(io_err)?;
    w.write_u64::<LittleEndian>(genome.sequence.len() as u64)
        .map_err(io_err)?;
    w.write_all(&genome.sequence).map_err(io_err)?;

    let fragments = genome.coords.fragments();
    w.write_u64::<LittleEndian>(fragments.len() as u64)
        .map_err(io_err)?;
    for frag in fragments {
        w.write_u64::<LittleEndian>(frag.joined_off).map_err(io_err)?;
        w.write_u64::<LittleEndian>(frag.seq_off).map_err(io_err)?;
        w.write_u64::<LittleEndian>(frag.len).map_err(io_err)?;
        w.write_u64::<LittleEndian>(frag.seq_id as u64)
            .map_err(io_err)?;
        w.write_u8(frag.first as u8).map_err(io_err)?;
    }

    let names = genome.coords.ref_names();
    w.write_u64::<LittleEndian>(names.len() as u64).map_err(io_err)?;
    for name in names {
        let bytes = name.as_bytes();
        w.write_u64::<LittleEndian>(bytes.len() as u64)
            .map_err(io_err)?;
        w.write_all(bytes).map_err(io_err)?;
    }

    let sa = index.suffix_array.positions();
    w.write_u64::<LittleEndian>(sa.len() as u64).map_err(io_err)?;
    for &pos in sa {
        w.write_u64::<LittleEndian>(pos).map_err(io_err)?;
    }

    w.flush().map_err(io_err)?;
    Ok(())
}

/// Load an index written by `write_index`.
pub fn read_index(dir: &Path) -> Result<GenomeIndex, Error> {
    let path = dir.join(INDEX_FILE);
    let file = File::open(&path).map_err(|e| Error::io(e, &path))?;
    let mut r = BufReader::new(file);

    let io_err = |e: std::io::Error| Error::io(e, &path);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(io_err)?;
    if &magic != MAGIC {
        return Err(Error::Index(format!(
            "{}: not a ruHISAT index (bad magic)",
            path.display()
        )));
    }
    let version = r.read_u32::<LittleEndian>().map_err(io_err)?;
    if version != VERSION {
        return Err(Error::Index(format!(
            "{}: unsupported index version {version}",
            path.display()
        )));
    }

    let forward_length = r.read_u64::<LittleEndian>().map_err(io_err)?;
    let seq_len = r.read_u64::<LittleEndian>().map_err(io_err)?;
    let mut sequence = vec![0u8; seq_len as usize];
    r.read_exact(&mut sequence).map_err(io_err)?;

    let n_frags = r.read_u64::<LittleEndian>().map_err(io_err)?;
    let mut fragments = Vec::with_capacity(n_frags as usize);
    for _ in 0..n_frags {
        let joined_off = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let seq_off = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let len = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let seq_id = r.read_u64::<LittleEndian>().map_err(io_err)? as usize;
        let first = r.read_u8().map_err(io_err)? != 0;
        fragments.push(Fragment {
            joined_off,
            seq_off,
            len,
            seq_id,
            first,
        });
    }

    let n_names = r.read_u64::<LittleEndian>().map_err(io_err)?;
    let mut names = Vec::with_capacity(n_names as usize);
    for _ in 0..n_names {
        let len = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let mut bytes = vec![0u8; len as usize];
        r.read_exact(&mut bytes).map_err(io_err)?;
        let name = String::from_utf8(bytes)
            .map_err(|_| Error::Index(format!("{}: malformed name", path.display())))?;
        names.push(name);
    }

    let n_sa = r.read_u64::<LittleEndian>().map_err(io_err)?;
    let mut positions = Vec::with_capacity(n_sa as usize);
    for _ in 0..n_sa {
        positions.push(r.read_u64::<LittleEndian>().map_err(io_err)?);
    }

    let genome = Genome::from_parts(sequence, forward_length, fragments, names);
    let local_indexes = LocalIndexSet::build(&genome);

    Ok(GenomeIndex {
        suffix_array: SuffixArray::from_positions(positions),
        local_indexes,
        genome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::fasta::Chromosome;

    #[test]
    fn round_trip() {
        let chrom = Chromosome {
            name: "chrTest".to_string(),
            sequence: "ACGTNNACGTACG"
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
        let index = GenomeIndex::from_genome(Genome::from_chromosomes(vec![chrom]).unwrap());

        let dir = tempfile::tempdir().unwrap();
        index.write(dir.path()).unwrap();
        let loaded = GenomeIndex::read(dir.path()).unwrap();

        assert_eq!(loaded.genome.sequence, index.genome.sequence);
        assert_eq!(loaded.genome.forward_length, index.genome.forward_length);
        assert_eq!(
            loaded.genome.coords.fragments(),
            index.genome.coords.fragments()
        );
        assert_eq!(
            loaded.genome.coords.ref_names(),
            index.genome.coords.ref_names()
        );
        assert_eq!(
            loaded.suffix_array.positions(),
            index.suffix_array.positions()
        );
        assert_eq!(loaded.local_indexes.len(), index.local_indexes.len());
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, b"NOPE0000").unwrap();
        let err = GenomeIndex::read(dir.path()).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }
}
