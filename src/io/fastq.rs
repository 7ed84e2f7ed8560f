/// FASTQ reader with base encoding and decompression support
use crate::error::Error;
use flate2::read::GzDecoder;
use noodles::fastq;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A read from a FASTQ file with encoded bases
#[derive(Debug, Clone)]
pub struct EncodedRead {
    /// Read identifier
    pub name: String,
    /// Base sequence encoded as 0=A, 1=C, 2=G, 3=T, 4=N
    pub sequence: Vec<u8>,
    /// Quality scores (raw FASTQ quality values)
    pub quality: Vec<u8>,
}

/// FASTQ reader that handles decompression and base encoding
pub struct FastqReader {
    inner: fastq::io::Reader<Box<dyn BufRead + Send>>,
}

impl FastqReader {
    /// Open a FASTQ file, auto-detecting gzip compression by extension.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let path_str = path.to_string_lossy();
        let is_gzipped = path_str.ends_with(".gz") || path_str.ends_with(".gzip");

        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let reader: Box<dyn BufRead + Send> = if is_gzipped {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(Self {
            inner: fastq::io::Reader::new(reader),
        })
    }

    /// Get next read with encoded bases
    pub fn next_encoded(&mut self) -> Result<Option<EncodedRead>, Error> {
        let mut record = fastq::Record::default();
        match self.inner.read_record(&mut record) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let name = String::from_utf8_lossy(record.name()).to_string();
                let sequence = record.sequence().iter().map(|&b| encode_base(b)).collect();
                let quality = record.quality_scores().to_vec();
                Ok(Some(EncodedRead {
                    name,
                    sequence,
                    quality,
                }))
            }
            Err(e) => Err(Error::Fastq(e.to_string())),
        }
    }
}

/// Encode an ASCII base to its 2-bit value (4 = N/other).
#[inline]
pub fn encode_base(base: u8) -> u8 {
    match base {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 4,
    }
}

/// Complement an encoded base (N maps to itself).
#[inline]
pub fn complement_base(base: u8) -> u8 {
    if base < 4 {
        3 - base
    } else {
        base
    }
}

/// Reverse-complement an encoded sequence.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement_base(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn read_plain_fastq() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "@read1").unwrap();
        writeln!(file, "ACGTN").unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "IIIII").unwrap();
        writeln!(file, "@read2").unwrap();
        writeln!(file, "TTTT").unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "JJJJ").unwrap();

        let mut reader = FastqReader::open(file.path()).unwrap();
        let r1 = reader.next_encoded().unwrap().unwrap();
        assert_eq!(r1.name, "read1");
        assert_eq!(r1.sequence, vec![0, 1, 2, 3, 4]);
        assert_eq!(r1.quality.len(), 5);

        let r2 = reader.next_encoded().unwrap().unwrap();
        assert_eq!(r2.name, "read2");
        assert_eq!(r2.sequence, vec![3, 3, 3, 3]);

        assert!(reader.next_encoded().unwrap().is_none());
    }

    #[test]
    fn read_gzipped_fastq() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let file = NamedTempFile::with_suffix(".gz").unwrap();
        {
            let mut enc = GzEncoder::new(File::create(file.path()).unwrap(), Compression::fast());
            writeln!(enc, "@gz1").unwrap();
            writeln!(enc, "GATTACA").unwrap();
            writeln!(enc, "+").unwrap();
            writeln!(enc, "IIIIIII").unwrap();
            enc.finish().unwrap();
        }

        let mut reader = FastqReader::open(file.path()).unwrap();
        let r = reader.next_encoded().unwrap().unwrap();
        assert_eq!(r.name, "gz1");
        assert_eq!(r.sequence, vec![2, 0, 3, 3, 0, 1, 0]);
    }

    #[test]
    fn reverse_complement_round_trip() {
        let seq = vec![0u8, 0, 1, 1, 4, 2];
        let rc = reverse_complement(&seq);
        assert_eq!(rc, vec![1, 4, 2, 2, 3, 3]);
        assert_eq!(reverse_complement(&rc), seq);
    }
}
