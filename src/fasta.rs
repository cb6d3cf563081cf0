use crate::{open, write_atomic};
use anyhow::{bail, Result};
use kseq::parse_reader;
use log::info;
use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

/// One FASTA record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub id: String,
    pub desc: String,
    pub seq: String,
}

impl SeqRecord {
    pub fn new(id: &str, seq: &str) -> Self {
        SeqRecord {
            id: id.to_string(),
            desc: String::new(),
            seq: seq.to_string(),
        }
    }
}

impl fmt::Display for SeqRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.desc.is_empty() {
            writeln!(f, ">{}\n{}", self.id, self.seq)
        } else {
            writeln!(f, ">{} {}\n{}", self.id, self.desc, self.seq)
        }
    }
}

// --------------------------------------------------
/// Read every record of a FASTA file, in file order
pub fn read_fasta(path: &Path) -> Result<Vec<SeqRecord>> {
    // An empty file has no records to hand to the parser
    if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
        return Ok(vec![]);
    }

    let mut reader = parse_reader(open(path)?)?;
    let mut records = vec![];
    while let Some(rec) = reader.iter_record()? {
        records.push(SeqRecord {
            id: rec.head().to_string(),
            desc: rec.des().trim().to_string(),
            seq: rec.seq().to_string(),
        });
    }

    Ok(records)
}

// --------------------------------------------------
pub fn write_fasta(records: &[SeqRecord], path: &Path) -> Result<()> {
    write_atomic(path, |out| {
        for rec in records {
            write!(out, "{rec}")?;
        }
        Ok(())
    })
}

// --------------------------------------------------
/// Parse a single `>id\nseq` value as stored in a table cell
pub fn parse_fasta_cell(cell: &str) -> Option<SeqRecord> {
    let body = cell.trim().strip_prefix('>')?;
    let (header, seq) = body.split_once('\n').unwrap_or((body, ""));
    let seq: String = seq.split_whitespace().collect();
    if seq.is_empty() {
        return None;
    }

    let header = header.trim();
    let (id, desc) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
    Some(SeqRecord {
        id: id.to_string(),
        desc: desc.trim().to_string(),
        seq,
    })
}

// --------------------------------------------------
/// Partition records into contiguous blocks of `size`; the last may be short
pub fn split_blocks(records: &[SeqRecord], size: usize) -> Result<Vec<&[SeqRecord]>> {
    if size == 0 {
        bail!("Block size must be greater than 0");
    }
    Ok(records.chunks(size).collect())
}

// --------------------------------------------------
/// Write each block to `fasta_block_{n}.fasta`, numbering from 1
pub fn write_blocks(
    records: &[SeqRecord],
    size: usize,
    outdir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(outdir)?;
    let blocks = split_blocks(records, size)?;
    info!(
        "Writing {} records to {} blocks of {size} in \"{}\"",
        records.len(),
        blocks.len(),
        outdir.display()
    );

    let mut paths = vec![];
    for (i, block) in blocks.iter().enumerate() {
        let path = outdir.join(format!("fasta_block_{}.fasta", i + 1));
        write_fasta(block, &path)?;
        paths.push(path);
    }

    Ok(paths)
}

// --------------------------------------------------
#[cfg(test)]
mod fasta_tests {
    use super::{
        parse_fasta_cell, read_fasta, split_blocks, write_blocks, write_fasta,
        SeqRecord,
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn make_records(n: usize) -> Vec<SeqRecord> {
        (0..n)
            .map(|i| SeqRecord::new(&format!("seq{i}"), "MKV"))
            .collect()
    }

    #[test]
    fn test_read_fasta() -> Result<()> {
        let records = read_fasta(Path::new("tests/inputs/ten.fa"))?;
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].id, "P00001");
        assert_eq!(records[0].desc, "flavin reductase");
        // Wrapped sequence lines are joined
        assert_eq!(records[0].seq, "MSTLKEIAQRLGVSKATVSRVLNGKPSVSEETRQKVLA");
        assert_eq!(records[9].id, "P00010");
        Ok(())
    }

    #[test]
    fn test_read_empty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.fa");
        fs::write(&path, "")?;
        assert!(read_fasta(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_read_missing() {
        let res = read_fasta(Path::new("tests/inputs/no-such-file.fa"));
        assert!(res.is_err());
        assert!(res
            .unwrap_err()
            .to_string()
            .starts_with("Cannot read tests/inputs/no-such-file.fa"));
    }

    #[test]
    fn test_write_fasta() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.fa");
        let mut rec = SeqRecord::new("A", "MKT");
        rec.desc = "first one".to_string();
        write_fasta(&[rec, SeqRecord::new("B", "GGG")], &path)?;
        assert_eq!(fs::read_to_string(&path)?, ">A first one\nMKT\n>B\nGGG\n");
        Ok(())
    }

    #[test]
    fn test_parse_fasta_cell() {
        assert_eq!(
            parse_fasta_cell(">WP_1 some protein\nMKT\nLLV\n"),
            Some(SeqRecord {
                id: "WP_1".to_string(),
                desc: "some protein".to_string(),
                seq: "MKTLLV".to_string(),
            })
        );
        assert_eq!(parse_fasta_cell(">WP_1"), None);
        assert_eq!(parse_fasta_cell("MKT"), None);
        assert_eq!(parse_fasta_cell(""), None);
    }

    #[test]
    fn test_split_ten_by_three() -> Result<()> {
        let records = make_records(10);
        let sizes: Vec<_> = split_blocks(&records, 3)?.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_split_sizes_and_order() -> Result<()> {
        for n in 0..25 {
            let records = make_records(n);
            for b in 1..8 {
                let blocks = split_blocks(&records, b)?;
                assert_eq!(blocks.len(), n.div_ceil(b));

                for block in blocks.iter().take(n / b) {
                    assert_eq!(block.len(), b);
                }
                if let Some(last) = blocks.last() {
                    let expected = if n % b == 0 { b } else { n % b };
                    assert_eq!(last.len(), expected);
                }

                let joined: Vec<SeqRecord> =
                    blocks.iter().flat_map(|b| b.iter().cloned()).collect();
                assert_eq!(joined, records);
            }
        }
        Ok(())
    }

    #[test]
    fn test_split_zero_size() {
        let records = make_records(3);
        let res = split_blocks(&records, 0);
        assert!(res.is_err());
    }

    #[test]
    fn test_write_blocks() -> Result<()> {
        let dir = tempdir()?;
        let records = read_fasta(Path::new("tests/inputs/ten.fa"))?;
        let paths = write_blocks(&records, 3, &dir.path().join("fasta_blocks"))?;
        assert_eq!(paths.len(), 4);
        assert!(paths[0].ends_with("fasta_blocks/fasta_block_1.fasta"));
        assert!(paths[3].ends_with("fasta_blocks/fasta_block_4.fasta"));

        let last = read_fasta(&paths[3])?;
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, "P00010");

        let mut all = vec![];
        for path in &paths {
            all.extend(read_fasta(path)?);
        }
        assert_eq!(all, records);
        Ok(())
    }
}
