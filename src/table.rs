use crate::{
    fasta::{parse_fasta_cell, SeqRecord},
    write_atomic,
};
use anyhow::{anyhow, bail, Result};
use csv::{ReaderBuilder, WriterBuilder};
use itertools::Itertools;
use std::{collections::HashSet, path::Path};

/// A CSV table held as strings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Where to find a sequence in a table row
#[derive(Debug, Clone)]
pub enum SequenceColumns {
    /// Separate identifier and residue columns
    Split { id: String, sequence: String },

    /// One `>id\nseq` column
    Fasta(String),
}

impl Table {
    // --------------------------------------------------
    pub fn read(path: &Path) -> Result<Table> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| anyhow!("Cannot read {}: {e}", path.display()))?;

        let headers = reader.headers()?.iter().map(String::from).collect();
        let mut rows = vec![];
        for record in reader.records() {
            let record = record.map_err(|e| anyhow!("{}: {e}", path.display()))?;
            rows.push(record.iter().map(String::from).collect());
        }

        Ok(Table { headers, rows })
    }

    // --------------------------------------------------
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, |out| {
            let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
            wtr.write_record(&self.headers)?;
            for row in &self.rows {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
            Ok(())
        })
    }

    // --------------------------------------------------
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| {
                anyhow!(
                    r#"Missing column "{name}" (have {})"#,
                    self.headers.iter().map(|h| format!("\"{h}\"")).join(", ")
                )
            })
    }

    // --------------------------------------------------
    /// Append tables that share the same header
    pub fn concat(tables: Vec<Table>) -> Result<Table> {
        let mut tables = tables.into_iter();
        let mut combined = match tables.next() {
            Some(first) => first,
            _ => return Ok(Table::default()),
        };

        for table in tables {
            if table.headers != combined.headers {
                bail!(
                    "Cannot concatenate tables with headers [{}] and [{}]",
                    combined.headers.join(", "),
                    table.headers.join(", ")
                );
            }
            combined.rows.extend(table.rows);
        }

        Ok(combined)
    }

    // --------------------------------------------------
    /// Keep the first row for each distinct value of `column`
    pub fn dedup_by(&self, column: &str) -> Result<Table> {
        let col = self.column(column)?;
        let mut seen: HashSet<String> = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row[col].clone()))
            .cloned()
            .collect();

        Ok(Table {
            headers: self.headers.clone(),
            rows,
        })
    }

    // --------------------------------------------------
    /// Add a column computed from each row, replacing one of the same name
    pub fn derive_column<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[String]) -> String,
    {
        let values: Vec<String> = self.rows.iter().map(|row| f(row)).collect();
        match self.headers.iter().position(|h| h == name) {
            Some(col) => {
                for (row, val) in self.rows.iter_mut().zip(values) {
                    row[col] = val;
                }
            }
            _ => {
                self.headers.push(name.to_string());
                for (row, val) in self.rows.iter_mut().zip(values) {
                    row.push(val);
                }
            }
        }
    }

    // --------------------------------------------------
    /// The sequence of each row, `None` where the row has none
    pub fn sequences(&self, columns: &SequenceColumns) -> Result<Vec<Option<SeqRecord>>> {
        match columns {
            SequenceColumns::Split { id, sequence } => {
                let id_col = self.column(id)?;
                let seq_col = self.column(sequence)?;
                Ok(self
                    .rows
                    .iter()
                    .map(|row| {
                        let seq: String = row[seq_col].split_whitespace().collect();
                        (!seq.is_empty()).then(|| SeqRecord::new(row[id_col].trim(), &seq))
                    })
                    .collect())
            }
            SequenceColumns::Fasta(name) => {
                let col = self.column(name)?;
                Ok(self.rows.iter().map(|row| parse_fasta_cell(&row[col])).collect())
            }
        }
    }
}

// --------------------------------------------------
#[cfg(test)]
mod table_tests {
    use super::{SequenceColumns, Table};
    use crate::fasta::SeqRecord;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn strings(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|v| v.to_string()).collect()
    }

    fn hits() -> Table {
        Table {
            headers: strings(&["Alignment Accession", "Alignment Info", "Alignment Sequence"]),
            rows: vec![
                strings(&["A1", "WP_1", "MKT"]),
                strings(&["A2", "WP_2", "MKV"]),
                strings(&["A3", "WP_1", "MKL"]),
            ],
        }
    }

    #[test]
    fn test_read() -> Result<()> {
        let table = Table::read(Path::new("tests/inputs/sequences.csv"))?;
        assert_eq!(table.headers, strings(&["ID", "Sequence", "Organism"]));
        assert_eq!(table.rows.len(), 5);
        assert_eq!(table.rows[1], strings(&["P00002", "MKQLTDLAHHLGVSRSTVSRALNGEP", "E. coli"]));
        Ok(())
    }

    #[test]
    fn test_write_quotes_newlines() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.csv");
        let table = Table {
            headers: strings(&["ID", "FASTA"]),
            rows: vec![strings(&["A", ">A\nMKT"])],
        };
        table.write(&path)?;
        assert_eq!(fs::read_to_string(&path)?, "ID,FASTA\nA,\">A\nMKT\"\n");
        assert_eq!(Table::read(&path)?, table);
        Ok(())
    }

    #[test]
    fn test_missing_column() {
        let res = hits().column("Nope");
        assert!(res.is_err());
        assert_eq!(
            res.unwrap_err().to_string(),
            r#"Missing column "Nope" (have "Alignment Accession", "Alignment Info", "Alignment Sequence")"#
        );
    }

    #[test]
    fn test_concat() -> Result<()> {
        let combined = Table::concat(vec![hits(), hits()])?;
        assert_eq!(combined.rows.len(), 6);
        assert_eq!(Table::concat(vec![])?, Table::default());

        let other = Table {
            headers: strings(&["x"]),
            rows: vec![],
        };
        assert!(Table::concat(vec![hits(), other]).is_err());
        Ok(())
    }

    #[test]
    fn test_dedup_keeps_first() -> Result<()> {
        let deduped = hits().dedup_by("Alignment Info")?;
        assert_eq!(deduped.rows.len(), 2);
        assert_eq!(deduped.rows[0][0], "A1");
        assert_eq!(deduped.rows[1][0], "A2");
        Ok(())
    }

    #[test]
    fn test_dedup_idempotent() -> Result<()> {
        let once = hits().dedup_by("Alignment Info")?;
        let twice = once.dedup_by("Alignment Info")?;
        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn test_derive_column() -> Result<()> {
        let mut table = hits();
        table.derive_column("FASTA", |row| format!(">{}\n{}", row[0], row[2]));
        assert_eq!(table.headers.len(), 4);
        assert_eq!(table.rows[0][3], ">A1\nMKT");

        // Deriving again replaces the column
        let before = table.clone();
        table.derive_column("FASTA", |row| format!(">{}\n{}", row[0], row[2]));
        assert_eq!(table, before);
        Ok(())
    }

    #[test]
    fn test_sequences() -> Result<()> {
        let table = Table {
            headers: strings(&["ID", "Sequence", "FASTA"]),
            rows: vec![
                strings(&["A", "MKT", ">A\nMKT"]),
                strings(&["B", "", ""]),
                strings(&["C", " MKV\nLLA ", ">C\nMKV\nLLA"]),
            ],
        };

        let split = table.sequences(&SequenceColumns::Split {
            id: "ID".to_string(),
            sequence: "Sequence".to_string(),
        })?;
        // Wrapped cells are joined the same way in both modes
        assert_eq!(
            split,
            vec![
                Some(SeqRecord::new("A", "MKT")),
                None,
                Some(SeqRecord::new("C", "MKVLLA")),
            ]
        );

        let fasta = table.sequences(&SequenceColumns::Fasta("FASTA".to_string()))?;
        assert_eq!(fasta, split);
        Ok(())
    }
}
