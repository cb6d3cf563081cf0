use crate::{
    blast_xml::{first_word, BlastOutput, Hsp},
    table::Table,
    tool::Summary,
    write_atomic, HitsArgs,
};
use anyhow::{bail, Result};
use csv::WriterBuilder;
use itertools::Itertools;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// One HSP of one hit for one query
/// E-value and bit score keep BLAST's own text once they are known to parse
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitRecord {
    #[serde(rename = "Query Accession")]
    pub query_accession: String,
    #[serde(rename = "Alignment Accession")]
    pub accession: String,
    #[serde(rename = "Alignment Info")]
    pub info: String,
    #[serde(rename = "Alignment Sequence")]
    pub sequence: String,
    #[serde(rename = "HSP E-value")]
    pub evalue: String,
    #[serde(rename = "HSP Bit Score")]
    pub bit_score: String,
    #[serde(rename = "HSP Identity")]
    pub identity: u32,
}

const BLOCK_TABLE_PREFIX: &str = "blast_result_";

// --------------------------------------------------
pub fn run(args: &HitsArgs) -> Result<Summary> {
    if !args.results.is_dir() {
        bail!(r#"Results directory "{}" does not exist"#, args.results.display());
    }
    fs::create_dir_all(&args.tables)?;
    fs::create_dir_all(&args.outdir)?;

    let mut summary = Summary::new("hits");
    let mut blocks = HashSet::new();
    for xml in xml_files(&args.results)? {
        let block = block_number(&xml);
        if !blocks.insert(block.clone()) {
            summary.fail(
                &format!("block {block}"),
                &format!(r#""{}" has the same block number as another report"#, xml.display()),
            );
            continue;
        }
        let outfile = args.tables.join(format!("{BLOCK_TABLE_PREFIX}{block}.csv"));
        if outfile.exists() {
            summary.skip(&format!("block {block}"));
            continue;
        }

        match extract_hits(&xml) {
            Ok(hits) => {
                info!(r#"Writing {} hits to "{}""#, hits.len(), outfile.display());
                write_hits(&hits, &outfile)?;
                summary.completed += 1;
            }
            Err(e) => summary.fail(&format!("block {block}"), &e.to_string()),
        }
    }

    let redundant = Table::concat(
        block_tables(&args.tables)?
            .iter()
            .map(|path| Table::read(path))
            .collect::<Result<Vec<_>>>()?,
    )?;
    if redundant.headers.is_empty() {
        warn!(r#"No hit tables found in "{}""#, args.tables.display());
        return Ok(summary);
    }

    let redundant_path = args.outdir.join("fully_redundant_hits.csv");
    if args.force || !redundant_path.exists() {
        info!(
            r#"Writing {} hits to "{}""#,
            redundant.rows.len(),
            redundant_path.display()
        );
        redundant.write(&redundant_path)?;
    } else {
        info!(r#"Keeping existing "{}""#, redundant_path.display());
    }

    let non_redundant_path = args.outdir.join("non_redundant_hits.csv");
    if args.force || !non_redundant_path.exists() {
        let non_redundant = non_redundant(&redundant, args)?;
        info!(
            r#"Writing {} unique hits to "{}""#,
            non_redundant.rows.len(),
            non_redundant_path.display()
        );
        non_redundant.write(&non_redundant_path)?;
    } else {
        info!(r#"Keeping existing "{}""#, non_redundant_path.display());
    }

    Ok(summary)
}

// --------------------------------------------------
/// One record per HSP in a BLAST XML report
pub fn extract_hits(path: &Path) -> Result<Vec<HitRecord>> {
    let report = BlastOutput::from_path(path)?;
    let mut records = vec![];

    for iteration in report.iterations() {
        let query = first_word(&iteration.query_def)
            .or(iteration.query_id.as_deref())
            .unwrap_or_default();

        for hit in iteration.hits() {
            let (accession, info) = match (hit.accession.as_deref(), first_word(&hit.def)) {
                (Some(acc), Some(info)) if !acc.trim().is_empty() => (acc.trim(), info),
                _ => {
                    warn!(
                        "{}: skipping hit {} of {query} without accession or definition",
                        path.display(),
                        hit.num.as_deref().unwrap_or("?")
                    );
                    continue;
                }
            };

            for (i, hsp) in hit.hsps().iter().enumerate() {
                match hsp_fields(hsp) {
                    Some((sequence, evalue, bit_score, identity)) => {
                        records.push(HitRecord {
                            query_accession: query.to_string(),
                            accession: accession.to_string(),
                            info: info.to_string(),
                            sequence,
                            evalue,
                            bit_score,
                            identity,
                        })
                    }
                    _ => warn!(
                        "{}: skipping incomplete HSP {} of {accession} for {query}",
                        path.display(),
                        i + 1
                    ),
                }
            }
        }
    }

    Ok(records)
}

// --------------------------------------------------
fn hsp_fields(hsp: &Hsp) -> Option<(String, String, String, u32)> {
    let sequence = hsp.hseq.as_deref()?.trim();
    if sequence.is_empty() {
        return None;
    }
    let evalue = numeric(&hsp.evalue)?;
    let bit_score = numeric(&hsp.bit_score)?;
    let identity = hsp.identity.as_deref()?.trim().parse().ok()?;
    Some((sequence.to_string(), evalue, bit_score, identity))
}

// --------------------------------------------------
fn numeric(val: &Option<String>) -> Option<String> {
    let val = val.as_deref()?.trim();
    val.parse::<f64>().ok().map(|_| val.to_string())
}

// --------------------------------------------------
pub fn write_hits(hits: &[HitRecord], path: &Path) -> Result<()> {
    write_atomic(path, |out| {
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
        // Written by hand so an empty block still gets a header
        wtr.write_record([
            "Query Accession",
            "Alignment Accession",
            "Alignment Info",
            "Alignment Sequence",
            "HSP E-value",
            "HSP Bit Score",
            "HSP Identity",
        ])?;
        for hit in hits {
            wtr.serialize(hit)?;
        }
        wtr.flush()?;
        Ok(())
    })
}

// --------------------------------------------------
/// Drop repeated identities and add the FASTA column
pub fn non_redundant(table: &Table, args: &HitsArgs) -> Result<Table> {
    if table.headers.is_empty() {
        return Ok(table.clone());
    }

    let mut deduped = table.dedup_by(&args.dedup_column)?;
    let acc_col = deduped.column(&args.accession_column)?;
    let seq_col = deduped.column(&args.sequence_column)?;
    deduped.derive_column(&args.fasta_column, |row| {
        format!(">{}\n{}", row[acc_col], row[seq_col])
    });

    Ok(deduped)
}

// --------------------------------------------------
fn xml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "xml") {
            files.push(path.to_path_buf());
        }
    }

    Ok(files.into_iter().sorted_by_key(|p| block_sort_key(p)).collect())
}

// --------------------------------------------------
fn block_tables(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file()
            && name.starts_with(BLOCK_TABLE_PREFIX)
            && name.ends_with(".csv")
        {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files.into_iter().sorted_by_key(|p| block_sort_key(p)).collect())
}

// --------------------------------------------------
/// The trailing block counter of a file stem, or the whole stem
pub fn block_number(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let trailing = Regex::new(r"(\d+)$").unwrap();
    match trailing.captures(&stem) {
        Some(caps) => caps[1].to_string(),
        _ => stem,
    }
}

// --------------------------------------------------
fn block_sort_key(path: &Path) -> (u64, String) {
    let block = block_number(path);
    (block.parse().unwrap_or(u64::MAX), block)
}
