use crate::{
    blast_xml::BlastOutput,
    fasta::{read_fasta, write_fasta, SeqRecord},
    tool::{self, Summary},
    write_atomic, SimilarityArgs,
};
use anyhow::{bail, Result};
use csv::WriterBuilder;
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::{fmt, fs, path::Path, process::Command};
use tempfile::Builder;

/// Outcome of aligning one pair of sequences
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairScore {
    /// Raw score of the first HSP of the first hit
    Aligned(f64),
    /// The report lists no hits
    NoAlignment,
    /// The first hit has no HSPs
    NoHsp,
    /// The tool failed or its report could not be read
    Failed,
}

impl PairScore {
    /// The matrix value; every outcome but an alignment is NaN
    pub fn value(&self) -> f64 {
        match self {
            PairScore::Aligned(score) => *score,
            _ => f64::NAN,
        }
    }
}

impl fmt::Display for PairScore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PairScore::Aligned(_) => write!(f, "aligned"),
            PairScore::NoAlignment => write!(f, "no_alignment"),
            PairScore::NoHsp => write!(f, "no_hsp"),
            PairScore::Failed => write!(f, "failed"),
        }
    }
}

/// A dense symmetric score matrix with a zero diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    pub fn new(size: usize) -> Self {
        SimilarityMatrix {
            size,
            values: vec![0.; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // --------------------------------------------------
    /// Store a score for both orderings of a pair
    pub fn set(&mut self, i: usize, j: usize, score: f64) {
        if i == j {
            return;
        }
        self.values[i * self.size + j] = score;
        self.values[j * self.size + i] = score;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    // --------------------------------------------------
    /// CSV with a header of indices and one row per index
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, |out| {
            let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
            let header: Vec<String> = std::iter::once(String::new())
                .chain((0..self.size).map(|i| i.to_string()))
                .collect();
            wtr.write_record(&header)?;

            for i in 0..self.size {
                let row: Vec<String> = std::iter::once(i.to_string())
                    .chain((0..self.size).map(|j| self.get(i, j).to_string()))
                    .collect();
                wtr.write_record(&row)?;
            }
            wtr.flush()?;
            Ok(())
        })
    }
}

#[derive(Debug, Serialize)]
struct PairRow<'a> {
    i: usize,
    j: usize,
    query: &'a str,
    subject: &'a str,
    outcome: String,
    score: f64,
}

// --------------------------------------------------
pub fn run(blastp: &str, pool_size: usize, args: &SimilarityArgs) -> Result<Summary> {
    let blastp = tool::resolve(blastp)?;
    let records = read_fasta(&args.fasta)?;
    if records.len() < 2 {
        warn!(
            r#""{}" has {} sequences, no pairs to score"#,
            args.fasta.display(),
            records.len()
        );
    }

    fs::create_dir_all(&args.outdir)?;
    let workdir = args.outdir.join("pairs");
    fs::create_dir_all(&workdir)?;

    let pairs: Vec<(usize, usize)> = (0..records.len()).tuple_combinations().collect();
    info!(
        "Scoring {} pairs of {} sequences with {pool_size} workers",
        pairs.len(),
        records.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build()?;
    let scores: Vec<Result<(PairScore, Option<tool::Failure>)>> = pool.install(|| {
        pairs
            .par_iter()
            .map(|&(i, j)| score_pair(&blastp, &workdir, i, j, &records[i], &records[j]))
            .collect()
    });

    let mut summary = Summary::new("similarity");
    let mut matrix = SimilarityMatrix::new(records.len());
    let mut outcomes = vec![];
    for (&(i, j), res) in pairs.iter().zip(scores) {
        let (score, failure) = res?;
        match failure {
            Some(failure) => summary.add_failure(failure),
            _ => summary.completed += 1,
        }
        matrix.set(i, j, score.value());
        outcomes.push((i, j, score));
    }

    let matrix_path = args
        .outdir
        .join(format!("similarity_matrix_{}.csv", args.name));
    info!(r#"Writing similarity matrix to "{}""#, matrix_path.display());
    matrix.write(&matrix_path)?;

    let pairs_path = args
        .outdir
        .join(format!("similarity_pairs_{}.csv", args.name));
    write_atomic(&pairs_path, |out| {
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
        // Written by hand so a run without pairs still gets a header
        wtr.write_record(["i", "j", "query", "subject", "outcome", "score"])?;
        for &(i, j, score) in &outcomes {
            wtr.serialize(PairRow {
                i,
                j,
                query: &records[i].id,
                subject: &records[j].id,
                outcome: score.to_string(),
                score: score.value(),
            })?;
        }
        wtr.flush()?;
        Ok(())
    })?;

    Ok(summary)
}

// --------------------------------------------------
fn score_pair(
    blastp: &Path,
    workdir: &Path,
    i: usize,
    j: usize,
    query: &SeqRecord,
    subject: &SeqRecord,
) -> Result<(PairScore, Option<tool::Failure>)> {
    debug!("Calculating similarity for sequences {i} and {j}");

    // Each pair gets its own directory, removed when it drops
    let pair_dir = Builder::new()
        .prefix(&format!("pair_{i}_{j}_"))
        .tempdir_in(workdir)?;
    let query_path = pair_dir.path().join("query.fasta");
    let subject_path = pair_dir.path().join("subject.fasta");
    write_fasta(std::slice::from_ref(query), &query_path)?;
    write_fasta(std::slice::from_ref(subject), &subject_path)?;

    let mut cmd = Command::new(blastp);
    cmd.arg("-query")
        .arg(&query_path)
        .arg("-subject")
        .arg(&subject_path)
        .args(["-outfmt", "5"]);

    let unit = format!("pair {i}-{j} ({} vs {})", query.id, subject.id);
    let res = tool::run(&unit, &mut cmd);
    if !res.success {
        return Ok((PairScore::Failed, Some(res.failure())));
    }

    let xml = String::from_utf8_lossy(&res.stdout);
    match BlastOutput::parse(&xml).and_then(|report| first_score(&report)) {
        Ok(score) => Ok((score, None)),
        Err(e) => Ok((
            PairScore::Failed,
            Some(tool::Failure {
                unit,
                exit_code: res.exit_code,
                message: e.to_string(),
            }),
        )),
    }
}

// --------------------------------------------------
/// The raw score of the first HSP of the first hit
pub fn first_score(report: &BlastOutput) -> Result<PairScore> {
    let hit = match report.iterations().iter().flat_map(|it| it.hits()).next() {
        Some(hit) => hit,
        _ => return Ok(PairScore::NoAlignment),
    };

    let hsp = match hit.hsps().first() {
        Some(hsp) => hsp,
        _ => return Ok(PairScore::NoHsp),
    };

    match hsp.score.as_deref().map(|s| s.trim().parse::<f64>()) {
        Some(Ok(score)) => Ok(PairScore::Aligned(score)),
        _ => bail!("First HSP has no readable score"),
    }
}
