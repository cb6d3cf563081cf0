pub mod blast_xml;
pub mod cluster;
pub mod config;
pub mod fasta;
pub mod fold;
pub mod hits;
pub mod search;
pub mod similarity;
pub mod table;
pub mod tool;

#[cfg(test)]
mod test_utils;

use anyhow::{anyhow, Result};
use clap::{builder::PossibleValue, Args, Parser, Subcommand, ValueEnum};
use config::Config;
use log::debug;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};
use table::SequenceColumns;
use tempfile::NamedTempFile;

/// Curate a protein sequence dataset with cd-hit, blastp and colabfold
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with tool locations and pool size
    #[arg(short, long, value_name = "CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true)]
    pub log: Option<LogLevel>,

    /// Log file, default STDERR
    #[arg(long, value_name = "LOGFILE", global = true)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reduce a sequence table to cd-hit representatives at each threshold
    Cluster(ClusterArgs),

    /// Search FASTA blocks against a BLAST database in parallel
    Search(SearchArgs),

    /// Turn BLAST XML reports into hit tables
    Hits(HitsArgs),

    /// Score every pair of sequences with blastp
    Similarity(SimilarityArgs),

    /// Predict structures with colabfold, one sequence at a time
    Fold(FoldArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ClusterArgs {
    /// CSV table of sequences
    #[arg(long, value_name = "TABLE")]
    pub table: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "OUTDIR", default_value = "cluster-out")]
    pub outdir: PathBuf,

    /// Sequence identity thresholds, 0.4-1.0
    #[arg(
        long,
        value_name = "THRESHOLD",
        num_args = 1..,
        value_delimiter = ',',
        default_values_t = [0.5, 0.6, 0.7, 0.8, 0.9]
    )]
    pub thresholds: Vec<f64>,

    /// Identifier column
    #[arg(long, value_name = "COLUMN", default_value = "ID")]
    pub id_column: String,

    /// Sequence column
    #[arg(long, value_name = "COLUMN", default_value = "Sequence")]
    pub sequence_column: String,

    /// Column holding ">id\nseq" values, used instead of the ID/sequence columns
    #[arg(long, value_name = "COLUMN")]
    pub fasta_column: Option<String>,

    /// cd-hit threads (-T)
    #[arg(long, value_name = "THREADS")]
    pub threads: Option<usize>,

    /// cd-hit memory limit in MB (-M)
    #[arg(long, value_name = "MB")]
    pub memory: Option<usize>,
}

impl ClusterArgs {
    pub fn columns(&self) -> SequenceColumns {
        match &self.fasta_column {
            Some(col) => SequenceColumns::Fasta(col.to_string()),
            _ => SequenceColumns::Split {
                id: self.id_column.clone(),
                sequence: self.sequence_column.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// FASTA file of query sequences
    #[arg(long, value_name = "FASTA")]
    pub fasta: PathBuf,

    /// BLAST database prefix
    #[arg(long, value_name = "DATABASE")]
    pub database: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "OUTDIR", default_value = "search-out")]
    pub outdir: PathBuf,

    /// Sequences per block
    #[arg(short, long, value_name = "SIZE", default_value = "5")]
    pub block_size: usize,

    /// Number of workers, default from the config
    #[arg(short, long, value_name = "THREADS")]
    pub threads: Option<usize>,

    /// E-value cutoff
    #[arg(long, value_name = "EVALUE")]
    pub evalue: Option<f64>,

    /// Maximum number of aligned sequences to keep
    #[arg(long, value_name = "NUM")]
    pub max_target_seqs: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct HitsArgs {
    /// Directory of BLAST XML reports
    #[arg(long, value_name = "DIR")]
    pub results: PathBuf,

    /// Directory for the per-block hit tables
    #[arg(long, value_name = "DIR", default_value = "hits-out/block_tables")]
    pub tables: PathBuf,

    /// Output directory for the combined tables
    #[arg(short, long, value_name = "OUTDIR", default_value = "hits-out")]
    pub outdir: PathBuf,

    /// Column whose repeated values are dropped
    #[arg(long, value_name = "COLUMN", default_value = "Alignment Info")]
    pub dedup_column: String,

    /// Column used for the FASTA header
    #[arg(long, value_name = "COLUMN", default_value = "Alignment Accession")]
    pub accession_column: String,

    /// Column used for the FASTA sequence
    #[arg(long, value_name = "COLUMN", default_value = "Alignment Sequence")]
    pub sequence_column: String,

    /// Name of the derived FASTA column
    #[arg(long, value_name = "COLUMN", default_value = "FASTA")]
    pub fasta_column: String,

    /// Overwrite existing combined tables
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct SimilarityArgs {
    /// FASTA file of sequences to compare
    #[arg(long, value_name = "FASTA")]
    pub fasta: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "OUTDIR", default_value = "similarity-out")]
    pub outdir: PathBuf,

    /// Suffix for the output file names
    #[arg(short, long, value_name = "NAME", default_value = "all")]
    pub name: String,

    /// Number of workers, default from the config
    #[arg(short, long, value_name = "THREADS")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct FoldArgs {
    /// FASTA file of sequences to predict
    #[arg(long, value_name = "FASTA")]
    pub fasta: PathBuf,

    /// Directory for the per-sequence inputs
    #[arg(long, value_name = "DIR", default_value = "fasta_inputs")]
    pub inputs: PathBuf,

    /// Directory for the predictions
    #[arg(long, value_name = "DIR", default_value = "predictions")]
    pub predictions: PathBuf,
}

#[derive(Debug, Clone)]
pub enum LogLevel {
    Info,
    Debug,
}

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogLevel::Info, LogLevel::Debug]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            LogLevel::Info => PossibleValue::new("info"),
            LogLevel::Debug => PossibleValue::new("debug"),
        })
    }
}

// --------------------------------------------------
pub fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();
    init_logging(&cli)?;

    let config = Config::load(cli.config.as_deref())?;
    debug!("config = {config:#?}");
    debug!("command = {:#?}", cli.command);

    let (summary, outdir) = match &cli.command {
        Command::Cluster(args) => {
            (cluster::run(&config.tools.cd_hit, args)?, &args.outdir)
        }
        Command::Search(args) => {
            let pool_size = config.pool_size(args.threads)?;
            (
                search::run(&config.tools.blastp, pool_size, args)?,
                &args.outdir,
            )
        }
        Command::Hits(args) => (hits::run(args)?, &args.outdir),
        Command::Similarity(args) => {
            let pool_size = config.pool_size(args.threads)?;
            (
                similarity::run(&config.tools.blastp, pool_size, args)?,
                &args.outdir,
            )
        }
        Command::Fold(args) => {
            (fold::run(&config.tools.colabfold, args)?, &args.predictions)
        }
    };

    summary.report();
    let summary_path = summary.write(outdir)?;
    println!(
        r#"Finished {} in {} seconds: {} completed, {} skipped, {} failed, see "{}""#,
        summary.stage,
        start.elapsed().as_secs(),
        summary.completed,
        summary.skipped,
        summary.failures.len(),
        summary_path.display()
    );

    Ok(())
}

// --------------------------------------------------
fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(match cli.log {
        Some(LogLevel::Debug) => log::LevelFilter::Debug,
        Some(LogLevel::Info) => log::LevelFilter::Info,
        _ => log::LevelFilter::Warn,
    });

    if let Some(logfile) = &cli.logfile {
        builder.target(env_logger::Target::Pipe(Box::new(BufWriter::new(
            File::create(logfile)
                .map_err(|e| anyhow!("Cannot write {}: {e}", logfile.display()))?,
        ))));
    }

    builder.init();
    Ok(())
}

// --------------------------------------------------
fn open(filename: &Path) -> Result<Box<dyn BufRead>> {
    Ok(Box::new(BufReader::new(File::open(filename).map_err(
        |e| anyhow!("Cannot read {}: {e}", filename.display()),
    )?)))
}

// --------------------------------------------------
/// Write through a temporary file in the same directory, then rename it
/// over `path` so readers never see a partial file
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| anyhow!("Cannot write {}: {e}", path.display()))?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    tmp.persist(path)
        .map_err(|e| anyhow!("Cannot write {}: {}", path.display(), e.error))?;

    Ok(())
}
