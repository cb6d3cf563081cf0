use crate::{
    fasta::{read_fasta, write_blocks},
    tool::{self, hms, Summary, ToolRun},
    SearchArgs,
};
use anyhow::{anyhow, bail, Result};
use chrono::Local;
use log::info;
use rayon::prelude::*;
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    sync::Mutex,
};

/// One block of queries to search
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub block: usize,
    pub query: PathBuf,
    pub output: PathBuf,
    pub errors: PathBuf,
}

// --------------------------------------------------
pub fn run(blastp: &str, pool_size: usize, args: &SearchArgs) -> Result<Summary> {
    let blastp = tool::resolve(blastp)?;
    check_database(&args.database)?;
    let records = read_fasta(&args.fasta)?;

    fs::create_dir_all(&args.outdir)?;
    let block_dir = args.outdir.join("fasta_blocks");
    let blocks = write_blocks(&records, args.block_size, &block_dir)?;
    println!(
        "{} blocks of {} sequences",
        blocks.len(),
        args.block_size
    );

    let mut summary = Summary::new("search");
    let mut jobs = vec![];
    for (i, query) in blocks.into_iter().enumerate() {
        let block = i + 1;
        let job = SearchJob {
            block,
            query,
            output: args.outdir.join(format!("blast_block_{block}.xml")),
            errors: args.outdir.join(format!("blast_block_{block}.err")),
        };
        if job.output.exists() {
            summary.skip(&format!("block {block}"));
        } else {
            jobs.push(job);
        }
    }

    let time_log = Mutex::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(args.outdir.join("times_report.log"))?,
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build()?;
    info!("Searching {} blocks with {pool_size} workers", jobs.len());

    let runs: Vec<Result<ToolRun>> = pool.install(|| {
        jobs.par_iter()
            .map(|job| search_block(&blastp, args, job, &time_log))
            .collect()
    });

    for (job, res) in jobs.iter().zip(runs) {
        match res {
            Ok(run) => summary.record(&run),
            Err(e) => summary.fail(&format!("block {}", job.block), &e.to_string()),
        }
    }

    Ok(summary)
}

// --------------------------------------------------
fn search_block(
    blastp: &Path,
    args: &SearchArgs,
    job: &SearchJob,
    time_log: &Mutex<File>,
) -> Result<ToolRun> {
    info!("Running BLAST for block {}", job.block);

    // Nothing appears at the final path unless blastp succeeds
    let partial = job.output.with_extension("xml.part");
    let mut cmd = Command::new(blastp);
    cmd.arg("-query")
        .arg(&job.query)
        .arg("-db")
        .arg(&args.database)
        .arg("-out")
        .arg(&partial)
        .args(["-outfmt", "5"]);
    if let Some(evalue) = args.evalue {
        cmd.args(["-evalue", &evalue.to_string()]);
    }
    if let Some(max) = args.max_target_seqs {
        cmd.args(["-max_target_seqs", &max.to_string()]);
    }

    let res = tool::run(&format!("block {}", job.block), &mut cmd);
    fs::write(&job.errors, &res.stderr)?;

    {
        let mut log = time_log
            .lock()
            .map_err(|_| anyhow!("Time log lock poisoned"))?;
        writeln!(
            log,
            "{}\tLocal BLAST for block {}:\t{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            job.block,
            hms(res.elapsed)
        )?;
    }

    if res.success && partial.exists() {
        fs::rename(&partial, &job.output)?;
        info!("Completed BLAST for block {}", job.block);
        Ok(res.with_artifact(job.output.clone()))
    } else {
        if partial.exists() {
            fs::remove_file(&partial)?;
        }
        Ok(ToolRun {
            success: false,
            ..res
        })
    }
}

// --------------------------------------------------
/// A BLAST database is a prefix shared by several index files
pub fn check_database(database: &Path) -> Result<()> {
    let name = match database.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        _ => bail!(r#"Invalid database "{}""#, database.display()),
    };
    let dir = match database.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let found = fs::read_dir(dir)
        .map_err(|e| anyhow!(r#"Cannot read database "{}": {e}"#, database.display()))?
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().starts_with(&name));

    if !found {
        bail!(r#"No BLAST database files found for "{}""#, database.display());
    }
    Ok(())
}
