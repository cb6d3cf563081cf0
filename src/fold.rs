use crate::{
    fasta::{read_fasta, write_fasta, SeqRecord},
    tool::{self, Summary},
    FoldArgs,
};
use anyhow::Result;
use log::{info, warn};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use walkdir::WalkDir;

// --------------------------------------------------
pub fn run(colabfold: &str, args: &FoldArgs) -> Result<Summary> {
    let colabfold = tool::resolve(colabfold)?;
    let records = read_fasta(&args.fasta)?;
    fs::create_dir_all(&args.predictions)?;
    split_to_dirs(&records, &args.inputs)?;

    let mut summary = Summary::new("fold");
    for input_dir in input_dirs(&args.inputs)? {
        let name = input_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let outdir = args.predictions.join(&name);
        if outdir.exists() {
            summary.skip(&name);
            continue;
        }

        // Predictions land in a staging directory and move into place when done
        let staging = args.predictions.join(format!(".{name}.partial"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        info!(r#"Predicting structure for "{name}""#);
        let res = tool::run(
            &name,
            Command::new(&colabfold).arg(&input_dir).arg(&staging),
        );
        if res.success {
            fs::rename(&staging, &outdir)?;
            summary.record(&res.with_artifact(outdir));
        } else {
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            summary.record(&res);
        }
    }

    Ok(summary)
}

// --------------------------------------------------
/// A header identifier that is safe to use as a directory name
pub fn dir_name(id: &str) -> String {
    id.replace(['/', '\\'], "_")
}

// --------------------------------------------------
/// Write each record to `{inputs}/{id}/{id}.fasta`
pub fn split_to_dirs(records: &[SeqRecord], inputs: &Path) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = vec![];
    for rec in records {
        let name = dir_name(&rec.id);
        if name.is_empty() || name == "." || name == ".." {
            warn!(r#"Skipping record with unusable identifier "{}""#, rec.id);
            continue;
        }
        if !seen.insert(name.clone()) {
            warn!(r#"Duplicate identifier "{name}", keeping the last record"#);
        }

        let dir = inputs.join(&name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{name}.fasta"));
        write_fasta(std::slice::from_ref(rec), &path)?;
        paths.push(path);
    }

    Ok(paths)
}

// --------------------------------------------------
fn input_dirs(inputs: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = vec![];
    for entry in WalkDir::new(inputs)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.path().to_path_buf());
        }
    }
    Ok(dirs)
}
