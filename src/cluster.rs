use crate::{
    fasta::{read_fasta, write_fasta, SeqRecord},
    table::Table,
    tool::{self, Summary},
    ClusterArgs,
};
use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use log::{info, warn};
use std::{collections::HashSet, fs, path::Path, process::Command};

// --------------------------------------------------
/// The cd-hit word length for a sequence identity threshold
pub fn word_size(threshold: f64) -> Result<u8> {
    match threshold {
        t if (0.4..=0.5).contains(&t) => Ok(2),
        t if t > 0.5 && t <= 0.6 => Ok(3),
        t if t > 0.6 && t <= 0.7 => Ok(4),
        t if t > 0.7 && t <= 1.0 => Ok(5),
        t => bail!("Threshold {t} is outside the supported range 0.4-1.0"),
    }
}

// --------------------------------------------------
/// A threshold as a whole percentage for file names
pub fn percent(threshold: f64) -> u32 {
    (threshold * 100.).round() as u32
}

// --------------------------------------------------
pub fn run(cd_hit: &str, args: &ClusterArgs) -> Result<Summary> {
    // Reject every bad threshold before anything runs
    let word_sizes = args
        .thresholds
        .iter()
        .map(|&t| word_size(t).map(|w| (t, w)))
        .collect::<Result<Vec<_>>>()?;
    if word_sizes.is_empty() {
        bail!("No thresholds given");
    }
    let mut percents = HashSet::new();
    for &(t, _) in &word_sizes {
        let pct = percent(t);
        if !percents.insert(pct) {
            bail!("Threshold {t} names the same outputs as another threshold ({pct}%)");
        }
    }

    let cd_hit = tool::resolve(cd_hit)?;
    let table = Table::read(&args.table)?;
    let sequences = table.sequences(&args.columns())?;

    fs::create_dir_all(&args.outdir)?;
    let input_fasta = args.outdir.join("input_data.fasta");
    let records: Vec<SeqRecord> = sequences
        .iter()
        .enumerate()
        .filter_map(|(i, rec)| {
            if rec.is_none() {
                warn!("Skipping row {} of {} without a sequence", i + 1, args.table.display());
            }
            rec.clone()
        })
        .collect();
    info!(
        r#"Writing {} sequences to "{}""#,
        records.len(),
        input_fasta.display()
    );
    write_fasta(&records, &input_fasta)?;

    let mut summary = Summary::new("cluster");
    for (threshold, word) in word_sizes {
        let pct = percent(threshold);
        let clustered = args.outdir.join(format!("cdhit_{pct}.fasta"));

        let mut cmd = Command::new(&cd_hit);
        cmd.arg("-i")
            .arg(&input_fasta)
            .arg("-o")
            .arg(&clustered)
            .args(["-c", &threshold.to_string(), "-n", &word.to_string()]);
        if let Some(threads) = args.threads {
            cmd.args(["-T", &threads.to_string()]);
        }
        if let Some(memory) = args.memory {
            cmd.args(["-M", &memory.to_string()]);
        }

        let res = tool::run(&format!("threshold {threshold}"), &mut cmd);
        if !res.success {
            summary.record(&res);
            continue;
        }

        let representatives = match read_representatives(&clustered) {
            Ok(reps) => reps,
            Err(e) => {
                summary.fail(&format!("threshold {threshold}"), &e.to_string());
                continue;
            }
        };

        let filtered = filter_table(&table, &sequences, &representatives);
        let outfile = args
            .outdir
            .join(format!("data_{pct}_seq_similarity.csv"));
        info!(
            r#"Threshold {threshold}: {} of {} rows kept in "{}""#,
            filtered.rows.len(),
            table.rows.len(),
            outfile.display()
        );
        filtered.write(&outfile)?;
        summary.record(&res.with_artifact(outfile));
    }

    Ok(summary)
}

// --------------------------------------------------
/// The residue strings of cd-hit's representative sequences
pub fn read_representatives(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Err(anyhow!(
            r#"Missing cd-hit output "{}""#,
            path.display()
        ));
    }
    Ok(read_fasta(path)?.into_iter().map(|rec| rec.seq).collect())
}

// --------------------------------------------------
/// Keep the rows whose sequence is a representative
pub fn filter_table(
    table: &Table,
    sequences: &[Option<SeqRecord>],
    representatives: &HashSet<String>,
) -> Table {
    let rows = table
        .rows
        .iter()
        .zip_eq(sequences)
        .filter_map(|(row, rec)| match rec {
            Some(rec) if representatives.contains(&rec.seq) => Some(row.clone()),
            _ => None,
        })
        .collect();

    Table {
        headers: table.headers.clone(),
        rows,
    }
}

// --------------------------------------------------
#[cfg(test)]
mod cluster_tests {
    use super::{filter_table, percent, run, word_size};
    use crate::{
        fasta::read_fasta,
        table::{SequenceColumns, Table},
        test_utils::fake_tool,
        ClusterArgs,
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{
        collections::HashSet,
        path::{Path, PathBuf},
    };
    use tempfile::tempdir;

    fn args(outdir: &Path, thresholds: Vec<f64>) -> ClusterArgs {
        ClusterArgs {
            table: PathBuf::from("tests/inputs/sequences.csv"),
            outdir: outdir.to_path_buf(),
            thresholds,
            id_column: "ID".to_string(),
            sequence_column: "Sequence".to_string(),
            fasta_column: None,
            threads: None,
            memory: None,
        }
    }

    #[test]
    fn test_word_size() -> Result<()> {
        assert_eq!(word_size(0.4)?, 2);
        assert_eq!(word_size(0.5)?, 2);
        assert_eq!(word_size(0.55)?, 3);
        assert_eq!(word_size(0.6)?, 3);
        assert_eq!(word_size(0.65)?, 4);
        assert_eq!(word_size(0.7)?, 4);
        assert_eq!(word_size(0.71)?, 5);
        assert_eq!(word_size(0.9)?, 5);
        assert_eq!(word_size(1.0)?, 5);
        Ok(())
    }

    #[test]
    fn test_word_size_every_threshold() {
        for i in 40..=100 {
            let t = i as f64 / 100.;
            let word = word_size(t);
            assert!(word.is_ok(), "{t}");
            assert!([2, 3, 4, 5].contains(&word.unwrap()));
        }
    }

    #[test]
    fn test_word_size_rejected() {
        for t in [0.0, 0.39, -0.5, 1.01, 2.0, f64::NAN] {
            assert!(word_size(t).is_err(), "{t}");
        }
        assert_eq!(
            word_size(0.3).unwrap_err().to_string(),
            "Threshold 0.3 is outside the supported range 0.4-1.0"
        );
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.5), 50);
        assert_eq!(percent(0.29), 29);
        assert_eq!(percent(0.7), 70);
        assert_eq!(percent(1.0), 100);
    }

    #[test]
    fn test_run_duplicate_percent() -> Result<()> {
        let outdir = tempdir()?;
        let args = args(&outdir.path().join("out"), vec![0.5, 0.504]);
        let res = run("sh", &args);
        assert!(res.is_err());
        assert_eq!(
            res.unwrap_err().to_string(),
            "Threshold 0.504 names the same outputs as another threshold (50%)"
        );
        assert!(!outdir.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn test_filter_table() -> Result<()> {
        let table = Table::read(Path::new("tests/inputs/sequences.csv"))?;
        let sequences = table.sequences(&SequenceColumns::Split {
            id: "ID".to_string(),
            sequence: "Sequence".to_string(),
        })?;

        // P00001 and P00004 share a sequence, so both are kept
        let reps: HashSet<String> = ["MSTLKEIAQRLGVSKATVSRVLNGKPSVSEETRQKVLA".to_string()].into();
        let filtered = filter_table(&table, &sequences, &reps);
        let ids: Vec<_> = filtered.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["P00001", "P00004"]);
        assert_eq!(filtered.headers, table.headers);
        Ok(())
    }

    #[test]
    fn test_run() -> Result<()> {
        let outdir = tempdir()?;
        // Keep the first two records as representatives, fail at 0.9
        let cd_hit = fake_tool(
            outdir.path(),
            "cd-hit",
            r#"
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift 2;;
    -o) output="$2"; shift 2;;
    -c) identity="$2"; shift 2;;
    *) shift;;
  esac
done
if [ "$identity" = "0.9" ]; then echo "out of memory" >&2; exit 1; fi
head -n 4 "$input" > "$output"
touch "$output.clstr"
"#,
        )?;

        let args = args(outdir.path(), vec![0.5, 0.7, 0.9]);
        let summary = run(&cd_hit.to_string_lossy(), &args)?;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].unit, "threshold 0.9");
        assert_eq!(summary.failures[0].message, "out of memory");

        let input = read_fasta(&outdir.path().join("input_data.fasta"))?;
        assert_eq!(input.len(), 5);

        for pct in [50, 70] {
            let table = Table::read(&outdir.path().join(format!("data_{pct}_seq_similarity.csv")))?;
            let ids: Vec<_> = table.rows.iter().map(|r| r[0].as_str()).collect();
            assert_eq!(ids, vec!["P00001", "P00002", "P00004"]);
            assert_eq!(table.headers.len(), 3);
        }
        assert!(!outdir.path().join("data_90_seq_similarity.csv").exists());
        Ok(())
    }

    #[test]
    fn test_run_rejects_threshold_first() -> Result<()> {
        let outdir = tempdir()?;
        let marker = outdir.path().join("ran");
        let cd_hit = fake_tool(
            outdir.path(),
            "cd-hit",
            &format!("touch {}\n", marker.display()),
        )?;

        let args = args(outdir.path(), vec![0.5, 0.3]);
        let res = run(&cd_hit.to_string_lossy(), &args);
        assert!(res.is_err());
        assert!(!marker.exists());
        assert!(!outdir.path().join("input_data.fasta").exists());
        Ok(())
    }

    #[test]
    fn test_run_fasta_column() -> Result<()> {
        let outdir = tempdir()?;
        let table = Table {
            headers: vec!["Alignment Info".to_string(), "FASTA".to_string()],
            rows: vec![
                vec!["WP_1".to_string(), ">WP_1\nMKTAYIAK".to_string()],
                vec!["WP_2".to_string(), ">WP_2\nMSLLKQ".to_string()],
            ],
        };
        let table_path = outdir.path().join("hits.csv");
        table.write(&table_path)?;

        let cd_hit = fake_tool(
            outdir.path(),
            "cd-hit",
            "printf '>WP_2\\nMSLLKQ\\n' > \"$4\"\n",
        )?;

        let mut args = args(outdir.path(), vec![0.8]);
        args.table = table_path;
        args.fasta_column = Some("FASTA".to_string());
        let summary = run(&cd_hit.to_string_lossy(), &args)?;
        assert_eq!(summary.completed, 1);

        let filtered = Table::read(&outdir.path().join("data_80_seq_similarity.csv"))?;
        assert_eq!(filtered.rows.len(), 1);
        assert_eq!(filtered.rows[0][0], "WP_2");
        Ok(())
    }

    #[test]
    fn test_run_missing_tool() {
        let outdir = tempdir().unwrap();
        let args = args(outdir.path(), vec![0.5]);
        let res = run("no-such-cd-hit", &args);
        assert!(res.is_err());
    }
}
