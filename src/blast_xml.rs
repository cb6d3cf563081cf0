//! Reader for the XML report blastp writes with `-outfmt 5`.
//!
//! Every leaf is read as an optional string so that a report missing a
//! field still loads; callers decide which fields they require.

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
#[serde(rename = "BlastOutput")]
pub struct BlastOutput {
    #[serde(rename = "BlastOutput_iterations")]
    iterations: Option<IterationsXml>,
}

#[derive(Debug, Default, Deserialize)]
struct IterationsXml {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<Iteration>,
}

/// The search results for one query
#[derive(Debug, Deserialize)]
pub struct Iteration {
    #[serde(rename = "Iteration_query-ID")]
    pub query_id: Option<String>,
    #[serde(rename = "Iteration_query-def")]
    pub query_def: Option<String>,
    #[serde(rename = "Iteration_hits")]
    hits: Option<HitsXml>,
    #[serde(rename = "Iteration_message")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HitsXml {
    #[serde(rename = "Hit", default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "Hit_num")]
    pub num: Option<String>,
    #[serde(rename = "Hit_def")]
    pub def: Option<String>,
    #[serde(rename = "Hit_accession")]
    pub accession: Option<String>,
    #[serde(rename = "Hit_hsps")]
    hsps: Option<HspsXml>,
}

#[derive(Debug, Default, Deserialize)]
struct HspsXml {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<Hsp>,
}

/// One high-scoring pair
#[derive(Debug, Deserialize)]
pub struct Hsp {
    #[serde(rename = "Hsp_bit-score")]
    pub bit_score: Option<String>,
    #[serde(rename = "Hsp_score")]
    pub score: Option<String>,
    #[serde(rename = "Hsp_evalue")]
    pub evalue: Option<String>,
    #[serde(rename = "Hsp_identity")]
    pub identity: Option<String>,
    #[serde(rename = "Hsp_hseq")]
    pub hseq: Option<String>,
}

impl BlastOutput {
    // --------------------------------------------------
    pub fn parse(xml: &str) -> Result<BlastOutput> {
        if xml.trim().is_empty() {
            bail!("Empty BLAST report");
        }
        quick_xml::de::from_str(xml).map_err(|e| anyhow!("Malformed BLAST XML: {e}"))
    }

    // --------------------------------------------------
    pub fn from_path(path: &Path) -> Result<BlastOutput> {
        let xml = fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {}: {e}", path.display()))?;
        BlastOutput::parse(&xml).map_err(|e| anyhow!("{}: {e}", path.display()))
    }

    pub fn iterations(&self) -> &[Iteration] {
        self.iterations
            .as_ref()
            .map(|i| i.iterations.as_slice())
            .unwrap_or_default()
    }
}

impl Iteration {
    pub fn hits(&self) -> &[Hit] {
        self.hits
            .as_ref()
            .map(|h| h.hits.as_slice())
            .unwrap_or_default()
    }
}

impl Hit {
    pub fn hsps(&self) -> &[Hsp] {
        self.hsps
            .as_ref()
            .map(|h| h.hsps.as_slice())
            .unwrap_or_default()
    }
}

// --------------------------------------------------
/// The first whitespace-delimited word of a non-empty field
pub fn first_word(val: &Option<String>) -> Option<&str> {
    val.as_deref().and_then(|v| v.split_whitespace().next())
}
