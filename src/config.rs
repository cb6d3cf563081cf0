use anyhow::{anyhow, bail, Result};
use log::warn;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default worker pool size for the search and similarity stages
pub const DEFAULT_POOL_SIZE: usize = 15;

/// Settings read from the optional TOML configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of workers for parallel external invocations
    pub pool_size: usize,

    /// Locations of the external programs
    pub tools: Tools,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub cd_hit: String,
    pub blastp: String,
    pub colabfold: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_size: DEFAULT_POOL_SIZE,
            tools: Tools::default(),
        }
    }
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            cd_hit: "cd-hit".to_string(),
            blastp: "blastp".to_string(),
            colabfold: "colabfold_batch".to_string(),
        }
    }
}

impl Config {
    // --------------------------------------------------
    /// Read the configuration file, or fall back to the defaults
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    anyhow!("Cannot read config {}: {e}", path.display())
                })?;
                Config::from_toml(&text).map_err(|e| {
                    anyhow!("Invalid config {}: {e}", path.display())
                })?
            }
            _ => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    // --------------------------------------------------
    pub fn from_toml(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    // --------------------------------------------------
    fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            bail!("pool_size must be greater than 0");
        }
        Ok(())
    }

    // --------------------------------------------------
    /// Pool size for a run, preferring the command-line value
    pub fn pool_size(&self, threads: Option<usize>) -> Result<usize> {
        let size = threads.unwrap_or(self.pool_size);
        if size == 0 {
            bail!("--threads must be greater than 0");
        }

        let cpus = num_cpus::get();
        if size > cpus {
            warn!("Pool size {size} exceeds the {cpus} available CPUs");
        }
        Ok(size)
    }
}

// --------------------------------------------------
/// Expand a leading `~/` to the current user's home directory
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = homedir::my_home()
                .map_err(|e| anyhow!("Cannot find home directory: {e}"))?
                .ok_or_else(|| anyhow!("Cannot find home directory"))?;
            Ok(home.join(rest))
        }
        _ => Ok(PathBuf::from(path)),
    }
}
