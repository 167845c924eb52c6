// ==============================================================================
// config.rs - Merge Configuration
// ==============================================================================
// Description: Configuration file loading, validation and runtime options
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// Configuration file (JSON) example:
//   {
//     "inputs": ["a.vcf.gz", "b.vcf"],
//     "output": "merged.vcf.gz",
//     "missing_mode": "reference",
//     "info_fields": ["AC", "AN", "DP"],
//     "copy_filter": true
//   }
// Every key is optional; command line flags override file values.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::info_fields::InfoField;

/// Configuration errors; all of them prevent the pipeline from starting
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No input files given")]
    NoInputs,

    #[error("Setting '{0}' must be greater than zero")]
    ZeroSetting(&'static str),

    #[error("Unknown INFO field '{0}' (supported: AC, AF, AN, DB, DP, H2, H3, MQ0, MQ, NS, QD, SOMATIC, VALIDATED)")]
    UnknownInfoField(String),

    #[error("Unknown missing mode '{0}' (expected 'missing' or 'reference')")]
    UnknownMissingMode(String),
}

/// How samples of a file without a record at a locus are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingMode {
    /// Genotype `./.`
    #[default]
    Missing,
    /// Genotype `0/0`
    Reference,
}

impl MissingMode {
    /// Genotype written for a sample whose file has no record at the locus
    pub fn fill_genotype(&self) -> &'static str {
        match self {
            MissingMode::Missing => "./.",
            MissingMode::Reference => "0/0",
        }
    }
}

impl FromStr for MissingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missing" => Ok(MissingMode::Missing),
            "reference" => Ok(MissingMode::Reference),
            _ => Err(ConfigError::UnknownMissingMode(s.to_string())),
        }
    }
}

impl fmt::Display for MissingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingMode::Missing => write!(f, "missing"),
            MissingMode::Reference => write!(f, "reference"),
        }
    }
}

/// Everything needed to run one merge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Input files; this order defines sample-column order
    pub inputs: Vec<PathBuf>,
    /// Output path; standard output when unset. A `.gz` suffix compresses.
    pub output: Option<PathBuf>,
    /// Chromosome order table; human 1-22,X,Y,MT when unset
    pub chromosome_order: Option<PathBuf>,
    pub missing_mode: MissingMode,
    /// Carry each file's FILTER value into the `SFT` sample field
    pub copy_filter: bool,
    /// Carry each file's INFO value into the `IN` sample field
    pub copy_info: bool,
    /// INFO attributes to generate; empty keeps the union of input INFO
    pub info_fields: Vec<String>,
    /// Data lines per raw batch
    pub batch_lines: usize,
    /// Raw batches buffered per input stream
    pub max_batches: usize,
    /// Index size (loci) that triggers a mid-stream flush; defaults to batch_lines
    pub flush_threshold: Option<usize>,
    /// Merge worker threads; defaults to available parallelism
    pub threads: Option<usize>,
    /// Merged record chunks buffered ahead of the writer
    pub output_queue_depth: usize,
    /// Write the run summary as JSON to this path
    pub summary: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            chromosome_order: None,
            missing_mode: MissingMode::Missing,
            copy_filter: false,
            copy_info: false,
            info_fields: Vec::new(),
            batch_lines: 1000,
            max_batches: 4,
            flush_threshold: None,
            threads: None,
            output_queue_depth: 16,
            summary: None,
        }
    }
}

impl MergeConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the configuration and resolve it into runtime options
    pub fn merge_options(&self) -> Result<MergeOptions, ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        if self.batch_lines == 0 {
            return Err(ConfigError::ZeroSetting("batch_lines"));
        }
        if self.max_batches == 0 {
            return Err(ConfigError::ZeroSetting("max_batches"));
        }
        if self.output_queue_depth == 0 {
            return Err(ConfigError::ZeroSetting("output_queue_depth"));
        }
        if self.flush_threshold == Some(0) {
            return Err(ConfigError::ZeroSetting("flush_threshold"));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::ZeroSetting("threads"));
        }

        let mut info_fields = Vec::with_capacity(self.info_fields.len());
        for name in &self.info_fields {
            let field = name
                .trim()
                .parse::<InfoField>()
                .map_err(ConfigError::UnknownInfoField)?;
            if !info_fields.contains(&field) {
                info_fields.push(field);
            }
        }

        let threads = self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        Ok(MergeOptions {
            missing_mode: self.missing_mode,
            copy_filter: self.copy_filter,
            copy_info: self.copy_info,
            info_fields,
            batch_lines: self.batch_lines,
            max_batches: self.max_batches,
            flush_threshold: self.flush_threshold.unwrap_or(self.batch_lines),
            threads,
            output_queue_depth: self.output_queue_depth,
        })
    }
}

/// Validated options consumed by the pipeline and merger
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub missing_mode: MissingMode,
    pub copy_filter: bool,
    pub copy_info: bool,
    pub info_fields: Vec<InfoField>,
    pub batch_lines: usize,
    pub max_batches: usize,
    pub flush_threshold: usize,
    pub threads: usize,
    pub output_queue_depth: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            missing_mode: MissingMode::Missing,
            copy_filter: false,
            copy_info: false,
            info_fields: Vec::new(),
            batch_lines: 1000,
            max_batches: 4,
            flush_threshold: 1000,
            threads: 1,
            output_queue_depth: 16,
        }
    }
}
