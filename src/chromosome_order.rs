// ==============================================================================
// chromosome_order.rs - Chromosome Order Table
// ==============================================================================
// Description: Total order over chromosome names used for watermarks and output
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// File format accepted by `from_file`:
//   - one chromosome name per line, or
//   - a tab-separated file (e.g. a .fai index) whose first column is the name
//   - blank lines and lines starting with '#' are ignored
// ==============================================================================

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::ChromosomeId;

/// Errors raised while loading a chromosome-order table
#[derive(Error, Debug)]
pub enum ChromosomeOrderError {
    #[error("Failed to read chromosome order file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chromosome order file {0} lists no chromosomes")]
    Empty(PathBuf),

    #[error("Chromosome '{name}' listed twice (line {line})")]
    Duplicate { name: String, line: usize },
}

/// Maps chromosome names to ranks
///
/// Lookups fall back to the name with its `chr` prefix added or removed, so a
/// table written as `1, 2, ...` also ranks `chr1, chr2, ...`.
#[derive(Debug, Clone, Default)]
pub struct ChromosomeOrder {
    name_to_rank: HashMap<String, ChromosomeId>,
    names: Vec<String>,
}

impl ChromosomeOrder {
    /// Build a table from names in rank order; later duplicates are ignored
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order = Self::default();
        for name in names {
            order.push(name.into());
        }
        order
    }

    /// Human assembly order: 1-22, X, Y, MT
    pub fn human_default() -> Self {
        let mut order = Self::from_names(
            (1..=22)
                .map(|n| n.to_string())
                .chain(["X", "Y", "MT"].iter().map(|s| s.to_string())),
        );
        // M and MT are the same contig under different conventions
        if let Some(mt) = order.rank("MT") {
            order.name_to_rank.insert("M".to_string(), mt);
        }
        order
    }

    /// Load a table from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChromosomeOrderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ChromosomeOrderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut order = Self::default();
        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(|source| ChromosomeOrderError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let name = trimmed.split('\t').next().unwrap_or(trimmed).trim();
            if order.name_to_rank.contains_key(name) {
                return Err(ChromosomeOrderError::Duplicate {
                    name: name.to_string(),
                    line: index + 1,
                });
            }
            order.push(name.to_string());
        }

        if order.names.is_empty() {
            return Err(ChromosomeOrderError::Empty(path.to_path_buf()));
        }
        Ok(order)
    }

    fn push(&mut self, name: String) {
        if self.name_to_rank.contains_key(&name) {
            return;
        }
        let rank = self.names.len() as ChromosomeId;
        self.name_to_rank.insert(name.clone(), rank);
        self.names.push(name);
    }

    /// Rank of a chromosome, trying the `chr`-prefix alias on a miss
    pub fn rank(&self, name: &str) -> Option<ChromosomeId> {
        if let Some(&rank) = self.name_to_rank.get(name) {
            return Some(rank);
        }
        let alias = match name.strip_prefix("chr") {
            Some(bare) => bare.to_string(),
            None => format!("chr{}", name),
        };
        self.name_to_rank.get(&alias).copied()
    }

    /// Name registered for a rank
    pub fn name(&self, rank: ChromosomeId) -> Option<&str> {
        self.names.get(rank as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_human_default_order() {
        let order = ChromosomeOrder::human_default();
        assert_eq!(order.len(), 25);
        assert!(order.rank("1").unwrap() < order.rank("2").unwrap());
        assert!(order.rank("9").unwrap() < order.rank("10").unwrap());
        assert!(order.rank("22").unwrap() < order.rank("X").unwrap());
        assert_eq!(order.rank("M"), order.rank("MT"));
    }

    #[test]
    fn test_chr_prefix_alias() {
        let order = ChromosomeOrder::human_default();
        assert_eq!(order.rank("chr1"), order.rank("1"));
        assert_eq!(order.rank("chrX"), order.rank("X"));
        assert_eq!(order.rank("chrUn_gl000220"), None);

        let prefixed = ChromosomeOrder::from_names(["chr2", "chr1"]);
        assert_eq!(prefixed.rank("2"), Some(0));
        assert_eq!(prefixed.rank("1"), Some(1));
    }

    #[test]
    fn test_from_file_fai_layout() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "# contigs\nchrM\t16571\t6\t60\t61\nchr1\t249250621\t16915\t60\t61\n\nchr2\t243199373\t253404903\t60\t61\n").unwrap();
        file.flush().unwrap();

        let order = ChromosomeOrder::from_file(file.path()).unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order.rank("chrM"), Some(0));
        assert_eq!(order.rank("chr2"), Some(2));
        assert_eq!(order.name(1), Some("chr1"));
    }

    #[test]
    fn test_from_file_errors() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "1\n2\n1\n").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            ChromosomeOrder::from_file(file.path()),
            Err(ChromosomeOrderError::Duplicate { line: 3, .. })
        ));

        let empty = NamedTempFile::new().unwrap();
        assert!(matches!(
            ChromosomeOrder::from_file(empty.path()),
            Err(ChromosomeOrderError::Empty(_))
        ));

        assert!(matches!(
            ChromosomeOrder::from_file("/nonexistent/order.txt"),
            Err(ChromosomeOrderError::Io { .. })
        ));
    }
}
