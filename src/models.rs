// ==============================================================================
// models.rs - Core Data Models
// ==============================================================================
// Description: Loci, decoded records, provenance links and merged records
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

use std::fmt;

/// Rank of a chromosome in the configured chromosome-order table
pub type ChromosomeId = u32;

/// Index of an input stream in configuration order
pub type StreamId = usize;

/// Missing value marker used throughout VCF columns
pub const MISSING: &str = ".";

/// Genomic site, ordered by chromosome rank then position
///
/// Field order matters: the derived `Ord` compares `chromosome` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locus {
    pub chromosome: ChromosomeId,
    pub position: u64,
}

impl Locus {
    /// Past the last chromosome; used as the terminal watermark
    pub const MAX: Locus = Locus {
        chromosome: ChromosomeId::MAX,
        position: u64::MAX,
    };

    pub fn new(chromosome: ChromosomeId, position: u64) -> Self {
        Self {
            chromosome,
            position,
        }
    }

    /// Next locus in key order, or `None` at `Locus::MAX`
    pub fn successor(&self) -> Option<Locus> {
        if self.position < u64::MAX {
            Some(Locus::new(self.chromosome, self.position + 1))
        } else if self.chromosome < ChromosomeId::MAX {
            Some(Locus::new(self.chromosome + 1, 0))
        } else {
            None
        }
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Locus::MAX {
            write!(f, "<end>")
        } else {
            write!(f, "#{}:{}", self.chromosome, self.position)
        }
    }
}

/// One structured VCF data line
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Chromosome name as written in the input
    pub chromosome: String,
    pub position: u64,
    pub id: String,
    /// Reference allele
    pub reference: String,
    /// Alternate alleles; empty when the ALT column is "."
    pub alternates: Vec<String>,
    /// None when the QUAL column is "."
    pub quality: Option<f64>,
    pub filter: String,
    pub info: String,
    /// FORMAT field names
    pub format: Vec<String>,
    /// One raw sample column per declared sample
    pub samples: Vec<String>,
    /// 1-based number of the data record in its source file
    pub record_number: usize,
}

impl DecodedRecord {
    /// Position of a FORMAT field in this record's layout
    pub fn format_position(&self, field: &str) -> Option<usize> {
        self.format.iter().position(|f| f == field)
    }
}

/// A decoded record tagged with the stream that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceLink {
    /// Input the record came from
    pub stream: StreamId,
    pub record: DecodedRecord,
}

impl ProvenanceLink {
    pub fn new(stream: StreamId, record: DecodedRecord) -> Self {
        Self { stream, record }
    }
}

/// Reconciled output record for one locus
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub locus: Locus,
    /// CHROM as spelled by the lowest-numbered contributing input
    pub chromosome: String,
    pub position: u64,
    /// First non-missing ID among the inputs, or "."
    pub id: String,
    pub reference: String,
    /// Union of ALT alleles in first-seen order
    pub alternates: Vec<String>,
    /// Sample-weighted QUAL; None renders as "."
    pub quality: Option<f64>,
    pub filter: String,
    pub info: String,
    /// FORMAT keys in first-seen order, GT first
    pub format: Vec<String>,
    /// One column per declared sample across all inputs, in header order
    pub samples: Vec<String>,
}

impl MergedRecord {
    /// Encode as a tab-separated VCF data line (no trailing newline)
    pub fn to_vcf_line(&self) -> String {
        let alt = if self.alternates.is_empty() {
            MISSING.to_string()
        } else {
            self.alternates.join(",")
        };
        let qual = match self.quality {
            Some(q) => format_quality(q),
            None => MISSING.to_string(),
        };
        let info = if self.info.is_empty() {
            MISSING
        } else {
            self.info.as_str()
        };

        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chromosome, self.position, self.id, self.reference, alt, qual, self.filter, info
        );
        if !self.samples.is_empty() {
            line.push('\t');
            line.push_str(&self.format.join(":"));
            for sample in &self.samples {
                line.push('\t');
                line.push_str(sample);
            }
        }
        line
    }
}

/// Quality values keep up to three decimals, trailing zeros dropped
pub fn format_quality(quality: f64) -> String {
    let text = format!("{:.3}", quality);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locus_ordering_uses_rank_first() {
        let a = Locus::new(1, 5_000);
        let b = Locus::new(2, 10);
        assert!(a < b);
        assert!(Locus::new(1, 10) < Locus::new(1, 11));
        assert!(b < Locus::MAX);
    }

    #[test]
    fn test_locus_successor() {
        assert_eq!(Locus::new(3, 7).successor(), Some(Locus::new(3, 8)));
        assert_eq!(
            Locus::new(3, u64::MAX).successor(),
            Some(Locus::new(4, 0))
        );
        assert_eq!(Locus::MAX.successor(), None);
    }

    #[test]
    fn test_format_quality() {
        assert_eq!(format_quality(20.0), "20");
        assert_eq!(format_quality(22.857142), "22.857");
        assert_eq!(format_quality(0.5), "0.5");
        assert_eq!(format_quality(0.0), "0");
    }

    #[test]
    fn test_merged_record_line_without_samples() {
        let record = MergedRecord {
            locus: Locus::new(0, 100),
            chromosome: "1".to_string(),
            position: 100,
            id: ".".to_string(),
            reference: "A".to_string(),
            alternates: vec![],
            quality: None,
            filter: "PASS".to_string(),
            info: String::new(),
            format: vec![],
            samples: vec![],
        };
        assert_eq!(record.to_vcf_line(), "1\t100\t.\tA\t.\t.\tPASS\t.");
    }
}
