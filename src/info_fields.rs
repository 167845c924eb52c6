// ==============================================================================
// info_fields.rs - Generated INFO Attributes
// ==============================================================================
// Description: INFO attributes recomputed over the merged sample columns
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// Supported attributes (VCF 4.2 reserved keys):
//   AC, AF, AN      allele counts/frequencies from the merged genotypes
//   DP              sum of per-sample DP
//   MQ0, MQ         zero count and RMS of per-sample GQ
//   NS              samples carrying data
//   QD              quality by depth
//   DB, H2, H3, SOMATIC, VALIDATED   flags carried from any input record
// ==============================================================================

use noodles_vcf::header::record::value::map::info::{Number, Type};
use noodles_vcf::header::record::value::map::Info;
use noodles_vcf::header::record::value::Map;
use std::fmt;
use std::str::FromStr;

use crate::models::{MergedRecord, ProvenanceLink, MISSING};

/// An INFO attribute the merger can generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    AC,
    AF,
    AN,
    DB,
    DP,
    H2,
    H3,
    MQ0,
    MQ,
    NS,
    QD,
    Somatic,
    Validated,
}

impl FromStr for InfoField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(InfoField::AC),
            "AF" => Ok(InfoField::AF),
            "AN" => Ok(InfoField::AN),
            "DB" => Ok(InfoField::DB),
            "DP" => Ok(InfoField::DP),
            "H2" => Ok(InfoField::H2),
            "H3" => Ok(InfoField::H3),
            "MQ0" => Ok(InfoField::MQ0),
            "MQ" => Ok(InfoField::MQ),
            "NS" => Ok(InfoField::NS),
            "QD" => Ok(InfoField::QD),
            "SOMATIC" => Ok(InfoField::Somatic),
            "VALIDATED" => Ok(InfoField::Validated),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for InfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl InfoField {
    pub fn key(&self) -> &'static str {
        match self {
            InfoField::AC => "AC",
            InfoField::AF => "AF",
            InfoField::AN => "AN",
            InfoField::DB => "DB",
            InfoField::DP => "DP",
            InfoField::H2 => "H2",
            InfoField::H3 => "H3",
            InfoField::MQ0 => "MQ0",
            InfoField::MQ => "MQ",
            InfoField::NS => "NS",
            InfoField::QD => "QD",
            InfoField::Somatic => "SOMATIC",
            InfoField::Validated => "VALIDATED",
        }
    }

    /// `##INFO` definition emitted by the header merger
    pub fn header_definition(&self) -> Map<Info> {
        let (number, ty, description) = match self {
            InfoField::AC => (Number::AlternateBases, Type::Integer, "Allele count in genotypes, for each ALT allele"),
            InfoField::AF => (Number::AlternateBases, Type::Float, "Allele frequency, for each ALT allele"),
            InfoField::AN => (Number::Count(1), Type::Integer, "Total number of alleles in called genotypes"),
            InfoField::DB => (Number::Count(0), Type::Flag, "dbSNP membership"),
            InfoField::DP => (Number::Count(1), Type::Integer, "Combined depth across samples"),
            InfoField::H2 => (Number::Count(0), Type::Flag, "HapMap2 membership"),
            InfoField::H3 => (Number::Count(0), Type::Flag, "HapMap3 membership"),
            InfoField::MQ0 => (Number::Count(1), Type::Integer, "Number of samples with genotype quality zero"),
            InfoField::MQ => (Number::Count(1), Type::Float, "RMS genotype quality"),
            InfoField::NS => (Number::Count(1), Type::Integer, "Number of samples with data"),
            InfoField::QD => (Number::Count(1), Type::Float, "Quality by depth"),
            InfoField::Somatic => (Number::Count(0), Type::Flag, "Somatic mutation"),
            InfoField::Validated => (Number::Count(0), Type::Flag, "Validated by follow-up experiment"),
        };
        Map::<Info>::new(number, ty, description)
    }

    fn is_flag(&self) -> bool {
        matches!(
            self,
            InfoField::DB | InfoField::H2 | InfoField::H3 | InfoField::Somatic | InfoField::Validated
        )
    }
}

/// Value of one FORMAT field inside a colon-separated sample column
pub fn sample_field(sample: &str, position: usize) -> Option<&str> {
    sample.split(':').nth(position)
}

/// Allele indices called in a genotype string, skipping missing alleles
pub fn called_alleles(genotype: &str) -> impl Iterator<Item = usize> + '_ {
    genotype
        .split(['/', '|'])
        .filter_map(|allele| allele.parse::<usize>().ok())
}

/// Whether any contributing record carries an INFO key
fn any_link_has_key(links: &[ProvenanceLink], key: &str) -> bool {
    links.iter().any(|link| {
        link.record
            .info
            .split(';')
            .any(|entry| entry.split('=').next() == Some(key))
    })
}

/// Sum of an integer FORMAT field across samples; non-numeric values are skipped
fn sum_sample_field(record: &MergedRecord, field: &str) -> u64 {
    let Some(position) = record.format.iter().position(|f| f == field) else {
        return 0;
    };
    record
        .samples
        .iter()
        .filter_map(|sample| sample_field(sample, position))
        .filter_map(|value| value.parse::<u64>().ok())
        .sum()
}

/// Accumulated genotype statistics for AC/AF/AN
struct AlleleCounts {
    counts: Vec<u64>,
    total: u64,
}

impl AlleleCounts {
    fn from_record(record: &MergedRecord) -> Self {
        let mut counts = vec![0u64; record.alternates.len() + 1];
        let mut total = 0;
        if let Some(gt) = record.format.iter().position(|f| f == "GT") {
            for sample in &record.samples {
                let Some(genotype) = sample_field(sample, gt) else {
                    continue;
                };
                for allele in called_alleles(genotype) {
                    if let Some(count) = counts.get_mut(allele) {
                        *count += 1;
                        total += 1;
                    }
                }
            }
        }
        Self { counts, total }
    }
}

/// Compose the INFO column for a merged record, attributes in request order
///
/// `empty_sample` is the fill pattern for absent samples; NS counts every
/// column that differs from it.
pub fn compute_info(
    fields: &[InfoField],
    links: &[ProvenanceLink],
    record: &MergedRecord,
    empty_sample: &str,
) -> String {
    let mut allele_counts: Option<AlleleCounts> = None;
    let mut entries: Vec<String> = Vec::with_capacity(fields.len());

    for field in fields {
        if field.is_flag() {
            if any_link_has_key(links, field.key()) {
                entries.push(field.key().to_string());
            }
            continue;
        }

        match field {
            InfoField::AC | InfoField::AF | InfoField::AN => {
                let stats = allele_counts.get_or_insert_with(|| AlleleCounts::from_record(record));
                let value = match field {
                    InfoField::AN => stats.total.to_string(),
                    // Nothing to report per ALT allele on a monomorphic site
                    _ if stats.counts.len() < 2 => continue,
                    InfoField::AC => stats.counts[1..]
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                    _ => stats.counts[1..]
                        .iter()
                        .map(|&c| {
                            if stats.total == 0 {
                                MISSING.to_string()
                            } else {
                                format!("{:.3}", c as f64 / stats.total as f64)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                };
                entries.push(format!("{}={}", field.key(), value));
            }
            InfoField::DP => {
                entries.push(format!("DP={}", sum_sample_field(record, "DP")));
            }
            InfoField::QD => {
                let depth = sum_sample_field(record, "DP");
                let value = match record.quality {
                    Some(quality) if depth > 0 => format!("{:.3}", quality / depth as f64),
                    _ => MISSING.to_string(),
                };
                entries.push(format!("QD={}", value));
            }
            InfoField::MQ0 | InfoField::MQ => {
                let qualities: Vec<u64> = match record.format.iter().position(|f| f == "GQ") {
                    Some(position) => record
                        .samples
                        .iter()
                        .filter_map(|sample| sample_field(sample, position))
                        .filter_map(|value| value.parse::<u64>().ok())
                        .collect(),
                    None => Vec::new(),
                };
                if *field == InfoField::MQ0 {
                    let zeros = qualities.iter().filter(|&&q| q == 0).count();
                    entries.push(format!("MQ0={}", zeros));
                } else if qualities.is_empty() {
                    entries.push(format!("MQ={}", MISSING));
                } else {
                    let squares: f64 = qualities.iter().map(|&q| (q * q) as f64).sum();
                    let rms = (squares / qualities.len() as f64).sqrt();
                    entries.push(format!("MQ={:.3}", rms));
                }
            }
            InfoField::NS => {
                let with_data = record
                    .samples
                    .iter()
                    .filter(|sample| sample.as_str() != empty_sample)
                    .count();
                entries.push(format!("NS={}", with_data));
            }
            InfoField::DB
            | InfoField::H2
            | InfoField::H3
            | InfoField::Somatic
            | InfoField::Validated => {}
        }
    }

    entries.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodedRecord, Locus};

    fn link_with_info(stream: usize, info: &str) -> ProvenanceLink {
        ProvenanceLink::new(
            stream,
            DecodedRecord {
                chromosome: "1".to_string(),
                position: 100,
                id: ".".to_string(),
                reference: "A".to_string(),
                alternates: vec!["T".to_string()],
                quality: Some(30.0),
                filter: "PASS".to_string(),
                info: info.to_string(),
                format: vec!["GT".to_string()],
                samples: vec!["0/1".to_string()],
                record_number: 1,
            },
        )
    }

    fn merged(format: &[&str], samples: &[&str], quality: Option<f64>) -> MergedRecord {
        MergedRecord {
            locus: Locus::new(0, 100),
            chromosome: "1".to_string(),
            position: 100,
            id: ".".to_string(),
            reference: "A".to_string(),
            alternates: vec!["T".to_string(), "G".to_string()],
            quality,
            filter: "PASS".to_string(),
            info: String::new(),
            format: format.iter().map(|s| s.to_string()).collect(),
            samples: samples.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_info_field_names() {
        assert_eq!("MQ0".parse::<InfoField>(), Ok(InfoField::MQ0));
        assert_eq!("SOMATIC".parse::<InfoField>(), Ok(InfoField::Somatic));
        assert_eq!("XX".parse::<InfoField>(), Err("XX".to_string()));
    }

    #[test]
    fn test_allele_counts_and_frequencies() {
        let record = merged(&["GT"], &["0/1", "1|2", "./.", "2/2"], None);
        let info = compute_info(
            &[InfoField::AC, InfoField::AN, InfoField::AF],
            &[],
            &record,
            "./.",
        );
        assert_eq!(info, "AC=2,3;AN=6;AF=0.333,0.500");
    }

    #[test]
    fn test_depth_and_quality_by_depth() {
        let record = merged(&["GT", "DP"], &["0/1:10", "./.:.", "1/1:30"], Some(80.0));
        let info = compute_info(&[InfoField::DP, InfoField::QD], &[], &record, "./.:.");
        assert_eq!(info, "DP=40;QD=2.000");

        let no_quality = merged(&["GT", "DP"], &["0/1:10"], None);
        assert_eq!(
            compute_info(&[InfoField::QD], &[], &no_quality, "./.:."),
            "QD=."
        );
    }

    #[test]
    fn test_genotype_quality_statistics() {
        let record = merged(&["GT", "GQ"], &["0/1:0", "0/1:3", "1/1:4", "./.:."], None);
        let info = compute_info(&[InfoField::MQ0, InfoField::MQ], &[], &record, "./.:.");
        // sqrt((9 + 16) / 3)
        assert_eq!(info, "MQ0=1;MQ=2.887");
    }

    #[test]
    fn test_samples_with_data() {
        let record = merged(&["GT"], &["0/1", "./.", "./."], None);
        assert_eq!(compute_info(&[InfoField::NS], &[], &record, "./."), "NS=1");
    }

    #[test]
    fn test_flags_require_exact_key() {
        let links = vec![
            link_with_info(0, "DP=10;DBX=1"),
            link_with_info(1, "H2;SOMATIC"),
        ];
        let record = merged(&["GT"], &["0/1"], None);
        let info = compute_info(
            &[InfoField::DB, InfoField::H2, InfoField::Somatic, InfoField::Validated],
            &links,
            &record,
            "./.",
        );
        assert_eq!(info, "H2;SOMATIC");
    }

    #[test]
    fn test_header_definition() {
        let af = InfoField::AF.header_definition();
        assert_eq!(af.number(), Number::AlternateBases);
        assert_eq!(af.ty(), Type::Float);

        let db = InfoField::DB.header_definition();
        assert_eq!(db.number(), Number::Count(0));
        assert_eq!(db.ty(), Type::Flag);
    }
}
