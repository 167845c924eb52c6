// ==============================================================================
// header.rs - Header Merger
// ==============================================================================
// Description: Unions the meta-information and sample lists of all inputs
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.2.0
// ==============================================================================
// Records keyed by ID (INFO, FILTER, FORMAT, ALT, contig and structured
// other records) are kept once per section, first definition wins.
// Unstructured `##key=value` lines are always kept.
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::header::record::value::map::{format, Format};
use noodles_vcf::header::record::value::{Collection, Map};
use noodles_vcf::header::FileFormat;
use std::collections::HashSet;
use std::io;
use tracing::warn;

use crate::config::MergeOptions;
use crate::merger::{FILTER_FIELD, INFO_FIELD};

const FIXED_HEADER: &str = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO";

/// Header of one input, as seen by the merger
#[derive(Debug, Clone, Copy)]
pub struct StreamHeader<'a> {
    /// Display name of the input
    pub name: &'a str,
    pub header: &'a vcf::Header,
}

/// Combined header written once before any record
#[derive(Debug, Clone, PartialEq)]
pub struct MergedHeader {
    /// Union of the meta records; carries no sample names
    pub header: vcf::Header,
    /// Every declared sample, in input order then column order
    ///
    /// Kept outside `header` because two inputs may declare the same name.
    pub samples: Vec<String>,
}

impl MergedHeader {
    pub fn file_format(&self) -> FileFormat {
        self.header.file_format()
    }

    /// `##` meta lines as serialized by noodles, `##fileformat` first
    pub fn meta_lines(&self) -> io::Result<Vec<String>> {
        let mut buf = Vec::new();
        vcf::io::Writer::new(&mut buf).write_header(&self.header)?;
        let text = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(text
            .lines()
            .filter(|line| line.starts_with("##"))
            .map(String::from)
            .collect())
    }

    /// The `#CHROM` delimiter line; FORMAT appears only when samples exist
    pub fn column_line(&self) -> String {
        if self.samples.is_empty() {
            FIXED_HEADER.to_string()
        } else {
            format!("{}\tFORMAT\t{}", FIXED_HEADER, self.samples.join("\t"))
        }
    }
}

/// Union every input header
///
/// # Arguments
/// * `headers` - Input headers in configuration order
/// * `options` - Merge options; carry-through and generated INFO fields add
///   their own definitions
///
/// # Returns
/// * `MergedHeader` - `fileformat` of the first input (VCFv4.2 when there is
///   none), the union of every meta record, and all sample names in order
///
/// # Example
/// ```no_run
/// use vcf_merge::header::{merge_headers, StreamHeader};
/// use vcf_merge::MergeOptions;
///
/// # fn demo(a: &noodles_vcf::Header, b: &noodles_vcf::Header) -> std::io::Result<()> {
/// let merged = merge_headers(
///     &[StreamHeader { name: "a.vcf", header: a }, StreamHeader { name: "b.vcf", header: b }],
///     &MergeOptions::default(),
/// );
/// for line in merged.meta_lines()? {
///     println!("{}", line);
/// }
/// println!("{}", merged.column_line());
/// # Ok(())
/// # }
/// ```
pub fn merge_headers(headers: &[StreamHeader<'_>], options: &MergeOptions) -> MergedHeader {
    let file_format = headers
        .first()
        .map(|input| input.header.file_format())
        .unwrap_or_else(|| FileFormat::new(4, 2));
    let mut merged = vcf::Header::builder().set_file_format(file_format).build();

    for input in headers {
        union_into(&mut merged, input.header);
    }

    if options.copy_filter {
        merged.formats_mut().entry(FILTER_FIELD.to_string()).or_insert_with(|| {
            Map::<Format>::new(format::Number::Count(1), format::Type::String, "FILTER value of the source file")
        });
    }
    if options.copy_info {
        merged.formats_mut().entry(INFO_FIELD.to_string()).or_insert_with(|| {
            Map::<Format>::new(format::Number::Count(1), format::Type::String, "INFO value of the source file")
        });
    }
    for field in &options.info_fields {
        merged
            .infos_mut()
            .entry(field.key().to_string())
            .or_insert_with(|| field.header_definition());
    }

    let mut samples: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for input in headers {
        for sample in input.header.sample_names() {
            if !seen.insert(sample.as_str()) {
                warn!("Sample '{}' in {} is also declared by an earlier input", sample, input.name);
            }
            samples.push(sample.clone());
        }
    }

    MergedHeader {
        header: merged,
        samples,
    }
}

/// Add the records of `header` that `merged` does not define yet
fn union_into(merged: &mut vcf::Header, header: &vcf::Header) {
    for (id, info) in header.infos() {
        merged.infos_mut().entry(id.clone()).or_insert_with(|| info.clone());
    }
    for (id, filter) in header.filters() {
        merged.filters_mut().entry(id.clone()).or_insert_with(|| filter.clone());
    }
    for (id, format) in header.formats() {
        merged.formats_mut().entry(id.clone()).or_insert_with(|| format.clone());
    }
    for (id, allele) in header.alternative_alleles() {
        merged
            .alternative_alleles_mut()
            .entry(id.clone())
            .or_insert_with(|| allele.clone());
    }
    for (id, contig) in header.contigs() {
        merged.contigs_mut().entry(id.clone()).or_insert_with(|| contig.clone());
    }

    for (key, collection) in header.other_records() {
        let target = merged
            .other_records_mut()
            .entry(key.clone())
            .or_insert_with(|| empty_like(collection));
        extend_collection(target, collection);
    }
}

fn empty_like(collection: &Collection) -> Collection {
    match collection {
        Collection::Unstructured(_) => Collection::Unstructured(Vec::new()),
        Collection::Structured(_) => Collection::Structured(Default::default()),
    }
}

fn extend_collection(target: &mut Collection, incoming: &Collection) {
    match (target, incoming) {
        (Collection::Unstructured(values), Collection::Unstructured(more)) => {
            values.extend(more.iter().cloned());
        }
        (Collection::Structured(maps), Collection::Structured(more)) => {
            for (id, map) in more {
                maps.entry(id.clone()).or_insert_with(|| map.clone());
            }
        }
        // Same key used both with and without an ID; the first shape wins
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info_fields::InfoField;

    fn parse(lines: &[&str], samples: &[&str]) -> vcf::Header {
        let mut text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        text.push_str(FIXED_HEADER);
        if !samples.is_empty() {
            text.push_str("\tFORMAT\t");
            text.push_str(&samples.join("\t"));
        }
        text.push('\n');
        text.parse().unwrap()
    }

    fn sorted(mut lines: Vec<String>) -> Vec<String> {
        lines.sort();
        lines
    }

    const LINES_A: &[&str] = &[
        "##fileformat=VCFv4.1",
        "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">",
        "##FILTER=<ID=q10,Description=\"Quality below 10\">",
        "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">",
        "##contig=<ID=1,length=249250621>",
    ];

    #[test]
    fn test_self_merge_is_identity() {
        let a = parse(LINES_A, &["S1"]);
        let input = StreamHeader { name: "a.vcf", header: &a };
        let merged = merge_headers(&[input, input], &MergeOptions::default());

        let lines = merged.meta_lines().unwrap();
        assert_eq!(lines[0], "##fileformat=VCFv4.1");
        assert_eq!(sorted(lines), sorted(LINES_A.iter().map(|s| s.to_string()).collect()));
        assert_eq!(merged.samples, vec!["S1", "S1"]);
    }

    #[test]
    fn test_union_keeps_first_definition() {
        let a = parse(LINES_A, &["S1", "S2"]);
        let b = parse(
            &[
                "##fileformat=VCFv4.3",
                "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Other depth\">",
                "##INFO=<ID=AF,Number=A,Type=Float,Description=\"Frequency\">",
                "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">",
                "##reference=hg19",
            ],
            &["S3"],
        );

        let merged = merge_headers(
            &[StreamHeader { name: "a.vcf", header: &a }, StreamHeader { name: "b.vcf", header: &b }],
            &MergeOptions::default(),
        );
        assert_eq!(merged.file_format(), FileFormat::new(4, 1));

        let infos: Vec<&String> = merged.header.infos().keys().collect();
        assert_eq!(infos, vec!["DP", "AF"]);
        let lines = merged.meta_lines().unwrap();
        assert!(lines.iter().any(|l| l.contains("Description=\"Depth\"")));
        assert!(!lines.iter().any(|l| l.contains("Other depth")));
        assert!(lines.iter().any(|l| l == "##reference=hg19"));
        assert_eq!(lines.iter().filter(|l| l.contains("ID=DP")).count(), 2);
        assert_eq!(merged.samples, vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn test_free_text_entries_not_deduplicated() {
        let a = parse(&["##fileformat=VCFv4.2", "##source=caller"], &[]);
        let input = StreamHeader { name: "a.vcf", header: &a };
        let merged = merge_headers(&[input, input], &MergeOptions::default());

        let lines = merged.meta_lines().unwrap();
        assert_eq!(lines.iter().filter(|l| *l == "##source=caller").count(), 2);
    }

    #[test]
    fn test_no_inputs_defaults_to_v42() {
        let merged = merge_headers(&[], &MergeOptions::default());
        assert_eq!(merged.file_format(), FileFormat::new(4, 2));
        let lines = merged.meta_lines().unwrap();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert!(!lines.iter().any(|l| l.starts_with("##INFO") || l.starts_with("##FORMAT")));
    }

    #[test]
    fn test_synthetic_definitions() {
        let options = MergeOptions {
            copy_filter: true,
            copy_info: true,
            info_fields: vec![InfoField::DP, InfoField::NS],
            ..MergeOptions::default()
        };
        let a = parse(LINES_A, &["S1"]);
        let merged = merge_headers(&[StreamHeader { name: "a.vcf", header: &a }], &options);

        assert!(merged.header.formats().contains_key(FILTER_FIELD));
        assert!(merged.header.formats().contains_key(INFO_FIELD));
        assert!(merged.header.infos().contains_key("NS"));

        let lines = merged.meta_lines().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("##FORMAT=<ID=SFT,")));
        assert!(lines.iter().any(|l| l.starts_with("##INFO=<ID=NS,")));
        // DP keeps the input's definition
        let dp: Vec<&String> = lines.iter().filter(|l| l.starts_with("##INFO=<ID=DP,")).collect();
        assert_eq!(dp, vec!["##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">"]);
    }

    #[test]
    fn test_column_line() {
        let a = parse(&["##fileformat=VCFv4.2"], &["S1", "S2"]);
        let b = parse(&["##fileformat=VCFv4.2"], &["S3"]);
        let merged = merge_headers(
            &[StreamHeader { name: "a.vcf", header: &a }, StreamHeader { name: "b.vcf", header: &b }],
            &MergeOptions::default(),
        );
        assert_eq!(
            merged.column_line(),
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3"
        );

        let c = parse(&["##fileformat=VCFv4.2"], &[]);
        let sites_only = merge_headers(&[StreamHeader { name: "c.vcf", header: &c }], &MergeOptions::default());
        assert_eq!(sites_only.column_line(), FIXED_HEADER);
    }
}
