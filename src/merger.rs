// ==============================================================================
// merger.rs - Per-Locus Record Reconciliation
// ==============================================================================
// Description: Combines the records of one locus into a single merged record
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// Column policies:
//   ID      first non-missing ID in input order
//   QUAL    mean weighted by each file's declared sample count
//   ALT     union in first-seen order, case-insensitive
//   FILTER  union of failed filters, else PASS if any input passed, else "."
//   FORMAT  union in first-seen order, GT first, then SFT / IN when enabled
//   INFO    union of input entries, or generated attributes when configured
// ==============================================================================

use thiserror::Error;

use crate::config::{MergeOptions, MissingMode};
use crate::info_fields::{compute_info, InfoField};
use crate::models::{Locus, MergedRecord, ProvenanceLink, StreamId, MISSING};

/// Per-sample field carrying each file's FILTER value
pub const FILTER_FIELD: &str = "SFT";

/// Per-sample field carrying each file's INFO value
pub const INFO_FIELD: &str = "IN";

const GENOTYPE_FIELD: &str = "GT";

/// Reasons a bucket cannot be merged; the bucket is dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Discordant chromosome at {chromosome}:{position}: input {stream} reports '{found}'")]
    DiscordantChromosome {
        chromosome: String,
        position: u64,
        stream: StreamId,
        found: String,
    },

    #[error("Discordant position at {chromosome}:{position}: input {stream} reports {found}")]
    DiscordantPosition {
        chromosome: String,
        position: u64,
        stream: StreamId,
        found: u64,
    },

    #[error("Discordant reference at {chromosome}:{position}: '{expected}' vs '{found}' from input {stream}")]
    DiscordantReference {
        chromosome: String,
        position: u64,
        stream: StreamId,
        expected: String,
        found: String,
    },

    #[error("Empty bucket at {0}")]
    EmptyBucket(Locus),
}

/// Read-only state shared by every bucket merge of a run
#[derive(Debug, Clone)]
pub struct MergeContext {
    /// Declared sample count per input, indexed by stream
    pub sample_counts: Vec<usize>,
    /// Genotype written for samples whose input has no record at a locus
    pub missing_mode: MissingMode,
    /// Add each input's FILTER as the `SFT` sample field
    pub copy_filter: bool,
    /// Add each input's INFO as the `IN` sample field
    pub copy_info: bool,
    /// INFO attributes to generate; empty keeps the union of input INFO
    pub info_fields: Vec<InfoField>,
}

impl MergeContext {
    pub fn new(sample_counts: Vec<usize>, options: &MergeOptions) -> Self {
        Self {
            sample_counts,
            missing_mode: options.missing_mode,
            copy_filter: options.copy_filter,
            copy_info: options.copy_info,
            info_fields: options.info_fields.clone(),
        }
    }

    pub fn total_samples(&self) -> usize {
        self.sample_counts.iter().sum()
    }

    /// Fill column for a sample whose file has no record at a locus
    pub fn empty_sample(&self, format: &[String]) -> String {
        format
            .iter()
            .map(|field| {
                if field == GENOTYPE_FIELD {
                    self.missing_mode.fill_genotype()
                } else {
                    MISSING
                }
            })
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Stable allele-to-index mapping for one locus
///
/// Index 0 is always the reference; alternates follow in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleRegistry {
    alleles: Vec<String>,
}

impl AlleleRegistry {
    pub fn new(reference: &str) -> Self {
        Self {
            alleles: vec![reference.to_string()],
        }
    }

    pub fn index_of(&self, allele: &str) -> Option<usize> {
        self.alleles
            .iter()
            .position(|known| known.eq_ignore_ascii_case(allele))
    }

    /// Index of `allele`, registering it if unseen
    pub fn get_or_assign(&mut self, allele: &str) -> usize {
        if let Some(index) = self.index_of(allele) {
            return index;
        }
        self.alleles.push(allele.to_string());
        self.alleles.len() - 1
    }

    pub fn alternates(&self) -> &[String] {
        &self.alleles[1..]
    }
}

/// Keep the first link of each input and return the rest
///
/// One input inserts its records in file order, so "first" is the earliest
/// record of that input at this locus.
pub fn drop_duplicate_links(links: &mut Vec<ProvenanceLink>) -> Vec<ProvenanceLink> {
    let mut kept: Vec<ProvenanceLink> = Vec::with_capacity(links.len());
    let mut dropped = Vec::new();
    for link in links.drain(..) {
        if kept.iter().any(|k| k.stream == link.stream) {
            dropped.push(link);
        } else {
            kept.push(link);
        }
    }
    *links = kept;
    dropped
}

/// Merge the records observed at one locus into one output record
///
/// Links are reordered by input index first, so every "first" rule (ID,
/// reference, allele numbering, INFO values) follows configuration order no
/// matter which input reached the index first.
///
/// # Arguments
/// * `ctx` - Per-run merge state: sample counts per input and field policies
/// * `locus` - Key of the bucket, copied into the merged record
/// * `links` - At most one record per input (see `drop_duplicate_links`)
///
/// # Returns
/// * `Ok(MergedRecord)` - Reconciled record with one sample column per declared sample
/// * `Err(ReconcileError)` - Inputs disagree on CHROM, POS or REF; the locus is dropped
///
/// # Example
/// ```no_run
/// use vcf_merge::merger::{merge_bucket, MergeContext};
/// use vcf_merge::models::{Locus, ProvenanceLink};
/// use vcf_merge::MergeOptions;
///
/// # fn demo(links: Vec<ProvenanceLink>) {
/// let ctx = MergeContext::new(vec![2, 1], &MergeOptions::default());
/// match merge_bucket(&ctx, Locus::new(0, 100), links) {
///     Ok(record) => println!("{}", record.to_vcf_line()),
///     Err(e) => eprintln!("dropped: {}", e),
/// }
/// # }
/// ```
pub fn merge_bucket(
    ctx: &MergeContext,
    locus: Locus,
    mut links: Vec<ProvenanceLink>,
) -> Result<MergedRecord, ReconcileError> {
    links.sort_by_key(|link| link.stream);

    let first = links.first().ok_or(ReconcileError::EmptyBucket(locus))?;
    check_consistency(&links)?;

    let chromosome = first.record.chromosome.clone();
    let position = first.record.position;
    let reference = first.record.reference.clone();

    let mut registry = AlleleRegistry::new(&reference);
    for link in &links {
        for alt in &link.record.alternates {
            registry.get_or_assign(alt);
        }
    }

    let format = merge_format(ctx, &links);
    let empty_sample = ctx.empty_sample(&format);
    let samples = merge_samples(ctx, &links, &format, &registry, &empty_sample);

    let mut record = MergedRecord {
        locus,
        chromosome,
        position,
        id: merge_id(&links),
        reference,
        alternates: registry.alternates().to_vec(),
        quality: merge_quality(&ctx.sample_counts, &links),
        filter: merge_filter(&links),
        info: String::new(),
        format,
        samples,
    };

    record.info = if ctx.info_fields.is_empty() {
        merge_info_entries(&links)
    } else {
        compute_info(&ctx.info_fields, &links, &record, &empty_sample)
    };

    Ok(record)
}

/// Every link must agree with the first on chromosome, position and reference
fn check_consistency(links: &[ProvenanceLink]) -> Result<(), ReconcileError> {
    let Some((first, rest)) = links.split_first() else {
        return Ok(());
    };
    let expected = &first.record;

    for link in rest {
        let found = &link.record;
        if found.chromosome != expected.chromosome {
            return Err(ReconcileError::DiscordantChromosome {
                chromosome: expected.chromosome.clone(),
                position: expected.position,
                stream: link.stream,
                found: found.chromosome.clone(),
            });
        }
        if found.position != expected.position {
            return Err(ReconcileError::DiscordantPosition {
                chromosome: expected.chromosome.clone(),
                position: expected.position,
                stream: link.stream,
                found: found.position,
            });
        }
        if found.reference != expected.reference {
            return Err(ReconcileError::DiscordantReference {
                chromosome: expected.chromosome.clone(),
                position: expected.position,
                stream: link.stream,
                expected: expected.reference.clone(),
                found: found.reference.clone(),
            });
        }
    }
    Ok(())
}

fn merge_id(links: &[ProvenanceLink]) -> String {
    links
        .iter()
        .map(|link| link.record.id.as_str())
        .find(|id| *id != MISSING && !id.is_empty())
        .unwrap_or(MISSING)
        .to_string()
}

/// Sample-count-weighted mean quality over the contributing inputs
///
/// Every contributing input adds its sample count to the denominator; only
/// positive qualities add to the numerator. Missing when no input reports a
/// quality or the contributing inputs declare no samples.
pub fn merge_quality(sample_counts: &[usize], links: &[ProvenanceLink]) -> Option<f64> {
    if links.iter().all(|link| link.record.quality.is_none()) {
        return None;
    }

    let mut weighted = 0.0;
    let mut total_weight = 0usize;
    for link in links {
        let weight = sample_counts.get(link.stream).copied().unwrap_or(0);
        if let Some(quality) = link.record.quality.filter(|q| *q > 0.0) {
            weighted += quality * weight as f64;
        }
        total_weight += weight;
    }

    if total_weight == 0 {
        None
    } else {
        Some(weighted / total_weight as f64)
    }
}

fn merge_filter(links: &[ProvenanceLink]) -> String {
    let mut failed: Vec<&str> = Vec::new();
    let mut pass_found = false;

    for link in links {
        match link.record.filter.as_str() {
            "PASS" => pass_found = true,
            MISSING | "" => {}
            filters => {
                for filter in filters.split(';').filter(|f| !f.is_empty()) {
                    if !failed.contains(&filter) {
                        failed.push(filter);
                    }
                }
            }
        }
    }

    if !failed.is_empty() {
        failed.join(";")
    } else if pass_found {
        "PASS".to_string()
    } else {
        MISSING.to_string()
    }
}

fn merge_format(ctx: &MergeContext, links: &[ProvenanceLink]) -> Vec<String> {
    let mut format: Vec<String> = Vec::new();
    for link in links {
        for field in &link.record.format {
            if !format.contains(field) {
                format.push(field.clone());
            }
        }
    }

    if let Some(gt) = format.iter().position(|f| f == GENOTYPE_FIELD) {
        let field = format.remove(gt);
        format.insert(0, field);
    } else if format.is_empty() && ctx.total_samples() > 0 {
        format.push(GENOTYPE_FIELD.to_string());
    }

    for (enabled, field) in [(ctx.copy_filter, FILTER_FIELD), (ctx.copy_info, INFO_FIELD)] {
        if enabled && !format.iter().any(|f| f == field) {
            format.push(field.to_string());
        }
    }
    format
}

/// Rewrite a genotype's allele indices through `mapping` (local -> global)
///
/// Separators are preserved; missing or unmappable alleles become ".".
pub fn remap_genotype(genotype: &str, mapping: &[Option<usize>]) -> String {
    let mut remapped = String::with_capacity(genotype.len());
    let mut start = 0;
    for (offset, separator) in genotype.char_indices().filter(|(_, c)| *c == '/' || *c == '|') {
        push_allele(&mut remapped, &genotype[start..offset], mapping);
        remapped.push(separator);
        start = offset + separator.len_utf8();
    }
    push_allele(&mut remapped, &genotype[start..], mapping);
    remapped
}

fn push_allele(out: &mut String, allele: &str, mapping: &[Option<usize>]) {
    let global = allele
        .parse::<usize>()
        .ok()
        .and_then(|local| mapping.get(local).copied().flatten());
    match global {
        Some(index) => out.push_str(&index.to_string()),
        None => out.push_str(MISSING),
    }
}

fn merge_samples(
    ctx: &MergeContext,
    links: &[ProvenanceLink],
    format: &[String],
    registry: &AlleleRegistry,
    empty_sample: &str,
) -> Vec<String> {
    let mut samples = Vec::with_capacity(ctx.total_samples());

    for (stream, &declared) in ctx.sample_counts.iter().enumerate() {
        let Some(link) = links.iter().find(|link| link.stream == stream) else {
            samples.extend(std::iter::repeat(empty_sample.to_string()).take(declared));
            continue;
        };
        let record = &link.record;

        let mapping: Vec<Option<usize>> = std::iter::once(Some(0))
            .chain(record.alternates.iter().map(|alt| registry.index_of(alt)))
            .collect();
        let positions: Vec<Option<usize>> = format
            .iter()
            .map(|field| record.format_position(field))
            .collect();

        for column in 0..declared {
            let Some(raw) = record.samples.get(column) else {
                samples.push(empty_sample.to_string());
                continue;
            };
            let values: Vec<&str> = raw.split(':').collect();

            let merged: Vec<String> = format
                .iter()
                .zip(&positions)
                .map(|(field, position)| {
                    let value = position.and_then(|p| values.get(p).copied());
                    match (field.as_str(), value) {
                        (GENOTYPE_FIELD, Some(gt)) => remap_genotype(gt, &mapping),
                        (GENOTYPE_FIELD, None) => "./.".to_string(),
                        (FILTER_FIELD, None) if ctx.copy_filter => record.filter.clone(),
                        (INFO_FIELD, None) if ctx.copy_info => record.info.clone(),
                        (_, Some(v)) if !v.is_empty() => v.to_string(),
                        _ => MISSING.to_string(),
                    }
                })
                .collect();
            samples.push(merged.join(":"));
        }
    }
    samples
}

/// Union of the inputs' INFO entries; the first value of a key wins
fn merge_info_entries(links: &[ProvenanceLink]) -> String {
    let mut entries: Vec<&str> = Vec::new();
    let mut keys: Vec<&str> = Vec::new();
    for link in links {
        for entry in link.record.info.split(';') {
            if entry.is_empty() || entry == MISSING {
                continue;
            }
            let key = entry.split('=').next().unwrap_or(entry);
            if !keys.contains(&key) {
                keys.push(key);
                entries.push(entry);
            }
        }
    }
    entries.join(";")
}
