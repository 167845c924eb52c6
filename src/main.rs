// ==============================================================================
// main.rs - VCF Merge Entry Point
// ==============================================================================
// Description: Command line front end for the streaming multi-file VCF merger
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcf_merge::{MergeConfig, MissingMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge sorted VCF files into one sorted VCF", long_about = None)]
struct Args {
    /// Input VCF files (plain or gzip); their order defines sample-column order
    #[arg(value_name = "VCF")]
    inputs: Vec<PathBuf>,

    /// Output file (".gz" suffix compresses); standard output when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file; command line flags override its values
    #[arg(short, long, env = "VCF_MERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Chromosome order file (one name per line, or a .fai index)
    #[arg(long)]
    chromosome_order: Option<PathBuf>,

    /// Fill for samples of files without a record at a position (missing or reference)
    #[arg(long)]
    missing_mode: Option<String>,

    /// Copy each file's FILTER value into the SFT sample field
    #[arg(long)]
    copy_filter: bool,

    /// Copy each file's INFO value into the IN sample field
    #[arg(long)]
    copy_info: bool,

    /// INFO attributes to generate, comma separated (e.g. AC,AF,AN,DP)
    #[arg(long, value_delimiter = ',')]
    info_fields: Option<Vec<String>>,

    /// Data lines per read batch
    #[arg(long)]
    batch_lines: Option<usize>,

    /// Batches buffered per input
    #[arg(long)]
    max_batches: Option<usize>,

    /// Buffered positions that trigger an early flush (default: batch lines)
    #[arg(long)]
    flush_threshold: Option<usize>,

    /// Merge worker threads (default: available cores)
    #[arg(short = 'j', long, env = "VCF_MERGE_THREADS")]
    threads: Option<usize>,

    /// Write a JSON run summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Args {
    /// Start from the configuration file (if any) and apply command line overrides
    fn into_config(self) -> Result<MergeConfig> {
        let mut config = match &self.config {
            Some(path) => MergeConfig::from_file(path)?,
            None => MergeConfig::default(),
        };

        if !self.inputs.is_empty() {
            config.inputs = self.inputs;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if self.chromosome_order.is_some() {
            config.chromosome_order = self.chromosome_order;
        }
        if let Some(mode) = self.missing_mode {
            config.missing_mode = mode.parse::<MissingMode>()?;
        }
        config.copy_filter |= self.copy_filter;
        config.copy_info |= self.copy_info;
        if let Some(fields) = self.info_fields {
            config.info_fields = fields;
        }
        if let Some(lines) = self.batch_lines {
            config.batch_lines = lines;
        }
        if let Some(batches) = self.max_batches {
            config.max_batches = batches;
        }
        if self.flush_threshold.is_some() {
            config.flush_threshold = self.flush_threshold;
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.summary.is_some() {
            config.summary = self.summary;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout may carry the merged VCF
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vcf_merge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config().context("Invalid configuration")?;

    info!(
        "Merging {} files (missing mode: {})",
        config.inputs.len(),
        config.missing_mode
    );

    match vcf_merge::run(&config).await {
        Ok(summary) => {
            info!(
                "Done: {} records written, {} dropped",
                summary.counts.records_emitted,
                summary.dropped()
            );
            Ok(())
        }
        Err(e) => {
            error!("Merge failed: {}", e);
            Err(e).context("Merge failed")
        }
    }
}
