// ==============================================================================
// pipeline.rs - Streaming Merge Pipeline
// ==============================================================================
// Description: Reader, coordinator and writer stages of the multi-file merge
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// Stages:
//   reader (one per input)  -> bounded batch queue per input
//   coordinator             ingest cycle, watermark, flush round
//   writer                  header once, then merged records in locus order
//
// Each stage runs on a blocking tokio thread. A failing stage drops its
// channel ends; its neighbours see the closed channel and stop.
// ==============================================================================

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chromosome_order::{ChromosomeOrder, ChromosomeOrderError};
use crate::config::{ConfigError, MergeConfig, MergeOptions};
use crate::header::{merge_headers, MergedHeader, StreamHeader};
use crate::merger::{drop_duplicate_links, merge_bucket, MergeContext, ReconcileError};
use crate::models::{Locus, MergedRecord, ProvenanceLink, StreamId};
use crate::output::{OutputError, RecordSink, VcfWriter};
use crate::parsers::{decode_batch, InputStream, RawBatch, StreamError, VcfFileReader};
use crate::position_index::PositionIndex;
use crate::watermark::WatermarkTracker;

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ChromosomeOrder(#[from] ChromosomeOrderError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Failed to write summary {path}: {details}")]
    Summary { path: PathBuf, details: String },

    #[error("Failed to start merge workers: {0}")]
    WorkerPool(String),

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("The {0} stage stopped unexpectedly")]
    Shutdown(&'static str),
}

impl PipelineError {
    /// Secondary error raised because another stage went away
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PipelineError::Shutdown(_))
    }
}

/// Counters accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeCounts {
    /// Data records read from all inputs
    pub records_read: u64,
    /// Records dropped as malformed
    pub parse_errors: u64,
    /// Records dropped for appearing before their input's previous locus
    pub out_of_order: u64,
    /// Extra records from one input at one locus
    pub duplicate_links: u64,
    /// Loci dropped because inputs disagreed on CHROM/POS/REF
    pub discordant_loci: u64,
    pub records_emitted: u64,
    pub flush_rounds: u64,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Number of input files
    pub inputs: usize,
    /// Sample columns in the merged output
    pub samples: usize,
    #[serde(flatten)]
    pub counts: MergeCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MergeSummary {
    /// Loci or records left out of the output
    pub fn dropped(&self) -> u64 {
        self.counts.parse_errors + self.counts.out_of_order + self.counts.discordant_loci
    }

    pub fn log(&self) {
        let elapsed = self.finished_at - self.started_at;
        info!(
            "Merged {} inputs ({} samples): {} records read, {} emitted in {} flush rounds ({:.2}s)",
            self.inputs,
            self.samples,
            self.counts.records_read,
            self.counts.records_emitted,
            self.counts.flush_rounds,
            elapsed.num_milliseconds() as f64 / 1000.0
        );
        if self.dropped() > 0 || self.counts.duplicate_links > 0 {
            warn!(
                "Dropped: {} malformed, {} out of order, {} discordant loci, {} repeated records",
                self.counts.parse_errors,
                self.counts.out_of_order,
                self.counts.discordant_loci,
                self.counts.duplicate_links
            );
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        let summary_error = |details: String| PipelineError::Summary {
            path: path.to_path_buf(),
            details,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| summary_error(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| summary_error(e.to_string()))
    }
}

type BatchMessage = Result<RawBatch, StreamError>;

/// Raised by a failing reader so the coordinator stops at its next cycle,
/// even when it is not currently pulling from that reader
#[derive(Debug, Default)]
struct FailureSignal {
    /// 1-based index of the first failed input; 0 while every reader is healthy
    stream: AtomicUsize,
}

impl FailureSignal {
    fn raise(&self, stream: StreamId) {
        let _ = self
            .stream
            .compare_exchange(0, stream + 1, Ordering::AcqRel, Ordering::Acquire);
    }

    fn failed_stream(&self) -> Option<StreamId> {
        match self.stream.load(Ordering::Acquire) {
            0 => None,
            n => Some(n - 1),
        }
    }
}

/// Pull batches from one input until it ends or the coordinator goes away
///
/// A read error raises `failure` before it is queued behind any pending batches.
fn reader_stage(
    mut stream: Box<dyn InputStream>,
    id: StreamId,
    batch_lines: usize,
    tx: mpsc::Sender<BatchMessage>,
    failure: Arc<FailureSignal>,
) {
    let name = stream.name().to_string();
    let mut batches = 0usize;
    loop {
        match stream.next_batch(batch_lines) {
            Ok(Some(batch)) => {
                batches += 1;
                if tx.blocking_send(Ok(batch)).is_err() {
                    debug!("{}: coordinator stopped, reader exiting", name);
                    return;
                }
            }
            Ok(None) => {
                debug!("{}: end of stream after {} batches", name, batches);
                return;
            }
            Err(e) => {
                error!("{}: {}", name, e);
                failure.raise(id);
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// Write the header, then every merged chunk as it arrives
fn writer_stage<S: RecordSink>(
    mut sink: S,
    header: MergedHeader,
    mut rx: mpsc::Receiver<Vec<MergedRecord>>,
) -> Result<(), PipelineError> {
    sink.write_header(&header)?;
    while let Some(chunk) = rx.blocking_recv() {
        sink.write_records(&chunk)?;
    }
    sink.finish()?;
    Ok(())
}

/// Progress made by ingesting one batch
struct BatchOutcome {
    stream: usize,
    last_seen: Option<Locus>,
    lines: u64,
    parse_errors: u64,
    out_of_order: u64,
}

/// Decode a batch and move its records into the index
fn ingest_batch(
    batch: &RawBatch,
    index: &PositionIndex,
    order: &ChromosomeOrder,
    samples_declared: usize,
    last_seen: Option<Locus>,
    name: &str,
) -> BatchOutcome {
    let decoded = decode_batch(batch, order, samples_declared);
    for e in &decoded.errors {
        warn!("{}: {}", name, e);
    }

    let mut outcome = BatchOutcome {
        stream: batch.stream,
        last_seen,
        lines: batch.len() as u64,
        parse_errors: decoded.errors.len() as u64,
        out_of_order: 0,
    };

    for (locus, record) in decoded.records {
        // Loci from earlier batches may already be flushed, so they are closed
        // even for an equal locus; within this batch a locus may repeat
        let behind_earlier = last_seen.is_some_and(|previous| locus <= previous);
        let behind_batch = outcome.last_seen.is_some_and(|previous| locus < previous);
        if behind_earlier || behind_batch {
            warn!(
                "{}: record {} ({}:{}) is out of order, skipping",
                name, record.record_number, record.chromosome, record.position
            );
            outcome.out_of_order += 1;
            continue;
        }
        outcome.last_seen = Some(locus);
        index.insert(locus, ProvenanceLink::new(batch.stream, record));
    }
    outcome
}

/// Owns the index and drives ingest cycles and flush rounds
struct Coordinator {
    /// One batch queue per input, indexed by stream
    receivers: Vec<mpsc::Receiver<BatchMessage>>,
    failure: Arc<FailureSignal>,
    names: Vec<String>,
    order: ChromosomeOrder,
    ctx: MergeContext,
    /// Buffered records not yet below the watermark
    index: PositionIndex,
    tracker: WatermarkTracker,
    /// Workers for per-locus merges within a flush round
    pool: rayon::ThreadPool,
    /// Merged chunks for the writer stage
    output: mpsc::Sender<Vec<MergedRecord>>,
    /// Buffered loci that force a flush round
    flush_threshold: usize,
    counts: MergeCounts,
}

impl Coordinator {
    fn run(mut self) -> Result<MergeCounts, PipelineError> {
        loop {
            self.check_failure()?;
            let batches = self.pull_cycle()?;
            self.ingest(batches);

            let watermark = self.tracker.recompute();
            let finished = self.tracker.all_exhausted();
            if finished || self.index.len() > self.flush_threshold {
                if let Some(watermark) = watermark {
                    self.flush_round(watermark)?;
                }
            }
            if finished {
                break;
            }
        }
        Ok(self.counts)
    }

    /// Surface a reader failure raised since the last cycle
    ///
    /// Batches the failed reader queued before its error are discarded.
    fn check_failure(&mut self) -> Result<(), PipelineError> {
        let Some(stream) = self.failure.failed_stream() else {
            return Ok(());
        };
        while let Some(message) = self.receivers[stream].blocking_recv() {
            if let Err(e) = message {
                return Err(e.into());
            }
        }
        Err(PipelineError::Shutdown("reader"))
    }

    /// One batch from every input that can still lower the watermark
    fn pull_cycle(&mut self) -> Result<Vec<RawBatch>, PipelineError> {
        let mut batches = Vec::with_capacity(self.receivers.len());
        for stream in 0..self.receivers.len() {
            if !self.tracker.needs_more(stream) {
                continue;
            }
            match self.receivers[stream].blocking_recv() {
                Some(Ok(batch)) => batches.push(batch),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!("{}: exhausted", self.names[stream]);
                    self.tracker.mark_exhausted(stream);
                }
            }
        }
        Ok(batches)
    }

    /// Decode and insert a cycle's batches in parallel, one task per input
    fn ingest(&mut self, batches: Vec<RawBatch>) {
        if batches.is_empty() {
            return;
        }
        let index = &self.index;
        let order = &self.order;
        let ctx = &self.ctx;
        let tracker = &self.tracker;
        let names = &self.names;

        let outcomes: Vec<BatchOutcome> = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    ingest_batch(
                        batch,
                        index,
                        order,
                        ctx.sample_counts[batch.stream],
                        tracker.last_seen(batch.stream),
                        &names[batch.stream],
                    )
                })
                .collect()
        });

        for outcome in outcomes {
            self.counts.records_read += outcome.lines;
            self.counts.parse_errors += outcome.parse_errors;
            self.counts.out_of_order += outcome.out_of_order;
            if let Some(locus) = outcome.last_seen {
                self.tracker.observe(outcome.stream, locus);
            }
        }
    }

    /// Merge every bucket at or below the watermark and hand them to the writer
    fn flush_round(&mut self, watermark: Locus) -> Result<(), PipelineError> {
        let drained = self.index.flush_below(watermark);
        if drained.is_empty() {
            return Ok(());
        }
        self.counts.flush_rounds += 1;
        let loci = drained.len();

        let ctx = &self.ctx;
        let results: Vec<(Locus, Vec<ProvenanceLink>, Result<MergedRecord, ReconcileError>)> =
            self.pool.install(|| {
                drained
                    .into_par_iter()
                    .map(|(locus, mut links)| {
                        let repeated = drop_duplicate_links(&mut links);
                        (locus, repeated, merge_bucket(ctx, locus, links))
                    })
                    .collect()
            });

        let mut records = Vec::with_capacity(results.len());
        for (_, repeated, result) in results {
            for link in &repeated {
                warn!(
                    "{}: more than one record at {}:{} (record {} ignored)",
                    self.names[link.stream], link.record.chromosome, link.record.position, link.record.record_number
                );
            }
            self.counts.duplicate_links += repeated.len() as u64;

            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    match &e {
                        ReconcileError::DiscordantChromosome { stream, .. }
                        | ReconcileError::DiscordantPosition { stream, .. }
                        | ReconcileError::DiscordantReference { stream, .. } => {
                            warn!("{} ({}); locus dropped", e, self.names[*stream]);
                        }
                        ReconcileError::EmptyBucket(_) => warn!("{}", e),
                    }
                    self.counts.discordant_loci += 1;
                }
            }
        }

        debug!(
            "Flush round {}: {} loci up to {}, {} merged",
            self.counts.flush_rounds,
            loci,
            watermark,
            records.len()
        );
        self.counts.records_emitted += records.len() as u64;
        if !records.is_empty() {
            self.output
                .blocking_send(records)
                .map_err(|_| PipelineError::Shutdown("writer"))?;
        }
        Ok(())
    }
}

/// Merge already-open input streams into `sink`
///
/// Spawns one reader per stream, the coordinator and the writer, then waits
/// for all of them. Malformed, out-of-order and discordant records are
/// counted and skipped; any stream, output or worker failure aborts the run.
///
/// # Arguments
/// * `streams` - Inputs in configuration order; their order fixes sample-column order
/// * `sink` - Receives the merged header once, then records in locus order
/// * `options` - Validated merge options (batch sizes, threads, field policies)
/// * `order` - Chromosome order used to rank loci
///
/// # Returns
/// * `Result<MergeSummary, PipelineError>` - Run counters, or the error that stopped the run
///
/// # Example
/// ```no_run
/// use vcf_merge::chromosome_order::ChromosomeOrder;
/// use vcf_merge::output::VcfWriter;
/// use vcf_merge::parsers::{InputStream, VcfFileReader};
/// use vcf_merge::{run_pipeline, MergeOptions};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let streams: Vec<Box<dyn InputStream>> = vec![
///     Box::new(VcfFileReader::open("a.vcf.gz", 0)?),
///     Box::new(VcfFileReader::open("b.vcf.gz", 1)?),
/// ];
/// let sink = VcfWriter::create(Some(std::path::Path::new("merged.vcf.gz")))?;
/// let summary = run_pipeline(streams, sink, &MergeOptions::default(), ChromosomeOrder::human_default()).await?;
/// println!("{} records written", summary.counts.records_emitted);
/// # Ok(())
/// # }
/// ```
pub async fn run_pipeline<S>(
    streams: Vec<Box<dyn InputStream>>,
    sink: S,
    options: &MergeOptions,
    order: ChromosomeOrder,
) -> Result<MergeSummary, PipelineError>
where
    S: RecordSink + 'static,
{
    let started_at = Utc::now();

    let header = {
        let headers: Vec<StreamHeader<'_>> = streams
            .iter()
            .map(|stream| StreamHeader {
                name: stream.name(),
                header: stream.header(),
            })
            .collect();
        merge_headers(&headers, options)
    };
    let names: Vec<String> = streams.iter().map(|s| s.name().to_string()).collect();
    let sample_counts = streams.iter().map(|s| s.samples_declared().len()).collect();
    let ctx = MergeContext::new(sample_counts, options);

    let inputs = streams.len();
    let samples = header.samples.len();
    info!("Merging {} inputs with {} samples", inputs, samples);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .thread_name(|i| format!("merge-worker-{}", i))
        .build()
        .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

    let failure = Arc::new(FailureSignal::default());
    let mut receivers = Vec::with_capacity(inputs);
    let mut readers = Vec::with_capacity(inputs);
    for (id, stream) in streams.into_iter().enumerate() {
        let (tx, rx) = mpsc::channel::<BatchMessage>(options.max_batches);
        receivers.push(rx);
        let batch_lines = options.batch_lines;
        let failure = Arc::clone(&failure);
        readers.push(tokio::task::spawn_blocking(move || {
            reader_stage(stream, id, batch_lines, tx, failure)
        }));
    }

    let (output_tx, output_rx) = mpsc::channel(options.output_queue_depth);
    let writer = tokio::task::spawn_blocking(move || writer_stage(sink, header, output_rx));

    let coordinator = Coordinator {
        receivers,
        failure,
        names,
        order,
        ctx,
        index: PositionIndex::new(),
        tracker: WatermarkTracker::new(inputs),
        pool,
        output: output_tx,
        flush_threshold: options.flush_threshold,
        counts: MergeCounts::default(),
    };
    let coordinator = tokio::task::spawn_blocking(move || coordinator.run());

    let coordinator_result = coordinator.await.map_err(PipelineError::from).and_then(|r| r);
    let writer_result = writer.await.map_err(PipelineError::from).and_then(|r| r);
    let mut reader_error = None;
    for reader in readers {
        if let Err(e) = reader.await {
            reader_error.get_or_insert(PipelineError::from(e));
        }
    }

    // Report the stage that failed first, not the ones that stopped because of it
    let counts = match (coordinator_result, writer_result) {
        (Ok(counts), Ok(())) => match reader_error {
            Some(e) => return Err(e),
            None => counts,
        },
        (Err(coordinator), Err(writer)) => {
            return Err(if coordinator.is_shutdown() { writer } else { coordinator })
        }
        (Err(e), Ok(())) | (Ok(_), Err(e)) => return Err(e),
    };

    Ok(MergeSummary {
        inputs,
        samples,
        counts,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Open everything named by `config` and run the merge
pub async fn run(config: &MergeConfig) -> Result<MergeSummary, PipelineError> {
    let options = config.merge_options()?;

    let order = match &config.chromosome_order {
        Some(path) => ChromosomeOrder::from_file(path)?,
        None => ChromosomeOrder::human_default(),
    };
    debug!("Chromosome order has {} entries", order.len());

    let mut streams: Vec<Box<dyn InputStream>> = Vec::with_capacity(config.inputs.len());
    for (stream, path) in config.inputs.iter().enumerate() {
        let reader = VcfFileReader::open(path, stream)?;
        debug!(
            "Opened {:?}: {} samples, {} INFO and {} FORMAT definitions",
            path,
            reader.samples_declared().len(),
            reader.header().infos().len(),
            reader.header().formats().len()
        );
        streams.push(Box::new(reader));
    }

    let sink = VcfWriter::create(config.output.as_deref())?;
    let summary = run_pipeline(streams, sink, &options, order).await?;

    summary.log();
    if let Some(path) = &config.summary {
        summary.write_json(path)?;
    }
    Ok(summary)
}
