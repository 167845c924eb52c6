// ==============================================================================
// output.rs - Merged VCF Output
// ==============================================================================
// Description: Record sinks and the VCF text writer (plain, gzip or stdout)
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::header::MergedHeader;
use crate::models::MergedRecord;

/// Output failures; all of them abort the run
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create output {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] io::Error),
}

/// Consumer of the merged header and records, in locus order
pub trait RecordSink: Send {
    /// Called exactly once, before any record
    fn write_header(&mut self, header: &MergedHeader) -> Result<(), OutputError>;

    fn write_records(&mut self, records: &[MergedRecord]) -> Result<(), OutputError>;

    /// Flush buffered output; called once after the last record
    fn finish(&mut self) -> Result<(), OutputError>;
}

/// Where merged VCF text goes
pub enum OutputTarget {
    Stdout(BufWriter<io::Stdout>),
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputTarget {
    /// Open `path` (gzip when it ends in `.gz`/`.bgz`) or standard output
    pub fn create(path: Option<&Path>) -> Result<Self, OutputError> {
        let Some(path) = path else {
            return Ok(OutputTarget::Stdout(BufWriter::new(io::stdout())));
        };

        let file = File::create(path).map_err(|source| OutputError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = BufWriter::with_capacity(256 * 1024, file);

        let compressed = path
            .extension()
            .map(|ext| ext == "gz" || ext == "bgz")
            .unwrap_or(false);
        if compressed {
            debug!("Writing gzip output to {:?}", path);
            Ok(OutputTarget::Gzip(GzEncoder::new(writer, Compression::default())))
        } else {
            Ok(OutputTarget::Plain(writer))
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            OutputTarget::Stdout(w) => w.flush(),
            OutputTarget::Plain(w) => w.flush(),
            OutputTarget::Gzip(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut().flush()
            }
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputTarget::Stdout(w) => w.write(buf),
            OutputTarget::Plain(w) => w.write(buf),
            OutputTarget::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputTarget::Stdout(w) => w.flush(),
            OutputTarget::Plain(w) => w.flush(),
            OutputTarget::Gzip(w) => w.flush(),
        }
    }
}

/// Writes VCF text to an output target
pub struct VcfWriter {
    target: OutputTarget,
    records_written: u64,
}

impl VcfWriter {
    pub fn new(target: OutputTarget) -> Self {
        Self {
            target,
            records_written: 0,
        }
    }

    pub fn create(path: Option<&Path>) -> Result<Self, OutputError> {
        Ok(Self::new(OutputTarget::create(path)?))
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl RecordSink for VcfWriter {
    fn write_header(&mut self, header: &MergedHeader) -> Result<(), OutputError> {
        for line in header.meta_lines()? {
            writeln!(self.target, "{}", line)?;
        }
        writeln!(self.target, "{}", header.column_line())?;
        Ok(())
    }

    fn write_records(&mut self, records: &[MergedRecord]) -> Result<(), OutputError> {
        for record in records {
            writeln!(self.target, "{}", record.to_vcf_line())?;
        }
        self.records_written += records.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        self.target.finish()?;
        info!("Wrote {} merged records", self.records_written);
        Ok(())
    }
}
