// ==============================================================================
// parsers/vcf.rs - VCF input streams and record decoder
// ==============================================================================
// Description: Streams VCF records in locus-aligned batches using noodles-vcf
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.2.0
// ==============================================================================
// References:
// - VCF 4.2 Spec: https://samtools.github.io/hts-specs/VCFv4.2.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================

use flate2::read::MultiGzDecoder;
use noodles_bgzf as bgzf;
use noodles_vcf as vcf;
use noodles_vcf::variant::record::{AlternateBases, Ids};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::chromosome_order::ChromosomeOrder;
use crate::models::{DecodedRecord, Locus, StreamId, MISSING};

/// Errors that end a stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read VCF header of {name}: {source}")]
    Header {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Malformed record; it is dropped and the stream continues
///
/// `record` is the 1-based number of the data record within its file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Record {record}: {reason}")]
    Malformed { record: usize, reason: String },

    #[error("Record {record}: invalid position: {reason}")]
    InvalidPosition { record: usize, reason: String },

    #[error("Record {record}: invalid quality: {reason}")]
    InvalidQuality { record: usize, reason: String },

    #[error("Record {record}: invalid alternate alleles: {reason}")]
    InvalidAlternates { record: usize, reason: String },

    #[error("Record {record}: chromosome '{name}' is not in the chromosome order")]
    UnknownChromosome { record: usize, name: String },

    #[error("Record {record}: empty reference allele")]
    EmptyReference { record: usize },

    #[error("Record {record}: expected {expected} sample columns, found {found}")]
    SampleCountMismatch {
        record: usize,
        expected: usize,
        found: usize,
    },
}

/// A chunk of undecoded records from one stream
#[derive(Debug)]
pub struct RawBatch {
    pub stream: StreamId,
    /// (record number, record)
    pub records: Vec<(usize, vcf::Record)>,
    /// Records noodles could not parse
    pub rejected: Vec<ParseError>,
}

impl RawBatch {
    /// Data lines consumed to build this batch
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded records of one batch plus the records that failed to decode
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Decoded records keyed by locus, in input order
    pub records: Vec<(Locus, DecodedRecord)>,
    pub errors: Vec<ParseError>,
}

/// A source of ordered record batches
///
/// Implementations are owned by exactly one reader task.
pub trait InputStream: Send {
    /// Display name used in logs
    fn name(&self) -> &str;

    /// Sample names in column order
    fn samples_declared(&self) -> &[String];

    /// Parsed header of the source
    fn header(&self) -> &vcf::Header;

    /// Next batch of at most `max_records` records, extended so a locus is
    /// never split across batches; `None` at end of stream
    fn next_batch(&mut self, max_records: usize) -> Result<Option<RawBatch>, StreamError>;
}

/// How an input file is compressed, from its first bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    /// Gzip members carrying the BGZF `BC` extra subfield
    Bgzf,
}

impl Compression {
    fn detect(bytes: &[u8]) -> Self {
        if !bytes.starts_with(&[0x1f, 0x8b]) {
            return Compression::None;
        }
        let has_extra = bytes.get(3).is_some_and(|flags| flags & 0x04 != 0);
        if has_extra && bytes.get(12..14) == Some(b"BC".as_slice()) {
            Compression::Bgzf
        } else {
            Compression::Gzip
        }
    }
}

/// VCF reader over plain, gzip or BGZF input
pub struct VcfFileReader {
    name: String,
    stream: StreamId,
    reader: vcf::io::Reader<Box<dyn BufRead + Send>>,
    header: vcf::Header,
    /// Sample names from the `#CHROM` line
    samples: Vec<String>,
    /// Data records read so far, including malformed ones
    records_read: usize,
    /// First record of the next batch
    pending: Option<(usize, vcf::Record)>,
    exhausted: bool,
}

impl std::fmt::Debug for VcfFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcfFileReader")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .field("samples", &self.samples.len())
            .field("records_read", &self.records_read)
            .finish()
    }
}

impl VcfFileReader {
    /// Open a VCF file and read its header
    ///
    /// Compression is detected from the leading bytes, not the extension:
    /// BGZF input goes through noodles-bgzf, other gzip input through flate2.
    ///
    /// # Arguments
    /// * `path` - Path to a `.vcf`, `.vcf.gz` or `.vcf.bgz` file
    /// * `stream` - Index of this input in configuration order
    ///
    /// # Returns
    /// * `Result<VcfFileReader, StreamError>` - Reader positioned at the first record
    pub fn open(path: impl AsRef<Path>, stream: StreamId) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let open_error = |source| StreamError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_error)?;
        let mut buf_reader = BufReader::with_capacity(256 * 1024, file);
        let compression = Compression::detect(buf_reader.fill_buf().map_err(open_error)?);

        let name = path.display().to_string();
        debug!("{}: {:?} compression", name, compression);
        let inner: Box<dyn BufRead + Send> = match compression {
            Compression::Bgzf => Box::new(bgzf::io::Reader::new(buf_reader)),
            Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(buf_reader))),
            Compression::None => Box::new(buf_reader),
        };
        Self::from_reader(name, stream, inner)
    }

    /// Wrap any buffered source of uncompressed VCF text
    pub fn from_reader<R>(name: impl Into<String>, stream: StreamId, reader: R) -> Result<Self, StreamError>
    where
        R: BufRead + Send + 'static,
    {
        let name = name.into();
        let inner: Box<dyn BufRead + Send> = Box::new(reader);
        let mut reader = vcf::io::Reader::new(inner);

        let header = reader.read_header().map_err(|source| StreamError::Header {
            name: name.clone(),
            source,
        })?;
        let samples = header.sample_names().iter().cloned().collect();

        Ok(Self {
            name,
            stream,
            reader,
            header,
            samples,
            records_read: 0,
            pending: None,
            exhausted: false,
        })
    }

    /// Next record with its number
    ///
    /// A line noodles cannot split into columns is returned as a `ParseError`;
    /// any other read failure ends the stream.
    fn next_record(&mut self) -> Result<Option<Result<(usize, vcf::Record), ParseError>>, StreamError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(Ok(pending)));
        }

        let mut record = vcf::Record::default();
        match self.reader.read_record(&mut record) {
            Ok(0) => Ok(None),
            Ok(_) => {
                self.records_read += 1;
                Ok(Some(Ok((self.records_read, record))))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                self.records_read += 1;
                Ok(Some(Err(ParseError::Malformed {
                    record: self.records_read,
                    reason: e.to_string(),
                })))
            }
            Err(source) => Err(StreamError::Read {
                name: self.name.clone(),
                source,
            }),
        }
    }
}

/// 1-based start of a record, if it parses
fn variant_start(record: &vcf::Record) -> Option<usize> {
    record.variant_start().and_then(Result::ok).map(|position| position.get())
}

/// Whether two records name the same CHROM and POS
fn same_site(a: &vcf::Record, b: &vcf::Record) -> bool {
    a.reference_sequence_name() == b.reference_sequence_name() && variant_start(a) == variant_start(b)
}

impl InputStream for VcfFileReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn samples_declared(&self) -> &[String] {
        &self.samples
    }

    fn header(&self) -> &vcf::Header {
        &self.header
    }

    fn next_batch(&mut self, max_records: usize) -> Result<Option<RawBatch>, StreamError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut batch = RawBatch {
            stream: self.stream,
            records: Vec::with_capacity(max_records),
            rejected: Vec::new(),
        };
        loop {
            let (number, record) = match self.next_record()? {
                None => {
                    self.exhausted = true;
                    break;
                }
                Some(Err(e)) => {
                    batch.rejected.push(e);
                    continue;
                }
                Some(Ok(entry)) => entry,
            };

            if batch.len() >= max_records {
                let same_locus = batch
                    .records
                    .last()
                    .is_some_and(|(_, last)| same_site(last, &record));
                if !same_locus {
                    self.pending = Some((number, record));
                    break;
                }
            }
            batch.records.push((number, record));
        }

        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }
}

/// Decode every record of a batch
///
/// Malformed records become `ParseError`s; the rest of the batch still decodes.
pub fn decode_batch(batch: &RawBatch, order: &ChromosomeOrder, samples_declared: usize) -> DecodedBatch {
    let mut decoded = DecodedBatch {
        records: Vec::with_capacity(batch.records.len()),
        errors: batch.rejected.clone(),
    };
    for (number, record) in &batch.records {
        match decode_record(record, *number, order, samples_declared) {
            Ok(entry) => decoded.records.push(entry),
            Err(e) => decoded.errors.push(e),
        }
    }
    decoded
}

/// Decode one noodles record into its locus and the merger's record
///
/// # Arguments
/// * `record` - Lazily parsed VCF record
/// * `number` - 1-based record number, kept for diagnostics
/// * `order` - Chromosome order assigning the locus rank
/// * `samples_declared` - Sample columns declared by the file's header
///
/// # Returns
/// * `Result<(Locus, DecodedRecord), ParseError>` - Sort key and record, or why it was rejected
pub fn decode_record(
    record: &vcf::Record,
    number: usize,
    order: &ChromosomeOrder,
    samples_declared: usize,
) -> Result<(Locus, DecodedRecord), ParseError> {
    let chromosome = record.reference_sequence_name();
    let rank = order
        .rank(chromosome)
        .ok_or_else(|| ParseError::UnknownChromosome {
            record: number,
            name: chromosome.to_string(),
        })?;

    // POS 0 marks a telomere and has no 1-based start
    let position = match record.variant_start() {
        Some(Ok(start)) => start.get() as u64,
        Some(Err(e)) => {
            return Err(ParseError::InvalidPosition {
                record: number,
                reason: e.to_string(),
            })
        }
        None => 0,
    };

    let reference = record.reference_bases().to_string();
    if reference.is_empty() {
        return Err(ParseError::EmptyReference { record: number });
    }

    let alternate_bases = record.alternate_bases();
    let alternates = if alternate_bases.is_empty() {
        Vec::new()
    } else {
        alternate_bases
            .iter()
            .map(|allele| allele.map(String::from))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| ParseError::InvalidAlternates {
                record: number,
                reason: e.to_string(),
            })?
    };

    let quality = match record.quality_score() {
        None => None,
        Some(Ok(score)) => Some(f64::from(score)),
        Some(Err(e)) => {
            return Err(ParseError::InvalidQuality {
                record: number,
                reason: e.to_string(),
            })
        }
    };

    let ids = record.ids();
    let id = if ids.is_empty() {
        MISSING.to_string()
    } else {
        ids.iter().collect::<Vec<_>>().join(";")
    };

    // FORMAT and the sample columns, tab-separated
    let sample_columns = record.samples();
    let (format, samples) = if samples_declared > 0 {
        let mut columns = sample_columns.as_ref().split('\t');
        let format = match columns.next() {
            None | Some(MISSING) | Some("") => Vec::new(),
            Some(keys) => keys.split(':').map(String::from).collect(),
        };
        let samples: Vec<String> = columns.map(String::from).collect();
        if samples.len() != samples_declared {
            return Err(ParseError::SampleCountMismatch {
                record: number,
                expected: samples_declared,
                found: samples.len(),
            });
        }
        (format, samples)
    } else {
        (Vec::new(), Vec::new())
    };

    let filter = match record.filters().as_ref() {
        "" => MISSING.to_string(),
        filters => filters.to_string(),
    };
    let info = match record.info().as_ref() {
        "" => MISSING.to_string(),
        info => info.to_string(),
    };

    let decoded = DecodedRecord {
        chromosome: chromosome.to_string(),
        position,
        id,
        reference,
        alternates,
        quality,
        filter,
        info,
        format,
        samples,
        record_number: number,
    };
    Ok((Locus::new(rank, position), decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression as GzLevel;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const SMALL_VCF: &str = "\
##fileformat=VCFv4.2
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##reference=hg19
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2
1\t100\trs1\tA\tT\t50\tPASS\tDP=10\tGT\t0/1\t1/1
1\t100\t.\tA\tG\t40\tPASS\t.\tGT\t0/0\t0/1
1\t200\t.\tC\t.\t.\tq10\t.\tGT\t0/0\t0/0
2\t50\t.\tG\tA,C\t7.5\tPASS\t.\tGT\t1/2\t./.
";

    fn reader(text: &str) -> VcfFileReader {
        VcfFileReader::from_reader("test.vcf", 0, Cursor::new(text.to_string())).unwrap()
    }

    fn decode_all(text: &str, samples: usize) -> DecodedBatch {
        let mut vcf = reader(text);
        let order = ChromosomeOrder::human_default();
        let mut all = DecodedBatch::default();
        while let Some(batch) = vcf.next_batch(2).unwrap() {
            let decoded = decode_batch(&batch, &order, samples);
            all.records.extend(decoded.records);
            all.errors.extend(decoded.errors);
        }
        all
    }

    #[test]
    fn test_header_and_samples() {
        let vcf = reader(SMALL_VCF);
        assert_eq!(vcf.samples_declared(), &["S1".to_string(), "S2".to_string()]);
        assert!(vcf.header().formats().contains_key("GT"));
        assert_eq!(vcf.header().other_records().len(), 1);
    }

    #[test]
    fn test_batches_never_split_a_locus() {
        let mut vcf = reader(SMALL_VCF);

        // Two records at 1:100 stay together even with a one-record budget
        let first = vcf.next_batch(1).unwrap().unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].0, 1);

        let second = vcf.next_batch(1).unwrap().unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].0, 3);
        assert_eq!(variant_start(&second.records[0].1), Some(200));

        let third = vcf.next_batch(10).unwrap().unwrap();
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.records[0].1.reference_sequence_name(), "2");

        assert!(vcf.next_batch(10).unwrap().is_none());
        assert!(vcf.next_batch(10).unwrap().is_none());
    }

    #[test]
    fn test_data_without_header_rejected() {
        let result = VcfFileReader::from_reader("bad.vcf", 0, Cursor::new("1\t100\t.\tA\tT\n".to_string()));
        assert!(matches!(result, Err(StreamError::Header { .. })));
    }

    #[test]
    fn test_compression_detection() {
        assert_eq!(Compression::detect(b"##fileformat=VCFv4.2"), Compression::None);
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0xff]), Compression::Gzip);

        let bgzf_header = [
            0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff, 0x06, 0x00, b'B', b'C', 0x02, 0x00,
        ];
        assert_eq!(Compression::detect(&bgzf_header), Compression::Bgzf);
    }

    #[test]
    fn test_open_gzip_input() {
        let mut file = NamedTempFile::new().unwrap();
        {
            let mut encoder = GzEncoder::new(&mut file, GzLevel::default());
            encoder.write_all(SMALL_VCF.as_bytes()).unwrap();
            encoder.finish().unwrap();
        }
        file.flush().unwrap();

        let mut vcf = VcfFileReader::open(file.path(), 3).unwrap();
        assert_eq!(vcf.samples_declared().len(), 2);
        let batch = vcf.next_batch(100).unwrap().unwrap();
        assert_eq!(batch.stream, 3);
        assert_eq!(batch.records.len(), 4);
    }

    #[test]
    fn test_open_bgzf_input() {
        let mut file = NamedTempFile::new().unwrap();
        {
            let mut writer = bgzf::io::Writer::new(&mut file);
            writer.write_all(SMALL_VCF.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        file.flush().unwrap();

        let mut vcf = VcfFileReader::open(file.path(), 0).unwrap();
        assert_eq!(vcf.samples_declared().len(), 2);
        let batch = vcf.next_batch(100).unwrap().unwrap();
        assert_eq!(batch.records.len(), 4);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            VcfFileReader::open("/nonexistent/input.vcf", 0),
            Err(StreamError::Open { .. })
        ));
    }

    #[test]
    fn test_decode_batch_fields() {
        let decoded = decode_all(SMALL_VCF, 2);
        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.records.len(), 4);

        let (locus, first) = &decoded.records[0];
        assert_eq!(*locus, Locus::new(0, 100));
        assert_eq!(first.id, "rs1");
        assert_eq!(first.alternates, vec!["T".to_string()]);
        assert_eq!(first.quality, Some(50.0));
        assert_eq!(first.info, "DP=10");
        assert_eq!(first.format, vec!["GT".to_string()]);
        assert_eq!(first.samples, vec!["0/1".to_string(), "1/1".to_string()]);
        assert_eq!(first.record_number, 1);

        let (_, monomorphic) = &decoded.records[2];
        assert!(monomorphic.alternates.is_empty());
        assert_eq!(monomorphic.quality, None);
        assert_eq!(monomorphic.filter, "q10");
        assert_eq!(monomorphic.id, ".");

        let (locus, multi) = &decoded.records[3];
        assert_eq!(*locus, Locus::new(1, 50));
        assert_eq!(multi.alternates, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(multi.quality, Some(7.5));
    }

    #[test]
    fn test_decode_errors_are_per_record() {
        let text = "\
##fileformat=VCFv4.2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1
1\tabc\t.\tA\tT\t1\tPASS\t.\tGT\t0/1
chrUn\t5\t.\tA\tT\t1\tPASS\t.\tGT\t0/1
1\t5\t.\tA\tT\thigh\tPASS\t.\tGT\t0/1
1\t5\t.\tA\tT\t1\tPASS\t.\tGT\t0/1\t0/0
1\t6\t.\tA\tT\t1\tPASS\t.\tGT\t0/1
";
        let decoded = decode_all(text, 1);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].0, Locus::new(0, 6));
        assert_eq!(decoded.records[0].1.record_number, 5);

        assert_eq!(decoded.errors.len(), 4);
        assert!(matches!(decoded.errors[0], ParseError::InvalidPosition { record: 1, .. }));
        assert_eq!(
            decoded.errors[1],
            ParseError::UnknownChromosome { record: 2, name: "chrUn".to_string() }
        );
        assert!(matches!(decoded.errors[2], ParseError::InvalidQuality { record: 3, .. }));
        assert_eq!(
            decoded.errors[3],
            ParseError::SampleCountMismatch { record: 4, expected: 1, found: 2 }
        );
    }

    #[test]
    fn test_sites_only_records() {
        let text = "\
##fileformat=VCFv4.2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
X\t10\t.\tA\tT\t.\t.\tDB
";
        let decoded = decode_all(text, 0);
        let (locus, record) = &decoded.records[0];
        assert_eq!(*locus, Locus::new(22, 10));
        assert!(record.samples.is_empty());
        assert!(record.format.is_empty());
        assert_eq!(record.info, "DB");
        assert_eq!(record.filter, ".");
    }
}
