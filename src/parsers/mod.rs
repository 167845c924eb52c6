// ==============================================================================
// parsers/mod.rs - Input parser modules
// ==============================================================================
// Description: Input streams and record decoding for VCF files
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

pub mod vcf;

pub use vcf::{
    decode_batch, decode_record, DecodedBatch, InputStream, ParseError, RawBatch, StreamError,
    VcfFileReader,
};
