// ==============================================================================
// lib.rs - VCF Merge Library
// ==============================================================================
// Description: Library interface for the streaming multi-file VCF merger
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

pub mod chromosome_order;
pub mod config;
pub mod header;
pub mod info_fields;
pub mod merger;
pub mod models;
pub mod output;
pub mod parsers;
pub mod pipeline;
pub mod position_index;
pub mod watermark;

pub use config::{MergeConfig, MergeOptions, MissingMode};
pub use pipeline::{run, run_pipeline, MergeSummary, PipelineError};
