//! # Plate variant calling
//!
//! Turns the aligned long reads of every well of a barcoded 96-well plate
//! experiment into a called genotype with a confidence value, then collects
//! the per-well calls into one plate-wide table.
//!
//! ## Pipeline
//!
//! 1. **Topology**: barcode folders become `(plate, well)` identities ([`plate`])
//! 2. **Alignment**: one sorted, indexed BAM per well, produced once ([`alignment`])
//! 3. **Pileup**: each read is rebuilt in the reference frame by walking its CIGAR
//! 4. **Position calling**: per-position alternate fractions and exact binomial tests
//! 5. **Well aggregation**: label, mean frequency, Fisher-combined p-value ([`well`])
//! 6. **Experiment**: a bounded worker pool over well shards, then Bonferroni ([`experiment`])
//!
//! ## Usage Example
//!
//! ```ignore
//! use platecall::{run_experiment, CancellationToken, RunConfig, RunContext};
//!
//! let config = RunConfig::new("run/demultiplexed", "run/results")
//!     .with_reference_table("run/references.csv")
//!     .with_workers(8);
//! let context = RunContext::new(config)?;
//! let table = run_experiment(&context, &CancellationToken::new())?;
//! println!("{} wells called", table.len());
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod alignment;   // External aligner invocation and per-well locking
pub mod context;     // Run configuration and shared context
pub mod experiment;  // Worker pool, results table, correction
pub mod genomics;    // Reads, pileups, position calls, statistics
pub mod plate;       // Plate topology and reference table
pub mod util;        // Filesystem helpers
pub mod well;        // Per-well aggregation and labels

// Re-exports for convenience
pub use alignment::{AlignmentError, AlignmentInvoker, AlignmentPreset, ExternalAligner, Minimap2Samtools, ScoringScheme};
pub use context::{RunConfig, RunContext};
pub use experiment::{run_experiment, CancellationToken, ExperimentVariantTable};
pub use genomics::{AlignedRead, PositionCall, Reference};
pub use plate::{WellIdentity, PlateTopology};
pub use well::{VariantLabel, WellVariantRecord};

use std::path::PathBuf;

use thiserror::Error;

use genomics::io::GenomicsIoError;
use genomics::{StatisticsError, VariantCallerError};
use plate::{ReferenceTableError, TopologyError};

/// Errors that can occur while calling an experiment.
///
/// Configuration, I/O on run-level outputs and cancellation abort the run;
/// the remaining kinds are confined to the well that raised them.
#[derive(Debug, Error)]
pub enum CallerError {
    /// Missing topology folders, malformed reference, invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input not in the expected format (reference FASTA, barcode id, BAM).
    #[error("input format error: {0}")]
    InputFormat(String),

    /// Too few reads to call a well.
    #[error("insufficient coverage: {0}")]
    Coverage(String),

    /// The aligner or indexer failed.
    #[error("external tool error: {0}")]
    ExternalTool(#[source] AlignmentError),

    /// A significance test received degenerate input.
    #[error("statistical error: {0}")]
    Statistical(#[from] StatisticsError),

    /// Filesystem failure on a run-level path.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Filesystem failure inside one well's folder.
    #[error("I/O error in well folder on {path}: {source}")]
    WellIo {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The run was cancelled before every well finished.
    #[error("run cancelled")]
    Cancelled,
}

impl CallerError {
    /// Whether the error aborts the whole run rather than one well.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallerError::Configuration(_) | CallerError::Io { .. } | CallerError::Cancelled
        )
    }

    /// Rescope a run-level I/O error to the well that raised it.
    pub fn within_well(self) -> Self {
        match self {
            CallerError::Io { path, source } => CallerError::WellIo { path, source },
            other => other,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CallerError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<AlignmentError> for CallerError {
    fn from(err: AlignmentError) -> Self {
        match err {
            AlignmentError::NoReads(_) => CallerError::Coverage(err.to_string()),
            other => CallerError::ExternalTool(other),
        }
    }
}

impl From<TopologyError> for CallerError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::Io { path, source } => CallerError::Io { path, source },
            err if err.is_configuration() => CallerError::Configuration(err.to_string()),
            err => CallerError::InputFormat(err.to_string()),
        }
    }
}

impl From<ReferenceTableError> for CallerError {
    fn from(err: ReferenceTableError) -> Self {
        CallerError::Configuration(err.to_string())
    }
}

impl From<GenomicsIoError> for CallerError {
    fn from(err: GenomicsIoError) -> Self {
        match err {
            GenomicsIoError::Io { path, source } => CallerError::Io { path, source },
            other => CallerError::InputFormat(other.to_string()),
        }
    }
}

impl From<VariantCallerError> for CallerError {
    fn from(err: VariantCallerError) -> Self {
        match err {
            VariantCallerError::InvalidParameter(msg) => CallerError::Configuration(msg),
            VariantCallerError::Statistics(err) => CallerError::Statistical(err),
        }
    }
}

/// Result type for fallible experiment operations.
pub type Result<T> = std::result::Result<T, CallerError>;
