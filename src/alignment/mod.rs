//! Alignment invoker: one sorted, indexed BAM per well, produced by an
//! external aligner on cache miss.

mod invoker;
mod minimap2;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use invoker::{AlignmentInvoker, AlignmentSettings, AlignmentState, WellAlignment};
pub use minimap2::{index_path, Minimap2Samtools, LONG_GAP_OPEN};

/// Errors raised while producing a well's alignment file.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// The well folder holds no read file.
    #[error("no read files in {0}")]
    NoReads(PathBuf),
    /// An external tool could not be started.
    #[error("failed to start {tool}: {source}")]
    Spawn {
        /// Executable name.
        tool: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with status {status:?}: {stderr}")]
    ToolFailed {
        /// Executable name.
        tool: String,
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
        /// Last lines of its standard error.
        stderr: String,
    },
    /// The aligner reported success without producing the file.
    #[error("aligner finished but {0} is missing")]
    Incomplete(PathBuf),
    /// Another process held the well lock for too long.
    #[error("alignment lock {lock} still held after {waited:?}")]
    LockTimeout {
        /// Lock file.
        lock: PathBuf,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Filesystem failure around the alignment files.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// minimap2 scores: `-A`, `-B` and the short `-O` penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringScheme {
    /// Match score (`-A`).
    pub match_score: u32,
    /// Mismatch penalty (`-B`).
    pub mismatch_penalty: u32,
    /// Gap open penalty (`-O`, short gaps).
    pub gap_open: u32,
}

impl Default for ScoringScheme {
    fn default() -> Self {
        Self {
            match_score: 4,
            mismatch_penalty: 2,
            gap_open: 10,
        }
    }
}

/// Scoring preset selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignmentPreset {
    /// Caller-configured scores.
    #[default]
    Default,
    /// Site-saturation libraries: fixed scores with a cheaper gap open.
    SiteSaturation,
}

impl AlignmentPreset {
    /// Scores passed to the aligner under this preset.
    pub fn scoring(self, configured: ScoringScheme) -> ScoringScheme {
        match self {
            AlignmentPreset::Default => configured,
            AlignmentPreset::SiteSaturation => ScoringScheme {
                match_score: 4,
                mismatch_penalty: 2,
                gap_open: 6,
            },
        }
    }

    /// Alignment file name inside the well folder.
    pub fn file_name(self) -> &'static str {
        match self {
            AlignmentPreset::Default => "alignment_minimap.bam",
            AlignmentPreset::SiteSaturation => "alignment_minimap_site_saturation.bam",
        }
    }
}

/// Inputs of one aligner invocation.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentRequest<'a> {
    /// Reference FASTA.
    pub reference_fasta: &'a Path,
    /// Read files, aligned together as one well.
    pub reads: &'a [PathBuf],
    /// Destination of the sorted, indexed BAM.
    pub output_bam: &'a Path,
    /// Scores to use.
    pub scoring: ScoringScheme,
}

/// Produces a sorted, indexed BAM at `request.output_bam`.
///
/// Implementations must either leave a complete file at that path or return
/// an error; they are called with the well lock held.
pub trait ExternalAligner: Send + Sync {
    /// Align the request's reads against its reference.
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<(), AlignmentError>;
}
