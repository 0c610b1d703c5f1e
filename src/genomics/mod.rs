//! Per-well genomics: alignment records, pileup reconstruction, position
//! calling and the statistics behind it.
//!
//! Everything here works on a single well against a single reference; the
//! plate-level orchestration lives in [`crate::experiment`].

mod types;
mod pileup;
mod statistics;
mod variant_caller;
pub mod io;

pub use types::{AlignedRead, CigarOp, CigarOpKind, Reference};
pub use pileup::{
    reconstruct, PileupColumn, PileupError, ReconstructedRead, Symbol, SymbolCounts, WellPileup,
    GAP, GAP_QUALITY, SKIP, SKIP_QUALITY,
};
pub use statistics::{
    binomial_test_greater, bonferroni, fisher_combine, FisherCombination, StatisticsError,
};
pub use variant_caller::{
    CallerParams, PositionCall, PositionCaller, VariantCallerError, CONTEXT_WIDTH,
};
