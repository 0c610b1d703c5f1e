//! Experiment aggregator: concurrent per-well calling over a bounded worker
//! pool, the plate-wide table and its multiple-testing correction.

mod cancel;
mod runner;
mod table;

pub use cancel::CancellationToken;
pub use runner::{process_well, run_experiment, shard_ranges, PILEUP_FASTA_FILE, POSITION_COUNTS_FILE};
pub use table::{load_resumable, ExperimentVariantTable, TABLE_COLUMNS};
