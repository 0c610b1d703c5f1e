//! Well aggregator: evaluated positions to one labelled record per well.

mod aggregator;
mod label;
mod protein;

pub use aggregator::{aggregate, AggregationParams, WellVariantRecord};
pub use label::{VariantLabel, FAILED_LABEL, INSUFFICIENT_LABEL, PARENT_LABEL};
pub use protein::{translate, ProteinChange, ProteinVariant, DELETION, LENGTH_CHANGE};
