use std::sync::Arc;

use tracing::debug;

use crate::genomics::{fisher_combine, PositionCall, StatisticsError};
use crate::plate::WellIdentity;
use crate::well::{ProteinVariant, VariantLabel};

/// One row of the experiment table.
#[derive(Debug, Clone, PartialEq)]
pub struct WellVariantRecord {
    /// Well key.
    pub identity: WellIdentity,
    /// Plate name, when the plate is in the reference table.
    pub plate_name: Option<Arc<str>>,
    /// Genotype or sentinel.
    pub label: VariantLabel,
    /// Accepted position calls, ascending by position.
    pub calls: Vec<PositionCall>,
    /// Mean alternate fraction over accepted calls; 0 for the parent.
    pub average_frequency: Option<f64>,
    /// Fisher-combined p-value of the accepted calls.
    pub p_value: Option<f64>,
    /// Bonferroni-adjusted p-value, filled in over the whole experiment.
    pub adjusted_p_value: Option<f64>,
    /// Records in the well's alignment file.
    pub alignment_count: u64,
    /// Some position has two symbols above the call threshold.
    pub mixed_well: bool,
    /// Variant coding sequence and protein, when the genotype and parent are known.
    pub protein: Option<ProteinVariant>,
}

impl WellVariantRecord {
    fn sentinel(
        identity: WellIdentity,
        plate_name: Option<Arc<str>>,
        label: VariantLabel,
        alignment_count: u64,
    ) -> Self {
        Self {
            identity,
            plate_name,
            label,
            calls: Vec::new(),
            average_frequency: None,
            p_value: None,
            adjusted_p_value: None,
            alignment_count,
            mixed_well: false,
            protein: None,
        }
    }

    /// Row for a well that could not be called for lack of reads.
    pub fn insufficient(identity: WellIdentity, plate_name: Option<Arc<str>>, alignment_count: u64) -> Self {
        Self::sentinel(identity, plate_name, VariantLabel::InsufficientData, alignment_count)
    }

    /// Row for a well whose alignment or reads failed.
    pub fn failed(identity: WellIdentity, plate_name: Option<Arc<str>>, alignment_count: u64) -> Self {
        Self::sentinel(identity, plate_name, VariantLabel::Failed, alignment_count)
    }

    /// Derive the variant coding sequence and protein against `parent`.
    pub fn attach_protein(&mut self, parent: &[u8]) {
        self.protein = ProteinVariant::from_label(&self.label, parent);
    }

    /// Set the adjusted p-value given the number of wells in the experiment.
    ///
    /// Parent wells are fully confident (1.0); sentinels stay undefined.
    pub fn adjust(&mut self, well_count: usize) {
        self.adjusted_p_value = match (&self.label, self.p_value) {
            (VariantLabel::Parent, _) => Some(1.0),
            (VariantLabel::Called(_), Some(p)) => Some(crate::genomics::bonferroni(p, well_count)),
            _ => None,
        };
    }
}

/// Thresholds applied when collapsing position calls into one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationParams {
    /// Alternate fraction that must be exceeded; also the mixed-well cut-off.
    pub threshold: f64,
    /// Minimum alignment records for the well to be called.
    pub min_depth: u64,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            min_depth: 5,
        }
    }
}

/// Collapse a well's evaluated positions into its variant record.
///
/// `calls` are every evaluated position in ascending order; only those with
/// an alternate enter the label and the combined p-value, but all of them
/// are inspected for the mixed-well flag.
pub fn aggregate(
    identity: WellIdentity,
    plate_name: Option<Arc<str>>,
    calls: &[PositionCall],
    alignment_count: u64,
    params: &AggregationParams,
) -> Result<WellVariantRecord, StatisticsError> {
    if alignment_count < params.min_depth {
        debug!(well = %identity, alignment_count, "below depth gate");
        return Ok(WellVariantRecord::insufficient(identity, plate_name, alignment_count));
    }

    let mixed_well = calls.iter().any(|call| {
        let (first, second) = call.top_two_fractions();
        first > params.threshold && second > params.threshold
    });

    let accepted: Vec<PositionCall> = calls.iter().filter(|c| c.is_variant()).cloned().collect();
    let label = VariantLabel::from_tokens(accepted.iter().filter_map(PositionCall::token));

    let (average_frequency, p_value) = if accepted.is_empty() {
        (Some(0.0), None)
    } else {
        let mean = accepted.iter().map(|c| c.fraction).sum::<f64>() / accepted.len() as f64;
        let p_values: Vec<f64> = accepted.iter().filter_map(|c| c.p_value).collect();
        let combined = fisher_combine(&p_values)?.map(|fisher| fisher.p_value);
        (Some(mean), combined)
    };

    Ok(WellVariantRecord {
        identity,
        plate_name,
        label,
        calls: accepted,
        average_frequency,
        p_value,
        adjusted_p_value: None,
        alignment_count,
        mixed_well,
        protein: None,
    })
}
