use thiserror::Error;
use tracing::debug;

use crate::genomics::statistics::{binomial_test_greater, StatisticsError};
use crate::genomics::{PileupColumn, Symbol, SymbolCounts, WellPileup};

/// Width of the reference k-mer recorded around each evaluated position.
pub const CONTEXT_WIDTH: usize = 8;

/// Evaluation of one reference position that met the coverage floor.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionCall {
    /// 0-based reference position.
    pub position: usize,
    /// Reference base.
    pub reference: u8,
    /// Alternate symbol, present only when its fraction exceeds the call threshold.
    pub alternate: Option<Symbol>,
    /// Highest-fraction non-reference symbol, whether or not it was called.
    pub candidate: Option<Symbol>,
    /// Fraction of depth carried by `candidate` (0 when there is none).
    pub fraction: f64,
    /// One-sided binomial p-value; only computed for called alternates.
    pub p_value: Option<f64>,
    /// Raw per-symbol tallies.
    pub counts: SymbolCounts,
    /// Reads covering the position.
    pub depth: u32,
    /// Reference k-mer centred on the position.
    pub context: String,
}

impl PositionCall {
    /// Whether an alternate was called here.
    pub fn is_variant(&self) -> bool {
        self.alternate.is_some()
    }

    /// The two largest symbol fractions at this position, reference included.
    pub fn top_two_fractions(&self) -> (f64, f64) {
        if self.depth == 0 {
            return (0.0, 0.0);
        }
        let mut counts: Vec<u32> = self.counts.iter().map(|(_, count)| count).collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let depth = self.depth as f64;
        (counts[0] as f64 / depth, counts[1] as f64 / depth)
    }

    /// Variant token, e.g. `T2G` or `A5DEL`, using 1-based positions.
    pub fn token(&self) -> Option<String> {
        self.alternate.map(|alt| {
            format!("{}{}{}", self.reference as char, self.position + 1, alt.label())
        })
    }
}

/// Errors originating from position calling.
#[derive(Debug, Error, PartialEq)]
pub enum VariantCallerError {
    /// Parameters outside their valid range.
    #[error("invalid caller parameter: {0}")]
    InvalidParameter(String),
    /// A significance test received degenerate input.
    #[error("statistics error: {0}")]
    Statistics(#[from] StatisticsError),
}

/// Thresholds governing position calling.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerParams {
    /// Minimum covering reads for a position to be evaluated.
    pub min_coverage: u32,
    /// Alternate fraction that must be exceeded to call.
    pub threshold: f64,
    /// Null success probability for the binomial test.
    pub background_error_rate: f64,
    /// Reference positions excluded at the start.
    pub padding_start: usize,
    /// Reference positions excluded at the end.
    pub padding_end: usize,
}

impl Default for CallerParams {
    fn default() -> Self {
        Self {
            min_coverage: 5,
            threshold: 0.2,
            background_error_rate: 0.1,
            padding_start: 0,
            padding_end: 0,
        }
    }
}

impl CallerParams {
    /// Reject parameter combinations the caller cannot evaluate.
    pub fn validate(&self) -> Result<(), VariantCallerError> {
        if self.min_coverage == 0 {
            return Err(VariantCallerError::InvalidParameter(
                "minimum coverage must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(VariantCallerError::InvalidParameter(format!(
                "threshold {} must lie in [0, 1)",
                self.threshold
            )));
        }
        if !(self.background_error_rate > 0.0 && self.background_error_rate < 1.0) {
            return Err(VariantCallerError::InvalidParameter(format!(
                "background error rate {} must lie in (0, 1)",
                self.background_error_rate
            )));
        }
        Ok(())
    }
}

/// Frequency-based caller scoring each reference position of a well pileup.
#[derive(Debug, Clone)]
pub struct PositionCaller {
    params: CallerParams,
}

impl PositionCaller {
    /// Create a caller after validating its parameters.
    pub fn new(params: CallerParams) -> Result<Self, VariantCallerError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Parameters in use.
    pub fn params(&self) -> &CallerParams {
        &self.params
    }

    /// Evaluate every position of the pileup's calling window, ascending.
    pub fn call(&self, pileup: &WellPileup) -> Result<Vec<PositionCall>, VariantCallerError> {
        let len = pileup.reference().len();
        let start = self.params.padding_start.min(len);
        let end = len.saturating_sub(self.params.padding_end).max(start);

        let mut calls = Vec::new();
        for column in pileup.columns(start..end) {
            if let Some(call) = self.call_column(pileup, &column)? {
                calls.push(call);
            }
        }
        debug!(
            evaluated = calls.len(),
            variants = calls.iter().filter(|c| c.is_variant()).count(),
            "positions called"
        );
        Ok(calls)
    }

    fn call_column(
        &self,
        pileup: &WellPileup,
        column: &PileupColumn,
    ) -> Result<Option<PositionCall>, VariantCallerError> {
        if column.depth == 0 || column.depth < self.params.min_coverage {
            return Ok(None);
        }
        let reference_symbol = Symbol::from_byte(column.reference);
        if reference_symbol == Some(Symbol::Gap) {
            return Ok(None);
        }

        let depth = column.depth as f64;
        let mut candidate = None;
        let mut best_count = 0u32;
        let mut fraction = 0.0;
        for (symbol, count) in column.counts.iter() {
            if Some(symbol) == reference_symbol || count == 0 {
                continue;
            }
            let symbol_fraction = count as f64 / depth;
            if symbol_fraction > fraction {
                fraction = symbol_fraction;
                best_count = count;
                candidate = Some(symbol);
            }
        }

        let (alternate, p_value) = match candidate {
            Some(symbol) if fraction > self.params.threshold => {
                let p = binomial_test_greater(
                    best_count as u64,
                    column.depth as u64,
                    self.params.background_error_rate,
                )?;
                (Some(symbol), Some(p))
            }
            _ => (None, None),
        };

        let context = pileup.reference().context(column.position, CONTEXT_WIDTH);
        Ok(Some(PositionCall {
            position: column.position,
            reference: column.reference,
            alternate,
            candidate,
            fraction,
            p_value,
            counts: column.counts,
            depth: column.depth,
            context: String::from_utf8_lossy(context).into_owned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, Reference};

    fn pileup(reference: &[u8], reads: &[&[u8]]) -> WellPileup {
        let reference = Reference::new("parent", reference);
        let records = reads.iter().enumerate().map(|(idx, seq)| {
            AlignedRead::new(
                format!("read{idx}"),
                0,
                60,
                vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
                seq.to_vec(),
                vec![30; seq.len()],
            )
        });
        WellPileup::build(records, &reference)
    }

    fn caller(min_coverage: u32) -> PositionCaller {
        PositionCaller::new(CallerParams {
            min_coverage,
            ..CallerParams::default()
        })
        .unwrap()
    }

    #[test]
    fn identical_reads_produce_no_variants() {
        let reads = vec![b"ATGCATGC".as_slice(); 10];
        let calls = caller(5).call(&pileup(b"ATGCATGC", &reads)).unwrap();
        assert_eq!(calls.len(), 8);
        assert!(calls.iter().all(|c| !c.is_variant() && c.candidate.is_none()));
    }

    #[test]
    fn calls_majority_substitution() {
        let mut reads = vec![b"AGGC".as_slice(); 9];
        reads.push(b"ATGC");
        let calls = caller(5).call(&pileup(b"ATGC", &reads)).unwrap();
        let variants: Vec<_> = calls.iter().filter(|c| c.is_variant()).collect();
        assert_eq!(variants.len(), 1);
        let call = variants[0];
        assert_eq!(call.position, 1);
        assert_eq!(call.alternate, Some(Symbol::G));
        assert!((call.fraction - 0.9).abs() < 1e-12);
        assert_eq!(call.token().as_deref(), Some("T2G"));
        assert!(call.p_value.unwrap() < 1e-8);
        assert_eq!(call.counts.get(Symbol::G), 9);
        assert_eq!(call.counts.get(Symbol::T), 1);
    }

    #[test]
    fn ties_follow_symbol_priority() {
        // position 0: A reference, 3 C and 3 T -> T outranks C
        let reads: Vec<&[u8]> = vec![b"C", b"C", b"C", b"T", b"T", b"T", b"A", b"A", b"A", b"A"];
        let calls = caller(5).call(&pileup(b"A", &reads)).unwrap();
        assert_eq!(calls[0].alternate, Some(Symbol::T));
    }

    #[test]
    fn fraction_at_threshold_is_not_called() {
        // 2 of 10 reads differ: fraction == threshold
        let mut reads = vec![b"A".as_slice(); 8];
        reads.extend([b"G".as_slice(), b"G".as_slice()]);
        let calls = caller(5).call(&pileup(b"A", &reads)).unwrap();
        assert_eq!(calls[0].candidate, Some(Symbol::G));
        assert_eq!(calls[0].alternate, None);
        assert_eq!(calls[0].p_value, None);
    }

    #[test]
    fn low_coverage_positions_are_skipped() {
        let reads = vec![b"AAAA".as_slice(); 3];
        let calls = caller(5).call(&pileup(b"ACGT", &reads)).unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn deletions_render_as_del() {
        let reference = Reference::new("parent", b"ACGT");
        let records = (0..6).map(|idx| {
            AlignedRead::new(
                format!("r{idx}"),
                0,
                60,
                vec![
                    CigarOp::new(CigarOpKind::Match, 2),
                    CigarOp::new(CigarOpKind::Deletion, 1),
                    CigarOp::new(CigarOpKind::Match, 1),
                ],
                b"ACT".to_vec(),
                vec![30; 3],
            )
        });
        let pileup = WellPileup::build(records, &reference);
        let calls = caller(5).call(&pileup).unwrap();
        let del = calls.iter().find(|c| c.is_variant()).unwrap();
        assert_eq!(del.token().as_deref(), Some("G3DEL"));
    }

    #[test]
    fn padding_excludes_window_edges() {
        let reads = vec![b"GGGG".as_slice(); 10];
        let params = CallerParams {
            padding_start: 1,
            padding_end: 2,
            ..CallerParams::default()
        };
        let calls = PositionCaller::new(params)
            .unwrap()
            .call(&pileup(b"ACGT", &reads))
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].position, 1);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let bad = CallerParams {
            background_error_rate: 0.0,
            ..CallerParams::default()
        };
        assert!(matches!(
            PositionCaller::new(bad),
            Err(VariantCallerError::InvalidParameter(_))
        ));
        let bad = CallerParams {
            min_coverage: 0,
            ..CallerParams::default()
        };
        assert!(PositionCaller::new(bad).is_err());
    }

    #[test]
    fn top_two_includes_reference() {
        let mut reads = vec![b"A".as_slice(); 6];
        reads.extend(vec![b"C".as_slice(); 4]);
        let calls = caller(5).call(&pileup(b"A", &reads)).unwrap();
        let (first, second) = calls[0].top_two_fractions();
        assert!((first - 0.6).abs() < 1e-12);
        assert!((second - 0.4).abs() < 1e-12);
    }
}
