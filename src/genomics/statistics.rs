use statrs::distribution::{Binomial, ChiSquared, ContinuousCDF, DiscreteCDF};
use thiserror::Error;

/// Degenerate inputs rejected before any distribution is evaluated.
#[derive(Debug, Error, PartialEq)]
pub enum StatisticsError {
    /// A binomial test needs at least one trial.
    #[error("binomial test requires at least one trial")]
    ZeroTrials,
    /// More successes than trials.
    #[error("{successes} successes exceed {trials} trials")]
    SuccessesExceedTrials {
        /// Observed successes.
        successes: u64,
        /// Number of trials.
        trials: u64,
    },
    /// Null probability outside the open unit interval.
    #[error("null probability {0} must lie strictly between 0 and 1")]
    InvalidProbability(f64),
    /// A p-value outside `[0, 1]` or NaN.
    #[error("p-value {0} outside [0, 1]")]
    InvalidPValue(f64),
    /// The distribution could not be constructed.
    #[error("distribution error: {0}")]
    Distribution(String),
}

/// Exact one-sided binomial test with alternative "greater".
///
/// Returns `P(X >= successes)` for `X ~ Binomial(trials, null_probability)`.
pub fn binomial_test_greater(
    successes: u64,
    trials: u64,
    null_probability: f64,
) -> Result<f64, StatisticsError> {
    if trials == 0 {
        return Err(StatisticsError::ZeroTrials);
    }
    if successes > trials {
        return Err(StatisticsError::SuccessesExceedTrials { successes, trials });
    }
    if !(null_probability > 0.0 && null_probability < 1.0) {
        return Err(StatisticsError::InvalidProbability(null_probability));
    }
    if successes == 0 {
        return Ok(1.0);
    }
    let dist = Binomial::new(null_probability, trials)
        .map_err(|err| StatisticsError::Distribution(err.to_string()))?;
    Ok(dist.sf(successes - 1).clamp(0.0, 1.0))
}

/// Result of Fisher's combined probability test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisherCombination {
    /// `-2 * sum(ln p_i)`.
    pub statistic: f64,
    /// Degrees of freedom, `2k`.
    pub degrees_of_freedom: u32,
    /// Upper-tail chi-square probability of `statistic`.
    pub p_value: f64,
}

/// Fisher's method over independent p-values.
///
/// An empty input has no defined combination and yields `Ok(None)`. Zero
/// p-values are floored at the smallest positive `f64` so the statistic stays finite.
pub fn fisher_combine(p_values: &[f64]) -> Result<Option<FisherCombination>, StatisticsError> {
    if p_values.is_empty() {
        return Ok(None);
    }
    let mut statistic = 0.0;
    for &p in p_values {
        if !(0.0..=1.0).contains(&p) {
            return Err(StatisticsError::InvalidPValue(p));
        }
        statistic -= 2.0 * p.max(f64::MIN_POSITIVE).ln();
    }
    let degrees_of_freedom = 2 * p_values.len() as u32;
    let dist = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|err| StatisticsError::Distribution(err.to_string()))?;
    Ok(Some(FisherCombination {
        statistic,
        degrees_of_freedom,
        p_value: dist.sf(statistic).clamp(0.0, 1.0),
    }))
}

/// Bonferroni adjustment, `min(1, p * tests)`.
pub fn bonferroni(p_value: f64, tests: usize) -> f64 {
    (p_value * tests as f64).min(1.0)
}
