use std::fmt;
use std::str::FromStr;

/// Label written for a well with no called position.
pub const PARENT_LABEL: &str = "#PARENT#";
/// Label written for a well below the depth gate or without reads.
pub const INSUFFICIENT_LABEL: &str = "#N.A.#";
/// Label written for a well whose alignment or reads could not be processed.
pub const FAILED_LABEL: &str = "#FAILED#";

/// Genotype label of one well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariantLabel {
    /// Matches the parent sequence.
    Parent,
    /// Point mutations, e.g. `T2G_A5DEL`; never empty.
    Called(String),
    /// Too few reads to call.
    InsufficientData,
    /// Alignment or read processing failed.
    Failed,
}

impl VariantLabel {
    /// Join variant tokens in position order; no tokens means [`VariantLabel::Parent`].
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = tokens
            .into_iter()
            .map(|t| t.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("_");
        if joined.is_empty() {
            VariantLabel::Parent
        } else {
            VariantLabel::Called(joined)
        }
    }

    /// Whether this is a real genotype (parent or called) rather than a sentinel.
    pub fn is_call(&self) -> bool {
        matches!(self, VariantLabel::Parent | VariantLabel::Called(_))
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantLabel::Parent => f.write_str(PARENT_LABEL),
            VariantLabel::Called(label) => f.write_str(label),
            VariantLabel::InsufficientData => f.write_str(INSUFFICIENT_LABEL),
            VariantLabel::Failed => f.write_str(FAILED_LABEL),
        }
    }
}

impl FromStr for VariantLabel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            PARENT_LABEL => VariantLabel::Parent,
            INSUFFICIENT_LABEL | "" => VariantLabel::InsufficientData,
            FAILED_LABEL => VariantLabel::Failed,
            other => VariantLabel::Called(other.to_string()),
        })
    }
}
