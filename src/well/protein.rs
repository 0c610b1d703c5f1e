//! Nucleotide and protein consequences of a well's genotype.

use std::fmt;

use tracing::debug;

use crate::well::VariantLabel;

/// Written in place of both sequences when the genotype carries a deletion.
pub const DELETION: &str = "Deletion";
/// Protein change reported when the two translations differ in length.
pub const LENGTH_CHANGE: &str = "LEN";

// NCBI table 1, codons ordered by base T, C, A, G.
const CODE: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Translate with the standard genetic code.
///
/// Stops are `*`, codons with an ambiguous base are `X`, and a trailing
/// partial codon is dropped.
pub fn translate(sequence: &[u8]) -> String {
    sequence
        .chunks_exact(3)
        .map(|codon| {
            match (base_index(codon[0]), base_index(codon[1]), base_index(codon[2])) {
                (Some(a), Some(b), Some(c)) => CODE[a * 16 + b * 4 + c] as char,
                _ => 'X',
            }
        })
        .collect()
}

/// Amino-acid level difference between the parent and a variant protein.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProteinChange {
    /// Identical proteins, including wells with only synonymous changes.
    Parent,
    /// Substitutions such as `M1V`, in protein order.
    Substitutions(Vec<String>),
    /// The proteins differ in length.
    LengthChange,
    /// The genotype deletes bases; no protein is derived.
    Deletion,
}

impl ProteinChange {
    /// Compare two translations residue by residue.
    pub fn between(parent: &str, variant: &str) -> Self {
        if parent.len() != variant.len() {
            return ProteinChange::LengthChange;
        }
        let changes: Vec<String> = parent
            .chars()
            .zip(variant.chars())
            .enumerate()
            .filter(|(_, (p, v))| p != v)
            .map(|(idx, (p, v))| format!("{p}{}{v}", idx + 1))
            .collect();
        if changes.is_empty() {
            ProteinChange::Parent
        } else {
            ProteinChange::Substitutions(changes)
        }
    }
}

impl fmt::Display for ProteinChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProteinChange::Parent => f.write_str(crate::well::PARENT_LABEL),
            ProteinChange::Substitutions(changes) => f.write_str(&changes.join("_")),
            ProteinChange::LengthChange => f.write_str(LENGTH_CHANGE),
            ProteinChange::Deletion => f.write_str("-"),
        }
    }
}

/// Variant coding sequence, its protein and the amino-acid changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinVariant {
    /// Parent sequence with the called substitutions applied, or [`DELETION`].
    pub nc_variant: String,
    /// Translation of `nc_variant`, or [`DELETION`].
    pub aa_variant: String,
    /// Change against the translated parent.
    pub mutations: ProteinChange,
}

impl ProteinVariant {
    /// Derive the protein consequence of `label` on `parent`.
    ///
    /// Sentinel labels have none. Substitution tokens whose reference base
    /// does not match `parent` are left unapplied.
    pub fn from_label(label: &VariantLabel, parent: &[u8]) -> Option<Self> {
        let tokens = match label {
            VariantLabel::Parent => "",
            VariantLabel::Called(tokens) => tokens.as_str(),
            VariantLabel::InsufficientData | VariantLabel::Failed => return None,
        };
        if tokens.contains("DEL") {
            return Some(Self {
                nc_variant: DELETION.to_string(),
                aa_variant: DELETION.to_string(),
                mutations: ProteinChange::Deletion,
            });
        }

        let mut variant = parent.to_ascii_uppercase();
        for token in tokens.split('_').filter(|t| !t.is_empty()) {
            match parse_substitution(token) {
                Some((position, original, new)) if variant.get(position) == Some(&original) => {
                    variant[position] = new;
                }
                _ => debug!(token, "substitution not applied to parent sequence"),
            }
        }

        let aa_variant = translate(&variant);
        let mutations = ProteinChange::between(&translate(parent), &aa_variant);
        Some(Self {
            nc_variant: String::from_utf8_lossy(&variant).into_owned(),
            aa_variant,
            mutations,
        })
    }
}

/// `T12G` as (0-based position, original, new).
fn parse_substitution(token: &str) -> Option<(usize, u8, u8)> {
    let bytes = token.as_bytes();
    if bytes.len() < 3 {
        return None;
    }
    let original = bytes[0].to_ascii_uppercase();
    let new = bytes[bytes.len() - 1].to_ascii_uppercase();
    let position: usize = token.get(1..token.len() - 1)?.parse().ok()?;
    Some((position.checked_sub(1)?, original, new))
}
