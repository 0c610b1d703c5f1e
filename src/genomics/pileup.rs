use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::genomics::{AlignedRead, CigarOpKind, Reference};

/// Symbol emitted for deleted reference bases and for positions a read does not cover.
pub const GAP: u8 = b'-';
/// Symbol emitted for skipped (intronic) reference bases.
pub const SKIP: u8 = b'*';
/// Quality sentinel paired with [`GAP`].
pub const GAP_QUALITY: i16 = -1;
/// Quality sentinel paired with [`SKIP`].
pub const SKIP_QUALITY: i16 = -2;

/// Errors raised while reconstructing a read from its CIGAR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PileupError {
    /// The CIGAR consumes more query bases than the record carries.
    #[error("read {name}: CIGAR {cigar} consumes {needed} query bases but the sequence has {available}")]
    QueryOverrun {
        /// Query name of the offending record.
        name: String,
        /// CIGAR in SAM notation.
        cigar: String,
        /// Query bases required by the CIGAR.
        needed: usize,
        /// Query bases present in the record.
        available: usize,
    },
}

/// Pileup symbols tallied per reference position, in call-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    /// Adenine.
    A,
    /// Thymine.
    T,
    /// Guanine.
    G,
    /// Cytosine.
    C,
    /// Deleted base.
    Gap,
}

impl Symbol {
    /// All symbols in tie-break priority order.
    pub const ALL: [Symbol; 5] = [Symbol::A, Symbol::T, Symbol::G, Symbol::C, Symbol::Gap];

    /// Map a pileup byte to a symbol; `N`, skips and anything else yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' | b'a' => Some(Symbol::A),
            b'T' | b't' | b'U' | b'u' => Some(Symbol::T),
            b'G' | b'g' => Some(Symbol::G),
            b'C' | b'c' => Some(Symbol::C),
            GAP => Some(Symbol::Gap),
            _ => None,
        }
    }

    /// Pileup byte for the symbol.
    pub fn as_byte(self) -> u8 {
        match self {
            Symbol::A => b'A',
            Symbol::T => b'T',
            Symbol::G => b'G',
            Symbol::C => b'C',
            Symbol::Gap => GAP,
        }
    }

    /// Token used in variant labels; deletions render as `DEL`.
    pub fn label(self) -> &'static str {
        match self {
            Symbol::A => "A",
            Symbol::T => "T",
            Symbol::G => "G",
            Symbol::C => "C",
            Symbol::Gap => "DEL",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-symbol observation counts at one position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolCounts([u32; 5]);

impl SymbolCounts {
    /// Count for a single symbol.
    pub fn get(&self, symbol: Symbol) -> u32 {
        self.0[symbol.index()]
    }

    pub(crate) fn observe(&mut self, symbol: Symbol) {
        self.0[symbol.index()] += 1;
    }

    /// Sum over all tallied symbols.
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    /// `(symbol, count)` pairs in priority order.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, u32)> + '_ {
        Symbol::ALL.iter().map(move |&symbol| (symbol, self.get(symbol)))
    }
}

impl FromIterator<(Symbol, u32)> for SymbolCounts {
    fn from_iter<I: IntoIterator<Item = (Symbol, u32)>>(iter: I) -> Self {
        let mut counts = SymbolCounts::default();
        for (symbol, count) in iter {
            counts.0[symbol.index()] += count;
        }
        counts
    }
}

/// A read rebuilt in the reference coordinate frame.
///
/// `symbols` and `qualities` always have the reference length. Inserted and
/// soft-clipped bases are not part of the frame; they are kept in `inserts`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedRead {
    /// Query name of the source record.
    pub name: Arc<str>,
    /// One symbol per reference position.
    pub symbols: Vec<u8>,
    /// One quality per reference position; [`GAP_QUALITY`]/[`SKIP_QUALITY`] where no base aligned.
    pub qualities: Vec<i16>,
    /// Inserted and soft-clipped segments, in read order.
    pub inserts: Vec<Vec<u8>>,
    /// Reference positions covered by the alignment body.
    pub span: Range<usize>,
    /// Mean Phred quality of the source record.
    pub read_quality: f64,
}

impl ReconstructedRead {
    /// Whether the alignment body covers `position`.
    pub fn covers(&self, position: usize) -> bool {
        self.span.contains(&position)
    }
}

/// Rebuild `read` over `reference` by walking its CIGAR.
pub fn reconstruct(
    read: &AlignedRead,
    reference: &Reference,
) -> Result<ReconstructedRead, PileupError> {
    let reference_len = reference.len();
    let query = read.sequence.as_ref();

    let mut body: Vec<u8> = Vec::with_capacity(reference_len);
    let mut body_quals: Vec<i16> = Vec::with_capacity(reference_len);
    let mut inserts = Vec::new();
    let mut cursor = 0usize;

    for op in &read.cigar {
        let len = op.len as usize;
        if op.kind.consumes_query() && cursor + len > query.len() {
            return Err(PileupError::QueryOverrun {
                name: read.name.to_string(),
                cigar: read.cigar_string(),
                needed: cursor + len,
                available: query.len(),
            });
        }
        match op.kind {
            CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch => {
                body.extend(query[cursor..cursor + len].iter().map(u8::to_ascii_uppercase));
                body_quals.extend((cursor..cursor + len).map(|i| quality_at(read, i)));
                cursor += len;
            }
            CigarOpKind::Insertion | CigarOpKind::SoftClip => {
                inserts.push(query[cursor..cursor + len].to_vec());
                cursor += len;
            }
            CigarOpKind::Deletion => {
                body.extend(std::iter::repeat(GAP).take(len));
                body_quals.extend(std::iter::repeat(GAP_QUALITY).take(len));
            }
            CigarOpKind::Skip => {
                body.extend(std::iter::repeat(SKIP).take(len));
                body_quals.extend(std::iter::repeat(SKIP_QUALITY).take(len));
            }
            CigarOpKind::HardClip | CigarOpKind::Padding => {}
        }
    }

    let left = (read.pos as usize).min(reference_len);
    let body_len = body.len().min(reference_len - left);

    let mut symbols = Vec::with_capacity(reference_len);
    let mut qualities = Vec::with_capacity(reference_len);
    symbols.resize(left, GAP);
    qualities.resize(left, GAP_QUALITY);
    symbols.extend_from_slice(&body[..body_len]);
    qualities.extend_from_slice(&body_quals[..body_len]);
    symbols.resize(reference_len, GAP);
    qualities.resize(reference_len, GAP_QUALITY);

    Ok(ReconstructedRead {
        name: Arc::clone(&read.name),
        symbols,
        qualities,
        inserts,
        span: left..left + body_len,
        read_quality: read.mean_quality(),
    })
}

fn quality_at(read: &AlignedRead, offset: usize) -> i16 {
    read.qualities.get(offset).map(|&q| q as i16).unwrap_or(0)
}

/// Aggregated symbol counts for one reference position.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupColumn {
    /// 0-based reference position.
    pub position: usize,
    /// Reference base at `position`.
    pub reference: u8,
    /// Tallies over A, T, G, C and gap.
    pub counts: SymbolCounts,
    /// Reads whose alignment body covers the position (skipped bases excluded).
    pub depth: u32,
}

/// All reconstructed reads of one well, one row per distinct read name.
#[derive(Debug, Clone)]
pub struct WellPileup {
    reference: Reference,
    rows: Vec<ReconstructedRead>,
    skipped: usize,
}

impl WellPileup {
    /// Reconstruct every read and keep, per read name, the highest-quality row.
    ///
    /// Rows keep the order in which each name was first seen; on equal quality
    /// the earlier record wins. Records that cannot be reconstructed are
    /// dropped and counted in [`WellPileup::skipped`].
    pub fn build<I>(reads: I, reference: &Reference) -> Self
    where
        I: IntoIterator<Item = AlignedRead>,
    {
        let mut rows: Vec<ReconstructedRead> = Vec::new();
        let mut by_name: HashMap<Arc<str>, usize> = HashMap::new();
        let mut skipped = 0;

        for read in reads {
            let row = match reconstruct(&read, reference) {
                Ok(row) => row,
                Err(err) => {
                    warn!(error = %err, "dropping unreconstructable read");
                    skipped += 1;
                    continue;
                }
            };
            match by_name.get(&row.name) {
                Some(&idx) => {
                    if row.read_quality > rows[idx].read_quality {
                        rows[idx] = row;
                    }
                }
                None => {
                    by_name.insert(Arc::clone(&row.name), rows.len());
                    rows.push(row);
                }
            }
        }

        Self {
            reference: reference.clone(),
            rows,
            skipped,
        }
    }

    /// Reference the pileup is framed on.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Deduplicated rows.
    pub fn rows(&self) -> &[ReconstructedRead] {
        &self.rows
    }

    /// Number of distinct reads.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no read contributed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records dropped because their CIGAR did not fit the sequence.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Tally the column at `position`.
    pub fn column(&self, position: usize) -> PileupColumn {
        let mut counts = SymbolCounts::default();
        let mut depth = 0;
        for row in self.rows.iter().filter(|row| row.covers(position)) {
            let byte = row.symbols[position];
            if byte == SKIP {
                continue;
            }
            depth += 1;
            if let Some(symbol) = Symbol::from_byte(byte) {
                counts.observe(symbol);
            }
        }
        PileupColumn {
            position,
            reference: self.reference.sequence[position],
            counts,
            depth,
        }
    }

    /// Columns for every reference position in `range`.
    pub fn columns(&self, range: Range<usize>) -> impl Iterator<Item = PileupColumn> + '_ {
        let end = range.end.min(self.reference.len());
        (range.start.min(end)..end).map(move |position| self.column(position))
    }
}
