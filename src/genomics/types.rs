use std::fmt;
use std::sync::Arc;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Alignment match (sequence match or mismatch), `M`.
    Match,
    /// Insertion relative to the reference, `I`.
    Insertion,
    /// Deletion relative to the reference, `D`.
    Deletion,
    /// Skipped reference region (intron), `N`.
    Skip,
    /// Soft clipping (sequence present in read only), `S`.
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read), `H`.
    HardClip,
    /// Silent deletion from a padded reference, `P`.
    Padding,
    /// Sequence match, `=`.
    SequenceMatch,
    /// Sequence mismatch, `X`.
    SequenceMismatch,
}

impl CigarOpKind {
    /// Whether the operation advances the query cursor.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation advances the reference cursor.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// SAM character code for the operation.
    pub fn code(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::Skip => 'N',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::Padding => 'P',
            CigarOpKind::SequenceMatch => '=',
            CigarOpKind::SequenceMismatch => 'X',
        }
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.code())
    }
}

/// Aligned read with sequence and quality information, as produced by the
/// external aligner. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Query name; reads sharing a name are collapsed in a pileup.
    pub name: Arc<str>,
    /// 0-based leftmost reference coordinate.
    pub pos: u32,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space.
    pub qualities: Arc<[u8]>,
}

impl AlignedRead {
    /// Construct a new aligned read wrapper.
    pub fn new(
        name: impl Into<Arc<str>>,
        pos: u32,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            pos,
            mapq,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
        }
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Number of reference bases spanned by the CIGAR.
    pub fn reference_span(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum()
    }

    /// End position (half-open) on the reference.
    pub fn end(&self) -> u32 {
        self.pos + self.reference_span()
    }

    /// Mean Phred quality over all bases; used to pick one record per read name.
    pub fn mean_quality(&self) -> f64 {
        if self.qualities.is_empty() {
            return 0.0;
        }
        let total: u64 = self.qualities.iter().map(|&q| q as u64).sum();
        total as f64 / self.qualities.len() as f64
    }

    /// CIGAR rendered in SAM notation.
    pub fn cigar_string(&self) -> String {
        self.cigar.iter().map(|op| op.to_string()).collect()
    }
}

/// Reference ("parent") sequence the reads of a well are aligned against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Sequence name, used as the FASTA header.
    pub name: Arc<str>,
    /// Uppercase nucleotide sequence.
    pub sequence: Arc<[u8]>,
}

impl Reference {
    /// Build a reference, upper-casing the sequence.
    pub fn new(name: impl Into<Arc<str>>, sequence: &[u8]) -> Self {
        Self {
            name: name.into(),
            sequence: Arc::from(sequence.to_ascii_uppercase().into_boxed_slice()),
        }
    }

    /// Reference length in bases.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the reference is empty.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// First byte outside `ACGTN`, with its offset, if any.
    pub fn first_invalid_base(&self) -> Option<(usize, u8)> {
        self.sequence
            .iter()
            .enumerate()
            .find(|(_, base)| !matches!(base, b'A' | b'C' | b'G' | b'T' | b'N'))
            .map(|(idx, &base)| (idx, base))
    }

    /// Reference k-mer of width `k` centred on `position`, clipped at the ends.
    pub fn context(&self, position: usize, k: usize) -> &[u8] {
        let half = k / 2;
        let start = position.saturating_sub(half);
        let end = (position + half).min(self.sequence.len());
        &self.sequence[start.min(end)..end]
    }
}
