use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use rust_htslib::bam::record::{Cigar, CigarString};
use rust_htslib::bam::{self, header::Header, header::HeaderRecord, Read, Record, Writer};
use serde::Serialize;
use thiserror::Error;

use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, PositionCall, Reference, Symbol, WellPileup};

/// Errors raised while reading or writing alignment, sequence and table files.
#[derive(Debug, Error)]
pub enum GenomicsIoError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// htslib failed to read or write a BAM file.
    #[error("BAM error on {path}: {source}")]
    Bam {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: rust_htslib::errors::Error,
    },
    /// The file is not FASTA (first line does not start with `>`).
    #[error("{0} is not in FASTA format")]
    NotFasta(PathBuf),
    /// The FASTA file holds no record.
    #[error("{0} contains no sequence")]
    EmptyFasta(PathBuf),
    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl GenomicsIoError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        GenomicsIoError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn bam(path: &Path, source: rust_htslib::errors::Error) -> Self {
        GenomicsIoError::Bam {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn cigar_from_htslib(op: &Cigar) -> CigarOp {
    match *op {
        Cigar::Match(len) => CigarOp::new(CigarOpKind::Match, len),
        Cigar::Ins(len) => CigarOp::new(CigarOpKind::Insertion, len),
        Cigar::Del(len) => CigarOp::new(CigarOpKind::Deletion, len),
        Cigar::RefSkip(len) => CigarOp::new(CigarOpKind::Skip, len),
        Cigar::SoftClip(len) => CigarOp::new(CigarOpKind::SoftClip, len),
        Cigar::HardClip(len) => CigarOp::new(CigarOpKind::HardClip, len),
        Cigar::Pad(len) => CigarOp::new(CigarOpKind::Padding, len),
        Cigar::Equal(len) => CigarOp::new(CigarOpKind::SequenceMatch, len),
        Cigar::Diff(len) => CigarOp::new(CigarOpKind::SequenceMismatch, len),
    }
}

fn cigar_to_htslib(op: &CigarOp) -> Cigar {
    match op.kind {
        CigarOpKind::Match => Cigar::Match(op.len),
        CigarOpKind::Insertion => Cigar::Ins(op.len),
        CigarOpKind::Deletion => Cigar::Del(op.len),
        CigarOpKind::Skip => Cigar::RefSkip(op.len),
        CigarOpKind::SoftClip => Cigar::SoftClip(op.len),
        CigarOpKind::HardClip => Cigar::HardClip(op.len),
        CigarOpKind::Padding => Cigar::Pad(op.len),
        CigarOpKind::SequenceMatch => Cigar::Equal(op.len),
        CigarOpKind::SequenceMismatch => Cigar::Diff(op.len),
    }
}

/// Convert a primary mapped BAM record.
///
/// Unmapped, secondary and supplementary records, and records without a
/// stored sequence, yield `None`.
pub fn aligned_read_from_record(record: &Record) -> Option<AlignedRead> {
    if record.is_unmapped()
        || record.is_secondary()
        || record.is_supplementary()
        || record.pos() < 0
        || record.seq_len() == 0
    {
        return None;
    }
    let cigar = record.cigar().iter().map(cigar_from_htslib).collect();
    let name = String::from_utf8_lossy(record.qname()).into_owned();
    Some(AlignedRead::new(
        name,
        record.pos() as u32,
        record.mapq(),
        cigar,
        record.seq().as_bytes().to_ascii_uppercase(),
        record.qual().to_vec(),
    ))
}

/// Read every mapped record of a BAM file.
pub fn read_alignments(path: &Path) -> Result<Vec<AlignedRead>, GenomicsIoError> {
    let mut reader = bam::Reader::from_path(path).map_err(|err| GenomicsIoError::bam(path, err))?;
    let mut reads = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| GenomicsIoError::bam(path, err))?;
        if let Some(read) = aligned_read_from_record(&record) {
            reads.push(read);
        }
    }
    Ok(reads)
}

/// Number of records (mapped or not) in a BAM file.
pub fn count_alignments(path: &Path) -> Result<u64, GenomicsIoError> {
    let mut reader = bam::Reader::from_path(path).map_err(|err| GenomicsIoError::bam(path, err))?;
    let mut record = Record::new();
    let mut count = 0;
    while let Some(result) = reader.read(&mut record) {
        result.map_err(|err| GenomicsIoError::bam(path, err))?;
        count += 1;
    }
    Ok(count)
}

/// Create a BAM writer with a minimal header for a single-reference alignment.
///
/// The caller is responsible for writing alignment records using the returned writer.
pub fn create_bam_writer(output_path: &Path, reference: &Reference) -> Result<Writer, GenomicsIoError> {
    let mut header = Header::new();

    let mut hd = HeaderRecord::new(b"HD");
    hd.push_tag(b"VN", &"1.6");
    hd.push_tag(b"SO", &"coordinate");
    header.push_record(&hd);

    let mut sq = HeaderRecord::new(b"SQ");
    sq.push_tag(b"SN", &reference.name);
    sq.push_tag(b"LN", &(reference.len() as i64));
    header.push_record(&sq);

    bam::Writer::from_path(output_path, &header, bam::Format::Bam)
        .map_err(|err| GenomicsIoError::bam(output_path, err))
}

/// Write reads as mapped records against `reference`, in the order given.
pub fn write_alignments(
    output_path: &Path,
    reference: &Reference,
    reads: &[AlignedRead],
) -> Result<(), GenomicsIoError> {
    let mut writer = create_bam_writer(output_path, reference)?;
    for read in reads {
        let cigar = CigarString(read.cigar.iter().map(cigar_to_htslib).collect());
        let mut record = Record::new();
        record.set(read.name.as_bytes(), Some(&cigar), &read.sequence, &read.qualities);
        record.set_tid(0);
        record.set_pos(read.pos as i64);
        record.set_mapq(read.mapq);
        record.set_mtid(-1);
        record.set_mpos(-1);
        writer
            .write(&record)
            .map_err(|err| GenomicsIoError::bam(output_path, err))?;
    }
    Ok(())
}

/// Load the first record of a FASTA file as a reference.
pub fn read_reference_fasta(path: &Path) -> Result<Reference, GenomicsIoError> {
    let file = File::open(path).map_err(|err| GenomicsIoError::io(path, err))?;
    let mut first_line = String::new();
    BufReader::new(file)
        .read_line(&mut first_line)
        .map_err(|err| GenomicsIoError::io(path, err))?;
    if !first_line.starts_with('>') {
        return Err(GenomicsIoError::NotFasta(path.to_path_buf()));
    }

    let reader = fasta::Reader::from_file(path).map_err(|_| GenomicsIoError::NotFasta(path.to_path_buf()))?;
    let record = reader
        .records()
        .next()
        .ok_or_else(|| GenomicsIoError::EmptyFasta(path.to_path_buf()))?
        .map_err(|err| GenomicsIoError::io(path, err))?;
    if record.seq().is_empty() {
        return Err(GenomicsIoError::EmptyFasta(path.to_path_buf()));
    }
    Ok(Reference::new(record.id(), record.seq()))
}

/// Write a single-record FASTA for `reference`.
pub fn write_reference_fasta<W: Write>(writer: W, reference: &Reference) -> std::io::Result<()> {
    let mut fasta = fasta::Writer::new(writer);
    fasta.write(&reference.name, None, &reference.sequence)?;
    fasta.flush()
}

/// Write the reference followed by every pileup row, all in the reference frame.
pub fn write_pileup_fasta<W: Write>(writer: W, pileup: &WellPileup) -> std::io::Result<()> {
    let mut fasta = fasta::Writer::new(writer);
    let reference = pileup.reference();
    fasta.write(&reference.name, None, &reference.sequence)?;
    for row in pileup.rows() {
        fasta.write(&row.name, None, &row.symbols)?;
    }
    fasta.flush()
}

#[derive(Debug, Serialize)]
struct PositionCountRow<'a> {
    position: usize,
    reference: char,
    most_frequent: &'a str,
    called: bool,
    fraction: f64,
    p_value: Option<f64>,
    depth: u32,
    #[serde(rename = "A")]
    a: u32,
    #[serde(rename = "T")]
    t: u32,
    #[serde(rename = "G")]
    g: u32,
    #[serde(rename = "C")]
    c: u32,
    #[serde(rename = "DEL")]
    del: u32,
    context: &'a str,
}

/// Write per-position raw counts as CSV, one row per evaluated position (1-based).
pub fn write_position_counts<W: Write>(writer: W, calls: &[PositionCall]) -> Result<(), GenomicsIoError> {
    let mut csv = csv::Writer::from_writer(writer);
    for call in calls {
        let most_frequent = call.candidate.map(Symbol::label).unwrap_or("");
        csv.serialize(PositionCountRow {
            position: call.position + 1,
            reference: call.reference as char,
            most_frequent,
            called: call.is_variant(),
            fraction: call.fraction,
            p_value: call.p_value,
            depth: call.depth,
            a: call.counts.get(Symbol::A),
            t: call.counts.get(Symbol::T),
            g: call.counts.get(Symbol::G),
            c: call.counts.get(Symbol::C),
            del: call.counts.get(Symbol::Gap),
            context: &call.context,
        })?;
    }
    csv.flush().map_err(|err| GenomicsIoError::Csv(err.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{CallerParams, PositionCaller};

    fn reads() -> Vec<AlignedRead> {
        vec![
            AlignedRead::new(
                "r1",
                0,
                60,
                vec![CigarOp::new(CigarOpKind::Match, 4)],
                b"ACGT".to_vec(),
                vec![30; 4],
            ),
            AlignedRead::new(
                "r2",
                1,
                50,
                vec![
                    CigarOp::new(CigarOpKind::SoftClip, 1),
                    CigarOp::new(CigarOpKind::Match, 1),
                    CigarOp::new(CigarOpKind::Deletion, 1),
                    CigarOp::new(CigarOpKind::Match, 1),
                ],
                b"TCT".to_vec(),
                vec![20; 3],
            ),
        ]
    }

    #[test]
    fn bam_round_trip_preserves_alignment_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("well.bam");
        let reference = Reference::new("parent", b"ACGT");
        write_alignments(&path, &reference, &reads()).unwrap();

        assert_eq!(count_alignments(&path).unwrap(), 2);
        let loaded = read_alignments(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(&*loaded[1].name, "r2");
        assert_eq!(loaded[1].pos, 1);
        assert_eq!(loaded[1].mapq, 50);
        assert_eq!(loaded[1].cigar_string(), "1S1M1D1M");
        assert_eq!(&*loaded[1].sequence, b"TCT");
        assert_eq!(&*loaded[1].qualities, &[20, 20, 20]);
    }

    #[test]
    fn only_primary_records_are_converted() {
        let cigar = CigarString(vec![Cigar::Match(4)]);
        let mut record = Record::new();
        record.set(b"read", Some(&cigar), b"ACGT", &[30; 4]);
        record.set_tid(0);
        record.set_pos(0);
        assert!(aligned_read_from_record(&record).is_some());

        record.set_supplementary();
        assert!(aligned_read_from_record(&record).is_none());
        record.unset_supplementary();
        record.set_secondary();
        assert!(aligned_read_from_record(&record).is_none());
        record.unset_secondary();
        record.set_unmapped();
        assert!(aligned_read_from_record(&record).is_none());
    }

    #[test]
    fn reference_fasta_requires_header() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.fasta");
        std::fs::write(&good, ">parent desc\nacgt\nACGT\n").unwrap();
        let reference = read_reference_fasta(&good).unwrap();
        assert_eq!(&*reference.name, "parent");
        assert_eq!(&*reference.sequence, b"ACGTACGT");

        let bad = dir.path().join("bad.fasta");
        std::fs::write(&bad, "ACGT\n").unwrap();
        assert!(matches!(read_reference_fasta(&bad), Err(GenomicsIoError::NotFasta(_))));
    }

    #[test]
    fn pileup_fasta_lists_reference_then_rows() {
        let reference = Reference::new("parent", b"ACGT");
        let pileup = WellPileup::build(reads(), &reference);
        let mut buffer = Vec::new();
        write_pileup_fasta(&mut buffer, &pileup).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, ">parent\nACGT\n>r1\nACGT\n>r2\n-C-T\n");
    }

    #[test]
    fn position_counts_have_one_row_per_call() {
        let reference = Reference::new("parent", b"ACGT");
        let records = (0..6).map(|idx| {
            AlignedRead::new(
                format!("r{idx}"),
                0,
                60,
                vec![CigarOp::new(CigarOpKind::Match, 4)],
                b"AGGT".to_vec(),
                vec![30; 4],
            )
        });
        let pileup = WellPileup::build(records, &reference);
        let calls = PositionCaller::new(CallerParams::default())
            .unwrap()
            .call(&pileup)
            .unwrap();
        let mut buffer = Vec::new();
        write_position_counts(&mut buffer, &calls).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "position,reference,most_frequent,called,fraction,p_value,depth,A,T,G,C,DEL,context"
        );
        assert_eq!(lines.len(), 5);
        assert!(lines[2].starts_with("2,C,G,true,1.0,"));
    }
}
