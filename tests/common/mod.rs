#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bio::io::fastq;
use platecall::alignment::{AlignmentError, AlignmentRequest, ExternalAligner};
use platecall::genomics::io::{read_reference_fasta, write_alignments};
use platecall::genomics::{AlignedRead, CigarOp, CigarOpKind};
use platecall::{RunConfig, RunContext};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("PLATECALL_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set PLATECALL_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Stand-in for minimap2: every FASTQ read becomes a full-length match at
/// position 0 of the reference. A file that is not FASTQ makes the call fail.
#[derive(Debug, Default)]
pub struct FixtureAligner {
    calls: AtomicUsize,
}

impl FixtureAligner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExternalAligner for FixtureAligner {
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<(), AlignmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = |stderr: String| AlignmentError::ToolFailed {
            tool: "fixture".to_string(),
            status: Some(1),
            stderr,
        };
        let reference = read_reference_fasta(request.reference_fasta).map_err(|e| failed(e.to_string()))?;

        let mut reads = Vec::new();
        for path in request.reads {
            let reader = fastq::Reader::from_file(path).map_err(|e| failed(e.to_string()))?;
            for record in reader.records() {
                let record = record.map_err(|e| failed(e.to_string()))?;
                reads.push(AlignedRead::new(
                    record.id(),
                    0,
                    60,
                    vec![CigarOp::new(CigarOpKind::Match, record.seq().len() as u32)],
                    record.seq().to_vec(),
                    record.qual().iter().map(|q| q - 33).collect::<Vec<u8>>(),
                ));
            }
        }
        write_alignments(request.output_bam, &reference, &reads).map_err(|e| failed(e.to_string()))
    }
}

/// Write `reads` as `<well_dir>/demultiplexed_0.fastq`, creating the folder.
pub fn write_reads(well_dir: &Path, reads: &[(&str, &[u8])]) {
    fs::create_dir_all(well_dir).unwrap();
    let file = fs::File::create(well_dir.join("demultiplexed_0.fastq")).unwrap();
    let mut writer = fastq::Writer::new(file);
    for (name, seq) in reads {
        let qual = vec![b'I'; seq.len()];
        writer.write(name, None, seq, &qual).unwrap();
    }
    writer.flush().unwrap();
}

/// `count` reads named `<prefix><i>` with the same sequence.
pub fn repeated<'a>(prefix: &str, seq: &'a [u8], count: usize) -> Vec<(String, &'a [u8])> {
    (0..count).map(|i| (format!("{prefix}{i}"), seq)).collect()
}

pub fn write_named_reads(well_dir: &Path, reads: &[(String, &[u8])]) {
    let borrowed: Vec<(&str, &[u8])> = reads.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    write_reads(well_dir, &borrowed);
}

/// Two plates:
/// - RB01 (`lipase`, `ATGCATGC`): A1 ten parent reads, A2 three reads, A3 a
///   corrupt read file, B1 six reads with `C4T`.
/// - RB02 (`kinase`, `ATGC`): A1 nine `AGGC` reads and one parent read.
pub struct PlateFixture {
    pub dir: tempfile::TempDir,
}

impl PlateFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("demultiplexed");
        fs::write(
            dir.path().join("references.csv"),
            "barcode_plate,name,refseq\n1,lipase,ATGCATGC\n2,kinase,atgc\n",
        )
        .unwrap();

        write_named_reads(&root.join("RB01/NB01"), &repeated("parent", b"ATGCATGC", 10));
        write_named_reads(&root.join("RB01/NB02"), &repeated("thin", b"ATGCATGC", 3));
        fs::create_dir_all(root.join("RB01/NB03")).unwrap();
        fs::write(root.join("RB01/NB03/demultiplexed_0.fastq"), b"not a fastq file\n").unwrap();
        write_named_reads(&root.join("RB01/NB13"), &repeated("mut", b"ATGTATGC", 6));

        let mut plate2 = repeated("alt", b"AGGC", 9);
        plate2.push(("ref".to_string(), b"ATGC"));
        write_named_reads(&root.join("RB02/NB01"), &plate2);

        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("demultiplexed")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    pub fn config(&self) -> RunConfig {
        RunConfig::new(self.root(), self.output())
            .with_reference_table(self.dir.path().join("references.csv"))
            .with_workers(4)
    }

    pub fn context(&self, config: RunConfig, aligner: &Arc<FixtureAligner>) -> RunContext {
        RunContext::with_aligner(config, aligner.clone()).expect("context builds")
    }
}
