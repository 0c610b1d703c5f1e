use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alignment::{AlignmentPreset, AlignmentSettings, ScoringScheme};
use crate::genomics::CallerParams;
use crate::plate::TopologySettings;
use crate::well::AggregationParams;
use crate::CallerError;

/// Every knob of an experiment run.
///
/// Built with [`RunConfig::new`] and the `with_*` methods, then checked with
/// [`RunConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Demultiplexed root holding the reverse barcode folders.
    pub demultiplexed_root: PathBuf,
    /// Directory receiving the experiment table and prepared references.
    pub output_dir: PathBuf,
    /// CSV with `barcode_plate,name,refseq`.
    pub reference_table: Option<PathBuf>,
    /// Experiment-wide reference FASTA used for plates missing from the table.
    pub reference_fasta: Option<PathBuf>,
    /// Reverse/forward folder prefixes.
    pub topology: TopologySettings,
    /// Read files are `<read_prefix>*.fastq[.gz]`.
    pub read_prefix: String,
    /// Alternate fraction that must be exceeded to call.
    pub threshold: f64,
    /// Minimum alignment records per well.
    pub min_depth: u64,
    /// Minimum covering reads per position.
    pub min_coverage: u32,
    /// Null probability of the binomial test.
    pub background_error_rate: f64,
    /// Size of the worker pool.
    pub workers: usize,
    /// Aligner scores for the default preset.
    pub scoring: ScoringScheme,
    /// Aligner preset.
    pub preset: AlignmentPreset,
    /// Reference positions excluded at the start.
    pub padding_start: usize,
    /// Reference positions excluded at the end.
    pub padding_end: usize,
    /// Reuse finished rows of an existing experiment table.
    pub resume: bool,
    /// Write `position_counts.csv` and `pileup.fa` into each well folder.
    pub write_artifacts: bool,
    /// minimap2 executable.
    pub minimap2: PathBuf,
    /// samtools executable.
    pub samtools: PathBuf,
    /// Longest wait on another run's alignment lock.
    pub lock_wait: Duration,
}

impl RunConfig {
    /// Defaults for a run over `demultiplexed_root` writing into `output_dir`.
    pub fn new(demultiplexed_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            demultiplexed_root: demultiplexed_root.into(),
            output_dir: output_dir.into(),
            reference_table: None,
            reference_fasta: None,
            topology: TopologySettings::default(),
            read_prefix: "demultiplexed".to_string(),
            threshold: 0.2,
            min_depth: 5,
            min_coverage: 5,
            background_error_rate: 0.1,
            workers: 10,
            scoring: ScoringScheme::default(),
            preset: AlignmentPreset::Default,
            padding_start: 0,
            padding_end: 0,
            resume: true,
            write_artifacts: true,
            minimap2: PathBuf::from("minimap2"),
            samtools: PathBuf::from("samtools"),
            lock_wait: Duration::from_secs(600),
        }
    }

    /// Use a plate reference table.
    pub fn with_reference_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_table = Some(path.into());
        self
    }

    /// Use an experiment-wide reference FASTA.
    pub fn with_reference_fasta(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_fasta = Some(path.into());
        self
    }

    /// Override the barcode folder prefixes.
    pub fn with_prefixes(mut self, reverse: impl Into<String>, forward: impl Into<String>) -> Self {
        self.topology = TopologySettings {
            reverse_prefix: reverse.into(),
            forward_prefix: forward.into(),
        };
        self
    }

    /// Override the read file prefix.
    pub fn with_read_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.read_prefix = prefix.into();
        self
    }

    /// Set the alternate-fraction threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the minimum alignment records per well.
    pub fn with_min_depth(mut self, min_depth: u64) -> Self {
        self.min_depth = min_depth;
        self
    }

    /// Set the minimum covering reads per position.
    pub fn with_min_coverage(mut self, min_coverage: u32) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    /// Set the binomial null probability.
    pub fn with_background_error_rate(mut self, rate: f64) -> Self {
        self.background_error_rate = rate;
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the aligner scores.
    pub fn with_scoring(mut self, scoring: ScoringScheme) -> Self {
        self.scoring = scoring;
        self
    }

    /// Select the aligner preset.
    pub fn with_preset(mut self, preset: AlignmentPreset) -> Self {
        self.preset = preset;
        self
    }

    /// Exclude reference positions at either end.
    pub fn with_padding(mut self, start: usize, end: usize) -> Self {
        self.padding_start = start;
        self.padding_end = end;
        self
    }

    /// Enable or disable table reuse.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Enable or disable per-well diagnostic files.
    pub fn with_artifacts(mut self, write_artifacts: bool) -> Self {
        self.write_artifacts = write_artifacts;
        self
    }

    /// Override the external executables.
    pub fn with_executables(mut self, minimap2: impl Into<PathBuf>, samtools: impl Into<PathBuf>) -> Self {
        self.minimap2 = minimap2.into();
        self.samtools = samtools.into();
        self
    }

    /// Set the longest wait on a foreign alignment lock.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Reject settings the run cannot work with.
    pub fn validate(&self) -> Result<(), CallerError> {
        let invalid = |msg: String| Err(CallerError::Configuration(msg));
        if !(0.0..1.0).contains(&self.threshold) {
            return invalid(format!("threshold {} must lie in [0, 1)", self.threshold));
        }
        if !(self.background_error_rate > 0.0 && self.background_error_rate < 1.0) {
            return invalid(format!(
                "background error rate {} must lie in (0, 1)",
                self.background_error_rate
            ));
        }
        if self.workers == 0 {
            return invalid("worker count must be > 0".to_string());
        }
        if self.min_coverage == 0 {
            return invalid("minimum coverage must be > 0".to_string());
        }
        if self.reference_table.is_none() && self.reference_fasta.is_none() {
            return invalid("either a reference table or a reference FASTA is required".to_string());
        }
        if self.topology.reverse_prefix.is_empty() || self.topology.forward_prefix.is_empty() {
            return invalid("barcode folder prefixes must not be empty".to_string());
        }
        if !self.demultiplexed_root.is_dir() {
            return invalid(format!(
                "demultiplexed root {} is not a directory",
                self.demultiplexed_root.display()
            ));
        }
        Ok(())
    }

    /// Experiment table location.
    pub fn table_path(&self) -> PathBuf {
        self.output_dir.join("variants.csv")
    }

    /// Directory of the prepared reference FASTAs.
    pub fn references_dir(&self) -> PathBuf {
        self.output_dir.join("references")
    }

    /// Demultiplexed root.
    pub fn root(&self) -> &Path {
        &self.demultiplexed_root
    }

    pub(crate) fn caller_params(&self) -> CallerParams {
        CallerParams {
            min_coverage: self.min_coverage,
            threshold: self.threshold,
            background_error_rate: self.background_error_rate,
            padding_start: self.padding_start,
            padding_end: self.padding_end,
        }
    }

    pub(crate) fn aggregation_params(&self) -> AggregationParams {
        AggregationParams {
            threshold: self.threshold,
            min_depth: self.min_depth,
        }
    }

    pub(crate) fn alignment_settings(&self) -> AlignmentSettings {
        AlignmentSettings {
            scoring: self.scoring,
            preset: self.preset,
            read_prefix: self.read_prefix.clone(),
            lock_wait: self.lock_wait,
            ..AlignmentSettings::default()
        }
    }
}
