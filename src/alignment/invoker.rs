use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::alignment::{AlignmentError, AlignmentPreset, AlignmentRequest, ExternalAligner, ScoringScheme};

/// Lifecycle of one well's alignment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    /// No alignment file and nobody producing one.
    NotAligned,
    /// The aligner is running under the well lock.
    Aligning,
    /// The sorted, indexed alignment file exists.
    Aligned,
    /// The aligner failed or the lock could not be obtained.
    Failed,
}

impl fmt::Display for AlignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlignmentState::NotAligned => "not-aligned",
            AlignmentState::Aligning => "aligning",
            AlignmentState::Aligned => "aligned",
            AlignmentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Knobs of the alignment step.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentSettings {
    /// Scores used by the default preset.
    pub scoring: ScoringScheme,
    /// Preset chosen by the caller.
    pub preset: AlignmentPreset,
    /// Read files are `<prefix>*.fastq` (optionally gzipped) in the well folder.
    pub read_prefix: String,
    /// How long to wait on another process's lock before giving up.
    pub lock_wait: Duration,
    /// Interval between lock checks.
    pub poll_interval: Duration,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            scoring: ScoringScheme::default(),
            preset: AlignmentPreset::Default,
            read_prefix: "demultiplexed".to_string(),
            lock_wait: Duration::from_secs(600),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// A well's alignment file after [`AlignmentInvoker::ensure_aligned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellAlignment {
    /// Sorted, indexed BAM.
    pub bam: PathBuf,
    /// Whether the file already existed (no aligner call was made).
    pub cache_hit: bool,
}

/// Exclusive lock file removed on drop.
struct WellLock {
    path: PathBuf,
}

impl WellLock {
    fn try_acquire(path: &Path) -> Result<Option<Self>, AlignmentError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let lock = Self {
                    path: path.to_path_buf(),
                };
                writeln!(file, "{}", std::process::id()).map_err(|source| AlignmentError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(Some(lock))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(AlignmentError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// PID recorded in a lock file, if it can be read.
    fn holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Remove `path` if its recorded holder is no longer running.
    ///
    /// A lock without a readable PID may still be in the middle of being
    /// written, so it is never considered stale.
    fn remove_if_stale(path: &Path) -> bool {
        let Some(pid) = Self::holder(path) else {
            return false;
        };
        if process_alive(pid) || Self::holder(path) != Some(pid) {
            return false;
        }
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(lock = %path.display(), pid, "removed stale alignment lock");
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => {
                warn!(lock = %path.display(), error = %err, "cannot remove stale alignment lock");
                false
            }
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    if pid <= 0 {
        return true;
    }
    // SAFETY: signal 0 performs only the existence and permission checks.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for WellLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "failed to release alignment lock");
        }
    }
}

/// Ensures each well has a sorted, indexed alignment file, invoking the
/// external aligner only on a cache miss.
#[derive(Clone)]
pub struct AlignmentInvoker {
    aligner: Arc<dyn ExternalAligner>,
    settings: AlignmentSettings,
}

impl fmt::Debug for AlignmentInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignmentInvoker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AlignmentInvoker {
    /// Wrap an aligner.
    pub fn new(aligner: Arc<dyn ExternalAligner>, settings: AlignmentSettings) -> Self {
        Self { aligner, settings }
    }

    /// Settings in use.
    pub fn settings(&self) -> &AlignmentSettings {
        &self.settings
    }

    /// Fixed alignment file path for a well folder.
    pub fn alignment_path(&self, well_dir: &Path) -> PathBuf {
        well_dir.join(self.settings.preset.file_name())
    }

    fn lock_path(&self, well_dir: &Path) -> PathBuf {
        let mut name = self.alignment_path(well_dir).into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// State of a well as visible on disk.
    pub fn state(&self, well_dir: &Path) -> AlignmentState {
        if self.alignment_path(well_dir).exists() {
            AlignmentState::Aligned
        } else if self.lock_path(well_dir).exists() {
            AlignmentState::Aligning
        } else {
            AlignmentState::NotAligned
        }
    }

    /// Read files of a well, sorted by name.
    pub fn read_files(&self, well_dir: &Path) -> Result<Vec<PathBuf>, AlignmentError> {
        let io_err = |source| AlignmentError::Io {
            path: well_dir.to_path_buf(),
            source,
        };
        let mut reads = Vec::new();
        for entry in fs::read_dir(well_dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&self.settings.read_prefix)
                && (name.ends_with(".fastq") || name.ends_with(".fastq.gz"))
            {
                reads.push(path);
            }
        }
        reads.sort();
        Ok(reads)
    }

    /// Drive the well from its current state to [`AlignmentState::Aligned`].
    ///
    /// The existence check and the aligner call happen under an exclusive
    /// `<bam>.lock` file, so concurrent runs never align the same well twice.
    /// A lock held by someone else is waited on for at most
    /// [`AlignmentSettings::lock_wait`].
    pub fn ensure_aligned(
        &self,
        well_dir: &Path,
        reference_fasta: &Path,
    ) -> Result<WellAlignment, AlignmentError> {
        let bam = self.alignment_path(well_dir);
        let lock_path = self.lock_path(well_dir);
        let mut state = AlignmentState::NotAligned;
        let mut lock = None;
        let mut invoked = false;
        let mut failure = None;

        loop {
            let next = match state {
                AlignmentState::NotAligned => {
                    if bam.exists() {
                        AlignmentState::Aligned
                    } else if let Some(acquired) = WellLock::try_acquire(&lock_path)? {
                        lock = Some(acquired);
                        // another run may have finished between the check and the lock
                        if bam.exists() {
                            AlignmentState::Aligned
                        } else {
                            AlignmentState::Aligning
                        }
                    } else {
                        match self.wait_for_release(&lock_path) {
                            Ok(()) => AlignmentState::NotAligned,
                            Err(err) => {
                                failure = Some(err);
                                AlignmentState::Failed
                            }
                        }
                    }
                }
                AlignmentState::Aligning => {
                    invoked = true;
                    match self.invoke(well_dir, reference_fasta, &bam) {
                        Ok(()) => AlignmentState::Aligned,
                        Err(err) => {
                            failure = Some(err);
                            AlignmentState::Failed
                        }
                    }
                }
                AlignmentState::Aligned => {
                    drop(lock);
                    if invoked {
                        info!(bam = %bam.display(), "alignment written");
                    } else {
                        debug!(bam = %bam.display(), "alignment cache hit");
                    }
                    return Ok(WellAlignment {
                        bam,
                        cache_hit: !invoked,
                    });
                }
                AlignmentState::Failed => {
                    if lock.is_some() {
                        let _ = fs::remove_file(&bam);
                    }
                    drop(lock);
                    return Err(failure.unwrap_or(AlignmentError::Incomplete(bam)));
                }
            };
            debug!(from = %state, to = %next, well = %well_dir.display(), "alignment transition");
            state = next;
        }
    }

    fn invoke(&self, well_dir: &Path, reference_fasta: &Path, bam: &Path) -> Result<(), AlignmentError> {
        let reads = self.read_files(well_dir)?;
        if reads.is_empty() {
            return Err(AlignmentError::NoReads(well_dir.to_path_buf()));
        }
        let request = AlignmentRequest {
            reference_fasta,
            reads: &reads,
            output_bam: bam,
            scoring: self.settings.preset.scoring(self.settings.scoring),
        };
        self.aligner.align(&request)?;
        if !bam.exists() {
            return Err(AlignmentError::Incomplete(bam.to_path_buf()));
        }
        Ok(())
    }

    fn wait_for_release(&self, lock_path: &Path) -> Result<(), AlignmentError> {
        let started = Instant::now();
        debug!(lock = %lock_path.display(), "waiting for alignment lock");
        while lock_path.exists() {
            if WellLock::remove_if_stale(lock_path) {
                return Ok(());
            }
            if started.elapsed() >= self.settings.lock_wait {
                return Err(AlignmentError::LockTimeout {
                    lock: lock_path.to_path_buf(),
                    waited: self.settings.lock_wait,
                });
            }
            thread::sleep(self.settings.poll_interval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TouchAligner {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ExternalAligner for TouchAligner {
        fn align(&self, request: &AlignmentRequest<'_>) -> Result<(), AlignmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AlignmentError::ToolFailed {
                    tool: "touch".into(),
                    status: Some(2),
                    stderr: String::new(),
                });
            }
            fs::write(request.output_bam, b"bam").map_err(|source| AlignmentError::Io {
                path: request.output_bam.to_path_buf(),
                source,
            })
        }
    }

    fn well_with_reads() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("demultiplexed_1.fastq"), b"@r\nA\n+\nI\n").unwrap();
        fs::write(dir.path().join("demultiplexed_0.fastq.gz"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        dir
    }

    fn invoker(aligner: Arc<TouchAligner>) -> AlignmentInvoker {
        let settings = AlignmentSettings {
            lock_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            ..AlignmentSettings::default()
        };
        AlignmentInvoker::new(aligner, settings)
    }

    #[test]
    fn second_call_is_a_cache_hit() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner::default());
        let invoker = invoker(aligner.clone());
        assert_eq!(invoker.state(well.path()), AlignmentState::NotAligned);

        let first = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.bam, well.path().join("alignment_minimap.bam"));
        let second = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap();
        assert!(second.cache_hit);

        assert_eq!(aligner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(invoker.state(well.path()), AlignmentState::Aligned);
        assert!(!invoker.lock_path(well.path()).exists());
    }

    #[test]
    fn read_files_match_prefix_and_extension() {
        let well = well_with_reads();
        let invoker = invoker(Arc::new(TouchAligner::default()));
        let names: Vec<_> = invoker
            .read_files(well.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["demultiplexed_0.fastq.gz", "demultiplexed_1.fastq"]);
    }

    #[test]
    fn aligner_failure_releases_lock() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner {
            fail: true,
            ..TouchAligner::default()
        });
        let invoker = invoker(aligner);
        let err = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap_err();
        assert!(matches!(err, AlignmentError::ToolFailed { .. }));
        assert_eq!(invoker.state(well.path()), AlignmentState::NotAligned);
    }

    #[test]
    fn empty_well_reports_no_reads() {
        let well = tempfile::tempdir().unwrap();
        let aligner = Arc::new(TouchAligner::default());
        let err = invoker(aligner.clone())
            .ensure_aligned(well.path(), Path::new("ref.fasta"))
            .unwrap_err();
        assert!(matches!(err, AlignmentError::NoReads(_)));
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn foreign_lock_times_out() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner::default());
        let invoker = invoker(aligner.clone());
        fs::write(invoker.lock_path(well.path()), std::process::id().to_string()).unwrap();
        assert_eq!(invoker.state(well.path()), AlignmentState::Aligning);

        let err = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap_err();
        assert!(matches!(err, AlignmentError::LockTimeout { .. }));
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[test]
    fn lock_of_a_dead_process_is_reclaimed() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner::default());
        let invoker = invoker(aligner.clone());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(invoker.lock_path(well.path()), format!("{dead_pid}\n")).unwrap();

        let aligned = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap();
        assert!(!aligned.cache_hit);
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 1);
        assert!(!invoker.lock_path(well.path()).exists());
    }

    #[test]
    fn unreadable_lock_is_not_reclaimed() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner::default());
        let invoker = invoker(aligner.clone());
        fs::write(invoker.lock_path(well.path()), b"").unwrap();

        let err = invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap_err();
        assert!(matches!(err, AlignmentError::LockTimeout { .. }));
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_callers_align_once() {
        let well = well_with_reads();
        let aligner = Arc::new(TouchAligner::default());
        let invoker = invoker(aligner.clone());
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| invoker.ensure_aligned(well.path(), Path::new("ref.fasta")).unwrap());
            }
        });
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn site_saturation_uses_its_own_file() {
        let settings = AlignmentSettings {
            preset: AlignmentPreset::SiteSaturation,
            ..AlignmentSettings::default()
        };
        let invoker = AlignmentInvoker::new(Arc::new(TouchAligner::default()), settings);
        assert_eq!(
            invoker.alignment_path(Path::new("w")),
            PathBuf::from("w/alignment_minimap_site_saturation.bam")
        );
    }
}
