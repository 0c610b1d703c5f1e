use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::alignment::{AlignmentError, AlignmentRequest, ExternalAligner};

/// Long-gap open penalty passed as the second `-O` value.
pub const LONG_GAP_OPEN: u32 = 24;

/// `minimap2 -ax map-ont` piped through `samtools sort` and `samtools index`.
#[derive(Debug, Clone)]
pub struct Minimap2Samtools {
    minimap2: PathBuf,
    samtools: PathBuf,
}

impl Default for Minimap2Samtools {
    fn default() -> Self {
        Self::new("minimap2", "samtools")
    }
}

impl Minimap2Samtools {
    /// Use the given executables (bare names are resolved through `PATH`).
    pub fn new(minimap2: impl Into<PathBuf>, samtools: impl Into<PathBuf>) -> Self {
        Self {
            minimap2: minimap2.into(),
            samtools: samtools.into(),
        }
    }

    fn minimap2_command(&self, request: &AlignmentRequest<'_>, sam: &Path) -> Command {
        let scoring = request.scoring;
        let mut command = Command::new(&self.minimap2);
        command
            .args(["-ax", "map-ont"])
            .arg("-A")
            .arg(scoring.match_score.to_string())
            .arg("-B")
            .arg(scoring.mismatch_penalty.to_string())
            .arg("-O")
            .arg(format!("{},{}", scoring.gap_open, LONG_GAP_OPEN))
            .arg("-o")
            .arg(sam)
            .arg(request.reference_fasta)
            .args(request.reads);
        command
    }
}

impl ExternalAligner for Minimap2Samtools {
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<(), AlignmentError> {
        let output = request.output_bam;
        let sam = output.with_extension("sam");
        let sorted = output.with_extension("sorted.bam");
        let sorted_index = index_path(&sorted);

        let result = (|| {
            run(self.minimap2_command(request, &sam))?;

            let mut sort = Command::new(&self.samtools);
            sort.arg("sort").arg("-o").arg(&sorted).arg(&sam);
            run(sort)?;

            let mut index = Command::new(&self.samtools);
            index.arg("index").arg(&sorted);
            run(index)?;

            // index first so a visible BAM always has its index
            rename(&sorted_index, &index_path(output))?;
            rename(&sorted, output)
        })();

        for leftover in [&sam, &sorted, &sorted_index] {
            let _ = fs::remove_file(leftover);
        }
        result
    }
}

/// `<bam>.bai`
pub fn index_path(bam: &Path) -> PathBuf {
    let mut name = bam.as_os_str().to_os_string();
    name.push(".bai");
    PathBuf::from(name)
}

fn rename(from: &Path, to: &Path) -> Result<(), AlignmentError> {
    fs::rename(from, to).map_err(|source| AlignmentError::Io {
        path: to.to_path_buf(),
        source,
    })
}

fn tool_name(command: &Command) -> String {
    Path::new(command.get_program())
        .file_name()
        .unwrap_or_else(|| OsStr::new("?"))
        .to_string_lossy()
        .into_owned()
}

fn run(mut command: Command) -> Result<(), AlignmentError> {
    let tool = tool_name(&command);
    debug!(?command, "invoking external tool");
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| AlignmentError::Spawn {
            tool: tool.clone(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    Err(AlignmentError::ToolFailed {
        tool,
        status: output.status.code(),
        stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
    })
}
