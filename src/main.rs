use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use platecall::genomics::io::{count_alignments, read_alignments, read_reference_fasta};
use platecall::genomics::{CallerParams, PositionCall, PositionCaller, WellPileup};
use platecall::{run_experiment, AlignmentPreset, CancellationToken, RunConfig, RunContext, ScoringScheme};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "platecall", about = "Per-well variant calling for barcoded microplate sequencing runs")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call every well under a demultiplexed root and write the experiment table.
    Call {
        /// Demultiplexed root holding reverse barcode folders.
        root: PathBuf,
        /// Output directory for variants.csv and prepared references.
        #[arg(long, short)]
        output: PathBuf,
        /// CSV with barcode_plate,name,refseq.
        #[arg(long)]
        references: Option<PathBuf>,
        /// Experiment-wide reference FASTA.
        #[arg(long)]
        reference_fasta: Option<PathBuf>,
        /// Reverse barcode folder prefix.
        #[arg(long, default_value = "RB")]
        reverse_prefix: String,
        /// Forward barcode folder prefix.
        #[arg(long, default_value = "NB")]
        forward_prefix: String,
        /// Read file prefix inside each well folder.
        #[arg(long, default_value = "demultiplexed")]
        read_prefix: String,
        /// Alternate fraction that must be exceeded to call.
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,
        /// Minimum alignment records per well.
        #[arg(long, default_value_t = 5)]
        min_depth: u64,
        /// Minimum covering reads per position.
        #[arg(long, default_value_t = 5)]
        min_coverage: u32,
        /// Null probability of the binomial test.
        #[arg(long, default_value_t = 0.1)]
        background_error_rate: f64,
        /// Worker threads.
        #[arg(long, short = 'j', default_value_t = 10)]
        workers: usize,
        /// minimap2 match, mismatch and gap-open scores.
        #[arg(long, num_args = 3, value_names = ["MATCH", "MISMATCH", "GAP_OPEN"], default_values_t = [4, 2, 10])]
        scores: Vec<u32>,
        /// Use the site-saturation alignment preset.
        #[arg(long)]
        site_saturation: bool,
        /// Reference positions excluded at the start.
        #[arg(long, default_value_t = 0)]
        padding_start: usize,
        /// Reference positions excluded at the end.
        #[arg(long, default_value_t = 0)]
        padding_end: usize,
        /// Recompute every well even if variants.csv exists.
        #[arg(long)]
        no_resume: bool,
        /// Skip per-well position_counts.csv and pileup.fa.
        #[arg(long)]
        no_artifacts: bool,
        /// minimap2 executable.
        #[arg(long, default_value = "minimap2")]
        minimap2: PathBuf,
        /// samtools executable.
        #[arg(long, default_value = "samtools")]
        samtools: PathBuf,
        /// Seconds to wait on another run's alignment lock.
        #[arg(long, default_value_t = 600)]
        lock_wait: u64,
    },
    /// Call positions of a single aligned well and print them.
    Well {
        /// Sorted BAM of the well.
        bam: PathBuf,
        /// Reference FASTA the reads were aligned to.
        reference: PathBuf,
        /// Alternate fraction that must be exceeded to call.
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,
        /// Minimum covering reads per position.
        #[arg(long, default_value_t = 5)]
        min_coverage: u32,
        /// Print every evaluated position, not only called ones.
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Call {
            root,
            output,
            references,
            reference_fasta,
            reverse_prefix,
            forward_prefix,
            read_prefix,
            threshold,
            min_depth,
            min_coverage,
            background_error_rate,
            workers,
            scores,
            site_saturation,
            padding_start,
            padding_end,
            no_resume,
            no_artifacts,
            minimap2,
            samtools,
            lock_wait,
        } => {
            let &[match_score, mismatch_penalty, gap_open] = scores.as_slice() else {
                bail!("--scores takes exactly three values");
            };
            let mut config = RunConfig::new(root, output)
                .with_prefixes(reverse_prefix, forward_prefix)
                .with_read_prefix(read_prefix)
                .with_threshold(threshold)
                .with_min_depth(min_depth)
                .with_min_coverage(min_coverage)
                .with_background_error_rate(background_error_rate)
                .with_workers(workers)
                .with_scoring(ScoringScheme {
                    match_score,
                    mismatch_penalty,
                    gap_open,
                })
                .with_padding(padding_start, padding_end)
                .with_resume(!no_resume)
                .with_artifacts(!no_artifacts)
                .with_executables(minimap2, samtools)
                .with_lock_wait(Duration::from_secs(lock_wait));
            if site_saturation {
                config = config.with_preset(AlignmentPreset::SiteSaturation);
            }
            if let Some(path) = references {
                config = config.with_reference_table(path);
            }
            if let Some(path) = reference_fasta {
                config = config.with_reference_fasta(path);
            }
            run_call(config)?
        }
        Commands::Well {
            bam,
            reference,
            threshold,
            min_coverage,
            all,
        } => run_well(bam, reference, threshold, min_coverage, all)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_call(config: RunConfig) -> Result<()> {
    let table_path = config.table_path();
    let context = RunContext::new(config).context("failed to prepare the run")?;
    let table = run_experiment(&context, &CancellationToken::new()).context("experiment failed")?;
    let (called, parent, insufficient, failed) = table.label_counts();
    println!(
        "{} wells: {} called, {} parent, {} insufficient, {} failed -> {}",
        table.len(),
        called,
        parent,
        insufficient,
        failed,
        table_path.display()
    );
    Ok(())
}

fn run_well(bam: PathBuf, reference_path: PathBuf, threshold: f64, min_coverage: u32, all: bool) -> Result<()> {
    let reference = read_reference_fasta(&reference_path)
        .with_context(|| format!("failed to read reference from {}", reference_path.display()))?;
    let count = count_alignments(&bam).with_context(|| format!("failed to read {}", bam.display()))?;
    let reads = read_alignments(&bam).with_context(|| format!("failed to read {}", bam.display()))?;

    let caller = PositionCaller::new(CallerParams {
        threshold,
        min_coverage,
        ..CallerParams::default()
    })
    .context("invalid caller parameters")?;
    let pileup = WellPileup::build(reads, &reference);
    let calls = caller.call(&pileup).context("position calling failed")?;

    println!("{} alignments, {} distinct reads", count, pileup.len());
    let shown: Vec<&PositionCall> = calls.iter().filter(|c| all || c.is_variant()).collect();
    if shown.is_empty() {
        println!("No variants detected above threshold.");
    }
    for call in shown {
        print_call(call);
    }
    Ok(())
}

fn print_call(call: &PositionCall) {
    println!(
        "{}\t{}\t{}\tfraction={:.3}\tdepth={}\tp={}\t{}",
        call.position + 1,
        call.reference as char,
        call.candidate.map(|s| s.label()).unwrap_or("."),
        call.fraction,
        call.depth,
        call.p_value.map(|p| format!("{p:.3e}")).unwrap_or_else(|| ".".to_string()),
        call.context
    );
}
