use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, info_span, warn};

use crate::context::RunContext;
use crate::experiment::table::load_resumable;
use crate::experiment::{CancellationToken, ExperimentVariantTable};
use crate::genomics::io::{count_alignments, read_alignments, write_pileup_fasta, write_position_counts};
use crate::genomics::{PositionCall, WellPileup};
use crate::plate::{WellIdentity, WellSlot};
use crate::util::write_atomically;
use crate::well::{aggregate, WellVariantRecord};
use crate::CallerError;

/// Raw per-position counts written into each called well folder.
pub const POSITION_COUNTS_FILE: &str = "position_counts.csv";
/// Reference plus contributing reads, written into each called well folder.
pub const PILEUP_FASTA_FILE: &str = "pileup.fa";

/// Split `len` slots into at most `workers` contiguous, near-equal shards.
pub fn shard_ranges(len: usize, workers: usize) -> Vec<std::ops::Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let shards = workers.clamp(1, len);
    let base = len / shards;
    let extra = len % shards;
    let mut start = 0;
    (0..shards)
        .map(|idx| {
            let size = base + usize::from(idx < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Call every well of the run and write `<output>/variants.csv`.
///
/// Wells are split into one contiguous shard per worker; each worker walks its
/// shard in order, checking `cancel` before every well. Configuration and
/// run-level filesystem failures stop the run; every other failure becomes a sentinel
/// row for the affected well, so the table always has one row per expected well.
pub fn run_experiment(
    context: &RunContext,
    cancel: &CancellationToken,
) -> Result<ExperimentVariantTable, CallerError> {
    let config = context.config();
    let started = Instant::now();
    let slots: Vec<&WellSlot> = context.topology().wells().collect();

    let table_path = config.table_path();
    let previous = if config.resume && table_path.exists() {
        load_resumable(&table_path)
    } else {
        HashMap::new()
    };

    let shards = shard_ranges(slots.len(), config.workers);
    let results: Vec<OnceLock<WellVariantRecord>> = (0..slots.len()).map(|_| OnceLock::new()).collect();
    let abort = CancellationToken::new();
    let fatal: Mutex<Option<CallerError>> = Mutex::new(None);

    info!(
        wells = slots.len(),
        shards = shards.len(),
        reused = previous.len(),
        "calling experiment"
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(shards.len().max(1))
        .thread_name(|idx| format!("platecall-worker-{idx}"))
        .build()
        .map_err(|err| CallerError::Configuration(format!("cannot start worker pool: {err}")))?;

    pool.install(|| {
        shards.par_iter().enumerate().for_each(|(shard, range)| {
            debug!(shard, wells = range.len(), "shard started");
            for idx in range.clone() {
                if cancel.is_cancelled() || abort.is_cancelled() {
                    debug!(shard, "shard stopped early");
                    return;
                }
                match call_well(context, slots[idx], &previous) {
                    Ok(record) => {
                        let _ = results[idx].set(record);
                    }
                    Err(err) => {
                        error!(well = %slots[idx].identity, error = %err, "aborting run");
                        abort.cancel();
                        if let Ok(mut slot) = fatal.lock() {
                            slot.get_or_insert(err);
                        }
                        return;
                    }
                }
            }
        });
    });

    if let Some(err) = fatal.into_inner().ok().flatten() {
        return Err(err);
    }
    if cancel.is_cancelled() {
        warn!("run cancelled");
        return Err(CallerError::Cancelled);
    }

    let records = results
        .into_iter()
        .zip(&slots)
        .map(|(cell, slot)| {
            cell.into_inner()
                .unwrap_or_else(|| WellVariantRecord::failed(slot.identity, slot.plate_name.clone(), 0))
        })
        .collect();
    let table = ExperimentVariantTable::new(records);
    table.save(&table_path)?;

    let (called, parent, insufficient, failed) = table.label_counts();
    info!(
        wells = table.len(),
        called,
        parent,
        insufficient,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        table = %table_path.display(),
        "experiment complete"
    );
    Ok(table)
}

/// Process one well, turning well-scoped errors into sentinel records.
///
/// Only errors that abort the run are returned. Sentinel rows keep the
/// alignment count when it was read before the failure.
fn call_well(
    context: &RunContext,
    slot: &WellSlot,
    previous: &HashMap<WellIdentity, WellVariantRecord>,
) -> Result<WellVariantRecord, CallerError> {
    let span = info_span!("well", plate = slot.identity.plate(), well = %slot.identity.well_name());
    let _enter = span.enter();

    let mut record = match previous.get(&slot.identity) {
        Some(record) => {
            debug!(label = %record.label, "reusing previous call");
            WellVariantRecord {
                plate_name: slot.plate_name.clone(),
                ..record.clone()
            }
        }
        None => {
            let mut alignment_count = 0;
            match call_counted(context, slot, &mut alignment_count).map_err(CallerError::within_well) {
                Ok(record) => {
                    debug!(label = %record.label, alignment_count, "well called");
                    record
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(CallerError::Coverage(reason)) => {
                    debug!(%reason, "insufficient data");
                    WellVariantRecord::insufficient(slot.identity, slot.plate_name.clone(), alignment_count)
                }
                Err(err) => {
                    warn!(error = %err, alignment_count, "well failed");
                    WellVariantRecord::failed(slot.identity, slot.plate_name.clone(), alignment_count)
                }
            }
        }
    };

    if let Some(prepared) = context.reference_for(slot.identity.plate()) {
        record.attach_protein(&prepared.reference.sequence);
    }
    Ok(record)
}

/// Align, pile up, call and aggregate one well.
///
/// Filesystem failures inside the well folder come back as
/// [`CallerError::WellIo`]; the protein columns are left empty.
pub fn process_well(context: &RunContext, slot: &WellSlot) -> Result<WellVariantRecord, CallerError> {
    let mut alignment_count = 0;
    call_counted(context, slot, &mut alignment_count).map_err(CallerError::within_well)
}

fn call_counted(
    context: &RunContext,
    slot: &WellSlot,
    alignment_count: &mut u64,
) -> Result<WellVariantRecord, CallerError> {
    let Some(well_dir) = slot.path.as_deref() else {
        return Err(CallerError::Coverage("no read folder for this well".to_string()));
    };
    let Some(prepared) = context.reference_for(slot.identity.plate()) else {
        return Err(CallerError::InputFormat(format!(
            "no reference registered for plate {}",
            slot.identity.plate()
        )));
    };

    let alignment = context.invoker().ensure_aligned(well_dir, &prepared.fasta)?;
    *alignment_count = count_alignments(&alignment.bam)?;
    let params = context.aggregation();
    if *alignment_count < params.min_depth {
        return Ok(aggregate(slot.identity, slot.plate_name.clone(), &[], *alignment_count, params)?);
    }

    let reads = read_alignments(&alignment.bam)?;
    let pileup = WellPileup::build(reads, &prepared.reference);
    if pileup.skipped() > 0 {
        warn!(skipped = pileup.skipped(), "records dropped from pileup");
    }
    let calls = context.caller().call(&pileup)?;
    if context.config().write_artifacts {
        write_artifacts(well_dir, &pileup, &calls)?;
    }
    Ok(aggregate(
        slot.identity,
        slot.plate_name.clone(),
        &calls,
        *alignment_count,
        params,
    )?)
}

fn write_artifacts(well_dir: &Path, pileup: &WellPileup, calls: &[PositionCall]) -> Result<(), CallerError> {
    let counts_path = well_dir.join(POSITION_COUNTS_FILE);
    write_atomically(&counts_path, |w| {
        write_position_counts(w, calls).map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    })
    .map_err(|err| CallerError::io(&counts_path, err))?;

    let fasta_path = well_dir.join(PILEUP_FASTA_FILE);
    write_atomically(&fasta_path, |w| write_pileup_fasta(w, pileup))
        .map_err(|err| CallerError::io(&fasta_path, err))
}
