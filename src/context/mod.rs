//! Per-run configuration and the context shared by every component.
//!
//! A [`RunContext`] is built once before any worker starts: it loads and
//! validates references, resolves the plate topology and prepares the
//! aligner. Workers only ever read it.

mod config;

pub use config::RunConfig;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::alignment::{AlignmentInvoker, ExternalAligner, Minimap2Samtools};
use crate::genomics::io::{read_reference_fasta, write_reference_fasta};
use crate::genomics::{PositionCaller, Reference};
use crate::plate::{resolve_topology, PlateTopology, ReferenceTable};
use crate::util::{file_stem, write_atomically};
use crate::well::AggregationParams;
use crate::CallerError;

/// A reference together with the FASTA the aligner reads it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedReference {
    /// Validated, upper-cased sequence.
    pub reference: Reference,
    /// FASTA under the output's `references/` directory.
    pub fasta: PathBuf,
}

/// Read-only state of one run.
pub struct RunContext {
    config: RunConfig,
    topology: PlateTopology,
    plate_references: BTreeMap<u32, Arc<PreparedReference>>,
    fallback_reference: Option<Arc<PreparedReference>>,
    invoker: AlignmentInvoker,
    caller: PositionCaller,
    aggregation: AggregationParams,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .field("plates", &self.topology.plates.len())
            .field("references", &self.plate_references.len())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Build a context that aligns with minimap2 and samtools.
    pub fn new(config: RunConfig) -> Result<Self, CallerError> {
        let aligner = Arc::new(Minimap2Samtools::new(&config.minimap2, &config.samtools));
        Self::with_aligner(config, aligner)
    }

    /// Build a context around a custom aligner.
    pub fn with_aligner(config: RunConfig, aligner: Arc<dyn ExternalAligner>) -> Result<Self, CallerError> {
        config.validate()?;
        let caller = PositionCaller::new(config.caller_params())?;

        let table = match &config.reference_table {
            Some(path) => ReferenceTable::from_path(path)?,
            None => ReferenceTable::default(),
        };
        let fallback = match &config.reference_fasta {
            Some(path) => {
                let reference = read_reference_fasta(path)?;
                if let Some((offset, base)) = reference.first_invalid_base() {
                    return Err(CallerError::Configuration(format!(
                        "reference {} has invalid base {:?} at position {}",
                        path.display(),
                        base as char,
                        offset + 1
                    )));
                }
                Some(reference)
            }
            None => None,
        };

        let topology = resolve_topology(&config.demultiplexed_root, &config.topology, &table)?;

        let references_dir = config.references_dir();
        let mut plate_references = BTreeMap::new();
        for entry in table.iter() {
            let prepared = prepare_reference(&references_dir, &entry.barcode_plate.to_string(), &entry.reference)?;
            plate_references.insert(entry.barcode_plate, Arc::new(prepared));
        }
        let fallback_reference = match fallback {
            Some(reference) => Some(Arc::new(prepare_reference(&references_dir, "fallback", &reference)?)),
            None => None,
        };
        for plate in &topology.plates {
            if !plate_references.contains_key(&plate.barcode) && fallback_reference.is_none() {
                warn!(plate = plate.barcode, "no reference for plate; its wells will fail");
            }
        }

        info!(
            plates = topology.plates.len(),
            wells = topology.well_count(),
            references = plate_references.len() + fallback_reference.iter().count(),
            workers = config.workers,
            "run context ready"
        );

        Ok(Self {
            invoker: AlignmentInvoker::new(aligner, config.alignment_settings()),
            aggregation: config.aggregation_params(),
            config,
            topology,
            plate_references,
            fallback_reference,
            caller,
        })
    }

    /// Settings of the run.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Resolved plates and wells.
    pub fn topology(&self) -> &PlateTopology {
        &self.topology
    }

    /// Reference for a plate: its table entry, else the experiment-wide FASTA.
    pub fn reference_for(&self, plate: u32) -> Option<&PreparedReference> {
        self.plate_references
            .get(&plate)
            .or(self.fallback_reference.as_ref())
            .map(Arc::as_ref)
    }

    /// Alignment invoker shared by all workers.
    pub fn invoker(&self) -> &AlignmentInvoker {
        &self.invoker
    }

    /// Position caller shared by all workers.
    pub fn caller(&self) -> &PositionCaller {
        &self.caller
    }

    /// Well aggregation thresholds.
    pub fn aggregation(&self) -> &AggregationParams {
        &self.aggregation
    }
}

/// Materialize `reference` as `<dir>/<owner>_<name>.fasta`; `owner` keeps
/// plates that share a sequence name apart.
fn prepare_reference(dir: &Path, owner: &str, reference: &Reference) -> Result<PreparedReference, CallerError> {
    let fasta = dir.join(format!("{owner}_{}.fasta", file_stem(&reference.name)));
    write_atomically(&fasta, |w| write_reference_fasta(w, reference))
        .map_err(|err| CallerError::io(&fasta, err))?;
    Ok(PreparedReference {
        reference: reference.clone(),
        fasta,
    })
}
