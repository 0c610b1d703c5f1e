use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plate::{BarcodePair, ReferenceTable, WellIdentity, WELLS_PER_PLATE};

/// Errors raised while mapping barcode folders onto plates and wells.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// No directory under the root carries the reverse prefix.
    #[error("no folders starting with {prefix:?} under {root}")]
    NoReverseFolders {
        /// Demultiplexed root.
        root: PathBuf,
        /// Expected reverse prefix.
        prefix: String,
    },
    /// No reverse folder holds a folder with the forward prefix.
    #[error("no folders starting with {prefix:?} inside any reverse barcode folder under {root}")]
    NoForwardFolders {
        /// Demultiplexed root.
        root: PathBuf,
        /// Expected forward prefix.
        prefix: String,
    },
    /// Every plate was rejected during resolution.
    #[error("no plate under {0} could be resolved")]
    NoUsablePlates(PathBuf),
    /// A folder name does not end in a barcode number.
    #[error("cannot parse a barcode number from folder {0}")]
    UnparsableBarcode(PathBuf),
    /// A forward barcode number does not address a well.
    #[error("forward barcode {number} in {folder} is outside 1..={max}", max = WELLS_PER_PLATE)]
    BarcodeOutOfRange {
        /// Offending folder.
        folder: PathBuf,
        /// Parsed number.
        number: u32,
    },
    /// Two folders resolve to the same plate or well.
    #[error("folder {folder} duplicates barcode {number}")]
    DuplicateBarcode {
        /// Offending folder.
        folder: PathBuf,
        /// Duplicated number.
        number: u32,
    },
    /// Directory listing failed.
    #[error("cannot list {path}: {source}")]
    Io {
        /// Directory being listed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl TopologyError {
    /// Whether the error invalidates the whole resolution rather than one plate.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TopologyError::NoReverseFolders { .. }
                | TopologyError::NoForwardFolders { .. }
                | TopologyError::NoUsablePlates(_)
        )
    }
}

/// Folder naming conventions of the demultiplexed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySettings {
    /// Prefix of reverse (plate) barcode folders.
    pub reverse_prefix: String,
    /// Prefix of forward (well) barcode folders.
    pub forward_prefix: String,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            reverse_prefix: "RB".to_string(),
            forward_prefix: "NB".to_string(),
        }
    }
}

/// One expected well of a plate, with its read folder if demultiplexing produced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellSlot {
    /// Well key.
    pub identity: WellIdentity,
    /// Barcodes addressing the well.
    pub barcodes: BarcodePair,
    /// Plate name from the reference table, if the plate is registered.
    pub plate_name: Option<Arc<str>>,
    /// Folder holding the well's reads; `None` when no folder exists.
    pub path: Option<PathBuf>,
}

/// A resolved plate: all 96 wells in row-major order.
#[derive(Debug, Clone)]
pub struct PlateLayout {
    /// Reverse barcode number.
    pub barcode: u32,
    /// Plate name from the reference table.
    pub name: Option<Arc<str>>,
    /// Reverse barcode folder.
    pub path: PathBuf,
    /// Full well template.
    pub wells: Vec<WellSlot>,
}

impl PlateLayout {
    /// Wells backed by a read folder.
    pub fn populated(&self) -> usize {
        self.wells.iter().filter(|w| w.path.is_some()).count()
    }
}

/// A reverse barcode folder that could not be resolved.
#[derive(Debug)]
pub struct RejectedPlate {
    /// Reverse barcode folder.
    pub path: PathBuf,
    /// Why it was rejected.
    pub error: TopologyError,
}

/// Plates discovered under a demultiplexed root, ordered by barcode.
#[derive(Debug, Default)]
pub struct PlateTopology {
    /// Resolved plates.
    pub plates: Vec<PlateLayout>,
    /// Plates skipped because of input-format problems.
    pub rejected: Vec<RejectedPlate>,
}

impl PlateTopology {
    /// All expected wells, plate by plate.
    pub fn wells(&self) -> impl Iterator<Item = &WellSlot> {
        self.plates.iter().flat_map(|plate| plate.wells.iter())
    }

    /// Number of expected wells across all plates.
    pub fn well_count(&self) -> usize {
        self.plates.iter().map(|plate| plate.wells.len()).sum()
    }
}

/// Barcode number carried by a folder name after its prefix, e.g. `RB03` → 3.
pub fn barcode_number(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn prefixed_dirs(dir: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, TopologyError> {
    let io_err = |source| TopologyError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            found.push((name, entry.path()));
        }
    }
    found.sort();
    Ok(found)
}

/// Map the reverse/forward barcode folders under `root` onto plates and wells.
///
/// Missing reverse folders, or forward folders missing from every reverse
/// folder, fail the whole resolution. A folder whose barcode cannot be parsed
/// rejects only its plate. Plates absent from `table` resolve with no name.
pub fn resolve_topology(
    root: &Path,
    settings: &TopologySettings,
    table: &ReferenceTable,
) -> Result<PlateTopology, TopologyError> {
    let reverse = prefixed_dirs(root, &settings.reverse_prefix)?;
    if reverse.is_empty() {
        return Err(TopologyError::NoReverseFolders {
            root: root.to_path_buf(),
            prefix: settings.reverse_prefix.clone(),
        });
    }

    let mut listings = Vec::with_capacity(reverse.len());
    for (name, path) in reverse {
        let forward = prefixed_dirs(&path, &settings.forward_prefix)?;
        listings.push((name, path, forward));
    }
    if listings.iter().all(|(_, _, forward)| forward.is_empty()) {
        return Err(TopologyError::NoForwardFolders {
            root: root.to_path_buf(),
            prefix: settings.forward_prefix.clone(),
        });
    }

    let mut plates: BTreeMap<u32, PlateLayout> = BTreeMap::new();
    let mut topology = PlateTopology::default();
    for (name, path, forward) in listings {
        match resolve_plate(&name, &path, forward, settings, table) {
            Ok(plate) if plates.contains_key(&plate.barcode) => {
                let error = TopologyError::DuplicateBarcode {
                    folder: path.clone(),
                    number: plate.barcode,
                };
                warn!(%error, "rejecting plate");
                topology.rejected.push(RejectedPlate { path, error });
            }
            Ok(plate) => {
                debug!(
                    plate = plate.barcode,
                    name = plate.name.as_deref().unwrap_or(""),
                    populated = plate.populated(),
                    "resolved plate"
                );
                plates.insert(plate.barcode, plate);
            }
            Err(error) => {
                warn!(%error, "rejecting plate");
                topology.rejected.push(RejectedPlate { path, error });
            }
        }
    }

    if plates.is_empty() {
        return Err(TopologyError::NoUsablePlates(root.to_path_buf()));
    }
    topology.plates = plates.into_values().collect();
    info!(
        plates = topology.plates.len(),
        rejected = topology.rejected.len(),
        wells = topology.well_count(),
        "plate topology resolved"
    );
    Ok(topology)
}

fn resolve_plate(
    name: &str,
    path: &Path,
    forward: Vec<(String, PathBuf)>,
    settings: &TopologySettings,
    table: &ReferenceTable,
) -> Result<PlateLayout, TopologyError> {
    let barcode = barcode_number(name, &settings.reverse_prefix)
        .ok_or_else(|| TopologyError::UnparsableBarcode(path.to_path_buf()))?;
    let plate_name: Option<Arc<str>> = table.get(barcode).map(|entry| Arc::from(entry.name.as_str()));
    if plate_name.is_none() {
        warn!(plate = barcode, "plate barcode missing from the reference table");
    }

    let mut folders: Vec<Option<PathBuf>> = vec![None; WELLS_PER_PLATE];
    for (well_name, well_path) in forward {
        let number = barcode_number(&well_name, &settings.forward_prefix)
            .ok_or_else(|| TopologyError::UnparsableBarcode(well_path.clone()))?;
        let identity = WellIdentity::from_barcode(barcode, number).ok_or_else(|| {
            TopologyError::BarcodeOutOfRange {
                folder: well_path.clone(),
                number,
            }
        })?;
        let slot = &mut folders[identity.slot()];
        if slot.is_some() {
            return Err(TopologyError::DuplicateBarcode {
                folder: well_path,
                number,
            });
        }
        *slot = Some(well_path);
    }

    let wells = WellIdentity::plate_template(barcode)
        .zip(folders)
        .map(|(identity, path)| WellSlot {
            identity,
            barcodes: BarcodePair {
                reverse: barcode,
                forward: identity.barcode_number(),
            },
            plate_name: plate_name.clone(),
            path,
        })
        .collect();

    Ok(PlateLayout {
        barcode,
        name: plate_name,
        path: path.to_path_buf(),
        wells,
    })
}
