//! Plate topology: barcode folders to well identities, and the per-plate
//! reference table.

mod identity;
mod reference_table;
mod topology;

pub use identity::{BarcodePair, WellIdentity, COLUMNS, ROW_LETTERS, WELLS_PER_PLATE};
pub use reference_table::{PlateReference, ReferenceTable, ReferenceTableError};
pub use topology::{
    barcode_number, resolve_topology, PlateLayout, PlateTopology, RejectedPlate, TopologyError,
    TopologySettings, WellSlot,
};
