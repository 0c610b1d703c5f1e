use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::plate::WellIdentity;
use crate::util::write_atomically;
use crate::well::{VariantLabel, WellVariantRecord};
use crate::CallerError;

/// Column order of the experiment table.
pub const TABLE_COLUMNS: [&str; 12] = [
    "plate",
    "well",
    "barcode_id",
    "variant_label",
    "average_mutation_frequency",
    "p_value",
    "adjusted_p_value",
    "alignment_count",
    "mixed_well",
    "mutations",
    "nc_variant",
    "aa_variant",
];

#[derive(Debug, Serialize, Deserialize)]
struct TableRow {
    plate: Option<String>,
    well: String,
    barcode_id: u32,
    variant_label: String,
    average_mutation_frequency: Option<f64>,
    p_value: Option<f64>,
    adjusted_p_value: Option<f64>,
    alignment_count: u64,
    mixed_well: bool,
    #[serde(default)]
    mutations: Option<String>,
    #[serde(default)]
    nc_variant: Option<String>,
    #[serde(default)]
    aa_variant: Option<String>,
}

impl From<&WellVariantRecord> for TableRow {
    fn from(record: &WellVariantRecord) -> Self {
        Self {
            plate: record.plate_name.as_deref().map(str::to_string),
            well: record.identity.well_name(),
            barcode_id: record.identity.plate(),
            variant_label: record.label.to_string(),
            average_mutation_frequency: record.average_frequency,
            p_value: record.p_value,
            adjusted_p_value: record.adjusted_p_value,
            alignment_count: record.alignment_count,
            mixed_well: record.mixed_well,
            mutations: record.protein.as_ref().map(|p| p.mutations.to_string()),
            nc_variant: record.protein.as_ref().map(|p| p.nc_variant.clone()),
            aa_variant: record.protein.as_ref().map(|p| p.aa_variant.clone()),
        }
    }
}

/// All well records of an experiment, sorted by plate then well, with
/// Bonferroni-adjusted p-values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentVariantTable {
    records: Vec<WellVariantRecord>,
}

impl ExperimentVariantTable {
    /// Sort the records and adjust every p-value by the number of wells.
    pub fn new(mut records: Vec<WellVariantRecord>) -> Self {
        records.sort_by_key(|record| record.identity);
        let well_count = records.len();
        for record in &mut records {
            record.adjust(well_count);
        }
        Self { records }
    }

    /// Records in table order.
    pub fn records(&self) -> &[WellVariantRecord] {
        &self.records
    }

    /// Record of one well.
    pub fn get(&self, identity: WellIdentity) -> Option<&WellVariantRecord> {
        self.records
            .binary_search_by_key(&identity, |record| record.identity)
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows per label kind: `(called, parent, insufficient, failed)`.
    pub fn label_counts(&self) -> (usize, usize, usize, usize) {
        self.records.iter().fold((0, 0, 0, 0), |(c, p, i, f), record| match record.label {
            VariantLabel::Called(_) => (c + 1, p, i, f),
            VariantLabel::Parent => (c, p + 1, i, f),
            VariantLabel::InsufficientData => (c, p, i + 1, f),
            VariantLabel::Failed => (c, p, i, f + 1),
        })
    }

    /// Write the table as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        csv.write_record(TABLE_COLUMNS).map_err(io::Error::from)?;
        for record in &self.records {
            csv.serialize(TableRow::from(record)).map_err(io::Error::from)?;
        }
        csv.flush()
    }

    /// Render the table as a CSV string.
    pub fn to_csv_string(&self) -> String {
        let mut buffer = Vec::new();
        if self.write_csv(&mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Replace the table at `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), CallerError> {
        write_atomically(path, |w| self.write_csv(w)).map_err(|err| CallerError::io(path, err))
    }
}

/// Rows of an earlier table that hold a real genotype, keyed by well.
///
/// Sentinel rows are left out so those wells are computed again. An
/// unreadable table is ignored with a warning.
pub fn load_resumable(path: &Path) -> HashMap<WellIdentity, WellVariantRecord> {
    let mut reused = HashMap::new();
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            warn!(table = %path.display(), error = %err, "cannot open previous table; recomputing all wells");
            return reused;
        }
    };
    for row in reader.deserialize::<TableRow>() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(table = %path.display(), error = %err, "previous table is malformed; recomputing all wells");
                return HashMap::new();
            }
        };
        let Some(identity) = WellIdentity::parse(row.barcode_id, &row.well) else {
            warn!(well = %row.well, barcode_id = row.barcode_id, "skipping row with unknown well");
            continue;
        };
        let label: VariantLabel = match row.variant_label.parse() {
            Ok(label) => label,
            Err(never) => match never {},
        };
        if !label.is_call() {
            continue;
        }
        reused.insert(
            identity,
            WellVariantRecord {
                identity,
                plate_name: row.plate.map(Arc::from),
                label,
                calls: Vec::new(),
                average_frequency: row.average_mutation_frequency,
                p_value: row.p_value,
                adjusted_p_value: None,
                alignment_count: row.alignment_count,
                mixed_well: row.mixed_well,
                protein: None,
            },
        );
    }
    debug!(table = %path.display(), reused = reused.len(), "loaded previous table");
    reused
}
