use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::genomics::Reference;

/// Errors raised while loading the plate reference table.
#[derive(Debug, Error)]
pub enum ReferenceTableError {
    /// The table could not be opened or parsed.
    #[error("reference table {path}: {source}")]
    Csv {
        /// Table path.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },
    /// A reference sequence is empty.
    #[error("reference {name} has an empty sequence")]
    EmptySequence {
        /// Entry name.
        name: String,
    },
    /// A reference sequence contains a base outside `ACGTN`.
    #[error("reference {name} has invalid base {base:?} at position {position}")]
    InvalidBase {
        /// Entry name.
        name: String,
        /// 1-based position.
        position: usize,
        /// Offending character.
        base: char,
    },
    /// Two rows claim the same plate barcode.
    #[error("plate barcode {0} listed more than once")]
    DuplicatePlate(u32),
}

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    barcode_plate: u32,
    name: String,
    refseq: String,
}

/// Parent sequence registered for one plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateReference {
    /// Reverse barcode number of the plate.
    pub barcode_plate: u32,
    /// Plate (and reference) name.
    pub name: String,
    /// Upper-cased parent sequence.
    pub reference: Reference,
}

/// `barcode_plate → (name, refseq)` lookup.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    plates: BTreeMap<u32, PlateReference>,
}

impl ReferenceTable {
    /// Load a CSV with columns `barcode_plate`, `name`, `refseq`.
    pub fn from_path(path: &Path) -> Result<Self, ReferenceTableError> {
        let csv_err = |source| ReferenceTableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;
        let mut table = Self::default();
        for row in reader.deserialize::<ReferenceRow>() {
            let row = row.map_err(csv_err)?;
            table.insert(row.barcode_plate, row.name, row.refseq.as_bytes())?;
        }
        Ok(table)
    }

    /// Register a plate reference, validating its sequence.
    pub fn insert(
        &mut self,
        barcode_plate: u32,
        name: impl Into<String>,
        sequence: &[u8],
    ) -> Result<(), ReferenceTableError> {
        let name = name.into();
        let reference = Reference::new(name.as_str(), sequence);
        if reference.is_empty() {
            return Err(ReferenceTableError::EmptySequence { name });
        }
        if let Some((offset, base)) = reference.first_invalid_base() {
            return Err(ReferenceTableError::InvalidBase {
                name,
                position: offset + 1,
                base: base as char,
            });
        }
        if self.plates.contains_key(&barcode_plate) {
            return Err(ReferenceTableError::DuplicatePlate(barcode_plate));
        }
        self.plates.insert(
            barcode_plate,
            PlateReference {
                barcode_plate,
                name,
                reference,
            },
        );
        Ok(())
    }

    /// Entry for a plate barcode.
    pub fn get(&self, barcode_plate: u32) -> Option<&PlateReference> {
        self.plates.get(&barcode_plate)
    }

    /// Entries ordered by plate barcode.
    pub fn iter(&self) -> impl Iterator<Item = &PlateReference> {
        self.plates.values()
    }

    /// Number of registered plates.
    pub fn len(&self) -> usize {
        self.plates.len()
    }

    /// Whether no plate is registered.
    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_uppercases_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.csv");
        std::fs::write(&path, "barcode_plate,name,refseq\n1,lipase,atgcATGC\n2, kinase ,ACGTN\n").unwrap();
        let table = ReferenceTable::from_path(&path).unwrap();
        assert_eq!(table.len(), 2);
        let lipase = table.get(1).unwrap();
        assert_eq!(lipase.name, "lipase");
        assert_eq!(&*lipase.reference.sequence, b"ATGCATGC");
        assert_eq!(table.get(2).unwrap().name, "kinase");
        assert!(table.get(3).is_none());
    }

    #[test]
    fn rejects_malformed_sequences() {
        let mut table = ReferenceTable::default();
        assert!(matches!(
            table.insert(1, "bad", b"ACGX"),
            Err(ReferenceTableError::InvalidBase { position: 4, base: 'X', .. })
        ));
        assert!(matches!(
            table.insert(1, "empty", b""),
            Err(ReferenceTableError::EmptySequence { .. })
        ));
        table.insert(1, "ok", b"ACGT").unwrap();
        assert!(matches!(
            table.insert(1, "again", b"ACGT"),
            Err(ReferenceTableError::DuplicatePlate(1))
        ));
    }
}
