use std::fmt;

/// Row letters of a 96-well plate.
pub const ROW_LETTERS: &[u8; 8] = b"ABCDEFGH";
/// Columns per row.
pub const COLUMNS: u8 = 12;
/// Wells per plate.
pub const WELLS_PER_PLATE: usize = ROW_LETTERS.len() * COLUMNS as usize;

/// Immutable key for one well: plate (reverse barcode number) plus coordinate.
///
/// Ordering is plate first, then row-major well order (A1, A2, ..., H12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WellIdentity {
    plate: u32,
    row: u8,
    column: u8,
}

impl WellIdentity {
    /// Well for a 1-based forward barcode number; `None` outside `1..=96`.
    ///
    /// `row = letters[(n - 1) / 12]`, `col = (n - 1) % 12 + 1`.
    pub fn from_barcode(plate: u32, number: u32) -> Option<Self> {
        if number == 0 || number as usize > WELLS_PER_PLATE {
            return None;
        }
        let index = number - 1;
        Some(Self {
            plate,
            row: (index / COLUMNS as u32) as u8,
            column: (index % COLUMNS as u32) as u8 + 1,
        })
    }

    /// Parse a well name such as `A1` or `H12`.
    pub fn parse(plate: u32, well: &str) -> Option<Self> {
        let mut chars = well.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let row = ROW_LETTERS.iter().position(|&l| l as char == letter)? as u8;
        let column: u8 = chars.as_str().parse().ok()?;
        if !(1..=COLUMNS).contains(&column) {
            return None;
        }
        Some(Self { plate, row, column })
    }

    /// Every well of `plate` in row-major order.
    pub fn plate_template(plate: u32) -> impl Iterator<Item = WellIdentity> {
        (1..=WELLS_PER_PLATE as u32).filter_map(move |n| Self::from_barcode(plate, n))
    }

    /// Reverse barcode number identifying the plate.
    pub fn plate(&self) -> u32 {
        self.plate
    }

    /// Row letter, `A` through `H`.
    pub fn row_letter(&self) -> char {
        ROW_LETTERS[self.row as usize] as char
    }

    /// 1-based column.
    pub fn column(&self) -> u8 {
        self.column
    }

    /// 0-based slot within the plate, row-major.
    pub fn slot(&self) -> usize {
        self.row as usize * COLUMNS as usize + (self.column as usize - 1)
    }

    /// Forward barcode number that maps onto this well.
    pub fn barcode_number(&self) -> u32 {
        self.slot() as u32 + 1
    }

    /// Well name, e.g. `C7`.
    pub fn well_name(&self) -> String {
        format!("{}{}", self.row_letter(), self.column)
    }
}

impl fmt::Display for WellIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.plate, self.row_letter(), self.column)
    }
}

/// Reverse and forward barcode numbers of a well folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarcodePair {
    /// Reverse barcode, one per plate.
    pub reverse: u32,
    /// Forward barcode, one per well.
    pub forward: u32,
}
