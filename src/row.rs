use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::status::Status;

/// Name of the synthetic selection flag column
pub const SELECTED: &str = "Selected";
/// Name of the synthetic override flag column
pub const OVERRIDE: &str = "Override";
/// Name of the synthetic derived status column
pub const STATUS: &str = "Status";

/// Synthetic fields, in the order they lead every column list
pub const SYNTHETIC_COLUMNS: [&str; 3] = [SELECTED, OVERRIDE, STATUS];

/// Returns true for the three UI-only columns added to every row
pub fn is_synthetic(column: &str) -> bool {
    SYNTHETIC_COLUMNS.contains(&column)
}

/// Raw value of a single cell as decoded from an uploaded file
///
/// Serializes untagged, so a row renders as plain JSON (`null`, `true`, `12`, `"text"`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Blank,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Builds a text cell, mapping the empty string to `Blank`
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            CellValue::Blank
        } else {
            CellValue::Text(value)
        }
    }

    /// Blank cells and empty text are both "no value"
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Blank => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Which of the two user-editable flags to change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowFlag {
    Selected,
    Override,
}

/// One record of the current dataset, augmented with the synthetic fields
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Row {
    pub selected: bool,
    pub overridden: bool,
    pub status: Option<Status>,
    pub cells: HashMap<String, CellValue>,
}

impl Row {
    /// Augments a decoded row. The status is classified here and never again.
    pub fn augment(mut cells: HashMap<String, CellValue>) -> Self {
        for name in SYNTHETIC_COLUMNS {
            cells.remove(name);
        }
        let status = crate::status::classify_cells(&cells);
        Row {
            selected: false,
            overridden: false,
            status,
            cells,
        }
    }

    /// Value of a column, synthetic fields included
    pub fn value(&self, column: &str) -> CellValue {
        match column {
            SELECTED => CellValue::Bool(self.selected),
            OVERRIDE => CellValue::Bool(self.overridden),
            STATUS => match self.status {
                Some(status) => CellValue::Text(status.label().to_string()),
                None => CellValue::Blank,
            },
            _ => self.cells.get(column).cloned().unwrap_or_default(),
        }
    }

    /// Borrowed lookup for source columns only
    pub fn cell(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }

    pub fn set_flag(&mut self, flag: RowFlag, value: bool) {
        match flag {
            RowFlag::Selected => self.selected = value,
            RowFlag::Override => self.overridden = value,
        }
    }
}

/// Looks a field up by exact name first, then ignoring ASCII case
pub fn lookup_ci<'a>(cells: &'a HashMap<String, CellValue>, name: &str) -> Option<&'a CellValue> {
    cells.get(name).or_else(|| {
        cells
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}
