use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use crate::dates::detect_date_columns;
use crate::loader::ParsedData;
use crate::row::{Row, RowFlag, SYNTHETIC_COLUMNS, is_synthetic};

/// Columns shown by default, in this order, when the dataset has them
pub const PREFERRED_DEFAULTS: [&str; 8] = [
    "LetterNoticeID",
    "LoanNumber",
    "LetterCode",
    "BorrowerFullName",
    "LetterDate",
    "RecipientType",
    "RecipientTypeDescription",
    "ErrorText",
];

/// Header label for a column; only the header changes, never the field name
///
/// # Examples
/// ```
/// use notice_grid::dataset::display_name;
///
/// assert_eq!(display_name("LoanNumber"), "Account Number");
/// assert_eq!(display_name("Amount"), "Amount");
/// ```
pub fn display_name(column: &str) -> &str {
    match column {
        "ErrorText" => "Flag",
        "LetterNoticeID" => "Document ID",
        "LoanNumber" => "Account Number",
        "LetterCode" => "Letter Code",
        "BorrowerFullName" => "Full Name",
        "LetterDate" => "Letter Date",
        "RecipientType" => "Recipient Type",
        "RecipientTypeDescription" => "Recipient Type Description",
        other => other,
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("Row {index} does not exist (dataset has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

/// One entry of the column chooser
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnChoice {
    pub name: String,
    pub display_name: String,
    pub visible: bool,
}

/// The uploaded data as the grid sees it
///
/// Owns the augmented rows, the full column set, the visible selection and the
/// columns classified as dates. Everything but the two row flags and the
/// visible selection is fixed once built.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: String,
    all_columns: Vec<String>,
    visible_columns: Vec<String>,
    date_columns: BTreeSet<String>,
    rows: Vec<Row>,
}

impl Dataset {
    /// Builds a dataset from decoder output
    ///
    /// Every row is augmented (flags cleared, status classified), the synthetic
    /// columns are put in front of the column set, and the default visible
    /// selection and date columns are computed.
    pub fn from_parsed(source: impl Into<String>, parsed: ParsedData) -> Self {
        let ParsedData { columns, rows } = parsed;

        let mut seen = HashSet::new();
        let all_columns: Vec<String> = SYNTHETIC_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(columns)
            .filter(|c| seen.insert(c.clone()))
            .collect();

        let rows: Vec<Row> = rows.into_iter().map(Row::augment).collect();
        let date_columns = detect_date_columns(&all_columns, &rows);

        let mut dataset = Dataset {
            source: source.into(),
            all_columns,
            visible_columns: Vec::new(),
            date_columns,
            rows,
        };
        dataset.reset_columns();

        log::info!(
            "dataset {}: {} rows, {} columns, date columns {:?}",
            dataset.source,
            dataset.rows.len(),
            dataset.all_columns.len(),
            dataset.date_columns
        );
        dataset
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn all_columns(&self) -> &[String] {
        &self.all_columns
    }

    pub fn visible_columns(&self) -> &[String] {
        &self.visible_columns
    }

    pub fn date_columns(&self) -> &BTreeSet<String> {
        &self.date_columns
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.date_columns.contains(column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.all_columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns the chooser offers: everything except the synthetic fields
    pub fn selectable_columns(&self) -> impl Iterator<Item = &String> {
        self.all_columns.iter().filter(|c| !is_synthetic(c))
    }

    fn visible_selectable(&self) -> impl Iterator<Item = &String> {
        self.visible_columns.iter().filter(|c| !is_synthetic(c))
    }

    /// True when every selectable column is visible (and there is at least one)
    pub fn all_visible(&self) -> bool {
        let selectable = self.selectable_columns().count();
        selectable > 0 && self.visible_selectable().count() == selectable
    }

    /// Replaces the visible selection
    ///
    /// Unknown and synthetic names are dropped, the synthetic columns always
    /// lead, and the rest keep the column set's order.
    pub fn set_visible_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = columns
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();

        self.visible_columns = self
            .all_columns
            .iter()
            .filter(|c| is_synthetic(c) || wanted.contains(c.as_str()))
            .cloned()
            .collect();
    }

    /// Shows a hidden column or hides a visible one. Returns the new visibility.
    pub fn toggle_column(&mut self, column: &str) -> Result<bool, DatasetError> {
        if !self.has_column(column) || is_synthetic(column) {
            return Err(DatasetError::UnknownColumn(column.to_string()));
        }

        let mut wanted: Vec<String> = self.visible_selectable().cloned().collect();
        let visible = if let Some(pos) = wanted.iter().position(|c| c == column) {
            wanted.remove(pos);
            false
        } else {
            wanted.push(column.to_string());
            true
        };
        self.set_visible_columns(wanted);
        Ok(visible)
    }

    pub fn show_all_columns(&mut self) {
        self.visible_columns = self.all_columns.clone();
    }

    /// Back to the synthetic columns plus the preferred defaults present
    pub fn reset_columns(&mut self) {
        let preferred: Vec<&str> = PREFERRED_DEFAULTS
            .iter()
            .copied()
            .filter(|c| self.has_column(c))
            .collect();

        self.visible_columns = SYNTHETIC_COLUMNS
            .iter()
            .copied()
            .chain(preferred)
            .map(str::to_string)
            .collect();
    }

    /// "Show all" button: shows everything, or resets when everything is already shown
    pub fn toggle_show_all(&mut self) {
        if self.all_visible() {
            self.reset_columns();
        } else {
            self.show_all_columns();
        }
    }

    /// Chooser entries whose display name contains `query` (case-insensitive)
    pub fn column_choices(&self, query: &str) -> Vec<ColumnChoice> {
        let query = query.trim().to_lowercase();
        let visible: HashSet<&String> = self.visible_columns.iter().collect();

        self.selectable_columns()
            .filter(|c| query.is_empty() || display_name(c).to_lowercase().contains(&query))
            .map(|c| ColumnChoice {
                name: c.clone(),
                display_name: display_name(c).to_string(),
                visible: visible.contains(c),
            })
            .collect()
    }

    /// Sets a flag on several rows
    ///
    /// All indices are checked first, so an out-of-range index changes nothing.
    pub fn set_flag(&mut self, rows: &[usize], flag: RowFlag, value: bool) -> Result<(), DatasetError> {
        let len = self.rows.len();
        if let Some(&index) = rows.iter().find(|&&i| i >= len) {
            return Err(DatasetError::RowOutOfRange { index, len });
        }
        for &index in rows {
            self.rows[index].set_flag(flag, value);
        }
        log::debug!("set {:?}={} on {} rows", flag, value, rows.len());
        Ok(())
    }
}
