use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::row::{CellValue, lookup_ci};

/// Derived row status
///
/// Closed set of labels produced by [`classify`]. A row that matches no rule
/// has no status at all (`None`), never a default label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Generating,
    Review,
    Processed,
    Approved,
    Pending,
    Flagged,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Generating,
        Status::Review,
        Status::Processed,
        Status::Approved,
        Status::Pending,
        Status::Flagged,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Status::Generating => "Generating",
            Status::Review => "Review",
            Status::Processed => "Processed",
            Status::Approved => "Approved",
            Status::Pending => "Pending",
            Status::Flagged => "Flagged",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Status::ALL.into_iter().find(|s| s.label() == label)
    }

    /// Text color of the Status cell, if the status has one
    pub fn text_color(&self) -> Option<&'static str> {
        match self {
            Status::Generating => Some("#d32f2f"),
            Status::Processed => Some("#7b1fa2"),
            Status::Approved => Some("#2e7d32"),
            Status::Flagged => Some("#ed6c02"),
            Status::Review | Status::Pending => None,
        }
    }

    /// CSS class applied to the whole row
    pub fn row_class(&self) -> &'static str {
        match self {
            Status::Generating => "row-status-generating",
            Status::Review => "row-status-review",
            Status::Processed => "row-status-processed",
            Status::Approved => "row-status-approved",
            Status::Pending => "row-status-pending",
            Status::Flagged => "row-status-flagged",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Coerces a raw cell to a number
///
/// Blank cells, empty text and anything that does not parse as a number yield
/// `None`, which compares unequal to every number (0 included). Text made only
/// of whitespace counts as 0.
pub fn coerce_number(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Blank => None,
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Number(n) => Some(*n).filter(|n| !n.is_nan()),
        CellValue::Text(s) => parse_numeric_text(s),
    }
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let s = text.trim();
    if s.is_empty() {
        return Some(0.0);
    }

    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix).ok().map(|n| n as f64);
    }

    match s {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    // f64::from_str also accepts "inf" and "nan", which are not numbers here
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| !n.is_nan())
}

/// The five numeric flag fields a status is derived from
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatusFields {
    pub error: Option<f64>,
    pub complete: Option<f64>,
    pub approved: Option<f64>,
    pub processing: Option<f64>,
    pub row_color: Option<f64>,
}

impl StatusFields {
    /// Extracts the fields from a decoded row.
    ///
    /// Names are matched exactly, then case-insensitively, so `Rowcolor`
    /// exports resolve to `RowColor` here and nowhere else.
    pub fn from_cells(cells: &HashMap<String, CellValue>) -> Self {
        let field = |name: &str| lookup_ci(cells, name).and_then(coerce_number);
        StatusFields {
            error: field("Error"),
            complete: field("Complete"),
            approved: field("Approved"),
            processing: field("Processing"),
            row_color: field("RowColor"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum RowColor {
    Any,
    OneOf(&'static [f64]),
}

impl RowColor {
    fn matches(&self, value: Option<f64>) -> bool {
        match self {
            RowColor::Any => true,
            RowColor::OneOf(allowed) => value.is_some_and(|v| allowed.contains(&v)),
        }
    }
}

struct Rule {
    error: f64,
    complete: f64,
    approved: f64,
    processing: f64,
    row_color: RowColor,
    status: Status,
}

impl Rule {
    fn matches(&self, f: &StatusFields) -> bool {
        f.error == Some(self.error)
            && f.complete == Some(self.complete)
            && f.approved == Some(self.approved)
            && f.processing == Some(self.processing)
            && self.row_color.matches(f.row_color)
    }
}

// Order is significant: first match wins. Review must stay ahead of Processed,
// and Pending shares RowColor 4 with Review on purpose (the other fields differ).
const RULES: [Rule; 6] = [
    Rule {
        error: 0.0,
        complete: 0.0,
        approved: 0.0,
        processing: -1.0,
        row_color: RowColor::Any,
        status: Status::Generating,
    },
    Rule {
        error: 0.0,
        complete: -1.0,
        approved: 0.0,
        processing: 0.0,
        row_color: RowColor::OneOf(&[4.0]),
        status: Status::Review,
    },
    Rule {
        error: 0.0,
        complete: -1.0,
        approved: 0.0,
        processing: 0.0,
        row_color: RowColor::Any,
        status: Status::Processed,
    },
    Rule {
        error: 0.0,
        complete: -1.0,
        approved: -1.0,
        processing: 0.0,
        row_color: RowColor::Any,
        status: Status::Approved,
    },
    Rule {
        error: 0.0,
        complete: 0.0,
        approved: 0.0,
        processing: 0.0,
        row_color: RowColor::OneOf(&[0.0, 4.0]),
        status: Status::Pending,
    },
    Rule {
        error: -1.0,
        complete: 0.0,
        approved: 0.0,
        processing: 0.0,
        row_color: RowColor::OneOf(&[1.0]),
        status: Status::Flagged,
    },
];

/// Classifies a row by the first matching rule
pub fn classify(fields: &StatusFields) -> Option<Status> {
    RULES
        .iter()
        .find(|rule| rule.matches(fields))
        .map(|rule| rule.status)
}

/// Shorthand for `classify(&StatusFields::from_cells(cells))`
pub fn classify_cells(cells: &HashMap<String, CellValue>) -> Option<Status> {
    classify(&StatusFields::from_cells(cells))
}
