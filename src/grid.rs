//! Grid view over a dataset: column definitions, filtering, sorting,
//! pagination and the per-row rendering hints the page draws with.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::dataset::{Dataset, display_name};
use crate::dates::{compare_by_day, format_display, parse_date};
use crate::row::{CellValue, OVERRIDE, Row, SELECTED, STATUS};
use crate::status::coerce_number;

/// Page sizes offered by the pager
pub const PAGE_SIZE_OPTIONS: [usize; 7] = [10, 20, 25, 50, 100, 250, 500];

/// Page size before the user picks one
pub const DEFAULT_PAGE_SIZE: usize = 20;

pub fn is_valid_page_size(size: usize) -> bool {
    PAGE_SIZE_OPTIONS.contains(&size)
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column {0} cannot be filtered")]
    NotFilterable(String),

    #[error("Column {column} takes a {expected} filter")]
    WrongFilterType { column: String, expected: &'static str },

    #[error("Invalid page size {0}")]
    InvalidPageSize(usize),
}

/// Filter widget attached to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    None,
    Text,
    Date,
}

impl FilterType {
    fn name(self) -> &'static str {
        match self {
            FilterType::None => "no",
            FilterType::Text => "text",
            FilterType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub field: String,
    pub header_name: String,
    pub filter: FilterType,
    pub min_width: u32,
    pub sortable: bool,
    /// Rendered as a checkbox
    pub checkbox: bool,
}

/// Filter type a column gets in this dataset
pub fn filter_type(dataset: &Dataset, column: &str) -> FilterType {
    if column == SELECTED || column == OVERRIDE {
        FilterType::None
    } else if dataset.is_date_column(column) {
        FilterType::Date
    } else {
        FilterType::Text
    }
}

/// Definitions for the visible columns, in display order
pub fn column_defs(dataset: &Dataset) -> Vec<ColumnDef> {
    dataset
        .visible_columns()
        .iter()
        .map(|c| {
            let filter = filter_type(dataset, c);
            let checkbox = filter == FilterType::None;
            ColumnDef {
                field: c.clone(),
                header_name: display_name(c).to_string(),
                filter,
                min_width: if checkbox { 80 } else { 140 },
                sortable: true,
                checkbox,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOp {
    Contains,
    NotContains,
    Equals,
    NotEqual,
    StartsWith,
    EndsWith,
    Blank,
    NotBlank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateOp {
    Equals,
    NotEqual,
    LessThan,
    GreaterThan,
    InRange,
    Blank,
    NotBlank,
}

/// A filter on one column, as sent by the page
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnFilter {
    Text {
        op: TextOp,
        #[serde(default)]
        value: String,
    },
    Date {
        op: DateOp,
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
    },
}

impl ColumnFilter {
    fn matches(&self, cell: &CellValue) -> bool {
        match self {
            ColumnFilter::Text { op, value } => text_matches(*op, value, cell),
            ColumnFilter::Date { op, from, to } => date_matches(*op, *from, *to, cell),
        }
    }

    fn filter_type(&self) -> FilterType {
        match self {
            ColumnFilter::Text { .. } => FilterType::Text,
            ColumnFilter::Date { .. } => FilterType::Date,
        }
    }
}

fn text_matches(op: TextOp, needle: &str, cell: &CellValue) -> bool {
    let hay = cell.to_string().to_lowercase();
    let needle = needle.to_lowercase();
    match op {
        TextOp::Contains => hay.contains(&needle),
        TextOp::NotContains => !hay.contains(&needle),
        TextOp::Equals => hay == needle,
        TextOp::NotEqual => hay != needle,
        TextOp::StartsWith => hay.starts_with(&needle),
        TextOp::EndsWith => hay.ends_with(&needle),
        TextOp::Blank => cell.is_blank(),
        TextOp::NotBlank => !cell.is_blank(),
    }
}

fn date_matches(op: DateOp, from: Option<NaiveDate>, to: Option<NaiveDate>, cell: &CellValue) -> bool {
    match op {
        DateOp::Equals => compare_by_day(from, cell) == Ordering::Equal,
        DateOp::NotEqual => compare_by_day(from, cell) != Ordering::Equal,
        DateOp::LessThan => compare_by_day(from, cell) == Ordering::Less,
        DateOp::GreaterThan => compare_by_day(from, cell) == Ordering::Greater,
        DateOp::InRange => {
            compare_by_day(from, cell) == Ordering::Greater
                && compare_by_day(to, cell) == Ordering::Less
        }
        DateOp::Blank => cell.is_blank(),
        DateOp::NotBlank => !cell.is_blank(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Everything the page asks for in one request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GridQuery {
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub page: usize,
    /// Falls back to the session's page size
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldFilter {
    pub column: String,
    #[serde(flatten)]
    pub filter: ColumnFilter,
}

/// Checks the query's filters and sort against the dataset's columns
pub fn validate(dataset: &Dataset, query: &GridQuery) -> Result<(), QueryError> {
    for f in &query.filters {
        if !dataset.has_column(&f.column) {
            return Err(QueryError::UnknownColumn(f.column.clone()));
        }
        let expected = filter_type(dataset, &f.column);
        if expected == FilterType::None {
            return Err(QueryError::NotFilterable(f.column.clone()));
        }
        if f.filter.filter_type() != expected {
            return Err(QueryError::WrongFilterType {
                column: f.column.clone(),
                expected: expected.name(),
            });
        }
    }
    if let Some(sort) = &query.sort {
        if !dataset.has_column(&sort.column) {
            return Err(QueryError::UnknownColumn(sort.column.clone()));
        }
    }
    if let Some(size) = query.page_size {
        if !is_valid_page_size(size) {
            return Err(QueryError::InvalidPageSize(size));
        }
    }
    Ok(())
}

/// Indices of the rows that pass every filter, in sort order
pub fn matching_rows(dataset: &Dataset, query: &GridQuery) -> Result<Vec<usize>, QueryError> {
    validate(dataset, query)?;

    let rows = dataset.rows();
    let mut indices: Vec<usize> = (0..rows.len())
        .filter(|&i| {
            query
                .filters
                .iter()
                .all(|f| f.filter.matches(&rows[i].value(&f.column)))
        })
        .collect();

    if let Some(sort) = &query.sort {
        let is_date = dataset.is_date_column(&sort.column);
        // stable sort keeps ingest order between equal keys
        indices.sort_by(|&a, &b| {
            let ord = compare_cells(&rows[a].value(&sort.column), &rows[b].value(&sort.column), is_date);
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    Ok(indices)
}

/// Sort order of two cells: blanks first, then dates, numbers or text
pub fn compare_cells(a: &CellValue, b: &CellValue, is_date: bool) -> Ordering {
    match (a.is_blank(), b.is_blank()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if is_date {
        match (parse_date(a), parse_date(b)) {
            (Some(x), Some(y)) => return x.cmp(&y),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => {}
        }
    }

    if let (Some(x), Some(y)) = (coerce_number(a), coerce_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }

    a.to_string().to_lowercase().cmp(&b.to_string().to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedCell {
    pub field: String,
    pub value: CellValue,
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedRow {
    /// Position in the dataset, used to address the row when flags change
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<&'static str>,
    pub cells: Vec<RenderedCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridPage {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<RenderedRow>,
    pub total_rows: usize,
    pub filtered_rows: usize,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
}

/// Text shown for a cell; date columns use `MM/DD/YYYY` when the value parses
pub fn display_value(dataset: &Dataset, column: &str, value: &CellValue) -> String {
    if dataset.is_date_column(column) {
        if let Some(formatted) = format_display(value) {
            return formatted;
        }
    }
    value.to_string()
}

/// Renders one row for the visible columns
pub fn render_row(dataset: &Dataset, index: usize, row: &Row) -> RenderedRow {
    let cells = dataset
        .visible_columns()
        .iter()
        .map(|c| {
            let value = row.value(c);
            RenderedCell {
                field: c.clone(),
                display: display_value(dataset, c, &value),
                color: if c == STATUS {
                    row.status.and_then(|s| s.text_color())
                } else {
                    None
                },
                value,
            }
        })
        .collect();

    RenderedRow {
        index,
        class: row.status.map(|s| s.row_class()),
        cells,
    }
}

/// Runs a query and renders the requested page
///
/// A page past the end comes back with no rows rather than an error.
pub fn query(dataset: &Dataset, query: &GridQuery, default_page_size: usize) -> Result<GridPage, QueryError> {
    let indices = matching_rows(dataset, query)?;
    let page_size = query.page_size.unwrap_or(default_page_size).max(1);
    let page_count = indices.len().div_ceil(page_size).max(1);

    let rows = indices
        .iter()
        .skip(query.page.saturating_mul(page_size))
        .take(page_size)
        .map(|&i| render_row(dataset, i, &dataset.rows()[i]))
        .collect();

    Ok(GridPage {
        columns: column_defs(dataset),
        rows,
        total_rows: dataset.len(),
        filtered_rows: indices.len(),
        page: query.page,
        page_size,
        page_count,
    })
}
