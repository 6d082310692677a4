use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::error::Error;

use crate::dataset::{Dataset, display_name};
use crate::grid::display_value;

/// Convert the current grid view to CSV format
///
/// This function exports the given rows of a dataset to CSV (Comma-Separated Values).
/// It writes:
/// - A header row with the display names of the visible columns
/// - One line per row in `indices`, in that order, with the values as the grid shows them
///
/// # Arguments
/// * `dataset` - The dataset to export from
/// * `indices` - Row indices to export, usually the filtered and sorted view
///
/// # Returns
/// * `Result<String, Box<dyn Error>>` - CSV content as a string or an error
///
/// # Examples
/// ```
/// use notice_grid::dataset::Dataset;
/// use notice_grid::downloader::to_csv;
/// use notice_grid::loader::parse_upload;
///
/// let parsed = parse_upload("n.csv", b"LoanNumber\n42\n", 15).unwrap();
/// let dataset = Dataset::from_parsed("n.csv", parsed);
/// let csv = to_csv(&dataset, &[0]).unwrap();
/// let lines: Vec<&str> = csv.lines().collect();
/// assert_eq!(lines, vec!["Selected,Override,Status,Account Number", "false,false,,42"]);
/// ```
pub fn to_csv(dataset: &Dataset, indices: &[usize]) -> Result<String, Box<dyn Error>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let columns = dataset.visible_columns();

    writer.write_record(columns.iter().map(|c| display_name(c)))?;

    for &index in indices {
        let row = dataset
            .rows()
            .get(index)
            .ok_or_else(|| format!("Row {} does not exist", index))?;
        writer.write_record(
            columns
                .iter()
                .map(|c| display_value(dataset, c, &row.value(c))),
        )?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Convert the current grid view to XLSX format
///
/// This function exports the given rows using the rust_xlsxwriter library,
/// with a bold header row of display names and the values as the grid shows them.
///
/// # Arguments
/// * `dataset` - The dataset to export from
/// * `indices` - Row indices to export, usually the filtered and sorted view
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
pub fn to_xlsx(dataset: &Dataset, indices: &[usize]) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    let header = Format::new().set_bold();
    let columns = dataset.visible_columns();

    for (c, column) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, display_name(column), &header)?;
    }

    for (r, &index) in indices.iter().enumerate() {
        let row = dataset
            .rows()
            .get(index)
            .ok_or_else(|| format!("Row {} does not exist", index))?;
        for (c, column) in columns.iter().enumerate() {
            let text = display_value(dataset, column, &row.value(column));
            if !text.is_empty() {
                worksheet.write_string((r + 1) as u32, c as u16, &text)?;
            }
        }
    }

    workbook.push_worksheet(worksheet);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
