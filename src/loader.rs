use calamine::{Data, Reader, open_workbook_auto_from_rs};
use csv::ReaderBuilder;
use encoding_rs::{UTF_8, WINDOWS_1252};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::dates;
use crate::row::CellValue;

/// Default upload size limit in megabytes
pub const MAX_FILE_SIZE_MB: u64 = 15;

/// Reasons a file could not be turned into rows
///
/// Every variant renders as a single message fit to show the user as-is.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Please upload an Excel file (.xlsx, .xls) or CSV.")]
    UnsupportedExtension,

    #[error("File is too large ({size_mb:.1} MB). Max {max_mb} MB.")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("No worksheets found in the file.")]
    NoWorksheets,

    #[error("The first worksheet could not be read.")]
    UnreadableSheet,

    #[error("No data rows found in the first worksheet.")]
    NoDataRows,

    #[error("No columns detected. Ensure the sheet has a header row.")]
    NoColumns,

    #[error(
        "This file format is not supported by the parser (possible encrypted/corrupted or non-Excel container). Please re-save/export the file as .xlsx or .csv and try again."
    )]
    UnsupportedPayload,

    #[error("Failed to parse file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder output: rows keyed by column name plus the column names in order of first appearance
#[derive(Debug, Clone, Default)]
pub struct ParsedData {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, CellValue>>,
}

/// Which decoder a file goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Excel,
}

impl FileKind {
    /// Detects the file kind from its name, case-insensitively
    ///
    /// # Examples
    /// ```
    /// use notice_grid::loader::FileKind;
    ///
    /// assert_eq!(FileKind::from_name("Notices.CSV"), Some(FileKind::Csv));
    /// assert_eq!(FileKind::from_name("book.xls"), Some(FileKind::Excel));
    /// assert_eq!(FileKind::from_name("notes.txt"), None);
    /// ```
    pub fn from_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Some(FileKind::Csv),
            Some("xlsx") | Some("xls") => Some(FileKind::Excel),
            _ => None,
        }
    }
}

/// Checks the name and size of an upload before any decoding happens
///
/// # Arguments
/// * `file_name` - Name the client gave the file
/// * `size` - Size of the file in bytes
/// * `max_mb` - Upload size limit in megabytes
///
/// # Returns
/// * `Result<FileKind, LoadError>` - The decoder to use, or the reason the file is rejected
pub fn validate_upload(file_name: &str, size: usize, max_mb: u64) -> Result<FileKind, LoadError> {
    let kind = FileKind::from_name(file_name).ok_or(LoadError::UnsupportedExtension)?;
    let size_mb = size as f64 / (1024.0 * 1024.0);
    if size_mb > max_mb as f64 {
        return Err(LoadError::TooLarge { size_mb, max_mb });
    }
    Ok(kind)
}

/// Decode uploaded bytes into rows
///
/// Validates the upload, dispatches on the extension and reads the first
/// worksheet (or the whole CSV) with the first row as header.
///
/// # Examples
/// ```
/// use notice_grid::loader::parse_upload;
///
/// let data = parse_upload("notices.csv", b"Error,Complete\n0,-1\n", 15).unwrap();
/// assert_eq!(data.columns, vec!["Error", "Complete"]);
/// assert_eq!(data.rows.len(), 1);
/// ```
pub fn parse_upload(file_name: &str, bytes: &[u8], max_mb: u64) -> Result<ParsedData, LoadError> {
    let parsed = match validate_upload(file_name, bytes.len(), max_mb)? {
        FileKind::Csv => from_csv_bytes(bytes)?,
        FileKind::Excel => from_excel_bytes(bytes)?,
    };
    log::info!(
        "decoded {}: {} rows, {} columns",
        file_name,
        parsed.rows.len(),
        parsed.columns.len()
    );
    Ok(parsed)
}

/// Load a dataset from a file on disk
///
/// Used for the bundled default dataset; goes through the same checks as an upload.
///
/// # Examples
/// ```no_run
/// use notice_grid::loader::load_file;
///
/// match load_file("data/notices.csv", 15) {
///     Ok(data) => println!("Loaded {} rows", data.rows.len()),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_file(path: impl AsRef<Path>, max_mb: u64) -> Result<ParsedData, LoadError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    parse_upload(file_name, &bytes, max_mb)
}

/// Decode CSV bytes
///
/// Honors a byte-order mark; bytes that are not valid UTF-8 are read as Windows-1252.
pub fn from_csv_bytes(bytes: &[u8]) -> Result<ParsedData, LoadError> {
    let text = decode_text(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(CellValue::text).collect::<Vec<_>>());
    }

    rows_from_grid(records)
}

fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    log::warn!("upload is not valid UTF-8, reading it as Windows-1252");
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Decode an Excel workbook (xlsx, xls, xlsb, ods) and read its first worksheet
pub fn from_excel_bytes(bytes: &[u8]) -> Result<ParsedData, LoadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| {
        log::warn!("workbook could not be opened: {}", e);
        LoadError::UnsupportedPayload
    })?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(LoadError::NoWorksheets)?;

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        log::warn!("worksheet {} could not be read: {}", sheet_name, e);
        LoadError::UnreadableSheet
    })?;

    let records = range
        .rows()
        .map(|row| row.iter().map(excel_cell).collect::<Vec<_>>())
        .collect();

    rows_from_grid(records)
}

// Excel cells are shown the way the sheet displays them, as text
fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Blank,
        Data::String(s) => CellValue::text(s.as_str()),
        Data::Int(i) => CellValue::Text(i.to_string()),
        Data::Float(f) => CellValue::Text(f.to_string()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => match dates::from_excel_serial(dt.as_f64()) {
            Some(date) => CellValue::Text(dates::excel_display(date)),
            None => CellValue::Text(dt.as_f64().to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::text(s.as_str()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

/// Turns a grid of cells whose first row is the header into keyed rows
///
/// Empty header cells become `__EMPTY`, `__EMPTY_1`, ...; repeated names get
/// `_1`, `_2`, ... suffixes. Rows with no non-blank cell are dropped.
pub fn rows_from_grid(records: Vec<Vec<CellValue>>) -> Result<ParsedData, LoadError> {
    let mut records = records.into_iter();
    let Some(header) = records.next() else {
        return Err(LoadError::NoDataRows);
    };
    let columns = header_names(&header);
    if columns.is_empty() {
        return Err(LoadError::NoColumns);
    }

    let mut rows = Vec::new();
    for record in records {
        if record.iter().all(CellValue::is_blank) {
            continue;
        }
        let mut row = HashMap::with_capacity(columns.len());
        for (c, name) in columns.iter().enumerate() {
            let value = record.get(c).cloned().unwrap_or_default();
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(LoadError::NoDataRows);
    }

    Ok(ParsedData { columns, rows })
}

fn header_names(header: &[CellValue]) -> Vec<String> {
    // Trailing blank header cells carry no column
    let width = header
        .iter()
        .rposition(|cell| !cell.is_blank())
        .map_or(0, |last| last + 1);

    let mut used = HashSet::new();
    let mut names = Vec::with_capacity(width);
    for cell in &header[..width] {
        let base = match cell {
            CellValue::Blank => "__EMPTY".to_string(),
            other => {
                let text = other.to_string();
                if text.is_empty() { "__EMPTY".to_string() } else { text }
            }
        };

        let mut name = base.clone();
        let mut suffix = 0;
        while used.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", base, suffix);
        }
        used.insert(name.clone());
        names.push(name);
    }
    names
}
