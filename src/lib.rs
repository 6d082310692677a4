/*!
# Notice Grid

A login-gated, browser-based grid viewer for Excel/CSV exports of notice records, built in Rust.

## Overview

A signed-in user uploads a spreadsheet (or gets a configured default dataset), and the
rows are shown in a sortable, filterable, paginated grid. Every row carries three
UI-only columns: two checkbox flags (`Selected`, `Override`) and a derived `Status`
computed from the row's numeric flag fields.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, plain JavaScript
- **Key Components**:
  - Login page - Posts credentials, receives a session cookie
  - Grid page - Renders pages returned by the JSON API, column chooser, pager, export buttons

### Backend Layer
- **Technologies**: Rust, axum
- **Core Components**:
  - Status Classifier - First-match rule table over the numeric flag fields
  - Date Column Heuristic - Samples values to decide which columns get date filters
  - Loader - Decodes CSV and Excel uploads into header-keyed rows
  - Dataset - Rows plus column visibility and flag edits
  - Grid - Filtering, sorting, pagination and per-row render hints
  - Session Store - Per-session dataset and preferences, dropped at logout

Nothing is persisted: data lives in the session that loaded it.

## Modules

- **row**: Cell values, synthetic columns and the augmented row
- **status**: Status labels, numeric coercion and the classifier
- **dates**: Date parsing, display formatting and the date-column heuristic
- **loader**: Upload validation and CSV/Excel decoding
- **dataset**: Loaded dataset, display names and column visibility
- **grid**: Column definitions, filters, sorting and pages
- **downloader**: Export of the current view (CSV, XLSX)
- **login**: Credentials, sessions and the auth middleware
- **config**: Command line / environment configuration (web feature)
- **app**: Routing and handlers (web feature)
*/

pub mod dataset;
pub mod dates;
pub mod downloader;
pub mod grid;
pub mod loader;
pub mod login;
pub mod row;
pub mod status;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;

pub use dataset::{Dataset, display_name};
pub use loader::{LoadError, ParsedData};
pub use row::{CellValue, Row, RowFlag};
pub use status::{Status, StatusFields, classify};
