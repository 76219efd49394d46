/*!
# datavis

A web application for uploading tabular data (CSV or XLSX), browsing and
editing it, and getting automatic data-quality insights, built in Rust.

## Overview

Users register and log in, upload files, and each file becomes a named
table. Tables can be filtered and paged, single cells edited, and whole
tables deleted or downloaded again as CSV or XLSX. For every table the
application reports per-column statistics with a suggested cleaning action,
how strongly categorical columns are associated, and which values look
anomalous. Column distributions can be rendered as bar, line, pie or
doughnut charts.

## Architecture

### Data Layer
- **table**: cell values, columns, rows and the table itself
- **loader**: CSV/XLSX parsing and table/column naming rules
- **schema**: column type inference (numeric, categorical, text)
- **filter**: per-column row predicates
- **store**: named tables with paginated queries, cell edits and summaries
- **persistence**: gzip-compressed bincode snapshots, one file per table

### Analysis Layer
- **insights**: column statistics, categorical association scores and
  anomaly detection

### Web Layer (feature `web`)
- **app**: shared state, router and server loop
- **api**: JSON endpoints and the authentication middleware
- **views**: handlebars pages and their form handlers
- **charts**: PNG charts drawn with plotters
- **export**: CSV and XLSX downloads

### Cross-cutting
- **auth**: user accounts (Argon2 hashes) and the session store
- **config**: command-line and environment configuration
- **error**: the application error type and its HTTP mapping

## REST API Endpoints

- `POST /register`, `POST /login`, `POST /logout`, `GET /check_session`
- `GET /get_tables`, `POST /upload`, `GET /table_schema`
- `POST /filter_data`, `POST /update_cell`, `DELETE /delete_table`
- `GET /analyze_table`, `GET /table_summary`
- `GET /chart`, `GET /export`, `GET /health`
*/

pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod insights;
pub mod loader;
pub mod persistence;
pub mod schema;
pub mod store;
pub mod table;

#[cfg(feature = "web")]
pub mod api;
#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod charts;
#[cfg(feature = "web")]
pub mod views;

pub use error::{AppError, Result};
pub use insights::{InsightsConfig, InsightsEngine, TableInsights};
pub use store::{StoreConfig, TableStore};
pub use table::{Column, ColumnType, Row, Table, Value};
