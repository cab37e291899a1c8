//! Heuristic table detection over extracted text.
//!
//! A table is a run of at least two consecutive lines that split into the
//! same number (at least two) of cells on tab or multi-space gutters.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use super::extract::page_texts;
use super::{load, stem};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;

static GUTTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t+| {2,}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub page: u32,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableFormat {
    Csv,
    Json,
    /// Tab-separated text with an `.xls` extension, which spreadsheet tools open directly
    Excel,
}

impl TableFormat {
    pub fn parse(name: &str) -> ServiceResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "excel" | "xls" | "xlsx" => Ok(Self::Excel),
            other => Err(ProcessingError::UnsupportedFormat {
                format: other.to_string(),
            }
            .into()),
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "xls",
        }
    }
}

fn split_cells(line: &str) -> Vec<String> {
    GUTTER
        .split(line.trim())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Find tables in one page of text
pub fn detect_tables(page: u32, text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    let mut flush = |run: &mut Vec<Vec<String>>| {
        if run.len() >= 2 {
            tables.push(Table {
                page,
                rows: std::mem::take(run),
            });
        } else {
            run.clear();
        }
    };

    for line in text.lines() {
        let cells = split_cells(line);
        if cells.len() < 2 {
            flush(&mut run);
            continue;
        }
        if run.first().is_some_and(|first| first.len() != cells.len()) {
            flush(&mut run);
        }
        run.push(cells);
    }
    flush(&mut run);

    tables
}

fn csv_field(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

pub fn render_table(table: &Table, format: TableFormat) -> String {
    match format {
        TableFormat::Csv => table
            .rows
            .iter()
            .map(|row| row.iter().map(|c| csv_field(c)).collect::<Vec<_>>().join(","))
            .collect::<Vec<_>>()
            .join("\n"),
        TableFormat::Excel => table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|c| c.replace(['\t', '\n'], " "))
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        TableFormat::Json => serde_json::to_string_pretty(&json!({
            "page": table.page,
            "rows": table.rows,
        }))
        .unwrap_or_default(),
    }
}

#[instrument(skip_all, fields(input = %input.display(), format))]
pub fn extract_tables(input: &Path, format: &str, output_dir: &Path) -> ServiceResult<OperationResult> {
    let format = TableFormat::parse(format)?;
    let doc = load(input)?;
    let (pages, warnings) = page_texts(&doc);
    let base = stem(input);

    let mut outputs = Vec::new();
    let mut summary = Vec::new();
    for (page, text) in &pages {
        for (index, table) in detect_tables(*page, text).iter().enumerate() {
            let path = output_dir.join(format!(
                "{}_page{}_table{}.{}",
                base,
                page,
                index + 1,
                format.extension()
            ));
            std::fs::write(&path, render_table(table, format))
                .map_err(|e| ServiceError::from(ProcessingError::Io(e)))?;
            summary.push(json!({
                "page": page,
                "rows": table.rows.len(),
                "columns": table.columns(),
            }));
            outputs.push(path);
        }
    }

    info!(tables = outputs.len(), "Table extraction finished");
    let message = if outputs.is_empty() {
        "No tables found".to_string()
    } else {
        format!("Extracted {} tables", outputs.len())
    };
    let mut result = OperationResult::ok(message)
        .with_outputs(&outputs)
        .with_warnings(warnings)
        .with_data(json!({ "tables": summary, "count": outputs.len() }));
    if format == TableFormat::Excel && !outputs.is_empty() {
        result = result.with_warning("Excel output is tab-separated text");
    }
    Ok(result)
}
