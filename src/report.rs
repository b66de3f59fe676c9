use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::info;
use plant_series::frame::to_dataframe;
use plant_series::ObservationTable;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use umya_spreadsheet::{Border, HorizontalAlignmentValues, Spreadsheet, VerticalAlignmentValues, Worksheet};

use crate::config::SideFormat;

const FONT_SIZE: f64 = 10.0;
const HEADER_HEIGHT: f64 = 45.0;
/// 12 plus the 0.78 Excel adds to every character width.
const DATA_COLUMN_WIDTH: f64 = 12.78;
const DATE_FORMAT_CODE: &str = "yyyy-mm-dd hh:mm:ss";
const DATE_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EXCEL_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(1899, 12, 30) {
    Some(date) => date,
    None => panic!("Excel epoch is not a valid date"),
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("template '{0}' does not exist")]
    TemplateNotFound(PathBuf),

    #[error("sheet '{sheet}' not found in template '{template}'")]
    SheetNotFound { sheet: String, template: PathBuf },

    #[error("workbook {path}: {reason}")]
    Workbook { path: PathBuf, reason: String },
}

/// The narrow interface the pipeline renders through.
pub trait SheetSink {
    fn render(&mut self, sheet: &str, table: &ObservationTable) -> Result<()>;
}

/// Excel serial date (days since 1899-12-30).
pub fn excel_serial(ts: &NaiveDateTime) -> f64 {
    let base = EXCEL_EPOCH.and_time(NaiveTime::MIN);
    (*ts - base).num_milliseconds() as f64 / 86_400_000.0
}

/// Writes `date` + channel header in row 1 and one row per timestamp.
/// Missing samples are left as empty cells.
fn write_table(sheet: &mut Worksheet, table: &ObservationTable, date_header: &str) {
    sheet.get_cell_mut((1, 1)).set_value(date_header);
    for (col, channel) in table.channels().iter().enumerate() {
        sheet.get_cell_mut((col as u32 + 2, 1)).set_value(channel.name.as_str());
    }

    for (row, ts) in table.timestamps().iter().enumerate() {
        let r = row as u32 + 2;
        sheet.get_cell_mut((1, r)).set_value_number(excel_serial(ts));
        sheet
            .get_style_mut((1, r))
            .get_number_format_mut()
            .set_format_code(DATE_FORMAT_CODE);
        for (col, channel) in table.channels().iter().enumerate() {
            if let Some(value) = channel.values[row] {
                sheet.get_cell_mut((col as u32 + 2, r)).set_value_number(value);
            }
        }
    }
}

/// Applies "format 01": small font, thin grid, tall wrapped bold header,
/// fixed width data columns and a fitted, left aligned date column.
pub fn apply_format_01(sheet: &mut Worksheet, table: &ObservationTable) {
    let max_col = table.width() as u32 + 1;
    let max_row = table.height() as u32 + 1;

    for row in 1..=max_row {
        for col in 1..=max_col {
            let style = sheet.get_style_mut((col, row));
            style.get_font_mut().set_size(FONT_SIZE);
            let borders = style.get_borders_mut();
            borders.get_left_mut().set_border_style(Border::BORDER_THIN);
            borders.get_right_mut().set_border_style(Border::BORDER_THIN);
            borders.get_top_mut().set_border_style(Border::BORDER_THIN);
            borders.get_bottom_mut().set_border_style(Border::BORDER_THIN);
        }
        sheet
            .get_style_mut((1, row))
            .get_alignment_mut()
            .set_horizontal(HorizontalAlignmentValues::Left);
    }

    sheet.get_row_dimension_mut(&1).set_height(HEADER_HEIGHT);
    for col in 1..=max_col {
        let style = sheet.get_style_mut((col, 1));
        style.get_font_mut().set_bold(true);
        let alignment = style.get_alignment_mut();
        alignment.set_horizontal(HorizontalAlignmentValues::Left);
        alignment.set_vertical(VerticalAlignmentValues::Top);
        alignment.set_wrap_text(true);
    }

    for col in 2..=max_col {
        sheet
            .get_column_dimension_by_number_mut(&col)
            .set_width(DATA_COLUMN_WIDTH);
    }

    let longest = table
        .timestamps()
        .iter()
        .map(|ts| ts.format(DATE_TEXT_FORMAT).to_string().len())
        .chain(std::iter::once("date".len()))
        .max()
        .unwrap_or(0);
    sheet
        .get_column_dimension_by_number_mut(&1)
        .set_width(longest as f64 + 1.0);
}

/// A report workbook being built in memory. Saving replaces any existing file.
pub struct ReportWorkbook {
    book: Spreadsheet,
    path: PathBuf,
}

impl ReportWorkbook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            book: umya_spreadsheet::new_file_empty_worksheet(),
            path: path.into(),
        }
    }

    pub fn save(self) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output folder {}", parent.display()))?;
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete existing workbook {}", self.path.display()))?;
            info!("Deleted existing workbook: {}", self.path.display());
        }
        umya_spreadsheet::writer::xlsx::write(&self.book, &self.path).map_err(|e| ReportError::Workbook {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        info!("Created workbook: {}", self.path.display());
        Ok(self.path)
    }
}

impl SheetSink for ReportWorkbook {
    fn render(&mut self, sheet: &str, table: &ObservationTable) -> Result<()> {
        let path = self.path.clone();
        let worksheet = self.book.new_sheet(sheet).map_err(|e| ReportError::Workbook {
            path,
            reason: format!("cannot add sheet '{sheet}': {e}"),
        })?;
        write_table(worksheet, table, "date");
        apply_format_01(worksheet, table);
        info!("Table written to sheet {sheet} ({} rows)", table.height());
        Ok(())
    }
}

/// Writes one workbook with a formatted sheet per `(name, table)`.
pub fn write_report(path: &Path, sheets: &[(String, ObservationTable)]) -> Result<PathBuf> {
    let mut workbook = ReportWorkbook::new(path);
    for (name, table) in sheets {
        workbook.render(name, table)?;
    }
    workbook.save()
}

/// Existing template whose named sheets get overwritten with tables from row 1.
/// Other sheets, and the styles of overwritten cells, are kept.
pub struct TemplateWorkbook {
    book: Spreadsheet,
    template: PathBuf,
}

impl TemplateWorkbook {
    pub fn open(template: &Path) -> Result<Self> {
        if !template.is_file() {
            return Err(ReportError::TemplateNotFound(template.to_path_buf()).into());
        }
        let book = umya_spreadsheet::reader::xlsx::read(template).map_err(|e| ReportError::Workbook {
            path: template.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            book,
            template: template.to_path_buf(),
        })
    }

    pub fn save_as(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        umya_spreadsheet::writer::xlsx::write(&self.book, output).map_err(|e| ReportError::Workbook {
            path: output.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl SheetSink for TemplateWorkbook {
    fn render(&mut self, sheet: &str, table: &ObservationTable) -> Result<()> {
        let template = self.template.clone();
        let worksheet = self
            .book
            .get_sheet_by_name_mut(sheet)
            .ok_or_else(|| ReportError::SheetNotFound {
                sheet: sheet.to_string(),
                template,
            })?;
        write_table(worksheet, table, "Date");
        Ok(())
    }
}

/// Fills `template` with the given sheet tables and saves it to `output`.
/// Every sheet is checked before anything is written.
pub fn fill_template(template: &Path, output: &Path, data: &[(String, ObservationTable)]) -> Result<()> {
    let mut workbook = TemplateWorkbook::open(template)?;
    for (sheet, _) in data {
        if workbook.book.get_sheet_by_name(sheet).is_none() {
            return Err(ReportError::SheetNotFound {
                sheet: sheet.clone(),
                template: template.to_path_buf(),
            }
            .into());
        }
    }
    for (sheet, table) in data {
        workbook.render(sheet, table)?;
    }
    workbook.save_as(output)?;
    info!("Template {} filled into {}", template.display(), output.display());
    Ok(())
}

/// Writes `table` next to the workbooks as `<stem>.parquet` / `<stem>.csv`.
pub fn write_side_output(dir: &Path, stem: &str, table: &ObservationTable, format: SideFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut df = to_dataframe(table)?;
    let path = match format {
        SideFormat::Parquet => {
            let path = dir.join(format!("{stem}.parquet"));
            ParquetWriter::new(File::create(&path)?).finish(&mut df)?;
            path
        }
        SideFormat::Csv => {
            let path = dir.join(format!("{stem}.csv"));
            CsvWriter::new(File::create(&path)?).finish(&mut df)?;
            path
        }
    };
    info!("Saved {}", path.display());
    Ok(path)
}

#[derive(Debug, Serialize)]
pub struct CompletenessDay {
    pub date: String,
    pub missing_ratio: BTreeMap<String, Option<f64>>,
}

/// Daily completeness table as serialisable rows.
pub fn completeness_rows(daily: &ObservationTable) -> Vec<CompletenessDay> {
    daily
        .timestamps()
        .iter()
        .enumerate()
        .map(|(row, ts)| CompletenessDay {
            date: ts.date().to_string(),
            missing_ratio: daily
                .channels()
                .iter()
                .map(|c| (c.name.clone(), c.values[row]))
                .collect(),
        })
        .collect()
}
