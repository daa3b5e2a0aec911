use chrono::{DateTime, Local};
use rust_xlsxwriter::{DocProperties, Workbook, Worksheet};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::results::{LabelledMatrix, ResultAccumulator};

/// Excel's hard limit on worksheet names.
pub const MAX_SHEET_NAME: usize = 31;

/// Produces valid, unique worksheet names. Invalid characters become `_`,
/// names are cut to 31 characters and collisions get a `_{n}` suffix.
#[derive(Debug, Default)]
pub struct SheetNamer {
    used: HashSet<String>,
}

impl SheetNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .map(|c| if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') { '_' } else { c })
            .collect();
        let cleaned = cleaned.trim_matches('\'');
        let base: String = if cleaned.is_empty() {
            "sheet".to_string()
        } else {
            cleaned.chars().take(MAX_SHEET_NAME).collect()
        };

        let mut candidate = base.clone();
        let mut n = 1;
        // sheet names compare case-insensitively in Excel
        while self.used.contains(&candidate.to_lowercase()) {
            let suffix = format!("_{}", n);
            let keep = MAX_SHEET_NAME - suffix.chars().count();
            candidate = base.chars().take(keep).collect::<String>() + &suffix;
            n += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

fn write_matrix(sheet: &mut Worksheet, matrix: &LabelledMatrix) -> Result<()> {
    sheet.write_string(0, 0, "")?;
    for (c, label) in matrix.column_labels.iter().enumerate() {
        sheet.write_string(0, (c + 1) as u16, label)?;
    }
    for (r, (label, row)) in matrix.row_labels.iter().zip(&matrix.values).enumerate() {
        let row_idx = (r + 1) as u32;
        sheet.write_string(row_idx, 0, label)?;
        for (c, cell) in row.iter().enumerate() {
            if let Some(v) = cell {
                sheet.write_number(row_idx, (c + 1) as u16, *v)?;
            }
        }
    }
    Ok(())
}

fn new_workbook(title: &str, started: &DateTime<Local>) -> Workbook {
    let mut workbook = Workbook::new();
    let properties = DocProperties::new()
        .set_title(title)
        .set_comment(&format!("run started {}", started.format("%Y-%m-%d %H:%M:%S")));
    workbook.set_properties(&properties);
    workbook
}

/// One sheet per model entry: rounds down, folds across.
pub fn write_accuracy_workbook(
    results: &ResultAccumulator,
    path: &Path,
    started: &DateTime<Local>,
) -> Result<()> {
    results.check_complete()?;
    let mut workbook = new_workbook("accuracy", started);
    let mut namer = SheetNamer::new();
    for model in results.model_names() {
        let matrix = results.accuracy_table(model)?;
        let sheet = workbook.add_worksheet();
        sheet.set_name(namer.name(model))?;
        write_matrix(sheet, &matrix)?;
    }
    workbook.save(path)?;
    log::info!("[report] wrote {:?}", path);
    Ok(())
}

/// One sheet per (model entry, feature) with that feature's relevance trace.
pub fn write_relevance_workbook(
    results: &ResultAccumulator,
    path: &Path,
    started: &DateTime<Local>,
) -> Result<()> {
    results.check_complete()?;
    let mut workbook = new_workbook("explanation", started);
    let mut namer = SheetNamer::new();
    for model in results.model_names() {
        for (feature, matrix) in results.relevance_tables(model)? {
            let sheet = workbook.add_worksheet();
            sheet.set_name(namer.name(&format!("{}_{}", model, feature)))?;
            write_matrix(sheet, &matrix)?;
        }
    }
    workbook.save(path)?;
    log::info!("[report] wrote {:?}", path);
    Ok(())
}
