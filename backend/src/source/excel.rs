//! Workbook reading with calamine.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;

use crate::dsl::coerce::format_number;
use crate::error::{SourceError, SourceResult};

/// A sheet as a raw string matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Read the sheets of a workbook whose names pass `select`.
pub fn read_workbook<F>(path: &Path, mut select: F) -> SourceResult<Vec<Sheet>>
where
    F: FnMut(&str) -> bool,
{
    let failure = |message: String| SourceError::Workbook { file: path.display().to_string(), message };

    let mut workbook = open_workbook_auto(path).map_err(|e| failure(e.to_string()))?;
    let names: Vec<String> = workbook.sheet_names().into_iter().filter(|n| select(n)).collect();

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook.worksheet_range(&name).map_err(|e| failure(e.to_string()))?;

        // Ranges start at the first used cell; pad so column letters still line up.
        let offset = range.start().map(|(_, col)| col as usize).unwrap_or(0);
        let rows = range
            .rows()
            .map(|cells| {
                std::iter::repeat(String::new())
                    .take(offset)
                    .chain(cells.iter().map(cell_to_string))
                    .collect::<Vec<_>>()
            })
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .collect();

        sheets.push(Sheet { name, rows });
    }

    Ok(sheets)
}

/// Raw cell text. Numbers print like the CSV they would export to, dates as
/// their serial day number.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format_number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}
