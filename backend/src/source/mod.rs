//! Source extraction: spreadsheet files into tables.
//!
//! ```text
//! sources/{group}/{year}/Q{q}/**
//!     ├── march.xlsx ──▶ Sheet1 ──▶ Table (march.xlsx#Sheet1)
//!     │              └─▶ Sheet2 ──▶ Table (march.xlsx#Sheet2)
//!     └── april.csv  ──▶ Table (april.csv#april)
//! ```
//!
//! One table per (file, sheet). Fully blank rows are dropped; missing cells
//! read as `""`.

pub mod excel;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::Layout;
use crate::context::Time;
use crate::error::{SourceError, SourceResult};
use crate::parser::parse_csv_file_auto;
use crate::stats::Issue;
use crate::store::gather;
use crate::table::{Provenance, Row, Table};

pub use excel::{read_workbook, Sheet};

/// File extensions read as workbooks.
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// A declared input of a transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Excel {
        group: String,
        /// Wildcard pattern on the file name.
        #[serde(default = "default_file")]
        file: String,
        /// Anchored sheet-name regexes; empty takes every sheet.
        #[serde(default)]
        sheets: Vec<String>,
    },
}

fn default_file() -> String {
    "*".to_string()
}

/// Translate a `*`/`?` wildcard into an anchored, case-insensitive regex.
pub fn wildcard(pattern: &str) -> SourceResult<Regex> {
    let mut expression = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');

    Regex::new(&expression).map_err(|e| SourceError::Pattern { pattern: pattern.to_string(), message: e.to_string() })
}

fn sheet_patterns(sheets: &[String]) -> SourceResult<Vec<Regex>> {
    sheets
        .iter()
        .map(|s| {
            Regex::new(&format!("^(?:{})$", s))
                .map_err(|e| SourceError::Pattern { pattern: s.clone(), message: e.to_string() })
        })
        .collect()
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("csv"))
}

impl Source {
    /// Files this source reads for the quarter, sorted by path.
    pub fn files(&self, layout: &Layout, time: &Time) -> SourceResult<Vec<PathBuf>> {
        let Source::Excel { group, file, .. } = self;
        let pattern = wildcard(file)?;

        let mut extensions = WORKBOOK_EXTENSIONS.to_vec();
        extensions.push("csv");

        Ok(gather(&layout.sources(group, time), &extensions)
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| pattern.is_match(&n.to_string_lossy()))
            })
            .collect())
    }

    /// Extract one table per selected sheet.
    ///
    /// Files that yield no sheet are reported as `empty_source`.
    pub fn run(&self, layout: &Layout, time: &Time, transformer: &str, issues: &mut Vec<Issue>) -> SourceResult<Vec<Table>> {
        let Source::Excel { group, sheets, .. } = self;
        let patterns = sheet_patterns(sheets)?;
        let selected = |name: &str| patterns.is_empty() || patterns.iter().any(|p| p.is_match(name));

        let mut tables = Vec::new();
        for path in self.files(layout, time)? {
            let extracted: Vec<Sheet> = if is_csv(&path) {
                std::iter::once(read_csv_sheet(&path)?).filter(|s| selected(&s.name)).collect()
            } else {
                read_workbook(&path, selected)?
            };

            if extracted.is_empty() {
                issues.push(Issue::EmptySource {
                    transformer: transformer.to_string(),
                    source: path.display().to_string(),
                });
                continue;
            }

            debug!(file = %path.display(), sheets = extracted.len(), "source read");
            tables.extend(extracted.into_iter().map(|sheet| into_table(&path, group, sheet)));
        }

        Ok(tables)
    }
}

/// A CSV file read as a workbook with one sheet named after the file stem.
fn read_csv_sheet(path: &Path) -> SourceResult<Sheet> {
    let parsed = parse_csv_file_auto(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Sheet { name, rows: parsed.rows })
}

fn into_table(path: &Path, group: &str, sheet: Sheet) -> Table {
    let source: Arc<str> = Arc::from(path.display().to_string());
    let rows = sheet
        .rows
        .into_iter()
        .map(|cells| Row::new(cells, Arc::clone(&source)))
        .filter(|row| !row.is_blank())
        .collect();

    Table::new(rows).with_provenance(Provenance {
        file: path.to_path_buf(),
        group: group.to_string(),
        sheet: sheet.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn time() -> Time {
        Time { year: 2024, quarter: 1 }
    }

    fn source(json: &str) -> Source {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            source(r#"{"type":"excel","group":"acme"}"#),
            Source::Excel { group: "acme".into(), file: "*".into(), sheets: vec![] }
        );
    }

    #[test]
    fn test_wildcard() {
        let p = wildcard("march*.xlsx").unwrap();
        assert!(p.is_match("March 2024.XLSX"));
        assert!(!p.is_match("april.xlsx"));
        assert!(wildcard("a.b").unwrap().is_match("a.b"));
        assert!(!wildcard("a.b").unwrap().is_match("axb"));
    }

    #[test]
    fn test_csv_files_are_single_sheet_workbooks() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let folder = layout.sources("acme", &time());
        std::fs::create_dir_all(folder.join("nested")).unwrap();
        std::fs::write(folder.join("march.csv"), "h1,h2\n,\n3,x\n").unwrap();
        std::fs::write(folder.join("nested/april.csv"), "4,y\n").unwrap();
        std::fs::write(folder.join("notes.txt"), "ignored").unwrap();

        let mut issues = Vec::new();
        let tables = source(r#"{"type":"excel","group":"acme"}"#)
            .run(&layout, &time(), "t", &mut issues)
            .unwrap();

        assert!(issues.is_empty());
        assert_eq!(tables.len(), 2);
        let march = tables.iter().find(|t| t.provenance().unwrap().sheet == "march").unwrap();
        assert_eq!(march.len(), 2);
        assert_eq!(march.get(1).unwrap().cells(), &["3", "x"]);
        assert!(march.get(0).unwrap().source().ends_with("march.csv"));
    }

    #[test]
    fn test_sheet_filter_reports_empty_source() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let folder = layout.sources("acme", &time());
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("march.csv"), "1\n").unwrap();

        let mut issues = Vec::new();
        let tables = source(r#"{"type":"excel","group":"acme","sheets":["Summary"]}"#)
            .run(&layout, &time(), "t", &mut issues)
            .unwrap();

        assert!(tables.is_empty());
        assert!(matches!(&issues[0], Issue::EmptySource { transformer, .. } if transformer == "t"));
    }

    #[test]
    fn test_missing_folder_has_no_files() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let files = source(r#"{"type":"excel","group":"nobody"}"#).files(&layout, &time()).unwrap();
        assert!(files.is_empty());
    }
}
