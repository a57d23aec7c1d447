//! Spreadsheet extraction
//!
//! Reads one worksheet (xlsx/xls/xlsb/ods through calamine, or a CSV file) into a
//! `RawTable` with the configured columns. Nothing here touches the database.

use crate::error::ExtractionError;
use calamine::{open_workbook_auto, Data, Reader};
use common::config::SourceSettings;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Number of positional columns every source row must provide
pub const SOURCE_COLUMNS: usize = 8;

/// One untyped spreadsheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Empty, or text made only of whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Trimmed text form, `None` when blank
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// One data row, cells in source column order
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub reporting_level: Cell,
    pub province: Cell,
    pub region: Cell,
    pub indicator: Cell,
    pub metric: Cell,
    pub year: Cell,
    pub unit: Cell,
    pub result: Cell,
}

impl RawRow {
    /// Positional constructor; missing trailing cells become `Empty`.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let mut it = cells.into_iter();
        let mut next = || it.next().unwrap_or(Cell::Empty);
        Self {
            reporting_level: next(),
            province: next(),
            region: next(),
            indicator: next(),
            metric: next(),
            year: next(),
            unit: next(),
            result: next(),
        }
    }

    pub fn cells(&self) -> [&Cell; SOURCE_COLUMNS] {
        [
            &self.reporting_level,
            &self.province,
            &self.region,
            &self.indicator,
            &self.metric,
            &self.year,
            &self.unit,
            &self.result,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.cells().iter().all(|c| c.is_blank())
    }
}

/// Extracted sheet with exactly the configured columns
#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
    pub source: PathBuf,
    /// `sha256:<hex>` of the source bytes
    pub fingerprint: String,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read `settings.path` into a `RawTable`.
pub fn extract(settings: &SourceSettings) -> Result<RawTable, ExtractionError> {
    extract_from(&settings.path, settings)
}

/// Read `path` using the sheet name, header row and columns from `settings`.
pub fn extract_from(path: &Path, settings: &SourceSettings) -> Result<RawTable, ExtractionError> {
    if !path.is_file() {
        return Err(ExtractionError::NotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let fingerprint = fingerprint(&bytes);
    info!(path = %path.display(), bytes = bytes.len(), %fingerprint, "reading source");

    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let grid = if is_csv {
        csv_grid(&bytes)?
    } else {
        workbook_grid(path, &settings.sheet_name)?
    };

    let rows = grid_to_rows(grid, settings.header_row, settings.column_names.len())?;
    info!(rows = rows.len(), columns = settings.column_names.len(), "extracted source rows");

    Ok(RawTable {
        columns: settings.column_names.clone(),
        rows,
        source: path.to_path_buf(),
        fingerprint,
    })
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Apply the header offset and the column contract to a raw cell grid.
fn grid_to_rows(
    grid: Vec<Vec<Cell>>,
    header_row: usize,
    column_count: usize,
) -> Result<Vec<RawRow>, ExtractionError> {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    let expected = column_count.max(SOURCE_COLUMNS);
    if width < expected {
        return Err(ExtractionError::TooNarrow {
            expected,
            found: width,
        });
    }

    let rows: Vec<RawRow> = grid
        .into_iter()
        .skip(header_row + 1)
        .map(|mut cells| {
            cells.truncate(SOURCE_COLUMNS);
            RawRow::from_cells(cells)
        })
        .collect();

    if rows.is_empty() {
        return Err(ExtractionError::Empty { header_row });
    }
    Ok(rows)
}

fn workbook_grid(path: &Path, sheet: &str) -> Result<Vec<Vec<Cell>>, ExtractionError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ExtractionError::Workbook {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let available = workbook.sheet_names().to_vec();
    if !available.iter().any(|name| name == sheet) {
        return Err(ExtractionError::SheetMissing {
            sheet: sheet.to_string(),
            available,
        });
    }

    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| ExtractionError::Workbook {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    // calamine ranges start at the first used cell; re-anchor at A1 so the
    // header offset counts sheet rows.
    let (start_row, start_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    let (rows, cols) = range.get_size();
    debug!(sheet, rows, cols, start_row, start_col, "worksheet range");

    let mut grid: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col];
        cells.extend(row.iter().map(Cell::from));
        grid.push(cells);
    }
    Ok(grid)
}

fn csv_grid(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, ExtractionError> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut grid = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ExtractionError::Csv {
            record: idx + 1,
            message: e.to_string(),
        })?;
        grid.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(grid)
}

/// UTF-8 (BOM stripped) when valid, Windows-1252 otherwise.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            debug!("source is not UTF-8, decoded as Windows-1252");
            text.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "Reporting level,Province/territory,Region,Indicator,Metric,Data year,Unit of measurement,Indicator result";

    fn settings_for_csv(header_row: usize) -> SourceSettings {
        SourceSettings {
            header_row,
            ..SourceSettings::default()
        }
    }

    fn write_csv(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    // -------------------------------------------------------------------------
    // CSV sources
    // -------------------------------------------------------------------------

    #[test]
    fn test_extract_csv_skips_header_rows() {
        let content = format!(
            "Wait times for priority procedures\n,,,,,,,\n{}\nProvincial,Ontario,,CABG,50th Percentile,2019,Days,12\nProvincial,Alberta,,CABG,90th Percentile,2019,Days,n/a\n",
            HEADER
        );
        let file = write_csv(content.as_bytes());

        let table = extract_from(file.path(), &settings_for_csv(2)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns.len(), 8);
        assert_eq!(table.rows[0].province, Cell::Text("Ontario".to_string()));
        assert_eq!(table.rows[1].result, Cell::Text("n/a".to_string()));
        assert!(table.fingerprint.starts_with("sha256:"));
    }

    #[test]
    fn test_extract_pads_short_rows() {
        let content = format!("{}\nProvincial,Quebec,,MRI Scan,Volume\n", HEADER);
        let file = write_csv(content.as_bytes());

        let table = extract_from(file.path(), &settings_for_csv(0)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].metric, Cell::Text("Volume".to_string()));
        assert_eq!(table.rows[0].year, Cell::Empty);
        assert_eq!(table.rows[0].result, Cell::Empty);
    }

    #[test]
    fn test_extract_ignores_extra_columns() {
        let content = format!(
            "{},Notes\nProvincial,Quebec,,CABG,Volume,2020,Number of cases,140,footnote\n",
            HEADER
        );
        let file = write_csv(content.as_bytes());

        let table = extract_from(file.path(), &settings_for_csv(0)).unwrap();
        assert_eq!(table.rows[0].result, Cell::Text("140".to_string()));
    }

    #[test]
    fn test_extract_strips_bom_and_decodes_windows_1252() {
        let mut content = b"\xEF\xBB\xBF".to_vec();
        content.extend_from_slice(format!("{}\nProvincial,Ontario,,CABG,Volume,2020,Cases,5\n", HEADER).as_bytes());
        let file = write_csv(&content);
        let table = extract_from(file.path(), &settings_for_csv(0)).unwrap();
        assert_eq!(table.rows[0].reporting_level, Cell::Text("Provincial".to_string()));

        // 0xE9 is 'é' in Windows-1252 and invalid as a lone UTF-8 byte
        let mut latin = format!("{}\nProvincial,Qu", HEADER).into_bytes();
        latin.push(0xE9);
        latin.extend_from_slice(b"bec,,CABG,Volume,2020,Cases,5\n");
        let file = write_csv(&latin);
        let table = extract_from(file.path(), &settings_for_csv(0)).unwrap();
        assert_eq!(table.rows[0].province, Cell::Text("Québec".to_string()));
    }

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_file() {
        let err = extract_from(Path::new("/nonexistent/waits.xlsx"), &SourceSettings::default())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound(_)));
    }

    #[test]
    fn test_empty_after_header_skip() {
        let content = format!("title\n,,,,,,,\n{}\n", HEADER);
        let file = write_csv(content.as_bytes());
        let err = extract_from(file.path(), &settings_for_csv(2)).unwrap_err();
        assert!(matches!(err, ExtractionError::Empty { header_row: 2 }));
    }

    #[test]
    fn test_too_narrow_sheet() {
        let file = write_csv(b"a,b,c\n1,2,3\n");
        let err = extract_from(file.path(), &settings_for_csv(0)).unwrap_err();
        assert!(matches!(err, ExtractionError::TooNarrow { expected: 8, found: 3 }));
    }

    #[test]
    fn test_unreadable_workbook() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"not a zip archive").unwrap();
        let err = extract_from(file.path(), &SourceSettings::default()).unwrap_err();
        assert!(matches!(err, ExtractionError::Workbook { .. }));
    }

    // -------------------------------------------------------------------------
    // Workbooks
    // -------------------------------------------------------------------------

    /// Two sheets; the data sheet leaves row 1 blank and puts a title in row 2.
    fn workbook_fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/wait_times.xlsx")
    }

    #[test]
    fn test_extract_workbook_counts_rows_from_a1() {
        let table = extract_from(&workbook_fixture(), &SourceSettings::default()).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.fingerprint.starts_with("sha256:"));

        let first = &table.rows[0];
        assert_eq!(first.province.text(), Some("Ontario".to_string()));
        assert_eq!(first.region, Cell::Empty);
        assert_eq!(first.year, Cell::Number(2023.0));
        assert_eq!(first.result, Cell::Number(150.5));
        assert_eq!(table.rows[2].result.text(), Some("n/a".to_string()));
    }

    #[test]
    fn test_extract_workbook_wrong_sheet_lists_available() {
        let settings = SourceSettings {
            sheet_name: "Wait times 2024".to_string(),
            ..SourceSettings::default()
        };
        match extract_from(&workbook_fixture(), &settings).unwrap_err() {
            ExtractionError::SheetMissing { sheet, available } => {
                assert_eq!(sheet, "Wait times 2024");
                assert_eq!(available, vec!["Notes", "Wait times 2008 to 2023"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // Cells
    // -------------------------------------------------------------------------

    #[test]
    fn test_cell_text_forms() {
        assert_eq!(Cell::Number(2019.0).text(), Some("2019".to_string()));
        assert_eq!(Cell::Number(12.5).text(), Some("12.5".to_string()));
        assert_eq!(Cell::Text("  Ontario ".to_string()).text(), Some("Ontario".to_string()));
        assert_eq!(Cell::Text("   ".to_string()).text(), None);
        assert!(Cell::Empty.is_blank());
    }

    #[test]
    fn test_calamine_cell_conversion() {
        assert_eq!(Cell::from(&Data::Int(7)), Cell::Number(7.0));
        assert_eq!(Cell::from(&Data::Float(1.5)), Cell::Number(1.5));
        assert_eq!(Cell::from(&Data::Empty), Cell::Empty);
        assert_eq!(Cell::from(&Data::String("x".into())), Cell::Text("x".to_string()));
    }
}
