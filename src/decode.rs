use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;

/// One spreadsheet row as uploaded: header label -> raw cell text.
/// Row numbers are spreadsheet row numbers (header is row 1).
#[derive(Debug, Clone)]
pub struct RawRow {
    pub number: usize,
    pub cells: HashMap<String, String>,
}

/// Decode an uploaded file into raw rows. Unreadable files and unsupported
/// extensions yield an empty batch; zero rows is a legitimate outcome the
/// caller needs no special error path for.
pub fn decode_rows(path: &Path) -> Vec<RawRow> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    let decoded = match ext.as_str() {
        "csv" => decode_csv(path),
        "xlsx" | "xls" => decode_sheet(path),
        _ => {
            log::warn!("unsupported import extension: {}", path.display());
            return Vec::new();
        }
    };

    match decoded {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("failed to decode {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn decode_csv(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows: Vec<RawRow> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let mut cells = HashMap::new();
        for (col, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = record.get(col).unwrap_or("").trim().to_string();
            cells.insert(header.clone(), value);
        }
        rows.push(RawRow {
            number: i + 2,
            cells,
        });
    }
    Ok(rows)
}

fn decode_sheet(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let Some(first_sheet) = sheet_names.first() else {
        anyhow::bail!("workbook has no sheets");
    };
    let range = workbook.worksheet_range(first_sheet)?;

    let mut iter = range.rows();
    let Some(header_row) = iter.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|c| cell_to_string(c).trim().to_string())
        .collect();

    let mut rows: Vec<RawRow> = Vec::new();
    for (i, sheet_row) in iter.enumerate() {
        let mut cells = HashMap::new();
        for (col, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = sheet_row.get(col).map(cell_to_string).unwrap_or_default();
            cells.insert(header.clone(), value.trim().to_string());
        }
        rows.push(RawRow {
            number: i + 2,
            cells,
        });
    }
    Ok(rows)
}

/// Coerce a worksheet cell to the text the rest of the pipeline sees.
/// Integral numbers lose the trailing ".0"; date cells surface their
/// Excel serial day, which the DOB parser accepts directly.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_to_string(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => float_to_string(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn float_to_string(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
