use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use glob::glob;
use log::{debug, warn};
use plant_series::{RawCell, RawTable};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static SUBSTATION_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)(emelda)_(?:\d|ft1)"));

/// Input files of a folder with any of the given extensions, sorted by path.
pub fn discover_files(folder: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for ext in extensions {
        let pattern = folder.join(format!("*.{ext}"));
        let pattern = pattern
            .to_str()
            .with_context(|| format!("Non UTF-8 input folder {}", folder.display()))?;
        for entry in glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {e}"),
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Substation a meter export belongs to, e.g. `EMELDA_2` or `Emelda_FT1`,
/// as written in the file path.
pub fn substation_name(path: &Path) -> Result<Option<String>> {
    let pattern = SUBSTATION_PATTERN.as_ref().map_err(Clone::clone)?;
    let text = path.to_string_lossy();
    Ok(pattern.find(&text).map(|m| m.as_str().to_string()))
}

fn data_to_raw(cell: &Data) -> RawCell {
    match cell {
        Data::Empty | Data::Error(_) => RawCell::Empty,
        Data::Int(v) => RawCell::Number(*v as f64),
        Data::Float(v) => RawCell::Number(*v),
        Data::Bool(v) => RawCell::Text(v.to_string()),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => RawCell::Text(s.clone()),
        Data::DateTime(dt) => RawCell::Number(dt.as_f64()),
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(v) if v.fract() == 0.0 => format!("{}", *v as i64),
        other => other.to_string(),
    }
}

/// First sheet of an xls/xlsx export; the first row is the header.
pub fn read_workbook(path: &Path) -> Result<RawTable> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Failed to open workbook {}", path.display()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .with_context(|| format!("No sheets found in {}", path.display()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("Failed to read sheet '{sheet}' of {}", path.display()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|row| row.iter().map(header_text).collect())
        .unwrap_or_default();
    let body: Vec<Vec<RawCell>> = rows.map(|row| row.iter().map(data_to_raw).collect()).collect();

    debug!("{}: {} columns, {} rows", path.display(), headers.len(), body.len());
    Ok(RawTable::new(headers, body))
}

/// Text of a CSV export: UTF-8, or Latin-1 when the bytes are not valid UTF-8.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

pub fn read_csv(path: &Path, delimiter: char) -> Result<RawTable> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = decode_text(bytes);
    let delimiter = u8::try_from(delimiter).with_context(|| format!("Delimiter '{delimiter}' is not a single byte"))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        rows.push(
            record
                .iter()
                .map(|field| if field.is_empty() { RawCell::Empty } else { RawCell::text(field) })
                .collect(),
        );
    }

    debug!("{}: {} columns, {} rows", path.display(), headers.len(), rows.len());
    Ok(RawTable::new(headers, rows))
}

/// Reads any supported export by extension.
pub fn read_raw_table(path: &Path, csv_delimiter: char) -> Result<RawTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => read_csv(path, csv_delimiter),
        _ => read_workbook(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use plant_series::Normalizer;
    use std::io::Write;

    #[test]
    fn test_substation_from_path() {
        assert_eq!(
            substation_name(Path::new("2024_12/01_raw_data/04_meters/EMELDA_2_dic.csv"))
                .unwrap()
                .as_deref(),
            Some("EMELDA_2")
        );
        assert_eq!(
            substation_name(Path::new("meters/emelda_ft1/export.csv"))
                .unwrap()
                .as_deref(),
            Some("emelda_ft1")
        );
        assert_eq!(substation_name(Path::new("meters/other.csv")).unwrap(), None);
    }

    #[test]
    fn test_read_csv_keeps_text_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meter.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Fecha;Energia Activa").unwrap();
        writeln!(file, "01-12-2024 00:15:00;1 234.5").unwrap();
        writeln!(file, "01-12-2024 00:30:00;").unwrap();

        let raw = read_raw_table(&path, ';').unwrap();
        assert_eq!(raw.headers, vec!["Fecha", "Energia Activa"]);
        assert_eq!(raw.height(), 2);
        assert_eq!(raw.cell(0, 1), &RawCell::text("1 234.5"));
        assert_eq!(raw.cell(1, 1), &RawCell::Empty);
    }

    #[test]
    fn test_sdi_export_with_repeated_mm_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cabin1.csv");
        std::fs::write(
            &path,
            "L,gg,mm,aaaa,hh,mm,ss,mmm,PN1_S11_AN10028\nx,1,12,2024,13,45,0,y,612.5\n",
        )
        .unwrap();

        let raw = read_raw_table(&path, ',').unwrap();
        assert_eq!(raw.headers[2], "mm");
        assert_eq!(raw.headers[5], "mm");

        let table = Normalizer::scada_sdi().normalize(&raw).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap().and_hms_opt(13, 45, 0).unwrap();
        assert_eq!(table.timestamps(), &[expected]);
        assert_eq!(table.channel_names(), vec!["PN1_S11_AN10028"]);
        assert_eq!(table.value(0, "PN1_S11_AN10028"), Some(Some(612.5)));
    }

    #[test]
    fn test_read_csv_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prmte.csv");
        // "AÑO" in Latin-1
        std::fs::write(&path, b"A\xd1O,MES\n2024,12\n").unwrap();
        let raw = read_csv(&path, ',').unwrap();
        assert_eq!(raw.headers[0], "AÑO");
    }

    #[test]
    fn test_discover_files_sorted_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.xls", "c.txt", "d.CSV"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let files = discover_files(dir.path(), &["xls".to_string(), "csv".to_string()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.xls", "b.csv"]);
    }
}
