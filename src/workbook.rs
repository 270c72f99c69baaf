//! Narrow interface to the uploaded workbook: `parse_workbook(bytes)`
//! either yields the two model tables or a [`SchemaError`]. The rest of the
//! app never touches xlsx internals.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use chrono::{Days, NaiveDate};
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::SchemaError;
use crate::frame::Frame;
use crate::state::WorkbookTables;

pub const SHEET_BASEDATA: &str = "Basedata";
/// Impact-model sheet, spelled the way the source workbook spells it.
pub const SHEET_IMPACT: &str = "DAU_Model_imapct";

/// Period key column, present in both sheets.
pub const PERIOD_COLUMN: &str = "week_end_date";
pub const BASE_COLUMNS: [&str; 4] = ["installs", "nurr", "curr", "engagement"];
pub const IMPACT_COLUMNS: [&str; 3] = ["new_user_weight", "retained_weight", "engagement_weight"];

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Parse uploaded bytes as an xlsx workbook and extract the base-data and
/// impact-model tables.
///
/// Sheets other than the two required ones are ignored, as are columns
/// beyond the required set. Periods accept Excel serial numbers or ISO
/// `YYYY-MM-DD` text; metric cells accept numbers or numeric text, with
/// blanks reading as 0. Both sheets must cover the same periods in the same
/// order.
pub fn parse_workbook(bytes: &[u8]) -> Result<WorkbookTables, SchemaError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let workbook_xml = read_part_required(&mut archive, WORKBOOK_PART)?;
    let rels_xml = read_part_required(&mut archive, WORKBOOK_RELS_PART)?;
    let shared_strings = match read_part_optional(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_ids = parse_sheet_index(&workbook_xml)?;
    let rel_targets = parse_relationships(&rels_xml)?;

    let base_rows = read_sheet(
        &mut archive,
        &sheet_ids,
        &rel_targets,
        &shared_strings,
        SHEET_BASEDATA,
    )?;
    let impact_rows = read_sheet(
        &mut archive,
        &sheet_ids,
        &rel_targets,
        &shared_strings,
        SHEET_IMPACT,
    )?;

    let base = build_frame(SHEET_BASEDATA, &base_rows, &BASE_COLUMNS)?;
    let impact = build_frame(SHEET_IMPACT, &impact_rows, &IMPACT_COLUMNS)?;

    if base.len() != impact.len() {
        return Err(SchemaError::PeriodMismatch {
            row: base.len().min(impact.len()),
        });
    }
    for (row, (a, b)) in base.periods.iter().zip(&impact.periods).enumerate() {
        if a != b {
            return Err(SchemaError::PeriodMismatch { row });
        }
    }

    Ok(WorkbookTables { base, impact })
}

/// One raw cell as it appears in `sheetData`.
#[derive(Clone, Debug, PartialEq)]
enum RawCell {
    Empty,
    Number(f64),
    Text(String),
}

fn read_part_required<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &'static str,
) -> Result<Vec<u8>, SchemaError> {
    read_part_optional(archive, name)?.ok_or(SchemaError::MissingPart(name))
}

fn read_part_optional<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, SchemaError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// `xl/workbook.xml` → ordered (sheet name, relationship id) pairs.
fn parse_sheet_index(xml: &[u8]) -> Result<Vec<(String, String)>, SchemaError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rid = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"name" => name = Some(attr.unescape_value()?.into_owned()),
                        // the id attribute is namespaced (`r:id`)
                        key if key.ends_with(b"id") => {
                            rid = Some(attr.unescape_value()?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(name), Some(rid)) = (name, rid) {
                    sheets.push((name, rid));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// `xl/_rels/workbook.xml.rels` → relationship id → part target.
fn parse_relationships(xml: &[u8]) -> Result<BTreeMap<String, String>, SchemaError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut targets = BTreeMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// `xl/sharedStrings.xml` → string table. Rich-text runs are flattened by
/// concatenating their `<t>` segments; phonetic runs are skipped.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, SchemaError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_rph = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_rph = true,
                b"t" if current.is_some() && !in_rph => in_t = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        items.push(s);
                    }
                }
                b"rPh" => in_rph = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(t) if in_t => {
                if let Some(s) = &mut current {
                    s.push_str(&t.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(items)
}

/// Locate a sheet by name and parse its `sheetData` into raw rows.
fn read_sheet<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    sheet_ids: &[(String, String)],
    rel_targets: &BTreeMap<String, String>,
    shared_strings: &[String],
    name: &'static str,
) -> Result<Vec<Vec<RawCell>>, SchemaError> {
    let rid = sheet_ids
        .iter()
        .find(|(sheet_name, _)| sheet_name == name)
        .map(|(_, rid)| rid)
        .ok_or(SchemaError::MissingSheet(name))?;
    let target = rel_targets
        .get(rid)
        .ok_or(SchemaError::MissingSheet(name))?;
    let part = resolve_part_name(target);
    let xml = read_part_optional(archive, &part)?.ok_or(SchemaError::MissingSheet(name))?;
    parse_sheet_data(&xml, shared_strings)
}

/// Workbook relationship targets are relative to `xl/`; tolerate absolute
/// forms as well.
fn resolve_part_name(target: &str) -> String {
    let target = target.strip_prefix('/').unwrap_or(target);
    if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{target}")
    }
}

/// Event-loop over one worksheet's `sheetData`, producing rows of raw cells
/// indexed by their column position.
fn parse_sheet_data(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<Vec<RawCell>>, SchemaError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<RawCell>> = Vec::new();
    let mut in_sheet_data = false;
    let mut current_row: Vec<RawCell> = Vec::new();
    let mut next_col = 0usize;

    // per-cell state
    let mut cell_col = 0usize;
    let mut cell_type: Option<String> = None;
    let mut value_text: Option<String> = None;
    let mut inline_text: Option<String> = None;
    let mut in_v = false;
    let mut in_is_t = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = true,
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = false,

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                current_row = Vec::new();
                next_col = 0;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                rows.push(std::mem::take(&mut current_row));
            }

            Event::Start(e) | Event::Empty(e)
                if in_sheet_data && e.local_name().as_ref() == b"c" =>
            {
                cell_col = next_col;
                cell_type = None;
                value_text = None;
                inline_text = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"r" => {
                            if let Some(col) = column_index(&attr.unescape_value()?) {
                                cell_col = col;
                            }
                        }
                        b"t" => cell_type = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                // self-closing cells never reach the End arm; they stay Empty
                next_col = cell_col + 1;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let cell = interpret_cell(
                    cell_type.as_deref(),
                    value_text.take(),
                    inline_text.take(),
                    shared_strings,
                );
                place_cell(&mut current_row, cell_col, cell);
            }

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"v" => in_v = true,
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"v" => in_v = false,
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"t" => in_is_t = true,
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"t" => in_is_t = false,

            Event::Text(t) if in_v => {
                let text = t.unescape()?.into_owned();
                match &mut value_text {
                    Some(existing) => existing.push_str(&text),
                    None => value_text = Some(text),
                }
            }
            Event::Text(t) if in_is_t => {
                let text = t.unescape()?.into_owned();
                match &mut inline_text {
                    Some(existing) => existing.push_str(&text),
                    None => inline_text = Some(text),
                }
            }

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn interpret_cell(
    cell_type: Option<&str>,
    value_text: Option<String>,
    inline_text: Option<String>,
    shared_strings: &[String],
) -> RawCell {
    match cell_type {
        Some("s") => {
            let resolved = value_text
                .as_deref()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .and_then(|idx| shared_strings.get(idx).cloned());
            match resolved {
                Some(s) => RawCell::Text(s),
                None => RawCell::Empty,
            }
        }
        Some("inlineStr") => match inline_text {
            Some(s) => RawCell::Text(s),
            None => RawCell::Empty,
        },
        Some("str") => match value_text {
            Some(s) => RawCell::Text(s),
            None => RawCell::Empty,
        },
        Some("b") => match value_text.as_deref().map(str::trim) {
            Some("1") => RawCell::Number(1.0),
            Some("0") => RawCell::Number(0.0),
            _ => RawCell::Empty,
        },
        // untyped and `t="n"` cells are numeric
        _ => match value_text {
            Some(v) => match v.trim().parse::<f64>() {
                Ok(n) => RawCell::Number(n),
                Err(_) => RawCell::Text(v),
            },
            None => RawCell::Empty,
        },
    }
}

fn place_cell(row: &mut Vec<RawCell>, col: usize, cell: RawCell) {
    if row.len() <= col {
        row.resize(col + 1, RawCell::Empty);
    }
    row[col] = cell;
}

/// `"BC23"` → zero-based column index (`A` = 0).
fn column_index(a1: &str) -> Option<usize> {
    let letters: String = a1.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

/// Assemble a typed frame from raw rows: the first non-empty row is the
/// header, the period column keys the rows, and each required metric column
/// becomes an `f64` series.
fn build_frame(
    sheet: &'static str,
    rows: &[Vec<RawCell>],
    required: &[&'static str],
) -> Result<Frame, SchemaError> {
    let mut iter = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.iter().any(|c| *c != RawCell::Empty));

    let (_, header_row) = iter.next().ok_or(SchemaError::EmptySheet(sheet))?;
    let headers: Vec<String> = header_row
        .iter()
        .map(|c| match c {
            RawCell::Text(s) => s.trim().to_ascii_lowercase(),
            RawCell::Number(n) => n.to_string(),
            RawCell::Empty => String::new(),
        })
        .collect();

    let find = |name: &'static str| -> Result<usize, SchemaError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(SchemaError::MissingColumn {
                sheet,
                column: name,
            })
    };

    let period_idx = find(PERIOD_COLUMN)?;
    let mut metric_idx = Vec::with_capacity(required.len());
    for name in required {
        metric_idx.push(find(name)?);
    }

    let mut periods = Vec::new();
    let mut series: Vec<Vec<f64>> = vec![Vec::new(); required.len()];
    let mut data_rows = 0usize;
    for (row_idx, row) in iter {
        let excel_row = row_idx as u32 + 1;
        periods.push(parse_period(sheet, excel_row, row.get(period_idx))?);
        for (slot, &col) in series.iter_mut().zip(&metric_idx) {
            slot.push(parse_number(
                sheet,
                excel_row,
                &headers[col],
                row.get(col),
            )?);
        }
        data_rows += 1;
    }
    if data_rows == 0 {
        return Err(SchemaError::EmptySheet(sheet));
    }

    let mut frame = Frame::new(periods);
    for (name, values) in required.iter().zip(series) {
        frame.push_column(*name, values);
    }
    Ok(frame)
}

fn parse_period(
    sheet: &'static str,
    row: u32,
    cell: Option<&RawCell>,
) -> Result<NaiveDate, SchemaError> {
    let bad = |value: String| SchemaError::BadCell {
        sheet,
        row,
        column: PERIOD_COLUMN.to_string(),
        expected: "a date",
        value,
    };
    match cell {
        Some(RawCell::Number(serial)) => {
            excel_serial_to_date(*serial).ok_or_else(|| bad(serial.to_string()))
        }
        Some(RawCell::Text(s)) => {
            let trimmed = s.trim();
            // ISO text, with or without a time suffix
            let date_part = trimmed.split(&[' ', 'T'][..]).next().unwrap_or(trimmed);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| bad(s.clone()))
        }
        Some(RawCell::Empty) | None => Err(bad(String::new())),
    }
}

/// 1900-date-system serial → calendar date. The 1899-12-30 epoch absorbs
/// Excel's phantom 1900-02-29 for any modern date.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > 1_000_000.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.trunc() as u64))
}

fn parse_number(
    sheet: &'static str,
    row: u32,
    column: &str,
    cell: Option<&RawCell>,
) -> Result<f64, SchemaError> {
    match cell {
        Some(RawCell::Number(n)) => Ok(*n),
        Some(RawCell::Text(s)) => {
            s.trim().parse::<f64>().map_err(|_| SchemaError::BadCell {
                sheet,
                row,
                column: column.to_string(),
                expected: "a number",
                value: s.clone(),
            })
        }
        Some(RawCell::Empty) | None => Ok(0.0),
    }
}
