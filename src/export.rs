use crate::frame::Frame;
use crate::workbook::PERIOD_COLUMN;

/// Serialize a frame to CSV: header row of column names with the period
/// column first, one row per period, RFC-4180 escaping. Exports exactly the
/// columns the frame holds; no values are transformed.
pub fn to_csv(frame: &Frame) -> String {
    let mut csv = String::new();

    csv.push_str(PERIOD_COLUMN);
    for col in frame.columns() {
        csv.push(',');
        push_escaped(&mut csv, &col.name);
    }
    csv.push('\n');

    for (i, period) in frame.periods.iter().enumerate() {
        csv.push_str(&period.format("%Y-%m-%d").to_string());
        for col in frame.columns() {
            csv.push(',');
            push_escaped(&mut csv, &format_value(col.values[i]));
        }
        csv.push('\n');
    }

    csv
}

/// Whole numbers print without a trailing `.0` so the file matches what the
/// table shows.
fn format_value(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn push_escaped(csv: &mut String, value: &str) {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        csv.push('"');
        csv.push_str(&value.replace('"', "\"\""));
        csv.push('"');
    } else {
        csv.push_str(value);
    }
}
