use chrono::NaiveDate;
use serde::Serialize;

/// A small period-keyed table: one `NaiveDate` per row and any number of
/// named `f64` columns of the same length.
///
/// This is the only tabular structure in the app. Base data, the impact
/// model and the derived scenario table are all `Frame`s; the chart and
/// export endpoints serialize it directly.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    pub periods: Vec<NaiveDate>,
    columns: Vec<Column>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Frame {
    pub fn new(periods: Vec<NaiveDate>) -> Self {
        Frame {
            periods,
            columns: Vec::new(),
        }
    }

    /// Number of rows (periods).
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Append a column. Panics if the length does not match the period
    /// count; callers construct columns from the periods they already hold.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        assert_eq!(
            values.len(),
            self.periods.len(),
            "column length must match period count"
        );
        let name = name.into();
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == name) {
            existing.values = values;
        } else {
            self.columns.push(Column { name, values });
        }
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Wide → long reshape for the chart: one `(period, metric, value)` row
    /// per period × requested column, in the requested column order.
    /// Unknown names are skipped.
    pub fn melt(&self, metrics: &[String]) -> Vec<LongRow> {
        let mut rows = Vec::new();
        for name in metrics {
            if let Some(values) = self.column(name) {
                for (period, value) in self.periods.iter().zip(values) {
                    rows.push(LongRow {
                        period: *period,
                        metric: name.clone(),
                        value: *value,
                    });
                }
            }
        }
        rows
    }
}

/// One point of the long-form chart payload.
#[derive(Clone, Debug, Serialize)]
pub struct LongRow {
    pub period: NaiveDate,
    pub metric: String,
    pub value: f64,
}
