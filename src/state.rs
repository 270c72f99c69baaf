use serde::Serialize;

use crate::error::ComputeError;
use crate::frame::Frame;
use crate::scenario::{self, Drivers, KPI_COLUMNS};

/// At most this many metrics can be charted at once; longer selections are
/// truncated.
pub const MAX_METRICS: usize = 4;

/// The two tables extracted from an uploaded workbook.
#[derive(Clone, Debug)]
pub struct WorkbookTables {
    pub base: Frame,
    pub impact: Frame,
}

/// Everything the dashboard remembers for one browser session: the loaded
/// tables, the current drivers and the ordered metric selection. Nothing
/// here survives a restart, and a new upload resets the lot.
#[derive(Debug, Default)]
pub struct SessionState {
    tables: Option<WorkbookTables>,
    drivers: Drivers,
    metrics: Vec<String>,
}

/// Driver values plus selection, as reported to the browser.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub loaded: bool,
    pub drivers: Drivers,
    pub metrics: Vec<String>,
    pub available_metrics: Vec<String>,
}

impl SessionState {
    /// Replace the loaded tables. Drivers go back to their defaults and the
    /// selection resets to the first available KPI, exactly as if the
    /// session had just started with this workbook.
    pub fn load(&mut self, tables: WorkbookTables) {
        self.tables = Some(tables);
        self.drivers = Drivers::default();
        self.metrics = vec![KPI_COLUMNS[0].to_string()];
    }

    pub fn is_loaded(&self) -> bool {
        self.tables.is_some()
    }

    pub fn drivers(&self) -> Drivers {
        self.drivers
    }

    /// Store new driver values, clamped into their slider ranges.
    pub fn set_drivers(&mut self, drivers: Drivers) {
        self.drivers = drivers.clamped();
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Store a new ordered metric selection. Unknown column names are
    /// dropped, anything beyond [`MAX_METRICS`] is truncated, and an empty
    /// result falls back to the default KPI.
    pub fn set_metrics(&mut self, names: Vec<String>) {
        let available = self.available_metrics();
        let mut kept: Vec<String> = Vec::new();
        for name in names {
            if available.iter().any(|a| a == &name) && !kept.contains(&name) {
                kept.push(name);
            }
        }
        kept.truncate(MAX_METRICS);
        if kept.is_empty() {
            kept.push(KPI_COLUMNS[0].to_string());
        }
        self.metrics = kept;
    }

    /// Chartable column names: the derived KPIs first, then the raw base
    /// columns.
    pub fn available_metrics(&self) -> Vec<String> {
        let mut names: Vec<String> = KPI_COLUMNS.iter().map(|s| s.to_string()).collect();
        if let Some(tables) = &self.tables {
            for name in tables.base.column_names() {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            loaded: self.is_loaded(),
            drivers: self.drivers,
            metrics: self.metrics.clone(),
            available_metrics: if self.is_loaded() {
                self.available_metrics()
            } else {
                Vec::new()
            },
        }
    }

    /// Recompute the scenario table from the current state.
    ///
    /// `selection = None` materializes every derived column (table/export
    /// path); `Some` limits output to the current chart selection. Returns
    /// `Ok(None)` when no workbook has been uploaded yet.
    pub fn derived(&self, minimal: bool) -> Result<Option<Frame>, ComputeError> {
        let Some(tables) = &self.tables else {
            return Ok(None);
        };
        let selection = minimal.then_some(self.metrics.as_slice());
        scenario::recalc(&tables.base, &tables.impact, &self.drivers, selection).map(Some)
    }
}
