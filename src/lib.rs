/*!
# DAU Scenario Dashboard

A browser-based dashboard for exploring a Daily-Active-Users model, built in
Rust.

## Overview

An analyst uploads the *DAU model* `.xlsx` workbook, tweaks scenario drivers
(install multiplier, retention delta, engagement delta) with sliders, picks
up to four KPI columns to chart, and sees the recalculated `*_calc` series
update live. A collapsible data explorer shows the full derived table and
exports it as CSV. Nothing persists beyond the browser session.

## Architecture

- **Workbook loader** (`workbook`): narrow interface over the uploaded
  bytes — `parse_workbook(bytes)` yields the base-data and impact-model
  tables or a schema error. Built directly on `zip` + `quick-xml`.
- **Scenario recalculator** (`scenario`): the one piece of real logic, a
  pure function from (base data, impact weights, drivers) to the derived
  table. The cohort-decay arithmetic is parameterized entirely by the
  impact sheet's weight columns.
- **Session state store** (`state`): loaded tables, current drivers and
  metric selection, reset on every upload.
- **HTTP surface** (`app`): axum router serving the embedded page, static
  assets, and the JSON endpoints the browser UI drives.
- **Export** (`export`): CSV serialization of the derived table.

The reactive loop is: upload populates state once, every slider or picker
interaction writes to state, and each read endpoint recomputes the derived
table fresh from (tables, drivers) — no hidden accumulation between
recalculations.
*/

pub mod app;
pub mod error;
pub mod export;
pub mod frame;
pub mod scenario;
pub mod state;
pub mod workbook;
