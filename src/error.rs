use thiserror::Error;

/// Problems with the shape or content of an uploaded workbook.
///
/// All of these are user-facing: the upload handler turns them into an
/// inline error message and leaves the previously loaded tables untouched.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("workbook is not a valid xlsx archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("xml attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("io error reading workbook: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required part: {0}")]
    MissingPart(&'static str),

    #[error("workbook has no sheet named '{0}'")]
    MissingSheet(&'static str),

    #[error("sheet '{sheet}' is missing required column '{column}'")]
    MissingColumn {
        sheet: &'static str,
        column: &'static str,
    },

    #[error("sheet '{0}' has a header row but no data rows")]
    EmptySheet(&'static str),

    #[error("sheet '{sheet}' row {row}: cannot read '{column}' as {expected}: {value:?}")]
    BadCell {
        sheet: &'static str,
        row: u32,
        column: String,
        expected: &'static str,
        value: String,
    },

    #[error("impact sheet periods do not match base data (row {row})")]
    PeriodMismatch { row: usize },
}

/// Numeric failures inside the recalculation.
///
/// These should not happen for well-formed workbooks; when they do (e.g. a
/// weight column holding extreme values that overflow to infinity) the
/// handler surfaces a generic computed-value warning instead of crashing.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("column '{column}' is not finite at period index {index}")]
    NonFinite { column: &'static str, index: usize },

    #[error("required column '{0}' is absent from the loaded tables")]
    MissingInput(&'static str),

    #[error("column '{column}' length {actual} does not match period count {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
}
