use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("malformed period label: {0:?}")]
    PeriodLabel(String),

    #[error("unknown usage category: {0:?}")]
    UnknownUsage(String),

    #[error("unknown record kind: {0:?}")]
    UnknownKind(String),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("narrative #{0} not available")]
    MissingNarrative(usize),

    #[error("malformed slot id: {0:?}")]
    Slot(String),

    #[error("slot {0} is not in the template")]
    UnknownSlot(String),

    #[error("slot {slot} expects {expected}, got {found}")]
    SlotKind {
        slot: String,
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ReportError>;
