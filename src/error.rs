use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate record for {0}")]
    DuplicateDate(NaiveDate),

    #[error("row {row}: invalid value {value:?} in column {column}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row}: invalid date {value:?}")]
    InvalidDate { row: usize, value: String },

    #[error("missing date column")]
    MissingDateColumn,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("records are not in ascending date order at {0}")]
    Unsorted(NaiveDate),

    #[error("no {metric} data in the record store")]
    NoData { metric: String },

    #[error("{metric}: need at least {needed} days of data, found {found}")]
    InsufficientHistory {
        metric: String,
        needed: usize,
        found: usize,
    },

    #[error("{metric}: required field {field} missing on {date}")]
    MissingField {
        metric: String,
        field: String,
        date: NaiveDate,
    },
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("chart rendering failed at {step}: {source}")]
    Render {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("post submission failed at {step}: {source}")]
    Submit {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("post submission timed out at {step} after {millis}ms")]
    Timeout { step: String, millis: u128 },
}
