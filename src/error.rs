use thiserror::Error;

pub type Result<T> = std::result::Result<T, OdaError>;

#[derive(Error, Debug)]
pub enum OdaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("No data for indicator {indicator}: {path} not found")]
    MissingData { indicator: String, path: String },

    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    #[error("Unknown report: {0}")]
    UnknownReport(String),

    #[error("Duplicate pivot entry for {indicator} at ({keys})")]
    DuplicatePivotEntry { keys: String, indicator: String },

    #[error("Invalid year range: {start}..={end}")]
    InvalidYearRange { start: i64, end: i64 },
}
