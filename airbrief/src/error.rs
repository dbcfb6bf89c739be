use std::io;

use config::ConfigError;
use thiserror::Error;

pub(crate) type ApplicationResult<T> = Result<T, ApplicationError>;

#[derive(Debug, Error)]
pub(crate) enum ApplicationError {
    #[error("Error regarding config: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("System input/output error: {0}")]
    IoError(#[from] io::Error),
    #[error("Error with reqwest: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Failed to parse wind string: {0}")]
    WindParseError(#[from] windcalc::WindParseError),
    #[error("Invalid station {0:?}, expected a 4 letter ICAO code")]
    InvalidStation(String),
    #[error("Upstream weather unavailable for {station}: {message}")]
    UpstreamWeatherUnavailable { station: String, message: String },
}
