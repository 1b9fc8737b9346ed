//! Weather source errors and their classification into request failures.

use nimbus_core::error::ReqwestErrorExt;
use nimbus_core::{AppError, NetworkError, RequestErrorType, WeatherError};
use thiserror::Error;

/// Failure of a single source or provider call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No results for {0}")]
    EmptyResult(String),

    #[error("API limit reached: {0}")]
    ApiLimit(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Missing credential for {0}")]
    MissingCredential(String),

    #[error("Location has no coordinate")]
    MissingCoordinate,

    #[error("No client for {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Pipeline stage a source call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Geocode,
    Weather,
}

impl SourceError {
    /// Map to the failure reason reported to callers.
    pub fn classify(&self, stage: Stage) -> RequestErrorType {
        match self {
            Self::ApiLimit(_) | Self::Unauthorized(_) | Self::MissingCredential(_) => {
                RequestErrorType::ApiLimitReached
            }
            Self::EmptyResult(_) | Self::MissingCoordinate => RequestErrorType::LocationFailed,
            _ => match stage {
                Stage::Geocode => RequestErrorType::LocationFailed,
                Stage::Weather => RequestErrorType::WeatherReqFailed,
            },
        }
    }
}

impl From<SourceError> for AppError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Network(e) => AppError::Network(e.into_network_error()),
            SourceError::Status { status, message } => {
                AppError::Network(NetworkError::ServerError { status, message })
            }
            SourceError::Parse(m) => AppError::Network(NetworkError::InvalidResponse(m)),
            SourceError::EmptyResult(what) => AppError::Weather(WeatherError::LocationNotFound(what)),
            SourceError::ApiLimit(m) | SourceError::Unauthorized(m) => {
                AppError::Weather(WeatherError::ApiError(m))
            }
            SourceError::MissingCredential(source) => {
                AppError::Weather(WeatherError::MissingCredential(source))
            }
            SourceError::MissingCoordinate => AppError::Request(RequestErrorType::LocationFailed),
            SourceError::Unsupported(source) => AppError::Weather(WeatherError::Unsupported(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_decides_generic_failures() {
        let err = SourceError::Parse("bad".into());
        assert_eq!(err.classify(Stage::Geocode), RequestErrorType::LocationFailed);
        assert_eq!(err.classify(Stage::Weather), RequestErrorType::WeatherReqFailed);
    }

    #[test]
    fn test_limit_and_empty_ignore_stage() {
        let limit = SourceError::ApiLimit("quota".into());
        assert_eq!(limit.classify(Stage::Weather), RequestErrorType::ApiLimitReached);
        let unauthorized = SourceError::Unauthorized("401".into());
        assert_eq!(unauthorized.classify(Stage::Geocode), RequestErrorType::ApiLimitReached);
        let empty = SourceError::EmptyResult("geoposition".into());
        assert_eq!(empty.classify(Stage::Weather), RequestErrorType::LocationFailed);
    }

    #[test]
    fn test_unsupported_source_is_weather_failure() {
        let err = SourceError::Unsupported("China Weather".into());
        assert_eq!(err.classify(Stage::Weather), RequestErrorType::WeatherReqFailed);
        let app: AppError = err.into();
        assert!(matches!(app, AppError::Weather(WeatherError::Unsupported(_))));
    }

    #[test]
    fn test_into_app_error() {
        let app: AppError = SourceError::MissingCredential("AccuWeather".into()).into();
        assert!(matches!(app, AppError::Weather(WeatherError::MissingCredential(_))));
        let app: AppError = SourceError::Status { status: 502, message: "bad gateway".into() }.into();
        assert_eq!(
            app.user_message(),
            "The server is experiencing issues. Please try again later."
        );
    }
}
