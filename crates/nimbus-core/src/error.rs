//! Centralized error types for Nimbus.
//!
//! This module provides a typed error hierarchy that:
//! - Classifies acquisition failures into the reasons callers react to
//! - Provides user-friendly messages suitable for UI display
//! - Preserves full error context for debugging/logging

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a UI-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("Request failed: {0}")]
    Request(#[from] RequestErrorType),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Database(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Request(e) => e.user_message(),
            AppError::Cancelled => "The operation was cancelled.",
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }

    /// What to offer the user next, when the failure calls for more than a retry.
    pub fn suggested_action(&self) -> Option<UserAction> {
        match self {
            AppError::Request(kind) => Some(kind.suggested_action()),
            AppError::Network(_) => Some(UserAction::OpenNetworkSettings),
            AppError::Config(_)
            | AppError::Weather(WeatherError::MissingCredential(_) | WeatherError::Unsupported(_)) => {
                Some(UserAction::EditConfig)
            }
            _ => None,
        }
    }
}

/// Why a location or weather acquisition failed.
///
/// This is the taxonomy surfaced to callers of the acquisition pipeline.
/// Every lower-level failure is classified into one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RequestErrorType {
    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("location permission missing")]
    AccessLocationPermissionMissing,

    #[error("background location permission missing")]
    AccessBackgroundLocationPermissionMissing,

    #[error("location failed")]
    LocationFailed,

    #[error("weather request failed")]
    WeatherReqFailed,

    #[error("API limit reached")]
    ApiLimitReached,
}

/// What the UI should offer the user for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    OpenNetworkSettings,
    OpenAppPermissionSettings,
    OpenLocationSettings,
    ShowApiLimitHelp,
    EditConfig,
    Retry,
}

impl UserAction {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::OpenNetworkSettings => "Check your network settings.",
            Self::OpenAppPermissionSettings => "Grant location access in your system settings.",
            Self::OpenLocationSettings => "Make sure location services are enabled.",
            Self::ShowApiLimitHelp => {
                "Check the API key in your config, or wait for the quota to reset."
            }
            Self::EditConfig => "Review your config file.",
            Self::Retry => "Try again in a few minutes.",
        }
    }
}

impl RequestErrorType {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "No network connection. Check your connection and try again.",
            Self::AccessLocationPermissionMissing => {
                "Location permission is required to find your position."
            }
            Self::AccessBackgroundLocationPermissionMissing => {
                "Background location permission is required for automatic updates."
            }
            Self::LocationFailed => "Unable to determine your location.",
            Self::WeatherReqFailed => "Failed to get weather data. Please try again.",
            Self::ApiLimitReached => {
                "The weather provider rejected the request. The API key may be invalid or over its limit."
            }
        }
    }

    pub fn suggested_action(&self) -> UserAction {
        match self {
            Self::NetworkUnavailable => UserAction::OpenNetworkSettings,
            Self::AccessLocationPermissionMissing
            | Self::AccessBackgroundLocationPermissionMissing => {
                UserAction::OpenAppPermissionSettings
            }
            Self::LocationFailed => UserAction::OpenLocationSettings,
            Self::ApiLimitReached => UserAction::ShowApiLimitHelp,
            Self::WeatherReqFailed => UserAction::Retry,
        }
    }

    /// Whether a scheduled retry can be expected to succeed without user action.
    ///
    /// Transient failures shorten the polling interval instead of being shown
    /// to the user.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::LocationFailed | Self::WeatherReqFailed
        )
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }
}

/// Database/storage errors (SQLite, local state).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => {
                "Unable to access saved locations. Try restarting the app."
            }
            DatabaseError::QueryFailed(_) => "A data operation failed. Please try again.",
            DatabaseError::Corruption(_) => {
                "Saved locations may be corrupted. Consider resetting app data."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// Parsed, but failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "Configuration file could not be loaded. Check your settings.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
        }
    }
}

/// Weather service errors.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Weather API error: {0}")]
    ApiError(String),

    #[error("Missing credential for {0}")]
    MissingCredential(String),

    #[error("Unsupported weather source: {0}")]
    Unsupported(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::LocationNotFound(_) => "Location not found. Check and try again.",
            WeatherError::ApiError(_) => "Weather service error. Please try again.",
            WeatherError::MissingCredential(_) => {
                "An API key for the selected weather source is missing. Check settings."
            }
            WeatherError::Unsupported(_) => {
                "This weather source is not available. Choose another source."
            }
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_actions() {
        assert_eq!(
            RequestErrorType::AccessLocationPermissionMissing.suggested_action(),
            UserAction::OpenAppPermissionSettings
        );
        assert_eq!(
            RequestErrorType::AccessBackgroundLocationPermissionMissing.suggested_action(),
            UserAction::OpenAppPermissionSettings
        );
        assert_eq!(
            RequestErrorType::ApiLimitReached.suggested_action(),
            UserAction::ShowApiLimitHelp
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RequestErrorType::WeatherReqFailed.is_transient());
        assert!(RequestErrorType::LocationFailed.is_transient());
        assert!(RequestErrorType::NetworkUnavailable.is_transient());
        assert!(!RequestErrorType::ApiLimitReached.is_transient());
        assert!(!RequestErrorType::AccessLocationPermissionMissing.is_transient());
    }

    #[test]
    fn test_app_error_conversion() {
        let app_err: AppError = RequestErrorType::ApiLimitReached.into();
        assert!(matches!(
            app_err,
            AppError::Request(RequestErrorType::ApiLimitReached)
        ));
    }

    #[test]
    fn test_user_message_propagation() {
        let app_err = AppError::Weather(WeatherError::LocationNotFound("Atlantis".into()));
        assert_eq!(app_err.user_message(), "Location not found. Check and try again.");
    }

    #[test]
    fn test_app_error_suggests_action() {
        let err = AppError::Request(RequestErrorType::ApiLimitReached);
        assert_eq!(err.suggested_action(), Some(UserAction::ShowApiLimitHelp));

        let err = AppError::Config(ConfigError::Invalid("polling.interval_minutes".into()));
        assert_eq!(err.user_message(), "Invalid configuration. Check your settings.");
        assert_eq!(err.suggested_action(), Some(UserAction::EditConfig));

        let err = AppError::Weather(WeatherError::MissingCredential("AccuWeather".into()));
        assert_eq!(err.suggested_action(), Some(UserAction::EditConfig));

        assert_eq!(AppError::Cancelled.suggested_action(), None);
    }

    #[test]
    fn test_network_error_points_at_settings() {
        let err = NetworkError::Timeout;
        assert_eq!(err.user_message(), "The request timed out. Please try again.");
        assert_eq!(
            AppError::from(err).suggested_action(),
            Some(UserAction::OpenNetworkSettings)
        );
    }

    #[test]
    fn test_rusqlite_error_maps_to_query_failed() {
        let err = rusqlite::Error::QueryReturnedNoRows.into_database_error();
        assert!(matches!(err, DatabaseError::QueryFailed(_)));
    }
}
