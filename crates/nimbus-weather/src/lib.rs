//! Location resolution and weather retrieval for Nimbus.
//!
//! Location providers find the device, weather sources fetch forecasts for a
//! [`Location`], and both report failures as [`SourceError`] for the services
//! layer to classify.

pub mod coord;
pub mod error;
pub mod geocode;
pub mod http;
pub mod location;
pub mod retry;
pub mod source;
pub mod types;
pub mod units;

pub use error::{SourceError, Stage};
pub use geocode::NominatimClient;
pub use http::HttpClient;
pub use location::{
    create_provider, platform_signals, DesktopPlatform, LocationProvider, LocationResolver,
    Permission, Platform, Position, ResolveError,
};
pub use retry::RetryConfig;
pub use source::{SourceRegistry, WeatherSourceClient};
pub use types::*;
pub use units::UnitSet;
