//! Display units.
//!
//! The model always stores canonical units (°C, km/h, mm, hPa, km). These
//! types convert for presentation only; source clients never use them.

use serde::{Deserialize, Serialize};

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn from_celsius(&self, value: f64) -> f64 {
        match self {
            Self::Celsius => value,
            Self::Fahrenheit => value * 9.0 / 5.0 + 32.0,
            Self::Kelvin => value + 273.15,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Kelvin => "K",
        }
    }

    pub fn format(&self, celsius: f64) -> String {
        format!("{:.0}{}", self.from_celsius(celsius), self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Kph,
    Mps,
    Mph,
    Knots,
}

impl SpeedUnit {
    pub fn from_kph(&self, value: f64) -> f64 {
        match self {
            Self::Kph => value,
            Self::Mps => value / 3.6,
            Self::Mph => value / 1.609_344,
            Self::Knots => value / 1.852,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Kph => "km/h",
            Self::Mps => "m/s",
            Self::Mph => "mph",
            Self::Knots => "kn",
        }
    }

    pub fn format(&self, kph: f64) -> String {
        format!("{:.1} {}", self.from_kph(kph), self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrecipitationUnit {
    #[default]
    Mm,
    Cm,
    In,
}

impl PrecipitationUnit {
    pub fn from_mm(&self, value: f64) -> f64 {
        match self {
            Self::Mm => value,
            Self::Cm => value / 10.0,
            Self::In => value / 25.4,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Mm => "mm",
            Self::Cm => "cm",
            Self::In => "in",
        }
    }

    pub fn format(&self, mm: f64) -> String {
        format!("{:.1} {}", self.from_mm(mm), self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PressureUnit {
    #[default]
    Hpa,
    Kpa,
    Mmhg,
    Inhg,
}

impl PressureUnit {
    pub fn from_hpa(&self, value: f64) -> f64 {
        match self {
            Self::Hpa => value,
            Self::Kpa => value / 10.0,
            Self::Mmhg => value * 0.750_061_68,
            Self::Inhg => value * 0.029_529_98,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Hpa => "hPa",
            Self::Kpa => "kPa",
            Self::Mmhg => "mmHg",
            Self::Inhg => "inHg",
        }
    }

    pub fn format(&self, hpa: f64) -> String {
        match self {
            Self::Inhg => format!("{:.2} {}", self.from_hpa(hpa), self.symbol()),
            _ => format!("{:.0} {}", self.from_hpa(hpa), self.symbol()),
        }
    }
}

/// A consistent set of display units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitSet {
    pub temperature: TemperatureUnit,
    pub speed: SpeedUnit,
    pub precipitation: PrecipitationUnit,
    pub pressure: PressureUnit,
}

impl UnitSet {
    pub fn metric() -> Self {
        Self::default()
    }

    pub fn imperial() -> Self {
        Self {
            temperature: TemperatureUnit::Fahrenheit,
            speed: SpeedUnit::Mph,
            precipitation: PrecipitationUnit::In,
            pressure: PressureUnit::Inhg,
        }
    }
}
