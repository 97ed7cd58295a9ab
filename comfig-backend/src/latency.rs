//! Piecewise fiber latency model.
//!
//! Short hops run over well-provisioned fiber close to the speed of light,
//! long hops pick up routing, peering and undersea-cable detours. The model
//! walks a table of distance bands, each with its own effective speed.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("fiber band table cannot be empty")]
    Empty,

    #[error("band {0}: speed must be a positive number of km per ms")]
    InvalidSpeed(usize),

    #[error("band {0}: capacity must be a positive number of km")]
    InvalidCapacity(usize),

    #[error("only the last band may be unbounded")]
    UnboundedNotLast,

    #[error("the last band must be unbounded")]
    LastBandBounded,

    #[error("malformed band '{0}' (expected '<km>:<km_per_ms>' or '*:<km_per_ms>')")]
    Malformed(String),
}

/// One distance band of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiberBand {
    /// How many km this band absorbs; `None` absorbs everything left.
    pub capacity_km: Option<f64>,
    /// Distance covered per millisecond of round-trip-equivalent delay.
    pub km_per_ms: f64,
}

impl FiberBand {
    pub const fn bounded(capacity_km: f64, km_per_ms: f64) -> Self {
        Self {
            capacity_km: Some(capacity_km),
            km_per_ms,
        }
    }

    pub const fn unbounded(km_per_ms: f64) -> Self {
        Self {
            capacity_km: None,
            km_per_ms,
        }
    }
}

/// Converts a distance into the ideal ping over fiber.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyModel {
    bands: Vec<FiberBand>,
}

impl LatencyModel {
    pub fn new(bands: Vec<FiberBand>) -> Result<Self, CalibrationError> {
        if bands.is_empty() {
            return Err(CalibrationError::Empty);
        }

        let last = bands.len() - 1;
        for (i, band) in bands.iter().enumerate() {
            if !(band.km_per_ms.is_finite() && band.km_per_ms > 0.0) {
                return Err(CalibrationError::InvalidSpeed(i));
            }
            match band.capacity_km {
                Some(cap) if !(cap.is_finite() && cap > 0.0) => {
                    return Err(CalibrationError::InvalidCapacity(i));
                }
                Some(_) if i == last => return Err(CalibrationError::LastBandBounded),
                None if i != last => return Err(CalibrationError::UnboundedNotLast),
                _ => {}
            }
        }

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[FiberBand] {
        &self.bands
    }

    /// Ideal ping in milliseconds for a path of `distance_km`.
    pub fn ideal_ping_ms(&self, distance_km: f64) -> f64 {
        let mut remaining = distance_km.max(0.0);
        let mut ping = 0.0;

        for band in &self.bands {
            let consumed = match band.capacity_km {
                Some(capacity) => remaining.min(capacity),
                None => remaining,
            };
            ping += consumed / band.km_per_ms;
            remaining -= consumed;
            if remaining <= 0.0 {
                break;
            }
        }

        ping
    }
}

impl Default for LatencyModel {
    /// 250 km at 125 km/ms, the next 1250 km at 72 km/ms, the rest at 65.5 km/ms.
    fn default() -> Self {
        Self {
            bands: vec![
                FiberBand::bounded(250.0, 125.0),
                FiberBand::bounded(1250.0, 72.0),
                FiberBand::unbounded(65.5),
            ],
        }
    }
}

/// Parses `"250:125,1250:72,*:65.5"`.
impl FromStr for LatencyModel {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bands = s
            .split(',')
            .map(str::trim)
            .filter(|band| !band.is_empty())
            .map(|band| -> Result<FiberBand, CalibrationError> {
                let malformed = || CalibrationError::Malformed(band.to_string());
                let (capacity, speed) = band.split_once(':').ok_or_else(malformed)?;
                let km_per_ms: f64 = speed.trim().parse().map_err(|_| malformed())?;
                let capacity_km = match capacity.trim() {
                    "*" => None,
                    km => Some(km.parse::<f64>().map_err(|_| malformed())?),
                };
                Ok(FiberBand {
                    capacity_km,
                    km_per_ms,
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;

        Self::new(bands)
    }
}

impl fmt::Display for LatencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, band) in self.bands.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match band.capacity_km {
                Some(km) => write!(f, "{km}:{}", band.km_per_ms)?,
                None => write!(f, "*:{}", band.km_per_ms)?,
            }
        }
        Ok(())
    }
}
