use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClimprojError;

static DATE_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8})-(\d{8})").unwrap());

/// Rectangular lon/lat window, stored in the `[lon_min, lat_min, lon_max, lat_max]` order
/// used on the command line and in config files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Result<Self, ClimprojError> {
        let raw = format!("{lon_min},{lat_min},{lon_max},{lat_max}");
        if [lon_min, lat_min, lon_max, lat_max]
            .iter()
            .any(|value| !value.is_finite())
        {
            return Err(ClimprojError::InvalidBbox(raw));
        }
        if lon_min > lon_max || lat_min > lat_max {
            return Err(ClimprojError::InvalidBbox(raw));
        }
        if !(-90.0..=90.0).contains(&lat_min) || !(-90.0..=90.0).contains(&lat_max) {
            return Err(ClimprojError::InvalidBbox(raw));
        }
        Ok(Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        })
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, ClimprojError> {
        match values {
            [lon_min, lat_min, lon_max, lat_max] => {
                Self::new(*lon_min, *lat_min, *lon_max, *lat_max)
            }
            _ => Err(ClimprojError::InvalidBbox(format!(
                "expected 4 coordinates, got {}",
                values.len()
            ))),
        }
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max
    }

    pub fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max
    }
}

impl FromStr for BoundingBox {
    type Err = ClimprojError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let values = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ClimprojError::InvalidBbox(value.to_string()))?;
        Self::from_slice(&values)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.lon_min, self.lat_min, self.lon_max, self.lat_max
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Result<Self, ClimprojError> {
        if !lon.is_finite() || !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ClimprojError::InvalidPoint(format!("{lon},{lat}")));
        }
        Ok(Self { lon, lat })
    }
}

impl FromStr for Point {
    type Err = ClimprojError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (lon, lat) = value
            .split_once(',')
            .ok_or_else(|| ClimprojError::InvalidPoint(value.to_string()))?;
        let lon = lon
            .trim()
            .parse::<f64>()
            .map_err(|_| ClimprojError::InvalidPoint(value.to_string()))?;
        let lat = lat
            .trim()
            .parse::<f64>()
            .map_err(|_| ClimprojError::InvalidPoint(value.to_string()))?;
        Self::new(lon, lat)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpatialMode {
    Bbox(BoundingBox),
    Points(Vec<Point>),
    None,
}

impl SpatialMode {
    pub fn from_parts(
        bbox: Option<BoundingBox>,
        points: Option<Vec<Point>>,
    ) -> Result<Self, ClimprojError> {
        match (bbox, points) {
            (Some(_), Some(_)) => Err(ClimprojError::ConflictingSpatialMode),
            (Some(bbox), None) => Ok(SpatialMode::Bbox(bbox)),
            (None, Some(points)) if points.is_empty() => Ok(SpatialMode::None),
            (None, Some(points)) => Ok(SpatialMode::Points(points)),
            (None, None) => Ok(SpatialMode::None),
        }
    }

    pub fn is_points(&self) -> bool {
        matches!(self, SpatialMode::Points(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpatialMode::Bbox(_) => "bbox",
            SpatialMode::Points(_) => "points",
            SpatialMode::None => "none",
        }
    }
}

/// Start/end pair encoded in CMIP-style filenames, e.g. `pr_day_..._20150101-20241231.nc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    start: String,
    end: String,
}

impl DateRange {
    pub fn from_filename(name: &str) -> Option<Self> {
        let captures = DATE_RANGE_RE.captures(name)?;
        Some(Self {
            start: captures[1].to_string(),
            end: captures[2].to_string(),
        })
    }

    pub fn parse_filename(name: &str) -> Result<Self, ClimprojError> {
        Self::from_filename(name).ok_or_else(|| ClimprojError::InvalidDateRange(name.to_string()))
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn start_year(&self) -> i32 {
        year_prefix(&self.start)
    }

    pub fn end_year(&self) -> i32 {
        year_prefix(&self.end)
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start_year()..=self.end_year()
    }

    pub fn is_single_year(&self) -> bool {
        self.start_year() == self.end_year()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn year_prefix(date: &str) -> i32 {
    // Eight ASCII digits are guaranteed by the regex.
    date[..4].parse().unwrap_or_default()
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Result<Self, ClimprojError> {
        let username = username.filter(|value| !value.trim().is_empty());
        let password = password.filter(|value| !value.is_empty());
        match (username, password) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(ClimprojError::MissingCredentials),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The (model, experiment, variable) a file or artifact belongs to. `variable`
/// is the requested name, which is also used in output file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub model: &'a str,
    pub experiment: &'a str,
    pub variable: &'a str,
}

#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub models: Option<Vec<String>>,
    pub experiments: Vec<String>,
    pub variables: Vec<String>,
    pub spatial_mode: SpatialMode,
    pub start_year: Option<i32>,
    pub output_root: Utf8PathBuf,
    pub credentials: Credentials,
    pub workers: usize,
}
