use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_DATA_NODE, DEFAULT_ESGF_URL};
use crate::domain::{AcquisitionRequest, BoundingBox, Credentials, Point, SpatialMode};
use crate::error::ClimprojError;

pub const CONFIG_FILE: &str = "climproj.json";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;
pub const USERNAME_ENV: &str = "ESGF_USERNAME";
pub const PASSWORD_ENV: &str = "ESGF_PASSWORD";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub experiments: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    /// `[lon_min, lat_min, lon_max, lat_max]`
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub points: Option<Vec<PointEntry>>,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub catalog: Option<CatalogEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PointEntry {
    Pair([f64; 2]),
    Detailed { lon: f64, lat: f64 },
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub url: Option<String>,
    /// `null` searches every node.
    #[serde(default = "default_data_node")]
    pub data_node: Option<String>,
    /// Catalog search requests.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Whole-file transfer limit; `0` disables it.
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
}

fn default_data_node() -> Option<String> {
    Some(DEFAULT_DATA_NODE.to_string())
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub models: Option<Vec<String>>,
    pub experiments: Option<Vec<String>>,
    pub variables: Option<Vec<String>>,
    pub bbox: Option<BoundingBox>,
    pub points: Option<Vec<Point>>,
    pub start_year: Option<i32>,
    pub output: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub url: String,
    pub data_node: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub download_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub request: AcquisitionRequest,
    pub catalog: CatalogSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or the first `climproj.json` found in the working directory
    /// and then the user config directory. Without any file, only `overrides` apply.
    pub fn resolve(path: Option<&str>, overrides: Overrides) -> Result<ResolvedConfig, ClimprojError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => match Self::discover() {
                Some(found) => Self::read(found)?,
                None => Config::default(),
            },
        };
        Self::resolve_config(Self::apply(config, overrides))
    }

    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "climproj")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.is_file())
    }

    fn read(path: PathBuf) -> Result<Config, ClimprojError> {
        let content = fs::read_to_string(&path).map_err(|_| ClimprojError::ConfigRead(path))?;
        serde_json::from_str(&content).map_err(|err| ClimprojError::ConfigParse(err.to_string()))
    }

    pub fn apply(mut config: Config, overrides: Overrides) -> Config {
        if let Some(models) = overrides.models {
            config.models = Some(models);
        }
        if let Some(experiments) = overrides.experiments {
            config.experiments = experiments;
        }
        if let Some(variables) = overrides.variables {
            config.variables = variables;
        }
        if let Some(bbox) = overrides.bbox {
            config.bbox = Some(vec![bbox.lon_min, bbox.lat_min, bbox.lon_max, bbox.lat_max]);
        }
        if let Some(points) = overrides.points {
            config.points = Some(
                points
                    .into_iter()
                    .map(|point| PointEntry::Pair([point.lon, point.lat]))
                    .collect(),
            );
        }
        if overrides.start_year.is_some() {
            config.start_year = overrides.start_year;
        }
        if overrides.output.is_some() {
            config.output = overrides.output;
        }
        if overrides.workers.is_some() {
            config.workers = overrides.workers;
        }
        config
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ClimprojError> {
        Self::resolve_config_with_env(config, |key| std::env::var(key).ok())
    }

    pub fn resolve_config_with_env<E>(config: Config, env: E) -> Result<ResolvedConfig, ClimprojError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let schema_version = config.schema_version.unwrap_or(1);

        let bbox = config
            .bbox
            .as_deref()
            .map(BoundingBox::from_slice)
            .transpose()?;
        let points = config
            .points
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|entry| match entry {
                        PointEntry::Pair([lon, lat]) => Point::new(lon, lat),
                        PointEntry::Detailed { lon, lat } => Point::new(lon, lat),
                    })
                    .collect::<Result<Vec<_>, ClimprojError>>()
            })
            .transpose()?;
        let spatial_mode = SpatialMode::from_parts(bbox, points)?;

        if config.experiments.is_empty() {
            return Err(ClimprojError::MissingField("experiments".to_string()));
        }
        if config.variables.is_empty() {
            return Err(ClimprojError::MissingField("variables".to_string()));
        }
        let experiments = validate_identifiers(config.experiments)?;
        let variables = validate_identifiers(config.variables)?;
        let models = config.models.map(validate_identifiers).transpose()?;

        let output_root = config
            .output
            .filter(|value| !value.trim().is_empty())
            .map(Utf8PathBuf::from)
            .ok_or_else(|| ClimprojError::MissingField("output".to_string()))?;

        let credentials = Credentials::new(
            config.username.or_else(|| env(USERNAME_ENV)),
            config.password.or_else(|| env(PASSWORD_ENV)),
        )?;

        let catalog = config.catalog.unwrap_or(CatalogEntry {
            data_node: default_data_node(),
            ..CatalogEntry::default()
        });

        Ok(ResolvedConfig {
            schema_version,
            request: AcquisitionRequest {
                models,
                experiments,
                variables,
                spatial_mode,
                start_year: config.start_year,
                output_root,
                credentials,
                workers: config.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            },
            catalog: CatalogSettings {
                url: catalog.url.unwrap_or_else(|| DEFAULT_ESGF_URL.to_string()),
                data_node: catalog.data_node.filter(|node| !node.trim().is_empty()),
                timeout: Duration::from_secs(
                    catalog.timeout_secs.unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
                ),
                connect_timeout: Duration::from_secs(
                    catalog
                        .connect_timeout_secs
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                ),
                download_timeout: match catalog
                    .download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS)
                {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
        })
    }
}

/// Identifiers end up as path components, so only a conservative character set is accepted.
fn validate_identifiers(values: Vec<String>) -> Result<Vec<String>, ClimprojError> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim().to_string();
        let valid = !value.is_empty()
            && !value.starts_with('.')
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ClimprojError::InvalidIdentifier(value));
        }
        if !out.contains(&value) {
            out.push(value);
        }
    }
    Ok(out)
}
