use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::DateRange;
use crate::error::ClimprojError;

const RAW_DIR: &str = "_raw";
const POINTS_DIR: &str = "_points";

/// Output layout under `output_root`:
///
/// ```text
/// <model>/<experiment>/<variable>_<year>.nc            grid artifacts
/// <model>/<experiment>/<year>.csv                      merged point tables
/// <model>/<experiment>/_raw/<variable>/<file>.nc       downloads awaiting processing
/// <model>/<experiment>/_points/<variable>/<variable>_<year>.csv
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: Utf8PathBuf) -> Self {
        Self { output_root }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn experiment_dir(&self, model: &str, experiment: &str) -> Utf8PathBuf {
        self.output_root.join(model).join(experiment)
    }

    pub fn raw_dir(&self, model: &str, experiment: &str, variable: &str) -> Utf8PathBuf {
        self.experiment_dir(model, experiment)
            .join(RAW_DIR)
            .join(variable)
    }

    pub fn points_dir(&self, model: &str, experiment: &str, variable: &str) -> Utf8PathBuf {
        self.experiment_dir(model, experiment)
            .join(POINTS_DIR)
            .join(variable)
    }

    pub fn grid_path(&self, model: &str, experiment: &str, variable: &str, year: i32) -> Utf8PathBuf {
        self.experiment_dir(model, experiment)
            .join(grid_file_name(variable, year))
    }

    pub fn points_csv_path(
        &self,
        model: &str,
        experiment: &str,
        variable: &str,
        year: i32,
    ) -> Utf8PathBuf {
        self.points_dir(model, experiment, variable)
            .join(points_file_name(variable, year))
    }

    pub fn merged_csv_path(&self, model: &str, experiment: &str, year: i32) -> Utf8PathBuf {
        self.experiment_dir(model, experiment)
            .join(format!("{year}.csv"))
    }

    /// Whether every year covered by `range` already has its per-variable artifact.
    pub fn artifacts_complete(
        &self,
        model: &str,
        experiment: &str,
        variable: &str,
        range: &DateRange,
        points: bool,
    ) -> bool {
        range.years().all(|year| {
            let path = if points {
                self.points_csv_path(model, experiment, variable, year)
            } else {
                self.grid_path(model, experiment, variable, year)
            };
            path.as_std_path().is_file()
        })
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), ClimprojError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| ClimprojError::Filesystem(err.to_string()))
    }

    /// Run `write` against a temporary file next to `path`, then move it into place.
    /// A failed write leaves no partial file at `path`.
    pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), ClimprojError>
    where
        F: FnOnce(&Path) -> Result<(), ClimprojError>,
    {
        let parent = path
            .parent()
            .ok_or_else(|| ClimprojError::Filesystem(format!("invalid destination path {path}")))?;
        Self::ensure_dir(parent)?;
        let suffix = path
            .extension()
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let temp = Builder::new()
            .prefix(".climproj-")
            .suffix(&suffix)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
        write(temp.path())?;
        temp.persist(path.as_std_path())
            .map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ClimprojError> {
        Self::write_atomic(path, |temp| {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(temp)
                .map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
            file.write_all(content)
                .map_err(|err| ClimprojError::Filesystem(err.to_string()))
        })
    }

    pub fn remove_file(path: &Utf8Path) -> Result<(), ClimprojError> {
        fs::remove_file(path.as_std_path())
            .map_err(|err| ClimprojError::Filesystem(format!("remove {path}: {err}")))
    }
}

pub fn grid_file_name(variable: &str, year: i32) -> String {
    format!("{variable}_{year}.nc")
}

pub fn points_file_name(variable: &str, year: i32) -> String {
    format!("{variable}_{year}.csv")
}

pub fn utf8_path(path: &Path) -> Result<Utf8PathBuf, ClimprojError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| ClimprojError::Filesystem(format!("non UTF-8 path {}", path.display())))
}
