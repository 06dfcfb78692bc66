use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, error, warn};

use crate::assemble;
use crate::domain::{SpatialMode, Target};
use crate::error::ClimprojError;
use crate::metadata::ResolvedVariable;
use crate::netcdf_io::DatasetIo;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Artifacts written; the raw file has been removed.
    Written(Vec<Utf8PathBuf>),
    /// Processing failed; the raw file was left in place.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: usize,
    pub failed: usize,
    pub artifacts: Vec<Utf8PathBuf>,
}

pub struct PostProcessor<'a, D: DatasetIo> {
    io: &'a D,
    store: &'a Store,
}

impl<'a, D: DatasetIo> PostProcessor<'a, D> {
    pub fn new(io: &'a D, store: &'a Store) -> Self {
        Self { io, store }
    }

    /// Normalize, convert, subset and split one raw file, then delete it.
    pub fn process(
        &self,
        target: Target<'_>,
        path: &Utf8Path,
        mode: &SpatialMode,
        resolved: &ResolvedVariable,
    ) -> ProcessOutcome {
        let file = path.file_name().unwrap_or(path.as_str());
        let artifacts = match self.reshape(target, path, file, mode, resolved) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!(
                    model = target.model,
                    experiment = target.experiment,
                    variable = target.variable,
                    %file,
                    error = %err,
                    "post-processing failed; raw file kept"
                );
                return ProcessOutcome::Failed;
            }
        };

        if let Err(err) = Store::remove_file(path) {
            warn!(%file, error = %err, "could not remove raw file");
        }
        debug!(
            model = target.model,
            experiment = target.experiment,
            variable = target.variable,
            %file,
            artifacts = artifacts.len(),
            "processed"
        );
        ProcessOutcome::Written(artifacts)
    }

    /// Process every path on `pool`. Files are independent and write disjoint outputs.
    pub fn process_all(
        &self,
        pool: &ThreadPool,
        target: Target<'_>,
        paths: &[Utf8PathBuf],
        mode: &SpatialMode,
        resolved: &ResolvedVariable,
    ) -> ProcessSummary {
        let outcomes: Vec<ProcessOutcome> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| self.process(target, path, mode, resolved))
                .collect()
        });

        let mut summary = ProcessSummary::default();
        for outcome in outcomes {
            match outcome {
                ProcessOutcome::Written(artifacts) => {
                    summary.processed += 1;
                    summary.artifacts.extend(artifacts);
                }
                ProcessOutcome::Failed => summary.failed += 1,
            }
        }
        summary.artifacts.sort();
        summary
    }

    fn reshape(
        &self,
        target: Target<'_>,
        path: &Utf8Path,
        file: &str,
        mode: &SpatialMode,
        resolved: &ResolvedVariable,
    ) -> Result<Vec<Utf8PathBuf>, ClimprojError> {
        let mut dataset = self.io.open(path.as_std_path(), resolved.source_id)?;
        if dataset.normalize_longitude() {
            debug!(%file, "longitudes remapped to -180..180");
        }
        if resolved.convert.is_some() {
            dataset.convert_units(|value| resolved.apply(value), resolved.units);
        } else if let Some(units) = resolved.units {
            dataset.units = Some(units.to_string());
        }

        let experiment_dir = self.store.experiment_dir(target.model, target.experiment);
        match mode {
            SpatialMode::Bbox(bbox) => {
                let clipped = dataset.clip(bbox)?;
                assemble::split_by_year(self.io, &clipped, file, &experiment_dir, target.variable)
            }
            SpatialMode::Points(points) => {
                let sampled = dataset.extract_points(points)?;
                let points_dir = self
                    .store
                    .points_dir(target.model, target.experiment, target.variable);
                assemble::export_points_csv_by_year(&sampled, file, &points_dir, target.variable)
            }
            SpatialMode::None => {
                assemble::split_by_year(self.io, &dataset, file, &experiment_dir, target.variable)
            }
        }
    }
}
