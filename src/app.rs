use std::collections::HashMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::assemble;
use crate::catalog::CatalogClient;
use crate::discovery::{discover, select_models};
use crate::domain::{AcquisitionRequest, Target};
use crate::download::{DownloadOrchestrator, FileFetcher, build_pool};
use crate::error::ClimprojError;
use crate::metadata::{CMIP6_PRODUCT, ESGF_SOURCE, ResolvedVariable, VariableResolver};
use crate::netcdf_io::DatasetIo;
use crate::postprocess::PostProcessor;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionReport {
    pub started_at: String,
    pub finished_at: String,
    pub output_root: String,
    pub spatial_mode: String,
    pub models: Vec<String>,
    pub batches: Vec<BatchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub model: String,
    pub experiment: String,
    pub variables: Vec<VariableReport>,
    /// Merged `<year>.csv` tables (point mode only).
    pub merged: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableReport {
    pub variable: String,
    pub variable_id: String,
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub processed: usize,
    pub process_failed: usize,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub processed: usize,
    pub process_failed: usize,
}

impl AcquisitionReport {
    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for variable in self.batches.iter().flat_map(|batch| &batch.variables) {
            totals.fetched += variable.fetched;
            totals.skipped += variable.skipped;
            totals.failed += variable.failed;
            totals.processed += variable.processed;
            totals.process_failed += variable.process_failed;
        }
        totals
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogClient, F: FileFetcher, D: DatasetIo, V: VariableResolver> {
    catalog: C,
    fetcher: F,
    io: D,
    resolver: V,
}

impl<C, F, D, V> App<C, F, D, V>
where
    C: CatalogClient,
    F: FileFetcher,
    D: DatasetIo,
    V: VariableResolver,
{
    pub fn new(catalog: C, fetcher: F, io: D, resolver: V) -> Self {
        Self {
            catalog,
            fetcher,
            io,
            resolver,
        }
    }

    /// Run discovery, download, post-processing and assembly for `request`.
    ///
    /// Only unresolvable variables and worker-pool setup abort the run; every
    /// per-file problem is logged and counted in the report.
    pub fn acquire(
        &self,
        request: &AcquisitionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<AcquisitionReport, ClimprojError> {
        let started = Instant::now();
        let started_at = iso_timestamp();
        if request.experiments.is_empty() {
            return Err(ClimprojError::MissingField("experiments".to_string()));
        }
        if request.variables.is_empty() {
            return Err(ClimprojError::MissingField("variables".to_string()));
        }

        let resolved = request
            .variables
            .iter()
            .map(|variable| {
                self.resolver
                    .resolve(variable, CMIP6_PRODUCT, ESGF_SOURCE)
                    .map(|resolved| (variable.as_str(), resolved))
            })
            .collect::<Result<Vec<(&str, ResolvedVariable)>, ClimprojError>>()?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Discover; {} experiment(s) x {} variable(s)",
                request.experiments.len(),
                resolved.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        let variable_ids: Vec<String> = resolved
            .iter()
            .map(|(_, resolved)| resolved.source_id.to_string())
            .collect();
        let model_set = discover(&self.catalog, &request.experiments, &variable_ids);
        let models: Vec<String> = select_models(&model_set, request.models.as_deref())
            .into_iter()
            .collect();

        let store = Store::new(request.output_root.clone());
        let mut report = AcquisitionReport {
            started_at,
            finished_at: String::new(),
            output_root: store.output_root().to_string(),
            spatial_mode: request.spatial_mode.label().to_string(),
            models: models.clone(),
            batches: Vec::new(),
        };
        if models.is_empty() {
            warn!("no model offers daily data for every requested experiment and variable");
            report.finished_at = iso_timestamp();
            return Ok(report);
        }
        info!(models = %models.join(","), "models selected");

        let pool = build_pool(request.workers)?;
        let downloader = DownloadOrchestrator::new(
            &self.catalog,
            &self.fetcher,
            &store,
            &pool,
            request.start_year,
            request.spatial_mode.is_points(),
        );
        let processor = PostProcessor::new(&self.io, &store);

        for model in &models {
            for experiment in &request.experiments {
                let mut batch = BatchReport {
                    model: model.clone(),
                    experiment: experiment.clone(),
                    variables: Vec::new(),
                    merged: Vec::new(),
                };
                let mut staged: HashMap<String, Vec<Utf8PathBuf>> = HashMap::new();

                for &(variable, resolved) in &resolved {
                    let target = Target {
                        model: model.as_str(),
                        experiment: experiment.as_str(),
                        variable,
                    };
                    sink.event(ProgressEvent {
                        message: format!("phase=Fetch; {model}/{experiment}/{variable}"),
                        elapsed: Some(started.elapsed()),
                    });
                    let fetched = downloader.fetch_all(target, resolved.source_id);

                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Process; {model}/{experiment}/{variable} ({} file(s))",
                            fetched.paths.len()
                        ),
                        elapsed: Some(started.elapsed()),
                    });
                    let processed = processor.process_all(
                        &pool,
                        target,
                        &fetched.paths,
                        &request.spatial_mode,
                        &resolved,
                    );

                    if request.spatial_mode.is_points() {
                        let mut tables = processed.artifacts.clone();
                        // Years skipped as complete still take part in the merge.
                        for year in &fetched.complete_years {
                            let path = store.points_csv_path(model, experiment, variable, *year);
                            if store.exists(&path) && !tables.contains(&path) {
                                tables.push(path);
                            }
                        }
                        staged.insert(variable.to_string(), tables);
                    }

                    batch.variables.push(VariableReport {
                        variable: variable.to_string(),
                        variable_id: resolved.source_id.to_string(),
                        fetched: fetched.fetched,
                        skipped: fetched.skipped,
                        failed: fetched.failed,
                        processed: processed.processed,
                        process_failed: processed.failed,
                        artifacts: processed.artifacts.iter().map(ToString::to_string).collect(),
                    });
                }

                if request.spatial_mode.is_points() && staged.values().any(|paths| !paths.is_empty()) {
                    sink.event(ProgressEvent {
                        message: format!("phase=Merge; {model}/{experiment}"),
                        elapsed: Some(started.elapsed()),
                    });
                    match assemble::merge_points_csvs_by_year(
                        &store,
                        model,
                        experiment,
                        &staged,
                        &request.variables,
                    ) {
                        Ok(paths) => {
                            batch.merged = paths.iter().map(ToString::to_string).collect();
                        }
                        Err(err) => {
                            error!(%model, %experiment, error = %err, "merging point tables failed");
                        }
                    }
                }
                report.batches.push(batch);
            }
        }

        report.finished_at = iso_timestamp();
        let totals = report.totals();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; fetched={} skipped={} failed={}",
                totals.fetched, totals.skipped, totals.failed
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
